//! Coordination service request/response types

use std::fmt;

/// Lease identifier granted by the coordination service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub i64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// Key identifying one holder's claim on a distributed mutex
///
/// `path` is the mutex name shared by every contender, `key` is the
/// holder-specific entry the service created under it and
/// `create_revision` the revision that entry was created at. A key deleted
/// and created again under the same name is a different claim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    pub path: String,
    pub key: String,
    pub create_revision: i64,
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// Guard evaluated by the service atomically at commit time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// Holds while the given lock key is still the owner of its mutex
    IsOwner(LockKey),
}

/// Operation executed when every condition of a transaction holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnOp {
    Put { key: String, value: Vec<u8> },
    Get { key: String },
}

impl TxnOp {
    pub fn put(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn get(key: impl Into<String>) -> Self {
        Self::Get { key: key.into() }
    }
}

/// Conditional transaction: `If(when).Then(then)`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Txn {
    pub when: Vec<Condition>,
    pub then: Vec<TxnOp>,
}

impl Txn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn when(mut self, conditions: impl IntoIterator<Item = Condition>) -> Self {
        self.when.extend(conditions);
        self
    }

    pub fn and_then(mut self, ops: impl IntoIterator<Item = TxnOp>) -> Self {
        self.then.extend(ops);
        self
    }
}

/// A stored key/value pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: Vec<u8>,
}

/// Result of one `TxnOp`, in the same position as the op
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnOpResult {
    Put,
    Get(Vec<KeyValue>),
}

/// Outcome of a committed transaction
///
/// `succeeded == false` means a condition failed and no op ran; `results`
/// is empty in that case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnResponse {
    pub succeeded: bool,
    pub results: Vec<TxnOpResult>,
}

impl TxnResponse {
    pub fn rejected() -> Self {
        Self {
            succeeded: false,
            results: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_txn_builder_keeps_order() {
        let lock = LockKey {
            path: "/m/lock".to_string(),
            key: "/m/lock/1".to_string(),
            create_revision: 1,
        };
        let txn = Txn::new()
            .when([Condition::IsOwner(lock.clone())])
            .and_then([TxnOp::put("/m/state", b"v1".to_vec()), TxnOp::get("/m/state")]);

        assert_eq!(txn.when, vec![Condition::IsOwner(lock)]);
        assert_eq!(txn.then.len(), 2);
        assert!(matches!(txn.then[0], TxnOp::Put { .. }));
        assert!(matches!(txn.then[1], TxnOp::Get { .. }));
    }

    #[test]
    fn test_session_id_displays_as_hex() {
        assert_eq!(SessionId(255).to_string(), "ff");
    }
}
