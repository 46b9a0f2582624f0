//! In-process coordination service
//!
//! Mirrors the etcd semantics the store relies on: leases own keys, a mutex
//! is a set of waiter keys under the lock path, and the owner is the live
//! waiter with the lowest creation revision. Revoking a lease deletes its
//! keys, which hands the mutex to the next waiter.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info};

use super::{
    Condition, CoordError, CoordinationService, KeyValue, LockKey, SessionId, Txn, TxnOp, TxnOpResult, TxnResponse,
};

/// A granted lease and the keys bound to it
#[derive(Debug)]
struct Lease {
    ttl: Duration,
    keys: HashSet<String>,
}

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    create_revision: i64,
    lease: Option<SessionId>,
}

#[derive(Debug, Default)]
struct Inner {
    revision: i64,
    next_lease: i64,
    leases: HashMap<SessionId, Lease>,
    kv: BTreeMap<String, Entry>,
}

impl Inner {
    /// Waiter key currently owning the mutex at `path`
    fn owner_key(&self, path: &str) -> Option<&str> {
        let prefix = format!("{}/", path);
        self.kv
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter(|(_, entry)| entry.lease.is_some())
            .min_by_key(|(_, entry)| entry.create_revision)
            .map(|(key, _)| key.as_str())
    }

    fn is_owner(&self, lock: &LockKey) -> bool {
        self.owner_key(&lock.path) == Some(lock.key.as_str())
            && self
                .kv
                .get(&lock.key)
                .is_some_and(|entry| entry.create_revision == lock.create_revision)
    }

    fn put(&mut self, key: &str, value: Vec<u8>) {
        self.revision += 1;
        let revision = self.revision;
        match self.kv.get_mut(key) {
            Some(entry) => entry.value = value,
            None => {
                self.kv.insert(
                    key.to_string(),
                    Entry {
                        value,
                        create_revision: revision,
                        lease: None,
                    },
                );
            }
        }
    }

    fn remove(&mut self, key: &str) -> bool {
        match self.kv.remove(key) {
            Some(entry) => {
                if let Some(lease) = entry.lease.and_then(|id| self.leases.get_mut(&id)) {
                    lease.keys.remove(key);
                }
                self.revision += 1;
                true
            }
            None => false,
        }
    }
}

/// In-memory [`CoordinationService`] with etcd-like lock semantics
///
/// Leases never expire on their own: the service behaves as if keep-alives
/// always succeed. Expiry or a partition is simulated with
/// [`revoke_session`](CoordinationService::revoke_session) and
/// [`set_available`](MemoryService::set_available).
#[derive(Debug)]
pub struct MemoryService {
    inner: Mutex<Inner>,
    changed: Notify,
    available: AtomicBool,
}

impl Default for MemoryService {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryService {
    pub fn new() -> Self {
        debug!("MemoryService::new: called");
        Self {
            inner: Mutex::new(Inner::default()),
            changed: Notify::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Make every subsequent call fail (or succeed again) with a connection error
    pub fn set_available(&self, available: bool) {
        debug!(available, "MemoryService::set_available: called");
        self.available.store(available, Ordering::SeqCst);
        self.changed.notify_waiters();
    }

    /// Session currently owning the mutex at `path`
    pub async fn owner_of(&self, path: &str) -> Option<SessionId> {
        let inner = self.inner.lock().await;
        let key = inner.owner_key(path)?;
        inner.kv.get(key).and_then(|entry| entry.lease)
    }

    /// Sessions queued on the mutex at `path`, owner first
    pub async fn waiters(&self, path: &str) -> Vec<SessionId> {
        let inner = self.inner.lock().await;
        let prefix = format!("{}/", path);
        let mut waiters: Vec<(i64, SessionId)> = inner
            .kv
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(_, entry)| entry.lease.map(|lease| (entry.create_revision, lease)))
            .collect();
        waiters.sort();
        waiters.into_iter().map(|(_, session)| session).collect()
    }

    /// Raw read of a key, bypassing ownership checks
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.lock().await.kv.get(key).map(|entry| entry.value.clone())
    }

    /// Number of leases that have not been revoked
    pub async fn live_sessions(&self) -> usize {
        self.inner.lock().await.leases.len()
    }

    /// TTL a live session was granted with
    pub async fn session_ttl(&self, session: SessionId) -> Option<Duration> {
        self.inner.lock().await.leases.get(&session).map(|lease| lease.ttl)
    }

    fn check_available(&self) -> Result<(), CoordError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CoordError::Unavailable("memory service is partitioned".to_string()))
        }
    }
}

#[async_trait]
impl CoordinationService for MemoryService {
    async fn open_session(&self, ttl: Duration) -> Result<SessionId, CoordError> {
        debug!(?ttl, "MemoryService::open_session: called");
        self.check_available()?;
        let mut inner = self.inner.lock().await;
        inner.next_lease += 1;
        let id = SessionId(inner.next_lease);
        inner.leases.insert(
            id,
            Lease {
                ttl,
                keys: HashSet::new(),
            },
        );
        debug!(session = %id, "MemoryService::open_session: granted");
        Ok(id)
    }

    async fn revoke_session(&self, session: SessionId) -> Result<(), CoordError> {
        debug!(%session, "MemoryService::revoke_session: called");
        self.check_available()?;
        let mut inner = self.inner.lock().await;
        let lease = inner
            .leases
            .remove(&session)
            .ok_or(CoordError::SessionNotFound(session))?;
        for key in &lease.keys {
            inner.kv.remove(key);
        }
        inner.revision += 1;
        drop(inner);

        info!(%session, keys = lease.keys.len(), "Session revoked");
        self.changed.notify_waiters();
        Ok(())
    }

    async fn lock(&self, session: SessionId, path: &str) -> Result<LockKey, CoordError> {
        debug!(%session, %path, "MemoryService::lock: called");
        self.check_available()?;
        let key = format!("{}/{}", path, session);

        let lock = {
            let mut inner = self.inner.lock().await;
            if !inner.leases.contains_key(&session) {
                return Err(CoordError::SessionNotFound(session));
            }
            let create_revision = match inner.kv.get(&key) {
                Some(entry) => entry.create_revision,
                None => {
                    inner.revision += 1;
                    let revision = inner.revision;
                    inner.kv.insert(
                        key.clone(),
                        Entry {
                            value: Vec::new(),
                            create_revision: revision,
                            lease: Some(session),
                        },
                    );
                    if let Some(lease) = inner.leases.get_mut(&session) {
                        lease.keys.insert(key.clone());
                    }
                    revision
                }
            };
            LockKey {
                path: path.to_string(),
                key,
                create_revision,
            }
        };

        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.check_available()?;
            {
                let inner = self.inner.lock().await;
                let current = inner.kv.get(&lock.key).map(|entry| entry.create_revision);
                if current != Some(lock.create_revision) {
                    debug!(%session, "MemoryService::lock: waiter key vanished");
                    return Err(CoordError::SessionNotFound(session));
                }
                if inner.is_owner(&lock) {
                    debug!(%session, key = %lock.key, "MemoryService::lock: acquired");
                    return Ok(lock);
                }
            }

            debug!(%session, "MemoryService::lock: waiting for current owner");
            notified.await;
        }
    }

    async fn unlock(&self, lock: &LockKey) -> Result<(), CoordError> {
        debug!(key = %lock.key, "MemoryService::unlock: called");
        self.check_available()?;
        let removed = self.inner.lock().await.remove(&lock.key);
        if removed {
            self.changed.notify_waiters();
        }
        Ok(())
    }

    async fn commit(&self, txn: Txn) -> Result<TxnResponse, CoordError> {
        debug!(conditions = txn.when.len(), ops = txn.then.len(), "MemoryService::commit: called");
        self.check_available()?;
        let mut inner = self.inner.lock().await;

        let holds = txn.when.iter().all(|condition| match condition {
            Condition::IsOwner(lock) => inner.is_owner(lock),
        });
        if !holds {
            debug!("MemoryService::commit: condition failed");
            return Ok(TxnResponse::rejected());
        }

        let mut results = Vec::with_capacity(txn.then.len());
        for op in txn.then {
            match op {
                TxnOp::Put { key, value } => {
                    inner.put(&key, value);
                    results.push(TxnOpResult::Put);
                }
                TxnOp::Get { key } => {
                    let kvs = inner
                        .kv
                        .get(&key)
                        .map(|entry| KeyValue {
                            key: key.clone(),
                            value: entry.value.clone(),
                        })
                        .into_iter()
                        .collect();
                    results.push(TxnOpResult::Get(kvs));
                }
            }
        }

        Ok(TxnResponse {
            succeeded: true,
            results,
        })
    }
}
