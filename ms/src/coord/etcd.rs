//! etcd-backed coordination service
//!
//! Sessions are etcd leases kept alive by a background task and the mutex is
//! etcd's lock service. `IsOwner` compiles to "our lock key still has the
//! create revision it was granted with": once the lock service has granted a
//! key it stays the owner until that key is deleted.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{Client, Compare, CompareOp, ConnectOptions, LockOptions};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    Condition, CoordError, CoordinationService, KeyValue, LockKey, SessionId, Txn, TxnOp, TxnOpResult, TxnResponse,
};

/// [`CoordinationService`] over an etcd v3 cluster
pub struct EtcdService {
    client: Client,
    keepers: Mutex<HashMap<SessionId, JoinHandle<()>>>,
}

impl EtcdService {
    /// Connect to the cluster, failing if no endpoint answers within `dial_timeout`
    pub async fn connect(endpoints: &[String], dial_timeout: Duration) -> Result<Self, CoordError> {
        debug!(?endpoints, ?dial_timeout, "EtcdService::connect: called");
        let options = ConnectOptions::new().with_connect_timeout(dial_timeout);
        let client = Client::connect(endpoints, Some(options)).await?;
        info!(?endpoints, "Connected to etcd");
        Ok(Self {
            client,
            keepers: Mutex::new(HashMap::new()),
        })
    }

    /// Spawn the keep-alive loop for a lease
    async fn spawn_keeper(&self, session: SessionId, ttl_secs: i64) -> Result<JoinHandle<()>, CoordError> {
        let mut client = self.client.clone();
        let (mut keeper, mut stream) = client.lease_keep_alive(session.0).await?;
        let period = Duration::from_secs((ttl_secs / 3).max(1) as u64);

        Ok(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if let Err(e) = keeper.keep_alive().await {
                    warn!(%session, error = %e, "Lease keep-alive failed");
                    break;
                }
                match stream.message().await {
                    Ok(Some(resp)) if resp.ttl() > 0 => {}
                    Ok(Some(_)) => {
                        warn!(%session, "Lease expired");
                        break;
                    }
                    Ok(None) => {
                        debug!(%session, "keep-alive stream closed");
                        break;
                    }
                    Err(e) => {
                        warn!(%session, error = %e, "Lease keep-alive stream failed");
                        break;
                    }
                }
            }
        }))
    }
}

impl Drop for EtcdService {
    fn drop(&mut self) {
        if let Ok(keepers) = self.keepers.try_lock() {
            for handle in keepers.values() {
                handle.abort();
            }
        }
    }
}

#[async_trait]
impl CoordinationService for EtcdService {
    async fn open_session(&self, ttl: Duration) -> Result<SessionId, CoordError> {
        debug!(?ttl, "EtcdService::open_session: called");
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX).max(1);
        let mut client = self.client.clone();
        let lease = client.lease_grant(ttl_secs, None).await?;
        let session = SessionId(lease.id());

        let keeper = match self.spawn_keeper(session, ttl_secs).await {
            Ok(keeper) => keeper,
            Err(e) => {
                if let Err(revoke) = client.lease_revoke(session.0).await {
                    warn!(%session, error = %revoke, "Failed to revoke lease without keep-alive");
                }
                return Err(e);
            }
        };
        self.keepers.lock().await.insert(session, keeper);
        debug!(%session, ttl_secs, "EtcdService::open_session: lease granted");
        Ok(session)
    }

    async fn revoke_session(&self, session: SessionId) -> Result<(), CoordError> {
        debug!(%session, "EtcdService::revoke_session: called");
        if let Some(keeper) = self.keepers.lock().await.remove(&session) {
            keeper.abort();
        }
        let mut client = self.client.clone();
        client
            .lease_revoke(session.0)
            .await
            .map_err(|e| lease_error(session, e))?;
        Ok(())
    }

    async fn lock(&self, session: SessionId, path: &str) -> Result<LockKey, CoordError> {
        debug!(%session, %path, "EtcdService::lock: called");
        let mut client = self.client.clone();
        let resp = client
            .lock(path, Some(LockOptions::new().with_lease(session.0)))
            .await
            .map_err(|e| lease_error(session, e))?;
        let key = String::from_utf8(resp.key().to_vec())
            .map_err(|e| CoordError::InvalidResponse(format!("lock key is not UTF-8: {}", e)))?;

        // The lock response header carries the revision of the last wait, not
        // of our key, so read the key's create revision back
        let get = client.get(key.clone(), None).await?;
        let create_revision = get
            .kvs()
            .first()
            .map(|kv| kv.create_revision())
            .ok_or(CoordError::SessionNotFound(session))?;
        debug!(%session, %key, create_revision, "EtcdService::lock: acquired");

        Ok(LockKey {
            path: path.to_string(),
            key,
            create_revision,
        })
    }

    async fn unlock(&self, lock: &LockKey) -> Result<(), CoordError> {
        debug!(key = %lock.key, "EtcdService::unlock: called");
        let mut client = self.client.clone();
        client.unlock(lock.key.clone()).await?;
        Ok(())
    }

    async fn commit(&self, txn: Txn) -> Result<TxnResponse, CoordError> {
        debug!(conditions = txn.when.len(), ops = txn.then.len(), "EtcdService::commit: called");
        let compares: Vec<Compare> = txn
            .when
            .iter()
            .map(|condition| match condition {
                Condition::IsOwner(lock) => {
                    Compare::create_revision(lock.key.clone(), CompareOp::Equal, lock.create_revision)
                }
            })
            .collect();
        let ops: Vec<etcd_client::TxnOp> = txn
            .then
            .iter()
            .map(|op| match op {
                TxnOp::Put { key, value } => etcd_client::TxnOp::put(key.clone(), value.clone(), None),
                TxnOp::Get { key } => etcd_client::TxnOp::get(key.clone(), None),
            })
            .collect();

        let mut client = self.client.clone();
        let resp = client.txn(etcd_client::Txn::new().when(compares).and_then(ops)).await?;
        if !resp.succeeded() {
            return Ok(TxnResponse::rejected());
        }

        let mut results = Vec::with_capacity(txn.then.len());
        for op_resp in resp.op_responses() {
            match op_resp {
                etcd_client::TxnOpResponse::Put(_) => results.push(TxnOpResult::Put),
                etcd_client::TxnOpResponse::Get(get) => {
                    let kvs = get
                        .kvs()
                        .iter()
                        .map(|kv| KeyValue {
                            key: String::from_utf8_lossy(kv.key()).into_owned(),
                            value: kv.value().to_vec(),
                        })
                        .collect();
                    results.push(TxnOpResult::Get(kvs));
                }
                other => {
                    return Err(CoordError::InvalidResponse(format!(
                        "unexpected transaction response: {:?}",
                        other
                    )));
                }
            }
        }

        Ok(TxnResponse {
            succeeded: true,
            results,
        })
    }
}

/// Map "lease not found" replies to [`CoordError::SessionNotFound`]
fn lease_error(session: SessionId, err: etcd_client::Error) -> CoordError {
    match &err {
        etcd_client::Error::GRpcStatus(status) if is_lease_missing(status.message()) => {
            debug!(%session, message = status.message(), "lease no longer exists");
            CoordError::SessionNotFound(session)
        }
        _ => CoordError::Etcd(err),
    }
}

/// Whether an etcd status message reports an expired or revoked lease
fn is_lease_missing(message: &str) -> bool {
    message.contains("requested lease not found") || message.contains("lease expired")
}
