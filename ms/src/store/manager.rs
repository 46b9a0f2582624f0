//! StateStore - actor that owns the current lock
//!
//! Every save/load is a transaction guarded by "this session still owns the
//! lock". The actor is the only code that reads or replaces the current
//! lock, and it keeps a request for its whole retry loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::messages::{OwnershipState, StoreCommand, StoreError, StoreResponse};
use super::retry::RetryPolicy;
use super::scope::CallScope;
use super::session::{LockHandle, SessionManager};
use crate::config::{DEFAULT_LOCK_PATH, DEFAULT_STATE_PATH};
use crate::coord::{CoordError, CoordinationService, Txn, TxnOp, TxnOpResult};

/// Runtime settings for a [`StateStore`]
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Key of the distributed mutex
    pub lock_path: String,
    /// Key of the state record
    pub state_path: String,
    /// Session lease duration
    pub ttl: Duration,
    /// Limit for the initial acquisition (None: wait forever)
    pub acquire_timeout: Option<Duration>,
    /// Limit for one save/load including retries (None: no limit)
    pub op_timeout: Option<Duration>,
    /// Ownership-loss retry policy
    pub retry: RetryPolicy,
}

impl StoreConfig {
    pub fn new(ttl: Duration) -> Self {
        Self {
            lock_path: DEFAULT_LOCK_PATH.to_string(),
            state_path: DEFAULT_STATE_PATH.to_string(),
            ttl,
            acquire_timeout: None,
            op_timeout: None,
            retry: RetryPolicy::default(),
        }
    }
}

/// Handle to send commands to the store actor
///
/// Cheap to clone. The lock is released when [`shutdown`](Self::shutdown)
/// is called or the last clone is dropped.
#[derive(Clone)]
pub struct StateStore {
    tx: mpsc::Sender<StoreCommand>,
    ownership: watch::Receiver<OwnershipState>,
    cancel: CancellationToken,
}

impl StateStore {
    /// Acquire the lock and spawn the actor
    ///
    /// Blocks until the lock is granted, the connection fails, `cancel` fires
    /// or `config.acquire_timeout` passes.
    pub async fn open(
        service: Arc<dyn CoordinationService>,
        config: StoreConfig,
        cancel: CancellationToken,
    ) -> StoreResponse<Self> {
        debug!(lock_path = %config.lock_path, state_path = %config.state_path, ttl = ?config.ttl, "open: called");
        let cancel = cancel.child_token();
        let sessions = SessionManager::new(service.clone(), config.lock_path.clone(), config.ttl);
        let (state_tx, ownership) = watch::channel(OwnershipState::Acquiring);

        let scope = CallScope::new(cancel.clone(), config.acquire_timeout);
        let lock = sessions.acquire_initial(&scope).await?;
        state_tx.send_replace(OwnershipState::Owned);

        let (tx, rx) = mpsc::channel(256);
        let actor = StoreActor {
            service,
            sessions,
            config,
            current: Some(lock),
            state_tx,
            cancel: cancel.clone(),
        };
        tokio::spawn(actor.run(rx));

        info!("StateStore spawned");
        Ok(Self { tx, ownership, cancel })
    }

    /// Save the state, reacquiring the lock as needed
    pub async fn save(&self, payload: impl Into<Vec<u8>>) -> StoreResponse<()> {
        self.send_save(payload.into(), None).await
    }

    /// Save the state; `cancel` abandons the call
    pub async fn save_with(&self, payload: impl Into<Vec<u8>>, cancel: CancellationToken) -> StoreResponse<()> {
        self.send_save(payload.into(), Some(cancel)).await
    }

    /// Load the state; `None` means nothing was ever saved
    pub async fn load(&self) -> StoreResponse<Option<Vec<u8>>> {
        self.send_load(None).await
    }

    /// Load the state; `cancel` abandons the call
    pub async fn load_with(&self, cancel: CancellationToken) -> StoreResponse<Option<Vec<u8>>> {
        self.send_load(Some(cancel)).await
    }

    /// Lock currently held by the actor, if any
    pub async fn current_lock(&self) -> StoreResponse<Option<LockHandle>> {
        debug!("current_lock: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::CurrentLock { reply: reply_tx })
            .await
            .map_err(|_| StoreError::ChannelError)?;
        reply_rx.await.map_err(|_| StoreError::ChannelError)
    }

    /// Last known ownership state
    pub fn ownership(&self) -> OwnershipState {
        *self.ownership.borrow()
    }

    /// Watch ownership transitions
    pub fn subscribe_ownership(&self) -> watch::Receiver<OwnershipState> {
        self.ownership.clone()
    }

    /// Abort in-flight work, release the lock and stop the actor
    pub async fn shutdown(&self) -> StoreResponse<()> {
        debug!("shutdown: called");
        self.cancel.cancel();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::Shutdown { reply: reply_tx })
            .await
            .map_err(|_| StoreError::ChannelError)?;
        reply_rx.await.map_err(|_| StoreError::ChannelError)
    }

    async fn send_save(&self, payload: Vec<u8>, cancel: Option<CancellationToken>) -> StoreResponse<()> {
        debug!(len = payload.len(), "save: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::Save {
                payload,
                cancel,
                reply: reply_tx,
            })
            .await
            .map_err(|_| StoreError::ChannelError)?;
        reply_rx.await.map_err(|_| StoreError::ChannelError)?
    }

    async fn send_load(&self, cancel: Option<CancellationToken>) -> StoreResponse<Option<Vec<u8>>> {
        debug!("load: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::Load { cancel, reply: reply_tx })
            .await
            .map_err(|_| StoreError::ChannelError)?;
        reply_rx.await.map_err(|_| StoreError::ChannelError)?
    }
}

/// State owned by the actor task
struct StoreActor {
    service: Arc<dyn CoordinationService>,
    sessions: SessionManager,
    config: StoreConfig,
    current: Option<LockHandle>,
    state_tx: watch::Sender<OwnershipState>,
    cancel: CancellationToken,
}

impl StoreActor {
    async fn run(mut self, mut rx: mpsc::Receiver<StoreCommand>) {
        debug!("StoreActor started");

        while let Some(cmd) = rx.recv().await {
            match cmd {
                StoreCommand::Save { payload, cancel, reply } => {
                    debug!(len = payload.len(), "run: Save command");
                    let scope = self.scope(cancel);
                    let op = TxnOp::put(self.config.state_path.clone(), payload);
                    let result = self.transact(op, &scope).await.map(|_| ());
                    let _ = reply.send(result);
                }

                StoreCommand::Load { cancel, reply } => {
                    debug!("run: Load command");
                    let scope = self.scope(cancel);
                    let op = TxnOp::get(self.config.state_path.clone());
                    let result = self.transact(op, &scope).await.and_then(single_value);
                    let _ = reply.send(result);
                }

                StoreCommand::CurrentLock { reply } => {
                    debug!("run: CurrentLock command");
                    let _ = reply.send(self.current.clone());
                }

                StoreCommand::Shutdown { reply } => {
                    debug!("run: Shutdown command");
                    info!("StateStore shutting down");
                    self.release().await;
                    let _ = reply.send(());
                    break;
                }
            }
        }

        // Every handle dropped without an explicit shutdown
        self.release().await;
        debug!("StoreActor stopped");
    }

    fn scope(&self, caller: Option<CancellationToken>) -> CallScope {
        let scope = CallScope::new(self.cancel.clone(), self.config.op_timeout);
        match caller {
            Some(token) => scope.with_caller(token),
            None => scope,
        }
    }

    /// Commit `op` guarded by lock ownership, reacquiring on loss
    async fn transact(&mut self, op: TxnOp, scope: &CallScope) -> StoreResponse<Vec<TxnOpResult>> {
        let policy = self.config.retry.clone();
        let mut stale: Option<LockHandle> = None;

        for attempt in 1..=policy.max_attempts {
            if attempt > 1 {
                let backoff = policy.backoff(attempt - 1);
                debug!(attempt, ?backoff, "transact: backing off before reacquiring");
                if let Err(e) = scope.sleep(backoff).await {
                    if let Some(stale) = stale.take() {
                        self.sessions.discard(stale.session()).await;
                    }
                    return Err(e);
                }
            }

            let lock = match self.current.clone() {
                Some(lock) => lock,
                None => match self.reacquire(stale.take(), scope).await {
                    Ok(lock) => lock,
                    Err(StoreError::Connection(CoordError::SessionNotFound(session))) => {
                        // Lease lost while queued for the lock: more churn, not a connection failure
                        warn!(attempt, %session, "Session lost while waiting for the lock");
                        continue;
                    }
                    Err(e) => return Err(e),
                },
            };

            let txn = Txn::new()
                .when([self.sessions.is_owner(&lock)])
                .and_then([op.clone()]);
            let resp = scope.run(self.service.commit(txn)).await?;
            if resp.succeeded {
                return Ok(resp.results);
            }

            warn!(
                attempt,
                session = %lock.session(),
                "No longer owns the lock at {}, reacquiring",
                self.config.lock_path
            );
            self.current = None;
            self.state_tx.send_replace(OwnershipState::Unowned);
            stale = Some(lock);
        }

        if let Some(stale) = stale {
            self.sessions.discard(stale.session()).await;
        }
        warn!(attempts = policy.max_attempts, "Giving up after repeated ownership loss");
        Err(StoreError::RetryExhausted {
            attempts: policy.max_attempts,
        })
    }

    async fn reacquire(&mut self, stale: Option<LockHandle>, scope: &CallScope) -> StoreResponse<LockHandle> {
        self.state_tx.send_replace(OwnershipState::Acquiring);
        match self.sessions.reacquire(stale, scope).await {
            Ok(lock) => {
                self.current = Some(lock.clone());
                self.state_tx.send_replace(OwnershipState::Owned);
                Ok(lock)
            }
            Err(e) => {
                self.state_tx.send_replace(OwnershipState::Unowned);
                Err(e)
            }
        }
    }

    async fn release(&mut self) {
        if let Some(lock) = self.current.take() {
            self.sessions.release(lock).await;
        }
        self.state_tx.send_replace(OwnershipState::Released);
    }
}

/// Extract the state value from a single `Get` result
fn single_value(results: Vec<TxnOpResult>) -> StoreResponse<Option<Vec<u8>>> {
    match results.into_iter().next() {
        Some(TxnOpResult::Get(kvs)) => Ok(kvs.into_iter().next().map(|kv| kv.value)),
        other => Err(StoreError::Connection(CoordError::InvalidResponse(format!(
            "expected a get result, got {:?}",
            other
        )))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::{LockKey, MemoryService, SessionId, TxnResponse};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    const TTL: Duration = Duration::from_secs(10);

    fn config() -> StoreConfig {
        StoreConfig {
            lock_path: "/m/lock".to_string(),
            state_path: "/m/state".to_string(),
            retry: RetryPolicy {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(10),
            },
            ..StoreConfig::new(TTL)
        }
    }

    async fn open(service: &Arc<MemoryService>, config: StoreConfig) -> StateStore {
        StateStore::open(service.clone(), config, CancellationToken::new())
            .await
            .unwrap()
    }

    /// Service whose ownership check always fails, as under persistent split-brain
    struct SplitBrain {
        inner: MemoryService,
        commits: AtomicU32,
    }

    #[async_trait]
    impl CoordinationService for SplitBrain {
        async fn open_session(&self, ttl: Duration) -> Result<SessionId, CoordError> {
            self.inner.open_session(ttl).await
        }

        async fn revoke_session(&self, session: SessionId) -> Result<(), CoordError> {
            self.inner.revoke_session(session).await
        }

        async fn lock(&self, session: SessionId, path: &str) -> Result<LockKey, CoordError> {
            self.inner.lock(session, path).await
        }

        async fn unlock(&self, lock: &LockKey) -> Result<(), CoordError> {
            self.inner.unlock(lock).await
        }

        async fn commit(&self, _txn: Txn) -> Result<TxnResponse, CoordError> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(TxnResponse::rejected())
        }
    }

    /// Service that refuses lock requests after the first one, as when the
    /// connection drops right after ownership is lost
    struct LockOutage {
        inner: MemoryService,
        locks: AtomicU32,
    }

    #[async_trait]
    impl CoordinationService for LockOutage {
        async fn open_session(&self, ttl: Duration) -> Result<SessionId, CoordError> {
            self.inner.open_session(ttl).await
        }

        async fn revoke_session(&self, session: SessionId) -> Result<(), CoordError> {
            self.inner.revoke_session(session).await
        }

        async fn lock(&self, session: SessionId, path: &str) -> Result<LockKey, CoordError> {
            if self.locks.fetch_add(1, Ordering::SeqCst) > 0 {
                return Err(CoordError::Unavailable("lock service unreachable".to_string()));
            }
            self.inner.lock(session, path).await
        }

        async fn unlock(&self, lock: &LockKey) -> Result<(), CoordError> {
            self.inner.unlock(lock).await
        }

        async fn commit(&self, txn: Txn) -> Result<TxnResponse, CoordError> {
            self.inner.commit(txn).await
        }
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip() {
        let service = Arc::new(MemoryService::new());
        let store = open(&service, config()).await;

        store.save(b"v1".to_vec()).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(b"v1".to_vec()));
        assert_eq!(service.get("/m/state").await, Some(b"v1".to_vec()));

        store.save(b"v2".to_vec()).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(b"v2".to_vec()));

        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_load_before_save_is_absent() {
        let service = Arc::new(MemoryService::new());
        let store = open(&service, config()).await;

        assert_eq!(store.load().await.unwrap(), None);

        store.save(Vec::new()).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(Vec::new()));

        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_save_recovers_after_session_revoked() {
        let service = Arc::new(MemoryService::new());
        let store = open(&service, config()).await;
        store.save(b"v1".to_vec()).await.unwrap();

        let before = store.current_lock().await.unwrap().unwrap();
        service.revoke_session(before.session()).await.unwrap();

        store.save(b"v2".to_vec()).await.unwrap();
        let after = store.current_lock().await.unwrap().unwrap();
        assert_ne!(before.session(), after.session());
        assert_eq!(service.owner_of("/m/lock").await, Some(after.session()));
        assert_eq!(store.load().await.unwrap(), Some(b"v2".to_vec()));
        assert_eq!(store.ownership(), OwnershipState::Owned);

        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_load_recovers_after_session_revoked() {
        let service = Arc::new(MemoryService::new());
        let store = open(&service, config()).await;
        store.save(b"kept".to_vec()).await.unwrap();

        let before = store.current_lock().await.unwrap().unwrap();
        service.revoke_session(before.session()).await.unwrap();

        assert_eq!(store.load().await.unwrap(), Some(b"kept".to_vec()));
        let after = store.current_lock().await.unwrap().unwrap();
        assert_ne!(before.session(), after.session());

        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_error_is_not_retried() {
        let service = Arc::new(MemoryService::new());
        let store = open(&service, config()).await;
        let lock = store.current_lock().await.unwrap().unwrap();

        service.set_available(false);
        let result = store.save(b"lost".to_vec()).await;
        assert!(matches!(result, Err(StoreError::Connection(CoordError::Unavailable(_)))));
        let result = store.load().await;
        assert!(matches!(result, Err(StoreError::Connection(_))));

        // The lock was never found lost, so it is kept
        service.set_available(true);
        assert_eq!(store.current_lock().await.unwrap(), Some(lock));
        store.save(b"back".to_vec()).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(b"back".to_vec()));

        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_retry_exhausted_under_split_brain() {
        let service = Arc::new(SplitBrain {
            inner: MemoryService::new(),
            commits: AtomicU32::new(0),
        });
        let store = StateStore::open(service.clone(), config(), CancellationToken::new())
            .await
            .unwrap();

        let result = store.save(b"never".to_vec()).await;
        assert!(matches!(result, Err(StoreError::RetryExhausted { attempts: 3 })));
        assert_eq!(service.commits.load(Ordering::SeqCst), 3);
        assert_eq!(store.ownership(), OwnershipState::Unowned);
        assert_eq!(store.current_lock().await.unwrap(), None);
        // Every session opened along the way was discarded
        assert_eq!(service.inner.live_sessions().await, 0);

        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_error_during_reacquire_is_returned() {
        let service = Arc::new(LockOutage {
            inner: MemoryService::new(),
            locks: AtomicU32::new(0),
        });
        let store = StateStore::open(service.clone(), config(), CancellationToken::new())
            .await
            .unwrap();
        let lock = store.current_lock().await.unwrap().unwrap();
        service.inner.revoke_session(lock.session()).await.unwrap();

        let result = store.save(b"lost".to_vec()).await;
        assert!(matches!(result, Err(StoreError::Connection(CoordError::Unavailable(_)))));
        assert_eq!(service.locks.load(Ordering::SeqCst), 2);
        assert_eq!(store.ownership(), OwnershipState::Unowned);
        assert_eq!(store.current_lock().await.unwrap(), None);
        assert_eq!(service.inner.live_sessions().await, 0);
        assert_eq!(service.inner.get("/m/state").await, None);

        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_session_lost_while_queued_is_retried() {
        let service = Arc::new(MemoryService::new());
        let store = open(&service, config()).await;
        let lock = store.current_lock().await.unwrap().unwrap();
        service.revoke_session(lock.session()).await.unwrap();
        let owner = open(&service, config()).await;
        let owner_lock = owner.current_lock().await.unwrap().unwrap();

        let pending = {
            let store = store.clone();
            tokio::spawn(async move { store.save(b"after-churn".to_vec()).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        let waiters = service.waiters("/m/lock").await;
        assert_eq!(waiters.len(), 2);
        assert_eq!(waiters[0], owner_lock.session());

        // The queued session expires, then the owner steps down
        service.revoke_session(waiters[1]).await.unwrap();
        owner.shutdown().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok(), "unexpected result: {:?}", result);
        assert_eq!(service.get("/m/state").await, Some(b"after-churn".to_vec()));

        let lock = store.current_lock().await.unwrap().unwrap();
        assert_ne!(lock.session(), waiters[1]);
        assert_eq!(service.waiters("/m/lock").await, vec![lock.session()]);

        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_save_after_outage_while_queued_is_not_blocked_by_own_waiter() {
        let service = Arc::new(MemoryService::new());
        let store = open(&service, config()).await;
        let lock = store.current_lock().await.unwrap().unwrap();
        service.revoke_session(lock.session()).await.unwrap();
        let owner = open(&service, config()).await;

        let pending = {
            let store = store.clone();
            tokio::spawn(async move { store.save(b"during-outage".to_vec()).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(service.live_sessions().await, 2);

        service.set_available(false);
        let result = pending.await.unwrap();
        assert!(matches!(result, Err(StoreError::Connection(CoordError::Unavailable(_)))));
        service.set_available(true);

        owner.shutdown().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), store.save(b"healed".to_vec()))
            .await
            .expect("save must not wait on its own abandoned waiter")
            .unwrap();

        let lock = store.current_lock().await.unwrap().unwrap();
        assert_eq!(service.owner_of("/m/lock").await, Some(lock.session()));
        assert_eq!(service.live_sessions().await, 1);
        assert_eq!(service.get("/m/state").await, Some(b"healed".to_vec()));

        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_owner_gives_up_at_deadline_without_writing() {
        let service = Arc::new(MemoryService::new());
        let stale = open(
            &service,
            StoreConfig {
                op_timeout: Some(Duration::from_millis(50)),
                ..config()
            },
        )
        .await;
        stale.save(b"a1".to_vec()).await.unwrap();

        // Partition: the lease expires and another instance takes over
        let lock = stale.current_lock().await.unwrap().unwrap();
        service.revoke_session(lock.session()).await.unwrap();
        let owner = open(&service, config()).await;
        owner.save(b"b1".to_vec()).await.unwrap();

        let result = stale.save(b"a2".to_vec()).await;
        assert!(matches!(result, Err(StoreError::DeadlineExceeded(_))));
        assert_eq!(service.get("/m/state").await, Some(b"b1".to_vec()));

        // The abandoned lock request left nothing behind
        let owner_lock = owner.current_lock().await.unwrap().unwrap();
        assert_eq!(service.live_sessions().await, 1);
        assert_eq!(service.owner_of("/m/lock").await, Some(owner_lock.session()));

        owner.shutdown().await.unwrap();
        stale.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_caller_cancellation_abandons_reacquire() {
        let service = Arc::new(MemoryService::new());
        let stale = open(&service, config()).await;
        let lock = stale.current_lock().await.unwrap().unwrap();
        service.revoke_session(lock.session()).await.unwrap();
        let owner = open(&service, config()).await;

        let cancel = CancellationToken::new();
        let pending = {
            let stale = stale.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { stale.load_with(cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(stale.ownership(), OwnershipState::Acquiring);

        cancel.cancel();
        let result = pending.await.unwrap();
        assert!(matches!(result, Err(StoreError::Cancelled)));
        assert_eq!(stale.ownership(), OwnershipState::Unowned);

        // Once the owner steps down the stale store takes over on its next call
        owner.shutdown().await.unwrap();
        stale.save(b"resumed".to_vec()).await.unwrap();
        assert_eq!(stale.ownership(), OwnershipState::Owned);
        assert_eq!(stale.load().await.unwrap(), Some(b"resumed".to_vec()));

        stale.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_releases_lock() {
        let service = Arc::new(MemoryService::new());
        let store = open(&service, config()).await;
        assert_eq!(service.live_sessions().await, 1);

        store.shutdown().await.unwrap();
        assert_eq!(service.owner_of("/m/lock").await, None);
        assert_eq!(service.live_sessions().await, 0);
        assert_eq!(store.ownership(), OwnershipState::Released);

        let result = store.save(b"late".to_vec()).await;
        assert!(matches!(result, Err(StoreError::ChannelError)));
    }

    #[tokio::test]
    async fn test_dropping_last_handle_releases_lock() {
        let service = Arc::new(MemoryService::new());
        let store = open(&service, config()).await;
        let mut ownership = store.subscribe_ownership();
        drop(store);

        tokio::time::timeout(
            Duration::from_secs(1),
            ownership.wait_for(|state| *state == OwnershipState::Released),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(service.owner_of("/m/lock").await, None);
        assert_eq!(service.live_sessions().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_saves_are_serialized() {
        let service = Arc::new(MemoryService::new());
        let store = open(&service, config()).await;

        let mut handles = Vec::new();
        for i in 0..10u8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.save(vec![i; 4]).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let value = store.load().await.unwrap().unwrap();
        assert_eq!(value.len(), 4);
        assert!(value.iter().all(|b| *b == value[0]));

        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_initial_acquire_times_out_while_contested() {
        let service = Arc::new(MemoryService::new());
        let owner = open(&service, config()).await;

        let result = StateStore::open(
            service.clone(),
            StoreConfig {
                acquire_timeout: Some(Duration::from_millis(30)),
                ..config()
            },
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(StoreError::DeadlineExceeded(_))));
        assert_eq!(service.live_sessions().await, 1);

        owner.shutdown().await.unwrap();
    }
}
