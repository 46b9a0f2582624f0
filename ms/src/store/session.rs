//! SessionManager - owns the (session, lock) lifecycle
//!
//! Opens a lease, blocks on the distributed mutex, replaces both when
//! ownership is found lost, and releases them on shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::messages::StoreResponse;
use super::scope::CallScope;
use crate::coord::{Condition, CoordError, CoordinationService, LockKey, SessionId};

/// Upper bound for best-effort cleanup calls that run outside any scope
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);

/// A held distributed lock and the session it is bound to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    session: SessionId,
    key: LockKey,
}

impl LockHandle {
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn key(&self) -> &LockKey {
        &self.key
    }
}

/// Produces and replaces the (session, lock) pair for one lock path
///
/// Sessions that could not be revoked are kept and revoked again before the
/// next one is opened, so an abandoned waiter never ends up owning the lock
/// on our behalf.
#[derive(Clone)]
pub struct SessionManager {
    service: Arc<dyn CoordinationService>,
    lock_path: String,
    ttl: Duration,
    orphans: Arc<Mutex<Vec<SessionId>>>,
}

impl SessionManager {
    pub fn new(service: Arc<dyn CoordinationService>, lock_path: impl Into<String>, ttl: Duration) -> Self {
        let lock_path = lock_path.into();
        debug!(%lock_path, ?ttl, "SessionManager::new: called");
        Self {
            service,
            lock_path,
            ttl,
            orphans: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Open the first session and block until its lock is granted
    ///
    /// There is no built-in timeout: a contested lock is expected to be
    /// resolved by whoever manages the competing instances. Use the scope's
    /// token or deadline to give up.
    pub async fn acquire_initial(&self, scope: &CallScope) -> StoreResponse<LockHandle> {
        debug!(lock_path = %self.lock_path, "acquire_initial: called");
        info!("Trying to acquire lock at {}", self.lock_path);
        let lock = self.acquire(scope).await?;
        info!(session = %lock.session, "Successfully acquired lock at {}", self.lock_path);
        Ok(lock)
    }

    /// Discard `stale` and acquire the lock again on a brand-new session
    pub async fn reacquire(&self, stale: Option<LockHandle>, scope: &CallScope) -> StoreResponse<LockHandle> {
        debug!(lock_path = %self.lock_path, stale = ?stale.as_ref().map(|l| l.session), "reacquire: called");
        if let Some(stale) = stale {
            self.discard(stale.session).await;
        }

        info!("Trying to reacquire lock at {}", self.lock_path);
        let lock = self.acquire(scope).await?;
        info!(session = %lock.session, "Successfully reacquired lock at {}", self.lock_path);
        Ok(lock)
    }

    /// Transaction condition that holds while `lock` still owns the mutex
    pub fn is_owner(&self, lock: &LockHandle) -> Condition {
        Condition::IsOwner(lock.key.clone())
    }

    /// Unlock and revoke the session; failures are logged, not returned
    pub async fn release(&self, lock: LockHandle) {
        debug!(session = %lock.session, key = %lock.key, "release: called");
        match tokio::time::timeout(CLEANUP_TIMEOUT, self.service.unlock(&lock.key)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(session = %lock.session, error = %e, "Failed to unlock"),
            Err(_) => warn!(session = %lock.session, "Timed out unlocking"),
        }
        self.discard(lock.session).await;
        self.revoke_orphans().await;
        info!(session = %lock.session, "Released lock at {}", self.lock_path);
    }

    /// Sessions whose revoke failed and is still pending
    pub async fn orphans(&self) -> Vec<SessionId> {
        self.orphans.lock().await.clone()
    }

    async fn acquire(&self, scope: &CallScope) -> StoreResponse<LockHandle> {
        self.revoke_orphans().await;
        let session = scope.run(self.service.open_session(self.ttl)).await?;
        debug!(%session, "acquire: session opened, waiting for lock");

        match scope.run(self.service.lock(session, &self.lock_path)).await {
            Ok(key) => Ok(LockHandle { session, key }),
            Err(e) => {
                // An abandoned waiter must never become owner later
                debug!(%session, error = %e, "acquire: lock request failed, revoking session");
                self.discard(session).await;
                Err(e)
            }
        }
    }

    /// Revoke `session`, keeping it as an orphan if that fails
    pub(crate) async fn discard(&self, session: SessionId) {
        if !self.revoke(session).await {
            self.orphans.lock().await.push(session);
        }
    }

    /// Retry the revokes that failed earlier
    async fn revoke_orphans(&self) {
        let pending = std::mem::take(&mut *self.orphans.lock().await);
        if pending.is_empty() {
            return;
        }
        debug!(count = pending.len(), "revoke_orphans: called");

        let mut failed = Vec::new();
        for session in pending {
            if !self.revoke(session).await {
                failed.push(session);
            }
        }
        self.orphans.lock().await.extend(failed);
    }

    /// Whether `session` is gone afterwards
    async fn revoke(&self, session: SessionId) -> bool {
        match tokio::time::timeout(CLEANUP_TIMEOUT, self.service.revoke_session(session)).await {
            Ok(Ok(())) => {
                debug!(%session, "revoke: session revoked");
                true
            }
            Ok(Err(CoordError::SessionNotFound(_))) => {
                debug!(%session, "revoke: session already gone");
                true
            }
            Ok(Err(e)) => {
                warn!(%session, error = %e, "Failed to revoke session");
                false
            }
            Err(_) => {
                warn!(%session, "Timed out revoking session");
                false
            }
        }
    }
}
