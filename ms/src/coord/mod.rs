//! Coordination service seam
//!
//! The store never implements consensus, leases or the distributed mutex
//! itself. It consumes them through [`CoordinationService`], which is backed
//! by etcd in production and by [`MemoryService`] in tests and local runs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

mod error;
#[cfg(feature = "etcd")]
pub mod etcd;
pub mod memory;
mod types;

pub use error::CoordError;
#[cfg(feature = "etcd")]
pub use etcd::EtcdService;
pub use memory::MemoryService;
pub use types::{Condition, KeyValue, LockKey, SessionId, Txn, TxnOp, TxnOpResult, TxnResponse};

use crate::config::Config;

/// Primitives consumed from the coordination service
///
/// Every call may block on the network. None of them take a deadline; the
/// store races them against its own cancellation token instead.
#[async_trait]
pub trait CoordinationService: Send + Sync {
    /// Grant a new lease with the given TTL
    ///
    /// Keeping the lease alive for as long as it is not revoked is the
    /// service's responsibility, not the caller's.
    async fn open_session(&self, ttl: Duration) -> Result<SessionId, CoordError>;

    /// Revoke a lease, releasing every lock and key bound to it
    async fn revoke_session(&self, session: SessionId) -> Result<(), CoordError>;

    /// Block until `session` owns the mutex at `path`
    async fn lock(&self, session: SessionId, path: &str) -> Result<LockKey, CoordError>;

    /// Give up ownership of a mutex
    async fn unlock(&self, lock: &LockKey) -> Result<(), CoordError>;

    /// Commit a conditional transaction atomically
    async fn commit(&self, txn: Txn) -> Result<TxnResponse, CoordError>;
}

/// Create a coordination service for the configured backend
///
/// Supports "memory" and, when built with the `etcd` feature, "etcd".
pub async fn create_service(config: &Config) -> Result<Arc<dyn CoordinationService>, CoordError> {
    debug!(backend = %config.backend, endpoints = ?config.endpoints, "create_service: called");
    match config.backend.as_str() {
        "memory" => {
            debug!("create_service: creating in-memory service");
            Ok(Arc::new(MemoryService::new()))
        }
        #[cfg(feature = "etcd")]
        "etcd" => {
            debug!("create_service: connecting to etcd");
            let service = EtcdService::connect(&config.endpoints, Duration::from_millis(config.dial_timeout_ms)).await?;
            Ok(Arc::new(service))
        }
        other => {
            debug!(backend = %other, "create_service: unsupported backend");
            Err(CoordError::UnknownBackend(other.to_string()))
        }
    }
}
