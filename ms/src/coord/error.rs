//! Coordination service error types

use thiserror::Error;

use super::SessionId;

/// Errors raised while talking to the coordination service
///
/// Every variant is a connection-level failure from the store's point of
/// view: none of them are retried, they are handed straight to the caller.
#[derive(Debug, Error)]
pub enum CoordError {
    #[error("Coordination service unavailable: {0}")]
    Unavailable(String),

    #[error("Session {0} not found or already revoked")]
    SessionNotFound(SessionId),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Unknown coordination backend: '{0}'. Supported: memory, etcd")]
    UnknownBackend(String),

    #[cfg(feature = "etcd")]
    #[error("etcd error: {0}")]
    Etcd(#[from] etcd_client::Error),
}
