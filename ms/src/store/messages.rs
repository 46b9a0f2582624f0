//! State store messages
//!
//! Commands and responses for the actor pattern.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::session::LockHandle;
use crate::coord::CoordError;

/// Errors from state store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(#[from] CoordError),

    #[error("Lock ownership lost on all {attempts} attempts")]
    RetryExhausted { attempts: u32 },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("Channel error")]
    ChannelError,
}

/// Response from state store operations
pub type StoreResponse<T> = Result<T, StoreError>;

/// Where a store stands with respect to the distributed lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipState {
    /// No lock held; the next operation acquires one
    Unowned,
    /// Blocked on a lock request
    Acquiring,
    /// Holding the lock as of the last successful transaction
    Owned,
    /// Lock released for good; the store accepts no more work
    Released,
}

/// Commands sent to the store actor
#[derive(Debug)]
pub enum StoreCommand {
    Save {
        payload: Vec<u8>,
        cancel: Option<CancellationToken>,
        reply: oneshot::Sender<StoreResponse<()>>,
    },
    Load {
        cancel: Option<CancellationToken>,
        reply: oneshot::Sender<StoreResponse<Option<Vec<u8>>>>,
    },
    CurrentLock {
        reply: oneshot::Sender<Option<LockHandle>>,
    },

    // Release the lock and stop
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}
