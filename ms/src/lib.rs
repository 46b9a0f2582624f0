//! masterstore - lock-guarded durable state for singleton masters
//!
//! A master process that must survive restarts and fail over keeps its state
//! in a coordination service (etcd). Only the holder of a distributed lock
//! may read or write that state, and every read and write verifies ownership
//! inside the same transaction, so a stale former owner can never clobber it.
//!
//! # Core Concepts
//!
//! - **Ownership in the transaction**: `If(IsOwner(lock)).Then(op)` is one
//!   atomic commit, with no check-then-act window
//! - **Transparent recovery**: a lost lock is reacquired on a brand-new
//!   session and the operation retried, with bounded exponential backoff
//! - **Single owner of the lock reference**: the store is an actor; callers
//!   hold cheap cloneable handles
//! - **Scoped release**: shutting down or dropping the store unlocks and
//!   revokes the session
//!
//! # Modules
//!
//! - [`coord`] - coordination service trait, etcd and in-memory backends
//! - [`store`] - SessionManager and the StateStore actor
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface
//!
//! # Example
//!
//! ```ignore
//! use masterstore::{MemoryService, StateStore, StoreConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let service = std::sync::Arc::new(MemoryService::new());
//! let store = StateStore::open(service, StoreConfig::new(ttl), CancellationToken::new()).await?;
//! store.save(b"v1".to_vec()).await?;
//! assert_eq!(store.load().await?, Some(b"v1".to_vec()));
//! store.shutdown().await?;
//! ```

pub mod cli;
pub mod config;
pub mod coord;
pub mod store;

// Re-export commonly used types
pub use config::Config;
pub use coord::{CoordError, CoordinationService, MemoryService, SessionId, create_service};
pub use store::{LockHandle, OwnershipState, RetryPolicy, SessionManager, StateStore, StoreConfig, StoreError};
