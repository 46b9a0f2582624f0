//! Lock-guarded state store with actor pattern
//!
//! StateStore owns the current distributed lock inside an actor task and
//! runs every save/load as an ownership-checked transaction. SessionManager
//! creates and replaces the (session, lock) pair.

mod manager;
mod messages;
mod retry;
mod scope;
mod session;

pub use manager::{StateStore, StoreConfig};
pub use messages::{OwnershipState, StoreCommand, StoreError, StoreResponse};
pub use retry::RetryPolicy;
pub use scope::CallScope;
pub use session::{LockHandle, SessionManager};
