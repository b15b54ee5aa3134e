//! State management.
//!
//! This module persists the resources as last applied, together with the
//! graph fingerprint and run history, and guards each cycle with an
//! exclusive lock.

mod local;
mod lock;
mod store;
mod types;

pub use local::{LocalStateStore, STATE_DIR};
pub use lock::{LockInfo, generate_holder_id};
pub use store::StateStore;
pub use types::{HistoryEntry, MAX_HISTORY, Operation, STATE_VERSION, StateSnapshot};
