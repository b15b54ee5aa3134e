//! Provider capability interface.
//!
//! Every resource type exposes the same fixed set of operations
//! (display name, refresh, create, update, delete). Real providers implement
//! [`ResourceOperations`]; types declared only in the project file use
//! [`StateOnlyOperations`]. [`ModificationHooks`] run around those calls.

mod hooks;
mod operations;
mod state_only;

pub use hooks::ModificationHooks;
pub use operations::{OperationError, OperationResult, ResourceOperations};
pub use state_only::StateOnlyOperations;

#[cfg(test)]
pub use operations::MockResourceOperations;
