//! Resource model.
//!
//! Resources are immutable snapshots produced by configuration evaluation
//! or loaded from state. Cross-resource references inside field values
//! define the dependency edges of a [`ResourceGraph`].

mod graph;
mod source;
mod value;

pub use graph::{Resource, ResourceGraph, ResourceId, ScopeFilter};
pub use source::GraphSource;
pub use value::{Reference, Value};
