//! Resource type schemas.
//!
//! This module holds the per-type field descriptors the field differ
//! relies on, the replacement order of each type, and field validation
//! rules.

mod field;
mod registry;
mod rules;

pub use field::{DiffableField, FieldKind, ReplacementOrder};
pub use registry::{ResourceType, SchemaRegistry};
pub use rules::FieldRule;
