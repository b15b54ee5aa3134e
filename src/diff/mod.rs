//! Diff and change engine.
//!
//! This module computes what separates the current state from the pending
//! configuration and applies it:
//! - Field-level comparison driven by the schema registry
//! - One classified [`Change`] per resource identity
//! - Cycle detection and layered dependency ordering
//! - Phased, bounded-parallel execution with failure isolation

mod change;
mod executor;
mod field_diff;
mod order;
mod plan;
mod realized;

pub use change::{Change, ChangeType, Step};
pub use executor::{ChangeResult, ExecutionReport, ExecutionStatus, Executor, Phase};
pub use field_diff::{FieldChange, FieldDiff};
pub use plan::{ChangeCounts, Diff, PlanEntry};
pub use realized::{RealizedState, lookup, resolve_known};
