// ============================================================================
// Linting
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![warn(unused_imports)]
#![warn(unused_variables)]

// Clippy lints (warnings only)
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::print_stdout)]
#![warn(clippy::todo)]
#![warn(clippy::unimplemented)]
#![warn(clippy::unwrap_in_result)]
#![warn(clippy::redundant_clone)]
#![warn(clippy::cognitive_complexity)]

// Safety and robustness lints
#![deny(overflowing_literals)]
#![deny(arithmetic_overflow)]

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Converge
//!
//! A dependency-ordered plan/apply engine that reconciles declared
//! infrastructure against the last applied state.
//!
//! ## Overview
//!
//! - Resource types declare which fields are diffable, which can be updated
//!   in place and which force a replacement
//! - A diff classifies every resource as create, update, replace, delete or
//!   keep and orders the changes by their references
//! - The executor runs changes in dependency order with bounded parallelism,
//!   resolving references against what this run has already realized
//! - Workflows run operator-defined stages that edit the pending graph, then
//!   finalize with an ordinary plan and apply
//!
//! ## Modules
//!
//! - [`schema`]: resource type registry
//! - [`resource`]: identities, values, references and graphs
//! - [`provider`]: the operations each resource type implements
//! - [`diff`]: field diff, changes, plan and executor
//! - [`workflow`]: stage state machine and statements
//! - [`state`]: state snapshots, history and locking
//! - [`config`]: project file, resource files and validation
//! - [`reconciler`]: lock-scoped plan, apply, destroy, refresh and workflow runs
//! - [`cli`]: command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: edge
//!
//! types:
//!   - name: net::vpc
//!     fields:
//!       - { name: id, id: true }
//!       - { name: cidr }
//!       - { name: tags, kind: map, updatable: true }
//!
//! resources:
//!   - network.yaml
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod diff;
pub mod error;
pub mod provider;
pub mod reconciler;
pub mod resource;
pub mod schema;
pub mod state;
pub mod ui;
pub mod workflow;

#[cfg(test)]
mod testing;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ConfigValidator, GraphHasher, Project, ProjectFile};
pub use diff::{Change, ChangeType, Diff, ExecutionReport, Executor, Phase};
pub use error::{ConvergeError, Result};
pub use provider::{ModificationHooks, OperationError, ResourceOperations, StateOnlyOperations};
pub use reconciler::{ApplyOutcome, DriftReport, PlanOutcome, Reconciler, RunContext};
pub use resource::{GraphSource, Reference, Resource, ResourceGraph, ResourceId, ScopeFilter, Value};
pub use schema::{DiffableField, FieldKind, ReplacementOrder, ResourceType, SchemaRegistry};
pub use state::{LocalStateStore, StateSnapshot, StateStore};
pub use ui::{ConsoleUi, Ui};
pub use workflow::{Stage, Statement, Workflow};
