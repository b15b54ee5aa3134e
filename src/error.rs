//! Error types for the converge engine.
//!
//! Errors are grouped by the phase that raises them. Everything raised while
//! building a plan (schema, graph, field diff, plan, lock, config) is fatal and
//! surfaces before any provider call. Execution errors are isolated to the
//! change that raised them and its dependents.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the converge engine.
#[derive(Debug, Error)]
pub enum ConvergeError {
    /// Schema registration or usage errors.
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Resource graph errors.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Field comparison errors.
    #[error("Field diff error: {0}")]
    FieldDiff(#[from] FieldDiffError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Provider execution errors.
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// State lock errors.
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Workflow errors.
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Schema registration and usage errors.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// A resource type was referenced without being registered.
    #[error("Unknown resource type: {type_name}")]
    UnknownType {
        /// The unregistered type name.
        type_name: String,
    },

    /// A resource type was registered twice.
    #[error("Resource type registered twice: {type_name}")]
    DuplicateType {
        /// The duplicated type name.
        type_name: String,
    },

    /// A field was declared twice on the same type.
    #[error("Field '{field}' declared twice on {type_name}")]
    DuplicateField {
        /// Owning type.
        type_name: String,
        /// The duplicated field.
        field: String,
    },

    /// An id field was declared updatable.
    #[error("Id field '{field}' on {type_name} cannot be updatable")]
    UpdatableId {
        /// Owning type.
        type_name: String,
        /// The id field.
        field: String,
    },

    /// More than one id field was declared.
    #[error("{type_name} declares more than one id field ({first}, {second})")]
    MultipleIds {
        /// Owning type.
        type_name: String,
        /// First id field.
        first: String,
        /// Second id field.
        second: String,
    },

    /// A nested field names a type that was never registered.
    #[error("Field '{field}' on {type_name} nests unregistered type {nested_type}")]
    UnregisteredNested {
        /// Owning type.
        type_name: String,
        /// The nested field.
        field: String,
        /// The missing nested type.
        nested_type: String,
    },

    /// A resource sets a field its type does not declare.
    #[error("{resource} sets undeclared field '{field}'")]
    UndeclaredField {
        /// Display name of the resource.
        resource: String,
        /// The undeclared field.
        field: String,
    },

    /// A nested field holds something other than a block or a list of blocks.
    #[error("{resource} field '{field}' must be a nested block or a list of blocks, got {shape}")]
    MalformedNested {
        /// Display name of the resource.
        resource: String,
        /// Field path.
        field: String,
        /// Shape of the value found.
        shape: &'static str,
    },

    /// A validation rule names a field that does not exist.
    #[error("Rule on {type_name} names undeclared field '{field}'")]
    RuleOnUndeclaredField {
        /// Owning type.
        type_name: String,
        /// The missing field.
        field: String,
    },
}

/// Resource graph errors.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Two resources share an identity.
    #[error("Duplicate resource: {resource}")]
    DuplicateResource {
        /// Display name of the duplicated resource.
        resource: String,
    },

    /// A resource references an identity that is not in the graph.
    #[error("{resource} references {target}, which is not declared")]
    DanglingReference {
        /// The referring resource.
        resource: String,
        /// The missing target.
        target: String,
    },

    /// A reference expression could not be parsed.
    #[error("Invalid reference expression: {expression}")]
    InvalidReference {
        /// The offending expression.
        expression: String,
    },
}

/// Field comparison errors.
#[derive(Debug, Error)]
pub enum FieldDiffError {
    /// The current and pending values of a field have incompatible shapes.
    #[error("{resource}.{field}: cannot compare {current} with {pending}")]
    TypeMismatch {
        /// Display name of the resource.
        resource: String,
        /// Field path.
        field: String,
        /// Shape of the current value.
        current: &'static str,
        /// Shape of the pending value.
        pending: &'static str,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// Dependency cycle among changes.
    #[error("Circular dependency detected: {}", cycle.join(" -> "))]
    CircularDependency {
        /// Cycle members in detection order; the first member is repeated at the end.
        cycle: Vec<String>,
    },

    /// A resource failed field validation.
    #[error("{resource}: {message}")]
    Validation {
        /// Display name of the resource.
        resource: String,
        /// Description of the violation.
        message: String,
    },

    /// The operator declined the plan.
    #[error("Aborted: {reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },
}

/// Provider execution errors.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The provider operation failed.
    #[error("{step} {change} failed: {message}")]
    OperationFailed {
        /// Display name of the change.
        change: String,
        /// Step that failed (create, update, delete).
        step: String,
        /// Provider message.
        message: String,
    },

    /// The change was asked to execute before its dependencies completed.
    #[error("{change} is not executable yet")]
    NotExecutable {
        /// Display name of the change.
        change: String,
    },

    /// A reference could not be resolved against the realized state.
    #[error("{change}: cannot resolve {reference}")]
    UnresolvedReference {
        /// Display name of the change.
        change: String,
        /// The reference expression.
        reference: String,
    },

    /// The step does not apply to this kind of change.
    #[error("{change}: {step} does not apply to a {change_type} change")]
    InvalidStep {
        /// Display name of the change.
        change: String,
        /// Requested step.
        step: String,
        /// Classification of the change.
        change_type: String,
    },
}

/// State lock errors.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another process holds the lock.
    #[error(
        "State is locked by {holder} since {since} (lock id {lock_id}). \
         If no other run is in progress, release it with `converge state force-unlock --lock-id {lock_id}`"
    )]
    Held {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
        /// Lock identifier.
        lock_id: String,
    },

    /// No lock with the given id exists.
    #[error("No lock with id {lock_id} is held")]
    NotHeld {
        /// Lock identifier.
        lock_id: String,
    },

    /// The lock could not be written or read.
    #[error("Failed to access state lock: {message}")]
    Io {
        /// Description of the failure.
        message: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// Writing the state failed.
    #[error("Failed to write state: {message}")]
    WriteFailed {
        /// Description of the write failure.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// A workflow name was not found.
    #[error("No workflow named {name}")]
    UnknownWorkflow {
        /// The requested workflow.
        name: String,
    },
}

/// Workflow errors.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The workflow declares no stages.
    #[error("Workflow {workflow} has no stages")]
    NoStages {
        /// Workflow name.
        workflow: String,
    },

    /// A stage transitioned to an undeclared stage.
    #[error("No stage named [{stage}] in workflow {workflow}")]
    NoSuchStage {
        /// Workflow name.
        workflow: String,
        /// The undeclared target.
        stage: String,
    },

    /// A stage was entered more often than allowed.
    #[error("Stage {stage} of workflow {workflow} entered more than {limit} times")]
    StageLimitExceeded {
        /// Workflow name.
        workflow: String,
        /// Stage name.
        stage: String,
        /// Configured bound.
        limit: usize,
    },

    /// A statement failed.
    #[error("Stage {stage}: {message}")]
    StatementFailed {
        /// Stage name.
        stage: String,
        /// Description of the failure.
        message: String,
    },

    /// The operator declined to finalize the workflow.
    #[error("Workflow {workflow} aborted")]
    Aborted {
        /// Workflow name.
        workflow: String,
    },
}

/// Result type alias for converge operations.
pub type Result<T> = std::result::Result<T, ConvergeError>;

impl ConvergeError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is raised while planning, before any mutation.
    #[must_use]
    pub const fn is_fatal_before_execution(&self) -> bool {
        matches!(
            self,
            Self::Schema(_)
                | Self::Graph(_)
                | Self::FieldDiff(_)
                | Self::Plan(_)
                | Self::Lock(_)
                | Self::Config(_)
        )
    }

    /// Returns the cycle members if this is a circular dependency error.
    #[must_use]
    pub fn cycle(&self) -> Option<&[String]> {
        match self {
            Self::Plan(PlanError::CircularDependency { cycle }) => Some(cycle),
            _ => None,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a parse error without a location.
    #[must_use]
    pub fn parse(message: impl Into<String>) -> Self {
        Self::ParseError {
            message: message.into(),
            location: None,
        }
    }
}

impl StateError {
    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Creates a write error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }
}

impl LockError {
    /// Creates a lock IO error.
    #[must_use]
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_display_names_members_in_order() {
        let err = ConvergeError::Plan(PlanError::CircularDependency {
            cycle: vec![String::from("a"), String::from("b"), String::from("a")],
        });
        assert_eq!(
            err.to_string(),
            "Planning error: Circular dependency detected: a -> b -> a"
        );
        assert_eq!(err.cycle().map(<[String]>::len), Some(3));
        assert!(err.is_fatal_before_execution());
    }

    #[test]
    fn test_lock_error_names_force_unlock() {
        let err = LockError::Held {
            holder: String::from("ci-1"),
            since: String::from("2024-01-01T00:00:00Z"),
            lock_id: String::from("abc"),
        };
        let message = err.to_string();
        assert!(message.contains("force-unlock --lock-id abc"));
        assert!(message.contains("ci-1"));
    }

    #[test]
    fn test_execution_errors_are_not_planning_errors() {
        let err = ConvergeError::Execution(ExecutionError::NotExecutable {
            change: String::from("net::vpc main"),
        });
        assert!(!err.is_fatal_before_execution());
    }
}
