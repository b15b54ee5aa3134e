//! Project file types.
//!
//! This module defines the structs that map to `converge.yaml`: project
//! identity, state location, apply settings, resource type schemas,
//! resource files and workflows.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::schema::{FieldRule, ReplacementOrder};

/// The root of a `converge.yaml` project file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectFile {
    /// Project identity.
    pub project: ProjectConfig,
    /// State location.
    #[serde(default)]
    pub state: StateConfig,
    /// Apply settings.
    #[serde(default)]
    pub apply: ApplyConfig,
    /// Resource type schemas.
    #[serde(default)]
    pub types: Vec<TypeConfig>,
    /// Resource files, relative to the project file.
    #[serde(default)]
    pub resources: Vec<String>,
    /// Remediation workflows.
    #[serde(default)]
    pub workflows: Vec<WorkflowConfig>,
}

/// Project-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Unique name for the project.
    pub name: String,
    /// Environment (e.g., "dev", "staging", "prod").
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// State location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Directory holding the state and lock files.
    #[serde(default = "default_state_path")]
    pub path: String,
}

/// Apply settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplyConfig {
    /// Maximum provider calls in flight.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Resource files in scope; empty means every file.
    #[serde(default)]
    pub scope: Vec<String>,
}

/// Schema of one resource type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TypeConfig {
    /// Type name, e.g. `net::vpc`.
    pub name: String,
    /// Order of the two halves of a replacement.
    #[serde(default)]
    pub replacement: ReplacementOrder,
    /// Declared fields.
    #[serde(default)]
    pub fields: Vec<FieldConfig>,
}

/// One declared field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldConfig {
    /// Field name.
    pub name: String,
    /// Comparison kind.
    #[serde(default)]
    pub kind: FieldKindConfig,
    /// Type describing a nested block; required for `nested` fields.
    #[serde(default)]
    pub nested_type: Option<String>,
    /// Provider-assigned identifier.
    #[serde(default)]
    pub id: bool,
    /// Can change in place.
    #[serde(default)]
    pub updatable: bool,
    /// Masked in plans.
    #[serde(default)]
    pub sensitive: bool,
    /// Validation rules.
    #[serde(default)]
    pub rules: Vec<FieldRule>,
}

/// Field kinds as written in the project file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FieldKindConfig {
    /// Single value.
    #[default]
    Scalar,
    /// List of values.
    List,
    /// String-keyed map.
    Map,
    /// Reference to another resource.
    Reference,
    /// Block described by `nested_type`.
    Nested,
}

/// A resource as written in a resource file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceConfig {
    /// Type name.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Instance name.
    pub name: String,
    /// Field values; strings of the form `$(type name)` are references.
    #[serde(default)]
    pub fields: BTreeMap<String, serde_yaml::Value>,
}

/// A named remediation workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowConfig {
    /// Workflow name.
    pub name: String,
    /// Resource files the final diff covers; empty uses the apply scope.
    #[serde(default)]
    pub scope: Vec<String>,
    /// Bound on how often one stage may be entered; unset is unbounded.
    #[serde(default)]
    pub max_stage_visits: Option<usize>,
    /// Stages in declaration order.
    #[serde(default)]
    pub stages: Vec<StageConfig>,
}

/// One workflow stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageConfig {
    /// Stage name.
    pub name: String,
    /// Statements run in order.
    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

/// A declarative workflow statement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StepConfig {
    /// Prints a line.
    Message(String),
    /// Sets a field on a pending resource.
    Set {
        /// Target, written `type name`.
        resource: String,
        /// Field name.
        field: String,
        /// New value.
        value: serde_yaml::Value,
    },
    /// Drops a pending resource, written `type name`.
    Remove(String),
    /// Adds a pending resource.
    Declare(ResourceConfig),
    /// Asks the operator; on decline jumps to `otherwise`.
    Prompt {
        /// Question shown to the operator.
        question: String,
        /// Stage entered when the answer is no.
        otherwise: String,
    },
    /// Jumps to a stage.
    Goto(String),
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            scope: Vec::new(),
        }
    }
}

impl StepConfig {
    /// Stage named by a transition, if this step can transition.
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Goto(stage) => Some(stage),
            Self::Prompt { otherwise, .. } => Some(otherwise),
            _ => None,
        }
    }
}

impl ProjectFile {
    /// Looks up a workflow by name.
    #[must_use]
    pub fn workflow(&self, name: &str) -> Option<&WorkflowConfig> {
        self.workflows.iter().find(|w| w.name == name)
    }
}

fn default_environment() -> String {
    String::from("dev")
}

fn default_state_path() -> String {
    String::from(crate::state::STATE_DIR)
}

const fn default_max_parallel() -> usize {
    4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let file: ProjectFile = serde_yaml::from_str("project:\n  name: demo\n").expect("parse");
        assert_eq!(file.project.environment, "dev");
        assert_eq!(file.state.path, ".converge");
        assert_eq!(file.apply.max_parallel, 4);
        assert!(file.types.is_empty());
    }

    #[test]
    fn test_steps_parse() {
        let yaml = r#"
name: rotate
stages:
  - name: drain
    steps:
      - message: "Draining"
      - set: { resource: "app::server web", field: size, value: 2 }
      - remove: "app::server old"
      - prompt: { question: "Continue?", otherwise: drain }
      - goto: done
  - name: done
"#;
        let workflow: WorkflowConfig = serde_yaml::from_str(yaml).expect("parse");
        let steps = &workflow.stages[0].steps;
        assert_eq!(steps.len(), 5);
        assert_eq!(steps[3].target(), Some("drain"));
        assert_eq!(steps[4], StepConfig::Goto(String::from("done")));
        assert!(workflow.max_stage_visits.is_none());
    }

    #[test]
    fn test_field_rules_parse() {
        let yaml = r"
name: port
kind: list
rules:
  - range: { low: 1, high: 65535 }
  - conflicts_with: socket
";
        let field: FieldConfig = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(field.kind, FieldKindConfig::List);
        assert_eq!(field.rules.len(), 2);
        assert_eq!(field.rules[1], FieldRule::ConflictsWith(String::from("socket")));
    }
}
