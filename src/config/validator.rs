//! Project file validation.
//!
//! Validation collects every problem in one pass. Errors block planning;
//! warnings are reported and otherwise ignored.

use crate::error::{ConfigError, Result};
use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;

use super::spec::{FieldKindConfig, ProjectConfig, ProjectFile, TypeConfig, WorkflowConfig};

/// Validator for project files.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing everything found.
#[derive(Debug, Default, Serialize)]
pub struct ValidationResult {
    /// Blocking problems.
    pub errors: Vec<ValidationError>,
    /// Non-fatal issues.
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug, Serialize)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a project file, failing on the first error found.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn validate(&self, config: &ProjectFile) -> Result<ValidationResult> {
        let result = self.check(config);

        match result.errors.first() {
            None => {
                debug!("Configuration validation passed");
                Ok(result)
            }
            Some(first) => Err(ConfigError::validation(first.message.clone(), first.field.clone()).into()),
        }
    }

    /// Collects every error and warning.
    #[must_use]
    pub fn check(&self, config: &ProjectFile) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_project(&config.project, &mut result);
        Self::validate_settings(config, &mut result);
        Self::validate_types(&config.types, &mut result);
        Self::validate_workflows(&config.workflows, &mut result);

        result
    }

    fn validate_project(project: &ProjectConfig, result: &mut ValidationResult) {
        if project.name.is_empty() {
            result.error("project.name", "Project name cannot be empty");
        } else if !is_valid_name(&project.name) {
            result.error(
                "project.name",
                format!(
                    "Project name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    project.name
                ),
            );
        }

        if project.environment.is_empty() {
            result.error("project.environment", "Environment cannot be empty");
        }
    }

    fn validate_settings(config: &ProjectFile, result: &mut ValidationResult) {
        if config.state.path.trim().is_empty() {
            result.error("state.path", "State path cannot be empty");
        }

        if config.apply.max_parallel == 0 {
            result.error("apply.max_parallel", "max_parallel must be at least 1");
        }

        if config.resources.is_empty() {
            result.warn("No resource files declared; every plan will delete what the state holds");
        }

        for path in &config.apply.scope {
            let path = path.trim_end_matches('/');
            let covered = config
                .resources
                .iter()
                .any(|r| r == path || r.starts_with(&format!("{path}/")));
            if !covered {
                result.warn(format!("Scope entry '{path}' matches no declared resource file"));
            }
        }
    }

    fn validate_types(types: &[TypeConfig], result: &mut ValidationResult) {
        let mut names = HashSet::new();
        let declared: HashSet<&str> = types.iter().map(|t| t.name.as_str()).collect();

        for (i, resource_type) in types.iter().enumerate() {
            let prefix = format!("types[{i}]");

            if resource_type.name.trim().is_empty() || resource_type.name.contains(char::is_whitespace) {
                result.error(
                    format!("{prefix}.name"),
                    format!("Type name '{}' is invalid", resource_type.name),
                );
            }
            if !names.insert(resource_type.name.as_str()) {
                result.error(
                    format!("{prefix}.name"),
                    format!("Duplicate type name: {}", resource_type.name),
                );
            }

            let mut fields = HashSet::new();
            let mut ids = 0;
            for (j, field) in resource_type.fields.iter().enumerate() {
                let path = format!("{prefix}.fields[{j}]");

                if !fields.insert(field.name.as_str()) {
                    result.error(
                        format!("{path}.name"),
                        format!("Duplicate field '{}' on {}", field.name, resource_type.name),
                    );
                }
                if field.id {
                    ids += 1;
                    if field.updatable {
                        result.error(format!("{path}.updatable"), "An id field cannot be updatable");
                    }
                }

                match (field.kind, &field.nested_type) {
                    (FieldKindConfig::Nested, None) => {
                        result.error(format!("{path}.nested_type"), "Nested fields must name a nested_type");
                    }
                    (FieldKindConfig::Nested, Some(nested)) if !declared.contains(nested.as_str()) => {
                        result.error(
                            format!("{path}.nested_type"),
                            format!("Nested type '{nested}' is not declared"),
                        );
                    }
                    (kind, Some(_)) if kind != FieldKindConfig::Nested => {
                        result.warn(format!(
                            "{path}: nested_type is ignored on a {kind:?} field",
                        ));
                    }
                    _ => {}
                }
            }

            if ids > 1 {
                result.error(
                    format!("{prefix}.fields"),
                    format!("{} declares more than one id field", resource_type.name),
                );
            }
        }
    }

    fn validate_workflows(workflows: &[WorkflowConfig], result: &mut ValidationResult) {
        let mut names = HashSet::new();

        for (i, workflow) in workflows.iter().enumerate() {
            let prefix = format!("workflows[{i}]");

            if !names.insert(workflow.name.as_str()) {
                result.error(
                    format!("{prefix}.name"),
                    format!("Duplicate workflow name: {}", workflow.name),
                );
            }
            if workflow.stages.is_empty() {
                result.error(
                    format!("{prefix}.stages"),
                    format!("Workflow {} has no stages", workflow.name),
                );
            }
            if workflow.max_stage_visits == Some(0) {
                result.error(
                    format!("{prefix}.max_stage_visits"),
                    "max_stage_visits must be at least 1",
                );
            }

            let mut stages = HashSet::new();
            for stage in &workflow.stages {
                if !stages.insert(stage.name.as_str()) {
                    result.error(
                        format!("{prefix}.stages"),
                        format!("Duplicate stage name: {}", stage.name),
                    );
                }
            }

            for stage in &workflow.stages {
                for target in stage.steps.iter().filter_map(|s| s.target()) {
                    if !stages.contains(target) {
                        result.warn(format!(
                            "Workflow {}: stage {} jumps to undeclared stage [{target}]",
                            workflow.name, stage.name
                        ));
                    }
                }
            }
        }
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }

    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return false;
    }

    !name.ends_with('-') && !name.contains("--")
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    fn parse(yaml: &str) -> ProjectFile {
        ConfigParser::new().parse_yaml(yaml, None).expect("parse")
    }

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("web-stack"));
        assert!(is_valid_name("my-app-123"));
        assert!(is_valid_name("a"));
    }

    #[test]
    fn test_invalid_name() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("Web-Stack")); // uppercase
        assert!(!is_valid_name("123-app")); // starts with number
        assert!(!is_valid_name("web_stack")); // underscore
        assert!(!is_valid_name("web-")); // ends with hyphen
        assert!(!is_valid_name("web--stack")); // consecutive hyphens
    }

    #[test]
    fn test_collects_every_error() {
        let config = parse(
            r"
project:
  name: Bad_Name
apply:
  max_parallel: 0
types:
  - name: t
    fields:
      - { name: id, id: true, updatable: true }
      - { name: disk, kind: nested }
resources: [a.yaml]
",
        );
        let result = ConfigValidator::new().check(&config);
        let fields: Vec<&str> = result.errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            [
                "project.name",
                "apply.max_parallel",
                "types[0].fields[0].updatable",
                "types[0].fields[1].nested_type"
            ]
        );
        assert!(ConfigValidator::new().validate(&config).is_err());
    }

    #[test]
    fn test_undeclared_goto_is_a_warning() {
        let config = parse(
            r"
project:
  name: demo
resources: [a.yaml]
workflows:
  - name: rotate
    stages:
      - name: first
        steps:
          - goto: missing
",
        );
        let result = ConfigValidator::new().validate(&config).expect("valid");
        assert_eq!(result.warning_count(), 1);
        assert!(result.warnings[0].contains("[missing]"));
    }

    #[test]
    fn test_empty_and_duplicate_workflows() {
        let config = parse(
            r"
project:
  name: demo
resources: [a.yaml]
workflows:
  - name: rotate
  - name: rotate
    stages:
      - name: s
      - name: s
",
        );
        let result = ConfigValidator::new().check(&config);
        assert_eq!(result.error_count(), 3);
    }
}
