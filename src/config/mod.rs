//! Project configuration.
//!
//! This module handles everything read from disk before planning:
//! - Parsing `converge.yaml` with environment and `.env` overrides
//! - Validation of project settings, types and workflows
//! - Building the schema registry, resource graph and workflows
//! - Fingerprinting resource graphs

mod hash;
mod loader;
mod parser;
mod spec;
mod validator;

pub use hash::GraphHasher;
pub use loader::{
    Project, YamlGraphSource, build_registry, build_workflow, parse_identity, resource_from_config,
    value_from_yaml,
};
pub use parser::{
    ConfigParser, DEFAULT_CONFIG_FILES, ENV_ENVIRONMENT, ENV_MAX_PARALLEL, ENV_STATE_PATH,
    find_config_file,
};
pub use spec::{
    ApplyConfig, FieldConfig, FieldKindConfig, ProjectConfig, ProjectFile, ResourceConfig,
    StageConfig, StateConfig, StepConfig, TypeConfig, WorkflowConfig,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
