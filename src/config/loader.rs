//! Turns a project file into engine inputs.
//!
//! This module builds the schema registry from the declared types, loads
//! resource files into a graph, and compiles workflows into stages.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, Result};
use crate::provider::{ResourceOperations, StateOnlyOperations};
use crate::resource::{GraphSource, Reference, Resource, ResourceGraph, ResourceId, ScopeFilter, Value};
use crate::schema::{DiffableField, FieldKind, ResourceType, SchemaRegistry};
use crate::state::LocalStateStore;
use crate::workflow::{Declare, Goto, Message, Prompt, Remove, SetField, Stage, Statement, Workflow};

use super::parser::ConfigParser;
use super::spec::{FieldConfig, FieldKindConfig, ProjectFile, ResourceConfig, StepConfig, TypeConfig, WorkflowConfig};
use super::validator::ConfigValidator;

/// A loaded project: its file, its directory, and provider overrides.
pub struct Project {
    root: PathBuf,
    config: ProjectFile,
    operations: HashMap<String, Arc<dyn ResourceOperations>>,
}

impl Project {
    /// Loads `.env`, the project file and its overrides, then validates it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded or is invalid.
    pub fn load(config_path: &Path) -> Result<Self> {
        let root = config_path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

        let parser = ConfigParser::new().with_base_path(&root);
        parser.load_dotenv()?;
        let config = parser.load_with_env(config_path)?;

        let result = ConfigValidator::new().validate(&config)?;
        for warning in &result.warnings {
            warn!("{warning}");
        }

        Ok(Self::new(root, config))
    }

    /// Wraps an already parsed project file.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, config: ProjectFile) -> Self {
        Self {
            root: root.into(),
            config,
            operations: HashMap::new(),
        }
    }

    /// Uses `operations` for `type_name` instead of the state-only operations.
    #[must_use]
    pub fn with_operations(mut self, type_name: impl Into<String>, operations: Arc<dyn ResourceOperations>) -> Self {
        self.operations.insert(type_name.into(), operations);
        self
    }

    /// The project file.
    #[must_use]
    pub const fn config(&self) -> &ProjectFile {
        &self.config
    }

    /// Directory the project file lives in.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Builds the schema registry from the declared types.
    ///
    /// # Errors
    ///
    /// Returns an error if a type or field declaration is invalid.
    pub fn registry(&self) -> Result<SchemaRegistry> {
        build_registry(&self.config.types, &self.operations)
    }

    /// Scope of `apply`, `plan`, `destroy` and `refresh`.
    #[must_use]
    pub fn scope(&self) -> ScopeFilter {
        ScopeFilter::files(&self.config.apply.scope)
    }

    /// Maximum provider calls in flight.
    #[must_use]
    pub const fn max_parallel(&self) -> usize {
        self.config.apply.max_parallel
    }

    /// Source reading the declared resource files.
    #[must_use]
    pub fn graph_source(&self) -> YamlGraphSource {
        YamlGraphSource::new(&self.root, self.config.resources.clone())
    }

    /// Compiles a workflow by name.
    ///
    /// # Errors
    ///
    /// Returns an error if no workflow has that name or a step is malformed.
    pub fn workflow(&self, name: &str) -> Result<Workflow> {
        let config = self
            .config
            .workflow(name)
            .ok_or_else(|| ConfigError::UnknownWorkflow { name: name.to_string() })?;
        build_workflow(config, &self.scope())
    }

    /// Local state store at `state.path`, relative to the project directory.
    #[must_use]
    pub fn state_store(&self) -> LocalStateStore {
        LocalStateStore::with_base_dir(self.root.join(&self.config.state.path))
    }
}

impl fmt::Debug for Project {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Project")
            .field("root", &self.root)
            .field("project", &self.config.project.name)
            .field("operations", &self.operations.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Reads resources from YAML files.
///
/// Each file holds a list of `{type, name, fields}` entries; the file path
/// becomes each resource's source for scope filtering.
#[derive(Debug, Clone)]
pub struct YamlGraphSource {
    root: PathBuf,
    files: Vec<String>,
}

impl YamlGraphSource {
    /// Creates a source for `files`, relative to `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, files: Vec<String>) -> Self {
        Self {
            root: root.into(),
            files,
        }
    }

    /// Loads every file into one graph.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be read or parsed, an identity is
    /// declared twice, or a reference names an undeclared resource.
    pub async fn load(&self) -> Result<ResourceGraph> {
        let mut graph = ResourceGraph::new();

        for file in &self.files {
            let path = self.root.join(file);
            let content = tokio::fs::read_to_string(&path).await.map_err(|e| ConfigError::ParseError {
                message: format!("Failed to read resource file: {e}"),
                location: Some(path.display().to_string()),
            })?;
            if content.trim().is_empty() {
                debug!("{file} declares no resources");
                continue;
            }

            let entries: Vec<ResourceConfig> = serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location: Some(path.display().to_string()),
            })?;

            for entry in &entries {
                graph.insert(resource_from_config(entry, Some(file.as_str()))?)?;
            }
            debug!("Loaded {} resources from {file}", entries.len());
        }

        // Checked on the whole graph; a scoped view may legitimately miss targets.
        graph.check_references()?;
        info!("Loaded {} resources from {} files", graph.len(), self.files.len());
        Ok(graph)
    }
}

#[async_trait]
impl GraphSource for YamlGraphSource {
    async fn resolve(&self, scope: &ScopeFilter) -> Result<ResourceGraph> {
        Ok(self.load().await?.filter(scope))
    }
}

/// Builds a registry from type declarations.
///
/// Types without an entry in `operations` get [`StateOnlyOperations`].
///
/// # Errors
///
/// Returns an error if a declaration is invalid.
pub fn build_registry(
    types: &[TypeConfig],
    operations: &HashMap<String, Arc<dyn ResourceOperations>>,
) -> Result<SchemaRegistry> {
    let mut registry = SchemaRegistry::new();

    for declared in types {
        let operations = operations.get(&declared.name).cloned().unwrap_or_else(|| {
            let id_field = declared.fields.iter().find(|f| f.id).map(|f| f.name.clone());
            let state_only: Arc<dyn ResourceOperations> = Arc::new(StateOnlyOperations::new(id_field));
            state_only
        });

        let mut resource_type = ResourceType::new(&declared.name, operations).replacement(declared.replacement);
        for field in &declared.fields {
            resource_type = resource_type.field(field_from_config(&declared.name, field)?);
        }
        registry.register(resource_type)?;
    }

    registry.verify()?;
    debug!("Registered {} resource types", types.len());
    Ok(registry)
}

fn field_from_config(type_name: &str, field: &FieldConfig) -> Result<DiffableField> {
    let kind = match field.kind {
        FieldKindConfig::Scalar => FieldKind::Scalar,
        FieldKindConfig::List => FieldKind::List,
        FieldKindConfig::Map => FieldKind::Map,
        FieldKindConfig::Reference => FieldKind::Reference,
        FieldKindConfig::Nested => {
            let nested = field.nested_type.clone().ok_or_else(|| {
                ConfigError::validation(
                    format!("Nested field '{}' on {type_name} names no nested_type", field.name),
                    field.name.clone(),
                )
            })?;
            FieldKind::Nested(nested)
        }
    };

    Ok(DiffableField {
        name: field.name.clone(),
        kind,
        id: field.id,
        updatable: field.updatable,
        sensitive: field.sensitive,
        rules: field.rules.clone(),
    })
}

/// Compiles a workflow declaration.
///
/// An empty workflow scope falls back to `default_scope`.
///
/// # Errors
///
/// Returns an error if a step names a malformed identity or value.
pub fn build_workflow(config: &WorkflowConfig, default_scope: &ScopeFilter) -> Result<Workflow> {
    let scope = if config.scope.is_empty() {
        default_scope.clone()
    } else {
        ScopeFilter::files(&config.scope)
    };

    let mut workflow = Workflow::new(&config.name)
        .with_scope(scope)
        .with_max_stage_visits(config.max_stage_visits);

    for stage_config in &config.stages {
        let mut stage = Stage::new(&stage_config.name);
        for step in &stage_config.steps {
            stage.push(statement_from_config(step)?);
        }
        workflow = workflow.with_stage(stage);
    }

    Ok(workflow)
}

fn statement_from_config(step: &StepConfig) -> Result<Box<dyn Statement>> {
    Ok(match step {
        StepConfig::Message(text) => Box::new(Message(text.clone())),
        StepConfig::Set { resource, field, value } => Box::new(SetField {
            target: parse_identity(resource)?,
            field: field.clone(),
            value: value_from_yaml(value)?,
        }),
        StepConfig::Remove(resource) => Box::new(Remove(parse_identity(resource)?)),
        StepConfig::Declare(resource) => Box::new(Declare(resource_from_config(resource, None)?)),
        StepConfig::Prompt { question, otherwise } => Box::new(Prompt {
            question: question.clone(),
            otherwise: otherwise.clone(),
        }),
        StepConfig::Goto(stage) => Box::new(Goto(stage.clone())),
    })
}

/// Parses an identity written `type name`.
///
/// # Errors
///
/// Returns an error unless the text is exactly two words.
pub fn parse_identity(text: &str) -> Result<ResourceId> {
    let mut parts = text.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(type_name), Some(name), None) => Ok(ResourceId::new(type_name, name)),
        _ => Err(ConfigError::parse(format!("'{text}' is not a resource identity (expected `type name`)")).into()),
    }
}

/// Converts a resource file entry.
///
/// # Errors
///
/// Returns an error if a field value cannot be converted.
pub fn resource_from_config(entry: &ResourceConfig, source: Option<&str>) -> Result<Resource> {
    let mut resource = Resource::new(&entry.type_name, &entry.name);
    for (field, value) in &entry.fields {
        resource = resource.with_field(field.clone(), value_from_yaml(value)?);
    }
    Ok(match source {
        Some(source) => resource.with_source(source),
        None => resource,
    })
}

/// Converts a YAML value. Strings of the form `$(...)` become references.
///
/// # Errors
///
/// Returns an error for malformed references and unsupported map keys.
pub fn value_from_yaml(value: &serde_yaml::Value) -> Result<Value> {
    use serde_yaml::Value as Yaml;

    Ok(match value {
        Yaml::Null => Value::Null,
        Yaml::Bool(b) => Value::Bool(*b),
        Yaml::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if let Some(f) = n.as_f64() {
                Value::Float(f)
            } else {
                return Err(ConfigError::parse(format!("unsupported number: {n}")).into());
            }
        }
        Yaml::String(s) => Reference::parse(s)?.map_or_else(|| Value::String(s.clone()), Value::Reference),
        Yaml::Sequence(items) => Value::List(items.iter().map(value_from_yaml).collect::<Result<_>>()?),
        Yaml::Mapping(map) => {
            let mut out = BTreeMap::new();
            for (key, item) in map {
                let key = match key {
                    Yaml::String(s) => s.clone(),
                    Yaml::Number(n) => n.to_string(),
                    Yaml::Bool(b) => b.to_string(),
                    other => return Err(ConfigError::parse(format!("unsupported map key: {other:?}")).into()),
                };
                out.insert(key, value_from_yaml(item)?);
            }
            Value::Map(out)
        }
        Yaml::Tagged(tagged) => value_from_yaml(&tagged.value)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConvergeError, GraphError};
    use tempfile::TempDir;

    const PROJECT: &str = r#"
project:
  name: demo
types:
  - name: net::vpc
    fields:
      - { name: id, id: true }
      - { name: cidr }
      - { name: tags, kind: map, updatable: true }
  - name: net::subnet
    fields:
      - { name: id, id: true }
      - { name: vpc, kind: reference }
      - { name: ports, kind: list, updatable: true, rules: [ { range: { low: 1, high: 65535 } } ] }
resources:
  - network.yaml
workflows:
  - name: rotate
    max_stage_visits: 2
    stages:
      - name: patch
        steps:
          - set: { resource: "net::vpc main", field: cidr, value: 10.1.0.0/16 }
          - goto: done
      - name: done
"#;

    const NETWORK: &str = r#"
- type: net::vpc
  name: main
  fields:
    cidr: 10.0.0.0/16
    tags: { env: dev }
- type: net::subnet
  name: a
  fields:
    vpc: "$(net::vpc main)"
    ports: [80, 443]
"#;

    fn project(network: &str) -> (TempDir, Project) {
        let dir = TempDir::new().expect("temp dir");
        std::fs::write(dir.path().join("network.yaml"), network).expect("write");
        let config = ConfigParser::new().parse_yaml(PROJECT, None).expect("parse");
        let project = Project::new(dir.path(), config);
        (dir, project)
    }

    #[tokio::test]
    async fn test_init_templates_load() {
        let dir = TempDir::new().expect("temp dir");
        let config_path = dir.path().join("converge.yaml");
        std::fs::write(&config_path, include_str!("../../templates/converge.yaml")).expect("write");
        std::fs::write(dir.path().join("network.yaml"), include_str!("../../templates/network.yaml")).expect("write");

        let project = Project::load(&config_path).expect("load");
        let registry = project.registry().expect("registry");
        let graph = project.graph_source().load().await.expect("graph");
        for resource in graph.iter() {
            registry.validate_resource(resource).expect("valid resource");
        }
        assert_eq!(graph.len(), 2);
        assert_eq!(project.workflow("retire-subnet").expect("workflow").stages().len(), 3);
    }

    #[tokio::test]
    async fn test_loads_graph_with_references() {
        let (_dir, project) = project(NETWORK);
        let graph = project.graph_source().load().await.expect("load");

        let subnet = graph.get(&ResourceId::new("net::subnet", "a")).expect("subnet");
        assert_eq!(subnet.source.as_deref(), Some("network.yaml"));
        assert_eq!(
            graph.dependencies_of(&subnet.id),
            [ResourceId::new("net::vpc", "main")]
        );
        assert_eq!(
            subnet.field("ports"),
            Some(&Value::List(vec![Value::Int(80), Value::Int(443)]))
        );
    }

    #[tokio::test]
    async fn test_dangling_reference_rejected() {
        let (_dir, project) = project(
            r#"
- type: net::subnet
  name: a
  fields:
    vpc: "$(net::vpc missing)"
"#,
        );
        let err = project.graph_source().load().await.expect_err("dangling");
        assert!(matches!(err, ConvergeError::Graph(GraphError::DanglingReference { .. })));
    }

    #[tokio::test]
    async fn test_duplicate_resource_rejected() {
        let (_dir, project) = project("- { type: net::vpc, name: main }\n- { type: net::vpc, name: main }\n");
        let err = project.graph_source().load().await.expect_err("duplicate");
        assert!(matches!(err, ConvergeError::Graph(GraphError::DuplicateResource { .. })));
    }

    #[test]
    fn test_registry_from_types() {
        let (_dir, project) = project(NETWORK);
        let registry = project.registry().expect("registry");

        assert_eq!(registry.id_fields().get("net::vpc").map(String::as_str), Some("id"));
        let subnet = registry.resource_type("net::subnet").expect("registered");
        assert_eq!(subnet.get_field("vpc").map(|f| f.kind.clone()), Some(FieldKind::Reference));
        assert_eq!(subnet.get_field("ports").map(|f| f.rules.len()), Some(1));
    }

    #[test]
    fn test_workflow_compiles() {
        let (_dir, project) = project(NETWORK);
        let workflow = project.workflow("rotate").expect("workflow");
        assert_eq!(workflow.stages().len(), 2);
        assert!(workflow.scope().is_all());

        let err = project.workflow("missing").expect_err("unknown");
        assert!(matches!(err, ConvergeError::Config(ConfigError::UnknownWorkflow { .. })));
    }

    #[test]
    fn test_value_conversion() {
        let yaml: serde_yaml::Value =
            serde_yaml::from_str("{ size: 2, ratio: 0.5, on: true, ref: '$(t a | id)', 8080: open }").expect("yaml");
        let value = value_from_yaml(&yaml).expect("convert");

        let Value::Map(map) = value else {
            panic!("expected a map");
        };
        assert_eq!(map.get("size"), Some(&Value::Int(2)));
        assert_eq!(map.get("ratio"), Some(&Value::Float(0.5)));
        assert_eq!(map.get("on"), Some(&Value::Bool(true)));
        assert_eq!(map.get("8080"), Some(&Value::from("open")));
        assert!(matches!(map.get("ref"), Some(Value::Reference(r)) if r.field.as_deref() == Some("id")));
    }

    #[test]
    fn test_parse_identity() {
        assert_eq!(
            parse_identity("app::server web").expect("identity"),
            ResourceId::new("app::server", "web")
        );
        assert!(parse_identity("web").is_err());
        assert!(parse_identity("a b c").is_err());
    }
}
