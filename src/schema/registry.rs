//! Static per-type schema registration.
//!
//! Every resource type is registered once, at composition time, with its
//! ordered field list, its replacement order and its operations. Nothing
//! is discovered at runtime.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::error::{PlanError, SchemaError};
use crate::provider::{ModificationHooks, ResourceOperations};
use crate::resource::{Resource, Value};

use super::field::{DiffableField, FieldKind, ReplacementOrder};
use super::rules::FieldRule;

/// A registered resource type.
#[derive(Clone)]
pub struct ResourceType {
    name: String,
    fields: Vec<DiffableField>,
    replacement: ReplacementOrder,
    operations: Arc<dyn ResourceOperations>,
    hooks: Vec<Arc<dyn ModificationHooks>>,
}

impl ResourceType {
    /// Creates a type with no fields.
    #[must_use]
    pub fn new(name: impl Into<String>, operations: Arc<dyn ResourceOperations>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            replacement: ReplacementOrder::default(),
            operations,
            hooks: Vec::new(),
        }
    }

    /// Appends a field descriptor.
    #[must_use]
    pub fn field(mut self, field: DiffableField) -> Self {
        self.fields.push(field);
        self
    }

    /// Sets the replacement order.
    #[must_use]
    pub const fn replacement(mut self, order: ReplacementOrder) -> Self {
        self.replacement = order;
        self
    }

    /// Adds a lifecycle hook. Hooks run in the order they were added.
    #[must_use]
    pub fn hook(mut self, hook: Arc<dyn ModificationHooks>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared fields in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[DiffableField] {
        &self.fields
    }

    /// Looks up a declared field.
    #[must_use]
    pub fn get_field(&self, name: &str) -> Option<&DiffableField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// The id field, if the type declares one.
    #[must_use]
    pub fn id_field(&self) -> Option<&DiffableField> {
        self.fields.iter().find(|f| f.id)
    }

    /// Replacement order.
    #[must_use]
    pub const fn replacement_order(&self) -> ReplacementOrder {
        self.replacement
    }

    /// Operations for resources of this type.
    #[must_use]
    pub const fn operations(&self) -> &Arc<dyn ResourceOperations> {
        &self.operations
    }

    /// Lifecycle hooks in the order they run.
    #[must_use]
    pub fn hooks(&self) -> &[Arc<dyn ModificationHooks>] {
        &self.hooks
    }
}

impl fmt::Debug for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceType")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .field("replacement", &self.replacement)
            .field("hooks", &self.hooks.len())
            .finish_non_exhaustive()
    }
}

/// Registry of resource type schemas.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    types: BTreeMap<String, ResourceType>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a resource type.
    ///
    /// # Errors
    ///
    /// Returns an error if the type is already registered, declares a field
    /// twice, declares more than one id field, declares an updatable id field,
    /// or has a rule naming an undeclared field.
    pub fn register(&mut self, resource_type: ResourceType) -> Result<(), SchemaError> {
        let type_name = resource_type.name.clone();
        if self.types.contains_key(&type_name) {
            return Err(SchemaError::DuplicateType { type_name });
        }

        let mut seen = HashSet::new();
        let mut id_field: Option<&str> = None;
        for field in &resource_type.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField {
                    type_name,
                    field: field.name.clone(),
                });
            }
            if field.id {
                if field.updatable {
                    return Err(SchemaError::UpdatableId {
                        type_name,
                        field: field.name.clone(),
                    });
                }
                if let Some(first) = id_field {
                    return Err(SchemaError::MultipleIds {
                        type_name,
                        first: first.to_string(),
                        second: field.name.clone(),
                    });
                }
                id_field = Some(&field.name);
            }
        }

        for field in &resource_type.fields {
            for rule in &field.rules {
                if let FieldRule::ConflictsWith(other) = rule {
                    if !seen.contains(other.as_str()) {
                        return Err(SchemaError::RuleOnUndeclaredField {
                            type_name,
                            field: other.clone(),
                        });
                    }
                }
            }
        }

        debug!(
            "Registered type {} ({} fields)",
            type_name,
            resource_type.fields.len()
        );
        self.types.insert(type_name, resource_type);
        Ok(())
    }

    /// Checks that every nested field names a registered type.
    ///
    /// # Errors
    ///
    /// Returns the first nested field whose type is missing.
    pub fn verify(&self) -> Result<(), SchemaError> {
        for resource_type in self.types.values() {
            for field in &resource_type.fields {
                if let FieldKind::Nested(nested) = &field.kind {
                    if !self.types.contains_key(nested) {
                        return Err(SchemaError::UnregisteredNested {
                            type_name: resource_type.name.clone(),
                            field: field.name.clone(),
                            nested_type: nested.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Returns the ordered field descriptors of a type.
    ///
    /// # Errors
    ///
    /// Returns an error if the type is not registered.
    pub fn describe(&self, type_name: &str) -> Result<&[DiffableField], SchemaError> {
        self.resource_type(type_name).map(ResourceType::fields)
    }

    /// Returns a registered type.
    ///
    /// # Errors
    ///
    /// Returns an error if the type is not registered.
    pub fn resource_type(&self, type_name: &str) -> Result<&ResourceType, SchemaError> {
        self.types.get(type_name).ok_or_else(|| SchemaError::UnknownType {
            type_name: type_name.to_string(),
        })
    }

    /// Returns true if the type is registered.
    #[must_use]
    pub fn contains(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    /// Registered type names.
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    /// Name of the id field of each type that declares one.
    #[must_use]
    pub fn id_fields(&self) -> BTreeMap<String, String> {
        self.types
            .values()
            .filter_map(|t| t.id_field().map(|f| (t.name.clone(), f.name.clone())))
            .collect()
    }

    /// Checks that a resource's type is registered and that it only sets
    /// declared fields, recursing into nested blocks.
    ///
    /// # Errors
    ///
    /// Returns an error on an unknown type or an undeclared field.
    pub fn check_resource(&self, resource: &Resource) -> Result<(), SchemaError> {
        let label = resource.id.to_string();
        self.check_fields(&label, &resource.id.type_name, &resource.fields, "")
    }

    fn check_fields(
        &self,
        label: &str,
        type_name: &str,
        fields: &BTreeMap<String, Value>,
        prefix: &str,
    ) -> Result<(), SchemaError> {
        let resource_type = self.resource_type(type_name)?;
        for (name, value) in fields {
            let Some(field) = resource_type.get_field(name) else {
                return Err(SchemaError::UndeclaredField {
                    resource: label.to_string(),
                    field: format!("{prefix}{name}"),
                });
            };
            let FieldKind::Nested(nested) = &field.kind else {
                continue;
            };
            match value {
                Value::Null => {}
                Value::Map(inner) => self.check_fields(label, nested, inner, &format!("{prefix}{name}."))?,
                Value::List(items) => {
                    for (i, item) in items.iter().enumerate() {
                        let Value::Map(inner) = item else {
                            return Err(SchemaError::MalformedNested {
                                resource: label.to_string(),
                                field: format!("{prefix}{name}[{i}]"),
                                shape: item.shape(),
                            });
                        };
                        self.check_fields(label, nested, inner, &format!("{prefix}{name}[{i}]."))?;
                    }
                }
                other => {
                    return Err(SchemaError::MalformedNested {
                        resource: label.to_string(),
                        field: format!("{prefix}{name}"),
                        shape: other.shape(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Applies every field rule of the resource's type.
    ///
    /// # Errors
    ///
    /// Returns the first rule violation, or an error if the type is unknown.
    pub fn validate_resource(&self, resource: &Resource) -> crate::error::Result<()> {
        let resource_type = self.resource_type(&resource.id.type_name)?;
        for field in &resource_type.fields {
            for rule in &field.rules {
                rule.check(&field.name, resource)
                    .map_err(|message| PlanError::Validation {
                        resource: resource.id.to_string(),
                        message,
                    })?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::StateOnlyOperations;

    fn ops() -> Arc<dyn ResourceOperations> {
        Arc::new(StateOnlyOperations::default())
    }

    fn vpc_type() -> ResourceType {
        ResourceType::new("net::vpc", ops())
            .field(DiffableField::scalar("id").id())
            .field(DiffableField::scalar("cidr"))
            .field(DiffableField::map("tags").updatable())
    }

    #[test]
    fn test_describe_returns_declared_order() {
        let mut registry = SchemaRegistry::new();
        registry.register(vpc_type()).expect("register failed");

        let names: Vec<&str> = registry
            .describe("net::vpc")
            .expect("describe failed")
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(names, vec!["id", "cidr", "tags"]);
        assert_eq!(registry.id_fields().get("net::vpc").map(String::as_str), Some("id"));
    }

    #[test]
    fn test_unknown_type() {
        let registry = SchemaRegistry::new();
        assert!(matches!(
            registry.describe("net::vpc"),
            Err(SchemaError::UnknownType { .. })
        ));
    }

    #[test]
    fn test_registration_conflicts() {
        let mut registry = SchemaRegistry::new();
        registry.register(vpc_type()).expect("register failed");
        assert!(matches!(
            registry.register(vpc_type()),
            Err(SchemaError::DuplicateType { .. })
        ));

        let updatable_id = ResourceType::new("a", ops()).field(DiffableField::scalar("id").id().updatable());
        assert!(matches!(
            registry.register(updatable_id),
            Err(SchemaError::UpdatableId { .. })
        ));

        let two_ids = ResourceType::new("b", ops())
            .field(DiffableField::scalar("id").id())
            .field(DiffableField::scalar("arn").id());
        assert!(matches!(
            registry.register(two_ids),
            Err(SchemaError::MultipleIds { .. })
        ));

        let duplicate = ResourceType::new("c", ops())
            .field(DiffableField::scalar("x"))
            .field(DiffableField::list("x"));
        assert!(matches!(
            registry.register(duplicate),
            Err(SchemaError::DuplicateField { .. })
        ));
    }

    #[test]
    fn test_verify_nested_types() {
        let mut registry = SchemaRegistry::new();
        registry
            .register(ResourceType::new("app::server", ops()).field(DiffableField::nested("disk", "app::disk")))
            .expect("register failed");
        assert!(matches!(
            registry.verify(),
            Err(SchemaError::UnregisteredNested { .. })
        ));

        registry
            .register(ResourceType::new("app::disk", ops()).field(DiffableField::scalar("size")))
            .expect("register failed");
        assert!(registry.verify().is_ok());
    }

    #[test]
    fn test_check_resource_rejects_undeclared_fields() {
        let mut registry = SchemaRegistry::new();
        registry.register(vpc_type()).expect("register failed");

        let ok = Resource::new("net::vpc", "main").with_field("cidr", "10.0.0.0/16");
        assert!(registry.check_resource(&ok).is_ok());

        let bad = ok.with_field("colour", "blue");
        assert!(matches!(
            registry.check_resource(&bad),
            Err(SchemaError::UndeclaredField { .. })
        ));
    }

    #[test]
    fn test_check_resource_walks_nested_blocks() {
        let mut registry = SchemaRegistry::new();
        registry
            .register(ResourceType::new("app::server", ops()).field(DiffableField::nested("disks", "app::disk")))
            .expect("register failed");
        registry
            .register(ResourceType::new("app::disk", ops()).field(DiffableField::scalar("size")))
            .expect("register failed");

        let disk = |key: &str| -> Value { [(key, Value::from(10_i64))].into_iter().collect() };
        let listed = Resource::new("app::server", "web").with_field("disks", Value::from(vec![disk("size")]));
        assert!(registry.check_resource(&listed).is_ok());

        let undeclared = Resource::new("app::server", "web").with_field("disks", Value::from(vec![disk("speed")]));
        assert!(matches!(
            registry.check_resource(&undeclared),
            Err(SchemaError::UndeclaredField { field, .. }) if field == "disks[0].speed"
        ));

        let scalar = Resource::new("app::server", "web").with_field("disks", "big");
        assert!(matches!(
            registry.check_resource(&scalar),
            Err(SchemaError::MalformedNested { shape: "scalar", .. })
        ));

        let mixed = Resource::new("app::server", "web")
            .with_field("disks", Value::from(vec![disk("size"), Value::from(3_i64)]));
        assert!(matches!(
            registry.check_resource(&mixed),
            Err(SchemaError::MalformedNested { field, .. }) if field == "disks[1]"
        ));
    }

    #[test]
    fn test_validate_resource_applies_rules() {
        let mut registry = SchemaRegistry::new();
        registry
            .register(
                ResourceType::new("app::server", ops())
                    .field(DiffableField::scalar("port").with_rule(FieldRule::Min(1.0))),
            )
            .expect("register failed");

        let bad = Resource::new("app::server", "web").with_field("port", 0_i64);
        let err = registry.validate_resource(&bad).unwrap_err();
        assert!(err.is_fatal_before_execution());
        assert!(err.to_string().contains("app::server web"));
    }
}
