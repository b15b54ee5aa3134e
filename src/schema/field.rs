//! Field descriptors.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::rules::FieldRule;

/// Semantic kind of a field, which selects how it is compared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// Single value compared by equality.
    Scalar,
    /// Ordered list compared by element membership.
    List,
    /// String-keyed map compared key by key.
    Map,
    /// Reference to another resource.
    Reference,
    /// Nested block described by another registered type.
    Nested(String),
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar => write!(f, "scalar"),
            Self::List => write!(f, "list"),
            Self::Map => write!(f, "map"),
            Self::Reference => write!(f, "reference"),
            Self::Nested(type_name) => write!(f, "nested({type_name})"),
        }
    }
}

/// Schema descriptor for one field of a resource type.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffableField {
    /// Field name.
    pub name: String,
    /// Comparison kind.
    pub kind: FieldKind,
    /// Provider-assigned identifier; never compared.
    pub id: bool,
    /// Can be changed without replacing the resource.
    pub updatable: bool,
    /// Value is masked in summaries.
    pub sensitive: bool,
    /// Validation rules applied before planning.
    pub rules: Vec<FieldRule>,
}

impl DiffableField {
    /// Creates a non-updatable field of the given kind.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            id: false,
            updatable: false,
            sensitive: false,
            rules: Vec::new(),
        }
    }

    /// Scalar field.
    #[must_use]
    pub fn scalar(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Scalar)
    }

    /// List field.
    #[must_use]
    pub fn list(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::List)
    }

    /// Map field.
    #[must_use]
    pub fn map(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Map)
    }

    /// Reference field.
    #[must_use]
    pub fn reference(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Reference)
    }

    /// Nested block field.
    #[must_use]
    pub fn nested(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Nested(type_name.into()))
    }

    /// Marks the field updatable in place.
    #[must_use]
    pub const fn updatable(mut self) -> Self {
        self.updatable = true;
        self
    }

    /// Marks the field as the provider-assigned identifier.
    #[must_use]
    pub const fn id(mut self) -> Self {
        self.id = true;
        self
    }

    /// Marks the field sensitive.
    #[must_use]
    pub const fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// Adds a validation rule.
    #[must_use]
    pub fn with_rule(mut self, rule: FieldRule) -> Self {
        self.rules.push(rule);
        self
    }
}

/// Order of the two halves of a replacement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplacementOrder {
    /// Create the new resource, then delete the old one.
    #[default]
    CreateBeforeDelete,
    /// Delete the old resource first, e.g. when names must be unique.
    DeleteBeforeCreate,
}

impl fmt::Display for ReplacementOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateBeforeDelete => write!(f, "create_before_delete"),
            Self::DeleteBeforeCreate => write!(f, "delete_before_create"),
        }
    }
}
