//! Field values and cross-resource references.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::convert::Infallible;
use std::fmt;

use crate::error::GraphError;

use super::graph::ResourceId;

/// A single field value of a resource or nested block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// Unset.
    #[default]
    Null,
    /// Boolean scalar.
    Bool(bool),
    /// Integer scalar.
    Int(i64),
    /// Floating point scalar.
    Float(f64),
    /// String scalar.
    String(String),
    /// Ordered list.
    List(Vec<Self>),
    /// String-keyed map; also the representation of nested blocks.
    Map(BTreeMap<String, Self>),
    /// Reference to another resource (or one of its fields).
    Reference(Reference),
}

/// A reference to another resource, optionally to one of its fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Reference {
    /// The referenced resource.
    pub target: ResourceId,
    /// The referenced field, if any.
    #[serde(default)]
    pub field: Option<String>,
}

impl Reference {
    /// Creates a reference to a whole resource.
    #[must_use]
    pub const fn to_resource(target: ResourceId) -> Self {
        Self { target, field: None }
    }

    /// Creates a reference to a field of a resource.
    #[must_use]
    pub fn to_field(target: ResourceId, field: impl Into<String>) -> Self {
        Self {
            target,
            field: Some(field.into()),
        }
    }

    /// Parses `$(type name)` or `$(type name | field)`.
    ///
    /// Returns `Ok(None)` when the string is not a reference expression at all.
    ///
    /// # Errors
    ///
    /// Returns an error if the string starts a reference but is malformed.
    pub fn parse(expression: &str) -> Result<Option<Self>, GraphError> {
        let trimmed = expression.trim();
        let Some(body) = trimmed.strip_prefix("$(") else {
            return Ok(None);
        };
        let invalid = || GraphError::InvalidReference {
            expression: expression.to_string(),
        };
        let body = body.strip_suffix(')').ok_or_else(invalid)?;

        let (target, field) = match body.split_once('|') {
            Some((target, field)) => (target.trim(), Some(field.trim())),
            None => (body.trim(), None),
        };

        let mut parts = target.split_whitespace();
        let (Some(type_name), Some(name), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(invalid());
        };

        if field.is_some_and(str::is_empty) {
            return Err(invalid());
        }

        Ok(Some(Self {
            target: ResourceId::new(type_name, name),
            field: field.map(String::from),
        }))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "$({} | {field})", self.target),
            None => write!(f, "$({})", self.target),
        }
    }
}

impl Value {
    /// Short name of the value's shape, used in mismatch errors.
    #[must_use]
    pub const fn shape(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) | Self::Int(_) | Self::Float(_) | Self::String(_) | Self::Reference(_) => {
                "scalar"
            }
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    /// Returns true if the value is null, a blank string or an empty collection.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Null => true,
            Self::String(s) => s.trim().is_empty(),
            Self::List(items) => items.is_empty(),
            Self::Map(entries) => entries.is_empty(),
            _ => false,
        }
    }

    /// Returns true if the value is `Null`.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Numeric view of the value, if it is a number or a numeric string.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            #[allow(clippy::cast_precision_loss)]
            Self::Int(i) => Some(*i as f64),
            Self::Float(x) => Some(*x),
            Self::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// String view of the value, if it is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Collects every resource referenced anywhere inside this value.
    pub fn collect_references(&self, out: &mut BTreeSet<ResourceId>) {
        match self {
            Self::Reference(reference) => {
                out.insert(reference.target.clone());
            }
            Self::List(items) => items.iter().for_each(|v| v.collect_references(out)),
            Self::Map(entries) => entries.values().for_each(|v| v.collect_references(out)),
            _ => {}
        }
    }

    /// Rebuilds the value, replacing references for which `resolve` yields a value.
    ///
    /// # Errors
    ///
    /// Propagates the first error returned by `resolve`.
    pub fn try_resolve<E>(
        &self,
        resolve: &mut impl FnMut(&Reference) -> Result<Option<Self>, E>,
    ) -> Result<Self, E> {
        Ok(match self {
            Self::Reference(reference) => resolve(reference)?.unwrap_or_else(|| self.clone()),
            Self::List(items) => Self::List(
                items
                    .iter()
                    .map(|v| v.try_resolve(resolve))
                    .collect::<Result<_, E>>()?,
            ),
            Self::Map(entries) => Self::Map(
                entries
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), v.try_resolve(resolve)?)))
                    .collect::<Result<_, E>>()?,
            ),
            other => other.clone(),
        })
    }

    /// Infallible form of [`Value::try_resolve`].
    #[must_use]
    pub fn resolve_with(&self, resolve: &mut impl FnMut(&Reference) -> Option<Self>) -> Self {
        match self.try_resolve::<Infallible>(&mut |r| Ok(resolve(r))) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => write!(f, "{s}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Map(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
            Self::Reference(reference) => write!(f, "{reference}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Reference> for Value {
    fn from(reference: Reference) -> Self {
        Self::Reference(reference)
    }
}

impl<T: Into<Self>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

impl<K: Into<String>, V: Into<Self>> FromIterator<(K, V)> for Value {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::Map(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
