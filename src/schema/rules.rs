//! Field validation rules.
//!
//! Numeric rules apply to a number, to every element of a numeric list and
//! to every numeric key of a map. Values that are not numeric are ignored.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::resource::{Resource, Value};

/// A constraint on a field value, checked before planning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldRule {
    /// Inclusive numeric range.
    Range {
        /// Lower bound.
        low: f64,
        /// Upper bound.
        high: f64,
    },
    /// Inclusive numeric minimum.
    Min(f64),
    /// Exhaustive list of accepted numbers.
    Allowed(Vec<f64>),
    /// The named field must not be set together with this one.
    ConflictsWith(String),
}

impl fmt::Display for FieldRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Range { low, high } => write!(f, "between {low} and {high}"),
            Self::Min(min) => write!(f, "at least {min}"),
            Self::Allowed(values) => {
                let values: Vec<String> = values.iter().map(ToString::to_string).collect();
                write!(f, "one of [{}]", values.join(", "))
            }
            Self::ConflictsWith(other) => write!(f, "not set together with '{other}'"),
        }
    }
}

impl FieldRule {
    /// Checks `field` of `resource` against this rule.
    ///
    /// # Errors
    ///
    /// Returns a description of the violation.
    pub fn check(&self, field: &str, resource: &Resource) -> Result<(), String> {
        let Some(value) = resource.field(field).filter(|v| !v.is_blank()) else {
            return Ok(());
        };

        if let Self::ConflictsWith(other) = self {
            return match resource.field(other) {
                Some(o) if !o.is_blank() => Err(format!(
                    "fields '{field}' and '{other}' cannot both be set"
                )),
                _ => Ok(()),
            };
        }

        for number in numbers(value) {
            if !self.accepts(number) {
                return Err(format!("field '{field}' must be {self}, got {number}"));
            }
        }
        Ok(())
    }

    #[allow(clippy::float_cmp)]
    fn accepts(&self, number: f64) -> bool {
        match self {
            Self::Range { low, high } => *low <= number && number <= *high,
            Self::Min(min) => number >= *min,
            Self::Allowed(values) => values.iter().any(|v| *v == number),
            Self::ConflictsWith(_) => true,
        }
    }
}

fn numbers(value: &Value) -> Vec<f64> {
    match value {
        Value::List(items) => items.iter().filter_map(Value::as_f64).collect(),
        Value::Map(entries) => entries.keys().filter_map(|k| k.parse().ok()).collect(),
        Value::String(_) => Vec::new(),
        other => other.as_f64().into_iter().collect(),
    }
}
