//! Field-level comparison of two resource snapshots.
//!
//! Each declared field of the owning type is compared by value. Id fields
//! are provider outputs and never compared. The outcome records which
//! fields changed, whether each change can be applied in place, and a
//! short summary per field for the plan.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::error::{FieldDiffError, Result};
use crate::resource::Value;
use crate::schema::{DiffableField, FieldKind, SchemaRegistry};

const MASK: &str = "(sensitive)";

static NULL: Value = Value::Null;

/// One changed field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldChange {
    /// Top-level field name.
    pub field: String,
    /// Whether the change can be applied without replacement.
    pub updatable: bool,
    /// Human-readable summary, e.g. `cidr: 10.0.0.0/16 -> 10.1.0.0/16`.
    pub summary: String,
}

/// Outcome of comparing two field sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldDiff {
    changes: Vec<FieldChange>,
}

impl FieldDiff {
    /// A diff with no changes.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            changes: Vec::new(),
        }
    }

    /// Builds a diff from already computed field changes.
    #[must_use]
    pub const fn from_changes(changes: Vec<FieldChange>) -> Self {
        Self { changes }
    }

    /// Compares `current` and `pending` field values of a resource of `type_name`.
    ///
    /// `resource` names the owner in errors.
    ///
    /// # Errors
    ///
    /// Returns an error if the type is not registered or a field holds values
    /// of incompatible shapes on the two sides.
    pub fn compute(
        registry: &SchemaRegistry,
        type_name: &str,
        resource: &str,
        current: &BTreeMap<String, Value>,
        pending: &BTreeMap<String, Value>,
    ) -> Result<Self> {
        let fields = registry.describe(type_name)?;
        let mut changes = Vec::new();
        for field in fields.iter().filter(|f| !f.id) {
            if let Some(change) = diff_field(registry, resource, "", field, current, pending)? {
                changes.push(change);
            }
        }
        Ok(Self { changes })
    }

    /// Changed fields in schema order.
    #[must_use]
    pub fn changes(&self) -> &[FieldChange] {
        &self.changes
    }

    /// Names of every changed field.
    #[must_use]
    pub fn changed_fields(&self) -> BTreeSet<String> {
        self.changes.iter().map(|c| c.field.clone()).collect()
    }

    /// Returns true if no field changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Returns true if any changed field cannot be updated in place.
    #[must_use]
    pub fn requires_replace(&self) -> bool {
        self.changes.iter().any(|c| !c.updatable)
    }

    /// Per-field summaries joined for a plan line.
    #[must_use]
    pub fn summary(&self) -> String {
        self.changes
            .iter()
            .map(|c| c.summary.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn diff_field(
    registry: &SchemaRegistry,
    resource: &str,
    prefix: &str,
    field: &DiffableField,
    current: &BTreeMap<String, Value>,
    pending: &BTreeMap<String, Value>,
) -> Result<Option<FieldChange>> {
    let old = current.get(&field.name).unwrap_or(&NULL);
    let new = pending.get(&field.name).unwrap_or(&NULL);
    if old == new {
        return Ok(None);
    }

    let path = format!("{prefix}{}", field.name);
    if !old.is_null() && !new.is_null() && old.shape() != new.shape() {
        return Err(FieldDiffError::TypeMismatch {
            resource: resource.to_string(),
            field: path,
            current: old.shape(),
            pending: new.shape(),
        }
        .into());
    }

    let mut updatable = field.updatable;
    let detail = match (&field.kind, old, new) {
        _ if field.sensitive => MASK.to_string(),
        (FieldKind::Nested(nested_type), Value::Map(_) | Value::Null, Value::Map(_) | Value::Null) => {
            let block = diff_block(registry, resource, &path, nested_type, old, new)?;
            if block.parts.is_empty() {
                return Ok(None);
            }
            updatable &= block.updatable;
            format!("{{{}}}", block.parts.join(", "))
        }
        (FieldKind::Nested(nested_type), Value::List(_) | Value::Null, Value::List(_) | Value::Null) => {
            let old_items = as_list(old);
            let new_items = as_list(new);
            let mut parts = Vec::new();
            for i in 0..old_items.len().max(new_items.len()) {
                let before = old_items.get(i).unwrap_or(&NULL);
                let after = new_items.get(i).unwrap_or(&NULL);
                if before == after {
                    continue;
                }
                let element = format!("{path}[{i}]");
                let block = diff_block(registry, resource, &element, nested_type, before, after)?;
                let marker = match (before.is_null(), after.is_null()) {
                    (true, _) => "+",
                    (_, true) => "-",
                    _ if block.parts.is_empty() => continue,
                    _ => "",
                };
                updatable &= block.updatable;
                parts.push(format!("{marker}[{i}]{{{}}}", block.parts.join(", ")));
            }
            if parts.is_empty() {
                return Ok(None);
            }
            parts.join(" ")
        }
        (FieldKind::Nested(_), _, _) => {
            return Err(FieldDiffError::TypeMismatch {
                resource: resource.to_string(),
                field: path,
                current: old.shape(),
                pending: new.shape(),
            }
            .into());
        }
        (_, Value::List(_) | Value::Null, Value::List(_) | Value::Null) => list_summary(old, new),
        (_, Value::Map(_) | Value::Null, Value::Map(_) | Value::Null) => {
            map_summary(as_map(old), as_map(new))
        }
        _ => scalar_summary(old, new),
    };

    Ok(Some(FieldChange {
        field: field.name.clone(),
        updatable,
        summary: format!("{}: {detail}", field.name),
    }))
}

/// Field summaries of one nested block and whether all of them can be
/// applied in place.
struct Block {
    parts: Vec<String>,
    updatable: bool,
}

fn diff_block(
    registry: &SchemaRegistry,
    resource: &str,
    path: &str,
    nested_type: &str,
    old: &Value,
    new: &Value,
) -> Result<Block> {
    let empty = BTreeMap::new();
    let (old_fields, new_fields) = match (old, new) {
        (Value::Map(_) | Value::Null, Value::Map(_) | Value::Null) => {
            (as_map(old).unwrap_or(&empty), as_map(new).unwrap_or(&empty))
        }
        _ => {
            return Err(FieldDiffError::TypeMismatch {
                resource: resource.to_string(),
                field: path.to_string(),
                current: old.shape(),
                pending: new.shape(),
            }
            .into());
        }
    };

    let mut block = Block {
        parts: Vec::new(),
        updatable: true,
    };
    let prefix = format!("{path}.");
    for nested in registry.describe(nested_type)?.iter().filter(|f| !f.id) {
        if let Some(change) = diff_field(registry, resource, &prefix, nested, old_fields, new_fields)? {
            block.updatable &= change.updatable;
            block.parts.push(change.summary);
        }
    }
    Ok(block)
}

fn as_list(value: &Value) -> &[Value] {
    match value {
        Value::List(items) => items,
        _ => &[],
    }
}

const fn as_map(value: &Value) -> Option<&BTreeMap<String, Value>> {
    match value {
        Value::Map(entries) => Some(entries),
        _ => None,
    }
}

fn scalar_summary(old: &Value, new: &Value) -> String {
    if old.is_blank() {
        new.to_string()
    } else {
        format!("{old} -> {new}")
    }
}

// Additions take precedence over removals for display. Both are always
// recorded as a change of the field.
fn list_summary(old: &Value, new: &Value) -> String {
    let empty = Vec::new();
    let old_items = match old {
        Value::List(items) => items,
        _ => &empty,
    };
    let new_items = match new {
        Value::List(items) => items,
        _ => &empty,
    };

    let added: Vec<String> = new_items
        .iter()
        .filter(|item| !old_items.contains(item))
        .map(ToString::to_string)
        .collect();
    if !added.is_empty() {
        return format!("+[{}]", added.join(", "));
    }

    let removed: Vec<String> = old_items
        .iter()
        .filter(|item| !new_items.contains(item))
        .map(ToString::to_string)
        .collect();
    if !removed.is_empty() {
        return format!("-[{}]", removed.join(", "));
    }

    // Same elements, different order or multiplicity.
    scalar_summary(old, new)
}

fn map_summary(
    old: Option<&BTreeMap<String, Value>>,
    new: Option<&BTreeMap<String, Value>>,
) -> String {
    let empty = BTreeMap::new();
    let old = old.unwrap_or(&empty);
    let new = new.unwrap_or(&empty);
    let mut parts = Vec::new();

    for (key, value) in new.iter().filter(|(k, _)| !old.contains_key(*k)) {
        parts.push(format!("+[{key}: {value}]"));
    }
    for (key, value) in old.iter().filter(|(k, _)| !new.contains_key(*k)) {
        parts.push(format!("-[{key}: {value}]"));
    }
    for (key, new_value) in new {
        let Some(old_value) = old.get(key) else {
            continue;
        };
        if old_value == new_value {
            continue;
        }
        let detail = match (old_value, new_value) {
            (Value::Map(a), Value::Map(b)) => map_summary(Some(a), Some(b)),
            _ => format!("{old_value} -> {new_value}"),
        };
        parts.push(format!("*[{key}: {detail}]"));
    }

    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::ChangeType;
    use crate::provider::StateOnlyOperations;
    use crate::schema::ResourceType;
    use std::sync::Arc;

    fn registry() -> SchemaRegistry {
        let ops = Arc::new(StateOnlyOperations::default());
        let mut registry = SchemaRegistry::new();
        registry
            .register(
                ResourceType::new("app::server", ops.clone())
                    .field(DiffableField::scalar("id").id())
                    .field(DiffableField::scalar("image").updatable())
                    .field(DiffableField::scalar("zone"))
                    .field(DiffableField::list("names").updatable())
                    .field(DiffableField::map("labels").updatable())
                    .field(DiffableField::scalar("password").updatable().sensitive())
                    .field(DiffableField::nested("disk", "app::disk").updatable())
                    .field(DiffableField::nested("disks", "app::disk").updatable()),
            )
            .expect("register server");
        registry
            .register(
                ResourceType::new("app::disk", ops)
                    .field(DiffableField::scalar("size").updatable())
                    .field(DiffableField::scalar("kind")),
            )
            .expect("register disk");
        registry
    }

    fn fields(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    fn diff(current: &[(&str, Value)], pending: &[(&str, Value)]) -> FieldDiff {
        FieldDiff::compute(
            &registry(),
            "app::server",
            "app::server web",
            &fields(current),
            &fields(pending),
        )
        .expect("diff failed")
    }

    #[test]
    fn test_equal_fields_produce_no_changes() {
        let values = [("image", Value::from("nginx:1")), ("zone", Value::from("a"))];
        assert!(diff(&values, &values).is_empty());
    }

    #[test]
    fn test_id_field_is_ignored() {
        let result = diff(&[("id", Value::from("srv-1"))], &[]);
        assert!(result.is_empty());
    }

    #[test]
    fn test_scalar_summary_omits_blank_old_value() {
        let result = diff(&[], &[("image", Value::from("nginx:1"))]);
        assert_eq!(result.summary(), "image: nginx:1");

        let result = diff(&[("image", Value::from("nginx:1"))], &[("image", Value::from("nginx:2"))]);
        assert_eq!(result.summary(), "image: nginx:1 -> nginx:2");
        assert!(!result.requires_replace());
    }

    #[test]
    fn test_list_additions_take_precedence() {
        let result = diff(
            &[("names", Value::from(vec!["a", "b"]))],
            &[("names", Value::from(vec!["a", "c"]))],
        );
        assert_eq!(result.summary(), "names: +[c]");
        assert_eq!(result.changed_fields(), BTreeSet::from([String::from("names")]));
    }

    #[test]
    fn test_list_removals_shown_without_additions() {
        let result = diff(
            &[("names", Value::from(vec!["a", "b"]))],
            &[("names", Value::from(vec!["a"]))],
        );
        assert_eq!(result.summary(), "names: -[b]");
    }

    #[test]
    fn test_list_reorder_is_a_change() {
        let result = diff(
            &[("names", Value::from(vec!["a", "b"]))],
            &[("names", Value::from(vec!["b", "a"]))],
        );
        assert_eq!(result.summary(), "names: [a, b] -> [b, a]");
    }

    #[test]
    fn test_map_summary_marks_changes_and_additions() {
        let current: Value = [("x", Value::from(1_i64))].into_iter().collect();
        let pending: Value = [("x", Value::from(2_i64)), ("y", Value::from(3_i64))]
            .into_iter()
            .collect();
        let result = diff(&[("labels", current)], &[("labels", pending)]);
        let summary = result.summary();
        assert!(summary.contains("*[x: 1 -> 2]"), "{summary}");
        assert!(summary.contains("+[y: 3]"), "{summary}");
    }

    #[test]
    fn test_map_summary_recurses_into_nested_maps() {
        let current: Value = [("a", [("b", Value::from(1_i64))].into_iter().collect::<Value>())]
            .into_iter()
            .collect();
        let pending: Value = [("a", [("b", Value::from(2_i64))].into_iter().collect::<Value>())]
            .into_iter()
            .collect();
        let result = diff(&[("labels", current)], &[("labels", pending)]);
        assert_eq!(result.summary(), "labels: *[a: *[b: 1 -> 2]]");
    }

    #[test]
    fn test_sensitive_values_are_masked() {
        let result = diff(
            &[("password", Value::from("hunter2"))],
            &[("password", Value::from("hunter3"))],
        );
        assert_eq!(result.summary(), "password: (sensitive)");
    }

    #[test]
    fn test_non_updatable_field_requires_replace() {
        let result = diff(
            &[("zone", Value::from("a")), ("image", Value::from("nginx:1"))],
            &[("zone", Value::from("b")), ("image", Value::from("nginx:2"))],
        );
        assert!(result.requires_replace());
        assert_eq!(result.changes().len(), 2);
    }

    #[test]
    fn test_nested_block_uses_nested_schema() {
        let disk = |size: i64, kind: &str| -> Value {
            [("size", Value::from(size)), ("kind", Value::from(kind))]
                .into_iter()
                .collect()
        };

        let resized = diff(&[("disk", disk(10, "ssd"))], &[("disk", disk(20, "ssd"))]);
        assert_eq!(resized.summary(), "disk: {size: 10 -> 20}");
        assert!(!resized.requires_replace());

        let rekinded = diff(&[("disk", disk(10, "ssd"))], &[("disk", disk(10, "hdd"))]);
        assert!(rekinded.requires_replace());
    }

    #[test]
    fn test_shape_mismatch_is_an_error() {
        let err = FieldDiff::compute(
            &registry(),
            "app::server",
            "app::server web",
            &fields(&[("labels", Value::from("x"))]),
            &fields(&[("labels", [("a", Value::from(1_i64))].into_iter().collect())]),
        )
        .unwrap_err();
        assert!(err.is_fatal_before_execution());
        assert!(err.to_string().contains("app::server web.labels"));
    }

    #[test]
    fn test_nested_block_lists_compare_per_element() {
        let disk = |size: i64, kind: &str| -> Value {
            [("size", Value::from(size)), ("kind", Value::from(kind))]
                .into_iter()
                .collect()
        };

        let resized = diff(
            &[("disks", Value::from(vec![disk(10, "ssd")]))],
            &[("disks", Value::from(vec![disk(20, "ssd")]))],
        );
        assert_eq!(resized.summary(), "disks: [0]{size: 10 -> 20}");
        assert_eq!(ChangeType::classify(true, true, &resized), ChangeType::Update);

        let rekinded = diff(
            &[("disks", Value::from(vec![disk(10, "ssd")]))],
            &[("disks", Value::from(vec![disk(10, "hdd")]))],
        );
        assert_eq!(ChangeType::classify(true, true, &rekinded), ChangeType::Replace);

        let added = diff(
            &[("disks", Value::from(vec![disk(10, "ssd")]))],
            &[("disks", Value::from(vec![disk(10, "ssd"), disk(5, "ssd")]))],
        );
        assert_eq!(added.summary(), "disks: +[1]{size: 5, kind: ssd}");
        assert!(added.requires_replace());
    }

    #[test]
    fn test_nested_field_rejects_scalars() {
        let disk: Value = [("size", Value::from(10_i64))].into_iter().collect();
        let err = FieldDiff::compute(
            &registry(),
            "app::server",
            "app::server web",
            &fields(&[("disk", disk)]),
            &fields(&[("disk", Value::Null), ("disks", Value::from("big"))]),
        )
        .unwrap_err();
        assert!(err.is_fatal_before_execution());
        assert!(err.to_string().contains("app::server web.disks"), "{err}");

        let err = FieldDiff::compute(
            &registry(),
            "app::server",
            "app::server web",
            &fields(&[]),
            &fields(&[("disks", Value::from(vec![Value::from(1_i64)]))]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("app::server web.disks[0]"), "{err}");
    }
}
