//! The complete set of changes for a graph pair.
//!
//! Building a diff is read-only: schema checks, field validation, field
//! comparison, cycle detection and ordering all happen before anything is
//! executed, and any failure here stops the run.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{PlanError, Result};
use crate::resource::{ResourceGraph, ResourceId, ScopeFilter};
use crate::schema::SchemaRegistry;

use super::change::{Change, ChangeType};
use super::field_diff::FieldDiff;
use super::order;
use super::realized::resolve_known;

/// One line of a rendered plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanEntry {
    /// Classification.
    pub action: ChangeType,
    /// Resource display name.
    pub resource: String,
    /// Field summaries for updates and replacements.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl fmt::Display for PlanEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.summary {
            Some(summary) => write!(f, "{} {} ({summary})", self.action, self.resource),
            None => write!(f, "{} {}", self.action, self.resource),
        }
    }
}

/// Number of changes per classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangeCounts {
    /// Creates.
    pub create: usize,
    /// In-place updates.
    pub update: usize,
    /// Replacements.
    pub replace: usize,
    /// Deletes.
    pub delete: usize,
    /// Unchanged resources.
    pub keep: usize,
}

impl fmt::Display for ChangeCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to replace, {} to delete",
            self.create, self.update, self.replace, self.delete
        )
    }
}

/// Every change for a (current, pending) graph pair restricted to a scope,
/// with its execution order.
#[derive(Debug)]
pub struct Diff {
    changes: Vec<Arc<Change>>,
    index: HashMap<ResourceId, usize>,
    forward_layers: Vec<Vec<usize>>,
    reverse_layers: Vec<Vec<usize>>,
}

impl Diff {
    /// Builds the diff.
    ///
    /// Identities are taken from both graphs, restricted to `scope`, and
    /// ordered by declaration: pending resources first, then resources that
    /// only exist in the current state.
    ///
    /// # Errors
    ///
    /// Returns an error if a resource uses an unregistered type or an
    /// undeclared field, fails validation, holds incomparable field values,
    /// or if the changes form a dependency cycle.
    pub fn build(
        registry: &SchemaRegistry,
        current: &ResourceGraph,
        pending: &ResourceGraph,
        scope: &ScopeFilter,
    ) -> Result<Self> {
        let current = current.filter(scope);
        let pending = pending.filter(scope);
        let id_fields = registry.id_fields();

        for resource in &pending {
            registry.check_resource(resource)?;
            registry.validate_resource(resource)?;
        }

        let ids: Vec<ResourceId> = pending
            .iter()
            .chain(current.iter().filter(|r| !pending.contains(&r.id)))
            .map(|r| r.id.clone())
            .collect();

        // A reference to a resource being replaced must not resolve to the
        // outgoing id, so its referrer is updated after the successor
        // exists. Unresolving it may make the referrer a replacement in
        // turn; the replaced set only grows, so this settles.
        let mut replaced = HashSet::new();
        let mut diffs_by_id = loop {
            let mut known = current.clone();
            for id in &replaced {
                known.remove(id);
            }
            let diffs = field_diffs(registry, &current, &pending, &known, &id_fields)?;
            let now_replaced: HashSet<ResourceId> = diffs
                .iter()
                .filter(|(_, diff)| diff.requires_replace())
                .map(|(id, _)| id.clone())
                .collect();
            if now_replaced == replaced {
                break diffs;
            }
            debug!("{} replacements unresolve their referrers", now_replaced.len());
            replaced = now_replaced;
        };

        let mut changes = Vec::with_capacity(ids.len());
        for id in ids {
            let resource_type = registry.resource_type(&id.type_name)?;
            let current_side = current.get(&id).cloned();
            let pending_side = pending.get(&id).cloned();
            let field_diff = diffs_by_id.remove(&id).unwrap_or_default();

            let change = Change::new(
                id.clone(),
                current_side,
                pending_side,
                field_diff,
                pending.dependencies_of(&id),
                current.dependents_of(&id),
                resource_type.replacement_order(),
                Arc::clone(resource_type.operations()),
            )
            .with_hooks(resource_type.hooks().to_vec());
            debug!("Classified {} as {}", change.display_name(), change.change_type());
            changes.push(Arc::new(change));
        }

        let index: HashMap<ResourceId, usize> = changes
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id().clone(), i))
            .collect();

        let forward_nodes: Vec<usize> = (0..changes.len())
            .filter(|&i| changes[i].change_type().is_forward())
            .collect();
        let forward_edges: Vec<Vec<usize>> = changes
            .iter()
            .map(|c| indices(&index, c.forward_dependencies()))
            .collect();

        let reverse_nodes: Vec<usize> = (0..changes.len())
            .filter(|&i| changes[i].change_type().is_reverse())
            .collect();
        let reverse_edges: Vec<Vec<usize>> = changes
            .iter()
            .map(|c| indices(&index, c.reverse_dependencies()))
            .collect();

        for (nodes, edges) in [(&forward_nodes, &forward_edges), (&reverse_nodes, &reverse_edges)] {
            if let Some(cycle) = order::find_cycle(nodes, edges) {
                return Err(PlanError::CircularDependency {
                    cycle: cycle
                        .into_iter()
                        .map(|i| changes[i].display_name().to_string())
                        .collect(),
                }
                .into());
            }
        }

        let diff = Self {
            forward_layers: order::layers(&forward_nodes, &forward_edges),
            reverse_layers: order::layers(&reverse_nodes, &reverse_edges),
            changes,
            index,
        };
        info!("Plan: {}", diff.counts());
        Ok(diff)
    }

    /// Every change in declaration order, including unchanged resources.
    #[must_use]
    pub fn changes(&self) -> &[Arc<Change>] {
        &self.changes
    }

    /// Looks up the change for an identity.
    #[must_use]
    pub fn get(&self, id: &ResourceId) -> Option<&Arc<Change>> {
        self.index.get(id).map(|&i| &self.changes[i])
    }

    /// Creates, updates and replacements grouped into dependency layers.
    pub fn forward_layers(&self) -> impl Iterator<Item = Vec<&Arc<Change>>> {
        self.forward_layers
            .iter()
            .map(|layer| layer.iter().map(|&i| &self.changes[i]).collect())
    }

    /// Deletes and replacements grouped into reverse dependency layers.
    pub fn reverse_layers(&self) -> impl Iterator<Item = Vec<&Arc<Change>>> {
        self.reverse_layers
            .iter()
            .map(|layer| layer.iter().map(|&i| &self.changes[i]).collect())
    }

    /// Returns true if any change is not a keep.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.changes
            .iter()
            .any(|c| c.change_type() != ChangeType::Keep)
    }

    /// Number of changes per classification.
    #[must_use]
    pub fn counts(&self) -> ChangeCounts {
        let mut counts = ChangeCounts::default();
        for change in &self.changes {
            match change.change_type() {
                ChangeType::Create => counts.create += 1,
                ChangeType::Update => counts.update += 1,
                ChangeType::Replace => counts.replace += 1,
                ChangeType::Delete => counts.delete += 1,
                ChangeType::Keep => counts.keep += 1,
            }
        }
        counts
    }

    /// Plan entries: creates, updates and replacements in dependency order,
    /// then deletes in reverse dependency order. Keeps are omitted.
    #[must_use]
    pub fn entries(&self) -> Vec<PlanEntry> {
        let forward = self.forward_layers().flatten();
        let deletes = self
            .reverse_layers()
            .flatten()
            .filter(|c| c.change_type() == ChangeType::Delete);

        forward
            .chain(deletes)
            .map(|change| PlanEntry {
                action: change.change_type(),
                resource: change.display_name().to_string(),
                summary: matches!(change.change_type(), ChangeType::Update | ChangeType::Replace)
                    .then(|| change.field_diff().summary()),
            })
            .collect()
    }

    /// Renders the plan, one line per entry.
    #[must_use]
    pub fn render_plan(&self) -> String {
        self.entries()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Field diffs of every identity present on both sides, comparing pending
/// values with the references `known` can satisfy resolved.
fn field_diffs(
    registry: &SchemaRegistry,
    current: &ResourceGraph,
    pending: &ResourceGraph,
    known: &ResourceGraph,
    id_fields: &BTreeMap<String, String>,
) -> Result<HashMap<ResourceId, FieldDiff>> {
    let mut diffs = HashMap::new();
    for new in pending {
        let Some(old) = current.get(&new.id) else {
            continue;
        };
        let comparable = resolve_known(new, known, id_fields);
        let diff = FieldDiff::compute(
            registry,
            &new.id.type_name,
            &new.id.to_string(),
            &old.fields,
            &comparable.fields,
        )?;
        diffs.insert(new.id.clone(), diff);
    }
    Ok(diffs)
}

fn indices(index: &HashMap<ResourceId, usize>, ids: &[ResourceId]) -> Vec<usize> {
    let mut found: Vec<usize> = ids.iter().filter_map(|id| index.get(id).copied()).collect();
    found.sort_unstable();
    found
}
