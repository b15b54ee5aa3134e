//! Realized state: current state plus the outputs of changes applied in
//! this run. References are resolved against it just before each
//! provider call.

use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::error::ExecutionError;
use crate::resource::{Reference, Resource, ResourceGraph, ResourceId, Value};

/// Looks up the value a reference points at in `graph`.
///
/// A reference without a field resolves to the target's id field when its
/// type declares one. Returns `None` if the target or the field is missing.
#[must_use]
pub fn lookup(
    graph: &ResourceGraph,
    id_fields: &BTreeMap<String, String>,
    reference: &Reference,
) -> Option<Value> {
    let target = graph.get(&reference.target)?;
    let field = reference
        .field
        .as_ref()
        .or_else(|| id_fields.get(&reference.target.type_name))?;
    target.field(field).filter(|v| !v.is_null()).cloned()
}

/// Resolves the references of `resource` that `graph` can satisfy, leaving
/// the others in place.
#[must_use]
pub fn resolve_known(
    resource: &Resource,
    graph: &ResourceGraph,
    id_fields: &BTreeMap<String, String>,
) -> Resource {
    let mut resolved = resource.clone();
    for value in resolved.fields.values_mut() {
        *value = value.resolve_with(&mut |r| lookup(graph, id_fields, r));
    }
    resolved
}

/// Shared, updatable view of the realized state during execution.
#[derive(Debug)]
pub struct RealizedState {
    graph: RwLock<ResourceGraph>,
    id_fields: BTreeMap<String, String>,
}

impl RealizedState {
    /// Seeds the realized state from the current state.
    #[must_use]
    pub fn new(current: ResourceGraph, id_fields: BTreeMap<String, String>) -> Self {
        Self {
            graph: RwLock::new(current),
            id_fields,
        }
    }

    /// Resolves every reference of `resource`.
    ///
    /// # Errors
    ///
    /// Returns an error naming `change` if a reference cannot be resolved.
    pub async fn resolve(&self, resource: &Resource, change: &str) -> Result<Resource, ExecutionError> {
        let graph = self.graph.read().await;
        let mut resolved = resource.clone();
        for value in resolved.fields.values_mut() {
            *value = value.try_resolve(&mut |r| {
                let whole_resource = r.field.is_none() && !self.id_fields.contains_key(&r.target.type_name);
                if r.target == resource.id || (whole_resource && graph.contains(&r.target)) {
                    return Ok(None);
                }
                lookup(&graph, &self.id_fields, r).map(Some).ok_or_else(|| {
                    ExecutionError::UnresolvedReference {
                        change: change.to_string(),
                        reference: r.to_string(),
                    }
                })
            })?;
        }
        Ok(resolved)
    }

    /// Records an applied resource.
    pub async fn record(&self, resource: Resource) {
        self.graph.write().await.upsert(resource);
    }

    /// Forgets a deleted resource.
    pub async fn forget(&self, id: &ResourceId) {
        self.graph.write().await.remove(id);
    }

    /// Returns a copy of the realized graph.
    pub async fn snapshot(&self) -> ResourceGraph {
        self.graph.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id_fields() -> BTreeMap<String, String> {
        BTreeMap::from([(String::from("net::vpc"), String::from("id"))])
    }

    fn subnet() -> Resource {
        Resource::new("net::subnet", "a")
            .with_field("vpc", Reference::to_resource(ResourceId::new("net::vpc", "main")))
            .with_field(
                "cidr",
                Reference::to_field(ResourceId::new("net::vpc", "main"), "cidr"),
            )
    }

    #[tokio::test]
    async fn test_resolve_against_recorded_outputs() {
        let realized = RealizedState::new(ResourceGraph::new(), id_fields());
        realized
            .record(
                Resource::new("net::vpc", "main")
                    .with_field("id", "vpc-9")
                    .with_field("cidr", "10.0.0.0/16"),
            )
            .await;

        let resolved = realized.resolve(&subnet(), "net::subnet a").await.expect("resolve failed");
        assert_eq!(resolved.field("vpc"), Some(&Value::from("vpc-9")));
        assert_eq!(resolved.field("cidr"), Some(&Value::from("10.0.0.0/16")));
    }

    #[tokio::test]
    async fn test_unresolved_reference_is_an_error() {
        let realized = RealizedState::new(ResourceGraph::new(), id_fields());
        let err = realized.resolve(&subnet(), "net::subnet a").await.unwrap_err();
        assert!(matches!(err, ExecutionError::UnresolvedReference { .. }));
    }

    #[test]
    fn test_resolve_known_leaves_unknown_references() {
        let resolved = resolve_known(&subnet(), &ResourceGraph::new(), &id_fields());
        assert_eq!(resolved, subnet());
    }
}
