//! Resources, identities and the resource graph.
//!
//! A graph keeps resources in declaration order. Dependency edges are not
//! stored; they are derived on demand from the references inside each
//! resource's fields.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use crate::error::GraphError;

use super::value::Value;

/// Identity of a resource: its type plus its instance name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    /// Registered resource type name.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Instance name, unique within the type.
    pub name: String,
}

impl ResourceId {
    /// Creates a new identity.
    #[must_use]
    pub fn new(type_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.type_name, self.name)
    }
}

/// An immutable resource snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Identity.
    pub id: ResourceId,
    /// Field values keyed by field name.
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    /// File the resource was declared in, used for scope filtering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Dependencies recorded when the resource was applied.
    ///
    /// Applied resources hold resolved values, so the references that
    /// produced them are kept here to preserve teardown order.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub depends_on: BTreeSet<ResourceId>,
}

impl Resource {
    /// Creates a resource with no fields.
    #[must_use]
    pub fn new(type_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: ResourceId::new(type_name, name),
            fields: BTreeMap::new(),
            source: None,
            depends_on: BTreeSet::new(),
        }
    }

    /// Returns the resource with `field` set to `value`.
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Returns the resource without `field`.
    #[must_use]
    pub fn without_field(mut self, field: &str) -> Self {
        self.fields.remove(field);
        self
    }

    /// Returns the resource tagged with its declaring file.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Returns the resource with recorded dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, depends_on: BTreeSet<ResourceId>) -> Self {
        self.depends_on = depends_on;
        self
    }

    /// Looks up a field value.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Identities this resource depends on, excluding itself.
    ///
    /// Combines references found in field values with recorded dependencies.
    #[must_use]
    pub fn references(&self) -> BTreeSet<ResourceId> {
        let mut out = self.depends_on.clone();
        for value in self.fields.values() {
            value.collect_references(&mut out);
        }
        out.remove(&self.id);
        out
    }
}

/// Restricts a graph to resources declared in a set of files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeFilter {
    paths: BTreeSet<String>,
}

impl ScopeFilter {
    /// A filter that admits every resource.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            paths: BTreeSet::new(),
        }
    }

    /// A filter admitting resources declared in (or below) the given paths.
    #[must_use]
    pub fn files<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths
                .into_iter()
                .map(|p| p.into().trim_end_matches('/').to_string())
                .collect(),
        }
    }

    /// Returns true if the filter admits everything.
    #[must_use]
    pub fn is_all(&self) -> bool {
        self.paths.is_empty()
    }

    /// Returns true if the resource is in scope.
    #[must_use]
    pub fn matches(&self, resource: &Resource) -> bool {
        if self.is_all() {
            return true;
        }
        resource.source.as_deref().is_some_and(|source| {
            self.paths.iter().any(|path| {
                source == path
                    || source
                        .strip_prefix(path.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            })
        })
    }
}

/// Resources keyed by identity, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    resources: Vec<Resource>,
    index: HashMap<ResourceId, usize>,
}

impl ResourceGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a graph from resources in declaration order.
    ///
    /// # Errors
    ///
    /// Returns an error if two resources share an identity.
    pub fn from_resources(resources: impl IntoIterator<Item = Resource>) -> Result<Self, GraphError> {
        let mut graph = Self::new();
        for resource in resources {
            graph.insert(resource)?;
        }
        Ok(graph)
    }

    /// Appends a resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity is already present.
    pub fn insert(&mut self, resource: Resource) -> Result<(), GraphError> {
        if self.index.contains_key(&resource.id) {
            return Err(GraphError::DuplicateResource {
                resource: resource.id.to_string(),
            });
        }
        self.index.insert(resource.id.clone(), self.resources.len());
        self.resources.push(resource);
        Ok(())
    }

    /// Replaces a resource in place, or appends it if absent.
    pub fn upsert(&mut self, resource: Resource) {
        if let Some(&position) = self.index.get(&resource.id) {
            self.resources[position] = resource;
        } else {
            self.index.insert(resource.id.clone(), self.resources.len());
            self.resources.push(resource);
        }
    }

    /// Removes a resource, keeping the order of the others.
    pub fn remove(&mut self, id: &ResourceId) -> Option<Resource> {
        let position = self.index.remove(id)?;
        let removed = self.resources.remove(position);
        for slot in self.index.values_mut() {
            if *slot > position {
                *slot -= 1;
            }
        }
        Some(removed)
    }

    /// Looks up a resource.
    #[must_use]
    pub fn get(&self, id: &ResourceId) -> Option<&Resource> {
        self.index.get(id).map(|&i| &self.resources[i])
    }

    /// Returns true if the identity is present.
    #[must_use]
    pub fn contains(&self, id: &ResourceId) -> bool {
        self.index.contains_key(id)
    }

    /// Declaration position of a resource.
    #[must_use]
    pub fn position(&self, id: &ResourceId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Number of resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true if the graph has no resources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Iterates resources in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter()
    }

    /// Identities this resource references (its dependencies), in identity order.
    ///
    /// Unknown identities yield nothing.
    #[must_use]
    pub fn dependencies_of(&self, id: &ResourceId) -> Vec<ResourceId> {
        self.get(id)
            .map(|r| r.references().into_iter().collect())
            .unwrap_or_default()
    }

    /// Resources that reference this identity (its dependents), in declaration order.
    #[must_use]
    pub fn dependents_of(&self, id: &ResourceId) -> Vec<ResourceId> {
        self.resources
            .iter()
            .filter(|r| &r.id != id && r.references().contains(id))
            .map(|r| r.id.clone())
            .collect()
    }

    /// Checks that every reference points at a resource in this graph.
    ///
    /// # Errors
    ///
    /// Returns the first dangling reference found, in declaration order.
    pub fn check_references(&self) -> Result<(), GraphError> {
        for resource in &self.resources {
            if let Some(missing) = resource.references().into_iter().find(|t| !self.contains(t)) {
                return Err(GraphError::DanglingReference {
                    resource: resource.id.to_string(),
                    target: missing.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Returns the sub-graph of resources admitted by `scope`.
    #[must_use]
    pub fn filter(&self, scope: &ScopeFilter) -> Self {
        let mut graph = Self::new();
        for resource in self.resources.iter().filter(|r| scope.matches(r)) {
            graph.upsert(resource.clone());
        }
        graph
    }

    /// Consumes the graph, returning resources in declaration order.
    #[must_use]
    pub fn into_resources(self) -> Vec<Resource> {
        self.resources
    }
}

impl PartialEq for ResourceGraph {
    fn eq(&self, other: &Self) -> bool {
        self.resources == other.resources
    }
}

impl<'a> IntoIterator for &'a ResourceGraph {
    type Item = &'a Resource;
    type IntoIter = std::slice::Iter<'a, Resource>;

    fn into_iter(self) -> Self::IntoIter {
        self.resources.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::value::Reference;

    fn subnet(name: &str, vpc: &str) -> Resource {
        Resource::new("net::subnet", name).with_field(
            "vpc",
            Reference::to_field(ResourceId::new("net::vpc", vpc), "id"),
        )
    }

    #[test]
    fn test_duplicate_identity_rejected() {
        let mut graph = ResourceGraph::new();
        graph.insert(Resource::new("net::vpc", "main")).expect("first insert");
        let err = graph.insert(Resource::new("net::vpc", "main")).unwrap_err();
        assert!(err.to_string().contains("net::vpc main"));
    }

    #[test]
    fn test_dependency_queries() {
        let graph = ResourceGraph::from_resources([
            Resource::new("net::vpc", "main"),
            subnet("a", "main"),
            subnet("b", "main"),
        ])
        .expect("valid graph");

        let vpc = ResourceId::new("net::vpc", "main");
        assert_eq!(
            graph.dependencies_of(&ResourceId::new("net::subnet", "a")),
            vec![vpc.clone()]
        );
        assert_eq!(
            graph.dependents_of(&vpc),
            vec![
                ResourceId::new("net::subnet", "a"),
                ResourceId::new("net::subnet", "b")
            ]
        );
    }

    #[test]
    fn test_dangling_reference_detected() {
        let graph = ResourceGraph::from_resources([subnet("a", "missing")]).expect("valid graph");
        let err = graph.check_references().unwrap_err();
        assert!(matches!(err, GraphError::DanglingReference { .. }));
    }

    #[test]
    fn test_recorded_dependencies_count_as_references() {
        let vpc = ResourceId::new("net::vpc", "main");
        let applied = Resource::new("net::subnet", "a")
            .with_field("vpc", "vpc-123")
            .with_dependencies(BTreeSet::from([vpc.clone()]));
        let graph = ResourceGraph::from_resources([Resource::new("net::vpc", "main"), applied])
            .expect("valid graph");
        assert_eq!(graph.dependents_of(&vpc), vec![ResourceId::new("net::subnet", "a")]);
    }

    #[test]
    fn test_remove_keeps_order() {
        let mut graph = ResourceGraph::from_resources([
            Resource::new("t", "a"),
            Resource::new("t", "b"),
            Resource::new("t", "c"),
        ])
        .expect("valid graph");
        graph.remove(&ResourceId::new("t", "a"));
        assert_eq!(graph.position(&ResourceId::new("t", "c")), Some(1));
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_scope_filter_matches_files_and_directories() {
        let scope = ScopeFilter::files(["network/", "db.yaml"]);
        assert!(scope.matches(&Resource::new("t", "a").with_source("network/vpc.yaml")));
        assert!(scope.matches(&Resource::new("t", "b").with_source("db.yaml")));
        assert!(!scope.matches(&Resource::new("t", "c").with_source("networking.yaml")));
        assert!(!scope.matches(&Resource::new("t", "d")));
        assert!(ScopeFilter::all().matches(&Resource::new("t", "d")));
    }
}
