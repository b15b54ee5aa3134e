//! Persisted state types.
//!
//! A snapshot records the resources as last applied, with the graph
//! fingerprint and a bounded run history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{GraphError, StateError};
use crate::resource::{Resource, ResourceGraph};

/// Current version of the state format.
pub const STATE_VERSION: &str = "1";

/// Number of history entries kept.
pub const MAX_HISTORY: usize = 100;

/// The persisted state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// State format version.
    pub version: String,
    /// Project name.
    pub project: String,
    /// Environment name.
    pub environment: String,
    /// Fingerprint of the last applied resource graph.
    #[serde(default)]
    pub fingerprint: String,
    /// Resources in declaration order.
    #[serde(default)]
    pub resources: Vec<Resource>,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Recent runs, oldest first.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// One recorded run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Kind of run.
    pub operation: Operation,
    /// Graph fingerprint after the run.
    pub fingerprint: String,
    /// Resources touched.
    pub resources: Vec<String>,
    /// Whether every change succeeded.
    pub success: bool,
    /// First error, if any.
    #[serde(default)]
    pub error: Option<String>,
}

/// Kinds of run recorded in history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Plan applied.
    Apply,
    /// Everything in scope deleted.
    Destroy,
    /// State refreshed from providers.
    Refresh,
    /// Workflow finalized.
    Workflow,
}

impl StateSnapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn new(project: &str, environment: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            project: project.to_string(),
            environment: environment.to_string(),
            fingerprint: String::new(),
            resources: Vec::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Rebuilds the resource graph.
    ///
    /// # Errors
    ///
    /// Returns an error if the state format is unknown or two resources
    /// share an identity.
    pub fn graph(&self) -> crate::error::Result<ResourceGraph> {
        if self.version != STATE_VERSION {
            return Err(StateError::VersionMismatch {
                expected: STATE_VERSION.to_string(),
                found: self.version.clone(),
            }
            .into());
        }
        ResourceGraph::from_resources(self.resources.iter().cloned()).map_err(|e| match e {
            GraphError::DuplicateResource { resource } => StateError::Corrupted {
                message: format!("duplicate resource {resource}"),
            }
            .into(),
            other => other.into(),
        })
    }

    /// Replaces the recorded resources.
    pub fn set_graph(&mut self, graph: ResourceGraph, fingerprint: String) {
        self.resources = graph.into_resources();
        self.fingerprint = fingerprint;
        self.last_updated = Utc::now();
    }

    /// Appends a history entry, dropping the oldest beyond [`MAX_HISTORY`].
    pub fn add_history(&mut self, entry: HistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            let excess = self.history.len() + 1 - MAX_HISTORY;
            self.history.drain(..excess);
        }
        self.history.push(entry);
    }
}

impl HistoryEntry {
    /// Creates a history entry.
    #[must_use]
    pub fn new(
        operation: Operation,
        fingerprint: &str,
        resources: Vec<String>,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            fingerprint: fingerprint.to_string(),
            resources,
            success: error.is_none(),
            error,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Self::Apply => "apply",
            Self::Destroy => "destroy",
            Self::Refresh => "refresh",
            Self::Workflow => "workflow",
        };
        write!(f, "{op}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_bounded() {
        let mut state = StateSnapshot::new("demo", "dev");
        for i in 0..(MAX_HISTORY + 5) {
            state.add_history(HistoryEntry::new(Operation::Apply, &i.to_string(), vec![], None));
        }
        assert_eq!(state.history.len(), MAX_HISTORY);
        assert_eq!(state.history[0].fingerprint, "5");
    }

    #[test]
    fn test_graph_round_trip_keeps_order() {
        let mut state = StateSnapshot::new("demo", "dev");
        let graph = ResourceGraph::from_resources([Resource::new("t", "b"), Resource::new("t", "a")])
            .expect("valid graph");
        state.set_graph(graph.clone(), String::from("abc"));

        assert_eq!(state.graph().expect("graph"), graph);
        assert_eq!(state.fingerprint, "abc");
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut state = StateSnapshot::new("demo", "dev");
        state.version = String::from("0");
        assert!(state.graph().is_err());
    }

    #[test]
    fn test_failed_entry() {
        let entry = HistoryEntry::new(Operation::Destroy, "f", vec![], Some(String::from("boom")));
        assert!(!entry.success);
        assert_eq!(entry.operation.to_string(), "destroy");
    }
}
