//! Shared test fixtures.

use async_trait::async_trait;
use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::provider::{OperationError, OperationResult, ResourceOperations};
use crate::resource::{GraphSource, Resource, ResourceGraph, ScopeFilter};
use crate::schema::{DiffableField, ReplacementOrder, ResourceType, SchemaRegistry};
use crate::ui::{INDENT_WIDTH, Ui};

/// Provider that records every call in order and can be told to fail.
#[derive(Debug, Clone, Default)]
pub struct RecordingOperations {
    events: Arc<Mutex<Vec<String>>>,
    failing: BTreeSet<String>,
}

impl RecordingOperations {
    /// Makes every operation on the named resource fail.
    pub fn failing(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    /// Makes one operation, e.g. `create`, on the named resource fail.
    pub fn failing_on(mut self, action: &str, name: &str) -> Self {
        self.failing.insert(format!("{action} {name}"));
        self
    }

    /// Calls seen so far, e.g. `create a`.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    fn log(&self, action: &str, resource: &Resource) -> OperationResult<()> {
        let event = format!("{action} {}", resource.id.name);
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
        if self.failing.contains(&resource.id.name) || self.failing.contains(&event) {
            return Err(OperationError::new(format!("{action} rejected")));
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceOperations for RecordingOperations {
    async fn create(&self, resource: &Resource) -> OperationResult<Resource> {
        self.log("create", resource)?;
        Ok(resource
            .clone()
            .with_field("id", format!("{}-id", resource.id.name)))
    }

    async fn update(
        &self,
        current: &Resource,
        pending: &Resource,
        _changed: &BTreeSet<String>,
    ) -> OperationResult<Resource> {
        self.log("update", pending)?;
        let mut updated = pending.clone();
        if let Some(id) = current.field("id") {
            updated = updated.with_field("id", id.clone());
        }
        Ok(updated)
    }

    async fn delete(&self, resource: &Resource) -> OperationResult<()> {
        self.log("delete", resource)
    }
}

/// Registry with a single type `t`: `id` (id), `size` (updatable),
/// `zone` (replaces), `parent` (updatable reference).
pub fn registry_with(
    operations: Arc<dyn ResourceOperations>,
    replacement: ReplacementOrder,
) -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    let registered = registry.register(
        ResourceType::new("t", operations)
            .replacement(replacement)
            .field(DiffableField::scalar("id").id())
            .field(DiffableField::scalar("size").updatable())
            .field(DiffableField::scalar("zone"))
            .field(DiffableField::reference("parent").updatable()),
    );
    assert!(registered.is_ok(), "fixture registry is valid");
    registry
}

/// A graph source backed by a fixed graph.
#[derive(Debug, Clone, Default)]
pub struct StaticGraphSource {
    graph: ResourceGraph,
}

impl StaticGraphSource {
    /// Wraps a graph.
    #[must_use]
    pub const fn new(graph: ResourceGraph) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl GraphSource for StaticGraphSource {
    async fn resolve(&self, scope: &ScopeFilter) -> Result<ResourceGraph> {
        Ok(self.graph.filter(scope))
    }
}

/// UI that records every line and replays queued answers.
///
/// Questions asked after the queue runs dry are answered no.
#[derive(Debug, Default)]
pub struct RecordingUi {
    lines: Mutex<Vec<String>>,
    answers: Mutex<VecDeque<bool>>,
    depth: AtomicUsize,
}

impl RecordingUi {
    /// Creates a recording UI with no queued answers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues answers for upcoming questions, in order.
    #[must_use]
    pub fn with_answers(self, answers: impl IntoIterator<Item = bool>) -> Self {
        if let Ok(mut queue) = self.answers.lock() {
            queue.extend(answers);
        }
        self
    }

    /// Everything written so far, with indentation.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    fn push(&self, line: &str) {
        let padding = " ".repeat(self.depth.load(Ordering::SeqCst) * INDENT_WIDTH);
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(format!("{padding}{line}"));
        }
    }
}

impl Ui for RecordingUi {
    fn write(&self, line: &str) {
        self.push(line);
    }

    fn render_plan(&self, plan: &str) {
        for line in plan.lines() {
            self.push(line);
        }
    }

    fn confirm(&self, prompt: &str) -> Result<bool> {
        self.push(prompt);
        Ok(self
            .answers
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front())
            .unwrap_or(false))
    }

    fn indent(&self) {
        self.depth.fetch_add(1, Ordering::SeqCst);
    }

    fn unindent(&self) {
        let _ = self
            .depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| Some(d.saturating_sub(1)));
    }
}

mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_source_applies_scope() {
        let graph = ResourceGraph::from_resources([
            Resource::new("t", "a").with_source("a.yaml"),
            Resource::new("t", "b").with_source("b.yaml"),
        ])
        .expect("valid graph");
        let source = StaticGraphSource::new(graph);

        let scoped = source
            .resolve(&ScopeFilter::files(["b.yaml"]))
            .await
            .expect("resolve failed");
        assert_eq!(scoped.len(), 1);
        assert_eq!(source.resolve(&ScopeFilter::all()).await.expect("resolve").len(), 2);
    }

    #[test]
    fn test_recording_ui_indents() {
        let ui = RecordingUi::new();
        ui.write("stage");
        ui.indent();
        ui.write("step");
        ui.unindent();
        ui.unindent();
        ui.write("done");

        assert_eq!(ui.lines(), ["stage", "  step", "done"]);
    }

    #[test]
    fn test_recording_ui_replays_answers() {
        let ui = RecordingUi::new().with_answers([true]);
        assert!(ui.confirm("first?").expect("answer"));
        assert!(!ui.confirm("second?").expect("answer"));
        assert_eq!(ui.lines(), ["first?", "second?"]);
    }
}
