//! The transition unit for one resource identity.
//!
//! Classification is a pure function of which sides are present and of
//! the field diff. Execution is a separate, guarded step: each half of a
//! change (apply, retire) calls its provider operation at most once, and
//! only after the executor has marked the change executable.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

use crate::error::{ExecutionError, Result};
use crate::provider::{ModificationHooks, OperationError, ResourceOperations};
use crate::resource::{Resource, ResourceId};
use crate::schema::ReplacementOrder;

use super::field_diff::FieldDiff;
use super::realized::RealizedState;

/// Classification of a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// Resource is new.
    Create,
    /// Updatable fields differ.
    Update,
    /// A non-updatable field differs.
    Replace,
    /// Resource is no longer declared.
    Delete,
    /// Nothing differs.
    Keep,
}

impl ChangeType {
    /// Classifies a change.
    ///
    /// Total over its inputs: a missing pending side is always a delete, and
    /// any non-updatable difference makes the whole change a replacement.
    #[must_use]
    pub fn classify(current_present: bool, pending_present: bool, diff: &FieldDiff) -> Self {
        if !pending_present {
            Self::Delete
        } else if !current_present {
            Self::Create
        } else if diff.requires_replace() {
            Self::Replace
        } else if !diff.is_empty() {
            Self::Update
        } else {
            Self::Keep
        }
    }

    /// Returns true for classifications applied in dependency order.
    #[must_use]
    pub const fn is_forward(self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Replace)
    }

    /// Returns true for classifications that remove a resource.
    #[must_use]
    pub const fn is_reverse(self) -> bool {
        matches!(self, Self::Delete | Self::Replace)
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "Create"),
            Self::Update => write!(f, "Update"),
            Self::Replace => write!(f, "Replace"),
            Self::Delete => write!(f, "Delete"),
            Self::Keep => write!(f, "Keep"),
        }
    }
}

/// One half of a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Create or update the pending resource.
    Apply,
    /// Delete the current resource.
    Retire,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Apply => write!(f, "apply"),
            Self::Retire => write!(f, "retire"),
        }
    }
}

/// The computed transition for one resource identity.
pub struct Change {
    id: ResourceId,
    display_name: String,
    current: Option<Resource>,
    pending: Option<Resource>,
    change_type: ChangeType,
    field_diff: FieldDiff,
    dependencies: Vec<ResourceId>,
    dependents: Vec<ResourceId>,
    replacement: ReplacementOrder,
    operations: Arc<dyn ResourceOperations>,
    hooks: Vec<Arc<dyn ModificationHooks>>,
    executable: AtomicBool,
    applied: AtomicBool,
    retired: AtomicBool,
}

impl Change {
    /// Builds and classifies a change.
    ///
    /// `dependencies` are the identities the pending resource references;
    /// `dependents` are the identities referencing the current resource.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: ResourceId,
        current: Option<Resource>,
        pending: Option<Resource>,
        field_diff: FieldDiff,
        dependencies: Vec<ResourceId>,
        dependents: Vec<ResourceId>,
        replacement: ReplacementOrder,
        operations: Arc<dyn ResourceOperations>,
    ) -> Self {
        let change_type = ChangeType::classify(current.is_some(), pending.is_some(), &field_diff);
        let display_name = pending
            .as_ref()
            .or(current.as_ref())
            .map_or_else(|| id.to_string(), |r| operations.display_name(r));
        Self {
            id,
            display_name,
            current,
            pending,
            change_type,
            field_diff,
            dependencies,
            dependents,
            replacement,
            operations,
            hooks: Vec::new(),
            executable: AtomicBool::new(false),
            applied: AtomicBool::new(false),
            retired: AtomicBool::new(false),
        }
    }

    /// Sets the lifecycle hooks run around each provider call.
    #[must_use]
    pub fn with_hooks(mut self, hooks: Vec<Arc<dyn ModificationHooks>>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Resource identity.
    #[must_use]
    pub const fn id(&self) -> &ResourceId {
        &self.id
    }

    /// Name shown in plans and reports.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Classification.
    #[must_use]
    pub const fn change_type(&self) -> ChangeType {
        self.change_type
    }

    /// Field-level differences.
    #[must_use]
    pub const fn field_diff(&self) -> &FieldDiff {
        &self.field_diff
    }

    /// Current side, if deployed.
    #[must_use]
    pub const fn current(&self) -> Option<&Resource> {
        self.current.as_ref()
    }

    /// Pending side, if declared.
    #[must_use]
    pub const fn pending(&self) -> Option<&Resource> {
        self.pending.as_ref()
    }

    /// Replacement order of the resource's type.
    #[must_use]
    pub const fn replacement(&self) -> ReplacementOrder {
        self.replacement
    }

    /// Identities this change must wait for.
    ///
    /// A delete waits for the resources that reference it; everything else
    /// waits for the resources it references.
    #[must_use]
    pub fn dependencies(&self) -> &[ResourceId] {
        match self.change_type {
            ChangeType::Delete => &self.dependents,
            _ => &self.dependencies,
        }
    }

    /// Identities referenced by the pending resource.
    #[must_use]
    pub fn forward_dependencies(&self) -> &[ResourceId] {
        &self.dependencies
    }

    /// Identities referencing the current resource.
    #[must_use]
    pub fn reverse_dependencies(&self) -> &[ResourceId] {
        &self.dependents
    }

    /// Steps run while applying in dependency order.
    ///
    /// A replacement whose type deletes first runs both halves here.
    #[must_use]
    pub fn forward_steps(&self) -> &'static [Step] {
        match (self.change_type, self.replacement) {
            (ChangeType::Create | ChangeType::Update, _)
            | (ChangeType::Replace, ReplacementOrder::CreateBeforeDelete) => &[Step::Apply],
            (ChangeType::Replace, ReplacementOrder::DeleteBeforeCreate) => &[Step::Retire, Step::Apply],
            _ => &[],
        }
    }

    /// Steps run while tearing down in reverse dependency order.
    #[must_use]
    pub fn reverse_steps(&self) -> &'static [Step] {
        match (self.change_type, self.replacement) {
            (ChangeType::Delete, _) | (ChangeType::Replace, ReplacementOrder::CreateBeforeDelete) => {
                &[Step::Retire]
            }
            _ => &[],
        }
    }

    /// Every step of the change, in replacement order.
    #[must_use]
    pub fn steps(&self) -> Vec<Step> {
        let mut steps = self.forward_steps().to_vec();
        steps.extend_from_slice(self.reverse_steps());
        steps
    }

    /// Marks the change ready to run. Set by the executor once its
    /// dependencies completed.
    pub fn set_executable(&self, executable: bool) {
        self.executable.store(executable, Ordering::SeqCst);
    }

    /// Returns true if the change may run.
    #[must_use]
    pub fn is_executable(&self) -> bool {
        self.executable.load(Ordering::SeqCst)
    }

    /// Returns true once the step has been started.
    #[must_use]
    pub fn has_run(&self, step: Step) -> bool {
        self.guard(step).load(Ordering::SeqCst)
    }

    const fn guard(&self, step: Step) -> &AtomicBool {
        match step {
            Step::Apply => &self.applied,
            Step::Retire => &self.retired,
        }
    }

    /// Runs one step of the change.
    ///
    /// Returns the applied resource for [`Step::Apply`], and `None` for
    /// [`Step::Retire`] or when the step already ran. Applied resources
    /// are recorded in `realized`; deleted ones are forgotten.
    ///
    /// # Errors
    ///
    /// Returns an error if the change is not executable, the step does not
    /// apply to the classification, a reference cannot be resolved, or the
    /// provider operation fails.
    pub async fn execute(&self, step: Step, realized: &RealizedState) -> Result<Option<Resource>> {
        if !self.is_executable() {
            return Err(ExecutionError::NotExecutable {
                change: self.display_name.clone(),
            }
            .into());
        }
        if !self.steps().contains(&step) {
            return Err(ExecutionError::InvalidStep {
                change: self.display_name.clone(),
                step: step.to_string(),
                change_type: self.change_type.to_string(),
            }
            .into());
        }
        if self.guard(step).swap(true, Ordering::SeqCst) {
            debug!("{} {} already ran", step, self.display_name);
            return Ok(None);
        }

        match step {
            Step::Apply => self.apply(realized).await.map(Some),
            Step::Retire => self.retire(realized).await.map(|()| None),
        }
    }

    /// Runs every step of the change in order.
    ///
    /// # Errors
    ///
    /// Returns the first step error.
    pub async fn execute_all(&self, realized: &RealizedState) -> Result<()> {
        for step in self.steps() {
            self.execute(step, realized).await?;
        }
        Ok(())
    }

    async fn apply(&self, realized: &RealizedState) -> Result<Resource> {
        let Some(pending) = &self.pending else {
            return Err(self.invalid(Step::Apply));
        };
        let resolved = realized.resolve(pending, &self.display_name).await?;

        let outcome = match (&self.current, self.change_type) {
            (Some(current), ChangeType::Update) => {
                let changed = self.field_diff.changed_fields();
                for hook in &self.hooks {
                    hook.before_update(current, &resolved, &changed)
                        .await
                        .map_err(|e| self.hook_failed("before update", &e))?;
                }
                info!("Updating {} ({})", self.display_name, self.field_diff.summary());
                let updated = self
                    .operations
                    .update(current, &resolved, &changed)
                    .await
                    .map_err(|e| self.failed("update", &e.to_string()))?;
                for hook in &self.hooks {
                    hook.after_update(current, &updated, &changed)
                        .await
                        .map_err(|e| self.hook_failed("after update", &e))?;
                }
                updated
            }
            _ => {
                for hook in &self.hooks {
                    hook.before_create(&resolved)
                        .await
                        .map_err(|e| self.hook_failed("before create", &e))?;
                }
                info!("Creating {}", self.display_name);
                let created = self
                    .operations
                    .create(&resolved)
                    .await
                    .map_err(|e| self.failed("create", &e.to_string()))?;
                for hook in &self.hooks {
                    hook.after_create(&created)
                        .await
                        .map_err(|e| self.hook_failed("after create", &e))?;
                }
                created
            }
        };

        let mut applied = outcome.with_dependencies(pending.references());
        applied.source.clone_from(&pending.source);
        realized.record(applied.clone()).await;
        Ok(applied)
    }

    async fn retire(&self, realized: &RealizedState) -> Result<()> {
        let Some(current) = &self.current else {
            return Err(self.invalid(Step::Retire));
        };
        for hook in &self.hooks {
            hook.before_delete(current)
                .await
                .map_err(|e| self.hook_failed("before delete", &e))?;
        }
        info!("Deleting {}", self.display_name);
        self.operations
            .delete(current)
            .await
            .map_err(|e| self.failed("delete", &e.to_string()))?;

        // A create-first replacement has already recorded its successor under
        // the same identity. Otherwise the resource is gone until, for a
        // delete-first replacement, the apply step records it again.
        let succeeded_already = self.change_type == ChangeType::Replace
            && self.replacement == ReplacementOrder::CreateBeforeDelete;
        if !succeeded_already {
            realized.forget(&self.id).await;
        }

        for hook in &self.hooks {
            hook.after_delete(current)
                .await
                .map_err(|e| self.hook_failed("after delete", &e))?;
        }
        Ok(())
    }

    fn invalid(&self, step: Step) -> crate::error::ConvergeError {
        ExecutionError::InvalidStep {
            change: self.display_name.clone(),
            step: step.to_string(),
            change_type: self.change_type.to_string(),
        }
        .into()
    }

    fn hook_failed(&self, hook: &str, error: &OperationError) -> crate::error::ConvergeError {
        self.failed(&format!("{hook} hook of"), error.message())
    }

    fn failed(&self, step: &str, message: &str) -> crate::error::ConvergeError {
        ExecutionError::OperationFailed {
            change: self.display_name.clone(),
            step: step.to_string(),
            message: message.to_string(),
        }
        .into()
    }
}

impl fmt::Debug for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Change")
            .field("id", &self.id)
            .field("change_type", &self.change_type)
            .field("field_diff", &self.field_diff)
            .field("dependencies", &self.dependencies)
            .field("dependents", &self.dependents)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.change_type {
            ChangeType::Update | ChangeType::Replace => write!(
                f,
                "{} {} ({})",
                self.change_type,
                self.display_name,
                self.field_diff.summary()
            ),
            other => write!(f, "{other} {}", self.display_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::field_diff::FieldChange;
    use crate::provider::{MockResourceOperations, OperationResult};
    use crate::resource::ResourceGraph;
    use async_trait::async_trait;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHooks {
        events: Mutex<Vec<String>>,
        veto: Option<&'static str>,
    }

    impl RecordingHooks {
        fn vetoing(hook: &'static str) -> Self {
            Self {
                veto: Some(hook),
                ..Self::default()
            }
        }

        fn log(&self, hook: &str, resource: &Resource) -> OperationResult<()> {
            self.events
                .lock()
                .expect("hook events")
                .push(format!("{hook} {}", resource.id.name));
            if self.veto == Some(hook) {
                return Err(OperationError::new("vetoed"));
            }
            Ok(())
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().expect("hook events").clone()
        }
    }

    #[async_trait]
    impl ModificationHooks for RecordingHooks {
        async fn before_create(&self, pending: &Resource) -> OperationResult<()> {
            self.log("before create", pending)
        }

        async fn after_create(&self, created: &Resource) -> OperationResult<()> {
            self.log("after create", created)
        }

        async fn before_update(
            &self,
            current: &Resource,
            _pending: &Resource,
            changed: &BTreeSet<String>,
        ) -> OperationResult<()> {
            let fields: Vec<&str> = changed.iter().map(String::as_str).collect();
            self.log(&format!("before update [{}]", fields.join(",")), current)
        }

        async fn after_update(
            &self,
            _current: &Resource,
            updated: &Resource,
            _changed: &BTreeSet<String>,
        ) -> OperationResult<()> {
            self.log("after update", updated)
        }

        async fn before_delete(&self, current: &Resource) -> OperationResult<()> {
            self.log("before delete", current)
        }

        async fn after_delete(&self, current: &Resource) -> OperationResult<()> {
            self.log("after delete", current)
        }
    }

    fn hooked(change: Change, hooks: &Arc<RecordingHooks>) -> Change {
        let hook: Arc<dyn ModificationHooks> = hooks.clone();
        change.with_hooks(vec![hook])
    }

    fn field_change(field: &str, updatable: bool) -> FieldChange {
        FieldChange {
            field: field.to_string(),
            updatable,
            summary: format!("{field}: a -> b"),
        }
    }

    fn diff_of(changes: Vec<FieldChange>) -> FieldDiff {
        FieldDiff::from_changes(changes)
    }

    fn realized() -> RealizedState {
        RealizedState::new(ResourceGraph::new(), BTreeMap::new())
    }

    fn change(
        current: Option<Resource>,
        pending: Option<Resource>,
        diff: FieldDiff,
        ops: MockResourceOperations,
    ) -> Change {
        Change::new(
            ResourceId::new("app::server", "web"),
            current,
            pending,
            diff,
            Vec::new(),
            Vec::new(),
            ReplacementOrder::CreateBeforeDelete,
            Arc::new(ops),
        )
    }

    fn mock() -> MockResourceOperations {
        let mut ops = MockResourceOperations::new();
        ops.expect_display_name().returning(|r| r.id.to_string());
        ops
    }

    #[test]
    fn test_classification_is_total() {
        let empty = FieldDiff::empty();
        let updatable = diff_of(vec![field_change("image", true)]);
        let mixed = diff_of(vec![field_change("image", true), field_change("zone", false)]);

        assert_eq!(ChangeType::classify(false, true, &empty), ChangeType::Create);
        assert_eq!(ChangeType::classify(true, false, &empty), ChangeType::Delete);
        assert_eq!(ChangeType::classify(false, false, &empty), ChangeType::Delete);
        assert_eq!(ChangeType::classify(true, true, &empty), ChangeType::Keep);
        assert_eq!(ChangeType::classify(true, true, &updatable), ChangeType::Update);
        assert_eq!(ChangeType::classify(true, true, &mixed), ChangeType::Replace);
    }

    #[test]
    fn test_update_changed_set_is_exactly_differing_fields() {
        let diff = diff_of(vec![field_change("image", true)]);
        assert_eq!(
            diff.changed_fields().into_iter().collect::<Vec<_>>(),
            vec![String::from("image")]
        );
    }

    #[tokio::test]
    async fn test_repeated_execute_calls_provider_once() {
        let mut ops = mock();
        ops.expect_create()
            .times(1)
            .returning(|r| Ok(r.clone()));

        let change = change(
            None,
            Some(Resource::new("app::server", "web")),
            FieldDiff::empty(),
            ops,
        );
        change.set_executable(true);
        let realized = realized();

        let first = change.execute(Step::Apply, &realized).await.expect("first execute");
        assert!(first.is_some());
        let second = change.execute(Step::Apply, &realized).await.expect("second execute");
        assert!(second.is_none());
        change.execute_all(&realized).await.expect("execute all");
    }

    #[tokio::test]
    async fn test_concurrent_execute_calls_provider_once() {
        let mut ops = mock();
        ops.expect_delete().times(1).returning(|_| Ok(()));

        let change = Arc::new(change(
            Some(Resource::new("app::server", "web")),
            None,
            FieldDiff::empty(),
            ops,
        ));
        change.set_executable(true);
        let realized = Arc::new(realized());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let change = Arc::clone(&change);
            let realized = Arc::clone(&realized);
            handles.push(tokio::spawn(async move {
                change.execute(Step::Retire, &realized).await
            }));
        }
        for handle in handles {
            handle.await.expect("join failed").expect("execute failed");
        }
    }

    #[tokio::test]
    async fn test_not_executable_until_marked() {
        let mut ops = mock();
        ops.expect_create().never();

        let change = change(None, Some(Resource::new("app::server", "web")), FieldDiff::empty(), ops);
        let err = change.execute(Step::Apply, &realized()).await.unwrap_err();
        assert!(err.to_string().contains("not executable"));
    }

    #[tokio::test]
    async fn test_update_passes_changed_fields() {
        let mut ops = mock();
        ops.expect_update()
            .withf(|_, _, changed| changed.len() == 1 && changed.contains("image"))
            .times(1)
            .returning(|_, pending, _| Ok(pending.clone()));

        let change = change(
            Some(Resource::new("app::server", "web").with_field("image", "a")),
            Some(Resource::new("app::server", "web").with_field("image", "b")),
            diff_of(vec![field_change("image", true)]),
            ops,
        );
        assert_eq!(change.change_type(), ChangeType::Update);
        change.set_executable(true);
        change.execute(Step::Apply, &realized()).await.expect("update failed");
    }

    #[tokio::test]
    async fn test_provider_failure_is_attributed_to_change() {
        let mut ops = mock();
        ops.expect_create()
            .returning(|_| Err(crate::provider::OperationError::new("quota exceeded")));

        let change = change(None, Some(Resource::new("app::server", "web")), FieldDiff::empty(), ops);
        change.set_executable(true);
        let err = change.execute(Step::Apply, &realized()).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Execution error: create app::server web failed: quota exceeded"
        );
    }

    #[tokio::test]
    async fn test_replace_steps_follow_replacement_order() {
        let diff = diff_of(vec![field_change("zone", false)]);
        let current = Some(Resource::new("app::server", "web").with_field("zone", "a"));
        let pending = Some(Resource::new("app::server", "web").with_field("zone", "b"));

        let create_first = change(current.clone(), pending.clone(), diff.clone(), mock());
        assert_eq!(create_first.steps(), vec![Step::Apply, Step::Retire]);

        let delete_first = Change::new(
            ResourceId::new("app::server", "web"),
            current,
            pending,
            diff,
            Vec::new(),
            Vec::new(),
            ReplacementOrder::DeleteBeforeCreate,
            Arc::new(mock()),
        );
        assert_eq!(delete_first.steps(), vec![Step::Retire, Step::Apply]);
        assert!(delete_first.reverse_steps().is_empty());
    }

    #[test]
    fn test_plan_line() {
        let change = change(
            Some(Resource::new("app::server", "web")),
            Some(Resource::new("app::server", "web")),
            diff_of(vec![field_change("image", true)]),
            mock(),
        );
        assert_eq!(change.to_string(), "Update app::server web (image: a -> b)");
    }

    #[tokio::test]
    async fn test_hooks_run_around_create_and_delete() {
        let hooks = Arc::new(RecordingHooks::default());

        let mut ops = mock();
        ops.expect_create().times(1).returning(|r| Ok(r.clone()));
        let create = hooked(
            change(None, Some(Resource::new("app::server", "web")), FieldDiff::empty(), ops),
            &hooks,
        );
        create.set_executable(true);
        create.execute(Step::Apply, &realized()).await.expect("create failed");

        let mut ops = mock();
        ops.expect_delete().times(1).returning(|_| Ok(()));
        let delete = hooked(
            change(Some(Resource::new("app::server", "web")), None, FieldDiff::empty(), ops),
            &hooks,
        );
        delete.set_executable(true);
        delete.execute(Step::Retire, &realized()).await.expect("delete failed");

        assert_eq!(
            hooks.events(),
            vec!["before create web", "after create web", "before delete web", "after delete web"]
        );
    }

    #[tokio::test]
    async fn test_update_hooks_see_changed_fields() {
        let hooks = Arc::new(RecordingHooks::default());
        let mut ops = mock();
        ops.expect_update()
            .times(1)
            .returning(|_, pending, _| Ok(pending.clone()));

        let update = hooked(
            change(
                Some(Resource::new("app::server", "web").with_field("image", "a")),
                Some(Resource::new("app::server", "web").with_field("image", "b")),
                diff_of(vec![field_change("image", true)]),
                ops,
            ),
            &hooks,
        );
        update.set_executable(true);
        update.execute(Step::Apply, &realized()).await.expect("update failed");

        assert_eq!(hooks.events(), vec!["before update [image] web", "after update web"]);
    }

    #[tokio::test]
    async fn test_failing_before_hook_prevents_provider_call() {
        let hooks = Arc::new(RecordingHooks::vetoing("before create"));
        let mut ops = mock();
        ops.expect_create().never();

        let create = hooked(
            change(None, Some(Resource::new("app::server", "web")), FieldDiff::empty(), ops),
            &hooks,
        );
        create.set_executable(true);
        let err = create.execute(Step::Apply, &realized()).await.unwrap_err();

        assert_eq!(
            err.to_string(),
            "Execution error: before create hook of app::server web failed: vetoed"
        );
        assert_eq!(hooks.events(), vec!["before create web"]);
    }
}
