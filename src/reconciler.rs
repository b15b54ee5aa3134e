//! Lock-scoped plan and apply cycles.
//!
//! Every cycle acquires the state lock, loads the last applied state, works
//! against it, persists the realized result with a history entry and
//! releases the lock, whether or not the cycle succeeded.

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::GraphHasher;
use crate::diff::{ChangeCounts, Diff, ExecutionReport, Executor, FieldDiff, Phase, PlanEntry, RealizedState};
use crate::error::Result;
use crate::resource::{GraphSource, ResourceGraph, ScopeFilter};
use crate::schema::SchemaRegistry;
use crate::state::{HistoryEntry, Operation, StateSnapshot, StateStore, generate_holder_id};
use crate::ui::Ui;
use crate::workflow::{Workflow, WorkflowEnv, WorkflowOutcome};

/// Everything a cycle works with, passed explicitly.
pub struct RunContext<'a> {
    /// Project name.
    pub project: &'a str,
    /// Environment name.
    pub environment: &'a str,
    /// Registered resource types.
    pub registry: &'a SchemaRegistry,
    /// Evaluates the pending configuration.
    pub source: &'a dyn GraphSource,
    /// Operator UI.
    pub ui: &'a dyn Ui,
    /// Resources the cycle may touch.
    pub scope: ScopeFilter,
    /// Maximum provider calls in flight.
    pub max_parallel: usize,
}

/// Runs plan, apply, destroy, refresh and workflow cycles.
pub struct Reconciler<'a, S: StateStore> {
    ctx: RunContext<'a>,
    store: &'a S,
    holder: String,
    hasher: GraphHasher,
}

/// Result of a plan.
#[derive(Debug, Clone, Serialize)]
pub struct PlanOutcome {
    /// One entry per non-keep change.
    pub entries: Vec<PlanEntry>,
    /// Changes per classification.
    pub counts: ChangeCounts,
    /// Fingerprint of the pending graph.
    pub fingerprint: String,
}

/// Result of an apply or destroy.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// Nothing to do.
    NoChanges,
    /// The operator declined the plan.
    Declined {
        /// Planned changes.
        counts: ChangeCounts,
    },
    /// The plan was executed.
    Applied {
        /// Planned changes.
        counts: ChangeCounts,
        /// Per-change results.
        report: ExecutionReport,
        /// Fingerprint of the persisted state.
        fingerprint: String,
    },
}

/// One resource whose live fields differ from the state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriftEntry {
    /// Resource display name.
    pub resource: String,
    /// What changed.
    pub summary: String,
}

/// Report of a refresh.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DriftReport {
    /// Resources checked.
    pub checked: usize,
    /// Resources whose fields changed.
    pub changed: Vec<DriftEntry>,
    /// Resources that no longer exist.
    pub vanished: Vec<String>,
    /// Resources whose refresh failed; they are kept unchanged.
    pub failed: Vec<DriftEntry>,
}

impl<'a, S: StateStore> Reconciler<'a, S> {
    /// Creates a reconciler holding locks under a generated holder id.
    #[must_use]
    pub fn new(ctx: RunContext<'a>, store: &'a S) -> Self {
        Self {
            ctx,
            store,
            holder: generate_holder_id(),
            hasher: GraphHasher::new(),
        }
    }

    /// Sets the lock holder id.
    #[must_use]
    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }

    /// Runs `body` while holding the state lock.
    ///
    /// The lock is released after `body` finishes, whatever its result.
    ///
    /// # Errors
    ///
    /// Returns a lock error if the lock is held elsewhere, otherwise the
    /// error of `body`, or the release error if only releasing failed.
    pub async fn with_lock<T, F, Fut>(&self, body: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let lock = self.store.acquire_lock(&self.holder).await?;
        debug!("Holding state lock {} as {}", lock.lock_id, self.holder);

        let result = body().await;
        let released = self.store.release_lock(&lock.lock_id).await;

        match (result, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Err(e), Ok(())) | (Ok(_), Err(e)) => Err(e),
            (Err(e), Err(release)) => {
                error!("Failed to release state lock {}: {release}", lock.lock_id);
                Err(e)
            }
        }
    }

    /// Computes and shows the plan without executing it.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is unavailable or planning fails.
    pub async fn plan(&self) -> Result<PlanOutcome> {
        self.with_lock(|| async move {
            let state = self.load_state().await?;
            let pending = self.ctx.source.resolve(&self.ctx.scope).await?;
            let diff = Diff::build(self.ctx.registry, &state.graph()?, &pending, &self.ctx.scope)?;

            self.show_plan(&diff);
            Ok(PlanOutcome {
                entries: diff.entries(),
                counts: diff.counts(),
                fingerprint: self.hasher.hash_graph(&pending)?,
            })
        })
        .await
    }

    /// Plans and, after confirmation, executes the plan.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is unavailable, planning fails or the
    /// state cannot be saved. Failed changes are reported, not returned.
    pub async fn apply(&self) -> Result<ApplyOutcome> {
        self.with_lock(|| async move {
            let pending = self.ctx.source.resolve(&self.ctx.scope).await?;
            self.converge(pending, Operation::Apply, "Apply these changes?").await
        })
        .await
    }

    /// Deletes every resource in scope, dependents first.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is unavailable, planning fails or the
    /// state cannot be saved.
    pub async fn destroy(&self) -> Result<ApplyOutcome> {
        self.with_lock(|| async move {
            self.converge(ResourceGraph::new(), Operation::Destroy, "Destroy every resource in scope?")
                .await
        })
        .await
    }

    /// Reads every in-scope resource from its provider and records drift.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is unavailable or the state cannot be
    /// loaded or saved.
    pub async fn refresh(&self) -> Result<DriftReport> {
        self.with_lock(|| async move {
            let mut state = self.load_state().await?;
            let mut graph = state.graph()?;
            let mut report = DriftReport::default();

            for old in graph.filter(&self.ctx.scope).into_resources() {
                report.checked += 1;
                let resource_type = self.ctx.registry.resource_type(&old.id.type_name)?;
                let name = resource_type.operations().display_name(&old);

                match resource_type.operations().refresh(&old).await {
                    Ok(Some(mut live)) => {
                        live.source.clone_from(&old.source);
                        live.depends_on.clone_from(&old.depends_on);
                        let summary = FieldDiff::compute(
                            self.ctx.registry,
                            &old.id.type_name,
                            &name,
                            &old.fields,
                            &live.fields,
                        )
                        .map_or_else(|e| e.to_string(), |d| d.summary());
                        if !summary.is_empty() {
                            report.changed.push(DriftEntry {
                                resource: name,
                                summary,
                            });
                        }
                        graph.upsert(live);
                    }
                    Ok(None) => {
                        info!("{name} no longer exists");
                        graph.remove(&old.id);
                        report.vanished.push(name);
                    }
                    Err(e) => {
                        warn!("Refresh of {name} failed, keeping recorded state: {}", e.message());
                        report.failed.push(DriftEntry {
                            resource: name,
                            summary: e.message().to_string(),
                        });
                    }
                }
            }

            let fingerprint = self.hasher.hash_graph(&graph)?;
            let touched = report
                .changed
                .iter()
                .map(|d| d.resource.clone())
                .chain(report.vanished.iter().cloned())
                .collect();
            let first_error = report
                .failed
                .first()
                .map(|f| format!("refresh {} failed: {}", f.resource, f.summary));

            state.set_graph(graph, fingerprint.clone());
            state.add_history(HistoryEntry::new(Operation::Refresh, &fingerprint, touched, first_error));
            self.store.save(&state).await?;

            info!(
                "Refreshed {} resources: {} drifted, {} vanished, {} failed",
                report.checked,
                report.changed.len(),
                report.vanished.len(),
                report.failed.len()
            );
            Ok(report)
        })
        .await
    }

    /// Runs a workflow and persists what its final apply realized.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is unavailable, the workflow fails or is
    /// declined, or the state cannot be saved.
    pub async fn run_workflow(&self, workflow: &Workflow) -> Result<WorkflowOutcome> {
        self.with_lock(|| async move {
            let mut state = self.load_state().await?;
            let current = state.graph()?;

            let env = WorkflowEnv {
                registry: self.ctx.registry,
                current: &current,
                source: self.ctx.source,
                ui: self.ctx.ui,
                max_parallel: self.ctx.max_parallel,
            };
            let outcome = workflow.execute(&env).await?;

            if !outcome.report.results.is_empty() {
                self.ctx.ui.write(&format!("Workflow {}: {}", workflow.name(), outcome.report));
                self.persist(&mut state, outcome.realized.clone(), Operation::Workflow, &outcome.report)
                    .await?;
            }
            Ok(outcome)
        })
        .await
    }

    /// Diffs the state against `pending`, confirms, executes and persists.
    async fn converge(&self, pending: ResourceGraph, operation: Operation, question: &str) -> Result<ApplyOutcome> {
        let mut state = self.load_state().await?;
        let current = state.graph()?;
        let diff = Diff::build(self.ctx.registry, &current, &pending, &self.ctx.scope)?;
        let counts = diff.counts();

        if !diff.has_changes() {
            self.ctx.ui.write("No changes. Infrastructure is up to date.");
            return Ok(ApplyOutcome::NoChanges);
        }

        self.show_plan(&diff);
        if !self.ctx.ui.confirm(question)? {
            info!("{operation} declined");
            return Ok(ApplyOutcome::Declined { counts });
        }

        let realized = Arc::new(RealizedState::new(current, self.ctx.registry.id_fields()));
        let executor = Executor::new(&diff, Arc::clone(&realized), self.ctx.max_parallel);
        executor.run(Phase::All).await;
        let report = executor.report();
        self.ctx.ui.write(&format!("Finished {operation}: {report}"));

        let fingerprint = self
            .persist(&mut state, realized.snapshot().await, operation, &report)
            .await?;

        Ok(ApplyOutcome::Applied {
            counts,
            report,
            fingerprint,
        })
    }

    async fn persist(
        &self,
        state: &mut StateSnapshot,
        graph: ResourceGraph,
        operation: Operation,
        report: &ExecutionReport,
    ) -> Result<String> {
        let fingerprint = self.hasher.hash_graph(&graph)?;
        state.set_graph(graph, fingerprint.clone());
        state.add_history(HistoryEntry::new(
            operation,
            &fingerprint,
            report.resources(),
            report.first_error(),
        ));
        self.store.save(state).await?;
        Ok(fingerprint)
    }

    async fn load_state(&self) -> Result<StateSnapshot> {
        Ok(self
            .store
            .load()
            .await?
            .unwrap_or_else(|| StateSnapshot::new(self.ctx.project, self.ctx.environment)))
    }

    fn show_plan(&self, diff: &Diff) {
        if diff.has_changes() {
            self.ctx.ui.render_plan(&diff.render_plan());
        }
        self.ctx.ui.write(&format!("Plan: {}", diff.counts()));
    }
}

impl DriftReport {
    /// Returns true if the live resources match the state.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.changed.is_empty() && self.vanished.is_empty()
    }
}

impl std::fmt::Display for DriftReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_converged() {
            write!(f, "No drift detected in {} resources", self.checked)?;
        } else {
            writeln!(f, "Drift detected:")?;
            for entry in &self.changed {
                writeln!(f, "  ~ {} ({})", entry.resource, entry.summary)?;
            }
            for resource in &self.vanished {
                writeln!(f, "  - {resource} (gone)")?;
            }
        }
        for entry in &self.failed {
            write!(f, "\n  ! {}: {}", entry.resource, entry.summary)?;
        }
        Ok(())
    }
}
