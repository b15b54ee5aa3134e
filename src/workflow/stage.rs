//! Stages and the workflow state machine.
//!
//! A workflow starts at its first stage. Each stage runs its statements in
//! order; a statement may name another stage to enter, otherwise the next
//! declared stage follows. Falling past the last stage ends the stage
//! sequence, after which the workflow diffs and applies the result.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::diff::{ChangeCounts, Diff, ExecutionReport, Executor, Phase, RealizedState};
use crate::error::{Result, WorkflowError};
use crate::resource::{GraphSource, ResourceGraph, ScopeFilter};
use crate::schema::SchemaRegistry;
use crate::ui::Ui;

use super::statement::{Overlay, StageContext, Statement};

/// Phases of the final apply, in order.
const FINALIZE_PHASES: [Phase; 3] = [Phase::CreateOrUpdate, Phase::Replace, Phase::Delete];

/// A named block of statements.
#[derive(Debug)]
pub struct Stage {
    name: String,
    statements: Vec<Box<dyn Statement>>,
}

impl Stage {
    /// Creates an empty stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            statements: Vec::new(),
        }
    }

    /// Appends a statement.
    #[must_use]
    pub fn then(mut self, statement: impl Statement + 'static) -> Self {
        self.statements.push(Box::new(statement));
        self
    }

    /// Appends a boxed statement.
    pub fn push(&mut self, statement: Box<dyn Statement>) {
        self.statements.push(statement);
    }

    /// Stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs statements until one names a stage to enter.
    ///
    /// # Errors
    ///
    /// Returns the first statement error.
    pub fn run(&self, ctx: &mut StageContext<'_>) -> Result<Option<String>> {
        for statement in &self.statements {
            if let Some(target) = statement.run(ctx)? {
                return Ok(Some(target));
            }
        }
        Ok(None)
    }
}

/// Result of running the stage sequence.
#[derive(Debug, Clone, Default)]
pub struct StageRun {
    /// Stages entered, in order; revisits appear again.
    pub visited: Vec<String>,
    /// Mutations made by the stages.
    pub overlay: Overlay,
}

/// Collaborators the final diff and apply need.
pub struct WorkflowEnv<'a> {
    /// Registered resource types.
    pub registry: &'a SchemaRegistry,
    /// Complete current state.
    pub current: &'a ResourceGraph,
    /// Re-evaluates the pending configuration.
    pub source: &'a dyn GraphSource,
    /// Operator UI.
    pub ui: &'a dyn Ui,
    /// Maximum provider calls in flight.
    pub max_parallel: usize,
}

/// Result of a finalized workflow.
#[derive(Debug, Clone)]
pub struct WorkflowOutcome {
    /// Stages entered, in order.
    pub visited: Vec<String>,
    /// Planned changes.
    pub counts: ChangeCounts,
    /// Execution results; empty when nothing changed.
    pub report: ExecutionReport,
    /// Current state after execution.
    pub realized: ResourceGraph,
}

/// An operator-defined remediation procedure.
#[derive(Debug)]
pub struct Workflow {
    name: String,
    stages: Vec<Stage>,
    scope: ScopeFilter,
    max_stage_visits: Option<usize>,
}

impl Workflow {
    /// Creates a workflow with no stages covering every resource.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            scope: ScopeFilter::all(),
            max_stage_visits: None,
        }
    }

    /// Appends a stage.
    #[must_use]
    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Restricts the final diff to `scope`.
    #[must_use]
    pub fn with_scope(mut self, scope: ScopeFilter) -> Self {
        self.scope = scope;
        self
    }

    /// Bounds how often a single stage may be entered.
    #[must_use]
    pub const fn with_max_stage_visits(mut self, limit: Option<usize>) -> Self {
        self.max_stage_visits = limit;
        self
    }

    /// Workflow name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared stages.
    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Scope of the final diff.
    #[must_use]
    pub const fn scope(&self) -> &ScopeFilter {
        &self.scope
    }

    /// Runs the stage sequence.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow has no stages, a statement fails, a
    /// transition names an undeclared stage, or a stage is entered more often
    /// than allowed.
    pub fn run_stages(&self, ui: &dyn Ui) -> Result<StageRun> {
        if self.stages.is_empty() {
            return Err(WorkflowError::NoStages {
                workflow: self.name.clone(),
            }
            .into());
        }

        let mut run = StageRun::default();
        let mut visits: HashMap<usize, usize> = HashMap::new();
        let mut index = 0;

        while let Some(stage) = self.stages.get(index) {
            let count = visits.entry(index).or_insert(0);
            *count += 1;
            if let Some(limit) = self.max_stage_visits
                && *count > limit
            {
                return Err(WorkflowError::StageLimitExceeded {
                    workflow: self.name.clone(),
                    stage: stage.name.clone(),
                    limit,
                }
                .into());
            }

            run.visited.push(stage.name.clone());
            ui.write(&format!("{} Executing {} stage", run.visited.len(), stage.name));

            ui.indent();
            let outcome = {
                let mut ctx = StageContext::new(&self.name, &stage.name, ui, &mut run.overlay);
                stage.run(&mut ctx)
            };
            ui.unindent();

            index = match outcome? {
                Some(target) => {
                    debug!("{}: {} -> {target}", self.name, stage.name);
                    self.position(&target)?
                }
                None => index + 1,
            };
        }

        Ok(run)
    }

    /// Runs the stages, then diffs and applies the result.
    ///
    /// The pending graph is re-evaluated from `env.source` and the stage
    /// overlay is replayed on it. After confirmation, creates and updates
    /// run first, then replacements, then deletes.
    ///
    /// # Errors
    ///
    /// Returns an error if the stages fail, planning fails, or the operator
    /// declines to finalize.
    pub async fn execute(&self, env: &WorkflowEnv<'_>) -> Result<WorkflowOutcome> {
        info!("Running workflow {}", self.name);
        let run = self.run_stages(env.ui)?;

        let evaluated = env.source.resolve(&self.scope).await?;
        let pending = run.overlay.apply(evaluated)?;
        let current = env.current.filter(&self.scope);

        // Both sides are already scoped; declared resources carry no source.
        let diff = Diff::build(env.registry, &current, &pending, &ScopeFilter::all())?;
        let counts = diff.counts();

        if !diff.has_changes() {
            env.ui.write("No changes. Infrastructure is up to date.");
            return Ok(WorkflowOutcome {
                visited: run.visited,
                counts,
                report: ExecutionReport::default(),
                realized: env.current.clone(),
            });
        }

        env.ui.render_plan(&diff.render_plan());
        env.ui.write(&format!("Plan: {counts}"));

        if !env.ui.confirm(&format!("Finalize {} workflow?", self.name))? {
            return Err(WorkflowError::Aborted {
                workflow: self.name.clone(),
            }
            .into());
        }

        let realized = Arc::new(RealizedState::new(env.current.clone(), env.registry.id_fields()));
        let executor = Executor::new(&diff, Arc::clone(&realized), env.max_parallel);
        for phase in FINALIZE_PHASES {
            executor.run(phase).await;
        }

        let report = executor.report();
        info!("Workflow {} finished: {report}", self.name);

        Ok(WorkflowOutcome {
            visited: run.visited,
            counts,
            report,
            realized: realized.snapshot().await,
        })
    }

    fn position(&self, stage: &str) -> Result<usize> {
        self.stages
            .iter()
            .position(|s| s.name == stage)
            .ok_or_else(|| {
                WorkflowError::NoSuchStage {
                    workflow: self.name.clone(),
                    stage: stage.to_string(),
                }
                .into()
            })
    }
}
