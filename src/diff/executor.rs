//! Phased execution of a diff.
//!
//! Forward passes apply creates, updates and the new half of replacements
//! in dependency order. Reverse passes delete resources, and the old half
//! of replacements, after everything that references them. Changes within
//! a layer run concurrently up to `max_parallel`. A failed change skips
//! its dependents; independent changes continue.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::resource::ResourceId;

use super::change::{Change, ChangeType, Step};
use super::plan::Diff;
use super::realized::RealizedState;

/// Which changes an execution run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Creates, updates and replacements forward, then deletes and the old
    /// half of replacements in reverse.
    All,
    /// Creates and updates only.
    CreateOrUpdate,
    /// Replacements only, both halves.
    Replace,
    /// Deletes only.
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Direction {
    Forward,
    Reverse,
}

const FORWARD_ALL: &[ChangeType] = &[ChangeType::Create, ChangeType::Update, ChangeType::Replace];
const REVERSE_ALL: &[ChangeType] = &[ChangeType::Delete, ChangeType::Replace];
const CREATE_OR_UPDATE: &[ChangeType] = &[ChangeType::Create, ChangeType::Update];
const REPLACE: &[ChangeType] = &[ChangeType::Replace];
const DELETE: &[ChangeType] = &[ChangeType::Delete];

type Pass = (Direction, &'static [ChangeType]);

const ALL_PASSES: &[Pass] = &[(Direction::Forward, FORWARD_ALL), (Direction::Reverse, REVERSE_ALL)];
const CREATE_OR_UPDATE_PASSES: &[Pass] = &[(Direction::Forward, CREATE_OR_UPDATE)];
const REPLACE_PASSES: &[Pass] = &[(Direction::Forward, REPLACE), (Direction::Reverse, REPLACE)];
const DELETE_PASSES: &[Pass] = &[(Direction::Reverse, DELETE)];

impl Phase {
    const fn passes(self) -> &'static [Pass] {
        match self {
            Self::All => ALL_PASSES,
            Self::CreateOrUpdate => CREATE_OR_UPDATE_PASSES,
            Self::Replace => REPLACE_PASSES,
            Self::Delete => DELETE_PASSES,
        }
    }
}

/// Final status of a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Every step completed.
    Succeeded,
    /// Not run because a dependency did not complete.
    Skipped,
    /// A provider operation failed.
    Failed,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Skipped => write!(f, "skipped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Outcome of one change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeResult {
    /// Resource identity.
    pub id: ResourceId,
    /// Resource display name.
    pub resource: String,
    /// Classification.
    pub action: ChangeType,
    /// Final status.
    pub status: ExecutionStatus,
    /// Failure or skip reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Post-execution report: succeeded, failed and skipped changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
    /// Results in execution order.
    pub results: Vec<ChangeResult>,
}

impl ExecutionReport {
    /// Records an outcome. A change seen twice keeps its worst status.
    pub fn record(&mut self, change: &Change, status: ExecutionStatus, message: Option<String>) {
        if let Some(existing) = self.results.iter_mut().find(|r| &r.id == change.id()) {
            if status > existing.status {
                existing.status = status;
                existing.message = message;
            }
            return;
        }
        self.results.push(ChangeResult {
            id: change.id().clone(),
            resource: change.display_name().to_string(),
            action: change.change_type(),
            status,
            message,
        });
    }

    /// Results with the given status.
    pub fn with_status(&self, status: ExecutionStatus) -> impl Iterator<Item = &ChangeResult> {
        self.results.iter().filter(move |r| r.status == status)
    }

    /// Number of results with the given status.
    #[must_use]
    pub fn count(&self, status: ExecutionStatus) -> usize {
        self.with_status(status).count()
    }

    /// Returns true if nothing failed or was skipped.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.results
            .iter()
            .all(|r| r.status == ExecutionStatus::Succeeded)
    }

    /// Display names of every resource in the report.
    #[must_use]
    pub fn resources(&self) -> Vec<String> {
        self.results.iter().map(|r| r.resource.clone()).collect()
    }

    /// First failure message, if any.
    #[must_use]
    pub fn first_error(&self) -> Option<String> {
        self.with_status(ExecutionStatus::Failed)
            .find_map(|r| r.message.as_ref().map(|m| format!("{}: {m}", r.resource)))
    }
}

impl fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed, {} skipped",
            self.count(ExecutionStatus::Succeeded),
            self.count(ExecutionStatus::Failed),
            self.count(ExecutionStatus::Skipped)
        )
    }
}

/// Runs the changes of a diff against a realized state.
pub struct Executor<'a> {
    diff: &'a Diff,
    realized: Arc<RealizedState>,
    semaphore: Arc<Semaphore>,
    ledger: Mutex<HashMap<(ResourceId, Direction), ExecutionStatus>>,
    report: Mutex<ExecutionReport>,
}

impl<'a> Executor<'a> {
    /// Creates an executor running at most `max_parallel` changes at once.
    #[must_use]
    pub fn new(diff: &'a Diff, realized: Arc<RealizedState>, max_parallel: usize) -> Self {
        Self {
            diff,
            realized,
            semaphore: Arc::new(Semaphore::new(max_parallel.max(1))),
            ledger: Mutex::new(HashMap::new()),
            report: Mutex::new(ExecutionReport::default()),
        }
    }

    /// The realized state updated by this executor.
    #[must_use]
    pub const fn realized(&self) -> &Arc<RealizedState> {
        &self.realized
    }

    /// Report of everything run so far.
    #[must_use]
    pub fn report(&self) -> ExecutionReport {
        self.report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Runs one phase. Outcomes accumulate across phases, so a later phase
    /// sees failures from an earlier one.
    pub async fn run(&self, phase: Phase) {
        for &(direction, kinds) in phase.passes() {
            let layers: Vec<Vec<&Arc<Change>>> = match direction {
                Direction::Forward => self.diff.forward_layers().collect(),
                Direction::Reverse => self.diff.reverse_layers().collect(),
            };

            for (depth, layer) in layers.into_iter().enumerate() {
                let selected: Vec<&Arc<Change>> = layer
                    .into_iter()
                    .filter(|c| kinds.contains(&c.change_type()))
                    .collect();
                if selected.is_empty() {
                    continue;
                }
                debug!(
                    "{:?} layer {}: {} changes",
                    direction,
                    depth,
                    selected.len()
                );
                self.run_layer(direction, selected).await;
            }
        }
    }

    async fn run_layer(&self, direction: Direction, layer: Vec<&Arc<Change>>) {
        let mut tasks = JoinSet::new();
        let mut running = HashMap::new();

        for change in layer {
            let steps: &'static [Step] = match direction {
                Direction::Forward => change.forward_steps(),
                Direction::Reverse => change.reverse_steps(),
            };
            if steps.is_empty() {
                continue;
            }
            if let Some(reason) = self.blocked_by(change, direction) {
                warn!("Skipping {}: {}", change.display_name(), reason);
                self.record(change, direction, ExecutionStatus::Skipped, Some(reason));
                continue;
            }

            change.set_executable(true);
            let task_change = Arc::clone(change);
            let realized = Arc::clone(&self.realized);
            let semaphore = Arc::clone(&self.semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let mut outcome = Ok(());
                for &step in steps {
                    if let Err(e) = task_change.execute(step, &realized).await {
                        outcome = Err(e.to_string());
                        break;
                    }
                }
                (task_change, outcome)
            });
            running.insert(change.id().clone(), Arc::clone(change));
        }

        while let Some(joined) = tasks.join_next().await {
            let (change, outcome) = match joined {
                Ok(done) => done,
                Err(join_error) => {
                    error!("Change task aborted: {join_error}");
                    continue;
                }
            };
            running.remove(change.id());
            match outcome {
                Ok(()) => {
                    info!("{} {}: done", change.change_type(), change.display_name());
                    self.record(&change, direction, ExecutionStatus::Succeeded, None);
                }
                Err(message) => {
                    error!("{} {}: {}", change.change_type(), change.display_name(), message);
                    self.record(&change, direction, ExecutionStatus::Failed, Some(message));
                }
            }
        }

        // Tasks that panicked never reported back.
        for change in running.into_values() {
            let message = String::from("execution task aborted");
            self.record(&change, direction, ExecutionStatus::Failed, Some(message));
        }
    }

    fn blocked_by(&self, change: &Change, direction: Direction) -> Option<String> {
        let ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
        let incomplete = |id: &ResourceId| {
            [Direction::Forward, Direction::Reverse]
                .iter()
                .any(|d| matches!(ledger.get(&(id.clone(), *d)), Some(s) if *s != ExecutionStatus::Succeeded))
        };

        if direction == Direction::Reverse
            && change.change_type() == ChangeType::Replace
            && incomplete(change.id())
        {
            return Some(String::from("replacement was not created"));
        }

        let dependencies = match direction {
            Direction::Forward => change.forward_dependencies(),
            Direction::Reverse => change.reverse_dependencies(),
        };
        dependencies.iter().find(|id| incomplete(id)).map(|id| {
            let name = self
                .diff
                .get(id)
                .map_or_else(|| id.to_string(), |c| c.display_name().to_string());
            format!("dependency {name} did not complete")
        })
    }

    fn record(
        &self,
        change: &Change,
        direction: Direction,
        status: ExecutionStatus,
        message: Option<String>,
    ) {
        self.ledger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((change.id().clone(), direction), status);
        self.report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(change, status, message);
    }
}

impl fmt::Debug for Executor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("available_permits", &self.semaphore.available_permits())
            .finish_non_exhaustive()
    }
}
