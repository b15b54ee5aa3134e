//! Stage statements and the pending-graph overlay they write to.

use std::fmt;
use tracing::debug;

use crate::error::{Result, WorkflowError};
use crate::resource::{Resource, ResourceGraph, ResourceId, Value};
use crate::ui::Ui;

/// One recorded mutation of the pending graph.
#[derive(Debug, Clone, PartialEq)]
pub enum Edit {
    /// Set a field on a pending resource.
    Set {
        /// Stage that made the edit.
        stage: String,
        /// Target resource.
        id: ResourceId,
        /// Field name.
        field: String,
        /// New value.
        value: Value,
    },
    /// Drop a pending resource.
    Remove {
        /// Stage that made the edit.
        stage: String,
        /// Target resource.
        id: ResourceId,
    },
    /// Add or overwrite a pending resource.
    Declare {
        /// Stage that made the edit.
        stage: String,
        /// The declared resource.
        resource: Resource,
    },
}

/// Mutations collected while stages run, replayed in order on the
/// re-evaluated pending graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overlay {
    edits: Vec<Edit>,
}

impl Overlay {
    /// Creates an empty overlay.
    #[must_use]
    pub const fn new() -> Self {
        Self { edits: Vec::new() }
    }

    /// Records a field assignment.
    pub fn set(&mut self, stage: &str, id: ResourceId, field: impl Into<String>, value: Value) {
        self.edits.push(Edit::Set {
            stage: stage.to_string(),
            id,
            field: field.into(),
            value,
        });
    }

    /// Records a removal.
    pub fn remove(&mut self, stage: &str, id: ResourceId) {
        self.edits.push(Edit::Remove {
            stage: stage.to_string(),
            id,
        });
    }

    /// Records a declaration.
    pub fn declare(&mut self, stage: &str, resource: Resource) {
        self.edits.push(Edit::Declare {
            stage: stage.to_string(),
            resource,
        });
    }

    /// Recorded edits, oldest first.
    #[must_use]
    pub fn edits(&self) -> &[Edit] {
        &self.edits
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Replays every edit on `graph`.
    ///
    /// # Errors
    ///
    /// Returns an error if an edit targets a resource the graph does not hold.
    pub fn apply(&self, mut graph: ResourceGraph) -> Result<ResourceGraph> {
        for edit in &self.edits {
            match edit {
                Edit::Set { stage, id, field, value } => {
                    let resource = graph.get(id).cloned().ok_or_else(|| WorkflowError::StatementFailed {
                        stage: stage.clone(),
                        message: format!("cannot set {field}: {id} is not declared"),
                    })?;
                    graph.upsert(resource.with_field(field.clone(), value.clone()));
                }
                Edit::Remove { stage, id } => {
                    if graph.remove(id).is_none() {
                        return Err(WorkflowError::StatementFailed {
                            stage: stage.clone(),
                            message: format!("cannot remove {id}: it is not declared"),
                        }
                        .into());
                    }
                }
                Edit::Declare { resource, .. } => graph.upsert(resource.clone()),
            }
        }
        Ok(graph)
    }
}

/// What a statement sees while it runs.
pub struct StageContext<'a> {
    workflow: &'a str,
    stage: &'a str,
    ui: &'a dyn Ui,
    overlay: &'a mut Overlay,
}

impl<'a> StageContext<'a> {
    /// Creates a context for one stage run.
    pub fn new(workflow: &'a str, stage: &'a str, ui: &'a dyn Ui, overlay: &'a mut Overlay) -> Self {
        Self {
            workflow,
            stage,
            ui,
            overlay,
        }
    }

    /// Name of the running workflow.
    #[must_use]
    pub const fn workflow(&self) -> &str {
        self.workflow
    }

    /// Name of the running stage.
    #[must_use]
    pub const fn stage(&self) -> &str {
        self.stage
    }

    /// Operator UI.
    #[must_use]
    pub fn ui(&self) -> &dyn Ui {
        self.ui
    }

    /// Records a field assignment made by this stage.
    pub fn set(&mut self, id: ResourceId, field: &str, value: Value) {
        self.overlay.set(self.stage, id, field, value);
    }

    /// Records a removal made by this stage.
    pub fn remove(&mut self, id: ResourceId) {
        self.overlay.remove(self.stage, id);
    }

    /// Records a declaration made by this stage.
    pub fn declare(&mut self, resource: Resource) {
        self.overlay.declare(self.stage, resource);
    }
}

impl fmt::Debug for StageContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageContext")
            .field("workflow", &self.workflow)
            .field("stage", &self.stage)
            .field("edits", &self.overlay.edits.len())
            .finish_non_exhaustive()
    }
}

/// One operator-defined step of a stage.
///
/// Returning `Some(stage)` leaves the current stage and enters `stage`;
/// returning `None` moves on to the next statement.
pub trait Statement: Send + Sync + fmt::Debug {
    /// Runs the statement.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement cannot complete.
    fn run(&self, ctx: &mut StageContext<'_>) -> Result<Option<String>>;
}

/// Writes a line.
#[derive(Debug, Clone)]
pub struct Message(pub String);

impl Statement for Message {
    fn run(&self, ctx: &mut StageContext<'_>) -> Result<Option<String>> {
        ctx.ui().write(&self.0);
        Ok(None)
    }
}

/// Sets a field on a pending resource.
#[derive(Debug, Clone)]
pub struct SetField {
    /// Target resource.
    pub target: ResourceId,
    /// Field name.
    pub field: String,
    /// New value.
    pub value: Value,
}

impl Statement for SetField {
    fn run(&self, ctx: &mut StageContext<'_>) -> Result<Option<String>> {
        debug!("{}: set {}.{} = {}", ctx.stage(), self.target, self.field, self.value);
        ctx.set(self.target.clone(), &self.field, self.value.clone());
        Ok(None)
    }
}

/// Drops a pending resource.
#[derive(Debug, Clone)]
pub struct Remove(pub ResourceId);

impl Statement for Remove {
    fn run(&self, ctx: &mut StageContext<'_>) -> Result<Option<String>> {
        debug!("{}: remove {}", ctx.stage(), self.0);
        ctx.remove(self.0.clone());
        Ok(None)
    }
}

/// Adds a pending resource.
#[derive(Debug, Clone)]
pub struct Declare(pub Resource);

impl Statement for Declare {
    fn run(&self, ctx: &mut StageContext<'_>) -> Result<Option<String>> {
        debug!("{}: declare {}", ctx.stage(), self.0.id);
        ctx.declare(self.0.clone());
        Ok(None)
    }
}

/// Asks the operator; a no jumps to `otherwise`.
#[derive(Debug, Clone)]
pub struct Prompt {
    /// Question shown to the operator.
    pub question: String,
    /// Stage entered on decline.
    pub otherwise: String,
}

impl Statement for Prompt {
    fn run(&self, ctx: &mut StageContext<'_>) -> Result<Option<String>> {
        if ctx.ui().confirm(&self.question)? {
            Ok(None)
        } else {
            Ok(Some(self.otherwise.clone()))
        }
    }
}

/// Jumps to a stage.
#[derive(Debug, Clone)]
pub struct Goto(pub String);

impl Statement for Goto {
    fn run(&self, _ctx: &mut StageContext<'_>) -> Result<Option<String>> {
        Ok(Some(self.0.clone()))
    }
}
