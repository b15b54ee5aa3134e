//! Remediation workflows.
//!
//! A workflow is a named-stage state machine: operator-defined statements
//! run stage by stage, may jump between stages, and record mutations of the
//! pending graph. When the stage sequence ends, the workflow re-evaluates
//! the configuration, diffs it against the current state and applies it.

mod stage;
mod statement;

pub use stage::{Stage, StageRun, Workflow, WorkflowEnv, WorkflowOutcome};
pub use statement::{
    Declare, Edit, Goto, Message, Overlay, Prompt, Remove, SetField, StageContext, Statement,
};
