//! Command-line interface.
//!
//! clap command definitions and text / JSON output formatting.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands, WorkflowCommands};
pub use output::OutputFormatter;
