//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Converge - plan and apply declarative infrastructure.
#[derive(Parser, Debug)]
#[command(name = "converge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the project file.
    #[arg(short, long, global = true, env = "CONVERGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Restrict the run to resources from these files (repeatable).
    #[arg(long, global = true)]
    pub scope: Vec<String>,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new project.
    Init {
        /// Directory to initialize (defaults to current directory).
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Force overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },

    /// Validate the project file and resource files.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Show what apply would change.
    Plan,

    /// Apply the plan.
    Apply {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Delete every resource in scope.
    Destroy {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Read live resources and record drift.
    Refresh,

    /// Run remediation workflows.
    Workflow {
        /// Workflow subcommand.
        #[command(subcommand)]
        command: WorkflowCommands,
    },

    /// Manage the state store.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },
}

/// Workflow subcommands.
#[derive(Subcommand, Debug)]
pub enum WorkflowCommands {
    /// List declared workflows.
    List,

    /// Run a workflow.
    Run {
        /// Workflow name.
        name: String,

        /// Answer yes to every question.
        #[arg(short, long)]
        yes: bool,
    },
}

/// State management subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Show current state.
    Show,

    /// Lock the state.
    Lock {
        /// Lock holder identifier.
        #[arg(long)]
        holder: Option<String>,
    },

    /// Release a lock this operator holds.
    Unlock {
        /// Lock ID to release.
        #[arg(long)]
        lock_id: String,
    },

    /// Remove a lock regardless of holder.
    ForceUnlock {
        /// Lock ID to remove.
        #[arg(long)]
        lock_id: String,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_workflow_run() {
        let cli = Cli::parse_from(["converge", "--scope", "net.yaml", "workflow", "run", "rotate", "--yes"]);
        assert_eq!(cli.scope, ["net.yaml"]);
        match cli.command {
            Commands::Workflow {
                command: WorkflowCommands::Run { name, yes },
            } => {
                assert_eq!(name, "rotate");
                assert!(yes);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_force_unlock() {
        let cli = Cli::parse_from(["converge", "--output", "json", "state", "force-unlock", "--lock-id", "abc"]);
        assert_eq!(cli.output, OutputFormat::Json);
        assert!(matches!(
            cli.command,
            Commands::State {
                command: StateCommands::ForceUnlock { ref lock_id }
            } if lock_id == "abc"
        ));
    }
}
