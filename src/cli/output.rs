//! Output formatting for CLI commands.
//!
//! Every formatter returns text for the selected format; the binary decides
//! where it goes.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{ValidationResult, WorkflowConfig};
use crate::diff::{ChangeCounts, ChangeType, ExecutionReport, ExecutionStatus};
use crate::reconciler::{ApplyOutcome, DriftReport, PlanOutcome};
use crate::state::{LockInfo, StateSnapshot};
use crate::workflow::WorkflowOutcome;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan entry row for table display.
#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Changes")]
    changes: String,
}

/// Execution result row for table display.
#[derive(Tabled)]
struct ResultRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
}

/// Workflow row for table display.
#[derive(Tabled)]
struct WorkflowRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Stages")]
    stages: String,
    #[tabled(rename = "Scope")]
    scope: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a plan.
    #[must_use]
    pub fn format_plan(&self, plan: &PlanOutcome) -> String {
        match self.format {
            OutputFormat::Json => to_json(plan),
            OutputFormat::Text => {
                if plan.entries.is_empty() {
                    return format!("{} No changes. Infrastructure is up to date.\n", "✓".green());
                }

                let mut output = String::from("\nPlan\n");
                let _ = writeln!(output, "   Fingerprint: {}\n", short(&plan.fingerprint));

                let rows: Vec<PlanRow> = plan
                    .entries
                    .iter()
                    .enumerate()
                    .map(|(i, e)| PlanRow {
                        index: i + 1,
                        action: Self::format_action(e.action),
                        resource: e.resource.clone(),
                        changes: Self::truncate(e.summary.as_deref().unwrap_or(""), 60),
                    })
                    .collect();
                output.push_str(&Table::new(rows).to_string());
                output.push('\n');
                output.push_str(&Self::format_counts(&plan.counts));
                output
            }
        }
    }

    /// Formats the result of an apply or destroy.
    #[must_use]
    pub fn format_apply(&self, outcome: &ApplyOutcome) -> String {
        match self.format {
            OutputFormat::Json => to_json(outcome),
            OutputFormat::Text => match outcome {
                ApplyOutcome::NoChanges => {
                    format!("{} No changes. Infrastructure is up to date.\n", "✓".green())
                }
                ApplyOutcome::Declined { .. } => format!("{} Cancelled.\n", "✗".yellow()),
                ApplyOutcome::Applied {
                    report, fingerprint, ..
                } => {
                    let mut output = Self::format_report(report);
                    let _ = writeln!(output, "   State fingerprint: {}", short(fingerprint));
                    output
                }
            },
        }
    }

    /// Formats a drift report.
    #[must_use]
    pub fn format_drift(&self, report: &DriftReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(report),
            OutputFormat::Text => {
                let mut output = if report.is_converged() {
                    format!("{} No drift detected in {} resources.\n", "✓".green(), report.checked)
                } else {
                    let mut output = format!("{} Drift detected:\n\n", "⚠".yellow());
                    for entry in &report.changed {
                        let _ = writeln!(output, "   {} {} ({})", "~".yellow(), entry.resource, entry.summary);
                    }
                    for resource in &report.vanished {
                        let _ = writeln!(output, "   {} {resource} (gone)", "-".red());
                    }
                    let _ = write!(
                        output,
                        "\n{}/{} resources have drifted.\n",
                        report.changed.len() + report.vanished.len(),
                        report.checked
                    );
                    output
                };
                if !report.failed.is_empty() {
                    let _ = write!(output, "\n{} Refresh failed for:\n", "✗".red());
                    for entry in &report.failed {
                        let _ = writeln!(output, "   - {}: {}", entry.resource, entry.summary);
                    }
                }
                output
            }
        }
    }

    /// Formats a finished workflow.
    #[must_use]
    pub fn format_workflow(&self, name: &str, outcome: &WorkflowOutcome) -> String {
        match self.format {
            OutputFormat::Json => to_json(&WorkflowJson {
                workflow: name,
                visited: &outcome.visited,
                counts: outcome.counts,
                report: &outcome.report,
            }),
            OutputFormat::Text => {
                let mut output = format!("\nWorkflow {name}\n");
                let _ = writeln!(output, "   Stages: {}\n", outcome.visited.join(" -> "));
                if outcome.report.results.is_empty() {
                    let _ = writeln!(output, "{} No changes were needed.", "✓".green());
                } else {
                    output.push_str(&Self::format_report(&outcome.report));
                }
                output
            }
        }
    }

    /// Formats the declared workflows.
    #[must_use]
    pub fn format_workflows(&self, workflows: &[WorkflowConfig]) -> String {
        match self.format {
            OutputFormat::Json => to_json(
                &workflows
                    .iter()
                    .map(|w| {
                        serde_json::json!({
                            "name": w.name,
                            "stages": w.stages.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
                            "scope": w.scope,
                        })
                    })
                    .collect::<Vec<_>>(),
            ),
            OutputFormat::Text => {
                if workflows.is_empty() {
                    return String::from("No workflows declared.\n");
                }
                let rows: Vec<WorkflowRow> = workflows
                    .iter()
                    .map(|w| WorkflowRow {
                        name: w.name.clone(),
                        stages: w.stages.iter().map(|s| s.name.as_str()).collect::<Vec<_>>().join(", "),
                        scope: if w.scope.is_empty() {
                            String::from("(project)")
                        } else {
                            w.scope.join(", ")
                        },
                    })
                    .collect();
                format!("{}\n", Table::new(rows))
            }
        }
    }

    /// Formats validation results.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, show_warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => to_json(result),
            OutputFormat::Text => {
                let mut output = if result.is_valid() {
                    format!("{} Configuration is valid.\n", "✓".green())
                } else {
                    let mut output = format!("{} {} errors:\n", "✗".red(), result.error_count());
                    for error in &result.errors {
                        let _ = writeln!(output, "   - {error}");
                    }
                    output
                };
                if show_warnings && !result.warnings.is_empty() {
                    let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }
                output
            }
        }
    }

    /// Formats stored state and the current lock.
    #[must_use]
    pub fn format_state(&self, state: Option<&StateSnapshot>, lock: Option<&LockInfo>) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({ "state": state, "lock": lock })),
            OutputFormat::Text => {
                let Some(state) = state else {
                    return String::from("No state recorded yet.\n");
                };
                let mut output = String::new();

                let _ = write!(output, "\nState: {}/{}\n\n", state.project, state.environment);
                let _ = writeln!(output, "   Version: {}", state.version);
                let _ = writeln!(output, "   Fingerprint: {}", short(&state.fingerprint));
                let _ = writeln!(output, "   Last updated: {}", state.last_updated);
                let _ = writeln!(output, "   Resources: {}", state.resources.len());
                for resource in &state.resources {
                    let _ = writeln!(output, "     - {}", resource.id);
                }

                match lock {
                    Some(lock) => {
                        let _ = writeln!(
                            output,
                            "   Lock: {} held by {} for {}s",
                            lock.lock_id,
                            lock.holder,
                            lock.held_for_secs()
                        );
                    }
                    None => {
                        let _ = writeln!(output, "   Lock: none");
                    }
                }

                if !state.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", state.history.len());
                    for entry in state.history.iter().rev().take(5) {
                        let status = if entry.success { "✓".green() } else { "✗".red() };
                        let _ = writeln!(
                            output,
                            "     {status} {} - {} ({})",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            entry.resources.join(", ")
                        );
                        if let Some(error) = &entry.error {
                            let _ = writeln!(output, "         {error}");
                        }
                    }
                }

                output
            }
        }
    }

    /// Formats a lock record after `action` (e.g. "Acquired").
    #[must_use]
    pub fn format_lock(&self, action: &str, lock: &LockInfo) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({ "action": action, "lock": lock })),
            OutputFormat::Text => format!(
                "{} {action} lock {} (holder {})\n",
                "✓".green(),
                lock.lock_id,
                lock.holder
            ),
        }
    }

    /// Formats a short status message.
    #[must_use]
    pub fn message(&self, status: &str, message: &str) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({ "status": status, "message": message })),
            OutputFormat::Text => format!("{message}\n"),
        }
    }

    fn format_report(report: &ExecutionReport) -> String {
        let status = if report.is_success() {
            format!("{} Apply complete", "✓".green())
        } else {
            format!("{} Apply finished with errors", "✗".red())
        };
        let mut output = format!("{status}\n\n");

        let rows: Vec<ResultRow> = report
            .results
            .iter()
            .map(|r| ResultRow {
                resource: r.resource.clone(),
                action: Self::format_action(r.action),
                status: Self::format_status(r.status),
                message: Self::truncate(r.message.as_deref().unwrap_or(""), 60),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        let _ = write!(output, "\n\n{report}\n");
        output
    }

    fn format_counts(counts: &ChangeCounts) -> String {
        format!(
            "\nPlan: {} to create, {} to update, {} to replace, {} to delete\n",
            counts.create.to_string().green(),
            counts.update.to_string().yellow(),
            counts.replace.to_string().magenta(),
            counts.delete.to_string().red()
        )
    }

    /// Formats an action with color.
    fn format_action(action: ChangeType) -> String {
        match action {
            ChangeType::Create => "+create".green().to_string(),
            ChangeType::Update => "~update".yellow().to_string(),
            ChangeType::Replace => "±replace".magenta().to_string(),
            ChangeType::Delete => "-delete".red().to_string(),
            ChangeType::Keep => "keep".dimmed().to_string(),
        }
    }

    fn format_status(status: ExecutionStatus) -> String {
        match status {
            ExecutionStatus::Succeeded => status.to_string().green().to_string(),
            ExecutionStatus::Skipped => status.to_string().yellow().to_string(),
            ExecutionStatus::Failed => status.to_string().red().to_string(),
        }
    }

    /// Truncates a string to at most `max_len` characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}

fn short(fingerprint: &str) -> &str {
    fingerprint.get(..8).unwrap_or(fingerprint)
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

#[derive(Serialize)]
struct WorkflowJson<'a> {
    workflow: &'a str,
    visited: &'a [String],
    counts: ChangeCounts,
    report: &'a ExecutionReport,
}
