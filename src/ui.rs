//! Interactive UI contract.
//!
//! The engine never writes to the terminal directly. Plans, progress lines
//! and confirmations go through a [`Ui`], which keeps the core testable and
//! lets the binary decide how output looks.

use colored::Colorize;
use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::Result;

/// Spaces per indent level.
pub(crate) const INDENT_WIDTH: usize = 2;

/// Operator-facing output and confirmation.
pub trait Ui: Send + Sync {
    /// Writes one line at the current indent.
    fn write(&self, line: &str);

    /// Shows a rendered plan, one change per line.
    fn render_plan(&self, plan: &str);

    /// Asks a yes/no question.
    ///
    /// # Errors
    ///
    /// Returns an error if the answer cannot be read.
    fn confirm(&self, prompt: &str) -> Result<bool>;

    /// Increases the indent of subsequent lines.
    fn indent(&self);

    /// Decreases the indent of subsequent lines.
    fn unindent(&self);
}

/// Terminal UI writing to stderr and reading answers from stdin.
#[derive(Debug, Default)]
pub struct ConsoleUi {
    auto_approve: bool,
    depth: AtomicUsize,
}

impl ConsoleUi {
    /// Creates a console UI. With `auto_approve` every question is answered yes.
    #[must_use]
    pub const fn new(auto_approve: bool) -> Self {
        Self {
            auto_approve,
            depth: AtomicUsize::new(0),
        }
    }

    fn padding(&self) -> String {
        " ".repeat(self.depth.load(Ordering::SeqCst) * INDENT_WIDTH)
    }

    fn colorize(line: &str) -> String {
        match line.split_whitespace().next() {
            Some("Create") => line.green().to_string(),
            Some("Update") => line.yellow().to_string(),
            Some("Replace") => line.magenta().to_string(),
            Some("Delete") => line.red().to_string(),
            _ => line.to_string(),
        }
    }
}

impl Ui for ConsoleUi {
    fn write(&self, line: &str) {
        eprintln!("{}{line}", self.padding());
    }

    fn render_plan(&self, plan: &str) {
        let padding = self.padding();
        for line in plan.lines() {
            eprintln!("{padding}{}", Self::colorize(line));
        }
    }

    fn confirm(&self, prompt: &str) -> Result<bool> {
        if self.auto_approve {
            eprintln!("{}{prompt} [y/N]: y (auto-approved)", self.padding());
            return Ok(true);
        }

        eprint!("{}{prompt} [y/N]: ", self.padding());
        std::io::stderr().flush()?;

        let mut input = String::new();
        std::io::stdin().lock().read_line(&mut input)?;

        Ok(matches!(input.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
    }

    fn indent(&self) {
        self.depth.fetch_add(1, Ordering::SeqCst);
    }

    fn unindent(&self) {
        // Saturating: an unbalanced unindent stays at the left margin.
        let _ = self
            .depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| Some(d.saturating_sub(1)));
    }
}
