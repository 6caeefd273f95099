//! Styled console output for the CLI

use console::style;

use crate::storage::{RunState, Snapshot};

/// Output handler for consistent CLI formatting
pub struct Output {
    verbose: bool,
    quiet: bool,
}

impl Output {
    pub fn new(verbose: bool, quiet: bool) -> Self {
        Self { verbose, quiet }
    }

    pub fn success(&self, message: &str) {
        if !self.quiet {
            println!("{} {}", style("✔").green(), message);
        }
    }

    /// Errors are shown even in quiet mode
    pub fn error(&self, message: &str) {
        eprintln!("{} {}", style("✖").red(), message);
    }

    pub fn warning(&self, message: &str) {
        if !self.quiet {
            println!("{} {}", style("⚠").yellow(), message);
        }
    }

    pub fn info(&self, message: &str) {
        if !self.quiet {
            println!("{} {}", style("ℹ").blue(), message);
        }
    }

    pub fn verbose(&self, message: &str) {
        if self.verbose && !self.quiet {
            println!("{} {}", style("ℹ").dim(), style(message).dim());
        }
    }

    pub fn header(&self, title: &str) {
        if !self.quiet {
            println!("\n{}", style(title).bold().underlined());
        }
    }

    pub fn table_row(&self, key: &str, value: &str) {
        if !self.quiet {
            println!("  {:<16} {}", style(key).dim(), value);
        }
    }

    /// Print the lifecycle record of a report run
    pub fn snapshot(&self, snapshot: &Snapshot) {
        let state = snapshot.status.run_state;
        let styled_state = match state {
            RunState::Delivered | RunState::Generated => style(state.to_string()).green().bold(),
            RunState::PartialError => style(state.to_string()).yellow().bold(),
            RunState::Failure => style(state.to_string()).red().bold(),
            RunState::Preparing => style(state.to_string()).dim(),
        };

        self.header("Report snapshot");
        self.table_row("Report ID", &snapshot.report_id);
        self.table_row("Scan config", &snapshot.scan_config_id);
        self.table_row("Run state", &styled_state.to_string());
        if let Some(completed_at) = snapshot.status.completed_at {
            self.table_row("Completed at", &completed_at.to_rfc3339());
        }
        if !snapshot.status.error_msg.is_empty() {
            self.table_row("Error", &snapshot.status.error_msg);
        }
        for failed in &snapshot.failed_clusters {
            self.table_row("Failed cluster", &failed.cluster_id);
        }
    }
}
