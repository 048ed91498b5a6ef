//! Console output
//!
//! Human-readable progress lines and the final run summary.

use crate::cli::VerbosityLevel;
use crate::error::BatchError;
use crate::progress::{ProgressEvent, ProgressObserver};
use crate::report::Summary;
use crate::runner::RunOutcome;

/// Console formatter, also usable as the run's progress observer
pub struct Output {
    verbosity: VerbosityLevel,
    show_colors: bool,
}

impl Output {
    pub fn new(verbosity: VerbosityLevel) -> Self {
        Self {
            verbosity,
            show_colors: atty::is(atty::Stream::Stdout),
        }
    }

    #[cfg(test)]
    fn plain(verbosity: VerbosityLevel) -> Self {
        Self {
            verbosity,
            show_colors: false,
        }
    }

    fn colorize(&self, text: &str, color: &str) -> String {
        if self.show_colors {
            format!("\x1b[{}m{}\x1b[0m", color, text)
        } else {
            text.to_string()
        }
    }

    pub fn format_outcome(&self, outcome: &RunOutcome) -> String {
        match outcome {
            RunOutcome::Completed { artifact, summary } => {
                let mut output = String::new();
                if self.verbosity > VerbosityLevel::Quiet {
                    output.push_str(&self.format_summary(summary));
                }
                output.push_str(&format!("  Report: {}\n", artifact.display()));
                output
            }
            RunOutcome::Failed(error) => self.format_failure(error),
        }
    }

    fn format_summary(&self, summary: &Summary) -> String {
        let mut output = String::new();
        output.push_str("Validation Summary:\n");
        output.push_str(&format!("  Total files: {}\n", summary.total()));
        output.push_str(&format!(
            "  {} {}\n",
            self.colorize("Valid:", "32"),
            summary.valid_count
        ));
        if summary.invalid_count > 0 {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Invalid:", "31"),
                summary.invalid_count
            ));
        }
        output
    }

    fn format_failure(&self, error: &BatchError) -> String {
        let mut output = format!("{} {}\n", self.colorize("✗ FAILED", "31"), error);
        if let BatchError::Cancelled {
            partial_report: Some(path),
            ..
        } = error
        {
            output.push_str(&format!("  Partial report: {}\n", path.display()));
        }
        output
    }

    /// Console line for a progress event, if this verbosity shows it
    pub fn format_progress(&self, event: &ProgressEvent) -> Option<String> {
        if self.verbosity < VerbosityLevel::Verbose {
            return None;
        }
        match event {
            ProgressEvent::StateChanged(_) => None,
            ProgressEvent::Examining { file_name } => Some(format!("Examining {}", file_name)),
            ProgressEvent::Validated {
                file_name,
                completed,
                total,
            } => Some(format!(
                "{} [{}/{}] {}",
                self.colorize("Validated", "36"),
                completed,
                total,
                file_name
            )),
        }
    }
}

impl ProgressObserver for Output {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::StateChanged(state) => tracing::info!("Phase: {:?}", state),
            ProgressEvent::Examining { file_name } => tracing::debug!("Examining {}", file_name),
            ProgressEvent::Validated { file_name, .. } => {
                tracing::debug!("Validated {}", file_name)
            }
        }
        if let Some(line) = self.format_progress(event) {
            println!("{}", line);
        }
    }
}
