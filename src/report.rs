//! Report aggregation and artifact output
//!
//! A [`BatchReport`] is rendered fully in memory and written with a single call, so a
//! failed run never leaves a half-written artifact behind.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::{BatchError, Result};
use crate::validator::{ValidationResult, ValidationStatus};

/// Artifact format
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// Comma-separated rows, one per file
    #[default]
    Csv,
    /// Plain-text log listing only files with diagnostics
    Text,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Csv => "csv",
            ReportFormat::Text => "txt",
        }
    }
}

/// Valid/invalid counts; unreadable files count as invalid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Summary {
    pub valid_count: usize,
    pub invalid_count: usize,
}

impl Summary {
    pub fn total(&self) -> usize {
        self.valid_count + self.invalid_count
    }

    pub fn all_valid(&self) -> bool {
        self.invalid_count == 0
    }
}

/// Results of one batch, in discovery order
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub batch_name: String,
    pub generated_at: DateTime<Local>,
    pub results: Vec<ValidationResult>,
    pub summary: Summary,
}

/// Fold per-file results into a report
pub fn aggregate(
    batch_name: &str,
    results: Vec<ValidationResult>,
    generated_at: DateTime<Local>,
) -> BatchReport {
    let summary = results
        .iter()
        .fold(Summary::default(), |mut summary, result| {
            match result.status {
                ValidationStatus::Valid => summary.valid_count += 1,
                ValidationStatus::Invalid | ValidationStatus::Unreadable => {
                    summary.invalid_count += 1
                }
            }
            summary
        });

    BatchReport {
        batch_name: batch_name.to_string(),
        generated_at,
        results,
        summary,
    }
}

impl BatchReport {
    /// File name of the artifact for this report
    pub fn artifact_name(&self, format: ReportFormat) -> String {
        format!(
            "validate_xml-{}-{}.{}",
            self.batch_name,
            self.generated_at.format("%Y%m%d_%H%M%S"),
            format.extension()
        )
    }

    pub fn render(&self, format: ReportFormat) -> String {
        match format {
            ReportFormat::Csv => self.render_csv(),
            ReportFormat::Text => self.render_text(),
        }
    }

    /// `filename,valid,error` rows with CRLF terminators
    pub fn render_csv(&self) -> String {
        let mut out = String::from("filename,valid,error\r\n");
        for result in &self.results {
            let valid = if result.status.is_valid() {
                "valid"
            } else {
                "invalid"
            };
            let _ = write!(
                out,
                "{},{},{}\r\n",
                csv_field(&result.file_name),
                valid,
                csv_field(&result.error_text())
            );
        }
        out
    }

    pub fn render_text(&self) -> String {
        let mut out = format!(
            "[validate_xml log generated {}]\n\n",
            self.generated_at.format("%Y%m%dT%H:%M:%S")
        );
        for result in self.results.iter().filter(|r| !r.diagnostics.is_empty()) {
            out.push_str(&result.error_text());
            out.push_str("\n\n");
        }
        let _ = writeln!(out, "Validated successfully: {}", self.summary.valid_count);
        let _ = writeln!(out, "Validation errors: {}", self.summary.invalid_count);
        out
    }
}

/// Quote a field only when it contains a delimiter, quote or line break
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Retry policy for artifact writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// Additional attempts after the first failure
    pub retries: u32,
    pub retry_delay: Duration,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            retries: 2,
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// Render `report` and write it into `output_dir`, returning the artifact path
pub async fn write(
    report: &BatchReport,
    output_dir: &Path,
    format: ReportFormat,
    options: WriteOptions,
) -> Result<PathBuf> {
    let path = output_dir.join(report.artifact_name(format));
    let content = report.render(format);

    let mut attempt = 0;
    loop {
        match write_once(output_dir, &path, content.as_bytes()).await {
            Ok(()) => {
                tracing::info!("Report written to {}", path.display());
                return Ok(path);
            }
            Err((failed_path, source)) => {
                if attempt < options.retries {
                    attempt += 1;
                    tracing::warn!(
                        "Writing {} failed ({}), retry {}/{}",
                        failed_path.display(),
                        source,
                        attempt,
                        options.retries
                    );
                    tokio::time::sleep(options.retry_delay).await;
                    continue;
                }
                tracing::error!(
                    "Report could not be written to {}: {}; results are lost",
                    failed_path.display(),
                    source
                );
                return Err(BatchError::Write {
                    path: failed_path,
                    source,
                });
            }
        }
    }
}

async fn write_once(
    output_dir: &Path,
    path: &Path,
    content: &[u8],
) -> std::result::Result<(), (PathBuf, std::io::Error)> {
    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(|e| (output_dir.to_path_buf(), e))?;
    tokio::fs::write(path, content)
        .await
        .map_err(|e| (path.to_path_buf(), e))
}
