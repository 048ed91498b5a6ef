use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::report::ReportFormat;

/// Verbosity levels for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum VerbosityLevel {
    /// Only warnings, errors and the final result
    Quiet,
    /// Phase transitions and the summary
    #[default]
    Normal,
    /// Every examined and validated file
    Verbose,
}

impl VerbosityLevel {
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        if quiet {
            VerbosityLevel::Quiet
        } else if verbose {
            VerbosityLevel::Verbose
        } else {
            VerbosityLevel::Normal
        }
    }

    /// Default log filter directive when `RUST_LOG` is not set
    pub fn log_directive(&self) -> &'static str {
        match self {
            VerbosityLevel::Quiet => "warn",
            VerbosityLevel::Normal => "info",
            VerbosityLevel::Verbose => "debug",
        }
    }
}

/// Validate a batch folder of XML files against one XML Schema
#[derive(Parser, Debug, Clone)]
#[command(name = "batch-validate-xml")]
#[command(about = "Validate every matching XML file under a batch folder against one XSD")]
#[command(version)]
pub struct Cli {
    /// Batch folder to scan recursively
    pub root: PathBuf,

    /// XML Schema (.xsd) every file is validated against
    #[arg(short = 's', long = "schema")]
    pub schema: Option<PathBuf>,

    /// Regular expression searched for in each base filename
    #[arg(short = 'p', long = "pattern")]
    pub pattern: Option<String>,

    /// Directory the report is written to [default: ./logs]
    #[arg(short = 'o', long = "output-dir")]
    pub output_dir: Option<PathBuf>,

    /// Report format [default: csv]
    #[arg(short = 'f', long = "format", value_enum)]
    pub format: Option<ReportFormat>,

    /// Number of concurrent validations
    #[arg(short = 't', long = "threads")]
    pub threads: Option<usize>,

    /// Descend into symlinked directories
    #[arg(long = "follow-symlinks")]
    pub follow_symlinks: bool,

    /// Write the completed results when the run is interrupted
    #[arg(long = "partial-on-cancel")]
    pub partial_on_cancel: bool,

    /// Extra attempts when writing the report fails
    #[arg(long = "write-retries")]
    pub write_retries: Option<u32>,

    /// Configuration file (TOML or JSON)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Quiet mode (warnings and result only)
    #[arg(short = 'q', long = "quiet", conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(threads) = self.threads
            && threads == 0
        {
            return Err("Number of threads must be greater than 0".to_string());
        }
        if let Some(pattern) = &self.pattern
            && pattern.is_empty()
        {
            return Err("Filename pattern must not be empty".to_string());
        }
        Ok(())
    }
}
