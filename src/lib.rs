//! # batch-validate-xml Library
//!
//! Validates every pattern-selected XML file under a batch folder against a single XML
//! Schema, concurrently, and writes one CSV or plain-text report per run.

pub mod cli;
pub mod config;
pub mod error;
pub mod file_discovery;
pub mod libxml2;
pub mod output;
pub mod progress;
pub mod report;
pub mod runner;
pub mod schema_loader;
pub mod validator;

pub use cli::{Cli, VerbosityLevel};
pub use config::{Config, ConfigError, ConfigManager, EnvProvider, SystemEnvProvider};
pub use error::{BatchError, FailureKind, LibXml2Error, SchemaLoadError};
pub use file_discovery::{DEFAULT_PATTERN, FileEntry, FileLocator};
pub use libxml2::{LibXml2Wrapper, XmlSchemaPtr};
pub use output::Output;
pub use progress::{CancellationToken, NoopObserver, ProgressEvent, ProgressObserver};
pub use report::{BatchReport, ReportFormat, Summary, WriteOptions};
pub use runner::{BatchConfig, BatchRunner, RunOutcome, RunState};
pub use schema_loader::{Schema, SchemaLoader};
pub use validator::{
    Diagnostic, SchemaValidator, Severity, ValidationConfig, ValidationEngine, ValidationResult,
    ValidationRun, ValidationStatus,
};
