use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Terminal failure of a batch run
///
/// Every variant aborts the run. Per-file problems (unreadable documents, schema
/// violations) are never raised through this type; they become report rows.
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Batch folder not found: {path}")]
    PathNotFound { path: PathBuf },

    #[error("Invalid regular expression '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Directory traversal failed: {path} - {source}")]
    Traversal {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    SchemaLoad(#[from] SchemaLoadError),

    #[error("Report could not be written to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Run cancelled after {completed} of {total} files")]
    Cancelled {
        completed: usize,
        total: usize,
        partial_report: Option<PathBuf>,
    },

    #[error("A batch run is already in progress")]
    Busy,

    #[error("Concurrent operation error: {details}")]
    Concurrency { details: String },
}

impl BatchError {
    /// Taxonomy kind of this failure
    pub fn kind(&self) -> FailureKind {
        match self {
            BatchError::PathNotFound { .. } => FailureKind::PathNotFound,
            BatchError::InvalidPattern { .. } => FailureKind::InvalidPattern,
            BatchError::Traversal { .. } => FailureKind::Traversal,
            BatchError::SchemaLoad(_) => FailureKind::SchemaLoad,
            BatchError::Write { .. } => FailureKind::Write,
            BatchError::Cancelled { .. } => FailureKind::Cancelled,
            BatchError::Busy => FailureKind::Busy,
            BatchError::Concurrency { .. } => FailureKind::Concurrency,
        }
    }
}

/// Schema loading errors
#[derive(Error, Debug)]
pub enum SchemaLoadError {
    #[error("Schema could not be read: {path} - {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Schema is not a valid XML Schema: {path} - {details}")]
    Malformed { path: PathBuf, details: String },
}

/// LibXML2-specific error types
#[derive(Error, Debug)]
pub enum LibXml2Error {
    #[error("Schema parsing failed: {details}")]
    SchemaParseFailed { details: String },

    #[error("Parser context creation failed")]
    ParserContextCreationFailed,

    #[error("Validation context creation failed")]
    ValidationContextCreationFailed,

    #[error("Path is not representable as a C string: {path}")]
    InvalidPath { path: PathBuf },

    #[error("Document too large for libxml2: {size} bytes")]
    DocumentTooLarge { size: usize },
}

/// Kind of terminal failure, as reported through run state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    PathNotFound,
    InvalidPattern,
    Traversal,
    SchemaLoad,
    Write,
    Cancelled,
    Busy,
    Concurrency,
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, BatchError>;

/// LibXML2 result type alias
pub type LibXml2Result<T> = std::result::Result<T, LibXml2Error>;
