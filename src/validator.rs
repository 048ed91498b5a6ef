//! Per-file validation and the bounded validation pool
//!
//! - **Sync CPU-bound work**: parsing and schema checking run in libxml2 on blocking threads
//! - **Bounded concurrency**: a semaphore limits in-flight validations
//! - **Ordered results**: every worker reports its input index, and results are stored by
//!   that index, so output order never depends on completion order

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, mpsc};

use crate::error::{BatchError, Result};
use crate::file_discovery::FileEntry;
use crate::libxml2::{DocumentCheck, LibXml2Wrapper};
use crate::progress::{CancellationToken, ProgressEvent};
use crate::schema_loader::Schema;

/// Severity of a diagnostic, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
    Fatal,
}

impl Severity {
    /// Map a libxml2 `xmlErrorLevel`
    pub fn from_level(level: i32) -> Self {
        match level {
            3 => Severity::Fatal,
            2 => Severity::Error,
            _ => Severity::Warning,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One structured complaint raised while reading or checking a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub line: u32,
    pub column: u32,
    pub severity: Severity,
    pub domain: String,
    pub message: String,
}

impl Diagnostic {
    /// Diagnostic for a file that could not be read at all
    pub fn io(error: &std::io::Error) -> Self {
        Diagnostic {
            line: 0,
            column: 0,
            severity: Severity::Fatal,
            domain: "IO".to_string(),
            message: error.to_string(),
        }
    }

    /// Whether this diagnostic makes a document invalid (warnings do not)
    pub fn is_invalidating(&self) -> bool {
        self.severity >= Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}: {}",
            self.line, self.column, self.severity, self.domain, self.message
        )
    }
}

/// Status of a single file validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    /// Parsed and conforms to the schema
    Valid,
    /// Parsed but violates the schema
    Invalid,
    /// Could not be read or is not well-formed XML
    Unreadable,
}

impl ValidationStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationStatus::Valid)
    }
}

/// Result of validating a single file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub file_name: String,
    pub path: PathBuf,
    pub status: ValidationStatus,
    /// Diagnostics in the order the engine raised them
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    pub fn valid(entry: &FileEntry) -> Self {
        Self::with_status(entry, ValidationStatus::Valid, Vec::new())
    }

    pub fn invalid(entry: &FileEntry, diagnostics: Vec<Diagnostic>) -> Self {
        Self::with_status(entry, ValidationStatus::Invalid, diagnostics)
    }

    pub fn unreadable(entry: &FileEntry, diagnostic: Diagnostic) -> Self {
        Self::with_status(entry, ValidationStatus::Unreadable, vec![diagnostic])
    }

    fn with_status(
        entry: &FileEntry,
        status: ValidationStatus,
        diagnostics: Vec<Diagnostic>,
    ) -> Self {
        Self {
            file_name: entry.file_name.clone(),
            path: entry.path.clone(),
            status,
            diagnostics,
        }
    }

    /// Build the result for a document the schema engine checked
    ///
    /// A non-zero engine code with no error-level diagnostic still invalidates the
    /// document; a synthesized diagnostic records why.
    pub fn checked(entry: &FileEntry, code: i32, mut diagnostics: Vec<Diagnostic>) -> Self {
        if diagnostics.iter().any(Diagnostic::is_invalidating) {
            return Self::invalid(entry, diagnostics);
        }
        if code == 0 {
            return Self::with_status(entry, ValidationStatus::Valid, diagnostics);
        }

        let message = if code < 0 {
            format!("validation generated an internal error (code {})", code)
        } else {
            format!("{} validation error(s) reported without details", code)
        };
        diagnostics.push(Diagnostic {
            line: 0,
            column: 0,
            severity: Severity::Error,
            domain: "SCHEMASV".to_string(),
            message,
        });
        Self::invalid(entry, diagnostics)
    }

    /// Diagnostics rendered one per line, each prefixed with the file path
    ///
    /// Lines read `path:line:column:LEVEL:DOMAIN: message`. The libxml2 error code is
    /// not carried into [`Diagnostic`], so there is no error-type field between the
    /// domain and the message.
    pub fn error_text(&self) -> String {
        self.diagnostics
            .iter()
            .map(|d| format!("{}:{}", self.path.display(), d))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Validates documents against a loaded schema
#[derive(Clone)]
pub struct SchemaValidator {
    libxml2_wrapper: Arc<LibXml2Wrapper>,
}

impl SchemaValidator {
    pub fn new() -> Self {
        Self {
            libxml2_wrapper: Arc::new(LibXml2Wrapper::new()),
        }
    }

    /// Validate one file; never fails, problems become the result's status
    ///
    /// Blocking: reads the file and runs libxml2 on the calling thread.
    pub fn validate(&self, schema: &Schema, entry: &FileEntry) -> ValidationResult {
        let content = match std::fs::read(&entry.path) {
            Ok(content) => content,
            Err(e) => return ValidationResult::unreadable(entry, Diagnostic::io(&e)),
        };

        match self
            .libxml2_wrapper
            .check_document(schema.compiled(), &content, &entry.path)
        {
            Ok(DocumentCheck::NotWellFormed(diagnostic)) => {
                ValidationResult::unreadable(entry, diagnostic)
            }
            Ok(DocumentCheck::Checked { code, diagnostics }) => {
                ValidationResult::checked(entry, code, diagnostics)
            }
            Err(e) => ValidationResult::unreadable(
                entry,
                Diagnostic {
                    line: 0,
                    column: 0,
                    severity: Severity::Fatal,
                    domain: "NONE".to_string(),
                    message: e.to_string(),
                },
            ),
        }
    }
}

impl Default for SchemaValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Validation pool configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationConfig {
    /// Number of concurrent validations
    pub max_concurrent_validations: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_concurrent_validations: num_cpus::get(),
        }
    }
}

/// Results of the validation phase
#[derive(Debug, Clone)]
pub struct ValidationRun {
    /// One result per dispatched entry, in input order
    pub results: Vec<ValidationResult>,
    /// Dispatch stopped early because cancellation was requested
    pub cancelled: bool,
}

/// Runs validations concurrently while keeping results in input order
pub struct ValidationEngine {
    validator: SchemaValidator,
    config: ValidationConfig,
}

impl ValidationEngine {
    pub fn new(config: ValidationConfig) -> Self {
        Self {
            validator: SchemaValidator::new(),
            config,
        }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Validate `entries` against `schema`
    ///
    /// Cancellation is checked before each dispatch; once requested, no further file
    /// is started, in-flight validations finish, and the completed prefix is returned.
    pub async fn validate_files(
        &self,
        schema: &Schema,
        entries: &[FileEntry],
        progress: Option<mpsc::UnboundedSender<ProgressEvent>>,
        cancel: &CancellationToken,
    ) -> Result<ValidationRun> {
        let total = entries.len();
        let completed = Arc::new(AtomicUsize::new(0));
        let semaphore = Arc::new(Semaphore::new(
            self.config.max_concurrent_validations.max(1),
        ));

        let mut tasks = Vec::with_capacity(total);
        let mut cancelled = false;

        for (index, entry) in entries.iter().enumerate() {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| BatchError::Concurrency {
                    details: format!("Failed to acquire validation semaphore: {}", e),
                })?;

            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let validator = self.validator.clone();
            let schema = schema.clone();
            let entry = entry.clone();
            let progress = progress.clone();
            let completed = Arc::clone(&completed);

            tasks.push(tokio::task::spawn_blocking(move || {
                let _permit = permit;
                let result = validator.validate(&schema, &entry);
                tracing::debug!(file = %entry.path.display(), status = ?result.status, "Validated");

                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(progress) = progress {
                    let _ = progress.send(ProgressEvent::Validated {
                        file_name: entry.file_name,
                        completed: done,
                        total,
                    });
                }
                (index, result)
            }));
        }

        let mut slots: Vec<Option<ValidationResult>> = vec![None; tasks.len()];
        for joined in join_all(tasks).await {
            let (index, result) = joined.map_err(|e| BatchError::Concurrency {
                details: format!("Task join error: {}", e),
            })?;
            slots[index] = Some(result);
        }

        let results = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| BatchError::Concurrency {
                    details: format!("No result recorded for file #{}", index),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ValidationRun { results, cancelled })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema_loader::SchemaLoader;
    use tempfile::TempDir;

    const SCHEMA: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
    <xs:element name="root">
        <xs:complexType>
            <xs:sequence>
                <xs:element name="element" type="xs:string"/>
            </xs:sequence>
        </xs:complexType>
    </xs:element>
</xs:schema>"#;

    const VALID: &str = "<root>\n    <element>content</element>\n</root>\n";
    const INVALID: &str = "<root>\n    <wrong>content</wrong>\n</root>\n";
    const MALFORMED: &str = "<root>\n    <element>content</element>\n";

    async fn setup(files: &[(&str, &str)]) -> (TempDir, Schema, Vec<FileEntry>) {
        let temp_dir = TempDir::new().unwrap();
        let schema_path = temp_dir.path().join("schema.xsd");
        std::fs::write(&schema_path, SCHEMA).unwrap();
        let schema = SchemaLoader::new().load(&schema_path).await.unwrap();

        let entries = files
            .iter()
            .map(|(name, content)| {
                let path = temp_dir.path().join(name);
                std::fs::write(&path, content).unwrap();
                FileEntry::new(path)
            })
            .collect();
        (temp_dir, schema, entries)
    }

    fn entry(name: &str) -> FileEntry {
        FileEntry::new(PathBuf::from(format!("/batch/{}", name)))
    }

    #[test]
    fn test_severity_ordering_and_levels() {
        assert!(Severity::Fatal > Severity::Error);
        assert!(Severity::Error > Severity::Warning);
        assert_eq!(Severity::from_level(1), Severity::Warning);
        assert_eq!(Severity::from_level(2), Severity::Error);
        assert_eq!(Severity::from_level(3), Severity::Fatal);
    }

    #[test]
    fn test_warnings_do_not_invalidate() {
        let warning = Diagnostic {
            line: 2,
            column: 0,
            severity: Severity::Warning,
            domain: "SCHEMASV".to_string(),
            message: "deprecated".to_string(),
        };
        let result = ValidationResult::checked(&entry("a.xml"), 0, vec![warning.clone()]);
        assert_eq!(result.status, ValidationStatus::Valid);
        assert_eq!(result.diagnostics, vec![warning]);
    }

    #[test]
    fn test_nonzero_code_without_errors_invalidates() {
        let result = ValidationResult::checked(&entry("a.xml"), -1, vec![]);
        assert_eq!(result.status, ValidationStatus::Invalid);
        assert_eq!(result.diagnostics.len(), 1);
        assert!(result.diagnostics[0].message.contains("internal error"));
    }

    #[test]
    fn test_error_text_format() {
        let result = ValidationResult::invalid(
            &entry("b.xml"),
            vec![Diagnostic {
                line: 4,
                column: 0,
                severity: Severity::Error,
                domain: "SCHEMASV".to_string(),
                message: "Element 'b': This element is not expected.".to_string(),
            }],
        );
        assert_eq!(
            result.error_text(),
            "/batch/b.xml:4:0:ERROR:SCHEMASV: Element 'b': This element is not expected."
        );
        assert_eq!(ValidationResult::valid(&entry("a.xml")).error_text(), "");
    }

    #[test]
    fn test_error_text_header_fields() {
        let result = ValidationResult::unreadable(
            &entry("c.xml"),
            Diagnostic {
                line: 3,
                column: 1,
                severity: Severity::Fatal,
                domain: "PARSER".to_string(),
                message: "Premature end of data: tag root line 1".to_string(),
            },
        );
        let text = result.error_text();
        let (header, message) = text.split_once(": ").unwrap();

        assert_eq!(
            header.split(':').collect::<Vec<_>>(),
            vec!["/batch/c.xml", "3", "1", "FATAL", "PARSER"]
        );
        assert_eq!(message, "Premature end of data: tag root line 1");
    }

    #[tokio::test]
    async fn test_validate_valid_invalid_malformed() {
        let (_dir, schema, entries) = setup(&[
            ("a.xml", VALID),
            ("b.xml", INVALID),
            ("c.xml", MALFORMED),
        ])
        .await;
        let validator = SchemaValidator::new();

        let a = validator.validate(&schema, &entries[0]);
        assert_eq!(a.status, ValidationStatus::Valid);
        assert!(a.diagnostics.is_empty());

        let b = validator.validate(&schema, &entries[1]);
        assert_eq!(b.status, ValidationStatus::Invalid);
        assert_eq!(b.diagnostics[0].line, 2);
        assert!(b.diagnostics[0].message.contains("wrong"));

        let c = validator.validate(&schema, &entries[2]);
        assert_eq!(c.status, ValidationStatus::Unreadable);
        assert_eq!(c.diagnostics.len(), 1);
        assert_eq!(c.diagnostics[0].domain, "PARSER");
    }

    #[tokio::test]
    async fn test_missing_file_is_unreadable() {
        let (_dir, schema, _) = setup(&[]).await;
        let result = SchemaValidator::new().validate(&schema, &entry("gone.xml"));

        assert_eq!(result.status, ValidationStatus::Unreadable);
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].domain, "IO");
    }

    #[tokio::test]
    async fn test_engine_preserves_input_order() {
        let files: Vec<(String, &str)> = (0..40)
            .map(|i| {
                let content = match i % 3 {
                    0 => VALID,
                    1 => INVALID,
                    _ => MALFORMED,
                };
                (format!("f{:02}.xml", i), content)
            })
            .collect();
        let borrowed: Vec<(&str, &str)> = files.iter().map(|(n, c)| (n.as_str(), *c)).collect();
        let (_dir, schema, entries) = setup(&borrowed).await;

        let engine = ValidationEngine::new(ValidationConfig {
            max_concurrent_validations: 4,
        });
        let run = engine
            .validate_files(&schema, &entries, None, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!run.cancelled);
        assert_eq!(run.results.len(), 40);
        for (i, result) in run.results.iter().enumerate() {
            assert_eq!(result.file_name, format!("f{:02}.xml", i));
            let expected = match i % 3 {
                0 => ValidationStatus::Valid,
                1 => ValidationStatus::Invalid,
                _ => ValidationStatus::Unreadable,
            };
            assert_eq!(result.status, expected);
        }
    }

    #[tokio::test]
    async fn test_engine_reports_progress() {
        let (_dir, schema, entries) = setup(&[("a.xml", VALID), ("b.xml", INVALID)]).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let engine = ValidationEngine::new(ValidationConfig::default());
        engine
            .validate_files(&schema, &entries, Some(tx), &CancellationToken::new())
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| matches!(
            e,
            ProgressEvent::Validated { total: 2, .. }
        )));
    }

    #[tokio::test]
    async fn test_engine_cancelled_before_dispatch() {
        let (_dir, schema, entries) = setup(&[("a.xml", VALID), ("b.xml", VALID)]).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let run = ValidationEngine::new(ValidationConfig::default())
            .validate_files(&schema, &entries, None, &cancel)
            .await
            .unwrap();

        assert!(run.cancelled);
        assert!(run.results.is_empty());
    }

    #[tokio::test]
    async fn test_engine_empty_input() {
        let (_dir, schema, _) = setup(&[]).await;
        let run = ValidationEngine::new(ValidationConfig::default())
            .validate_files(&schema, &[], None, &CancellationToken::new())
            .await
            .unwrap();

        assert!(run.results.is_empty());
        assert!(!run.cancelled);
    }
}
