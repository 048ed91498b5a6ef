use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::SchemaLoadError;
use crate::libxml2::{LibXml2Wrapper, XmlSchemaPtr};

/// A compiled XML Schema, loaded once per run and shared by every worker
#[derive(Debug, Clone)]
pub struct Schema {
    compiled: XmlSchemaPtr,
    path: PathBuf,
}

impl Schema {
    /// File the schema was compiled from
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn compiled(&self) -> &XmlSchemaPtr {
        &self.compiled
    }
}

/// Loads and compiles schema files
#[derive(Clone)]
pub struct SchemaLoader {
    libxml2_wrapper: Arc<LibXml2Wrapper>,
}

impl SchemaLoader {
    pub fn new() -> Self {
        Self {
            libxml2_wrapper: Arc::new(LibXml2Wrapper::new()),
        }
    }

    /// Read and compile the schema at `schema_path`
    ///
    /// Compilation runs on a blocking thread; includes and imports are resolved
    /// relative to the schema file.
    pub async fn load(&self, schema_path: &Path) -> Result<Schema, SchemaLoadError> {
        let schema_data =
            tokio::fs::read(schema_path)
                .await
                .map_err(|source| SchemaLoadError::Unreadable {
                    path: schema_path.to_path_buf(),
                    source,
                })?;

        check_schema_content(&schema_data).map_err(|details| SchemaLoadError::Malformed {
            path: schema_path.to_path_buf(),
            details: details.to_string(),
        })?;

        let wrapper = Arc::clone(&self.libxml2_wrapper);
        let path = schema_path.to_path_buf();
        let compiled = tokio::task::spawn_blocking(move || wrapper.parse_schema_file(&path))
            .await
            .map_err(|e| SchemaLoadError::Malformed {
                path: schema_path.to_path_buf(),
                details: format!("Schema compilation task failed: {}", e),
            })?
            .map_err(|e| SchemaLoadError::Malformed {
                path: schema_path.to_path_buf(),
                details: e.to_string(),
            })?;

        tracing::info!("Loaded schema {}", schema_path.display());
        Ok(Schema {
            compiled,
            path: schema_path.to_path_buf(),
        })
    }
}

impl Default for SchemaLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Cheap rejection of content that cannot be a schema document
fn check_schema_content(data: &[u8]) -> Result<(), &'static str> {
    let data = data.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(data);
    match data.iter().find(|b| !b.is_ascii_whitespace()) {
        None => Err("Schema file is empty"),
        Some(b'<') => Ok(()),
        Some(_) => Err("Schema content does not appear to be XML"),
    }
}
