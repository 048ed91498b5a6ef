#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::TempDir;

use batch_validate_xml::{BatchConfig, ProgressEvent, ProgressObserver};

/// Schema requiring `title` before `date` inside `record`
pub const RECORD_XSD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
    <xs:element name="record">
        <xs:complexType>
            <xs:sequence>
                <xs:element name="title" type="xs:string"/>
                <xs:element name="date" type="xs:date"/>
            </xs:sequence>
        </xs:complexType>
    </xs:element>
</xs:schema>"#;

pub const VALID_RECORD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<record>
    <title>Annual report</title>
    <date>2023-12-31</date>
</record>
"#;

/// `date` appears before `title` on line 3
pub const OUT_OF_ORDER_RECORD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<record>
    <date>2023-12-31</date>
    <title>Annual report</title>
</record>
"#;

/// `title` is never closed
pub const MALFORMED_RECORD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<record>
    <title>Annual report
    <date>2023-12-31</date>
</record>
"#;

/// Temporary batch folder, schema and output directory
pub struct BatchFixture {
    pub dir: TempDir,
    pub root: PathBuf,
    pub schema: PathBuf,
    pub output_dir: PathBuf,
}

impl BatchFixture {
    pub fn new(batch_name: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join(batch_name);
        std::fs::create_dir_all(&root).unwrap();
        let schema = dir.path().join("record.xsd");
        std::fs::write(&schema, RECORD_XSD).unwrap();
        let output_dir = dir.path().join("logs");

        Self {
            dir,
            root,
            schema,
            output_dir,
        }
    }

    /// Write `content` at `relative` under the batch root, creating parents
    pub fn add_file(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    pub fn config(&self) -> BatchConfig {
        let mut config = BatchConfig::new(&self.root, &self.schema);
        config.output_dir = self.output_dir.clone();
        config.threads = 4;
        config
    }

    /// Files currently in the output directory
    pub fn artifacts(&self) -> Vec<PathBuf> {
        list_files(&self.output_dir)
    }
}

pub fn list_files(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(entries) => {
            let mut files: Vec<PathBuf> = entries.map(|e| e.unwrap().path()).collect();
            files.sort();
            files
        }
        Err(_) => Vec::new(),
    }
}

/// Observer that records every event
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    pub fn examined(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, ProgressEvent::Examining { .. }))
            .count()
    }
}

impl ProgressObserver for RecordingObserver {
    fn on_progress(&self, event: &ProgressEvent) {
        self.events.lock().push(event.clone());
    }
}
