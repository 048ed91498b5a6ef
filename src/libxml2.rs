//! LibXML2 FFI Wrapper Module
//!
//! Safe wrappers around the handful of libxml2 entry points needed to compile one XML
//! Schema and validate documents against it with structured diagnostics.
//!
//! No mature pure Rust library performs XSD validation, so the schema engine is
//! libxml2, called directly through FFI.
//!
//! ## Thread Safety Strategy
//!
//! Following the libxml2 threading notes (http://xmlsoft.org/threads.html):
//!
//! - **Schema parsing** is NOT thread-safe and is serialized through a process-wide lock.
//! - **Document parsing and validation** are thread-safe as long as every thread uses its
//!   own parser and validation contexts, which every call here creates and frees.
//! - **Compiled schemas** are read-only after parsing and are shared through an `Arc`.

use std::ffi::{CStr, CString};
use std::marker::PhantomData;
use std::path::Path;
use std::ptr;
use std::sync::{Arc, Once};

use libc::{c_char, c_int, c_void};
use parking_lot::Mutex;

use crate::error::{LibXml2Error, LibXml2Result};
use crate::validator::{Diagnostic, Severity};

/// Global initialization flag for libxml2
///
/// libxml2's initialization functions are not thread-safe.
static LIBXML2_INIT: Once = Once::new();

/// Serializes `xmlSchemaParse`
static SCHEMA_PARSE_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// Parser options: XML_PARSE_NOERROR | XML_PARSE_NOWARNING | XML_PARSE_NONET
const DOCUMENT_PARSE_OPTIONS: c_int = 32 | 64 | 2048;

/// Opaque libxml2 structures
#[repr(C)]
pub struct XmlSchema {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlSchemaParserCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlSchemaValidCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlParserCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlDoc {
    _private: [u8; 0],
}

#[repr(C)]
pub struct xmlError {
    pub domain: c_int,
    pub code: c_int,
    pub message: *const c_char,
    pub level: c_int,
    pub file: *const c_char,
    pub line: c_int,
    pub str1: *const c_char,
    pub str2: *const c_char,
    pub str3: *const c_char,
    pub int1: c_int,
    /// Column number, when the reporting module tracks it
    pub int2: c_int,
    pub ctxt: *mut c_void,
    pub node: *mut c_void,
}

pub type XmlStructuredErrorFunc =
    Option<unsafe extern "C" fn(user_data: *mut c_void, error: *const xmlError)>;

// External libxml2 FFI declarations
#[cfg_attr(target_os = "windows", link(name = "libxml2"))]
#[cfg_attr(not(target_os = "windows"), link(name = "xml2"))]
unsafe extern "C" {
    pub fn xmlInitParser();

    // Document parsing
    pub fn xmlNewParserCtxt() -> *mut XmlParserCtxt;
    pub fn xmlFreeParserCtxt(ctxt: *mut XmlParserCtxt);
    pub fn xmlCtxtReadMemory(
        ctxt: *mut XmlParserCtxt,
        buffer: *const c_char,
        size: c_int,
        url: *const c_char,
        encoding: *const c_char,
        options: c_int,
    ) -> *mut XmlDoc;
    pub fn xmlCtxtGetLastError(ctx: *mut c_void) -> *const xmlError;
    pub fn xmlFreeDoc(doc: *mut XmlDoc);

    // Schema parsing functions
    pub fn xmlSchemaNewParserCtxt(url: *const c_char) -> *mut XmlSchemaParserCtxt;
    pub fn xmlSchemaSetParserStructuredErrors(
        ctxt: *mut XmlSchemaParserCtxt,
        serror: XmlStructuredErrorFunc,
        ctx: *mut c_void,
    );
    pub fn xmlSchemaParse(ctxt: *const XmlSchemaParserCtxt) -> *mut XmlSchema;
    pub fn xmlSchemaFreeParserCtxt(ctxt: *mut XmlSchemaParserCtxt);
    pub fn xmlSchemaFree(schema: *mut XmlSchema);

    // Schema validation functions
    pub fn xmlSchemaNewValidCtxt(schema: *const XmlSchema) -> *mut XmlSchemaValidCtxt;
    pub fn xmlSchemaFreeValidCtxt(ctxt: *mut XmlSchemaValidCtxt);
    pub fn xmlSchemaSetValidStructuredErrors(
        ctxt: *mut XmlSchemaValidCtxt,
        serror: XmlStructuredErrorFunc,
        ctx: *mut c_void,
    );
    pub fn xmlSchemaValidateDoc(ctxt: *mut XmlSchemaValidCtxt, doc: *mut XmlDoc) -> c_int;
}

/// Name of a libxml2 error domain: the `XML_FROM_*` constant without its prefix
pub fn domain_name(domain: c_int) -> &'static str {
    match domain {
        1 => "PARSER",
        2 => "TREE",
        3 => "NAMESPACE",
        4 => "DTD",
        6 => "MEMORY",
        8 => "IO",
        14 => "REGEXP",
        15 => "DATATYPE",
        16 => "SCHEMASP",
        17 => "SCHEMASV",
        23 => "VALID",
        27 => "I18N",
        30 => "URI",
        _ => "NONE",
    }
}

fn c_text(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    // Safety: libxml2 hands out NUL-terminated strings that live for the callback
    let text = unsafe { CStr::from_ptr(ptr) };
    Some(text.to_string_lossy().trim().to_string())
}

impl Diagnostic {
    /// Convert a libxml2 error record, copying every field out of libxml2 memory
    ///
    /// # Safety
    ///
    /// `error` must point to a valid `xmlError` for the duration of the call.
    unsafe fn from_raw(error: *const xmlError) -> Self {
        let error = unsafe { &*error };
        Diagnostic {
            line: error.line.max(0) as u32,
            column: error.int2.max(0) as u32,
            severity: Severity::from_level(error.level),
            domain: domain_name(error.domain).to_string(),
            message: c_text(error.message).unwrap_or_else(|| format!("error code {}", error.code)),
        }
    }
}

/// Callback for libxml2 to report schema parsing and validation errors (structured)
unsafe extern "C" fn structured_error_callback(user_data: *mut c_void, error: *const xmlError) {
    if user_data.is_null() || error.is_null() {
        return;
    }
    let diagnostics = unsafe { &mut *(user_data as *mut Vec<Diagnostic>) };
    diagnostics.push(unsafe { Diagnostic::from_raw(error) });
}

/// Thread-safe wrapper for a compiled libxml2 schema with proper resource management
#[derive(Debug)]
pub struct XmlSchemaPtr {
    inner: Arc<XmlSchemaInner>,
}

#[derive(Debug)]
struct XmlSchemaInner {
    ptr: *mut XmlSchema,
    _phantom: PhantomData<XmlSchema>,
}

// Safety: libxml2 xmlSchema structures are thread-safe for reading once parsed
unsafe impl Send for XmlSchemaInner {}
unsafe impl Sync for XmlSchemaInner {}

impl XmlSchemaPtr {
    /// # Safety
    ///
    /// The pointer must come from `xmlSchemaParse` and must not be freed elsewhere.
    unsafe fn from_raw(ptr: *mut XmlSchema) -> Option<Self> {
        if ptr.is_null() {
            return None;
        }
        Some(XmlSchemaPtr {
            inner: Arc::new(XmlSchemaInner {
                ptr,
                _phantom: PhantomData,
            }),
        })
    }

    pub(crate) fn as_ptr(&self) -> *const XmlSchema {
        self.inner.ptr
    }

    /// Number of live handles sharing this schema
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl Clone for XmlSchemaPtr {
    fn clone(&self) -> Self {
        XmlSchemaPtr {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Drop for XmlSchemaInner {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                xmlSchemaFree(self.ptr);
            }
            self.ptr = ptr::null_mut();
        }
    }
}

/// Parsed document, freed on drop
struct XmlDocPtr(*mut XmlDoc);

impl Drop for XmlDocPtr {
    fn drop(&mut self) {
        unsafe { xmlFreeDoc(self.0) }
    }
}

/// Parser context, freed on drop
struct ParserCtxtPtr(*mut XmlParserCtxt);

impl Drop for ParserCtxtPtr {
    fn drop(&mut self) {
        unsafe { xmlFreeParserCtxt(self.0) }
    }
}

/// Outcome of checking one in-memory document against a schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentCheck {
    /// The document is not well-formed; carries the parser's final error
    NotWellFormed(Diagnostic),
    /// The document parsed and was checked against the schema
    Checked {
        /// `xmlSchemaValidateDoc` return code: 0 valid, >0 violations, <0 internal error
        code: i32,
        diagnostics: Vec<Diagnostic>,
    },
}

/// LibXML2 wrapper providing safe access to schema compilation and validation
pub struct LibXml2Wrapper {
    _phantom: PhantomData<()>,
}

impl LibXml2Wrapper {
    /// Create a new wrapper, initializing libxml2 exactly once per process
    pub fn new() -> Self {
        LIBXML2_INIT.call_once(|| unsafe {
            xmlInitParser();
        });

        LibXml2Wrapper {
            _phantom: PhantomData,
        }
    }

    /// Compile the schema stored at `schema_path`
    ///
    /// Parsing from the file (rather than a buffer) lets libxml2 resolve relative
    /// `xs:include` and `xs:import` locations against the schema's own directory.
    pub fn parse_schema_file(&self, schema_path: &Path) -> LibXml2Result<XmlSchemaPtr> {
        let c_path = path_to_cstring(schema_path)?;
        let mut diagnostics: Vec<Diagnostic> = Vec::new();

        let _guard = SCHEMA_PARSE_LOCK.lock();
        let schema_ptr = unsafe {
            let parser_ctxt = xmlSchemaNewParserCtxt(c_path.as_ptr());
            if parser_ctxt.is_null() {
                return Err(LibXml2Error::ParserContextCreationFailed);
            }

            xmlSchemaSetParserStructuredErrors(
                parser_ctxt,
                Some(structured_error_callback),
                &mut diagnostics as *mut Vec<Diagnostic> as *mut c_void,
            );

            let schema = xmlSchemaParse(parser_ctxt);
            xmlSchemaFreeParserCtxt(parser_ctxt);
            schema
        };

        unsafe { XmlSchemaPtr::from_raw(schema_ptr) }.ok_or_else(|| {
            let details = if diagnostics.is_empty() {
                "libxml2 returned no schema".to_string()
            } else {
                diagnostics
                    .iter()
                    .map(|d| format!("{}:{}: {}", d.line, d.column, d.message))
                    .collect::<Vec<_>>()
                    .join("; ")
            };
            LibXml2Error::SchemaParseFailed { details }
        })
    }

    /// Parse `content` and validate it against `schema`
    ///
    /// `source` is used as the document URL in libxml2 messages. Safe to call
    /// concurrently: each call owns its parser and validation contexts.
    pub fn check_document(
        &self,
        schema: &XmlSchemaPtr,
        content: &[u8],
        source: &Path,
    ) -> LibXml2Result<DocumentCheck> {
        let size = c_int::try_from(content.len()).map_err(|_| LibXml2Error::DocumentTooLarge {
            size: content.len(),
        })?;
        let c_url = path_to_cstring(source)?;

        unsafe {
            let parser = xmlNewParserCtxt();
            if parser.is_null() {
                return Err(LibXml2Error::ParserContextCreationFailed);
            }
            let parser = ParserCtxtPtr(parser);

            let doc = xmlCtxtReadMemory(
                parser.0,
                content.as_ptr() as *const c_char,
                size,
                c_url.as_ptr(),
                ptr::null(),
                DOCUMENT_PARSE_OPTIONS,
            );

            if doc.is_null() {
                let last = xmlCtxtGetLastError(parser.0 as *mut c_void);
                let diagnostic = if last.is_null() {
                    Diagnostic {
                        line: 0,
                        column: 0,
                        severity: Severity::Fatal,
                        domain: domain_name(1).to_string(),
                        message: "Document could not be parsed".to_string(),
                    }
                } else {
                    Diagnostic::from_raw(last)
                };
                return Ok(DocumentCheck::NotWellFormed(diagnostic));
            }
            let doc = XmlDocPtr(doc);

            let valid_ctxt = xmlSchemaNewValidCtxt(schema.as_ptr());
            if valid_ctxt.is_null() {
                return Err(LibXml2Error::ValidationContextCreationFailed);
            }

            let mut diagnostics: Vec<Diagnostic> = Vec::new();
            xmlSchemaSetValidStructuredErrors(
                valid_ctxt,
                Some(structured_error_callback),
                &mut diagnostics as *mut Vec<Diagnostic> as *mut c_void,
            );

            let code = xmlSchemaValidateDoc(valid_ctxt, doc.0);
            xmlSchemaFreeValidCtxt(valid_ctxt);
            drop(doc);

            Ok(DocumentCheck::Checked { code, diagnostics })
        }
    }
}

impl Default for LibXml2Wrapper {
    fn default() -> Self {
        Self::new()
    }
}

fn path_to_cstring(path: &Path) -> LibXml2Result<CString> {
    path.to_str()
        .and_then(|s| CString::new(s).ok())
        .ok_or_else(|| LibXml2Error::InvalidPath {
            path: path.to_path_buf(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const ORDERED_XSD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
    <xs:element name="record">
        <xs:complexType>
            <xs:sequence>
                <xs:element name="title" type="xs:string"/>
                <xs:element name="date" type="xs:string"/>
            </xs:sequence>
        </xs:complexType>
    </xs:element>
</xs:schema>"#;

    const VALID_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<record>
    <title>Delpher scan</title>
    <date>1921</date>
</record>"#;

    const OUT_OF_ORDER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<record>
    <date>1921</date>
    <title>Delpher scan</title>
</record>"#;

    fn schema_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::with_suffix(".xsd").unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn compiled(wrapper: &LibXml2Wrapper) -> (XmlSchemaPtr, NamedTempFile) {
        let file = schema_file(ORDERED_XSD);
        let schema = wrapper.parse_schema_file(file.path()).unwrap();
        (schema, file)
    }

    #[test]
    fn test_schema_parsing_success() {
        let wrapper = LibXml2Wrapper::new();
        let (schema, _file) = compiled(&wrapper);
        assert!(!schema.as_ptr().is_null());
    }

    #[test]
    fn test_schema_parsing_not_a_schema() {
        let wrapper = LibXml2Wrapper::new();
        let file = schema_file("<invalid>not a schema</invalid>");

        match wrapper.parse_schema_file(file.path()) {
            Err(LibXml2Error::SchemaParseFailed { details }) => assert!(!details.is_empty()),
            other => panic!("Expected SchemaParseFailed, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_valid_document() {
        let wrapper = LibXml2Wrapper::new();
        let (schema, _file) = compiled(&wrapper);

        let check = wrapper
            .check_document(&schema, VALID_XML.as_bytes(), Path::new("valid.xml"))
            .unwrap();
        assert_eq!(
            check,
            DocumentCheck::Checked {
                code: 0,
                diagnostics: vec![]
            }
        );
    }

    #[test]
    fn test_element_order_violation_reports_line() {
        let wrapper = LibXml2Wrapper::new();
        let (schema, _file) = compiled(&wrapper);

        let check = wrapper
            .check_document(&schema, OUT_OF_ORDER_XML.as_bytes(), Path::new("b.xml"))
            .unwrap();
        match check {
            DocumentCheck::Checked { code, diagnostics } => {
                assert!(code > 0);
                assert!(!diagnostics.is_empty());
                assert_eq!(diagnostics[0].line, 3);
                assert_eq!(diagnostics[0].severity, Severity::Error);
                assert_eq!(diagnostics[0].domain, "SCHEMASV");
                assert!(diagnostics[0].message.contains("date"));
            }
            other => panic!("Expected Checked, got {:?}", other),
        }
    }

    #[test]
    fn test_not_well_formed_document() {
        let wrapper = LibXml2Wrapper::new();
        let (schema, _file) = compiled(&wrapper);

        let check = wrapper
            .check_document(&schema, b"<record><title>open", Path::new("c.xml"))
            .unwrap();
        match check {
            DocumentCheck::NotWellFormed(diagnostic) => {
                assert_eq!(diagnostic.domain, "PARSER");
                assert!(diagnostic.severity >= Severity::Error);
            }
            other => panic!("Expected NotWellFormed, got {:?}", other),
        }
    }

    #[test]
    fn test_schema_ptr_cloning() {
        let wrapper = LibXml2Wrapper::new();
        let (schema, _file) = compiled(&wrapper);
        let cloned = schema.clone();

        assert_eq!(schema.as_ptr(), cloned.as_ptr());
        assert_eq!(schema.handle_count(), 2);
    }

    #[test]
    fn test_concurrent_validation() {
        use rayon::prelude::*;

        let wrapper = LibXml2Wrapper::new();
        let (schema, _file) = compiled(&wrapper);

        let results: Vec<_> = (0..32)
            .into_par_iter()
            .map(|i| {
                let content = if i % 2 == 0 { VALID_XML } else { OUT_OF_ORDER_XML };
                wrapper
                    .check_document(&schema, content.as_bytes(), Path::new("par.xml"))
                    .unwrap()
            })
            .collect();

        for (i, check) in results.iter().enumerate() {
            match check {
                DocumentCheck::Checked { code, .. } => assert_eq!(*code == 0, i % 2 == 0),
                other => panic!("Expected Checked, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_domain_names() {
        assert_eq!(domain_name(1), "PARSER");
        assert_eq!(domain_name(8), "IO");
        assert_eq!(domain_name(17), "SCHEMASV");
        assert_eq!(domain_name(999), "NONE");
    }
}
