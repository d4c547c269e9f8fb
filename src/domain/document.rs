//! Uploaded documents and the structural checks every upload passes before
//! any stylesheet sees it.

use std::fmt;

use bytes::Bytes;
use quick_xml::{Reader, events::BytesStart, events::Event};

use super::error::ValidationError;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const FALLBACK_PDF_FILENAME: &str = "xrechnung.pdf";

pub const UBL_INVOICE_NAMESPACE: &str = "urn:oasis:names:specification:ubl:schema:xsd:Invoice-2";
pub const UBL_CREDIT_NOTE_NAMESPACE: &str =
    "urn:oasis:names:specification:ubl:schema:xsd:CreditNote-2";
pub const CII_NAMESPACE: &str = "urn:un:unece:uncefact:data:standard:CrossIndustryInvoice:100";

/// The invoice syntaxes the visualization stylesheets accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentSyntax {
    UblInvoice,
    UblCreditNote,
    Cii,
}

impl DocumentSyntax {
    pub fn from_namespace(namespace: &str) -> Option<Self> {
        match namespace {
            UBL_INVOICE_NAMESPACE => Some(Self::UblInvoice),
            UBL_CREDIT_NOTE_NAMESPACE => Some(Self::UblCreditNote),
            CII_NAMESPACE => Some(Self::Cii),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::UblInvoice => "ubl-invoice",
            Self::UblCreditNote => "ubl-creditnote",
            Self::Cii => "cii",
        }
    }
}

impl fmt::Display for DocumentSyntax {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file received from the client, checked for shape but not yet parsed.
#[derive(Debug, Clone)]
pub struct UploadedDocument {
    filename: String,
    bytes: Bytes,
}

impl UploadedDocument {
    /// Check the declared filename and size. Content is inspected later by
    /// [`XmlDocument::parse`].
    pub fn validate(
        filename: Option<&str>,
        bytes: Bytes,
        limit_bytes: u64,
    ) -> Result<Self, ValidationError> {
        let filename = filename.map(str::trim).unwrap_or_default();
        if filename.is_empty() {
            return Err(ValidationError::EmptyFilename);
        }
        if !has_xml_extension(filename) {
            return Err(ValidationError::UnsupportedFileType {
                filename: filename.to_string(),
            });
        }
        if bytes.len() as u64 > limit_bytes {
            return Err(ValidationError::TooLarge { limit_bytes });
        }
        if bytes.is_empty() {
            return Err(ValidationError::EmptyDocument);
        }

        Ok(Self {
            filename: filename.to_string(),
            bytes,
        })
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Download name for the rendered PDF.
    pub fn pdf_filename(&self) -> String {
        pdf_filename(&self.filename)
    }
}

/// A well-formed invoice document whose syntax has been identified.
#[derive(Debug, Clone)]
pub struct XmlDocument {
    bytes: Bytes,
    syntax: DocumentSyntax,
    root: String,
}

impl XmlDocument {
    pub fn parse(bytes: Bytes) -> Result<Self, ValidationError> {
        let root = inspect(&bytes)?;
        let syntax = DocumentSyntax::from_namespace(root.namespace.as_deref().unwrap_or_default())
            .ok_or(ValidationError::UnknownFormat {
                namespace: root.namespace,
            })?;

        Ok(Self {
            bytes,
            syntax,
            root: root.name,
        })
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn syntax(&self) -> DocumentSyntax {
        self.syntax
    }

    /// Qualified name of the root element as written in the document.
    pub fn root_name(&self) -> &str {
        &self.root
    }
}

#[derive(Debug)]
struct RootElement {
    name: String,
    namespace: Option<String>,
}

/// Walk the whole document once, enforcing well-formedness and recording the
/// root element together with the namespace bound to its prefix.
fn inspect(bytes: &[u8]) -> Result<RootElement, ValidationError> {
    let content = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    if content.iter().all(u8::is_ascii_whitespace) {
        return Err(ValidationError::EmptyDocument);
    }

    let mut reader = Reader::from_reader(content);
    reader.config_mut().trim_text(true);

    let mut open: Vec<String> = Vec::new();
    let mut root: Option<RootElement> = None;

    loop {
        let event = reader.read_event().map_err(|err| {
            ValidationError::malformed(reader.error_position() as u64, err.to_string())
        })?;
        let position = reader.buffer_position() as u64;

        match event {
            Event::Start(ref start) | Event::Empty(ref start) => {
                let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                if root.is_some() && open.is_empty() {
                    return Err(ValidationError::malformed(
                        position,
                        format!("element `{name}` appears after the root element"),
                    ));
                }

                let namespace = declared_namespace(start, position)?;
                if root.is_none() {
                    root = Some(RootElement {
                        name: name.clone(),
                        namespace,
                    });
                }
                if matches!(event, Event::Start(_)) {
                    open.push(name);
                }
            }
            Event::End(_) => {
                open.pop();
            }
            Event::Text(ref text) if open.is_empty() => {
                let side = if root.is_some() { "after" } else { "before" };
                let snippet = String::from_utf8_lossy(text);
                return Err(ValidationError::malformed(
                    position,
                    format!(
                        "unexpected text `{}` {side} the root element",
                        snippet.chars().take(32).collect::<String>()
                    ),
                ));
            }
            Event::CData(_) if open.is_empty() => {
                return Err(ValidationError::malformed(
                    position,
                    "character data outside the root element",
                ));
            }
            Event::DocType(_) => {
                return Err(ValidationError::malformed(
                    position,
                    "DOCTYPE declarations are not accepted",
                ));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(unclosed) = open.last() {
        return Err(ValidationError::malformed(
            reader.buffer_position() as u64,
            format!("element `{unclosed}` is not closed"),
        ));
    }

    root.ok_or_else(|| {
        ValidationError::malformed(reader.buffer_position() as u64, "document has no root element")
    })
}

/// Namespace bound to the element's own prefix by its `xmlns` declarations.
/// Every attribute is decoded so broken attribute syntax surfaces here.
fn declared_namespace(
    start: &BytesStart<'_>,
    position: u64,
) -> Result<Option<String>, ValidationError> {
    let prefix = start
        .name()
        .prefix()
        .map(|prefix| prefix.as_ref().to_vec());
    let wanted: Vec<u8> = match prefix {
        Some(prefix) => [b"xmlns:".as_slice(), prefix.as_slice()].concat(),
        None => b"xmlns".to_vec(),
    };

    let mut namespace = None;
    for attribute in start.attributes() {
        let attribute =
            attribute.map_err(|err| ValidationError::malformed(position, err.to_string()))?;
        let value = attribute
            .unescape_value()
            .map_err(|err| ValidationError::malformed(position, err.to_string()))?;
        if attribute.key.as_ref() == wanted.as_slice() {
            namespace = Some(value.trim().to_string());
        }
    }
    Ok(namespace)
}

fn has_xml_extension(filename: &str) -> bool {
    filename.len() > 4 && strip_xml_extension(filename).is_some()
}

fn strip_xml_extension(filename: &str) -> Option<&str> {
    let split = filename.len().checked_sub(4)?;
    let ext = filename.get(split..)?;
    ext.eq_ignore_ascii_case(".xml").then(|| &filename[..split])
}

/// Derive the download filename from the uploaded name: path components
/// stripped, a trailing `.xml` swapped for `.pdf`, header-unsafe characters
/// replaced with `_`.
pub fn pdf_filename(uploaded: &str) -> String {
    let base = uploaded
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    let stem = strip_xml_extension(base).unwrap_or(base);

    let sanitized: String = stem
        .chars()
        .map(|ch| {
            if ch.is_control() || ch == '"' || ch == '\\' {
                '_'
            } else {
                ch
            }
        })
        .collect();

    if sanitized.trim_matches(['.', ' ', '_']).is_empty() {
        return FALLBACK_PDF_FILENAME.to_string();
    }
    format!("{sanitized}.pdf")
}

#[cfg(test)]
mod tests {
    use super::*;

    const UBL_INVOICE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ubl:Invoice xmlns:ubl="urn:oasis:names:specification:ubl:schema:xsd:Invoice-2"
             xmlns:cbc="urn:oasis:names:specification:ubl:schema:xsd:CommonBasicComponents-2">
  <cbc:ID>RE-2024-001</cbc:ID>
  <cbc:Note/>
</ubl:Invoice>
"#;

    fn parse(source: &str) -> Result<XmlDocument, ValidationError> {
        XmlDocument::parse(Bytes::copy_from_slice(source.as_bytes()))
    }

    #[test]
    fn detects_prefixed_ubl_invoice() {
        let document = parse(UBL_INVOICE).expect("valid invoice");
        assert_eq!(document.syntax(), DocumentSyntax::UblInvoice);
        assert_eq!(document.root_name(), "ubl:Invoice");
    }

    #[test]
    fn detects_default_namespace_credit_note_with_bom() {
        let source = format!(
            "\u{feff}<CreditNote xmlns=\"{UBL_CREDIT_NOTE_NAMESPACE}\"><ID>1</ID></CreditNote>"
        );
        let document = parse(&source).expect("valid credit note");
        assert_eq!(document.syntax(), DocumentSyntax::UblCreditNote);
    }

    #[test]
    fn detects_cii() {
        let source = format!(
            "<rsm:CrossIndustryInvoice xmlns:rsm=\"{CII_NAMESPACE}\"><rsm:ExchangedDocument/></rsm:CrossIndustryInvoice>"
        );
        assert_eq!(parse(&source).expect("valid cii").syntax(), DocumentSyntax::Cii);
    }

    #[test]
    fn unclosed_element_is_malformed() {
        let err = parse(&format!(
            "<Invoice xmlns=\"{UBL_INVOICE_NAMESPACE}\"><ID>1</ID>"
        ))
        .expect_err("unclosed root");
        match err {
            ValidationError::Malformed { detail, .. } => {
                assert!(detail.contains("Invoice"), "{detail}");
                assert!(detail.contains("not closed"), "{detail}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn mismatched_end_tag_is_malformed() {
        let err = parse(&format!(
            "<Invoice xmlns=\"{UBL_INVOICE_NAMESPACE}\"><ID>1</Note></Invoice>"
        ))
        .expect_err("mismatched tag");
        assert!(matches!(err, ValidationError::Malformed { .. }));
    }

    #[test]
    fn content_after_root_is_malformed() {
        let source = format!("<Invoice xmlns=\"{UBL_INVOICE_NAMESPACE}\"/><Invoice/>");
        assert!(matches!(
            parse(&source).expect_err("two roots"),
            ValidationError::Malformed { .. }
        ));

        let source = format!("<Invoice xmlns=\"{UBL_INVOICE_NAMESPACE}\"/>trailing");
        assert!(matches!(
            parse(&source).expect_err("trailing text"),
            ValidationError::Malformed { .. }
        ));
    }

    #[test]
    fn doctype_with_external_entity_is_rejected() {
        let source = format!(
            "<?xml version=\"1.0\"?>\n<!DOCTYPE Invoice [<!ENTITY x SYSTEM \"file:///etc/passwd\">]>\n<Invoice xmlns=\"{UBL_INVOICE_NAMESPACE}\"><ID>&x;</ID></Invoice>"
        );
        match parse(&source).expect_err("doctype must not pass") {
            ValidationError::Malformed { detail, .. } => assert!(detail.contains("DOCTYPE"), "{detail}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn whitespace_only_document_is_empty() {
        assert_eq!(
            parse("  \n\t").expect_err("blank"),
            ValidationError::EmptyDocument
        );
    }

    #[test]
    fn declaration_without_root_is_malformed() {
        let err = parse("<?xml version=\"1.0\"?><!-- nothing -->").expect_err("no root");
        assert!(matches!(err, ValidationError::Malformed { .. }));
    }

    #[test]
    fn unknown_namespace_is_rejected() {
        let err = parse("<note xmlns=\"urn:example:notes\"><to>Tove</to></note>")
            .expect_err("unknown format");
        assert_eq!(
            err,
            ValidationError::UnknownFormat {
                namespace: Some("urn:example:notes".to_string())
            }
        );
        assert!(err.to_string().starts_with("Unknown XML format"));
    }

    #[test]
    fn namespace_of_other_prefix_does_not_count() {
        let source = format!("<x:Invoice xmlns=\"{UBL_INVOICE_NAMESPACE}\" xmlns:x=\"urn:other\"/>");
        assert!(matches!(
            parse(&source).expect_err("wrong binding"),
            ValidationError::UnknownFormat { .. }
        ));
    }

    #[test]
    fn upload_requires_xml_extension() {
        let err = UploadedDocument::validate(
            Some("notes.txt"),
            Bytes::from_static(b"hello"),
            1024,
        )
        .expect_err("wrong extension");
        assert!(matches!(err, ValidationError::UnsupportedFileType { .. }));

        let ok = UploadedDocument::validate(
            Some("Rechnung.XML"),
            Bytes::from_static(b"<a/>"),
            1024,
        )
        .expect("uppercase extension accepted");
        assert_eq!(ok.filename(), "Rechnung.XML");
    }

    #[test]
    fn upload_rejects_bare_extension_and_missing_name() {
        assert!(matches!(
            UploadedDocument::validate(Some(".xml"), Bytes::from_static(b"<a/>"), 1024),
            Err(ValidationError::UnsupportedFileType { .. })
        ));
        assert_eq!(
            UploadedDocument::validate(Some("  "), Bytes::from_static(b"<a/>"), 1024)
                .expect_err("blank name"),
            ValidationError::EmptyFilename
        );
    }

    #[test]
    fn upload_enforces_size_limit_and_emptiness() {
        assert_eq!(
            UploadedDocument::validate(Some("a.xml"), Bytes::from_static(b"<a/>"), 3)
                .expect_err("too large"),
            ValidationError::TooLarge { limit_bytes: 3 }
        );
        assert_eq!(
            UploadedDocument::validate(Some("a.xml"), Bytes::new(), 3)
                .expect_err("empty"),
            ValidationError::EmptyDocument
        );
    }

    #[test]
    fn pdf_filename_replaces_extension() {
        assert_eq!(pdf_filename("invoice-valid.xml"), "invoice-valid.pdf");
        assert_eq!(pdf_filename("RECHNUNG.XML"), "RECHNUNG.pdf");
        assert_eq!(pdf_filename("archive.tar"), "archive.tar.pdf");
    }

    #[test]
    fn pdf_filename_strips_paths_and_unsafe_characters() {
        assert_eq!(pdf_filename("C:\\Users\\me\\bill.xml"), "bill.pdf");
        assert_eq!(pdf_filename("../../etc/in\"voice.xml"), "in_voice.pdf");
        assert_eq!(pdf_filename("tab\there.xml"), "tab_here.pdf");
    }

    #[test]
    fn pdf_filename_falls_back_when_nothing_usable_remains() {
        assert_eq!(pdf_filename(".xml"), FALLBACK_PDF_FILENAME);
        assert_eq!(pdf_filename("dir/"), FALLBACK_PDF_FILENAME);
        assert_eq!(pdf_filename(""), FALLBACK_PDF_FILENAME);
    }
}
