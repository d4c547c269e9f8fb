use thiserror::Error;

/// Client-caused problems with an upload, reported verbatim to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("No file uploaded")]
    MissingFile,
    #[error("No file selected")]
    EmptyFilename,
    #[error("Unsupported file type for `{filename}`: only .xml files are accepted")]
    UnsupportedFileType { filename: String },
    #[error("Uploaded file is empty")]
    EmptyDocument,
    #[error("File is too large (limit is {})", describe_limit(.limit_bytes))]
    TooLarge { limit_bytes: u64 },
    #[error("XML is not well-formed at byte {position}: {detail}")]
    Malformed { position: u64, detail: String },
    #[error("Unknown XML format. Supported: UBL Invoice, UBL CreditNote, CII/UNCEFACT")]
    UnknownFormat { namespace: Option<String> },
    #[error("Document failed validation: {detail}")]
    NonConformant { detail: String },
    #[error("Upload form data was invalid: {detail}")]
    InvalidForm { detail: String },
}

impl ValidationError {
    pub fn malformed(position: u64, detail: impl Into<String>) -> Self {
        Self::Malformed {
            position,
            detail: detail.into(),
        }
    }

    pub fn non_conformant(detail: impl Into<String>) -> Self {
        Self::NonConformant {
            detail: detail.into(),
        }
    }

    pub fn invalid_form(detail: impl Into<String>) -> Self {
        Self::InvalidForm {
            detail: detail.into(),
        }
    }
}

fn describe_limit(bytes: &u64) -> String {
    let bytes = *bytes;
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;

    if bytes >= MIB && bytes % MIB == 0 {
        format!("{} MiB", bytes / MIB)
    } else if bytes >= KIB && bytes % KIB == 0 {
        format!("{} KiB", bytes / KIB)
    } else {
        format!("{bytes} bytes")
    }
}
