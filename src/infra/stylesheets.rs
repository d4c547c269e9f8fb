use std::{
    io,
    path::{Path, PathBuf},
};

use crate::domain::document::DocumentSyntax;

/// The XRechnung visualization stylesheets this service drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stylesheet {
    UblInvoiceToXr,
    UblCreditNoteToXr,
    CiiToXr,
    XrToHtml,
    XrToFo,
}

impl Stylesheet {
    pub const ALL: [Stylesheet; 5] = [
        Stylesheet::UblInvoiceToXr,
        Stylesheet::UblCreditNoteToXr,
        Stylesheet::CiiToXr,
        Stylesheet::XrToHtml,
        Stylesheet::XrToFo,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            Stylesheet::UblInvoiceToXr => "ubl-invoice-xr.xsl",
            Stylesheet::UblCreditNoteToXr => "ubl-creditnote-xr.xsl",
            Stylesheet::CiiToXr => "cii-xr.xsl",
            Stylesheet::XrToHtml => "xrechnung-html.xsl",
            Stylesheet::XrToFo => "xr-pdf.xsl",
        }
    }

    /// First stage: source syntax to the XR intermediate document.
    pub fn stage_one_for(syntax: DocumentSyntax) -> Self {
        match syntax {
            DocumentSyntax::UblInvoice => Stylesheet::UblInvoiceToXr,
            DocumentSyntax::UblCreditNote => Stylesheet::UblCreditNoteToXr,
            DocumentSyntax::Cii => Stylesheet::CiiToXr,
        }
    }

    pub fn is_stage_one(self) -> bool {
        matches!(
            self,
            Stylesheet::UblInvoiceToXr | Stylesheet::UblCreditNoteToXr | Stylesheet::CiiToXr
        )
    }
}

/// Absolute stylesheet locations, fixed at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct StylesheetCatalog {
    directory: PathBuf,
}

impl StylesheetCatalog {
    pub fn new(directory: &Path) -> io::Result<Self> {
        Ok(Self {
            directory: std::path::absolute(directory)?,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn path(&self, stylesheet: Stylesheet) -> PathBuf {
        self.directory.join(stylesheet.file_name())
    }

    pub fn missing(&self) -> Vec<Stylesheet> {
        Stylesheet::ALL
            .into_iter()
            .filter(|stylesheet| !self.path(*stylesheet).is_file())
            .collect()
    }

    /// Whether the stage-one stylesheets plus `target` are all present.
    pub fn supports(&self, target: Stylesheet) -> bool {
        self.missing()
            .into_iter()
            .all(|missing| missing != target && !missing.is_stage_one())
    }
}
