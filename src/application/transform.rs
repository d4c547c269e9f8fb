//! XML-to-HTML preview through the two-stage visualization stylesheets.

use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tracing::{error, info};

use crate::{
    domain::{
        document::{DocumentSyntax, XmlDocument},
        variants::LanguageVariant,
    },
    infra::{
        process::{Deadline, ProcessError},
        stylesheets::Stylesheet,
        workspace::Workspace,
        xslt::{XsltError, XsltProcessor},
    },
};

use super::error::PipelineError;

const SOURCE_FILE: &str = "source.xml";
const XR_FILE: &str = "xr.xml";
const HTML_FILE: &str = "preview.html";

#[derive(Debug, Clone)]
pub struct TransformResult {
    pub html: String,
    pub variant: LanguageVariant,
    pub syntax: DocumentSyntax,
}

#[async_trait]
pub trait DocumentTransformer: Send + Sync {
    async fn transform(
        &self,
        document: &XmlDocument,
        variant: &LanguageVariant,
    ) -> Result<TransformResult, PipelineError>;
}

/// Runs both stylesheet stages through an external XSLT processor inside a
/// private workspace per call.
#[derive(Debug, Clone)]
pub struct XsltTransformer {
    processor: Arc<XsltProcessor>,
    work_dir: PathBuf,
    timeout: Duration,
}

impl XsltTransformer {
    pub fn new(processor: Arc<XsltProcessor>, work_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            processor,
            work_dir,
            timeout,
        }
    }
}

#[async_trait]
impl DocumentTransformer for XsltTransformer {
    async fn transform(
        &self,
        document: &XmlDocument,
        variant: &LanguageVariant,
    ) -> Result<TransformResult, PipelineError> {
        let started_at = Instant::now();
        let deadline = Deadline::after(self.timeout);
        let workspace = Workspace::create_in(&self.work_dir)
            .map_err(|err| PipelineError::internal(format!("failed to create workspace: {err}")))?;

        let outcome = async {
            let xr = stage_to_xr(&self.processor, &workspace, document, deadline).await?;
            let html_path = workspace.file(HTML_FILE);
            self.processor
                .apply(
                    Stylesheet::XrToHtml,
                    &xr,
                    &html_path,
                    &[("lang", variant.stylesheet_lang())],
                    deadline.remaining(),
                )
                .await?;
            tokio::fs::read(&html_path)
                .await
                .map_err(|source| XsltError::Io {
                    stylesheet: Stylesheet::XrToHtml.file_name(),
                    source,
                })
        }
        .await;
        workspace.close().await;

        let bytes = outcome.map_err(xslt_failure)?;
        let html = String::from_utf8(bytes)
            .map_err(|_| PipelineError::transform("Transformation produced invalid UTF-8"))?;

        info!(
            target = "application::transform",
            op = "transform::html",
            result = "ok",
            syntax = document.syntax().as_str(),
            lang = variant.code(),
            html_bytes = html.len(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Invoice transformed to HTML"
        );

        Ok(TransformResult {
            html,
            variant: variant.clone(),
            syntax: document.syntax(),
        })
    }
}

/// Stage one: write the upload into `workspace` and convert it to the XR
/// intermediate document. Returns the XR path.
pub(crate) async fn stage_to_xr(
    processor: &XsltProcessor,
    workspace: &Workspace,
    document: &XmlDocument,
    deadline: Deadline,
) -> Result<PathBuf, XsltError> {
    let stylesheet = Stylesheet::stage_one_for(document.syntax());
    let source = workspace
        .write(SOURCE_FILE, document.bytes())
        .await
        .map_err(|source| XsltError::Io {
            stylesheet: stylesheet.file_name(),
            source,
        })?;
    let xr = workspace.file(XR_FILE);
    processor
        .apply(stylesheet, &source, &xr, &[], deadline.remaining())
        .await?;
    Ok(xr)
}

/// Classify processor failures for the preview path.
pub(crate) fn xslt_failure(err: XsltError) -> PipelineError {
    match err {
        XsltError::Failed { diagnostic, .. } => {
            PipelineError::transform(format!("Transformation failed: {diagnostic}"))
        }
        XsltError::EmptyOutput { stylesheet } => {
            PipelineError::transform(format!("Transformation produced no output ({stylesheet})"))
        }
        XsltError::Process(ProcessError::TimedOut { limit, .. }) => PipelineError::transform(
            format!("Transformation did not finish within {limit:?}"),
        ),
        other => {
            error!(
                target = "application::transform",
                op = "transform::xslt",
                result = "error",
                error = %other,
                "XSLT processor could not be run"
            );
            PipelineError::internal(other.to_string())
        }
    }
}
