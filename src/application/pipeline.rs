//! Request orchestration: validation, variant resolution and the two
//! pipeline operations behind `/transform` and `/export-pdf`.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use metrics::{counter, histogram};
use uuid::Uuid;

use crate::{
    domain::{
        document::{DocumentSyntax, UploadedDocument, XmlDocument},
        error::ValidationError,
        variants::{LanguageVariant, VariantTable},
    },
    infra::telemetry::{RENDER_MS, REQUESTS_TOTAL, TRANSFORM_MS},
};

use super::{
    conformance::ConformanceCheck,
    error::PipelineError,
    lifecycle::{Operation, RequestTrace, Stage},
    render::{PdfRenderer, RenderGate},
    transform::{DocumentTransformer, TransformResult},
};

/// A file field as it arrived in the multipart form.
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub filename: Option<String>,
    pub bytes: Option<Bytes>,
    pub lang: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PreviewOutput {
    pub html: String,
    pub filename: String,
    pub variant: LanguageVariant,
    pub syntax: DocumentSyntax,
}

#[derive(Debug, Clone)]
pub struct PdfExport {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub variant: LanguageVariant,
}

#[derive(Clone)]
pub struct DocumentPipeline {
    variants: Arc<VariantTable>,
    max_upload_bytes: u64,
    conformance: ConformanceCheck,
    transformer: Arc<dyn DocumentTransformer>,
    renderer: Option<Arc<dyn PdfRenderer>>,
    gate: RenderGate,
    render_timeout: Duration,
}

impl DocumentPipeline {
    pub fn new(
        variants: Arc<VariantTable>,
        max_upload_bytes: u64,
        conformance: ConformanceCheck,
        transformer: Arc<dyn DocumentTransformer>,
        renderer: Option<Arc<dyn PdfRenderer>>,
        gate: RenderGate,
        render_timeout: Duration,
    ) -> Self {
        Self {
            variants,
            max_upload_bytes,
            conformance,
            transformer,
            renderer,
            gate,
            render_timeout,
        }
    }

    pub fn variants(&self) -> &VariantTable {
        &self.variants
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    pub fn pdf_export_available(&self) -> bool {
        self.renderer.is_some()
    }

    pub async fn transform(
        &self,
        request_id: Uuid,
        upload: UploadRequest,
    ) -> Result<PreviewOutput, PipelineError> {
        let mut trace = RequestTrace::start(request_id, Operation::Transform);
        let result = self.run_transform(&mut trace, upload).await;
        self.finish(&mut trace, &result);
        if result.is_ok() {
            histogram!(TRANSFORM_MS).record(trace.elapsed_ms() as f64);
        }
        result
    }

    pub async fn export_pdf(
        &self,
        request_id: Uuid,
        upload: UploadRequest,
    ) -> Result<PdfExport, PipelineError> {
        let mut trace = RequestTrace::start(request_id, Operation::ExportPdf);
        let result = self.run_export(&mut trace, upload).await;
        self.finish(&mut trace, &result);
        if result.is_ok() {
            histogram!(RENDER_MS).record(trace.elapsed_ms() as f64);
        }
        result
    }

    async fn run_transform(
        &self,
        trace: &mut RequestTrace,
        upload: UploadRequest,
    ) -> Result<PreviewOutput, PipelineError> {
        let (uploaded, document, variant) = self.validate(upload).await?;
        trace.advance(Stage::Validated);

        let TransformResult {
            html,
            variant,
            syntax,
        } = self.transformer.transform(&document, &variant).await?;
        trace.advance(Stage::Transformed);

        Ok(PreviewOutput {
            html,
            filename: uploaded.filename().to_string(),
            variant,
            syntax,
        })
    }

    async fn run_export(
        &self,
        trace: &mut RequestTrace,
        upload: UploadRequest,
    ) -> Result<PdfExport, PipelineError> {
        let (uploaded, document, variant) = self.validate(upload).await?;
        trace.advance(Stage::Validated);

        let renderer = self
            .renderer
            .as_ref()
            .ok_or(PipelineError::RenderUnavailable)?;
        let _permit = self.gate.acquire().await?;
        let bytes = renderer
            .render(&document, &variant, self.render_timeout)
            .await?;
        trace.advance(Stage::Rendered);

        Ok(PdfExport {
            bytes,
            filename: uploaded.pdf_filename(),
            variant,
        })
    }

    /// Shape checks, well-formedness, syntax detection and the configured
    /// conformance policy, in that order.
    async fn validate(
        &self,
        upload: UploadRequest,
    ) -> Result<(UploadedDocument, XmlDocument, LanguageVariant), PipelineError> {
        let bytes = upload.bytes.ok_or(ValidationError::MissingFile)?;
        let uploaded = UploadedDocument::validate(
            upload.filename.as_deref(),
            bytes,
            self.max_upload_bytes,
        )?;
        let document = XmlDocument::parse(uploaded.bytes().clone())?;
        self.conformance.check(&document).await?;

        let variant = self
            .variants
            .resolve(upload.lang.as_deref().unwrap_or_default())
            .clone();
        Ok((uploaded, document, variant))
    }

    fn finish<T>(&self, trace: &mut RequestTrace, result: &Result<T, PipelineError>) {
        let outcome = match result {
            Ok(_) => {
                trace.advance(Stage::Responded);
                "ok"
            }
            Err(err) => {
                trace.fail(err);
                err.kind()
            }
        };
        counter!(
            REQUESTS_TOTAL,
            "operation" => trace.operation().as_str(),
            "outcome" => outcome
        )
        .increment(1);
    }
}
