use axum::{
    Extension, Json,
    body::Body,
    extract::{Multipart, State, multipart::MultipartRejection},
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Serialize;

use crate::application::{
    error::PipelineError,
    pipeline::{PdfExport, PreviewOutput},
};

use super::{AppState, error::ApiError, middleware::RequestContext, multipart::read_upload};

/// RFC 5987 `attr-char`: everything outside it is percent-encoded.
const ATTR_CHAR: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

#[derive(Debug, Serialize)]
pub struct PreviewBody {
    pub html: String,
    pub filename: String,
    pub lang: String,
    pub document_type: &'static str,
}

impl From<PreviewOutput> for PreviewBody {
    fn from(output: PreviewOutput) -> Self {
        Self {
            html: output.html,
            filename: output.filename,
            lang: output.variant.code().to_string(),
            document_type: output.syntax.as_str(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LanguageBody {
    pub code: String,
    pub label: String,
    pub locale: String,
}

#[derive(Debug, Serialize)]
pub struct CapabilitiesBody {
    pub pdf_export: bool,
    pub default_language: String,
    pub languages: Vec<LanguageBody>,
    pub max_upload_bytes: u64,
}

pub(super) async fn transform(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PreviewBody>, ApiError> {
    const SOURCE: &str = "infra::http::transform";

    let upload = read_upload(multipart, state.pipeline.max_upload_bytes())
        .await
        .map_err(|err| ApiError::new(SOURCE, PipelineError::from(err)))?;
    let output = state
        .pipeline
        .transform(ctx.request_id, upload)
        .await
        .map_err(|err| ApiError::new(SOURCE, err))?;

    Ok(Json(PreviewBody::from(output)))
}

pub(super) async fn export_pdf(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    const SOURCE: &str = "infra::http::export_pdf";

    let upload = read_upload(multipart, state.pipeline.max_upload_bytes())
        .await
        .map_err(|err| ApiError::new(SOURCE, PipelineError::from(err)))?;
    let export = state
        .pipeline
        .export_pdf(ctx.request_id, upload)
        .await
        .map_err(|err| ApiError::new(SOURCE, err))?;

    Ok(pdf_response(export))
}

pub(super) async fn capabilities(State(state): State<AppState>) -> Json<CapabilitiesBody> {
    let variants = state.pipeline.variants();
    Json(CapabilitiesBody {
        pdf_export: state.pipeline.pdf_export_available(),
        default_language: variants.default_variant().code().to_string(),
        languages: variants
            .iter()
            .map(|variant| LanguageBody {
                code: variant.code().to_string(),
                label: variant.label().to_string(),
                locale: variant.locale().to_string(),
            })
            .collect(),
        max_upload_bytes: state.pipeline.max_upload_bytes(),
    })
}

pub(super) async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

fn pdf_response(export: PdfExport) -> Response {
    let length = export.bytes.len();
    let mut response = Response::new(Body::from(export.bytes));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/pdf"),
    );
    if let Ok(value) = HeaderValue::from_str(&length.to_string()) {
        headers.insert(header::CONTENT_LENGTH, value);
    }
    if let Ok(value) = HeaderValue::from_str(&content_disposition(&export.filename)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    response
}

/// `attachment` disposition with an ASCII `filename` and, for names outside
/// ASCII, an RFC 5987 `filename*`.
pub(super) fn content_disposition(filename: &str) -> String {
    if filename.is_ascii() {
        return format!("attachment; filename=\"{filename}\"");
    }

    let fallback: String = filename
        .chars()
        .map(|ch| if ch.is_ascii() { ch } else { '_' })
        .collect();
    format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
        utf8_percent_encode(filename, ATTR_CHAR)
    )
}
