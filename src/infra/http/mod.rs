//! HTTP surface: router, handlers and error mapping for the viewer API.

mod error;
mod handlers;
mod middleware;
mod multipart;

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
};

use crate::application::pipeline::DocumentPipeline;

pub use error::ApiError;
pub use middleware::RequestContext;

/// Room for multipart boundaries, part headers and the `lang` field on top of
/// the document itself.
pub const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<DocumentPipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<DocumentPipeline>) -> Self {
        Self { pipeline }
    }

    fn body_limit(&self) -> usize {
        usize::try_from(self.pipeline.max_upload_bytes())
            .unwrap_or(usize::MAX)
            .saturating_add(MULTIPART_OVERHEAD_BYTES)
    }
}

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.body_limit();

    Router::new()
        .route("/transform", post(handlers::transform))
        .route("/export-pdf", post(handlers::export_pdf))
        .route("/capabilities", get(handlers::capabilities))
        .route("/_health", get(handlers::health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
        .with_state(state)
}
