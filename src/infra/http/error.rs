use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::{
    application::error::{ErrorReport, PipelineError},
    domain::error::ValidationError,
};

const INTERNAL_MESSAGE: &str = "Internal server error";

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
    pub kind: &'static str,
}

/// A pipeline failure on its way to the client.
#[derive(Debug)]
pub struct ApiError {
    source: &'static str,
    error: PipelineError,
}

impl ApiError {
    pub fn new(source: &'static str, error: PipelineError) -> Self {
        Self { source, error }
    }

    pub fn status(&self) -> StatusCode {
        match &self.error {
            PipelineError::Validation(ValidationError::TooLarge { .. }) => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            PipelineError::Validation(_) => StatusCode::BAD_REQUEST,
            PipelineError::Transform { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            PipelineError::RenderTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            PipelineError::RenderEngine { .. } => StatusCode::BAD_GATEWAY,
            PipelineError::RenderUnavailable | PipelineError::ServerBusy { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            PipelineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> String {
        match &self.error {
            PipelineError::Internal(_) => INTERNAL_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ApiErrorBody {
            error: self.public_message(),
            kind: self.error.kind(),
        };
        let mut response = (status, Json(body)).into_response();

        if let PipelineError::ServerBusy { retry_after } = &self.error {
            let seconds = retry_after.as_secs().max(1);
            if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        ErrorReport::from_error(self.source, status, &self.error).attach(&mut response);
        response
    }
}
