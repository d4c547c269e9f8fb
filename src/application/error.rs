use std::{error::Error as StdError, time::Duration};

use axum::{http::StatusCode, response::Response};
use thiserror::Error;

use crate::{config::LoadError, domain::error::ValidationError, infra::error::InfraError};

/// Failure details carried on a response for the logging middleware.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// Every way a transform or export request can end without a result.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{message}")]
    Transform { message: String },
    #[error("PDF rendering did not finish within {limit:?}; try again or simplify the invoice")]
    RenderTimeout { limit: Duration },
    #[error("PDF rendering failed: {diagnostic}")]
    RenderEngine {
        exit_code: Option<i32>,
        diagnostic: String,
    },
    #[error("PDF export is not available on this server")]
    RenderUnavailable,
    #[error("Too many PDF exports in progress; retry shortly")]
    ServerBusy { retry_after: Duration },
    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn transform(message: impl Into<String>) -> Self {
        Self::Transform {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Stable classification string exposed to clients and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "validation_error",
            PipelineError::Transform { .. } => "transform_error",
            PipelineError::RenderTimeout { .. } => "render_timeout",
            PipelineError::RenderEngine { .. } => "render_engine_failure",
            PipelineError::RenderUnavailable => "render_unavailable",
            PipelineError::ServerBusy { .. } => "server_busy",
            PipelineError::Internal(_) => "internal_error",
        }
    }

    /// Whether the client caused the failure by what it sent.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PipelineError::Validation(_) | PipelineError::Transform { .. }
        )
    }
}

/// Errors that stop the process from starting or serving.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        let cases = [
            (
                PipelineError::from(ValidationError::EmptyDocument),
                "validation_error",
            ),
            (PipelineError::transform("boom"), "transform_error"),
            (
                PipelineError::RenderTimeout {
                    limit: Duration::from_millis(10),
                },
                "render_timeout",
            ),
            (
                PipelineError::RenderEngine {
                    exit_code: Some(1),
                    diagnostic: "SEVERE".to_string(),
                },
                "render_engine_failure",
            ),
            (PipelineError::RenderUnavailable, "render_unavailable"),
            (
                PipelineError::ServerBusy {
                    retry_after: Duration::from_secs(1),
                },
                "server_busy",
            ),
            (PipelineError::internal("x"), "internal_error"),
        ];

        for (error, kind) in cases {
            assert_eq!(error.kind(), kind);
        }
    }

    #[test]
    fn validation_messages_pass_through_unchanged() {
        let error = PipelineError::from(ValidationError::MissingFile);
        assert_eq!(error.to_string(), "No file uploaded");
        assert!(error.is_client_error());
    }

    #[test]
    fn report_collects_source_chain() {
        let io = std::io::Error::other("disk full");
        let infra = InfraError::from(io);
        let report = ErrorReport::from_error("test", StatusCode::INTERNAL_SERVER_ERROR, &infra);
        assert_eq!(report.messages.len(), 2);
        assert!(report.messages[1].contains("disk full"));
    }
}
