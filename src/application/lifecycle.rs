//! Per-request state machine for the transform and export operations.

use std::{fmt, time::Instant};

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Transform,
    ExportPdf,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Transform => "transform",
            Operation::ExportPdf => "export_pdf",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Validated,
    Transformed,
    Rendered,
    Responded,
    Rejected,
    Failed,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::Validated => "validated",
            Stage::Transformed => "transformed",
            Stage::Rendered => "rendered",
            Stage::Responded => "responded",
            Stage::Rejected => "rejected",
            Stage::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Responded | Stage::Rejected | Stage::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transition table. Transforms produce HTML, exports produce PDF; a request
/// is rejected only before validation succeeds and fails only after.
pub fn can_advance(operation: Operation, from: Stage, to: Stage) -> bool {
    use Stage::*;

    match (operation, from, to) {
        (_, Received, Validated) | (_, Received, Rejected) => true,
        (Operation::Transform, Validated, Transformed) => true,
        (Operation::ExportPdf, Validated, Rendered) => true,
        (_, Validated, Failed) => true,
        (Operation::Transform, Transformed, Responded) => true,
        (Operation::ExportPdf, Rendered, Responded) => true,
        _ => false,
    }
}

/// Tracks one request through its stages and logs each transition.
#[derive(Debug)]
pub struct RequestTrace {
    request_id: Uuid,
    operation: Operation,
    stage: Stage,
    started_at: Instant,
}

impl RequestTrace {
    pub fn start(request_id: Uuid, operation: Operation) -> Self {
        debug!(
            target = "application::lifecycle",
            op = operation.as_str(),
            request_id = %request_id,
            stage = Stage::Received.as_str(),
            "Request received"
        );
        Self {
            request_id,
            operation,
            stage: Stage::Received,
            started_at: Instant::now(),
        }
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    pub fn advance(&mut self, to: Stage) {
        if !self.transition(to) {
            return;
        }
        if to == Stage::Responded {
            info!(
                target = "application::lifecycle",
                op = self.operation.as_str(),
                request_id = %self.request_id,
                result = "ok",
                elapsed_ms = self.elapsed_ms(),
                "Request completed"
            );
        } else {
            debug!(
                target = "application::lifecycle",
                op = self.operation.as_str(),
                request_id = %self.request_id,
                stage = to.as_str(),
                elapsed_ms = self.elapsed_ms(),
                "Request advanced"
            );
        }
    }

    /// Move to `Rejected` or `Failed` depending on how far the request got.
    pub fn fail(&mut self, cause: &PipelineError) {
        let to = if self.stage == Stage::Received {
            Stage::Rejected
        } else {
            Stage::Failed
        };
        if !self.transition(to) {
            return;
        }
        if cause.is_client_error() {
            info!(
                target = "application::lifecycle",
                op = self.operation.as_str(),
                request_id = %self.request_id,
                stage = to.as_str(),
                result = cause.kind(),
                elapsed_ms = self.elapsed_ms(),
                error = %cause,
                "Request refused"
            );
        } else {
            warn!(
                target = "application::lifecycle",
                op = self.operation.as_str(),
                request_id = %self.request_id,
                stage = to.as_str(),
                result = cause.kind(),
                elapsed_ms = self.elapsed_ms(),
                error = %cause,
                "Request ended without a result"
            );
        }
    }

    fn transition(&mut self, to: Stage) -> bool {
        let allowed = can_advance(self.operation, self.stage, to);
        if !allowed {
            error!(
                target = "application::lifecycle",
                op = self.operation.as_str(),
                request_id = %self.request_id,
                from = self.stage.as_str(),
                to = to.as_str(),
                "Invalid request stage transition"
            );
        }
        debug_assert!(allowed, "invalid transition {} -> {}", self.stage, to);
        if allowed {
            self.stage = to;
        }
        allowed
    }
}
