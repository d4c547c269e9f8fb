//! PDF rendering: the engine-agnostic contract, the concurrency gate and the
//! per-call job scope.

mod fop;

use std::{
    io,
    num::NonZeroU32,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use metrics::{counter, gauge};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::warn;

use crate::{
    domain::{document::XmlDocument, variants::LanguageVariant},
    infra::{
        process::Deadline,
        telemetry::{RENDER_INFLIGHT, RENDER_REJECTED_TOTAL},
        workspace::Workspace,
    },
};

use super::error::PipelineError;

pub use fop::{FopRenderAdapter, fop_configuration};

const MIN_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Turns a validated document into PDF bytes within `timeout`.
#[async_trait]
pub trait PdfRenderer: Send + Sync {
    async fn render(
        &self,
        document: &XmlDocument,
        variant: &LanguageVariant,
        timeout: Duration,
    ) -> Result<Vec<u8>, PipelineError>;
}

/// Bounds how many renders run at once. Waiters give up after `queue_wait`.
#[derive(Debug, Clone)]
pub struct RenderGate {
    semaphore: Arc<Semaphore>,
    ceiling: usize,
    queue_wait: Duration,
}

impl RenderGate {
    pub fn new(ceiling: NonZeroU32, queue_wait: Duration) -> Self {
        let ceiling = ceiling.get() as usize;
        Self {
            semaphore: Arc::new(Semaphore::new(ceiling)),
            ceiling,
            queue_wait,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.ceiling - self.semaphore.available_permits()
    }

    pub async fn acquire(&self) -> Result<RenderPermit, PipelineError> {
        let waiting = Arc::clone(&self.semaphore).acquire_owned();
        match tokio::time::timeout(self.queue_wait, waiting).await {
            Ok(Ok(permit)) => {
                gauge!(RENDER_INFLIGHT).increment(1.0);
                Ok(RenderPermit { _permit: permit })
            }
            Ok(Err(_closed)) => Err(PipelineError::internal("render gate closed")),
            Err(_) => {
                counter!(RENDER_REJECTED_TOTAL).increment(1);
                warn!(
                    target = "application::render",
                    op = "render::acquire",
                    result = "busy",
                    ceiling = self.ceiling,
                    queue_wait_ms = self.queue_wait.as_millis() as u64,
                    "All render slots busy"
                );
                Err(PipelineError::ServerBusy {
                    retry_after: self.queue_wait.max(MIN_RETRY_AFTER),
                })
            }
        }
    }
}

/// A held render slot; released when dropped, whatever the outcome.
#[derive(Debug)]
pub struct RenderPermit {
    _permit: OwnedSemaphorePermit,
}

impl Drop for RenderPermit {
    fn drop(&mut self) {
        gauge!(RENDER_INFLIGHT).decrement(1.0);
    }
}

/// Scratch space and time budget for one render call.
#[derive(Debug)]
pub struct RenderJob {
    workspace: Workspace,
    deadline: Deadline,
}

impl RenderJob {
    pub fn open(work_dir: &Path, timeout: Duration) -> io::Result<Self> {
        Ok(Self {
            workspace: Workspace::create_in(work_dir)?,
            deadline: Deadline::after(timeout),
        })
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.workspace.file(name)
    }

    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    pub async fn close(self) {
        self.workspace.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn gate_rejects_beyond_ceiling_and_recovers() {
        let gate = RenderGate::new(NonZeroU32::new(1).expect("non-zero"), Duration::from_millis(20));

        let first = gate.acquire().await.expect("first slot");
        assert_eq!(gate.in_flight(), 1);

        let err = gate.acquire().await.expect_err("second must wait then fail");
        assert_eq!(err.kind(), "server_busy");
        match err {
            PipelineError::ServerBusy { retry_after } => assert_eq!(retry_after, MIN_RETRY_AFTER),
            other => panic!("unexpected error: {other:?}"),
        }

        drop(first);
        assert_eq!(gate.in_flight(), 0);
        let _again = gate.acquire().await.expect("slot released");
    }

    #[tokio::test]
    async fn waiter_gets_slot_released_within_queue_wait() {
        let gate = RenderGate::new(NonZeroU32::new(1).expect("non-zero"), Duration::from_secs(2));
        let held = gate.acquire().await.expect("first slot");

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);

        waiter.await.expect("join").expect("queued request proceeds");
    }

    #[tokio::test]
    async fn job_scope_removes_files() {
        let root = tempfile::TempDir::new().expect("root");
        let job = RenderJob::open(root.path(), Duration::from_secs(1)).expect("job");
        std::fs::write(job.file("invoice.fo"), "fo").expect("write");
        job.close().await;
        assert_eq!(std::fs::read_dir(root.path()).expect("root").count(), 0);
    }
}
