use std::{path::PathBuf, time::Duration};

use tokio::process::Command;
use tracing::{error, info};

use crate::{
    config::ConformancePolicy,
    domain::{document::XmlDocument, error::ValidationError},
    infra::{
        process::{ProcessError, run_bounded},
        workspace::Workspace,
    },
};

use super::error::PipelineError;

/// Optional schema-level check applied after well-formedness.
#[derive(Debug, Clone)]
pub enum ConformanceCheck {
    WellFormed,
    External {
        program: PathBuf,
        args: Vec<String>,
        work_dir: PathBuf,
        timeout: Duration,
    },
}

impl ConformanceCheck {
    pub fn from_policy(policy: &ConformancePolicy, work_dir: PathBuf, timeout: Duration) -> Self {
        match policy {
            ConformancePolicy::WellFormed => ConformanceCheck::WellFormed,
            ConformancePolicy::External { program, args } => ConformanceCheck::External {
                program: program.clone(),
                args: args.clone(),
                work_dir,
                timeout,
            },
        }
    }

    pub async fn check(&self, document: &XmlDocument) -> Result<(), PipelineError> {
        let ConformanceCheck::External {
            program,
            args,
            work_dir,
            timeout,
        } = self
        else {
            return Ok(());
        };

        let workspace = Workspace::create_in(work_dir)
            .map_err(|err| PipelineError::internal(format!("failed to create workspace: {err}")))?;
        let path = workspace
            .write("document.xml", document.bytes())
            .await
            .map_err(|err| PipelineError::internal(format!("failed to stage document: {err}")))?;

        let mut command = Command::new(program);
        command.args(args).arg(&path).current_dir(workspace.path());
        let result = run_bounded(&mut command, *timeout).await;
        workspace.close().await;

        match result {
            Ok(output) if output.success() => {
                info!(
                    target = "application::conformance",
                    op = "conformance::check",
                    result = "ok",
                    elapsed_ms = output.elapsed.as_millis() as u64,
                    "External validator accepted document"
                );
                Ok(())
            }
            Ok(output) => {
                let detail = output
                    .diagnostic()
                    .unwrap_or_else(|| "validator rejected the document".to_string());
                Err(ValidationError::non_conformant(detail).into())
            }
            Err(ProcessError::TimedOut { limit, .. }) => Err(PipelineError::transform(format!(
                "Validation did not finish within {limit:?}"
            ))),
            Err(err) => {
                error!(
                    target = "application::conformance",
                    op = "conformance::check",
                    result = "error",
                    error = %err,
                    "External validator could not be run"
                );
                Err(PipelineError::internal(err.to_string()))
            }
        }
    }
}
