//! Adapter for an external XSLT 3.0 processor driven through Saxon's
//! command-line conventions (`-s:`, `-xsl:`, `-o:`, `name=value`).

use std::{
    ffi::OsString,
    io,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{
    process::{ProcessError, run_bounded},
    stylesheets::{Stylesheet, StylesheetCatalog},
};

#[derive(Debug, Error)]
pub enum XsltError {
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("{stylesheet} failed (exit {exit_code:?}): {diagnostic}")]
    Failed {
        stylesheet: &'static str,
        exit_code: Option<i32>,
        diagnostic: String,
    },
    #[error("{stylesheet} produced no output")]
    EmptyOutput { stylesheet: &'static str },
    #[error("failed to read {stylesheet} output: {source}")]
    Io {
        stylesheet: &'static str,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct XsltProcessor {
    program: PathBuf,
    args: Vec<String>,
    catalog: StylesheetCatalog,
}

impl XsltProcessor {
    pub fn new(program: PathBuf, args: Vec<String>, catalog: StylesheetCatalog) -> Self {
        Self {
            program,
            args,
            catalog,
        }
    }

    /// Apply `stylesheet` to `source`, writing `output`. Succeeds only when the
    /// processor exits zero and `output` is non-empty.
    pub async fn apply(
        &self,
        stylesheet: Stylesheet,
        source: &Path,
        output: &Path,
        params: &[(&str, &str)],
        limit: Duration,
    ) -> Result<u64, XsltError> {
        let started_at = Instant::now();
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(prefixed("-s:", source))
            .arg(prefixed("-xsl:", &self.catalog.path(stylesheet)))
            .arg(prefixed("-o:", output))
            .args(params.iter().map(|(name, value)| format!("{name}={value}")))
            .current_dir(self.catalog.directory());

        let result = run_bounded(&mut command, limit).await?;
        let name = stylesheet.file_name();

        if !result.success() {
            let exit_code = result.status.code();
            let diagnostic = result
                .diagnostic()
                .unwrap_or_else(|| "XSLT processor reported no diagnostic".to_string());
            warn!(
                target = "infra::xslt",
                op = "xslt::apply",
                result = "error",
                stylesheet = name,
                exit_code = exit_code.map(i64::from).unwrap_or(-1),
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                diagnostic = %diagnostic,
                "XSLT processor failed"
            );
            return Err(XsltError::Failed {
                stylesheet: name,
                exit_code,
                diagnostic,
            });
        }

        let written = match tokio::fs::metadata(output).await {
            Ok(metadata) => metadata.len(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => 0,
            Err(source) => {
                return Err(XsltError::Io {
                    stylesheet: name,
                    source,
                });
            }
        };
        if written == 0 {
            return Err(XsltError::EmptyOutput { stylesheet: name });
        }

        debug!(
            target = "infra::xslt",
            op = "xslt::apply",
            result = "ok",
            stylesheet = name,
            output_bytes = written,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Stylesheet applied"
        );
        Ok(written)
    }
}

fn prefixed(flag: &str, path: &Path) -> OsString {
    let mut arg = OsString::from(flag);
    arg.push(path.as_os_str());
    arg
}
