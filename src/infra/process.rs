//! Bounded execution of external engines (XSLT processor, formatting engine,
//! validators).

use std::{
    ffi::OsStr,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    time::{Duration, Instant},
};

use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Command,
};
use tracing::warn;

const DIAGNOSTIC_LIMIT: usize = 4096;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("`{program}` was not found")]
    NotFound { program: String },
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("`{program}` did not finish within {limit:?}")]
    TimedOut { program: String, limit: Duration },
    #[error("i/o error while running `{program}`: {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Failure text: stderr when present, else stdout, trimmed and capped.
    pub fn diagnostic(&self) -> Option<String> {
        [&self.stderr, &self.stdout]
            .into_iter()
            .map(|stream| String::from_utf8_lossy(stream).trim().to_string())
            .find(|text| !text.is_empty())
            .map(|text| truncate(text, DIAGNOSTIC_LIMIT))
    }
}

/// Run `command` to completion or kill it once `limit` elapses.
///
/// The child is spawned with `kill_on_drop`, so dropping the returned future
/// (for example when the HTTP client disconnects) terminates it as well.
pub async fn run_bounded(
    command: &mut Command,
    limit: Duration,
) -> Result<ProcessOutput, ProcessError> {
    let program = program_name(command.as_std().get_program());
    if limit.is_zero() {
        return Err(ProcessError::TimedOut { program, limit });
    }

    let started_at = Instant::now();
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| {
            if source.kind() == ErrorKind::NotFound {
                ProcessError::NotFound {
                    program: program.clone(),
                }
            } else {
                ProcessError::Spawn {
                    program: program.clone(),
                    source,
                }
            }
        })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let completed = tokio::time::timeout(limit, async {
        tokio::try_join!(child.wait(), read_pipe(stdout), read_pipe(stderr))
    })
    .await;

    match completed {
        Ok(Ok((status, stdout, stderr))) => Ok(ProcessOutput {
            status,
            stdout,
            stderr,
            elapsed: started_at.elapsed(),
        }),
        Ok(Err(source)) => Err(ProcessError::Io { program, source }),
        Err(_) => {
            if let Err(err) = child.kill().await {
                warn!(
                    target = "infra::process",
                    op = "process::run_bounded",
                    program = %program,
                    error = %err,
                    "Failed to kill timed out process"
                );
            }
            Err(ProcessError::TimedOut { program, limit })
        }
    }
}

async fn read_pipe<R>(pipe: Option<R>) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buffer).await?;
    }
    Ok(buffer)
}

/// A single time budget shared by consecutive steps of one job.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started_at: Instant,
    limit: Duration,
}

impl Deadline {
    pub fn after(limit: Duration) -> Self {
        Self {
            started_at: Instant::now(),
            limit,
        }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    pub fn remaining(&self) -> Duration {
        self.limit.saturating_sub(self.started_at.elapsed())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }
}

/// Locate an executable the way the shell would. Paths containing a separator
/// are checked directly; bare names are searched on `PATH` and then in
/// `$JAVA_HOME/bin`, where JVM-based engines usually live.
pub fn resolve_program(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 || program.is_absolute() {
        return program.is_file().then(|| program.to_path_buf());
    }

    let java_home_bin = std::env::var_os("JAVA_HOME").map(|home| PathBuf::from(home).join("bin"));
    let path_dirs = std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).collect::<Vec<_>>())
        .unwrap_or_default();

    path_dirs
        .into_iter()
        .chain(java_home_bin)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

fn program_name(program: &OsStr) -> String {
    Path::new(program)
        .file_name()
        .unwrap_or(program)
        .to_string_lossy()
        .into_owned()
}

fn truncate(mut text: String, limit: usize) -> String {
    if text.len() <= limit {
        return text;
    }
    let mut cut = limit;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text.push_str(" …");
    text
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str) -> Command {
        let mut command = Command::new("/bin/sh");
        command.arg("-c").arg(script);
        command
    }

    #[tokio::test]
    async fn captures_output_and_status() {
        let output = run_bounded(
            &mut shell("echo out; echo err >&2; exit 3"),
            Duration::from_secs(5),
        )
        .await
        .expect("process runs");

        assert!(!output.success());
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.stdout, b"out\n");
        assert_eq!(output.diagnostic().as_deref(), Some("err"));
    }

    #[tokio::test]
    async fn diagnostic_falls_back_to_stdout() {
        let output = run_bounded(&mut shell("echo only-stdout; exit 1"), Duration::from_secs(5))
            .await
            .expect("process runs");
        assert_eq!(output.diagnostic().as_deref(), Some("only-stdout"));

        let output = run_bounded(&mut shell("exit 1"), Duration::from_secs(5))
            .await
            .expect("process runs");
        assert!(output.diagnostic().is_none());
    }

    #[tokio::test]
    async fn slow_process_is_killed() {
        let started = Instant::now();
        let err = run_bounded(&mut shell("exec sleep 10"), Duration::from_millis(100))
            .await
            .expect_err("must time out");

        assert!(matches!(err, ProcessError::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn zero_budget_never_spawns() {
        let err = run_bounded(&mut shell("exit 0"), Duration::ZERO)
            .await
            .expect_err("no time left");
        assert!(matches!(err, ProcessError::TimedOut { .. }));
    }

    #[tokio::test]
    async fn missing_program_is_reported() {
        let mut command = Command::new("/nonexistent/engine-binary");
        let err = run_bounded(&mut command, Duration::from_secs(1))
            .await
            .expect_err("missing program");
        assert!(matches!(err, ProcessError::NotFound { ref program } if program == "engine-binary"));
    }

    #[test]
    fn resolves_explicit_and_searched_programs() {
        assert_eq!(
            resolve_program(Path::new("/bin/sh")),
            Some(PathBuf::from("/bin/sh"))
        );
        assert!(resolve_program(Path::new("sh")).is_some());
        assert!(resolve_program(Path::new("./definitely/not/here")).is_none());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let text = "ä".repeat(10);
        let cut = truncate(text, 5);
        assert_eq!(cut, "ää …");
    }

    #[test]
    fn deadline_counts_down() {
        let deadline = Deadline::after(Duration::from_secs(60));
        assert!(deadline.remaining() <= Duration::from_secs(60));
        assert!(!deadline.is_expired());
        assert!(Deadline::after(Duration::ZERO).is_expired());
    }
}
