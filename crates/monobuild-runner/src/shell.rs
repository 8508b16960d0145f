//! Shell-based command execution on the host.

use crate::config::CommandSpec;
use crate::error::RunnerError;
use monobuild_core::ports::{UnitContext, ValidationContext};
use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::time::{Duration, timeout};
use tracing::{Instrument, debug, info, warn};

/// Lines of output kept for error messages.
const TAIL_LINES: usize = 20;

/// Prefix of the line a command writes to `$MONOBUILD_OUTPUT` to replace the artifact path.
const ARTIFACT_PREFIX: &str = "artifact=";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputStream::Stdout => f.write_str("stdout"),
            OutputStream::Stderr => f.write_str("stderr"),
        }
    }
}

/// Where and for whom a command runs.
#[derive(Debug, Clone)]
pub struct Invocation<'a> {
    pub ctx: &'a UnitContext,
    pub workdir: &'a Path,
    /// Extra environment, applied after the unit variables.
    pub env: Vec<(String, String)>,
}

impl<'a> Invocation<'a> {
    pub fn new(ctx: &'a UnitContext, workdir: &'a Path) -> Self {
        Self {
            ctx,
            workdir,
            env: Vec::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    fn unit_env(&self) -> Vec<(String, String)> {
        let join = |units: &[monobuild_core::UnitId]| {
            units
                .iter()
                .map(|u| u.as_str())
                .collect::<Vec<_>>()
                .join(",")
        };
        vec![
            ("MONOBUILD_UNIT".to_string(), self.ctx.unit.to_string()),
            (
                "MONOBUILD_SOURCE_ROOT".to_string(),
                self.ctx.source_root.display().to_string(),
            ),
            (
                "MONOBUILD_UNIT_SOURCE".to_string(),
                self.ctx.unit_source.display().to_string(),
            ),
            (
                "MONOBUILD_DEPENDENCIES".to_string(),
                join(&self.ctx.dependencies),
            ),
            (
                "MONOBUILD_DIRECT_DEPENDENCIES".to_string(),
                join(&self.ctx.direct_dependencies),
            ),
        ]
    }
}

/// Result of a command that exited successfully.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub duration_ms: u64,
    /// Path the command reported through `$MONOBUILD_OUTPUT`, resolved against the workdir.
    pub artifact: Option<PathBuf>,
}

/// Runs commands with `<shell> -c` on the host.
pub struct ShellRunner {
    shell: String,
    default_timeout_seconds: Option<u64>,
}

impl ShellRunner {
    pub fn new(shell: impl Into<String>, default_timeout_seconds: Option<u64>) -> Self {
        Self {
            shell: shell.into(),
            default_timeout_seconds,
        }
    }

    /// Run a command to completion. A non-zero exit is an error.
    ///
    /// With a `cancel` context the process is killed as soon as cancellation
    /// is requested.
    pub async fn run(
        &self,
        spec: &CommandSpec,
        invocation: &Invocation<'_>,
        cancel: Option<&ValidationContext>,
    ) -> Result<CommandOutput, RunnerError> {
        let start = Instant::now();
        let output_file = tempfile::NamedTempFile::new().map_err(RunnerError::OutputFile)?;

        info!(
            command = %spec.command,
            workdir = %invocation.workdir.display(),
            "Executing shell command"
        );

        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(&spec.command)
            .current_dir(invocation.workdir)
            .envs(invocation.unit_env())
            .envs(invocation.env.iter().cloned())
            .envs(&spec.env)
            .env("MONOBUILD_OUTPUT", output_file.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RunnerError::Spawn {
                command: spec.command.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or(RunnerError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(RunnerError::MissingPipe("stderr"))?;
        let stdout_task =
            tokio::spawn(forward_lines(stdout, OutputStream::Stdout).in_current_span());
        let stderr_task =
            tokio::spawn(forward_lines(stderr, OutputStream::Stderr).in_current_span());

        let timeout_secs = spec.timeout_seconds.or(self.default_timeout_seconds);
        let wait = async {
            match timeout_secs {
                Some(secs) => timeout(Duration::from_secs(secs), child.wait())
                    .await
                    .map_err(|_| RunnerError::TimedOut(secs))?
                    .map_err(RunnerError::Wait),
                None => child.wait().await.map_err(RunnerError::Wait),
            }
        };
        let cancelled = async {
            match cancel {
                Some(cancel) => cancel.cancelled().await,
                None => std::future::pending().await,
            }
        };

        let waited = tokio::select! {
            status = wait => status,
            _ = cancelled => Err(RunnerError::Cancelled),
        };

        let status = match waited {
            Ok(status) => status,
            Err(err) => {
                warn!(error = %err, "Killing command");
                let _ = child.kill().await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(err);
            }
        };

        let stdout_tail = stdout_task.await.unwrap_or_default();
        let stderr_tail = stderr_task.await.unwrap_or_default();
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        let code = status.code().unwrap_or(-1);

        debug!(exit_code = code, duration_ms, "Command completed");

        if !status.success() {
            let tail = if stderr_tail.is_empty() {
                stdout_tail
            } else {
                stderr_tail
            };
            return Err(RunnerError::Exit {
                command: spec.command.clone(),
                code,
                tail,
            });
        }

        let reported = tokio::fs::read_to_string(output_file.path())
            .await
            .map_err(RunnerError::OutputFile)?;

        Ok(CommandOutput {
            duration_ms,
            artifact: parse_artifact(&reported, invocation.workdir),
        })
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new("sh", Some(3600))
    }
}

/// Drains a pipe to EOF. Lines that are not UTF-8 are decoded lossily so the
/// child never sees a closed pipe.
async fn forward_lines<R: AsyncRead + Unpin>(reader: R, stream: OutputStream) -> Vec<String> {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut tail = VecDeque::with_capacity(TAIL_LINES);

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                warn!(stream = %stream, error = %err, "Failed to read command output");
                break;
            }
        }
        let line = String::from_utf8_lossy(&buf)
            .trim_end_matches(['\n', '\r'])
            .to_string();
        debug!(stream = %stream, "{}", line);
        if tail.len() == TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    tail.into()
}

/// The last `artifact=` line wins.
fn parse_artifact(reported: &str, workdir: &Path) -> Option<PathBuf> {
    reported
        .lines()
        .filter_map(|line| line.trim().strip_prefix(ARTIFACT_PREFIX))
        .filter(|path| !path.is_empty())
        .next_back()
        .map(|path| workdir.join(path))
}
