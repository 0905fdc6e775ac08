//! Out-of-process execution of transformation scripts.
//!
//! Every job gets its own scratch directory holding the staged script, the staged input and
//! the output written by the transform. The directory is removed before `execute` returns,
//! and dropping an in-flight job (cancellation, panic) removes it as well.

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::script::ScriptKey;

const INPUT_FILE_NAME: &str = "input.csv";
const OUTPUT_FILE_NAME: &str = "output.csv";
const STDERR_TAIL_BYTES: usize = 2048;

#[derive(Debug, Clone)]
pub struct RunRequest<'a> {
    pub script: &'a Path,
    pub input: &'a Path,
    pub output: &'a Path,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The process exited on its own. `exit_status` is `None` when it was killed by a signal.
    Completed {
        exit_status: Option<i32>,
        stderr: String,
    },
    TimedOut { after: Duration },
}

/// Backend able to run a staged script against a staged input.
#[async_trait]
pub trait TransformRunner: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, request: &RunRequest<'_>) -> std::io::Result<RunOutcome>;
}

/// Runs `{interpreter} {script} {input} {output}` as a child process.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    interpreter: String,
}

impl ProcessRunner {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }
}

#[async_trait]
impl TransformRunner for ProcessRunner {
    fn name(&self) -> &str {
        &self.interpreter
    }

    async fn run(&self, request: &RunRequest<'_>) -> std::io::Result<RunOutcome> {
        let mut command = Command::new(&self.interpreter);
        command
            .arg(request.script)
            .arg(request.input)
            .arg(request.output)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = request.script.parent() {
            command.current_dir(dir);
        }
        // Own process group, so a timeout also reaches whatever the interpreter spawned.
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn()?;
        let pid = child.id();
        match tokio::time::timeout(request.timeout, child.wait_with_output()).await {
            Ok(output) => {
                let output = output?;
                if !output.stdout.is_empty() {
                    debug!(
                        stdout = %String::from_utf8_lossy(&output.stdout),
                        "transform stdout"
                    );
                }
                Ok(RunOutcome::Completed {
                    exit_status: output.status.code(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                })
            }
            // Dropping the wait future drops the child, which kills it.
            Err(_) => {
                if let Some(pid) = pid {
                    kill_process_group(pid);
                }
                Ok(RunOutcome::TimedOut {
                    after: request.timeout,
                })
            }
        }
    }
}

fn kill_process_group(pid: u32) {
    #[cfg(unix)]
    {
        let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
        if rc != 0 {
            debug!(
                pid,
                error = %std::io::Error::last_os_error(),
                "transform process group already gone"
            );
        }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
    }
}

pub struct TransformExecutor {
    runner: Arc<dyn TransformRunner>,
    timeout: Duration,
    scratch_root: Option<PathBuf>,
}

impl TransformExecutor {
    pub fn new(
        runner: Arc<dyn TransformRunner>,
        timeout: Duration,
        scratch_root: Option<PathBuf>,
    ) -> Self {
        Self {
            runner,
            timeout,
            scratch_root,
        }
    }

    /// Stages `script_body` and `input`, runs the transform once and returns the bytes it
    /// wrote to the output path.
    pub async fn execute(
        &self,
        script: &ScriptKey,
        script_body: &[u8],
        input: &[u8],
    ) -> Result<Bytes> {
        let workspace = self.create_workspace()?;
        let result = self
            .run_in(workspace.path(), script, script_body, input)
            .await;

        let path = workspace.path().to_path_buf();
        if let Err(err) = workspace.close() {
            warn!(path = %path.display(), error = %err, "failed to remove scratch directory");
        }
        result
    }

    fn create_workspace(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("climsync-job-");
        let dir = match &self.scratch_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }

    async fn run_in(
        &self,
        dir: &Path,
        script: &ScriptKey,
        script_body: &[u8],
        input: &[u8],
    ) -> Result<Bytes> {
        let script_path = dir.join(script.file_name());
        let input_path = dir.join(INPUT_FILE_NAME);
        let output_path = dir.join(OUTPUT_FILE_NAME);

        tokio::fs::write(&script_path, script_body).await?;
        tokio::fs::write(&input_path, input).await?;

        let request = RunRequest {
            script: &script_path,
            input: &input_path,
            output: &output_path,
            timeout: self.timeout,
        };

        info!(
            runner = self.runner.name(),
            script = %script.storage_key,
            timeout_secs = self.timeout.as_secs(),
            "running transform"
        );

        let outcome = self.runner.run(&request).await.map_err(|err| SyncError::Execution {
            reason: format!("failed to launch '{}': {err}", self.runner.name()),
            exit_status: None,
            stderr: None,
        })?;

        match outcome {
            RunOutcome::TimedOut { after } => Err(SyncError::Execution {
                reason: format!("transform timed out after {}s", after.as_secs_f64()),
                exit_status: None,
                stderr: None,
            }),
            RunOutcome::Completed {
                exit_status: Some(0),
                stderr,
            } => match tokio::fs::read(&output_path).await {
                Ok(content) => {
                    if !stderr.trim().is_empty() {
                        debug!(stderr = %stderr_tail(&stderr), "transform stderr");
                    }
                    Ok(Bytes::from(content))
                }
                Err(err) if err.kind() == IoErrorKind::NotFound => Err(SyncError::Execution {
                    reason: "transform exited successfully but wrote no output file".into(),
                    exit_status: Some(0),
                    stderr: non_empty(stderr),
                }),
                Err(err) => Err(err.into()),
            },
            RunOutcome::Completed {
                exit_status,
                stderr,
            } => {
                let status = exit_status
                    .map(|code| format!("status {code}"))
                    .unwrap_or_else(|| "a signal".to_string());
                let tail = stderr_tail(&stderr);
                let reason = if tail.is_empty() {
                    format!("transform exited with {status}")
                } else {
                    format!("transform exited with {status}: {tail}")
                };
                Err(SyncError::Execution {
                    reason,
                    exit_status,
                    stderr: non_empty(stderr),
                })
            }
        }
    }
}

fn non_empty(stderr: String) -> Option<String> {
    if stderr.trim().is_empty() {
        None
    } else {
        Some(stderr)
    }
}

/// Last few KiB of stderr, trimmed to a char boundary.
fn stderr_tail(stderr: &str) -> &str {
    let trimmed = stderr.trim();
    if trimmed.len() <= STDERR_TAIL_BYTES {
        return trimmed;
    }
    let mut start = trimmed.len() - STDERR_TAIL_BYTES;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    &trimmed[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stderr_tail_keeps_the_end() {
        let long = format!("{}END", "é".repeat(STDERR_TAIL_BYTES));
        let tail = stderr_tail(&long);
        assert!(tail.ends_with("END"));
        assert!(tail.len() <= STDERR_TAIL_BYTES);
    }

    #[test]
    fn short_stderr_is_trimmed_only() {
        assert_eq!(stderr_tail("  oops\n"), "oops");
        assert_eq!(non_empty(" \n".into()), None);
    }
}
