//! Process launching for task commands

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::reporter::{TaskEvent, TaskReporter};
use crate::task::TaskId;

/// A command to run for one task node
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    /// Task being run
    pub id: TaskId,
    /// Working directory (the workspace directory)
    pub dir: PathBuf,
    /// Shell command from the workspace manifest
    pub command: String,
    /// Extra environment variables
    pub env: BTreeMap<String, String>,
}

/// How a launched command ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchOutcome {
    /// Process exit code (-1 when terminated by a signal)
    pub exit_code: i32,
    /// Wall-clock time the command took
    pub duration: Duration,
}

impl LaunchOutcome {
    /// Whether the command exited with status zero
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs task commands.
///
/// Output is not interpreted; implementations forward it to the reporter as
/// [`TaskEvent::Output`] lines.
#[async_trait::async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Run the command to completion
    async fn execute(
        &self,
        request: &LaunchRequest,
        reporter: &dyn TaskReporter,
    ) -> Result<LaunchOutcome, LaunchError>;
}

/// Launcher that runs commands through `sh -c`
#[derive(Debug, Clone, Default)]
pub struct ShellLauncher;

#[async_trait::async_trait]
impl ProcessLauncher for ShellLauncher {
    async fn execute(
        &self,
        request: &LaunchRequest,
        reporter: &dyn TaskReporter,
    ) -> Result<LaunchOutcome, LaunchError> {
        let start = Instant::now();
        debug!(task = %request.id, command = %request.command, "spawning");

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&request.command)
            .current_dir(&request.dir)
            .envs(&request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                command: request.command.clone(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        tokio::join!(
            forward_lines(&request.id, stdout, false, reporter),
            forward_lines(&request.id, stderr, true, reporter),
        );

        let status = child.wait().await.map_err(LaunchError::Wait)?;
        Ok(LaunchOutcome {
            exit_code: status.code().unwrap_or(-1),
            duration: start.elapsed(),
        })
    }
}

/// Stream a child pipe to the reporter line by line.
///
/// Reads until EOF so the child never sees a closed pipe; bytes that are not
/// valid UTF-8 are replaced rather than ending the stream.
async fn forward_lines<R>(id: &TaskId, pipe: Option<R>, is_stderr: bool, reporter: &dyn TaskReporter)
where
    R: AsyncRead + Unpin,
{
    let Some(pipe) = pipe else {
        return;
    };
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                reporter.report(&TaskEvent::Output {
                    id: id.clone(),
                    line: line.trim_end_matches(['\n', '\r']).to_string(),
                    is_stderr,
                });
            }
            Err(e) => {
                warn!(task = %id, error = %e, "failed reading task output");
                break;
            }
        }
    }
}

/// Errors launching a task command
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    /// The shell could not be started
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Waiting for the process failed
    #[error("Failed to wait for process: {0}")]
    Wait(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::CollectingReporter;
    use tempfile::TempDir;

    fn request(dir: &std::path::Path, command: &str) -> LaunchRequest {
        LaunchRequest {
            id: TaskId::new("web", "build"),
            dir: dir.to_path_buf(),
            command: command.to_string(),
            env: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_successful_command_streams_output() {
        let temp = TempDir::new().unwrap();
        let reporter = CollectingReporter::default();

        let outcome = ShellLauncher
            .execute(&request(temp.path(), "echo hello; echo oops >&2"), &reporter)
            .await
            .unwrap();

        assert!(outcome.success());
        let lines: Vec<(String, bool)> = reporter
            .events()
            .into_iter()
            .filter_map(|e| match e {
                TaskEvent::Output { line, is_stderr, .. } => Some((line, is_stderr)),
                _ => None,
            })
            .collect();
        assert!(lines.contains(&("hello".to_string(), false)));
        assert!(lines.contains(&("oops".to_string(), true)));
    }

    #[tokio::test]
    async fn test_invalid_utf8_output_keeps_streaming() {
        let temp = TempDir::new().unwrap();
        let reporter = CollectingReporter::default();

        let outcome = ShellLauncher
            .execute(
                &request(temp.path(), "printf 'caf\\351\\n'; seq 1 200000"),
                &reporter,
            )
            .await
            .unwrap();

        assert!(outcome.success(), "exit code {}", outcome.exit_code);
        let lines: Vec<String> = reporter
            .events()
            .into_iter()
            .filter_map(|e| match e {
                TaskEvent::Output { line, .. } => Some(line),
                _ => None,
            })
            .collect();
        assert_eq!(lines.first().map(String::as_str), Some("caf\u{FFFD}"));
        assert_eq!(lines.last().map(String::as_str), Some("200000"));
        assert_eq!(lines.len(), 200_001);
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let temp = TempDir::new().unwrap();
        let outcome = ShellLauncher
            .execute(&request(temp.path(), "exit 3"), &CollectingReporter::default())
            .await
            .unwrap();
        assert_eq!(outcome.exit_code, 3);
        assert!(!outcome.success());
    }

    #[tokio::test]
    async fn test_runs_in_workspace_dir_with_env() {
        let temp = TempDir::new().unwrap();
        let mut req = request(temp.path(), "echo \"$GREETING\" > out.txt");
        req.env.insert("GREETING".to_string(), "hi".to_string());

        let outcome = ShellLauncher
            .execute(&req, &CollectingReporter::default())
            .await
            .unwrap();
        assert!(outcome.success());
        let written = std::fs::read_to_string(temp.path().join("out.txt")).unwrap();
        assert_eq!(written.trim(), "hi");
    }

    #[tokio::test]
    async fn test_missing_directory_fails_to_spawn() {
        let temp = TempDir::new().unwrap();
        let result = ShellLauncher
            .execute(
                &request(&temp.path().join("missing"), "true"),
                &CollectingReporter::default(),
            )
            .await;
        assert!(matches!(result, Err(LaunchError::Spawn { .. })));
    }
}
