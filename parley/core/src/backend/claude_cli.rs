//! Claude CLI Backend
//!
//! Runs the `claude` command-line client in print mode with stream-json
//! output and forwards each decoded line as a [`StreamItem`].
//!
//! The child process is killed when the turn is cancelled, when the
//! receiver is dropped, or when a line fails to decode.

use std::collections::VecDeque;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::events::{parse_line, StreamItem};
use super::traits::{GenerationRequest, GenerationService, STREAM_CHANNEL_CAPACITY};
use crate::error::StreamFailure;
use crate::sanitize::sanitize;

/// Stderr lines kept for the failure message
const STDERR_TAIL_LINES: usize = 5;

/// How to invoke the CLI
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClaudeCliConfig {
    /// Executable name or path
    pub executable: String,
    /// Arguments appended after the generated ones
    pub extra_args: Vec<String>,
}

impl Default for ClaudeCliConfig {
    fn default() -> Self {
        Self {
            executable: "claude".to_string(),
            extra_args: Vec::new(),
        }
    }
}

/// [`GenerationService`] backed by the `claude` CLI
#[derive(Clone, Debug, Default)]
pub struct ClaudeCliBackend {
    config: ClaudeCliConfig,
}

impl ClaudeCliBackend {
    /// Create a backend with the given invocation settings
    #[must_use]
    pub fn new(config: ClaudeCliConfig) -> Self {
        Self { config }
    }

    /// Invocation settings
    #[must_use]
    pub fn config(&self) -> &ClaudeCliConfig {
        &self.config
    }

    /// Command-line arguments for one request
    #[must_use]
    pub fn args(&self, request: &GenerationRequest) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            request.prompt.clone(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
            "--model".to_string(),
            request.model.clone(),
            "--max-turns".to_string(),
            request.max_turns.to_string(),
        ];
        args.extend(self.config.extra_args.iter().cloned());
        args
    }
}

#[async_trait]
impl GenerationService for ClaudeCliBackend {
    fn name(&self) -> &str {
        "claude-cli"
    }

    async fn stream(
        &self,
        request: &GenerationRequest,
    ) -> Result<mpsc::Receiver<StreamItem>, StreamFailure> {
        let executable = self.config.executable.clone();
        let mut child = Command::new(&executable)
            .args(self.args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| StreamFailure::Spawn(format!("failed to spawn `{executable}`: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| StreamFailure::Spawn("child stdout unavailable after spawn".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| StreamFailure::Spawn("child stderr unavailable after spawn".into()))?;

        debug!(
            executable = %executable,
            model = %request.model,
            max_turns = request.max_turns,
            pid = ?child.id(),
            "Spawned generation process"
        );

        // Drain stderr so the child never blocks on a full pipe
        let stderr_tail = tokio::spawn(async move {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(line = %sanitize(&line), "claude stderr");
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail.into_iter().collect::<Vec<_>>()
        });

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let cancel = request.cancel.clone();

        tokio::spawn(async move {
            let reader = BufReader::new(stdout);
            match forward_lines(reader, &tx, &cancel).await {
                LinesEnd::Eof => {
                    let tail = stderr_tail.await.unwrap_or_default();
                    if let Some(failure) = exit_failure(&mut child, &executable, &tail).await {
                        let _ = tx.send(Err(failure)).await;
                    }
                }
                LinesEnd::Stopped | LinesEnd::Failed => {
                    kill(&mut child).await;
                    stderr_tail.abort();
                }
            }
        });

        Ok(rx)
    }
}

/// How the stdout pump ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinesEnd {
    /// Stdout closed normally
    Eof,
    /// Cancelled, or nobody is listening any more
    Stopped,
    /// A failure item was sent
    Failed,
}

/// Decode lines from `reader` and forward them until EOF, cancellation or
/// the first failure
async fn forward_lines<R>(
    reader: R,
    tx: &mpsc::Sender<StreamItem>,
    cancel: &CancellationToken,
) -> LinesEnd
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return LinesEnd::Stopped,
            () = tx.closed() => return LinesEnd::Stopped,
            next = lines.next_line() => next,
        };

        let item = match next {
            Ok(Some(line)) => match parse_line(&line) {
                Ok(Some(message)) => {
                    trace!(kind = message.kind(), "stream event");
                    Ok(message)
                }
                Ok(None) => continue,
                Err(failure) => Err(failure),
            },
            Ok(None) => return LinesEnd::Eof,
            Err(e) => Err(StreamFailure::Transport(e.to_string())),
        };

        let failed = item.is_err();
        if tx.send(item).await.is_err() {
            return LinesEnd::Stopped;
        }
        if failed {
            return LinesEnd::Failed;
        }
    }
}

/// Wait for the child and turn a non-zero exit into a failure
async fn exit_failure(child: &mut Child, executable: &str, tail: &[String]) -> Option<StreamFailure> {
    match child.wait().await {
        Ok(status) if status.success() => None,
        Ok(status) => {
            let detail = tail.join("; ");
            Some(if detail.is_empty() {
                StreamFailure::service(format!("{executable} exited with {status}"))
            } else {
                StreamFailure::service(format!("{executable} exited with {status}: {detail}"))
            })
        }
        Err(e) => Some(StreamFailure::Transport(e.to_string())),
    }
}

async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        warn!(error = %e, "Failed to kill generation process");
    }
}
