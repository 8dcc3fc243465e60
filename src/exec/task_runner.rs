// src/exec/task_runner.rs

//! Command-backed execution engine.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Context;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::errors::Result;
use crate::exec::backend::{ExecutionEngine, ExecutionRequest, ExecutionResult};

/// Upper bound on captured stdout/stderr per execution; older text is dropped.
const MAX_CAPTURE_BYTES: usize = 64 * 1024;

static TOKENS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\btokens?\s+used\s*[:=]\s*(\d+)").expect("token usage regex must compile")
});

/// Runs each task as a shell command.
///
/// - the task's own `command` wins; otherwise the configured template is used
///   with `{task_id}`, `{task_name}` and `{goal_id}` substituted;
/// - a process that stays silent for `stall_timeout` is killed and reported
///   as a retryable failure;
/// - a process still running at `max_runtime` is killed and reported as a
///   non-retryable failure;
/// - lines like `tokens used: 1234` on either stream are summed into
///   `tokens_used`.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    template: String,
    stall_timeout: Duration,
    max_runtime: Duration,
    terminate_grace: Duration,
}

impl CommandEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            template: config.command.clone(),
            stall_timeout: config.stall_timeout(),
            max_runtime: config.max_runtime(),
            terminate_grace: config.terminate_grace(),
        }
    }

    pub fn command_for(&self, request: &ExecutionRequest) -> String {
        match request.command.as_deref() {
            Some(cmd) if !cmd.trim().is_empty() => cmd.to_string(),
            _ => self
                .template
                .replace("{task_id}", &request.task_id)
                .replace("{task_name}", &request.task_name)
                .replace("{goal_id}", &request.goal_id),
        }
    }
}

impl ExecutionEngine for CommandEngine {
    fn execute(
        &mut self,
        request: ExecutionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ExecutionResult>> + Send + '_>> {
        let engine = self.clone();
        Box::pin(async move { engine.run(request).await })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

/// Why the engine stopped waiting on the process.
enum Ending {
    Exited(std::process::ExitStatus),
    Stalled,
    TimedOut,
}

impl CommandEngine {
    async fn run(&self, request: ExecutionRequest) -> Result<ExecutionResult> {
        let command = self.command_for(&request);
        info!(
            goal = %request.goal_id,
            task = %request.task_id,
            attempt = request.attempt,
            cmd = %command,
            "starting task process"
        );

        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&command);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&command);
            c
        };
        if let Some(dir) = request.working_dir.as_ref() {
            cmd.current_dir(dir);
        }
        cmd.env("WARDEN_GOAL_ID", &request.goal_id)
            .env("WARDEN_TASK_ID", &request.task_id)
            .env("WARDEN_ATTEMPT", request.attempt.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = Instant::now();
        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning process for task '{}'", request.task_id))?;

        let (line_tx, mut line_rx) = mpsc::channel::<(Stream, String)>(256);
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, Stream::Stdout, line_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, Stream::Stderr, line_tx.clone());
        }
        drop(line_tx);

        let mut capture = Capture::default();
        let ceiling = started + self.max_runtime;
        let mut stall_deadline = started + self.stall_timeout;
        let mut streams_open = true;

        let ending = loop {
            tokio::select! {
                status = child.wait() => {
                    let status = status.with_context(|| {
                        format!("waiting for process of task '{}'", request.task_id)
                    })?;
                    break Ending::Exited(status);
                }
                line = line_rx.recv(), if streams_open => {
                    match line {
                        Some((stream, line)) => {
                            stall_deadline = Instant::now() + self.stall_timeout;
                            capture.push(stream, &line);
                        }
                        None => streams_open = false,
                    }
                }
                _ = sleep_until(stall_deadline) => break Ending::Stalled,
                _ = sleep_until(ceiling) => break Ending::TimedOut,
            }
        };

        if !matches!(ending, Ending::Exited(_)) {
            terminate(&mut child, self.terminate_grace, &request.task_id).await;
        }

        // Collect whatever the readers still hold; a grandchild keeping the
        // pipes open must not hold up the result.
        let _ = timeout(self.terminate_grace, async {
            while let Some((stream, line)) = line_rx.recv().await {
                capture.push(stream, &line);
            }
        })
        .await;

        let duration_ms = started.elapsed().as_millis() as u64;
        let result = match ending {
            Ending::Exited(status) if status.success() => {
                ExecutionResult::success(capture.stdout.trim_end(), duration_ms)
            }
            Ending::Exited(status) => {
                let code = status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string());
                let stderr = capture.stderr.trim();
                let error = if stderr.is_empty() {
                    format!("process exited with status {code}")
                } else {
                    format!("process exited with status {code}: {}", last_lines(stderr, 5))
                };
                ExecutionResult::failure(error, duration_ms).with_output(capture.stdout.trim_end())
            }
            Ending::Stalled => ExecutionResult::failure(
                format!("no output for {}s; process killed", self.stall_timeout.as_secs()),
                duration_ms,
            )
            .with_output(capture.stdout.trim_end()),
            Ending::TimedOut => ExecutionResult::failure(
                format!(
                    "exceeded maximum runtime of {}s; process killed",
                    self.max_runtime.as_secs()
                ),
                duration_ms,
            )
            .with_output(capture.stdout.trim_end())
            .non_retryable(),
        }
        .with_tokens(capture.tokens);

        info!(
            goal = %request.goal_id,
            task = %request.task_id,
            success = result.success,
            duration_ms,
            tokens = result.tokens_used,
            "task process finished"
        );
        Ok(result)
    }
}

fn forward_lines<R>(reader: R, stream: Stream, tx: mpsc::Sender<(Stream, String)>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        // Raw bytes: a non-UTF-8 line must not stop the drain, or the child
        // would hit a closed pipe on its next write.
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let text = String::from_utf8_lossy(&buf);
            let line = text.trim_end_matches(['\n', '\r']).to_string();
            if tx.send((stream, line)).await.is_err() {
                break;
            }
        }
    });
}

/// Ask the process to stop, then kill it once `grace` has passed.
async fn terminate(child: &mut Child, grace: Duration, task_id: &str) {
    if request_terminate(child).await && timeout(grace, child.wait()).await.is_ok() {
        debug!(task = %task_id, "process exited after terminate request");
        return;
    }
    if let Err(e) = child.kill().await {
        warn!(task = %task_id, error = %e, "failed to kill task process");
    }
}

#[cfg(unix)]
async fn request_terminate(child: &Child) -> bool {
    let Some(pid) = child.id() else {
        return false;
    };
    Command::new("kill")
        .arg("-TERM")
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(not(unix))]
async fn request_terminate(_child: &Child) -> bool {
    false
}

#[derive(Debug, Default)]
struct Capture {
    stdout: String,
    stderr: String,
    tokens: u64,
}

impl Capture {
    fn push(&mut self, stream: Stream, line: &str) {
        if let Some(n) = TOKENS_RE
            .captures(line)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok())
        {
            self.tokens = self.tokens.saturating_add(n);
        }

        let buf = match stream {
            Stream::Stdout => &mut self.stdout,
            Stream::Stderr => {
                debug!("stderr: {}", line);
                &mut self.stderr
            }
        };
        buf.push_str(line);
        buf.push('\n');
        if buf.len() > MAX_CAPTURE_BYTES {
            let mut cut = buf.len() - MAX_CAPTURE_BYTES;
            while !buf.is_char_boundary(cut) {
                cut += 1;
            }
            buf.drain(..cut);
        }
    }
}

fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(n)..].join(" | ")
}
