//! Command execution inside running sandboxes.

use crate::error::{CoreError, Result};
use crate::sandbox::Sandbox;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use warden_runtime::mux::FrameDecoder;
use warden_runtime::{ContainerRuntime, ExecConfig, RuntimeError};

/// Default cap on accumulated output (10 MiB).
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

const TRUNCATION_MARKER: &str = "\n... [output truncated]";

/// A command to run in a sandbox.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Shell command, run via `sh -c`.
    pub command: String,
    /// Working directory (default: the sandbox workdir).
    pub workdir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    sink: Option<mpsc::UnboundedSender<Bytes>>,
}

impl ExecRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            workdir: None,
            env: BTreeMap::new(),
            sink: None,
        }
    }

    pub fn workdir(mut self, path: impl Into<PathBuf>) -> Self {
        self.workdir = Some(path.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Forward each output chunk to `sink` as it arrives.
    ///
    /// Output is still accumulated into the result. A dropped receiver
    /// stops forwarding but not the command.
    pub fn streaming(mut self, sink: mpsc::UnboundedSender<Bytes>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn is_streaming(&self) -> bool {
        self.sink.is_some()
    }
}

/// Result of a command that exited zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub exit_code: i64,
    /// Combined stdout and stderr in arrival order.
    pub output: String,
    pub success: bool,
    /// Whether output exceeded the cap and was cut.
    pub truncated: bool,
}

/// Runs commands in sandboxes and collects their multiplexed output.
pub struct ExecChannel {
    runtime: Arc<dyn ContainerRuntime>,
    max_output_bytes: usize,
}

impl ExecChannel {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    /// Set the cap on accumulated output.
    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }

    /// Run a command and wait for it to finish.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidState`] if the sandbox is not running
    /// - [`CoreError::Execution`] if the command exits non-zero
    /// - [`CoreError::SandboxTerminated`] if the sandbox died during the command
    /// - [`CoreError::Runtime`] if the output stream breaks or is malformed
    pub async fn run(&self, sandbox: &Sandbox, request: ExecRequest) -> Result<ExecutionResult> {
        sandbox.ensure_running()?;
        let start = std::time::Instant::now();

        let workdir = request
            .workdir
            .clone()
            .unwrap_or_else(|| sandbox.workdir().to_path_buf());
        let config = ExecConfig {
            cmd: vec!["sh".into(), "-c".into(), request.command.clone()],
            working_dir: Some(workdir.display().to_string()),
            env: request
                .env
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect(),
            attach_stdout: true,
            attach_stderr: true,
            tty: false,
        };

        tracing::debug!(
            sandbox_id = %sandbox.id(),
            command = %request.command,
            streaming = request.is_streaming(),
            "Executing command"
        );
        let exec_id = self.runtime.create_exec(sandbox.id(), &config).await?;
        let mut stream = self.runtime.start_exec(&exec_id).await?;

        let mut decoder = FrameDecoder::new();
        let mut output = OutputBuffer::new(self.max_output_bytes);
        let mut sink = request.sink;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            decoder.push(&chunk);
            while let Some(frame) = decoder.next_frame().map_err(RuntimeError::from)? {
                tracing::trace!(stream = ?frame.kind, len = frame.payload.len(), "Exec frame");
                if sink
                    .as_ref()
                    .is_some_and(|tx| tx.send(frame.payload.clone()).is_err())
                {
                    tracing::debug!(sandbox_id = %sandbox.id(), "Output sink closed, no longer forwarding");
                    sink = None;
                }
                output.push(&frame.payload);
            }
        }
        decoder.finish().map_err(RuntimeError::from)?;

        let truncated = output.truncated;
        let output = output.into_string();
        let inspect = self.runtime.inspect_exec(&exec_id).await?;

        tracing::info!(
            sandbox_id = %sandbox.id(),
            exit_code = ?inspect.exit_code,
            output_len = output.len(),
            truncated,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Command finished"
        );

        if inspect.exit_code == Some(0) {
            return Ok(ExecutionResult {
                exit_code: 0,
                output,
                success: true,
                truncated,
            });
        }

        if let Some(reason) = self.termination_reason(sandbox).await {
            tracing::warn!(sandbox_id = %sandbox.id(), reason = %reason, "Sandbox terminated during exec");
            return Err(CoreError::SandboxTerminated {
                sandbox: sandbox.name().to_string(),
                reason,
                output,
            });
        }

        let exit_code = inspect.exit_code.unwrap_or(-1);
        let output = if output.is_empty() {
            format!("command failed with exit code {exit_code}")
        } else {
            output
        };
        Err(CoreError::Execution { exit_code, output })
    }

    /// Why the sandbox is no longer usable, if it isn't.
    async fn termination_reason(&self, sandbox: &Sandbox) -> Option<String> {
        match self.runtime.inspect_container(sandbox.id()).await {
            Ok(inspect) if inspect.state.oom_killed => Some("killed by the OOM killer".into()),
            Ok(inspect) if !inspect.state.running => Some(format!(
                "sandbox exited with code {}",
                inspect.state.exit_code
            )),
            Ok(_) => None,
            Err(e) if e.is_not_found() => Some("sandbox no longer exists".into()),
            Err(e) => {
                tracing::warn!(sandbox_id = %sandbox.id(), error = %e, "Failed to inspect sandbox after exec");
                None
            }
        }
    }
}

/// Accumulates output up to a byte cap.
struct OutputBuffer {
    bytes: Vec<u8>,
    max: usize,
    truncated: bool,
}

impl OutputBuffer {
    fn new(max: usize) -> Self {
        Self {
            bytes: Vec::new(),
            max,
            truncated: false,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        let room = self.max.saturating_sub(self.bytes.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        self.bytes.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    fn into_string(self) -> String {
        let mut bytes = self.bytes;
        if self.truncated {
            // Back off to a char boundary so the cut doesn't leave a partial sequence.
            let valid = match std::str::from_utf8(&bytes) {
                Ok(s) => s.len(),
                Err(e) if e.error_len().is_none() => e.valid_up_to(),
                Err(_) => bytes.len(),
            };
            bytes.truncate(valid);
        }
        let mut text = String::from_utf8_lossy(&bytes).into_owned();
        if self.truncated {
            text.push_str(TRUNCATION_MARKER);
        }
        text
    }
}
