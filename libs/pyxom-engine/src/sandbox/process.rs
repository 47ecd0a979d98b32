/// Local process backend.
///
/// Each executor is one long-lived `python3 -u` child running the harness.
/// Requests go down its stdin, responses come back on its stdout, one JSON
/// document per line. The child gets a cleared environment and is killed
/// when the sandbox is dropped. The harness forks per task, so imported
/// modules stay warm while anything a task mutates is thrown away.

use super::{
    check_input, infrastructure, interpret_response, ExecutionOutput, ExecutionRequest, Sandbox,
    SandboxFactory, HARNESS_SOURCE,
};
use crate::error::ExecutionError;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use pyxom_common::protocol::{decode_response, encode_request, ExecutorRequest, ExecutorResponse};
use std::process::Stdio;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

pub struct ProcessSandboxFactory {
    python_path: String,
}

impl ProcessSandboxFactory {
    pub fn new(python_path: impl Into<String>) -> Self {
        Self {
            python_path: python_path.into(),
        }
    }
}

impl SandboxFactory for ProcessSandboxFactory {
    fn create(&self, executor_id: usize) -> Box<dyn Sandbox> {
        Box::new(ProcessSandbox::new(executor_id, self.python_path.clone()))
    }

    fn backend(&self) -> &'static str {
        "process"
    }
}

struct Harness {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

pub struct ProcessSandbox {
    executor_id: usize,
    python_path: String,
    harness: Option<Harness>,
}

impl ProcessSandbox {
    pub fn new(executor_id: usize, python_path: String) -> Self {
        Self {
            executor_id,
            python_path,
            harness: None,
        }
    }

    fn spawn(&self) -> Result<Harness> {
        let mut command = Command::new(&self.python_path);
        command
            .arg("-u")
            .arg("-c")
            .arg(HARNESS_SOURCE)
            .env_clear()
            .env("PYTHONIOENCODING", "utf-8")
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Ok(path) = std::env::var("PATH") {
            command.env("PATH", path);
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to spawn interpreter '{}'", self.python_path))?;
        let stdin = child.stdin.take().context("Interpreter stdin was not captured")?;
        let stdout = child.stdout.take().context("Interpreter stdout was not captured")?;

        Ok(Harness {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    async fn roundtrip(&mut self, request: &ExecutorRequest) -> Result<ExecutorResponse> {
        let harness = match self.harness.as_mut() {
            Some(harness) => harness,
            None => bail!("Interpreter is not running"),
        };

        let line = encode_request(request).context("Failed to encode request")?;
        harness
            .stdin
            .write_all(line.as_bytes())
            .await
            .context("Failed to write request to interpreter")?;
        harness.stdin.flush().await.context("Failed to flush interpreter stdin")?;

        let mut response = String::new();
        let read = harness
            .stdout
            .read_line(&mut response)
            .await
            .context("Failed to read interpreter response")?;
        if read == 0 {
            bail!("Interpreter exited unexpectedly");
        }

        decode_response(&response).context("Malformed response from interpreter")
    }
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    async fn start(&mut self) -> Result<(), ExecutionError> {
        if self.harness.is_some() {
            return Ok(());
        }

        let harness = self.spawn().map_err(infrastructure)?;
        let pid = harness.child.id();
        self.harness = Some(harness);

        if let Err(e) = self.ping().await {
            self.terminate().await;
            return Err(e);
        }

        info!(executor_id = self.executor_id, pid = ?pid, "Interpreter process started");
        Ok(())
    }

    #[tracing::instrument(skip(self, request), fields(executor_id = self.executor_id, task_id = %request.task_id))]
    async fn execute(&mut self, request: &ExecutionRequest) -> Result<ExecutionOutput, ExecutionError> {
        check_input(request)?;
        self.start().await?;

        let started = Instant::now();
        let response = self
            .roundtrip(&request.to_protocol())
            .await
            .map_err(infrastructure)?;
        let duration_ms = started.elapsed().as_millis() as u64;

        debug!(duration_ms = duration_ms, "Harness answered");
        interpret_response(request, response, duration_ms)
    }

    async fn ping(&mut self) -> Result<(), ExecutionError> {
        match self.roundtrip(&ExecutorRequest::Ping).await.map_err(infrastructure)? {
            ExecutorResponse::Pong { .. } => Ok(()),
            other => Err(ExecutionError::Infrastructure(format!(
                "Expected pong from interpreter, got {:?}",
                other
            ))),
        }
    }

    async fn terminate(&mut self) {
        if let Some(mut harness) = self.harness.take() {
            if let Err(e) = harness.child.kill().await {
                warn!(executor_id = self.executor_id, error = %e, "Failed to kill interpreter process");
            } else {
                debug!(executor_id = self.executor_id, "Interpreter process terminated");
            }
        }
    }
}
