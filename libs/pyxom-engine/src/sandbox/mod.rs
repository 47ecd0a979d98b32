/// Sandboxed Executors
///
/// **Responsibility:**
/// Run one submission against one stdin inside an isolated, reusable
/// Python interpreter and hand back the raw streams.
///
/// **Architectural Boundary:**
/// - A sandbox knows HOW to run code (local process, Docker container)
/// - It does NOT enforce the task timeout; the pool wraps `execute` and
///   terminates the sandbox when the deadline passes
/// - It does NOT judge output; the evaluator does
///
/// Both backends drive the same embedded harness over the JSON-lines
/// protocol in `pyxom_common::protocol`.

use crate::error::ExecutionError;
use async_trait::async_trait;
use pyxom_common::protocol::{ExecutorRequest, ExecutorResponse};
use serde::Serialize;

pub mod docker;
pub mod process;

#[cfg(test)]
pub(crate) mod scripted;

/// Interpreter-side harness shared by every backend
pub const HARNESS_SOURCE: &str = include_str!("harness.py");

pub const MAX_TEST_INPUT_BYTES: usize = 10 * 1024 * 1024; // 10MB

/// One unit of work for an executor
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub task_id: String,
    pub code: String,
    pub stdin: String,
    pub timeout_ms: u64,
}

impl ExecutionRequest {
    pub fn to_protocol(&self) -> ExecutorRequest {
        ExecutorRequest::Execute {
            task_id: self.task_id.clone(),
            code: self.code.clone(),
            stdin: self.stdin.clone(),
            timeout_ms: self.timeout_ms,
        }
    }
}

/// Raw streams of a run that finished without raising
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutput {
    pub stdout: String,
    pub stderr: String,
    /// `repr()` of a trailing expression statement, if it was not `None`
    pub return_value: Option<String>,
    pub duration_ms: u64,
}

/// An isolated interpreter owned by exactly one pool slot.
///
/// Implementations boot lazily in `start` and are reused across tasks
/// until `terminate`. After a timeout or an infrastructure error the pool
/// terminates the sandbox and never calls it again.
#[async_trait]
pub trait Sandbox: Send {
    /// Boot the interpreter if it is not running yet. Idempotent.
    async fn start(&mut self) -> Result<(), ExecutionError>;

    async fn execute(&mut self, request: &ExecutionRequest) -> Result<ExecutionOutput, ExecutionError>;

    /// Round-trip a ping through the harness
    async fn ping(&mut self) -> Result<(), ExecutionError>;

    async fn terminate(&mut self);
}

/// Creates fresh sandboxes for the pool, at startup and on replacement
pub trait SandboxFactory: Send + Sync {
    fn create(&self, executor_id: usize) -> Box<dyn Sandbox>;

    fn backend(&self) -> &'static str;
}

pub(crate) fn check_input(request: &ExecutionRequest) -> Result<(), ExecutionError> {
    if request.stdin.len() > MAX_TEST_INPUT_BYTES {
        return Err(ExecutionError::Infrastructure(format!(
            "Test input exceeds maximum size of {} bytes",
            MAX_TEST_INPUT_BYTES
        )));
    }
    Ok(())
}

/// Flatten an anyhow chain from backend plumbing into the typed taxonomy
pub(crate) fn infrastructure(err: anyhow::Error) -> ExecutionError {
    ExecutionError::Infrastructure(format!("{:#}", err))
}

/// Map the harness answer for `request` onto the execution result
pub(crate) fn interpret_response(
    request: &ExecutionRequest,
    response: ExecutorResponse,
    duration_ms: u64,
) -> Result<ExecutionOutput, ExecutionError> {
    match response {
        ExecutorResponse::ExecutionComplete { task_id, result, error } => {
            if task_id != request.task_id {
                return Err(ExecutionError::Infrastructure(format!(
                    "Harness answered task {} while {} was running",
                    task_id, request.task_id
                )));
            }
            let payload = result.unwrap_or_default();
            match error {
                Some(message) => Err(ExecutionError::Runtime {
                    message,
                    stdout: payload.stdout,
                    stderr: payload.stderr,
                }),
                None => Ok(ExecutionOutput {
                    stdout: payload.stdout,
                    stderr: payload.stderr,
                    return_value: payload.return_value,
                    duration_ms,
                }),
            }
        }
        ExecutorResponse::Error { error } => Err(ExecutionError::Infrastructure(format!(
            "Harness rejected request: {}",
            error
        ))),
        ExecutorResponse::Pong { .. } => Err(ExecutionError::Infrastructure(
            "Unexpected pong while waiting for an execution result".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyxom_common::protocol::ExecutionPayload;

    fn request() -> ExecutionRequest {
        ExecutionRequest {
            task_id: "t-1".to_string(),
            code: "print(1)".to_string(),
            stdin: String::new(),
            timeout_ms: 1000,
        }
    }

    #[test]
    fn test_interpret_success() {
        let response = ExecutorResponse::ExecutionComplete {
            task_id: "t-1".to_string(),
            result: Some(ExecutionPayload {
                stdout: "1\n".to_string(),
                stderr: String::new(),
                return_value: None,
            }),
            error: None,
        };

        let output = interpret_response(&request(), response, 7).unwrap();
        assert_eq!(output.stdout, "1\n");
        assert_eq!(output.duration_ms, 7);
    }

    #[test]
    fn test_interpret_runtime_error_keeps_partial_streams() {
        let response = ExecutorResponse::ExecutionComplete {
            task_id: "t-1".to_string(),
            result: Some(ExecutionPayload {
                stdout: "Suma: ".to_string(),
                stderr: "Traceback ...".to_string(),
                return_value: None,
            }),
            error: Some("TypeError: unsupported operand".to_string()),
        };

        let err = interpret_response(&request(), response, 3).unwrap_err();
        assert_eq!(err.kind(), "TypeError");
        assert_eq!(err.partial_output(), Some(("Suma: ", "Traceback ...")));
    }

    #[test]
    fn test_interpret_mismatched_task_is_infrastructure() {
        let response = ExecutorResponse::ExecutionComplete {
            task_id: "other".to_string(),
            result: None,
            error: None,
        };
        let err = interpret_response(&request(), response, 0).unwrap_err();
        assert!(err.poisons_executor());
    }

    #[test]
    fn test_input_cap() {
        let mut big = request();
        big.stdin = "x".repeat(MAX_TEST_INPUT_BYTES + 1);
        assert!(check_input(&big).is_err());
        assert!(check_input(&request()).is_ok());
    }

    #[test]
    fn test_harness_is_embedded() {
        assert!(HARNESS_SOURCE.contains("execution_complete"));
        assert!(HARNESS_SOURCE.contains("--once"));
        assert!(HARNESS_SOURCE.contains("os.fork()"));
    }
}
