use thiserror::Error;

/// Everything that can go wrong between submitting code and getting its
/// streams back. Per-test failures are recorded on the test result; only
/// `QueueFull` and `PoolClosed` abort a whole grading run. Rejected code
/// never reaches the pool, so it has no variant here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("Task timeout in queue after {waited_ms}ms")]
    QueueTimeout { waited_ms: u64 },

    #[error("Execution timed out after {timeout_ms}ms")]
    ExecutionTimeout { timeout_ms: u64 },

    /// The submitted code raised. `message` is `"Kind: detail"`; the
    /// streams hold whatever was written before the exception.
    #[error("{message}")]
    Runtime {
        message: String,
        stdout: String,
        stderr: String,
    },

    #[error("Executor failure: {0}")]
    Infrastructure(String),

    #[error("Execution queue is full ({0} tasks waiting)")]
    QueueFull(usize),

    #[error("Worker pool is closed")]
    PoolClosed,
}

impl ExecutionError {
    pub fn runtime(message: impl Into<String>) -> Self {
        ExecutionError::Runtime {
            message: message.into(),
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    /// Short class name recorded as `errorKind` and matched by
    /// `ErrorType` feedback conditions
    pub fn kind(&self) -> String {
        match self {
            ExecutionError::QueueTimeout { .. } => "QueueTimeout".to_string(),
            ExecutionError::ExecutionTimeout { .. } => "ExecutionTimeout".to_string(),
            ExecutionError::Runtime { message, .. } => runtime_kind(message).to_string(),
            ExecutionError::Infrastructure(_) => "InfrastructureError".to_string(),
            ExecutionError::QueueFull(_) => "QueueFull".to_string(),
            ExecutionError::PoolClosed => "PoolClosed".to_string(),
        }
    }

    /// Whether the executor that produced this error must be discarded
    pub fn poisons_executor(&self) -> bool {
        matches!(
            self,
            ExecutionError::ExecutionTimeout { .. } | ExecutionError::Infrastructure(_)
        )
    }

    /// Streams captured before the failure, if any
    pub fn partial_output(&self) -> Option<(&str, &str)> {
        match self {
            ExecutionError::Runtime { stdout, stderr, .. } => Some((stdout, stderr)),
            _ => None,
        }
    }
}

/// Extract `TypeError` from `"TypeError: can only concatenate str"`
fn runtime_kind(message: &str) -> &str {
    let head = message.split_once(':').map_or(message, |(head, _)| head).trim();
    let is_identifier = !head.is_empty()
        && head.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.');
    if is_identifier {
        head.rsplit('.').next().unwrap_or(head)
    } else {
        "RuntimeError"
    }
}

/// Failures that stop a whole grading run. Anything else is folded into
/// the per-test results.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GradingError {
    #[error("Execution queue is full ({0} tasks waiting)")]
    QueueFull(usize),

    #[error("Worker pool is closed")]
    PoolClosed,
}

impl GradingError {
    /// Lift the execution errors that must abort grading
    pub fn from_execution(error: &ExecutionError) -> Option<GradingError> {
        match error {
            ExecutionError::QueueFull(waiting) => Some(GradingError::QueueFull(*waiting)),
            ExecutionError::PoolClosed => Some(GradingError::PoolClosed),
            _ => None,
        }
    }
}
