use serde::{Deserialize, Serialize};

/// Executor message protocol.
/// One JSON document per line, in both directions, between the pool side and
/// the interpreter harness running inside an executor. Field names match the
/// harness (`taskId`, `timeoutMs`, `returnValue`).

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutorRequest {
    #[serde(rename_all = "camelCase")]
    Execute {
        task_id: String,
        code: String,
        stdin: String,
        timeout_ms: u64,
    },
    Ping,
}

/// Streams captured by the harness for one task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPayload {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub return_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutorResponse {
    /// `error` is set when the submitted code raised; `result` still carries
    /// whatever was written before the exception.
    #[serde(rename_all = "camelCase")]
    ExecutionComplete {
        task_id: String,
        result: Option<ExecutionPayload>,
        error: Option<String>,
    },
    Pong {
        timestamp: i64,
    },
    Error {
        error: String,
    },
}

/// Encode a request as one protocol line (trailing newline included)
pub fn encode_request(request: &ExecutorRequest) -> serde_json::Result<String> {
    let mut line = serde_json::to_string(request)?;
    line.push('\n');
    Ok(line)
}

/// Decode one protocol line
pub fn decode_response(line: &str) -> serde_json::Result<ExecutorResponse> {
    serde_json::from_str(line.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_request_wire_format() {
        let request = ExecutorRequest::Execute {
            task_id: "task-1".to_string(),
            code: "print(1)".to_string(),
            stdin: "".to_string(),
            timeout_ms: 5000,
        };

        let line = encode_request(&request).unwrap();
        assert!(line.ends_with('\n'));

        let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value["type"], "execute");
        assert_eq!(value["taskId"], "task-1");
        assert_eq!(value["timeoutMs"], 5000);
    }

    #[test]
    fn test_ping_request_wire_format() {
        let line = encode_request(&ExecutorRequest::Ping).unwrap();
        assert_eq!(line, "{\"type\":\"ping\"}\n");
    }

    #[test]
    fn test_decode_success_response() {
        let line = r#"{"type":"execution_complete","taskId":"t","result":{"stdout":"8\n","stderr":"","returnValue":null},"error":null}"#;

        match decode_response(line).unwrap() {
            ExecutorResponse::ExecutionComplete { task_id, result, error } => {
                assert_eq!(task_id, "t");
                assert_eq!(result.unwrap().stdout, "8\n");
                assert_eq!(error, None);
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[test]
    fn test_decode_failure_response_without_result() {
        let line = r#"{"type":"execution_complete","taskId":"t","result":null,"error":"NameError: name 'x' is not defined"}"#;

        match decode_response(line).unwrap() {
            ExecutorResponse::ExecutionComplete { result, error, .. } => {
                assert!(result.is_none());
                assert!(error.unwrap().starts_with("NameError"));
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[test]
    fn test_decode_pong() {
        let response = decode_response("{\"type\":\"pong\",\"timestamp\":1700000000000}\n").unwrap();
        assert_eq!(response, ExecutorResponse::Pong { timestamp: 1_700_000_000_000 });
    }
}
