use serde::{Deserialize, Serialize};

/// Placeholder written over hidden test data before a result leaves the engine
pub const REDACTED: &str = "[hidden]";

/// Test Case Definition (Immutable Input)
/// `input` is fed to the program as stdin, `expected` is compared against
/// its normalized stdout. Authored per exercise, never mutated by the grader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub input: String,
    pub expected: String,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

impl TestCase {
    pub fn new(input: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            name: None,
            input: input.into(),
            expected: expected.into(),
            hidden: false,
            timeout_ms: None,
            points: None,
            feedback: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_points(mut self, points: u32) -> Self {
        self.points = Some(points);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Points awarded when this test passes (unweighted tests count as 1)
    pub fn weight(&self) -> u32 {
        self.points.unwrap_or(1)
    }
}

/// Reference to a single test case, by authored name or by position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TestCaseRef {
    Index(usize),
    Name(String),
}

/// When a hint or pitfall should be surfaced.
///
/// Wire format follows the exercise authoring format:
/// `"onAnyFailure"`, `"onAllTestsFailed"`, `"onRequest"`,
/// `{"errorType": "TypeError"}`, `{"staticCheckFailedId": "no_eval"}`,
/// `{"testCaseFailed": "Basic"}` / `{"testCaseFailed": 2}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FeedbackCondition {
    OnAnyFailure,
    OnAllTestsFailed,
    OnRequest,
    ErrorType(String),
    #[serde(rename = "staticCheckFailedId", alias = "staticCheckFailed")]
    StaticCheckFailed(String),
    #[serde(alias = "testCaseFailedName", alias = "testCaseFailedIndex")]
    TestCaseFailed(TestCaseRef),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<FeedbackCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonPitfall {
    pub id: String,
    #[serde(alias = "explanation")]
    pub text: String,
    #[serde(default, alias = "trigger", skip_serializing_if = "Option::is_none")]
    pub condition: Option<FeedbackCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<u32>,
}

/// Generic explanation of one error class seen in an attempt, independent
/// of the exercise's authored hints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorExplanation {
    /// Error class it explains, e.g. `NameError`
    pub kind: String,
    pub title: String,
    pub explanation: String,
    pub suggestions: Vec<String>,
}

/// Per-Test Result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleTestRunResult {
    pub test_case: TestCase,
    /// Raw stdout, verbatim, for diagnostic display
    pub actual_output: String,
    pub normalized_actual_output: String,
    pub passed: bool,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Exception or failure class, e.g. `TypeError` or `ExecutionTimeout`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub points_earned: u32,
}

/// Serializable identity of the static check a result belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticCheckSummary {
    pub id: String,
    pub description: String,
    pub points: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticCheckRunResult {
    pub check: StaticCheckSummary,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub points_earned: u32,
}

/// Why an attempt was refused before anything ran
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRejection {
    /// Always `SecurityViolation` today
    pub kind: String,
    /// The offending import, builtin or loop construct
    pub construct: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

/// Aggregate outcome of grading one submission against one exercise.
///
/// ## Scoring Semantics:
/// - total_points_earned: sum of points for passed tests and checks
/// - max_possible_points: sum of all test and check points
/// - overall_passed: every test and every static check passed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptResult {
    /// Unix epoch milliseconds
    pub timestamp: i64,
    pub overall_passed: bool,
    pub test_run_results: Vec<SingleTestRunResult>,
    pub static_check_run_results: Vec<StaticCheckRunResult>,
    pub total_tests: usize,
    pub tests_passed_count: usize,
    pub total_static_checks: usize,
    pub static_checks_passed_count: usize,
    pub duration_ms: u64,
    pub total_points_earned: u64,
    pub max_possible_points: u64,
    pub triggered_hints: Vec<Hint>,
    pub triggered_pitfalls: Vec<CommonPitfall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error_explanations: Vec<ErrorExplanation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection: Option<AttemptRejection>,
}

impl AttemptResult {
    /// Copy of this result that is safe to show to the student: hidden
    /// tests keep their verdict and points but lose input, expected and
    /// actual output, and error detail beyond the error kind.
    pub fn redacted(&self) -> AttemptResult {
        let mut result = self.clone();
        for run in result.test_run_results.iter_mut().filter(|r| r.test_case.hidden) {
            run.test_case.input = REDACTED.to_string();
            run.test_case.expected = REDACTED.to_string();
            run.actual_output = REDACTED.to_string();
            run.normalized_actual_output = REDACTED.to_string();
            run.error = run.error_kind.clone();
        }
        result
    }

    pub fn was_rejected(&self) -> bool {
        self.rejection.is_some()
    }
}
