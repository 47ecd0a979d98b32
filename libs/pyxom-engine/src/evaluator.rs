/// Test Evaluator - Output Comparison and Scoring
///
/// **Core Responsibility:**
/// Compare raw execution outcomes against expected outputs and assign points.
///
/// **Critical Properties:**
/// - Knows nothing about executors, the pool or the interpreter
/// - Pure functions: (outcome, test case) → verdict
///
/// **Scoring Rules:**
/// - A test earns its points only if it ran without error and its output matched
/// - A static check earns its points only if it passed
/// - max_possible_points = sum of all test and check points
/// - overall_passed: every test and every check passed
///
/// **Normalization Rules:**
/// - Line endings: CRLF and lone CR become LF
/// - Trailing whitespace on each line: stripped
/// - Trailing blank lines: removed
/// - Leading whitespace: preserved
/// - Case sensitivity: YES (exact match required)

use crate::error::ExecutionError;
use crate::sandbox::ExecutionOutput;
use pyxom_common::types::{AttemptResult, SingleTestRunResult, StaticCheckRunResult, TestCase};
use tracing::debug;

/// Normalize program output for comparison
pub fn normalize_output(output: &str) -> String {
    let unified = output.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<&str> = unified.lines().map(|line| line.trim_end()).collect();
    let keep = lines.iter().rposition(|line| !line.is_empty()).map_or(0, |last| last + 1);
    lines[..keep].join("\n")
}

/// Judge one test from its execution outcome.
///
/// `wall_ms` is used as the duration when the executor reported none
/// (errors, timeouts, queue rejections).
pub fn evaluate_test(
    test_case: &TestCase,
    outcome: &Result<ExecutionOutput, ExecutionError>,
    wall_ms: u64,
) -> SingleTestRunResult {
    let expected = normalize_output(&test_case.expected);

    match outcome {
        Ok(output) => {
            let normalized = normalize_output(&output.stdout);
            let passed = normalized == expected;
            if !passed {
                debug!(expected = %expected, actual = %normalized, "Output mismatch");
            }
            SingleTestRunResult {
                test_case: test_case.clone(),
                actual_output: output.stdout.clone(),
                normalized_actual_output: normalized,
                passed,
                duration_ms: output.duration_ms,
                error: None,
                error_kind: None,
                points_earned: if passed { test_case.weight() } else { 0 },
            }
        }
        Err(err) => {
            let partial = err.partial_output().map(|(stdout, _)| stdout).unwrap_or("");
            let kind = err.kind();
            let error = match err {
                ExecutionError::Runtime { message, .. } if message.starts_with(kind.as_str()) => message.clone(),
                other => format!("{}: {}", kind, other),
            };
            SingleTestRunResult {
                test_case: test_case.clone(),
                actual_output: partial.to_string(),
                normalized_actual_output: normalize_output(partial),
                passed: false,
                duration_ms: wall_ms,
                error: Some(error),
                error_kind: Some(kind),
                points_earned: 0,
            }
        }
    }
}

/// Fold per-test and per-check results into an attempt.
/// Feedback lists are left empty for the feedback engine to fill.
pub fn aggregate_results(
    test_run_results: Vec<SingleTestRunResult>,
    static_check_run_results: Vec<StaticCheckRunResult>,
    max_possible_points: u64,
    duration_ms: u64,
    timestamp: i64,
) -> AttemptResult {
    let tests_passed_count = test_run_results.iter().filter(|r| r.passed).count();
    let static_checks_passed_count = static_check_run_results.iter().filter(|r| r.passed).count();

    // Per-item points are u32; totals widen so many heavy items cannot overflow
    let test_points: u64 = test_run_results.iter().map(|r| u64::from(r.points_earned)).sum();
    let check_points: u64 = static_check_run_results.iter().map(|r| u64::from(r.points_earned)).sum();

    let overall_passed = tests_passed_count == test_run_results.len()
        && static_checks_passed_count == static_check_run_results.len();

    AttemptResult {
        timestamp,
        overall_passed,
        total_tests: test_run_results.len(),
        tests_passed_count,
        total_static_checks: static_check_run_results.len(),
        static_checks_passed_count,
        duration_ms,
        total_points_earned: test_points + check_points,
        max_possible_points,
        test_run_results,
        static_check_run_results,
        triggered_hints: Vec::new(),
        triggered_pitfalls: Vec::new(),
        error_explanations: Vec::new(),
        rejection: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyxom_common::types::StaticCheckSummary;

    fn output(stdout: &str) -> Result<ExecutionOutput, ExecutionError> {
        Ok(ExecutionOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            return_value: None,
            duration_ms: 12,
        })
    }

    fn check_result(id: &str, passed: bool, points: u32) -> StaticCheckRunResult {
        StaticCheckRunResult {
            check: StaticCheckSummary {
                id: id.to_string(),
                description: String::new(),
                points,
            },
            passed,
            message: None,
            error: None,
            points_earned: if passed { points } else { 0 },
        }
    }

    #[test]
    fn test_normalize_output() {
        assert_eq!(normalize_output("hello"), "hello");
        assert_eq!(normalize_output("hello\n"), "hello");
        assert_eq!(normalize_output("hello  \nworld\t\n\n\n"), "hello\nworld");
        assert_eq!(normalize_output("a\r\nb\rc"), "a\nb\nc");
        assert_eq!(normalize_output(""), "");
        assert_eq!(normalize_output("   \n\n"), "");
    }

    #[test]
    fn test_normalize_preserves_leading_whitespace_and_case() {
        assert_eq!(normalize_output("  indented\n"), "  indented");
        assert_eq!(normalize_output("\nfirst blank line kept"), "\nfirst blank line kept");
        assert_ne!(normalize_output("Suma"), normalize_output("suma"));
    }

    #[test]
    fn test_evaluate_exact_match() {
        let test_case = TestCase::new("5\n3", "Suma: 8\nProducto: 15").with_points(5);
        let result = evaluate_test(&test_case, &output("Suma: 8\nProducto: 15\n"), 40);

        assert!(result.passed);
        assert_eq!(result.points_earned, 5);
        assert_eq!(result.duration_ms, 12);
        assert_eq!(result.actual_output, "Suma: 8\nProducto: 15\n");
        assert_eq!(result.normalized_actual_output, "Suma: 8\nProducto: 15");
    }

    #[test]
    fn test_evaluate_windows_line_endings_match() {
        let test_case = TestCase::new("", "a\nb");
        assert!(evaluate_test(&test_case, &output("a \r\nb\r\n"), 0).passed);
    }

    #[test]
    fn test_evaluate_mismatch() {
        let test_case = TestCase::new("5\n3", "Suma: 8\nProducto: 15").with_points(5);
        let result = evaluate_test(&test_case, &output("Suma: 53\nProducto: 15\n"), 0);

        assert!(!result.passed);
        assert_eq!(result.points_earned, 0);
        assert_eq!(result.error, None);
    }

    #[test]
    fn test_evaluate_runtime_error() {
        let test_case = TestCase::new("5\n3", "Suma: 8");
        let outcome = Err(ExecutionError::Runtime {
            message: "TypeError: can only concatenate str (not \"int\") to str".to_string(),
            stdout: "Suma: 53\n".to_string(),
            stderr: String::new(),
        });

        let result = evaluate_test(&test_case, &outcome, 30);

        assert!(!result.passed);
        assert_eq!(result.error_kind.as_deref(), Some("TypeError"));
        assert_eq!(result.error.as_deref(), Some("TypeError: can only concatenate str (not \"int\") to str"));
        assert_eq!(result.actual_output, "Suma: 53\n");
        assert_eq!(result.duration_ms, 30);
    }

    #[test]
    fn test_evaluate_timeout() {
        let test_case = TestCase::new("", "done").with_points(3);
        let outcome = Err(ExecutionError::ExecutionTimeout { timeout_ms: 2000 });

        let result = evaluate_test(&test_case, &outcome, 2001);

        assert!(!result.passed);
        assert_eq!(result.points_earned, 0);
        assert_eq!(result.error_kind.as_deref(), Some("ExecutionTimeout"));
        assert_eq!(result.error.as_deref(), Some("ExecutionTimeout: Execution timed out after 2000ms"));
        assert_eq!(result.actual_output, "");
    }

    #[test]
    fn test_error_never_passes_even_with_matching_output() {
        let test_case = TestCase::new("", "ok");
        let outcome = Err(ExecutionError::Runtime {
            message: "ValueError: late failure".to_string(),
            stdout: "ok\n".to_string(),
            stderr: String::new(),
        });
        assert!(!evaluate_test(&test_case, &outcome, 0).passed);
    }

    #[test]
    fn test_aggregate_points_and_counts() {
        let tests = vec![
            evaluate_test(&TestCase::new("", "a").with_points(5), &output("a"), 0),
            evaluate_test(&TestCase::new("", "b"), &output("x"), 0),
        ];
        let checks = vec![check_result("c1", true, 1), check_result("c2", false, 2)];

        let result = aggregate_results(tests, checks, 5 + 1 + 1 + 2, 100, 1);

        assert!(!result.overall_passed);
        assert_eq!(result.total_tests, 2);
        assert_eq!(result.tests_passed_count, 1);
        assert_eq!(result.total_static_checks, 2);
        assert_eq!(result.static_checks_passed_count, 1);
        assert_eq!(result.total_points_earned, 6);
        assert_eq!(result.max_possible_points, 9);
        assert!(result.total_points_earned <= result.max_possible_points);
    }

    #[test]
    fn test_aggregate_points_beyond_u32() {
        let tests = vec![
            evaluate_test(&TestCase::new("", "a").with_points(u32::MAX), &output("a"), 0),
            evaluate_test(&TestCase::new("", "b").with_points(u32::MAX), &output("b"), 0),
        ];
        let checks = vec![check_result("c1", true, u32::MAX)];
        let max = 3 * u64::from(u32::MAX);

        let result = aggregate_results(tests, checks, max, 10, 1);

        assert!(result.overall_passed);
        assert_eq!(result.total_points_earned, max);
        assert_eq!(result.max_possible_points, max);
    }

    #[test]
    fn test_aggregate_all_pass() {
        let tests = vec![evaluate_test(&TestCase::new("", "a"), &output("a\n"), 0)];
        let checks = vec![check_result("c1", true, 1)];

        let result = aggregate_results(tests, checks, 2, 10, 1);

        assert!(result.overall_passed);
        assert_eq!(result.total_points_earned, result.max_possible_points);
    }

    #[test]
    fn test_aggregate_failed_check_fails_attempt() {
        let tests = vec![evaluate_test(&TestCase::new("", "a"), &output("a"), 0)];
        let checks = vec![check_result("no_eval", false, 0)];

        assert!(!aggregate_results(tests, checks, 1, 0, 0).overall_passed);
    }
}
