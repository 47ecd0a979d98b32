/// Test Runner - Grading Orchestration
///
/// **Responsibility:**
/// Turn one submission plus one exercise into one `AttemptResult`.
///
/// **Pipeline:**
/// 1. Security gate, once. A rejection ends the attempt before any executor is used.
/// 2. Static checks, in-process over the token stream.
/// 3. Every test submitted to the pool up front; the pool bounds concurrency.
/// 4. Outcomes joined back in test order and judged by the evaluator.
/// 5. Feedback selected from the finished attempt.
///
/// Only pool-level failures (`QueueFull`, `PoolClosed`) abort grading. Every
/// other failure is recorded on the test it happened to.

use crate::error::GradingError;
use crate::evaluator::{aggregate_results, evaluate_test};
use crate::exercise::{max_possible_points, ExerciseSpec};
use crate::feedback::{explain_errors, select_feedback};
use crate::lexer::tokenize;
use crate::pool::WorkerPool;
use crate::security::SecurityValidator;
use crate::static_checks::StaticCodeCheck;
use futures_util::future::join_all;
use pyxom_common::config::Config;
use pyxom_common::types::{AttemptResult, TestCase};
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub default_timeout_ms: u64,
    pub max_timeout_ms: u64,
    pub max_hints_auto: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 10_000,
            max_timeout_ms: 30_000,
            max_hints_auto: 3,
        }
    }
}

impl RunnerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_timeout_ms: config.default_timeout_ms,
            max_timeout_ms: config.max_timeout_ms,
            max_hints_auto: config.max_hints_auto,
        }
    }

    /// Per-test timeout: the test's own, else the exercise's, else the default,
    /// clamped to `1..=max_timeout_ms`
    pub fn resolve_timeout(&self, test: &TestCase, global_timeout_ms: Option<u64>) -> u64 {
        test.timeout_ms
            .or(global_timeout_ms)
            .unwrap_or(self.default_timeout_ms)
            .clamp(1, self.max_timeout_ms.max(1))
    }
}

#[derive(Clone)]
pub struct TestRunner {
    pool: WorkerPool,
    validator: SecurityValidator,
    config: RunnerConfig,
}

impl TestRunner {
    pub fn new(pool: WorkerPool, config: RunnerConfig) -> Self {
        Self {
            pool,
            validator: SecurityValidator::default(),
            config,
        }
    }

    pub fn with_validator(mut self, validator: SecurityValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn validator(&self) -> &SecurityValidator {
        &self.validator
    }

    /// Grade `code` against bare tests and checks, without feedback
    #[tracing::instrument(
        skip(self, code, tests, checks),
        fields(tests = tests.len(), checks = checks.len(), code_bytes = code.len())
    )]
    pub async fn run_tests(
        &self,
        code: &str,
        tests: &[TestCase],
        checks: &[StaticCodeCheck],
        global_timeout_ms: Option<u64>,
    ) -> Result<AttemptResult, GradingError> {
        let started = Instant::now();
        let timestamp = chrono::Utc::now().timestamp_millis();
        let max_points = max_possible_points(tests, checks);

        if let Err(violation) = self.validator.validate(code) {
            warn!(
                construct = %violation.construct,
                line = ?violation.line,
                "Submission rejected by security gate"
            );
            let mut attempt = violation.into_attempt(timestamp, max_points);
            attempt.duration_ms = started.elapsed().as_millis() as u64;
            return Ok(attempt);
        }

        let tokens = tokenize(code);
        let check_results: Vec<_> = checks.iter().map(|check| check.run(code, &tokens)).collect();

        // Submit everything before awaiting anything so the pool sees the
        // whole attempt in test order
        let pending: Vec<_> = tests
            .iter()
            .map(|test| {
                let timeout_ms = self.config.resolve_timeout(test, global_timeout_ms);
                (self.pool.submit(code, test.input.as_str(), timeout_ms), Instant::now())
            })
            .collect();

        let outcomes = join_all(pending.into_iter().map(|(handle, submitted_at)| async move {
            let outcome = handle.await;
            (outcome, submitted_at.elapsed().as_millis() as u64)
        }))
        .await;

        let mut test_results = Vec::with_capacity(tests.len());
        for (test, (outcome, wall_ms)) in tests.iter().zip(outcomes) {
            if let Err(err) = &outcome {
                if let Some(fatal) = GradingError::from_execution(err) {
                    warn!(error = %fatal, "Grading aborted by worker pool");
                    return Err(fatal);
                }
            }
            test_results.push(evaluate_test(test, &outcome, wall_ms));
        }

        let attempt = aggregate_results(
            test_results,
            check_results,
            max_points,
            started.elapsed().as_millis() as u64,
            timestamp,
        );

        info!(
            tests_passed = attempt.tests_passed_count,
            tests_total = attempt.total_tests,
            checks_passed = attempt.static_checks_passed_count,
            points = attempt.total_points_earned,
            max_points = attempt.max_possible_points,
            duration_ms = attempt.duration_ms,
            "Attempt graded"
        );

        Ok(attempt)
    }

    /// Grade `code` against a full exercise, including hints and pitfalls
    #[tracing::instrument(skip(self, code, exercise), fields(exercise_id = %exercise.id))]
    pub async fn grade(
        &self,
        code: &str,
        exercise: &ExerciseSpec,
        hints_requested: bool,
    ) -> Result<AttemptResult, GradingError> {
        let mut attempt = self
            .run_tests(code, &exercise.tests, &exercise.static_code_checks, exercise.global_timeout_ms)
            .await?;

        if let Some(declared) = exercise.max_points {
            if declared != attempt.max_possible_points {
                warn!(
                    declared = declared,
                    computed = attempt.max_possible_points,
                    "Declared maxPoints differs from test and check points"
                );
            }
        }

        let max_auto = exercise
            .max_hints_to_show_automatically
            .unwrap_or(self.config.max_hints_auto);
        let selection = select_feedback(
            &exercise.hints,
            &exercise.common_pitfalls,
            &attempt,
            hints_requested,
            max_auto,
        );
        attempt.triggered_hints = selection.hints;
        attempt.triggered_pitfalls = selection.pitfalls;
        attempt.error_explanations = explain_errors(&attempt);

        Ok(attempt)
    }
}
