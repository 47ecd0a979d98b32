// Prometheus metrics for the Pyxom API

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntGauge, Opts, Registry, TextEncoder,
};
use pyxom_common::types::AttemptResult;
use pyxom_engine::PoolStatus;
use std::sync::Once;

lazy_static! {
    // Global registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Graded attempts (passed, failed, rejected, error)
    pub static ref ATTEMPTS_GRADED: CounterVec = CounterVec::new(
        Opts::new("pyxom_attempts_graded_total", "Total number of attempts graded"),
        &["outcome"]
    )
    .expect("metric can be created");

    // Attempt grading time (in milliseconds)
    pub static ref ATTEMPT_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "pyxom_attempt_duration_ms",
            "Attempt grading time in milliseconds"
        )
        .buckets(vec![10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0]),
        &["outcome"]
    )
    .expect("metric can be created");

    // Security gate rejections by offending construct
    pub static ref SECURITY_REJECTIONS: CounterVec = CounterVec::new(
        Opts::new("pyxom_security_rejections_total", "Total submissions rejected by the security gate"),
        &["construct"]
    )
    .expect("metric can be created");

    // Per-test execution errors by kind (TypeError, ExecutionTimeout, ...)
    pub static ref TEST_ERRORS: CounterVec = CounterVec::new(
        Opts::new("pyxom_test_errors_total", "Total test runs that ended in an error"),
        &["kind"]
    )
    .expect("metric can be created");

    // API request counter
    pub static ref API_REQUESTS: CounterVec = CounterVec::new(
        Opts::new("pyxom_api_requests_total", "Total API requests"),
        &["endpoint", "status"]
    )
    .expect("metric can be created");

    pub static ref POOL_BUSY: IntGauge =
        IntGauge::new("pyxom_pool_busy_executors", "Executors currently running a task")
            .expect("metric can be created");

    pub static ref POOL_QUEUE_LENGTH: IntGauge =
        IntGauge::new("pyxom_pool_queue_length", "Tasks waiting for an executor")
            .expect("metric can be created");

    pub static ref POOL_REPLACED: IntGauge =
        IntGauge::new("pyxom_pool_replaced_executors", "Executors replaced after a timeout or crash")
            .expect("metric can be created");
}

static INIT: Once = Once::new();

/// Initialize metrics registry
pub fn init_metrics() {
    INIT.call_once(|| {
        REGISTRY
            .register(Box::new(ATTEMPTS_GRADED.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(ATTEMPT_DURATION.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(SECURITY_REJECTIONS.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(TEST_ERRORS.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(API_REQUESTS.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(POOL_BUSY.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(POOL_QUEUE_LENGTH.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(POOL_REPLACED.clone()))
            .expect("collector can be registered");
    });
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

pub fn outcome_label(attempt: &AttemptResult) -> &'static str {
    if attempt.was_rejected() {
        "rejected"
    } else if attempt.overall_passed {
        "passed"
    } else {
        "failed"
    }
}

/// Record a finished attempt
pub fn record_attempt(attempt: &AttemptResult) {
    let outcome = outcome_label(attempt);
    ATTEMPTS_GRADED.with_label_values(&[outcome]).inc();
    ATTEMPT_DURATION
        .with_label_values(&[outcome])
        .observe(attempt.duration_ms as f64);

    if let Some(rejection) = &attempt.rejection {
        SECURITY_REJECTIONS
            .with_label_values(&[rejection.construct.as_str()])
            .inc();
    }
    for kind in attempt.test_run_results.iter().filter_map(|r| r.error_kind.as_deref()) {
        TEST_ERRORS.with_label_values(&[kind]).inc();
    }
}

/// Record an attempt the pool refused to grade
pub fn record_grading_error() {
    ATTEMPTS_GRADED.with_label_values(&["error"]).inc();
}

pub fn record_request(endpoint: &str, status: u16) {
    API_REQUESTS
        .with_label_values(&[endpoint, &status.to_string()])
        .inc();
}

pub fn update_pool_gauges(status: &PoolStatus) {
    POOL_BUSY.set(status.busy_executors as i64);
    POOL_QUEUE_LENGTH.set(status.queue_length as i64);
    POOL_REPLACED.set(status.replaced_executors as i64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyxom_common::types::AttemptRejection;

    fn empty_attempt() -> AttemptResult {
        AttemptResult {
            timestamp: 0,
            overall_passed: true,
            test_run_results: vec![],
            static_check_run_results: vec![],
            total_tests: 0,
            tests_passed_count: 0,
            total_static_checks: 0,
            static_checks_passed_count: 0,
            duration_ms: 5,
            total_points_earned: 0,
            max_possible_points: 0,
            triggered_hints: vec![],
            triggered_pitfalls: vec![],
            error_explanations: vec![],
            rejection: None,
        }
    }

    #[test]
    fn test_outcome_label() {
        let mut attempt = empty_attempt();
        assert_eq!(outcome_label(&attempt), "passed");

        attempt.overall_passed = false;
        assert_eq!(outcome_label(&attempt), "failed");

        attempt.rejection = Some(AttemptRejection {
            kind: "SecurityViolation".into(),
            construct: "subprocess".into(),
            message: String::new(),
            line: Some(1),
        });
        assert_eq!(outcome_label(&attempt), "rejected");
    }

    #[test]
    fn test_record_and_render() {
        init_metrics();
        init_metrics();

        let mut attempt = empty_attempt();
        attempt.overall_passed = false;
        attempt.rejection = Some(AttemptRejection {
            kind: "SecurityViolation".into(),
            construct: "ctypes".into(),
            message: String::new(),
            line: None,
        });

        let before = SECURITY_REJECTIONS.with_label_values(&["ctypes"]).get();
        record_attempt(&attempt);
        assert_eq!(SECURITY_REJECTIONS.with_label_values(&["ctypes"]).get(), before + 1.0);

        let text = render_metrics().unwrap();
        assert!(text.contains("pyxom_attempts_graded_total"));
        assert!(text.contains("pyxom_security_rejections_total"));
    }
}
