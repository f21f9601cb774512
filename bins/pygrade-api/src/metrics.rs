// Prometheus metrics for the grading API

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder, HistogramVec,
    IntCounter, IntCounterVec, TextEncoder,
};
use pygrade_common::types::ExecutionResult;

lazy_static! {
    pub static ref RUNS_TOTAL: IntCounter = register_int_counter!(
        "pygrade_runs_total",
        "Immediate-feedback runs requested"
    )
    .expect("metric can be registered");
    pub static ref TEST_CASES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "pygrade_test_cases_total",
        "Test cases executed, by outcome",
        &["outcome"]
    )
    .expect("metric can be registered");
    pub static ref ATTEMPTS_GRADED_TOTAL: IntCounter = register_int_counter!(
        "pygrade_attempts_graded_total",
        "Attempts passed through the final grading pass"
    )
    .expect("metric can be registered");
    pub static ref GRADING_DURATION: HistogramVec = register_histogram_vec!(
        "pygrade_grading_duration_seconds",
        "Wall-clock time spent grading, by operation",
        &["operation"]
    )
    .expect("metric can be registered");
}

pub fn record_results(results: &[ExecutionResult]) {
    for result in results {
        let outcome = if result.passed {
            "passed"
        } else if result.actual.starts_with("Error: ") {
            "error"
        } else {
            "failed"
        };
        TEST_CASES_TOTAL.with_label_values(&[outcome]).inc();
    }
}

/// Encode the default registry in the Prometheus text format
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_result(passed: bool, actual: &str) -> ExecutionResult {
        ExecutionResult {
            passed,
            input: "add(1, 2)".to_string(),
            expected: "3".to_string(),
            actual: actual.to_string(),
            hidden: false,
        }
    }

    #[test]
    fn test_record_results_by_outcome() {
        let before_error = TEST_CASES_TOTAL.with_label_values(&["error"]).get();
        let before_passed = TEST_CASES_TOTAL.with_label_values(&["passed"]).get();

        record_results(&[
            make_result(true, "3"),
            make_result(false, "Error: Execution timed out after 5000ms"),
        ]);

        assert!(TEST_CASES_TOTAL.with_label_values(&["error"]).get() >= before_error + 1);
        assert!(TEST_CASES_TOTAL.with_label_values(&["passed"]).get() >= before_passed + 1);
    }

    #[test]
    fn test_render_contains_metric_names() {
        RUNS_TOTAL.inc();
        ATTEMPTS_GRADED_TOTAL.inc();

        let text = render().unwrap();

        assert!(text.contains("pygrade_runs_total"));
        assert!(text.contains("pygrade_attempts_graded_total"));
    }
}
