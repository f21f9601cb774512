/// Test-Case Runner - High-Level Orchestration
///
/// **Responsibility:**
/// Coordinate extractor, sandbox and evaluator to produce one result per
/// test case of a question.
///
/// **Architecture:**
/// 1. Reduce the submission to its definitions once (extractor.rs)
/// 2. For every test case: fresh session, load, evaluate, close (engine.rs)
/// 3. Judge the printed output (evaluator.rs)
///
/// `run_program` is the companion "Your Output" run: the whole unextracted
/// submission executed once, for display only.
///
/// This module is the glue layer - it knows nothing about:
/// - How code executes (engine's job)
/// - How output is compared (evaluator's job)
/// - How scores are computed (scoring's job)

use crate::engine::Sandbox;
use crate::error::ExecutionError;
use crate::evaluator::{evaluate_test, TestExecutionOutput};
use crate::extractor::extract_definitions;
use pygrade_common::types::{ExecutionResult, TestCase};
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Run every test case against the submitted source, in order.
///
/// Per-test failures are contained as failed results. Only
/// `SandboxUnavailable` aborts the run and is returned as `Err`.
#[instrument(skip_all, fields(sandbox = sandbox.name(), test_count = test_cases.len()))]
pub async fn run_test_cases(
    sandbox: &dyn Sandbox,
    source: &str,
    test_cases: &[TestCase],
) -> Result<Vec<ExecutionResult>, ExecutionError> {
    let definitions = extract_definitions(source);

    if definitions.is_empty() {
        warn!("No function definitions found; failing all test cases");
        let marker = ExecutionError::ExtractionEmpty.marker();
        return Ok(test_cases
            .iter()
            .map(|tc| ExecutionResult {
                passed: false,
                input: tc.input.clone(),
                expected: tc.output.trim().to_string(),
                actual: marker.clone(),
                hidden: tc.hidden,
            })
            .collect());
    }

    let mut results = Vec::with_capacity(test_cases.len());

    for (index, test_case) in test_cases.iter().enumerate() {
        let output = run_single(sandbox, &definitions, test_case, index + 1).await?;

        match &output.outcome {
            Ok(_) => debug!(
                test_num = output.test_num,
                execution_ms = output.execution_time_ms,
                "Test case executed"
            ),
            Err(ExecutionError::Timeout(ms)) => warn!(
                test_num = output.test_num,
                timeout_ms = ms,
                "Test case timed out; test cannot pass"
            ),
            Err(e) => warn!(
                test_num = output.test_num,
                error = %e,
                "Test case failed with error; test cannot pass"
            ),
        }

        results.push(evaluate_test(&output, test_case));
    }

    let passed = results.iter().filter(|r| r.passed).count();
    info!(passed = passed, total = results.len(), "Test cases finished");

    Ok(results)
}

/// Execute the whole submission, top-level code included, and return what it
/// printed. Errors come back as their marker text so they can be shown to the
/// student; only `SandboxUnavailable` is returned as `Err`. Never scored.
#[instrument(skip_all, fields(sandbox = sandbox.name()))]
pub async fn run_program(sandbox: &dyn Sandbox, source: &str) -> Result<String, ExecutionError> {
    if source.trim().is_empty() {
        return Ok(String::new());
    }

    let mut session = sandbox.open().await?;
    let outcome = match session.load_definitions(source).await {
        Ok(()) => session.evaluate_expression("").await,
        Err(e) => Err(e),
    };
    session.close().await;

    match outcome {
        Ok(output) => Ok(output),
        Err(e) if e.is_retryable() => Err(e),
        Err(e) => {
            debug!(error = %e, "Program run failed");
            Ok(e.marker())
        }
    }
}

async fn run_single(
    sandbox: &dyn Sandbox,
    definitions: &str,
    test_case: &TestCase,
    test_num: usize,
) -> Result<TestExecutionOutput, ExecutionError> {
    let start = Instant::now();

    // A fresh context per test case; nothing carries over
    let mut session = sandbox.open().await?;

    let outcome = match session.load_definitions(definitions).await {
        Ok(()) => session.evaluate_expression(&test_case.input).await,
        Err(e) => Err(e),
    };
    session.close().await;

    let outcome = match outcome {
        Err(e) if e.is_retryable() => return Err(e),
        other => other,
    };

    Ok(TestExecutionOutput {
        test_num,
        outcome,
        execution_time_ms: start.elapsed().as_millis() as u64,
    })
}

/// Results split for display: visible test cases in full, hidden ones as counts
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub visible: Vec<ExecutionResult>,
    pub hidden_passed: usize,
    pub hidden_total: usize,
    pub passed: usize,
    pub total: usize,
}

impl RunSummary {
    pub fn from_results(results: &[ExecutionResult]) -> Self {
        let visible: Vec<ExecutionResult> = results.iter().filter(|r| !r.hidden).cloned().collect();
        let hidden_total = results.len() - visible.len();
        let hidden_passed = results.iter().filter(|r| r.hidden && r.passed).count();

        Self {
            visible,
            hidden_passed,
            hidden_total,
            passed: results.iter().filter(|r| r.passed).count(),
            total: results.len(),
        }
    }

    /// False for a question without test cases; there is nothing to pass
    pub fn all_passed(&self) -> bool {
        self.total > 0 && self.passed == self.total
    }

    /// A code question counts as answered once any test case passes
    pub fn any_passed(&self) -> bool {
        self.passed > 0
    }
}
