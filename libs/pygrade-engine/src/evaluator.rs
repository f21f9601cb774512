/// Test Evaluator - Output Comparison
///
/// **Core Responsibility:**
/// Decide whether the printed output of a test case matches the expected
/// printed form, tolerating representational variance of Python values.
///
/// **Critical Properties:**
/// - Knows nothing about the sandbox
/// - Pure function: (execution output, expected output) → pass/fail
/// - Never panics; ambiguity is a mismatch
///
/// **Comparison Order (first match wins):**
/// 1. Exact string equality
/// 2. Equality after stripping one layer of matching quotes from each side
/// 3. Structural equality of the parsed literals after normalizing `()` to
///    `[]` and `'` to `"` (tuples vs lists, quote style)
/// 4. Canonical `True` / `False` / `None` tokens
///
/// **Normalization Rules:**
/// - Leading/trailing whitespace is trimmed on both sides before comparing
/// - Case sensitivity: YES

use crate::error::ExecutionError;
use crate::literal::parse_literal;
use pygrade_common::types::{ExecutionResult, TestCase};

const CANONICAL_TOKENS: &[&str] = &["True", "False", "None"];

/// Raw outcome of one test case, produced by the runner, consumed here
#[derive(Debug, Clone)]
pub struct TestExecutionOutput {
    pub test_num: usize,
    pub outcome: Result<String, ExecutionError>,
    pub execution_time_ms: u64,
}

fn normalize_output(output: &str) -> &str {
    output.trim()
}

fn strip_quotes(text: &str) -> &str {
    for quote in ['"', '\''] {
        if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote) {
            return &text[1..text.len() - 1];
        }
    }
    text
}

fn normalize_literal(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '(' => '[',
            ')' => ']',
            '\'' => '"',
            other => other,
        })
        .collect()
}

fn structurally_equal(actual: &str, expected: &str) -> Option<bool> {
    let actual = parse_literal(&normalize_literal(actual)).ok()?;
    let expected = parse_literal(&normalize_literal(expected)).ok()?;
    Some(actual == expected)
}

/// Compare actual printed output against the expected printed form
pub fn compare_outputs(actual: &str, expected: &str) -> bool {
    if actual == expected {
        return true;
    }

    if strip_quotes(actual) == strip_quotes(expected) {
        return true;
    }

    if structurally_equal(actual, expected) == Some(true) {
        return true;
    }

    CANONICAL_TOKENS.contains(&actual) && actual == expected
}

/// Evaluate a single test case execution output
///
/// An execution error always fails the test case; its marker becomes the
/// recorded actual output.
pub fn evaluate_test(output: &TestExecutionOutput, test_case: &TestCase) -> ExecutionResult {
    let expected = normalize_output(&test_case.output).to_string();

    let (passed, actual) = match &output.outcome {
        Ok(stdout) => {
            let actual = normalize_output(stdout);
            (compare_outputs(actual, &expected), actual.to_string())
        }
        Err(e) => (false, e.marker()),
    };

    ExecutionResult {
        passed,
        input: test_case.input.clone(),
        expected,
        actual,
        hidden: test_case.hidden,
    }
}
