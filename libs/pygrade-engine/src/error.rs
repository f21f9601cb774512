use thiserror::Error;

/// Everything that can go wrong while running one test case.
///
/// All variants except `SandboxUnavailable` are contained per test case and
/// turned into a failed result; `SandboxUnavailable` aborts the question so
/// the caller can retry the grading pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("no function definitions found in submission")]
    ExtractionEmpty,

    #[error("SyntaxError: {0}")]
    Syntax(String),

    /// Exception raised by the submission, formatted as `Type: message`
    #[error("{0}")]
    Runtime(String),

    #[error("Execution timed out after {0}ms")]
    Timeout(u64),

    #[error("Sandbox protocol error: {0}")]
    Protocol(String),

    #[error("Source exceeds maximum size of {limit} bytes")]
    SourceTooLarge { limit: usize },

    #[error("Sandbox unavailable: {0}")]
    SandboxUnavailable(String),
}

impl ExecutionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExecutionError::SandboxUnavailable(_))
    }

    /// Text recorded as the actual output of a failed test case
    pub fn marker(&self) -> String {
        format!("Error: {}", self)
    }
}
