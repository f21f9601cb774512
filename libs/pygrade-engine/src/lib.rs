//! Grading engine for auto-graded Python coding questions.
//!
//! Pipeline: [`extractor`] isolates function definitions, [`engine`] runs them
//! in a fresh sandboxed context per test case, [`evaluator`] compares printed
//! output, [`executor`] orchestrates one question, [`scoring`] folds results
//! into question and attempt scores, and [`session`] owns a test-taking session.

pub mod docker;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod extractor;
pub mod literal;
pub mod process;
pub mod scoring;
pub mod session;

#[cfg(test)]
mod fake;

pub use engine::{build_sandbox, Sandbox, SandboxSession};
pub use error::ExecutionError;
pub use executor::{run_program, run_test_cases, RunSummary};
pub use session::{grade_attempt, SessionError, TestSession};
