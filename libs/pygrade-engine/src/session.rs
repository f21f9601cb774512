/// Test Session - one student taking one test
///
/// Owns everything that changes while a test is in progress: the display
/// order, the current answer per question and the start time. Created when
/// the test starts, consumed by `finalize` when it ends.
///
/// **Indexing:**
/// - Display position: where the student sees the question (0-based)
/// - Canonical index: position in `Test::questions`; answers are stored by it
///
/// Immediate feedback (`run_question`) and final grading are independent:
/// `finalize` re-runs every question from scratch and never reuses feedback
/// results, so grading the same answers twice yields the same scores.

use crate::engine::Sandbox;
use crate::error::ExecutionError;
use crate::executor::{run_program, run_test_cases, RunSummary};
use crate::scoring::{
    canonical_order, is_attempted, not_auto_graded, sandbox_failure_score, score_question,
    AttemptTotals, Placement,
};
use chrono::{DateTime, Utc};
use pygrade_common::types::{Attempt, ExecutionResult, Question, Termination, Test};
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("invalid test: {0}")]
    InvalidTest(String),

    #[error("question order must be a permutation of 0..{0}")]
    InvalidOrder(usize),

    #[error("no question at position {0}")]
    QuestionOutOfRange(usize),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

pub struct TestSession {
    test: Test,
    student_id: String,
    start_time: DateTime<Utc>,
    order: Vec<usize>,
    answers: Vec<String>,
    /// Canonically indexed; set once any test case of the question passed
    answered: Vec<bool>,
}

impl TestSession {
    /// Start a test in canonical order with every answer seeded from the starter code
    pub fn new(test: Test, student_id: impl Into<String>) -> Result<Self, SessionError> {
        test.validate().map_err(SessionError::InvalidTest)?;

        let order = (0..test.questions.len()).collect();
        let answers = test
            .questions
            .iter()
            .map(|q| q.starter_code.clone())
            .collect();
        let answered = vec![false; test.questions.len()];

        Ok(Self {
            test,
            student_id: student_id.into(),
            start_time: Utc::now(),
            order,
            answers,
            answered,
        })
    }

    /// Use a per-student display order: `order[display_position] = canonical index`
    pub fn with_order(mut self, order: Vec<usize>) -> Result<Self, SessionError> {
        validate_order(&order, self.test.questions.len())?;
        self.order = order;
        Ok(self)
    }

    pub fn test(&self) -> &Test {
        &self.test
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn canonical(&self, display_position: usize) -> Result<usize, SessionError> {
        self.order
            .get(display_position)
            .copied()
            .ok_or(SessionError::QuestionOutOfRange(display_position))
    }

    pub fn question(&self, display_position: usize) -> Option<&Question> {
        let canonical = self.canonical(display_position).ok()?;
        self.test.questions.get(canonical)
    }

    pub fn set_answer(
        &mut self,
        display_position: usize,
        code: impl Into<String>,
    ) -> Result<(), SessionError> {
        let canonical = self.canonical(display_position)?;
        self.answers[canonical] = code.into();
        Ok(())
    }

    pub fn answer(&self, display_position: usize) -> Option<&str> {
        let canonical = self.canonical(display_position).ok()?;
        self.answers.get(canonical).map(String::as_str)
    }

    /// Questions whose answer is still empty or untouched starter code
    pub fn unanswered(&self) -> usize {
        self.test
            .questions
            .iter()
            .zip(&self.answers)
            .filter(|(q, a)| !is_attempted(a, &q.starter_code))
            .count()
    }

    /// Whether a feedback run of this question has passed at least one test case
    pub fn is_answered(&self, display_position: usize) -> bool {
        self.canonical(display_position)
            .is_ok_and(|canonical| self.answered[canonical])
    }

    /// Immediate feedback for the current answer of one question. Marks the
    /// question answered when any test case passes; never affects scores.
    pub async fn run_question(
        &mut self,
        sandbox: &dyn Sandbox,
        display_position: usize,
    ) -> Result<Vec<ExecutionResult>, SessionError> {
        let canonical = self.canonical(display_position)?;
        let question = &self.test.questions[canonical];

        if !question.is_auto_graded() {
            return Ok(Vec::new());
        }

        let results = run_test_cases(sandbox, &self.answers[canonical], &question.test_cases).await?;
        if RunSummary::from_results(&results).any_passed() {
            self.answered[canonical] = true;
        }
        Ok(results)
    }

    /// Run the whole current answer once and return what it printed
    pub async fn run_program(
        &self,
        sandbox: &dyn Sandbox,
        display_position: usize,
    ) -> Result<String, SessionError> {
        let canonical = self.canonical(display_position)?;
        Ok(run_program(sandbox, &self.answers[canonical]).await?)
    }

    /// End the test and grade every answer from scratch
    pub async fn finalize(self, sandbox: &dyn Sandbox, termination: Termination) -> Attempt {
        let Self {
            test,
            student_id,
            start_time,
            order,
            answers,
            ..
        } = self;

        // The order and answers were validated when the session was built
        grade_validated(sandbox, &test, &order, answers, student_id, start_time, termination).await
    }
}

fn validate_order(order: &[usize], len: usize) -> Result<(), SessionError> {
    let mut seen = vec![false; len];
    if order.len() != len {
        return Err(SessionError::InvalidOrder(len));
    }
    for &index in order {
        match seen.get_mut(index) {
            Some(slot) if !*slot => *slot = true,
            _ => return Err(SessionError::InvalidOrder(len)),
        }
    }
    Ok(())
}

/// Final grading pass over a whole answer sheet.
///
/// `order[display_position]` is the canonical index shown at that position
/// (`None` for canonical order); `answers` is indexed canonically and may be
/// shorter than the question list. Idempotent: depends only on the answers
/// and the test cases. A sandbox failure on one question scores that
/// question 0 and grading continues.
pub async fn grade_attempt(
    sandbox: &dyn Sandbox,
    test: &Test,
    order: Option<&[usize]>,
    answers: &[String],
    student_id: &str,
    start_time: DateTime<Utc>,
    termination: Termination,
) -> Result<Attempt, SessionError> {
    test.validate().map_err(SessionError::InvalidTest)?;

    let order: Vec<usize> = match order {
        Some(order) => {
            validate_order(order, test.questions.len())?;
            order.to_vec()
        }
        None => (0..test.questions.len()).collect(),
    };

    let mut answers: Vec<String> = answers.iter().take(test.questions.len()).cloned().collect();
    answers.resize(test.questions.len(), String::new());

    Ok(grade_validated(
        sandbox,
        test,
        &order,
        answers,
        student_id.to_string(),
        start_time,
        termination,
    )
    .await)
}

#[instrument(skip_all, fields(test_id = %test.id, student_id = %student_id, termination = %termination))]
async fn grade_validated(
    sandbox: &dyn Sandbox,
    test: &Test,
    order: &[usize],
    answers: Vec<String>,
    student_id: String,
    start_time: DateTime<Utc>,
    termination: Termination,
) -> Attempt {
    let mut question_scores = Vec::with_capacity(order.len());

    for (display_position, &canonical) in order.iter().enumerate() {
        let question = &test.questions[canonical];
        let placement = Placement::new(display_position, test.original_index(canonical));

        if !question.is_auto_graded() {
            question_scores.push(not_auto_graded(placement, question));
            continue;
        }

        let score = match run_test_cases(sandbox, &answers[canonical], &question.test_cases).await {
            Ok(results) => score_question(placement, question, &results),
            Err(e) => {
                warn!(
                    question_id = %question.id,
                    error = %e,
                    "Sandbox unavailable; question scored 0 and flagged for regrade"
                );
                sandbox_failure_score(placement, question)
            }
        };
        question_scores.push(score);
    }

    let totals = AttemptTotals::from_scores(&question_scores);

    info!(
        total_score = totals.total_score,
        max_score = totals.max_score,
        percentage = totals.percentage,
        "Attempt graded"
    );

    Attempt {
        id: Uuid::new_v4(),
        test_id: test.id.clone(),
        student_id,
        start_time,
        submit_time: Utc::now(),
        question_scores: canonical_order(question_scores),
        total_score: totals.total_score,
        max_score: totals.max_score,
        percentage: totals.percentage,
        termination,
        answers,
    }
}
