/// Score Aggregator
///
/// Turns runner results into per-question scores and folds those into the
/// totals of an attempt.
///
/// **Rules:**
/// - score = marks × passed / total, 0 when there are no test cases
/// - Scores and totals are rounded to 2 decimals, half away from zero
/// - percentage = round(100 × total / max), 0 when max is 0
/// - Every score keeps its canonical `original_index`, so any display order
///   can be restored by sorting on it

use pygrade_common::types::{ExecutionResult, Question, QuestionScore, QuestionStatus};

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Where a question sits: its 0-based display position and canonical index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub display_position: usize,
    pub original_index: usize,
}

impl Placement {
    pub fn new(display_position: usize, original_index: usize) -> Self {
        Self {
            display_position,
            original_index,
        }
    }

    /// 1-based number shown to the student
    pub fn question_number(&self) -> usize {
        self.display_position + 1
    }
}

pub fn question_score(marks: f64, passed: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round2(marks * passed as f64 / total as f64)
}

pub fn score_question(
    placement: Placement,
    question: &Question,
    results: &[ExecutionResult],
) -> QuestionScore {
    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    QuestionScore {
        question_number: placement.question_number(),
        original_index: placement.original_index,
        score: question_score(question.marks, passed, total),
        max_score: question.marks,
        passed_test_cases: passed,
        total_test_cases: total,
        status: QuestionStatus::Graded,
    }
}

/// Zero score for a question whose sandbox could not be started
pub fn sandbox_failure_score(placement: Placement, question: &Question) -> QuestionScore {
    QuestionScore {
        question_number: placement.question_number(),
        original_index: placement.original_index,
        score: 0.0,
        max_score: question.marks,
        passed_test_cases: 0,
        total_test_cases: question.test_cases.len(),
        status: QuestionStatus::SandboxUnavailable,
    }
}

/// Non-code questions and questions without test cases are never auto-credited
pub fn not_auto_graded(placement: Placement, question: &Question) -> QuestionScore {
    QuestionScore {
        question_number: placement.question_number(),
        original_index: placement.original_index,
        score: 0.0,
        max_score: question.marks,
        passed_test_cases: 0,
        total_test_cases: question.test_cases.len(),
        status: QuestionStatus::NotAutoGraded,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttemptTotals {
    pub total_score: f64,
    pub max_score: f64,
    pub percentage: u32,
}

impl AttemptTotals {
    pub fn from_scores(scores: &[QuestionScore]) -> Self {
        let total_score = round2(scores.iter().map(|s| s.score).sum());
        let max_score: f64 = scores.iter().map(|s| s.max_score).sum();

        let percentage = if max_score > 0.0 {
            (100.0 * total_score / max_score).round().max(0.0) as u32
        } else {
            0
        };

        Self {
            total_score,
            max_score,
            percentage,
        }
    }
}

/// Restore canonical question order regardless of display order
pub fn canonical_order(mut scores: Vec<QuestionScore>) -> Vec<QuestionScore> {
    scores.sort_by_key(|s| s.original_index);
    scores
}

/// Whether the student touched an answer at all.
///
/// Presentation only: used for answered/unanswered counts, never for scores.
pub fn is_attempted(submitted: &str, starter: &str) -> bool {
    let submitted = submitted.trim();
    !submitted.is_empty() && submitted != starter.trim()
}
