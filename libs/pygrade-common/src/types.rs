use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Difficulty::Easy => write!(f, "easy"),
            Difficulty::Medium => write!(f, "medium"),
            Difficulty::Hard => write!(f, "hard"),
        }
    }
}

/// Submission kind of a question. Only `Code` questions are auto-graded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QuestionKind {
    #[default]
    Code,
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    /// Invocation expression, e.g. `add(5, 10)`. Empty means "run the definitions".
    pub input: String,
    /// Expected printed form of the result
    pub output: String,
    #[serde(default)]
    pub hidden: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub difficulty: Difficulty,
    #[serde(rename = "type", default)]
    pub kind: QuestionKind,
    pub text: String,
    pub marks: f64,
    #[serde(default)]
    pub starter_code: String,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
    /// Reference solution, informational only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_index: Option<usize>,
}

impl Question {
    pub fn validate(&self) -> Result<(), String> {
        if !self.marks.is_finite() || self.marks <= 0.0 {
            return Err(format!(
                "Question '{}' must have positive marks, got {}",
                self.id, self.marks
            ));
        }
        Ok(())
    }

    /// Whether the engine grades this question by running test cases
    pub fn is_auto_graded(&self) -> bool {
        self.kind == QuestionKind::Code && !self.test_cases.is_empty()
    }
}

/// A test as authored: the canonical question order lives here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Test {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub duration_minutes: u32,
    pub questions: Vec<Question>,
}

impl Test {
    pub fn validate(&self) -> Result<(), String> {
        if self.questions.is_empty() {
            return Err(format!("Test '{}' has no questions", self.id));
        }
        for question in &self.questions {
            question.validate()?;
        }
        Ok(())
    }

    pub fn find_question(&self, id: &str) -> Option<(usize, &Question)> {
        self.questions.iter().enumerate().find(|(_, q)| q.id == id)
    }

    /// Canonical index of the question at `position` in this test
    pub fn original_index(&self, position: usize) -> usize {
        self.questions
            .get(position)
            .and_then(|q| q.original_index)
            .unwrap_or(position)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub passed: bool,
    pub input: String,
    pub expected: String,
    pub actual: String,
    pub hidden: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QuestionStatus {
    Graded,
    NotAutoGraded,
    /// The interpreter could not be started; the question should be regraded
    SandboxUnavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionScore {
    pub question_number: usize,
    pub original_index: usize,
    pub score: f64,
    pub max_score: f64,
    pub passed_test_cases: usize,
    pub total_test_cases: usize,
    pub status: QuestionStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Termination {
    Submitted,
    TimeExpired,
    Abandoned,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Submitted => write!(f, "submitted"),
            Termination::TimeExpired => write!(f, "timeExpired"),
            Termination::Abandoned => write!(f, "abandoned"),
        }
    }
}

impl Termination {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "submitted" => Some(Termination::Submitted),
            "timeexpired" | "timeout" => Some(Termination::TimeExpired),
            "abandoned" => Some(Termination::Abandoned),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    pub id: Uuid,
    pub test_id: String,
    pub student_id: String,
    pub start_time: DateTime<Utc>,
    pub submit_time: DateTime<Utc>,
    pub question_scores: Vec<QuestionScore>,
    pub total_score: f64,
    pub max_score: f64,
    pub percentage: u32,
    pub termination: Termination,
    /// Submitted source per canonical question index
    pub answers: Vec<String>,
}

impl Attempt {
    pub fn needs_regrade(&self) -> bool {
        self.question_scores
            .iter()
            .any(|qs| qs.status == QuestionStatus::SandboxUnavailable)
    }

    pub fn auto_submitted(&self) -> bool {
        self.termination == Termination::TimeExpired
    }
}
