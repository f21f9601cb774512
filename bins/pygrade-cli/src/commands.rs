// CLI commands for running and grading submissions
use anyhow::{bail, Context, Result};
use chrono::Utc;
use pygrade_common::config::GraderConfig;
use pygrade_common::types::{Attempt, QuestionStatus, Termination, Test};
use pygrade_engine::engine::probe;
use pygrade_engine::extractor::{extract_definitions, has_definitions};
use pygrade_engine::scoring::canonical_order;
use pygrade_engine::{build_sandbox, grade_attempt, run_program, run_test_cases, RunSummary};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

fn load_config(path: Option<&Path>) -> Result<GraderConfig> {
    match path {
        Some(path) => GraderConfig::load(path),
        None => GraderConfig::load_default(),
    }
}

/// Load and validate a question bank file
fn load_test(path: &Path) -> Result<Test> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read question bank {}", path.display()))?;
    let test: Test = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse question bank {}", path.display()))?;

    if let Err(e) = test.validate() {
        bail!("Invalid question bank {}: {}", path.display(), e);
    }

    Ok(test)
}

/// Answers keyed by question id, returned in canonical question order
fn load_answers(path: &Path, test: &Test) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read answers {}", path.display()))?;
    let mut by_id: HashMap<String, String> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse answers {}", path.display()))?;

    for id in by_id.keys() {
        if test.find_question(id).is_none() {
            bail!("Answer given for unknown question '{}'", id);
        }
    }

    Ok(test
        .questions
        .iter()
        .map(|q| by_id.remove(&q.id).unwrap_or_default())
        .collect())
}

fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read submission {}", path.display()))
}

/// Print the extracted definitions
pub fn extract(code: &Path) -> Result<()> {
    let source = read_source(code)?;

    if !has_definitions(&source) {
        println!("⚠️  No function definitions found in {}", code.display());
        return Ok(());
    }

    println!("{}", extract_definitions(&source));
    Ok(())
}

/// Run one question and print feedback the way a student would see it
pub async fn run_question(
    config: Option<&Path>,
    questions: &Path,
    question_id: &str,
    code: &Path,
) -> Result<()> {
    let config = load_config(config)?;
    let test = load_test(questions)?;
    let Some((_, question)) = test.find_question(question_id) else {
        bail!("Question '{}' not found in {}", question_id, questions.display());
    };
    if !question.is_auto_graded() {
        bail!("Question '{}' has no test cases to run", question.id);
    }
    let source = read_source(code)?;

    let sandbox = build_sandbox(&config)?;
    println!("🚀 Running {} ({} test cases, {} sandbox)", question.id, question.test_cases.len(), sandbox.name());
    println!();

    let program_output = run_program(sandbox.as_ref(), &source)
        .await
        .context("Sandbox unavailable; try again")?;
    println!("📤 Your output:");
    if program_output.trim().is_empty() {
        println!("     (nothing printed)");
    }
    for line in program_output.lines() {
        println!("     {}", line);
    }
    println!();

    let results = run_test_cases(sandbox.as_ref(), &source, &question.test_cases)
        .await
        .context("Sandbox unavailable; try again")?;
    let summary = RunSummary::from_results(&results);

    for (idx, result) in summary.visible.iter().enumerate() {
        let mark = if result.passed { "✅" } else { "❌" };
        println!("{} Test {}: {}", mark, idx + 1, result.input);
        println!("     expected: {}", result.expected);
        println!("     actual:   {}", result.actual);
    }

    if summary.hidden_total > 0 {
        println!(
            "🔒 Hidden tests: {}/{} passed",
            summary.hidden_passed, summary.hidden_total
        );
    }

    println!();
    if summary.all_passed() {
        println!("🎉 All {} test cases passed", summary.total);
    } else {
        println!("📊 {}/{} test cases passed", summary.passed, summary.total);
    }

    Ok(())
}

/// Grade an answer sheet and print (or dump) the attempt
pub async fn grade(
    config: Option<&Path>,
    questions: &Path,
    answers: &Path,
    student: &str,
    termination: &str,
    order: Option<&[usize]>,
    json: bool,
) -> Result<()> {
    let Some(termination) = Termination::from_str(termination) else {
        bail!(
            "Invalid termination '{}'. Valid options: submitted, time-expired, abandoned",
            termination
        );
    };

    let config = load_config(config)?;
    let test = load_test(questions)?;
    let answers = load_answers(answers, &test)?;
    let sandbox = build_sandbox(&config)?;

    let attempt = grade_attempt(
        sandbox.as_ref(),
        &test,
        order,
        &answers,
        student,
        Utc::now(),
        termination,
    )
    .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&attempt)?);
    } else {
        print_attempt(&test, &attempt);
    }

    Ok(())
}

/// Id of the question whose canonical index is `original_index`
fn question_id_for(test: &Test, original_index: usize) -> Option<&str> {
    (0..test.questions.len())
        .find(|&position| test.original_index(position) == original_index)
        .map(|position| test.questions[position].id.as_str())
}

fn print_attempt(test: &Test, attempt: &Attempt) {
    println!("📝 {} - {}", test.title, attempt.student_id);
    println!("   Attempt: {}", attempt.id);
    println!("   Ended:   {}", attempt.termination);
    println!();

    for score in canonical_order(attempt.question_scores.clone()) {
        let question_id = question_id_for(test, score.original_index).unwrap_or("?");
        let detail = match score.status {
            QuestionStatus::Graded => format!(
                "{}/{} tests",
                score.passed_test_cases, score.total_test_cases
            ),
            QuestionStatus::NotAutoGraded => "not auto-graded".to_string(),
            QuestionStatus::SandboxUnavailable => "⚠️  sandbox unavailable".to_string(),
        };
        println!(
            "   Q{} ({}): {}/{} ({})",
            score.question_number, question_id, score.score, score.max_score, detail
        );
    }

    println!();
    println!(
        "🏁 Total: {}/{} ({}%)",
        attempt.total_score, attempt.max_score, attempt.percentage
    );

    if attempt.needs_regrade() {
        println!("⚠️  Some questions could not be graded; run the grade command again");
    }
}

/// Open and close one sandbox session
pub async fn check(config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let sandbox = build_sandbox(&config)?;

    println!("🔍 Checking {} sandbox...", sandbox.name());
    probe(sandbox.as_ref())
        .await
        .with_context(|| format!("{} sandbox is not usable", sandbox.name()))?;
    println!("✅ Sandbox is ready");

    Ok(())
}
