mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pygrade")]
#[command(about = "pygrade CLI - Run and grade Python submissions against a question bank", long_about = None)]
struct Cli {
    /// Grader configuration file (defaults to config/grader.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the function definitions the grader would execute
    Extract {
        /// Submission source file
        #[arg(short, long)]
        code: PathBuf,
    },

    /// Run one question's test cases against a submission
    Run {
        /// Question bank (test) JSON file
        #[arg(short = 'q', long)]
        questions: PathBuf,

        /// Question id
        #[arg(long)]
        question: String,

        /// Submission source file
        #[arg(short, long)]
        code: PathBuf,
    },

    /// Grade a whole answer sheet into an attempt record
    Grade {
        /// Question bank (test) JSON file
        #[arg(short = 'q', long)]
        questions: PathBuf,

        /// Answers JSON file: {"<question id>": "<source>"}
        #[arg(short, long)]
        answers: PathBuf,

        /// Student identifier
        #[arg(short, long)]
        student: String,

        /// How the attempt ended: submitted, time-expired, abandoned
        #[arg(short, long, default_value = "submitted")]
        termination: String,

        /// Display order as canonical indices, e.g. 2,0,1
        #[arg(long, value_delimiter = ',')]
        order: Option<Vec<usize>>,

        /// Print the attempt as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Check that the configured sandbox can start an interpreter
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Extract { code } => {
            commands::extract(&code)?;
        }
        Commands::Run {
            questions,
            question,
            code,
        } => {
            commands::run_question(config, &questions, &question, &code).await?;
        }
        Commands::Grade {
            questions,
            answers,
            student,
            termination,
            order,
            json,
        } => {
            commands::grade(
                config,
                &questions,
                &answers,
                &student,
                &termination,
                order.as_deref(),
                json,
            )
            .await?;
        }
        Commands::Check => {
            commands::check(config).await?;
        }
    }

    Ok(())
}
