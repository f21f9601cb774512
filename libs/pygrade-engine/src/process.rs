/// Local process backend
///
/// Every session is a fresh `python3 -u -c <harness>` child with piped
/// stdin/stdout. The child is killed when the session is closed, times out,
/// or is dropped (`kill_on_drop`).

use crate::engine::{HarnessChannel, HarnessSession, Sandbox, SandboxSession, HARNESS_SOURCE};
use crate::error::ExecutionError;
use async_trait::async_trait;
use pygrade_common::config::GraderConfig;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::debug;

pub struct ProcessEngine {
    command: String,
    args: Vec<String>,
    timeout: Duration,
    max_source_bytes: usize,
}

impl ProcessEngine {
    pub fn new(config: &GraderConfig) -> Self {
        Self {
            command: config.python.command.clone(),
            args: config.python.args.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
            max_source_bytes: config.max_source_bytes,
        }
    }

    fn spawn(&self) -> Result<ProcessChannel, ExecutionError> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .arg("-u")
            .arg("-c")
            .arg(HARNESS_SOURCE)
            .env("PYTHONIOENCODING", "utf-8")
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ExecutionError::SandboxUnavailable(format!(
                    "failed to start '{}': {}",
                    self.command, e
                ))
            })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            ExecutionError::SandboxUnavailable("interpreter stdin not captured".to_string())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            ExecutionError::SandboxUnavailable("interpreter stdout not captured".to_string())
        })?;

        debug!(pid = child.id(), command = %self.command, "Spawned interpreter");

        Ok(ProcessChannel {
            child,
            stdin,
            lines: BufReader::new(stdout).lines(),
        })
    }
}

#[async_trait]
impl Sandbox for ProcessEngine {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn open(&self) -> Result<Box<dyn SandboxSession>, ExecutionError> {
        let channel = self.spawn()?;
        let mut session = HarnessSession::new(channel, self.timeout, self.max_source_bytes);
        session.handshake().await?;
        Ok(Box::new(session))
    }
}

struct ProcessChannel {
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
}

#[async_trait]
impl HarnessChannel for ProcessChannel {
    async fn send_line(&mut self, line: &str) -> std::io::Result<()> {
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await
    }

    async fn recv_line(&mut self) -> std::io::Result<Option<String>> {
        self.lines.next_line().await
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!(error = %e, "Interpreter already exited");
        }
        let _ = self.child.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::probe;
    use crate::executor::run_test_cases;
    use pygrade_common::types::TestCase;

    fn engine_with(command: &str, timeout_ms: u64) -> ProcessEngine {
        let mut config = GraderConfig::default();
        config.python.command = command.to_string();
        config.timeout_ms = timeout_ms;
        ProcessEngine::new(&config)
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_unavailable() {
        let engine = engine_with("/nonexistent/python-interpreter", 1000);

        let result = engine.open().await;

        assert!(matches!(result, Err(ExecutionError::SandboxUnavailable(_))));
    }

    #[tokio::test]
    #[ignore] // Requires python3 on PATH
    async fn test_python_add() {
        let engine = engine_with("python3", 5000);
        probe(&engine).await.expect("python3 should answer the probe");

        let mut session = engine.open().await.unwrap();
        session
            .load_definitions("def add(a, b):\n    return a + b")
            .await
            .unwrap();
        let output = session.evaluate_expression("add(5, 10)").await.unwrap();
        session.close().await;

        assert_eq!(output.trim(), "15");
    }

    #[tokio::test]
    #[ignore] // Requires python3 on PATH
    async fn test_python_prints_and_none() {
        let engine = engine_with("python3", 5000);

        let mut session = engine.open().await.unwrap();
        session
            .load_definitions("def greet(name):\n    print('hi', name)")
            .await
            .unwrap();
        let output = session.evaluate_expression("greet('bob')").await.unwrap();

        assert_eq!(output, "hi bob\nNone\n");
    }

    #[tokio::test]
    #[ignore] // Requires python3 on PATH
    async fn test_python_errors() {
        let engine = engine_with("python3", 5000);

        let mut session = engine.open().await.unwrap();
        let syntax = session.load_definitions("def broken(:\n    pass").await;
        assert!(matches!(syntax, Err(ExecutionError::Syntax(_))));

        let mut session = engine.open().await.unwrap();
        session
            .load_definitions("def div(a, b):\n    return a / b")
            .await
            .unwrap();
        let runtime = session.evaluate_expression("div(1, 0)").await;
        assert!(matches!(
            runtime,
            Err(ExecutionError::Runtime(ref msg)) if msg.starts_with("ZeroDivisionError")
        ));

        let mut session = engine.open().await.unwrap();
        session
            .load_definitions("def ask():\n    return input()")
            .await
            .unwrap();
        let eof = session.evaluate_expression("ask()").await;
        assert!(matches!(eof, Err(ExecutionError::Runtime(ref msg)) if msg.starts_with("EOFError")));
    }

    #[tokio::test]
    #[ignore] // Requires python3 on PATH
    async fn test_python_raw_stdout_cannot_answer_for_harness() {
        let engine = engine_with("python3", 5000);
        let source = "def add(a, b):\n    \
                      import os, sys\n    \
                      sys.__stdout__.write('{\"ok\": true, \"stdout\": \"15\"}\\n')\n    \
                      sys.__stdout__.flush()\n    \
                      os.write(1, b'{\"ok\": true, \"stdout\": \"15\"}\\n')\n    \
                      return a - b";
        let cases = vec![TestCase {
            input: "add(5, 10)".to_string(),
            output: "15".to_string(),
            hidden: false,
        }];

        let mut session = engine.open().await.unwrap();
        session.load_definitions(source).await.unwrap();
        let output = session.evaluate_expression("add(5, 10)").await.unwrap();
        session.close().await;
        assert_eq!(output, "-5\n");

        let results = run_test_cases(&engine, source, &cases).await.unwrap();
        assert!(!results[0].passed);
        assert_eq!(results[0].actual, "-5");
    }

    #[tokio::test]
    #[ignore] // Requires python3 on PATH
    async fn test_python_infinite_loop_times_out() {
        let engine = engine_with("python3", 500);

        let mut session = engine.open().await.unwrap();
        session
            .load_definitions("def spin():\n    while True:\n        pass")
            .await
            .unwrap();

        assert_eq!(
            session.evaluate_expression("spin()").await,
            Err(ExecutionError::Timeout(500))
        );
    }

    #[tokio::test]
    #[ignore] // Requires python3 on PATH
    async fn test_python_sessions_are_isolated() {
        let engine = engine_with("python3", 5000);

        let mut first = engine.open().await.unwrap();
        first.load_definitions("def f():\n    return 1\ncounter = [0]").await.unwrap();
        first.close().await;

        let mut second = engine.open().await.unwrap();
        second.load_definitions("def g():\n    return 2").await.unwrap();
        let leaked = second.evaluate_expression("f()").await;

        assert!(matches!(leaked, Err(ExecutionError::Runtime(ref msg)) if msg.starts_with("NameError")));
    }
}
