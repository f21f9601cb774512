/// Execution Engine - Sandbox Abstraction
///
/// **Core Responsibility:**
/// Load submitted definitions into a fresh, isolated Python context and
/// evaluate one invocation expression, returning what it printed.
///
/// **Critical Architectural Boundary:**
/// - Engine knows HOW to execute (local process, Docker container)
/// - Engine does NOT know scoring rules
/// - Engine does NOT evaluate correctness
/// - Engine returns raw printed output for the Evaluator to judge
///
/// **Isolation:**
/// Every `Sandbox::open` yields a new interpreter context. Sessions are never
/// reused across test cases, so no state leaks between test cases or
/// submissions.
///
/// **Harness Protocol:**
/// Both backends run `harness.py`, which reads one JSON request per line and
/// answers with one JSON reply per line. Output printed by the submission is
/// captured in a per-request buffer inside the harness.
///
/// Every request carries a per-session nonce which the harness echoes back.
/// Lines that are not replies carrying that nonce are discarded, so a
/// submission writing JSON to the raw stdout cannot answer for the harness.

use crate::docker::DockerEngine;
use crate::error::ExecutionError;
use crate::process::ProcessEngine;
use async_trait::async_trait;
use pygrade_common::config::{GraderConfig, SandboxBackend};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Harness script shared by all backends
pub const HARNESS_SOURCE: &str = include_str!("harness.py");

/// Budget for the interpreter to come up and answer its first ping
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// An isolated execution context holding one submission's definitions
#[async_trait]
pub trait SandboxSession: Send {
    /// Execute the definitions in this context. Syntax errors and exceptions
    /// raised at definition time are reported, never panicked on.
    async fn load_definitions(&mut self, source: &str) -> Result<(), ExecutionError>;

    /// Evaluate one expression and return everything printed, followed by the
    /// printed value of the expression. An empty invocation returns what
    /// loading the definitions printed.
    async fn evaluate_expression(&mut self, invocation: &str) -> Result<String, ExecutionError>;

    /// Tear the context down. Dropping a session has the same effect.
    async fn close(&mut self);
}

/// Factory for fresh execution contexts
#[async_trait]
pub trait Sandbox: Send + Sync {
    fn name(&self) -> &'static str;

    /// Start a fresh context. Fails with `SandboxUnavailable` when the
    /// interpreter cannot be started at all.
    async fn open(&self) -> Result<Box<dyn SandboxSession>, ExecutionError>;
}

/// Build the sandbox backend selected by configuration
pub fn build_sandbox(config: &GraderConfig) -> anyhow::Result<Arc<dyn Sandbox>> {
    let sandbox: Arc<dyn Sandbox> = match config.backend {
        SandboxBackend::Process => Arc::new(ProcessEngine::new(config)),
        SandboxBackend::Docker => Arc::new(DockerEngine::new(config)?),
    };
    Ok(sandbox)
}

/// Open a session, evaluate a trivial expression and close it again
pub async fn probe(sandbox: &dyn Sandbox) -> Result<(), ExecutionError> {
    let mut session = sandbox.open().await?;
    let outcome = session.evaluate_expression("1 + 1").await;
    session.close().await;

    match outcome {
        Ok(output) if output.trim() == "2" => Ok(()),
        Ok(output) => Err(ExecutionError::SandboxUnavailable(format!(
            "unexpected probe output: {:?}",
            output.trim()
        ))),
        Err(e) => Err(ExecutionError::SandboxUnavailable(e.to_string())),
    }
}

/// Line-oriented transport to a running harness
#[async_trait]
pub trait HarnessChannel: Send {
    async fn send_line(&mut self, line: &str) -> std::io::Result<()>;

    /// Next line written by the harness, `None` once it has exited
    async fn recv_line(&mut self) -> std::io::Result<Option<String>>;

    /// Kill the interpreter behind this channel
    async fn shutdown(&mut self);
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum HarnessRequest<'a> {
    Ping { nonce: &'a str },
    Load { nonce: &'a str, source: &'a str },
    Eval { nonce: &'a str, expr: &'a str },
}

#[derive(Debug, Deserialize)]
struct HarnessReply {
    #[serde(default)]
    nonce: Option<String>,
    ok: bool,
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl HarnessReply {
    fn into_result(self) -> Result<String, ExecutionError> {
        if self.ok {
            return Ok(self.stdout);
        }
        let message = self.error.unwrap_or_else(|| "unknown error".to_string());
        match self.kind.as_deref() {
            Some("syntax") => Err(ExecutionError::Syntax(message)),
            Some("runtime") => Err(ExecutionError::Runtime(message)),
            _ => Err(ExecutionError::Protocol(message)),
        }
    }
}

/// Send one request line and wait for the reply carrying `nonce`
async fn exchange<C: HarnessChannel>(
    channel: &mut C,
    line: &str,
    nonce: &str,
) -> std::io::Result<Option<HarnessReply>> {
    channel.send_line(line).await?;
    loop {
        let Some(line) = channel.recv_line().await? else {
            return Ok(None);
        };
        match serde_json::from_str::<HarnessReply>(&line) {
            Ok(reply) if reply.nonce.as_deref() == Some(nonce) => return Ok(Some(reply)),
            Ok(_) => warn!(line = %line, "Discarding harness reply with a foreign nonce"),
            Err(_) => debug!(line = %line, "Skipping non-protocol harness output"),
        }
    }
}

/// Session speaking the harness protocol over any channel
pub struct HarnessSession<C: HarnessChannel> {
    channel: C,
    nonce: String,
    timeout: Duration,
    max_source_bytes: usize,
    loaded_stdout: String,
    closed: bool,
}

impl<C: HarnessChannel> HarnessSession<C> {
    pub fn new(channel: C, timeout: Duration, max_source_bytes: usize) -> Self {
        Self::with_nonce(channel, Uuid::new_v4().simple().to_string(), timeout, max_source_bytes)
    }

    pub fn with_nonce(channel: C, nonce: String, timeout: Duration, max_source_bytes: usize) -> Self {
        Self {
            channel,
            nonce,
            timeout,
            max_source_bytes,
            loaded_stdout: String::new(),
            closed: false,
        }
    }

    /// Wait for the harness to answer a ping. Any failure here means the
    /// interpreter itself is unusable.
    pub async fn handshake(&mut self) -> Result<(), ExecutionError> {
        let nonce = self.nonce.clone();
        match self
            .request(&HarnessRequest::Ping { nonce: &nonce }, STARTUP_TIMEOUT)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                if !self.closed {
                    self.channel.shutdown().await;
                    self.closed = true;
                }
                Err(ExecutionError::SandboxUnavailable(format!(
                    "interpreter did not start: {}",
                    e
                )))
            }
        }
    }

    fn check_size(&self, text: &str) -> Result<(), ExecutionError> {
        if text.len() > self.max_source_bytes {
            return Err(ExecutionError::SourceTooLarge {
                limit: self.max_source_bytes,
            });
        }
        Ok(())
    }

    async fn request(
        &mut self,
        request: &HarnessRequest<'_>,
        limit: Duration,
    ) -> Result<String, ExecutionError> {
        if self.closed {
            return Err(ExecutionError::Protocol("session already closed".to_string()));
        }

        let line = serde_json::to_string(request)
            .map_err(|e| ExecutionError::Protocol(e.to_string()))?;

        match tokio::time::timeout(limit, exchange(&mut self.channel, &line, &self.nonce)).await {
            Ok(Ok(Some(reply))) => reply.into_result(),
            Ok(Ok(None)) => {
                self.closed = true;
                Err(ExecutionError::Runtime(
                    "Interpreter exited unexpectedly".to_string(),
                ))
            }
            Ok(Err(e)) => {
                self.closed = true;
                Err(ExecutionError::Protocol(format!("harness channel failed: {}", e)))
            }
            Err(_) => {
                let timeout_ms = limit.as_millis() as u64;
                warn!(timeout_ms = timeout_ms, "Sandbox call timed out; killing interpreter");
                self.channel.shutdown().await;
                self.closed = true;
                Err(ExecutionError::Timeout(timeout_ms))
            }
        }
    }
}

#[async_trait]
impl<C: HarnessChannel> SandboxSession for HarnessSession<C> {
    async fn load_definitions(&mut self, source: &str) -> Result<(), ExecutionError> {
        self.check_size(source)?;
        let timeout = self.timeout;
        let nonce = self.nonce.clone();
        self.loaded_stdout = self
            .request(&HarnessRequest::Load { nonce: &nonce, source }, timeout)
            .await?;
        Ok(())
    }

    async fn evaluate_expression(&mut self, invocation: &str) -> Result<String, ExecutionError> {
        if invocation.trim().is_empty() {
            return Ok(self.loaded_stdout.clone());
        }
        self.check_size(invocation)?;
        let timeout = self.timeout;
        let nonce = self.nonce.clone();
        self.request(&HarnessRequest::Eval { nonce: &nonce, expr: invocation }, timeout)
            .await
    }

    async fn close(&mut self) {
        if !self.closed {
            self.channel.shutdown().await;
            self.closed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Channel answering with canned lines, recording what was sent
    struct CannedChannel {
        sent: Arc<Mutex<Vec<String>>>,
        replies: VecDeque<Option<String>>,
        hang: bool,
        shutdowns: Arc<Mutex<usize>>,
    }

    impl CannedChannel {
        fn new(replies: &[&str]) -> Self {
            Self {
                sent: Arc::new(Mutex::new(Vec::new())),
                replies: replies.iter().map(|r| Some(r.to_string())).collect(),
                hang: false,
                shutdowns: Arc::new(Mutex::new(0)),
            }
        }
    }

    #[async_trait]
    impl HarnessChannel for CannedChannel {
        async fn send_line(&mut self, line: &str) -> std::io::Result<()> {
            self.sent.lock().unwrap().push(line.to_string());
            Ok(())
        }

        async fn recv_line(&mut self) -> std::io::Result<Option<String>> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            Ok(self.replies.pop_front().flatten())
        }

        async fn shutdown(&mut self) {
            *self.shutdowns.lock().unwrap() += 1;
        }
    }

    fn session(channel: CannedChannel) -> HarnessSession<CannedChannel> {
        HarnessSession::with_nonce(channel, "n0".to_string(), Duration::from_millis(200), 1024)
    }

    #[test]
    fn test_request_wire_format() {
        let line = serde_json::to_string(&HarnessRequest::Eval {
            nonce: "n0",
            expr: "add(1, 2)",
        })
        .unwrap();
        assert_eq!(line, r#"{"op":"eval","nonce":"n0","expr":"add(1, 2)"}"#);
        let line = serde_json::to_string(&HarnessRequest::Ping { nonce: "n0" }).unwrap();
        assert_eq!(line, r#"{"op":"ping","nonce":"n0"}"#);
    }

    #[test]
    fn test_sessions_get_distinct_nonces() {
        let first = HarnessSession::new(CannedChannel::new(&[]), Duration::from_millis(200), 1024);
        let second = HarnessSession::new(CannedChannel::new(&[]), Duration::from_millis(200), 1024);

        assert_eq!(first.nonce.len(), 32);
        assert_ne!(first.nonce, second.nonce);
    }

    #[tokio::test]
    async fn test_load_then_evaluate() {
        let channel = CannedChannel::new(&[
            r#"{"nonce": "n0", "ok": true, "stdout": ""}"#,
            r#"{"nonce": "n0", "ok": true, "stdout": "15\n"}"#,
        ]);
        let sent = channel.sent.clone();
        let mut session = session(channel);

        session.load_definitions("def add(a, b):\n    return a + b").await.unwrap();
        let output = session.evaluate_expression("add(5, 10)").await.unwrap();

        assert_eq!(output, "15\n");
        let sent = sent.lock().unwrap();
        assert!(sent[0].starts_with(r#"{"op":"load","nonce":"n0""#));
        assert!(sent[1].contains("add(5, 10)"));
    }

    #[tokio::test]
    async fn test_error_kinds_are_mapped() {
        let channel = CannedChannel::new(&[
            r#"{"nonce": "n0", "ok": false, "kind": "syntax", "error": "invalid syntax (line 1)"}"#,
            r#"{"nonce": "n0", "ok": false, "kind": "runtime", "error": "NameError: name 'x' is not defined"}"#,
            r#"{"nonce": "n0", "ok": false, "kind": "protocol", "error": "bad"}"#,
        ]);
        let mut session = session(channel);

        assert_eq!(
            session.load_definitions("def f(:").await,
            Err(ExecutionError::Syntax("invalid syntax (line 1)".to_string()))
        );
        assert_eq!(
            session.evaluate_expression("x").await,
            Err(ExecutionError::Runtime("NameError: name 'x' is not defined".to_string()))
        );
        assert!(matches!(
            session.evaluate_expression("y").await,
            Err(ExecutionError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_noise_lines_are_skipped() {
        let channel = CannedChannel::new(&["printed to raw stdout", r#"{"nonce": "n0", "ok": true, "stdout": "7\n"}"#]);
        let mut session = session(channel);

        assert_eq!(session.evaluate_expression("f()").await.unwrap(), "7\n");
    }

    #[tokio::test]
    async fn test_replies_without_session_nonce_are_ignored() {
        // What a submission printing JSON straight to the raw stdout produces
        let channel = CannedChannel::new(&[
            r#"{"ok": true, "stdout": "15"}"#,
            r#"{"nonce": "guessed", "ok": true, "stdout": "15"}"#,
            r#"{"nonce": "n0", "ok": true, "stdout": "-5\n"}"#,
        ]);
        let mut session = session(channel);

        assert_eq!(session.evaluate_expression("add(5, 10)").await.unwrap(), "-5\n");
    }

    #[tokio::test]
    async fn test_forged_reply_alone_never_answers() {
        let channel = CannedChannel::new(&[r#"{"ok": true, "stdout": "15"}"#]);
        let mut session = session(channel);

        assert_eq!(
            session.evaluate_expression("add(5, 10)").await,
            Err(ExecutionError::Runtime("Interpreter exited unexpectedly".to_string()))
        );
    }

    #[tokio::test]
    async fn test_empty_invocation_returns_load_output() {
        let channel = CannedChannel::new(&[r#"{"nonce": "n0", "ok": true, "stdout": "hello\n"}"#]);
        let sent = channel.sent.clone();
        let mut session = session(channel);

        session.load_definitions("print('hello')").await.unwrap();
        assert_eq!(session.evaluate_expression("  ").await.unwrap(), "hello\n");
        assert_eq!(sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_kills_interpreter() {
        let mut channel = CannedChannel::new(&[]);
        channel.hang = true;
        let shutdowns = channel.shutdowns.clone();
        let mut session = session(channel);

        let result = session.evaluate_expression("loop()").await;

        assert_eq!(result, Err(ExecutionError::Timeout(200)));
        assert_eq!(*shutdowns.lock().unwrap(), 1);
        // Closing an already killed session does not kill twice
        session.close().await;
        assert_eq!(*shutdowns.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_interpreter_exit_is_runtime_error() {
        let channel = CannedChannel::new(&[]);
        let mut session = session(channel);

        assert_eq!(
            session.evaluate_expression("f()").await,
            Err(ExecutionError::Runtime("Interpreter exited unexpectedly".to_string()))
        );
        assert!(matches!(
            session.evaluate_expression("f()").await,
            Err(ExecutionError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_source_rejected() {
        let channel = CannedChannel::new(&[]);
        let sent = channel.sent.clone();
        let mut session = session(channel);

        let source = "x".repeat(2048);
        assert_eq!(
            session.load_definitions(&source).await,
            Err(ExecutionError::SourceTooLarge { limit: 1024 })
        );
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_handshake_is_unavailable() {
        let channel = CannedChannel::new(&[]);
        let mut session = session(channel);

        assert!(matches!(
            session.handshake().await,
            Err(ExecutionError::SandboxUnavailable(_))
        ));
    }
}
