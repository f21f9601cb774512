//! Scripted sandbox for engine tests. Never touches a real interpreter.

use crate::engine::{Sandbox, SandboxSession};
use crate::error::ExecutionError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type Script = dyn Fn(&str, &str) -> Result<String, ExecutionError> + Send + Sync;

/// Answers every `(loaded source, invocation)` pair through a script
pub struct FakeSandbox {
    script: Arc<Script>,
    pub opens: Arc<AtomicUsize>,
    pub unavailable: bool,
}

impl FakeSandbox {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&str, &str) -> Result<String, ExecutionError> + Send + Sync + 'static,
    {
        Self {
            script: Arc::new(script),
            opens: Arc::new(AtomicUsize::new(0)),
            unavailable: false,
        }
    }

    pub fn unavailable() -> Self {
        let mut sandbox = Self::new(|_, _| Ok(String::new()));
        sandbox.unavailable = true;
        sandbox
    }

    /// Understands `add(a, b)` for the correct and the subtracting `add`,
    /// `spin()` as an infinite loop and `boom()` as a raised exception
    pub fn arithmetic() -> Self {
        Self::new(|source, invocation| {
            if invocation == "spin()" {
                return Err(ExecutionError::Timeout(5000));
            }
            if invocation == "boom()" {
                return Err(ExecutionError::Runtime("ValueError: boom".to_string()));
            }
            let args = invocation
                .strip_prefix("add(")
                .and_then(|rest| rest.strip_suffix(')'))
                .ok_or_else(|| {
                    ExecutionError::Runtime(format!("NameError: name '{}' is not defined", invocation))
                })?;
            let numbers: Vec<i64> = args
                .split(',')
                .map(|n| n.trim().parse::<i64>())
                .collect::<Result<_, _>>()
                .map_err(|_| ExecutionError::Runtime("TypeError: bad operand".to_string()))?;
            let value = if source.contains("a - b") {
                numbers[0] - numbers[1]
            } else {
                numbers[0] + numbers[1]
            };
            Ok(format!("{}\n", value))
        })
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sandbox for FakeSandbox {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn open(&self) -> Result<Box<dyn SandboxSession>, ExecutionError> {
        if self.unavailable {
            return Err(ExecutionError::SandboxUnavailable("python3 not found".to_string()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            script: self.script.clone(),
            source: None,
        }))
    }
}

struct FakeSession {
    script: Arc<Script>,
    source: Option<String>,
}

#[async_trait]
impl SandboxSession for FakeSession {
    async fn load_definitions(&mut self, source: &str) -> Result<(), ExecutionError> {
        if source.contains("def broken(") {
            return Err(ExecutionError::Syntax("invalid syntax (line 1)".to_string()));
        }
        self.source = Some(source.to_string());
        Ok(())
    }

    async fn evaluate_expression(&mut self, invocation: &str) -> Result<String, ExecutionError> {
        let source = self
            .source
            .as_deref()
            .ok_or_else(|| ExecutionError::Protocol("no definitions loaded".to_string()))?;
        (self.script)(source, invocation)
    }

    async fn close(&mut self) {
        self.source = None;
    }
}
