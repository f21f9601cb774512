// Grader configuration
// Loaded from config/grader.json, then overridden from the environment
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "config/grader.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SandboxBackend {
    #[default]
    Process,
    Docker,
}

impl SandboxBackend {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "process" | "local" => Some(SandboxBackend::Process),
            "docker" => Some(SandboxBackend::Docker),
            _ => None,
        }
    }
}

impl fmt::Display for SandboxBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SandboxBackend::Process => write!(f, "process"),
            SandboxBackend::Docker => write!(f, "docker"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PythonConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for PythonConfig {
    fn default() -> Self {
        Self {
            command: "python3".to_string(),
            args: vec![],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerConfig {
    pub image: String,
    pub memory_limit_mb: u32,
    pub cpu_limit: f32,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            image: "python:3.12-slim".to_string(),
            memory_limit_mb: 256,
            cpu_limit: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GraderConfig {
    pub backend: SandboxBackend,
    /// Wall-clock cap for each sandbox call
    pub timeout_ms: u64,
    pub max_source_bytes: usize,
    pub python: PythonConfig,
    pub docker: DockerConfig,
}

impl Default for GraderConfig {
    fn default() -> Self {
        Self {
            backend: SandboxBackend::Process,
            timeout_ms: 5000,
            max_source_bytes: 1024 * 1024,
            python: PythonConfig::default(),
            docker: DockerConfig::default(),
        }
    }
}

impl GraderConfig {
    /// Load configuration from a JSON file
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Grader config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let config: GraderConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load from `PYGRADE_CONFIG` (or config/grader.json), falling back to
    /// defaults when the file is absent, then apply environment overrides.
    pub fn load_default() -> Result<Self> {
        let path = std::env::var("PYGRADE_CONFIG")
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let path = Path::new(&path);

        let mut config = if path.exists() {
            Self::load(path)?
        } else {
            Self::default()
        };

        config.apply_env_overrides()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(backend) = std::env::var("PYGRADE_BACKEND") {
            self.backend = SandboxBackend::from_str(&backend)
                .with_context(|| format!("Invalid PYGRADE_BACKEND: {}", backend))?;
        }
        if let Ok(timeout) = std::env::var("PYGRADE_TIMEOUT_MS") {
            self.timeout_ms = timeout
                .parse()
                .with_context(|| format!("Invalid PYGRADE_TIMEOUT_MS: {}", timeout))?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            bail!("timeoutMs must be greater than zero");
        }
        if self.max_source_bytes == 0 {
            bail!("maxSourceBytes must be greater than zero");
        }
        if self.python.command.trim().is_empty() {
            bail!("python.command cannot be empty");
        }
        if self.docker.image.trim().is_empty() {
            bail!("docker.image cannot be empty");
        }
        if self.docker.memory_limit_mb == 0 || !(self.docker.cpu_limit > 0.0) {
            bail!("docker limits must be positive");
        }
        Ok(())
    }
}
