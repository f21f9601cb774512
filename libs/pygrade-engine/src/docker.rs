/// Docker backend using Bollard
///
/// **Docker Execution Rules:**
/// 1. Pulls the configured Python image if not present
/// 2. Creates one container per session with security constraints:
///    - Network disabled
///    - CPU/memory limits enforced
/// 3. Injects the harness through a base64 environment variable
/// 4. Attaches stdin/stdout before starting so no reply is missed
/// 5. Force-removes the container when the session ends, even on drop

use crate::engine::{HarnessChannel, HarnessSession, Sandbox, SandboxSession, HARNESS_SOURCE};
use crate::error::ExecutionError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use bollard::container::{
    AttachContainerOptions, Config, CreateContainerOptions, KillContainerOptions, LogOutput,
    RemoveContainerOptions, StartContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures_util::stream::{Stream, StreamExt};
use pygrade_common::config::GraderConfig;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

const HARNESS_ENV: &str = "PYGRADE_HARNESS";
const BOOTSTRAP: &str =
    "import base64, os; exec(base64.b64decode(os.environ['PYGRADE_HARNESS']).decode('utf-8'))";

/// Container cleanup guard - guarantees container removal on drop
struct ContainerGuard {
    docker: Docker,
    container_id: String,
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        // Cannot be async in Drop; best-effort removal on the runtime
        let container_id = self.container_id.clone();
        let docker = self.docker.clone();

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(container_id = %container_id, "No runtime to remove container");
            return;
        };

        handle.spawn(async move {
            let remove_options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };

            if let Err(e) = docker.remove_container(&container_id, Some(remove_options)).await {
                warn!(container_id = %container_id, error = %e, "Failed to cleanup container");
            }
        });
    }
}

pub struct DockerEngine {
    docker: Docker,
    image: String,
    memory_limit: i64,
    nano_cpus: i64,
    timeout: Duration,
    max_source_bytes: usize,
}

impl DockerEngine {
    pub fn new(config: &GraderConfig) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker daemon")?;

        Ok(Self {
            docker,
            image: config.docker.image.clone(),
            memory_limit: (config.docker.memory_limit_mb as i64) * 1024 * 1024,
            nano_cpus: (config.docker.cpu_limit as f64 * 1_000_000_000.0) as i64,
            timeout: Duration::from_millis(config.timeout_ms),
            max_source_bytes: config.max_source_bytes,
        })
    }

    /// Ensure the image is available, pulling it on a cache miss
    async fn ensure_image(&self) -> Result<()> {
        if self.docker.inspect_image(&self.image).await.is_ok() {
            debug!(image = %self.image, "Image cache hit");
            return Ok(());
        }

        warn!(image = %self.image, "Image cache miss, pulling");

        let options = Some(CreateImageOptions {
            from_image: self.image.as_str(),
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.context("Failed to pull Docker image")?;
        }

        info!(image = %self.image, "Image pulled");
        Ok(())
    }

    async fn start_container(&self) -> Result<DockerChannel> {
        self.ensure_image()
            .await
            .with_context(|| format!("Failed to ensure Docker image '{}' is available", self.image))?;

        let container_name = format!("pygrade-{}", uuid::Uuid::new_v4());
        let env = vec![format!(
            "{}={}",
            HARNESS_ENV,
            general_purpose::STANDARD.encode(HARNESS_SOURCE)
        )];

        let config = Config {
            image: Some(self.image.clone()),
            cmd: Some(vec![
                "python3".to_string(),
                "-u".to_string(),
                "-c".to_string(),
                BOOTSTRAP.to_string(),
            ]),
            env: Some(env),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(false),
            open_stdin: Some(true),
            stdin_once: Some(false),
            tty: Some(false),
            network_disabled: Some(true), // SECURITY: No network access
            host_config: Some(bollard::models::HostConfig {
                memory: Some(self.memory_limit),
                nano_cpus: Some(self.nano_cpus),
                ..Default::default()
            }),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: None,
        };

        let container = self
            .docker
            .create_container(Some(create_options), config)
            .await
            .context("Failed to create Docker container")?;

        // Set up the guard before anything else can fail
        let guard = ContainerGuard {
            docker: self.docker.clone(),
            container_id: container.id.clone(),
        };

        let attach_options = AttachContainerOptions::<String> {
            stdin: Some(true),
            stdout: Some(true),
            stderr: Some(false),
            stream: Some(true),
            logs: Some(false),
            detach_keys: None,
        };

        let attached = self
            .docker
            .attach_container(&container.id, Some(attach_options))
            .await
            .context("Failed to attach to Docker container")?;

        self.docker
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await
            .context("Failed to start Docker container")?;

        debug!(container = %container_name, "Started sandbox container");

        Ok(DockerChannel {
            guard,
            input: attached.input,
            output: attached.output,
            buffer: String::new(),
        })
    }
}

#[async_trait]
impl Sandbox for DockerEngine {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn open(&self) -> Result<Box<dyn SandboxSession>, ExecutionError> {
        let channel = self
            .start_container()
            .await
            .map_err(|e| ExecutionError::SandboxUnavailable(format!("{:#}", e)))?;
        let mut session = HarnessSession::new(channel, self.timeout, self.max_source_bytes);
        session.handshake().await?;
        Ok(Box::new(session))
    }
}

type OutputStream = Pin<Box<dyn Stream<Item = Result<LogOutput, bollard::errors::Error>> + Send>>;

struct DockerChannel {
    guard: ContainerGuard,
    input: Pin<Box<dyn AsyncWrite + Send>>,
    output: OutputStream,
    buffer: String,
}

#[async_trait]
impl HarnessChannel for DockerChannel {
    async fn send_line(&mut self, line: &str) -> std::io::Result<()> {
        self.input.write_all(line.as_bytes()).await?;
        self.input.write_all(b"\n").await?;
        self.input.flush().await
    }

    async fn recv_line(&mut self) -> std::io::Result<Option<String>> {
        loop {
            if let Some(pos) = self.buffer.find('\n') {
                let line = self.buffer[..pos].to_string();
                self.buffer.drain(..=pos);
                return Ok(Some(line));
            }

            match self.output.next().await {
                Some(Ok(LogOutput::StdOut { message })) | Some(Ok(LogOutput::Console { message })) => {
                    self.buffer.push_str(&String::from_utf8_lossy(&message));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(std::io::Error::new(std::io::ErrorKind::Other, e)),
                None => return Ok(None),
            }
        }
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self
            .guard
            .docker
            .kill_container(&self.guard.container_id, None::<KillContainerOptions<String>>)
            .await
        {
            debug!(error = %e, "Container already stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::probe;

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_docker_add() {
        let config = GraderConfig::default();
        let engine = DockerEngine::new(&config).expect("Failed to create Docker engine");
        probe(&engine).await.expect("container should answer the probe");

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
    #[ignore] // Requires Docker
    async fn test_docker_infinite_loop_times_out() {
        let mut config = GraderConfig::default();
        config.timeout_ms = 1000;
        let engine = DockerEngine::new(&config).expect("Failed to create Docker engine");

        let mut session = engine.open().await.unwrap();
        session
            .load_definitions("def spin():\n    while True:\n        pass")
            .await
            .unwrap();

        assert_eq!(
            session.evaluate_expression("spin()").await,
            Err(ExecutionError::Timeout(1000))
        );
    }
}
