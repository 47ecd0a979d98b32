/// Docker backend.
///
/// **Container Rules:**
/// 1. One long-lived container per executor, created on first use
/// 2. Network disabled, memory, CPU and pid limits enforced
/// 3. Harness written into the container once at boot
/// 4. Each task is a `docker exec` of the harness in `--once` mode,
///    with the request line written to the exec's stdin
/// 5. Container removed on terminate, and by the guard on drop
///
/// A task that times out leaves its exec running, so the pool terminates
/// the whole container and builds a new one.

use super::{
    check_input, infrastructure, interpret_response, ExecutionOutput, ExecutionRequest, Sandbox,
    SandboxFactory, HARNESS_SOURCE,
};
use crate::error::ExecutionError;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures_util::stream::StreamExt;
use pyxom_common::protocol::{decode_response, encode_request, ExecutorRequest, ExecutorResponse};
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

const HARNESS_PATH: &str = "/tmp/pyxom_harness.py";
const PIDS_LIMIT: i64 = 64;

#[derive(Debug, Clone)]
pub struct DockerLimits {
    pub image: String,
    pub memory_mb: u32,
    pub cpu_limit: f32,
}

impl DockerLimits {
    fn memory_bytes(&self) -> i64 {
        (self.memory_mb as i64) * 1024 * 1024
    }

    fn nano_cpus(&self) -> i64 {
        (self.cpu_limit as f64 * 1_000_000_000.0) as i64
    }
}

pub struct DockerSandboxFactory {
    docker: Docker,
    limits: DockerLimits,
}

impl DockerSandboxFactory {
    pub fn new(limits: DockerLimits) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker daemon")?;
        Ok(Self { docker, limits })
    }
}

impl SandboxFactory for DockerSandboxFactory {
    fn create(&self, executor_id: usize) -> Box<dyn Sandbox> {
        Box::new(DockerSandbox {
            executor_id,
            docker: self.docker.clone(),
            limits: self.limits.clone(),
            container: None,
        })
    }

    fn backend(&self) -> &'static str {
        "docker"
    }
}

/// Container cleanup guard - guarantees container removal on drop
struct ContainerGuard {
    docker: Docker,
    container_id: String,
    armed: bool,
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // Cannot await in Drop; hand removal to the runtime if one is around
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let docker = self.docker.clone();
        let container_id = self.container_id.clone();

        handle.spawn(async move {
            let options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };
            if let Err(e) = docker.remove_container(&container_id, Some(options)).await {
                warn!(container_id = %container_id, error = %e, "Failed to clean up container");
            }
        });
    }
}

pub struct DockerSandbox {
    executor_id: usize,
    docker: Docker,
    limits: DockerLimits,
    container: Option<ContainerGuard>,
}

impl DockerSandbox {
    /// Pull the image if it is not cached locally
    async fn ensure_image(&self) -> Result<()> {
        let image = self.limits.image.as_str();
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image = image, "Image cache hit");
            return Ok(());
        }

        warn!(image = image, "Image cache miss, pulling");
        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });
        let mut stream = self.docker.create_image(options, None, None);
        while let Some(progress) = stream.next().await {
            progress.context("Failed to pull Docker image")?;
        }

        info!(image = image, "Image pulled");
        Ok(())
    }

    async fn boot(&mut self) -> Result<()> {
        self.ensure_image()
            .await
            .with_context(|| format!("Failed to ensure Docker image '{}' is available", self.limits.image))?;

        let name = format!("pyxom-{}-{}", self.executor_id, uuid::Uuid::new_v4());
        let config = Config {
            image: Some(self.limits.image.clone()),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            entrypoint: Some(vec![]),
            env: Some(vec![
                "PYTHONIOENCODING=utf-8".to_string(),
                "PYTHONDONTWRITEBYTECODE=1".to_string(),
            ]),
            network_disabled: Some(true),
            working_dir: Some("/tmp".to_string()),
            host_config: Some(bollard::models::HostConfig {
                memory: Some(self.limits.memory_bytes()),
                nano_cpus: Some(self.limits.nano_cpus()),
                pids_limit: Some(PIDS_LIMIT),
                network_mode: Some("none".to_string()),
                readonly_rootfs: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        };

        let container = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.as_str(),
                    platform: None,
                }),
                config,
            )
            .await
            .context("Failed to create Docker container")?;

        // Guard first so a failed start still removes the container
        self.container = Some(ContainerGuard {
            docker: self.docker.clone(),
            container_id: container.id.clone(),
            armed: true,
        });

        self.docker
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await
            .context("Failed to start Docker container")?;

        self.install_harness(&container.id).await?;

        info!(
            executor_id = self.executor_id,
            container_id = %container.id,
            image = %self.limits.image,
            "Sandbox container started"
        );
        Ok(())
    }

    async fn install_harness(&self, container_id: &str) -> Result<()> {
        let encoded = general_purpose::STANDARD.encode(HARNESS_SOURCE);
        let command = format!("echo '{}' | base64 -d > {}", encoded, HARNESS_PATH);

        let exec = self
            .docker
            .create_exec(
                container_id,
                CreateExecOptions {
                    cmd: Some(vec!["sh".to_string(), "-c".to_string(), command]),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .context("Failed to create exec for harness install")?;

        let started = self
            .docker
            .start_exec(&exec.id, Some(StartExecOptions { detach: false, ..Default::default() }))
            .await
            .context("Failed to start harness install")?;
        if let StartExecResults::Attached { mut output, .. } = started {
            while output.next().await.is_some() {}
        }

        let inspect = self.docker.inspect_exec(&exec.id).await?;
        if inspect.exit_code != Some(0) {
            bail!("Failed to write harness into container (exit code {:?})", inspect.exit_code);
        }
        Ok(())
    }

    /// Run the harness once inside the container for a single request
    async fn exchange(&self, request: &ExecutorRequest) -> Result<ExecutorResponse> {
        let container_id = match self.container.as_ref() {
            Some(guard) => guard.container_id.clone(),
            None => bail!("Sandbox container is not running"),
        };

        let exec = self
            .docker
            .create_exec(
                &container_id,
                CreateExecOptions {
                    cmd: Some(vec![
                        "python3".to_string(),
                        "-u".to_string(),
                        HARNESS_PATH.to_string(),
                        "--once".to_string(),
                    ]),
                    attach_stdin: Some(true),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .context("Failed to create exec for task")?;

        let started = self
            .docker
            .start_exec(&exec.id, Some(StartExecOptions { detach: false, ..Default::default() }))
            .await
            .context("Failed to start task exec")?;

        let StartExecResults::Attached { mut output, mut input } = started else {
            bail!("Failed to attach to task exec");
        };

        let line = encode_request(request).context("Failed to encode request")?;
        input
            .write_all(line.as_bytes())
            .await
            .context("Failed to write request to harness")?;
        input.flush().await.context("Failed to flush harness stdin")?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        while let Some(message) = output.next().await {
            match message.context("Failed to read harness output")? {
                LogOutput::StdOut { message } => stdout.push_str(&String::from_utf8_lossy(&message)),
                LogOutput::StdErr { message } => stderr.push_str(&String::from_utf8_lossy(&message)),
                _ => {}
            }
        }

        let Some(response) = stdout.lines().find(|l| !l.trim().is_empty()) else {
            bail!(
                "Harness produced no response: {}",
                stderr.lines().last().unwrap_or("no output")
            );
        };
        decode_response(response).context("Malformed response from harness")
    }
}

#[async_trait]
impl Sandbox for DockerSandbox {
    async fn start(&mut self) -> Result<(), ExecutionError> {
        if self.container.is_some() {
            return Ok(());
        }
        if let Err(e) = self.boot().await {
            self.terminate().await;
            return Err(infrastructure(e));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, request), fields(executor_id = self.executor_id, task_id = %request.task_id))]
    async fn execute(&mut self, request: &ExecutionRequest) -> Result<ExecutionOutput, ExecutionError> {
        check_input(request)?;
        self.start().await?;

        let started = Instant::now();
        let response = self
            .exchange(&request.to_protocol())
            .await
            .map_err(infrastructure)?;
        let duration_ms = started.elapsed().as_millis() as u64;

        debug!(duration_ms = duration_ms, "Harness answered");
        interpret_response(request, response, duration_ms)
    }

    async fn ping(&mut self) -> Result<(), ExecutionError> {
        match self.exchange(&ExecutorRequest::Ping).await.map_err(infrastructure)? {
            ExecutorResponse::Pong { .. } => Ok(()),
            other => Err(ExecutionError::Infrastructure(format!(
                "Expected pong from harness, got {:?}",
                other
            ))),
        }
    }

    async fn terminate(&mut self) {
        if let Some(mut guard) = self.container.take() {
            let options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };
            match self.docker.remove_container(&guard.container_id, Some(options)).await {
                Ok(()) => {
                    debug!(executor_id = self.executor_id, container_id = %guard.container_id, "Sandbox container removed");
                    guard.armed = false;
                }
                Err(e) => {
                    warn!(executor_id = self.executor_id, error = %e, "Failed to remove container, retrying on drop");
                }
            }
        }
    }
}
