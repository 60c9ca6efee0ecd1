//! Docker/Podman client wrapper.
//!
//! Connects to the local container runtime through bollard and implements
//! [`Engine`] on top of it.

use crate::container::{
    AttachSpec, AttachedStream, ContainerSpec, Engine, EngineError, ImageInfo, OutputChunk, Result,
    SandboxError,
};
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{AttachContainerResults, LogOutput};
use bollard::query_parameters::{
    AttachContainerOptionsBuilder, CommitContainerOptionsBuilder, CreateContainerOptionsBuilder,
    ListImagesOptions, RemoveContainerOptions, StartContainerOptions, StopContainerOptionsBuilder,
    WaitContainerOptions,
};
use futures::stream::StreamExt;
use std::sync::Arc;
use tracing::{debug, info};

/// Container client configuration.
#[derive(Debug, Clone)]
pub struct ContainerClientConfig {
    /// Socket connection timeout in seconds
    pub timeout: u64,
}

impl Default for ContainerClientConfig {
    fn default() -> Self {
        Self { timeout: 120 }
    }
}

/// Docker/Podman API client wrapper.
///
/// Manages connection to Docker or Podman daemon with automatic fallback
/// and health checking.
#[derive(Clone)]
pub struct ContainerClient {
    docker: Arc<Docker>,
}

impl ContainerClient {
    /// Create a new container client with default configuration.
    ///
    /// Attempts to connect to Docker first, then falls back to Podman if available.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::EngineUnavailable`] if neither runtime answers.
    pub async fn new() -> Result<Self> {
        Self::with_config(ContainerClientConfig::default()).await
    }

    /// Create a new container client with custom configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::EngineUnavailable`] if connection fails.
    pub async fn with_config(config: ContainerClientConfig) -> Result<Self> {
        let docker = Self::connect(&config)?;
        let client = Self {
            docker: Arc::new(docker),
        };

        // Verify connection works
        client.ping().await?;

        Ok(client)
    }

    /// Connect to Docker or Podman daemon.
    ///
    /// Tries multiple connection strategies in order:
    /// 1. Local defaults (DOCKER_HOST, Unix socket or Windows named pipe)
    /// 2. Rootless Podman socket
    /// 3. System Podman socket
    fn connect(config: &ContainerClientConfig) -> Result<Docker> {
        debug!("Attempting to connect to container runtime...");

        match Docker::connect_with_local_defaults() {
            Ok(docker) => {
                debug!("Connected to container runtime via local defaults");
                return Ok(docker);
            }
            Err(e) => {
                debug!("Local defaults failed: {}", e);
            }
        }

        #[cfg(unix)]
        {
            let mut sockets = Vec::new();
            if let Ok(home) = std::env::var("HOME") {
                sockets.push(format!("unix://{}/run/podman/podman.sock", home));
            }
            sockets.push("unix:///run/podman/podman.sock".to_string());

            for socket in sockets {
                debug!("Trying Podman socket: {}", socket);
                match Docker::connect_with_socket(&socket, config.timeout, bollard::API_DEFAULT_VERSION)
                {
                    Ok(docker) => {
                        info!("Connected to Podman via {}", socket);
                        return Ok(docker);
                    }
                    Err(e) => {
                        debug!("Podman socket {} failed: {}", socket, e);
                    }
                }
            }
        }

        Err(SandboxError::EngineUnavailable(
            "neither Docker nor Podman is reachable".to_string(),
        ))
    }

    /// Ping the container runtime to verify connectivity.
    ///
    /// # Errors
    ///
    /// Returns error if ping fails.
    pub async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map_err(|e| SandboxError::EngineUnavailable(e.to_string()))?;
        debug!("Container runtime ping successful");
        Ok(())
    }

    /// Get version information from the container runtime.
    ///
    /// # Errors
    ///
    /// Returns error if version query fails.
    pub async fn version(&self) -> Result<bollard::models::SystemVersion> {
        self.docker
            .version()
            .await
            .map_err(|e| SandboxError::EngineUnavailable(format!("version query failed: {}", e)))
    }

    /// Check if the runtime is Docker or Podman.
    ///
    /// # Errors
    ///
    /// Returns error if runtime detection fails.
    pub async fn runtime_type(&self) -> Result<RuntimeType> {
        let version = self.version().await?;

        let is_podman = version
            .components
            .unwrap_or_default()
            .iter()
            .any(|c| c.name.to_lowercase().contains("podman"));

        Ok(if is_podman {
            RuntimeType::Podman
        } else {
            RuntimeType::Docker
        })
    }

    /// Get the underlying Docker client.
    pub fn docker(&self) -> &Docker {
        &self.docker
    }
}

fn output_chunk(item: std::result::Result<LogOutput, bollard::errors::Error>) -> std::result::Result<OutputChunk, EngineError> {
    match item? {
        LogOutput::StdErr { message } => Ok(OutputChunk::Stderr(message.to_vec())),
        other => Ok(OutputChunk::Stdout(other.into_bytes().to_vec())),
    }
}

#[async_trait]
impl Engine for ContainerClient {
    async fn list_images(&self) -> std::result::Result<Vec<ImageInfo>, EngineError> {
        let images = self
            .docker
            .list_images(None::<ListImagesOptions>)
            .await?;

        Ok(images
            .into_iter()
            .map(|img| ImageInfo {
                id: img.id,
                repo_tags: img.repo_tags,
                size: img.size,
                created: img.created,
            })
            .collect())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> std::result::Result<String, EngineError> {
        debug!("Creating container: {}", spec.name);
        let options = CreateContainerOptionsBuilder::default()
            .name(&spec.name)
            .build();

        let response = self
            .docker
            .create_container(Some(options), spec.to_create_body())
            .await?;
        for warning in &response.warnings {
            debug!("Create warning for {}: {}", spec.name, warning);
        }
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> std::result::Result<(), EngineError> {
        debug!("Starting container: {}", id);
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await?;
        Ok(())
    }

    async fn attach_container(
        &self,
        id: &str,
        spec: &AttachSpec,
    ) -> std::result::Result<AttachedStream, EngineError> {
        debug!("Attaching to container: {}", id);
        let options = AttachContainerOptionsBuilder::default()
            .stdin(spec.stdin)
            .stdout(spec.stdout)
            .stderr(spec.stderr)
            .stream(true)
            .logs(false)
            .detach_keys(&spec.detach_keys)
            .build();

        let AttachContainerResults { output, input } =
            self.docker.attach_container(id, Some(options)).await?;

        Ok(AttachedStream {
            output: output.map(output_chunk).boxed(),
            input,
        })
    }

    async fn wait_container(&self, id: &str) -> std::result::Result<i64, EngineError> {
        debug!("Waiting for container {} to stop", id);
        let options = WaitContainerOptions {
            condition: "not-running".to_string(),
        };
        let mut stream = self.docker.wait_container(id, Some(options));

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero exit status as an error
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(e.into()),
            None => Err(EngineError::Protocol(format!(
                "wait stream for {} ended without a status",
                id
            ))),
        }
    }

    async fn stop_container(&self, id: &str, timeout_secs: i32) -> std::result::Result<(), EngineError> {
        debug!("Stopping container: {} ({}s)", id, timeout_secs);
        let options = StopContainerOptionsBuilder::default().t(timeout_secs).build();
        self.docker.stop_container(id, Some(options)).await?;
        Ok(())
    }

    async fn commit_container(
        &self,
        id: &str,
        repo: &str,
        tag: &str,
    ) -> std::result::Result<String, EngineError> {
        debug!("Committing container {} as {}:{}", id, repo, tag);
        let options = CommitContainerOptionsBuilder::default()
            .container(id)
            .repo(repo)
            .tag(tag)
            .pause(true)
            .build();

        let response = self
            .docker
            .commit_container(options, bollard::models::ContainerConfig::default())
            .await?;
        Ok(response.id)
    }

    async fn remove_container(&self, id: &str, force: bool) -> std::result::Result<(), EngineError> {
        debug!("Removing container: {}", id);
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        self.docker.remove_container(id, Some(options)).await?;
        Ok(())
    }
}

/// Type of container runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeType {
    /// Docker runtime
    Docker,
    /// Podman runtime
    Podman,
}

impl std::fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeType::Docker => write!(f, "Docker"),
            RuntimeType::Podman => write!(f, "Podman"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires Docker/Podman to be running
    async fn test_client_connection() {
        let client = ContainerClient::new().await.unwrap();
        client.ping().await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_runtime_detection() {
        let client = ContainerClient::new().await.unwrap();
        let runtime_type = client.runtime_type().await.unwrap();
        println!("Runtime type: {}", runtime_type);
    }

    #[tokio::test]
    #[ignore]
    async fn test_list_images() {
        let client = ContainerClient::new().await.unwrap();
        let images = client.list_images().await.unwrap();
        println!("Found {} images", images.len());
    }

    #[test]
    fn test_stderr_chunk_routed_to_stderr() {
        let chunk = output_chunk(Ok(LogOutput::StdErr {
            message: "oops".into(),
        }))
        .unwrap();
        assert_eq!(chunk, OutputChunk::Stderr(b"oops".to_vec()));

        let chunk = output_chunk(Ok(LogOutput::Console {
            message: "$ ".into(),
        }))
        .unwrap();
        assert_eq!(chunk, OutputChunk::Stdout(b"$ ".to_vec()));
    }
}
