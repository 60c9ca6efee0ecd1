//! Container engine capability surface.
//!
//! The orchestrator only needs a handful of engine calls. They are collected
//! in [`Engine`] so the session can run against Docker, Podman, or an
//! in-memory engine in tests.

use crate::container::{AttachSpec, ContainerSpec, ImageInfo};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::pin::Pin;
use tokio::io::AsyncWrite;

/// Engine call failure.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Docker/Podman API error
    #[error("Container API error: {0}")]
    Api(#[from] bollard::errors::Error),

    /// The engine answered without the data the call promised
    #[error("Unexpected engine response: {0}")]
    Protocol(String),

    /// Any other engine-side failure
    #[error("{0}")]
    Other(String),
}

/// A chunk of container output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputChunk {
    /// Bytes for the local standard output
    Stdout(Vec<u8>),
    /// Bytes for the local standard error
    Stderr(Vec<u8>),
}

/// Both halves of an attached container process.
pub struct AttachedStream {
    /// Container output, ending when the process closes its streams
    pub output: BoxStream<'static, Result<OutputChunk, EngineError>>,
    /// Container standard input
    pub input: Pin<Box<dyn AsyncWrite + Send>>,
}

impl std::fmt::Debug for AttachedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachedStream").finish_non_exhaustive()
    }
}

/// Engine operations a sandbox session relies on.
#[async_trait]
pub trait Engine: Send + Sync {
    /// List local images.
    async fn list_images(&self) -> Result<Vec<ImageInfo>, EngineError>;

    /// Create a container and return its id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError>;

    /// Start a created container.
    async fn start_container(&self, id: &str) -> Result<(), EngineError>;

    /// Attach to the container's main process.
    async fn attach_container(
        &self,
        id: &str,
        spec: &AttachSpec,
    ) -> Result<AttachedStream, EngineError>;

    /// Block until the container is not running and return its exit code.
    async fn wait_container(&self, id: &str) -> Result<i64, EngineError>;

    /// Ask the container to stop, killing it after `timeout_secs`.
    async fn stop_container(&self, id: &str, timeout_secs: i32) -> Result<(), EngineError>;

    /// Snapshot the container filesystem as `repo:tag` and return the image id.
    async fn commit_container(&self, id: &str, repo: &str, tag: &str)
    -> Result<String, EngineError>;

    /// Remove the container.
    async fn remove_container(&self, id: &str, force: bool) -> Result<(), EngineError>;
}
