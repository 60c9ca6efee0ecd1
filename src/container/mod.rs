//! Ephemeral container sessions.
//!
//! This module runs one interactive container from creation to removal and
//! keeps the container's final filesystem as a new image. It talks to
//! Docker/Podman through the [`Engine`] trait, with the bollard-backed
//! [`ContainerClient`] as the production implementation.
//!
//! ## Architecture
//!
//! - [`volume`]: `source:target` bind mount parsing
//! - [`image`]: local image presence check
//! - [`terminal`]: raw-mode capture and guaranteed restore
//! - [`interactive`]: duplex byte pump with the detach sentinel
//! - [`reference`]: unique suffixes for commit tags
//! - [`engine`]: engine capability surface consumed by the orchestrator
//! - [`client`]: bollard client implementing [`Engine`]
//! - [`lifecycle`]: session record, states and final outcome
//! - [`orchestrator`]: the create→start→attach→run→stop→commit→remove sequence
//!
//! ## Usage
//!
//! ```rust,no_run
//! use dockerbox::container::{
//!     ContainerClient, SessionOptions, SessionOrchestrator, SessionRequest, StdinTerminal,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = Arc::new(ContainerClient::new().await?);
//!     let orchestrator =
//!         SessionOrchestrator::new(engine, Box::new(StdinTerminal), SessionOptions::default());
//!
//!     let request = SessionRequest::new("scratch", "alpine:latest")
//!         .mount("/tmp/work:/work");
//!     let outcome = orchestrator.run(request).await;
//!     println!("saved: {:?}", outcome.final_image);
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod engine;
mod image;
mod interactive;
mod lifecycle;
mod orchestrator;
mod reference;
mod terminal;
mod volume;

pub use client::{ContainerClient, ContainerClientConfig, RuntimeType};
pub use config::{AttachSpec, ContainerSpec, ContainerSpecBuilder, SessionOptions};
pub use engine::{AttachedStream, Engine, EngineError, OutputChunk};
pub use image::{ImageInfo, ensure_image_present};
pub use interactive::{
    DETACH_SENTINEL, DETACH_STOP_GRACE_SECS, DuplexPump, InputReport, LocalInput, LocalOutput,
    PumpEvent, SessionIo, StopHandle,
};
pub use lifecycle::{SandboxSession, SessionOutcome, SessionState};
pub use orchestrator::{SessionOrchestrator, SessionRequest};
pub use reference::{ReferenceGenerator, UuidReferenceGenerator, commit_reference};
pub use terminal::{StdinTerminal, TerminalControl, TerminalController};
pub use volume::{MountSpec, parse_mount_spec, parse_mount_specs};

use serde::Serialize;

/// Which half of the attached stream an I/O failure happened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamDirection {
    /// Engine output copied to the local stdout/stderr
    Output,
    /// Local stdin forwarded to the engine
    Input,
}

impl std::fmt::Display for StreamDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamDirection::Output => write!(f, "output"),
            StreamDirection::Input => write!(f, "input"),
        }
    }
}

/// Sandbox session errors.
///
/// Engine failures carry the engine's error text so that every variant stays
/// cheap to clone into the final [`SessionOutcome`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SandboxError {
    /// Mount string is not `<source>:<target>`
    #[error("Invalid mount '{spec}': expected <source>:<target>")]
    MountSpecInvalid { spec: String },

    /// Base image is not present in the local image store
    #[error("{image} is not on the host\nTry -> docker pull {image}")]
    ImageNotFoundLocally { image: String },

    /// Local image list could not be fetched
    #[error("Failed to list local images: {0}")]
    ImageListFailed(String),

    /// Container creation failed
    #[error("Failed to create container {name}: {reason}")]
    ContainerCreateFailed { name: String, reason: String },

    /// Container start failed
    #[error("Failed to start container {id}: {reason}")]
    ContainerStartFailed { id: String, reason: String },

    /// Attaching to the container failed
    #[error("Failed to attach to container {id}: {reason}")]
    ContainerAttachFailed { id: String, reason: String },

    /// Copying bytes between the terminal and the container failed
    #[error("Stream {direction} failed: {reason}")]
    StreamIOFailed {
        direction: StreamDirection,
        reason: String,
    },

    /// Waiting for the container to stop failed
    #[error("Failed waiting for container {id} to stop: {reason}")]
    ContainerWaitFailed { id: String, reason: String },

    /// Stop request was rejected
    #[error("Failed to stop container {id}: {reason}")]
    ContainerStopFailed { id: String, reason: String },

    /// Commit to a new image failed
    #[error("Failed to save container {id} as {reference}: {reason}")]
    ContainerCommitFailed {
        id: String,
        reference: String,
        reason: String,
    },

    /// Force removal failed
    #[error("Failed to remove container {id}: {reason}")]
    ContainerRemoveFailed { id: String, reason: String },

    /// Local terminal mode could not be switched or restored
    #[error("Terminal mode error: {0}")]
    TerminalModeFailed(String),

    /// No container runtime reachable
    #[error(
        "Error connecting to the container daemon: {0}\nTry:\n  sudo systemctl start docker\nor install docker"
    )]
    EngineUnavailable(String),

    /// Session was interrupted by a termination signal
    #[error("Session interrupted")]
    Interrupted,

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SandboxError {
    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            SandboxError::MountSpecInvalid { .. } => "MountSpecInvalid",
            SandboxError::ImageNotFoundLocally { .. } => "ImageNotFoundLocally",
            SandboxError::ImageListFailed(_) => "ImageListFailed",
            SandboxError::ContainerCreateFailed { .. } => "ContainerCreateFailed",
            SandboxError::ContainerStartFailed { .. } => "ContainerStartFailed",
            SandboxError::ContainerAttachFailed { .. } => "ContainerAttachFailed",
            SandboxError::StreamIOFailed { .. } => "StreamIOFailed",
            SandboxError::ContainerWaitFailed { .. } => "ContainerWaitFailed",
            SandboxError::ContainerStopFailed { .. } => "ContainerStopFailed",
            SandboxError::ContainerCommitFailed { .. } => "ContainerCommitFailed",
            SandboxError::ContainerRemoveFailed { .. } => "ContainerRemoveFailed",
            SandboxError::TerminalModeFailed(_) => "TerminalModeFailed",
            SandboxError::EngineUnavailable(_) => "EngineUnavailable",
            SandboxError::Interrupted => "Interrupted",
            SandboxError::Config(_) => "Config",
        }
    }
}

impl Serialize for SandboxError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("SandboxError", 2)?;
        state.serialize_field("kind", self.kind())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Result type for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_not_found_carries_pull_hint() {
        let err = SandboxError::ImageNotFoundLocally {
            image: "ubuntu:22.04".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("ubuntu:22.04 is not on the host"));
        assert!(msg.contains("docker pull ubuntu:22.04"));
    }

    #[test]
    fn test_error_serializes_kind_and_message() {
        let err = SandboxError::StreamIOFailed {
            direction: StreamDirection::Input,
            reason: "broken pipe".to_string(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "StreamIOFailed");
        assert_eq!(json["message"], "Stream input failed: broken pipe");
    }
}
