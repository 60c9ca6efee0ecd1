//! # DockerBox
//!
//! Create container images without writing a Dockerfile. A session starts a
//! throwaway container from a local image, attaches the local terminal to its
//! shell, and when the user leaves, saves the container as `<name>:<suffix>`
//! and removes it.
//!
//! ## Architecture Overview
//!
//! - **[`container`]**: engine access, session lifecycle and the terminal pump
//! - **[`cli`]**: argument parsing and configuration discovery for `d7x`
//! - **[`env`]**: path constants shared by the command line tool
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dockerbox::{ContainerClient, SessionOptions, SessionOrchestrator, SessionRequest, StdinTerminal};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = Arc::new(ContainerClient::new().await?);
//!     let outcome = SessionOrchestrator::new(engine, Box::new(StdinTerminal), SessionOptions::default())
//!         .run(SessionRequest::new("toolbox", "ubuntu:22.04").mount("/src:/src"))
//!         .await;
//!
//!     if let Some(image) = &outcome.final_image {
//!         println!("Saved {}", image);
//!     }
//!     std::process::exit(outcome.exit_code());
//! }
//! ```

/// Container engine access and sandbox session orchestration.
///
/// Everything that talks to Docker/Podman or drives a session lives here.
pub mod container;

/// Environment constants and path utilities.
pub mod env;

// CLI module for command-line interface
pub mod cli;

// Re-export the session entry points
pub use container::{
    ContainerClient, Engine, SandboxError, SessionOptions, SessionOrchestrator, SessionOutcome,
    SessionRequest, SessionState, StdinTerminal,
};
