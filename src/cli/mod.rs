//! CLI-specific functionality for the sandbox tool
//!
//! This module contains all CLI-related code including argument parsing
//! and configuration discovery.

pub mod args;
pub mod config;

pub use args::{Args, Commands, CreateConfig, ExecutionMode};
pub use config::{ConfigDiscovery, SandboxConfig};
