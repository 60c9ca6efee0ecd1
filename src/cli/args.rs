//! Command line argument parsing
//!
//! This module handles CLI argument parsing with subcommands:
//! - `create`: Run an interactive sandbox container and save it as a new image
//! - `show-config`: Show configuration discovery information

use crate::container::SessionRequest;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug)]
pub enum ExecutionMode {
    Create(CreateConfig),
    ShowConfig { config_override: Option<PathBuf> },
}

/// Everything the `create` subcommand asked for.
#[derive(Debug)]
pub struct CreateConfig {
    pub request: SessionRequest,
    pub config_override: Option<PathBuf>,
    pub no_commit: bool,
    pub shell: Option<Vec<String>>,
    pub detach_keys: Option<String>,
    pub json: bool,
}

#[derive(Debug, Parser)]
#[command(name = "d7x")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "DockerBox: create images without a Dockerfile")]
#[command(
    long_about = "Work inside a throwaway container and keep the result as a new image.\n\nPress Ctrl-D in the session to stop the container and save it."
)]
#[command(arg_required_else_help = true)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start a sandbox container from a local image and attach to it
    Create {
        /// Name of the container and repository of the saved image
        name: String,
        /// Local base image (repo:tag)
        image: String,
        /// Bind mount a host directory (can be used multiple times or comma separated)
        #[arg(short = 'v', long = "volume", value_name = "SRC:DST", value_delimiter = ',')]
        volumes: Vec<String>,
        /// Remove the container without saving it as an image
        #[arg(long = "no-commit")]
        no_commit: bool,
        /// Command started in the container (default: /bin/sh)
        #[arg(long = "shell", value_name = "CMD")]
        shell: Option<String>,
        /// Engine detach key sequence (default: ctrl-d)
        #[arg(long = "detach-keys", value_name = "KEYS")]
        detach_keys: Option<String>,
        /// Print the session outcome as JSON instead of progress lines
        #[arg(long = "json")]
        json: bool,
    },
    /// Show configuration discovery information
    ShowConfig,
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }

    pub fn mode(&self) -> Result<ExecutionMode, String> {
        match &self.command {
            Some(Commands::Create {
                name,
                image,
                volumes,
                no_commit,
                shell,
                detach_keys,
                json,
            }) => {
                let shell = match shell {
                    Some(cmd) => {
                        let parts: Vec<String> = cmd.split_whitespace().map(String::from).collect();
                        if parts.is_empty() {
                            return Err("--shell must not be empty".to_string());
                        }
                        Some(parts)
                    }
                    None => None,
                };

                let mut request = SessionRequest::new(name.clone(), image.clone());
                request.mounts = volumes.clone();

                Ok(ExecutionMode::Create(CreateConfig {
                    request,
                    config_override: self.config.clone(),
                    no_commit: *no_commit,
                    shell,
                    detach_keys: detach_keys.clone(),
                    json: *json,
                }))
            }
            Some(Commands::ShowConfig) => Ok(ExecutionMode::ShowConfig {
                config_override: self.config.clone(),
            }),
            None => Err("No command specified".to_string()),
        }
    }
}
