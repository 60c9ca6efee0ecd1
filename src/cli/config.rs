//! Configuration discovery and loading
//!
//! This module handles the configuration discovery hierarchy:
//! 1. Current directory: ./d7x.toml or ./.d7x/config.toml
//! 2. User config: ~/.d7x/config.toml
//! 3. System config: /etc/d7x/config.toml
//! 4. Built-in defaults

use crate::cli::CreateConfig;
use crate::container::{SandboxError, SessionOptions};
use crate::env;
use serde::{Deserialize, Serialize};
use std::env as std_env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Settings read from a configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Command started as the container's main process
    pub shell: Vec<String>,
    /// Engine detach key sequence
    pub detach_keys: String,
    /// Save the container as an image when the session ends
    pub commit: bool,
    /// Also save when stdin is not a terminal
    pub commit_when_headless: bool,
    /// Milliseconds the stream pump may drain after the container stops
    pub drain_timeout_ms: u64,
    /// Grace period for stops on interruption or failed attach; detach always stops at once
    pub stop_timeout_secs: i32,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        let options = SessionOptions::default();
        Self {
            shell: options.shell,
            detach_keys: options.detach_keys,
            commit: options.commit,
            commit_when_headless: options.commit_when_headless,
            drain_timeout_ms: options.drain_timeout.as_millis() as u64,
            stop_timeout_secs: options.stop_timeout_secs,
        }
    }
}

impl SandboxConfig {
    /// Load from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let content = fs::read_to_string(path)?;
        let config: SandboxConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save to TOML file
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Session options from these settings.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Config`] for an empty shell, empty detach keys,
    /// or a negative stop timeout.
    pub fn session_options(&self) -> Result<SessionOptions, SandboxError> {
        if self.shell.iter().all(|part| part.trim().is_empty()) {
            return Err(SandboxError::Config("shell must not be empty".to_string()));
        }
        if self.detach_keys.trim().is_empty() {
            return Err(SandboxError::Config("detach_keys must not be empty".to_string()));
        }
        if self.stop_timeout_secs < 0 {
            return Err(SandboxError::Config(
                "stop_timeout_secs must not be negative".to_string(),
            ));
        }

        Ok(SessionOptions {
            shell: self.shell.clone(),
            detach_keys: self.detach_keys.clone(),
            commit: self.commit,
            commit_when_headless: self.commit_when_headless,
            drain_timeout: Duration::from_millis(self.drain_timeout_ms),
            stop_timeout_secs: self.stop_timeout_secs,
            announce: true,
        })
    }

    /// Session options with command line overrides applied on top.
    pub fn session_options_for(&self, create: &CreateConfig) -> Result<SessionOptions, SandboxError> {
        let mut options = self.session_options()?;
        if create.no_commit {
            options.commit = false;
        }
        if let Some(shell) = &create.shell {
            options.shell = shell.clone();
        }
        if let Some(keys) = &create.detach_keys {
            options.detach_keys = keys.clone();
        }
        if create.json {
            options.announce = false;
        }
        Ok(options)
    }
}

/// Configuration discovery system
pub struct ConfigDiscovery;

impl ConfigDiscovery {
    /// Load the override file if given, otherwise discover one.
    pub fn load(config_override: Option<&Path>) -> Result<SandboxConfig, Box<dyn std::error::Error + Send + Sync>> {
        match config_override {
            Some(path) => {
                info!("Loading configuration override from: {:?}", path);
                SandboxConfig::from_toml_file(path)
            }
            None => Self::discover_config(),
        }
    }

    /// Discover and load configuration using the hierarchy
    pub fn discover_config() -> Result<SandboxConfig, Box<dyn std::error::Error + Send + Sync>> {
        if let Some(config_path) = Self::find_config_file() {
            info!("Loading configuration from: {:?}", config_path);
            return SandboxConfig::from_toml_file(config_path);
        }

        debug!("No configuration file found, using defaults");
        Ok(SandboxConfig::default())
    }

    /// Find configuration file using discovery hierarchy
    pub fn find_config_file() -> Option<PathBuf> {
        Self::get_config_candidates()
            .into_iter()
            .inspect(|candidate| debug!("Checking for config file: {:?}", candidate))
            .find(|candidate| candidate.is_file())
    }

    /// Get list of configuration file candidates in priority order
    fn get_config_candidates() -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Ok(current_dir) = std_env::current_dir() {
            candidates.push(current_dir.join(env::LOCAL_CONFIG_FILE_NAME));
            candidates.push(env::local_config_file_path(&current_dir));
        }

        if let Some(home_dir) = Self::get_home_dir() {
            candidates.push(env::user_config_file_path(&home_dir));
        }

        #[cfg(unix)]
        candidates.push(PathBuf::from(env::SYSTEM_CONFIG_PATH));

        candidates
    }

    /// Get home directory path
    fn get_home_dir() -> Option<PathBuf> {
        std_env::var("HOME")
            .ok()
            .or_else(|| std_env::var("USERPROFILE").ok())
            .map(PathBuf::from)
    }

    /// Show configuration discovery information for debugging
    pub fn show_discovery_info(config_override: Option<&Path>) {
        println!("Configuration Discovery Hierarchy:");
        println!();

        if let Some(path) = config_override {
            println!("  (override) {:?}", path);
        }
        for (i, candidate) in Self::get_config_candidates().iter().enumerate() {
            let status = if candidate.exists() {
                if candidate.is_file() {
                    "✓ EXISTS"
                } else {
                    "✗ NOT A FILE"
                }
            } else {
                "✗ NOT FOUND"
            };

            println!("  {}. {:?} - {}", i + 1, candidate, status);
        }

        println!();
        match config_override
            .map(Path::to_path_buf)
            .or_else(Self::find_config_file)
        {
            Some(found) => println!("Active configuration: {:?}", found),
            None => println!("Active configuration: Built-in defaults"),
        }

        match Self::load(config_override) {
            Ok(config) => match toml::to_string_pretty(&config) {
                Ok(rendered) => {
                    println!();
                    println!("Effective settings:");
                    println!("{}", rendered);
                }
                Err(e) => println!("Failed to render configuration: {}", e),
            },
            Err(e) => println!("Failed to load configuration: {}", e),
        }
    }
}
