//! Environment constants and path utilities.
//!
//! This module centralizes the hardcoded paths and names used by the command
//! line tool, making them easier to maintain and modify.

use std::path::{Path, PathBuf};

/// Application directory name (hidden directory like .git, .vscode)
pub const APP_DIR_NAME: &str = ".d7x";

/// Configuration file name inside the application directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration file name in the current directory
pub const LOCAL_CONFIG_FILE_NAME: &str = "d7x.toml";

/// System-wide configuration file (Unix-like systems)
pub const SYSTEM_CONFIG_PATH: &str = "/etc/d7x/config.toml";

/// Log filter used when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "dockerbox=warn,d7x=warn";

/// Build the application directory path under a root
pub fn app_dir_path(root: &Path) -> PathBuf {
    root.join(APP_DIR_NAME)
}

/// Build `./.d7x/config.toml` style path under a project root
pub fn local_config_file_path(root: &Path) -> PathBuf {
    app_dir_path(root).join(CONFIG_FILE_NAME)
}

/// Build the user configuration directory path
pub fn user_config_dir_path(home: &Path) -> PathBuf {
    app_dir_path(home)
}

/// Build the user configuration file path
pub fn user_config_file_path(home: &Path) -> PathBuf {
    user_config_dir_path(home).join(CONFIG_FILE_NAME)
}
