//! Environment constants and path utilities for the scheduler.
//!
//! Centralizes the directory and file names used for configuration and
//! persisted state.

use std::path::{Path, PathBuf};

/// Application directory name (hidden directory like .git, .vscode)
pub const CPPS_DIR_NAME: &str = ".cpps";

/// Configuration file name inside [`CPPS_DIR_NAME`]
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration file name in the working directory
pub const LOCAL_CONFIG_FILE_NAME: &str = "cpps.toml";

/// System-wide configuration file
pub const SYSTEM_CONFIG_FILE: &str = "/etc/cpps/config.toml";

/// Environment variable overriding the log filter
pub const LOG_ENV_VAR: &str = "CPPS_LOG";

/// Build the .cpps directory path from a working directory
pub fn cpps_dir_path(root: &Path) -> PathBuf {
    root.join(CPPS_DIR_NAME)
}

/// Build config directory path in user's home directory
pub fn user_config_dir_path(home_dir: &Path) -> PathBuf {
    cpps_dir_path(home_dir)
}

/// Build config file path in user's home directory
pub fn user_config_file_path(home_dir: &Path) -> PathBuf {
    user_config_dir_path(home_dir).join(CONFIG_FILE_NAME)
}

/// Build local config file path in current directory
pub fn local_config_file_path(current_dir: &Path) -> PathBuf {
    cpps_dir_path(current_dir).join(CONFIG_FILE_NAME)
}
