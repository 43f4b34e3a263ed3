//! Platform locations for the adapter's config file and session log
//!
//! Resolved through `directories`, e.g. on Linux the config file lives at
//! `~/.config/jvm-debug-adapter/config.toml` and the log sink defaults to
//! `~/.local/share/jvm-debug-adapter/logs/adapter.log`.

use std::path::PathBuf;

use directories::ProjectDirs;

const APP_NAME: &str = "jvm-debug-adapter";
const CONFIG_FILE: &str = "config.toml";
const LOG_FILE: &str = "adapter.log";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", APP_NAME)
}

/// Adapter-wide configuration file, if the platform has a config directory
pub fn config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}

/// Log file used when a session enables file logging without naming one
///
/// The directory is created when the sink is opened, not here.
pub fn default_log_file() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().join("logs").join(LOG_FILE))
}
