//! Validated launch and attach settings
//!
//! Client arguments arrive with every field optional; these constructors
//! enforce the required ones and fill in defaults, so a missing field is
//! reported before any backend work starts.

use std::path::PathBuf;
use std::time::Duration;

use crate::backend::{classpath, AttachConfig, LaunchConfig};
use crate::common::{paths, Error, Result};
use crate::dap::{AttachRequestArguments, LaunchRequestArguments, LoggingArguments};

/// Per-session logging requested by the client
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSettings {
    pub level: Option<String>,
    /// File that receives a copy of the adapter log
    pub file: Option<PathBuf>,
}

impl LogSettings {
    fn from_arguments(args: LoggingArguments) -> Self {
        let file = match (args.enable_json_logging, args.json_log_file) {
            (Some(true), Some(path)) if !path.is_empty() => Some(PathBuf::from(path)),
            (Some(true), _) => paths::default_log_file(),
            _ => None,
        };
        Self {
            level: args.log_level,
            file,
        }
    }
}

/// A validated launch request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSettings {
    pub project_root: PathBuf,
    pub main_class: String,
    pub vm_arguments: Vec<String>,
    pub working_directory: PathBuf,
    pub logging: LogSettings,
}

impl LaunchSettings {
    pub fn from_arguments(args: LaunchRequestArguments) -> Result<Self> {
        let project_root = PathBuf::from(required(args.project_root, "projectRoot")?);
        let main_class = required(args.main_class, "mainClass")?;
        let working_directory = args
            .cwd
            .filter(|cwd| !cwd.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| project_root.clone());

        Ok(Self {
            project_root,
            main_class,
            vm_arguments: args.vm_arguments.map(|a| a.into_vec()).unwrap_or_default(),
            working_directory,
            logging: LogSettings::from_arguments(args.logging),
        })
    }

    /// Resolve the classpath and runtime for the backend
    pub fn into_launch_config(self) -> LaunchConfig {
        LaunchConfig {
            classpath: classpath::resolve_classpath(&self.project_root),
            java_executable: classpath::find_java_executable(),
            project_root: self.project_root,
            main_class: self.main_class,
            working_directory: self.working_directory,
            vm_arguments: self.vm_arguments,
        }
    }
}

/// A validated attach request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachSettings {
    pub project_root: PathBuf,
    pub host_name: String,
    pub port: u16,
    pub timeout: Duration,
    pub logging: LogSettings,
}

impl AttachSettings {
    /// `default_timeout_ms` applies when the client sends no timeout
    pub fn from_arguments(args: AttachRequestArguments, default_timeout_ms: u64) -> Result<Self> {
        let project_root = PathBuf::from(required(args.project_root, "projectRoot")?);
        let host_name = required(args.host_name, "hostName")?;
        let port = args.port.ok_or_else(|| Error::missing_argument("port"))?;
        if port == 0 {
            return Err(Error::invalid_argument("port", "must be between 1 and 65535"));
        }

        Ok(Self {
            project_root,
            host_name,
            port,
            timeout: Duration::from_millis(args.timeout.unwrap_or(default_timeout_ms)),
            logging: LogSettings::from_arguments(args.logging),
        })
    }

    pub fn to_attach_config(&self) -> AttachConfig {
        AttachConfig {
            project_root: self.project_root.clone(),
            host_name: self.host_name.clone(),
            port: self.port,
            timeout: self.timeout,
        }
    }
}

/// Empty strings count as missing
fn required(value: Option<String>, name: &str) -> Result<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| Error::missing_argument(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dap::parse_arguments;
    use serde_json::json;

    fn launch(value: serde_json::Value) -> Result<LaunchSettings> {
        LaunchSettings::from_arguments(parse_arguments(Some(value))?)
    }

    fn attach(value: serde_json::Value) -> Result<AttachSettings> {
        AttachSettings::from_arguments(parse_arguments(Some(value))?, 10_000)
    }

    #[test]
    fn test_missing_main_class_is_named() {
        let err = launch(json!({ "projectRoot": "/work/app" })).unwrap_err();
        assert!(matches!(err, Error::MissingArgument { ref name } if name == "mainClass"));

        let err = launch(json!({ "projectRoot": "/work/app", "mainClass": "" })).unwrap_err();
        assert!(matches!(err, Error::MissingArgument { ref name } if name == "mainClass"));
    }

    #[test]
    fn test_missing_project_root_is_reported_first() {
        let err = launch(json!({})).unwrap_err();
        assert!(matches!(err, Error::MissingArgument { ref name } if name == "projectRoot"));
    }

    #[test]
    fn test_launch_defaults() {
        let settings = launch(json!({ "projectRoot": "/work/app", "mainClass": "app.Main" })).unwrap();
        assert_eq!(settings.working_directory, PathBuf::from("/work/app"));
        assert!(settings.vm_arguments.is_empty());
        assert_eq!(settings.logging, LogSettings::default());
    }

    #[test]
    fn test_launch_logging_arguments() {
        let settings = launch(json!({
            "projectRoot": "/work/app",
            "mainClass": "app.Main",
            "logLevel": "trace",
            "enableJsonLogging": true,
            "jsonLogFile": "/tmp/adapter.log"
        }))
        .unwrap();
        assert_eq!(settings.logging.level.as_deref(), Some("trace"));
        assert_eq!(settings.logging.file, Some(PathBuf::from("/tmp/adapter.log")));
    }

    #[test]
    fn test_attach_requires_host_and_port() {
        let err = attach(json!({ "projectRoot": "/p", "port": 5005 })).unwrap_err();
        assert!(matches!(err, Error::MissingArgument { ref name } if name == "hostName"));

        let err = attach(json!({ "projectRoot": "/p", "hostName": "localhost" })).unwrap_err();
        assert!(matches!(err, Error::MissingArgument { ref name } if name == "port"));

        let err = attach(json!({ "projectRoot": "/p", "hostName": "localhost", "port": 0 })).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn test_attach_timeout_default_and_override() {
        let settings = attach(json!({ "projectRoot": "/p", "hostName": "h", "port": 5005 })).unwrap();
        assert_eq!(settings.timeout, Duration::from_millis(10_000));

        let settings =
            attach(json!({ "projectRoot": "/p", "hostName": "h", "port": 5005, "timeout": 250 })).unwrap();
        assert_eq!(settings.timeout, Duration::from_millis(250));
        assert_eq!(settings.to_attach_config().port, 5005);
    }

    #[test]
    fn test_launch_config_resolves_classpath() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("target/classes")).unwrap();
        let settings = launch(json!({
            "projectRoot": root.path().to_string_lossy(),
            "mainClass": "app.Main"
        }))
        .unwrap();

        let config = settings.into_launch_config();
        assert_eq!(config.classpath, vec![root.path().join("target/classes")]);
        assert_eq!(config.main_class, "app.Main");
    }
}
