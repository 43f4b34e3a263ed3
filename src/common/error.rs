//! Error types for the debug adapter
//!
//! Every failure surfaced to a protocol client carries a stable numeric id
//! and a human-readable message, so clients can tell a stale handle from a
//! missing argument without parsing text.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the debug adapter
#[derive(Error, Debug)]
pub enum Error {
    // === Argument Errors ===
    #[error("Missing required argument '{name}'")]
    MissingArgument { name: String },

    #[error("Invalid argument '{name}': {reason}")]
    InvalidArgument { name: String, reason: String },

    // === Handle Errors ===
    #[error("Unknown {kind} handle {id}")]
    UnknownHandle { kind: HandleKind, id: i64 },

    #[error("Thread {0} not found")]
    ThreadNotFound(i64),

    // === Session Errors ===
    #[error("No debuggee is running. Launch or attach first")]
    NoDebuggee,

    #[error("Debuggee already exists; launching or attaching twice in one session is not supported")]
    DebuggeeAlreadyExists,

    #[error("Timed out after {0} seconds waiting for 'configurationDone'")]
    ConfigurationDoneTimeout(u64),

    #[error("Timed out after {0} ms attaching to the debug backend")]
    AttachTimeout(u64),

    // === Request Errors ===
    #[error("Request '{0}' is not implemented")]
    NotImplemented(String),

    #[error("Unrecognized request '{0}'")]
    UnknownCommand(String),

    // === Backend Errors ===
    #[error("Debug backend error: {0}")]
    Backend(String),

    // === DAP Protocol Errors ===
    #[error("DAP protocol error: {0}")]
    DapProtocol(String),

    #[error("Client disconnected")]
    ClientDisconnected,

    // === Configuration Errors ===
    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Pools a protocol handle can be minted from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    Frame,
    Variables,
}

impl std::fmt::Display for HandleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Frame => write!(f, "frame"),
            Self::Variables => write!(f, "variables"),
        }
    }
}

impl Error {
    /// Create a missing argument error
    pub fn missing_argument(name: &str) -> Self {
        Self::MissingArgument {
            name: name.to_string(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// Create an unknown handle error
    pub fn unknown_handle(kind: HandleKind, id: i64) -> Self {
        Self::UnknownHandle { kind, id }
    }

    /// Stable numeric id reported in the DAP error body
    pub fn code(&self) -> i64 {
        match self {
            Error::MissingArgument { .. } => 1001,
            Error::InvalidArgument { .. } => 1002,
            Error::UnknownHandle { .. } => 2001,
            Error::ThreadNotFound(_) => 2002,
            Error::NoDebuggee => 3001,
            Error::DebuggeeAlreadyExists => 3002,
            Error::ConfigurationDoneTimeout(_) | Error::AttachTimeout(_) => 3003,
            Error::NotImplemented(_) => 4001,
            Error::UnknownCommand(_) => 4002,
            Error::Backend(_) => 5001,
            _ => 9000,
        }
    }
}

/// Error payload placed in a failed DAP response body
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    pub id: i64,
    pub format: String,
    #[serde(default)]
    pub show_user: bool,
}

impl From<&Error> for ErrorMessage {
    fn from(e: &Error) -> Self {
        let show_user = matches!(
            e,
            Error::MissingArgument { .. }
                | Error::InvalidArgument { .. }
                | Error::ConfigurationDoneTimeout(_)
                | Error::AttachTimeout(_)
                | Error::Backend(_)
        );

        Self {
            id: e.code(),
            // DAP treats `{name}` as a placeholder in `format`
            format: e.to_string().replace('{', "(").replace('}', ")"),
            show_user,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_argument_names_the_field() {
        let err = Error::missing_argument("mainClass");
        assert_eq!(err.to_string(), "Missing required argument 'mainClass'");
        assert_eq!(err.code(), 1001);
    }

    #[test]
    fn test_error_message_escapes_placeholders() {
        let err = Error::Backend("bad {token}".to_string());
        let msg = ErrorMessage::from(&err);
        assert_eq!(msg.format, "Debug backend error: bad (token)");
        assert!(msg.show_user);
    }

    #[test]
    fn test_unknown_handle_is_distinct_from_missing_argument() {
        let stale = Error::unknown_handle(HandleKind::Frame, 7);
        assert_eq!(stale.to_string(), "Unknown frame handle 7");
        assert_ne!(stale.code(), Error::missing_argument("frameId").code());
        assert!(!ErrorMessage::from(&stale).show_user);
    }
}
