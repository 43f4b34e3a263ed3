//! DAP message types
//!
//! These types represent the Debug Adapter Protocol messages as seen from
//! the adapter side: requests are deserialized, responses and events are
//! serialized.
//! See: https://microsoft.github.io/debug-adapter-protocol/specification

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::{Error, Result};

// === Base Protocol Messages ===

/// DAP request message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMessage {
    pub seq: i64,
    #[serde(rename = "type")]
    pub message_type: String,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

/// DAP response message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub seq: i64,
    #[serde(rename = "type")]
    pub message_type: String,
    pub request_seq: i64,
    pub success: bool,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// DAP event message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    pub seq: i64,
    #[serde(rename = "type")]
    pub message_type: String,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// Deserialize request arguments, turning serde failures into argument errors
///
/// A missing required field becomes [`Error::MissingArgument`] naming the
/// field; anything else malformed becomes [`Error::InvalidArgument`].
pub fn parse_arguments<T: DeserializeOwned>(arguments: Option<Value>) -> Result<T> {
    let value = arguments.unwrap_or_else(|| Value::Object(Default::default()));
    serde_json::from_value(value).map_err(|e| {
        let text = e.to_string();
        match text
            .strip_prefix("missing field `")
            .and_then(|rest| rest.split('`').next())
        {
            Some(field) => Error::missing_argument(field),
            None => Error::invalid_argument("arguments", text),
        }
    })
}

// === Request Arguments ===

/// Initialize request arguments
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeArguments {
    #[serde(default, rename = "clientID")]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default, rename = "adapterID")]
    pub adapter_id: Option<String>,
    #[serde(default = "default_true")]
    pub lines_start_at1: bool,
    #[serde(default = "default_true")]
    pub columns_start_at1: bool,
    #[serde(default)]
    pub path_format: Option<String>,
}

fn default_true() -> bool {
    true
}

/// JVM arguments given either as one string or as a list
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum VmArguments {
    Line(String),
    List(Vec<String>),
}

impl VmArguments {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Self::Line(line) => line.split_whitespace().map(String::from).collect(),
            Self::List(list) => list,
        }
    }
}

/// Launch request arguments as sent by the client
///
/// Every field is optional here; required fields are enforced when the
/// arguments are validated into launch settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchRequestArguments {
    pub project_root: Option<String>,
    pub main_class: Option<String>,
    pub vm_arguments: Option<VmArguments>,
    pub cwd: Option<String>,
    #[serde(flatten)]
    pub logging: LoggingArguments,
}

/// Attach request arguments as sent by the client
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachRequestArguments {
    pub project_root: Option<String>,
    pub host_name: Option<String>,
    pub port: Option<u16>,
    /// Connection timeout in milliseconds
    pub timeout: Option<u64>,
    #[serde(flatten)]
    pub logging: LoggingArguments,
}

/// Logging fields shared by launch and attach
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingArguments {
    pub log_level: Option<String>,
    pub enable_json_logging: Option<bool>,
    pub json_log_file: Option<String>,
}

/// SetBreakpoints request arguments
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointsArguments {
    pub source: Source,
    #[serde(default)]
    pub breakpoints: Option<Vec<SourceBreakpoint>>,
    /// Deprecated form carrying only line numbers
    #[serde(default)]
    pub lines: Option<Vec<i64>>,
}

/// SetExceptionBreakpoints request arguments
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetExceptionBreakpointsArguments {
    pub filters: Vec<String>,
}

/// Arguments naming a single thread (continue, next, stepIn, stepOut, pause, exceptionInfo)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadArguments {
    pub thread_id: i64,
}

/// StackTrace request arguments
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceArguments {
    pub thread_id: i64,
    #[serde(default)]
    pub start_frame: Option<i64>,
    #[serde(default)]
    pub levels: Option<i64>,
}

/// Scopes request arguments
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopesArguments {
    pub frame_id: i64,
}

/// Variables request arguments
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariablesArguments {
    pub variables_reference: i64,
    #[serde(default)]
    pub start: Option<i64>,
    #[serde(default)]
    pub count: Option<i64>,
}

/// Evaluate request arguments
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateArguments {
    pub expression: String,
    #[serde(default)]
    pub frame_id: Option<i64>,
    #[serde(default)]
    pub context: Option<String>,
}

/// Completions request arguments
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionsArguments {
    #[serde(default)]
    pub frame_id: Option<i64>,
    pub text: String,
    pub column: i64,
    #[serde(default)]
    pub line: Option<i64>,
}

/// Disconnect request arguments
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectArguments {
    #[serde(default)]
    pub restart: bool,
    #[serde(default)]
    pub terminate_debuggee: Option<bool>,
}

// === Response Bodies ===

/// Capabilities returned by initialize response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub supports_configuration_done_request: bool,
    pub supports_function_breakpoints: bool,
    pub supports_conditional_breakpoints: bool,
    pub supports_hit_conditional_breakpoints: bool,
    pub supports_log_points: bool,
    pub supports_evaluate_for_hovers: bool,
    pub supports_step_back: bool,
    pub supports_set_variable: bool,
    pub supports_restart_frame: bool,
    pub supports_restart_request: bool,
    pub supports_goto_targets_request: bool,
    pub supports_step_in_targets_request: bool,
    pub supports_completions_request: bool,
    pub supports_modules_request: bool,
    pub supports_loaded_sources_request: bool,
    pub supports_exception_info_request: bool,
    pub supports_terminate_request: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exception_breakpoint_filters: Vec<ExceptionBreakpointsFilter>,
}

/// An exception filter the client may toggle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionBreakpointsFilter {
    pub filter: String,
    pub label: String,
    #[serde(default)]
    pub default: bool,
}

/// SetBreakpoints response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetBreakpointsResponseBody {
    pub breakpoints: Vec<Breakpoint>,
}

/// StackTrace response body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceResponseBody {
    pub stack_frames: Vec<StackFrame>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_frames: Option<i64>,
}

/// Threads response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadsResponseBody {
    pub threads: Vec<Thread>,
}

/// Scopes response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopesResponseBody {
    pub scopes: Vec<Scope>,
}

/// Variables response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariablesResponseBody {
    pub variables: Vec<Variable>,
}

/// Evaluate response body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResponseBody {
    pub result: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default)]
    pub variables_reference: i64,
}

/// Continue response body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinueResponseBody {
    pub all_threads_continued: bool,
}

/// Completions response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionsResponseBody {
    pub targets: Vec<CompletionItem>,
}

/// ExceptionInfo response body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionInfoResponseBody {
    pub exception_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub break_mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ExceptionDetails>,
}

// === Common Types ===

/// Source location
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_reference: Option<i64>,
}

/// Breakpoint to set at a source location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBreakpoint {
    pub line: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hit_condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_message: Option<String>,
}

/// Breakpoint information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakpoint {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<i64>,
}

/// Stack frame
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    pub line: i64,
    pub column: i64,
}

/// Thread
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: i64,
    pub name: String,
}

/// Scope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub name: String,
    pub variables_reference: i64,
    #[serde(default)]
    pub expensive: bool,
}

/// Variable
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: String,
    pub value: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default)]
    pub variables_reference: i64,
}

/// Completion candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionItem {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub item_type: Option<String>,
}

/// Exception details, nested through `innerException` for causes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_type_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inner_exception: Vec<ExceptionDetails>,
}

// === Event Bodies ===

/// Stopped event body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoppedEventBody {
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<i64>,
    #[serde(default)]
    pub all_threads_stopped: bool,
}

/// Output event body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputEventBody {
    pub category: Option<String>,
    pub output: String,
}

/// Breakpoint event body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakpointEventBody {
    pub reason: String,
    pub breakpoint: Breakpoint,
}

/// Exited event body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitedEventBody {
    pub exit_code: i64,
}

/// Terminated event body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TerminatedEventBody {
    #[serde(default)]
    pub restart: bool,
}

// === Outgoing Events ===

/// Push event sent from the adapter to the client
#[derive(Debug, Clone)]
pub enum Event {
    Initialized,
    Stopped(StoppedEventBody),
    Output(OutputEventBody),
    Breakpoint(BreakpointEventBody),
    Exited(ExitedEventBody),
    Terminated(TerminatedEventBody),
}

impl Event {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            Event::Initialized => "initialized",
            Event::Stopped(_) => "stopped",
            Event::Output(_) => "output",
            Event::Breakpoint(_) => "breakpoint",
            Event::Exited(_) => "exited",
            Event::Terminated(_) => "terminated",
        }
    }

    /// Serialized event body, if the event carries one
    pub fn body(&self) -> Result<Option<Value>> {
        let body = match self {
            Event::Initialized => None,
            Event::Stopped(body) => Some(serde_json::to_value(body)?),
            Event::Output(body) => Some(serde_json::to_value(body)?),
            Event::Breakpoint(body) => Some(serde_json::to_value(body)?),
            Event::Exited(body) => Some(serde_json::to_value(body)?),
            Event::Terminated(body) => Some(serde_json::to_value(body)?),
        };
        Ok(body)
    }

    /// Stopped event for a single thread
    pub fn stopped(thread_id: i64, reason: &str) -> Self {
        Event::Stopped(StoppedEventBody {
            reason: reason.to_string(),
            description: None,
            thread_id: Some(thread_id),
            all_threads_stopped: false,
        })
    }

    /// Output event for one line of a debuggee stream
    pub fn output(category: &str, output: String) -> Self {
        Event::Output(OutputEventBody {
            category: Some(category.to_string()),
            output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_field_becomes_missing_argument() {
        let err = parse_arguments::<ThreadArguments>(Some(json!({}))).unwrap_err();
        assert!(matches!(err, Error::MissingArgument { ref name } if name == "threadId"));
    }

    #[test]
    fn test_absent_arguments_parse_as_empty_object() {
        let args: DisconnectArguments = parse_arguments(None).unwrap();
        assert!(!args.restart);
        assert!(args.terminate_debuggee.is_none());
    }

    #[test]
    fn test_wrong_type_becomes_invalid_argument() {
        let err = parse_arguments::<ThreadArguments>(Some(json!({ "threadId": "one" }))).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn test_launch_arguments_accept_both_vm_argument_shapes() {
        let args: LaunchRequestArguments = parse_arguments(Some(json!({
            "projectRoot": "/p",
            "mainClass": "app.Main",
            "vmArguments": "-Xmx1g  -ea",
            "logLevel": "debug"
        })))
        .unwrap();
        assert_eq!(args.vm_arguments.unwrap().into_vec(), vec!["-Xmx1g", "-ea"]);
        assert_eq!(args.logging.log_level.as_deref(), Some("debug"));

        let args: LaunchRequestArguments = parse_arguments(Some(json!({
            "vmArguments": ["-Dname=a b"]
        })))
        .unwrap();
        assert_eq!(args.vm_arguments.unwrap().into_vec(), vec!["-Dname=a b"]);
    }

    #[test]
    fn test_stopped_event_serialization() {
        let event = Event::stopped(3, "breakpoint");
        assert_eq!(event.name(), "stopped");
        assert_eq!(
            event.body().unwrap().unwrap(),
            json!({ "reason": "breakpoint", "threadId": 3, "allThreadsStopped": false })
        );
        assert!(Event::Initialized.body().unwrap().is_none());
    }
}
