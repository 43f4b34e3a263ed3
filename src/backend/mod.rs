//! Debug backend contract
//!
//! The adapter never talks to a JVM directly. A [`Backend`] launches or
//! attaches to a program and hands back a [`Debuggee`]; everything the
//! adapter learns about threads, frames and variables comes through the
//! traits in this module. Lines and columns crossing this boundary are
//! always 0-based.

pub mod classpath;
pub mod events;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::common::Result;

pub use events::{
    BreakpointStopEvent, EventBus, ExceptionEvent, ExitEvent, ListenerList, StepStopEvent,
};

/// A continuous byte stream from the debuggee (stdout or stderr)
pub type OutputStream = Box<dyn AsyncRead + Send + Unpin>;

/// Launches or attaches to a program under debug
#[async_trait]
pub trait Backend: Send + Sync {
    /// Start a new JVM for `config.main_class`
    ///
    /// The returned debuggee must not run user code until [`Debuggee::start`].
    async fn launch(&self, config: LaunchConfig) -> Result<Arc<dyn Debuggee>>;

    /// Connect to a JVM already listening for a debugger
    async fn attach(&self, config: AttachConfig) -> Result<Arc<dyn Debuggee>>;
}

/// Everything a backend needs to start a program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchConfig {
    pub project_root: PathBuf,
    pub main_class: String,
    pub classpath: Vec<PathBuf>,
    /// `None` lets the backend pick its own runtime
    pub java_executable: Option<PathBuf>,
    pub working_directory: PathBuf,
    pub vm_arguments: Vec<String>,
}

/// Where to find a running program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachConfig {
    pub project_root: PathBuf,
    pub host_name: String,
    pub port: u16,
    pub timeout: Duration,
}

/// One running or attached backend session
pub trait Debuggee: Send + Sync {
    fn threads(&self) -> Vec<Arc<dyn DebuggeeThread>>;

    fn thread_by_id(&self, id: i64) -> Option<Arc<dyn DebuggeeThread>> {
        self.threads().into_iter().find(|t| t.id() == id)
    }

    /// Hand over the stdout stream; later calls return `None`
    fn take_stdout(&self) -> Option<OutputStream>;

    /// Hand over the stderr stream; later calls return `None`
    fn take_stderr(&self) -> Option<OutputStream>;

    fn events(&self) -> &EventBus;

    /// Install one source breakpoint and report what the backend made of it
    fn install_breakpoint(&self, location: &SourceLocation) -> Result<InstalledBreakpoint>;

    /// Remove every breakpoint previously installed in `source`
    fn clear_breakpoints(&self, source: &Path) -> Result<()>;

    fn set_exception_filter(&self, filter: ExceptionFilter, enabled: bool) -> Result<()>;

    /// Let the program run
    fn start(&self) -> Result<()>;

    /// Ask the program to exit
    fn exit(&self) -> Result<()>;
}

/// A backend thread. Stopped-ness is per thread.
pub trait DebuggeeThread: Send + Sync {
    fn id(&self) -> i64;
    fn name(&self) -> String;
    fn pause(&self) -> Result<()>;
    fn resume(&self) -> Result<()>;
    fn step_over(&self) -> Result<()>;
    fn step_into(&self) -> Result<()>;
    fn step_out(&self) -> Result<()>;

    /// Frames of a stopped thread, innermost first
    fn stack_trace(&self) -> Result<Vec<Arc<dyn StackFrame>>>;
}

/// A frame of a stopped thread, valid until that thread resumes
pub trait StackFrame: Send + Sync {
    fn name(&self) -> String;
    fn position(&self) -> Option<Position>;

    /// Top-level variable scopes (e.g. locals)
    fn scopes(&self) -> Vec<Arc<dyn VariableNode>>;

    fn evaluate(&self, expression: &str) -> Result<Arc<dyn VariableNode>>;

    fn completions(&self, _text: &str, _column: i64) -> Vec<CompletionCandidate> {
        Vec::new()
    }
}

/// A variable or scope whose children are produced on demand
pub trait VariableNode: Send + Sync {
    fn name(&self) -> String;
    fn value(&self) -> Option<String>;
    fn type_name(&self) -> Option<String>;
    fn children(&self) -> Vec<Arc<dyn VariableNode>>;

    fn has_children(&self) -> bool {
        !self.children().is_empty()
    }
}

/// A 0-based location in a source file
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    pub path: PathBuf,
    pub line: i64,
    pub column: Option<i64>,
}

/// What the backend reported for one breakpoint installation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledBreakpoint {
    pub verified: bool,
    /// Line the breakpoint actually landed on, when the backend moved it
    pub line: Option<i64>,
    pub column: Option<i64>,
    pub message: Option<String>,
}

/// Where a frame is executing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub source: PathBuf,
    pub line: i64,
    pub column: Option<i64>,
}

/// The closed set of exception break filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExceptionFilter {
    Caught,
    Uncaught,
}

impl ExceptionFilter {
    pub const ALL: [ExceptionFilter; 2] = [ExceptionFilter::Caught, ExceptionFilter::Uncaught];

    /// Filter id exchanged with the client
    pub fn id(self) -> &'static str {
        match self {
            Self::Caught => "C",
            Self::Uncaught => "U",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Caught => "Caught Exceptions",
            Self::Uncaught => "Uncaught Exceptions",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.id() == id)
    }
}

/// An exception raised in the debuggee
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionRecord {
    pub description: String,
    pub message: Option<String>,
    pub type_name: Option<String>,
    pub full_type_name: Option<String>,
    pub stack_trace: Option<String>,
    pub cause: Option<Box<ExceptionRecord>>,
}

impl ExceptionRecord {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            message: None,
            type_name: None,
            full_type_name: None,
            stack_trace: None,
            cause: None,
        }
    }
}

/// A completion offered while evaluating in a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionCandidate {
    pub label: String,
    pub text: Option<String>,
    pub kind: Option<String>,
}
