//! Scripted in-memory debug backend
//!
//! The mock debuggee never runs anything on its own: tests drive it by
//! stopping threads, raising exceptions and finishing the program, and
//! inspect what the adapter asked of it.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::DuplexStream;

use crate::backend::{
    AttachConfig, Backend, BreakpointStopEvent, CompletionCandidate, Debuggee, DebuggeeThread,
    EventBus, ExceptionEvent, ExceptionFilter, ExceptionRecord, ExitEvent, InstalledBreakpoint,
    LaunchConfig, OutputStream, Position, SourceLocation, StackFrame, StepStopEvent, VariableNode,
};
use crate::common::{Error, Result};

// === Variables ===

/// A variable with a fixed set of children
pub struct MockVariable {
    name: String,
    value: Option<String>,
    type_name: Option<String>,
    children: Vec<Arc<MockVariable>>,
}

impl MockVariable {
    pub fn leaf(name: &str, value: &str, type_name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            value: Some(value.to_string()),
            type_name: Some(type_name.to_string()).filter(|t| !t.is_empty()),
            children: Vec::new(),
        })
    }

    pub fn structured(name: &str, type_name: &str, children: Vec<Arc<MockVariable>>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            value: Some(format!("{type_name} ({} fields)", children.len())),
            type_name: Some(type_name.to_string()).filter(|t| !t.is_empty()),
            children,
        })
    }
}

impl VariableNode for MockVariable {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn value(&self) -> Option<String> {
        self.value.clone()
    }

    fn type_name(&self) -> Option<String> {
        self.type_name.clone()
    }

    fn children(&self) -> Vec<Arc<dyn VariableNode>> {
        self.children
            .iter()
            .map(|c| Arc::clone(c) as Arc<dyn VariableNode>)
            .collect()
    }
}

// === Frames ===

/// A frame built up with the `with_*` methods
pub struct MockFrame {
    name: String,
    position: Option<Position>,
    scopes: Vec<Arc<MockVariable>>,
    evaluations: HashMap<String, Arc<MockVariable>>,
    completions: Vec<String>,
}

impl MockFrame {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            position: None,
            scopes: Vec::new(),
            evaluations: HashMap::new(),
            completions: Vec::new(),
        }
    }

    /// Place the frame at a 0-based line
    pub fn at(mut self, path: &str, line: i64) -> Self {
        self.position = Some(Position {
            source: PathBuf::from(path),
            line,
            column: None,
        });
        self
    }

    pub fn with_scope(mut self, scope: Arc<MockVariable>) -> Self {
        self.scopes.push(scope);
        self
    }

    pub fn with_evaluation(mut self, expression: &str, result: Arc<MockVariable>) -> Self {
        self.evaluations.insert(expression.to_string(), result);
        self
    }

    pub fn with_completions(mut self, labels: &[&str]) -> Self {
        self.completions = labels.iter().map(|l| l.to_string()).collect();
        self
    }
}

impl StackFrame for MockFrame {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn position(&self) -> Option<Position> {
        self.position.clone()
    }

    fn scopes(&self) -> Vec<Arc<dyn VariableNode>> {
        self.scopes
            .iter()
            .map(|s| Arc::clone(s) as Arc<dyn VariableNode>)
            .collect()
    }

    fn evaluate(&self, expression: &str) -> Result<Arc<dyn VariableNode>> {
        self.evaluations
            .get(expression)
            .map(|v| Arc::clone(v) as Arc<dyn VariableNode>)
            .ok_or_else(|| Error::Backend(format!("cannot evaluate '{expression}'")))
    }

    fn completions(&self, text: &str, _column: i64) -> Vec<CompletionCandidate> {
        self.completions
            .iter()
            .filter(|label| label.starts_with(text))
            .map(|label| CompletionCandidate {
                label: label.clone(),
                text: None,
                kind: Some("variable".to_string()),
            })
            .collect()
    }
}

// === Threads ===

#[derive(Default)]
struct ThreadState {
    frames: Option<Vec<Arc<MockFrame>>>,
    calls: Vec<&'static str>,
}

/// A thread that is either running or stopped with a fixed stack
pub struct MockThread {
    id: i64,
    name: String,
    state: Mutex<ThreadState>,
}

impl MockThread {
    pub fn new(id: i64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            state: Mutex::new(ThreadState::default()),
        }
    }

    /// Halt the thread with `frames`, innermost first
    pub fn stop_with(&self, frames: Vec<MockFrame>) {
        self.state.lock().frames = Some(frames.into_iter().map(Arc::new).collect());
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().frames.is_some()
    }

    /// Control calls the adapter made on this thread, in order
    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().calls.clone()
    }

    fn run(&self, call: &'static str) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(call);
        state.frames = None;
        Ok(())
    }
}

impl DebuggeeThread for MockThread {
    fn id(&self) -> i64 {
        self.id
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn pause(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push("pause");
        state.frames.get_or_insert_with(Vec::new);
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        self.run("resume")
    }

    fn step_over(&self) -> Result<()> {
        self.run("step_over")
    }

    fn step_into(&self) -> Result<()> {
        self.run("step_into")
    }

    fn step_out(&self) -> Result<()> {
        self.run("step_out")
    }

    fn stack_trace(&self) -> Result<Vec<Arc<dyn StackFrame>>> {
        match &self.state.lock().frames {
            Some(frames) => Ok(frames
                .iter()
                .map(|f| Arc::clone(f) as Arc<dyn StackFrame>)
                .collect()),
            None => Err(Error::Backend(format!("thread {} is running", self.id))),
        }
    }
}

// === Debuggee ===

/// An in-memory debuggee
pub struct MockDebuggee {
    threads: Mutex<Vec<Arc<MockThread>>>,
    events: EventBus,
    stdout: Mutex<Option<OutputStream>>,
    stderr: Mutex<Option<OutputStream>>,
    breakpoints: Mutex<HashMap<PathBuf, Vec<SourceLocation>>>,
    executable_lines: Mutex<Option<BTreeSet<i64>>>,
    filter_calls: Mutex<Vec<(ExceptionFilter, bool)>>,
    filter_failure: Mutex<Option<String>>,
    start_failure: Mutex<Option<String>>,
    started: AtomicBool,
    exited: AtomicBool,
}

impl Default for MockDebuggee {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDebuggee {
    pub fn new() -> Self {
        Self {
            threads: Mutex::new(Vec::new()),
            events: EventBus::new(),
            stdout: Mutex::new(None),
            stderr: Mutex::new(None),
            breakpoints: Mutex::new(HashMap::new()),
            executable_lines: Mutex::new(None),
            filter_calls: Mutex::new(Vec::new()),
            filter_failure: Mutex::new(None),
            start_failure: Mutex::new(None),
            started: AtomicBool::new(false),
            exited: AtomicBool::new(false),
        }
    }

    /// Give the debuggee output streams; the returned ends write to them
    pub fn attach_output(&self) -> (DuplexStream, DuplexStream) {
        let (stdout_tx, stdout_rx) = tokio::io::duplex(4096);
        let (stderr_tx, stderr_rx) = tokio::io::duplex(4096);
        *self.stdout.lock() = Some(Box::new(stdout_rx));
        *self.stderr.lock() = Some(Box::new(stderr_rx));
        (stdout_tx, stderr_tx)
    }

    pub fn add_thread(&self, id: i64, name: &str) -> Arc<MockThread> {
        let thread = Arc::new(MockThread::new(id, name));
        self.threads.lock().push(Arc::clone(&thread));
        thread
    }

    pub fn mock_thread(&self, id: i64) -> Option<Arc<MockThread>> {
        self.threads.lock().iter().find(|t| t.id == id).cloned()
    }

    /// Only these 0-based lines accept breakpoints; others move to the next one
    pub fn set_executable_lines(&self, lines: impl IntoIterator<Item = i64>) {
        *self.executable_lines.lock() = Some(lines.into_iter().collect());
    }

    /// Make the next exception filter change fail with a backend error
    pub fn fail_next_exception_filter(&self, message: &str) {
        *self.filter_failure.lock() = Some(message.to_string());
    }

    /// Make the next `start` fail with a backend error
    pub fn fail_next_start(&self, message: &str) {
        *self.start_failure.lock() = Some(message.to_string());
    }

    pub fn installed_breakpoints(&self, source: &Path) -> Vec<SourceLocation> {
        self.breakpoints.lock().get(source).cloned().unwrap_or_default()
    }

    pub fn exception_filter_calls(&self) -> Vec<(ExceptionFilter, bool)> {
        self.filter_calls.lock().clone()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    /// Stop `thread_id` at a breakpoint
    pub fn hit_breakpoint(&self, thread_id: i64, frames: Vec<MockFrame>) {
        if let Some(thread) = self.mock_thread(thread_id) {
            thread.stop_with(frames);
        }
        self.events.breakpoint_stop.fire(&BreakpointStopEvent { thread_id });
    }

    /// Finish a step on `thread_id`
    pub fn complete_step(&self, thread_id: i64, frames: Vec<MockFrame>) {
        if let Some(thread) = self.mock_thread(thread_id) {
            thread.stop_with(frames);
        }
        self.events.step_stop.fire(&StepStopEvent { thread_id });
    }

    /// Stop `thread_id` on an exception
    pub fn throw(&self, thread_id: i64, exception: ExceptionRecord, frames: Vec<MockFrame>) {
        if let Some(thread) = self.mock_thread(thread_id) {
            thread.stop_with(frames);
        }
        self.events.exception.fire(&ExceptionEvent {
            thread_id,
            exception,
        });
    }

    /// End the program with `exit_code`; only the first call has an effect
    pub fn finish(&self, exit_code: i64) {
        if !self.exited.swap(true, Ordering::SeqCst) {
            self.events.exit.fire(&ExitEvent { exit_code });
        }
    }
}

impl Debuggee for MockDebuggee {
    fn threads(&self) -> Vec<Arc<dyn DebuggeeThread>> {
        self.threads
            .lock()
            .iter()
            .map(|t| Arc::clone(t) as Arc<dyn DebuggeeThread>)
            .collect()
    }

    fn take_stdout(&self) -> Option<OutputStream> {
        self.stdout.lock().take()
    }

    fn take_stderr(&self) -> Option<OutputStream> {
        self.stderr.lock().take()
    }

    fn events(&self) -> &EventBus {
        &self.events
    }

    fn install_breakpoint(&self, location: &SourceLocation) -> Result<InstalledBreakpoint> {
        let resolved = match &*self.executable_lines.lock() {
            None => Some(location.line),
            Some(lines) => lines.range(location.line..).next().copied(),
        };

        let installed = match resolved {
            Some(line) => {
                self.breakpoints
                    .lock()
                    .entry(location.path.clone())
                    .or_default()
                    .push(location.clone());
                InstalledBreakpoint {
                    verified: true,
                    line: Some(line),
                    column: location.column,
                    message: None,
                }
            }
            None => InstalledBreakpoint {
                verified: false,
                line: None,
                column: None,
                message: Some(format!("No executable code at line {}", location.line)),
            },
        };
        Ok(installed)
    }

    fn clear_breakpoints(&self, source: &Path) -> Result<()> {
        self.breakpoints.lock().remove(source);
        Ok(())
    }

    fn set_exception_filter(&self, filter: ExceptionFilter, enabled: bool) -> Result<()> {
        if let Some(message) = self.filter_failure.lock().take() {
            return Err(Error::Backend(message));
        }
        self.filter_calls.lock().push((filter, enabled));
        Ok(())
    }

    fn start(&self) -> Result<()> {
        if let Some(message) = self.start_failure.lock().take() {
            return Err(Error::Backend(message));
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn exit(&self) -> Result<()> {
        self.finish(0);
        Ok(())
    }
}

// === Backend ===

/// Hands out one prepared debuggee to launch or attach
pub struct MockBackend {
    debuggee: Arc<MockDebuggee>,
    launches: Mutex<Vec<LaunchConfig>>,
    attaches: Mutex<Vec<AttachConfig>>,
    attach_delay: Option<Duration>,
    launch_failure: Mutex<Option<String>>,
}

impl MockBackend {
    pub fn new(debuggee: Arc<MockDebuggee>) -> Self {
        Self {
            debuggee,
            launches: Mutex::new(Vec::new()),
            attaches: Mutex::new(Vec::new()),
            attach_delay: None,
            launch_failure: Mutex::new(None),
        }
    }

    /// Make every attach take `delay` before connecting
    pub fn with_attach_delay(mut self, delay: Duration) -> Self {
        self.attach_delay = Some(delay);
        self
    }

    /// Make the next launch fail with a backend error
    pub fn fail_next_launch(&self, message: &str) {
        *self.launch_failure.lock() = Some(message.to_string());
    }

    pub fn launches(&self) -> Vec<LaunchConfig> {
        self.launches.lock().clone()
    }

    pub fn attaches(&self) -> Vec<AttachConfig> {
        self.attaches.lock().clone()
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn launch(&self, config: LaunchConfig) -> Result<Arc<dyn Debuggee>> {
        if let Some(message) = self.launch_failure.lock().take() {
            return Err(Error::Backend(message));
        }
        self.launches.lock().push(config);
        Ok(Arc::clone(&self.debuggee) as Arc<dyn Debuggee>)
    }

    async fn attach(&self, config: AttachConfig) -> Result<Arc<dyn Debuggee>> {
        if let Some(delay) = self.attach_delay {
            tokio::time::sleep(delay).await;
        }
        self.attaches.lock().push(config);
        Ok(Arc::clone(&self.debuggee) as Arc<dyn Debuggee>)
    }
}
