//! Request handling
//!
//! Every request is routed to one of three execution classes:
//!
//! * inline on the reader task: `initialize`, `configurationDone` and the
//!   read-only queries (`stackTrace`, `scopes`, `variables`, `evaluate`,
//!   `completions`), which only touch the session lock
//! * the launch queue: `launch` and `attach`, which may wait for
//!   `configurationDone` without stalling anything else
//! * the control queue: everything that changes debuggee state
//!
//! Every request gets exactly one response, and a response is only queued
//! after the request's effects are complete.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::backend::{
    Backend, BreakpointStopEvent, Debuggee, DebuggeeThread, ExceptionEvent, ExceptionFilter,
    ExitEvent, StepStopEvent,
};
use crate::common::config::Config;
use crate::common::logging::LoggingHandle;
use crate::common::{Error, Result};
use crate::dap::{self, parse_arguments, Event, Outbox, RequestMessage};

use super::converter::Converter;
use super::executor::Queues;
use super::output;
use super::session::{Session, SessionState};
use super::settings::{AttachSettings, LaunchSettings, LogSettings};

/// Requests the adapter recognizes but always rejects
const NOT_IMPLEMENTED: &[&str] = &[
    "restart",
    "stepBack",
    "reverseContinue",
    "restartFrame",
    "goto",
    "runInTerminal",
    "setVariable",
    "source",
    "modules",
    "loadedSources",
    "stepInTargets",
    "gotoTargets",
    "setFunctionBreakpoints",
];

/// Whether the reader loop should keep going
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Shutdown,
}

/// A successful response plus the events that must follow it
#[derive(Debug, Default)]
struct Reply {
    body: Option<Value>,
    events: Vec<Event>,
}

impl Reply {
    fn empty() -> Self {
        Self::default()
    }

    fn with_body<T: Serialize>(body: T) -> Result<Self> {
        Ok(Self {
            body: Some(serde_json::to_value(body)?),
            events: Vec::new(),
        })
    }

    fn then(mut self, event: Event) -> Self {
        self.events.push(event);
        self
    }
}

#[derive(Debug, Clone, Copy)]
enum Resume {
    Continue,
    StepOver,
    StepInto,
    StepOut,
}

/// The adapter for one client connection
pub struct Adapter {
    backend: Arc<dyn Backend>,
    config: Config,
    logging: Option<LoggingHandle>,
    outbox: Outbox,
    session: Arc<Session>,
    queues: Queues,
}

impl Adapter {
    /// Create the adapter and spawn its queues. Must be called inside a tokio runtime.
    pub fn new(
        backend: Arc<dyn Backend>,
        config: Config,
        outbox: Outbox,
        logging: Option<LoggingHandle>,
    ) -> Arc<Self> {
        Arc::new(Self {
            backend,
            config,
            logging,
            outbox,
            session: Arc::new(Session::new()),
            queues: Queues::new(),
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Route one request to its execution class
    ///
    /// Returns [`Flow::Shutdown`] once `disconnect` has been answered.
    pub async fn dispatch(self: &Arc<Self>, request: RequestMessage) -> Flow {
        let command = request.command.clone();
        tracing::debug!(command = %command, seq = request.seq, "Received request");

        match command.as_str() {
            "initialize" => {
                let result = self.initialize(request.arguments.clone());
                let initialized = result.is_ok();
                self.respond(&request, result);
                if initialized {
                    self.session.barrier().mark_initialized_sent();
                }
            }
            "configurationDone" => {
                self.session.barrier().mark_configuration_done();
                tracing::info!("Client configuration done");
                self.respond(&request, Ok(Reply::empty()));
            }
            "launch" => self.enqueue_launch(request),
            "attach" => self.enqueue_attach(request),
            "threads" => self.enqueue_threads(request),
            "setBreakpoints" | "setExceptionBreakpoints" | "continue" | "next" | "stepIn"
            | "stepOut" | "pause" | "exceptionInfo" => self.enqueue_control(request),
            "stackTrace" => {
                let result = self.stack_trace(request.arguments.clone());
                self.respond(&request, result);
            }
            "scopes" => {
                let result = self.scopes(request.arguments.clone());
                self.respond(&request, result);
            }
            "variables" => {
                let result = self.variables(request.arguments.clone());
                self.respond(&request, result);
            }
            "evaluate" => {
                let result = self.evaluate(request.arguments.clone());
                self.respond(&request, result);
            }
            "completions" => {
                let result = self.completions(request.arguments.clone());
                self.respond(&request, result);
            }
            "disconnect" => {
                // A `threads` still waiting for launch would hold the control queue
                self.session.cancel_pending();
                let (done_tx, done_rx) = oneshot::channel();
                let this = Arc::clone(self);
                self.queues.control.execute(async move {
                    let result = this.disconnect(request.arguments.clone());
                    this.respond(&request, result);
                    let _ = done_tx.send(());
                });
                let _ = done_rx.await;
                return Flow::Shutdown;
            }
            command if NOT_IMPLEMENTED.contains(&command) => {
                let result = Err(Error::NotImplemented(command.to_string()));
                self.respond(&request, result);
            }
            command => {
                tracing::warn!(command = %command, "Unrecognized request");
                let result = Err(Error::UnknownCommand(command.to_string()));
                self.respond(&request, result);
            }
        }

        Flow::Continue
    }

    /// Best-effort cleanup when the client goes away without `disconnect`
    pub fn shutdown(&self) {
        if let Some(debuggee) = self.session.terminate() {
            tracing::info!("Client gone, stopping debuggee");
            if let Err(e) = debuggee.exit() {
                tracing::warn!(error = %e, "Failed to stop debuggee");
            }
        }
    }

    fn respond(&self, request: &RequestMessage, result: Result<Reply>) {
        match result {
            Ok(reply) => {
                self.outbox.respond(request.seq, &request.command, Ok(reply.body));
                for event in reply.events {
                    self.outbox.send_event(event);
                }
            }
            Err(e) => self.outbox.respond(request.seq, &request.command, Err(e)),
        }
    }

    // === Queue routing ===

    fn enqueue_control(self: &Arc<Self>, request: RequestMessage) {
        let this = Arc::clone(self);
        self.queues.control.execute(async move {
            let result = this.handle_control(&request);
            this.respond(&request, result);
        });
    }

    fn enqueue_launch(self: &Arc<Self>, request: RequestMessage) {
        let settings = parse_arguments(request.arguments.clone()).and_then(LaunchSettings::from_arguments);
        let settings = match settings {
            Ok(settings) => settings,
            Err(e) => return self.respond(&request, Err(e)),
        };

        let this = Arc::clone(self);
        self.queues.launch.execute(async move {
            let result = this.launch(settings).await;
            this.respond(&request, result);
        });
    }

    fn enqueue_attach(self: &Arc<Self>, request: RequestMessage) {
        let default_timeout = self.config.timeouts.attach_default_ms;
        let settings = parse_arguments(request.arguments.clone())
            .and_then(|args| AttachSettings::from_arguments(args, default_timeout));
        let settings = match settings {
            Ok(settings) => settings,
            Err(e) => return self.respond(&request, Err(e)),
        };

        let this = Arc::clone(self);
        self.queues.launch.execute(async move {
            let result = this.attach(settings).await;
            this.respond(&request, result);
        });
    }

    /// `threads` takes its place on the control queue, then waits there for
    /// launch or attach
    fn enqueue_threads(self: &Arc<Self>, request: RequestMessage) {
        let this = Arc::clone(self);
        self.queues.control.execute(async move {
            let result = match this.session.wait_for_debuggee().await {
                Ok(_) => this.threads(),
                Err(e) => Err(e),
            };
            this.respond(&request, result);
        });
    }

    fn handle_control(&self, request: &RequestMessage) -> Result<Reply> {
        let arguments = request.arguments.clone();
        match request.command.as_str() {
            "setBreakpoints" => self.set_breakpoints(arguments),
            "setExceptionBreakpoints" => self.set_exception_breakpoints(arguments),
            "continue" => {
                self.resume(arguments, Resume::Continue)?;
                Reply::with_body(dap::ContinueResponseBody {
                    all_threads_continued: false,
                })
            }
            "next" => self.resume(arguments, Resume::StepOver).map(|_| Reply::empty()),
            "stepIn" => self.resume(arguments, Resume::StepInto).map(|_| Reply::empty()),
            "stepOut" => self.resume(arguments, Resume::StepOut).map(|_| Reply::empty()),
            "pause" => self.pause(arguments),
            "exceptionInfo" => self.exception_info(arguments),
            other => Err(Error::Internal(format!("'{other}' is not a control request"))),
        }
    }

    // === Session setup ===

    fn initialize(&self, arguments: Option<Value>) -> Result<Reply> {
        let args: dap::InitializeArguments = parse_arguments(arguments)?;
        tracing::info!(
            client = args.client_id.as_deref().unwrap_or("unknown"),
            lines_start_at1 = args.lines_start_at1,
            columns_start_at1 = args.columns_start_at1,
            "Initializing session"
        );

        self.session
            .handles()
            .converter
            .configure(args.lines_start_at1, args.columns_start_at1);
        if self.session.state() == SessionState::Idle {
            self.session.transition(SessionState::Initializing);
        }

        let capabilities = dap::Capabilities {
            supports_configuration_done_request: true,
            supports_evaluate_for_hovers: true,
            supports_completions_request: true,
            supports_exception_info_request: true,
            exception_breakpoint_filters: ExceptionFilter::ALL
                .into_iter()
                .map(Converter::to_dap_exception_filter)
                .collect(),
            ..Default::default()
        };

        Ok(Reply::with_body(capabilities)?.then(Event::Initialized))
    }

    async fn launch(self: &Arc<Self>, settings: LaunchSettings) -> Result<Reply> {
        self.apply_log_settings(&settings.logging);
        self.session.begin_start(SessionState::LaunchPending)?;
        self.session.handles().context.set_project_root(settings.project_root.clone());

        let result = async {
            self.session
                .barrier()
                .wait(self.config.timeouts.configuration_done())
                .await?;

            tracing::info!(main_class = %settings.main_class, "Launching debuggee");
            let config = settings.into_launch_config();
            let debuggee = self.backend.launch(config).await?;
            self.activate(debuggee)
        }
        .await;

        if let Err(e) = &result {
            tracing::error!(error = %e, "Launch failed");
            self.session.abort_start();
        }
        result.map(|_| Reply::empty())
    }

    async fn attach(self: &Arc<Self>, settings: AttachSettings) -> Result<Reply> {
        self.apply_log_settings(&settings.logging);
        self.session.begin_start(SessionState::AttachPending)?;
        self.session.handles().context.set_project_root(settings.project_root.clone());

        let result = async {
            self.session
                .barrier()
                .wait(self.config.timeouts.configuration_done())
                .await?;

            tracing::info!(host = %settings.host_name, port = settings.port, "Attaching to debuggee");
            let config = settings.to_attach_config();
            let debuggee = tokio::time::timeout(settings.timeout, self.backend.attach(config))
                .await
                .map_err(|_| Error::AttachTimeout(settings.timeout.as_millis() as u64))??;
            self.activate(debuggee)
        }
        .await;

        if let Err(e) = &result {
            tracing::error!(error = %e, "Attach failed");
            self.session.abort_start();
        }
        result.map(|_| Reply::empty())
    }

    fn apply_log_settings(&self, settings: &LogSettings) {
        let Some(logging) = &self.logging else {
            return;
        };

        let level = settings.level.as_deref().unwrap_or(&self.config.logging.level);
        if let Err(e) = logging.set_level(level) {
            tracing::warn!(error = %e, "Ignoring requested log level");
        }

        match &settings.file {
            Some(path) => match logging.enable_file_sink(path) {
                Ok(()) => tracing::info!(path = %path.display(), "Logging to file"),
                Err(e) => tracing::warn!(error = %e, "Could not open log file"),
            },
            None => logging.disable_file_sink(),
        }
    }

    /// Wire a fresh debuggee into the session and let it run
    ///
    /// On failure the session is left as it was before the debuggee arrived
    /// and the debuggee is told to exit.
    fn activate(self: &Arc<Self>, debuggee: Arc<dyn Debuggee>) -> Result<()> {
        let result = self.bring_up(&debuggee);
        if result.is_err() {
            self.tear_down(debuggee.as_ref());
        }
        result
    }

    fn bring_up(self: &Arc<Self>, debuggee: &Arc<dyn Debuggee>) -> Result<()> {
        let changed = {
            let mut handles = self.session.handles();
            let changed = handles.context.breakpoints.bind(Arc::clone(debuggee))?;
            changed
                .iter()
                .map(|bp| handles.converter.to_dap_breakpoint(bp))
                .collect::<Vec<_>>()
        };

        self.subscribe(debuggee.as_ref());
        self.session.set_debuggee(Arc::clone(debuggee))?;
        debuggee.start()?;

        for breakpoint in changed {
            self.outbox.send_event(Event::Breakpoint(dap::BreakpointEventBody {
                reason: "changed".to_string(),
                breakpoint,
            }));
        }
        self.pump_output(debuggee.as_ref());

        tracing::info!("Debuggee running");
        Ok(())
    }

    /// Undo a partial [`Adapter::bring_up`]
    fn tear_down(&self, debuggee: &dyn Debuggee) {
        // Listeners go first so the exit below reaches no client
        debuggee.events().clear();
        self.session.handles().context.breakpoints.rollback(debuggee);
        self.session.retract_debuggee();

        if let Err(e) = debuggee.exit() {
            tracing::warn!(error = %e, "Failed to stop debuggee after failed start");
        }
    }

    /// Register the session's listeners on the debuggee's event bus
    ///
    /// Listeners hold the session weakly; a debuggee never keeps a finished
    /// session alive.
    fn subscribe(&self, debuggee: &dyn Debuggee) {
        let events = debuggee.events();

        let outbox = self.outbox.clone();
        let session = Arc::downgrade(&self.session);
        events.exit.add(move |e: &ExitEvent| {
            tracing::info!(exit_code = e.exit_code, "Debuggee exited");
            if let Some(session) = session.upgrade() {
                session.terminate();
            }
            outbox.send_event(Event::Exited(dap::ExitedEventBody {
                exit_code: e.exit_code,
            }));
            outbox.send_event(Event::Terminated(dap::TerminatedEventBody::default()));
        });

        let outbox = self.outbox.clone();
        events.breakpoint_stop.add(move |e: &BreakpointStopEvent| {
            outbox.send_event(Event::stopped(e.thread_id, "breakpoint"));
        });

        let outbox = self.outbox.clone();
        events.step_stop.add(move |e: &StepStopEvent| {
            outbox.send_event(Event::stopped(e.thread_id, "step"));
        });

        let outbox = self.outbox.clone();
        let session = Arc::downgrade(&self.session);
        events.exception.add(move |e: &ExceptionEvent| {
            tracing::debug!(thread_id = e.thread_id, exception = %e.exception.description, "Exception stop");
            if let Some(session) = session.upgrade() {
                session.record_exception(e.thread_id, e.exception.clone());
            }
            outbox.send_event(Event::stopped(e.thread_id, "exception"));
        });
    }

    fn pump_output(&self, debuggee: &dyn Debuggee) {
        let max = self.config.output.max_line_bytes;
        if let Some(stream) = debuggee.take_stdout() {
            self.queues
                .stdout
                .execute(output::pump_lines(stream, "stdout", self.outbox.clone(), max));
        }
        if let Some(stream) = debuggee.take_stderr() {
            self.queues
                .stderr
                .execute(output::pump_lines(stream, "stderr", self.outbox.clone(), max));
        }
    }

    // === Control requests ===

    fn set_breakpoints(&self, arguments: Option<Value>) -> Result<Reply> {
        let args: dap::SetBreakpointsArguments = parse_arguments(arguments)?;
        let path = args
            .source
            .path
            .filter(|p| !p.is_empty())
            .ok_or_else(|| Error::missing_argument("source.path"))?;

        let requested: Vec<(i64, Option<i64>)> = match (args.breakpoints, args.lines) {
            (Some(breakpoints), _) => breakpoints.into_iter().map(|bp| (bp.line, bp.column)).collect(),
            (None, Some(lines)) => lines.into_iter().map(|line| (line, None)).collect(),
            (None, None) => Vec::new(),
        };

        let mut handles = self.session.handles();
        let handles = &mut *handles;
        let source = handles.context.resolve_source(Path::new(&path));
        let locations: Vec<_> = requested
            .into_iter()
            .map(|(line, column)| handles.converter.to_internal_location(&source, line, column))
            .collect();

        let installed = handles.context.breakpoints.set_all_in(&source, locations)?;
        let breakpoints = installed
            .iter()
            .map(|bp| handles.converter.to_dap_breakpoint(bp))
            .collect();
        Reply::with_body(dap::SetBreakpointsResponseBody { breakpoints })
    }

    fn set_exception_breakpoints(&self, arguments: Option<Value>) -> Result<Reply> {
        let args: dap::SetExceptionBreakpointsArguments = parse_arguments(arguments)?;
        let filters = args
            .filters
            .iter()
            .map(|id| Converter::to_internal_exception_filter(id))
            .collect::<Result<BTreeSet<_>>>()?;

        self.session
            .handles()
            .context
            .breakpoints
            .set_exception_filters(filters)?;
        Ok(Reply::empty())
    }

    fn thread(&self, thread_id: i64) -> Result<Arc<dyn DebuggeeThread>> {
        self.session
            .require_debuggee()?
            .thread_by_id(thread_id)
            .ok_or(Error::ThreadNotFound(thread_id))
    }

    /// Resume or step a thread, then drop every handle it owned
    fn resume(&self, arguments: Option<Value>, how: Resume) -> Result<()> {
        let args: dap::ThreadArguments = parse_arguments(arguments)?;
        let thread = self.thread(args.thread_id)?;

        match how {
            Resume::Continue => thread.resume(),
            Resume::StepOver => thread.step_over(),
            Resume::StepInto => thread.step_into(),
            Resume::StepOut => thread.step_out(),
        }?;

        tracing::debug!(thread_id = args.thread_id, action = ?how, "Thread resumed");
        self.session.evict_thread(args.thread_id);
        Ok(())
    }

    fn pause(&self, arguments: Option<Value>) -> Result<Reply> {
        let args: dap::ThreadArguments = parse_arguments(arguments)?;
        self.thread(args.thread_id)?.pause()?;
        Ok(Reply::empty().then(Event::stopped(args.thread_id, "pause")))
    }

    /// Describe the latest exception pooled for `threadId`
    ///
    /// Exceptions are only ever looked up by thread. `exceptionId` reports the
    /// pool handle for display and is never accepted back.
    fn exception_info(&self, arguments: Option<Value>) -> Result<Reply> {
        let args: dap::ThreadArguments = parse_arguments(arguments)?;
        let handles = self.session.handles();

        let body = match handles.exceptions.latest_owned_by(&args.thread_id) {
            Some((id, exception)) => dap::ExceptionInfoResponseBody {
                exception_id: id.to_string(),
                description: Some(exception.description.clone()),
                break_mode: "always".to_string(),
                details: Some(Converter::to_dap_exception_details(exception)),
            },
            None => dap::ExceptionInfoResponseBody {
                exception_id: String::new(),
                description: Some("Unknown exception".to_string()),
                break_mode: "always".to_string(),
                details: None,
            },
        };
        Reply::with_body(body)
    }

    fn threads(&self) -> Result<Reply> {
        let debuggee = self.session.require_debuggee()?;
        let threads = debuggee.threads();
        let handles = self.session.handles();
        let threads = threads
            .iter()
            .map(|t| handles.converter.to_dap_thread(t.as_ref()))
            .collect();
        Reply::with_body(dap::ThreadsResponseBody { threads })
    }

    fn disconnect(&self, arguments: Option<Value>) -> Result<Reply> {
        let _args: dap::DisconnectArguments = parse_arguments(arguments)?;

        if let Some(debuggee) = self.session.debuggee() {
            tracing::info!("Disconnect requested, stopping debuggee");
            if let Err(e) = debuggee.exit() {
                tracing::warn!(error = %e, "Debuggee did not exit cleanly");
            }
        }
        self.session.terminate();
        Ok(Reply::empty())
    }

    // === Synchronous queries ===

    fn stack_trace(&self, arguments: Option<Value>) -> Result<Reply> {
        let args: dap::StackTraceArguments = parse_arguments(arguments)?;
        let thread = self.thread(args.thread_id)?;

        // Held across the backend read so a concurrent resume cannot evict
        // between fetching frames and minting their handles
        let mut handles = self.session.handles();
        let frames = thread.stack_trace()?;
        let total = frames.len();

        let start = args.start_frame.unwrap_or(0).max(0) as usize;
        let levels = match args.levels {
            Some(levels) if levels > 0 => levels as usize,
            _ => usize::MAX,
        };

        let stack_frames = frames
            .into_iter()
            .skip(start)
            .take(levels)
            .map(|frame| handles.converter.to_dap_stack_frame(args.thread_id, frame))
            .collect();

        Reply::with_body(dap::StackTraceResponseBody {
            stack_frames,
            total_frames: Some(total as i64),
        })
    }

    fn scopes(&self, arguments: Option<Value>) -> Result<Reply> {
        let args: dap::ScopesArguments = parse_arguments(arguments)?;
        let mut handles = self.session.handles();
        let frame = handles.converter.to_internal_stack_frame(args.frame_id)?;

        let scopes = frame
            .scopes()
            .into_iter()
            .map(|scope| handles.converter.to_dap_scope(scope))
            .collect();
        Reply::with_body(dap::ScopesResponseBody { scopes })
    }

    fn variables(&self, arguments: Option<Value>) -> Result<Reply> {
        let args: dap::VariablesArguments = parse_arguments(arguments)?;
        let mut handles = self.session.handles();
        let node = handles.converter.to_variable_tree(args.variables_reference)?;

        let start = args.start.unwrap_or(0).max(0) as usize;
        let count = match args.count {
            Some(count) if count > 0 => count as usize,
            _ => usize::MAX,
        };

        let variables = node
            .children()
            .into_iter()
            .skip(start)
            .take(count)
            .map(|child| handles.converter.to_dap_variable(child))
            .collect();
        Reply::with_body(dap::VariablesResponseBody { variables })
    }

    fn evaluate(&self, arguments: Option<Value>) -> Result<Reply> {
        let args: dap::EvaluateArguments = parse_arguments(arguments)?;
        let frame_id = args.frame_id.ok_or_else(|| Error::missing_argument("frameId"))?;

        let mut handles = self.session.handles();
        let frame = handles.converter.to_internal_stack_frame(frame_id)?;
        let node = frame.evaluate(&args.expression)?;

        Reply::with_body(dap::EvaluateResponseBody {
            result: node.value().unwrap_or_default(),
            type_name: node.type_name(),
            variables_reference: handles.converter.store_variable_tree(node),
        })
    }

    fn completions(&self, arguments: Option<Value>) -> Result<Reply> {
        let args: dap::CompletionsArguments = parse_arguments(arguments)?;
        let frame_id = args.frame_id.ok_or_else(|| Error::missing_argument("frameId"))?;

        let handles = self.session.handles();
        let frame = handles.converter.to_internal_stack_frame(frame_id)?;
        let column = handles.converter.columns.to_internal(args.column);

        let targets = frame
            .completions(&args.text, column)
            .into_iter()
            .map(Converter::to_dap_completion)
            .collect();
        Reply::with_body(dap::CompletionsResponseBody { targets })
    }
}
