//! Debug session state
//!
//! A session owns at most one debuggee, the handle pools and the
//! breakpoint context. Pools and context sit behind a single lock shared by
//! the control queue and the synchronous query path; the debuggee slot is a
//! watch channel so requests can wait for launch or attach to finish.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::watch;

use crate::backend::{Debuggee, ExceptionRecord};
use crate::common::{Error, Result};

use super::context::DebugContext;
use super::converter::Converter;
use super::pool::ObjectPool;

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for `initialize`
    Idle,
    /// Capabilities exchanged, no launch or attach yet
    Initializing,
    /// Launch accepted, waiting for configuration or the backend
    LaunchPending,
    /// Attach accepted, waiting for configuration or the backend
    AttachPending,
    /// A debuggee is bound
    Active,
    /// The debuggee exited or the client disconnected
    Terminated,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Initializing => write!(f, "initializing"),
            Self::LaunchPending => write!(f, "launch pending"),
            Self::AttachPending => write!(f, "attach pending"),
            Self::Active => write!(f, "active"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Everything guarded by the session lock
#[derive(Default)]
pub struct Handles {
    pub converter: Converter,
    /// Exceptions by the thread that raised them
    pub exceptions: ObjectPool<i64, Arc<ExceptionRecord>>,
    pub context: DebugContext,
}

#[derive(Clone)]
enum DebuggeeSlot {
    /// Nothing yet; `threads` waits here
    Pending,
    Live(Arc<dyn Debuggee>),
    /// The last launch or attach failed; a new one moves back to `Pending`
    Failed,
    Gone,
}

#[derive(Debug, Default, Clone, Copy)]
struct BarrierState {
    initialized_sent: bool,
    configuration_done: bool,
}

impl BarrierState {
    fn is_open(self) -> bool {
        self.initialized_sent && self.configuration_done
    }
}

/// Holds launch and attach back until the client finished configuring
///
/// Opens once the `initialized` event has been queued and the client has
/// sent `configurationDone`, in either order.
pub struct ConfigurationBarrier {
    state: watch::Sender<BarrierState>,
}

impl Default for ConfigurationBarrier {
    fn default() -> Self {
        Self {
            state: watch::channel(BarrierState::default()).0,
        }
    }
}

impl ConfigurationBarrier {
    pub fn mark_initialized_sent(&self) {
        self.state.send_modify(|s| s.initialized_sent = true);
    }

    pub fn mark_configuration_done(&self) {
        self.state.send_modify(|s| s.configuration_done = true);
    }

    pub fn is_open(&self) -> bool {
        self.state.borrow().is_open()
    }

    /// Wait until the barrier opens, at most `timeout` when one is given
    pub async fn wait(&self, timeout: Option<Duration>) -> Result<()> {
        let mut rx = self.state.subscribe();
        let open = async move {
            rx.wait_for(|s| s.is_open())
                .await
                .map(|_| ())
                .map_err(|_| Error::Internal("configuration barrier dropped".to_string()))
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, open)
                .await
                .map_err(|_| Error::ConfigurationDoneTimeout(limit.as_secs()))?,
            None => open.await,
        }
    }
}

/// One debug session
pub struct Session {
    handles: Mutex<Handles>,
    state: Mutex<SessionState>,
    debuggee: watch::Sender<DebuggeeSlot>,
    barrier: ConfigurationBarrier,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            handles: Mutex::new(Handles::default()),
            state: Mutex::new(SessionState::Idle),
            debuggee: watch::channel(DebuggeeSlot::Pending).0,
            barrier: ConfigurationBarrier::default(),
        }
    }

    /// Take the session lock
    pub fn handles(&self) -> MutexGuard<'_, Handles> {
        self.handles.lock()
    }

    pub fn barrier(&self) -> &ConfigurationBarrier {
        &self.barrier
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn transition(&self, to: SessionState) {
        let mut state = self.state.lock();
        if *state != to {
            tracing::debug!(from = %*state, to = %to, "Session state change");
            *state = to;
        }
    }

    /// Claim the session for a launch or attach
    pub fn begin_start(&self, pending: SessionState) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            SessionState::Idle | SessionState::Initializing => {
                tracing::debug!(from = %*state, to = %pending, "Session state change");
                *state = pending;
            }
            _ => return Err(Error::DebuggeeAlreadyExists),
        }

        self.debuggee.send_if_modified(|slot| {
            if matches!(slot, DebuggeeSlot::Failed) {
                *slot = DebuggeeSlot::Pending;
            }
            false
        });
        Ok(())
    }

    /// Release a claim from [`Session::begin_start`] after a failed start
    ///
    /// Requests waiting for the debuggee fail with [`Error::NoDebuggee`].
    pub fn abort_start(&self) {
        {
            let mut state = self.state.lock();
            if matches!(
                *state,
                SessionState::LaunchPending | SessionState::AttachPending | SessionState::Active
            ) {
                tracing::debug!(from = %*state, "Start aborted");
                *state = SessionState::Initializing;
            }
        }
        self.cancel_pending();
    }

    /// Fail everything waiting for a debuggee that has not been published yet
    pub fn cancel_pending(&self) {
        self.debuggee.send_if_modified(|slot| match slot {
            DebuggeeSlot::Pending => {
                *slot = DebuggeeSlot::Failed;
                true
            }
            _ => false,
        });
    }

    /// Take back a debuggee published by [`Session::set_debuggee`] that failed to start
    pub fn retract_debuggee(&self) {
        self.debuggee.send_if_modified(|slot| match slot {
            DebuggeeSlot::Live(_) => {
                *slot = DebuggeeSlot::Failed;
                true
            }
            _ => false,
        });
    }

    pub fn debuggee(&self) -> Option<Arc<dyn Debuggee>> {
        match &*self.debuggee.borrow() {
            DebuggeeSlot::Live(debuggee) => Some(Arc::clone(debuggee)),
            _ => None,
        }
    }

    pub fn require_debuggee(&self) -> Result<Arc<dyn Debuggee>> {
        self.debuggee().ok_or(Error::NoDebuggee)
    }

    /// Wait for launch or attach to produce a debuggee
    ///
    /// Fails with [`Error::NoDebuggee`] once the start in progress fails or
    /// the session has terminated.
    pub async fn wait_for_debuggee(&self) -> Result<Arc<dyn Debuggee>> {
        let mut rx = self.debuggee.subscribe();
        let slot = rx
            .wait_for(|slot| !matches!(slot, DebuggeeSlot::Pending))
            .await
            .map_err(|_| Error::NoDebuggee)?
            .clone();

        match slot {
            DebuggeeSlot::Live(debuggee) => Ok(debuggee),
            _ => Err(Error::NoDebuggee),
        }
    }

    /// Publish the debuggee and mark the session active
    pub fn set_debuggee(&self, debuggee: Arc<dyn Debuggee>) -> Result<()> {
        let mut installed = false;
        self.debuggee.send_if_modified(|slot| {
            if matches!(slot, DebuggeeSlot::Pending) {
                *slot = DebuggeeSlot::Live(Arc::clone(&debuggee));
                installed = true;
            }
            installed
        });

        if !installed {
            return Err(Error::DebuggeeAlreadyExists);
        }
        self.transition(SessionState::Active);
        Ok(())
    }

    /// End the session, dropping the debuggee and every handle
    ///
    /// Returns the debuggee that was live, if any. Safe to call repeatedly.
    pub fn terminate(&self) -> Option<Arc<dyn Debuggee>> {
        self.transition(SessionState::Terminated);
        let previous = self.debuggee.send_replace(DebuggeeSlot::Gone);

        let mut handles = self.handles();
        handles.context.breakpoints.unbind();
        handles.converter.clear();
        handles.exceptions.clear();

        match previous {
            DebuggeeSlot::Live(debuggee) => Some(debuggee),
            _ => None,
        }
    }

    /// Record the exception a thread stopped on, replacing any older one
    pub fn record_exception(&self, thread_id: i64, exception: ExceptionRecord) -> i64 {
        let mut handles = self.handles();
        handles.exceptions.remove_all_owned_by(&thread_id);
        handles.exceptions.store(thread_id, Arc::new(exception))
    }

    /// Invalidate every handle tied to a thread that is about to run
    pub fn evict_thread(&self, thread_id: i64) {
        let mut handles = self.handles();
        handles.exceptions.remove_all_owned_by(&thread_id);
        handles.converter.evict_thread(thread_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mock::{MockDebuggee, MockFrame};

    #[tokio::test]
    async fn test_barrier_opens_in_either_order() {
        let barrier = ConfigurationBarrier::default();
        barrier.mark_configuration_done();
        assert!(!barrier.is_open());
        barrier.mark_initialized_sent();
        assert!(barrier.is_open());
        barrier.wait(Some(Duration::from_millis(10))).await.unwrap();
    }

    #[tokio::test]
    async fn test_barrier_times_out() {
        let barrier = ConfigurationBarrier::default();
        barrier.mark_initialized_sent();
        let err = barrier.wait(Some(Duration::from_millis(20))).await.unwrap_err();
        assert!(matches!(err, Error::ConfigurationDoneTimeout(_)));
    }

    #[tokio::test]
    async fn test_waiters_are_released_by_configuration_done() {
        let session = Arc::new(Session::new());
        session.barrier().mark_initialized_sent();

        let waiter = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.barrier().wait(None).await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        session.barrier().mark_configuration_done();
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_debuggee() {
        let session = Arc::new(Session::new());
        assert!(matches!(session.require_debuggee(), Err(Error::NoDebuggee)));

        let waiter = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.wait_for_debuggee().await.map(|_| ()) })
        };

        session.begin_start(SessionState::LaunchPending).unwrap();
        session.set_debuggee(Arc::new(MockDebuggee::new())).unwrap();
        waiter.await.unwrap().unwrap();
        assert_eq!(session.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn test_waiters_fail_after_termination() {
        let session = Session::new();
        session.terminate();
        assert!(matches!(session.wait_for_debuggee().await, Err(Error::NoDebuggee)));
    }

    #[test]
    fn test_second_start_is_rejected() {
        let session = Session::new();
        session.begin_start(SessionState::LaunchPending).unwrap();
        assert!(matches!(
            session.begin_start(SessionState::AttachPending),
            Err(Error::DebuggeeAlreadyExists)
        ));

        session.set_debuggee(Arc::new(MockDebuggee::new())).unwrap();
        assert!(matches!(
            session.set_debuggee(Arc::new(MockDebuggee::new())),
            Err(Error::DebuggeeAlreadyExists)
        ));
    }

    #[test]
    fn test_failed_start_can_be_retried() {
        let session = Session::new();
        session.begin_start(SessionState::AttachPending).unwrap();
        session.abort_start();
        assert_eq!(session.state(), SessionState::Initializing);
        session.begin_start(SessionState::LaunchPending).unwrap();
    }

    #[test]
    fn test_new_exception_replaces_old_for_same_thread() {
        let session = Session::new();
        let first = session.record_exception(1, ExceptionRecord::new("first"));
        let second = session.record_exception(1, ExceptionRecord::new("second"));
        session.record_exception(2, ExceptionRecord::new("other"));

        let handles = session.handles();
        assert!(handles.exceptions.get_by_id(first).is_none());
        let (id, latest) = handles.exceptions.latest_owned_by(&1).unwrap();
        assert_eq!(id, second);
        assert_eq!(latest.description, "second");
    }

    #[test]
    fn test_evict_thread_drops_frames_and_exceptions() {
        let session = Session::new();
        session.record_exception(1, ExceptionRecord::new("boom"));
        session.record_exception(2, ExceptionRecord::new("kept"));
        let frame_id = session
            .handles()
            .converter
            .to_dap_stack_frame(1, Arc::new(MockFrame::new("run")))
            .id;

        session.evict_thread(1);

        let handles = session.handles();
        assert!(handles.exceptions.latest_owned_by(&1).is_none());
        assert!(handles.exceptions.latest_owned_by(&2).is_some());
        assert!(handles.converter.to_internal_stack_frame(frame_id).is_err());
    }

    #[tokio::test]
    async fn test_failed_start_releases_waiters() {
        let session = Arc::new(Session::new());
        session.begin_start(SessionState::LaunchPending).unwrap();
        let waiter = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.wait_for_debuggee().await.map(|_| ()) })
        };
        tokio::task::yield_now().await;

        session.abort_start();
        assert!(matches!(waiter.await.unwrap(), Err(Error::NoDebuggee)));

        session.begin_start(SessionState::LaunchPending).unwrap();
        session.set_debuggee(Arc::new(MockDebuggee::new())).unwrap();
        assert!(session.require_debuggee().is_ok());
    }

    #[test]
    fn test_retracted_debuggee_allows_another_start() {
        let session = Session::new();
        session.begin_start(SessionState::LaunchPending).unwrap();
        session.set_debuggee(Arc::new(MockDebuggee::new())).unwrap();

        session.retract_debuggee();
        session.abort_start();

        assert!(matches!(session.require_debuggee(), Err(Error::NoDebuggee)));
        assert_eq!(session.state(), SessionState::Initializing);
        session.begin_start(SessionState::LaunchPending).unwrap();
        session.set_debuggee(Arc::new(MockDebuggee::new())).unwrap();
    }
}
