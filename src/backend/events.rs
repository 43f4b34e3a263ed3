//! Typed publish/subscribe for backend notifications
//!
//! Listeners run synchronously on whichever thread the backend publishes
//! from, in registration order. They must not block: the adapter's
//! listeners only enqueue a push event and touch pool state.

use std::sync::Arc;

use parking_lot::Mutex;

use super::ExceptionRecord;

/// The program exited
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitEvent {
    pub exit_code: i64,
}

/// A thread stopped at a breakpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointStopEvent {
    pub thread_id: i64,
}

/// A thread finished a step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepStopEvent {
    pub thread_id: i64,
}

/// A thread stopped because an exception was raised
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionEvent {
    pub thread_id: i64,
    pub exception: ExceptionRecord,
}

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Listeners for one event kind
pub struct ListenerList<T> {
    listeners: Mutex<Vec<Listener<T>>>,
}

impl<T> Default for ListenerList<T> {
    fn default() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl<T> ListenerList<T> {
    pub fn add(&self, listener: impl Fn(&T) + Send + Sync + 'static) {
        self.listeners.lock().push(Arc::new(listener));
    }

    /// Invoke every listener in registration order
    pub fn fire(&self, event: &T) {
        // Snapshot so a listener may register another without deadlocking
        let listeners: Vec<Listener<T>> = self.listeners.lock().clone();
        for listener in listeners {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.listeners.lock().clear();
    }
}

/// Every event kind a debuggee publishes
#[derive(Default)]
pub struct EventBus {
    pub exit: ListenerList<ExitEvent>,
    pub breakpoint_stop: ListenerList<BreakpointStopEvent>,
    pub step_stop: ListenerList<StepStopEvent>,
    pub exception: ListenerList<ExceptionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all listeners of every kind
    pub fn clear(&self) {
        self.exit.clear();
        self.breakpoint_stop.clear();
        self.step_stop.clear();
        self.exception.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listeners_fire_in_registration_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let seen = Arc::clone(&seen);
            bus.breakpoint_stop.add(move |e: &BreakpointStopEvent| {
                seen.lock().push(format!("{tag}:{}", e.thread_id));
            });
        }

        bus.breakpoint_stop.fire(&BreakpointStopEvent { thread_id: 4 });
        assert_eq!(*seen.lock(), vec!["first:4", "second:4"]);
    }

    #[test]
    fn test_kinds_are_independent() {
        let bus = EventBus::new();
        let exits = Arc::new(Mutex::new(0));
        {
            let exits = Arc::clone(&exits);
            bus.exit.add(move |_| *exits.lock() += 1);
        }

        bus.step_stop.fire(&StepStopEvent { thread_id: 1 });
        assert_eq!(*exits.lock(), 0);

        bus.exit.fire(&ExitEvent { exit_code: 0 });
        assert_eq!(*exits.lock(), 1);
    }

    #[test]
    fn test_listener_may_register_during_fire() {
        let bus = Arc::new(EventBus::new());
        let inner = Arc::clone(&bus);
        bus.exit.add(move |_| inner.step_stop.add(|_| {}));

        bus.exit.fire(&ExitEvent { exit_code: 1 });
        assert_eq!(bus.step_stop.len(), 1);

        bus.clear();
        assert!(bus.exit.is_empty());
    }
}
