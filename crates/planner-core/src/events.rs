//! Per-instance event bus. Handlers run synchronously in registration
//! order; a panicking handler is logged and never aborts the emission loop.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;

use crate::models::{Conflict, PendingReminder, Schedule};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Reflow,
    Conflict,
    ReminderDue,
}

/// Frozen payloads: handlers receive copies, never aliases of engine state.
#[derive(Debug, Clone)]
pub enum Event {
    Reflow(Schedule),
    Conflict(Conflict),
    ReminderDue(PendingReminder),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Reflow(_) => EventKind::Reflow,
            Event::Conflict(_) => EventKind::Conflict,
            Event::ReminderDue(_) => EventKind::ReminderDue,
        }
    }
}

pub type EventHandler = Box<dyn Fn(&Event) + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    handlers: Mutex<HashMap<EventKind, Vec<EventHandler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, kind: EventKind, handler: EventHandler) {
        self.handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(kind)
            .or_default()
            .push(handler);
    }

    pub fn emit(&self, event: &Event) {
        let handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        let Some(registered) = handlers.get(&event.kind()) else {
            return;
        };
        for handler in registered {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                tracing::warn!(kind = ?event.kind(), "event handler panicked; continuing");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::parse_date;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn reflow_event() -> Event {
        let start = parse_date("2025-01-01").unwrap();
        Event::Reflow(Schedule::empty(start, start))
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for label in ["first", "second"] {
            let seen = Arc::clone(&seen);
            bus.on(
                EventKind::Reflow,
                Box::new(move |_| seen.lock().unwrap().push(label)),
            );
        }
        bus.emit(&reflow_event());
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_panicking_handler_does_not_abort_loop() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.on(EventKind::Reflow, Box::new(|_| panic!("handler bug")));
        {
            let count = Arc::clone(&count);
            bus.on(
                EventKind::Reflow,
                Box::new(move |_| {
                    count.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }
        bus.emit(&reflow_event());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_emit_without_handlers_is_noop() {
        let bus = EventBus::new();
        bus.emit(&reflow_event());
    }
}
