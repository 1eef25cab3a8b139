//! Event Dispatcher
//!
//! Routes lifecycle events to the registered handlers. A handler that
//! returns an error or panics is reported here and never reaches the
//! connection or the server.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::FutureExt;

use super::event::{Event, EventHandler, EventKind};

/// A handler failure caught at the dispatch boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFault {
    pub handler: String,
    pub event: EventKind,
    pub error: String,
}

/// What happened during one dispatch
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub handled: usize,
    pub faults: Vec<HandlerFault>,
}

impl DispatchOutcome {
    pub fn is_clean(&self) -> bool {
        self.faults.is_empty()
    }
}

/// Routes events to handlers in registration order
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
    fault_count: AtomicU64,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style handler registration
    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn register(&mut self, handler: Arc<dyn EventHandler>) {
        tracing::debug!(handler = handler.name(), "Event handler registered");
        self.handlers.push(handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Total handler faults seen since startup
    pub fn fault_count(&self) -> u64 {
        self.fault_count.load(Ordering::Relaxed)
    }

    /// Deliver an event to every handler
    pub async fn dispatch(&self, event: &Event) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();

        for handler in &self.handlers {
            let call = match event {
                Event::Connected(id) => handler.on_connect(*id),
                Event::Message { id, payload } => handler.on_message(*id, payload),
                Event::Disconnected(id) => handler.on_disconnect(*id),
            };

            let error = match AssertUnwindSafe(call).catch_unwind().await {
                Ok(Ok(())) => {
                    outcome.handled += 1;
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(panic) => format!("handler panicked: {}", panic_message(&*panic)),
            };

            self.fault_count.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                handler = handler.name(),
                event = %event.kind(),
                client_id = %event.client_id(),
                error = %error,
                "Handler fault"
            );
            outcome.faults.push(HandlerFault {
                handler: handler.name().to_string(),
                event: event.kind(),
                error,
            });
        }

        outcome
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
