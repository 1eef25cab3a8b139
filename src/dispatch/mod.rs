//! Event Dispatch
//!
//! Connection workers raise lifecycle events; the dispatcher hands them to
//! application handlers such as [`RelayPolicy`].

mod dispatcher;
mod event;
mod policy;

pub use dispatcher::{DispatchOutcome, EventDispatcher, HandlerFault};
pub use event::{Event, EventHandler, EventKind, HandlerError, HandlerResult};
pub use policy::{RelayConfig, RelayPolicy};
