use miette::Diagnostic;
use thiserror::Error;

use super::event::Event;

/// Error returned when an event cannot be delivered to the bus.
#[derive(Debug, Error, Diagnostic)]
pub enum EmitterError {
    #[error("event bus closed")]
    #[diagnostic(code(meshflow::event_bus::closed))]
    Closed,
}

/// Write side of the event bus, injected into handler contexts and the run
/// controller.
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: Event) -> Result<(), EmitterError>;
}
