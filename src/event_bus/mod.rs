//! Structured event stream for run observability.
//!
//! Producers (the run controller and handler contexts) write through
//! [`EventEmitter`]; consumers either subscribe to an ordered, restartable
//! [`EventStream`] or attach [`EventSink`]s for side-channel delivery
//! (stdout, memory snapshots, channels).

mod bus;
mod emitter;
mod event;
mod sink;

pub use bus::{EventBus, EventStream};
pub use emitter::{EmitterError, EventEmitter};
pub use event::Event;
pub use sink::{ChannelSink, EventSink, MemorySink, StdOutSink};
