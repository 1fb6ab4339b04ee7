//! Run execution: the stepwise controller, persisted run shapes,
//! checkpoint backends, and runtime configuration.

mod checkpointer;
mod controller;
mod run_state;
mod runtime_config;

pub use checkpointer::{Checkpointer, CheckpointerError, InMemoryCheckpointer};
pub use controller::{
    RunController, RunError, RunReport, StepReport, SuspensionProtocolError,
};
pub use run_state::{
    Checkpoint, Delivery, OutstandingRequest, RequestKind, ResumeInput, RunState, RunStatus,
};
pub use runtime_config::{EventBusConfig, RuntimeConfig, SinkConfig};
