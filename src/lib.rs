//! # meshflow
//!
//! A graph-based dataflow execution engine: directed graphs of computation
//! nodes ("executors") connected by routing rules, passing typed message
//! envelopes, with conditional and looping control flow, scoped versioned
//! shared state, a structured event stream, and first-class suspension and
//! resume.
//!
//! ## Execution model
//!
//! Runs advance in deterministic supersteps. Each step dequeues at most
//! one pending message per executor, invokes the matching handlers
//! concurrently against an immutable snapshot of committed state, then
//! commits all buffered writes atomically at a barrier before routing the
//! step's emissions. A handler failure aborts the whole step; nothing
//! partial ever commits.
//!
//! Loops, `break`, `continue` and `goto` are not special constructs: they
//! are plain edges and switches over a cyclic graph, combined with
//! loop/iteration state scopes that unwind via
//! [`ScopeCommand`](control::ScopeCommand)s.
//!
//! Runs can suspend mid-flight, either to ask for external approval or to
//! park a message behind a continuation token while a slow external call
//! completes. Suspended runs serialize to a plain
//! [`RunState`](runtimes::RunState) through an abstract
//! [`Checkpointer`](runtimes::Checkpointer) and resume later, in the same
//! process or another one.
//!
//! ## Quick start
//!
//! ```rust
//! use meshflow::prelude::*;
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let graph = GraphBuilder::new()
//!     .add_executor(ExecutorSpec::new("shout").on(
//!         "phrase",
//!         handler_fn(|env, _ctx| async move {
//!             let text = env.payload.as_str().unwrap_or_default().to_uppercase();
//!             Ok(HandlerOutcome::new().with_output(json!(text)))
//!         }),
//!     ))
//!     .with_entry("shout", "phrase")
//!     .build()?;
//!
//! let handle = graph.start(json!("hello")).await?;
//! let report = handle.join().await?;
//! assert_eq!(report.outputs, vec![json!("HELLO")]);
//! # Ok(())
//! # }
//! ```

pub mod control;
pub mod event_bus;
pub mod executor;
pub mod graph;
pub mod graphs;
pub mod message;
pub mod runtimes;
pub mod scheduler;
pub mod state;
pub mod telemetry;
pub mod types;
pub mod utils;

/// Commonly used types for building and running graphs.
pub mod prelude {
    pub use crate::control::ScopeCommand;
    pub use crate::event_bus::{Event, EventStream};
    pub use crate::executor::{
        handler_fn, ExecutorContext, ExecutorSpec, Handler, HandlerError, HandlerOutcome,
    };
    pub use crate::graph::{Dataflow, RunHandle};
    pub use crate::graphs::{GraphBuilder, SwitchCase};
    pub use crate::message::Envelope;
    pub use crate::runtimes::{
        Checkpointer, InMemoryCheckpointer, ResumeInput, RunController, RunError, RunStatus,
        RuntimeConfig,
    };
    pub use crate::state::{Scope, StateWrite};
    pub use crate::types::{ExecutorId, TypeTag};
}
