//! Executors: the computation nodes of a dataflow graph.
//!
//! An executor is described by an [`ExecutorSpec`]: a stable id, an ordered
//! set of `(TypeTag, handler)` bindings, and the message types it declares
//! it emits. When an envelope is delivered, dispatch selects the most
//! specific binding whose tag accepts the envelope's tag.
//!
//! Handlers implement the async [`Handler`] trait (or are wrapped closures
//! via [`handler_fn`]). A handler receives the envelope plus an
//! [`ExecutorContext`] (read-only state snapshot, step number, diagnostic
//! emitter) and returns a [`HandlerOutcome`] describing everything it wants
//! to happen: messages to emit, state writes to buffer, a final output, a
//! suspension request, scope commands. Nothing takes effect until the step
//! barrier.
//!
//! # Example
//!
//! ```rust
//! use meshflow::executor::{handler_fn, ExecutorSpec, HandlerOutcome};
//! use meshflow::state::StateWrite;
//! use serde_json::json;
//!
//! let spec = ExecutorSpec::new("writer")
//!     .on(
//!         "topic",
//!         handler_fn(|envelope, _ctx| async move {
//!             Ok(HandlerOutcome::new()
//!                 .with_write(StateWrite::global("draft", envelope.payload.clone()))
//!                 .with_message("draft", json!({"text": "first attempt"})))
//!         }),
//!     )
//!     .emits("draft");
//! assert!(spec.handles(&"topic.news".into()));
//! ```

use async_trait::async_trait;
use miette::Diagnostic;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

use crate::control::ScopeCommand;
use crate::event_bus::{Event, EventEmitter};
use crate::message::Envelope;
use crate::state::{StateView, StateWrite};
use crate::types::{ExecutorId, TypeTag};

/// Error raised by a handler. Any variant aborts the whole step: no writes
/// commit, no emissions route, and the run transitions to `Faulted`.
#[derive(Debug, Error, Diagnostic)]
pub enum HandlerError {
    #[error("missing expected input: {what}")]
    #[diagnostic(
        code(meshflow::handler::missing_input),
        help("Check the payload shape produced by the upstream executor.")
    )]
    MissingInput { what: String },

    #[error("validation failed: {message}")]
    #[diagnostic(code(meshflow::handler::validation))]
    Validation { message: String },

    #[error("serialization error: {0}")]
    #[diagnostic(code(meshflow::handler::serde))]
    Serde(#[from] serde_json::Error),

    #[error("context error: {0}")]
    #[diagnostic(code(meshflow::handler::context))]
    Context(#[from] ContextError),

    #[error("external error: {0}")]
    #[diagnostic(code(meshflow::handler::external))]
    External(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    #[must_use]
    pub fn missing_input(what: impl Into<String>) -> Self {
        Self::MissingInput { what: what.into() }
    }

    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

/// Error from [`ExecutorContext`] operations.
#[derive(Debug, Error, Diagnostic)]
pub enum ContextError {
    #[error("event bus unavailable: {reason}")]
    #[diagnostic(
        code(meshflow::context::event_bus),
        help("The run's event bus has been closed; diagnostics cannot be delivered.")
    )]
    EventBusUnavailable { reason: String },
}

/// Per-invocation context handed to a handler.
///
/// The state view is the committed snapshot from the start of the step;
/// same-step writes by other handlers are never visible here.
#[derive(Clone)]
pub struct ExecutorContext {
    pub executor_id: ExecutorId,
    pub step: u64,
    pub state: StateView,
    emitter: Arc<dyn EventEmitter>,
}

impl ExecutorContext {
    pub(crate) fn new(
        executor_id: ExecutorId,
        step: u64,
        state: StateView,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            executor_id,
            step,
            state,
            emitter,
        }
    }

    /// Emits an executor-scoped diagnostic onto the run's event stream.
    pub fn log(&self, message: impl Into<String>) -> Result<(), ContextError> {
        self.emitter
            .emit(Event::ExecutorLog {
                executor: self.executor_id.clone(),
                step: self.step,
                message: message.into(),
            })
            .map_err(|e| ContextError::EventBusUnavailable {
                reason: e.to_string(),
            })
    }
}

impl fmt::Debug for ExecutorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorContext")
            .field("executor_id", &self.executor_id)
            .field("step", &self.step)
            .field("state_version", &self.state.version())
            .finish()
    }
}

/// A message produced by a handler, routed at the step barrier.
#[derive(Clone, Debug, PartialEq)]
pub struct Emission {
    pub tag: TypeTag,
    pub payload: Value,
}

/// Suspension raised by a handler.
#[derive(Clone, Debug)]
pub enum Suspension {
    /// Ask an external party for input. `reply_tag` is the tag of the
    /// envelope delivered back to this executor when the run is resumed
    /// with the approval payload.
    Request { reply_tag: TypeTag, payload: Value },
    /// Park the triggering envelope for an external call. On resume the
    /// same envelope is redelivered with `completion` set to the external
    /// result; the handler restarts from its entry point (idempotent
    /// restart, not a coroutine resume).
    Continuation { payload: Value },
}

/// Everything a handler wants to happen, applied at the step barrier.
///
/// Built fluently with `with_*` methods. An empty outcome is valid: the
/// executor simply consumes the message.
#[derive(Clone, Debug, Default)]
pub struct HandlerOutcome {
    pub emitted: Vec<Emission>,
    pub writes: Vec<StateWrite>,
    pub output: Option<Value>,
    pub suspension: Option<Suspension>,
    pub scope_commands: Vec<ScopeCommand>,
}

impl HandlerOutcome {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an outbound message; routed via this executor's edges and
    /// switches after the barrier.
    #[must_use]
    pub fn with_message(mut self, tag: impl Into<TypeTag>, payload: Value) -> Self {
        self.emitted.push(Emission {
            tag: tag.into(),
            payload,
        });
        self
    }

    /// Buffers a state write; committed atomically at the barrier.
    #[must_use]
    pub fn with_write(mut self, write: StateWrite) -> Self {
        self.writes.push(write);
        self
    }

    /// Declares a final output of the run. Outputs are collected and
    /// surfaced via `OutputProduced`, never routed as messages.
    #[must_use]
    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    /// Raises an approval request; the run suspends after this step and
    /// the reply is delivered back tagged `reply_tag`.
    #[must_use]
    pub fn with_request(mut self, reply_tag: impl Into<TypeTag>, payload: Value) -> Self {
        self.suspension = Some(Suspension::Request {
            reply_tag: reply_tag.into(),
            payload,
        });
        self
    }

    /// Parks the triggering envelope behind a continuation token; see
    /// [`Suspension::Continuation`].
    #[must_use]
    pub fn with_continuation(mut self, payload: Value) -> Self {
        self.suspension = Some(Suspension::Continuation { payload });
        self
    }

    /// Queues a scope command, applied after writes commit.
    #[must_use]
    pub fn with_scope_command(mut self, command: ScopeCommand) -> Self {
        self.scope_commands.push(command);
        self
    }
}

/// Async message handler bound to a type tag on an executor.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(
        &self,
        envelope: Envelope,
        ctx: ExecutorContext,
    ) -> Result<HandlerOutcome, HandlerError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Envelope, ExecutorContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<HandlerOutcome, HandlerError>> + Send,
{
    async fn handle(
        &self,
        envelope: Envelope,
        ctx: ExecutorContext,
    ) -> Result<HandlerOutcome, HandlerError> {
        (self.0)(envelope, ctx).await
    }
}

/// Wraps an async closure as a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(Envelope, ExecutorContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HandlerOutcome, HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Declarative description of one executor: id, typed handler bindings,
/// and declared outbound message types.
#[derive(Clone)]
pub struct ExecutorSpec {
    id: ExecutorId,
    bindings: Vec<(TypeTag, Arc<dyn Handler>)>,
    emits: Vec<TypeTag>,
}

impl ExecutorSpec {
    #[must_use]
    pub fn new(id: impl Into<ExecutorId>) -> Self {
        Self {
            id: id.into(),
            bindings: Vec::new(),
            emits: Vec::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &ExecutorId {
        &self.id
    }

    /// Binds `handler` to messages whose tag is accepted by `tag`.
    /// Binding order is preserved for build-time duplicate detection;
    /// dispatch itself is by specificity, not order.
    #[must_use]
    pub fn on(mut self, tag: impl Into<TypeTag>, handler: Arc<dyn Handler>) -> Self {
        self.bindings.push((tag.into(), handler));
        self
    }

    /// Declares an outbound message type, checked against successor
    /// handlers at build time.
    #[must_use]
    pub fn emits(mut self, tag: impl Into<TypeTag>) -> Self {
        self.emits.push(tag.into());
        self
    }

    #[must_use]
    pub fn bound_tags(&self) -> impl Iterator<Item = &TypeTag> {
        self.bindings.iter().map(|(tag, _)| tag)
    }

    #[must_use]
    pub fn declared_emissions(&self) -> &[TypeTag] {
        &self.emits
    }

    /// Most specific binding accepting `tag`, if any. Exact duplicate
    /// bindings are rejected at build time, so the maximum is unique.
    #[must_use]
    pub fn resolve(&self, tag: &TypeTag) -> Option<&Arc<dyn Handler>> {
        self.bindings
            .iter()
            .filter(|(binding, _)| binding.accepts(tag))
            .max_by_key(|(binding, _)| binding.specificity())
            .map(|(_, handler)| handler)
    }

    /// Returns `true` if some binding accepts `tag`.
    #[must_use]
    pub fn handles(&self, tag: &TypeTag) -> bool {
        self.resolve(tag).is_some()
    }
}

impl fmt::Debug for ExecutorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorSpec")
            .field("id", &self.id)
            .field(
                "bindings",
                &self.bindings.iter().map(|(t, _)| t).collect::<Vec<_>>(),
            )
            .field("emits", &self.emits)
            .finish()
    }
}
