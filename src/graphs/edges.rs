//! Edge and switch types for the graph builder.

use std::fmt;
use std::sync::Arc;

use crate::message::Envelope;
use crate::types::ExecutorId;

/// Predicate deciding whether a switch case fires for an envelope.
///
/// Predicates must be pure functions of the envelope: routing may be
/// re-evaluated when a checkpointed run is replayed, and an impure
/// predicate would break resume equivalence.
pub type CasePredicate = Arc<dyn Fn(&Envelope) -> bool + Send + Sync + 'static>;

/// Unconditional edge: every message from `from` is delivered to `to`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Edge {
    pub from: ExecutorId,
    pub to: ExecutorId,
}

/// One predicated branch of a switch.
#[derive(Clone)]
pub struct SwitchCase {
    pub target: ExecutorId,
    pub predicate: CasePredicate,
}

impl SwitchCase {
    #[must_use]
    pub fn new(
        target: impl Into<ExecutorId>,
        predicate: impl Fn(&Envelope) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            target: target.into(),
            predicate: Arc::new(predicate),
        }
    }
}

impl fmt::Debug for SwitchCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwitchCase")
            .field("target", &self.target)
            .field("predicate", &"<fn>")
            .finish()
    }
}

/// Conditional routing from one executor: cases are evaluated in
/// declaration order and EVERY matching case receives the message
/// (broadcast). Exclusive routing is expressed through mutually exclusive
/// predicates, not by the engine.
#[derive(Clone, Debug)]
pub struct Switch {
    pub from: ExecutorId,
    pub cases: Vec<SwitchCase>,
}

impl Switch {
    #[must_use]
    pub fn new(from: impl Into<ExecutorId>, cases: Vec<SwitchCase>) -> Self {
        Self {
            from: from.into(),
            cases,
        }
    }
}
