//! Typed message envelopes exchanged between executors.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{ExecutorId, TypeTag};

/// Immutable message wrapper routed along graph edges.
///
/// An envelope is consumed exactly once: dequeued by the run controller and
/// delivered to a single executor. Fan-out duplicates the envelope per
/// target. `seq` is assigned by the controller when the message is enqueued
/// and totally orders deliveries within a run.
///
/// `completion` is `None` for ordinary messages. When a parked continuation
/// is resumed, the original envelope is redelivered with `completion`
/// carrying the external result, so the handler can distinguish the first
/// delivery from the resumed one.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub payload: Value,
    pub tag: TypeTag,
    pub producer: ExecutorId,
    pub seq: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion: Option<Value>,
}

impl Envelope {
    #[must_use]
    pub fn new(
        tag: impl Into<TypeTag>,
        payload: Value,
        producer: impl Into<ExecutorId>,
        seq: u64,
    ) -> Self {
        Self {
            payload,
            tag: tag.into(),
            producer: producer.into(),
            seq,
            completion: None,
        }
    }

    /// Envelope injected from outside the graph (initial input, resume).
    #[must_use]
    pub fn external(tag: impl Into<TypeTag>, payload: Value, seq: u64) -> Self {
        Self::new(tag, payload, ExecutorId::external(), seq)
    }

    /// Copy of this envelope annotated with the result of a completed
    /// continuation.
    #[must_use]
    pub fn with_completion(mut self, completion: Value) -> Self {
        self.completion = Some(completion);
        self
    }

    /// Returns `true` if this is a redelivery of a parked continuation.
    #[must_use]
    pub fn is_resumed(&self) -> bool {
        self.completion.is_some()
    }
}
