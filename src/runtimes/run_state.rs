//! Serde-friendly persisted run shapes.
//!
//! Everything here serializes as plain data: envelopes, queued deliveries,
//! scoped state exports, outstanding requests. A [`RunState`] captures a
//! run completely between steps, which is what makes continuation parking
//! an idempotent restart (the parked envelope is data, not a stack frame).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::message::Envelope;
use crate::state::ScopeState;
use crate::types::{ExecutorId, TypeTag};

/// A queued message addressed to a concrete executor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub target: ExecutorId,
    pub envelope: Envelope,
}

impl Delivery {
    #[must_use]
    pub fn new(target: impl Into<ExecutorId>, envelope: Envelope) -> Self {
        Self {
            target: target.into(),
            envelope,
        }
    }
}

/// What a suspended run is waiting for.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestKind {
    /// Human/external approval; the resume payload is delivered back to
    /// the requesting executor tagged `reply_tag`.
    Approval { reply_tag: TypeTag },
    /// Parked continuation; on resume `parked` is redelivered with its
    /// `completion` field set to the resume payload.
    Continuation { parked: Delivery },
}

impl RequestKind {
    /// Short label used in `InputRequested` events.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            RequestKind::Approval { .. } => "approval",
            RequestKind::Continuation { .. } => "continuation",
        }
    }
}

/// A pending suspension recorded in the run state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutstandingRequest {
    pub request_id: String,
    pub executor: ExecutorId,
    pub kind: RequestKind,
    /// Payload surfaced to the external party (approval prompt, external
    /// call arguments).
    pub payload: Value,
    pub raised_at: DateTime<Utc>,
}

/// Caller-supplied answer to one outstanding request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResumeInput {
    pub request_id: String,
    pub payload: Value,
}

impl ResumeInput {
    #[must_use]
    pub fn new(request_id: impl Into<String>, payload: Value) -> Self {
        Self {
            request_id: request_id.into(),
            payload,
        }
    }
}

/// Lifecycle state of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Actively stepping.
    Running,
    /// Parked between steps with work still queued (host-driven stepping).
    Idle,
    /// Suspended awaiting `resume` with answers to outstanding requests.
    IdleWithPendingRequests,
    /// A handler failed; the faulting step committed nothing.
    Faulted,
    /// Queue empty, nothing outstanding.
    Completed,
}

impl RunStatus {
    /// Returns `true` if the controller can make progress without external
    /// input.
    #[must_use]
    pub fn is_runnable(&self) -> bool {
        matches!(self, RunStatus::Running | RunStatus::Idle)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunStatus::Running => "running",
            RunStatus::Idle => "idle",
            RunStatus::IdleWithPendingRequests => "idle_with_pending_requests",
            RunStatus::Faulted => "faulted",
            RunStatus::Completed => "completed",
        };
        write!(f, "{label}")
    }
}

/// Complete between-steps snapshot of one run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunState {
    pub graph_id: String,
    pub run_id: String,
    pub status: RunStatus,
    pub step: u64,
    pub next_seq: u64,
    pub queue: Vec<Delivery>,
    pub scopes: Vec<ScopeState>,
    pub outputs: Vec<Value>,
    pub outstanding: Vec<OutstandingRequest>,
    pub saved_at: DateTime<Utc>,
}

/// A saved run state plus bookkeeping, as handed to a [`Checkpointer`]
/// (super::Checkpointer).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: String,
    pub step: u64,
    pub state: RunState,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    #[must_use]
    pub fn new(state: RunState) -> Self {
        Self {
            run_id: state.run_id.clone(),
            step: state.step,
            created_at: Utc::now(),
            state,
        }
    }
}
