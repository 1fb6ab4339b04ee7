//! Structured events describing the progress of a run.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::types::{ExecutorId, TypeTag};

/// One entry in a run's ordered event stream.
///
/// Events are immutable and totally ordered by emission sequence. Handler
/// invocations and completions are emitted in dequeue order regardless of
/// how their futures interleave, so replaying the stream is deterministic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// An executor's handler was selected and is about to run.
    ExecutorInvoked {
        executor: ExecutorId,
        step: u64,
        tag: TypeTag,
    },
    /// The handler returned successfully.
    ExecutorCompleted { executor: ExecutorId, step: u64 },
    /// A handler declared a final output for the run.
    OutputProduced {
        executor: ExecutorId,
        step: u64,
        payload: Value,
    },
    /// The run suspended awaiting external input.
    InputRequested {
        request_id: String,
        executor: ExecutorId,
        step: u64,
        kind: String,
        payload: Value,
    },
    /// A routed message matched no target or no handler; dropped with this
    /// diagnostic instead of failing the run.
    MessageDropped {
        producer: ExecutorId,
        tag: TypeTag,
        step: u64,
        reason: String,
    },
    /// Terminal quiescence: queue empty, nothing outstanding.
    RunIdle { step: u64 },
    /// The run parked with outstanding requests awaiting `resume`.
    RunIdleWithPendingRequests { step: u64, pending: usize },
    /// A handler failed; the step was aborted and nothing committed.
    RunFaulted {
        executor: ExecutorId,
        step: u64,
        error: String,
    },
    /// Executor-scoped diagnostic emitted through the handler context.
    ExecutorLog {
        executor: ExecutorId,
        step: u64,
        message: String,
    },
    /// Engine-scoped diagnostic.
    Diagnostic { scope: String, message: String },
}

impl Event {
    /// Short label for the originating scope, used by formatters.
    #[must_use]
    pub fn scope_label(&self) -> Option<&str> {
        match self {
            Event::ExecutorInvoked { executor, .. }
            | Event::ExecutorCompleted { executor, .. }
            | Event::OutputProduced { executor, .. }
            | Event::InputRequested { executor, .. }
            | Event::RunFaulted { executor, .. }
            | Event::ExecutorLog { executor, .. } => Some(executor.as_str()),
            Event::MessageDropped { producer, .. } => Some(producer.as_str()),
            Event::Diagnostic { scope, .. } => Some(scope.as_str()),
            Event::RunIdle { .. } | Event::RunIdleWithPendingRequests { .. } => None,
        }
    }

    /// JSON rendering for sinks that forward events off-process.
    #[must_use]
    pub fn to_json_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    #[must_use]
    pub fn diagnostic(scope: impl Into<String>, message: impl Into<String>) -> Self {
        Event::Diagnostic {
            scope: scope.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::ExecutorInvoked {
                executor,
                step,
                tag,
            } => write!(f, "step {step}: {executor} <- {tag}"),
            Event::ExecutorCompleted { executor, step } => {
                write!(f, "step {step}: {executor} completed")
            }
            Event::OutputProduced { executor, step, .. } => {
                write!(f, "step {step}: {executor} produced output")
            }
            Event::InputRequested {
                request_id,
                executor,
                step,
                kind,
                ..
            } => write!(
                f,
                "step {step}: {executor} requested input ({kind}, id={request_id})"
            ),
            Event::MessageDropped {
                producer,
                tag,
                step,
                reason,
            } => write!(f, "step {step}: dropped {tag} from {producer}: {reason}"),
            Event::RunIdle { step } => write!(f, "step {step}: run idle"),
            Event::RunIdleWithPendingRequests { step, pending } => {
                write!(f, "step {step}: run idle with {pending} pending request(s)")
            }
            Event::RunFaulted {
                executor,
                step,
                error,
            } => write!(f, "step {step}: {executor} faulted: {error}"),
            Event::ExecutorLog {
                executor,
                step,
                message,
            } => write!(f, "step {step}: [{executor}] {message}"),
            Event::Diagnostic { scope, message } => write!(f, "[{scope}] {message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_roundtrip_through_serde() {
        let event = Event::MessageDropped {
            producer: "writer".into(),
            tag: "draft".into(),
            step: 3,
            reason: "no matching route".into(),
        };
        let value = event.to_json_value();
        assert_eq!(value["event"], "message_dropped");
        let decoded: Event = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, event);
    }
}
