//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use meshflow::event_bus::{Event, EventStream};
use meshflow::executor::{handler_fn, ExecutorSpec, Handler, HandlerOutcome};
use meshflow::types::ExecutorId;
use serde_json::{json, Value};

/// Handler that does nothing: consumes the message.
pub fn consume() -> Arc<dyn Handler> {
    handler_fn(|_, _| async { Ok(HandlerOutcome::new()) })
}

/// Handler that re-emits the incoming payload under `tag`.
pub fn forward(tag: &str) -> Arc<dyn Handler> {
    let tag = tag.to_string();
    handler_fn(move |env, _| {
        let tag = tag.clone();
        async move { Ok(HandlerOutcome::new().with_message(tag, env.payload.clone())) }
    })
}

/// Handler that yields the incoming payload as a final output.
pub fn output() -> Arc<dyn Handler> {
    handler_fn(|env, _| async move { Ok(HandlerOutcome::new().with_output(env.payload.clone())) })
}

/// Handler that records which executor saw the payload, then outputs it.
pub fn tagged_output(label: &str) -> Arc<dyn Handler> {
    let label = label.to_string();
    handler_fn(move |env, _| {
        let label = label.clone();
        async move {
            Ok(HandlerOutcome::new().with_output(json!({
                "seen_by": label,
                "payload": env.payload,
            })))
        }
    })
}

/// Single-binding executor.
pub fn executor(id: &str, tag: &str, handler: Arc<dyn Handler>) -> ExecutorSpec {
    ExecutorSpec::new(id).on(tag, handler)
}

/// Drains an event stream to its end. The stream outlives its `RunHandle`,
/// so the usual pattern is: subscribe, join the run, then drain.
pub async fn collect_events(mut stream: EventStream) -> Vec<Event> {
    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event);
    }
    events
}

/// Number of times `executor` was invoked according to the event log.
pub fn invocation_count(events: &[Event], executor: &str) -> usize {
    let id: ExecutorId = executor.into();
    events
        .iter()
        .filter(|e| matches!(e, Event::ExecutorInvoked { executor, .. } if *executor == id))
        .count()
}

/// Request ids of all `InputRequested` events, in order.
pub fn request_ids(events: &[Event]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::InputRequested { request_id, .. } => Some(request_id.clone()),
            _ => None,
        })
        .collect()
}

/// Payloads of all `OutputProduced` events, in order.
pub fn output_payloads(events: &[Event]) -> Vec<Value> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::OutputProduced { payload, .. } => Some(payload.clone()),
            _ => None,
        })
        .collect()
}
