//! In-step concurrent handler invocation.
//!
//! The scheduler runs every invocation of a step concurrently, bounded by
//! a semaphore, and joins results in invocation start order so the barrier
//! commit is deterministic regardless of completion interleaving. Handlers
//! in the same step share one immutable [`StateView`] and cannot observe
//! each other's writes or emissions.

use miette::Diagnostic;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, instrument};

use crate::event_bus::{Event, EventEmitter};
use crate::executor::{ExecutorContext, Handler, HandlerError, HandlerOutcome};
use crate::message::Envelope;
use crate::state::StateView;
use crate::types::ExecutorId;

/// One handler invocation scheduled for the current step.
pub struct Invocation {
    pub executor: ExecutorId,
    pub handler: Arc<dyn Handler>,
    pub envelope: Envelope,
}

#[derive(Debug, Error, Diagnostic)]
pub enum SchedulerError {
    #[error("executor {executor} failed at step {step}: {source}")]
    #[diagnostic(
        code(meshflow::scheduler::handler_run),
        help("The step was aborted; no writes from this step were committed.")
    )]
    HandlerRun {
        executor: ExecutorId,
        step: u64,
        #[source]
        source: HandlerError,
    },

    #[error("scheduler task join failed: {0}")]
    #[diagnostic(code(meshflow::scheduler::join))]
    Join(#[from] tokio::task::JoinError),
}

/// Bounded-concurrency step scheduler.
#[derive(Clone, Debug)]
pub struct Scheduler {
    concurrency_limit: usize,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self {
            concurrency_limit: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }
}

impl Scheduler {
    #[must_use]
    pub fn new(concurrency_limit: usize) -> Self {
        Self {
            concurrency_limit: concurrency_limit.max(1),
        }
    }

    /// Runs all invocations for one step and returns their outcomes in
    /// invocation order.
    ///
    /// `ExecutorInvoked` events are emitted sequentially before any handler
    /// spawns; `ExecutorCompleted` events are emitted after the join, also
    /// in start order, so the event stream is deterministic. The first
    /// handler error aborts the step: remaining outcomes are discarded and
    /// the error carries the failing executor id.
    #[instrument(skip(self, invocations, state, emitter), fields(invocations = invocations.len()))]
    pub async fn run_step(
        &self,
        invocations: Vec<Invocation>,
        state: StateView,
        step: u64,
        emitter: Arc<dyn EventEmitter>,
    ) -> Result<Vec<(ExecutorId, HandlerOutcome)>, SchedulerError> {
        for invocation in &invocations {
            let _ = emitter.emit(Event::ExecutorInvoked {
                executor: invocation.executor.clone(),
                step,
                tag: invocation.envelope.tag.clone(),
            });
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency_limit));
        let mut handles = Vec::with_capacity(invocations.len());
        for invocation in invocations {
            let Invocation {
                executor,
                handler,
                envelope,
            } = invocation;
            let ctx = ExecutorContext::new(
                executor.clone(),
                step,
                state.clone(),
                Arc::clone(&emitter),
            );
            let semaphore = Arc::clone(&semaphore);
            let task = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| HandlerError::External(Box::new(e)))?;
                handler.handle(envelope, ctx).await
            });
            handles.push((executor, task));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (executor, task) in handles {
            match task.await? {
                Ok(outcome) => {
                    debug!(executor = %executor, step, "handler completed");
                    let _ = emitter.emit(Event::ExecutorCompleted {
                        executor: executor.clone(),
                        step,
                    });
                    outcomes.push((executor, outcome));
                }
                Err(source) => {
                    return Err(SchedulerError::HandlerRun {
                        executor,
                        step,
                        source,
                    });
                }
            }
        }
        Ok(outcomes)
    }
}
