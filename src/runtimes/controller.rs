//! Stepwise run controller.
//!
//! A [`RunController`] owns the live sessions of one compiled
//! [`Dataflow`](crate::graph::Dataflow) and drives them superstep by
//! superstep:
//!
//! 1. dequeue pending deliveries, at most one per target executor;
//! 2. invoke handlers concurrently through the [`Scheduler`];
//! 3. after every handler returned Ok, commit buffered writes atomically
//!    and apply scope commands (the barrier);
//! 4. route emissions through edges and switches, enqueue with fresh seq
//!    numbers;
//! 5. transition the run status and checkpoint.
//!
//! A handler failure aborts the whole step: nothing commits, the queue is
//! restored, the run is `Faulted` and is never retried automatically.
//! Cancellation is only observed between steps, so the last committed
//! state is always a step boundary.

use chrono::Utc;
use miette::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, instrument, warn};

use super::checkpointer::{Checkpointer, CheckpointerError, InMemoryCheckpointer};
use super::run_state::{
    Checkpoint, Delivery, OutstandingRequest, RequestKind, ResumeInput, RunState, RunStatus,
};
use crate::event_bus::{Event, EventBus, EventEmitter};
use crate::executor::Suspension;
use crate::graph::Dataflow;
use crate::message::Envelope;
use crate::scheduler::{Invocation, Scheduler, SchedulerError};
use crate::state::StateStore;
use crate::types::ExecutorId;
use crate::utils::id_generator::IdGenerator;

/// Violation of the suspend/resume protocol, rejected synchronously before
/// any step runs.
#[derive(Debug, Error, Diagnostic)]
pub enum SuspensionProtocolError {
    #[error("run {run_id} is not suspended (status: {status})")]
    #[diagnostic(
        code(meshflow::suspension::not_suspended),
        help("Only runs in status idle_with_pending_requests can be resumed.")
    )]
    NotSuspended { run_id: String, status: RunStatus },

    #[error("resume input references unknown request id {request_id} on run {run_id}")]
    #[diagnostic(
        code(meshflow::suspension::unknown_request),
        help("Request ids are surfaced in InputRequested events and in the run state.")
    )]
    UnknownRequest { run_id: String, request_id: String },

    #[error("resume inputs answer request {request_id} more than once")]
    #[diagnostic(code(meshflow::suspension::duplicate_input))]
    DuplicateInput { request_id: String },
}

#[derive(Debug, Error, Diagnostic)]
pub enum RunError {
    #[error("run not found: {run_id}")]
    #[diagnostic(code(meshflow::run::not_found))]
    RunNotFound { run_id: String },

    #[error("run already exists: {run_id}")]
    #[diagnostic(code(meshflow::run::already_exists))]
    RunAlreadyExists { run_id: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Checkpoint(#[from] CheckpointerError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Suspension(#[from] SuspensionProtocolError),

    #[error("run task join failed: {0}")]
    #[diagnostic(code(meshflow::run::join))]
    Join(#[from] tokio::task::JoinError),
}

/// What one superstep did.
#[derive(Clone, Debug)]
pub struct StepReport {
    pub step: u64,
    pub invoked: Vec<ExecutorId>,
    pub dropped: usize,
    pub status: RunStatus,
}

/// Summary of a completed (or parked, faulted, cancelled) run.
#[derive(Clone, Debug)]
pub struct RunReport {
    pub run_id: String,
    pub status: RunStatus,
    pub steps: u64,
    pub outputs: Vec<Value>,
    pub cancelled: bool,
}

struct RunSession {
    state: StateStore,
    queue: VecDeque<Delivery>,
    outputs: Vec<Value>,
    outstanding: Vec<OutstandingRequest>,
    status: RunStatus,
    step: u64,
    next_seq: u64,
}

impl RunSession {
    fn fresh() -> Self {
        Self {
            state: StateStore::new(),
            queue: VecDeque::new(),
            outputs: Vec::new(),
            outstanding: Vec::new(),
            status: RunStatus::Running,
            step: 0,
            next_seq: 0,
        }
    }

    fn to_run_state(&self, graph_id: &str, run_id: &str) -> RunState {
        RunState {
            graph_id: graph_id.to_string(),
            run_id: run_id.to_string(),
            status: self.status,
            step: self.step,
            next_seq: self.next_seq,
            queue: self.queue.iter().cloned().collect(),
            scopes: self.state.export(),
            outputs: self.outputs.clone(),
            outstanding: self.outstanding.clone(),
            saved_at: Utc::now(),
        }
    }

    fn from_run_state(state: RunState) -> Self {
        Self {
            state: StateStore::restore(state.scopes),
            queue: state.queue.into(),
            outputs: state.outputs,
            outstanding: state.outstanding,
            status: state.status,
            step: state.step,
            next_seq: state.next_seq,
        }
    }
}

/// Drives runs of one compiled dataflow. Host-facing: `Dataflow::start`
/// wraps this in a spawned loop, but hosts that want stepwise control can
/// construct a controller directly and call [`run_step`](Self::run_step)
/// themselves.
pub struct RunController {
    dataflow: Arc<Dataflow>,
    runs: FxHashMap<String, RunSession>,
    checkpointer: Arc<dyn Checkpointer>,
    autosave: bool,
    event_bus: EventBus,
    emitter: Arc<dyn EventEmitter>,
    scheduler: Scheduler,
}

impl RunController {
    #[must_use]
    pub fn new(dataflow: Arc<Dataflow>) -> Self {
        let config = dataflow.runtime_config();
        let checkpointer = config
            .checkpointer
            .clone()
            .unwrap_or_else(|| Arc::new(InMemoryCheckpointer::new()));
        let scheduler = match config.concurrency_limit {
            Some(limit) => Scheduler::new(limit),
            None => Scheduler::default(),
        };
        let event_bus = config.event_bus.build_event_bus();
        let emitter = event_bus.emitter();
        let autosave = config.autosave;
        Self {
            dataflow,
            runs: FxHashMap::default(),
            checkpointer,
            autosave,
            event_bus,
            emitter,
            scheduler,
        }
    }

    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    fn session(&self, run_id: &str) -> Result<&RunSession, RunError> {
        self.runs.get(run_id).ok_or_else(|| RunError::RunNotFound {
            run_id: run_id.to_string(),
        })
    }

    pub fn status(&self, run_id: &str) -> Result<RunStatus, RunError> {
        Ok(self.session(run_id)?.status)
    }

    /// Outputs collected so far, in production order.
    pub fn outputs(&self, run_id: &str) -> Result<Vec<Value>, RunError> {
        Ok(self.session(run_id)?.outputs.clone())
    }

    /// Snapshot of the run's committed state at the current step boundary.
    pub fn state_view(&self, run_id: &str) -> Result<crate::state::StateView, RunError> {
        Ok(self.session(run_id)?.state.view())
    }

    /// Requests the run is currently suspended on.
    pub fn outstanding_requests(&self, run_id: &str) -> Result<Vec<OutstandingRequest>, RunError> {
        Ok(self.session(run_id)?.outstanding.clone())
    }

    /// Creates a run and seeds the entry executor with the initial input,
    /// tagged with the graph's declared input tag.
    pub async fn start_run(&mut self, input: Value) -> Result<String, RunError> {
        let run_id = self
            .dataflow
            .runtime_config()
            .run_id
            .clone()
            .unwrap_or_else(IdGenerator::run_id);
        if self.runs.contains_key(&run_id) {
            return Err(RunError::RunAlreadyExists { run_id });
        }
        let mut session = RunSession::fresh();
        let envelope = Envelope::external(
            self.dataflow.input_tag().clone(),
            input,
            session.next_seq,
        );
        session.next_seq += 1;
        session
            .queue
            .push_back(Delivery::new(self.dataflow.entry().clone(), envelope));
        self.runs.insert(run_id.clone(), session);
        debug!(run_id, "run started");
        self.maybe_checkpoint(&run_id, false).await?;
        Ok(run_id)
    }

    /// Restores a run from its latest checkpoint into this controller.
    pub async fn load_run(&mut self, run_id: &str) -> Result<(), RunError> {
        if self.runs.contains_key(run_id) {
            return Err(RunError::RunAlreadyExists {
                run_id: run_id.to_string(),
            });
        }
        let checkpoint = self.checkpointer.load_latest(run_id).await?;
        self.runs
            .insert(run_id.to_string(), RunSession::from_run_state(checkpoint.state));
        debug!(run_id, "run restored from checkpoint");
        Ok(())
    }

    /// Answers outstanding requests on a suspended run.
    ///
    /// Validation is synchronous and happens before anything mutates: the
    /// run must be suspended, every input must name an outstanding request,
    /// and no request may be answered twice. Approvals are delivered back
    /// to the requesting executor under the request's reply tag; parked
    /// continuations are re-enqueued with `completion` set.
    pub async fn resume_run(
        &mut self,
        run_id: &str,
        inputs: Vec<ResumeInput>,
    ) -> Result<(), RunError> {
        let session = self.runs.get(run_id).ok_or_else(|| RunError::RunNotFound {
            run_id: run_id.to_string(),
        })?;
        if session.status != RunStatus::IdleWithPendingRequests {
            return Err(SuspensionProtocolError::NotSuspended {
                run_id: run_id.to_string(),
                status: session.status,
            }
            .into());
        }
        let mut answered: FxHashSet<&str> = FxHashSet::default();
        for input in &inputs {
            if !answered.insert(input.request_id.as_str()) {
                return Err(SuspensionProtocolError::DuplicateInput {
                    request_id: input.request_id.clone(),
                }
                .into());
            }
            if !session
                .outstanding
                .iter()
                .any(|r| r.request_id == input.request_id)
            {
                return Err(SuspensionProtocolError::UnknownRequest {
                    run_id: run_id.to_string(),
                    request_id: input.request_id.clone(),
                }
                .into());
            }
        }

        let session = match self.runs.get_mut(run_id) {
            Some(session) => session,
            None => {
                return Err(RunError::RunNotFound {
                    run_id: run_id.to_string(),
                })
            }
        };
        for input in inputs {
            let position = session
                .outstanding
                .iter()
                .position(|r| r.request_id == input.request_id);
            let Some(position) = position else { continue };
            let request = session.outstanding.remove(position);
            let delivery = match request.kind {
                RequestKind::Approval { reply_tag } => {
                    let mut envelope = Envelope::external(reply_tag, input.payload, 0);
                    envelope.seq = session.next_seq;
                    session.next_seq += 1;
                    Delivery::new(request.executor, envelope)
                }
                RequestKind::Continuation { parked } => {
                    let mut envelope = parked.envelope.with_completion(input.payload);
                    envelope.seq = session.next_seq;
                    session.next_seq += 1;
                    Delivery::new(parked.target, envelope)
                }
            };
            session.queue.push_back(delivery);
        }
        session.status = if session.outstanding.is_empty() {
            RunStatus::Running
        } else {
            RunStatus::IdleWithPendingRequests
        };
        debug!(run_id, status = %session.status, "run resumed");
        self.maybe_checkpoint(run_id, true).await?;
        Ok(())
    }

    /// Executes one superstep. No-op (reporting the current status) when
    /// the run cannot make progress without external input.
    #[instrument(skip(self))]
    pub async fn run_step(&mut self, run_id: &str) -> Result<StepReport, RunError> {
        let session = self.runs.get_mut(run_id).ok_or_else(|| RunError::RunNotFound {
            run_id: run_id.to_string(),
        })?;
        let step = session.step;
        if !session.status.is_runnable() {
            return Ok(StepReport {
                step,
                invoked: vec![],
                dropped: 0,
                status: session.status,
            });
        }

        // Phase 1: dequeue, at most one delivery per target executor, FIFO
        // by seq. Remaining deliveries stay queued for later steps.
        let mut selected: Vec<Delivery> = Vec::new();
        let mut taken: FxHashSet<ExecutorId> = FxHashSet::default();
        let mut remaining: VecDeque<Delivery> = VecDeque::new();
        while let Some(delivery) = session.queue.pop_front() {
            if taken.contains(&delivery.target) {
                remaining.push_back(delivery);
            } else {
                taken.insert(delivery.target.clone());
                selected.push(delivery);
            }
        }
        session.queue = remaining;

        let mut dropped = 0;
        let mut invocations = Vec::new();
        let mut parked_by_executor: FxHashMap<ExecutorId, Delivery> = FxHashMap::default();
        for delivery in selected {
            let handler = self
                .dataflow
                .executor(&delivery.target)
                .and_then(|spec| spec.resolve(&delivery.envelope.tag).cloned());
            match handler {
                Some(handler) => {
                    parked_by_executor.insert(delivery.target.clone(), delivery.clone());
                    invocations.push(Invocation {
                        executor: delivery.target,
                        handler,
                        envelope: delivery.envelope,
                    });
                }
                None => {
                    dropped += 1;
                    let _ = self.emitter.emit(Event::MessageDropped {
                        producer: delivery.envelope.producer.clone(),
                        tag: delivery.envelope.tag.clone(),
                        step,
                        reason: format!(
                            "executor {} has no handler for this message type",
                            delivery.target
                        ),
                    });
                }
            }
        }

        // Phase 2: concurrent invocation against the step-start snapshot.
        let view = session.state.view();
        let invoked: Vec<ExecutorId> = invocations.iter().map(|i| i.executor.clone()).collect();
        let outcomes = match self
            .scheduler
            .run_step(invocations, view, step, Arc::clone(&self.emitter))
            .await
        {
            Ok(outcomes) => outcomes,
            Err(error) => {
                // Abort the step: restore the consumed deliveries so the
                // faulted session matches the last committed boundary.
                let session = match self.runs.get_mut(run_id) {
                    Some(session) => session,
                    None => {
                        return Err(RunError::RunNotFound {
                            run_id: run_id.to_string(),
                        })
                    }
                };
                for delivery in parked_by_executor.into_values() {
                    session.queue.push_front(delivery);
                }
                session
                    .queue
                    .make_contiguous()
                    .sort_by_key(|d| d.envelope.seq);
                session.status = RunStatus::Faulted;
                if let SchedulerError::HandlerRun {
                    executor, source, ..
                } = &error
                {
                    let _ = self.emitter.emit(Event::RunFaulted {
                        executor: executor.clone(),
                        step,
                        error: source.to_string(),
                    });
                } else {
                    let _ = self
                        .emitter
                        .emit(Event::diagnostic("scheduler", error.to_string()));
                }
                warn!(run_id, step, error = %error, "step aborted");
                return Err(error.into());
            }
        };

        let session = match self.runs.get_mut(run_id) {
            Some(session) => session,
            None => {
                return Err(RunError::RunNotFound {
                    run_id: run_id.to_string(),
                })
            }
        };

        // Phase 3: barrier. All writes commit atomically in invocation
        // order then write order; scope commands run after the commit.
        let mut writes = Vec::new();
        for (executor, outcome) in &outcomes {
            for write in &outcome.writes {
                writes.push((executor.clone(), write.clone()));
            }
        }
        session.state.commit(writes);
        for (_, outcome) in &outcomes {
            for command in &outcome.scope_commands {
                for scope in command.discarded_scopes() {
                    session.state.discard_scope(&scope);
                }
            }
        }

        // Phase 4: outputs, suspensions, routing.
        for (executor, outcome) in &outcomes {
            if let Some(output) = &outcome.output {
                session.outputs.push(output.clone());
                let _ = self.emitter.emit(Event::OutputProduced {
                    executor: executor.clone(),
                    step,
                    payload: output.clone(),
                });
            }
        }
        for (executor, outcome) in &outcomes {
            let Some(suspension) = &outcome.suspension else {
                continue;
            };
            let request_id = IdGenerator::request_id();
            let (kind, payload) = match suspension {
                Suspension::Request { reply_tag, payload } => (
                    RequestKind::Approval {
                        reply_tag: reply_tag.clone(),
                    },
                    payload.clone(),
                ),
                Suspension::Continuation { payload } => {
                    let parked = match parked_by_executor.get(executor) {
                        Some(delivery) => delivery.clone(),
                        None => continue,
                    };
                    (RequestKind::Continuation { parked }, payload.clone())
                }
            };
            let _ = self.emitter.emit(Event::InputRequested {
                request_id: request_id.clone(),
                executor: executor.clone(),
                step,
                kind: kind.label().to_string(),
                payload: payload.clone(),
            });
            session.outstanding.push(OutstandingRequest {
                request_id,
                executor: executor.clone(),
                kind,
                payload,
                raised_at: Utc::now(),
            });
        }
        for (executor, outcome) in &outcomes {
            for emission in &outcome.emitted {
                let envelope = Envelope::new(
                    emission.tag.clone(),
                    emission.payload.clone(),
                    executor.clone(),
                    session.next_seq,
                );
                session.next_seq += 1;
                let targets = self.dataflow.targets_for(executor, &envelope);
                if targets.is_empty() {
                    let _ = self.emitter.emit(Event::MessageDropped {
                        producer: executor.clone(),
                        tag: envelope.tag.clone(),
                        step,
                        reason: "no matching route".to_string(),
                    });
                    continue;
                }
                // Fan-out shares one envelope (and seq) across all
                // matching targets.
                for target in targets {
                    session
                        .queue
                        .push_back(Delivery::new(target, envelope.clone()));
                }
            }
        }

        // Phase 5: status transition.
        session.step += 1;
        let next_step = session.step;
        session.status = if !session.outstanding.is_empty() {
            let _ = self.emitter.emit(Event::RunIdleWithPendingRequests {
                step: next_step,
                pending: session.outstanding.len(),
            });
            RunStatus::IdleWithPendingRequests
        } else if session.queue.is_empty() {
            let _ = self.emitter.emit(Event::RunIdle { step: next_step });
            RunStatus::Completed
        } else {
            RunStatus::Idle
        };
        let status = session.status;
        debug!(run_id, step, invoked = invoked.len(), dropped, %status, "step finished");
        self.maybe_checkpoint(run_id, status == RunStatus::IdleWithPendingRequests)
            .await?;
        Ok(StepReport {
            step,
            invoked,
            dropped,
            status,
        })
    }

    /// Steps the run until it completes, suspends, or is cancelled.
    ///
    /// Cancellation is observed between steps only; a cancelled run keeps
    /// its last committed state.
    pub async fn run_until_settled(
        &mut self,
        run_id: &str,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<RunReport, RunError> {
        let mut cancelled = false;
        loop {
            if let Some(rx) = &cancel {
                if *rx.borrow() {
                    cancelled = true;
                    break;
                }
            }
            if !self.status(run_id)?.is_runnable() {
                break;
            }
            self.run_step(run_id).await?;
        }
        let session = self.session(run_id)?;
        Ok(RunReport {
            run_id: run_id.to_string(),
            status: session.status,
            steps: session.step,
            outputs: session.outputs.clone(),
            cancelled,
        })
    }

    async fn maybe_checkpoint(&self, run_id: &str, force: bool) -> Result<(), RunError> {
        if !self.autosave && !force {
            return Ok(());
        }
        let session = self.session(run_id)?;
        let state = session.to_run_state(self.dataflow.graph_id(), run_id);
        self.checkpointer.save(Checkpoint::new(state)).await?;
        debug!(run_id, step = session.step, "checkpoint saved");
        Ok(())
    }
}
