//! Compiled dataflow graphs and run handles.
//!
//! A [`Dataflow`] is the immutable artifact produced by
//! [`GraphBuilder::build`](crate::graphs::GraphBuilder::build): executors,
//! compiled routing rules, the entry point and the runtime configuration.
//! It is cheap to clone (executors are shared behind `Arc`) and can run any
//! number of concurrent runs.
//!
//! [`Dataflow::start`] and [`Dataflow::resume`] spawn a
//! [`RunController`](crate::runtimes::RunController) loop on the tokio
//! runtime and hand back a [`RunHandle`] for observing, cancelling and
//! joining the run. Hosts that want stepwise control construct a
//! `RunController` directly instead.
//!
//! # Example
//!
//! ```rust,no_run
//! use meshflow::graphs::GraphBuilder;
//! use meshflow::executor::{handler_fn, ExecutorSpec, HandlerOutcome};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let graph = GraphBuilder::new()
//!     .add_executor(ExecutorSpec::new("echo").on(
//!         "input",
//!         handler_fn(|env, _| async move {
//!             Ok(HandlerOutcome::new().with_output(env.payload.clone()))
//!         }),
//!     ))
//!     .with_entry("echo", "input")
//!     .build()?;
//! let handle = graph.start(json!("hello")).await?;
//! let report = handle.join().await?;
//! assert_eq!(report.outputs, vec![json!("hello")]);
//! # Ok(())
//! # }
//! ```

use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::event_bus::{EventBus, EventStream};
use crate::executor::ExecutorSpec;
use crate::graphs::SwitchCase;
use crate::message::Envelope;
use crate::runtimes::{ResumeInput, RunController, RunError, RunReport, RuntimeConfig};
use crate::types::{ExecutorId, TypeTag};
use crate::utils::id_generator::IdGenerator;

/// One compiled routing rule out of an executor.
#[derive(Clone)]
pub(crate) enum RouteRule {
    /// Unconditional fan-out edge.
    Fanout(ExecutorId),
    /// Ordered predicated cases; every matching case fires.
    Switch(Vec<SwitchCase>),
}

/// Immutable, executable dataflow graph.
#[derive(Clone)]
pub struct Dataflow {
    graph_id: String,
    executors: FxHashMap<ExecutorId, Arc<ExecutorSpec>>,
    routes: FxHashMap<ExecutorId, Vec<RouteRule>>,
    entry: ExecutorId,
    input_tag: TypeTag,
    runtime_config: RuntimeConfig,
}

impl Dataflow {
    pub(crate) fn from_parts(
        executors: FxHashMap<ExecutorId, Arc<ExecutorSpec>>,
        routes: FxHashMap<ExecutorId, Vec<RouteRule>>,
        entry: ExecutorId,
        input_tag: TypeTag,
        runtime_config: RuntimeConfig,
    ) -> Self {
        Self {
            graph_id: IdGenerator::graph_id(),
            executors,
            routes,
            entry,
            input_tag,
            runtime_config,
        }
    }

    #[must_use]
    pub fn graph_id(&self) -> &str {
        &self.graph_id
    }

    #[must_use]
    pub fn executor_count(&self) -> usize {
        self.executors.len()
    }

    #[must_use]
    pub fn executor(&self, id: &ExecutorId) -> Option<&Arc<ExecutorSpec>> {
        self.executors.get(id)
    }

    #[must_use]
    pub fn entry(&self) -> &ExecutorId {
        &self.entry
    }

    #[must_use]
    pub fn input_tag(&self) -> &TypeTag {
        &self.input_tag
    }

    #[must_use]
    pub fn runtime_config(&self) -> &RuntimeConfig {
        &self.runtime_config
    }

    /// Routing targets for a message produced by `producer`: fan-out edges
    /// always fire, switch cases fire per predicate (all matches,
    /// broadcast). Order follows declaration order; duplicates are
    /// delivered once.
    #[must_use]
    pub fn targets_for(&self, producer: &ExecutorId, envelope: &Envelope) -> Vec<ExecutorId> {
        let mut targets = Vec::new();
        let mut seen: FxHashSet<&ExecutorId> = FxHashSet::default();
        let Some(rules) = self.routes.get(producer) else {
            return targets;
        };
        for rule in rules {
            match rule {
                RouteRule::Fanout(to) => {
                    if seen.insert(to) {
                        targets.push(to.clone());
                    }
                }
                RouteRule::Switch(cases) => {
                    for case in cases {
                        if (case.predicate)(envelope) && seen.insert(&case.target) {
                            targets.push(case.target.clone());
                        }
                    }
                }
            }
        }
        targets
    }

    /// Starts a new run, seeding the entry executor with `input` tagged as
    /// the graph's declared input type, and drives it on a spawned task
    /// until it completes, suspends, faults or is cancelled.
    pub async fn start(&self, input: Value) -> Result<RunHandle, RunError> {
        let mut controller = RunController::new(Arc::new(self.clone()));
        let run_id = controller.start_run(input).await?;
        Ok(Self::spawn_loop(controller, run_id))
    }

    /// Resumes a checkpointed run with answers to its outstanding
    /// requests, then drives it like [`start`](Self::start). A resumed run
    /// reaches the same logical position an unpaused run would have.
    pub async fn resume(
        &self,
        run_id: &str,
        inputs: Vec<ResumeInput>,
    ) -> Result<RunHandle, RunError> {
        let mut controller = RunController::new(Arc::new(self.clone()));
        controller.load_run(run_id).await?;
        controller.resume_run(run_id, inputs).await?;
        Ok(Self::spawn_loop(controller, run_id.to_string()))
    }

    fn spawn_loop(mut controller: RunController, run_id: String) -> RunHandle {
        let bus = controller.event_bus().clone();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let task_run_id = run_id.clone();
        let task_bus = bus.clone();
        let join = tokio::spawn(async move {
            let result = controller
                .run_until_settled(&task_run_id, Some(cancel_rx))
                .await;
            task_bus.close();
            debug!(run_id = %task_run_id, "run loop finished");
            result
        });
        RunHandle {
            run_id,
            bus,
            cancel: cancel_tx,
            join,
        }
    }
}

impl std::fmt::Debug for Dataflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataflow")
            .field("graph_id", &self.graph_id)
            .field("executors", &self.executors.keys().collect::<Vec<_>>())
            .field("entry", &self.entry)
            .field("input_tag", &self.input_tag)
            .finish()
    }
}

/// Handle to a spawned run.
pub struct RunHandle {
    run_id: String,
    bus: EventBus,
    cancel: watch::Sender<bool>,
    join: JoinHandle<Result<RunReport, RunError>>,
}

impl RunHandle {
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Ordered, restartable subscription to the run's events. Late
    /// subscribers see the full history.
    #[must_use]
    pub fn events(&self) -> EventStream {
        self.bus.subscribe()
    }

    /// Requests cancellation; observed at the next step boundary, so the
    /// last committed state stays intact.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Waits for the run loop to settle and returns its report.
    pub async fn join(self) -> Result<RunReport, RunError> {
        self.join.await?
    }
}
