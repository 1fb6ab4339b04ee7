//! Fluent construction and validation of dataflow graphs.
//!
//! [`GraphBuilder`] collects executors, edges and switches, then
//! [`build`](GraphBuilder::build) validates the topology and compiles it
//! into an immutable [`Dataflow`](crate::graph::Dataflow). All structural
//! errors are caught here; a built graph cannot fail structurally at run
//! time.
//!
//! # Example
//!
//! ```rust
//! use meshflow::graphs::{GraphBuilder, SwitchCase};
//! use meshflow::executor::{handler_fn, ExecutorSpec, HandlerOutcome};
//! use serde_json::json;
//!
//! let ok = handler_fn(|_, _| async { Ok(HandlerOutcome::new()) });
//! let graph = GraphBuilder::new()
//!     .add_executor(ExecutorSpec::new("writer").on("topic", ok.clone()).emits("draft"))
//!     .add_executor(ExecutorSpec::new("critic").on("draft", ok.clone()))
//!     .add_executor(ExecutorSpec::new("summary").on("draft", ok.clone()))
//!     .add_edge("writer", "critic")
//!     .add_switch(
//!         "critic",
//!         vec![SwitchCase::new("summary", |env| env.payload["score"] == json!(10))],
//!     )
//!     .with_entry("writer", "topic")
//!     .build()
//!     .unwrap();
//! assert_eq!(graph.executor_count(), 3);
//! ```

use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;

use super::edges::{Edge, Switch, SwitchCase};
use super::validation::GraphBuildError;
use crate::executor::ExecutorSpec;
use crate::graph::{Dataflow, RouteRule};
use crate::runtimes::RuntimeConfig;
use crate::types::{ExecutorId, TypeTag};

/// Accumulates graph structure before validation and compilation.
#[derive(Default)]
pub struct GraphBuilder {
    executors: Vec<ExecutorSpec>,
    edges: Vec<Edge>,
    switches: Vec<Switch>,
    entry: Option<(ExecutorId, TypeTag)>,
    runtime_config: RuntimeConfig,
}

impl GraphBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn add_executor(mut self, spec: ExecutorSpec) -> Self {
        self.executors.push(spec);
        self
    }

    /// Unconditional fan-out edge.
    #[must_use]
    pub fn add_edge(mut self, from: impl Into<ExecutorId>, to: impl Into<ExecutorId>) -> Self {
        self.edges.push(Edge {
            from: from.into(),
            to: to.into(),
        });
        self
    }

    /// Conditional routing; every matching case fires (broadcast).
    #[must_use]
    pub fn add_switch(mut self, from: impl Into<ExecutorId>, cases: Vec<SwitchCase>) -> Self {
        self.switches.push(Switch::new(from, cases));
        self
    }

    /// Declares the entry executor and the tag of the run's initial input.
    #[must_use]
    pub fn with_entry(mut self, id: impl Into<ExecutorId>, input_tag: impl Into<TypeTag>) -> Self {
        self.entry = Some((id.into(), input_tag.into()));
        self
    }

    #[must_use]
    pub fn with_runtime_config(mut self, config: RuntimeConfig) -> Self {
        self.runtime_config = config;
        self
    }

    /// Validates the accumulated structure and compiles it.
    ///
    /// Checks, in order: unique executor ids, at least one binding per
    /// executor, no exact duplicate bindings, edge endpoints exist, the
    /// entry exists and binds the input tag, and every declared emission is
    /// handleable by each unconditional successor.
    pub fn build(self) -> Result<Dataflow, GraphBuildError> {
        let mut executors: FxHashMap<ExecutorId, Arc<ExecutorSpec>> = FxHashMap::default();
        for spec in self.executors {
            if spec.bound_tags().next().is_none() {
                return Err(GraphBuildError::NoHandlers {
                    id: spec.id().clone(),
                });
            }
            let mut seen: FxHashSet<&TypeTag> = FxHashSet::default();
            for tag in spec.bound_tags() {
                if !seen.insert(tag) {
                    return Err(GraphBuildError::DuplicateBinding {
                        id: spec.id().clone(),
                        tag: tag.clone(),
                    });
                }
            }
            let id = spec.id().clone();
            if executors.insert(id.clone(), Arc::new(spec)).is_some() {
                return Err(GraphBuildError::DuplicateExecutor { id });
            }
        }

        let mut routes: FxHashMap<ExecutorId, Vec<RouteRule>> = FxHashMap::default();
        for edge in &self.edges {
            if !executors.contains_key(&edge.from) {
                return Err(GraphBuildError::UnknownEdgeSource {
                    id: edge.from.clone(),
                });
            }
            if !executors.contains_key(&edge.to) {
                return Err(GraphBuildError::UnknownEdgeTarget {
                    id: edge.to.clone(),
                });
            }
            routes
                .entry(edge.from.clone())
                .or_default()
                .push(RouteRule::Fanout(edge.to.clone()));
        }
        for switch in self.switches {
            if !executors.contains_key(&switch.from) {
                return Err(GraphBuildError::UnknownEdgeSource {
                    id: switch.from.clone(),
                });
            }
            for case in &switch.cases {
                if !executors.contains_key(&case.target) {
                    return Err(GraphBuildError::UnknownEdgeTarget {
                        id: case.target.clone(),
                    });
                }
            }
            routes
                .entry(switch.from.clone())
                .or_default()
                .push(RouteRule::Switch(switch.cases));
        }

        let (entry, input_tag) = self.entry.ok_or(GraphBuildError::MissingEntry)?;
        let entry_spec = executors
            .get(&entry)
            .ok_or_else(|| GraphBuildError::UnknownEntry { id: entry.clone() })?;
        if !entry_spec.handles(&input_tag) {
            return Err(GraphBuildError::EntryCannotHandle {
                id: entry,
                tag: input_tag,
            });
        }

        // Declared emissions must be handleable by every unconditional
        // successor; switch targets are exempt because their predicates
        // already narrow what arrives.
        for edge in &self.edges {
            let source = &executors[&edge.from];
            let target = &executors[&edge.to];
            for tag in source.declared_emissions() {
                if !target.handles(tag) {
                    return Err(GraphBuildError::UnreachableMessageType {
                        id: edge.from.clone(),
                        tag: tag.clone(),
                        successor: edge.to.clone(),
                    });
                }
            }
        }

        Ok(Dataflow::from_parts(
            executors,
            routes,
            entry,
            input_tag,
            self.runtime_config,
        ))
    }
}
