//! Runtime configuration attached to a graph at build time.

use std::fmt;
use std::sync::Arc;

use super::checkpointer::Checkpointer;
use crate::event_bus::{EventBus, MemorySink, StdOutSink};

/// Where run events are delivered, besides the always-available
/// subscription stream.
#[derive(Clone, Debug, Default)]
pub struct EventBusConfig {
    pub sinks: Vec<SinkConfig>,
}

impl EventBusConfig {
    /// Builds a bus with the configured sinks attached.
    #[must_use]
    pub fn build_event_bus(&self) -> EventBus {
        let bus = EventBus::new();
        for sink in &self.sinks {
            match sink {
                SinkConfig::StdOut => bus.add_sink(Box::new(StdOutSink::default())),
                SinkConfig::Memory(sink) => bus.add_sink(Box::new(sink.clone())),
            }
        }
        bus
    }
}

#[derive(Clone)]
pub enum SinkConfig {
    StdOut,
    /// Shared in-memory sink; keep a clone to inspect captured events.
    Memory(MemorySink),
}

impl fmt::Debug for SinkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkConfig::StdOut => write!(f, "StdOut"),
            SinkConfig::Memory(_) => write!(f, "Memory"),
        }
    }
}

/// Execution settings for runs of a graph.
#[derive(Clone, Default)]
pub struct RuntimeConfig {
    /// Fixed run id instead of a generated one.
    pub run_id: Option<String>,
    /// Checkpoint backend; defaults to an in-process store when unset.
    pub checkpointer: Option<Arc<dyn Checkpointer>>,
    /// Save a checkpoint after every step (suspension always checkpoints).
    pub autosave: bool,
    /// Cap on concurrently running handlers within a step; defaults to
    /// available parallelism.
    pub concurrency_limit: Option<usize>,
    pub event_bus: EventBusConfig,
}

impl RuntimeConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    #[must_use]
    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn Checkpointer>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    #[must_use]
    pub fn with_autosave(mut self, autosave: bool) -> Self {
        self.autosave = autosave;
        self
    }

    #[must_use]
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = Some(limit);
        self
    }

    #[must_use]
    pub fn with_event_bus(mut self, event_bus: EventBusConfig) -> Self {
        self.event_bus = event_bus;
        self
    }
}

impl fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("run_id", &self.run_id)
            .field("checkpointer", &self.checkpointer.as_ref().map(|_| "<dyn>"))
            .field("autosave", &self.autosave)
            .field("concurrency_limit", &self.concurrency_limit)
            .field("event_bus", &self.event_bus)
            .finish()
    }
}
