//! Abstract checkpoint persistence.
//!
//! The engine never mandates a storage backend: hosts implement
//! [`Checkpointer`] over whatever store they have and inject it through
//! `RuntimeConfig`. [`InMemoryCheckpointer`] is provided for tests and for
//! suspend/resume within one process.

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use std::sync::Mutex;
use thiserror::Error;

use super::run_state::Checkpoint;

#[derive(Debug, Error, Diagnostic)]
pub enum CheckpointerError {
    #[error("no checkpoint found for run {run_id}")]
    #[diagnostic(
        code(meshflow::checkpoint::not_found),
        help("The run id may be wrong, or the run was never checkpointed.")
    )]
    NotFound { run_id: String },

    #[error("checkpoint backend error: {message}")]
    #[diagnostic(code(meshflow::checkpoint::backend))]
    Backend { message: String },

    #[error("checkpoint serialization error: {0}")]
    #[diagnostic(code(meshflow::checkpoint::serde))]
    Serde(#[from] serde_json::Error),
}

impl CheckpointerError {
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

/// Storage backend for run snapshots.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Persists a checkpoint, replacing any earlier one for the same run.
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), CheckpointerError>;

    /// Latest checkpoint for `run_id`.
    async fn load_latest(&self, run_id: &str) -> Result<Checkpoint, CheckpointerError>;

    /// Removes all checkpoints for `run_id`. Missing runs are not an
    /// error.
    async fn delete(&self, run_id: &str) -> Result<(), CheckpointerError>;
}

/// Process-local checkpointer keeping the latest snapshot per run.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointer {
    checkpoints: Mutex<FxHashMap<String, Checkpoint>>,
}

impl InMemoryCheckpointer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), CheckpointerError> {
        let mut checkpoints = self
            .checkpoints
            .lock()
            .map_err(|_| CheckpointerError::backend("checkpoint map poisoned"))?;
        checkpoints.insert(checkpoint.run_id.clone(), checkpoint);
        Ok(())
    }

    async fn load_latest(&self, run_id: &str) -> Result<Checkpoint, CheckpointerError> {
        let checkpoints = self
            .checkpoints
            .lock()
            .map_err(|_| CheckpointerError::backend("checkpoint map poisoned"))?;
        checkpoints
            .get(run_id)
            .cloned()
            .ok_or_else(|| CheckpointerError::NotFound {
                run_id: run_id.to_string(),
            })
    }

    async fn delete(&self, run_id: &str) -> Result<(), CheckpointerError> {
        let mut checkpoints = self
            .checkpoints
            .lock()
            .map_err(|_| CheckpointerError::backend("checkpoint map poisoned"))?;
        checkpoints.remove(run_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtimes::run_state::{RunState, RunStatus};
    use chrono::Utc;

    fn sample_state(run_id: &str) -> RunState {
        RunState {
            graph_id: "g".into(),
            run_id: run_id.into(),
            status: RunStatus::Idle,
            step: 1,
            next_seq: 2,
            queue: vec![],
            scopes: vec![],
            outputs: vec![],
            outstanding: vec![],
            saved_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn save_then_load_latest() {
        let cp = InMemoryCheckpointer::new();
        cp.save(Checkpoint::new(sample_state("r1"))).await.unwrap();
        let loaded = cp.load_latest("r1").await.unwrap();
        assert_eq!(loaded.run_id, "r1");
        assert_eq!(loaded.step, 1);
    }

    #[tokio::test]
    async fn newer_save_replaces_older() {
        let cp = InMemoryCheckpointer::new();
        cp.save(Checkpoint::new(sample_state("r1"))).await.unwrap();
        let mut newer = sample_state("r1");
        newer.step = 5;
        cp.save(Checkpoint::new(newer)).await.unwrap();
        assert_eq!(cp.load_latest("r1").await.unwrap().step, 5);
    }

    #[tokio::test]
    async fn missing_run_is_not_found() {
        let cp = InMemoryCheckpointer::new();
        assert!(matches!(
            cp.load_latest("ghost").await,
            Err(CheckpointerError::NotFound { .. })
        ));
    }
}
