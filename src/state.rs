//! Scoped, versioned shared state with buffer-then-commit discipline.
//!
//! State lives in a [`StateStore`] owned by the run controller. Handlers
//! never touch the store directly: they read through an immutable
//! [`StateView`] snapshot taken at the start of the step, and queue
//! [`StateWrite`]s in their outcome. The controller commits all buffered
//! writes atomically at the step barrier, after every handler in the step
//! has returned successfully. A write performed in step K is therefore
//! never visible to any handler before step K+1.
//!
//! Entries are keyed by [`Scope`] + string key. Iteration scopes are
//! discarded wholesale when the matching iteration exits; loop scopes
//! persist across iterations of the same loop.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::types::ExecutorId;

/// Namespace for a state entry.
///
/// `Loop` and `Iteration` carry the loop's name so that independent loops
/// (and nested loops with distinct names) keep separate state.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    Global,
    Loop(String),
    Iteration(String),
}

impl Scope {
    #[must_use]
    pub fn loop_scope(name: impl Into<String>) -> Self {
        Self::Loop(name.into())
    }

    #[must_use]
    pub fn iteration(name: impl Into<String>) -> Self {
        Self::Iteration(name.into())
    }

    /// Stable string encoding for persistence and diagnostics.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Scope::Global => "global".to_string(),
            Scope::Loop(name) => format!("loop:{name}"),
            Scope::Iteration(name) => format!("iteration:{name}"),
        }
    }

    /// Inverse of [`encode`](Self::encode); unrecognized inputs are `None`.
    #[must_use]
    pub fn decode(s: &str) -> Option<Self> {
        if s == "global" {
            return Some(Scope::Global);
        }
        if let Some(name) = s.strip_prefix("loop:") {
            return Some(Scope::Loop(name.to_string()));
        }
        if let Some(name) = s.strip_prefix("iteration:") {
            return Some(Scope::Iteration(name.to_string()));
        }
        None
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

/// A committed state value together with provenance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    pub value: Value,
    /// Executor whose write most recently set this entry.
    pub writer: ExecutorId,
    /// Store version at which this entry was last committed.
    pub version: u64,
}

/// A buffered write queued by a handler, applied at the step barrier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateWrite {
    pub scope: Scope,
    pub key: String,
    pub value: Value,
}

impl StateWrite {
    #[must_use]
    pub fn new(scope: Scope, key: impl Into<String>, value: Value) -> Self {
        Self {
            scope,
            key: key.into(),
            value,
        }
    }

    #[must_use]
    pub fn global(key: impl Into<String>, value: Value) -> Self {
        Self::new(Scope::Global, key, value)
    }
}

/// Serde-friendly export of one scope's committed entries.
///
/// JSON object keys must be strings, so scoped maps are persisted as a
/// vector of `(scope, entries)` pairs rather than a nested map.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScopeState {
    pub scope: Scope,
    pub entries: Vec<(String, StateEntry)>,
}

type Entries = FxHashMap<Scope, FxHashMap<String, StateEntry>>;

/// Committed state for a run, owned by the controller.
#[derive(Clone, Debug, Default)]
pub struct StateStore {
    entries: Entries,
    version: u64,
}

impl StateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current commit version; bumped once per barrier that applies at
    /// least one write.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[must_use]
    pub fn get(&self, scope: &Scope, key: &str) -> Option<&StateEntry> {
        self.entries.get(scope)?.get(key)
    }

    /// Immutable snapshot handed to handlers for the duration of a step.
    #[must_use]
    pub fn view(&self) -> StateView {
        StateView {
            entries: Arc::new(self.entries.clone()),
            version: self.version,
        }
    }

    /// Applies buffered writes atomically. `writes` must already be in the
    /// deterministic barrier order (invocation order, then the order each
    /// handler queued them); later writes to the same `(scope, key)` win.
    pub fn commit(&mut self, writes: Vec<(ExecutorId, StateWrite)>) {
        if writes.is_empty() {
            return;
        }
        self.version += 1;
        let version = self.version;
        for (writer, write) in writes {
            self.entries.entry(write.scope).or_default().insert(
                write.key,
                StateEntry {
                    value: write.value,
                    writer: writer.clone(),
                    version,
                },
            );
        }
    }

    /// Drops every entry under `scope`. Used when an iteration or loop
    /// exits.
    pub fn discard_scope(&mut self, scope: &Scope) {
        self.entries.remove(scope);
    }

    /// Serde-friendly dump of all committed entries, scopes sorted by
    /// encoding and keys sorted, so checkpoints are byte-stable.
    #[must_use]
    pub fn export(&self) -> Vec<ScopeState> {
        let mut scopes: Vec<ScopeState> = self
            .entries
            .iter()
            .map(|(scope, map)| {
                let mut entries: Vec<(String, StateEntry)> = map
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                entries.sort_by(|a, b| a.0.cmp(&b.0));
                ScopeState {
                    scope: scope.clone(),
                    entries,
                }
            })
            .collect();
        scopes.sort_by(|a, b| a.scope.encode().cmp(&b.scope.encode()));
        scopes
    }

    /// Rebuilds a store from an [`export`](Self::export)ed dump.
    #[must_use]
    pub fn restore(scopes: Vec<ScopeState>) -> Self {
        let mut entries: Entries = FxHashMap::default();
        let mut version = 0;
        for scope_state in scopes {
            let map = entries.entry(scope_state.scope).or_default();
            for (key, entry) in scope_state.entries {
                version = version.max(entry.version);
                map.insert(key, entry);
            }
        }
        Self { entries, version }
    }
}

/// Read-only snapshot of committed state, shared by all handlers in a step.
///
/// Cheap to clone; the underlying entries are behind an `Arc`.
#[derive(Clone, Debug)]
pub struct StateView {
    entries: Arc<Entries>,
    version: u64,
}

impl StateView {
    #[must_use]
    pub fn get(&self, scope: &Scope, key: &str) -> Option<&Value> {
        self.entries.get(scope)?.get(key).map(|e| &e.value)
    }

    #[must_use]
    pub fn entry(&self, scope: &Scope, key: &str) -> Option<&StateEntry> {
        self.entries.get(scope)?.get(key)
    }

    /// Commit version this snapshot was taken at.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }
}
