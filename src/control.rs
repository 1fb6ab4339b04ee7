//! Control directives emitted by handlers and applied at the step barrier.
//!
//! Scope commands are kept apart from state writes so the controller can
//! reconcile them deterministically: all writes commit first, then scope
//! commands run in invocation order. This means a handler may both write a
//! loop-scoped summary and discard the iteration scope in the same step.

use serde::{Deserialize, Serialize};

use crate::state::Scope;

/// Directive that unwinds scoped state when control flow leaves a loop
/// body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScopeCommand {
    /// Discard `Iteration(name)` entries; the loop's own scope survives.
    /// Emitted at the end of each iteration and by `goto`-style edges that
    /// jump out of a loop body.
    ExitIteration(String),
    /// Discard both `Iteration(name)` and `Loop(name)` entries. Emitted
    /// when the loop as a whole is left (`break`, loop condition
    /// exhausted).
    ExitLoop(String),
}

impl ScopeCommand {
    /// Scopes discarded by this command, in discard order.
    #[must_use]
    pub fn discarded_scopes(&self) -> Vec<Scope> {
        match self {
            ScopeCommand::ExitIteration(name) => vec![Scope::Iteration(name.clone())],
            ScopeCommand::ExitLoop(name) => vec![
                Scope::Iteration(name.clone()),
                Scope::Loop(name.clone()),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_loop_discards_iteration_scope_too() {
        let scopes = ScopeCommand::ExitLoop("l".into()).discarded_scopes();
        assert_eq!(
            scopes,
            vec![Scope::Iteration("l".into()), Scope::Loop("l".into())]
        );
    }
}
