//! Build-time graph validation.
//!
//! Everything here is fatal at [`GraphBuilder::build`](super::GraphBuilder)
//! time and can never surface during a run: a built [`Dataflow`]
//! (crate::graph::Dataflow) has unique executors, unambiguous dispatch,
//! resolvable edges, and a usable entry point.

use miette::Diagnostic;
use thiserror::Error;

use crate::types::{ExecutorId, TypeTag};

#[derive(Debug, Error, Diagnostic)]
pub enum GraphBuildError {
    #[error("duplicate executor id: {id}")]
    #[diagnostic(
        code(meshflow::build::duplicate_executor),
        help("Each executor id must be unique within a graph.")
    )]
    DuplicateExecutor { id: ExecutorId },

    #[error("executor {id} binds tag {tag} more than once")]
    #[diagnostic(
        code(meshflow::build::duplicate_binding),
        help("Exact duplicate bindings make dispatch ambiguous; remove one.")
    )]
    DuplicateBinding { id: ExecutorId, tag: TypeTag },

    #[error("executor {id} has no handler bindings")]
    #[diagnostic(
        code(meshflow::build::no_handlers),
        help("Bind at least one (tag, handler) pair with ExecutorSpec::on.")
    )]
    NoHandlers { id: ExecutorId },

    #[error("edge references unknown source executor: {id}")]
    #[diagnostic(code(meshflow::build::unknown_edge_source))]
    UnknownEdgeSource { id: ExecutorId },

    #[error("edge references unknown target executor: {id}")]
    #[diagnostic(code(meshflow::build::unknown_edge_target))]
    UnknownEdgeTarget { id: ExecutorId },

    #[error("no entry executor declared")]
    #[diagnostic(
        code(meshflow::build::missing_entry),
        help("Call GraphBuilder::with_entry(id, input_tag) before build().")
    )]
    MissingEntry,

    #[error("entry executor is unknown: {id}")]
    #[diagnostic(code(meshflow::build::unknown_entry))]
    UnknownEntry { id: ExecutorId },

    #[error("entry executor {id} has no binding accepting input tag {tag}")]
    #[diagnostic(
        code(meshflow::build::entry_cannot_handle),
        help("The entry executor must bind the graph's declared input tag.")
    )]
    EntryCannotHandle { id: ExecutorId, tag: TypeTag },

    #[error("executor {id} declares emission {tag}, but successor {successor} cannot handle it")]
    #[diagnostic(
        code(meshflow::build::unreachable_message_type),
        help(
            "Every declared emission must be handleable by each unconditional \
             successor; bind the tag on the successor or drop the edge."
        )
    )]
    UnreachableMessageType {
        id: ExecutorId,
        tag: TypeTag,
        successor: ExecutorId,
    },
}
