//! Graph construction: builder, edge types, build-time validation.

mod builder;
mod edges;
mod validation;

pub use builder::GraphBuilder;
pub use edges::{CasePredicate, Edge, Switch, SwitchCase};
pub use validation::GraphBuildError;
