//! Core identifier types for the meshflow dataflow engine.
//!
//! This module defines the two fundamental identifiers used throughout the
//! system: [`ExecutorId`] for naming graph nodes and [`TypeTag`] for the
//! runtime type of messages flowing along edges.
//!
//! Graphs are explicit adjacency structures keyed by `ExecutorId`, never
//! in-language object references, so cyclic topologies (loops, goto edges)
//! serialize trivially for checkpointing.
//!
//! # Examples
//!
//! ```rust
//! use meshflow::types::{ExecutorId, TypeTag};
//!
//! let writer: ExecutorId = "writer".into();
//! assert_eq!(writer.as_str(), "writer");
//!
//! let review = TypeTag::new("review");
//! let approved = TypeTag::new("review.approved");
//! assert!(review.accepts(&approved));
//! assert!(!approved.accepts(&review));
//! assert!(approved.specificity() > review.specificity());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable unique identifier for an executor in a dataflow graph.
///
/// Executor ids are plain strings; the engine treats them opaquely and uses
/// them as keys in routing tables and checkpoints. Ids must be unique within
/// a graph (enforced at build time).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExecutorId(String);

impl ExecutorId {
    /// Reserved producer id for messages injected from outside the graph
    /// (the initial input and resume inputs).
    pub const EXTERNAL: &'static str = "__external__";

    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Producer id used for caller-supplied messages.
    #[must_use]
    pub fn external() -> Self {
        Self(Self::EXTERNAL.to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if this id denotes an outside-the-graph producer.
    #[must_use]
    pub fn is_external(&self) -> bool {
        self.0 == Self::EXTERNAL
    }
}

impl fmt::Display for ExecutorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ExecutorId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ExecutorId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Hierarchical runtime type tag carried by every message envelope.
///
/// Tags are dot-separated paths: `"review"` is a parent of
/// `"review.approved"`. A handler bound to a parent tag accepts all child
/// tags; dispatch always selects the most specific matching binding
/// ([`specificity`](Self::specificity) = segment count). Exact duplicate
/// bindings on one executor are rejected at graph build time, so a dispatch
/// tie is impossible by construction.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeTag(String);

impl TypeTag {
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Dot-separated segments of this tag.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// Number of segments; a higher value means a more specific tag.
    #[must_use]
    pub fn specificity(&self) -> usize {
        self.segments().count()
    }

    /// Returns `true` if a message tagged `incoming` is accepted by a
    /// handler bound to `self`: the binding's segments must be a prefix of
    /// the incoming tag's segments.
    ///
    /// ```rust
    /// # use meshflow::types::TypeTag;
    /// let binding = TypeTag::new("review");
    /// assert!(binding.accepts(&TypeTag::new("review")));
    /// assert!(binding.accepts(&TypeTag::new("review.approved")));
    /// assert!(!binding.accepts(&TypeTag::new("reviewer")));
    /// ```
    #[must_use]
    pub fn accepts(&self, incoming: &TypeTag) -> bool {
        let mut own = self.segments();
        let mut other = incoming.segments();
        loop {
            match (own.next(), other.next()) {
                (None, _) => return true,
                (Some(a), Some(b)) if a == b => continue,
                _ => return false,
            }
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TypeTag {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TypeTag {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_prefix_matching() {
        let parent = TypeTag::new("draft");
        assert!(parent.accepts(&TypeTag::new("draft")));
        assert!(parent.accepts(&TypeTag::new("draft.revision")));
        assert!(parent.accepts(&TypeTag::new("draft.revision.final")));
        assert!(!parent.accepts(&TypeTag::new("drafting")));
        assert!(!parent.accepts(&TypeTag::new("review.draft")));
    }

    #[test]
    fn tag_specificity_orders_by_depth() {
        assert_eq!(TypeTag::new("a").specificity(), 1);
        assert_eq!(TypeTag::new("a.b.c").specificity(), 3);
    }

    #[test]
    fn external_id_is_reserved() {
        let id = ExecutorId::external();
        assert!(id.is_external());
        assert!(!ExecutorId::from("writer").is_external());
    }
}
