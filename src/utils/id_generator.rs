//! Run, request and graph id generation.

use uuid::Uuid;

pub struct IdGenerator;

impl IdGenerator {
    #[must_use]
    pub fn run_id() -> String {
        format!("run-{}", Uuid::new_v4())
    }

    #[must_use]
    pub fn request_id() -> String {
        format!("req-{}", Uuid::new_v4())
    }

    #[must_use]
    pub fn graph_id() -> String {
        format!("graph-{}", Uuid::new_v4())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_prefixed() {
        let a = IdGenerator::run_id();
        let b = IdGenerator::run_id();
        assert_ne!(a, b);
        assert!(a.starts_with("run-"));
        assert!(IdGenerator::request_id().starts_with("req-"));
        assert!(IdGenerator::graph_id().starts_with("graph-"));
    }
}
