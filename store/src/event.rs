//! The change-stream event shared by the write pass and the diff pass.
//!
//! The OSC reader (`onramp-cli::osc`) produces a stream of these; both
//! [`crate::write_handler::WriteHandler`] and
//! [`crate::diff::handler::DiffHandler`] consume the same stream type so
//! the two passes never duplicate parsing logic. Matches the design note's
//! call for "an event-processor interface parameterized over a set of
//! callbacks" rather than sharing a base class.

use crate::model::{Node, Relation, Way};

#[derive(Clone, Debug, PartialEq)]
pub enum ChangeEvent {
    Node(Node),
    Way(Way),
    Relation(Relation),
}

impl ChangeEvent {
    pub fn visible(&self) -> bool {
        match self {
            ChangeEvent::Node(n) => n.visible,
            ChangeEvent::Way(w) => w.visible,
            ChangeEvent::Relation(r) => r.visible,
        }
    }
}
