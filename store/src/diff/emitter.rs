//! Turns the finished [`crate::diff::handler::DiffHandler`] state into the
//! deterministic [`crate::diff::DiffDocument`] shape spec.md §4.H
//! describes: ascending id within each kind, nodes then ways then
//! relations. Grounded in the original's `to_aug_diff_xml`/`node_to_xml`/
//! `way_to_xml`/`relation_to_xml`, minus the XML rendering itself, which is
//! `onramp-cli::adiff`'s job — this stays a plain data shape so the core
//! crate never depends on an XML library.

use crate::diff::handler::DiffHandler;
use crate::diff::DiffDocument;
use crate::engine::Engine;

pub struct DiffEmitter;

impl DiffEmitter {
    pub fn emit<E: Engine>(handler: DiffHandler<'_, '_, E>) -> DiffDocument {
        let (nodes, ways, relations) = handler.entries();
        DiffDocument { nodes, ways, relations }
    }
}
