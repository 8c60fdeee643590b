//! Pre-reads all relation definitions from the change stream so that
//! relations referenced only in passing (because a child changed) still
//! get a full diff entry.
//!
//! Grounded in `examples/original_source/src/onramp_relations_manager.cpp`'s
//! `OnrampRelationsManager`: one upfront scan collects every relation in
//! full; after the main diff pass, anything still missing from
//! [`crate::diff::handler::DiffHandler`]'s relation map is flushed through
//! its relation path. This two-scan approach tolerates arbitrary ordering
//! in the input file.

use crate::diff::handler::DiffHandler;
use crate::engine::Engine;
use crate::error::CResult;
use crate::event::ChangeEvent;
use crate::model::{EntityId, Relation};
use std::collections::HashMap;

#[derive(Default)]
pub struct RelationResolver {
    relations: HashMap<EntityId, Relation>,
}

impl RelationResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one pre-scan event. Only relation events are retained.
    pub fn observe(&mut self, event: &ChangeEvent) {
        if let ChangeEvent::Relation(relation) = event {
            self.relations.insert(relation.id, relation.clone());
        }
    }

    /// Flushes every relation this resolver collected that the handler
    /// hasn't already produced a diff entry for, in ascending id order for
    /// determinism.
    pub fn flush_incomplete<E: Engine>(&self, handler: &mut DiffHandler<'_, '_, E>) -> CResult<()> {
        let mut ids: Vec<_> = self.relations.keys().copied().collect();
        ids.sort();
        for id in ids {
            if !handler.has_relation(id) {
                handler.on_relation(&self.relations[&id])?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::Memory;
    use crate::model::{Member, MemberKind, Meta};
    use crate::txn::Env;

    #[test]
    fn flushes_relations_untouched_by_main_pass() {
        let env = Env::new(Memory::new());
        let mut txn = env.begin_ro().unwrap();
        let mut handler = DiffHandler::new(&mut txn);

        let mut resolver = RelationResolver::new();
        let relation = Relation {
            id: 100,
            visible: true,
            meta: Meta::default(),
            tags: vec![],
            members: vec![Member { kind: MemberKind::Node, id: 1, role: "".into() }],
        };
        resolver.observe(&ChangeEvent::Relation(relation));

        resolver.flush_incomplete(&mut handler).unwrap();
        assert!(handler.has_relation(100));
    }

    #[test]
    fn does_not_duplicate_a_relation_already_handled() {
        let env = Env::new(Memory::new());
        let mut txn = env.begin_ro().unwrap();
        let mut handler = DiffHandler::new(&mut txn);

        let relation = Relation {
            id: 100,
            visible: true,
            meta: Meta::default(),
            tags: vec![],
            members: vec![],
        };
        handler.on_relation(&relation).unwrap();

        let mut resolver = RelationResolver::new();
        resolver.observe(&ChangeEvent::Relation(relation));
        resolver.flush_incomplete(&mut handler).unwrap();

        let (_, _, relations) = handler.entries();
        assert_eq!(relations.len(), 1);
    }
}
