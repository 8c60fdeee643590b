//! Applies a stream of [`ChangeEvent`]s to the Store, maintaining primary
//! tables and the four reverse-reference indexes plus the spatial index.
//!
//! Grounded in `examples/original_source/src/osmx_update_handler.cpp`'s
//! `node`/`way`/`relation` methods: read previous state, branch on
//! visibility, write the primary table, then diff the reverse-index sets
//! (remove stale, add new, leave retained alone) so unchanged members never
//! incur a write.

use crate::codec;
use crate::engine::Engine;
use crate::error::CResult;
use crate::event::ChangeEvent;
use crate::model::{EntityId, Location, Member, MemberKind, Node, Relation, Way};
use crate::schema::Table;
use crate::spatial;
use crate::txn::{CellIndex, Elements, Index, Locations, Txn};
use std::collections::HashSet;

pub struct WriteHandler<'txn, 'env, E: Engine> {
    txn: &'txn mut Txn<'env, E>,
}

impl<'txn, 'env, E: Engine> WriteHandler<'txn, 'env, E> {
    pub fn new(txn: &'txn mut Txn<'env, E>) -> Self {
        Self { txn }
    }

    pub fn apply(&mut self, event: &ChangeEvent) -> CResult<()> {
        match event {
            ChangeEvent::Node(node) => self.apply_node(node),
            ChangeEvent::Way(way) => self.apply_way(way),
            ChangeEvent::Relation(relation) => self.apply_relation(relation),
        }
    }

    fn apply_node(&mut self, node: &Node) -> CResult<()> {
        let prev_location = Locations::new(self.txn).get(node.id)?;
        let prev_cell = prev_location.map(|loc| spatial::cell_id(loc.lat_e7, loc.lon_e7));

        if !node.visible {
            Locations::new(self.txn).del(node.id)?;
            Elements::new(self.txn, Table::Nodes).del(node.id)?;
            if let Some(cell) = prev_cell {
                CellIndex::new(self.txn).del(cell, node.id)?;
            }
            return Ok(());
        }

        Locations::new(self.txn)
            .put(node.id, Location { lat_e7: node.lat_e7, lon_e7: node.lon_e7, version: node.meta.version })?;

        if node.tags.is_empty() {
            Elements::new(self.txn, Table::Nodes).del(node.id)?;
        } else {
            Elements::new(self.txn, Table::Nodes).put(node.id, codec::encode_node(node)?)?;
        }

        let new_cell = spatial::cell_id(node.lat_e7, node.lon_e7);
        if prev_cell != Some(new_cell) {
            if let Some(cell) = prev_cell {
                CellIndex::new(self.txn).del(cell, node.id)?;
            }
            CellIndex::new(self.txn).put(new_cell, node.id)?;
        }
        Ok(())
    }

    fn apply_way(&mut self, way: &Way) -> CResult<()> {
        let prev_nodes = match Elements::new(self.txn, Table::Ways).get(way.id)? {
            Some(bytes) => codec::decode_way(&bytes)?.nodes,
            None => Vec::new(),
        };

        if !way.visible {
            Elements::new(self.txn, Table::Ways).del(way.id)?;
            for node_id in prev_nodes {
                Index::new(self.txn, Table::NodeWay).del(node_id, way.id)?;
            }
            return Ok(());
        }

        Elements::new(self.txn, Table::Ways).put(way.id, codec::encode_way(way)?)?;
        diff_member_set(
            self.txn,
            Table::NodeWay,
            way.id,
            &prev_nodes,
            &way.nodes,
        )?;
        Ok(())
    }

    fn apply_relation(&mut self, relation: &Relation) -> CResult<()> {
        let prev_members = match Elements::new(self.txn, Table::Relations).get(relation.id)? {
            Some(bytes) => codec::decode_relation(&bytes)?.members,
            None => Vec::new(),
        };

        if !relation.visible {
            Elements::new(self.txn, Table::Relations).del(relation.id)?;
            for member in &prev_members {
                del_relation_member(self.txn, relation.id, member)?;
            }
            return Ok(());
        }

        Elements::new(self.txn, Table::Relations).put(relation.id, codec::encode_relation(relation)?)?;

        let prev_by_kind = partition_by_kind(&prev_members);
        let new_by_kind = partition_by_kind(&relation.members);

        diff_member_set(self.txn, Table::NodeRelation, relation.id, &prev_by_kind.0, &new_by_kind.0)?;
        diff_member_set(self.txn, Table::WayRelation, relation.id, &prev_by_kind.1, &new_by_kind.1)?;
        diff_member_set(
            self.txn,
            Table::RelationRelation,
            relation.id,
            &prev_by_kind.2,
            &new_by_kind.2,
        )?;
        Ok(())
    }
}

fn partition_by_kind(members: &[Member]) -> (Vec<EntityId>, Vec<EntityId>, Vec<EntityId>) {
    let mut nodes = Vec::new();
    let mut ways = Vec::new();
    let mut relations = Vec::new();
    for member in members {
        match member.kind {
            MemberKind::Node => nodes.push(member.id),
            MemberKind::Way => ways.push(member.id),
            MemberKind::Relation => relations.push(member.id),
        }
    }
    (nodes, ways, relations)
}

fn del_relation_member<E: Engine>(
    txn: &mut Txn<'_, E>,
    relation_id: EntityId,
    member: &Member,
) -> CResult<()> {
    let table = match member.kind {
        MemberKind::Node => Table::NodeRelation,
        MemberKind::Way => Table::WayRelation,
        MemberKind::Relation => Table::RelationRelation,
    };
    Index::new(txn, table).del(member.id, relation_id)
}

/// Diffs a parent's reverse-index rows for one member kind: removes rows
/// for members that were dropped, adds rows for members that are new, and
/// leaves retained members untouched so unchanged membership never incurs
/// a write.
fn diff_member_set<E: Engine>(
    txn: &mut Txn<'_, E>,
    table: Table,
    parent_id: EntityId,
    prev: &[EntityId],
    new: &[EntityId],
) -> CResult<()> {
    let prev_set: HashSet<EntityId> = prev.iter().copied().collect();
    let new_set: HashSet<EntityId> = new.iter().copied().collect();

    for &member_id in &prev_set {
        if !new_set.contains(&member_id) {
            Index::new(txn, table).del(member_id, parent_id)?;
        }
    }
    for &member_id in &new_set {
        if !prev_set.contains(&member_id) {
            Index::new(txn, table).put(member_id, parent_id)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::Memory;
    use crate::model::Meta;
    use crate::txn::Env;

    fn env() -> Env<Memory> {
        Env::new(Memory::new())
    }

    fn meta() -> Meta {
        Meta::default()
    }

    #[test]
    fn creating_node_populates_locations_and_cell_index() {
        let env = env();
        let mut txn = env.begin_rw().unwrap();
        let node = Node {
            id: 1,
            visible: true,
            meta: meta(),
            tags: vec![("amenity".into(), "cafe".into())],
            lat_e7: 10_000_000,
            lon_e7: 20_000_000,
        };
        WriteHandler::new(&mut txn).apply(&ChangeEvent::Node(node.clone())).unwrap();

        let loc = Locations::new(&mut txn).get(1).unwrap().unwrap();
        assert_eq!((loc.lat_e7, loc.lon_e7), (10_000_000, 20_000_000));
        assert!(Elements::new(&mut txn, Table::Nodes).exists(1).unwrap());

        let cell = spatial::cell_id(10_000_000, 20_000_000);
        assert_eq!(CellIndex::new(&mut txn).iterate(cell).unwrap(), vec![1]);
    }

    #[test]
    fn tagless_node_has_no_nodes_row() {
        let env = env();
        let mut txn = env.begin_rw().unwrap();
        let node = Node { id: 1, visible: true, meta: meta(), tags: vec![], lat_e7: 0, lon_e7: 0 };
        WriteHandler::new(&mut txn).apply(&ChangeEvent::Node(node)).unwrap();
        assert!(!Elements::new(&mut txn, Table::Nodes).exists(1).unwrap());
    }

    #[test]
    fn deleting_node_removes_location_and_cell_entry() {
        let env = env();
        let mut txn = env.begin_rw().unwrap();
        let node = Node { id: 1, visible: true, meta: meta(), tags: vec![], lat_e7: 5, lon_e7: 5 };
        WriteHandler::new(&mut txn).apply(&ChangeEvent::Node(node)).unwrap();

        let deleted =
            Node { id: 1, visible: false, meta: meta(), tags: vec![], lat_e7: 0, lon_e7: 0 };
        WriteHandler::new(&mut txn).apply(&ChangeEvent::Node(deleted)).unwrap();

        assert_eq!(Locations::new(&mut txn).get(1).unwrap(), None);
        let cell = spatial::cell_id(5, 5);
        assert!(CellIndex::new(&mut txn).iterate(cell).unwrap().is_empty());
    }

    #[test]
    fn way_creation_populates_node_way_index() {
        let env = env();
        let mut txn = env.begin_rw().unwrap();
        let way = Way { id: 10, visible: true, meta: meta(), tags: vec![], nodes: vec![1, 2] };
        WriteHandler::new(&mut txn).apply(&ChangeEvent::Way(way)).unwrap();
        assert_eq!(Index::new(&mut txn, Table::NodeWay).iterate(1).unwrap(), vec![10]);
        assert_eq!(Index::new(&mut txn, Table::NodeWay).iterate(2).unwrap(), vec![10]);
    }

    #[test]
    fn way_node_list_change_only_touches_delta() {
        let env = env();
        let mut txn = env.begin_rw().unwrap();
        let way = Way { id: 10, visible: true, meta: meta(), tags: vec![], nodes: vec![1, 2] };
        WriteHandler::new(&mut txn).apply(&ChangeEvent::Way(way)).unwrap();

        let updated = Way { id: 10, visible: true, meta: meta(), tags: vec![], nodes: vec![2, 3] };
        WriteHandler::new(&mut txn).apply(&ChangeEvent::Way(updated)).unwrap();

        assert!(Index::new(&mut txn, Table::NodeWay).iterate(1).unwrap().is_empty());
        assert_eq!(Index::new(&mut txn, Table::NodeWay).iterate(2).unwrap(), vec![10]);
        assert_eq!(Index::new(&mut txn, Table::NodeWay).iterate(3).unwrap(), vec![10]);
    }

    #[test]
    fn deleting_way_clears_node_way_index() {
        let env = env();
        let mut txn = env.begin_rw().unwrap();
        let way = Way { id: 10, visible: true, meta: meta(), tags: vec![], nodes: vec![1, 2] };
        WriteHandler::new(&mut txn).apply(&ChangeEvent::Way(way)).unwrap();

        let deleted = Way { id: 10, visible: false, meta: meta(), tags: vec![], nodes: vec![] };
        WriteHandler::new(&mut txn).apply(&ChangeEvent::Way(deleted)).unwrap();

        assert!(!Elements::new(&mut txn, Table::Ways).exists(10).unwrap());
        assert!(Index::new(&mut txn, Table::NodeWay).iterate(1).unwrap().is_empty());
        assert!(Index::new(&mut txn, Table::NodeWay).iterate(2).unwrap().is_empty());
    }

    #[test]
    fn relation_maintains_per_kind_reverse_indexes() {
        let env = env();
        let mut txn = env.begin_rw().unwrap();
        let relation = Relation {
            id: 100,
            visible: true,
            meta: meta(),
            tags: vec![],
            members: vec![
                Member { kind: MemberKind::Way, id: 10, role: "outer".into() },
                Member { kind: MemberKind::Node, id: 1, role: "".into() },
            ],
        };
        WriteHandler::new(&mut txn).apply(&ChangeEvent::Relation(relation)).unwrap();
        assert_eq!(Index::new(&mut txn, Table::WayRelation).iterate(10).unwrap(), vec![100]);
        assert_eq!(Index::new(&mut txn, Table::NodeRelation).iterate(1).unwrap(), vec![100]);
    }

    #[test]
    fn deleting_relation_removes_all_reverse_index_rows() {
        let env = env();
        let mut txn = env.begin_rw().unwrap();
        let relation = Relation {
            id: 100,
            visible: true,
            meta: meta(),
            tags: vec![],
            members: vec![Member { kind: MemberKind::Node, id: 1, role: "".into() }],
        };
        WriteHandler::new(&mut txn).apply(&ChangeEvent::Relation(relation)).unwrap();

        let deleted =
            Relation { id: 100, visible: false, meta: meta(), tags: vec![], members: vec![] };
        WriteHandler::new(&mut txn).apply(&ChangeEvent::Relation(deleted)).unwrap();

        assert!(Index::new(&mut txn, Table::NodeRelation).iterate(1).unwrap().is_empty());
    }

    #[test]
    fn id_reuse_after_deletion_succeeds() {
        let env = env();
        let mut txn = env.begin_rw().unwrap();
        let node = Node { id: 1, visible: true, meta: meta(), tags: vec![], lat_e7: 1, lon_e7: 1 };
        WriteHandler::new(&mut txn).apply(&ChangeEvent::Node(node)).unwrap();
        let deleted =
            Node { id: 1, visible: false, meta: meta(), tags: vec![], lat_e7: 0, lon_e7: 0 };
        WriteHandler::new(&mut txn).apply(&ChangeEvent::Node(deleted)).unwrap();
        let recreated =
            Node { id: 1, visible: true, meta: meta(), tags: vec![], lat_e7: 9, lon_e7: 9 };
        WriteHandler::new(&mut txn).apply(&ChangeEvent::Node(recreated)).unwrap();
        assert_eq!(Locations::new(&mut txn).get(1).unwrap().unwrap().lat_e7, 9);
    }
}
