//! Core of the augmented-diff construction. Drives the second pass over
//! the change stream with the Store in read-only mode.
//!
//! Grounded in `examples/original_source/src/onramp_update_handler.cpp`'s
//! `node_added`/`node_changed`/`node_deleted`, `way_added`/`way_changed`/
//! `way_deleted`, `relation_added`/`relation_changed`/`relation_deleted`,
//! and their `create_old_*`/`create_new_*` backfill helpers. The
//! per-relation member-offset maps (`old_relation_member_offsets`/
//! `new_relation_member_offsets`) are carried over as-is.

use crate::buffer::{EntityBuffer, Offset};
use crate::codec;
use crate::diff::{
    Action, DiffMember, DiffNode, DiffRelation, DiffWay, Envelope, MemberGeometry, NodeRef, OldNode,
};
use crate::engine::Engine;
use crate::error::CResult;
use crate::model::{EntityId, Member, MemberKind, Node, NodeGeometry, Relation, Way};
use crate::schema::Table;
use crate::txn::{Elements, Locations, Txn};
use std::collections::HashMap;

enum NodeRecord {
    New(DiffNode),
    Old(OldNode),
}

/// Which buffer (and offset within it) a relation member's geometry was
/// resolved to, so a later relation that shares a member with an earlier
/// one reuses the same record instead of resolving it twice.
#[derive(Clone, Copy)]
enum MemberOffset {
    Node(Offset),
    Way(Offset),
    Relation,
}

struct EntitySlot {
    action: Action,
    new_offset: Offset,
    old_offset: Option<Offset>,
}

pub struct DiffHandler<'txn, 'env, E: Engine> {
    txn: &'txn mut Txn<'env, E>,

    node_buffer: EntityBuffer<NodeRecord>,
    way_buffer: EntityBuffer<DiffWay>,
    relation_buffer: EntityBuffer<DiffRelation>,

    node_map: HashMap<EntityId, EntitySlot>,
    way_map: HashMap<EntityId, EntitySlot>,
    relation_map: HashMap<EntityId, EntitySlot>,

    /// Geometry for nodes touched by this change's own node events, keyed
    /// by id, consulted before falling back to the store when resolving a
    /// way or relation's *new* image.
    touched_node_geometry: HashMap<EntityId, NodeGeometry>,

    new_relation_member_offsets: HashMap<EntityId, HashMap<EntityId, MemberOffset>>,
    old_relation_member_offsets: HashMap<EntityId, HashMap<EntityId, MemberOffset>>,
}

impl<'txn, 'env, E: Engine> DiffHandler<'txn, 'env, E> {
    pub fn new(txn: &'txn mut Txn<'env, E>) -> Self {
        Self {
            txn,
            node_buffer: EntityBuffer::new(),
            way_buffer: EntityBuffer::new(),
            relation_buffer: EntityBuffer::new(),
            node_map: HashMap::new(),
            way_map: HashMap::new(),
            relation_map: HashMap::new(),
            touched_node_geometry: HashMap::new(),
            new_relation_member_offsets: HashMap::new(),
            old_relation_member_offsets: HashMap::new(),
        }
    }

    pub fn has_relation(&self, id: EntityId) -> bool {
        self.relation_map.contains_key(&id)
    }

    /// Resolves a node's *new* geometry: this change's own event for the
    /// node if there is one, otherwise the pre-change location from the
    /// store (correct for an unchanged node, since the store hasn't been
    /// mutated yet).
    fn resolve_new_geometry(&mut self, id: EntityId) -> CResult<Option<NodeGeometry>> {
        if let Some(geom) = self.touched_node_geometry.get(&id) {
            return Ok(Some(*geom));
        }
        self.resolve_store_geometry(id)
    }

    /// Resolves a node's pre-change geometry, always from the store: the
    /// store is read-only for this entire pass, so it already holds
    /// exactly the pre-image regardless of whether the node itself
    /// changed.
    fn resolve_store_geometry(&mut self, id: EntityId) -> CResult<Option<NodeGeometry>> {
        Ok(Locations::new(self.txn)
            .get(id)?
            .map(|loc| NodeGeometry { id, lat_e7: loc.lat_e7, lon_e7: loc.lon_e7 }))
    }

    pub fn on_node(&mut self, node: &Node) -> CResult<()> {
        let existed = Locations::new(self.txn).exists(node.id)?;
        let action = if !node.visible {
            Action::Delete
        } else if existed {
            Action::Modify
        } else {
            Action::Create
        };

        if node.visible {
            self.touched_node_geometry.insert(
                node.id,
                NodeGeometry { id: node.id, lat_e7: node.lat_e7, lon_e7: node.lon_e7 },
            );
        }

        let new_record = DiffNode {
            id: node.id,
            visible: node.visible,
            meta: node.meta.clone(),
            tags: node.tags.clone(),
            lat_e7: node.lat_e7,
            lon_e7: node.lon_e7,
        };
        let new_offset = self.node_buffer.push(NodeRecord::New(new_record));

        let old_offset = if action != Action::Create {
            self.resolve_store_geometry(node.id)?.map(|geom| {
                self.node_buffer.push(NodeRecord::Old(OldNode {
                    id: geom.id,
                    lat_e7: geom.lat_e7,
                    lon_e7: geom.lon_e7,
                }))
            })
        } else {
            None
        };

        self.node_map.insert(node.id, EntitySlot { action, new_offset, old_offset });
        Ok(())
    }

    pub fn on_way(&mut self, way: &Way) -> CResult<()> {
        let prev = Elements::new(self.txn, Table::Ways).get(way.id)?;
        let action = if !way.visible {
            Action::Delete
        } else if prev.is_some() {
            Action::Modify
        } else {
            Action::Create
        };

        let mut new_nodes = Vec::with_capacity(way.nodes.len());
        for &node_id in &way.nodes {
            new_nodes.push(match self.resolve_new_geometry(node_id)? {
                Some(geom) => NodeRef::WithLocation(geom),
                None => NodeRef::WithoutLocation(node_id),
            });
        }
        let new_way = DiffWay {
            id: way.id,
            visible: way.visible,
            meta: way.meta.clone(),
            tags: way.tags.clone(),
            envelope: Envelope::of(&new_nodes),
            nodes: new_nodes,
        };
        let new_offset = self.way_buffer.push(new_way);

        let old_offset = if action != Action::Create {
            let prev_node_ids = match &prev {
                Some(bytes) => codec::decode_way(bytes)?.nodes,
                None => Vec::new(),
            };
            let mut old_nodes = Vec::with_capacity(prev_node_ids.len());
            for node_id in prev_node_ids {
                old_nodes.push(match self.resolve_store_geometry(node_id)? {
                    Some(geom) => NodeRef::WithLocation(geom),
                    None => NodeRef::WithoutLocation(node_id),
                });
            }
            let old_way = DiffWay {
                id: way.id,
                visible: true,
                meta: crate::model::Meta::default(),
                tags: Vec::new(),
                envelope: None,
                nodes: old_nodes,
            };
            Some(self.way_buffer.push(old_way))
        } else {
            None
        };

        self.way_map.insert(way.id, EntitySlot { action, new_offset, old_offset });
        Ok(())
    }

    pub fn on_relation(&mut self, relation: &Relation) -> CResult<()> {
        let prev = Elements::new(self.txn, Table::Relations).get(relation.id)?;
        let action = if !relation.visible {
            Action::Delete
        } else if prev.is_some() {
            Action::Modify
        } else {
            Action::Create
        };

        let mut new_member_offsets = HashMap::new();
        let new_members = self.resolve_members(&relation.members, false, &mut new_member_offsets)?;
        let new_relation = DiffRelation {
            id: relation.id,
            visible: relation.visible,
            meta: relation.meta.clone(),
            tags: relation.tags.clone(),
            members: new_members,
        };
        let new_offset = self.relation_buffer.push(new_relation);
        self.new_relation_member_offsets.insert(relation.id, new_member_offsets);

        let old_offset = if action != Action::Create {
            let prev_members = match &prev {
                Some(bytes) => codec::decode_relation(bytes)?.members,
                None => Vec::new(),
            };
            let mut old_member_offsets = HashMap::new();
            let old_members =
                self.resolve_members(&prev_members, true, &mut old_member_offsets)?;
            let old_relation = DiffRelation {
                id: relation.id,
                visible: true,
                meta: crate::model::Meta::default(),
                tags: Vec::new(),
                members: old_members,
            };
            self.old_relation_member_offsets.insert(relation.id, old_member_offsets);
            Some(self.relation_buffer.push(old_relation))
        } else {
            None
        };

        self.relation_map.insert(relation.id, EntitySlot { action, new_offset, old_offset });
        Ok(())
    }

    /// Resolves a member list into diff members with attached geometry.
    /// `for_old_image` selects whether node/way geometry is resolved
    /// against this change's events (new image) or strictly against the
    /// pre-mutation store (old image). Reuses an already-produced buffer
    /// record for a node or way that this pass already touched, per
    /// spec.md §4.F, instead of resolving (and storing) it twice.
    fn resolve_members(
        &mut self,
        members: &[Member],
        for_old_image: bool,
        offsets: &mut HashMap<EntityId, MemberOffset>,
    ) -> CResult<Vec<DiffMember>> {
        let mut resolved = Vec::with_capacity(members.len());
        for member in members {
            let geometry = match member.kind {
                MemberKind::Node => {
                    let slot = self.node_map.get(&member.id);
                    let geom = if let Some(slot) = slot {
                        let offset = if for_old_image {
                            slot.old_offset.unwrap_or(slot.new_offset)
                        } else {
                            slot.new_offset
                        };
                        offsets.insert(member.id, MemberOffset::Node(offset));
                        match self.node_buffer.get(offset) {
                            NodeRecord::New(n) => {
                                Some(NodeGeometry { id: n.id, lat_e7: n.lat_e7, lon_e7: n.lon_e7 })
                            }
                            NodeRecord::Old(n) => {
                                Some(NodeGeometry { id: n.id, lat_e7: n.lat_e7, lon_e7: n.lon_e7 })
                            }
                        }
                    } else {
                        let geom = self.resolve_store_geometry(member.id)?;
                        if let Some(geom) = geom {
                            let record = if for_old_image {
                                NodeRecord::Old(OldNode {
                                    id: geom.id,
                                    lat_e7: geom.lat_e7,
                                    lon_e7: geom.lon_e7,
                                })
                            } else {
                                NodeRecord::New(DiffNode {
                                    id: geom.id,
                                    visible: true,
                                    meta: crate::model::Meta::default(),
                                    tags: Vec::new(),
                                    lat_e7: geom.lat_e7,
                                    lon_e7: geom.lon_e7,
                                })
                            };
                            let offset = self.node_buffer.push(record);
                            offsets.insert(member.id, MemberOffset::Node(offset));
                        }
                        geom
                    };
                    match geom {
                        Some(geom) => MemberGeometry::Node(geom),
                        None => MemberGeometry::None,
                    }
                }
                MemberKind::Way => {
                    let slot = self.way_map.get(&member.id);
                    let nodes = if let Some(slot) = slot {
                        let offset = if for_old_image {
                            slot.old_offset.unwrap_or(slot.new_offset)
                        } else {
                            slot.new_offset
                        };
                        offsets.insert(member.id, MemberOffset::Way(offset));
                        self.way_buffer.get(offset).nodes.clone()
                    } else {
                        let way_node_ids = match Elements::new(self.txn, Table::Ways).get(member.id)? {
                            Some(bytes) => codec::decode_way(&bytes)?.nodes,
                            None => Vec::new(),
                        };
                        let mut node_refs = Vec::with_capacity(way_node_ids.len());
                        for node_id in way_node_ids {
                            node_refs.push(match self.resolve_store_geometry(node_id)? {
                                Some(geom) => NodeRef::WithLocation(geom),
                                None => NodeRef::WithoutLocation(node_id),
                            });
                        }
                        let record = DiffWay {
                            id: member.id,
                            visible: true,
                            meta: crate::model::Meta::default(),
                            tags: Vec::new(),
                            envelope: Envelope::of(&node_refs),
                            nodes: node_refs.clone(),
                        };
                        let offset = self.way_buffer.push(record);
                        offsets.insert(member.id, MemberOffset::Way(offset));
                        node_refs
                    };
                    MemberGeometry::Way(nodes)
                }
                MemberKind::Relation => {
                    offsets.insert(member.id, MemberOffset::Relation);
                    MemberGeometry::Relation
                }
            };

            resolved.push(DiffMember {
                kind: member.kind,
                id: member.id,
                role: member.role.clone(),
                geometry,
            });
        }
        Ok(resolved)
    }

    pub(crate) fn entries(
        self,
    ) -> (
        Vec<crate::diff::NodeEntry>,
        Vec<crate::diff::WayEntry>,
        Vec<crate::diff::RelationEntry>,
    ) {
        let node_buffer = self.node_buffer;
        let mut nodes: Vec<_> = self
            .node_map
            .into_iter()
            .map(|(id, slot)| {
                let new = match node_buffer.get(slot.new_offset) {
                    NodeRecord::New(n) => n.clone(),
                    NodeRecord::Old(_) => unreachable!("new_offset always points at a New record"),
                };
                let old = slot.old_offset.map(|offset| match node_buffer.get(offset) {
                    NodeRecord::Old(n) => *n,
                    NodeRecord::New(_) => unreachable!("old_offset always points at an Old record"),
                });
                crate::diff::NodeEntry { id, action: slot.action, old, new }
            })
            .collect();
        nodes.sort_by_key(|e| e.id);

        let way_buffer = self.way_buffer;
        let mut ways: Vec<_> = self
            .way_map
            .into_iter()
            .map(|(id, slot)| {
                let new = way_buffer.get(slot.new_offset).clone();
                let old = slot.old_offset.map(|offset| way_buffer.get(offset).clone());
                crate::diff::WayEntry { id, action: slot.action, old, new }
            })
            .collect();
        ways.sort_by_key(|e| e.id);

        let relation_buffer = self.relation_buffer;
        let mut relations: Vec<_> = self
            .relation_map
            .into_iter()
            .map(|(id, slot)| {
                let new = relation_buffer.get(slot.new_offset).clone();
                let old = slot.old_offset.map(|offset| relation_buffer.get(offset).clone());
                crate::diff::RelationEntry { id, action: slot.action, old, new }
            })
            .collect();
        relations.sort_by_key(|e| e.id);

        (nodes, ways, relations)
    }
}
