//! The two-pass augmented-diff constructor: [`handler::DiffHandler`] reads
//! pre-state from the Store and merges it with change events;
//! [`relation_resolver::RelationResolver`] makes sure every referenced
//! relation gets a full entry even if it only appears by reference in the
//! change file; [`emitter::DiffEmitter`] turns the result into a
//! deterministic, XML-agnostic tree that `onramp-cli::adiff` renders.

pub mod emitter;
pub mod handler;
pub mod relation_resolver;

use crate::model::{EntityId, Meta, Tags};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Create,
    Modify,
    Delete,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Modify => "modify",
            Action::Delete => "delete",
        }
    }
}

/// A node's full image, used for a diff entry's `new` side and whenever a
/// node's own full record must be embedded (its own create/modify/delete
/// entry).
#[derive(Clone, Debug, PartialEq)]
pub struct DiffNode {
    pub id: EntityId,
    pub visible: bool,
    pub meta: Meta,
    pub tags: Tags,
    pub lat_e7: i32,
    pub lon_e7: i32,
}

/// A node's pre-image as embedded in an `<old>` block: id and location
/// only. Matches the design note on old-image fidelity — tags, version,
/// timestamp, changeset, uid and user are not reconstructed because the
/// primary store evicts `nodes[id]` rows for tagless nodes, so a faithful
/// old record isn't always recoverable anyway.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OldNode {
    pub id: EntityId,
    pub lat_e7: i32,
    pub lon_e7: i32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Envelope {
    pub min_lat_e7: i32,
    pub min_lon_e7: i32,
    pub max_lat_e7: i32,
    pub max_lon_e7: i32,
}

impl Envelope {
    /// Computes a bounding box from whichever node refs carry a resolved
    /// location; refs with no location (spec.md §9: "emit entity with
    /// missing location attribute omitted, continue") don't contribute a
    /// point. Returns `None` if no ref in the list has a location.
    pub fn of(nodes: &[NodeRef]) -> Option<Self> {
        let mut points = nodes.iter().filter_map(|n| match n {
            NodeRef::WithLocation(geom) => Some(*geom),
            NodeRef::WithoutLocation(_) => None,
        });
        let first = points.next()?;
        let mut envelope = Envelope {
            min_lat_e7: first.lat_e7,
            min_lon_e7: first.lon_e7,
            max_lat_e7: first.lat_e7,
            max_lon_e7: first.lon_e7,
        };
        for point in points {
            envelope.min_lat_e7 = envelope.min_lat_e7.min(point.lat_e7);
            envelope.min_lon_e7 = envelope.min_lon_e7.min(point.lon_e7);
            envelope.max_lat_e7 = envelope.max_lat_e7.max(point.lat_e7);
            envelope.max_lon_e7 = envelope.max_lon_e7.max(point.lon_e7);
        }
        Some(envelope)
    }
}

/// A node reference within a way or way-member node list: the ref is
/// always present, but its location may not be, e.g. a way referencing a
/// node the store (and this change) has no location for. spec.md §9 calls
/// for the ref to still be emitted, with the location attribute omitted.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NodeRef {
    WithLocation(crate::model::NodeGeometry),
    WithoutLocation(EntityId),
}

impl NodeRef {
    pub fn id(&self) -> EntityId {
        match self {
            NodeRef::WithLocation(geom) => geom.id,
            NodeRef::WithoutLocation(id) => *id,
        }
    }
}

/// A way's image for either side of a diff entry: the node list resolved
/// to coordinates where possible. Ways compute a bounding-box envelope
/// (the original's `way.envelope()`); relations deliberately don't, see
/// [`RelationEntry`].
#[derive(Clone, Debug, PartialEq)]
pub struct DiffWay {
    pub id: EntityId,
    pub visible: bool,
    pub meta: Meta,
    pub tags: Tags,
    pub nodes: Vec<NodeRef>,
    pub envelope: Option<Envelope>,
}

/// A relation member as it appears in a diff entry: bare reference plus,
/// for node/way members, the resolved geometry needed to render it without
/// further lookups. Relation members stay bare — member geometry of a
/// sub-relation is never expanded, both because spec.md doesn't require it
/// and because relations can reference each other cyclically. `None` means
/// a node member whose location could not be resolved (the referenced
/// node doesn't exist in the store); the bare member reference is still
/// emitted, per spec.md §9.
#[derive(Clone, Debug, PartialEq)]
pub enum MemberGeometry {
    Node(crate::model::NodeGeometry),
    Way(Vec<NodeRef>),
    Relation,
    None,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DiffMember {
    pub kind: crate::model::MemberKind,
    pub id: EntityId,
    pub role: String,
    pub geometry: MemberGeometry,
}

/// A relation's image for either side of a diff entry. No envelope field:
/// the original source computes bounding boxes for ways only and leaves a
/// TODO for relations; this implementation follows that split explicitly
/// (see DESIGN.md) rather than silently carrying the TODO forward.
#[derive(Clone, Debug, PartialEq)]
pub struct DiffRelation {
    pub id: EntityId,
    pub visible: bool,
    pub meta: Meta,
    pub tags: Tags,
    pub members: Vec<DiffMember>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NodeEntry {
    pub id: EntityId,
    pub action: Action,
    pub old: Option<OldNode>,
    pub new: DiffNode,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WayEntry {
    pub id: EntityId,
    pub action: Action,
    pub old: Option<DiffWay>,
    pub new: DiffWay,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RelationEntry {
    pub id: EntityId,
    pub action: Action,
    pub old: Option<DiffRelation>,
    pub new: DiffRelation,
}

/// The finished, ordering-normalized diff, ready for the emitter's
/// consumer to render: ascending id within each kind, nodes then ways then
/// relations.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DiffDocument {
    pub nodes: Vec<NodeEntry>,
    pub ways: Vec<WayEntry>,
    pub relations: Vec<RelationEntry>,
}
