//! Entity shapes shared by the write handler, diff handler, and codec.
//!
//! Mirrors the three OSM entity kinds described in the store schema: each
//! is identified by a signed 64-bit id unique within its own kind.

use serde_derive::{Deserialize, Serialize};

pub type EntityId = i64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub lat_e7: i32,
    pub lon_e7: i32,
    pub version: i32,
}

/// Common metadata carried by every entity kind's codec header.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    pub version: i32,
    pub timestamp: i64,
    pub changeset: i64,
    pub uid: i32,
    pub user: String,
}

pub type Tags = Vec<(String, String)>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: EntityId,
    pub visible: bool,
    pub meta: Meta,
    pub tags: Tags,
    pub lat_e7: i32,
    pub lon_e7: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Way {
    pub id: EntityId,
    pub visible: bool,
    pub meta: Meta,
    pub tags: Tags,
    pub nodes: Vec<EntityId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberKind {
    Node,
    Way,
    Relation,
}

impl MemberKind {
    pub fn as_tag(self) -> u8 {
        match self {
            MemberKind::Node => 0,
            MemberKind::Way => 1,
            MemberKind::Relation => 2,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(MemberKind::Node),
            1 => Some(MemberKind::Way),
            2 => Some(MemberKind::Relation),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub kind: MemberKind,
    pub id: EntityId,
    pub role: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub id: EntityId,
    pub visible: bool,
    pub meta: Meta,
    pub tags: Tags,
    pub members: Vec<Member>,
}

/// A node geometry attached to a member of a way or relation, resolved
/// during the diff pass and carried along so the emitter never needs to
/// look anything up again.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeGeometry {
    pub id: EntityId,
    pub lat_e7: i32,
    pub lon_e7: i32,
}
