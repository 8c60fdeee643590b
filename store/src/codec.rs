//! Binary record encode/decode for the three entity kinds.
//!
//! Uses `bincode` over the `serde`-derived structs in [`crate::model`]: a
//! schema-driven, bit-exact, forward-ordered encoder that already satisfies
//! the "byte-identical records" requirement without any hand-rolled
//! framing on top.

use crate::error::CResult;
use crate::model::{Node, Relation, Way};

/// The on-disk `nodes` record omits location (it lives in `locations`), so
/// the codec operates on this header+tags-only view rather than the full
/// [`Node`].
#[derive(Clone, Debug, PartialEq, serde_derive::Serialize, serde_derive::Deserialize)]
pub struct NodeRecord {
    pub meta: crate::model::Meta,
    pub tags: crate::model::Tags,
}

impl From<&Node> for NodeRecord {
    fn from(node: &Node) -> Self {
        NodeRecord { meta: node.meta.clone(), tags: node.tags.clone() }
    }
}

pub fn encode_node(node: &Node) -> CResult<Vec<u8>> {
    Ok(bincode::serialize(&NodeRecord::from(node))?)
}

pub fn decode_node(bytes: &[u8]) -> CResult<NodeRecord> {
    Ok(bincode::deserialize(bytes)?)
}

pub fn encode_way(way: &Way) -> CResult<Vec<u8>> {
    Ok(bincode::serialize(way)?)
}

pub fn decode_way(bytes: &[u8]) -> CResult<Way> {
    Ok(bincode::deserialize(bytes)?)
}

pub fn encode_relation(relation: &Relation) -> CResult<Vec<u8>> {
    Ok(bincode::serialize(relation)?)
}

pub fn decode_relation(bytes: &[u8]) -> CResult<Relation> {
    Ok(bincode::deserialize(bytes)?)
}
