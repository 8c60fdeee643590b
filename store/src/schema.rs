//! Table tags and key-encoding helpers for the ten named sub-maps of
//! spec.md §3, all multiplexed into a single `Engine`'s flat byte-string
//! keyspace via a one-byte table prefix.

use crate::model::EntityId;

/// One byte prepended to every key so a single flat `Engine` keyspace can
/// hold every logical table without collisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Table {
    Locations,
    Nodes,
    Ways,
    Relations,
    CellNode,
    NodeWay,
    NodeRelation,
    WayRelation,
    RelationRelation,
    Metadata,
}

impl Table {
    pub fn tag(self) -> u8 {
        match self {
            Table::Locations => 0,
            Table::Nodes => 1,
            Table::Ways => 2,
            Table::Relations => 3,
            Table::CellNode => 4,
            Table::NodeWay => 5,
            Table::NodeRelation => 6,
            Table::WayRelation => 7,
            Table::RelationRelation => 8,
            Table::Metadata => 9,
        }
    }
}

pub const SIGN_BIT: u64 = 1 << 63;

/// Encodes a signed OSM id as a big-endian order-preserving byte string:
/// flipping the sign bit maps `i64::MIN..=i64::MAX` onto `u64::MIN..=MAX`
/// while keeping numeric order, so a lexicographic scan over the encoded
/// keys visits ids in ascending numeric order, exactly as LMDB's native
/// unsigned integer key comparison does in the original.
pub fn encode_id(id: EntityId) -> [u8; 8] {
    ((id as u64) ^ SIGN_BIT).to_be_bytes()
}

pub fn decode_id(bytes: &[u8]) -> EntityId {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    (u64::from_be_bytes(buf) ^ SIGN_BIT) as i64
}

/// Builds a primary-table or locations-table key: one tag byte followed by
/// the encoded id.
pub fn primary_key(table: Table, id: EntityId) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(table.tag());
    key.extend_from_slice(&encode_id(id));
    key
}

/// Builds a multi-value index key: tag byte, then `k1`, then `k2`,
/// concatenated so a prefix scan over `tag ++ k1` enumerates every `k2`
/// paired with it.
pub fn index_key(table: Table, k1: EntityId, k2: EntityId) -> Vec<u8> {
    let mut key = Vec::with_capacity(17);
    key.push(table.tag());
    key.extend_from_slice(&encode_id(k1));
    key.extend_from_slice(&encode_id(k2));
    key
}

/// The prefix that, scanned, enumerates every `k2` paired with `k1` in the
/// given index table.
pub fn index_prefix(table: Table, k1: EntityId) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(table.tag());
    key.extend_from_slice(&encode_id(k1));
    key
}

/// Extracts the `k2` half of an index key previously built with
/// [`index_key`].
pub fn index_key_k2(key: &[u8]) -> EntityId {
    decode_id(&key[9..17])
}

pub fn cell_node_key(cell_id: u64, node_id: EntityId) -> Vec<u8> {
    let mut key = Vec::with_capacity(17);
    key.push(Table::CellNode.tag());
    key.extend_from_slice(&cell_id.to_be_bytes());
    key.extend_from_slice(&encode_id(node_id));
    key
}

pub fn cell_node_prefix(cell_id: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(Table::CellNode.tag());
    key.extend_from_slice(&cell_id.to_be_bytes());
    key
}

pub fn cell_node_key_node_id(key: &[u8]) -> EntityId {
    decode_id(&key[9..17])
}

pub const SEQUENCE_NUMBER_KEY: &str = "osmosis_replication_sequence_number";
pub const REPLICATION_TIMESTAMP_KEY: &str = "osmosis_replication_timestamp";

pub fn metadata_key(name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + name.len());
    key.push(Table::Metadata.tag());
    key.extend_from_slice(name.as_bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_encoding_preserves_signed_order() {
        let mut ids = vec![-5i64, -1, 0, 1, 5, i64::MIN, i64::MAX];
        let encoded: Vec<_> = ids.iter().map(|&id| encode_id(id)).collect();
        let mut sorted_by_encoding = encoded.clone();
        sorted_by_encoding.sort();
        ids.sort();
        let resorted: Vec<_> = sorted_by_encoding.iter().map(|bytes| decode_id(bytes)).collect();
        assert_eq!(resorted, ids);
    }

    #[test]
    fn id_roundtrips() {
        for id in [0, 1, -1, 42, -42, i64::MIN, i64::MAX] {
            assert_eq!(decode_id(&encode_id(id)), id);
        }
    }

    #[test]
    fn index_key_k2_roundtrips() {
        let key = index_key(Table::NodeWay, 7, 9);
        assert_eq!(index_key_k2(&key), 9);
        assert!(key.starts_with(&index_prefix(Table::NodeWay, 7)));
    }
}
