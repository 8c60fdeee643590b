//! Typed, transactional access over a single flat [`crate::engine::Engine`]
//! keyspace.
//!
//! Grounded in the teacher's `kv` crate's use of an `Arc<RwLock<E>>`-backed
//! environment, but replacing the teacher's (incomplete) MVCC version chain
//! with a plain `RwLock`: a read-only transaction holds the read guard for
//! its whole lifetime, which is exactly the "one read-only transaction
//! spans the entire diff pass" contract of spec.md §5 — no writer can even
//! begin until every reader has dropped its guard, so a would-be writer
//! waits rather than racing. A read-write transaction holds the write guard
//! plus a staged overlay; `commit` replays the overlay into the engine,
//! `abort` just drops it, leaving the engine provably untouched.

use crate::engine::Engine;
use crate::error::CResult;
use crate::model::{EntityId, Location};
use crate::schema::{self, Table};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// An open store environment. Cloning is cheap (it's a handle around an
/// `Arc`); every clone shares the same underlying engine and lock.
#[derive(Clone)]
pub struct Env<E: Engine> {
    engine: Arc<RwLock<E>>,
}

impl<E: Engine> Env<E> {
    pub fn new(engine: E) -> Self {
        Self { engine: Arc::new(RwLock::new(engine)) }
    }

    /// Starts a read-only transaction. Blocks until no writer holds the
    /// lock; once acquired, the transaction observes a consistent snapshot
    /// for its entire lifetime, since no writer can acquire the write lock
    /// while this read guard is held.
    pub fn begin_ro(&self) -> CResult<Txn<'_, E>> {
        let guard =
            self.engine.read().map_err(|_| crate::error::Error::Internal("lock poisoned".into()))?;
        Ok(Txn::Ro(guard))
    }

    /// Starts a read-write transaction. Blocks until every reader and any
    /// other writer has released the lock.
    pub fn begin_rw(&self) -> CResult<Txn<'_, E>> {
        let guard = self
            .engine
            .write()
            .map_err(|_| crate::error::Error::Internal("lock poisoned".into()))?;
        Ok(Txn::Rw { guard, overlay: BTreeMap::new() })
    }
}

/// A write-overlay entry: `Some(value)` for a set, `None` for a delete.
type Overlay = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

pub enum Txn<'env, E: Engine> {
    Ro(RwLockReadGuard<'env, E>),
    Rw { guard: RwLockWriteGuard<'env, E>, overlay: Overlay },
}

impl<'env, E: Engine> Txn<'env, E> {
    pub fn get(&mut self, key: &[u8]) -> CResult<Option<Vec<u8>>> {
        match self {
            Txn::Ro(guard) => guard.get(key),
            Txn::Rw { guard, overlay } => match overlay.get(key) {
                Some(value) => Ok(value.clone()),
                None => guard.get(key),
            },
        }
    }

    pub fn set(&mut self, key: &[u8], value: Vec<u8>) -> CResult<()> {
        match self {
            Txn::Ro(_) => Err(crate::error::Error::Internal(
                "cannot write through a read-only transaction".into(),
            )),
            Txn::Rw { overlay, .. } => {
                overlay.insert(key.to_vec(), Some(value));
                Ok(())
            }
        }
    }

    pub fn delete(&mut self, key: &[u8]) -> CResult<()> {
        match self {
            Txn::Ro(_) => Err(crate::error::Error::Internal(
                "cannot write through a read-only transaction".into(),
            )),
            Txn::Rw { overlay, .. } => {
                overlay.insert(key.to_vec(), None);
                Ok(())
            }
        }
    }

    /// Scans a prefix, merging the write overlay over the underlying
    /// engine's committed data. Only used by read-write transactions for
    /// index-diffing (the diff pass only ever reads through a read-only
    /// transaction, which can scan the engine directly).
    pub fn scan_prefix(&mut self, prefix: &[u8]) -> CResult<Vec<(Vec<u8>, Vec<u8>)>> {
        match self {
            Txn::Ro(guard) => guard.scan_prefix(prefix).collect(),
            Txn::Rw { guard, overlay } => {
                let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
                    guard.scan_prefix(prefix).collect::<CResult<BTreeMap<_, _>>>()?;
                for (key, value) in overlay.range(prefix.to_vec()..) {
                    if !key.starts_with(prefix) {
                        break;
                    }
                    match value {
                        Some(value) => {
                            merged.insert(key.clone(), value.clone());
                        }
                        None => {
                            merged.remove(key);
                        }
                    }
                }
                Ok(merged.into_iter().collect())
            }
        }
    }

    /// Applies the overlay to the engine as a single group and flushes.
    /// No-op for a read-only transaction.
    ///
    /// [`Engine::apply_batch`] groups the overlay's writes into one log
    /// record on engines that support it (`BitCask`), so a crash before the
    /// following flush can't leave some of a commit's sub-map writes
    /// applied and others not — recovery discards the whole group if it's
    /// truncated. See `engine::log`'s module docs for how the grouping
    /// works on disk.
    pub fn commit(self) -> CResult<()> {
        match self {
            Txn::Ro(_) => Ok(()),
            Txn::Rw { mut guard, overlay } => {
                guard.apply_batch(overlay.into_iter().collect())?;
                guard.flush()
            }
        }
    }

    /// Drops the overlay without touching the engine. The engine is left
    /// exactly as it was before the transaction began.
    pub fn abort(self) {}

    /// Drops and reacquires the underlying lock guard, so a long-lived
    /// read-only transaction observes any commit made since it began.
    /// Mirrors LMDB's `mdb_txn_renew`.
    pub fn renew(self, env: &'env Env<E>) -> CResult<Txn<'env, E>> {
        drop(self);
        env.begin_ro()
    }
}

/// Typed view over the `locations` table.
pub struct Locations<'txn, 'env, E: Engine> {
    txn: &'txn mut Txn<'env, E>,
}

impl<'txn, 'env, E: Engine> Locations<'txn, 'env, E> {
    pub fn new(txn: &'txn mut Txn<'env, E>) -> Self {
        Self { txn }
    }

    pub fn get(&mut self, id: EntityId) -> CResult<Option<Location>> {
        let key = schema::primary_key(Table::Locations, id);
        Ok(self.txn.get(&key)?.map(|bytes| decode_location(&bytes)))
    }

    pub fn put(&mut self, id: EntityId, location: Location) -> CResult<()> {
        let key = schema::primary_key(Table::Locations, id);
        self.txn.set(&key, encode_location(location))
    }

    pub fn del(&mut self, id: EntityId) -> CResult<()> {
        let key = schema::primary_key(Table::Locations, id);
        self.txn.delete(&key)
    }

    pub fn exists(&mut self, id: EntityId) -> CResult<bool> {
        Ok(self.get(id)?.is_some())
    }
}

fn encode_location(location: Location) -> Vec<u8> {
    let mut buf = Vec::with_capacity(12);
    buf.extend_from_slice(&location.lat_e7.to_be_bytes());
    buf.extend_from_slice(&location.lon_e7.to_be_bytes());
    buf.extend_from_slice(&location.version.to_be_bytes());
    buf
}

fn decode_location(bytes: &[u8]) -> Location {
    let lat_e7 = i32::from_be_bytes(bytes[0..4].try_into().unwrap());
    let lon_e7 = i32::from_be_bytes(bytes[4..8].try_into().unwrap());
    let version = i32::from_be_bytes(bytes[8..12].try_into().unwrap());
    Location { lat_e7, lon_e7, version }
}

/// Typed view over one of the primary element tables (`nodes`, `ways`,
/// `relations`), holding opaque codec-produced byte values.
pub struct Elements<'txn, 'env, E: Engine> {
    txn: &'txn mut Txn<'env, E>,
    table: Table,
}

impl<'txn, 'env, E: Engine> Elements<'txn, 'env, E> {
    pub fn new(txn: &'txn mut Txn<'env, E>, table: Table) -> Self {
        Self { txn, table }
    }

    pub fn get(&mut self, id: EntityId) -> CResult<Option<Vec<u8>>> {
        let key = schema::primary_key(self.table, id);
        self.txn.get(&key)
    }

    pub fn put(&mut self, id: EntityId, value: Vec<u8>) -> CResult<()> {
        let key = schema::primary_key(self.table, id);
        self.txn.set(&key, value)
    }

    pub fn del(&mut self, id: EntityId) -> CResult<()> {
        let key = schema::primary_key(self.table, id);
        self.txn.delete(&key)
    }

    pub fn exists(&mut self, id: EntityId) -> CResult<bool> {
        Ok(self.get(id)?.is_some())
    }
}

/// Typed view over one of the multi-value reverse-index tables.
/// `(k1, k2)` pairs occur at most once; iteration over `k1` yields every
/// paired `k2` in ascending order.
pub struct Index<'txn, 'env, E: Engine> {
    txn: &'txn mut Txn<'env, E>,
    table: Table,
}

impl<'txn, 'env, E: Engine> Index<'txn, 'env, E> {
    pub fn new(txn: &'txn mut Txn<'env, E>, table: Table) -> Self {
        Self { txn, table }
    }

    pub fn put(&mut self, k1: EntityId, k2: EntityId) -> CResult<()> {
        let key = schema::index_key(self.table, k1, k2);
        self.txn.set(&key, Vec::new())
    }

    pub fn del(&mut self, k1: EntityId, k2: EntityId) -> CResult<()> {
        let key = schema::index_key(self.table, k1, k2);
        self.txn.delete(&key)
    }

    pub fn iterate(&mut self, k1: EntityId) -> CResult<Vec<EntityId>> {
        let prefix = schema::index_prefix(self.table, k1);
        let rows = self.txn.scan_prefix(&prefix)?;
        Ok(rows.into_iter().map(|(key, _)| schema::index_key_k2(&key)).collect())
    }
}

/// Typed view over the `cell_node` multi-value index, keyed by `u64` cell
/// id rather than a signed entity id, so it can't share [`Index`]'s
/// signed-id key encoding.
pub struct CellIndex<'txn, 'env, E: Engine> {
    txn: &'txn mut Txn<'env, E>,
}

impl<'txn, 'env, E: Engine> CellIndex<'txn, 'env, E> {
    pub fn new(txn: &'txn mut Txn<'env, E>) -> Self {
        Self { txn }
    }

    pub fn put(&mut self, cell_id: u64, node_id: EntityId) -> CResult<()> {
        let key = schema::cell_node_key(cell_id, node_id);
        self.txn.set(&key, Vec::new())
    }

    pub fn del(&mut self, cell_id: u64, node_id: EntityId) -> CResult<()> {
        let key = schema::cell_node_key(cell_id, node_id);
        self.txn.delete(&key)
    }

    pub fn iterate(&mut self, cell_id: u64) -> CResult<Vec<EntityId>> {
        let prefix = schema::cell_node_prefix(cell_id);
        let rows = self.txn.scan_prefix(&prefix)?;
        Ok(rows.into_iter().map(|(key, _)| schema::cell_node_key_node_id(&key)).collect())
    }
}

/// Typed view over the `metadata` table (utf-8 name → utf-8 value).
pub struct Metadata<'txn, 'env, E: Engine> {
    txn: &'txn mut Txn<'env, E>,
}

impl<'txn, 'env, E: Engine> Metadata<'txn, 'env, E> {
    pub fn new(txn: &'txn mut Txn<'env, E>) -> Self {
        Self { txn }
    }

    pub fn get(&mut self, name: &str) -> CResult<Option<String>> {
        let key = schema::metadata_key(name);
        Ok(self
            .txn
            .get(&key)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    pub fn put(&mut self, name: &str, value: &str) -> CResult<()> {
        let key = schema::metadata_key(name);
        self.txn.set(&key, value.as_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::Memory;

    fn env() -> Env<Memory> {
        Env::new(Memory::new())
    }

    #[test]
    fn locations_roundtrip_through_commit() {
        let env = env();
        let mut txn = env.begin_rw().unwrap();
        Locations::new(&mut txn).put(1, Location { lat_e7: 10, lon_e7: 20, version: 1 }).unwrap();
        txn.commit().unwrap();

        let mut txn = env.begin_ro().unwrap();
        let loc = Locations::new(&mut txn).get(1).unwrap();
        assert_eq!(loc, Some(Location { lat_e7: 10, lon_e7: 20, version: 1 }));
    }

    #[test]
    fn abort_leaves_engine_untouched() {
        let env = env();
        let mut txn = env.begin_rw().unwrap();
        Locations::new(&mut txn).put(1, Location { lat_e7: 10, lon_e7: 20, version: 1 }).unwrap();
        txn.abort();

        let mut txn = env.begin_ro().unwrap();
        assert_eq!(Locations::new(&mut txn).get(1).unwrap(), None);
    }

    #[test]
    fn index_iterate_reflects_overlay_before_commit() {
        let env = env();
        let mut txn = env.begin_rw().unwrap();
        Index::new(&mut txn, Table::NodeWay).put(1, 10).unwrap();
        Index::new(&mut txn, Table::NodeWay).put(1, 11).unwrap();
        let members = Index::new(&mut txn, Table::NodeWay).iterate(1).unwrap();
        assert_eq!(members, vec![10, 11]);
    }

    #[test]
    fn index_del_removes_pair() {
        let env = env();
        let mut txn = env.begin_rw().unwrap();
        Index::new(&mut txn, Table::NodeWay).put(1, 10).unwrap();
        txn.commit().unwrap();

        let mut txn = env.begin_rw().unwrap();
        Index::new(&mut txn, Table::NodeWay).del(1, 10).unwrap();
        txn.commit().unwrap();

        let mut txn = env.begin_ro().unwrap();
        assert!(Index::new(&mut txn, Table::NodeWay).iterate(1).unwrap().is_empty());
    }

    #[test]
    fn metadata_roundtrips() {
        let env = env();
        let mut txn = env.begin_rw().unwrap();
        Metadata::new(&mut txn).put(schema::SEQUENCE_NUMBER_KEY, "42").unwrap();
        txn.commit().unwrap();

        let mut txn = env.begin_ro().unwrap();
        assert_eq!(
            Metadata::new(&mut txn).get(schema::SEQUENCE_NUMBER_KEY).unwrap(),
            Some("42".to_string())
        );
    }
}
