//! A log-structured key/value engine: an append-only log file plus an
//! in-memory index (the [`super::log::KeyDir`]) mapping keys to file
//! positions. All live keys must fit in memory; values are read from disk
//! on demand.
//!
//! Adapted from the teacher's `kv::storage::log_cask::LogCask`, renamed to
//! `BitCask` after the storage design it implements a simplified variant
//! of. Compaction, recovery-by-truncation, and exclusive file locking all
//! carry over unchanged.

use crate::engine::log::{KeyDir, Log};
use crate::engine::{Engine, ScanIteratorT, Status};
use crate::error::{CResult, Error};
use std::path::PathBuf;

pub struct BitCask {
    log: Log,
    keydir: KeyDir,
}

impl BitCask {
    /// Opens or creates a database at `path`.
    pub fn new(path: PathBuf) -> CResult<Self> {
        Self::new_with_lock(path, true)
    }

    pub fn new_with_lock(path: PathBuf, try_lock: bool) -> CResult<Self> {
        let mut log = Log::new_with_lock(path, try_lock)?;
        let keydir = log.build_keydir()?;
        Ok(Self { log, keydir })
    }

    /// Opens a database, compacting it automatically if the fraction of
    /// garbage on disk is at or above `garbage_ratio_threshold`.
    pub fn new_compact(path: PathBuf, garbage_ratio_threshold: f64) -> CResult<Self> {
        let mut s = Self::new(path)?;
        let status = s.status()?;
        if status.total_disk_size > 0 {
            let garbage_ratio = status.garbage_disk_size as f64 / status.total_disk_size as f64;
            if status.garbage_disk_size > 0 && garbage_ratio >= garbage_ratio_threshold {
                s.compact()?;
            }
        }
        Ok(s)
    }

    /// Compacts the log by rewriting only live entries to a new file and
    /// replacing the current one.
    pub fn compact(&mut self) -> CResult<()> {
        let mut tmp_path = self.log.path.clone();
        tmp_path.set_extension("compact");

        let (mut new_log, new_keydir) = self.write_compacted(tmp_path)?;
        std::fs::rename(&new_log.path, &self.log.path).map_err(|err| {
            Error::Internal(format!(
                "compacting {:?} -> {:?}: {err}",
                new_log.path, self.log.path
            ))
        })?;
        new_log.path = self.log.path.clone();

        self.log = new_log;
        self.keydir = new_keydir;
        Ok(())
    }

    fn write_compacted(&mut self, path: PathBuf) -> CResult<(Log, KeyDir)> {
        let mut new_keydir = KeyDir::new();
        let mut new_log = Log::new(path)?;
        new_log.file.set_len(0)?;
        for (key, (value_pos, value_len)) in self.keydir.iter() {
            let value = self.log.read_value(*value_pos, *value_len)?;
            let (pos, len) = new_log.write_entry(key, Some(&value))?;
            new_keydir.insert(key.clone(), (pos + len as u64 - *value_len as u64, *value_len));
        }
        Ok((new_log, new_keydir))
    }
}

impl std::fmt::Display for BitCask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bitcask")
    }
}

impl Engine for BitCask {
    type ScanIterator<'a> = BitCaskScanIterator<'a>;

    fn delete(&mut self, key: &[u8]) -> CResult<()> {
        self.log.write_entry(key, None)?;
        self.keydir.remove(key);
        Ok(())
    }

    fn flush(&mut self) -> CResult<()> {
        Ok(self.log.file.sync_all()?)
    }

    fn get(&mut self, key: &[u8]) -> CResult<Option<Vec<u8>>> {
        match self.keydir.get(key) {
            Some((value_pos, value_len)) => Ok(Some(self.log.read_value(*value_pos, *value_len)?)),
            None => Ok(None),
        }
    }

    fn scan(&mut self, range: impl std::ops::RangeBounds<Vec<u8>>) -> Self::ScanIterator<'_>
    where
        Self: Sized,
    {
        BitCaskScanIterator { inner: self.keydir.range(range), log: &mut self.log }
    }

    fn set(&mut self, key: &[u8], value: Vec<u8>) -> CResult<()> {
        let (pos, len) = self.log.write_entry(key, Some(&value))?;
        let value_len = value.len() as u32;
        self.keydir.insert(key.to_vec(), (pos + len as u64 - value_len as u64, value_len));
        Ok(())
    }

    /// Groups every write into one log record (see `engine::log`'s module
    /// docs), so a crash partway through a multi-key commit can't leave the
    /// keydir (and hence a reopened database) reflecting only some of it.
    fn apply_batch(&mut self, ops: Vec<(Vec<u8>, Option<Vec<u8>>)>) -> CResult<()> {
        let positions = self.log.write_batch(&ops)?;
        for ((key, value), (pos, len)) in ops.into_iter().zip(positions) {
            match value {
                Some(value) => {
                    let value_len = value.len() as u32;
                    self.keydir.insert(key, (pos + len as u64 - value_len as u64, value_len));
                }
                None => {
                    self.keydir.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn status(&mut self) -> CResult<Status> {
        let keys = self.keydir.len() as u64;
        let size = self
            .keydir
            .iter()
            .fold(0, |size, (key, (_, value_len))| size + key.len() as u64 + *value_len as u64);
        let total_disk_size = self.log.file.metadata()?.len();
        let live_disk_size = size + 8 * keys;
        let garbage_disk_size = total_disk_size.saturating_sub(live_disk_size);
        Ok(Status {
            name: self.to_string(),
            keys,
            size,
            total_disk_size,
            live_disk_size,
            garbage_disk_size,
        })
    }
}

impl Drop for BitCask {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            log::error!("failed to flush bitcask log: {err}");
        }
    }
}

pub struct BitCaskScanIterator<'a> {
    inner: std::collections::btree_map::Range<'a, Vec<u8>, (u64, u32)>,
    log: &'a mut Log,
}

impl<'a> BitCaskScanIterator<'a> {
    fn map(&mut self, item: (&Vec<u8>, &(u64, u32))) -> <Self as Iterator>::Item {
        let (key, (value_pos, value_len)) = item;
        Ok((key.clone(), self.log.read_value(*value_pos, *value_len)?))
    }
}

impl<'a> Iterator for BitCaskScanIterator<'a> {
    type Item = CResult<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|item| self.map(item))
    }
}

impl<'a> DoubleEndedIterator for BitCaskScanIterator<'a> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(|item| self.map(item))
    }
}

impl<'a> ScanIteratorT for BitCaskScanIterator<'a> {}

#[cfg(test)]
mod tests {
    use super::BitCask;

    crate::engine::tests::test_engine!({
        let path = tempfile::tempdir().unwrap().path().join("db");
        BitCask::new(path).unwrap()
    });

    #[test]
    fn reopen_preserves_data() {
        use crate::engine::Engine;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");

        let mut s = BitCask::new(path.clone()).unwrap();
        s.set(b"a", vec![1]).unwrap();
        s.set(b"b", vec![2]).unwrap();
        s.delete(b"b").unwrap();
        drop(s);

        let mut reopened = BitCask::new(path).unwrap();
        assert_eq!(reopened.get(b"a").unwrap(), Some(vec![1]));
        assert_eq!(reopened.get(b"b").unwrap(), None);
    }

    #[test]
    fn compact_preserves_live_data_and_shrinks_file() {
        use crate::engine::Engine;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let mut s = BitCask::new(path).unwrap();
        for i in 0..10 {
            s.set(format!("k{i}").as_bytes(), vec![i as u8]).unwrap();
        }
        for i in 0..9 {
            s.set(format!("k{i}").as_bytes(), vec![99]).unwrap();
        }
        let before = s.status().unwrap();
        s.compact().unwrap();
        let after = s.status().unwrap();
        assert_eq!(after.garbage_disk_size, 0);
        assert_eq!(after.live_disk_size, before.live_disk_size);
        assert!(after.total_disk_size < before.total_disk_size);
    }

    #[test]
    fn apply_batch_commits_and_reopens_atomically() {
        use crate::engine::Engine;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");

        let mut s = BitCask::new(path.clone()).unwrap();
        s.apply_batch(vec![
            (b"a".to_vec(), Some(vec![1])),
            (b"b".to_vec(), Some(vec![2])),
            (b"c".to_vec(), None),
        ])
        .unwrap();
        assert_eq!(s.get(b"a").unwrap(), Some(vec![1]));
        assert_eq!(s.get(b"b").unwrap(), Some(vec![2]));
        drop(s);

        let mut reopened = BitCask::new(path).unwrap();
        assert_eq!(reopened.get(b"a").unwrap(), Some(vec![1]));
        assert_eq!(reopened.get(b"b").unwrap(), Some(vec![2]));
    }

    #[test]
    fn concurrent_open_is_rejected_by_file_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let _s = BitCask::new(path.clone()).unwrap();
        assert!(BitCask::new(path).is_err());
    }
}
