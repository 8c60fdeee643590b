//! An append-only log file, containing a sequence of key/value entries
//! encoded as follows:
//!
//! - Key length as big-endian u32.
//! - Value length as big-endian i32, or -1 for tombstones.
//! - Key as raw bytes.
//! - Value as raw bytes.
//!
//! A multi-key write (see [`Log::write_batch`]) is instead framed as a
//! group: a header entry whose key length is the sentinel [`BATCH_MARKER`]
//! and whose "value length" field is repurposed to hold the member count,
//! followed immediately by that many ordinary entries. [`Log::build_keydir`]
//! treats a group as all-or-nothing: if the file ends before every member
//! entry is read back, the whole group is discarded, not just the
//! truncated tail entry.
//!
//! Adapted from the teacher's `kv::storage::log::Log`.

use crate::error::{CResult, Error};
use fs4::FileExt;
use std::collections::BTreeMap;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

/// Maps a key to the position and length of its most recent value in the
/// log file. Always reflects the latest committed version of every live
/// key; entries for deleted keys are absent.
pub type KeyDir = BTreeMap<Vec<u8>, (u64, u32)>;

/// Sentinel key length marking a batch-group header rather than an ordinary
/// entry. No real key ever reaches this length (the schema's longest keys
/// are a table tag plus a handful of big-endian integers), so it can't
/// collide with real data.
const BATCH_MARKER: u32 = u32::MAX;

pub struct Log {
    pub(crate) path: PathBuf,
    pub(crate) file: std::fs::File,
}

impl Log {
    /// Opens a log file, or creates one if it does not exist. Takes out an
    /// exclusive lock on the file until it is closed, or errors if the
    /// lock is already held by another process.
    pub fn new(path: PathBuf) -> CResult<Self> {
        Self::new_with_lock(path, true)
    }

    pub fn new_with_lock(path: PathBuf, try_lock: bool) -> CResult<Self> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }

        let file = std::fs::OpenOptions::new().read(true).write(true).create(true).open(&path)?;

        if try_lock {
            file.try_lock_exclusive().map_err(|_| {
                Error::Internal(format!("{} is locked by another process", path.display()))
            })?;
        }

        Ok(Self { path, file })
    }

    /// Reads one entry's header (key length, value-length-or-tombstone).
    fn read_header(r: &mut BufReader<&mut std::fs::File>) -> Result<(u32, i32), std::io::Error> {
        let mut len_buf = [0u8; 4];
        r.read_exact(&mut len_buf)?;
        let key_len = u32::from_be_bytes(len_buf);
        r.read_exact(&mut len_buf)?;
        let second = i32::from_be_bytes(len_buf);
        Ok((key_len, second))
    }

    /// Reads one entry's key and, if present, skips past its value, given
    /// the entry's header and its starting position. Returns the key, the
    /// position its value starts at, and the value's length (`None` for a
    /// tombstone).
    fn read_entry(
        r: &mut BufReader<&mut std::fs::File>,
        pos: u64,
        key_len: u32,
        value_len_or_tombstone: i32,
        file_len: u64,
    ) -> Result<(Vec<u8>, u64, Option<u32>), std::io::Error> {
        let value_len_or_tombstone = match value_len_or_tombstone {
            l if l >= 0 => Some(l as u32),
            _ => None,
        };
        let value_pos = pos + 4 + 4 + key_len as u64;

        let mut key = vec![0; key_len as usize];
        r.read_exact(&mut key)?;

        if let Some(value_len) = value_len_or_tombstone {
            if value_pos + value_len as u64 > file_len {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "value extends beyond end of file",
                ));
            }
            r.seek_relative(value_len as i64)?;
        }

        Ok((key, value_pos, value_len_or_tombstone))
    }

    /// Rebuilds the in-memory key directory by scanning the log file from
    /// the start. Used to recover state when the database is opened.
    ///
    /// Reads one entry or one batch group at a time; a group only takes
    /// effect if every one of its member entries is fully present, so a
    /// crash partway through [`Log::write_batch`] can't leave some of its
    /// writes applied and others not.
    pub fn build_keydir(&mut self) -> CResult<KeyDir> {
        let mut keydir = KeyDir::new();
        let file_len = self.file.metadata()?.len();
        let mut r = BufReader::new(&mut self.file);
        let mut pos = r.seek(SeekFrom::Start(0))?;

        while pos < file_len {
            let group_start = pos;

            let result = (|| -> Result<(Vec<(Vec<u8>, u64, Option<u32>)>, u64), std::io::Error> {
                let (key_len, second) = Self::read_header(&mut r)?;

                if key_len == BATCH_MARKER {
                    let count = second.max(0) as usize;
                    let mut next = group_start + 8;
                    let mut entries = Vec::with_capacity(count);
                    for _ in 0..count {
                        let (member_key_len, member_second) = Self::read_header(&mut r)?;
                        let (key, value_pos, value_len_or_tombstone) =
                            Self::read_entry(&mut r, next, member_key_len, member_second, file_len)?;
                        next = match value_len_or_tombstone {
                            Some(value_len) => value_pos + value_len as u64,
                            None => value_pos,
                        };
                        entries.push((key, value_pos, value_len_or_tombstone));
                    }
                    Ok((entries, next))
                } else {
                    let (key, value_pos, value_len_or_tombstone) =
                        Self::read_entry(&mut r, group_start, key_len, second, file_len)?;
                    let next = match value_len_or_tombstone {
                        Some(value_len) => value_pos + value_len as u64,
                        None => value_pos,
                    };
                    Ok((vec![(key, value_pos, value_len_or_tombstone)], next))
                }
            })();

            match result {
                Ok((entries, new_pos)) => {
                    for (key, value_pos, value_len_or_tombstone) in entries {
                        match value_len_or_tombstone {
                            Some(value_len) => {
                                keydir.insert(key, (value_pos, value_len));
                            }
                            None => {
                                keydir.remove(&key);
                            }
                        }
                    }
                    pos = new_pos;
                }
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                    log::warn!("found incomplete entry group at offset {group_start}, truncating log");
                    self.file.set_len(group_start)?;
                    break;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(keydir)
    }

    pub fn read_value(&mut self, value_pos: u64, value_len: u32) -> CResult<Vec<u8>> {
        let mut value = vec![0; value_len as usize];
        self.file.seek(SeekFrom::Start(value_pos))?;
        self.file.read_exact(&mut value)?;
        Ok(value)
    }

    /// Appends a key/value entry, using `None` for a tombstone. Returns the
    /// position and length of the whole entry.
    pub fn write_entry(&mut self, key: &[u8], value: Option<&[u8]>) -> CResult<(u64, u32)> {
        let key_len = key.len() as u32;
        let value_len = value.map_or(0, |v| v.len() as u32);
        let value_len_or_tombstone = value.map_or(-1, |v| v.len() as i32);
        let len = 4 + 4 + key_len + value_len;

        let pos = self.file.seek(SeekFrom::End(0))?;
        let mut w = BufWriter::with_capacity(len as usize, &mut self.file);
        w.write_all(&key_len.to_be_bytes())?;
        w.write_all(&value_len_or_tombstone.to_be_bytes())?;
        w.write_all(key)?;
        if let Some(value) = value {
            w.write_all(value)?;
        }
        w.flush()?;

        Ok((pos, len))
    }

    /// Appends a group of key/value entries as a single all-or-nothing unit
    /// (see the module docs). Returns the position and length of each
    /// entry, in the same order as `ops`, with the same meaning
    /// [`Log::write_entry`] gives them.
    pub fn write_batch(&mut self, ops: &[(Vec<u8>, Option<Vec<u8>>)]) -> CResult<Vec<(u64, u32)>> {
        if ops.is_empty() {
            return Ok(Vec::new());
        }
        if ops.len() == 1 {
            let (key, value) = &ops[0];
            return Ok(vec![self.write_entry(key, value.as_deref())?]);
        }

        let group_start = self.file.seek(SeekFrom::End(0))?;
        let mut w = BufWriter::new(&mut self.file);
        w.write_all(&BATCH_MARKER.to_be_bytes())?;
        w.write_all(&(ops.len() as i32).to_be_bytes())?;

        let mut positions = Vec::with_capacity(ops.len());
        let mut offset = group_start + 8;
        for (key, value) in ops {
            let key_len = key.len() as u32;
            let value_len = value.as_ref().map_or(0, |v| v.len() as u32);
            let value_len_or_tombstone = value.as_ref().map_or(-1, |v| v.len() as i32);
            let entry_len = 4 + 4 + key_len + value_len;

            w.write_all(&key_len.to_be_bytes())?;
            w.write_all(&value_len_or_tombstone.to_be_bytes())?;
            w.write_all(key)?;
            if let Some(value) = value {
                w.write_all(value)?;
            }

            positions.push((offset, entry_len));
            offset += entry_len as u64;
        }
        w.flush()?;

        Ok(positions)
    }
}

#[cfg(test)]
mod test {
    use super::Log;

    #[test]
    fn recovers_keydir_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");

        let mut log = Log::new(path.clone()).unwrap();
        log.write_entry(b"a", Some(&[1])).unwrap();
        log.write_entry(b"b", Some(&[2])).unwrap();
        log.write_entry(b"a", None).unwrap();
        drop(log);

        let mut reopened = Log::new(path).unwrap();
        let keydir = reopened.build_keydir().unwrap();
        assert_eq!(keydir.len(), 1);
        assert!(keydir.contains_key(b"b".as_slice()));
    }

    #[test]
    fn batch_group_recovers_as_a_whole() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");

        let mut log = Log::new(path.clone()).unwrap();
        log.write_batch(&[
            (b"a".to_vec(), Some(vec![1])),
            (b"b".to_vec(), Some(vec![2])),
            (b"a".to_vec(), None),
        ])
        .unwrap();
        drop(log);

        let mut reopened = Log::new(path).unwrap();
        let keydir = reopened.build_keydir().unwrap();
        assert_eq!(keydir.len(), 1);
        assert!(keydir.contains_key(b"b".as_slice()));
    }

    #[test]
    fn truncated_batch_group_is_discarded_entirely() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");

        let mut log = Log::new(path.clone()).unwrap();
        log.write_entry(b"pre-existing", Some(&[9])).unwrap();
        let before_batch = log.file.metadata().unwrap().len();
        log.write_batch(&[(b"a".to_vec(), Some(vec![1])), (b"b".to_vec(), Some(vec![2]))]).unwrap();
        // Simulate a crash partway through the group: truncate after the
        // header and the first member entry, before the second.
        log.file.set_len(before_batch + 8 + 4 + 4 + 1 + 1).unwrap();
        drop(log);

        let mut reopened = Log::new(path).unwrap();
        let keydir = reopened.build_keydir().unwrap();
        assert_eq!(keydir.len(), 1);
        assert!(keydir.contains_key(b"pre-existing".as_slice()));
        assert!(!keydir.contains_key(b"a".as_slice()));
        assert!(!keydir.contains_key(b"b".as_slice()));
    }
}
