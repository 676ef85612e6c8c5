//! # Memtable Module
//!
//! The mutable, in-memory write buffer: a skiplist keyed by `u64` holding
//! raw value bytes, backed by a write-ahead log.
//!
//! ## Design Invariants
//!
//! - All mutations are WAL-first: a record reaches the log before the
//!   skiplist is touched.
//! - Deletes are represented by overwriting the value with [`DELETE_TAG`];
//!   the key stays present until the next flush carries the tombstone out.
//! - `projected_sst_size` tracks the exact on-disk size of the SST this
//!   memtable would flush into: the 8224-byte header+bloom prefix plus a
//!   24-byte index entry and the value bytes per key.
//! - [`Memtable::put_check`] is the only admission gate; a mutation that
//!   would push the projected size past the SST budget must trigger a flush
//!   in the engine before being applied.
//!
//! ## Recovery
//!
//! On construction the WAL is replayed through the same internal apply
//! functions used by live writes, so the recovered size counter matches a
//! freshly written memtable byte for byte.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::path::Path;

use crate::skiplist::SkipList;
use crate::sstable::{SST_INDEX_ENTRY_SIZE, SST_INDEX_OFFSET, SST_MAX_FILE_SIZE};
use crate::wal::{Wal, WalError, WalRecord};
use thiserror::Error;
use tracing::{info, trace};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Sentinel value marking a deleted key inside the memtable and WAL.
pub const DELETE_TAG: &[u8] = b"~DELETED~";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by [`Memtable`] operations.
#[derive(Debug, Error)]
pub enum MemtableError {
    /// Underlying WAL I/O failure.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),
}

// ------------------------------------------------------------------------------------------------
// Get result
// ------------------------------------------------------------------------------------------------

/// Result of a point lookup in the memtable.
///
/// The tri-state keeps the "deleted here" case distinct from "never seen" —
/// the engine must stop searching older levels on a tombstone hit.
#[derive(Debug, PartialEq, Eq)]
pub enum MemtableGetResult {
    /// The key holds this value.
    Found(Vec<u8>),

    /// The key was deleted in this memtable.
    Deleted,

    /// The memtable has no information about this key.
    NotPresent,
}

// ------------------------------------------------------------------------------------------------
// Memtable Core
// ------------------------------------------------------------------------------------------------

/// Size-bounded ordered write buffer over a [`SkipList`], persisted through
/// a [`Wal`].
pub struct Memtable {
    /// Ordered container; tombstones are stored as [`DELETE_TAG`] values.
    list: SkipList<u64, Vec<u8>>,

    /// Write-ahead log for crash recovery.
    wal: Wal,

    /// On-disk size of the SST a flush of this memtable would produce.
    projected_sst_size: usize,
}

impl Memtable {
    /// Opens a memtable backed by the WAL at `wal_path`, replaying any
    /// records left over from a previous run.
    pub fn new<P: AsRef<Path>>(wal_path: P) -> Result<Self, MemtableError> {
        let mut wal = Wal::open(wal_path)?;
        let records = wal.replay()?;

        let mut memtable = Self {
            list: SkipList::new(),
            wal,
            projected_sst_size: Self::base_size(),
        };

        let replayed = records.len();
        for record in records {
            match record {
                WalRecord::Put { key, value } => memtable.apply_put(key, value),
                WalRecord::Del { key } => memtable.apply_del(key),
            }
        }

        if replayed > 0 {
            info!(
                replayed,
                keys = memtable.list.len(),
                projected = memtable.projected_sst_size,
                "memtable recovered from WAL"
            );
        }

        Ok(memtable)
    }

    /// Projected SST size of an empty memtable: header plus bloom filter.
    const fn base_size() -> usize {
        SST_INDEX_OFFSET
    }

    /// Returns `true` iff `put(key, value)` keeps the projected SST size
    /// within the file budget.
    pub fn put_check(&self, key: u64, value: &[u8]) -> bool {
        let projected = self.projected_sst_size as i64 + self.size_delta(key, value);
        projected <= SST_MAX_FILE_SIZE as i64
    }

    /// Inserts or updates a key.
    pub fn put(&mut self, key: u64, value: Vec<u8>) -> Result<(), MemtableError> {
        trace!(key, len = value.len(), "memtable put");
        self.wal.append_put(key, &value)?;
        self.apply_put(key, value);
        Ok(())
    }

    /// Marks a key as deleted by overwriting its value with [`DELETE_TAG`].
    pub fn del(&mut self, key: u64) -> Result<(), MemtableError> {
        trace!(key, "memtable del");
        self.wal.append_del(key)?;
        self.apply_del(key);
        Ok(())
    }

    /// Point lookup.
    pub fn get(&self, key: u64) -> MemtableGetResult {
        match self.list.get(&key) {
            Some(value) if value == DELETE_TAG => MemtableGetResult::Deleted,
            Some(value) => MemtableGetResult::Found(value.clone()),
            None => MemtableGetResult::NotPresent,
        }
    }

    /// Appends all live entries in `[k1, k2]` to `out`, ascending by key and
    /// skipping tombstones.
    pub fn scan(&self, k1: u64, k2: u64, out: &mut Vec<(u64, Vec<u8>)>) {
        for (&key, value) in self.list.iter() {
            if key < k1 {
                continue;
            }
            if key > k2 {
                break;
            }
            if value != DELETE_TAG {
                out.push((key, value.clone()));
            }
        }
    }

    /// Ordered dump of every entry, tombstones included — the flush payload.
    pub fn copy_all(&self) -> Vec<(u64, Vec<u8>)> {
        self.list.copy_all()
    }

    /// Visits all entries (tombstones included) in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (&u64, &Vec<u8>)> {
        self.list.iter()
    }

    /// Clears the skiplist, resets the size counter, and truncates the WAL.
    pub fn reset(&mut self) -> Result<(), MemtableError> {
        self.list.clear();
        self.projected_sst_size = Self::base_size();
        self.wal.truncate()?;
        Ok(())
    }

    /// Number of keys currently buffered (tombstones included).
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// Returns `true` when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Current projected SST size in bytes.
    pub fn projected_sst_size(&self) -> usize {
        self.projected_sst_size
    }

    /// Size delta `put(key, value)` would apply to the projected SST size.
    ///
    /// Replacing a value costs the length difference; a fresh key costs the
    /// 24-byte index entry plus the value bytes.
    fn size_delta(&self, key: u64, value: &[u8]) -> i64 {
        match self.list.get(&key) {
            Some(old) => value.len() as i64 - old.len() as i64,
            None => (SST_INDEX_ENTRY_SIZE + value.len()) as i64,
        }
    }

    /// Applies a put to the skiplist and size counter (no WAL write).
    fn apply_put(&mut self, key: u64, value: Vec<u8>) {
        let delta = self.size_delta(key, &value);
        self.list.insert(key, value);
        self.projected_sst_size = (self.projected_sst_size as i64 + delta) as usize;
    }

    /// Applies a delete to the skiplist and size counter (no WAL write).
    ///
    /// The tombstone is charged at its real tag length, not a pointer size.
    fn apply_del(&mut self, key: u64) {
        self.apply_put(key, DELETE_TAG.to_vec());
    }
}
