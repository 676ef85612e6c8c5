//! # LSM Storage Engine
//!
//! The engine owns every component — memtable + WAL, the leveled SST
//! registry, and the value log — and orchestrates writes, reads, flushes,
//! compaction, and value-log garbage collection behind a small public API:
//! [`Engine::put`], [`Engine::get`], [`Engine::del`], [`Engine::scan`],
//! [`Engine::reset`], and [`Engine::gc`].
//!
//! ## Write path
//!
//! `put` lands in the memtable (WAL first). When the projected SST size
//! would exceed the 16 KiB file budget, the engine flushes:
//!
//! 1. drain the memtable in key order,
//! 2. append every non-tombstone value to the vLog and sync it,
//! 3. seal a new level-0 SST whose `voffset`s point at the just-written
//!    frames,
//! 4. reset the memtable (truncating the WAL),
//! 5. compact until no level overflows,
//! 6. apply the write that triggered the flush.
//!
//! ## Read path
//!
//! `get` consults the memtable, then levels top-down. Within a level the
//! freshest (highest-timestamp) hit wins; a hit ends the walk before any
//! deeper — strictly older — level is touched. Values are dereferenced
//! through the vLog; tombstones and unresolvable frames collapse to the
//! empty result at this boundary, never to an error.
//!
//! ## Durability model
//!
//! Single-threaded, synchronous, single process. The WAL protects the
//! memtable across crashes; flushed state is reconstructed at open by
//! scanning `level-<L>/<id>.sst` files and re-deriving `max_timestamp`.
//! Closing (or dropping) the engine flushes a non-empty memtable so a
//! reopened directory serves the exact same map.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use crate::compaction::{self, CompactionError, Levels};
use crate::memtable::{DELETE_TAG, Memtable, MemtableError, MemtableGetResult};
use crate::sstable::{SST_INDEX_ENTRY_SIZE, SST_INDEX_OFFSET, SST_MAX_FILE_SIZE, ScanAcc, SsTable, SstableError};
use crate::vlog::{ValueLog, VlogError};
use thiserror::Error;
use tracing::{debug, error, info, warn};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Default WAL location: a fixed file in the process working directory.
pub const DEFAULT_WAL_PATH: &str = "./WAL.log";

/// Name of the value-log file inside the data directory.
pub const VLOG_FILE_NAME: &str = "vLog";

/// Largest accepted value: one entry must fit an otherwise empty SST.
pub const MAX_VALUE_SIZE: usize = SST_MAX_FILE_SIZE - SST_INDEX_OFFSET - SST_INDEX_ENTRY_SIZE;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors surfaced by the public engine API.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Error originating from the memtable or its WAL.
    #[error("memtable error: {0}")]
    Memtable(#[from] MemtableError),

    /// Error originating from the SSTable subsystem.
    #[error("SSTable error: {0}")]
    Sstable(#[from] SstableError),

    /// Error originating from the value log.
    #[error("vLog error: {0}")]
    Vlog(#[from] VlogError),

    /// Error originating from compaction.
    #[error("compaction error: {0}")]
    Compaction(#[from] CompactionError),

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The value cannot fit in an SST even alone.
    #[error("value of {len} bytes exceeds the {MAX_VALUE_SIZE}-byte limit")]
    ValueTooLarge {
        /// Rejected value length.
        len: usize,
    },
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Configuration for an [`Engine`] instance.
///
/// The on-disk layout under the data directory is fixed by the file
/// formats; only the WAL location is configurable so embedders (and tests)
/// can keep it next to their data instead of the working directory.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path of the write-ahead log file.
    pub wal_path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            wal_path: PathBuf::from(DEFAULT_WAL_PATH),
        }
    }
}

/// Snapshot of engine statistics returned by [`Engine::stats`].
#[derive(Debug)]
pub struct EngineStats {
    /// Keys buffered in the memtable (tombstones included).
    pub memtable_keys: usize,
    /// Table count per level, ascending by level.
    pub level_counts: Vec<(u64, usize)>,
    /// Start of the vLog live region.
    pub vlog_tail: u64,
    /// End of the vLog live region.
    pub vlog_head: u64,
}

// ------------------------------------------------------------------------------------------------
// Engine
// ------------------------------------------------------------------------------------------------

/// The storage engine: a single-writer, single-reader aggregate owning the
/// memtable, the value log, and the level → (id → SST) registry.
///
/// Wrap it in a mutex for multi-threaded hosts; the engine itself assumes
/// exclusive access.
pub struct Engine {
    /// Data directory holding `level-<L>/` and the vLog.
    dir: PathBuf,

    /// In-memory write buffer with its WAL.
    memtable: Memtable,

    /// Append-only value log.
    vlog: ValueLog,

    /// level → (file id → table).
    levels: Levels,

    /// Monotone freshness counter; bumped once per flush.
    max_timestamp: u64,

    /// vLog head as of the last successful flush.
    vlog_head_snapshot: u64,

    /// Set once `close()` ran; suppresses the drop-time flush.
    closed: bool,
}

impl Engine {
    /// Opens (or creates) an engine rooted at `dir`.
    ///
    /// Existing `level-<L>/<id>.sst` files are opened and indexed, the
    /// memtable replays its WAL, and the vLog recovers its live region.
    pub fn open<P: AsRef<Path>>(dir: P, config: EngineConfig) -> Result<Self, EngineError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut levels = Levels::new();
        let mut max_timestamp = 0u64;

        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let Some(level) = parse_level_dir(&path) else {
                continue;
            };

            for file in fs::read_dir(&path)? {
                let file = file?.path();
                let Some(id) = parse_sst_file(&file) else {
                    if file.is_file() {
                        warn!(path = %file.display(), "ignoring stray file in level directory");
                    }
                    continue;
                };

                let sst = SsTable::open(&file)?;
                max_timestamp = max_timestamp.max(sst.timestamp());
                levels.entry(level).or_default().insert(id, sst);
            }
        }

        let memtable = Memtable::new(&config.wal_path)?;
        let vlog = ValueLog::open(dir.join(VLOG_FILE_NAME))?;
        let vlog_head_snapshot = vlog.head();

        let table_count: usize = levels.values().map(|files| files.len()).sum();
        info!(
            dir = %dir.display(),
            tables = table_count,
            max_timestamp,
            memtable_keys = memtable.len(),
            vlog_head = vlog.head(),
            "engine opened"
        );

        Ok(Self {
            dir,
            memtable,
            vlog,
            levels,
            max_timestamp,
            vlog_head_snapshot,
            closed: false,
        })
    }

    /// Inserts or updates a key.
    ///
    /// Transparently flushes the memtable (and compacts) when the write
    /// would overflow the SST budget.
    pub fn put(&mut self, key: u64, value: Vec<u8>) -> Result<(), EngineError> {
        if value.len() > MAX_VALUE_SIZE {
            return Err(EngineError::ValueTooLarge { len: value.len() });
        }

        if self.memtable.put_check(key, &value) {
            self.memtable.put(key, value)?;
            return Ok(());
        }

        self.flush()?;
        self.memtable.put(key, value)?;
        Ok(())
    }

    /// Returns the value stored under `key`, or empty bytes when the key is
    /// absent or deleted.
    pub fn get(&self, key: u64) -> Result<Vec<u8>, EngineError> {
        match self.memtable.get(key) {
            MemtableGetResult::Found(value) => return Ok(value),
            MemtableGetResult::Deleted => return Ok(Vec::new()),
            MemtableGetResult::NotPresent => {}
        }

        for (level, files) in &self.levels {
            // Freshest hit within the level wins. Level 0 is walked in
            // descending file id (newest flush first); deeper levels are
            // disjoint so at most one table can answer.
            let mut best: Option<(u64, u64, u64)> = None;
            for sst in files.values().rev() {
                if !sst.may_contain(key) {
                    continue;
                }
                let Some(i) = sst.search(key) else {
                    continue;
                };
                let hit = (sst.timestamp(), sst.index().voffset(i), sst.index().vlen(i));
                if best.is_none_or(|(ts, _, _)| hit.0 > ts) {
                    best = Some(hit);
                }
            }

            if let Some((_, voffset, vlen)) = best {
                if vlen == 0 {
                    debug!(key, level, "get hit a tombstone");
                    return Ok(Vec::new());
                }
                return match self.vlog.read_value(voffset, vlen) {
                    Ok(value) => Ok(value),
                    Err(e) => {
                        warn!(key, voffset, error = %e, "get: unresolvable frame, treating as absent");
                        Ok(Vec::new())
                    }
                };
            }
        }

        Ok(Vec::new())
    }

    /// Deletes a key.
    ///
    /// Returns `false` when the key was already absent; otherwise writes a
    /// tombstone through the normal (flush-aware) write path and returns
    /// `true`.
    pub fn del(&mut self, key: u64) -> Result<bool, EngineError> {
        if self.get(key)?.is_empty() {
            return Ok(false);
        }

        if !self.memtable.put_check(key, DELETE_TAG) {
            self.flush()?;
        }
        self.memtable.del(key)?;
        Ok(true)
    }

    /// Appends every live `(key, value)` pair in `[k1, k2]` to `out`,
    /// ascending by key.
    pub fn scan(&self, k1: u64, k2: u64, out: &mut Vec<(u64, Vec<u8>)>) -> Result<(), EngineError> {
        let mut acc = ScanAcc::new();

        for files in self.levels.values() {
            for sst in files.values() {
                sst.scan(k1, k2, &mut acc, &self.vlog);
            }
        }

        // The memtable trumps every table regardless of timestamps.
        let overlay_ts = self.max_timestamp + 1;
        for (&key, value) in self.memtable.iter() {
            if key < k1 {
                continue;
            }
            if key > k2 {
                break;
            }
            if value == DELETE_TAG {
                acc.insert(key, (overlay_ts, None));
            } else {
                acc.insert(key, (overlay_ts, Some(value.clone())));
            }
        }

        out.extend(
            acc.into_iter()
                .filter_map(|(key, (_, value))| value.map(|v| (key, v))),
        );
        Ok(())
    }

    /// Removes every trace of the store: WAL content, all SST files and
    /// level directories, and the vLog.
    pub fn reset(&mut self) -> Result<(), EngineError> {
        self.memtable.reset()?;

        for files in std::mem::take(&mut self.levels).into_values() {
            for sst in files.into_values() {
                sst.remove_file()?;
            }
        }
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if parse_level_dir(&path).is_some() {
                fs::remove_dir_all(&path)?;
            }
        }

        self.vlog.reset()?;
        self.max_timestamp = 0;
        self.vlog_head_snapshot = 0;

        info!(dir = %self.dir.display(), "engine reset");
        Ok(())
    }

    /// Reclaims at least `chunk_size` bytes from the vLog tail.
    ///
    /// Frames still referenced by the freshest SST-visible record of their
    /// key (and not shadowed by the memtable) are re-inserted through the
    /// normal write path, relocating them to the head on the next flush.
    /// The scanned region is then hole-punched and the tail advances.
    pub fn gc(&mut self, chunk_size: u64) -> Result<(), EngineError> {
        let (frames, new_tail) = self.vlog.scan_frames(chunk_size)?;
        let scanned = frames.len();
        let mut relocated = 0usize;

        for frame in frames {
            if self.frame_is_live(&frame) {
                // WAL durability covers the value from here on, so the hole
                // punch below cannot lose it.
                self.put(frame.key, frame.value)?;
                relocated += 1;
            }
        }

        self.vlog.punch_hole(new_tail)?;

        info!(
            chunk_size,
            scanned,
            relocated,
            tail = self.vlog.tail(),
            head = self.vlog.head(),
            "vLog garbage collection finished"
        );
        Ok(())
    }

    /// Flushes a pending memtable and marks the engine closed.
    ///
    /// Also invoked (best effort) from `Drop`; calling it explicitly
    /// surfaces errors instead of logging them.
    pub fn close(&mut self) -> Result<(), EngineError> {
        if !self.memtable.is_empty() {
            self.flush()?;
        }
        self.closed = true;
        info!(dir = %self.dir.display(), "engine closed");
        Ok(())
    }

    /// Returns a snapshot of engine statistics.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            memtable_keys: self.memtable.len(),
            level_counts: self
                .levels
                .iter()
                .map(|(level, files)| (*level, files.len()))
                .collect(),
            vlog_tail: self.vlog.tail(),
            vlog_head: self.vlog.head(),
        }
    }

    // --------------------------------------------------------------------------------------------
    // Flush
    // --------------------------------------------------------------------------------------------

    /// Seals the memtable into a new level-0 SST.
    ///
    /// Stages all non-tombstone values into the vLog, syncs them, writes the
    /// table against the pre-flush head snapshot, resets the memtable, and
    /// compacts to quiescence.
    fn flush(&mut self) -> Result<(), EngineError> {
        let payload = self.memtable.copy_all();
        if payload.is_empty() {
            return Ok(());
        }

        self.max_timestamp += 1;
        let vlog_start = self.vlog_head_snapshot;

        self.vlog.stage_payload(
            payload
                .iter()
                .filter(|(_, value)| value != DELETE_TAG)
                .map(|(key, value)| (*key, value.as_slice())),
        );
        self.vlog.write_to_file(vlog_start)?;

        let level0_dir = compaction::level_dir(&self.dir, 0);
        fs::create_dir_all(&level0_dir)?;

        let files = self.levels.entry(0).or_default();
        let id = compaction::allocate_sst_id(files);
        let path = level0_dir.join(format!("{id}.sst"));
        let sst = SsTable::build_from_flush(self.max_timestamp, &payload, &path, vlog_start)?;
        files.insert(id, sst);

        self.vlog_head_snapshot = self.vlog.head();
        self.memtable.reset()?;

        debug!(
            timestamp = self.max_timestamp,
            keys = payload.len(),
            path = %path.display(),
            vlog_head = self.vlog_head_snapshot,
            "memtable flushed to level 0"
        );

        compaction::run_to_quiescence(&mut self.levels, &self.dir)?;
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // GC support
    // --------------------------------------------------------------------------------------------

    /// A frame is live iff no newer version of its key exists anywhere:
    /// the memtable has nothing for the key, and the freshest SST-visible
    /// record still points at exactly this frame with a real value.
    fn frame_is_live(&self, frame: &crate::vlog::VlogFrame) -> bool {
        if self.memtable.get(frame.key) != MemtableGetResult::NotPresent {
            return false;
        }

        for files in self.levels.values() {
            let mut best: Option<(u64, u64, u64)> = None;
            for sst in files.values().rev() {
                if !sst.may_contain(frame.key) {
                    continue;
                }
                let Some(i) = sst.search(frame.key) else {
                    continue;
                };
                let hit = (sst.timestamp(), sst.index().voffset(i), sst.index().vlen(i));
                if best.is_none_or(|(ts, _, _)| hit.0 > ts) {
                    best = Some(hit);
                }
            }
            if let Some((_, voffset, vlen)) = best {
                return vlen > 0 && voffset == frame.offset;
            }
        }

        false
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.close() {
            error!(dir = %self.dir.display(), error = %e, "engine close failed on drop");
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Directory layout helpers
// ------------------------------------------------------------------------------------------------

/// Extracts `L` from a `level-<L>` directory path.
fn parse_level_dir(path: &Path) -> Option<u64> {
    if !path.is_dir() {
        return None;
    }
    path.file_name()?
        .to_str()?
        .strip_prefix("level-")?
        .parse()
        .ok()
}

/// Extracts `<id>` from an `<id>.sst` file path.
fn parse_sst_file(path: &Path) -> Option<u64> {
    if !path.is_file() {
        return None;
    }
    path.file_name()?
        .to_str()?
        .strip_suffix(".sst")?
        .parse()
        .ok()
}
