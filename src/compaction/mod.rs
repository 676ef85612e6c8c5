//! # Compaction Module
//!
//! Leveled compaction for the LSM engine.
//!
//! Level `L` may hold at most `cap(L) = 2^(L+1)` tables (L0 = 2, L1 = 4,
//! L2 = 8, …). When a level overflows, part of it is merged down into the
//! next level:
//!
//! 1. **Select from L** — at level 0 every table (ranges may overlap); at
//!    deeper levels the overflow count of tables with the smallest
//!    `(timestamp, min_key)`.
//! 2. **Select from L+1** — every table whose key range overlaps the union
//!    range of the selection; absorbing the whole overlap region is what
//!    keeps levels ≥ 1 pairwise disjoint.
//! 3. **Merge** — per key, the entry with the highest timestamp wins; on a
//!    timestamp tie the upper level wins (it is the newer data).
//! 4. **Tombstone GC** — when the output level is currently the deepest,
//!    tombstones (`vlen == 0`) have nothing left to shadow and are dropped.
//! 5. **Repartition** — the merged entries are cut into full tables of at
//!    most [`SST_MAX_KEY_COUNT`] entries, all stamped with the maximum
//!    input timestamp.
//! 6. Input files are deleted, and the check-and-compact cycle repeats
//!    until no level overflows.
//!
//! Values never move — only 24-byte index entries are rewritten, the core
//! saving of the WiscKey split.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    collections::BTreeMap,
    io,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use crate::sstable::{SST_MAX_KEY_COUNT, SsTable, SstableError};
use thiserror::Error;
use tracing::{debug, info};

// ------------------------------------------------------------------------------------------------
// Types
// ------------------------------------------------------------------------------------------------

/// The engine's table registry: level → (file id → table).
pub type Levels = BTreeMap<u64, BTreeMap<u64, SsTable>>;

/// Errors returned by compaction.
#[derive(Debug, Error)]
pub enum CompactionError {
    /// SSTable build or parse failure.
    #[error("SSTable error: {0}")]
    Sstable(#[from] SstableError),

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// One key's surviving entry during a merge.
struct MergedEntry {
    timestamp: u64,
    voffset: u64,
    vlen: u64,
    /// Whether the entry came from the upper (smaller-numbered) level —
    /// the timestamp tie-breaker.
    from_upper: bool,
}

// ------------------------------------------------------------------------------------------------
// Capacity / scheduling
// ------------------------------------------------------------------------------------------------

/// Maximum table count for a level: `2^(L+1)`.
pub fn level_capacity(level: u64) -> usize {
    1usize << (level + 1).min(62)
}

/// The smallest overfull level, or `None` when every level fits.
pub fn needs_compact(levels: &Levels) -> Option<u64> {
    levels
        .iter()
        .find(|(level, files)| files.len() > level_capacity(**level))
        .map(|(level, _)| *level)
}

/// Runs compactions until no level is overfull.
pub fn run_to_quiescence(levels: &mut Levels, sst_dir: &Path) -> Result<(), CompactionError> {
    while let Some(level) = needs_compact(levels) {
        compact_level(levels, sst_dir, level)?;
    }
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// One compaction round
// ------------------------------------------------------------------------------------------------

/// Compacts the overflow of `level` into `level + 1`.
pub fn compact_level(
    levels: &mut Levels,
    sst_dir: &Path,
    level: u64,
) -> Result<(), CompactionError> {
    // 1. Select the tables leaving `level`.
    let upper_ids = select_upper(levels, level);
    if upper_ids.is_empty() {
        return Ok(());
    }

    let upper: Vec<SsTable> = {
        let files = levels.entry(level).or_default();
        upper_ids
            .iter()
            .filter_map(|id| files.remove(id))
            .collect()
    };

    // 2. Union key range of the selection.
    let kmin = upper.iter().map(SsTable::min_key).min().expect("non-empty");
    let kmax = upper.iter().map(SsTable::max_key).max().expect("non-empty");

    // 3. Every overlapping table in the next level joins the merge.
    let lower_ids: Vec<u64> = levels
        .get(&(level + 1))
        .map(|files| {
            files
                .iter()
                .filter(|(_, sst)| sst.min_key() <= kmax && sst.max_key() >= kmin)
                .map(|(id, _)| *id)
                .collect()
        })
        .unwrap_or_default();

    let lower: Vec<SsTable> = {
        let files = levels.entry(level + 1).or_default();
        lower_ids
            .iter()
            .filter_map(|id| files.remove(id))
            .collect()
    };

    info!(
        level,
        upper = upper.len(),
        lower = lower.len(),
        kmin,
        kmax,
        "compaction round started"
    );

    // 4. Output directory.
    let out_dir = level_dir(sst_dir, level + 1);
    std::fs::create_dir_all(&out_dir)?;

    // 5. Merge: highest timestamp wins; ties prefer the upper level.
    let mut merged: BTreeMap<u64, MergedEntry> = BTreeMap::new();
    for (tables, from_upper) in [(&upper, true), (&lower, false)] {
        for sst in tables {
            let ts = sst.timestamp();
            let index = sst.index();
            for i in 0..index.len() {
                let candidate = MergedEntry {
                    timestamp: ts,
                    voffset: index.voffset(i),
                    vlen: index.vlen(i),
                    from_upper,
                };
                merge_entry(&mut merged, index.key(i), candidate);
            }
        }
    }

    // 6. Tombstones die when nothing deeper can still hold the key.
    let deepest = levels
        .range(level + 2..)
        .all(|(_, files)| files.is_empty());
    let before = merged.len();
    if deepest {
        merged.retain(|_, entry| entry.vlen > 0);
        debug!(
            dropped = before - merged.len(),
            "deepest-level tombstone collection"
        );
    }

    // 7. Repartition into full output tables.
    let out_timestamp = upper
        .iter()
        .chain(lower.iter())
        .map(SsTable::timestamp)
        .max()
        .expect("non-empty input set");

    let entries: Vec<(u64, u64, u64)> = merged
        .into_iter()
        .map(|(key, e)| (key, e.voffset, e.vlen))
        .collect();

    let out_files = levels.entry(level + 1).or_default();
    for chunk in entries.chunks(SST_MAX_KEY_COUNT) {
        let id = allocate_sst_id(out_files);
        let path = out_dir.join(format!("{id}.sst"));
        let sst = SsTable::build_from_entries(out_timestamp, chunk, &path)?;
        out_files.insert(id, sst);
    }

    // 8. The inputs are fully absorbed; their files go.
    let removed = upper.len() + lower.len();
    for sst in upper.into_iter().chain(lower) {
        sst.remove_file()?;
    }

    info!(
        level,
        removed,
        produced = entries.len().div_ceil(SST_MAX_KEY_COUNT),
        out_timestamp,
        "compaction round finished"
    );
    Ok(())
}

/// Picks the table ids leaving `level`: everything at level 0, otherwise the
/// overflow count with the smallest `(timestamp, min_key)`.
fn select_upper(levels: &Levels, level: u64) -> Vec<u64> {
    let Some(files) = levels.get(&level) else {
        return Vec::new();
    };
    let cap = level_capacity(level);
    if files.len() <= cap {
        return Vec::new();
    }

    if level == 0 {
        return files.keys().copied().collect();
    }

    let mut ranked: Vec<(u64, u64, u64)> = files
        .iter()
        .map(|(id, sst)| (sst.timestamp(), sst.min_key(), *id))
        .collect();
    ranked.sort();
    ranked
        .into_iter()
        .take(files.len() - cap)
        .map(|(_, _, id)| id)
        .collect()
}

/// Applies the duplicate-key rule to one candidate entry.
fn merge_entry(merged: &mut BTreeMap<u64, MergedEntry>, key: u64, candidate: MergedEntry) {
    match merged.get(&key) {
        Some(current)
            if current.timestamp > candidate.timestamp
                || (current.timestamp == candidate.timestamp && current.from_upper) => {}
        _ => {
            merged.insert(key, candidate);
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Id allocation
// ------------------------------------------------------------------------------------------------

/// Allocates a file id unique within one level.
///
/// The microsecond wall clock keeps ids roughly chronological; collisions
/// (same-microsecond allocations) are resolved by bumping.
pub fn allocate_sst_id(level_files: &BTreeMap<u64, SsTable>) -> u64 {
    let mut id = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before UNIX epoch")
        .as_micros() as u64;
    while level_files.contains_key(&id) {
        id += 1;
    }
    id
}

/// Builds the `level-<L>` directory path under the engine root.
pub fn level_dir(sst_dir: &Path, level: u64) -> PathBuf {
    sst_dir.join(format!("level-{level}"))
}
