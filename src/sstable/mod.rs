//! # Sorted String Table (SSTable) Module
//!
//! Immutable on-disk tables holding sorted keys plus pointers into the
//! value log. An SST never stores value bytes — the WiscKey split keeps
//! tables small enough that header, bloom filter, and full key index are
//! always resident in memory.
//!
//! # On-disk layout
//!
//! All integers little-endian:
//!
//! ```text
//! offset  size    field
//! 0       8       timestamp
//! 8       8       key_count
//! 16      8       min_key
//! 24      8       max_key
//! 32      8192    bloom filter bits (bit i → byte i/8, LSB first)
//! 8224    24·N    index entries: (key: 8, voffset: 8, vlen: 8)
//! ```
//!
//! The file never exceeds [`SST_MAX_FILE_SIZE`] (16,384 bytes), which caps
//! `N` at [`SST_MAX_KEY_COUNT`] (340) entries.
//!
//! # Invariants
//!
//! - Keys are strictly increasing; `min_key`/`max_key` mirror the first and
//!   last index entry.
//! - `voffset` addresses the first byte of the key's vLog frame; a
//!   `vlen == 0` entry is a tombstone and has no frame at all.
//! - `timestamp` orders tables by freshness: given two tables holding the
//!   same key, the larger timestamp shadows the smaller.
//! - Tables are immutable; they are produced whole by a memtable flush or a
//!   compaction and destroyed only by compaction or reset.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------


// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    collections::BTreeMap,
    fs::File,
    io,
    path::{Path, PathBuf},
};

use crate::bloom::{BLOOM_SIZE_BYTES, BloomFilter};
use crate::memtable::DELETE_TAG;
use crate::vlog::{VLOG_FRAME_OVERHEAD, ValueLog, VlogError};
use memmap2::Mmap;
use thiserror::Error;
use tracing::{debug, warn};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Size of the fixed header record in bytes.
pub const SST_HEADER_SIZE: usize = 32;

/// Byte offset of the index section (header + bloom filter).
pub const SST_INDEX_OFFSET: usize = SST_HEADER_SIZE + BLOOM_SIZE_BYTES;

/// Size of one `(key, voffset, vlen)` index entry.
pub const SST_INDEX_ENTRY_SIZE: usize = 24;

/// Hard cap on the SST file size.
pub const SST_MAX_FILE_SIZE: usize = 16 * 1024;

/// Maximum number of index entries that fit in one file.
pub const SST_MAX_KEY_COUNT: usize = (SST_MAX_FILE_SIZE - SST_INDEX_OFFSET) / SST_INDEX_ENTRY_SIZE;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by SSTable operations.
#[derive(Debug, Error)]
pub enum SstableError {
    /// Underlying I/O error (missing or unreadable file included).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Structural damage: short file, unsorted keys, impossible counts.
    #[error("corrupt SSTable: {0}")]
    Corrupt(String),
}

// ------------------------------------------------------------------------------------------------
// Header
// ------------------------------------------------------------------------------------------------

/// The fixed 32-byte record at the start of every SST file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SstHeader {
    /// Freshness counter; larger shadows smaller across tables.
    pub timestamp: u64,

    /// Number of index entries in the file.
    pub key_count: u64,

    /// Smallest key in the table.
    pub min_key: u64,

    /// Largest key in the table.
    pub max_key: u64,
}

impl SstHeader {
    /// Serializes the header into its fixed little-endian layout.
    pub fn encode(&self) -> [u8; SST_HEADER_SIZE] {
        let mut buf = [0u8; SST_HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[8..16].copy_from_slice(&self.key_count.to_le_bytes());
        buf[16..24].copy_from_slice(&self.min_key.to_le_bytes());
        buf[24..32].copy_from_slice(&self.max_key.to_le_bytes());
        buf
    }

    /// Decodes a header from the first [`SST_HEADER_SIZE`] bytes of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, SstableError> {
        if buf.len() < SST_HEADER_SIZE {
            return Err(SstableError::Corrupt(format!(
                "header needs {SST_HEADER_SIZE} bytes, have {}",
                buf.len()
            )));
        }
        Ok(Self {
            timestamp: read_u64(buf, 0),
            key_count: read_u64(buf, 8),
            min_key: read_u64(buf, 16),
            max_key: read_u64(buf, 24),
        })
    }
}

// ------------------------------------------------------------------------------------------------
// Index
// ------------------------------------------------------------------------------------------------

/// Parallel arrays `(key, voffset, vlen)` for every entry in the table,
/// sorted ascending by key.
///
/// Indexed access past `len()` is a programming error and panics, matching
/// the contract of the parallel vectors themselves.
#[derive(Debug, Default)]
pub struct SstIndex {
    keys: Vec<u64>,
    voffsets: Vec<u64>,
    vlens: Vec<u64>,
}

impl SstIndex {
    /// Creates an empty index with room for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            keys: Vec::with_capacity(capacity),
            voffsets: Vec::with_capacity(capacity),
            vlens: Vec::with_capacity(capacity),
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` when the index holds no entries.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Key of entry `i`.
    pub fn key(&self, i: usize) -> u64 {
        self.keys[i]
    }

    /// vLog frame offset of entry `i`.
    pub fn voffset(&self, i: usize) -> u64 {
        self.voffsets[i]
    }

    /// Value length of entry `i` (`0` marks a tombstone).
    pub fn vlen(&self, i: usize) -> u64 {
        self.vlens[i]
    }

    /// Binary search for an exact key match.
    pub fn search(&self, key: u64) -> Option<usize> {
        self.keys.binary_search(&key).ok()
    }

    /// Index of the first entry with `key(i) >= key` (may equal `len()`).
    pub fn lower_bound(&self, key: u64) -> usize {
        self.keys.partition_point(|&k| k < key)
    }

    /// Appends an entry. The caller is responsible for keeping keys sorted.
    pub fn insert(&mut self, key: u64, voffset: u64, vlen: u64) {
        self.keys.push(key);
        self.voffsets.push(voffset);
        self.vlens.push(vlen);
    }

    /// Serializes all entries in file order.
    fn encode_to(&self, buf: &mut Vec<u8>) {
        for i in 0..self.len() {
            buf.extend_from_slice(&self.keys[i].to_le_bytes());
            buf.extend_from_slice(&self.voffsets[i].to_le_bytes());
            buf.extend_from_slice(&self.vlens[i].to_le_bytes());
        }
    }

    /// Decodes `key_count` entries from `buf` and validates key ordering.
    fn decode(buf: &[u8], key_count: usize) -> Result<Self, SstableError> {
        if buf.len() < key_count * SST_INDEX_ENTRY_SIZE {
            return Err(SstableError::Corrupt(format!(
                "index needs {} bytes, have {}",
                key_count * SST_INDEX_ENTRY_SIZE,
                buf.len()
            )));
        }

        let mut index = Self::with_capacity(key_count);
        for i in 0..key_count {
            let base = i * SST_INDEX_ENTRY_SIZE;
            let key = read_u64(buf, base);
            if let Some(&prev) = index.keys.last()
                && prev >= key
            {
                return Err(SstableError::Corrupt(format!(
                    "keys not strictly increasing at entry {i}: {prev} >= {key}"
                )));
            }
            index.insert(key, read_u64(buf, base + 8), read_u64(buf, base + 16));
        }
        Ok(index)
    }
}

// ------------------------------------------------------------------------------------------------
// Scan accumulator
// ------------------------------------------------------------------------------------------------

/// Range-scan accumulator shared across tables and levels.
///
/// Maps each key to `(timestamp, value)` of the freshest version seen so
/// far; `None` records a tombstone so older tables cannot resurrect the key.
pub type ScanAcc = BTreeMap<u64, (u64, Option<Vec<u8>>)>;

// ------------------------------------------------------------------------------------------------
// SsTable
// ------------------------------------------------------------------------------------------------

/// One immutable `.sst` file: header, bloom filter, and key index.
///
/// All three sections live in memory for the table's whole lifetime; the
/// file handle is held only while reading or writing.
#[derive(Debug)]
pub struct SsTable {
    path: PathBuf,
    header: SstHeader,
    bloom: BloomFilter,
    index: SstIndex,
}

impl SsTable {
    /// Opens and fully parses an existing table.
    ///
    /// The file is mapped read-only, validated section by section, and
    /// dropped again before returning — only the parsed structures survive.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SstableError> {
        let path_ref = path.as_ref();
        let file = File::open(path_ref)?;

        // Safety: the mapping is read-only and private to this call; the
        // engine never writes an SST file after creation.
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < SST_INDEX_OFFSET {
            return Err(SstableError::Corrupt(format!(
                "file too small: {} bytes",
                mmap.len()
            )));
        }

        let header = SstHeader::decode(&mmap[..SST_HEADER_SIZE])?;

        let key_count = usize::try_from(header.key_count)
            .ok()
            .filter(|&n| n <= SST_MAX_KEY_COUNT)
            .ok_or_else(|| {
                SstableError::Corrupt(format!("impossible key_count {}", header.key_count))
            })?;

        if mmap.len() < SST_INDEX_OFFSET + key_count * SST_INDEX_ENTRY_SIZE {
            return Err(SstableError::Corrupt(format!(
                "file truncated: {} bytes for {} entries",
                mmap.len(),
                key_count
            )));
        }

        let bloom = BloomFilter::from_bytes(&mmap[SST_HEADER_SIZE..SST_INDEX_OFFSET])
            .ok_or_else(|| SstableError::Corrupt("bloom section short".into()))?;

        let index = SstIndex::decode(&mmap[SST_INDEX_OFFSET..], key_count)?;

        if key_count > 0
            && (header.min_key != index.key(0) || header.max_key != index.key(key_count - 1))
        {
            return Err(SstableError::Corrupt(
                "header min/max disagree with index".into(),
            ));
        }

        debug!(
            path = %path_ref.display(),
            timestamp = header.timestamp,
            keys = key_count,
            "SSTable opened"
        );

        Ok(Self {
            path: path_ref.to_path_buf(),
            header,
            bloom,
            index,
        })
    }

    /// Builds a level-0 table from an ordered memtable flush payload.
    ///
    /// `vlog_offset` is the vLog head at flush start; per-key `voffset`s are
    /// assigned by walking the payload in order and skipping tombstones,
    /// mirroring exactly how the staged frames will land in the log.
    pub fn build_from_flush<P: AsRef<Path>>(
        timestamp: u64,
        payload: &[(u64, Vec<u8>)],
        path: P,
        vlog_offset: u64,
    ) -> Result<Self, SstableError> {
        let mut index = SstIndex::with_capacity(payload.len());
        let mut bloom = BloomFilter::new();
        let mut next_offset = vlog_offset;

        for (key, value) in payload {
            bloom.insert(*key);
            if value == DELETE_TAG {
                index.insert(*key, 0, 0);
            } else {
                index.insert(*key, next_offset, value.len() as u64);
                next_offset += (VLOG_FRAME_OVERHEAD + value.len()) as u64;
            }
        }

        Self::seal(timestamp, bloom, index, path)
    }

    /// Builds a table from already-resolved `(key, voffset, vlen)` entries,
    /// ascending by key. Used during compaction; no vLog I/O occurs.
    pub fn build_from_entries<P: AsRef<Path>>(
        timestamp: u64,
        entries: &[(u64, u64, u64)],
        path: P,
    ) -> Result<Self, SstableError> {
        let mut index = SstIndex::with_capacity(entries.len());
        let mut bloom = BloomFilter::new();

        for &(key, voffset, vlen) in entries {
            bloom.insert(key);
            index.insert(key, voffset, vlen);
        }

        Self::seal(timestamp, bloom, index, path)
    }

    /// Finalizes an in-memory table and writes it to disk.
    fn seal<P: AsRef<Path>>(
        timestamp: u64,
        bloom: BloomFilter,
        index: SstIndex,
        path: P,
    ) -> Result<Self, SstableError> {
        let key_count = index.len();
        if key_count == 0 || key_count > SST_MAX_KEY_COUNT {
            return Err(SstableError::Corrupt(format!(
                "cannot seal a table with {key_count} entries"
            )));
        }

        let header = SstHeader {
            timestamp,
            key_count: key_count as u64,
            min_key: index.key(0),
            max_key: index.key(key_count - 1),
        };

        let table = Self {
            path: path.as_ref().to_path_buf(),
            header,
            bloom,
            index,
        };
        table.write()?;

        debug!(
            path = %table.path.display(),
            timestamp,
            keys = key_count,
            "SSTable sealed"
        );
        Ok(table)
    }

    /// Writes the complete file image: header, bloom bits, index entries.
    fn write(&self) -> Result<(), SstableError> {
        let mut buf =
            Vec::with_capacity(SST_INDEX_OFFSET + self.index.len() * SST_INDEX_ENTRY_SIZE);
        buf.extend_from_slice(&self.header.encode());
        buf.extend_from_slice(self.bloom.as_bytes());
        self.index.encode_to(&mut buf);

        debug_assert!(buf.len() <= SST_MAX_FILE_SIZE);
        std::fs::write(&self.path, &buf)?;
        Ok(())
    }

    /// Deletes the backing file. The in-memory table is consumed.
    pub fn remove_file(self) -> Result<(), SstableError> {
        std::fs::remove_file(&self.path)?;
        Ok(())
    }

    /// Table freshness timestamp.
    pub fn timestamp(&self) -> u64 {
        self.header.timestamp
    }

    /// Smallest key in the table.
    pub fn min_key(&self) -> u64 {
        self.header.min_key
    }

    /// Largest key in the table.
    pub fn max_key(&self) -> u64 {
        self.header.max_key
    }

    /// Number of index entries.
    pub fn key_count(&self) -> usize {
        self.index.len()
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The key index.
    pub fn index(&self) -> &SstIndex {
        &self.index
    }

    /// Cheap point-presence test: key range first, bloom filter second.
    ///
    /// A `false` is definitive; a `true` still requires [`Self::search`].
    pub fn may_contain(&self, key: u64) -> bool {
        key >= self.header.min_key && key <= self.header.max_key && self.bloom.may_contain(key)
    }

    /// Exact index lookup.
    pub fn search(&self, key: u64) -> Option<usize> {
        self.index.search(key)
    }

    /// Merges this table's entries in `[k1, k2]` into the accumulator.
    ///
    /// For every key absent from `acc` or present with a strictly smaller
    /// timestamp, the value is resolved through the vLog and the slot is
    /// replaced; tombstones are recorded as `None`. Unresolvable frames
    /// (out of range, checksum damage) are skipped with a warning — the
    /// accumulator keeps whatever older version it already had.
    pub fn scan(&self, k1: u64, k2: u64, acc: &mut ScanAcc, vlog: &ValueLog) {
        let ts = self.header.timestamp;

        for i in self.index.lower_bound(k1)..self.index.len() {
            let key = self.index.key(i);
            if key > k2 {
                break;
            }

            let stale = match acc.get(&key) {
                Some(&(seen_ts, _)) => seen_ts < ts,
                None => true,
            };
            if !stale {
                continue;
            }

            let vlen = self.index.vlen(i);
            if vlen == 0 {
                acc.insert(key, (ts, None));
                continue;
            }

            match vlog.read_value(self.index.voffset(i), vlen) {
                Ok(value) => {
                    acc.insert(key, (ts, Some(value)));
                }
                Err(VlogError::OutOfRange { .. }) => {
                    warn!(key, table = %self.path.display(), "scan: frame outside live region, skipped");
                }
                Err(e) => {
                    warn!(key, table = %self.path.display(), error = %e, "scan: unreadable frame, skipped");
                }
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Byte helpers
// ------------------------------------------------------------------------------------------------

/// Reads a little-endian `u64` at `offset`; bounds were validated upstream.
fn read_u64(buf: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(buf[offset..offset + 8].try_into().expect("8-byte slice"))
}
