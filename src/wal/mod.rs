//! # Write-Ahead Log Module
//!
//! A line-oriented, append-only log that makes the memtable recoverable.
//! Every memtable mutation is appended here *before* it is applied in
//! memory; on start the memtable replays the log to rebuild its state.
//!
//! # On-disk layout
//!
//! One record per line, text-encoded:
//!
//! ```text
//! PUT <decimal key> <raw value bytes>\n
//! DEL <decimal key>\n
//! ```
//!
//! The value field is the raw byte payload up to the terminating newline;
//! values therefore must not contain `\n` (the engine stores tombstones as
//! the fixed [`crate::memtable::DELETE_TAG`] string, which satisfies this).
//!
//! # Guarantees
//!
//! - **Durability:** every `append_*` issues the write syscall before
//!   returning, so records reach the OS before a mutation is acknowledged.
//!   No fsync is issued — the crash model covers process death, not power
//!   loss.
//! - **Truncation tolerance:** replay stops at the first malformed or
//!   partial line and keeps everything before it.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, info, trace, warn};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by WAL operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WalError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record line could not be parsed.
    #[error("malformed WAL record at byte {0}")]
    Malformed(u64),
}

// ------------------------------------------------------------------------------------------------
// Records
// ------------------------------------------------------------------------------------------------

/// A logical WAL record: one memtable mutation.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum WalRecord {
    /// Insert or update a single key.
    Put {
        /// The written key.
        key: u64,
        /// Raw value bytes (tombstones travel as their sentinel string).
        value: Vec<u8>,
    },

    /// Delete a single key.
    Del {
        /// The deleted key.
        key: u64,
    },
}

// ------------------------------------------------------------------------------------------------
// WAL Core
// ------------------------------------------------------------------------------------------------

/// An append-only write-ahead log over a single file.
#[derive(Debug)]
pub struct Wal {
    /// Open handle in append mode.
    file: File,

    /// Path to the WAL file on disk.
    path: PathBuf,
}

impl Wal {
    /// Opens or creates the WAL at `path`.
    ///
    /// Existing content is preserved — call [`Wal::replay`] to read it back.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, WalError> {
        let path_ref = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path_ref)?;

        info!(path = %path_ref.display(), "WAL opened");

        Ok(Self {
            file,
            path: path_ref.to_path_buf(),
        })
    }

    /// Appends a `PUT` record.
    pub fn append_put(&mut self, key: u64, value: &[u8]) -> Result<(), WalError> {
        let mut line = Vec::with_capacity(value.len() + 32);
        line.extend_from_slice(b"PUT ");
        line.extend_from_slice(key.to_string().as_bytes());
        line.push(b' ');
        line.extend_from_slice(value);
        line.push(b'\n');

        self.file.write_all(&line)?;
        trace!(key, len = value.len(), "WAL put appended");
        Ok(())
    }

    /// Appends a `DEL` record.
    pub fn append_del(&mut self, key: u64) -> Result<(), WalError> {
        let mut line = Vec::with_capacity(32);
        line.extend_from_slice(b"DEL ");
        line.extend_from_slice(key.to_string().as_bytes());
        line.push(b'\n');

        self.file.write_all(&line)?;
        trace!(key, "WAL del appended");
        Ok(())
    }

    /// Replays all complete records from the start of the file.
    ///
    /// A trailing partial or malformed line ends the replay with a warning;
    /// everything decoded up to that point is returned.
    pub fn replay(&mut self) -> Result<Vec<WalRecord>, WalError> {
        debug!(path = %self.path.display(), "WAL replay started");

        let mut raw = Vec::new();
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_to_end(&mut raw)?;
        self.file.seek(SeekFrom::End(0))?;

        let mut records = Vec::new();
        let mut offset = 0usize;

        while offset < raw.len() {
            let Some(rel_end) = raw[offset..].iter().position(|&b| b == b'\n') else {
                warn!(offset, "WAL ends with a partial record; dropping tail");
                break;
            };
            let line = &raw[offset..offset + rel_end];

            match Self::parse_line(line) {
                Some(record) => records.push(record),
                None => {
                    warn!(offset, "malformed WAL record; stopping replay");
                    break;
                }
            }
            offset += rel_end + 1;
        }

        debug!(count = records.len(), "WAL replay finished");
        Ok(records)
    }

    /// Truncates the log to zero length.
    pub fn truncate(&mut self) -> Result<(), WalError> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        info!(path = %self.path.display(), "WAL truncated");
        Ok(())
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decodes one record line (without its newline).
    fn parse_line(line: &[u8]) -> Option<WalRecord> {
        if let Some(rest) = line.strip_prefix(b"PUT ") {
            let space = rest.iter().position(|&b| b == b' ')?;
            let key = parse_key(&rest[..space])?;
            Some(WalRecord::Put {
                key,
                value: rest[space + 1..].to_vec(),
            })
        } else if let Some(rest) = line.strip_prefix(b"DEL ") {
            let key = parse_key(rest)?;
            Some(WalRecord::Del { key })
        } else {
            None
        }
    }
}

/// Parses an ASCII-decimal key field.
fn parse_key(field: &[u8]) -> Option<u64> {
    std::str::from_utf8(field).ok()?.parse().ok()
}
