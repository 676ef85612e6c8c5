//! # ValeKV
//!
//! An embeddable, persistent key-value storage engine built on a
//! **Log-Structured Merge Tree (LSM-tree)** with **WiscKey-style key/value
//! separation**: sorted tables on disk hold only keys plus pointers into an
//! append-only value log.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                       Engine                           │
//! │  ┌────────────┐   ┌──────────────────┐  ┌───────────┐  │
//! │  │  Memtable  │   │  SSTs, leveled   │  │   vLog    │  │
//! │  │  (skiplist │   │  level-0 … N     │  │ (values,  │  │
//! │  │   + WAL)   │   │  keys + offsets  │──►  framed)  │  │
//! │  └─────┬──────┘   └───────┬──────────┘  └───────────┘  │
//! │        │   flush          │  leveled compaction        │
//! │        └──────────►       ▼                            │
//! │                    overlap merge, tombstone GC         │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Core storage engine — open, read, write, scan, reset, GC |
//! | [`memtable`] | In-memory write buffer with tombstones and WAL recovery |
//! | [`skiplist`] | Arena-allocated ordered map backing the memtable |
//! | [`wal`] | Line-oriented write-ahead log for crash recovery |
//! | [`sstable`] | Immutable on-disk tables: header, bloom filter, key index |
//! | [`vlog`] | Append-only value log with framed, checksummed records |
//! | [`bloom`] | Fixed-size bloom filter over 64-bit keys |
//! | [`compaction`] | Leveled compaction with overlap selection |
//!
//! ## Key properties
//!
//! - **Write-ahead logging** — every mutation reaches the WAL before it is
//!   acknowledged, so an unflushed memtable survives a crash.
//! - **Key/value separation** — values are appended to the vLog once and
//!   referenced by offset; compaction moves 24-byte index entries, not
//!   payloads.
//! - **Leveled compaction** — level `L` holds at most `2^(L+1)` tables;
//!   levels ≥ 1 keep pairwise-disjoint key ranges.
//! - **Timestamped freshness** — every table carries a monotonic timestamp;
//!   the newest version of a key always wins across levels.
//! - **Value-log GC** — dead frames at the log tail are reclaimed with a
//!   sparse-file hole punch; live values are rewritten at the head.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use valekv::engine::{Engine, EngineConfig};
//!
//! let config = EngineConfig {
//!     wal_path: "/tmp/valekv/WAL.log".into(),
//! };
//! let mut engine = Engine::open("/tmp/valekv", config).unwrap();
//!
//! engine.put(42, b"value".to_vec()).unwrap();
//! assert_eq!(engine.get(42).unwrap(), b"value".to_vec());
//!
//! assert!(engine.del(42).unwrap());
//! assert!(engine.get(42).unwrap().is_empty());
//!
//! let mut out = Vec::new();
//! engine.scan(0, 100, &mut out).unwrap();
//!
//! engine.close().unwrap();
//! ```

#![allow(dead_code)]

pub mod bloom;
pub mod compaction;
pub mod engine;
pub mod memtable;
pub mod skiplist;
pub mod sstable;
pub mod vlog;
pub mod wal;

pub use engine::{Engine, EngineConfig, EngineError};
