use crate::engine::{Engine, EngineConfig};
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Initialize a tracing subscriber controlled by `RUST_LOG`.
/// Safe to call multiple times — only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Engine config keeping the WAL inside the test's data directory, so
/// parallel tests never share the default working-directory WAL.
pub fn config_in(dir: &Path) -> EngineConfig {
    init_tracing();
    EngineConfig {
        wal_path: dir.join("WAL.log"),
    }
}

/// Opens an engine rooted at `dir` with the test config.
pub fn open(dir: &Path) -> Engine {
    Engine::open(dir, config_in(dir)).expect("open engine")
}

/// Deterministic value for a key: `v<k>` plus padding so that a few hundred
/// keys overflow the memtable and force flushes.
pub fn padded_value(k: u64) -> Vec<u8> {
    format!("v{k:06}-{}", "x".repeat(24)).into_bytes()
}

/// Writes `keys` with [`padded_value`] payloads.
pub fn fill(engine: &mut Engine, keys: impl Iterator<Item = u64>) {
    for k in keys {
        engine.put(k, padded_value(k)).expect("put");
    }
}

/// Collects a scan into a vector.
pub fn collect_scan(engine: &Engine, k1: u64, k2: u64) -> Vec<(u64, Vec<u8>)> {
    let mut out = Vec::new();
    engine.scan(k1, k2, &mut out).expect("scan");
    out
}

/// Total SST count across all levels.
pub fn table_count(engine: &Engine) -> usize {
    engine.stats().level_counts.iter().map(|(_, n)| n).sum()
}
