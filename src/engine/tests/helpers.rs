use crate::engine::{Engine, EngineConfig};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
/// Safe to call multiple times; only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Database file path inside a temp dir.
pub fn db_path(tmp: &TempDir) -> PathBuf {
    tmp.path().join("test.kv")
}

/// Open with default (fail-fast) config.
pub fn open(path: &Path) -> Engine {
    init_tracing();
    Engine::open(path, EngineConfig::default()).expect("open")
}

pub fn key(i: usize) -> Vec<u8> {
    format!("key{i}").into_bytes()
}

pub fn value(i: usize) -> Vec<u8> {
    format!("value{i}").into_bytes()
}
