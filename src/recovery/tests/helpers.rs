use crate::log::{HEADER_SIZE, LogFile};
use crate::record::Record;
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
/// Safe to call multiple times; only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// `key_0000` → `val_0000` style record.
pub fn numbered(i: usize) -> Record {
    Record::entry(
        format!("key_{i:04}").into_bytes(),
        format!("val_{i:04}").into_bytes(),
    )
}

/// Create a database file containing a header followed by `records`.
/// Returns the offset each record was written at.
pub fn write_log(path: &Path, records: &[Record]) -> Vec<u64> {
    let mut log = LogFile::open_or_create(path, true).unwrap();
    log.write_header().unwrap();
    let offsets = records
        .iter()
        .map(|r| log.append(&r.encode().unwrap()).unwrap())
        .collect();
    log.sync().unwrap();
    offsets
}

/// File length of a clean log holding exactly `records`.
pub fn clean_len(records: &[Record]) -> u64 {
    HEADER_SIZE + records.iter().map(Record::encoded_len).sum::<u64>()
}
