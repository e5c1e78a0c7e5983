//! Integration tests for the public `Db` API.
//!
//! These tests go through the public `logkv::{Db, DbConfig, DbError,
//! LockMode}` surface only; on-disk damage is applied with plain `std::fs`.
//!
//! ## Coverage areas
//! - **Lifecycle**: open, close, idempotent close, Drop-based cleanup
//! - **Put/Get**: round-trip, overwrite, missing keys, empty keys and values
//! - **Persistence**: data survives close → reopen and drop without close
//! - **Recovery**: torn tail and garbage tail are truncated on open
//! - **Exclusive open**: fail-fast and waiting lock modes
//! - **Error handling**: closed handle, bad header, missing file
//! - **Concurrency**: shared `Arc<Db>` readers and writers

use logkv::{Db, DbConfig, DbError, LockMode};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

/// File header length: 4-byte magic + 4-byte version.
const HEADER_LEN: u64 = 8;

/// Fixed record header: kind + key_len + val_len + crc.
const RECORD_OVERHEAD: u64 = 13;

fn db_path(dir: &TempDir) -> PathBuf {
    dir.path().join("data.kv")
}

fn reopen(path: &Path) -> Db {
    Db::open(path).expect("reopen")
}

fn file_len(path: &Path) -> u64 {
    fs::metadata(path).unwrap().len()
}

fn append_raw(path: &Path, bytes: &[u8]) {
    let mut f = OpenOptions::new().append(true).open(path).unwrap();
    f.write_all(bytes).unwrap();
}

// ================================================================================================
// Lifecycle
// ================================================================================================

/// # Scenario
/// Open a fresh database and immediately close it.
///
/// # Starting environment
/// Empty temporary directory, no database file.
///
/// # Actions
/// 1. `Db::open`.
/// 2. `db.close()`.
///
/// # Expected behavior
/// The file exists and holds only the 8-byte header.
#[test]
fn open_close_empty() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);

    let db = Db::open(&path).unwrap();
    assert_eq!(db.path(), path.as_path());
    db.close().unwrap();

    assert_eq!(file_len(&path), HEADER_LEN);
    let header = fs::read(&path).unwrap();
    assert_eq!(&header[..4], b"KVDB");
    assert_eq!(&header[4..], &[0, 0, 0, 1]);
}

/// # Scenario
/// Calling `close()` twice must not panic or return an error.
///
/// # Expected behavior
/// Second close is a no-op; later operations return `Closed`.
#[test]
fn double_close_then_operations() {
    let dir = TempDir::new().unwrap();
    let db = Db::open(db_path(&dir)).unwrap();

    db.close().unwrap();
    db.close().unwrap();

    assert!(matches!(db.put(b"k", b"v"), Err(DbError::Closed)));
    assert!(matches!(db.get(b"k"), Err(DbError::Closed)));
}

/// # Scenario
/// Drop a handle without calling `close`.
///
/// # Expected behavior
/// The drop releases the lock; a new handle opens and sees the data.
#[test]
fn drop_releases_lock() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);

    {
        let db = Db::open(&path).unwrap();
        db.put(b"k", b"v").unwrap();
    }

    let db = reopen(&path);
    assert_eq!(db.get(b"k").unwrap(), b"v");
}

// ================================================================================================
// Put / Get
// ================================================================================================

#[test]
fn put_get_round_trip() {
    let dir = TempDir::new().unwrap();
    let db = Db::open(db_path(&dir)).unwrap();

    db.put(b"alpha", b"1").unwrap();
    db.put(b"beta", b"2").unwrap();

    assert_eq!(db.get(b"alpha").unwrap(), b"1");
    assert_eq!(db.get(b"beta").unwrap(), b"2");
}

/// # Scenario
/// Overwrite one key several times.
///
/// # Expected behavior
/// The last value wins, before and after reopen; the file holds every
/// record that was written.
#[test]
fn last_write_wins() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);
    let db = Db::open(&path).unwrap();

    for v in [&b"one"[..], b"two", b"three"] {
        db.put(b"k", v).unwrap();
    }
    assert_eq!(db.get(b"k").unwrap(), b"three");
    db.close().unwrap();

    let expected = HEADER_LEN + 3 * (RECORD_OVERHEAD + 1) + 3 + 3 + 5;
    assert_eq!(file_len(&path), expected);

    let db = reopen(&path);
    assert_eq!(db.get(b"k").unwrap(), b"three");
}

#[test]
fn missing_key() {
    let dir = TempDir::new().unwrap();
    let db = Db::open(db_path(&dir)).unwrap();
    db.put(b"present", b"yes").unwrap();

    assert!(matches!(db.get(b"absent"), Err(DbError::KeyNotFound)));
}

#[test]
fn empty_key_and_value_are_valid() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);
    let db = Db::open(&path).unwrap();

    db.put(b"", b"empty key").unwrap();
    db.put(b"empty value", b"").unwrap();
    db.close().unwrap();

    let db = reopen(&path);
    assert_eq!(db.get(b"").unwrap(), b"empty key");
    assert_eq!(db.get(b"empty value").unwrap(), b"");
}

// ================================================================================================
// Persistence and recovery
// ================================================================================================

/// # Scenario
/// Write 500 keys, close, reopen.
///
/// # Expected behavior
/// Every key is readable with its value.
#[test]
fn persistence_across_reopen() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);

    let db = Db::open(&path).unwrap();
    for i in 0..500u32 {
        db.put(format!("k{i}").as_bytes(), &i.to_be_bytes()).unwrap();
    }
    db.close().unwrap();

    let db = reopen(&path);
    for i in 0..500u32 {
        assert_eq!(db.get(format!("k{i}").as_bytes()).unwrap(), i.to_be_bytes());
    }
}

/// # Scenario
/// Simulate a crash after a torn append: a few bytes of a record header
/// followed by nothing.
///
/// # Starting environment
/// Database with two complete records, closed.
///
/// # Actions
/// 1. Append 5 stray bytes.
/// 2. Reopen.
///
/// # Expected behavior
/// Both keys survive and the file is truncated to header + two records.
#[test]
fn torn_tail_truncated_on_open() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);

    let db = Db::open(&path).unwrap();
    db.put(b"key1", b"value1").unwrap();
    db.put(b"key2", b"value2").unwrap();
    db.close().unwrap();

    let clean = HEADER_LEN + 2 * (RECORD_OVERHEAD + 4 + 6);
    assert_eq!(file_len(&path), clean);

    append_raw(&path, &[0x00, 0x00, 0x00, 0x00, 0x04]);

    let db = reopen(&path);
    assert_eq!(db.get(b"key1").unwrap(), b"value1");
    assert_eq!(db.get(b"key2").unwrap(), b"value2");
    assert_eq!(file_len(&path), clean);
}

/// # Scenario
/// A record in the middle of the file is damaged on disk.
///
/// # Expected behavior
/// Records before it survive; it and everything after are discarded.
#[test]
fn corrupt_middle_record_discards_suffix() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);

    let db = Db::open(&path).unwrap();
    db.put(b"a", b"1").unwrap();
    db.put(b"b", b"2").unwrap();
    db.put(b"c", b"3").unwrap();
    db.close().unwrap();

    let record_len = RECORD_OVERHEAD + 2;
    let mut bytes = fs::read(&path).unwrap();
    let b_value = (HEADER_LEN + record_len + RECORD_OVERHEAD + 1) as usize;
    bytes[b_value] ^= 0x55;
    fs::write(&path, &bytes).unwrap();

    let db = reopen(&path);
    assert_eq!(db.get(b"a").unwrap(), b"1");
    assert!(matches!(db.get(b"b"), Err(DbError::KeyNotFound)));
    assert!(matches!(db.get(b"c"), Err(DbError::KeyNotFound)));
    assert_eq!(file_len(&path), HEADER_LEN + record_len);
}

// ================================================================================================
// Errors at open
// ================================================================================================

#[test]
fn bad_magic_is_invalid_format() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);
    fs::write(&path, b"NOTADBFILE!!").unwrap();

    assert!(matches!(Db::open(&path), Err(DbError::InvalidFormat(_))));
    // Nothing is truncated on a format mismatch.
    assert_eq!(fs::read(&path).unwrap(), b"NOTADBFILE!!");
}

#[test]
fn short_file_is_invalid_format() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);
    fs::write(&path, b"KVD").unwrap();

    assert!(matches!(Db::open(&path), Err(DbError::InvalidFormat(_))));
}

#[test]
fn missing_file_without_create() {
    let dir = TempDir::new().unwrap();
    let config = DbConfig {
        create_if_missing: false,
        ..DbConfig::default()
    };

    match Db::open_with_config(db_path(&dir), config) {
        Err(DbError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[test]
fn missing_parent_directory_is_io_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("no/such/dir/data.kv");

    assert!(matches!(Db::open(&path), Err(DbError::Io(_))));
}

// ================================================================================================
// Exclusive open
// ================================================================================================

/// # Scenario
/// Two handles on one path.
///
/// # Expected behavior
/// The second fails with `Locked` naming the path; after the first closes
/// the second succeeds.
#[test]
fn second_handle_is_locked_out() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);

    let first = Db::open(&path).unwrap();
    match Db::open(&path) {
        Err(DbError::Locked(p)) => assert_eq!(p, path),
        other => panic!("expected Locked, got {other:?}"),
    }

    first.close().unwrap();
    Db::open(&path).unwrap().close().unwrap();
}

/// # Scenario
/// A `LockMode::Wait` open while another handle is open.
///
/// # Expected behavior
/// Blocks until the holder closes, then sees its writes.
#[test]
fn wait_mode_blocks_until_release() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);

    let holder = Db::open(&path).unwrap();
    holder.put(b"from", b"holder").unwrap();

    let (tx, rx) = mpsc::channel();
    let waiter_path = path.clone();
    let waiter = thread::spawn(move || {
        let config = DbConfig {
            lock_mode: LockMode::Wait,
            ..DbConfig::default()
        };
        let db = Db::open_with_config(&waiter_path, config).unwrap();
        tx.send(()).unwrap();
        db.get(b"from").unwrap()
    });

    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    holder.close().unwrap();

    rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(waiter.join().unwrap(), b"holder");
}

/// # Scenario
/// The holder keeps writing after a `LockMode::Wait` open has started
/// blocking.
///
/// # Starting environment
/// Holder has written `a`.
///
/// # Actions
/// 1. Spawn a waiter with `LockMode::Wait`.
/// 2. Holder writes `b` and `c`, then closes.
/// 3. Waiter reads all three keys, writes `d`, closes.
/// 4. Reopen.
///
/// # Expected behavior
/// No committed record is lost or overwritten: all four keys are readable
/// and the file holds exactly header + four records.
#[test]
fn wait_mode_keeps_records_written_while_waiting() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);

    let holder = Db::open(&path).unwrap();
    holder.put(b"a", b"1").unwrap();

    let (tx, rx) = mpsc::channel();
    let waiter_path = path.clone();
    let waiter = thread::spawn(move || {
        let config = DbConfig {
            lock_mode: LockMode::Wait,
            ..DbConfig::default()
        };
        let db = Db::open_with_config(&waiter_path, config).unwrap();
        tx.send(()).unwrap();
        let seen: Vec<Vec<u8>> = [b"a", b"b", b"c"]
            .iter()
            .map(|k| db.get(*k).unwrap())
            .collect();
        db.put(b"d", b"4").unwrap();
        db.close().unwrap();
        seen
    });

    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    holder.put(b"b", b"2").unwrap();
    holder.put(b"c", b"3").unwrap();
    holder.close().unwrap();

    rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(waiter.join().unwrap(), vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec()]);

    let db = reopen(&path);
    for (k, v) in [(b"a", b"1"), (b"b", b"2"), (b"c", b"3"), (b"d", b"4")] {
        assert_eq!(db.get(k).unwrap(), v);
    }
    assert_eq!(file_len(&path), HEADER_LEN + 4 * (RECORD_OVERHEAD + 2));
}

// ================================================================================================
// Concurrency
// ================================================================================================

/// # Scenario
/// 8 writer threads and 8 reader threads share one `Arc<Db>`.
///
/// # Expected behavior
/// No errors; afterwards every written key holds its writer's value.
#[test]
fn concurrent_readers_and_writers() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);
    let db = Arc::new(Db::open(&path).unwrap());
    db.put(b"seed", b"0").unwrap();

    let mut handles = Vec::new();
    for t in 0..8u32 {
        let db = Arc::clone(&db);
        handles.push(thread::spawn(move || {
            for n in 0..50u32 {
                let key = format!("t{t}-k{n}");
                db.put(key.as_bytes(), &n.to_le_bytes()).unwrap();
            }
        }));
    }
    for _ in 0..8 {
        let db = Arc::clone(&db);
        handles.push(thread::spawn(move || {
            for _ in 0..50 {
                assert_eq!(db.get(b"seed").unwrap(), b"0");
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    db.close().unwrap();
    let db = reopen(&path);
    for t in 0..8u32 {
        for n in 0..50u32 {
            let key = format!("t{t}-k{n}");
            assert_eq!(db.get(key.as_bytes()).unwrap(), n.to_le_bytes());
        }
    }
}

#[test]
fn db_is_send_and_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Db>();
}
