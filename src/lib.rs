//! # logkv
//!
//! An embeddable, persistent key-value store kept in a **single
//! append-only file**. Every write is appended and fsynced before it is
//! acknowledged; an in-memory hash index maps each key to the offset of its
//! latest record and is rebuilt by scanning the file on open.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use logkv::{Db, DbError};
//!
//! let db = Db::open("/tmp/my.kv").unwrap();
//!
//! // Write (durable once this returns)
//! db.put(b"hello", b"world").unwrap();
//!
//! // Read
//! assert_eq!(db.get(b"hello").unwrap(), b"world");
//! assert!(matches!(db.get(b"missing"), Err(DbError::KeyNotFound)));
//!
//! // Release the file and its lock
//! db.close().unwrap();
//! ```
//!
//! ## Features
//!
//! - **Durable puts**: a record is fsynced before `put` returns.
//! - **Last write wins**: overwrites append a new record; the old one is
//!   shadowed, never rewritten.
//! - **CRC32 integrity**: every record is checksummed and verified on read.
//! - **Crash recovery**: a torn or corrupt tail is truncated on open.
//! - **Exclusive open**: an OS advisory lock keeps a second handle out.

pub(crate) mod engine;
pub(crate) mod index;
pub(crate) mod log;
pub(crate) mod record;
pub(crate) mod recovery;

use std::io;
use std::path::{Path, PathBuf};

use engine::{Engine, EngineConfig, EngineError};
use log::LogError;
use record::RecordError;
use recovery::RecoveryError;
use thiserror::Error;
use tracing::error;

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// What [`Db::open_with_config`] does when another handle holds the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockMode {
    /// Fail immediately with [`DbError::Locked`].
    #[default]
    FailFast,

    /// Block until the current holder closes the file.
    Wait,
}

/// Configuration for a [`Db`] instance.
///
/// # Example
///
/// ```rust
/// use logkv::{DbConfig, LockMode};
///
/// let config = DbConfig {
///     lock_mode: LockMode::Wait,
///     ..DbConfig::default()
/// };
/// assert!(config.create_if_missing);
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Behaviour when the exclusive lock is held elsewhere.
    ///
    /// Default: [`LockMode::FailFast`].
    pub lock_mode: LockMode,

    /// Create an empty database when `path` does not exist.
    ///
    /// Default: `true`. When `false`, a missing file is a
    /// [`DbError::Io`] with kind `NotFound`.
    pub create_if_missing: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            lock_mode: LockMode::FailFast,
            create_if_missing: true,
        }
    }
}

impl DbConfig {
    fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            wait_for_lock: self.lock_mode == LockMode::Wait,
            create_if_missing: self.create_if_missing,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors returned by [`Db`] operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// Underlying filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The file is not a database of this format (bad magic or version,
    /// or too short to hold a header).
    #[error("invalid database format: {0}")]
    InvalidFormat(String),

    /// An indexed record no longer verifies.
    #[error("corrupt record at offset {offset}")]
    Corrupt { offset: u64 },

    /// The key was never written.
    #[error("key not found")]
    KeyNotFound,

    /// Another handle holds the exclusive lock on the file.
    #[error("database is locked: {}", .0.display())]
    Locked(PathBuf),

    /// The handle has been closed.
    #[error("database is closed")]
    Closed,

    /// Key or value constraint violated.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<EngineError> for DbError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Log(e) => e.into(),
            EngineError::Recovery(RecoveryError::Log(e)) => e.into(),
            EngineError::Recovery(RecoveryError::Record(e)) => e.into(),
            EngineError::Record(e) => e.into(),
            EngineError::KeyNotFound => DbError::KeyNotFound,
            EngineError::Corrupt { offset } => DbError::Corrupt { offset },
            EngineError::Closed => DbError::Closed,
            EngineError::Internal(msg) => DbError::Internal(msg),
        }
    }
}

impl From<LogError> for DbError {
    fn from(e: LogError) -> Self {
        match e {
            LogError::Io(e) => DbError::Io(e),
            LogError::InvalidFormat(msg) => DbError::InvalidFormat(msg),
            LogError::Locked(path) => DbError::Locked(path),
            other @ (LogError::ReadPastEnd { .. } | LogError::TruncateBeyondEnd { .. }) => {
                DbError::Internal(other.to_string())
            }
        }
    }
}

impl From<RecordError> for DbError {
    fn from(e: RecordError) -> Self {
        match e {
            RecordError::Io(e) => DbError::Io(e),
            RecordError::TooLarge(len) => {
                DbError::InvalidArgument(format!("{len} bytes exceeds the u32 length limit"))
            }
            RecordError::Incomplete { offset } | RecordError::Corrupt { offset, .. } => {
                DbError::Corrupt { offset }
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Database handle
// ------------------------------------------------------------------------------------------------

/// The main database handle.
///
/// # Thread safety
///
/// `Db` is `Send + Sync`; share it across threads via `Arc<Db>`. Gets run
/// in parallel; puts are serialized against each other and against gets.
///
/// # Exclusive access
///
/// Opening takes an exclusive advisory lock on the file. A second open of
/// the same path (from this or another process) fails with
/// [`DbError::Locked`] or, with [`LockMode::Wait`], blocks until the
/// first handle is closed.
///
/// # Shutdown
///
/// Call [`Db::close`] to release the file. Dropping an open handle closes
/// it too, but errors are only logged.
pub struct Db {
    engine: Engine,
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("path", &self.engine.path())
            .finish_non_exhaustive()
    }
}

impl Db {
    /// Opens (or creates) the database file at `path` with default
    /// configuration.
    ///
    /// The parent directory must exist. On an existing file the log is
    /// replayed to rebuild the index; a torn or corrupt tail is truncated.
    ///
    /// # Errors
    ///
    /// - [`DbError::Locked`] if another handle holds the file.
    /// - [`DbError::InvalidFormat`] if the header is not recognized.
    /// - [`DbError::Io`] on filesystem failure.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DbError> {
        Self::open_with_config(path, DbConfig::default())
    }

    /// Opens the database file at `path` with an explicit configuration.
    pub fn open_with_config(path: impl AsRef<Path>, config: DbConfig) -> Result<Self, DbError> {
        let engine = Engine::open(path, config.to_engine_config())?;
        Ok(Self { engine })
    }

    /// Syncs and closes the file and releases the lock.
    ///
    /// Subsequent operations on this handle return [`DbError::Closed`].
    /// Calling `close` more than once is harmless.
    pub fn close(&self) -> Result<(), DbError> {
        Ok(self.engine.close()?)
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        self.engine.path()
    }

    // --------------------------------------------------------------------------------------------
    // Operations
    // --------------------------------------------------------------------------------------------

    /// Inserts or overwrites a key-value pair.
    ///
    /// Returns once the record is appended and synced to disk. Empty keys
    /// and values are allowed.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidArgument`] if `key` or `value` is longer
    /// than `u32::MAX` bytes.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), DbError> {
        Ok(self.engine.put(key, value)?)
    }

    /// Retrieves the latest value written for `key`.
    ///
    /// # Errors
    ///
    /// - [`DbError::KeyNotFound`] if the key was never written.
    /// - [`DbError::Corrupt`] if the stored record fails verification.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>, DbError> {
        Ok(self.engine.get(key)?)
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        if let Err(e) = self.engine.close() {
            error!(path = %self.engine.path().display(), "close on drop failed: {e}");
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------
