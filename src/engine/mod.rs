//! # Storage Engine
//!
//! Ties the [`LogFile`], the recovery scanner and the [`Index`] together
//! behind one in-process reader/writer lock.
//!
//! ## Concurrency Model
//!
//! All state lives in a single `RwLock<Option<EngineInner>>` owned by the
//! engine.
//!
//! - `get` takes the **read** lock; any number of gets run in parallel and
//!   read the file with positioned I/O.
//! - `put` takes the **write** lock for append + fsync + index update, so
//!   puts are fully serialized and never overlap a get.
//! - `close` takes the write lock, syncs, releases the advisory lock and
//!   drops the file. The slot becomes `None` and every later call fails
//!   with [`EngineError::Closed`].
//!
//! Cross-process exclusion is the advisory lock on the log file, taken in
//! [`Engine::open`] before recovery runs.
//!
//! ## Guarantees
//!
//! - **Durability:** a `put` returns `Ok` only after its record was synced.
//! - **Atomic visibility:** the index is updated after the sync and under the
//!   same write lock, so a get that follows a successful put observes it.
//! - **Failed puts stay invisible:** if the append or sync fails the index is
//!   untouched and the error is returned.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use tracing::{error, info, trace};

use crate::index::Index;
use crate::log::{LogError, LogFile};
use crate::record::{Record, RecordError};
use crate::recovery::{self, RecoveryError};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Error originating from the log file.
    #[error("Log error: {0}")]
    Log(#[from] LogError),

    /// Error originating from the recovery scan.
    #[error("Recovery error: {0}")]
    Recovery(#[from] RecoveryError),

    /// Error originating from record encoding or decoding.
    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    /// The key was never successfully written.
    #[error("Key not found")]
    KeyNotFound,

    /// An indexed record failed verification.
    #[error("Corrupt record at offset {offset}")]
    Corrupt { offset: u64 },

    /// The engine has been closed.
    #[error("Engine is closed")]
    Closed,

    /// Internal invariant violation (poisoned lock).
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Configuration for an [`Engine`] instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Block until the exclusive lock is free instead of failing.
    pub wait_for_lock: bool,

    /// Create the file if it does not exist.
    pub create_if_missing: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            wait_for_lock: false,
            create_if_missing: true,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Engine
// ------------------------------------------------------------------------------------------------

struct EngineInner {
    /// The database file; owns the descriptor and the advisory lock.
    log: LogFile,

    /// Key → offset of latest record.
    index: Index,
}

/// Single-file append-only storage engine.
pub struct Engine {
    path: PathBuf,
    state: RwLock<Option<EngineInner>>,
}

impl Engine {
    // --------------------------------------------------------------------------------------------
    // Lock helpers
    // --------------------------------------------------------------------------------------------

    fn read_lock(&self) -> Result<RwLockReadGuard<'_, Option<EngineInner>>, EngineError> {
        self.state
            .read()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))
    }

    fn write_lock(&self) -> Result<RwLockWriteGuard<'_, Option<EngineInner>>, EngineError> {
        self.state
            .write()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))
    }

    // --------------------------------------------------------------------------------------------
    // Lifecycle
    // --------------------------------------------------------------------------------------------

    /// Opens (or creates) the database file at `path`.
    ///
    /// 1. Open / create the file.
    /// 2. Take the exclusive advisory lock (fail fast or wait).
    /// 3. Run recovery: write the header of a fresh file, or replay the log,
    ///    truncating a damaged tail.
    ///
    /// If any step fails the file is closed again, which also drops the lock.
    pub fn open(path: impl AsRef<Path>, config: EngineConfig) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let mut log = LogFile::open_or_create(path, config.create_if_missing)?;

        if config.wait_for_lock {
            log.lock_exclusive()?;
        } else {
            log.try_lock_exclusive()?;
        }

        let recovered = recovery::recover(&mut log)?;

        info!(
            path = %path.display(),
            keys = recovered.index.len(),
            records = recovered.records,
            truncated_bytes = recovered.truncated_bytes,
            fresh = recovered.fresh,
            "engine opened"
        );

        Ok(Self {
            path: path.to_path_buf(),
            state: RwLock::new(Some(EngineInner {
                log,
                index: recovered.index,
            })),
        })
    }

    /// Syncs the file, releases the advisory lock and closes the file.
    ///
    /// Closing an already closed engine is a no-op. If the sync or unlock
    /// fails the engine stays open and the error is returned.
    pub fn close(&self) -> Result<(), EngineError> {
        let mut state = self.write_lock()?;

        let Some(inner) = state.as_ref() else {
            return Ok(());
        };

        inner.log.sync()?;
        inner.log.unlock()?;
        *state = None;

        info!(path = %self.path.display(), "engine closed");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // --------------------------------------------------------------------------------------------
    // Operations
    // --------------------------------------------------------------------------------------------

    /// Durably writes `key → value`.
    ///
    /// Order: encode, append at end of file, fsync, update index.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), EngineError> {
        let record = Record::entry(key, value);
        let bytes = record.encode()?;

        let mut state = self.write_lock()?;
        let inner = state.as_mut().ok_or(EngineError::Closed)?;

        let offset = inner.log.append(&bytes)?;
        inner.log.sync()?;
        inner.index.set(record.key, offset);

        trace!(offset, key_len = key.len(), value_len = value.len(), "engine put");
        Ok(())
    }

    /// Returns the latest value written for `key`.
    ///
    /// Fails with [`EngineError::KeyNotFound`] if the key is absent and with
    /// [`EngineError::Corrupt`] if its indexed record no longer verifies.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>, EngineError> {
        let state = self.read_lock()?;
        let inner = state.as_ref().ok_or(EngineError::Closed)?;

        let offset = inner.index.get(key).ok_or(EngineError::KeyNotFound)?;

        match Record::decode_at(&inner.log, offset) {
            Ok((record, _)) if record.key == key => {
                trace!(offset, value_len = record.value.len(), "engine get");
                Ok(record.value)
            }
            Ok(_) => {
                error!(offset, "indexed record holds a different key");
                Err(EngineError::Corrupt { offset })
            }
            Err(e @ (RecordError::Incomplete { .. } | RecordError::Corrupt { .. })) => {
                error!(offset, "indexed record failed verification: {e}");
                Err(EngineError::Corrupt { offset })
            }
            Err(e) => Err(e.into()),
        }
    }

    #[cfg(test)]
    pub(crate) fn key_count(&self) -> Result<usize, EngineError> {
        let state = self.read_lock()?;
        let inner = state.as_ref().ok_or(EngineError::Closed)?;
        Ok(inner.index.len())
    }
}
