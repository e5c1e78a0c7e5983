//! # Log File
//!
//! The single append-only file that holds the whole database.
//!
//! ## On-disk layout
//!
//! ```text
//! offset 0..8 : [MAGIC u32 BE][FORMAT_VERSION u32 BE]
//! offset 8..N : [RECORD][RECORD]...   (see crate::record)
//! ```
//!
//! ## I/O model
//!
//! - All reads are **positioned** (`pread`), so concurrent readers never
//!   share or move a file cursor.
//! - Appends write at the tracked end-of-file offset and advance it only
//!   after the whole buffer was written. The caller must serialize appends
//!   (the engine holds its write lock).
//! - [`LogFile::sync`] is the durability barrier (`fsync`).
//! - [`LogFile::truncate`] is only used by recovery to cut a damaged tail.
//!
//! ## Locking
//!
//! The exclusive advisory lock is taken on this file's descriptor via
//! [`fs2`], so it is released when the descriptor is closed, including
//! when the owning process dies.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------


// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    fs::{File, OpenOptions},
    io,
    os::unix::fs::{FileExt as _, OpenOptionsExt},
    path::{Path, PathBuf},
};

use fs2::FileExt;
use thiserror::Error;
use tracing::{debug, info};

use crate::record::RecordSource;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Magic constant identifying a database file (`"KVDB"`).
pub const MAGIC: u32 = 0x4B56_4442;

/// On-disk format version understood by this implementation.
pub const FORMAT_VERSION: u32 = 1;

/// Size of the file header in bytes.
pub const HEADER_SIZE: u64 = 8;

/// Permission bits for newly created database files.
const FILE_MODE: u32 = 0o644;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by log file operations.
#[derive(Debug, Error)]
pub enum LogError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Header is missing, has the wrong magic, or an unsupported version.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Another handle holds the exclusive lock.
    #[error("Database is locked: {}", .0.display())]
    Locked(PathBuf),

    /// Requested range extends past the end of the file.
    #[error("Read past end (offset {offset}, len {len}, size {size})")]
    ReadPastEnd { offset: u64, len: usize, size: u64 },

    /// Truncation target is larger than the current file.
    #[error("Cannot truncate to {requested} bytes (size {size})")]
    TruncateBeyondEnd { requested: u64, size: u64 },
}

// ------------------------------------------------------------------------------------------------
// Header
// ------------------------------------------------------------------------------------------------

/// Fixed header written once when the file is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub magic: u32,
    pub version: u32,
}

impl FileHeader {
    /// Header for files written by this implementation.
    pub fn current() -> Self {
        Self {
            magic: MAGIC,
            version: FORMAT_VERSION,
        }
    }

    /// Serializes the header field by field, big-endian.
    pub fn encode(&self) -> [u8; HEADER_SIZE as usize] {
        let mut buf = [0u8; HEADER_SIZE as usize];
        buf[0..4].copy_from_slice(&self.magic.to_be_bytes());
        buf[4..8].copy_from_slice(&self.version.to_be_bytes());
        buf
    }

    pub fn decode(buf: &[u8; HEADER_SIZE as usize]) -> Self {
        let mut magic = [0u8; 4];
        let mut version = [0u8; 4];
        magic.copy_from_slice(&buf[0..4]);
        version.copy_from_slice(&buf[4..8]);
        Self {
            magic: u32::from_be_bytes(magic),
            version: u32::from_be_bytes(version),
        }
    }

    /// Checks magic and version against what this implementation understands.
    pub fn validate(&self) -> Result<(), LogError> {
        if self.magic != MAGIC {
            return Err(LogError::InvalidFormat(format!(
                "bad magic 0x{:08X}",
                self.magic
            )));
        }
        if self.version != FORMAT_VERSION {
            return Err(LogError::InvalidFormat(format!(
                "unsupported format version {}",
                self.version
            )));
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Log file
// ------------------------------------------------------------------------------------------------

/// Append-only, byte-addressable database file.
#[derive(Debug)]
pub struct LogFile {
    /// Open read/write descriptor; also carries the advisory lock.
    file: File,

    /// Path the file was opened from.
    path: PathBuf,

    /// Current end-of-file offset; the next append lands here.
    len: u64,
}

impl LogFile {
    /// Opens the file at `path`, creating it when `create` is set.
    ///
    /// An existing file is never truncated.
    pub fn open_or_create(path: impl AsRef<Path>, create: bool) -> Result<Self, LogError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .truncate(false)
            .mode(FILE_MODE)
            .open(path)?;

        let len = file.metadata()?.len();
        debug!(path = %path.display(), len, "opened log file");

        Ok(Self {
            file,
            path: path.to_path_buf(),
            len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current length of the file in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    // --------------------------------------------------------------------------------------------
    // Locking
    // --------------------------------------------------------------------------------------------

    /// Takes the exclusive advisory lock, failing with [`LogError::Locked`]
    /// if another handle holds it.
    ///
    /// The cached length is re-read once the lock is held.
    pub fn try_lock_exclusive(&mut self) -> Result<(), LogError> {
        FileExt::try_lock_exclusive(&self.file).map_err(|e| {
            if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
                LogError::Locked(self.path.clone())
            } else {
                LogError::Io(e)
            }
        })?;
        self.refresh_len()
    }

    /// Takes the exclusive advisory lock, blocking until it is available.
    ///
    /// The previous holder may have appended while we waited, so the cached
    /// length is re-read once the lock is held.
    pub fn lock_exclusive(&mut self) -> Result<(), LogError> {
        FileExt::lock_exclusive(&self.file)?;
        self.refresh_len()
    }

    fn refresh_len(&mut self) -> Result<(), LogError> {
        let len = self.file.metadata()?.len();
        if len != self.len {
            debug!(
                path = %self.path.display(),
                stale = self.len,
                len,
                "file length changed before lock"
            );
        }
        self.len = len;
        Ok(())
    }

    pub fn unlock(&self) -> Result<(), LogError> {
        FileExt::unlock(&self.file)?;
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // I/O
    // --------------------------------------------------------------------------------------------

    /// Reads exactly `len` bytes starting at `offset` without moving any
    /// shared cursor.
    pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>, LogError> {
        let end = offset.saturating_add(len as u64);
        if end > self.len {
            return Err(LogError::ReadPastEnd {
                offset,
                len,
                size: self.len,
            });
        }

        let mut buf = vec![0u8; len];
        if len > 0 {
            self.file.read_exact_at(&mut buf, offset)?;
        }
        Ok(buf)
    }

    /// Writes `bytes` at the current end of file and returns the offset
    /// they were written at.
    ///
    /// Not durable until [`LogFile::sync`] returns.
    pub fn append(&mut self, bytes: &[u8]) -> Result<u64, LogError> {
        let offset = self.len;
        if bytes.is_empty() {
            return Ok(offset);
        }

        self.file.write_all_at(bytes, offset)?;
        self.len += bytes.len() as u64;
        Ok(offset)
    }

    /// Forces all written bytes to durable storage.
    pub fn sync(&self) -> Result<(), LogError> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Discards everything past `len` and syncs the new length.
    pub fn truncate(&mut self, len: u64) -> Result<(), LogError> {
        if len > self.len {
            return Err(LogError::TruncateBeyondEnd {
                requested: len,
                size: self.len,
            });
        }

        self.file.set_len(len)?;
        self.file.sync_all()?;
        self.len = len;
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Header
    // --------------------------------------------------------------------------------------------

    /// Writes and syncs the header of a fresh, empty file.
    pub fn write_header(&mut self) -> Result<(), LogError> {
        if !self.is_empty() {
            return Err(LogError::InvalidFormat(format!(
                "refusing to write header into non-empty file ({} bytes)",
                self.len
            )));
        }

        self.append(&FileHeader::current().encode())?;
        self.sync()?;

        info!(path = %self.path.display(), "created new database file");
        Ok(())
    }

    /// Reads and validates the header of an existing file.
    pub fn read_header(&self) -> Result<FileHeader, LogError> {
        if self.len < HEADER_SIZE {
            return Err(LogError::InvalidFormat(format!(
                "file too short for header ({} bytes)",
                self.len
            )));
        }

        let bytes = self.read_at(0, HEADER_SIZE as usize)?;
        let mut raw = [0u8; HEADER_SIZE as usize];
        raw.copy_from_slice(&bytes);

        let header = FileHeader::decode(&raw);
        header.validate()?;
        Ok(header)
    }
}

impl RecordSource for LogFile {
    fn source_len(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        std::os::unix::fs::FileExt::read_exact_at(&self.file, buf, offset)
    }
}
