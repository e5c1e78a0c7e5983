//! # Recovery Scanner
//!
//! Runs once inside `open`, before the handle is visible to any caller,
//! and rebuilds the [`Index`] from the log.
//!
//! ## Procedure
//!
//! 1. Empty file → write the header, return an empty index (fresh database).
//! 2. Otherwise read and validate the header. A bad magic, an unsupported
//!    version or a file shorter than the header fails with `InvalidFormat`
//!    and nothing is modified.
//! 3. Decode records back-to-back starting at [`HEADER_SIZE`], pointing
//!    `index[key]` at each valid record's offset.
//! 4. The first `Incomplete` or `Corrupt` record ends the scan and the file
//!    is truncated to that record's offset. Everything before it stays
//!    indexed; everything from it onwards is discarded, even records that
//!    would individually still verify.
//! 5. An I/O error aborts recovery without truncating anything.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use thiserror::Error;
use tracing::{info, warn};

use crate::index::Index;
use crate::log::{HEADER_SIZE, LogError, LogFile};
use crate::record::{Record, RecordError};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors that abort recovery.
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// Header invalid, or I/O failure on the log file.
    #[error("Log error: {0}")]
    Log(#[from] LogError),

    /// I/O failure while decoding a record.
    #[error("Record error: {0}")]
    Record(#[from] RecordError),
}

// ------------------------------------------------------------------------------------------------
// Result
// ------------------------------------------------------------------------------------------------

/// Outcome of a successful recovery scan.
#[derive(Debug)]
pub struct Recovered {
    /// Rebuilt key → offset map.
    pub index: Index,

    /// Number of valid records replayed (including superseded ones).
    pub records: u64,

    /// Bytes cut from the tail of the file.
    pub truncated_bytes: u64,

    /// `true` if the file was empty and a header was just written.
    pub fresh: bool,
}

// ------------------------------------------------------------------------------------------------
// Scanner
// ------------------------------------------------------------------------------------------------

/// Replays `log`, truncating a damaged tail, and returns the rebuilt index.
pub fn recover(log: &mut LogFile) -> Result<Recovered, RecoveryError> {
    if log.is_empty() {
        log.write_header()?;
        return Ok(Recovered {
            index: Index::new(),
            records: 0,
            truncated_bytes: 0,
            fresh: true,
        });
    }

    log.read_header()?;

    let mut index = Index::new();
    let mut records = 0u64;
    let mut offset = HEADER_SIZE;
    let mut truncated_bytes = 0u64;

    while offset < log.len() {
        match Record::decode_at(&*log, offset) {
            Ok((record, next)) => {
                index.set(record.key, offset);
                records += 1;
                offset = next;
            }
            Err(e @ (RecordError::Incomplete { .. } | RecordError::Corrupt { .. })) => {
                truncated_bytes = log.len() - offset;
                warn!(
                    path = %log.path().display(),
                    offset,
                    truncated_bytes,
                    "discarding damaged log tail: {e}"
                );
                log.truncate(offset)?;
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }

    info!(
        path = %log.path().display(),
        records,
        keys = index.len(),
        truncated_bytes,
        "recovery complete"
    );

    Ok(Recovered {
        index,
        records,
        truncated_bytes,
        fresh: false,
    })
}
