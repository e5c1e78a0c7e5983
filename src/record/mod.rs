//! # Record Codec
//!
//! Serializes and deserializes the single entry type stored in the log,
//! and computes / verifies its CRC32 checksum.
//!
//! ## On-disk layout
//!
//! ```text
//! [KIND u8][KEY_LEN u32 BE][VAL_LEN u32 BE][CRC32 u32 BE][KEY bytes][VALUE bytes]
//! ```
//!
//! The fixed part is [`RECORD_HEADER_SIZE`] (13) bytes, so a record always
//! occupies `13 + key_len + val_len` bytes. Records are written back-to-back
//! with no padding.
//!
//! ## Checksum
//!
//! CRC-32/IEEE over the logical tuple:
//!
//! ```text
//! kind (1 byte) ++ key_len (u32 LE) ++ val_len (u32 LE) ++ key ++ value
//! ```
//!
//! Lengths are stored big-endian on disk but are fed to the checksum
//! little-endian. The same order is used when encoding and when verifying,
//! which keeps files byte-compatible with existing `KVDB` databases.
//!
//! ## Decoding
//!
//! [`Record::decode_at`] reads from any [`RecordSource`] (the log file, or a
//! plain byte slice in tests). A record that runs past the end of the source
//! is reported as [`RecordError::Incomplete`]; a record whose checksum does
//! not match, or whose kind byte is unknown, is [`RecordError::Corrupt`].
//! The advertised lengths are checked against the remaining source length
//! before any body buffer is allocated.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------


// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::io;

use crc32fast::Hasher as Crc32;
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Size of the fixed record header: kind + key_len + val_len + checksum.
pub const RECORD_HEADER_SIZE: usize = 1 + U32_SIZE * 3;

const U32_SIZE: usize = std::mem::size_of::<u32>();

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by record encoding and decoding.
#[derive(Debug, Error)]
pub enum RecordError {
    /// Underlying I/O error while reading the source.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The record extends past the end of the source.
    #[error("Incomplete record at offset {offset}")]
    Incomplete {
        /// Offset where the record starts.
        offset: u64,
    },

    /// The record is fully present but fails validation.
    #[error("Corrupt record at offset {offset}: {reason}")]
    Corrupt {
        /// Offset where the record starts.
        offset: u64,
        /// What failed.
        reason: &'static str,
    },

    /// A key or value is too long for its `u32` length field.
    #[error("Record field too large ({0} bytes)")]
    TooLarge(usize),
}

// ------------------------------------------------------------------------------------------------
// Record kind
// ------------------------------------------------------------------------------------------------

/// Tag byte distinguishing record types.
///
/// Only [`RecordKind::Entry`] is produced today; the tag exists so that
/// other record types can be added without changing the frame layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    /// A key/value pair written by `put`.
    Entry = 0x00,
}

impl RecordKind {
    /// Maps a raw tag byte to a known kind.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Entry),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

// ------------------------------------------------------------------------------------------------
// Sources
// ------------------------------------------------------------------------------------------------

/// Positioned, read-only access to a sequence of bytes.
///
/// Implementations must not depend on a shared cursor: concurrent callers
/// read disjoint or overlapping ranges independently.
pub trait RecordSource {
    /// Total number of bytes currently available.
    fn source_len(&self) -> u64;

    /// Fills `buf` with the bytes starting at `offset`.
    ///
    /// Fails with [`io::ErrorKind::UnexpectedEof`] if fewer than
    /// `buf.len()` bytes are available.
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()>;
}

impl RecordSource for [u8] {
    fn source_len(&self) -> u64 {
        self.len() as u64
    }

    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        let start = usize::try_from(offset).map_err(|_| eof())?;
        let end = start.checked_add(buf.len()).ok_or_else(eof)?;
        let src = self.get(start..end).ok_or_else(eof)?;
        buf.copy_from_slice(src);
        Ok(())
    }
}

fn eof() -> io::Error {
    io::Error::from(io::ErrorKind::UnexpectedEof)
}

// ------------------------------------------------------------------------------------------------
// Record
// ------------------------------------------------------------------------------------------------

/// A single key/value entry as stored in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Record type tag.
    pub kind: RecordKind,

    /// Opaque key bytes.
    pub key: Vec<u8>,

    /// Opaque value bytes.
    pub value: Vec<u8>,
}

impl Record {
    /// Creates an [`RecordKind::Entry`] record.
    pub fn entry(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: RecordKind::Entry,
            key: key.into(),
            value: value.into(),
        }
    }

    /// Number of bytes this record occupies on disk.
    pub fn encoded_len(&self) -> u64 {
        (RECORD_HEADER_SIZE + self.key.len() + self.value.len()) as u64
    }

    /// Computes the CRC32 of this record.
    pub fn checksum(&self) -> Result<u32, RecordError> {
        let (key_len, val_len) = self.field_lens()?;
        Ok(compute_checksum(
            self.kind.as_byte(),
            key_len,
            val_len,
            &self.key,
            &self.value,
        ))
    }

    /// Serializes the record into its on-disk frame.
    pub fn encode(&self) -> Result<Vec<u8>, RecordError> {
        let (key_len, val_len) = self.field_lens()?;
        let checksum = self.checksum()?;

        let mut buf = Vec::with_capacity(self.encoded_len() as usize);
        buf.push(self.kind.as_byte());
        buf.extend_from_slice(&key_len.to_be_bytes());
        buf.extend_from_slice(&val_len.to_be_bytes());
        buf.extend_from_slice(&checksum.to_be_bytes());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);
        Ok(buf)
    }

    /// Reads and verifies one record starting at `offset`.
    ///
    /// Returns the record and the offset of the byte immediately after it.
    pub fn decode_at<S: RecordSource + ?Sized>(
        src: &S,
        offset: u64,
    ) -> Result<(Self, u64), RecordError> {
        let available = src.source_len().saturating_sub(offset);
        if available < RECORD_HEADER_SIZE as u64 {
            return Err(RecordError::Incomplete { offset });
        }

        let mut header = [0u8; RECORD_HEADER_SIZE];
        read_record_bytes(src, &mut header, offset, offset)?;

        let kind_byte = header[0];
        let key_len = be_u32(&header[1..5]);
        let val_len = be_u32(&header[5..9]);
        let stored_checksum = be_u32(&header[9..13]);

        let body_len = u64::from(key_len) + u64::from(val_len);
        if available - (RECORD_HEADER_SIZE as u64) < body_len {
            return Err(RecordError::Incomplete { offset });
        }

        let mut key = vec![0u8; key_len as usize];
        let mut value = vec![0u8; val_len as usize];
        let body_offset = offset + RECORD_HEADER_SIZE as u64;
        read_record_bytes(src, &mut key, body_offset, offset)?;
        read_record_bytes(src, &mut value, body_offset + u64::from(key_len), offset)?;

        let computed = compute_checksum(kind_byte, key_len, val_len, &key, &value);
        if computed != stored_checksum {
            return Err(RecordError::Corrupt {
                offset,
                reason: "checksum mismatch",
            });
        }

        let kind = RecordKind::from_byte(kind_byte).ok_or(RecordError::Corrupt {
            offset,
            reason: "unknown record kind",
        })?;

        Ok((Self { kind, key, value }, body_offset + body_len))
    }

    fn field_lens(&self) -> Result<(u32, u32), RecordError> {
        let key_len =
            u32::try_from(self.key.len()).map_err(|_| RecordError::TooLarge(self.key.len()))?;
        let val_len =
            u32::try_from(self.value.len()).map_err(|_| RecordError::TooLarge(self.value.len()))?;
        Ok((key_len, val_len))
    }
}

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

/// CRC32 over `kind || key_len LE || val_len LE || key || value`.
fn compute_checksum(kind: u8, key_len: u32, val_len: u32, key: &[u8], value: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(&[kind]);
    hasher.update(&key_len.to_le_bytes());
    hasher.update(&val_len.to_le_bytes());
    hasher.update(key);
    hasher.update(value);
    hasher.finalize()
}

/// Positioned read where a short read means the record at `record_offset`
/// is incomplete (e.g. the source shrank underneath us).
fn read_record_bytes<S: RecordSource + ?Sized>(
    src: &S,
    buf: &mut [u8],
    at: u64,
    record_offset: u64,
) -> Result<(), RecordError> {
    if buf.is_empty() {
        return Ok(());
    }
    src.read_exact_at(buf, at).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            RecordError::Incomplete {
                offset: record_offset,
            }
        } else {
            RecordError::Io(e)
        }
    })
}

fn be_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; U32_SIZE];
    raw.copy_from_slice(&bytes[..U32_SIZE]);
    u32::from_be_bytes(raw)
}
