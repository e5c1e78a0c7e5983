//! # Index
//!
//! In-memory map from key to the offset of that key's most recent valid
//! record. Rebuilt from scratch by recovery on every open and updated after
//! each durable `put`. Superseded records stay in the log as dead space;
//! the index simply stops pointing at them.

use std::collections::HashMap;

/// Key → record offset, last write wins.
#[derive(Debug, Default)]
pub struct Index {
    offsets: HashMap<Vec<u8>, u64>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offset of the latest record for `key`, if it was ever written.
    pub fn get(&self, key: &[u8]) -> Option<u64> {
        self.offsets.get(key).copied()
    }

    /// Points `key` at `offset`, returning the offset it shadowed.
    pub fn set(&mut self, key: Vec<u8>, offset: u64) -> Option<u64> {
        self.offsets.insert(key, offset)
    }

    /// Number of distinct live keys.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// True when no key has been indexed.
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------
