//! Composite key layout
//!
//! ```text
//! ┌──────────────────┬──────────────┬──────────────┐
//! │ hk_len (2, BE)   │   hash_key   │   sort_key   │
//! └──────────────────┴──────────────┴──────────────┘
//! ```
//!
//! Composite keys of one hash key sort together and in sort-key order, so a
//! hash key maps to one contiguous range of the partition's key space.

use crate::common::{validate_hash_key, Error, Result};

const HASH_KEY_LEN_SIZE: usize = 2;

/// Build the composite key for `(hash_key, sort_key)`.
pub fn encode_key(hash_key: &[u8], sort_key: &[u8]) -> Result<Vec<u8>> {
    validate_hash_key(hash_key)?;
    let mut key = Vec::with_capacity(HASH_KEY_LEN_SIZE + hash_key.len() + sort_key.len());
    key.extend_from_slice(&(hash_key.len() as u16).to_be_bytes());
    key.extend_from_slice(hash_key);
    key.extend_from_slice(sort_key);
    Ok(key)
}

/// Split a composite key back into `(hash_key, sort_key)`.
pub fn decode_key(key: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    if key.len() < HASH_KEY_LEN_SIZE {
        return Err(Error::Protocol(format!(
            "key too short: {} bytes",
            key.len()
        )));
    }
    let hash_key_len = u16::from_be_bytes([key[0], key[1]]) as usize;
    let body = &key[HASH_KEY_LEN_SIZE..];
    if body.len() < hash_key_len {
        return Err(Error::Protocol(format!(
            "key truncated: hash key needs {} bytes, got {}",
            hash_key_len,
            body.len()
        )));
    }
    let (hash_key, sort_key) = body.split_at(hash_key_len);
    Ok((hash_key.to_vec(), sort_key.to_vec()))
}

/// Smallest key greater than every key starting with `prefix`.
///
/// Trailing `0xFF` bytes are dropped and the last remaining byte is
/// incremented. Returns an empty vector when no such key exists.
pub fn next_prefix(prefix: &[u8]) -> Vec<u8> {
    let mut next = prefix.to_vec();
    while let Some(last) = next.pop() {
        if last != 0xFF {
            next.push(last + 1);
            return next;
        }
    }
    next
}

/// A key interval inside one partition.
///
/// An empty `stop` means unbounded above.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRange {
    pub start: Vec<u8>,
    pub stop: Vec<u8>,
    pub start_inclusive: bool,
    pub stop_inclusive: bool,
}

impl ScanRange {
    /// Range covering the whole partition.
    pub fn full() -> Self {
        Self {
            start: Vec::new(),
            stop: Vec::new(),
            start_inclusive: true,
            stop_inclusive: false,
        }
    }

    /// Range of sort keys within one hash key.
    ///
    /// An empty `start_sort_key` starts at the first sort key; an empty
    /// `stop_sort_key` runs to the last one.
    pub fn for_hash_key(
        hash_key: &[u8],
        start_sort_key: &[u8],
        stop_sort_key: &[u8],
        start_inclusive: bool,
        stop_inclusive: bool,
    ) -> Result<Self> {
        let start = encode_key(hash_key, start_sort_key)?;
        let (stop, stop_inclusive) = if stop_sort_key.is_empty() {
            (next_prefix(&encode_key(hash_key, b"")?), false)
        } else {
            (encode_key(hash_key, stop_sort_key)?, stop_inclusive)
        };
        Ok(Self {
            start,
            stop,
            start_inclusive,
            stop_inclusive,
        })
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        let after_start = if self.start_inclusive {
            key >= self.start.as_slice()
        } else {
            key > self.start.as_slice()
        };
        if !after_start {
            return false;
        }
        if self.stop.is_empty() {
            return true;
        }
        if self.stop_inclusive {
            key <= self.stop.as_slice()
        } else {
            key < self.stop.as_slice()
        }
    }
}
