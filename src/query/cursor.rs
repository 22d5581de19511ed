//! Opaque pagination cursors.
//!
//! A cursor is the serialized resumption state of every slice that was
//! active when a page was returned, keyed by the slice's stable
//! [`cursor_key`](crate::query::slice::QuerySlice::cursor_key). The wire
//! form is a crc32 of the body followed by the body itself, so a truncated
//! or tampered cursor is rejected as corruption instead of silently
//! resuming from the wrong place.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Per-slice resumption tokens for one query, keyed by slice identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CursorCache {
    entries: BTreeMap<u32, Vec<u8>>,
}

impl CursorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: u32, token: Vec<u8>) {
        self.entries.insert(key, token);
    }

    pub fn get(&self, key: u32) -> Option<&[u8]> {
        self.entries.get(&key).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serializes the cache for the client. Returns `None` when no slice
    /// recorded any state, meaning the result set is exhausted.
    pub fn to_bytes(&self) -> Result<Option<Vec<u8>>> {
        if self.entries.is_empty() {
            return Ok(None);
        }
        let body = serde_json::to_vec(&self.entries)
            .map_err(|e| StoreError::Storage(format!("cursor encode: {e}")))?;
        let mut out = Vec::with_capacity(4 + body.len());
        out.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        out.extend_from_slice(&body);
        Ok(Some(out))
    }

    /// Parses a client-supplied cursor, verifying the checksum.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 4 {
            return Err(StoreError::Corruption("cursor too short".into()));
        }
        let (crc, body) = bytes.split_at(4);
        let expected = u32::from_le_bytes(crc.try_into().unwrap());
        if crc32fast::hash(body) != expected {
            return Err(StoreError::Corruption("cursor checksum mismatch".into()));
        }
        let entries: BTreeMap<u32, Vec<u8>> = serde_json::from_slice(body)
            .map_err(|e| StoreError::Corruption(format!("cursor decode: {e}")))?;
        Ok(Self { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let mut cache = CursorCache::new();
        cache.set(7, vec![1, 2, 3]);
        cache.set(11, Vec::new());

        let bytes = cache.to_bytes().unwrap().unwrap();
        let restored = CursorCache::from_bytes(&bytes).unwrap();
        assert_eq!(restored.get(7), Some(&[1u8, 2, 3][..]));
        assert_eq!(restored.get(11), Some(&[][..]));
        assert_eq!(restored.get(13), None);
    }

    #[test]
    fn empty_cache_serializes_to_none() {
        assert!(CursorCache::new().to_bytes().unwrap().is_none());
    }

    #[test]
    fn corrupted_bytes_rejected() {
        let mut cache = CursorCache::new();
        cache.set(1, vec![42]);
        let mut bytes = cache.to_bytes().unwrap().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;

        assert!(matches!(
            CursorCache::from_bytes(&bytes),
            Err(StoreError::Corruption(_))
        ));
        assert!(matches!(
            CursorCache::from_bytes(&[1, 2]),
            Err(StoreError::Corruption(_))
        ));
    }
}
