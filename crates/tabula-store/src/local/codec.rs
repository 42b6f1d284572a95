//! Physical key and cell encoding for the embedded backend.
//!
//! Key layout: `token (8, sign-flipped BE) | key length (4, BE) | key | column`.
//! Sorting the raw bytes therefore orders cells by token, then row key,
//! then column name.

use super::LocalError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::ops::Bound;
use xxhash_rust::xxh64::xxh64;

const TOKEN_LEN: usize = 8;
const KEY_LEN_LEN: usize = 4;

/// Partition token of a row key
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub fn token(key: &[u8]) -> i64 {
    xxh64(key, 0) as i64
}

/// Big-endian bytes of a token, ordered like the signed value
#[must_use]
#[allow(clippy::cast_sign_loss)]
pub const fn token_bytes(token: i64) -> [u8; TOKEN_LEN] {
    ((token as u64) ^ (1 << 63)).to_be_bytes()
}

/// Prefix shared by every cell of a row
pub fn row_prefix(key: &[u8]) -> Result<Vec<u8>, LocalError> {
    let len = u32::try_from(key.len())
        .map_err(|_| LocalError::Corrupt(format!("row key of {} bytes", key.len())))?;
    let mut out = Vec::with_capacity(TOKEN_LEN + KEY_LEN_LEN + key.len());
    out.extend_from_slice(&token_bytes(token(key)));
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(key);
    Ok(out)
}

pub fn cell_key(key: &[u8], column: &str) -> Result<Vec<u8>, LocalError> {
    let mut out = row_prefix(key)?;
    out.extend_from_slice(column.as_bytes());
    Ok(out)
}

/// Split a physical key into row key and column name
pub fn decode_cell_key(raw: &[u8]) -> Result<(Bytes, String), LocalError> {
    let corrupt = || LocalError::Corrupt(format!("malformed cell key of {} bytes", raw.len()));
    let header = TOKEN_LEN + KEY_LEN_LEN;
    if raw.len() < header {
        return Err(corrupt());
    }
    let mut len_bytes = [0u8; KEY_LEN_LEN];
    len_bytes.copy_from_slice(&raw[TOKEN_LEN..header]);
    let key_len = u32::from_be_bytes(len_bytes) as usize;
    let key_end = header.checked_add(key_len).ok_or_else(corrupt)?;
    if raw.len() < key_end {
        return Err(corrupt());
    }
    let key = Bytes::copy_from_slice(&raw[header..key_end]);
    let column = std::str::from_utf8(&raw[key_end..])
        .map_err(|_| corrupt())?
        .to_string();
    Ok((key, column))
}

/// Physical key range covering the given token interval
///
/// Returns `None` when the interval is empty.
#[must_use]
pub fn token_range(
    start: i64,
    start_inclusive: bool,
    end: i64,
    end_inclusive: bool,
) -> Option<(Bound<Vec<u8>>, Bound<Vec<u8>>)> {
    let first = if start_inclusive {
        start
    } else {
        start.checked_add(1)?
    };
    let lower = Bound::Included(token_bytes(first).to_vec());
    let upper = if end_inclusive {
        match end.checked_add(1) {
            Some(next) => Bound::Excluded(token_bytes(next).to_vec()),
            None => Bound::Unbounded,
        }
    } else {
        Bound::Excluded(token_bytes(end).to_vec())
    };
    let last = if end_inclusive { Some(end) } else { end.checked_sub(1) };
    match last {
        Some(last) if first <= last => Some((lower, upper)),
        _ => None,
    }
}

/// A stored cell value with its optional expiry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCell {
    pub expires_at_ms: Option<u64>,
    pub value: Vec<u8>,
}

impl StoredCell {
    #[must_use]
    pub fn new(value: &[u8], ttl_secs: u32, now_ms: u64) -> Self {
        let expires_at_ms =
            (ttl_secs > 0).then(|| now_ms.saturating_add(u64::from(ttl_secs) * 1000));
        Self {
            expires_at_ms,
            value: value.to_vec(),
        }
    }

    #[must_use]
    pub fn is_live(&self, now_ms: u64) -> bool {
        self.expires_at_ms.is_none_or(|at| now_ms < at)
    }

    pub fn encode(&self) -> Result<Vec<u8>, LocalError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(raw: &[u8]) -> Result<Self, LocalError> {
        Ok(bincode::deserialize(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_bytes_preserve_signed_order() {
        let tokens = [i64::MIN, -5, -1, 0, 1, 42, i64::MAX];
        for pair in tokens.windows(2) {
            assert!(token_bytes(pair[0]) < token_bytes(pair[1]));
        }
    }

    #[test]
    fn test_cell_key_decodes() {
        let raw = cell_key(b"row\x00key", "name").unwrap();
        let (key, column) = decode_cell_key(&raw).unwrap();
        assert_eq!(key, Bytes::from_static(b"row\x00key"));
        assert_eq!(column, "name");
        assert!(raw.starts_with(&row_prefix(b"row\x00key").unwrap()));
    }

    #[test]
    fn test_decode_rejects_truncated() {
        let raw = cell_key(b"abc", "c").unwrap();
        assert!(decode_cell_key(&raw[..10]).is_err());
    }

    #[test]
    fn test_token_range_bounds() {
        assert!(token_range(5, true, 5, true).is_some());
        assert!(token_range(5, false, 5, true).is_none());
        assert!(token_range(5, true, 5, false).is_none());
        assert!(token_range(i64::MAX, false, i64::MAX, true).is_none());

        let (lower, upper) = token_range(i64::MIN, true, i64::MAX, true).unwrap();
        assert_eq!(lower, Bound::Included(token_bytes(i64::MIN).to_vec()));
        assert_eq!(upper, Bound::Unbounded);
    }

    #[test]
    fn test_stored_cell_expiry() {
        let cell = StoredCell::new(b"v", 2, 1_000);
        assert_eq!(cell.expires_at_ms, Some(3_000));
        assert!(cell.is_live(2_999));
        assert!(!cell.is_live(3_000));
        assert!(StoredCell::new(b"", 0, 1_000).is_live(u64::MAX));

        let decoded = StoredCell::decode(&cell.encode().unwrap()).unwrap();
        assert_eq!(decoded, cell);
    }
}
