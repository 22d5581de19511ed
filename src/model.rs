//! Core value types shared by the query and graph subsystems.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, StoreError};

/// Identifier of one entity in the store. Streams produced by the iterator
/// algebra are ordered by this id's byte order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct EntityId(pub Uuid);

impl EntityId {
    pub fn random() -> Self {
        EntityId(Uuid::new_v4())
    }

    /// Deterministic id for tests and fixtures.
    pub fn from_u128(v: u128) -> Self {
        EntityId(Uuid::from_u128(v))
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Tenant scope threaded through every collaborator call. All index rows and
/// edge rows are partitioned by application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationScope {
    pub application: Uuid,
}

impl ApplicationScope {
    pub fn new(application: Uuid) -> Self {
        Self { application }
    }
}

/// Direction of an ordered stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    /// Comparator for the declared direction: `Less` means `a` is emitted
    /// before `b`.
    pub fn cmp<T: Ord>(&self, a: &T, b: &T) -> Ordering {
        match self {
            SortOrder::Ascending => a.cmp(b),
            SortOrder::Descending => b.cmp(a),
        }
    }

    pub fn is_descending(&self) -> bool {
        matches!(self, SortOrder::Descending)
    }
}

/// One sort clause of a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortPredicate {
    pub property: String,
    pub direction: SortOrder,
}

impl SortPredicate {
    pub fn ascending(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: SortOrder::Ascending,
        }
    }

    pub fn descending(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: SortOrder::Descending,
        }
    }
}

/// Highest scalar value in text ordering, used to close prefix ranges.
pub const MAX_UNICODE: char = '\u{10FFFF}';

/// Typed scalar used in range bounds and index columns.
///
/// Values carry a stable byte tag ([`Value::field_code`]) so bounds on
/// differently typed fields never compare equal, and so cursor tokens have a
/// self-describing encoding. Ordering is total: tag first, then value, with
/// doubles ordered by `total_cmp`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Long(i64),
    Double(f64),
    Text(String),
    Uuid(Uuid),
}

impl Value {
    /// Byte tag identifying the value type in encodings and comparisons.
    pub fn field_code(&self) -> u8 {
        match self {
            Value::Bool(_) => 0x01,
            Value::Long(_) => 0x02,
            Value::Double(_) => 0x03,
            Value::Text(_) => 0x04,
            Value::Uuid(_) => 0x05,
        }
    }

    /// Closing bound for a prefix match on `token`: everything in
    /// `[token, token + MAX_UNICODE]` starts with `token`.
    pub fn text_prefix_end(token: &str) -> Value {
        let mut end = String::with_capacity(token.len() + 4);
        end.push_str(token);
        end.push(MAX_UNICODE);
        Value::Text(end)
    }

    /// Appends a compact self-describing encoding of this value to `out`.
    pub(crate) fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.field_code());
        match self {
            Value::Bool(b) => out.push(*b as u8),
            Value::Long(v) => out.extend_from_slice(&v.to_be_bytes()),
            Value::Double(v) => out.extend_from_slice(&v.to_bits().to_be_bytes()),
            Value::Text(s) => {
                out.extend_from_slice(&(s.len() as u32).to_be_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            Value::Uuid(u) => out.extend_from_slice(u.as_bytes()),
        }
    }

    /// Decodes a value produced by [`Value::encode_into`], returning the
    /// value and the unconsumed remainder of `buf`.
    pub(crate) fn decode(buf: &[u8]) -> Result<(Value, &[u8])> {
        let (&tag, rest) = buf
            .split_first()
            .ok_or_else(|| StoreError::Corruption("empty value encoding".into()))?;

        fn take(rest: &[u8], n: usize) -> Result<(&[u8], &[u8])> {
            if rest.len() < n {
                return Err(StoreError::Corruption("truncated value encoding".into()));
            }
            Ok(rest.split_at(n))
        }

        match tag {
            0x01 => {
                let (b, rest) = take(rest, 1)?;
                Ok((Value::Bool(b[0] != 0), rest))
            }
            0x02 => {
                let (b, rest) = take(rest, 8)?;
                Ok((Value::Long(i64::from_be_bytes(b.try_into().unwrap())), rest))
            }
            0x03 => {
                let (b, rest) = take(rest, 8)?;
                let bits = u64::from_be_bytes(b.try_into().unwrap());
                Ok((Value::Double(f64::from_bits(bits)), rest))
            }
            0x04 => {
                let (len, rest) = take(rest, 4)?;
                let len = u32::from_be_bytes(len.try_into().unwrap()) as usize;
                let (s, rest) = take(rest, len)?;
                let s = std::str::from_utf8(s)
                    .map_err(|_| StoreError::Corruption("invalid utf8 in value".into()))?;
                Ok((Value::Text(s.to_string()), rest))
            }
            0x05 => {
                let (b, rest) = take(rest, 16)?;
                Ok((Value::Uuid(Uuid::from_bytes(b.try_into().unwrap())), rest))
            }
            other => Err(StoreError::Corruption(format!(
                "unknown value tag {other:#04x}"
            ))),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Long(a), Value::Long(b)) => a.cmp(b),
            (Value::Double(a), Value::Double(b)) => a.total_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Uuid(a), Value::Uuid(b)) => a.cmp(b),
            (a, b) => a.field_code().cmp(&b.field_code()),
        }
    }
}
