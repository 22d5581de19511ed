//! Index scan layer: row keys, ordered column pages, and the collaborator
//! traits the query executor drives.
//!
//! The executor never touches storage directly. It asks an [`IndexBackend`]
//! for the physical rows backing a property (one per shard) and scans each
//! row as an ordered stream of [`IndexColumn`]s. Everything above this layer
//! works purely in terms of those ordered pages.

mod memory;
mod merge;

pub use memory::MemoryIndexBackend;
pub use merge::{ColumnSource, FetchPage, MultiKeyMergeIterator, MultiRowColumnIterator};

use std::collections::HashMap;

use crate::error::{Result, StoreError};
use crate::model::{ApplicationScope, EntityId, Value};

/// Physical key of one index row. A property's index may be split across
/// several shards; each shard is one row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowKey {
    pub scope: ApplicationScope,
    pub property: String,
    pub shard: u64,
}

impl RowKey {
    pub fn new(scope: ApplicationScope, property: impl Into<String>, shard: u64) -> Self {
        Self {
            scope,
            property: property.into(),
            shard,
        }
    }
}

/// One column of an index row: the indexed value plus the entity holding it.
/// Columns within a row are unique and ordered by `(value, entity)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct IndexColumn {
    pub value: Value,
    pub entity: EntityId,
}

impl IndexColumn {
    pub fn new(value: Value, entity: EntityId) -> Self {
        Self { value, entity }
    }

    /// Serializes this column as an opaque resumption token.
    pub fn to_token(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32);
        self.value.encode_into(&mut out);
        out.extend_from_slice(self.entity.0.as_bytes());
        out
    }

    /// Parses a token produced by [`IndexColumn::to_token`].
    pub fn from_token(bytes: &[u8]) -> Result<Self> {
        let (value, rest) = Value::decode(bytes)?;
        if rest.len() != 16 {
            return Err(StoreError::Corruption(format!(
                "column token has {} trailing bytes, expected 16",
                rest.len()
            )));
        }
        let entity = EntityId(uuid::Uuid::from_bytes(rest.try_into().unwrap()));
        Ok(Self { value, entity })
    }
}

/// One side of a scan range. When `entity` is present the bound names an
/// exact column (used to resume mid-value); otherwise it bounds by value
/// alone.
#[derive(Debug, Clone)]
pub struct ScanBound {
    pub value: Value,
    pub entity: Option<EntityId>,
    pub inclusive: bool,
}

impl ScanBound {
    pub fn value(value: Value, inclusive: bool) -> Self {
        Self {
            value,
            entity: None,
            inclusive,
        }
    }

    pub fn column(column: &IndexColumn, inclusive: bool) -> Self {
        Self {
            value: column.value.clone(),
            entity: Some(column.entity),
            inclusive,
        }
    }
}

/// A bounded, directed, limited scan over one index row. `start` is always
/// the end the scan begins from, regardless of direction.
#[derive(Debug, Clone)]
pub struct ScanRange {
    pub start: Option<ScanBound>,
    pub finish: Option<ScanBound>,
    pub descending: bool,
    pub limit: usize,
}

/// One page of scan results. `more` reports whether the backend stopped at
/// `limit` with matching columns remaining.
#[derive(Debug, Clone)]
pub struct ScanPage {
    pub columns: Vec<IndexColumn>,
    pub more: bool,
}

/// Read access to the property indexes.
pub trait IndexBackend: Send + Sync {
    /// Physical rows backing `property` in `scope`, one per shard. A
    /// property nobody has written returns an empty list.
    fn rows(&self, scope: &ApplicationScope, property: &str) -> Result<Vec<RowKey>>;

    /// Scans one row in column order.
    fn scan(&self, row: &RowKey, range: &ScanRange) -> Result<ScanPage>;
}

/// Loads the sort-field values for a batch of candidate ids. Used only by
/// secondary in-memory sorting; ids missing the field are simply absent
/// from the result.
pub trait SortKeyLoader: Send + Sync {
    fn load_sort_keys(
        &self,
        scope: &ApplicationScope,
        property: &str,
        ids: &[EntityId],
    ) -> Result<HashMap<EntityId, Value>>;
}

/// Resolves direct identifier lookups without an index scan.
pub trait IdentityResolver: Send + Sync {
    /// True when the id names a live entity in scope.
    fn contains(&self, scope: &ApplicationScope, id: EntityId) -> Result<bool>;

    /// Resolves an email alias to its entity, if any.
    fn resolve_email(&self, scope: &ApplicationScope, email: &str) -> Result<Option<EntityId>>;
}
