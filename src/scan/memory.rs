//! In-memory index backend.
//!
//! Backs the executor in tests and embedded deployments. Rows are plain
//! ordered sets behind a concurrent map; sharding splits a property's
//! columns across rows by a hash of the indexed value, which exercises the
//! multi-row merge path without a real storage cluster.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};

use dashmap::DashMap;
use uuid::Uuid;

use crate::error::Result;
use crate::model::{ApplicationScope, EntityId, Value};
use crate::query::node::ENTITY_ID_PROPERTY;
use crate::scan::{
    IdentityResolver, IndexBackend, IndexColumn, RowKey, ScanBound, ScanPage, ScanRange,
    SortKeyLoader,
};

pub struct MemoryIndexBackend {
    shards: u64,
    rows: DashMap<RowKey, BTreeSet<IndexColumn>>,
    values: DashMap<(Uuid, String), HashMap<EntityId, Value>>,
    emails: DashMap<(Uuid, String), EntityId>,
    entities: DashMap<Uuid, HashSet<EntityId>>,
}

impl MemoryIndexBackend {
    pub fn new() -> Self {
        Self::with_shards(1)
    }

    /// Splits every property across `shards` physical rows.
    pub fn with_shards(shards: u64) -> Self {
        Self {
            shards: shards.max(1),
            rows: DashMap::new(),
            values: DashMap::new(),
            emails: DashMap::new(),
            entities: DashMap::new(),
        }
    }

    fn shard_for(&self, value: &Value) -> u64 {
        let mut buf = Vec::with_capacity(32);
        value.encode_into(&mut buf);
        u64::from(crc32fast::hash(&buf)) % self.shards
    }

    /// Indexes `value` for `entity` under `property`.
    pub fn insert(&self, scope: &ApplicationScope, property: &str, value: Value, entity: EntityId) {
        let shard = self.shard_for(&value);
        let row = RowKey::new(*scope, property, shard);
        self.rows
            .entry(row)
            .or_default()
            .insert(IndexColumn::new(value.clone(), entity));
        self.values
            .entry((scope.application, property.to_string()))
            .or_default()
            .insert(entity, value);
    }

    pub fn remove(
        &self,
        scope: &ApplicationScope,
        property: &str,
        value: &Value,
        entity: EntityId,
    ) {
        let shard = self.shard_for(value);
        let row = RowKey::new(*scope, property, shard);
        if let Some(mut set) = self.rows.get_mut(&row) {
            set.remove(&IndexColumn::new(value.clone(), entity));
        }
        if let Some(mut map) = self
            .values
            .get_mut(&(scope.application, property.to_string()))
        {
            map.remove(&entity);
        }
    }

    /// Registers an entity and its primary-id index column.
    pub fn insert_entity(&self, scope: &ApplicationScope, entity: EntityId) {
        self.entities
            .entry(scope.application)
            .or_default()
            .insert(entity);
        self.insert(scope, ENTITY_ID_PROPERTY, Value::Uuid(entity.0), entity);
    }

    pub fn set_email(&self, scope: &ApplicationScope, email: &str, entity: EntityId) {
        self.emails
            .insert((scope.application, email.to_string()), entity);
    }
}

impl Default for MemoryIndexBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn cmp_to_bound(column: &IndexColumn, bound: &ScanBound) -> Ordering {
    let by_value = column.value.cmp(&bound.value);
    match &bound.entity {
        Some(entity) => by_value.then_with(|| column.entity.cmp(entity)),
        None => by_value,
    }
}

fn within(column: &IndexColumn, range: &ScanRange) -> bool {
    // `start` is the end the scan begins from, so in a descending scan it
    // is the upper bound
    let (lower, upper) = if range.descending {
        (&range.finish, &range.start)
    } else {
        (&range.start, &range.finish)
    };

    if let Some(bound) = lower {
        match cmp_to_bound(column, bound) {
            Ordering::Less => return false,
            Ordering::Equal if !bound.inclusive => return false,
            _ => {}
        }
    }
    if let Some(bound) = upper {
        match cmp_to_bound(column, bound) {
            Ordering::Greater => return false,
            Ordering::Equal if !bound.inclusive => return false,
            _ => {}
        }
    }
    true
}

impl IndexBackend for MemoryIndexBackend {
    fn rows(&self, scope: &ApplicationScope, property: &str) -> Result<Vec<RowKey>> {
        let mut keys = Vec::new();
        for shard in 0..self.shards {
            let key = RowKey::new(*scope, property, shard);
            if self.rows.contains_key(&key) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    fn scan(&self, row: &RowKey, range: &ScanRange) -> Result<ScanPage> {
        let Some(set) = self.rows.get(row) else {
            return Ok(ScanPage {
                columns: Vec::new(),
                more: false,
            });
        };

        let mut columns = Vec::new();
        let mut more = false;

        let mut visit = |column: &IndexColumn| -> bool {
            if !within(column, range) {
                return true;
            }
            if columns.len() == range.limit {
                more = true;
                return false;
            }
            columns.push(column.clone());
            true
        };

        if range.descending {
            for column in set.iter().rev() {
                if !visit(column) {
                    break;
                }
            }
        } else {
            for column in set.iter() {
                if !visit(column) {
                    break;
                }
            }
        }

        Ok(ScanPage { columns, more })
    }
}

impl SortKeyLoader for MemoryIndexBackend {
    fn load_sort_keys(
        &self,
        scope: &ApplicationScope,
        property: &str,
        ids: &[EntityId],
    ) -> Result<HashMap<EntityId, Value>> {
        let mut out = HashMap::with_capacity(ids.len());
        if let Some(map) = self.values.get(&(scope.application, property.to_string())) {
            for id in ids {
                if let Some(value) = map.get(id) {
                    out.insert(*id, value.clone());
                }
            }
        }
        Ok(out)
    }
}

impl IdentityResolver for MemoryIndexBackend {
    fn contains(&self, scope: &ApplicationScope, id: EntityId) -> Result<bool> {
        Ok(self
            .entities
            .get(&scope.application)
            .map(|set| set.contains(&id))
            .unwrap_or(false))
    }

    fn resolve_email(&self, scope: &ApplicationScope, email: &str) -> Result<Option<EntityId>> {
        Ok(self
            .emails
            .get(&(scope.application, email.to_string()))
            .map(|entry| *entry.value()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> ApplicationScope {
        ApplicationScope::new(Uuid::from_u128(1))
    }

    fn backend_with(values: &[(i64, u128)]) -> MemoryIndexBackend {
        let backend = MemoryIndexBackend::new();
        for &(v, id) in values {
            backend.insert(&scope(), "age", Value::Long(v), EntityId::from_u128(id));
        }
        backend
    }

    #[test]
    fn scan_respects_bounds_and_limit() {
        let backend = backend_with(&[(1, 1), (2, 2), (3, 3), (4, 4), (5, 5)]);
        let row = backend.rows(&scope(), "age").unwrap().remove(0);

        let page = backend
            .scan(
                &row,
                &ScanRange {
                    start: Some(ScanBound::value(Value::Long(2), true)),
                    finish: Some(ScanBound::value(Value::Long(4), false)),
                    descending: false,
                    limit: 10,
                },
            )
            .unwrap();
        let values: Vec<_> = page.columns.iter().map(|c| c.value.clone()).collect();
        assert_eq!(values, vec![Value::Long(2), Value::Long(3)]);
        assert!(!page.more);

        let page = backend
            .scan(
                &row,
                &ScanRange {
                    start: None,
                    finish: None,
                    descending: false,
                    limit: 3,
                },
            )
            .unwrap();
        assert_eq!(page.columns.len(), 3);
        assert!(page.more);
    }

    #[test]
    fn descending_scan_starts_from_the_upper_end() {
        let backend = backend_with(&[(1, 1), (2, 2), (3, 3)]);
        let row = backend.rows(&scope(), "age").unwrap().remove(0);

        let page = backend
            .scan(
                &row,
                &ScanRange {
                    start: Some(ScanBound::value(Value::Long(3), false)),
                    finish: None,
                    descending: true,
                    limit: 10,
                },
            )
            .unwrap();
        let values: Vec<_> = page.columns.iter().map(|c| c.value.clone()).collect();
        assert_eq!(values, vec![Value::Long(2), Value::Long(1)]);
    }

    #[test]
    fn sharding_splits_a_property_across_rows() {
        let backend = MemoryIndexBackend::with_shards(4);
        for v in 0..100i64 {
            backend.insert(
                &scope(),
                "age",
                Value::Long(v),
                EntityId::from_u128(v as u128),
            );
        }
        let rows = backend.rows(&scope(), "age").unwrap();
        assert!(rows.len() > 1, "expected multiple shard rows");
        let total: usize = rows
            .iter()
            .map(|row| {
                backend
                    .scan(
                        row,
                        &ScanRange {
                            start: None,
                            finish: None,
                            descending: false,
                            limit: 1000,
                        },
                    )
                    .unwrap()
                    .columns
                    .len()
            })
            .sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn identity_resolution() {
        let backend = MemoryIndexBackend::new();
        let id = EntityId::from_u128(42);
        backend.insert_entity(&scope(), id);
        backend.set_email(&scope(), "a@b.example", id);

        assert!(backend.contains(&scope(), id).unwrap());
        assert!(!backend.contains(&scope(), EntityId::from_u128(7)).unwrap());
        assert_eq!(
            backend.resolve_email(&scope(), "a@b.example").unwrap(),
            Some(id)
        );
        assert_eq!(backend.resolve_email(&scope(), "nope").unwrap(), None);
    }
}
