//! Multi-row merge behavior against real and adversarial sources.

use std::collections::BTreeSet;
use std::sync::Arc;

use proptest::prelude::*;

use quarry::model::{ApplicationScope, EntityId, SortOrder, Value};
use quarry::scan::{
    ColumnSource, FetchPage, IndexBackend, IndexColumn, MemoryIndexBackend,
    MultiKeyMergeIterator, MultiRowColumnIterator, RowKey, ScanPage, ScanRange,
};
use quarry::{Result, StoreError};
use uuid::Uuid;

fn scope() -> ApplicationScope {
    ApplicationScope::new(Uuid::from_u128(1))
}

struct VecSource(Vec<u64>);

impl ColumnSource<u64> for VecSource {
    fn fetch(&self, limit: usize, resume: Option<&u64>) -> Result<FetchPage<u64>> {
        let start = match resume {
            Some(r) => self.0.partition_point(|v| v <= r),
            None => 0,
        };
        let end = (start + limit).min(self.0.len());
        Ok(FetchPage {
            items: self.0[start..end].to_vec(),
            more: end < self.0.len(),
        })
    }
}

fn merged(sources: Vec<Vec<u64>>, buffer_size: usize) -> Vec<u64> {
    let mut merge = MultiKeyMergeIterator::new(
        sources
            .into_iter()
            .map(|items| Box::new(VecSource(items)) as Box<dyn ColumnSource<u64>>)
            .collect(),
        SortOrder::Ascending,
        buffer_size,
    );
    let mut out = Vec::new();
    while let Some(v) = merge.next().unwrap() {
        out.push(v);
    }
    out
}

proptest! {
    /// Ordering invariant: regardless of buffer size, the merge yields the
    /// strictly ascending union of its sources.
    #[test]
    fn merge_yields_the_sorted_union(
        sources in prop::collection::vec(
            prop::collection::btree_set(0u64..500, 0..40),
            1..5,
        ),
        buffer_size in 1usize..70,
    ) {
        let expected: Vec<u64> = sources
            .iter()
            .flatten()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let inputs: Vec<Vec<u64>> = sources
            .into_iter()
            .map(|set| set.into_iter().collect())
            .collect();
        prop_assert_eq!(merged(inputs, buffer_size), expected);
    }
}

#[test]
fn page_boundary_on_source_boundary_neither_skips_nor_repeats() {
    // buffer of 5 divides each source's 10 elements exactly
    let a: Vec<u64> = (0..20).step_by(2).collect();
    let b: Vec<u64> = (1..20).step_by(2).collect();
    let out = merged(vec![a, b], 5);
    assert_eq!(out, (0..20).collect::<Vec<u64>>());
}

#[test]
fn sharded_rows_merge_into_one_ordered_scan() {
    let backend = Arc::new(MemoryIndexBackend::with_shards(5));
    for v in 0..200i64 {
        backend.insert(
            &scope(),
            "age",
            Value::Long(v),
            EntityId::from_u128(v as u128),
        );
    }
    let rows = backend.rows(&scope(), "age").unwrap();
    assert!(rows.len() > 1);

    let mut iter = MultiRowColumnIterator::new(
        backend,
        rows,
        ScanRange {
            start: None,
            finish: None,
            descending: false,
            limit: 7,
        },
        SortOrder::Ascending,
        7,
        None,
    );

    let mut values = Vec::new();
    while let Some(column) = iter.next_column().unwrap() {
        values.push(column.value.clone());
    }
    assert_eq!(
        values,
        (0..200i64).map(Value::Long).collect::<Vec<Value>>()
    );
}

#[test]
fn resume_seed_skips_everything_at_or_before_the_seed() {
    let backend = Arc::new(MemoryIndexBackend::new());
    for v in 0..10i64 {
        backend.insert(
            &scope(),
            "age",
            Value::Long(v),
            EntityId::from_u128(v as u128),
        );
    }
    let rows = backend.rows(&scope(), "age").unwrap();

    let seed = IndexColumn::new(Value::Long(4), EntityId::from_u128(4));
    let mut iter = MultiRowColumnIterator::new(
        backend,
        rows,
        ScanRange {
            start: None,
            finish: None,
            descending: false,
            limit: 3,
        },
        SortOrder::Ascending,
        3,
        Some(seed),
    );

    let mut values = Vec::new();
    while let Some(column) = iter.next_column().unwrap() {
        values.push(column.value.clone());
    }
    assert_eq!(values, (5..10i64).map(Value::Long).collect::<Vec<Value>>());
}

/// A backend that under-fills a page while claiming more data remains.
struct LyingBackend;

impl IndexBackend for LyingBackend {
    fn rows(&self, scope: &ApplicationScope, property: &str) -> Result<Vec<RowKey>> {
        Ok(vec![RowKey::new(*scope, property, 0)])
    }

    fn scan(&self, _row: &RowKey, _range: &ScanRange) -> Result<ScanPage> {
        Ok(ScanPage {
            columns: vec![IndexColumn::new(Value::Long(1), EntityId::from_u128(1))],
            more: true,
        })
    }
}

#[test]
fn inconsistent_page_surfaces_as_a_fatal_error() {
    let backend: Arc<dyn IndexBackend> = Arc::new(LyingBackend);
    let rows = backend.rows(&scope(), "age").unwrap();
    let mut iter = MultiRowColumnIterator::new(
        backend,
        rows,
        ScanRange {
            start: None,
            finish: None,
            descending: false,
            limit: 50,
        },
        SortOrder::Ascending,
        50,
        None,
    );
    assert!(matches!(
        iter.next_column(),
        Err(StoreError::InconsistentPage(_))
    ));
}
