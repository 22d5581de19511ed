//! The leaf iterator: drains one slice's ordered column scan, page by page.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tracing::trace;

use crate::error::Result;
use crate::model::{ApplicationScope, EntityId, SortOrder};
use crate::query::cursor::CursorCache;
use crate::query::exec::ResultIterator;
use crate::query::slice::QuerySlice;
use crate::scan::{IndexBackend, IndexColumn, MultiRowColumnIterator, ScanBound, ScanRange};

/// Streams the ids matched by one slice.
///
/// Columns arrive from the backend in (value, id) order; each loaded page is
/// re-sorted by id in the plan's direction before ids are handed up, so the
/// operators above can merge by lock-step comparison. The resumption token
/// is the column of the last id the caller actually received.
pub struct SliceIterator {
    backend: Arc<dyn IndexBackend>,
    scope: ApplicationScope,
    slice: QuerySlice,
    order: SortOrder,
    page_size: usize,
    buffer_size: usize,
    resume: Option<IndexColumn>,
    columns: Option<MultiRowColumnIterator>,
    page: VecDeque<EntityId>,
    /// Every column loaded during this request, keyed by entity; maps a
    /// delivered id back to its scan position for cursor finalization.
    seen: HashMap<EntityId, IndexColumn>,
    last_popped: Option<EntityId>,
    source_done: bool,
}

impl SliceIterator {
    pub fn new(
        backend: Arc<dyn IndexBackend>,
        scope: ApplicationScope,
        slice: QuerySlice,
        order: SortOrder,
        page_size: usize,
        buffer_size: usize,
    ) -> Result<Self> {
        // a zero-length cursor marker means the slice already yielded
        // everything; treat as an exhausted scan
        let source_done = slice.is_complete();
        let resume = match slice.cursor() {
            Some(token) if !token.is_empty() => Some(IndexColumn::from_token(token)?),
            _ => None,
        };

        Ok(Self {
            backend,
            scope,
            slice,
            order,
            page_size: page_size.max(1),
            buffer_size,
            resume,
            columns: None,
            page: VecDeque::new(),
            seen: HashMap::new(),
            last_popped: None,
            source_done,
        })
    }

    fn scan_range(&self) -> ScanRange {
        ScanRange {
            start: self
                .slice
                .start()
                .map(|b| ScanBound::value(b.value.clone(), b.inclusive)),
            finish: self
                .slice
                .finish()
                .map(|b| ScanBound::value(b.value.clone(), b.inclusive)),
            descending: self.slice.is_reversed(),
            limit: self.buffer_size,
        }
    }

    fn load_page(&mut self) -> Result<()> {
        if self.columns.is_none() {
            let rows = self.backend.rows(&self.scope, self.slice.property())?;
            trace!(
                property = self.slice.property(),
                rows = rows.len(),
                "opening slice scan"
            );
            let scan_order = if self.slice.is_reversed() {
                SortOrder::Descending
            } else {
                SortOrder::Ascending
            };
            self.columns = Some(MultiRowColumnIterator::new(
                Arc::clone(&self.backend),
                rows,
                self.scan_range(),
                scan_order,
                self.buffer_size,
                self.resume.clone(),
            ));
        }

        let source = self.columns.as_mut().unwrap();
        let mut batch = Vec::with_capacity(self.page_size);
        while batch.len() < self.page_size {
            match source.next_column()? {
                Some(column) => batch.push(column),
                None => {
                    self.source_done = true;
                    break;
                }
            }
        }

        // an entity indexed at several values within the range appears once
        let mut ids = Vec::with_capacity(batch.len());
        for column in batch {
            if !self.seen.contains_key(&column.entity) {
                ids.push(column.entity);
            }
            self.seen.insert(column.entity, column);
        }
        ids.sort_by(|a, b| self.order.cmp(a, b));
        self.page.extend(ids);
        Ok(())
    }

    fn drained(&self) -> bool {
        self.source_done && self.page.is_empty()
    }
}

impl ResultIterator for SliceIterator {
    fn next_id(&mut self) -> Result<Option<EntityId>> {
        while self.page.is_empty() {
            if self.source_done {
                return Ok(None);
            }
            self.load_page()?;
        }
        let id = self.page.pop_front();
        self.last_popped = id;
        Ok(id)
    }

    fn finalize_cursor(&mut self, cache: &mut CursorCache, last: Option<EntityId>) {
        let key = self.slice.cursor_key();
        match last {
            // the caller consumed our whole stream: nothing left to resume
            Some(id) if self.drained() && self.last_popped == Some(id) => {
                cache.set(key, Vec::new());
            }
            Some(id) => match self.seen.get(&id) {
                Some(column) => cache.set(key, column.to_token()),
                // not ours; carry the incoming position forward
                None => {
                    if let Some(original) = self.slice.cursor() {
                        cache.set(key, original.to_vec());
                    }
                }
            },
            // nothing delivered from this branch; a peeked value may still
            // be pending, so the incoming position stands
            None => {
                if self.drained() && self.last_popped.is_none() {
                    cache.set(key, Vec::new());
                } else if let Some(original) = self.slice.cursor() {
                    cache.set(key, original.to_vec());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Value;
    use crate::query::exec::testing::drain;
    use crate::scan::MemoryIndexBackend;
    use uuid::Uuid;

    fn scope() -> ApplicationScope {
        ApplicationScope::new(Uuid::from_u128(1))
    }

    fn slice_over(start: i64, finish: i64) -> QuerySlice {
        let mut slice = QuerySlice::new("age", 0);
        slice.set_start(Some(Value::Long(start)), true);
        slice.set_finish(Some(Value::Long(finish)), true);
        slice
    }

    fn populated(n: i64) -> Arc<MemoryIndexBackend> {
        let backend = Arc::new(MemoryIndexBackend::new());
        for v in 0..n {
            backend.insert(
                &scope(),
                "age",
                Value::Long(v),
                EntityId::from_u128(v as u128),
            );
        }
        backend
    }

    #[test]
    fn streams_ids_in_id_order() {
        let backend = populated(20);
        let mut iter = SliceIterator::new(
            backend,
            scope(),
            slice_over(3, 12),
            SortOrder::Ascending,
            4,
            4,
        )
        .unwrap();
        assert_eq!(drain(&mut iter), (3..=12).collect::<Vec<u128>>());
    }

    #[test]
    fn completed_slice_is_empty() {
        let backend = populated(5);
        let mut slice = slice_over(0, 4);
        slice.mark_complete();
        let mut iter =
            SliceIterator::new(backend, scope(), slice, SortOrder::Ascending, 4, 4).unwrap();
        assert_eq!(iter.next_id().unwrap(), None);
    }

    #[test]
    fn resumes_after_finalized_position() {
        let backend = populated(10);
        let mut iter = SliceIterator::new(
            Arc::clone(&backend) as Arc<dyn IndexBackend>,
            scope(),
            slice_over(0, 9),
            SortOrder::Ascending,
            3,
            3,
        )
        .unwrap();

        // consume four, finalize at the fourth
        let mut taken = Vec::new();
        for _ in 0..4 {
            taken.push(iter.next_id().unwrap().unwrap());
        }
        let mut cache = CursorCache::new();
        iter.finalize_cursor(&mut cache, taken.last().copied());

        let mut slice = slice_over(0, 9);
        let token = cache.get(slice.cursor_key()).unwrap();
        assert!(!token.is_empty());
        slice.set_cursor(token.to_vec());

        let mut resumed =
            SliceIterator::new(backend, scope(), slice, SortOrder::Ascending, 3, 3).unwrap();
        assert_eq!(drain(&mut resumed), (4..=9).collect::<Vec<u128>>());
    }

    #[test]
    fn exhaustion_finalizes_to_complete_marker() {
        let backend = populated(3);
        let mut iter = SliceIterator::new(
            backend,
            scope(),
            slice_over(0, 2),
            SortOrder::Ascending,
            10,
            10,
        )
        .unwrap();
        let ids = drain(&mut iter);
        assert_eq!(ids.len(), 3);

        let mut cache = CursorCache::new();
        iter.finalize_cursor(&mut cache, Some(EntityId::from_u128(2)));
        assert_eq!(cache.get(slice_over(0, 2).cursor_key()), Some(&[][..]));
    }

    #[test]
    fn descending_slice_reverses_emission() {
        let backend = populated(6);
        let mut slice = slice_over(0, 5);
        slice.reverse();
        let mut iter =
            SliceIterator::new(backend, scope(), slice, SortOrder::Descending, 2, 2).unwrap();
        assert_eq!(drain(&mut iter), vec![5, 4, 3, 2, 1, 0]);
    }
}
