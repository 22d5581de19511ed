//! In-memory re-ordering for secondary sort fields.
//!
//! The governing slice's scan produces candidates in primary-sort order;
//! secondary fields cannot be pushed to the index, so candidates are
//! buffered in bounded windows, their sort keys loaded in bulk, and each
//! window re-emitted in corrected order. Ordering is exact within a window.
//! The window is the pagination unit: it must match the delivered page, or
//! buffered candidates would be skipped by the resume cursor.

use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tracing::trace;

use crate::error::Result;
use crate::model::{ApplicationScope, EntityId, SortOrder, SortPredicate, Value};
use crate::query::cursor::CursorCache;
use crate::query::exec::ResultIterator;
use crate::scan::SortKeyLoader;

pub struct OrderByIterator {
    candidates: Box<dyn ResultIterator>,
    loader: Arc<dyn SortKeyLoader>,
    scope: ApplicationScope,
    secondary: Vec<SortPredicate>,
    tiebreak: SortOrder,
    window: usize,
    buffer: VecDeque<EntityId>,
    last_candidate: Option<EntityId>,
    exhausted: bool,
}

impl OrderByIterator {
    pub fn new(
        candidates: Box<dyn ResultIterator>,
        loader: Arc<dyn SortKeyLoader>,
        scope: ApplicationScope,
        secondary: Vec<SortPredicate>,
        tiebreak: SortOrder,
        window: usize,
    ) -> Self {
        Self {
            candidates,
            loader,
            scope,
            secondary,
            tiebreak,
            window: window.max(1),
            buffer: VecDeque::new(),
            last_candidate: None,
            exhausted: false,
        }
    }

    fn fill_window(&mut self) -> Result<()> {
        let mut ids = Vec::with_capacity(self.window);
        while ids.len() < self.window {
            match self.candidates.next_id()? {
                Some(id) => ids.push(id),
                None => {
                    self.exhausted = true;
                    break;
                }
            }
        }
        if ids.is_empty() {
            return Ok(());
        }
        self.last_candidate = ids.last().copied();

        let mut keys: Vec<HashMap<EntityId, Value>> = Vec::with_capacity(self.secondary.len());
        for sort in &self.secondary {
            keys.push(self.loader.load_sort_keys(&self.scope, &sort.property, &ids)?);
        }
        trace!(window = ids.len(), sorts = self.secondary.len(), "re-ordering window");

        let secondary = &self.secondary;
        let tiebreak = self.tiebreak;
        ids.sort_by(|a, b| {
            for (sort, values) in secondary.iter().zip(&keys) {
                let ord = match (values.get(a), values.get(b)) {
                    (Some(va), Some(vb)) => sort.direction.cmp(va, vb),
                    // entities missing the field sort last
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            tiebreak.cmp(a, b)
        });
        self.buffer.extend(ids);
        Ok(())
    }
}

impl ResultIterator for OrderByIterator {
    fn next_id(&mut self) -> Result<Option<EntityId>> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fill_window()?;
        }
        Ok(self.buffer.pop_front())
    }

    fn finalize_cursor(&mut self, cache: &mut CursorCache, _last: Option<EntityId>) {
        // resume from the furthest candidate pulled into a window; the
        // window boundary is the pagination unit here
        let last = self.last_candidate;
        self.candidates.finalize_cursor(cache, last);
    }
}
