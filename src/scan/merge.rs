//! K-way merge over independently paginated sorted sources.
//!
//! Each source produces its items in the merge's declared order and pages
//! independently; the merge keeps a bounded buffer per source, refills empty
//! buffers in parallel, and emits the extreme head across all buffers. A
//! value present in several sources at once is emitted exactly once.
//!
//! The merge step itself is sequential. Only the per-source refills fan out.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;

use rayon::prelude::*;
use tracing::trace;

use crate::error::{Result, StoreError};
use crate::model::SortOrder;
use crate::scan::{IndexBackend, IndexColumn, RowKey, ScanBound, ScanRange};

/// One fetched page from a source. `more` must be accurate: a short page
/// flagged `more == true` is treated as a fatal inconsistency.
#[derive(Debug, Clone)]
pub struct FetchPage<T> {
    pub items: Vec<T>,
    pub more: bool,
}

/// A resumable, ordered producer of items. `resume` is the last item the
/// caller consumed from this source; the returned page starts strictly
/// after it.
pub trait ColumnSource<T>: Send + Sync {
    fn fetch(&self, limit: usize, resume: Option<&T>) -> Result<FetchPage<T>>;
}

struct SourceState<T> {
    source: Box<dyn ColumnSource<T>>,
    buffer: VecDeque<T>,
    last: Option<T>,
    exhausted: bool,
}

impl<T: Clone> SourceState<T> {
    fn needs_refill(&self) -> bool {
        self.buffer.is_empty() && !self.exhausted
    }

    fn refill(&mut self, limit: usize) -> Result<()> {
        let page = self.source.fetch(limit, self.last.as_ref())?;

        if page.items.len() > limit {
            return Err(StoreError::InconsistentPage(format!(
                "source returned {} items for a limit of {limit}",
                page.items.len()
            )));
        }
        if page.more && page.items.len() < limit {
            return Err(StoreError::InconsistentPage(format!(
                "source returned a short page ({} of {limit}) while claiming more remain",
                page.items.len()
            )));
        }

        if let Some(item) = page.items.last() {
            self.last = Some(item.clone());
        }
        if !page.more {
            self.exhausted = true;
        }
        self.buffer.extend(page.items);
        Ok(())
    }
}

/// Merges N ordered sources into one ordered, deduplicated stream.
pub struct MultiKeyMergeIterator<T> {
    sources: Vec<SourceState<T>>,
    order: SortOrder,
    buffer_size: usize,
}

impl<T: Ord + Clone + Send> MultiKeyMergeIterator<T> {
    pub fn new(
        sources: Vec<Box<dyn ColumnSource<T>>>,
        order: SortOrder,
        buffer_size: usize,
    ) -> Self {
        Self {
            sources: sources
                .into_iter()
                .map(|source| SourceState {
                    source,
                    buffer: VecDeque::new(),
                    last: None,
                    exhausted: false,
                })
                .collect(),
            order,
            buffer_size: buffer_size.max(1),
        }
    }

    /// Pre-seeds every source's resumption point; the first fetch of each
    /// source continues strictly after `resume`.
    pub fn seed(&mut self, resume: T) {
        for state in &mut self.sources {
            state.last = Some(resume.clone());
        }
    }

    pub fn next(&mut self) -> Result<Option<T>> {
        self.refill_empty()?;

        let mut best: Option<usize> = None;
        for (i, state) in self.sources.iter().enumerate() {
            let Some(head) = state.buffer.front() else {
                continue;
            };
            best = match best {
                Some(j)
                    if self
                        .order
                        .cmp(self.sources[j].buffer.front().unwrap(), head)
                        != Ordering::Greater =>
                {
                    Some(j)
                }
                _ => Some(i),
            };
        }

        let Some(best) = best else {
            return Ok(None);
        };
        let item = self.sources[best].buffer.pop_front().unwrap();

        // the same value at the head of another source is a duplicate
        for (i, state) in self.sources.iter_mut().enumerate() {
            if i == best {
                continue;
            }
            while matches!(state.buffer.front(), Some(head) if *head == item) {
                state.buffer.pop_front();
            }
        }

        Ok(Some(item))
    }

    /// Refills every empty, unexhausted source before a head is selected.
    /// All live sources must hold their head when the extreme is chosen,
    /// otherwise a late-arriving equal head would duplicate an emitted item.
    fn refill_empty(&mut self) -> Result<()> {
        let buffer_size = self.buffer_size;
        let pending = self.sources.iter().filter(|s| s.needs_refill()).count();
        if pending == 0 {
            return Ok(());
        }
        trace!(pending, buffer_size, "refilling merge sources");

        self.sources
            .par_iter_mut()
            .filter(|state| state.needs_refill())
            .map(|state| state.refill(buffer_size))
            .collect::<Result<()>>()
    }
}

/// Column source over one physical index row. Resumption re-issues the
/// range with an inclusive restart at the resume column and one extra slot,
/// then drops the restart column if the backend returned it. The restart is
/// inclusive because the resume column may have been deleted since the last
/// page; an exclusive restart would then skip its successor on some
/// backends.
struct RowColumnSource {
    backend: Arc<dyn IndexBackend>,
    row: RowKey,
    range: ScanRange,
}

impl ColumnSource<IndexColumn> for RowColumnSource {
    fn fetch(&self, limit: usize, resume: Option<&IndexColumn>) -> Result<FetchPage<IndexColumn>> {
        let mut range = self.range.clone();
        let resumed = resume.is_some();
        match resume {
            None => range.limit = limit,
            Some(column) => {
                range.start = Some(ScanBound::column(column, true));
                range.limit = limit + 1;
            }
        }

        let page = self.backend.scan(&self.row, &range)?;
        let mut items = page.columns;
        let mut more = page.more;

        if resumed {
            if items.first() == resume {
                items.remove(0);
            }
            // the resume column was deleted underneath us and the extra
            // slot filled with a real result
            if items.len() > limit {
                items.truncate(limit);
                more = true;
            }
        }

        Ok(FetchPage { items, more })
    }
}

/// Merge over every shard row backing one property scan, with per-row
/// resumption. This is what a slice iterator drains.
pub struct MultiRowColumnIterator {
    merge: MultiKeyMergeIterator<IndexColumn>,
}

impl MultiRowColumnIterator {
    pub fn new(
        backend: Arc<dyn IndexBackend>,
        rows: Vec<RowKey>,
        range: ScanRange,
        order: SortOrder,
        buffer_size: usize,
        resume: Option<IndexColumn>,
    ) -> Self {
        let sources: Vec<Box<dyn ColumnSource<IndexColumn>>> = rows
            .into_iter()
            .map(|row| {
                Box::new(RowColumnSource {
                    backend: Arc::clone(&backend),
                    row,
                    range: range.clone(),
                }) as Box<dyn ColumnSource<IndexColumn>>
            })
            .collect();

        let mut merge = MultiKeyMergeIterator::new(sources, order, buffer_size);
        if let Some(column) = resume {
            merge.seed(column);
        }
        Self { merge }
    }

    pub fn next_column(&mut self) -> Result<Option<IndexColumn>> {
        self.merge.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct VecSource {
        items: Vec<u64>,
    }

    impl ColumnSource<u64> for VecSource {
        fn fetch(&self, limit: usize, resume: Option<&u64>) -> Result<FetchPage<u64>> {
            let start = match resume {
                Some(r) => self.items.partition_point(|v| v <= r),
                None => 0,
            };
            let end = (start + limit).min(self.items.len());
            Ok(FetchPage {
                items: self.items[start..end].to_vec(),
                more: end < self.items.len(),
            })
        }
    }

    fn merge_of(
        sources: Vec<Vec<u64>>,
        buffer_size: usize,
    ) -> MultiKeyMergeIterator<u64> {
        MultiKeyMergeIterator::new(
            sources
                .into_iter()
                .map(|items| Box::new(VecSource { items }) as Box<dyn ColumnSource<u64>>)
                .collect(),
            SortOrder::Ascending,
            buffer_size,
        )
    }

    fn drain(merge: &mut MultiKeyMergeIterator<u64>) -> Vec<u64> {
        let mut out = Vec::new();
        while let Some(v) = merge.next().unwrap() {
            out.push(v);
        }
        out
    }

    #[test]
    fn merges_and_dedups_across_sources() {
        let mut merge = merge_of(
            vec![vec![1, 4, 7, 10], vec![2, 4, 8], vec![3, 4, 9, 10, 11]],
            100,
        );
        assert_eq!(drain(&mut merge), vec![1, 2, 3, 4, 7, 8, 9, 10, 11]);
        // after the true end, next keeps returning none
        assert_eq!(merge.next().unwrap(), None);
    }

    #[test]
    fn tiny_buffer_preserves_order() {
        let mut merge = merge_of(vec![(0..50).map(|v| v * 2).collect(), vec![5, 31, 99]], 1);
        let out = drain(&mut merge);
        assert!(out.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(out.len(), 53);
    }

    #[test]
    fn buffer_boundary_neither_skips_nor_repeats() {
        // 12 elements in one source, buffer of 4: boundaries land exactly
        let items: Vec<u64> = (1..=12).collect();
        let mut merge = merge_of(vec![items.clone()], 4);
        assert_eq!(drain(&mut merge), items);
    }

    #[test]
    fn uneven_exhaustion_is_tolerated() {
        let mut merge = merge_of(vec![vec![1], vec![2, 3, 4, 5, 6]], 2);
        assert_eq!(drain(&mut merge), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn short_page_claiming_more_is_inconsistent() {
        struct Liar;
        impl ColumnSource<u64> for Liar {
            fn fetch(&self, _limit: usize, _resume: Option<&u64>) -> Result<FetchPage<u64>> {
                Ok(FetchPage {
                    items: vec![1],
                    more: true,
                })
            }
        }
        let mut merge = MultiKeyMergeIterator::new(
            vec![Box::new(Liar) as Box<dyn ColumnSource<u64>>],
            SortOrder::Ascending,
            10,
        );
        assert!(matches!(
            merge.next(),
            Err(StoreError::InconsistentPage(_))
        ));
    }

    #[test]
    fn oversized_page_is_inconsistent() {
        struct Flood;
        impl ColumnSource<u64> for Flood {
            fn fetch(&self, limit: usize, _resume: Option<&u64>) -> Result<FetchPage<u64>> {
                Ok(FetchPage {
                    items: (0..=limit as u64).collect(),
                    more: true,
                })
            }
        }
        let mut merge = MultiKeyMergeIterator::new(
            vec![Box::new(Flood) as Box<dyn ColumnSource<u64>>],
            SortOrder::Ascending,
            3,
        );
        assert!(matches!(
            merge.next(),
            Err(StoreError::InconsistentPage(_))
        ));
    }

    #[test]
    fn descending_merge_emits_descending() {
        struct Desc(Vec<u64>);
        impl ColumnSource<u64> for Desc {
            fn fetch(&self, limit: usize, resume: Option<&u64>) -> Result<FetchPage<u64>> {
                let start = match resume {
                    Some(r) => self.0.partition_point(|v| v >= r),
                    None => 0,
                };
                let end = (start + limit).min(self.0.len());
                Ok(FetchPage {
                    items: self.0[start..end].to_vec(),
                    more: end < self.0.len(),
                })
            }
        }
        let mut merge = MultiKeyMergeIterator::new(
            vec![
                Box::new(Desc(vec![9, 5, 2])) as Box<dyn ColumnSource<u64>>,
                Box::new(Desc(vec![8, 5, 1])),
            ],
            SortOrder::Descending,
            2,
        );
        let mut out = Vec::new();
        while let Some(v) = merge.next().unwrap() {
            out.push(v);
        }
        assert_eq!(out, vec![9, 8, 5, 2, 1]);
    }
}
