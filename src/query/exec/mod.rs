//! Lazy result iterators and the tree evaluator.
//!
//! Every operator implements [`ResultIterator`]: a forward-only producer of
//! entity ids in the plan's declared direction. Operators are pure functions
//! of their children's streams; only slice iterators touch the index
//! backend, and only when a buffer needs refilling.
//!
//! Pagination is restart-by-reconstruction: after a page is served,
//! [`ResultIterator::finalize_cursor`] records each subtree's resumption
//! state into a fresh cursor cache, and the next request rebuilds the whole
//! iterator tree from that cache.

mod evaluator;
mod intersection;
mod order_by;
mod slice_iter;
mod static_iter;
mod subtraction;
mod union;

pub use evaluator::QueryExecutor;
pub use intersection::IntersectionIterator;
pub use order_by::OrderByIterator;
pub use slice_iter::SliceIterator;
pub use static_iter::{EmptyIterator, StaticIdIterator};
pub use subtraction::SubtractionIterator;
pub use union::UnionIterator;

use crate::error::Result;
use crate::model::EntityId;
use crate::query::cursor::CursorCache;

/// A lazy, ordered stream of entity ids.
pub trait ResultIterator {
    /// Next id in the declared direction, or `None` when exhausted.
    fn next_id(&mut self) -> Result<Option<EntityId>>;

    /// Records this subtree's resumption state. `last` is the final id this
    /// subtree delivered to its parent (peeked-but-unconsumed values do not
    /// count); `None` means nothing was delivered and the incoming state
    /// should carry forward unchanged.
    fn finalize_cursor(&mut self, cache: &mut CursorCache, last: Option<EntityId>);
}

/// One page of results plus the token to fetch the next one. A `None`
/// cursor means no further pages.
#[derive(Debug, Clone)]
pub struct ResultsPage<T> {
    pub items: Vec<T>,
    pub cursor: Option<Vec<u8>>,
}

/// Single-value peek buffer over a child iterator. Peeking pulls from the
/// child; the operator decides whether the pulled value counts as delivered
/// (taken) or stays pending for the next page.
pub(crate) struct Lookahead {
    inner: Box<dyn ResultIterator>,
    peeked: Option<Option<EntityId>>,
    /// Last value actually taken, for per-branch cursor finalization.
    last_taken: Option<EntityId>,
}

impl Lookahead {
    pub(crate) fn new(inner: Box<dyn ResultIterator>) -> Self {
        Self {
            inner,
            peeked: None,
            last_taken: None,
        }
    }

    pub(crate) fn peek(&mut self) -> Result<Option<EntityId>> {
        if self.peeked.is_none() {
            self.peeked = Some(self.inner.next_id()?);
        }
        Ok(self.peeked.as_ref().copied().flatten())
    }

    pub(crate) fn take(&mut self) -> Result<Option<EntityId>> {
        let value = match self.peeked.take() {
            Some(v) => v,
            None => self.inner.next_id()?,
        };
        if value.is_some() {
            self.last_taken = value;
        }
        Ok(value)
    }

    pub(crate) fn last_taken(&self) -> Option<EntityId> {
        self.last_taken
    }

    /// Finalizes the child with its own branch-local progress.
    pub(crate) fn finalize_branch(&mut self, cache: &mut CursorCache) {
        let last = self.last_taken;
        self.inner.finalize_cursor(cache, last);
    }

    /// Finalizes the child with a position chosen by the parent.
    pub(crate) fn finalize_at(&mut self, cache: &mut CursorCache, last: Option<EntityId>) {
        self.inner.finalize_cursor(cache, last);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Fixed id stream for operator tests.
    pub(crate) struct FixedStream {
        ids: std::collections::VecDeque<EntityId>,
    }

    impl FixedStream {
        pub(crate) fn of(ids: &[u128]) -> Box<dyn ResultIterator> {
            Box::new(Self {
                ids: ids.iter().copied().map(EntityId::from_u128).collect(),
            })
        }
    }

    impl ResultIterator for FixedStream {
        fn next_id(&mut self) -> Result<Option<EntityId>> {
            Ok(self.ids.pop_front())
        }

        fn finalize_cursor(&mut self, _cache: &mut CursorCache, _last: Option<EntityId>) {}
    }

    pub(crate) fn drain(iter: &mut dyn ResultIterator) -> Vec<u128> {
        let mut out = Vec::new();
        while let Some(id) = iter.next_id().unwrap() {
            out.push(id.0.as_u128());
        }
        out
    }
}
