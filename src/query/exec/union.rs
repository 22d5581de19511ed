//! Deduplicating merge-union of ordered id streams.

use std::cmp::Ordering;

use crate::error::Result;
use crate::model::{EntityId, SortOrder};
use crate::query::cursor::CursorCache;
use crate::query::exec::{Lookahead, ResultIterator};

/// Emits the ordered union of its children. An id appearing in several
/// branches is emitted once; each branch keeps its own resumption state so a
/// paged union resumes every branch independently.
pub struct UnionIterator {
    children: Vec<Lookahead>,
    order: SortOrder,
}

impl UnionIterator {
    pub fn new(children: Vec<Box<dyn ResultIterator>>, order: SortOrder) -> Self {
        Self {
            children: children.into_iter().map(Lookahead::new).collect(),
            order,
        }
    }
}

impl ResultIterator for UnionIterator {
    fn next_id(&mut self) -> Result<Option<EntityId>> {
        let mut best: Option<EntityId> = None;
        for child in &mut self.children {
            if let Some(head) = child.peek()? {
                best = Some(match best {
                    Some(b) if self.order.cmp(&head, &b) == Ordering::Less => head,
                    Some(b) => b,
                    None => head,
                });
            }
        }
        let Some(best) = best else {
            return Ok(None);
        };

        // consume the winner from every branch holding it
        for child in &mut self.children {
            if child.peek()? == Some(best) {
                child.take()?;
            }
        }
        Ok(Some(best))
    }

    fn finalize_cursor(&mut self, cache: &mut CursorCache, _last: Option<EntityId>) {
        // branches advance unevenly; each resumes from its own last
        // delivered value, not from the union's
        for child in &mut self.children {
            child.finalize_branch(cache);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::exec::testing::{drain, FixedStream};

    #[test]
    fn unions_and_dedups() {
        let mut iter = UnionIterator::new(
            vec![
                FixedStream::of(&[1, 4, 7]),
                FixedStream::of(&[2, 4, 8]),
                FixedStream::of(&[4, 9]),
            ],
            SortOrder::Ascending,
        );
        assert_eq!(drain(&mut iter), vec![1, 2, 4, 7, 8, 9]);
    }

    #[test]
    fn lone_branch_passes_through() {
        let mut iter = UnionIterator::new(
            vec![FixedStream::of(&[3, 5]), FixedStream::of(&[])],
            SortOrder::Ascending,
        );
        assert_eq!(drain(&mut iter), vec![3, 5]);
    }
}
