//! Ordered subtraction: keep minus subtract, by merge-style skipping.

use std::cmp::Ordering;

use crate::error::Result;
use crate::model::{EntityId, SortOrder};
use crate::query::cursor::CursorCache;
use crate::query::exec::{Lookahead, ResultIterator};

/// Emits every id from `keep` not present in `subtract`. Both children must
/// share the declared direction; the subtract side is skipped forward in
/// lock step, never materialized.
pub struct SubtractionIterator {
    keep: Lookahead,
    subtract: Lookahead,
    order: SortOrder,
}

impl SubtractionIterator {
    pub fn new(
        keep: Box<dyn ResultIterator>,
        subtract: Box<dyn ResultIterator>,
        order: SortOrder,
    ) -> Self {
        Self {
            keep: Lookahead::new(keep),
            subtract: Lookahead::new(subtract),
            order,
        }
    }
}

impl ResultIterator for SubtractionIterator {
    fn next_id(&mut self) -> Result<Option<EntityId>> {
        loop {
            let Some(candidate) = self.keep.peek()? else {
                return Ok(None);
            };

            while matches!(
                self.subtract.peek()?,
                Some(head) if self.order.cmp(&head, &candidate) == Ordering::Less
            ) {
                self.subtract.take()?;
            }

            if self.subtract.peek()? == Some(candidate) {
                self.keep.take()?;
                self.subtract.take()?;
                continue;
            }
            return self.keep.take();
        }
    }

    fn finalize_cursor(&mut self, cache: &mut CursorCache, last: Option<EntityId>) {
        self.keep.finalize_at(cache, last);
        // the subtract side's position is derived from the keep side and is
        // re-skipped on resume
        self.subtract.finalize_at(cache, None);
    }
}
