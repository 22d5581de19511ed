//! Merge-intersection of N ordered id streams.

use std::cmp::Ordering;

use crate::error::Result;
use crate::model::{EntityId, SortOrder};
use crate::query::cursor::CursorCache;
use crate::query::exec::{Lookahead, ResultIterator};

/// Emits ids present in every child, in the shared direction. Any child
/// exhausting terminates the whole intersection.
pub struct IntersectionIterator {
    children: Vec<Lookahead>,
    order: SortOrder,
}

impl IntersectionIterator {
    pub fn new(children: Vec<Box<dyn ResultIterator>>, order: SortOrder) -> Self {
        Self {
            children: children.into_iter().map(Lookahead::new).collect(),
            order,
        }
    }
}

impl ResultIterator for IntersectionIterator {
    fn next_id(&mut self) -> Result<Option<EntityId>> {
        if self.children.is_empty() {
            return Ok(None);
        }
        loop {
            // target: the furthest-ahead head across all children
            let mut target: Option<EntityId> = None;
            for child in &mut self.children {
                let Some(head) = child.peek()? else {
                    return Ok(None);
                };
                target = Some(match target {
                    Some(t) if self.order.cmp(&head, &t) == Ordering::Greater => head,
                    Some(t) => t,
                    None => head,
                });
            }
            let target = target.unwrap();

            // drag every child forward to the target
            let mut agreed = true;
            for child in &mut self.children {
                loop {
                    let Some(head) = child.peek()? else {
                        return Ok(None);
                    };
                    if self.order.cmp(&head, &target) == Ordering::Less {
                        child.take()?;
                        continue;
                    }
                    if head != target {
                        agreed = false;
                    }
                    break;
                }
            }

            if agreed {
                for child in &mut self.children {
                    child.take()?;
                }
                return Ok(Some(target));
            }
        }
    }

    fn finalize_cursor(&mut self, cache: &mut CursorCache, last: Option<EntityId>) {
        // every child delivered `last`, so each can resume from it directly
        for child in &mut self.children {
            child.finalize_at(cache, last);
        }
    }
}
