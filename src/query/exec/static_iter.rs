//! Trivial producers for identifier-literal lookups.

use crate::error::Result;
use crate::model::EntityId;
use crate::query::cursor::CursorCache;
use crate::query::exec::ResultIterator;

/// Yields exactly one id, once. Identifier lookups never page.
pub struct StaticIdIterator {
    id: Option<EntityId>,
}

impl StaticIdIterator {
    pub fn new(id: EntityId) -> Self {
        Self { id: Some(id) }
    }
}

impl ResultIterator for StaticIdIterator {
    fn next_id(&mut self) -> Result<Option<EntityId>> {
        Ok(self.id.take())
    }

    fn finalize_cursor(&mut self, _cache: &mut CursorCache, _last: Option<EntityId>) {}
}

/// Yields nothing; short-circuits "identifier not found".
pub struct EmptyIterator;

impl ResultIterator for EmptyIterator {
    fn next_id(&mut self) -> Result<Option<EntityId>> {
        Ok(None)
    }

    fn finalize_cursor(&mut self, _cache: &mut CursorCache, _last: Option<EntityId>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_id_yields_once() {
        let mut iter = StaticIdIterator::new(EntityId::from_u128(5));
        assert_eq!(iter.next_id().unwrap(), Some(EntityId::from_u128(5)));
        assert_eq!(iter.next_id().unwrap(), None);
        assert_eq!(iter.next_id().unwrap(), None);
    }

    #[test]
    fn empty_yields_nothing() {
        let mut iter = EmptyIterator;
        assert_eq!(iter.next_id().unwrap(), None);
    }
}
