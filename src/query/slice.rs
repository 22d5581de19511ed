//! Range bounds and slices: the per-field unit a scan is driven by.
//!
//! A [`QuerySlice`] holds one field's start/finish bound plus resumption
//! state. Slices are mutated only while the compiler tightens bounds; during
//! evaluation they are treated as immutable inputs to the scan layer.

use std::cmp::Ordering;

use crate::model::Value;

/// One side of a range: a typed value plus whether the bound is inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeBound {
    pub value: Value,
    pub inclusive: bool,
}

impl RangeBound {
    pub fn new(value: Value, inclusive: bool) -> Self {
        Self { value, inclusive }
    }

    /// Orders start bounds: later means tighter. For equal values an
    /// inclusive start sorts outward (before) an exclusive one, so
    /// `x > 5` replaces `x >= 5`.
    fn cmp_as_start(&self, other: &RangeBound) -> Ordering {
        match self.value.cmp(&other.value) {
            Ordering::Equal => match (self.inclusive, other.inclusive) {
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                _ => Ordering::Equal,
            },
            ord => ord,
        }
    }

    /// Orders finish bounds: earlier means tighter. For equal values an
    /// exclusive finish sorts inward (before) an inclusive one, so
    /// `x < 5` replaces `x <= 5`.
    fn cmp_as_finish(&self, other: &RangeBound) -> Ordering {
        match self.value.cmp(&other.value) {
            Ordering::Equal => match (self.inclusive, other.inclusive) {
                (false, true) => Ordering::Less,
                (true, false) => Ordering::Greater,
                _ => Ordering::Equal,
            },
            ord => ord,
        }
    }
}

/// A single field's scan range, direction, and resumption cursor.
///
/// Cloning a slice deep-copies the cursor bytes; two copies never alias
/// resumption state, which matters when the same logical slice is reused
/// with the scan direction reversed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySlice {
    property: String,
    start: Option<RangeBound>,
    finish: Option<RangeBound>,
    cursor: Option<Vec<u8>>,
    node_id: usize,
    reversed: bool,
}

impl QuerySlice {
    pub fn new(property: impl Into<String>, node_id: usize) -> Self {
        Self {
            property: property.into(),
            start: None,
            finish: None,
            cursor: None,
            node_id,
            reversed: false,
        }
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn node_id(&self) -> usize {
        self.node_id
    }

    pub fn start(&self) -> Option<&RangeBound> {
        self.start.as_ref()
    }

    pub fn finish(&self) -> Option<&RangeBound> {
        self.finish.as_ref()
    }

    pub fn is_reversed(&self) -> bool {
        self.reversed
    }

    pub fn cursor(&self) -> Option<&[u8]> {
        self.cursor.as_deref()
    }

    /// Tightens the start bound. A `None` value models "no constraint on
    /// this side" and is a no-op. An existing bound is only replaced by a
    /// logically later one, which is what collapses `x > 1 AND x > 5` into
    /// a single `x > 5`.
    pub fn set_start(&mut self, value: Option<Value>, inclusive: bool) {
        let Some(value) = value else { return };
        let candidate = RangeBound::new(value, inclusive);
        match &self.start {
            Some(existing) if candidate.cmp_as_start(existing) != Ordering::Greater => {}
            _ => self.start = Some(candidate),
        }
    }

    /// Tightens the finish bound; mirror image of [`QuerySlice::set_start`].
    pub fn set_finish(&mut self, value: Option<Value>, inclusive: bool) {
        let Some(value) = value else { return };
        let candidate = RangeBound::new(value, inclusive);
        match &self.finish {
            Some(existing) if candidate.cmp_as_finish(existing) != Ordering::Less => {}
            _ => self.finish = Some(candidate),
        }
    }

    /// Swaps start and finish and flips direction. Used when the query's
    /// sort direction is descending.
    pub fn reverse(&mut self) {
        std::mem::swap(&mut self.start, &mut self.finish);
        self.reversed = !self.reversed;
    }

    pub fn set_cursor(&mut self, cursor: Vec<u8>) {
        self.cursor = Some(cursor);
    }

    /// Marks this slice as having yielded everything it can. A resumed
    /// query treats such a slice as an empty scan.
    pub fn mark_complete(&mut self) {
        self.cursor = Some(Vec::new());
    }

    /// True iff a zero-length cursor marker is present.
    pub fn is_complete(&self) -> bool {
        matches!(&self.cursor, Some(c) if c.is_empty())
    }

    /// Stable key for this slice's resumption state in a cursor cache.
    ///
    /// Computed over property, bounds, and direction (not the transient
    /// cursor), so the same logical slice in a follow-up request maps to the
    /// same entry. Direction participates because reversing changes which
    /// scan the cursor belongs to; callers must reverse before keying.
    pub fn cursor_key(&self) -> u32 {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&(self.node_id as u64).to_be_bytes());
        buf.extend_from_slice(self.property.as_bytes());
        buf.push(self.reversed as u8);
        for bound in [&self.start, &self.finish] {
            match bound {
                Some(b) => {
                    buf.push(b.inclusive as u8);
                    b.value.encode_into(&mut buf);
                }
                None => buf.push(0xff),
            }
        }
        crc32fast::hash(&buf)
    }
}
