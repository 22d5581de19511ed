//! The compiled query tree: a compressed boolean expression over slices.
//!
//! A query compiles to one [`QueryNode`]. Slices on the same field within an
//! AND context live together in one [`SliceNode`]; OR and NOT introduce
//! boundaries with their own child trees. The tree is built fresh per
//! request and never cached.

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::model::{SortPredicate, Value};
use crate::query::slice::QuerySlice;

/// Reserved property name for the primary entity-id row; the synthetic
/// full-scan node reads it.
pub const ENTITY_ID_PROPERTY: &str = "uuid";

/// A set of per-field slices, implicitly AND-combined.
///
/// At most one slice exists per field: setting a bound on a field that
/// already has a slice tightens that slice instead of adding a second one.
#[derive(Debug, Clone)]
pub struct SliceNode {
    id: usize,
    slices: BTreeMap<String, QuerySlice>,
}

impl SliceNode {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            slices: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    fn slice_entry(&mut self, property: &str) -> &mut QuerySlice {
        let id = self.id;
        self.slices
            .entry(property.to_string())
            .or_insert_with(|| QuerySlice::new(property, id))
    }

    /// Creates the field's slice if missing and tightens its start bound.
    pub fn set_start(&mut self, property: &str, value: Option<Value>, inclusive: bool) {
        self.slice_entry(property).set_start(value, inclusive);
    }

    /// Creates the field's slice if missing and tightens its finish bound.
    pub fn set_finish(&mut self, property: &str, value: Option<Value>, inclusive: bool) {
        self.slice_entry(property).set_finish(value, inclusive);
    }

    pub fn get_slice(&self, property: &str) -> Option<&QuerySlice> {
        self.slices.get(property)
    }

    pub fn slices(&self) -> impl Iterator<Item = &QuerySlice> {
        self.slices.values()
    }

    pub fn slices_mut(&mut self) -> impl Iterator<Item = &mut QuerySlice> {
        self.slices.values_mut()
    }

    pub fn slice_count(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }
}

/// Synthetic node scanning every entity id in scope. Used as the keep side
/// of NOT and for queries with no predicates.
#[derive(Debug, Clone)]
pub struct AllNode {
    slice: QuerySlice,
}

impl AllNode {
    pub fn new(id: usize) -> Self {
        Self {
            slice: QuerySlice::new(ENTITY_ID_PROPERTY, id),
        }
    }

    pub fn slice(&self) -> &QuerySlice {
        &self.slice
    }

    pub fn slice_mut(&mut self) -> &mut QuerySlice {
        &mut self.slice
    }
}

/// Explicit ordering wrapper: the first sort property's slice drives the
/// scan, remaining sort fields are re-ordered in memory, and an optional
/// filter tree constrains candidates.
#[derive(Debug, Clone)]
pub struct OrderByNode {
    pub primary: SliceNode,
    pub secondary: Vec<SortPredicate>,
    pub filter: Option<Box<QueryNode>>,
}

impl OrderByNode {
    pub fn has_secondary(&self) -> bool {
        !self.secondary.is_empty()
    }
}

/// The compiled query tree.
#[derive(Debug, Clone)]
pub enum QueryNode {
    /// Full unconstrained scan of entity ids.
    All(AllNode),
    /// Per-field bounds AND-combined.
    Slice(SliceNode),
    /// Intersection of two subtrees.
    And {
        left: Box<QueryNode>,
        right: Box<QueryNode>,
    },
    /// Union of two subtrees. Each branch was compiled in its own slice
    /// context, so branch cursor state never collides.
    Or {
        left: Box<QueryNode>,
        right: Box<QueryNode>,
    },
    /// Everything in `keep` not matched by `subtract`.
    Not {
        subtract: Box<QueryNode>,
        keep: Box<QueryNode>,
    },
    /// Ordered scan with optional secondary sorts and filter.
    OrderBy(OrderByNode),
    /// Literal uuid lookup.
    Uuid(Uuid),
    /// Email-alias lookup, resolved to at most one id.
    Email(String),
}

impl QueryNode {
    /// Total leaf slices under this node; feeds page-size heuristics.
    pub fn child_slice_count(&self) -> usize {
        match self {
            QueryNode::All(_) => 1,
            QueryNode::Slice(node) => node.slice_count(),
            QueryNode::And { left, right } | QueryNode::Or { left, right } => {
                left.child_slice_count() + right.child_slice_count()
            }
            QueryNode::Not { subtract, keep } => {
                subtract.child_slice_count() + keep.child_slice_count()
            }
            QueryNode::OrderBy(node) => {
                node.primary.slice_count()
                    + node
                        .filter
                        .as_ref()
                        .map_or(0, |filter| filter.child_slice_count())
            }
            QueryNode::Uuid(_) | QueryNode::Email(_) => 0,
        }
    }

    /// Nodes that must always request the maximum page size, regardless of
    /// the computed hint. Synthetic full scans qualify: undersizing them
    /// starves every operator above.
    pub fn ignore_hint_size(&self) -> bool {
        matches!(self, QueryNode::All(_))
    }
}
