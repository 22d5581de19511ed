//! Drives a compiled plan against the scan collaborators.
//!
//! Evaluation is a single recursive pass over the node tree returning a
//! composed [`ResultIterator`] per subtree. Before iterators are built, a
//! prepare pass reverses every slice when the query's sort direction is
//! descending and installs each slice's incoming cursor; the cursor key is
//! computed after reversal, so a slice's forward and reverse scans never
//! share state.

use std::sync::Arc;

use tracing::debug;

use crate::config::Config;
use crate::error::Result;
use crate::model::{ApplicationScope, EntityId, SortOrder, SortPredicate};
use crate::query::compiler::{self, QueryPlan, QueryRequest, Schema};
use crate::query::cursor::CursorCache;
use crate::query::exec::{
    EmptyIterator, IntersectionIterator, OrderByIterator, ResultIterator, ResultsPage,
    SliceIterator, StaticIdIterator, SubtractionIterator, UnionIterator,
};
use crate::query::node::{QueryNode, SliceNode};
use crate::query::slice::QuerySlice;
use crate::scan::{IdentityResolver, IndexBackend, SortKeyLoader};

/// Single-request query evaluation over pluggable collaborators. The
/// executor itself is stateless and shareable; every call builds a fresh
/// iterator tree.
pub struct QueryExecutor {
    backend: Arc<dyn IndexBackend>,
    sort_keys: Arc<dyn SortKeyLoader>,
    identity: Arc<dyn IdentityResolver>,
    config: Config,
}

impl QueryExecutor {
    pub fn new(
        backend: Arc<dyn IndexBackend>,
        sort_keys: Arc<dyn SortKeyLoader>,
        identity: Arc<dyn IdentityResolver>,
        config: Config,
    ) -> Self {
        Self {
            backend,
            sort_keys,
            identity,
            config,
        }
    }

    /// Compiles and evaluates one request, returning a page of ids.
    pub fn execute(
        &self,
        scope: &ApplicationScope,
        request: QueryRequest,
        schema: &dyn Schema,
    ) -> Result<ResultsPage<EntityId>> {
        let plan = compiler::compile(request, &self.config, schema)?;
        self.search(scope, plan)
    }

    /// Evaluates an already-compiled plan.
    pub fn search(
        &self,
        scope: &ApplicationScope,
        mut plan: QueryPlan,
    ) -> Result<ResultsPage<EntityId>> {
        let order = plan
            .sorts
            .first()
            .map(|s| s.direction)
            .unwrap_or(SortOrder::Ascending);

        prepare(&mut plan.root, &plan.sorts, &plan.cursor);

        let mut root = self.build_node(scope, &plan.root, &plan, order, true)?;
        let mut items = Vec::with_capacity(plan.limit);
        while items.len() < plan.limit {
            match root.next_id()? {
                Some(id) => items.push(id),
                None => break,
            }
        }

        // a short page means the result set is exhausted; no cursor
        let cursor = if items.len() < plan.limit {
            None
        } else {
            let mut next = CursorCache::new();
            root.finalize_cursor(&mut next, items.last().copied());
            next.to_bytes()?
        };

        debug!(
            returned = items.len(),
            limit = plan.limit,
            has_cursor = cursor.is_some(),
            "query page evaluated"
        );
        Ok(ResultsPage { items, cursor })
    }

    fn build_node(
        &self,
        scope: &ApplicationScope,
        node: &QueryNode,
        plan: &QueryPlan,
        order: SortOrder,
        is_root: bool,
    ) -> Result<Box<dyn ResultIterator>> {
        match node {
            QueryNode::All(all) => {
                // synthetic full scans always page at the maximum
                let iter = self.slice_iter(scope, all.slice(), order, self.config.max_page_size)?;
                Ok(Box::new(iter))
            }
            QueryNode::Slice(slice_node) => {
                self.build_slice_node(scope, slice_node, plan, order, is_root)
            }
            QueryNode::And { left, right } => {
                let left = self.build_node(scope, left, plan, order, false)?;
                let right = self.build_node(scope, right, plan, order, false)?;
                Ok(Box::new(IntersectionIterator::new(
                    vec![left, right],
                    order,
                )))
            }
            QueryNode::Or { left, right } => {
                let left = self.build_node(scope, left, plan, order, false)?;
                let right = self.build_node(scope, right, plan, order, false)?;
                Ok(Box::new(UnionIterator::new(vec![left, right], order)))
            }
            QueryNode::Not { subtract, keep } => {
                let keep = self.build_node(scope, keep, plan, order, false)?;
                let subtract = self.build_node(scope, subtract, plan, order, false)?;
                Ok(Box::new(SubtractionIterator::new(keep, subtract, order)))
            }
            QueryNode::OrderBy(order_by) => {
                let primary =
                    self.build_slice_node(scope, &order_by.primary, plan, order, false)?;
                let candidates: Box<dyn ResultIterator> = match &order_by.filter {
                    Some(filter) => {
                        let filter = self.build_node(scope, filter, plan, order, false)?;
                        Box::new(IntersectionIterator::new(vec![primary, filter], order))
                    }
                    None => primary,
                };
                if !order_by.has_secondary() {
                    return Ok(candidates);
                }
                // the window must equal the delivered page: ids buffered past
                // the limit never reach the caller, yet the cursor resumes
                // after the furthest buffered candidate
                let window = self.page_size(plan, is_root);
                Ok(Box::new(OrderByIterator::new(
                    candidates,
                    Arc::clone(&self.sort_keys),
                    *scope,
                    order_by.secondary.clone(),
                    order,
                    window,
                )))
            }
            QueryNode::Uuid(uuid) => {
                let id = EntityId(*uuid);
                if self.identity.contains(scope, id)? {
                    Ok(Box::new(StaticIdIterator::new(id)))
                } else {
                    Ok(Box::new(EmptyIterator))
                }
            }
            QueryNode::Email(email) => match self.identity.resolve_email(scope, email)? {
                Some(id) => Ok(Box::new(StaticIdIterator::new(id))),
                None => Ok(Box::new(EmptyIterator)),
            },
        }
    }

    /// A slice node's fields are implicitly AND-combined: one slice iterator
    /// each, intersected when there is more than one.
    fn build_slice_node(
        &self,
        scope: &ApplicationScope,
        node: &SliceNode,
        plan: &QueryPlan,
        order: SortOrder,
        is_root: bool,
    ) -> Result<Box<dyn ResultIterator>> {
        let page_size = self.page_size(plan, is_root);
        let mut children: Vec<Box<dyn ResultIterator>> = Vec::with_capacity(node.slice_count());
        for slice in node.slices() {
            children.push(Box::new(self.slice_iter(scope, slice, order, page_size)?));
        }
        match children.len() {
            0 => Ok(Box::new(EmptyIterator)),
            1 => Ok(children.pop().unwrap()),
            _ => Ok(Box::new(IntersectionIterator::new(children, order))),
        }
    }

    /// The root node pages by exactly the query limit: the cursor records
    /// the last id handed to the caller, so the root must never produce
    /// ids past it. Interior nodes page by the compiled hint.
    fn page_size(&self, plan: &QueryPlan, is_root: bool) -> usize {
        if is_root {
            plan.limit
        } else {
            plan.page_size_hint
        }
    }

    fn slice_iter(
        &self,
        scope: &ApplicationScope,
        slice: &QuerySlice,
        order: SortOrder,
        page_size: usize,
    ) -> Result<SliceIterator> {
        SliceIterator::new(
            Arc::clone(&self.backend),
            *scope,
            slice.clone(),
            order,
            page_size,
            self.config.merge_buffer_size,
        )
    }
}

/// Reverses every slice when the query direction is descending, then
/// installs incoming cursors. The set operators merge their children in
/// lock-step, so all branches must share the direction. Reversal must
/// precede cursor lookup: the key covers direction.
fn prepare(node: &mut QueryNode, sorts: &[SortPredicate], cache: &CursorCache) {
    match node {
        QueryNode::All(all) => prepare_slice(all.slice_mut(), sorts, cache),
        QueryNode::Slice(slice_node) => {
            for slice in slice_node.slices_mut() {
                prepare_slice(slice, sorts, cache);
            }
        }
        QueryNode::And { left, right } | QueryNode::Or { left, right } => {
            prepare(left, sorts, cache);
            prepare(right, sorts, cache);
        }
        QueryNode::Not { subtract, keep } => {
            prepare(subtract, sorts, cache);
            prepare(keep, sorts, cache);
        }
        QueryNode::OrderBy(order_by) => {
            for slice in order_by.primary.slices_mut() {
                prepare_slice(slice, sorts, cache);
            }
            if let Some(filter) = &mut order_by.filter {
                prepare(filter, sorts, cache);
            }
        }
        QueryNode::Uuid(_) | QueryNode::Email(_) => {}
    }
}

fn prepare_slice(slice: &mut QuerySlice, sorts: &[SortPredicate], cache: &CursorCache) {
    let descending = sorts.first().is_some_and(|s| s.direction.is_descending());
    if descending && !slice.is_reversed() {
        slice.reverse();
    }
    if let Some(token) = cache.get(slice.cursor_key()) {
        slice.set_cursor(token.to_vec());
    }
}
