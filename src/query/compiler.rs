//! Compiles a parsed predicate tree into the query node tree.
//!
//! The input is an already-parsed [`Operand`] expression (the
//! lexer/parser live in the service layer); the output is a [`QueryPlan`]
//! whose tree has same-field comparisons compressed into single slices,
//! OR boundaries isolated into independent slice nodes, and NOT lowered to
//! subtract/keep pairs.
//!
//! Compilation walks the expression with an explicit stack. Comparisons
//! merge into the slice node currently on top of the stack whenever the
//! surrounding context is an AND; OR and NOT open fresh contexts so their
//! operands never share slices.

use tracing::debug;

use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::model::{EntityId, SortPredicate, Value};
use crate::query::cursor::CursorCache;
use crate::query::node::{AllNode, OrderByNode, QueryNode, SliceNode};
use crate::scan::IndexColumn;

/// Comparison operators the predicate tree supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    LessThan,
    LessThanEqual,
    Equal,
    GreaterThan,
    GreaterThanEqual,
}

/// A parsed boolean filter expression.
#[derive(Debug, Clone)]
pub enum Operand {
    And(Box<Operand>, Box<Operand>),
    Or(Box<Operand>, Box<Operand>),
    Not(Box<Operand>),
    Cmp {
        property: String,
        op: Operator,
        value: Value,
    },
    /// Full-text containment; lowers to a prefix range on the field's
    /// keywords sub-field.
    Contains { property: String, token: String },
}

impl Operand {
    pub fn and(left: Operand, right: Operand) -> Operand {
        Operand::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: Operand, right: Operand) -> Operand {
        Operand::Or(Box::new(left), Box::new(right))
    }

    pub fn negate(operand: Operand) -> Operand {
        Operand::Not(Box::new(operand))
    }

    pub fn cmp(property: impl Into<String>, op: Operator, value: Value) -> Operand {
        Operand::Cmp {
            property: property.into(),
            op,
            value,
        }
    }

    pub fn contains(property: impl Into<String>, token: impl Into<String>) -> Operand {
        Operand::Contains {
            property: property.into(),
            token: token.into(),
        }
    }
}

/// Direct identifier lookup, bypassing the index scan entirely.
#[derive(Debug, Clone)]
pub enum Identifier {
    Uuid(uuid::Uuid),
    Email(String),
}

/// Schema knowledge the compiler consults before accepting a predicate.
/// The entity store's real schema lives outside this core; tests and
/// embedded callers use [`PermissiveSchema`].
pub trait Schema {
    fn is_indexed(&self, _property: &str) -> bool {
        true
    }

    fn is_fulltext_indexed(&self, _property: &str) -> bool {
        true
    }
}

/// Accepts every property as indexed.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissiveSchema;

impl Schema for PermissiveSchema {}

/// Default result count when the caller does not specify a limit.
pub const DEFAULT_LIMIT: usize = 10;

/// A query as handed to the core: parsed filter, sorts, optional direct
/// identifier, paging state.
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub operand: Option<Operand>,
    pub sorts: Vec<SortPredicate>,
    pub identifier: Option<Identifier>,
    pub limit: usize,
    pub cursor: Option<Vec<u8>>,
    /// Explicit id to start a full scan after; a restored convenience for
    /// id-ordered enumeration without a cursor.
    pub start_id: Option<EntityId>,
}

impl QueryRequest {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn filtered(operand: Operand) -> Self {
        Self {
            operand: Some(operand),
            ..Self::default()
        }
    }

    pub fn with_sort(mut self, sort: SortPredicate) -> Self {
        self.sorts.push(sort);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_cursor(mut self, cursor: Option<Vec<u8>>) -> Self {
        self.cursor = cursor;
        self
    }
}

/// Output of compilation: the tree plus everything evaluation needs.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub root: QueryNode,
    pub cursor: CursorCache,
    pub sorts: Vec<SortPredicate>,
    pub limit: usize,
    /// Page size for non-root nodes; the root always pages by `limit`.
    pub page_size_hint: usize,
    /// True when the root is a NOT: evaluation subtracts from a full
    /// unconstrained scan, which is expensive.
    pub full_scan_subtraction: bool,
}

/// Compiles `request` into a [`QueryPlan`].
pub fn compile(request: QueryRequest, config: &Config, schema: &dyn Schema) -> Result<QueryPlan> {
    let limit = if request.limit == 0 {
        DEFAULT_LIMIT
    } else {
        request.limit
    };

    let mut cursor = match &request.cursor {
        Some(bytes) => CursorCache::from_bytes(bytes)?,
        None => CursorCache::new(),
    };

    let mut builder = TreeBuilder::new(schema);

    let mut root = match &request.operand {
        Some(operand) => {
            builder.visit(operand)?;
            Some(builder.stack.pop_counted())
        }
        None => None,
    };

    let mut op_count = builder.stack.slice_count();

    // sorts wrap whatever tree the filter produced
    if !request.sorts.is_empty() {
        let order = builder.generate_sorts(&request.sorts, root.take())?;
        op_count += order.primary.slice_count();
        root = Some(QueryNode::OrderBy(order));
    }

    // no filter and no sorts: identifier lookup, or a plain id-ordered scan
    let root = match root {
        Some(node) => node,
        None => match &request.identifier {
            Some(Identifier::Email(email)) => QueryNode::Email(email.clone()),
            Some(Identifier::Uuid(uuid)) => QueryNode::Uuid(*uuid),
            None => {
                let all = AllNode::new(builder.next_context());
                if let Some(start) = request.start_id {
                    let token = IndexColumn::new(Value::Uuid(start.0), start).to_token();
                    cursor.set(all.slice().cursor_key(), token);
                }
                QueryNode::All(all)
            }
        },
    };

    let full_scan_subtraction = matches!(root, QueryNode::Not { .. });
    if full_scan_subtraction && !config.allow_unanchored_not {
        return Err(StoreError::BadQuery(
            "NOT at the query root requires subtracting from a full scan, \
             which this configuration disallows"
                .into(),
        ));
    }

    let page_size_hint = if op_count > 1 {
        config.base_page_size
    } else {
        limit.min(config.base_page_size)
    };

    debug!(
        slices = op_count,
        page_size_hint, full_scan_subtraction, "compiled query plan"
    );

    Ok(QueryPlan {
        root,
        cursor,
        sorts: request.sorts,
        limit,
        page_size_hint,
        full_scan_subtraction,
    })
}

/// Stack that counts leaf slices as nodes move through it, so the final
/// plan knows the total scan fan-out without another tree walk.
struct CountingStack {
    nodes: Vec<QueryNode>,
    popped_slices: usize,
}

impl CountingStack {
    fn new() -> Self {
        Self {
            nodes: Vec::new(),
            popped_slices: 0,
        }
    }

    fn push(&mut self, node: QueryNode) {
        self.nodes.push(node);
    }

    fn pop_counted(&mut self) -> QueryNode {
        let node = self.nodes.pop().expect("visitor left the stack empty");
        if let QueryNode::Slice(slice_node) = &node {
            self.popped_slices += slice_node.slice_count();
        }
        node
    }

    fn len(&self) -> usize {
        self.nodes.len()
    }

    fn top_slice_node(&mut self) -> Option<&mut SliceNode> {
        match self.nodes.last_mut() {
            Some(QueryNode::Slice(node)) => Some(node),
            _ => None,
        }
    }

    fn slice_count(&self) -> usize {
        self.popped_slices
            + self
                .nodes
                .iter()
                .map(|n| match n {
                    QueryNode::Slice(node) => node.slice_count(),
                    _ => 0,
                })
                .sum::<usize>()
    }
}

struct TreeBuilder<'a> {
    stack: CountingStack,
    context_count: usize,
    schema: &'a dyn Schema,
}

impl<'a> TreeBuilder<'a> {
    fn new(schema: &'a dyn Schema) -> Self {
        Self {
            stack: CountingStack::new(),
            context_count: 0,
            schema,
        }
    }

    fn next_context(&mut self) -> usize {
        let id = self.context_count;
        self.context_count += 1;
        id
    }

    fn visit(&mut self, operand: &Operand) -> Result<()> {
        match operand {
            Operand::And(left, right) => {
                self.visit(left)?;
                let depth_after_left = self.stack.len();
                self.visit(right)?;

                // both sides merged into the same slice node: the AND is
                // already expressed as compressed bounds
                if self.stack.len() == depth_after_left {
                    return Ok(());
                }

                let right = self.stack.pop_counted();
                let left = self.stack.pop_counted();
                self.stack.push(QueryNode::And {
                    left: Box::new(left),
                    right: Box::new(right),
                });
                Ok(())
            }
            Operand::Or(left, right) => {
                // each operand gets its own slice context so branches never
                // share cursor state
                self.open_slice_context(left);
                self.visit(left)?;
                self.open_slice_context(right);
                self.visit(right)?;

                let right = self.stack.pop_counted();
                let left = self.stack.pop_counted();
                self.stack.push(QueryNode::Or {
                    left: Box::new(left),
                    right: Box::new(right),
                });
                Ok(())
            }
            Operand::Not(child) => {
                self.open_slice_context(child);
                self.visit(child)?;
                let subtract = self.stack.pop_counted();
                let keep = QueryNode::All(AllNode::new(self.next_context()));
                self.stack.push(QueryNode::Not {
                    subtract: Box::new(subtract),
                    keep: Box::new(keep),
                });
                Ok(())
            }
            Operand::Cmp {
                property,
                op,
                value,
            } => self.visit_cmp(property, *op, value),
            Operand::Contains { property, token } => self.visit_contains(property, token),
        }
    }

    fn visit_cmp(&mut self, property: &str, op: Operator, value: &Value) -> Result<()> {
        self.check_indexed(property)?;
        let node = self.union_node();

        match op {
            Operator::LessThan => node.set_finish(property, Some(value.clone()), false),
            Operator::LessThanEqual => node.set_finish(property, Some(value.clone()), true),
            Operator::GreaterThan => node.set_start(property, Some(value.clone()), false),
            Operator::GreaterThanEqual => node.set_start(property, Some(value.clone()), true),
            Operator::Equal => match value {
                // a trailing wildcard on a text literal is a prefix match
                Value::Text(text) if text.ends_with('*') => {
                    let prefix = text.trim_end_matches('*');
                    node.set_start(property, Some(Value::Text(prefix.to_string())), true);
                    node.set_finish(property, Some(Value::text_prefix_end(prefix)), true);
                }
                other => {
                    node.set_start(property, Some(other.clone()), true);
                    node.set_finish(property, Some(other.clone()), true);
                }
            },
        }
        Ok(())
    }

    fn visit_contains(&mut self, property: &str, token: &str) -> Result<()> {
        if !self.schema.is_fulltext_indexed(property) {
            return Err(StoreError::BadQuery(format!(
                "property '{property}' is not full-text indexed"
            )));
        }

        let keywords_field = format!("{property}.keywords");

        // a second containment on the same field needs its own slice: one
        // slice cannot hold two token ranges
        let needs_fresh = matches!(
            self.stack.top_slice_node(),
            Some(node) if node.get_slice(&keywords_field).is_some()
        );
        if needs_fresh {
            let id = self.next_context();
            self.stack.push(QueryNode::Slice(SliceNode::new(id)));
        }

        let node = self.union_node();
        node.set_start(&keywords_field, Some(Value::Text(token.to_string())), true);
        node.set_finish(&keywords_field, Some(Value::text_prefix_end(token)), true);
        Ok(())
    }

    /// The slice node comparisons merge into: the top of the stack when it
    /// is a slice node (an enclosing AND context), otherwise a fresh one.
    fn union_node(&mut self) -> &mut SliceNode {
        if self.stack.top_slice_node().is_none() {
            let id = self.next_context();
            self.stack.push(QueryNode::Slice(SliceNode::new(id)));
        }
        self.stack.top_slice_node().expect("slice node just pushed")
    }

    /// Opens a fresh slice context when `child` would otherwise merge into
    /// the current one (comparisons, ANDs of comparisons, containment).
    fn open_slice_context(&mut self, child: &Operand) {
        if matches!(
            child,
            Operand::Cmp { .. } | Operand::And(_, _) | Operand::Contains { .. }
        ) {
            let id = self.next_context();
            self.stack.push(QueryNode::Slice(SliceNode::new(id)));
        }
    }

    /// Builds the order-by wrapper: the first sort property becomes the
    /// governing slice (unbounded, naturally ordered by the index), the
    /// rest become secondary in-memory sorts.
    fn generate_sorts(
        &mut self,
        sorts: &[SortPredicate],
        filter: Option<QueryNode>,
    ) -> Result<OrderByNode> {
        let first = &sorts[0];
        self.check_indexed(&first.property)?;
        for sort in &sorts[1..] {
            self.check_indexed(&sort.property)?;
        }

        let mut primary = SliceNode::new(self.next_context());
        // unbounded on both sides: the bound values are absent, the slice
        // exists purely to drive the ordered scan
        primary.set_start(&first.property, None, true);
        primary.set_finish(&first.property, None, true);

        Ok(OrderByNode {
            primary,
            secondary: sorts[1..].to_vec(),
            filter: filter.map(Box::new),
        })
    }

    fn check_indexed(&self, property: &str) -> Result<()> {
        if property.is_empty() {
            return Err(StoreError::BadQuery("empty property name".into()));
        }
        if !self.schema.is_indexed(property) {
            return Err(StoreError::BadQuery(format!(
                "property '{property}' is not indexed"
            )));
        }
        Ok(())
    }
}
