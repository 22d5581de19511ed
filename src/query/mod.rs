//! Query compilation and evaluation: predicate tree to id stream.

pub mod compiler;
pub mod cursor;
pub mod exec;
pub mod node;
pub mod slice;

pub use compiler::{compile, Identifier, Operand, Operator, QueryPlan, QueryRequest, Schema};
pub use cursor::CursorCache;
pub use exec::{QueryExecutor, ResultIterator, ResultsPage};
pub use node::QueryNode;
pub use slice::{QuerySlice, RangeBound};
