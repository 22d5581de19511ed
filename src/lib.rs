//! Quarry: the query execution core of a multi-tenant entity store.
//!
//! Quarry turns an already-parsed filter expression into a compressed tree
//! of set operations, evaluates that tree lazily against a sorted
//! secondary-index backend, and hands back ordered, deduplicated, resumable
//! pages of entity ids. It also houses the edge graph's asynchronous
//! delete/compaction pipeline, which shares the same ordered-scan
//! discipline.
//!
//! The crate is collaborator-driven: storage is reached only through the
//! traits in [`scan`] and [`graph`], with in-memory reference
//! implementations for tests and embedded use.
//!
//! ```
//! use std::sync::Arc;
//! use quarry::query::compiler::{Operand, Operator, PermissiveSchema, QueryRequest};
//! use quarry::query::QueryExecutor;
//! use quarry::scan::MemoryIndexBackend;
//! use quarry::{ApplicationScope, Config, EntityId, Value};
//!
//! # fn main() -> quarry::Result<()> {
//! let scope = ApplicationScope::new(uuid::Uuid::new_v4());
//! let backend = Arc::new(MemoryIndexBackend::new());
//! backend.insert(&scope, "age", Value::Long(30), EntityId::random());
//!
//! let executor = QueryExecutor::new(
//!     backend.clone(),
//!     backend.clone(),
//!     backend,
//!     Config::default(),
//! );
//! let page = executor.execute(
//!     &scope,
//!     QueryRequest::filtered(Operand::cmp("age", Operator::GreaterThan, Value::Long(21))),
//!     &PermissiveSchema,
//! )?;
//! assert_eq!(page.items.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod logging;
pub mod model;
pub mod query;
pub mod scan;

pub use config::Config;
pub use error::{Result, StoreError};
pub use logging::init_logging;
pub use model::{ApplicationScope, EntityId, SortOrder, SortPredicate, Value};
pub use query::{QueryExecutor, QueryRequest, ResultsPage};
