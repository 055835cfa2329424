//! In-memory storage driver for rowgraph.
//!
//! `rowgraph-memory` implements [`rowgraph_core::Connection`] on top of plain
//! per-table row vectors. It understands exactly the statements the session
//! emits, enforces NOT NULL, unique indexes and foreign keys taken from a
//! [`rowgraph_core::SchemaProvider`], and keeps a log of every executed
//! statement so tests can assert on ordering.
//!
//! # Example
//!
//! ```ignore
//! let schema = Schema::from_json_str(include_str!("schema.json"))?;
//! let mut session = Session::new(MemoryConnection::new(&schema)?, &schema)?;
//!
//! let tag = session.create_record("tag", [("name", "rust")])?;
//! session.save(tag)?;
//! assert_eq!(session.connection().row_count("tag")?, 1);
//! ```
//!
//! # Failure injection
//!
//! [`MemoryConnection::fail_on`] makes statements containing a pattern fail
//! with [`rowgraph_core::StorageErrorKind::Injected`], which is how commit
//! rollback is exercised.

mod connection;
pub mod statement;
mod store;

pub use connection::{ExecutedStatement, MemoryConfig, MemoryConnection};
