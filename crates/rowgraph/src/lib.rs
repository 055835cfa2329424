//! rowgraph - a record graph ORM core.
//!
//! rowgraph keeps one in-memory record per database row, keeps both ends of
//! every relation consistent while foreign keys and references change, and
//! writes a dirty record graph back in a single ordered transaction:
//!
//! - Identity map per table, keyed by internal id
//! - Relation tracking with reference maps and pending collection members
//! - Save and delete scheduling with cascade, set null and restrict handling
//! - Validation before anything is written, rollback on failure
//! - A JSON schema format and an in-memory driver for tests and tooling
//!
//! # Quick Start
//!
//! ```ignore
//! use rowgraph::prelude::*;
//!
//! let schema = Schema::from_json_str(include_str!("schema.json"))?;
//! let mut session = Session::new(MemoryConnection::new(&schema)?, &schema)?;
//!
//! let user = session.create_record("user", [("username", "JohnD"), ("password", "secret")])?;
//! let author = session.create_record(
//!     "author",
//!     [("firstname", "John"), ("lastname", "Doe"), ("email", "john@example.com")],
//! )?;
//! session.link(user, "Author", Some(author))?;
//!
//! // inserts user first, then author with user_id filled in
//! let flushed = session.save(user)?;
//! assert_eq!(flushed.inserted, 2);
//!
//! let article = session.create_record(
//!     "article",
//!     [("title", "Hello"), ("teaser", "Hi"), ("text", "Hello, world")],
//! )?;
//! session.link(article, "Author", Some(author))?;
//! session.save(article)?;
//!
//! // articles RESTRICT author deletes
//! assert!(session.delete(author).unwrap_err().is_restrict_violation());
//! ```
//!
//! # Crates
//!
//! - `rowgraph-core`: values, rows, definitions, errors and the `Connection` trait
//! - `rowgraph-schema`: `Schema`, its builder and the JSON document format
//! - `rowgraph-session`: `Session`, records, relations and the unit of work
//! - `rowgraph-memory`: `MemoryConnection`

pub use rowgraph_core::{
    Cardinality, ColumnInfo, Connection, Direction, Error, FieldDef, FieldType, IndexDef,
    IndexKind, ReferentialAction, RelationDef, Result, Row, SchemaProvider, Value,
};
pub use rowgraph_core::{
    ConfigError, ConfigErrorKind, ConstraintError, ConstraintErrorKind, RecordError,
    RecordErrorKind, RelationError, RelationErrorKind, StorageError, StorageErrorKind,
    TransactionError, TransactionErrorKind, ValidationError, ValidationErrorKind,
};

pub use rowgraph_schema::{Schema, SchemaBuilder, TableSchema};

pub use rowgraph_session::{
    Assign, ChangeSet, FlushResult, HookOutcome, Member, Oid, Record, RecordContext, RecordEvent,
    RecordValidator, Reference, ReferenceMap, Relation, Repository, Session, SessionConfig,
    SessionHooks, Table, TimestampFields, Timestampable, ValidationContainer, ValidationTarget,
};

pub use rowgraph_memory::{MemoryConfig, MemoryConnection};

/// Open a session over a fresh in-memory store for `schema`.
pub fn memory_session(schema: &Schema) -> Result<Session<MemoryConnection>> {
    memory_session_with(schema, SessionConfig::default())
}

/// Like [`memory_session`] with an explicit session configuration.
pub fn memory_session_with(
    schema: &Schema,
    config: SessionConfig,
) -> Result<Session<MemoryConnection>> {
    Session::with_config(MemoryConnection::new(schema)?, schema, config)
}

/// Load a schema document from JSON text.
pub fn load_schema(json: &str) -> Result<Schema> {
    Schema::from_json_str(json)
}

/// Export every tracked record of `table` as a JSON array, oldest first.
pub fn export_table<C: Connection>(
    session: &mut Session<C>,
    table: &str,
    deep: bool,
) -> Result<serde_json::Value> {
    let mut oids: Vec<Oid> = session
        .table(table)?
        .repository()
        .iter()
        .map(|(_, oid)| oid)
        .collect();
    oids.sort_unstable();
    let mut out = Vec::with_capacity(oids.len());
    for oid in oids {
        out.push(session.to_array(oid, deep, false)?);
    }
    Ok(serde_json::Value::Array(out))
}

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        Assign, Connection, Error, FlushResult, HookOutcome, Member, MemoryConnection, Oid,
        ReferentialAction, Result, Schema, Session, SessionConfig, TimestampFields,
        Timestampable, Value, memory_session,
    };
}
