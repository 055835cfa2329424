//! Core types and traits for rowgraph.
//!
//! This crate provides the foundational abstractions shared by the session
//! layer and storage drivers:
//!
//! - `Value` for dynamically typed field values
//! - `FieldDef`, `IndexDef` and `RelationDef` metadata
//! - `Connection`, the synchronous storage boundary
//! - `SchemaProvider`, the source of table metadata
//! - the `Error` taxonomy shared by every crate

pub mod connection;
pub mod error;
pub mod field;
pub mod identifiers;
pub mod relationship;
pub mod row;
pub mod types;
pub mod validate;
pub mod value;

pub use connection::{Connection, SchemaProvider};
pub use error::{
    CancelledError, ConfigError, ConfigErrorKind, ConstraintError, ConstraintErrorKind, Error,
    FieldValidationError, RecordError, RecordErrorKind, ReferenceShapeError, RelationError,
    RelationErrorKind, Result, StorageError, StorageErrorKind, TransactionError,
    TransactionErrorKind, UnknownMemberError, ValidationError, ValidationErrorKind,
};
pub use field::{FieldDef, IndexDef, IndexKind, ReferentialAction};
pub use identifiers::{placeholder, quote_ident, unquote_ident};
pub use relationship::{Cardinality, Direction, RelationDef};
pub use row::{ColumnInfo, Row};
pub use types::FieldType;
pub use validate::{check_length, check_type};
pub use value::Value;
