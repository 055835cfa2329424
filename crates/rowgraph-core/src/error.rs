//! Error types for rowgraph operations.

use std::fmt;

/// The primary error type for all rowgraph operations.
#[derive(Debug)]
pub enum Error {
    /// Malformed table, field, index or relation metadata
    Config(ConfigError),
    /// Access to a field or relation alias the table does not declare
    UnknownMember(UnknownMemberError),
    /// Reference value does not match the relation cardinality
    ReferenceShape(ReferenceShapeError),
    /// Relation misuse (reading a collection as a record, wrong table, ...)
    Relation(RelationError),
    /// Delete blocked by dependents, or save requested for a deleted record
    Constraint(ConstraintError),
    /// Field-level validation failed before commit
    Validation(ValidationError),
    /// The storage boundary failed to execute a statement
    Storage(StorageError),
    /// Transaction discipline errors
    Transaction(TransactionError),
    /// Record bookkeeping errors
    Record(RecordError),
    /// A pre-hook vetoed the operation
    Cancelled(CancelledError),
}

#[derive(Debug)]
pub struct ConfigError {
    pub kind: ConfigErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    /// A required definition key is absent
    MissingKey,
    /// Table without primary key fields
    MissingIdentifier,
    /// Reference to a table that is not defined
    UnknownTable,
    /// Reference to a field that is not defined
    UnknownField,
    /// Two relations expose the same alias on one table
    DuplicateAlias,
    /// A definition value could not be interpreted
    InvalidValue,
    /// The schema document could not be parsed
    Parse,
}

#[derive(Debug, Clone)]
pub struct UnknownMemberError {
    pub table: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct ReferenceShapeError {
    pub table: String,
    pub alias: String,
    /// What the relation expects ("record" or "collection")
    pub expected: &'static str,
}

#[derive(Debug, Clone)]
pub struct RelationError {
    pub kind: RelationErrorKind,
    pub relation: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationErrorKind {
    /// A scalar side was read or written as a collection
    NotACollection,
    /// A collection side was read or written as a single record
    NotARecord,
    /// The record belongs to a different table than the relation side
    WrongTable,
    /// The record handle is not known to the session
    UnknownRecord,
}

#[derive(Debug, Clone)]
pub struct ConstraintError {
    pub kind: ConstraintErrorKind,
    pub table: String,
    pub relation: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintErrorKind {
    /// Delete blocked by RESTRICT / NO ACTION dependents
    Restrict,
    /// Save requested for a record already scheduled for delete
    ScheduledForDelete,
}

/// Validation error for field-level and record-level validation.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Table of the record that failed validation
    pub table: String,
    /// Internal id of the record that failed validation
    pub internal_id: String,
    pub errors: Vec<FieldValidationError>,
}

/// A single validation error for a field.
#[derive(Debug, Clone)]
pub struct FieldValidationError {
    pub field: String,
    pub kind: ValidationErrorKind,
    pub message: String,
}

/// The type of validation rule that was violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// Non-nullable field is null
    Required,
    /// Value does not fit the field type
    Type,
    /// Value does not fit the field length
    Length,
    /// Unique index already holds the value
    Unique,
    /// Custom validation failed
    Custom,
}

#[derive(Debug)]
pub struct StorageError {
    pub kind: StorageErrorKind,
    pub statement: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// Backend unreachable or lost
    Connection,
    /// Constraint enforced by the backend (unique, foreign key)
    Constraint,
    /// Statement could not be executed
    Statement,
    /// Failure injected by a test driver
    Injected,
}

#[derive(Debug)]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    /// Nested transaction not supported
    NestedNotSupported,
    /// Commit or rollback without an open transaction
    NotActive,
    /// Records were still dirty after the last deferred update round
    Unsettled,
}

#[derive(Debug, Clone)]
pub struct RecordError {
    pub kind: RecordErrorKind,
    pub table: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordErrorKind {
    /// Identifier value count differs from the table identifier field count
    IdentifierMismatch,
    /// The record handle is not known to the session
    NotFound,
    /// A different record is already registered under the same internal id
    AlreadyTracked,
    /// A lookup expected at most one row but matched several
    Ambiguous,
}

#[derive(Debug, Clone)]
pub struct CancelledError {
    /// Name of the vetoed extension point
    pub operation: &'static str,
    pub table: String,
}

impl ConfigError {
    pub fn new(kind: ConfigErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }
}

impl ValidationError {
    /// Create a new empty validation error container for one record.
    pub fn new(table: impl Into<String>, internal_id: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            internal_id: internal_id.into(),
            errors: Vec::new(),
        }
    }

    /// Check if there are any validation errors.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Add a field validation error.
    pub fn add(
        &mut self,
        field: impl Into<String>,
        kind: ValidationErrorKind,
        message: impl Into<String>,
    ) {
        self.errors.push(FieldValidationError {
            field: field.into(),
            kind,
            message: message.into(),
        });
    }

    /// Add a required field error.
    pub fn add_required(&mut self, field: impl Into<String>) {
        self.add(field, ValidationErrorKind::Required, "is required");
    }

    /// Add a type mismatch error.
    pub fn add_type(&mut self, field: impl Into<String>, expected: impl fmt::Display) {
        self.add(
            field,
            ValidationErrorKind::Type,
            format!("must be a valid {expected}"),
        );
    }

    /// Add a length error.
    pub fn add_length(&mut self, field: impl Into<String>, max: impl fmt::Display) {
        self.add(
            field,
            ValidationErrorKind::Length,
            format!("must fit length {max}"),
        );
    }

    /// Add a unique constraint error for every field of the index.
    pub fn add_unique(&mut self, index: &str, fields: &[String]) {
        for field in fields {
            self.add(
                field.clone(),
                ValidationErrorKind::Unique,
                format!("violates unique index '{index}'"),
            );
        }
    }

    /// Add a custom validation error.
    pub fn add_custom(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.add(field, ValidationErrorKind::Custom, message);
    }

    /// Fields that failed, in report order, without duplicates.
    pub fn fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = Vec::new();
        for err in &self.errors {
            if !fields.contains(&err.field.as_str()) {
                fields.push(&err.field);
            }
        }
        fields
    }

    /// Whether a rule of `kind` failed for `field`.
    pub fn has(&self, field: &str, kind: ValidationErrorKind) -> bool {
        self.errors
            .iter()
            .any(|err| err.field == field && err.kind == kind)
    }

    /// Convert to Result, returning Ok(()) if no errors, Err(self) otherwise.
    pub fn into_result(self) -> std::result::Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl StorageError {
    pub fn new(kind: StorageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            statement: None,
            message: message.into(),
            source: None,
        }
    }

    #[must_use]
    pub fn with_statement(mut self, statement: impl Into<String>) -> Self {
        self.statement = Some(statement.into());
        self
    }
}

impl Error {
    pub fn unknown_member(table: impl Into<String>, name: impl Into<String>) -> Self {
        Error::UnknownMember(UnknownMemberError {
            table: table.into(),
            name: name.into(),
        })
    }

    pub fn record_not_found(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::record(RecordErrorKind::NotFound, table, message)
    }

    pub fn record(
        kind: RecordErrorKind,
        table: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::Record(RecordError {
            kind,
            table: table.into(),
            message: message.into(),
        })
    }

    pub fn relation(
        kind: RelationErrorKind,
        relation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::Relation(RelationError {
            kind,
            relation: relation.into(),
            message: message.into(),
        })
    }

    pub fn reference_shape(
        table: impl Into<String>,
        alias: impl Into<String>,
        expected: &'static str,
    ) -> Self {
        Error::ReferenceShape(ReferenceShapeError {
            table: table.into(),
            alias: alias.into(),
            expected,
        })
    }

    /// Is this a delete blocked by RESTRICT / NO ACTION dependents?
    pub fn is_restrict_violation(&self) -> bool {
        matches!(
            self,
            Error::Constraint(ConstraintError {
                kind: ConstraintErrorKind::Restrict,
                ..
            })
        )
    }

    /// Was this raised by the storage boundary?
    pub fn is_storage_error(&self) -> bool {
        matches!(self, Error::Storage(_))
    }

    /// Get the statement that caused this error, if available
    pub fn statement(&self) -> Option<&str> {
        match self {
            Error::Storage(e) => e.statement.as_deref(),
            _ => None,
        }
    }

    /// Borrow the validation report, if this is a validation failure.
    pub fn validation(&self) -> Option<&ValidationError> {
        match self {
            Error::Validation(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::UnknownMember(e) => write!(f, "Unknown member: {}", e),
            Error::ReferenceShape(e) => write!(f, "Reference shape error: {}", e),
            Error::Relation(e) => write!(f, "Relation error: {}", e),
            Error::Constraint(e) => write!(f, "Constraint violation: {}", e.message),
            Error::Validation(e) => write!(f, "Validation error: {}", e),
            Error::Storage(e) => write!(f, "Storage error: {}", e),
            Error::Transaction(e) => write!(f, "Transaction error: {}", e.message),
            Error::Record(e) => write!(f, "Record error: {}", e.message),
            Error::Cancelled(e) => write!(f, "Operation cancelled: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Storage(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Validation(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for UnknownMemberError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' is neither a field nor a relation of table '{}'",
            self.name, self.table
        )
    }
}

impl fmt::Display for ReferenceShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "relation '{}' on table '{}' expects a {}",
            self.alias, self.table, self.expected
        )
    }
}

impl fmt::Display for RelationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.relation)
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(statement) = &self.statement {
            write!(f, "{} [{}]", self.message, statement)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl fmt::Display for CancelledError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on table '{}'", self.operation, self.table)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            write!(f, "validation passed")
        } else if self.errors.len() == 1 {
            let err = &self.errors[0];
            write!(
                f,
                "{}[{}] '{}' {}",
                self.table, self.internal_id, err.field, err.message
            )
        } else {
            writeln!(f, "{}[{}] validation errors:", self.table, self.internal_id)?;
            for err in &self.errors {
                writeln!(f, "  - {}: {}", err.field, err.message)?;
            }
            Ok(())
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<UnknownMemberError> for Error {
    fn from(err: UnknownMemberError) -> Self {
        Error::UnknownMember(err)
    }
}

impl From<ReferenceShapeError> for Error {
    fn from(err: ReferenceShapeError) -> Self {
        Error::ReferenceShape(err)
    }
}

impl From<RelationError> for Error {
    fn from(err: RelationError) -> Self {
        Error::Relation(err)
    }
}

impl From<ConstraintError> for Error {
    fn from(err: ConstraintError) -> Self {
        Error::Constraint(err)
    }
}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Error::Validation(err)
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        Error::Storage(err)
    }
}

impl From<TransactionError> for Error {
    fn from(err: TransactionError) -> Self {
        Error::Transaction(err)
    }
}

impl From<RecordError> for Error {
    fn from(err: RecordError) -> Self {
        Error::Record(err)
    }
}

impl From<CancelledError> for Error {
    fn from(err: CancelledError) -> Self {
        Error::Cancelled(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(ConfigError {
            kind: ConfigErrorKind::Parse,
            message: format!("invalid schema document: {err}"),
            source: Some(Box::new(err)),
        })
    }
}

/// Result type alias for rowgraph operations.
pub type Result<T> = std::result::Result<T, Error>;
