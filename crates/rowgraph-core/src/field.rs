//! Field and index definitions.

use crate::types::FieldType;
use crate::value::Value;

/// Referential action for foreign key constraints (ON DELETE / ON UPDATE).
///
/// These define what happens to owning records when the referenced record is
/// deleted or its identifier changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReferentialAction {
    /// No action - the delete is refused while owning records exist.
    #[default]
    NoAction,
    /// Restrict - same as NO ACTION.
    Restrict,
    /// Cascade - owning records are deleted as well.
    Cascade,
    /// Set null - the foreign key of owning records is set to NULL.
    SetNull,
    /// Set default - the foreign key of owning records is reset to its default.
    SetDefault,
}

impl ReferentialAction {
    /// Get the SQL representation of this action.
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
        }
    }

    /// Parse a referential action from a string (case-insensitive).
    ///
    /// Returns `None` if the string is not a recognized action.
    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "NO ACTION" | "NOACTION" | "NO_ACTION" => Some(ReferentialAction::NoAction),
            "RESTRICT" => Some(ReferentialAction::Restrict),
            "CASCADE" => Some(ReferentialAction::Cascade),
            "SET NULL" | "SETNULL" | "SET_NULL" => Some(ReferentialAction::SetNull),
            "SET DEFAULT" | "SETDEFAULT" | "SET_DEFAULT" => Some(ReferentialAction::SetDefault),
            _ => None,
        }
    }

    /// Whether owning records block the delete.
    pub const fn blocks_delete(&self) -> bool {
        matches!(self, ReferentialAction::NoAction | ReferentialAction::Restrict)
    }
}

/// Metadata about one table field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    /// Maximum length (characters for strings, digits for numbers)
    pub length: Option<u32>,
    /// Digits after the decimal point for decimals
    pub precision: Option<u32>,
    pub unsigned: bool,
    pub nullable: bool,
    pub primary: bool,
    pub auto_increment: bool,
    pub default: Option<Value>,
    /// Foreign key reference (`table.field`)
    pub foreign: Option<String>,
    /// Allowed values for enum fields
    pub values: Vec<String>,
}

impl FieldDef {
    /// Create a new non-nullable field of the given type.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            length: None,
            precision: None,
            unsigned: false,
            nullable: false,
            primary: false,
            auto_increment: false,
            default: None,
            foreign: None,
            values: Vec::new(),
        }
    }

    /// Mark as part of the primary key.
    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    /// Mark as auto-incrementing (implies unsigned integer usage).
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn unsigned(mut self) -> Self {
        self.unsigned = true;
        self
    }

    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn precision(mut self, precision: u32) -> Self {
        self.precision = Some(precision);
        self
    }

    /// Set the default value used when a record is created without it.
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Set a foreign key reference in `table.field` form.
    pub fn foreign(mut self, reference: impl Into<String>) -> Self {
        self.foreign = Some(reference.into());
        self
    }

    /// Set the allowed values of an enum field.
    pub fn values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.values = values.into_iter().map(Into::into).collect();
        self
    }

    /// The value a fresh record carries for this field.
    pub fn initial_value(&self) -> Value {
        self.default.clone().unwrap_or(Value::Null)
    }

    /// Whether a value must be supplied before the record can be persisted.
    ///
    /// Auto-increment identifiers and fields with a default are filled in
    /// by storage, so they are never required.
    pub fn is_required(&self) -> bool {
        !self.nullable && !self.auto_increment && self.default.is_none()
    }

    /// Split the foreign reference into `(table, field)`.
    pub fn foreign_parts(&self) -> Option<(&str, &str)> {
        self.foreign.as_deref().and_then(|r| r.split_once('.'))
    }
}

/// Kind of table index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexKind {
    Unique,
    #[default]
    Index,
}

impl IndexKind {
    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "unique" => Some(IndexKind::Unique),
            "index" => Some(IndexKind::Index),
            _ => None,
        }
    }
}

/// Metadata about one table index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    pub name: String,
    pub kind: IndexKind,
    pub fields: Vec<String>,
    /// NULL values take part in uniqueness checks as regular values
    pub null_constrained: bool,
}

impl IndexDef {
    pub fn unique<I, S>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            kind: IndexKind::Unique,
            fields: fields.into_iter().map(Into::into).collect(),
            null_constrained: false,
        }
    }

    pub fn index<I, S>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: IndexKind::Index,
            ..Self::unique(name, fields)
        }
    }

    pub fn null_constrained(mut self) -> Self {
        self.null_constrained = true;
        self
    }

    pub fn is_unique(&self) -> bool {
        self.kind == IndexKind::Unique
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn referential_action_parsing() {
        assert_eq!(
            ReferentialAction::from_str("set null"),
            Some(ReferentialAction::SetNull)
        );
        assert_eq!(
            ReferentialAction::from_str("SET_NULL"),
            Some(ReferentialAction::SetNull)
        );
        assert_eq!(
            ReferentialAction::from_str("no action"),
            Some(ReferentialAction::NoAction)
        );
        assert_eq!(ReferentialAction::from_str("explode"), None);
        assert!(ReferentialAction::Restrict.blocks_delete());
        assert!(!ReferentialAction::Cascade.blocks_delete());
    }

    #[test]
    fn required_fields() {
        let id = FieldDef::new("id", FieldType::Integer)
            .primary()
            .auto_increment();
        let name = FieldDef::new("name", FieldType::String).length(64);
        let flag = FieldDef::new("is_published", FieldType::Integer).default_value(0);
        let note = FieldDef::new("note", FieldType::String).nullable();

        assert!(!id.is_required());
        assert!(name.is_required());
        assert!(!flag.is_required());
        assert!(!note.is_required());
        assert_eq!(flag.initial_value(), Value::Int(0));
        assert_eq!(note.initial_value(), Value::Null);
    }

    #[test]
    fn foreign_parts_split_on_dot() {
        let fk = FieldDef::new("user_id", FieldType::Integer).foreign("user.id");
        assert_eq!(fk.foreign_parts(), Some(("user", "id")));
    }

    #[test]
    fn index_builders() {
        let idx = IndexDef::unique("UNIQUE", ["firstname", "lastname"]).null_constrained();
        assert!(idx.is_unique());
        assert!(idx.null_constrained);
        assert_eq!(idx.fields, vec!["firstname", "lastname"]);
        assert!(!IndexDef::index("idx_title", ["title"]).is_unique());
    }
}
