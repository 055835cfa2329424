//! Field type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical field types understood by the ORM.
///
/// These are storage-agnostic; they drive value validation and the default
/// conversion of values read back from a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Boolean,
    Integer,
    Decimal,
    Double,
    String,
    Date,
    Time,
    Datetime,
    Timestamp,
    Blob,
    Enum,
}

impl FieldType {
    /// Name used in schema documents.
    pub const fn as_str(&self) -> &'static str {
        match self {
            FieldType::Boolean => "boolean",
            FieldType::Integer => "integer",
            FieldType::Decimal => "decimal",
            FieldType::Double => "double",
            FieldType::String => "string",
            FieldType::Date => "date",
            FieldType::Time => "time",
            FieldType::Datetime => "datetime",
            FieldType::Timestamp => "timestamp",
            FieldType::Blob => "blob",
            FieldType::Enum => "enum",
        }
    }

    /// Parse a field type name (case-insensitive).
    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "boolean" | "bool" => Some(FieldType::Boolean),
            "integer" | "int" => Some(FieldType::Integer),
            "decimal" | "numeric" => Some(FieldType::Decimal),
            "double" | "float" => Some(FieldType::Double),
            "string" | "text" => Some(FieldType::String),
            "date" => Some(FieldType::Date),
            "time" => Some(FieldType::Time),
            "datetime" => Some(FieldType::Datetime),
            "timestamp" => Some(FieldType::Timestamp),
            "blob" => Some(FieldType::Blob),
            "enum" => Some(FieldType::Enum),
            _ => None,
        }
    }

    /// Whether the type has a character-length limit.
    pub const fn is_textual(&self) -> bool {
        matches!(self, FieldType::String | FieldType::Blob | FieldType::Enum)
    }

    /// Whether values of this type are numeric.
    pub const fn is_numeric(&self) -> bool {
        matches!(
            self,
            FieldType::Integer | FieldType::Decimal | FieldType::Double | FieldType::Timestamp
        )
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_aliases() {
        assert_eq!(FieldType::from_str("INTEGER"), Some(FieldType::Integer));
        assert_eq!(FieldType::from_str("numeric"), Some(FieldType::Decimal));
        assert_eq!(FieldType::from_str("varchar"), None);
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let ty: FieldType = serde_json::from_str("\"datetime\"").unwrap();
        assert_eq!(ty, FieldType::Datetime);
        assert_eq!(serde_json::to_string(&FieldType::Blob).unwrap(), "\"blob\"");
    }
}
