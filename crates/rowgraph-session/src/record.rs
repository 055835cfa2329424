//! Record state: field values, dirty tracking and identity.

use std::collections::HashMap;
use std::fmt;

use rowgraph_core::Value;
use serde::{Deserialize, Serialize};

/// Prefix of the internal id of records that are not persisted yet.
pub const NEW_RECORD_ID_MARK: &str = "_";

/// Separator between the values of a composite identifier.
pub const COMPOSITE_ID_SEPARATOR: &str = "|";

/// Marker key written by `to_array` for persisted records.
pub const FROM_ARRAY_EXISTS_KEY: &str = "_exists_";

/// Stable handle of a record inside a session.
///
/// Handles are assigned from a per-session counter and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Oid(pub u64);

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Oid {
    /// Internal id used while the record has no persisted identifier.
    pub fn new_record_id(self) -> String {
        format!("{NEW_RECORD_ID_MARK}{}", self.0)
    }

    /// Parse an internal id of the form `_<oid>`.
    pub fn from_new_record_id(internal_id: &str) -> Option<Self> {
        internal_id
            .strip_prefix(NEW_RECORD_ID_MARK)
            .and_then(|rest| rest.parse().ok())
            .map(Oid)
    }
}

/// Join identifier values into the identifier string.
///
/// Returns `None` if any component is NULL.
pub fn identifier_string(values: &[Value]) -> Option<String> {
    let parts = values
        .iter()
        .map(Value::identifier_string)
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join(COMPOSITE_ID_SEPARATOR))
}

/// One row object.
#[derive(Debug, Clone)]
pub struct Record {
    oid: Oid,
    table: String,
    data: HashMap<String, Value>,
    /// field -> value last known as persisted
    modified: HashMap<String, Value>,
    mapped: HashMap<String, Value>,
    exists: bool,
    /// identifier string last known as persisted
    persisted_id: Option<String>,
}

impl Record {
    pub(crate) fn new(oid: Oid, table: impl Into<String>, data: HashMap<String, Value>) -> Self {
        Self {
            oid,
            table: table.into(),
            data,
            modified: HashMap::new(),
            mapped: HashMap::new(),
            exists: false,
            persisted_id: None,
        }
    }

    pub fn oid(&self) -> Oid {
        self.oid
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Whether the record is persisted.
    pub fn exists(&self) -> bool {
        self.exists
    }

    /// Key of the record in its repository and in reference maps.
    pub fn internal_id(&self) -> String {
        match &self.persisted_id {
            Some(id) if self.exists => id.clone(),
            _ => self.oid.new_record_id(),
        }
    }

    /// Identifier string last known as persisted.
    pub fn persisted_id(&self) -> Option<&str> {
        self.persisted_id.as_deref().filter(|_| self.exists)
    }

    /// Current value of a field. `None` for names that are not fields.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    pub fn data(&self) -> &HashMap<String, Value> {
        &self.data
    }

    pub fn is_modified(&self) -> bool {
        !self.modified.is_empty()
    }

    pub fn is_field_modified(&self, field: &str) -> bool {
        self.modified.contains_key(field)
    }

    /// Modified fields with the value last known as persisted.
    pub fn modified_fields(&self) -> &HashMap<String, Value> {
        &self.modified
    }

    /// The value of `field` before any unflushed change.
    pub fn original_value(&self, field: &str) -> Option<&Value> {
        self.modified.get(field).or_else(|| self.data.get(field))
    }

    pub fn map_value(&mut self, name: impl Into<String>, value: Value) {
        self.mapped.insert(name.into(), value);
    }

    pub fn has_mapped_value(&self, name: &str) -> bool {
        self.mapped.contains_key(name)
    }

    pub fn mapped_value(&self, name: &str) -> Option<&Value> {
        self.mapped.get(name)
    }

    pub fn mapped_values(&self) -> &HashMap<String, Value> {
        &self.mapped
    }

    /// Store a value and maintain the dirty set.
    ///
    /// A field enters the dirty set with its previous value and leaves it
    /// again once it is set back to that value. Returns whether the stored
    /// value changed.
    pub(crate) fn write(&mut self, field: &str, value: Value) -> bool {
        let old = self.data.get(field).cloned().unwrap_or_default();
        if old.loosely_equals(&value) {
            return false;
        }
        match self.modified.get(field) {
            Some(original) if original.loosely_equals(&value) => {
                self.modified.remove(field);
            }
            Some(_) => {}
            None => {
                self.modified.insert(field.to_string(), old);
            }
        }
        self.data.insert(field.to_string(), value);
        true
    }

    /// Store a value without touching the dirty set.
    pub(crate) fn write_clean(&mut self, field: &str, value: Value) {
        self.data.insert(field.to_string(), value);
    }

    pub(crate) fn clear_modified(&mut self) {
        self.modified.clear();
    }

    pub(crate) fn mark_persisted(&mut self, identifier: String) {
        self.exists = true;
        self.persisted_id = Some(identifier);
    }

    pub(crate) fn mark_removed(&mut self) {
        self.exists = false;
        self.persisted_id = None;
    }

    pub(crate) fn replace_data(&mut self, data: HashMap<String, Value>) {
        self.data = data;
        self.modified.clear();
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} id: {}", self.table, self.internal_id())
    }
}
