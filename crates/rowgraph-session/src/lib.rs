//! Session and unit of work for rowgraph.
//!
//! `rowgraph-session` is the **record graph layer**. It keeps one in-memory
//! record per logical row, keeps both ends of every relation consistent while
//! foreign keys and references change, and turns a dirty record graph into an
//! ordered set of statements executed in one transaction.
//!
//! # Role In The Architecture
//!
//! - **Identity map**: every table owns a [`Repository`] keyed by internal id.
//! - **Relations**: every relation owns a [`ReferenceMap`]; the algorithms that
//!   need records run against the session's record arena.
//! - **Unit of work**: [`ChangeSet`] scheduling and the flush in `commit`.
//!
//! Records are addressed by [`Oid`] handles. The session owns every record,
//! table and relation, so there is no ambient global lookup.
//!
//! # Example
//!
//! ```ignore
//! let mut session = Session::new(connection, &schema)?;
//!
//! let user = session.create_record("user", [("username", "JohnD"), ("password", "secret")])?;
//! let author = session.create_record("author", [("firstname", "John"), ("lastname", "Doe")])?;
//! session.link(user, "Author", Some(author))?;
//!
//! session.save(user)?;
//! assert_eq!(session.field(author, "user_id")?, session.field(user, "id")?);
//! ```

pub mod behavior;
pub mod change_set;
pub mod events;
pub mod record;
pub mod reference_map;
pub mod relation;
pub mod repository;
pub mod table;
pub mod validation;

mod array;
mod flush;
mod query;

#[cfg(test)]
mod testing;

pub use behavior::{TimestampFields, Timestampable};
pub use change_set::{ChangeSet, PendingCounts};
pub use events::{FieldChange, HookOutcome, RecordContext, RecordEvent, SessionHooks};
pub use flush::FlushResult;
pub use record::{COMPOSITE_ID_SEPARATOR, FROM_ARRAY_EXISTS_KEY, NEW_RECORD_ID_MARK, Oid, Record};
pub use reference_map::{Reference, ReferenceMap};
pub use relation::Relation;
pub use repository::Repository;
pub use table::{RelationId, Table};
pub use validation::{
    FieldValidator, RecordValidator, UniqueConstraintValidator, ValidationContainer,
    ValidationTarget,
};

use rowgraph_core::{
    ConfigError, ConfigErrorKind, Connection, Direction, Error, RecordErrorKind, Result,
    SchemaProvider, Value,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

// ============================================================================
// Member Access
// ============================================================================

/// Result of reading a field or relation alias.
#[derive(Debug, Clone, PartialEq)]
pub enum Member {
    /// Field value
    Field(Value),
    /// Single related record (`None` for no reference)
    One(Option<Oid>),
    /// Related records of a one-to-many side
    Many(Vec<Oid>),
    /// The related records are not loaded into the session yet
    NotReady,
}

/// Value written to a field or relation alias.
#[derive(Debug, Clone, PartialEq)]
pub enum Assign {
    Value(Value),
    Record(Option<Oid>),
    Collection(Vec<Oid>),
}

impl From<Value> for Assign {
    fn from(value: Value) -> Self {
        Assign::Value(value)
    }
}

/// Outcome of a single field write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FieldWrite {
    Unchanged,
    Changed,
    Vetoed,
}

// ============================================================================
// Session Configuration
// ============================================================================

/// Configuration for Session behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Run the validation container before writing anything.
    pub validate_on_commit: bool,
    /// Include unique index checks (queries the connection).
    pub validate_uniqueness: bool,
    /// Load owning rows from storage before computing a delete graph.
    pub load_dependents_on_delete: bool,
    /// Drop deleted records from their repository after commit. When
    /// disabled they are re-registered as new records instead.
    pub remove_deleted_from_repository: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            validate_on_commit: true,
            validate_uniqueness: true,
            load_dependents_on_delete: false,
            remove_deleted_from_repository: true,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_validate_on_commit(mut self, value: bool) -> Self {
        self.validate_on_commit = value;
        self
    }

    #[must_use]
    pub fn with_validate_uniqueness(mut self, value: bool) -> Self {
        self.validate_uniqueness = value;
        self
    }

    #[must_use]
    pub fn with_load_dependents_on_delete(mut self, value: bool) -> Self {
        self.load_dependents_on_delete = value;
        self
    }

    #[must_use]
    pub fn with_remove_deleted_from_repository(mut self, value: bool) -> Self {
        self.remove_deleted_from_repository = value;
        self
    }
}

/// Snapshot of session bookkeeping, for diagnostics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DebugInfo {
    /// `(table, repository size)` in declaration order
    pub repositories: Vec<(String, usize)>,
    pub records: usize,
    pub pending_inserts: usize,
    pub pending_updates: usize,
    pub pending_deletes: usize,
}

// ============================================================================
// Session
// ============================================================================

/// The central unit-of-work manager.
///
/// Owns the connection, every table with its repository, every relation with
/// its reference map, and the records themselves.
pub struct Session<C: Connection> {
    connection: C,
    config: SessionConfig,
    tables: Vec<Table>,
    table_index: HashMap<String, usize>,
    relations: Vec<Relation>,
    relation_index: HashMap<String, RelationId>,
    records: HashMap<Oid, Record>,
    next_oid: u64,
    pending: ChangeSet,
    hooks: SessionHooks,
    validator: ValidationContainer,
    /// `(relation, referenced record)` pairs whose identifier change is being propagated
    identifier_guard: HashSet<(RelationId, Oid)>,
    /// Records whose foreign keys were rewritten while a commit is running
    flushing: Option<HashSet<Oid>>,
}

impl<C: Connection> std::fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("tables", &self.tables.len())
            .field("relations", &self.relations.len())
            .field("records", &self.records.len())
            .field("pending", &self.pending.counts())
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

impl<C: Connection> Session<C> {
    /// Create a session over `connection` with the tables of `schema`.
    pub fn new(connection: C, schema: &dyn SchemaProvider) -> Result<Self> {
        Self::with_config(connection, schema, SessionConfig::default())
    }

    /// Create a session with custom configuration.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn with_config(
        connection: C,
        schema: &dyn SchemaProvider,
        config: SessionConfig,
    ) -> Result<Self> {
        let table_names = schema.table_names();
        let mut tables = Vec::with_capacity(table_names.len());
        let mut table_index = HashMap::new();
        for name in &table_names {
            table_index.insert(name.clone(), tables.len());
            tables.push(Table::load(schema, name)?);
        }

        let mut relations = Vec::new();
        let mut relation_index = HashMap::new();
        for name in &table_names {
            for def in schema.relations(name)? {
                if relation_index.contains_key(&def.name) {
                    continue;
                }
                let id = relations.len();
                let owning = lookup_table(&table_index, &def.owning_table)?;
                tables[owning].attach_relation(id, &def)?;
                if def.ref_table != def.owning_table {
                    let referenced = lookup_table(&table_index, &def.ref_table)?;
                    tables[referenced].attach_relation(id, &def)?;
                }
                relation_index.insert(def.name.clone(), id);
                relations.push(Relation::new(def));
            }
        }

        tracing::info!(
            tables = tables.len(),
            relations = relations.len(),
            "session created"
        );

        Ok(Self {
            connection,
            config,
            tables,
            table_index,
            relations,
            relation_index,
            records: HashMap::new(),
            next_oid: 1,
            pending: ChangeSet::default(),
            hooks: SessionHooks::default(),
            validator: ValidationContainer::with_defaults(),
            identifier_guard: HashSet::new(),
            flushing: None,
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.connection
    }

    /// Consume the session and return its connection.
    pub fn into_connection(self) -> C {
        self.connection
    }

    pub fn hooks_mut(&mut self) -> &mut SessionHooks {
        &mut self.hooks
    }

    pub fn validator_mut(&mut self) -> &mut ValidationContainer {
        &mut self.validator
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Result<&Table> {
        lookup_table(&self.table_index, name).map(|idx| &self.tables[idx])
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relation_index.get(name).map(|id| &self.relations[*id])
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    pub fn pending(&self) -> &ChangeSet {
        &self.pending
    }

    pub fn record(&self, oid: Oid) -> Result<&Record> {
        self.records.get(&oid).ok_or_else(|| unknown_record(oid))
    }

    pub(crate) fn record_mut(&mut self, oid: Oid) -> Result<&mut Record> {
        self.records.get_mut(&oid).ok_or_else(|| unknown_record(oid))
    }

    /// Index of the table `oid` belongs to.
    pub(crate) fn table_idx_of(&self, oid: Oid) -> Result<usize> {
        let record = self.record(oid)?;
        lookup_table(&self.table_index, record.table())
    }

    pub(crate) fn table_idx(&self, name: &str) -> Result<usize> {
        lookup_table(&self.table_index, name)
    }

    pub(crate) fn table_of(&self, oid: Oid) -> Result<&Table> {
        self.table_idx_of(oid).map(|idx| &self.tables[idx])
    }

    pub fn internal_id(&self, oid: Oid) -> Result<String> {
        self.record(oid).map(Record::internal_id)
    }

    /// Look up a record by internal id in the repository of `table`.
    pub fn get_by_internal_id(&self, table: &str, internal_id: &str) -> Result<Option<Oid>> {
        Ok(self.table(table)?.repository().get(internal_id))
    }

    pub fn debug_info(&self) -> DebugInfo {
        let counts = self.pending.counts();
        DebugInfo {
            repositories: self
                .tables
                .iter()
                .map(|t| (t.name().to_string(), t.repository().len()))
                .collect(),
            records: self.records.len(),
            pending_inserts: counts.inserts,
            pending_updates: counts.updates,
            pending_deletes: counts.deletes,
        }
    }

    // ========================================================================
    // Record Creation
    // ========================================================================

    fn allocate_oid(&mut self) -> Oid {
        let oid = Oid(self.next_oid);
        self.next_oid += 1;
        oid
    }

    /// Create a new record carrying the field defaults of `table`.
    pub fn new_record(&mut self, table: &str) -> Result<Oid> {
        let idx = self.table_idx(table)?;
        let oid = self.allocate_oid();
        let data = self.tables[idx].initial_data();
        self.tables[idx]
            .repository_mut()
            .add(oid.new_record_id(), oid)?;
        self.records.insert(oid, Record::new(oid, table, data));
        tracing::trace!(table = %table, oid = oid.0, "new record");
        Ok(oid)
    }

    /// Create a new record and set the given field values.
    pub fn create_record<I, K, V>(&mut self, table: &str, values: I) -> Result<Oid>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let oid = self.new_record(table)?;
        for (field, value) in values {
            self.set_field(oid, field.as_ref(), value)?;
        }
        Ok(oid)
    }

    /// Register a persisted row, or return the record already tracked for it.
    pub(crate) fn hydrate(&mut self, table: &str, values: HashMap<String, Value>) -> Result<Oid> {
        let idx = self.table_idx(table)?;
        let Some(id) = self.tables[idx].identifier_of(&values) else {
            return Err(Error::record(
                RecordErrorKind::IdentifierMismatch,
                table,
                "Row does not carry a complete identifier!",
            ));
        };
        if let Some(existing) = self.tables[idx].repository().get(&id) {
            return Ok(existing);
        }

        let oid = self.allocate_oid();
        let mut data = self.tables[idx].initial_data();
        for (field, value) in values {
            if self.tables[idx].has_field(&field) {
                data.insert(field, value);
            }
        }
        let mut record = Record::new(oid, table, data);
        record.mark_persisted(id.clone());
        self.tables[idx].repository_mut().add(id.clone(), oid)?;
        self.records.insert(oid, record);

        for r in self.tables[idx].owning_relations().to_vec() {
            self.link_hydrated_owner(r, oid)?;
        }
        tracing::trace!(table = %table, internal_id = %id, oid = oid.0, "hydrated record");
        Ok(oid)
    }

    // ========================================================================
    // Member Access
    // ========================================================================

    /// Read a field or relation alias.
    pub fn get(&mut self, oid: Oid, name: &str) -> Result<Member> {
        let table = self.table_of(oid)?;
        if let Some(field) = table.field(name) {
            let value = self
                .record(oid)?
                .get(name)
                .cloned()
                .unwrap_or_else(|| field.initial_value());
            return Ok(Member::Field(value));
        }
        match table.relation_alias(name) {
            Some((r, direction)) => self.read_reference(r, direction, oid),
            None => Err(Error::unknown_member(table.name(), name)),
        }
    }

    /// Write a field or relation alias.
    pub fn set(&mut self, oid: Oid, name: &str, assign: Assign) -> Result<()> {
        let table = self.table_of(oid)?;
        if table.has_field(name) {
            return match assign {
                Assign::Value(value) => self.write_field(oid, name, value).map(|_| ()),
                _ => Err(Error::reference_shape(table.name(), name, "value")),
            };
        }
        match table.relation_alias(name) {
            Some((r, direction)) => self.write_reference(r, direction, oid, name, assign),
            None => Err(Error::unknown_member(table.name(), name)),
        }
    }

    /// Read a field value.
    pub fn field(&self, oid: Oid, name: &str) -> Result<Value> {
        let table = self.table_of(oid)?;
        let field = table.require_field(name)?;
        Ok(self
            .record(oid)?
            .get(name)
            .cloned()
            .unwrap_or_else(|| field.initial_value()))
    }

    /// Write a field value.
    pub fn set_field(&mut self, oid: Oid, name: &str, value: impl Into<Value>) -> Result<()> {
        self.write_field(oid, name, value.into()).map(|_| ())
    }

    /// Read a relation alias that yields a single record.
    pub fn related(&mut self, oid: Oid, alias: &str) -> Result<Option<Oid>> {
        match self.get(oid, alias)? {
            Member::One(target) => Ok(target),
            Member::Many(_) => Err(Error::relation(
                rowgraph_core::RelationErrorKind::NotARecord,
                alias,
                format!("Alias '{alias}' yields a collection, not a record!"),
            )),
            Member::NotReady => Err(Error::relation(
                rowgraph_core::RelationErrorKind::UnknownRecord,
                alias,
                format!("Record related through '{alias}' is not loaded!"),
            )),
            Member::Field(_) => Err(Error::reference_shape(
                self.record(oid)?.table(),
                alias,
                "record",
            )),
        }
    }

    /// Point a relation alias at `target` (or at nothing).
    pub fn link(&mut self, oid: Oid, alias: &str, target: Option<Oid>) -> Result<()> {
        self.set(oid, alias, Assign::Record(target))
    }

    /// Read a one-to-many side. `None` if its members are not loaded yet.
    pub fn collection(&mut self, oid: Oid, alias: &str) -> Result<Option<Vec<Oid>>> {
        match self.get(oid, alias)? {
            Member::Many(members) => Ok(Some(members)),
            Member::NotReady => Ok(None),
            Member::One(_) => Err(Error::relation(
                rowgraph_core::RelationErrorKind::NotACollection,
                alias,
                format!("Alias '{alias}' yields a single record, not a collection!"),
            )),
            Member::Field(_) => Err(Error::reference_shape(
                self.record(oid)?.table(),
                alias,
                "collection",
            )),
        }
    }

    pub fn map_value(&mut self, oid: Oid, name: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        self.record_mut(oid)?.map_value(name, value.into());
        Ok(())
    }

    pub fn mapped_value(&self, oid: Oid, name: &str) -> Result<Option<Value>> {
        Ok(self.record(oid)?.mapped_value(name).cloned())
    }

    pub fn has_mapped_value(&self, oid: Oid, name: &str) -> Result<bool> {
        Ok(self.record(oid)?.has_mapped_value(name))
    }

    /// Store a field value, run field hooks and keep relations consistent.
    pub(crate) fn write_field(&mut self, oid: Oid, field: &str, value: Value) -> Result<FieldWrite> {
        self.write_field_inner(oid, field, value, None)
    }

    /// Like [`write_field`](Self::write_field), but leaves relation `skip`
    /// alone; the caller is maintaining that relation itself.
    pub(crate) fn write_field_inner(
        &mut self,
        oid: Oid,
        field: &str,
        value: Value,
        skip: Option<RelationId>,
    ) -> Result<FieldWrite> {
        let idx = self.table_idx_of(oid)?;
        self.tables[idx].require_field(field)?;
        let old = self
            .record(oid)?
            .get(field)
            .cloned()
            .unwrap_or_default();

        if self.hooks.has_field_hooks() {
            let change = FieldChange {
                table: self.tables[idx].name(),
                oid,
                field,
                old: &old,
                new: &value,
            };
            if self.hooks.fire_pre_field_change(&change) == HookOutcome::Cancel {
                return Ok(FieldWrite::Vetoed);
            }
        }

        if !self.record_mut(oid)?.write(field, value.clone()) {
            return Ok(FieldWrite::Unchanged);
        }

        for r in self.tables[idx].relations_by_owning_field(field).to_vec() {
            if Some(r) != skip {
                self.on_owning_field_changed(r, oid, &old, &value)?;
            }
        }

        if self.hooks.has_field_hooks() {
            let change = FieldChange {
                table: self.tables[idx].name(),
                oid,
                field,
                old: &old,
                new: &value,
            };
            self.hooks.fire_post_field_change(&change);
        }
        Ok(FieldWrite::Changed)
    }

    /// Drop every record and all bookkeeping.
    pub fn clear(&mut self) {
        for table in &mut self.tables {
            table.repository_mut().clear();
        }
        for relation in &mut self.relations {
            relation.clear();
        }
        self.records.clear();
        self.pending.clear();
        self.identifier_guard.clear();
        tracing::debug!("session cleared");
    }
}

fn lookup_table(index: &HashMap<String, usize>, name: &str) -> Result<usize> {
    index.get(name).copied().ok_or_else(|| {
        ConfigError::new(
            ConfigErrorKind::UnknownTable,
            format!("Table '{name}' is not defined!"),
        )
        .into()
    })
}

fn unknown_record(oid: Oid) -> Error {
    Error::record_not_found("", format!("Record handle {oid} is not known to this session!"))
}

/// Direction-aware description used in error messages.
pub(crate) fn side_name(direction: Direction) -> &'static str {
    match direction {
        Direction::ToReferenced => "referenced",
        Direction::ToOwning => "owning",
    }
}
