//! Record validation run before commit.
//!
//! A [`ValidationContainer`] holds named validators and runs them in
//! registration order. The first validator that reports anything stops the
//! run and the report becomes [`Error::Validation`].

use std::collections::HashSet;

use rowgraph_core::{
    Connection, Error, Result, ValidationError, Value, check_length, check_type, placeholder,
    quote_ident,
};

use crate::record::Record;
use crate::table::Table;

/// What a validator gets to look at.
pub struct ValidationTarget<'a> {
    pub table: &'a Table,
    pub record: &'a Record,
    /// Used by validators that need to query storage.
    pub connection: &'a mut dyn Connection,
    /// Whether storage lookups for unique indexes are wanted.
    pub check_uniqueness: bool,
    /// Fields whose value is only known once related records are flushed.
    pub deferred: &'a HashSet<String>,
}

impl ValidationTarget<'_> {
    fn value(&self, field: &str) -> Value {
        self.record.get(field).cloned().unwrap_or_default()
    }

    fn is_deferred(&self, field: &str) -> bool {
        if self.deferred.contains(field) {
            return true;
        }
        // generated on insert
        !self.record.exists()
            && self.table.is_identifier_field(field)
            && self.table.field(field).is_some_and(|f| f.auto_increment)
    }
}

/// A single validation rule set.
pub trait RecordValidator: Send {
    /// Add every failure to `report`. An `Err` aborts the commit with that
    /// error instead of a validation report.
    fn validate(&mut self, target: &mut ValidationTarget<'_>, report: &mut ValidationError)
    -> Result<()>;
}

/// Checks NOT NULL, type and length of every field.
#[derive(Debug, Default, Clone, Copy)]
pub struct FieldValidator;

impl RecordValidator for FieldValidator {
    fn validate(
        &mut self,
        target: &mut ValidationTarget<'_>,
        report: &mut ValidationError,
    ) -> Result<()> {
        for field in target.table.fields() {
            let value = target.value(&field.name);
            if value.is_null() {
                if !field.nullable && !target.is_deferred(&field.name) {
                    report.add_required(&field.name);
                }
                continue;
            }
            if !check_type(field, &value) {
                report.add_type(&field.name, field.field_type);
            } else if !check_length(field, &value) {
                report.add_length(&field.name, field.length.unwrap_or_default());
            }
        }
        Ok(())
    }
}

/// Looks up every unique index in storage.
///
/// An index containing a NULL value is skipped unless it is declared
/// null-constrained, in which case NULL is matched with `IS NULL`.
#[derive(Debug, Default, Clone, Copy)]
pub struct UniqueConstraintValidator;

impl UniqueConstraintValidator {
    /// `SELECT * FROM "t" WHERE "a" = $1 AND "b" IS NULL`
    fn lookup_statement(table: &Table, fields: &[(String, Value)]) -> (String, Vec<Value>) {
        let mut clauses = Vec::new();
        let mut params = Vec::new();
        for (name, value) in fields {
            if value.is_null() {
                clauses.push(format!("{} IS NULL", quote_ident(name)));
            } else {
                params.push(value.clone());
                clauses.push(format!("{} = {}", quote_ident(name), placeholder(params.len())));
            }
        }
        (
            format!(
                "SELECT * FROM {} WHERE {}",
                quote_ident(table.name()),
                clauses.join(" AND ")
            ),
            params,
        )
    }
}

impl RecordValidator for UniqueConstraintValidator {
    fn validate(
        &mut self,
        target: &mut ValidationTarget<'_>,
        report: &mut ValidationError,
    ) -> Result<()> {
        if !target.check_uniqueness {
            return Ok(());
        }
        let table = target.table;
        for index in table.unique_indexes() {
            if index.fields.iter().any(|f| target.is_deferred(f)) {
                continue;
            }
            let values: Vec<(String, Value)> = index
                .fields
                .iter()
                .map(|f| (f.clone(), target.value(f)))
                .collect();
            if !index.null_constrained && values.iter().any(|(_, v)| v.is_null()) {
                continue;
            }
            // unchanged indexes of persisted records cannot collide
            if target.record.exists()
                && !index
                    .fields
                    .iter()
                    .any(|f| target.record.is_field_modified(f))
            {
                continue;
            }

            let (sql, params) = Self::lookup_statement(table, &values);
            let rows = target.connection.query(&sql, &params)?;
            let own_id = target.record.persisted_id();
            let collides = rows.into_iter().any(|row| {
                let id = table.identifier_of(&row.into_map());
                own_id.is_none() || id.as_deref() != own_id
            });
            if collides {
                tracing::debug!(table = %table.name(), index = %index.name, "unique index collision");
                report.add_unique(&index.name, &index.fields);
            }
        }
        Ok(())
    }
}

/// Named validators, run in registration order.
#[derive(Default)]
pub struct ValidationContainer {
    validators: Vec<(String, Box<dyn RecordValidator>)>,
}

impl std::fmt::Debug for ValidationContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationContainer")
            .field("validators", &self.names())
            .finish()
    }
}

impl ValidationContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Field checks followed by unique index checks.
    pub fn with_defaults() -> Self {
        let mut container = Self::new();
        container.add_validator("field", Box::new(FieldValidator));
        container.add_validator("unique", Box::new(UniqueConstraintValidator));
        container
    }

    /// Register a validator. A validator with the same name is replaced in
    /// place.
    pub fn add_validator(&mut self, name: impl Into<String>, validator: Box<dyn RecordValidator>) {
        let name = name.into();
        if let Some(slot) = self.validators.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = validator;
        } else {
            self.validators.push((name, validator));
        }
    }

    /// Remove a validator; returns whether it was registered.
    pub fn remove_validator(&mut self, name: &str) -> bool {
        let before = self.validators.len();
        self.validators.retain(|(n, _)| n != name);
        self.validators.len() != before
    }

    pub fn names(&self) -> Vec<&str> {
        self.validators.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn has_validator(&self, name: &str) -> bool {
        self.validators.iter().any(|(n, _)| n == name)
    }

    /// Run the validators against one record.
    pub fn validate(&mut self, target: &mut ValidationTarget<'_>) -> Result<()> {
        for (name, validator) in &mut self.validators {
            let mut report =
                ValidationError::new(target.table.name(), target.record.internal_id());
            validator.validate(target, &mut report)?;
            if !report.is_empty() {
                tracing::debug!(
                    validator = %name,
                    table = %report.table,
                    fields = ?report.fields(),
                    "validation failed"
                );
                return Err(Error::Validation(report));
            }
        }
        Ok(())
    }
}
