//! Lookups that read rows from storage and hydrate them into the session.
//!
//! Every row goes through [`Session::hydrate`], so a row that is already
//! tracked resolves to the record the session holds.

use std::collections::{HashMap, HashSet};

use rowgraph_core::{
    Connection, Direction, Error, RecordErrorKind, ReferentialAction, Result, Row, Value,
    placeholder, quote_ident,
};

use crate::record::{Oid, identifier_string};
use crate::reference_map::Reference;
use crate::table::{RelationId, Table};
use crate::{Member, Session};

/// `SELECT <what> FROM "t" WHERE "a" = $1 AND "b" IS NULL`
fn select_statement(table: &str, what: &str, conditions: &[(&str, Value)]) -> (String, Vec<Value>) {
    let mut sql = format!("SELECT {what} FROM {}", quote_ident(table));
    let mut params = Vec::new();
    let mut clauses = Vec::new();
    for (field, value) in conditions {
        if value.is_null() {
            clauses.push(format!("{} IS NULL", quote_ident(field)));
        } else {
            params.push(value.clone());
            clauses.push(format!("{} = {}", quote_ident(field), placeholder(params.len())));
        }
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    (sql, params)
}

fn check_fields(table: &Table, conditions: &[(&str, Value)]) -> Result<()> {
    for (field, _) in conditions {
        table.require_field(field)?;
    }
    Ok(())
}

impl<C: Connection> Session<C> {
    fn hydrate_rows(&mut self, table: &str, rows: Vec<Row>) -> Result<Vec<Oid>> {
        let mut found = Vec::with_capacity(rows.len());
        for row in rows {
            let oid = self.hydrate(table, row.into_map())?;
            if !found.contains(&oid) {
                found.push(oid);
            }
        }
        Ok(found)
    }

    /// Find a record by identifier values, asking the repository first.
    pub fn find_by_pk(&mut self, table: &str, identifier: &[Value]) -> Result<Option<Oid>> {
        let idx = self.table_idx(table)?;
        let fields = self.tables[idx].identifier_fields().to_vec();
        if fields.len() != identifier.len() {
            return Err(Error::record(
                RecordErrorKind::IdentifierMismatch,
                table,
                format!(
                    "Expected {} identifier value(s), got {}!",
                    fields.len(),
                    identifier.len()
                ),
            ));
        }
        let Some(internal_id) = identifier_string(identifier) else {
            return Ok(None);
        };
        if let Some(oid) = self.tables[idx].repository().get(&internal_id) {
            return Ok(Some(oid));
        }
        let conditions: Vec<(&str, Value)> = fields
            .iter()
            .map(String::as_str)
            .zip(identifier.iter().cloned())
            .collect();
        Ok(self.find_by_field_values(table, &conditions)?.into_iter().next())
    }

    /// All rows of `table` matching the given field values.
    ///
    /// A NULL condition matches with `IS NULL`.
    pub fn find_by_field_values(
        &mut self,
        table: &str,
        conditions: &[(&str, Value)],
    ) -> Result<Vec<Oid>> {
        check_fields(self.table(table)?, conditions)?;
        let (sql, params) = select_statement(table, "*", conditions);
        tracing::trace!(sql = %sql, "find");
        let rows = self.connection.query(&sql, &params)?;
        let found = self.hydrate_rows(table, rows)?;
        tracing::debug!(table = %table, count = found.len(), "rows loaded");
        Ok(found)
    }

    /// Like [`find_by_field_values`](Self::find_by_field_values) for at most
    /// one row.
    pub fn find_one_by_field_values(
        &mut self,
        table: &str,
        conditions: &[(&str, Value)],
    ) -> Result<Option<Oid>> {
        let found = self.find_by_field_values(table, conditions)?;
        if found.len() > 1 {
            return Err(Error::record(
                RecordErrorKind::Ambiguous,
                table,
                format!("Expected at most one row, found {}!", found.len()),
            ));
        }
        Ok(found.into_iter().next())
    }

    /// Number of rows of `table` matching the given field values.
    pub fn count_by_field_values(&mut self, table: &str, conditions: &[(&str, Value)]) -> Result<u64> {
        check_fields(self.table(table)?, conditions)?;
        let (sql, params) = select_statement(table, "COUNT(*)", conditions);
        let rows = self.connection.query(&sql, &params)?;
        let count = rows
            .first()
            .and_then(|row| row.get(0))
            .and_then(Value::as_i64)
            .unwrap_or(0);
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Find the record matching `values` by identifier or by any unique
    /// index all of whose fields are present.
    pub fn find_by_unique_indexes(
        &mut self,
        table: &str,
        values: &HashMap<String, Value>,
    ) -> Result<Option<Oid>> {
        let t = self.table(table)?;
        let identifier: Option<Vec<Value>> = t
            .identifier_fields()
            .iter()
            .map(|f| values.get(f).cloned())
            .collect();
        let candidates: Vec<Vec<String>> = t
            .unique_indexes()
            .filter(|index| index.fields.iter().all(|f| values.contains_key(f)))
            .map(|index| index.fields.clone())
            .collect();

        if let Some(identifier) = identifier {
            if let Some(oid) = self.find_by_pk(table, &identifier)? {
                return Ok(Some(oid));
            }
        }
        for fields in candidates {
            let conditions: Vec<(&str, Value)> = fields
                .iter()
                .map(|f| (f.as_str(), values.get(f).cloned().unwrap_or_default()))
                .collect();
            if let Some(oid) = self.find_one_by_field_values(table, &conditions)? {
                return Ok(Some(oid));
            }
        }
        Ok(None)
    }

    /// Return the record matching `values` by identifier or unique index,
    /// or create a new one carrying them.
    pub fn find_or_create(&mut self, table: &str, values: HashMap<String, Value>) -> Result<Oid> {
        if let Some(oid) = self.find_by_unique_indexes(table, &values)? {
            return Ok(oid);
        }
        let idx = self.table_idx(table)?;
        let mut fields: Vec<(String, Value)> = values.into_iter().collect();
        // declaration order, so foreign keys are resolved deterministically
        fields.sort_by_key(|(name, _)| {
            self.tables[idx]
                .fields()
                .iter()
                .position(|f| f.name == *name)
                .unwrap_or(usize::MAX)
        });
        self.create_record(table, fields)
    }

    /// Reload a persisted record from storage.
    ///
    /// Unflushed changes are discarded. Returns `false` if the row is gone;
    /// the record is then detached and treated as new.
    pub fn refresh(&mut self, oid: Oid) -> Result<bool> {
        let idx = self.table_idx_of(oid)?;
        let record = self.record(oid)?;
        let Some(internal_id) = record.persisted_id().map(str::to_string) else {
            return Ok(false);
        };
        let table_name = self.tables[idx].name().to_string();
        let fields = self.tables[idx].identifier_fields().to_vec();
        let identifier = self.tables[idx].split_identifier(&internal_id);
        let conditions: Vec<(&str, Value)> = fields
            .iter()
            .map(String::as_str)
            .zip(identifier)
            .collect();
        let (sql, params) = select_statement(&table_name, "*", &conditions);
        let rows = self.connection.query(&sql, &params)?;

        let Some(row) = rows.into_iter().next() else {
            tracing::debug!(table = %table_name, internal_id = %internal_id, "row is gone");
            self.unlink_record(oid)?;
            self.tables[idx].repository_mut().remove(&internal_id);
            let record = self.record_mut(oid)?;
            record.mark_removed();
            self.tables[idx]
                .repository_mut()
                .add(oid.new_record_id(), oid)?;
            return Ok(false);
        };

        for (field, value) in row.into_map() {
            if !self.tables[idx].has_field(&field) {
                continue;
            }
            let old = self.record(oid)?.get(&field).cloned().unwrap_or_default();
            if old.loosely_equals(&value) {
                continue;
            }
            self.record_mut(oid)?.write_clean(&field, value.clone());
            for r in self.tables[idx].relations_by_owning_field(&field).to_vec() {
                self.on_owning_field_changed(r, oid, &old, &value)?;
            }
        }
        self.record_mut(oid)?.clear_modified();
        Ok(true)
    }

    /// Read a relation alias, loading the related rows from storage if they
    /// are not in the session yet.
    pub fn load_related(&mut self, oid: Oid, alias: &str) -> Result<Member> {
        let table = self.table_of(oid)?;
        let Some((r, direction)) = table.relation_alias(alias) else {
            return Err(Error::unknown_member(table.name(), alias));
        };
        let member = self.read_reference(r, direction, oid)?;
        if member != Member::NotReady {
            return Ok(member);
        }
        match direction {
            Direction::ToReferenced => self.load_referenced(r, oid)?,
            Direction::ToOwning => {
                self.load_owners(r, oid)?;
            }
        }
        self.read_reference(r, direction, oid)
    }

    fn load_referenced(&mut self, r: RelationId, owner: Oid) -> Result<()> {
        let def = self.relations[r].definition().clone();
        let value = self.field(owner, &def.owning_field)?;
        if value.is_null() {
            return Ok(());
        }
        self.find_by_field_values(&def.ref_table, &[(def.ref_field.as_str(), value)])?;
        Ok(())
    }

    /// Hydrate every owner of `referenced` and mark the owning side known.
    fn load_owners(&mut self, r: RelationId, referenced: Oid) -> Result<Vec<Oid>> {
        let record = self.record(referenced)?;
        if !record.exists() {
            return Ok(Vec::new());
        }
        let internal_id = record.internal_id();
        let def = self.relations[r].definition().clone();
        let key = self.field(referenced, &def.ref_field)?;
        let owners = self.find_by_field_values(&def.owning_table, &[(def.owning_field.as_str(), key)])?;

        let map = self.relations[r].map_mut();
        if !map.is_known(&internal_id) {
            let empty = if def.is_one_to_one() {
                Reference::One(None)
            } else {
                Reference::Many(Vec::new())
            };
            map.set_reference(internal_id, empty)?;
        }
        Ok(owners)
    }

    /// Load the owners of `oid` for every relation a delete would visit,
    /// following CASCADE relations recursively.
    pub(crate) fn load_dependents(&mut self, oid: Oid, visited: &mut HashSet<Oid>) -> Result<()> {
        if !visited.insert(oid) || !self.record(oid)?.exists() {
            return Ok(());
        }
        let idx = self.table_idx_of(oid)?;
        for r in self.tables[idx].referenced_relations().to_vec() {
            let owners = self.load_owners(r, oid)?;
            if self.relations[r].on_delete() == ReferentialAction::Cascade {
                for owner in owners {
                    self.load_dependents(owner, visited)?;
                }
            }
        }
        Ok(())
    }
}
