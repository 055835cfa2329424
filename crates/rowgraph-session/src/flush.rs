//! Commit: writing the pending change set to storage.
//!
//! Order inside the single transaction:
//! - DELETE, dependents first (the order the delete graph produced)
//! - INSERT, parents first; generated identifiers are assigned and propagated
//!   to owners as soon as each insert returns
//! - UPDATE of scheduled records, modified fields only
//! - UPDATE of records whose foreign keys were rewritten during the flush
//!
//! A failure anywhere rolls back and restores every record, repository and
//! reference map to the state they had when `commit` was called.

use std::collections::{HashMap, HashSet};

use rowgraph_core::{
    CancelledError, Connection, Error, Result, TransactionError, TransactionErrorKind, Value,
    placeholder, quote_ident,
};

use crate::Session;
use crate::change_set::ChangeSet;
use crate::events::{HookOutcome, RecordEvent};
use crate::record::{Oid, Record};
use crate::relation::Relation;
use crate::repository::Repository;
use crate::table::Table;
use crate::validation::ValidationTarget;

/// Upper bound on rounds of follow-up updates for rewritten foreign keys.
const MAX_DEFERRED_ROUNDS: usize = 16;

/// Result of a commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushResult {
    /// Number of rows inserted.
    pub inserted: usize,
    /// Number of rows updated.
    pub updated: usize,
    /// Number of rows deleted.
    pub deleted: usize,
}

impl FlushResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of operations performed.
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

/// Everything a failed commit has to put back.
struct Snapshot {
    records: HashMap<Oid, Record>,
    repositories: Vec<Repository>,
    relations: Vec<Relation>,
}

/// `INSERT INTO "t" ("a", "b") VALUES ($1, $2)`
///
/// Auto-increment identifier fields that are still NULL are left out so
/// storage can generate them.
pub(crate) fn insert_statement(table: &Table, record: &Record) -> (String, Vec<Value>) {
    let mut columns = Vec::new();
    let mut params = Vec::new();
    for field in table.fields() {
        let value = record.get(&field.name).cloned().unwrap_or_default();
        if field.auto_increment && value.is_null() {
            continue;
        }
        columns.push(quote_ident(&field.name));
        params.push(value);
    }
    let placeholders: Vec<String> = (1..=params.len()).map(placeholder).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table.name()),
        columns.join(", "),
        placeholders.join(", ")
    );
    (sql, params)
}

/// `UPDATE "t" SET "a" = $1 WHERE "id" = $2`
///
/// Only modified fields are written. The row is addressed by the identifier
/// values last known as persisted, so identifier changes are flushed too.
/// Returns `None` if nothing is modified.
pub(crate) fn update_statement(table: &Table, record: &Record) -> Option<(String, Vec<Value>)> {
    let mut assignments = Vec::new();
    let mut params = Vec::new();
    for field in table.fields() {
        if !record.is_field_modified(&field.name) {
            continue;
        }
        params.push(record.get(&field.name).cloned().unwrap_or_default());
        assignments.push(format!(
            "{} = {}",
            quote_ident(&field.name),
            placeholder(params.len())
        ));
    }
    if assignments.is_empty() {
        return None;
    }
    let condition = identifier_condition(table, record, &mut params);
    Some((
        format!(
            "UPDATE {} SET {} WHERE {}",
            quote_ident(table.name()),
            assignments.join(", "),
            condition
        ),
        params,
    ))
}

/// `DELETE FROM "t" WHERE "id" = $1`
pub(crate) fn delete_statement(table: &Table, record: &Record) -> (String, Vec<Value>) {
    let mut params = Vec::new();
    let condition = identifier_condition(table, record, &mut params);
    (
        format!("DELETE FROM {} WHERE {}", quote_ident(table.name()), condition),
        params,
    )
}

fn identifier_condition(table: &Table, record: &Record, params: &mut Vec<Value>) -> String {
    let mut clauses = Vec::new();
    for field in table.identifier_fields() {
        params.push(record.original_value(field).cloned().unwrap_or_default());
        clauses.push(format!("{} = {}", quote_ident(field), placeholder(params.len())));
    }
    clauses.join(" AND ")
}

impl<C: Connection> Session<C> {
    /// Execute everything scheduled in one transaction.
    ///
    /// On failure the transaction is rolled back, the schedule is dropped and
    /// records, repositories and reference maps are restored to their state
    /// before the call.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn commit(&mut self) -> Result<FlushResult> {
        if self.connection.in_transaction() {
            return Err(Error::Transaction(TransactionError {
                kind: TransactionErrorKind::NestedNotSupported,
                message: "commit called while a transaction is already open".to_string(),
            }));
        }
        if self.pending.is_empty() {
            tracing::debug!("nothing to commit");
            return Ok(FlushResult::new());
        }

        let snapshot = self.snapshot();
        let plan = std::mem::take(&mut self.pending);
        self.flushing = Some(HashSet::new());

        let outcome = self.run_commit(&plan);
        self.flushing = None;

        match outcome {
            Ok(result) => {
                for relation in &mut self.relations {
                    relation.reset_originals();
                }
                tracing::info!(
                    inserted = result.inserted,
                    updated = result.updated,
                    deleted = result.deleted,
                    "commit complete"
                );
                Ok(result)
            }
            Err(err) => {
                if self.connection.in_transaction() {
                    if let Err(rollback_err) = self.connection.rollback() {
                        tracing::warn!(error = %rollback_err, "rollback failed");
                    }
                }
                self.restore(snapshot);
                tracing::warn!(error = %err, "commit failed, state restored");
                Err(err)
            }
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            records: self.records.clone(),
            repositories: self.tables.iter().map(|t| t.repository().clone()).collect(),
            relations: self.relations.clone(),
        }
    }

    fn restore(&mut self, snapshot: Snapshot) {
        self.records = snapshot.records;
        for (table, repository) in self.tables.iter_mut().zip(snapshot.repositories) {
            *table.repository_mut() = repository;
        }
        self.relations = snapshot.relations;
        self.identifier_guard.clear();
    }

    fn run_commit(&mut self, plan: &ChangeSet) -> Result<FlushResult> {
        for oid in plan.deletes() {
            self.fire_record_event(RecordEvent::PreDelete, *oid)?;
        }
        for oid in plan.inserts() {
            self.fire_record_event(RecordEvent::PreSave, *oid)?;
            self.fire_record_event(RecordEvent::PreInsert, *oid)?;
        }
        for oid in plan.updates() {
            self.fire_record_event(RecordEvent::PreSave, *oid)?;
            self.fire_record_event(RecordEvent::PreUpdate, *oid)?;
        }

        if self.config.validate_on_commit {
            for oid in plan.inserts().iter().chain(plan.updates()) {
                self.validate_record(*oid)?;
            }
        }

        self.connection.begin_transaction()?;
        let mut result = FlushResult::new();

        for oid in plan.deletes() {
            self.execute_delete(*oid)?;
            result.deleted += 1;
            self.fire_record_event(RecordEvent::PostDelete, *oid)?;
        }
        for oid in plan.inserts() {
            self.execute_insert(*oid)?;
            result.inserted += 1;
            self.fire_record_event(RecordEvent::PostInsert, *oid)?;
            self.fire_record_event(RecordEvent::PostSave, *oid)?;
        }
        for oid in plan.updates() {
            if self.execute_update(*oid)? {
                result.updated += 1;
            }
            self.fire_record_event(RecordEvent::PostUpdate, *oid)?;
            self.fire_record_event(RecordEvent::PostSave, *oid)?;
        }
        result.updated += self.execute_deferred_updates(plan, MAX_DEFERRED_ROUNDS)?;

        self.connection.commit()?;

        for oid in plan.deletes() {
            self.forget_deleted(*oid)?;
        }
        Ok(result)
    }

    fn execute_deferred_updates(&mut self, plan: &ChangeSet, max_rounds: usize) -> Result<usize> {
        let mut updated = 0;
        for _ in 0..max_rounds {
            let dirty = self.take_deferred(plan);
            if dirty.is_empty() {
                return Ok(updated);
            }
            tracing::debug!(count = dirty.len(), "flushing rewritten foreign keys");
            for oid in dirty {
                if self.execute_update(oid)? {
                    updated += 1;
                }
            }
        }
        let left = self.take_deferred(plan);
        if left.is_empty() {
            return Ok(updated);
        }
        tracing::warn!(count = left.len(), rounds = max_rounds, "deferred updates did not settle");
        Err(Error::Transaction(TransactionError {
            kind: TransactionErrorKind::Unsettled,
            message: format!(
                "{} record(s) still dirty after {} deferred update rounds",
                left.len(),
                max_rounds
            ),
        }))
    }

    /// Persisted, modified records dirtied during the flush.
    fn take_deferred(&mut self, plan: &ChangeSet) -> Vec<Oid> {
        let Some(flushing) = self.flushing.as_mut() else {
            return Vec::new();
        };
        let mut dirty: Vec<Oid> = flushing.drain().collect();
        dirty.retain(|oid| {
            !plan.is_scheduled_for_delete(*oid)
                && self
                    .records
                    .get(oid)
                    .is_some_and(|r| r.exists() && r.is_modified())
        });
        dirty.sort_unstable();
        dirty
    }

    fn execute_insert(&mut self, oid: Oid) -> Result<()> {
        let idx = self.table_idx_of(oid)?;
        let table = &self.tables[idx];
        let record = self.record(oid)?;
        let (sql, params) = insert_statement(table, record);

        let generated = table.has_autoincrement_trigger()
            && !table.has_composite_primary_key()
            && table
                .identifier_fields()
                .iter()
                .all(|f| record.get(f).is_none_or(Value::is_null));
        let current: Vec<Value> = table
            .identifier_fields()
            .iter()
            .map(|f| record.get(f).cloned().unwrap_or_default())
            .collect();
        let table_name = table.name().to_string();

        tracing::trace!(sql = %sql, "insert");
        self.connection.execute(&sql, &params)?;
        let identifier = if generated {
            vec![self.connection.last_insert_id(&table_name)?]
        } else {
            current
        };
        self.assign_identifier(oid, identifier)
    }

    /// Returns whether a statement was executed.
    fn execute_update(&mut self, oid: Oid) -> Result<bool> {
        let idx = self.table_idx_of(oid)?;
        let table = &self.tables[idx];
        let record = self.record(oid)?;
        let Some((sql, params)) = update_statement(table, record) else {
            return Ok(false);
        };
        let old_id = record.internal_id();
        let new_id = table.identifier_of(record.data());

        tracing::trace!(sql = %sql, "update");
        let affected = self.connection.execute(&sql, &params)?;
        if affected == 0 {
            tracing::warn!(table = %self.tables[idx].name(), internal_id = %old_id, "update matched no row");
        }

        let record = self.record_mut(oid)?;
        record.clear_modified();
        match new_id {
            Some(new_id) if new_id != old_id => {
                record.mark_persisted(new_id.clone());
                self.propagate_identifier(oid, &old_id, &new_id)?;
            }
            _ => {}
        }
        Ok(true)
    }

    fn execute_delete(&mut self, oid: Oid) -> Result<()> {
        let idx = self.table_idx_of(oid)?;
        let (sql, params) = delete_statement(&self.tables[idx], self.record(oid)?);
        tracing::trace!(sql = %sql, "delete");
        self.connection.execute(&sql, &params)?;
        Ok(())
    }

    /// Drop a deleted record from its repository and every reference map.
    fn forget_deleted(&mut self, oid: Oid) -> Result<()> {
        let idx = self.table_idx_of(oid)?;
        let internal_id = self.internal_id(oid)?;
        self.unlink_record(oid)?;
        self.tables[idx].repository_mut().remove(&internal_id);
        let record = self.record_mut(oid)?;
        record.mark_removed();
        record.clear_modified();
        if !self.config.remove_deleted_from_repository {
            self.tables[idx]
                .repository_mut()
                .add(oid.new_record_id(), oid)?;
        }
        tracing::debug!(table = %self.tables[idx].name(), internal_id = %internal_id, "record removed");
        Ok(())
    }

    /// Run the lifecycle callbacks of `event` for `oid` and apply the field
    /// writes they queued.
    fn fire_record_event(&mut self, event: RecordEvent, oid: Oid) -> Result<()> {
        let record = self.records.get(&oid).ok_or_else(|| crate::unknown_record(oid))?;
        let (outcome, assignments) = self.hooks.fire_record(event, record);
        for (field, value) in assignments {
            self.write_field(oid, &field, value)?;
        }
        if outcome == HookOutcome::Cancel {
            let table = self.record(oid)?.table().to_string();
            tracing::info!(event = event.as_str(), table = %table, "operation cancelled by hook");
            return Err(Error::Cancelled(CancelledError {
                operation: event.as_str(),
                table,
            }));
        }
        Ok(())
    }

    /// Run the validation container against one record.
    fn validate_record(&mut self, oid: Oid) -> Result<()> {
        let idx = self.table_idx_of(oid)?;
        let mut deferred = HashSet::new();
        for r in self.tables[idx].owning_relations() {
            if self.relations[*r].reference_map().has_field_mapping(oid) {
                deferred.insert(self.relations[*r].definition().owning_field.clone());
            }
        }
        let record = self.records.get(&oid).ok_or_else(|| crate::unknown_record(oid))?;
        let mut target = ValidationTarget {
            table: &self.tables[idx],
            record,
            connection: &mut self.connection,
            check_uniqueness: self.config.validate_uniqueness,
            deferred: &deferred,
        };
        self.validator.validate(&mut target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockConnection, fixture_schema, row};
    use crate::{HookOutcome, RecordEvent, SessionConfig};
    use rowgraph_core::{Error, ValidationErrorKind};

    fn session() -> Session<MockConnection> {
        Session::with_config(
            MockConnection::new(),
            &fixture_schema(),
            SessionConfig::new().with_validate_uniqueness(false),
        )
        .unwrap()
    }

    fn persisted(session: &mut Session<MockConnection>, table: &str, values: &[(&str, Value)]) -> Oid {
        let row: HashMap<String, Value> = values
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect();
        session.hydrate(table, row).unwrap()
    }

    #[test]
    fn statement_shapes() {
        let mut session = session();
        let user = persisted(
            &mut session,
            "user",
            &[("id", Value::Int(4)), ("username", Value::from("JohnD"))],
        );
        session.set_field(user, "password", "secret").unwrap();
        let table = session.table("user").unwrap();
        let record = session.record(user).unwrap();

        let (sql, params) = update_statement(table, record).unwrap();
        assert_eq!(sql, "UPDATE \"user\" SET \"password\" = $1 WHERE \"id\" = $2");
        assert_eq!(params, vec![Value::from("secret"), Value::Int(4)]);

        let (sql, params) = delete_statement(table, record);
        assert_eq!(sql, "DELETE FROM \"user\" WHERE \"id\" = $1");
        assert_eq!(params, vec![Value::Int(4)]);

        let fresh = session.new_record("user").unwrap();
        let (sql, _) = insert_statement(session.table("user").unwrap(), session.record(fresh).unwrap());
        assert_eq!(sql, "INSERT INTO \"user\" (\"username\", \"password\") VALUES ($1, $2)");
    }

    #[test]
    fn save_assigns_identifiers_and_propagates_keys() {
        let mut session = session();
        let user = session
            .create_record("user", [("username", "JohnD"), ("password", "secret")])
            .unwrap();
        let author = session
            .create_record("author", [("firstname", "John"), ("lastname", "Doe")])
            .unwrap();
        session.link(user, "Author", Some(author)).unwrap();

        let result = session.save(user).unwrap();
        assert_eq!(result.inserted, 2);
        assert_eq!(result.updated, 0);
        assert_eq!(session.field(user, "id").unwrap(), Value::Int(1));
        assert_eq!(session.field(author, "user_id").unwrap(), Value::Int(1));
        assert!(session.record(author).unwrap().exists());
        assert!(!session.record(author).unwrap().is_modified());

        let executed = session.connection().executed();
        assert!(executed[0].starts_with("INSERT INTO \"user\""));
        assert!(executed[1].starts_with("INSERT INTO \"author\""));
        assert_eq!(session.connection().commits, 1);
    }

    #[test]
    fn owner_inserted_before_its_target_gets_a_follow_up_update() {
        let mut session = session();
        let a = session.create_record("author", [("lastname", "A")]).unwrap();
        let b = session.create_record("author", [("lastname", "B")]).unwrap();
        session.link(a, "Editor", Some(b)).unwrap();
        session.link(b, "Editor", Some(a)).unwrap();

        session.save(a).unwrap();
        assert_eq!(
            session.field(a, "editor_id").unwrap(),
            session.field(b, "id").unwrap()
        );
        assert_eq!(
            session.field(b, "editor_id").unwrap(),
            session.field(a, "id").unwrap()
        );
        let executed = session.connection().executed();
        assert_eq!(executed.len(), 3);
        assert!(executed[2].starts_with("UPDATE \"author\" SET \"editor_id\""));
        assert!(!session.record(a).unwrap().is_modified());
        assert!(!session.record(b).unwrap().is_modified());
    }

    #[test]
    fn validation_failure_writes_nothing() {
        let mut session = session();
        let user = session.create_record("user", [("password", "secret")]).unwrap();
        let err = session.save(user).unwrap_err();
        let report = err.validation().unwrap();
        assert!(report.has("username", ValidationErrorKind::Required));
        assert!(session.connection().statements.is_empty());
        assert!(!session.record(user).unwrap().exists());
        assert!(session.pending().is_empty());
    }

    #[test]
    fn storage_failure_rolls_back_and_restores() {
        let mut session = session();
        let user = session
            .create_record("user", [("username", "JohnD")])
            .unwrap();
        let author = session.create_record("author", [("lastname", "Doe")]).unwrap();
        session.link(user, "Author", Some(author)).unwrap();
        session.connection_mut().fail_on = Some("INSERT INTO \"author\"".to_string());

        let err = session.save(user).unwrap_err();
        assert!(err.is_storage_error());
        assert_eq!(session.connection().rollbacks, 1);
        assert!(!session.record(user).unwrap().exists());
        assert_eq!(session.field(user, "id").unwrap(), Value::Null);
        assert_eq!(session.field(author, "user_id").unwrap(), Value::Null);
        assert_eq!(session.internal_id(user).unwrap(), user.new_record_id());
        assert_eq!(
            session.get_by_internal_id("user", &user.new_record_id()).unwrap(),
            Some(user)
        );
        assert_eq!(session.related(author, "User").unwrap(), Some(user));
    }

    #[test]
    fn nested_commit_is_refused() {
        let mut session = session();
        let tag = session.create_record("tag", [("name", "rust")]).unwrap();
        session.schedule_save(tag).unwrap();
        session.connection_mut().begin_transaction().unwrap();
        assert!(matches!(
            session.commit(),
            Err(Error::Transaction(e)) if e.kind == TransactionErrorKind::NestedNotSupported
        ));
        assert!(session.pending().is_scheduled_for_insert(tag));
    }

    #[test]
    fn cancelled_insert_aborts_commit() {
        let mut session = session();
        session
            .hooks_mut()
            .on(RecordEvent::PreInsert, |ctx| {
                if ctx.table() == "tag" {
                    HookOutcome::Cancel
                } else {
                    HookOutcome::Continue
                }
            });
        let tag = session.create_record("tag", [("name", "rust")]).unwrap();
        match session.save(tag) {
            Err(Error::Cancelled(e)) => assert_eq!(e.operation, "preInsert"),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(session.connection().statements.is_empty());
    }

    #[test]
    fn delete_removes_record_after_commit() {
        let mut session = session();
        let user = persisted(&mut session, "user", &[("id", Value::Int(1)), ("username", Value::from("x"))]);
        let author = persisted(
            &mut session,
            "author",
            &[("id", Value::Int(2)), ("lastname", Value::from("Doe")), ("user_id", Value::Int(1))],
        );
        let result = session.delete(user).unwrap();
        assert_eq!(result.deleted, 2);
        let executed = session.connection().executed();
        assert_eq!(executed[0], "DELETE FROM \"author\" WHERE \"id\" = $1");
        assert_eq!(executed[1], "DELETE FROM \"user\" WHERE \"id\" = $1");

        assert!(!session.record(user).unwrap().exists());
        assert_eq!(session.get_by_internal_id("user", "1").unwrap(), None);
        assert_eq!(session.get_by_internal_id("author", "2").unwrap(), None);
        assert!(!session.relation("author.user_id").unwrap().reference_map().is_known("1"));
        assert!(!session.record(author).unwrap().exists());
    }

    #[test]
    fn identifier_change_is_flushed_and_propagated() {
        let mut session = session();
        let author = persisted(&mut session, "author", &[("id", Value::Int(1)), ("lastname", Value::from("Doe"))]);
        let article = persisted(
            &mut session,
            "article",
            &[("id", Value::Int(5)), ("author_id", Value::Int(1)), ("title", Value::from("t"))],
        );
        session.set_field(author, "id", 7).unwrap();
        assert_eq!(session.internal_id(author).unwrap(), "1");

        session.schedule_save(author).unwrap();
        session.commit().unwrap();

        let executed = session.connection().statements.clone();
        assert_eq!(executed[0].0, "UPDATE \"author\" SET \"id\" = $1 WHERE \"id\" = $2");
        assert_eq!(executed[0].1, vec![Value::Int(7), Value::Int(1)]);
        assert_eq!(executed[1].0, "UPDATE \"article\" SET \"author_id\" = $1 WHERE \"id\" = $2");
        assert_eq!(session.internal_id(author).unwrap(), "7");
        assert_eq!(session.field(article, "author_id").unwrap(), Value::Int(7));
        assert_eq!(session.collection(author, "Article").unwrap(), Some(vec![article]));
    }

    #[test]
    fn lookups_hydrate_rows() {
        let mut session = session();
        session
            .connection_mut()
            .query_results
            .push_back(vec![row(&[("id", Value::Int(3)), ("name", Value::from("rust"))])]);
        let tag = session.find_by_pk("tag", &[Value::Int(3)]).unwrap().unwrap();
        assert_eq!(session.field(tag, "name").unwrap(), Value::from("rust"));
        // second lookup is answered by the repository
        assert_eq!(session.find_by_pk("tag", &[Value::Int(3)]).unwrap(), Some(tag));
        assert_eq!(session.connection().statements.len(), 1);
    }

    #[test]
    fn deferred_updates_that_do_not_settle_fail_the_flush() {
        let mut session = session();
        let user = persisted(
            &mut session,
            "user",
            &[("id", Value::Int(4)), ("username", Value::from("JohnD"))],
        );
        session.set_field(user, "password", "secret").unwrap();
        session.flushing = Some(HashSet::from([user]));

        let err = session
            .execute_deferred_updates(&ChangeSet::default(), 0)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transaction(ref e) if e.kind == TransactionErrorKind::Unsettled
        ));
        assert!(session.connection().statements.is_empty());

        session.flushing = Some(HashSet::from([user]));
        assert_eq!(
            session
                .execute_deferred_updates(&ChangeSet::default(), 1)
                .unwrap(),
            1
        );
        assert!(!session.record(user).unwrap().is_modified());
    }
}
