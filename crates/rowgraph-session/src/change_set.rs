//! Scheduling of inserts, updates and deletes.
//!
//! - Save graph: referenced records first, then the record, then its loaded
//!   owners, so inserts run parent-first.
//! - Delete graph: CASCADE dependents first, then the record, so deletes run
//!   child-first. SET NULL / SET DEFAULT dependents get their foreign key
//!   rewritten and are scheduled for update. RESTRICT / NO ACTION dependents
//!   abort the whole computation.
//!
//! Both graphs are computed into a scratch [`ChangeSet`] and merged into the
//! pending one only on success, so a failed call schedules nothing.

use std::collections::HashSet;

use rowgraph_core::{
    Connection, ConstraintError, ConstraintErrorKind, Error, ReferentialAction, Result, Value,
};

use crate::Session;
use crate::record::Oid;

/// Records scheduled for the next commit.
///
/// A record is in at most one of the three sets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    insert: Vec<Oid>,
    update: Vec<Oid>,
    delete: Vec<Oid>,
    /// owners whose foreign key is rewritten because their referenced record is deleted
    nullify: Vec<(Oid, String, Value)>,
    /// new records a delete request dropped from the schedule
    discard: Vec<Oid>,
}

/// Count of pending operations by type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingCounts {
    pub inserts: usize,
    pub updates: usize,
    pub deletes: usize,
}

impl PendingCounts {
    #[must_use]
    pub fn total(&self) -> usize {
        self.inserts + self.updates + self.deletes
    }
}

impl ChangeSet {
    pub fn inserts(&self) -> &[Oid] {
        &self.insert
    }

    pub fn updates(&self) -> &[Oid] {
        &self.update
    }

    /// Deletes in execution order (dependents first).
    pub fn deletes(&self) -> &[Oid] {
        &self.delete
    }

    pub fn is_scheduled_for_insert(&self, oid: Oid) -> bool {
        self.insert.contains(&oid)
    }

    pub fn is_scheduled_for_update(&self, oid: Oid) -> bool {
        self.update.contains(&oid)
    }

    pub fn is_scheduled_for_delete(&self, oid: Oid) -> bool {
        self.delete.contains(&oid)
    }

    pub fn is_scheduled(&self, oid: Oid) -> bool {
        self.is_scheduled_for_insert(oid)
            || self.is_scheduled_for_update(oid)
            || self.is_scheduled_for_delete(oid)
    }

    pub fn counts(&self) -> PendingCounts {
        PendingCounts {
            inserts: self.insert.len(),
            updates: self.update.len(),
            deletes: self.delete.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.insert.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub(crate) fn schedule_insert(&mut self, oid: Oid) {
        if !self.is_scheduled(oid) {
            self.insert.push(oid);
        }
    }

    pub(crate) fn schedule_update(&mut self, oid: Oid) {
        if !self.is_scheduled(oid) {
            self.update.push(oid);
        }
    }

    /// Schedule a delete, dropping any pending save of the same record.
    pub(crate) fn schedule_delete(&mut self, oid: Oid) {
        self.unschedule(oid);
        self.delete.push(oid);
    }

    pub(crate) fn unschedule(&mut self, oid: Oid) {
        self.insert.retain(|o| *o != oid);
        self.update.retain(|o| *o != oid);
        self.delete.retain(|o| *o != oid);
    }
}

impl<C: Connection> Session<C> {
    /// Schedule `oid` and every loaded record reachable from it for saving.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn schedule_save(&mut self, oid: Oid) -> Result<()> {
        if self.pending.is_scheduled_for_delete(oid) {
            let table = self.record(oid)?.table().to_string();
            return Err(Error::Constraint(ConstraintError {
                kind: ConstraintErrorKind::ScheduledForDelete,
                message: format!(
                    "Record '{}' of table '{table}' is scheduled for delete and cannot be saved!",
                    self.internal_id(oid)?
                ),
                table,
                relation: None,
            }));
        }
        let mut scratch = ChangeSet::default();
        let mut visited = HashSet::new();
        self.calculate_save(oid, &mut scratch, &mut visited)?;

        for oid in scratch.insert {
            self.pending.schedule_insert(oid);
        }
        for oid in scratch.update {
            self.pending.schedule_update(oid);
        }
        let counts = self.pending.counts();
        tracing::debug!(
            inserts = counts.inserts,
            updates = counts.updates,
            deletes = counts.deletes,
            "save scheduled"
        );
        Ok(())
    }

    fn calculate_save(
        &self,
        oid: Oid,
        scratch: &mut ChangeSet,
        visited: &mut HashSet<Oid>,
    ) -> Result<()> {
        if !visited.insert(oid) || self.pending.is_scheduled_for_delete(oid) {
            return Ok(());
        }
        let idx = self.table_idx_of(oid)?;
        let table = &self.tables[idx];

        for r in table.owning_relations() {
            if let Some(referenced) = self.loaded_referenced(*r, oid)? {
                self.calculate_save(referenced, scratch, visited)?;
            }
        }

        let record = self.record(oid)?;
        if !record.exists() {
            scratch.schedule_insert(oid);
        } else if record.is_modified() {
            scratch.schedule_update(oid);
        }

        for r in table.referenced_relations() {
            for owner in self.loaded_owners(*r, oid)? {
                self.calculate_save(owner, scratch, visited)?;
            }
        }
        Ok(())
    }

    /// Schedule `oid` for delete and apply the delete actions of its relations.
    ///
    /// On error nothing is scheduled and no record is touched.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn schedule_delete(&mut self, oid: Oid) -> Result<()> {
        if self.config.load_dependents_on_delete {
            self.load_dependents(oid, &mut HashSet::new())?;
        }
        let mut scratch = ChangeSet::default();
        let mut visiting = HashSet::new();
        self.calculate_delete(oid, &mut scratch, &mut visiting)?;

        for oid in &scratch.discard {
            self.pending.unschedule(*oid);
        }
        for oid in &scratch.delete {
            self.pending.schedule_delete(*oid);
        }
        for (owner, field, value) in scratch.nullify {
            if self.pending.is_scheduled_for_delete(owner) {
                continue;
            }
            self.write_field(owner, &field, value)?;
            let record = self.record(owner)?;
            if record.exists() && record.is_modified() {
                self.pending.schedule_update(owner);
            }
        }
        let counts = self.pending.counts();
        tracing::debug!(
            inserts = counts.inserts,
            updates = counts.updates,
            deletes = counts.deletes,
            "delete scheduled"
        );
        Ok(())
    }

    fn calculate_delete(
        &self,
        oid: Oid,
        scratch: &mut ChangeSet,
        visiting: &mut HashSet<Oid>,
    ) -> Result<()> {
        let record = self.record(oid)?;
        if !record.exists() {
            scratch.discard.push(oid);
            return Ok(());
        }
        if !visiting.insert(oid) || self.pending.is_scheduled_for_delete(oid) {
            return Ok(());
        }
        let idx = self.table_idx_of(oid)?;

        for r in self.tables[idx].referenced_relations() {
            let relation = &self.relations[*r];
            let def = relation.definition();
            let owners = self.loaded_owners(*r, oid)?;
            match def.on_delete {
                ReferentialAction::Cascade => {
                    for owner in owners {
                        self.calculate_delete(owner, scratch, visiting)?;
                    }
                }
                ReferentialAction::SetNull | ReferentialAction::SetDefault => {
                    let value = if def.on_delete == ReferentialAction::SetNull {
                        Value::Null
                    } else {
                        self.tables[self.table_idx(&def.owning_table)?]
                            .default_value(&def.owning_field)
                            .unwrap_or_default()
                    };
                    for owner in owners {
                        if !visiting.contains(&owner) {
                            scratch
                                .nullify
                                .push((owner, def.owning_field.clone(), value.clone()));
                        }
                    }
                }
                ReferentialAction::Restrict | ReferentialAction::NoAction => {
                    let blocking = owners.iter().filter(|owner| {
                        !visiting.contains(*owner) && !self.pending.is_scheduled_for_delete(**owner)
                    });
                    if let Some(owner) = blocking.copied().next() {
                        return Err(Error::Constraint(ConstraintError {
                            kind: ConstraintErrorKind::Restrict,
                            table: record.table().to_string(),
                            relation: Some(def.name.clone()),
                            message: format!(
                                "Cannot delete '{}' of table '{}': referenced by '{}' through '{}'!",
                                record.internal_id(),
                                record.table(),
                                self.internal_id(owner)?,
                                def.name
                            ),
                        }));
                    }
                }
            }
        }

        scratch.schedule_delete(oid);
        Ok(())
    }

    /// Schedule `oid` for saving and commit.
    pub fn save(&mut self, oid: Oid) -> Result<crate::FlushResult> {
        self.schedule_save(oid)?;
        self.commit()
    }

    /// Schedule `oid` for delete and commit.
    pub fn delete(&mut self, oid: Oid) -> Result<crate::FlushResult> {
        self.schedule_delete(oid)?;
        self.commit()
    }

    /// Drop everything scheduled. Field values are left as they are.
    pub fn reset_scheduled(&mut self) {
        self.pending.clear();
    }
}
