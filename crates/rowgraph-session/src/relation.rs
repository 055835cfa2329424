//! Relations and the algorithms that keep both ends consistent.
//!
//! A [`Relation`] pairs the static [`RelationDef`] with its [`ReferenceMap`].
//! Everything that needs to look at records (writing foreign keys, resolving
//! internal ids, re-keying after an identifier change) runs as a `Session`
//! method, since the session owns the record arena.

use std::collections::HashMap;

use rowgraph_core::{
    CancelledError, Cardinality, Connection, Direction, Error, RecordErrorKind, ReferentialAction,
    RelationDef, RelationErrorKind, Result, Value,
};

use crate::record::{Oid, identifier_string};
use crate::reference_map::{Reference, ReferenceMap};
use crate::table::RelationId;
use crate::{Assign, FieldWrite, Member, Session, side_name};

#[derive(Debug, Clone)]
pub struct Relation {
    def: RelationDef,
    map: ReferenceMap,
    /// referenced internal id -> owning ids as they were before the first
    /// in-memory change since the last successful commit
    originals: HashMap<String, Vec<String>>,
}

impl Relation {
    pub(crate) fn new(def: RelationDef) -> Self {
        let map = ReferenceMap::new(def.name.clone(), def.cardinality);
        Self {
            def,
            map,
            originals: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn definition(&self) -> &RelationDef {
        &self.def
    }

    pub fn cardinality(&self) -> Cardinality {
        self.def.cardinality
    }

    pub fn on_delete(&self) -> ReferentialAction {
        self.def.on_delete
    }

    pub fn reference_map(&self) -> &ReferenceMap {
        &self.map
    }

    pub(crate) fn map_mut(&mut self) -> &mut ReferenceMap {
        &mut self.map
    }

    fn capture(&mut self, referenced_id: &str) {
        if !self.originals.contains_key(referenced_id) {
            let ids = self
                .map
                .owning(referenced_id)
                .map(Reference::ids)
                .unwrap_or_default();
            self.originals.insert(referenced_id.to_string(), ids);
        }
    }

    /// Install a link changed in memory.
    pub(crate) fn link(&mut self, owning_id: Option<&str>, referenced_id: &str) {
        self.capture(referenced_id);
        self.map.assign_reference(owning_id, referenced_id);
    }

    /// Install a link read from storage.
    pub(crate) fn link_persisted(&mut self, owning_id: &str, referenced_id: &str) {
        self.map.assign_reference(Some(owning_id), referenced_id);
        if let Some(ids) = self.originals.get_mut(referenced_id) {
            if self.def.is_one_to_one() {
                ids.clear();
            }
            if !ids.iter().any(|id| id == owning_id) {
                ids.push(owning_id.to_string());
            }
        }
    }

    /// Note a storage link without touching the current references.
    pub(crate) fn remember_persisted(&mut self, owning_id: &str, referenced_id: &str) {
        let ids = self.originals.entry(referenced_id.to_string()).or_default();
        if self.def.is_one_to_one() {
            ids.clear();
        }
        if !ids.iter().any(|id| id == owning_id) {
            ids.push(owning_id.to_string());
        }
    }

    pub(crate) fn unlink(&mut self, referenced_id: &str, owning_id: &str) {
        self.capture(referenced_id);
        self.map.remove_owning_reference(referenced_id, owning_id);
    }

    pub(crate) fn rename_referenced(&mut self, old_id: &str, new_id: &str) {
        self.map.rename_referenced_id(old_id, new_id);
        if let Some(ids) = self.originals.remove(old_id) {
            self.originals.insert(new_id.to_string(), ids);
        }
    }

    pub(crate) fn rename_owning(&mut self, referenced_id: &str, old_id: &str, new_id: &str) {
        self.map.rename_owning_id(referenced_id, old_id, new_id);
        for ids in self.originals.values_mut() {
            for id in ids.iter_mut().filter(|id| *id == old_id) {
                *id = new_id.to_string();
            }
        }
    }

    /// Owning ids of `referenced_id` before any unflushed change.
    pub fn original_owning_ids(&self, referenced_id: &str) -> Vec<String> {
        match self.originals.get(referenced_id) {
            Some(ids) => ids.clone(),
            None => self
                .map
                .owning(referenced_id)
                .map(Reference::ids)
                .unwrap_or_default(),
        }
    }

    pub(crate) fn forget_referenced(&mut self, referenced_id: &str) {
        self.map.remove_referenced(referenced_id);
        self.originals.remove(referenced_id);
    }

    pub(crate) fn reset_originals(&mut self) {
        self.originals.clear();
    }

    pub(crate) fn clear(&mut self) {
        self.map.clear();
        self.originals.clear();
    }
}

impl<C: Connection> Session<C> {
    /// Override the delete action of a relation.
    pub fn set_on_delete(&mut self, relation: &str, action: ReferentialAction) -> Result<()> {
        let id = self.relation_id(relation)?;
        self.relations[id].def.on_delete = action;
        Ok(())
    }

    pub(crate) fn relation_id(&self, name: &str) -> Result<RelationId> {
        self.relation_index.get(name).copied().ok_or_else(|| {
            Error::relation(
                RelationErrorKind::UnknownRecord,
                name,
                format!("Relation '{name}' is not defined!"),
            )
        })
    }

    /// Record registered under `internal_id` in the repository of `table`.
    pub(crate) fn lookup(&self, table: &str, internal_id: &str) -> Option<Oid> {
        self.table_index
            .get(table)
            .and_then(|idx| self.tables[*idx].repository().get(internal_id))
    }

    fn check_table(&self, oid: Oid, expected: &str, relation: &str) -> Result<()> {
        let actual = self.record(oid)?.table();
        if actual == expected {
            Ok(())
        } else {
            Err(Error::relation(
                RelationErrorKind::WrongTable,
                relation,
                format!(
                    "Record of table '{actual}' cannot be related through '{relation}', expected table '{expected}'!"
                ),
            ))
        }
    }

    /// Internal id the owner currently points at.
    ///
    /// Owners pointing at an unsaved record have no foreign key yet; for them
    /// the `_<oid>` id of the mapped record is returned.
    pub(crate) fn old_referenced_id(&self, r: RelationId, owner: Oid) -> Result<Option<String>> {
        let relation = &self.relations[r];
        let fk = self
            .record(owner)?
            .get(&relation.def.owning_field)
            .and_then(Value::identifier_string);
        Ok(fk.or_else(|| relation.map.field_mapping(owner).map(Oid::new_record_id)))
    }

    /// Referenced record of `owner`, if it is loaded.
    pub(crate) fn loaded_referenced(&self, r: RelationId, owner: Oid) -> Result<Option<Oid>> {
        let relation = &self.relations[r];
        if let Some(target) = relation.map.field_mapping(owner) {
            return Ok(Some(target));
        }
        Ok(self
            .record(owner)?
            .get(&relation.def.owning_field)
            .and_then(Value::identifier_string)
            .and_then(|id| self.lookup(&relation.def.ref_table, &id)))
    }

    /// Owners of `referenced` that are loaded.
    pub(crate) fn loaded_owners(&self, r: RelationId, referenced: Oid) -> Result<Vec<Oid>> {
        let relation = &self.relations[r];
        let id = self.internal_id(referenced)?;
        let mut owners = Vec::new();
        let mut push = |oid: Oid| {
            if !owners.contains(&oid) {
                owners.push(oid);
            }
        };
        if let Some(reference) = relation.map.owning(&id) {
            for owner_id in reference.ids() {
                if let Some(oid) = self.lookup(&relation.def.owning_table, &owner_id) {
                    push(oid);
                }
            }
        }
        if let Some(members) = relation.map.related_collection(referenced) {
            members.iter().copied().for_each(&mut push);
        }
        relation
            .map
            .owners_mapped_to(referenced)
            .into_iter()
            .for_each(&mut push);
        Ok(owners)
    }

    // ========================================================================
    // Reading
    // ========================================================================

    pub(crate) fn read_reference(
        &mut self,
        r: RelationId,
        direction: Direction,
        oid: Oid,
    ) -> Result<Member> {
        let relation = &self.relations[r];
        match direction {
            Direction::ToReferenced => {
                let fk = self
                    .record(oid)?
                    .get(&relation.def.owning_field)
                    .and_then(Value::identifier_string);
                match fk {
                    Some(id) => Ok(self
                        .lookup(&relation.def.ref_table, &id)
                        .map_or(Member::NotReady, |target| Member::One(Some(target)))),
                    None => Ok(Member::One(relation.map.field_mapping(oid))),
                }
            }
            Direction::ToOwning if relation.def.is_one_to_one() => {
                let record = self.record(oid)?;
                match relation.map.owning(&record.internal_id()) {
                    Some(Reference::One(Some(owner_id))) => Ok(self
                        .lookup(&relation.def.owning_table, owner_id)
                        .map_or(Member::NotReady, |owner| Member::One(Some(owner)))),
                    Some(_) => Ok(Member::One(None)),
                    None if !record.exists() => Ok(Member::One(None)),
                    None => Ok(Member::NotReady),
                }
            }
            Direction::ToOwning => {
                if let Some(members) = relation.map.related_collection(oid) {
                    return Ok(Member::Many(members.to_vec()));
                }
                Ok(self
                    .create_related_collection(r, oid)?
                    .map_or(Member::NotReady, Member::Many))
            }
        }
    }

    /// Materialize the owners of `referenced` as a collection.
    ///
    /// Returns `None` when an owner is known by id but not loaded; no partial
    /// collection is ever stored.
    pub(crate) fn create_related_collection(
        &mut self,
        r: RelationId,
        referenced: Oid,
    ) -> Result<Option<Vec<Oid>>> {
        let relation = &self.relations[r];
        if !relation.def.is_one_to_many() {
            return Err(Error::relation(
                RelationErrorKind::NotACollection,
                &relation.def.name,
                format!(
                    "One-to-one relation '{}' has no collection side!",
                    relation.def.name
                ),
            ));
        }
        let record = self.record(referenced)?;
        let members = match relation.map.owning(&record.internal_id()) {
            Some(reference) => {
                let mut members = Vec::new();
                for owner_id in reference.ids() {
                    match self.lookup(&relation.def.owning_table, &owner_id) {
                        Some(owner) => members.push(owner),
                        None => return Ok(None),
                    }
                }
                members
            }
            None if !record.exists() => Vec::new(),
            None => return Ok(None),
        };
        self.relations[r]
            .map
            .set_related_collection(referenced, members.clone());
        Ok(Some(members))
    }

    // ========================================================================
    // Writing
    // ========================================================================

    pub(crate) fn write_reference(
        &mut self,
        r: RelationId,
        direction: Direction,
        oid: Oid,
        alias: &str,
        assign: Assign,
    ) -> Result<()> {
        let def = self.relations[r].def.clone();
        match (direction, assign) {
            (Direction::ToReferenced, Assign::Record(target)) => {
                if let Some(target) = target {
                    self.check_table(target, &def.ref_table, &def.name)?;
                }
                self.update_record_reference(r, Some(oid), target)
            }
            (Direction::ToOwning, Assign::Record(owner)) if def.is_one_to_one() => {
                if let Some(owner) = owner {
                    self.check_table(owner, &def.owning_table, &def.name)?;
                }
                self.update_record_reference(r, owner, Some(oid))
            }
            (Direction::ToOwning, Assign::Collection(members)) if def.is_one_to_many() => {
                self.update_collection_reference(r, oid, members)
            }
            (direction, _) => {
                let expected = if def.yields_collection(direction) {
                    "collection"
                } else {
                    "record"
                };
                Err(Error::reference_shape(
                    def.source_table(direction),
                    alias,
                    expected,
                ))
            }
        }
    }

    /// Point `owner` at `referenced` and keep both sides consistent.
    ///
    /// Either argument may be `None`: without an owner the referenced record
    /// loses its one-to-one owner, without a referenced record the owner is
    /// unlinked.
    pub(crate) fn update_record_reference(
        &mut self,
        r: RelationId,
        owner: Option<Oid>,
        referenced: Option<Oid>,
    ) -> Result<()> {
        if owner.is_none() && referenced.is_none() {
            return Ok(());
        }
        let def = self.relations[r].def.clone();
        let previous = match owner {
            Some(owner) => self.old_referenced_id(r, owner)?,
            None => None,
        };
        let referenced_id = referenced.map(|oid| self.internal_id(oid)).transpose()?;

        if def.is_one_to_one() {
            if let Some(referenced_id) = &referenced_id {
                let stale = match self.relations[r].map.owning(referenced_id) {
                    Some(Reference::One(Some(prev))) => self.lookup(&def.owning_table, prev),
                    _ => None,
                };
                if let Some(stale) = stale.filter(|prev| Some(*prev) != owner) {
                    self.detach_owner(r, stale)?;
                }
            }
        }

        let mut owner_id = None;
        if let Some(owner) = owner {
            let (value, mapped) = match referenced {
                Some(target) => {
                    let record = self.record(target)?;
                    if record.exists() {
                        (record.get(&def.ref_field).cloned().unwrap_or_default(), None)
                    } else {
                        (Value::Null, Some(target))
                    }
                }
                None => (Value::Null, None),
            };
            self.write_foreign_key(r, owner, value)?;
            let map = self.relations[r].map_mut();
            match mapped {
                Some(target) => map.set_field_mapping(owner, target),
                None => {
                    map.remove_field_mapping(owner);
                }
            }
            let id = self.internal_id(owner)?;
            if let Some(previous) = previous.filter(|p| Some(p) != referenced_id.as_ref()) {
                self.remove_owning_link(r, owner, &id, &previous);
            }
            owner_id = Some(id);
        }

        if let Some(referenced_id) = referenced_id {
            let relation = &mut self.relations[r];
            relation.link(owner_id.as_deref(), &referenced_id);
            if let (Some(owner), Some(referenced)) = (owner, referenced) {
                if def.is_one_to_many() {
                    relation.map.push_to_collection(referenced, owner);
                }
            }
        }
        tracing::trace!(relation = %def.name, ?owner, ?referenced, "reference updated");
        Ok(())
    }

    fn write_foreign_key(&mut self, r: RelationId, owner: Oid, value: Value) -> Result<()> {
        let field = self.relations[r].def.owning_field.clone();
        match self.write_field_inner(owner, &field, value, Some(r))? {
            FieldWrite::Vetoed => Err(Error::Cancelled(CancelledError {
                operation: "preFieldChange",
                table: self.relations[r].def.owning_table.clone(),
            })),
            FieldWrite::Changed | FieldWrite::Unchanged => Ok(()),
        }
    }

    /// Null the foreign key of an owner that lost its one-to-one target.
    fn detach_owner(&mut self, r: RelationId, owner: Oid) -> Result<()> {
        tracing::debug!(relation = %self.relations[r].def.name, oid = owner.0, "detaching previous owner");
        self.write_foreign_key(r, owner, Value::Null)?;
        self.relations[r].map_mut().remove_field_mapping(owner);
        Ok(())
    }

    fn remove_owning_link(&mut self, r: RelationId, owner: Oid, owner_id: &str, referenced_id: &str) {
        let referenced = if self.relations[r].def.is_one_to_many() {
            self.lookup(&self.relations[r].def.ref_table, referenced_id)
        } else {
            None
        };
        let relation = &mut self.relations[r];
        relation.unlink(referenced_id, owner_id);
        if let Some(referenced) = referenced {
            relation.map.remove_from_collection(referenced, owner);
        }
    }

    fn set_owning_reference_by_foreign_key(
        &mut self,
        r: RelationId,
        owner: Oid,
        owner_id: &str,
        referenced_id: &str,
    ) -> Result<()> {
        let def = self.relations[r].def.clone();
        if def.is_one_to_one() {
            let stale = match self.relations[r].map.owning(referenced_id) {
                Some(Reference::One(Some(prev))) if prev != owner_id => {
                    self.lookup(&def.owning_table, prev)
                }
                _ => None,
            };
            if let Some(stale) = stale {
                self.detach_owner(r, stale)?;
            }
        }
        let referenced = self.lookup(&def.ref_table, referenced_id);
        let relation = &mut self.relations[r];
        relation.link(Some(owner_id), referenced_id);
        if let (Some(referenced), true) = (referenced, def.is_one_to_many()) {
            relation.map.push_to_collection(referenced, owner);
        }
        Ok(())
    }

    /// Foreign key of `owner` was written directly.
    pub(crate) fn on_owning_field_changed(
        &mut self,
        r: RelationId,
        owner: Oid,
        old: &Value,
        new: &Value,
    ) -> Result<()> {
        let previous = old
            .identifier_string()
            .or_else(|| self.relations[r].map.field_mapping(owner).map(Oid::new_record_id));
        self.relations[r].map_mut().remove_field_mapping(owner);
        let owner_id = self.internal_id(owner)?;
        if let Some(previous) = previous {
            self.remove_owning_link(r, owner, &owner_id, &previous);
        }
        if let Some(referenced_id) = new.identifier_string() {
            self.set_owning_reference_by_foreign_key(r, owner, &owner_id, &referenced_id)?;
        }
        Ok(())
    }

    /// Link an owner read from storage to its referenced id.
    pub(crate) fn link_hydrated_owner(&mut self, r: RelationId, owner: Oid) -> Result<()> {
        let def = &self.relations[r].def;
        let Some(referenced_id) = self
            .record(owner)?
            .get(&def.owning_field)
            .and_then(Value::identifier_string)
        else {
            return Ok(());
        };
        let referenced = self.lookup(&def.ref_table, &referenced_id);
        let one_to_many = def.is_one_to_many();
        let owner_id = self.internal_id(owner)?;

        if !one_to_many && self.claimed_in_memory(r, &referenced_id, &owner_id) {
            tracing::debug!(
                relation = %self.relations[r].def.name,
                referenced_id = %referenced_id,
                owning_id = %owner_id,
                "keeping unflushed one-to-one link"
            );
            self.relations[r].remember_persisted(&owner_id, &referenced_id);
            return Ok(());
        }

        let relation = &mut self.relations[r];
        relation.link_persisted(&owner_id, &referenced_id);
        if let (Some(referenced), true) = (referenced, one_to_many) {
            relation.map.push_to_collection(referenced, owner);
        }
        Ok(())
    }

    /// Whether another tracked owner still points at `referenced_id` through
    /// the one-to-one side of `r`.
    fn claimed_in_memory(&self, r: RelationId, referenced_id: &str, owner_id: &str) -> bool {
        let def = &self.relations[r].def;
        let Some(Reference::One(Some(current))) = self.relations[r].map.owning(referenced_id) else {
            return false;
        };
        if current == owner_id {
            return false;
        }
        let Some(other) = self.lookup(&def.owning_table, current) else {
            return false;
        };
        self.records.get(&other).is_some_and(|record| {
            record
                .get(&def.owning_field)
                .and_then(Value::identifier_string)
                .is_some_and(|id| id == referenced_id)
        })
    }

    /// Replace the owners of `referenced` with `members`.
    pub(crate) fn update_collection_reference(
        &mut self,
        r: RelationId,
        referenced: Oid,
        members: Vec<Oid>,
    ) -> Result<()> {
        let def = self.relations[r].def.clone();
        for member in &members {
            self.check_table(*member, &def.owning_table, &def.name)?;
        }
        for current in self.loaded_owners(r, referenced)? {
            if !members.contains(&current) {
                self.update_record_reference(r, Some(current), None)?;
            }
        }
        let mut unique = Vec::with_capacity(members.len());
        for member in members {
            if !unique.contains(&member) {
                unique.push(member);
            }
        }
        self.relations[r]
            .map_mut()
            .set_related_collection(referenced, unique.clone());
        for member in unique {
            self.update_record_reference(r, Some(member), Some(referenced))?;
        }
        Ok(())
    }

    fn collection_alias(&self, oid: Oid, alias: &str) -> Result<RelationId> {
        let table = self.table_of(oid)?;
        match table.relation_alias(alias) {
            Some((r, direction)) if self.relations[r].def.yields_collection(direction) => Ok(r),
            Some((_, direction)) => Err(Error::relation(
                RelationErrorKind::NotACollection,
                alias,
                format!(
                    "Alias '{alias}' on table '{}' is the {} side of a relation, not a collection!",
                    table.name(),
                    side_name(direction)
                ),
            )),
            None => Err(Error::unknown_member(table.name(), alias)),
        }
    }

    /// Add `member` to the one-to-many side `alias` of `oid`.
    pub fn add_to_collection(&mut self, oid: Oid, alias: &str, member: Oid) -> Result<()> {
        let r = self.collection_alias(oid, alias)?;
        let owning_table = self.relations[r].def.owning_table.clone();
        self.check_table(member, &owning_table, alias)?;
        self.update_record_reference(r, Some(member), Some(oid))
    }

    /// Remove `member` from the one-to-many side `alias` of `oid`.
    ///
    /// Does nothing if `member` does not point at `oid`.
    pub fn remove_from_collection(&mut self, oid: Oid, alias: &str, member: Oid) -> Result<()> {
        let r = self.collection_alias(oid, alias)?;
        if self.loaded_referenced(r, member)? == Some(oid) {
            self.update_record_reference(r, Some(member), None)?;
        }
        Ok(())
    }

    // ========================================================================
    // Identifiers
    // ========================================================================

    /// Give a new record its identifier.
    ///
    /// Writes the identifier fields, marks the record persisted, re-keys its
    /// repository entry and propagates the new id to every relation the
    /// record takes part in.
    pub fn assign_identifier(&mut self, oid: Oid, values: Vec<Value>) -> Result<()> {
        let idx = self.table_idx_of(oid)?;
        let table = &self.tables[idx];
        let fields = table.identifier_fields().to_vec();
        if values.len() != fields.len() {
            return Err(Error::record(
                RecordErrorKind::IdentifierMismatch,
                table.name(),
                format!(
                    "Expected {} identifier value(s), got {}!",
                    fields.len(),
                    values.len()
                ),
            ));
        }
        let Some(new_id) = identifier_string(&values) else {
            return Err(Error::record(
                RecordErrorKind::IdentifierMismatch,
                table.name(),
                "Identifier values must not be NULL!",
            ));
        };
        let table_name = table.name().to_string();

        let record = self.record_mut(oid)?;
        if record.exists() {
            return Err(Error::record(
                RecordErrorKind::IdentifierMismatch,
                table_name,
                format!("Record '{}' already has an identifier!", record.internal_id()),
            ));
        }
        let old_id = record.internal_id();
        for (field, value) in fields.iter().zip(values) {
            record.write_clean(field, value);
        }
        record.clear_modified();
        record.mark_persisted(new_id.clone());
        tracing::debug!(table = %table_name, old_id = %old_id, new_id = %new_id, "identifier assigned");
        self.propagate_identifier(oid, &old_id, &new_id)
    }

    /// Re-key `oid` from `old_id` to `new_id` everywhere.
    pub(crate) fn propagate_identifier(&mut self, oid: Oid, old_id: &str, new_id: &str) -> Result<()> {
        if old_id == new_id {
            return Ok(());
        }
        let idx = self.table_idx_of(oid)?;
        for r in self.tables[idx].referenced_relations().to_vec() {
            self.update_record_identifier(r, oid, old_id, new_id)?;
        }
        for r in self.tables[idx].owning_relations().to_vec() {
            if let Some(referenced_id) = self.old_referenced_id(r, oid)? {
                self.relations[r].rename_owning(&referenced_id, old_id, new_id);
            }
        }
        self.tables[idx]
            .repository_mut()
            .refresh_identity(oid, old_id, new_id)
    }

    /// Rewrite the foreign keys of every owner of `referenced` after its
    /// identifier changed from `old_id` to `new_id`.
    pub(crate) fn update_record_identifier(
        &mut self,
        r: RelationId,
        referenced: Oid,
        old_id: &str,
        new_id: &str,
    ) -> Result<()> {
        if !self.identifier_guard.insert((r, referenced)) {
            tracing::trace!(relation = %self.relations[r].def.name, oid = referenced.0, "identifier propagation already running");
            return Ok(());
        }
        let result = self.rewrite_owner_keys(r, referenced, old_id, new_id);
        self.identifier_guard.remove(&(r, referenced));
        result
    }

    fn rewrite_owner_keys(
        &mut self,
        r: RelationId,
        referenced: Oid,
        old_id: &str,
        new_id: &str,
    ) -> Result<()> {
        let def = self.relations[r].def.clone();
        let mut owners = Vec::new();
        if let Some(reference) = self.relations[r].map.owning(old_id) {
            for owner_id in reference.ids() {
                if let Some(owner) = self.lookup(&def.owning_table, &owner_id) {
                    owners.push(owner);
                }
            }
        }
        for owner in self.relations[r].map.owners_mapped_to(referenced) {
            if !owners.contains(&owner) {
                owners.push(owner);
            }
        }

        self.relations[r].rename_referenced(old_id, new_id);
        let value = self
            .record(referenced)?
            .get(&def.ref_field)
            .cloned()
            .unwrap_or_default();
        for owner in &owners {
            self.relations[r].map_mut().remove_field_mapping(*owner);
            self.write_foreign_key(r, *owner, value.clone())?;
            if let Some(flushing) = self.flushing.as_mut() {
                flushing.insert(*owner);
            }
        }
        tracing::debug!(
            relation = %def.name,
            old_id = %old_id,
            new_id = %new_id,
            owners = owners.len(),
            "identifier propagated"
        );
        Ok(())
    }

    /// Internal ids `alias` pointed to before the first unflushed change.
    pub fn original_referenced_ids(&self, oid: Oid, alias: &str) -> Result<Vec<String>> {
        let table = self.table_of(oid)?;
        let Some((r, direction)) = table.relation_alias(alias) else {
            return Err(Error::unknown_member(table.name(), alias));
        };
        let relation = &self.relations[r];
        let record = self.record(oid)?;
        match direction {
            Direction::ToReferenced => Ok(record
                .original_value(&relation.def.owning_field)
                .and_then(Value::identifier_string)
                .into_iter()
                .collect()),
            Direction::ToOwning => Ok(relation.original_owning_ids(&record.internal_id())),
        }
    }

    /// Remove every link of a deleted record.
    pub(crate) fn unlink_record(&mut self, oid: Oid) -> Result<()> {
        let idx = self.table_idx_of(oid)?;
        let internal_id = self.internal_id(oid)?;
        for r in self.tables[idx].referenced_relations().to_vec() {
            let relation = &mut self.relations[r];
            for owner in relation.map.owners_mapped_to(oid) {
                relation.map.remove_field_mapping(owner);
            }
            relation.forget_referenced(&internal_id);
        }
        for r in self.tables[idx].owning_relations().to_vec() {
            if let Some(referenced_id) = self.old_referenced_id(r, oid)? {
                self.remove_owning_link(r, oid, &internal_id, &referenced_id);
            }
            self.relations[r].map_mut().remove_field_mapping(oid);
        }
        let touched: Vec<RelationId> = self.tables[idx]
            .referenced_relations()
            .iter()
            .chain(self.tables[idx].owning_relations())
            .copied()
            .collect();
        for r in touched {
            self.relations[r].map_mut().forget_record(oid);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockConnection, fixture_schema};
    use std::collections::HashMap;

    fn session() -> Session<MockConnection> {
        Session::new(MockConnection::new(), &fixture_schema()).unwrap()
    }

    fn persisted(session: &mut Session<MockConnection>, table: &str, values: &[(&str, Value)]) -> Oid {
        let row: HashMap<String, Value> = values
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect();
        session.hydrate(table, row).unwrap()
    }

    #[test]
    fn one_to_one_symmetry() {
        let mut session = session();
        let user = session.create_record("user", [("username", "JohnD")]).unwrap();
        let author = session.create_record("author", [("lastname", "Doe")]).unwrap();

        session.link(user, "Author", Some(author)).unwrap();
        assert_eq!(session.related(user, "Author").unwrap(), Some(author));
        assert_eq!(session.related(author, "User").unwrap(), Some(user));

        session.link(user, "Author", None).unwrap();
        assert_eq!(session.related(user, "Author").unwrap(), None);
        assert_eq!(session.related(author, "User").unwrap(), None);
    }

    #[test]
    fn relinking_one_to_one_detaches_previous_owner() {
        let mut session = session();
        let user = persisted(&mut session, "user", &[("id", Value::Int(1))]);
        let first = persisted(
            &mut session,
            "author",
            &[("id", Value::Int(10)), ("user_id", Value::Int(1))],
        );
        let second = persisted(&mut session, "author", &[("id", Value::Int(11))]);
        assert_eq!(session.related(user, "Author").unwrap(), Some(first));

        session.link(second, "User", Some(user)).unwrap();
        assert_eq!(session.related(user, "Author").unwrap(), Some(second));
        assert_eq!(session.field(first, "user_id").unwrap(), Value::Null);
        assert_eq!(session.field(second, "user_id").unwrap(), Value::Int(1));
    }

    #[test]
    fn unsaved_target_is_tracked_by_field_mapping() {
        let mut session = session();
        let article = session.new_record("article").unwrap();
        let author = session.new_record("author").unwrap();
        session.link(article, "Author", Some(author)).unwrap();

        assert_eq!(session.field(article, "author_id").unwrap(), Value::Null);
        let map = session.relation("article.author_id").unwrap().reference_map();
        assert!(map.is_field_mapped_with(article, author));
        assert_eq!(session.collection(author, "Article").unwrap(), Some(vec![article]));

        session.assign_identifier(author, vec![Value::Int(5)]).unwrap();
        assert_eq!(session.field(article, "author_id").unwrap(), Value::Int(5));
        let map = session.relation("article.author_id").unwrap().reference_map();
        assert!(!map.has_field_mapping(article));
        assert!(map.is_referenced("5"));
        assert_eq!(session.get_by_internal_id("author", "5").unwrap(), Some(author));
    }

    #[test]
    fn setting_foreign_key_directly_updates_back_references() {
        let mut session = session();
        let first = persisted(&mut session, "author", &[("id", Value::Int(1)), ("user_id", Value::Int(7))]);
        let second = persisted(&mut session, "author", &[("id", Value::Int(2)), ("user_id", Value::Int(8))]);
        let article = persisted(
            &mut session,
            "article",
            &[("id", Value::Int(3)), ("author_id", Value::Int(1))],
        );
        assert_eq!(session.collection(first, "Article").unwrap(), Some(vec![article]));
        assert_eq!(session.collection(second, "Article").unwrap(), None);

        session.set_field(article, "author_id", 2).unwrap();
        assert_eq!(session.collection(first, "Article").unwrap(), Some(vec![]));
        assert_eq!(session.collection(second, "Article").unwrap(), Some(vec![article]));
        assert_eq!(session.related(article, "Author").unwrap(), Some(second));
    }

    #[test]
    fn collection_assignment_replaces_members() {
        let mut session = session();
        let author = session.new_record("author").unwrap();
        let a = session.new_record("article").unwrap();
        let b = session.new_record("article").unwrap();
        let c = session.new_record("article").unwrap();

        session
            .set(author, "Article", Assign::Collection(vec![a, b, a]))
            .unwrap();
        assert_eq!(session.collection(author, "Article").unwrap(), Some(vec![a, b]));

        session
            .set(author, "Article", Assign::Collection(vec![b, c]))
            .unwrap();
        assert_eq!(session.collection(author, "Article").unwrap(), Some(vec![b, c]));
        assert_eq!(session.related(a, "Author").unwrap(), None);

        session.remove_from_collection(author, "Article", b).unwrap();
        assert_eq!(session.collection(author, "Article").unwrap(), Some(vec![c]));
        session.add_to_collection(author, "Article", a).unwrap();
        assert_eq!(session.collection(author, "Article").unwrap(), Some(vec![c, a]));
    }

    #[test]
    fn collection_of_unloaded_owner_is_not_ready() {
        let mut session = session();
        let author = persisted(&mut session, "author", &[("id", Value::Int(1))]);
        assert_eq!(session.get(author, "Article").unwrap(), Member::NotReady);
        assert_eq!(session.collection(author, "Article").unwrap(), None);

        let user = persisted(&mut session, "user", &[("id", Value::Int(4))]);
        assert_eq!(session.get(user, "Author").unwrap(), Member::NotReady);
    }

    #[test]
    fn wrong_table_and_wrong_side() {
        let mut session = session();
        let article = session.new_record("article").unwrap();
        let tag = session.new_record("tag").unwrap();
        let author = session.new_record("author").unwrap();
        assert!(matches!(
            session.link(article, "Author", Some(tag)),
            Err(Error::Relation(e)) if e.kind == RelationErrorKind::WrongTable
        ));
        assert!(matches!(
            session.collection(article, "Author"),
            Err(Error::Relation(e)) if e.kind == RelationErrorKind::NotACollection
        ));
        assert!(matches!(
            session.add_to_collection(article, "Author", author),
            Err(Error::Relation(e)) if e.kind == RelationErrorKind::NotACollection
        ));
        assert!(matches!(
            session.related(author, "Article"),
            Err(Error::Relation(e)) if e.kind == RelationErrorKind::NotARecord
        ));
    }

    #[test]
    fn assign_identifier_checks_field_count() {
        let mut session = session();
        let link = session.new_record("article2tag").unwrap();
        assert!(matches!(
            session.assign_identifier(link, vec![Value::Int(1)]),
            Err(Error::Record(e)) if e.kind == RecordErrorKind::IdentifierMismatch
        ));
        session
            .assign_identifier(link, vec![Value::Int(1), Value::Int(2)])
            .unwrap();
        assert_eq!(session.internal_id(link).unwrap(), "1|2");
        assert!(session.assign_identifier(link, vec![Value::Int(3), Value::Int(4)]).is_err());
    }

    #[test]
    fn self_reference_is_rekeyed_once() {
        let mut session = session();
        let editor = session.new_record("author").unwrap();
        let author = session.new_record("author").unwrap();
        session.link(author, "Editor", Some(editor)).unwrap();
        session.link(editor, "Editor", Some(editor)).unwrap();

        session.assign_identifier(editor, vec![Value::Int(9)]).unwrap();
        assert_eq!(session.field(author, "editor_id").unwrap(), Value::Int(9));
        assert_eq!(session.field(editor, "editor_id").unwrap(), Value::Int(9));
        let mut edited = session.collection(editor, "Author").unwrap().unwrap();
        edited.sort();
        let mut expected = vec![editor, author];
        expected.sort();
        assert_eq!(edited, expected);
    }

    #[test]
    fn original_references_survive_in_memory_changes() {
        let mut session = session();
        let first = persisted(&mut session, "author", &[("id", Value::Int(1))]);
        let second = persisted(&mut session, "author", &[("id", Value::Int(2))]);
        let article = persisted(
            &mut session,
            "article",
            &[("id", Value::Int(3)), ("author_id", Value::Int(1))],
        );
        session.link(article, "Author", Some(second)).unwrap();

        assert_eq!(session.original_referenced_ids(article, "Author").unwrap(), vec!["1"]);
        assert_eq!(session.original_referenced_ids(first, "Article").unwrap(), vec!["3"]);
        assert!(session.original_referenced_ids(second, "Article").unwrap().is_empty());
        assert_eq!(session.relation("article.author_id").unwrap().original_owning_ids("2"), Vec::<String>::new());
    }

    #[test]
    fn on_delete_override() {
        let mut session = session();
        session
            .set_on_delete("author.user_id", ReferentialAction::SetNull)
            .unwrap();
        assert_eq!(
            session.relation("author.user_id").unwrap().on_delete(),
            ReferentialAction::SetNull
        );
        assert!(session.set_on_delete("missing", ReferentialAction::Cascade).is_err());
    }
}
