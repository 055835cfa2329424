//! Bidirectional reference index of one relation.
//!
//! - `references`: referenced internal id -> owning internal id (one-to-one)
//!   or owning internal ids (one-to-many). A key that is present means the
//!   owning side is known for that referenced record; a one-to-one key may
//!   map to `None` ("known to have no owner").
//! - `related_collections`: referenced record handle -> materialized
//!   collection of owning record handles.
//! - `owning_field_oid_mapping`: owning record handle -> referenced record
//!   handle, for owners pointing at a record that has no identifier yet.

use std::collections::HashMap;

use rowgraph_core::{Cardinality, Error, Result};

use crate::record::Oid;

/// Owning side of one referenced record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    One(Option<String>),
    Many(Vec<String>),
}

impl Reference {
    /// Owning internal ids, in link order.
    pub fn ids(&self) -> Vec<String> {
        match self {
            Reference::One(id) => id.iter().cloned().collect(),
            Reference::Many(ids) => ids.clone(),
        }
    }

    pub fn contains(&self, owning_id: &str) -> bool {
        match self {
            Reference::One(id) => id.as_deref() == Some(owning_id),
            Reference::Many(ids) => ids.iter().any(|id| id == owning_id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReferenceMap {
    relation: String,
    cardinality: Cardinality,
    references: HashMap<String, Reference>,
    related_collections: HashMap<Oid, Vec<Oid>>,
    owning_field_oid_mapping: HashMap<Oid, Oid>,
}

impl ReferenceMap {
    pub fn new(relation: impl Into<String>, cardinality: Cardinality) -> Self {
        Self {
            relation: relation.into(),
            cardinality,
            references: HashMap::new(),
            related_collections: HashMap::new(),
            owning_field_oid_mapping: HashMap::new(),
        }
    }

    fn is_one_to_one(&self) -> bool {
        self.cardinality == Cardinality::OneToOne
    }

    /// Whether owning ids are known for `id`.
    ///
    /// A one-to-one null reference counts as referenced only through
    /// [`has_null_reference`](Self::has_null_reference).
    pub fn is_referenced(&self, id: &str) -> bool {
        match self.references.get(id) {
            Some(Reference::One(owner)) => owner.is_some(),
            Some(Reference::Many(_)) => true,
            None => false,
        }
    }

    /// Whether `id` is known to have no one-to-one owner.
    pub fn has_null_reference(&self, id: &str) -> bool {
        matches!(self.references.get(id), Some(Reference::One(None)))
    }

    /// Whether the owning side of `id` has been recorded at all.
    pub fn is_known(&self, id: &str) -> bool {
        self.references.contains_key(id)
    }

    pub fn owning(&self, id: &str) -> Option<&Reference> {
        self.references.get(id)
    }

    /// Replace the owning side of `id`; the shape must match the cardinality.
    pub fn set_reference(&mut self, id: impl Into<String>, reference: Reference) -> Result<()> {
        let shape_ok = matches!(
            (&reference, self.cardinality),
            (Reference::One(_), Cardinality::OneToOne) | (Reference::Many(_), Cardinality::OneToMany)
        );
        if !shape_ok {
            let expected = if self.is_one_to_one() {
                "single owning id"
            } else {
                "list of owning ids"
            };
            return Err(Error::reference_shape(&self.relation, &self.relation, expected));
        }
        self.references.insert(id.into(), reference);
        Ok(())
    }

    /// Append an owning id to a one-to-many entry, without duplicates.
    pub fn add_reference(&mut self, id: &str, owning_id: &str) {
        match self
            .references
            .entry(id.to_string())
            .or_insert_with(|| Reference::Many(Vec::new()))
        {
            Reference::Many(ids) => {
                if !ids.iter().any(|existing| existing == owning_id) {
                    ids.push(owning_id.to_string());
                }
            }
            one @ Reference::One(_) => *one = Reference::One(Some(owning_id.to_string())),
        }
    }

    /// Set (one-to-one) or add (one-to-many) a link.
    pub(crate) fn assign_reference(&mut self, owning_id: Option<&str>, referenced_id: &str) {
        if self.is_one_to_one() {
            self.references.insert(
                referenced_id.to_string(),
                Reference::One(owning_id.map(str::to_string)),
            );
        } else if let Some(owning_id) = owning_id {
            self.add_reference(referenced_id, owning_id);
        }
    }

    /// Drop one owning id from the entry of `referenced_id`.
    pub fn remove_owning_reference(&mut self, referenced_id: &str, owning_id: &str) {
        match self.references.get_mut(referenced_id) {
            Some(Reference::Many(ids)) => ids.retain(|id| id != owning_id),
            Some(Reference::One(owner)) if owner.as_deref() == Some(owning_id) => *owner = None,
            _ => {}
        }
    }

    /// Rename an owning id wherever it appears under `referenced_id`.
    pub(crate) fn rename_owning_id(&mut self, referenced_id: &str, old_id: &str, new_id: &str) {
        match self.references.get_mut(referenced_id) {
            Some(Reference::Many(ids)) => {
                for id in ids.iter_mut().filter(|id| *id == old_id) {
                    *id = new_id.to_string();
                }
            }
            Some(Reference::One(Some(owner))) if owner == old_id => *owner = new_id.to_string(),
            _ => {}
        }
    }

    /// Move the entry of a referenced record to a new key.
    pub(crate) fn rename_referenced_id(&mut self, old_id: &str, new_id: &str) -> Option<Reference> {
        let moved = self.references.remove(old_id)?;
        let merged = match (self.references.remove(new_id), moved) {
            (Some(Reference::Many(mut existing)), Reference::Many(ids)) => {
                for id in ids {
                    if !existing.contains(&id) {
                        existing.push(id);
                    }
                }
                Reference::Many(existing)
            }
            (_, moved) => moved,
        };
        self.references.insert(new_id.to_string(), merged.clone());
        Some(merged)
    }

    pub(crate) fn remove_referenced(&mut self, id: &str) -> Option<Reference> {
        self.references.remove(id)
    }

    pub fn has_field_mapping(&self, owning_oid: Oid) -> bool {
        self.owning_field_oid_mapping.contains_key(&owning_oid)
    }

    pub fn field_mapping(&self, owning_oid: Oid) -> Option<Oid> {
        self.owning_field_oid_mapping.get(&owning_oid).copied()
    }

    pub fn is_field_mapped_with(&self, owning_oid: Oid, referenced_oid: Oid) -> bool {
        self.field_mapping(owning_oid) == Some(referenced_oid)
    }

    pub(crate) fn set_field_mapping(&mut self, owning_oid: Oid, referenced_oid: Oid) {
        self.owning_field_oid_mapping.insert(owning_oid, referenced_oid);
    }

    pub(crate) fn remove_field_mapping(&mut self, owning_oid: Oid) -> Option<Oid> {
        self.owning_field_oid_mapping.remove(&owning_oid)
    }

    /// Owners currently mapped to the unsaved record `referenced_oid`.
    pub fn owners_mapped_to(&self, referenced_oid: Oid) -> Vec<Oid> {
        let mut owners: Vec<Oid> = self
            .owning_field_oid_mapping
            .iter()
            .filter(|(_, target)| **target == referenced_oid)
            .map(|(owner, _)| *owner)
            .collect();
        owners.sort_unstable();
        owners
    }

    pub fn related_collection(&self, referenced_oid: Oid) -> Option<&[Oid]> {
        self.related_collections.get(&referenced_oid).map(Vec::as_slice)
    }

    pub(crate) fn set_related_collection(&mut self, referenced_oid: Oid, members: Vec<Oid>) {
        self.related_collections.insert(referenced_oid, members);
    }

    pub(crate) fn push_to_collection(&mut self, referenced_oid: Oid, owning_oid: Oid) {
        if let Some(members) = self.related_collections.get_mut(&referenced_oid) {
            if !members.contains(&owning_oid) {
                members.push(owning_oid);
            }
        }
    }

    pub(crate) fn remove_from_collection(&mut self, referenced_oid: Oid, owning_oid: Oid) {
        if let Some(members) = self.related_collections.get_mut(&referenced_oid) {
            members.retain(|oid| *oid != owning_oid);
        }
    }

    /// Forget a record on both sides.
    pub(crate) fn forget_record(&mut self, oid: Oid) {
        self.related_collections.remove(&oid);
        self.owning_field_oid_mapping.remove(&oid);
        for members in self.related_collections.values_mut() {
            members.retain(|member| *member != oid);
        }
    }

    /// Copy of the reference entries.
    pub fn mapping(&self) -> HashMap<String, Reference> {
        self.references.clone()
    }

    pub fn clear(&mut self) {
        self.references.clear();
        self.related_collections.clear();
        self.owning_field_oid_mapping.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_to_many_links_have_no_duplicates() {
        let mut map = ReferenceMap::new("article.author_id", Cardinality::OneToMany);
        map.assign_reference(Some("1"), "7");
        map.assign_reference(Some("1"), "7");
        map.assign_reference(Some("2"), "7");
        assert_eq!(map.owning("7").unwrap().ids(), vec!["1", "2"]);
        map.remove_owning_reference("7", "1");
        assert_eq!(map.owning("7").unwrap().ids(), vec!["2"]);
        assert!(map.is_referenced("7"));
        assert!(!map.has_null_reference("7"));
    }

    #[test]
    fn one_to_one_null_reference() {
        let mut map = ReferenceMap::new("author.user_id", Cardinality::OneToOne);
        map.assign_reference(None, "3");
        assert!(map.has_null_reference("3"));
        assert!(!map.is_referenced("3"));
        assert!(map.is_known("3"));
        map.assign_reference(Some("9"), "3");
        assert!(map.is_referenced("3"));
    }

    #[test]
    fn set_reference_checks_shape() {
        let mut one = ReferenceMap::new("author.user_id", Cardinality::OneToOne);
        assert!(one.set_reference("1", Reference::Many(vec![])).is_err());
        assert!(one.set_reference("1", Reference::One(Some("2".into()))).is_ok());

        let mut many = ReferenceMap::new("comment.user_id", Cardinality::OneToMany);
        match many.set_reference("1", Reference::One(None)) {
            Err(Error::ReferenceShape(e)) => assert_eq!(e.expected, "list of owning ids"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn renaming_keys_and_owners() {
        let mut map = ReferenceMap::new("comment.article_id", Cardinality::OneToMany);
        map.assign_reference(Some("_5"), "_2");
        map.rename_owning_id("_2", "_5", "11");
        map.rename_referenced_id("_2", "4");
        assert!(!map.is_known("_2"));
        assert_eq!(map.owning("4").unwrap().ids(), vec!["11"]);
    }

    #[test]
    fn field_mappings() {
        let mut map = ReferenceMap::new("author.user_id", Cardinality::OneToOne);
        map.set_field_mapping(Oid(2), Oid(1));
        assert!(map.is_field_mapped_with(Oid(2), Oid(1)));
        assert_eq!(map.owners_mapped_to(Oid(1)), vec![Oid(2)]);
        map.remove_field_mapping(Oid(2));
        assert!(!map.has_field_mapping(Oid(2)));
    }

    #[test]
    fn collections_stay_unique() {
        let mut map = ReferenceMap::new("comment.user_id", Cardinality::OneToMany);
        map.push_to_collection(Oid(1), Oid(2));
        assert!(map.related_collection(Oid(1)).is_none());
        map.set_related_collection(Oid(1), vec![Oid(2)]);
        map.push_to_collection(Oid(1), Oid(2));
        map.push_to_collection(Oid(1), Oid(3));
        assert_eq!(map.related_collection(Oid(1)), Some(&[Oid(2), Oid(3)][..]));
        map.clear();
        assert!(map.related_collection(Oid(1)).is_none());
    }
}
