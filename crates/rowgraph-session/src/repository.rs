//! Identity map of one table.
//!
//! The repository maps internal ids to record handles. Every live record of
//! the table is registered, persisted records under their identifier string
//! and new records under their `_<oid>` marker, so one internal id always
//! resolves to one record.

use std::collections::HashMap;

use rowgraph_core::{Error, RecordErrorKind, Result};

use crate::record::Oid;

#[derive(Debug, Clone, Default)]
pub struct Repository {
    table: String,
    entries: HashMap<String, Oid>,
}

impl Repository {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            entries: HashMap::new(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Register `oid` under `internal_id`.
    ///
    /// Registering the same handle twice is a no-op; registering a different
    /// handle under a taken id is an identity violation.
    pub fn add(&mut self, internal_id: impl Into<String>, oid: Oid) -> Result<()> {
        let internal_id = internal_id.into();
        match self.entries.get(&internal_id) {
            Some(existing) if *existing == oid => Ok(()),
            Some(existing) => Err(Error::record(
                RecordErrorKind::AlreadyTracked,
                &self.table,
                format!(
                    "Record '{internal_id}' is already tracked by handle {existing}, refusing handle {oid}!"
                ),
            )),
            None => {
                tracing::trace!(table = %self.table, internal_id = %internal_id, oid = oid.0, "repository add");
                self.entries.insert(internal_id, oid);
                Ok(())
            }
        }
    }

    pub fn get(&self, internal_id: &str) -> Option<Oid> {
        self.entries.get(internal_id).copied()
    }

    pub fn contains(&self, internal_id: &str) -> bool {
        self.entries.contains_key(internal_id)
    }

    /// Move a record from `old_id` to `new_id`.
    pub fn refresh_identity(&mut self, oid: Oid, old_id: &str, new_id: impl Into<String>) -> Result<()> {
        if self.entries.get(old_id) == Some(&oid) {
            self.entries.remove(old_id);
        }
        let new_id = new_id.into();
        tracing::debug!(table = %self.table, old_id = %old_id, new_id = %new_id, "re-keying record");
        self.add(new_id, oid)
    }

    pub fn remove(&mut self, internal_id: &str) -> Option<Oid> {
        self.entries.remove(internal_id)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Oid)> {
        self.entries.iter().map(|(id, oid)| (id.as_str(), *oid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowgraph_core::Error;

    #[test]
    fn same_id_resolves_to_same_handle() {
        let mut repo = Repository::new("user");
        repo.add("1", Oid(1)).unwrap();
        repo.add("1", Oid(1)).unwrap();
        assert_eq!(repo.get("1"), repo.get("1"));
        assert_eq!(repo.len(), 1);
    }

    #[test]
    fn conflicting_handle_is_rejected() {
        let mut repo = Repository::new("user");
        repo.add("1", Oid(1)).unwrap();
        match repo.add("1", Oid(2)) {
            Err(Error::Record(e)) => assert_eq!(e.kind, RecordErrorKind::AlreadyTracked),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn refresh_identity_moves_entry() {
        let mut repo = Repository::new("author");
        repo.add("_4", Oid(4)).unwrap();
        repo.refresh_identity(Oid(4), "_4", "10").unwrap();
        assert!(!repo.contains("_4"));
        assert_eq!(repo.get("10"), Some(Oid(4)));
    }

    #[test]
    fn clear_drops_everything() {
        let mut repo = Repository::new("tag");
        repo.add("1", Oid(1)).unwrap();
        repo.add("_2", Oid(2)).unwrap();
        repo.clear();
        assert!(repo.is_empty());
    }
}
