//! Relation metadata.
//!
//! A relation is one foreign key seen from both ends. The owning table holds
//! the foreign key field; the referenced table holds the field it points to.
//! Each end is reached through its own alias:
//!
//! - `ref_alias` is used on an owning record and resolves to the referenced
//!   record (`article.Author`).
//! - `owning_alias` is used on a referenced record and resolves to the owning
//!   record (one-to-one) or the owning records (one-to-many) (`author.Article`).

use crate::field::ReferentialAction;
use std::fmt;

/// Relation cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cardinality {
    /// `1-1`: at most one owning record per referenced record.
    OneToOne,
    /// `1-m`: any number of owning records per referenced record.
    #[default]
    OneToMany,
}

impl Cardinality {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Cardinality::OneToOne => "1-1",
            Cardinality::OneToMany => "1-m",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "1-1" | "one-to-one" => Some(Cardinality::OneToOne),
            "1-m" | "one-to-many" => Some(Cardinality::OneToMany),
            _ => None,
        }
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which end of a relation an alias addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Alias used on an owning record; resolves to the referenced record.
    ToReferenced,
    /// Alias used on a referenced record; resolves to the owning record(s).
    ToOwning,
}

/// Static description of one named foreign key relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDef {
    pub name: String,
    pub owning_table: String,
    pub owning_field: String,
    pub owning_alias: String,
    pub ref_table: String,
    pub ref_field: String,
    pub ref_alias: String,
    pub cardinality: Cardinality,
    pub on_delete: ReferentialAction,
    pub on_update: ReferentialAction,
}

impl RelationDef {
    /// Create a one-to-many relation `owning_table.owning_field -> ref_table.ref_field`.
    ///
    /// The relation name defaults to `owning_table.owning_field`.
    pub fn new(
        owning_table: impl Into<String>,
        owning_field: impl Into<String>,
        ref_table: impl Into<String>,
        ref_field: impl Into<String>,
    ) -> Self {
        let owning_table = owning_table.into();
        let owning_field = owning_field.into();
        let ref_table = ref_table.into();
        Self {
            name: format!("{owning_table}.{owning_field}"),
            owning_alias: owning_table.clone(),
            ref_alias: ref_table.clone(),
            owning_table,
            owning_field,
            ref_table,
            ref_field: ref_field.into(),
            cardinality: Cardinality::OneToMany,
            on_delete: ReferentialAction::NoAction,
            on_update: ReferentialAction::NoAction,
        }
    }

    /// Set both traversal aliases.
    pub fn aliases(mut self, owning_alias: impl Into<String>, ref_alias: impl Into<String>) -> Self {
        self.owning_alias = owning_alias.into();
        self.ref_alias = ref_alias.into();
        self
    }

    pub fn one_to_one(mut self) -> Self {
        self.cardinality = Cardinality::OneToOne;
        self
    }

    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = action;
        self
    }

    pub fn on_update(mut self, action: ReferentialAction) -> Self {
        self.on_update = action;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn is_one_to_one(&self) -> bool {
        self.cardinality == Cardinality::OneToOne
    }

    pub fn is_one_to_many(&self) -> bool {
        self.cardinality == Cardinality::OneToMany
    }

    /// Resolve an alias to the end it addresses.
    ///
    /// For self-referencing relations both aliases live on the same table, so
    /// the alias name alone decides the direction.
    pub fn direction_of(&self, alias: &str) -> Option<Direction> {
        if alias == self.ref_alias {
            Some(Direction::ToReferenced)
        } else if alias == self.owning_alias {
            Some(Direction::ToOwning)
        } else {
            None
        }
    }

    /// Table reached when traversing in `direction`.
    pub fn target_table(&self, direction: Direction) -> &str {
        match direction {
            Direction::ToReferenced => &self.ref_table,
            Direction::ToOwning => &self.owning_table,
        }
    }

    /// Table the alias for `direction` is declared on.
    pub fn source_table(&self, direction: Direction) -> &str {
        match direction {
            Direction::ToReferenced => &self.owning_table,
            Direction::ToOwning => &self.ref_table,
        }
    }

    /// Whether traversing in `direction` yields a collection.
    pub fn yields_collection(&self, direction: Direction) -> bool {
        direction == Direction::ToOwning && self.is_one_to_many()
    }
}
