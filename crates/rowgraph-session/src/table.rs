//! Table metadata and its repository.

use std::collections::HashMap;

use rowgraph_core::{
    ConfigError, ConfigErrorKind, Direction, Error, FieldDef, IndexDef, RelationDef, Result,
    SchemaProvider, Value,
};

use crate::record::{COMPOSITE_ID_SEPARATOR, identifier_string};
use crate::repository::Repository;

/// Index of a relation inside the session.
pub type RelationId = usize;

#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    fields: Vec<FieldDef>,
    indexes: Vec<IndexDef>,
    identifier_fields: Vec<String>,
    /// alias -> (relation, direction)
    aliases: HashMap<String, (RelationId, Direction)>,
    /// owning field -> relations using it as foreign key
    owning_fields: HashMap<String, Vec<RelationId>>,
    owning_relations: Vec<RelationId>,
    referenced_relations: Vec<RelationId>,
    repository: Repository,
}

impl Table {
    pub(crate) fn load(schema: &dyn SchemaProvider, name: &str) -> Result<Self> {
        let fields = schema.fields(name)?;
        let indexes = schema.indexes(name)?;
        let identifier_fields: Vec<String> = fields
            .iter()
            .filter(|f| f.primary)
            .map(|f| f.name.clone())
            .collect();
        if identifier_fields.is_empty() {
            return Err(ConfigError::new(
                ConfigErrorKind::MissingIdentifier,
                format!("Table '{name}' does not define an identifier field!"),
            )
            .into());
        }
        Ok(Self {
            name: name.to_string(),
            fields,
            indexes,
            identifier_fields,
            aliases: HashMap::new(),
            owning_fields: HashMap::new(),
            owning_relations: Vec::new(),
            referenced_relations: Vec::new(),
            repository: Repository::new(name),
        })
    }

    /// Register the side(s) of `relation` that live on this table.
    pub(crate) fn attach_relation(&mut self, id: RelationId, relation: &RelationDef) -> Result<()> {
        if relation.owning_table == self.name {
            self.insert_alias(&relation.ref_alias, id, Direction::ToReferenced)?;
            self.owning_fields
                .entry(relation.owning_field.clone())
                .or_default()
                .push(id);
            self.owning_relations.push(id);
        }
        if relation.ref_table == self.name {
            self.insert_alias(&relation.owning_alias, id, Direction::ToOwning)?;
            self.referenced_relations.push(id);
        }
        Ok(())
    }

    fn insert_alias(&mut self, alias: &str, id: RelationId, direction: Direction) -> Result<()> {
        if self.has_field(alias) || self.aliases.contains_key(alias) {
            return Err(ConfigError::new(
                ConfigErrorKind::DuplicateAlias,
                format!(
                    "Relation alias '{alias}' already defined on table '{}'!",
                    self.name
                ),
            )
            .into());
        }
        self.aliases.insert(alias.to_string(), (id, direction));
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub(crate) fn require_field(&self, name: &str) -> Result<&FieldDef> {
        self.field(name)
            .ok_or_else(|| Error::unknown_member(&self.name, name))
    }

    pub fn default_value(&self, name: &str) -> Option<Value> {
        self.field(name).map(FieldDef::initial_value)
    }

    /// Field values of a fresh record.
    pub(crate) fn initial_data(&self) -> HashMap<String, Value> {
        self.fields
            .iter()
            .map(|f| (f.name.clone(), f.initial_value()))
            .collect()
    }

    pub fn identifier_fields(&self) -> &[String] {
        &self.identifier_fields
    }

    pub fn is_identifier_field(&self, name: &str) -> bool {
        self.identifier_fields.iter().any(|f| f == name)
    }

    pub fn has_composite_primary_key(&self) -> bool {
        self.identifier_fields.len() > 1
    }

    /// Whether storage generates the identifier on insert.
    pub fn has_autoincrement_trigger(&self) -> bool {
        self.identifier_fields
            .iter()
            .filter_map(|name| self.field(name))
            .any(|f| f.auto_increment)
    }

    /// Identifier string of a set of field values, if every identifier
    /// field is present and not NULL.
    pub fn identifier_of(&self, values: &HashMap<String, Value>) -> Option<String> {
        let parts: Vec<Value> = self
            .identifier_fields
            .iter()
            .map(|f| values.get(f).cloned().unwrap_or_default())
            .collect();
        identifier_string(&parts)
    }

    /// Split an identifier string into field values.
    pub fn split_identifier(&self, id: &str) -> Vec<Value> {
        id.split(COMPOSITE_ID_SEPARATOR)
            .map(Value::from_identifier)
            .collect()
    }

    pub fn indexes(&self) -> &[IndexDef] {
        &self.indexes
    }

    pub fn index(&self, name: &str) -> Option<&IndexDef> {
        self.indexes.iter().find(|i| i.name == name)
    }

    pub fn unique_indexes(&self) -> impl Iterator<Item = &IndexDef> {
        self.indexes.iter().filter(|i| i.is_unique())
    }

    pub fn is_unique_index_null_constrained(&self, name: &str) -> Result<bool> {
        match self.index(name) {
            Some(index) if index.is_unique() => Ok(index.null_constrained),
            Some(_) => Err(ConfigError::new(
                ConfigErrorKind::InvalidValue,
                format!(
                    "Index '{name}' is not an unique constraint [table '{}']!",
                    self.name
                ),
            )
            .into()),
            None => Err(ConfigError::new(
                ConfigErrorKind::MissingKey,
                format!("Missing unique constraint '{name}' [table '{}']!", self.name),
            )
            .into()),
        }
    }

    pub fn has_relation(&self, alias: &str) -> bool {
        self.aliases.contains_key(alias)
    }

    pub fn relation_alias(&self, alias: &str) -> Option<(RelationId, Direction)> {
        self.aliases.get(alias).copied()
    }

    pub fn aliases(&self) -> impl Iterator<Item = (&str, RelationId, Direction)> {
        self.aliases
            .iter()
            .map(|(alias, (id, direction))| (alias.as_str(), *id, *direction))
    }

    /// Relations in which this table holds the foreign key.
    pub fn owning_relations(&self) -> &[RelationId] {
        &self.owning_relations
    }

    /// Relations in which this table is referenced.
    pub fn referenced_relations(&self) -> &[RelationId] {
        &self.referenced_relations
    }

    /// Relations that use `field` as foreign key.
    pub fn relations_by_owning_field(&self, field: &str) -> &[RelationId] {
        self.owning_fields.get(field).map_or(&[], Vec::as_slice)
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    pub(crate) fn repository_mut(&mut self) -> &mut Repository {
        &mut self.repository
    }
}
