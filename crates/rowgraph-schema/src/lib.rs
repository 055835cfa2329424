//! Schema definitions for rowgraph.
//!
//! This crate provides:
//! - `Schema`, an in-memory `SchemaProvider`
//! - `SchemaBuilder` for programmatic definitions
//! - loading from a JSON schema document
//! - setup-time validation of tables, indexes and relations

pub mod builder;
pub mod document;

pub use builder::SchemaBuilder;

use rowgraph_core::error::{ConfigError, ConfigErrorKind};
use rowgraph_core::{FieldDef, IndexDef, ReferentialAction, RelationDef, Result, SchemaProvider};

/// Field and index metadata of one table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub fields: Vec<FieldDef>,
    pub indexes: Vec<IndexDef>,
}

impl TableSchema {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn identifier_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.primary)
    }
}

/// A validated set of tables and relations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    tables: Vec<TableSchema>,
    relations: Vec<RelationDef>,
}

impl Schema {
    /// Start a programmatic schema definition.
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    /// Parse and validate a JSON schema document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_json_value(&value)
    }

    /// Validate an already parsed JSON schema document.
    pub fn from_json_value(value: &serde_json::Value) -> Result<Self> {
        document::parse(value)?.build()
    }

    pub(crate) fn from_parts(tables: Vec<TableSchema>, relations: Vec<RelationDef>) -> Self {
        Self { tables, relations }
    }

    pub fn tables(&self) -> &[TableSchema] {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.table(name).is_some()
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn all_relations(&self) -> &[RelationDef] {
        &self.relations
    }

    /// Override the ON DELETE policy of a relation.
    pub fn set_on_delete(&mut self, relation: &str, action: ReferentialAction) -> Result<()> {
        let rel = self.relation_mut(relation)?;
        rel.on_delete = action;
        Ok(())
    }

    /// Override the ON UPDATE policy of a relation.
    pub fn set_on_update(&mut self, relation: &str, action: ReferentialAction) -> Result<()> {
        let rel = self.relation_mut(relation)?;
        rel.on_update = action;
        Ok(())
    }

    fn relation_mut(&mut self, name: &str) -> Result<&mut RelationDef> {
        self.relations
            .iter_mut()
            .find(|r| r.name == name)
            .ok_or_else(|| {
                ConfigError::new(
                    ConfigErrorKind::MissingKey,
                    format!("Relation '{name}' is not defined in schema!"),
                )
                .into()
            })
    }

    fn require_table(&self, name: &str) -> Result<&TableSchema> {
        self.table(name).ok_or_else(|| {
            ConfigError::new(
                ConfigErrorKind::UnknownTable,
                format!("Table {name} is not defined in schema!"),
            )
            .into()
        })
    }
}

impl SchemaProvider for Schema {
    fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }

    fn fields(&self, table: &str) -> Result<Vec<FieldDef>> {
        Ok(self.require_table(table)?.fields.clone())
    }

    fn relations(&self, table: &str) -> Result<Vec<RelationDef>> {
        self.require_table(table)?;
        Ok(self
            .relations
            .iter()
            .filter(|r| r.owning_table == table || r.ref_table == table)
            .cloned()
            .collect())
    }

    fn indexes(&self, table: &str) -> Result<Vec<IndexDef>> {
        Ok(self.require_table(table)?.indexes.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowgraph_core::{Error, FieldType};

    fn schema() -> Schema {
        Schema::builder()
            .table(
                "user",
                vec![
                    FieldDef::new("id", FieldType::Integer).primary().auto_increment(),
                    FieldDef::new("username", FieldType::String).length(64),
                ],
                vec![IndexDef::unique("UNIQUE", ["username"])],
            )
            .table(
                "author",
                vec![
                    FieldDef::new("id", FieldType::Integer).primary().auto_increment(),
                    FieldDef::new("user_id", FieldType::Integer).foreign("user.id"),
                ],
                vec![],
            )
            .relation(
                RelationDef::new("author", "user_id", "user", "id")
                    .aliases("Author", "User")
                    .one_to_one()
                    .on_delete(ReferentialAction::Cascade),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn provider_returns_relations_for_both_sides() {
        let schema = schema();
        assert_eq!(schema.table_names(), vec!["user", "author"]);
        assert_eq!(schema.relations("user").unwrap().len(), 1);
        assert_eq!(schema.relations("author").unwrap().len(), 1);
        assert_eq!(schema.indexes("user").unwrap()[0].name, "UNIQUE");
    }

    #[test]
    fn unknown_table_is_config_error() {
        match schema().fields("nope") {
            Err(Error::Config(e)) => assert_eq!(e.kind, ConfigErrorKind::UnknownTable),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn on_delete_override() {
        let mut schema = schema();
        schema
            .set_on_delete("author.user_id", ReferentialAction::SetNull)
            .unwrap();
        assert_eq!(
            schema.relation("author.user_id").unwrap().on_delete,
            ReferentialAction::SetNull
        );
        assert!(schema.set_on_delete("missing", ReferentialAction::Cascade).is_err());
    }
}
