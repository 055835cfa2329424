//! Programmatic schema construction and setup-time validation.

use std::collections::HashMap;

use rowgraph_core::error::{ConfigError, ConfigErrorKind};
use rowgraph_core::{FieldDef, IndexDef, RelationDef, Result};

use crate::{Schema, TableSchema};

/// Builder for a [`Schema`].
///
/// Nothing is checked until [`build`](SchemaBuilder::build), so tables and
/// relations may be added in any order.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    tables: Vec<TableSchema>,
    relations: Vec<RelationDef>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table with its fields (in column order) and indexes.
    pub fn table(
        mut self,
        name: impl Into<String>,
        fields: Vec<FieldDef>,
        indexes: Vec<IndexDef>,
    ) -> Self {
        self.tables.push(TableSchema {
            name: name.into(),
            fields,
            indexes,
        });
        self
    }

    pub fn relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    /// Validate and produce the schema.
    pub fn build(self) -> Result<Schema> {
        validate_tables(&self.tables)?;
        validate_relations(&self.tables, &self.relations)?;
        tracing::debug!(
            tables = self.tables.len(),
            relations = self.relations.len(),
            "schema built"
        );
        Ok(Schema::from_parts(self.tables, self.relations))
    }
}

fn config(kind: ConfigErrorKind, message: String) -> rowgraph_core::Error {
    ConfigError::new(kind, message).into()
}

fn validate_tables(tables: &[TableSchema]) -> Result<()> {
    let mut seen: Vec<&str> = Vec::with_capacity(tables.len());
    for table in tables {
        if seen.contains(&table.name.as_str()) {
            return Err(config(
                ConfigErrorKind::InvalidValue,
                format!("Table '{}' is defined twice!", table.name),
            ));
        }
        seen.push(&table.name);

        if table.fields.is_empty() {
            return Err(config(
                ConfigErrorKind::MissingKey,
                format!("Missing fields for table '{}'!", table.name),
            ));
        }
        if !table.fields.iter().any(|f| f.primary) {
            return Err(config(
                ConfigErrorKind::MissingIdentifier,
                format!("Table '{}' does not define an identifier field!", table.name),
            ));
        }
        for index in &table.indexes {
            if index.fields.is_empty() {
                return Err(config(
                    ConfigErrorKind::MissingKey,
                    format!(
                        "Definition of schema index '{}' must define fields and type!",
                        index.name
                    ),
                ));
            }
            if let Some(missing) = index
                .fields
                .iter()
                .find(|name| table.field(name).is_none())
            {
                return Err(config(
                    ConfigErrorKind::UnknownField,
                    format!(
                        "Index '{}' of table '{}' uses unknown field '{missing}'!",
                        index.name, table.name
                    ),
                ));
            }
        }
    }
    Ok(())
}

fn validate_relations(tables: &[TableSchema], relations: &[RelationDef]) -> Result<()> {
    let find_table = |name: &str| tables.iter().find(|t| t.name == name);
    // alias -> relation name, per table
    let mut aliases: HashMap<(&str, &str), &str> = HashMap::new();
    let mut names: Vec<&str> = Vec::with_capacity(relations.len());

    for rel in relations {
        if names.contains(&rel.name.as_str()) {
            return Err(config(
                ConfigErrorKind::InvalidValue,
                format!("Relation '{}' is defined twice!", rel.name),
            ));
        }
        names.push(&rel.name);

        for (key, value) in [
            ("owningAlias", &rel.owning_alias),
            ("owningField", &rel.owning_field),
            ("owningTable", &rel.owning_table),
            ("refAlias", &rel.ref_alias),
            ("refField", &rel.ref_field),
            ("refTable", &rel.ref_table),
        ] {
            if value.is_empty() {
                return Err(config(
                    ConfigErrorKind::MissingKey,
                    format!("Relation '{}' must define value for key '{key}'!", rel.name),
                ));
            }
        }

        for (table_name, field_name) in [
            (&rel.owning_table, &rel.owning_field),
            (&rel.ref_table, &rel.ref_field),
        ] {
            let table = find_table(table_name).ok_or_else(|| {
                config(
                    ConfigErrorKind::UnknownTable,
                    format!(
                        "Relation '{}' references undefined table '{table_name}'!",
                        rel.name
                    ),
                )
            })?;
            if table.field(field_name).is_none() {
                return Err(config(
                    ConfigErrorKind::UnknownField,
                    format!(
                        "Relation '{}' references undefined field '{table_name}.{field_name}'!",
                        rel.name
                    ),
                ));
            }
        }

        if rel.owning_table == rel.ref_table && rel.owning_alias == rel.ref_alias {
            return Err(config(
                ConfigErrorKind::DuplicateAlias,
                format!(
                    "Relation '{}' uses alias '{}' for both sides of table '{}'!",
                    rel.name, rel.ref_alias, rel.owning_table
                ),
            ));
        }

        for (table_name, alias) in [
            (rel.owning_table.as_str(), rel.ref_alias.as_str()),
            (rel.ref_table.as_str(), rel.owning_alias.as_str()),
        ] {
            let shadows_field = find_table(table_name).is_some_and(|t| t.field(alias).is_some());
            if shadows_field {
                return Err(config(
                    ConfigErrorKind::DuplicateAlias,
                    format!("Relation alias '{alias}' collides with a field of table '{table_name}'!"),
                ));
            }
            if let Some(other) = aliases.insert((table_name, alias), &rel.name) {
                return Err(config(
                    ConfigErrorKind::DuplicateAlias,
                    format!(
                        "Relation alias '{alias}' already defined for '{table_name}' by relation '{other}'!"
                    ),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowgraph_core::{Error, FieldType};

    fn id() -> FieldDef {
        FieldDef::new("id", FieldType::Integer).primary().auto_increment()
    }

    fn kind_of(result: Result<Schema>) -> ConfigErrorKind {
        match result {
            Err(Error::Config(e)) => e.kind,
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn table_without_identifier_is_rejected() {
        let result = SchemaBuilder::new()
            .table("log", vec![FieldDef::new("line", FieldType::String)], vec![])
            .build();
        assert_eq!(kind_of(result), ConfigErrorKind::MissingIdentifier);
    }

    #[test]
    fn table_without_fields_is_rejected() {
        let result = SchemaBuilder::new().table("empty", vec![], vec![]).build();
        assert_eq!(kind_of(result), ConfigErrorKind::MissingKey);
    }

    #[test]
    fn index_on_unknown_field_is_rejected() {
        let result = SchemaBuilder::new()
            .table("tag", vec![id()], vec![IndexDef::unique("UNIQUE", ["name"])])
            .build();
        assert_eq!(kind_of(result), ConfigErrorKind::UnknownField);
    }

    #[test]
    fn relation_to_unknown_table_is_rejected() {
        let result = SchemaBuilder::new()
            .table(
                "comment",
                vec![id(), FieldDef::new("user_id", FieldType::Integer)],
                vec![],
            )
            .relation(RelationDef::new("comment", "user_id", "user", "id"))
            .build();
        assert_eq!(kind_of(result), ConfigErrorKind::UnknownTable);
    }

    #[test]
    fn duplicate_alias_on_one_table_is_rejected() {
        let result = SchemaBuilder::new()
            .table("user", vec![id()], vec![])
            .table(
                "comment",
                vec![
                    id(),
                    FieldDef::new("user_id", FieldType::Integer),
                    FieldDef::new("editor_id", FieldType::Integer),
                ],
                vec![],
            )
            .relation(
                RelationDef::new("comment", "user_id", "user", "id").aliases("Comment", "User"),
            )
            .relation(
                RelationDef::new("comment", "editor_id", "user", "id").aliases("Edited", "User"),
            )
            .build();
        assert_eq!(kind_of(result), ConfigErrorKind::DuplicateAlias);
    }

    #[test]
    fn self_reference_with_distinct_aliases_is_accepted() {
        let schema = SchemaBuilder::new()
            .table(
                "author",
                vec![id(), FieldDef::new("editor_id", FieldType::Integer).nullable()],
                vec![],
            )
            .relation(
                RelationDef::new("author", "editor_id", "author", "id").aliases("Author", "Editor"),
            )
            .build()
            .unwrap();
        assert!(schema.relation("author.editor_id").is_some());
    }

    #[test]
    fn alias_shadowing_a_field_is_rejected() {
        let result = SchemaBuilder::new()
            .table("user", vec![id(), FieldDef::new("Author", FieldType::String)], vec![])
            .table("author", vec![id(), FieldDef::new("user_id", FieldType::Integer)], vec![])
            .relation(
                RelationDef::new("author", "user_id", "user", "id").aliases("Author", "User"),
            )
            .build();
        assert_eq!(kind_of(result), ConfigErrorKind::DuplicateAlias);
    }
}
