//! JSON schema documents.
//!
//! ```json
//! {
//!   "tables": {
//!     "user": {
//!       "fields": {
//!         "id": { "type": "integer", "primary": true, "autoIncrement": true },
//!         "username": { "type": "string", "length": 64 }
//!       },
//!       "indexes": { "UNIQUE": { "type": "unique", "fields": ["username"] } }
//!     }
//!   },
//!   "relations": {
//!     "author.user_id": {
//!       "owningTable": "author", "owningField": "user_id", "owningAlias": "Author",
//!       "refTable": "user", "refField": "id", "refAlias": "User",
//!       "type": "1-1", "onDelete": "CASCADE"
//!     }
//!   }
//! }
//! ```
//!
//! Tables and fields keep their document order.

use serde::Deserialize;
use serde_json::{Map, Value as Json};

use rowgraph_core::error::{ConfigError, ConfigErrorKind};
use rowgraph_core::{
    Cardinality, FieldDef, FieldType, IndexDef, IndexKind, ReferentialAction, RelationDef,
    Result, Value,
};

use crate::SchemaBuilder;

const RELATION_KEYS: [&str; 7] = [
    "owningAlias",
    "owningField",
    "owningTable",
    "refAlias",
    "refField",
    "refTable",
    "type",
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawField {
    #[serde(rename = "type")]
    field_type: Option<String>,
    length: Option<u32>,
    precision: Option<u32>,
    #[serde(default)]
    unsigned: bool,
    #[serde(default)]
    nullable: bool,
    default: Option<Json>,
    #[serde(default)]
    primary: bool,
    #[serde(default)]
    auto_increment: bool,
    foreign: Option<String>,
    #[serde(default)]
    values: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawIndex {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    fields: Vec<String>,
    #[serde(default)]
    null_constrained: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRelation {
    owning_table: String,
    owning_field: String,
    owning_alias: String,
    ref_table: String,
    ref_field: String,
    ref_alias: String,
    #[serde(rename = "type")]
    cardinality: String,
    on_delete: Option<String>,
    on_update: Option<String>,
}

fn config(kind: ConfigErrorKind, message: String) -> rowgraph_core::Error {
    ConfigError::new(kind, message).into()
}

fn object<'a>(value: &'a Json, what: &str) -> Result<&'a Map<String, Json>> {
    value.as_object().ok_or_else(|| {
        config(
            ConfigErrorKind::InvalidValue,
            format!("{what} must be a JSON object!"),
        )
    })
}

fn leaf<T: for<'de> Deserialize<'de>>(value: &Json, what: &str) -> Result<T> {
    serde_json::from_value(value.clone()).map_err(|e| {
        config(
            ConfigErrorKind::InvalidValue,
            format!("Invalid definition of {what}: {e}"),
        )
    })
}

/// Read a schema document into a builder; `build` validates it.
pub fn parse(document: &Json) -> Result<SchemaBuilder> {
    let root = object(document, "Schema document")?;
    let tables = root.get("tables").ok_or_else(|| {
        config(
            ConfigErrorKind::MissingKey,
            "Schema document must define 'tables'!".to_string(),
        )
    })?;

    let mut builder = SchemaBuilder::new();
    for (table, definition) in object(tables, "'tables'")? {
        let (fields, indexes) = parse_table(table, definition)?;
        builder = builder.table(table.clone(), fields, indexes);
    }

    if let Some(relations) = root.get("relations") {
        for (name, definition) in object(relations, "'relations'")? {
            builder = builder.relation(parse_relation(name, definition)?);
        }
    }
    Ok(builder)
}

fn parse_table(table: &str, definition: &Json) -> Result<(Vec<FieldDef>, Vec<IndexDef>)> {
    let definition = object(definition, &format!("Table '{table}'"))?;
    let fields = definition.get("fields").ok_or_else(|| {
        config(
            ConfigErrorKind::MissingKey,
            format!("Missing fields for table '{table}'!"),
        )
    })?;

    let fields = object(fields, &format!("Fields of table '{table}'"))?
        .iter()
        .map(|(name, raw)| parse_field(table, name, raw))
        .collect::<Result<Vec<_>>>()?;

    let indexes = match definition.get("indexes") {
        Some(indexes) => object(indexes, &format!("Indexes of table '{table}'"))?
            .iter()
            .map(|(name, raw)| parse_index(name, raw))
            .collect::<Result<Vec<_>>>()?,
        None => Vec::new(),
    };
    Ok((fields, indexes))
}

fn parse_field(table: &str, name: &str, raw: &Json) -> Result<FieldDef> {
    let raw: RawField = leaf(raw, &format!("field '{table}.{name}'"))?;
    let type_name = raw.field_type.ok_or_else(|| {
        config(
            ConfigErrorKind::MissingKey,
            format!("Field '{table}.{name}' must define a type!"),
        )
    })?;
    let field_type = FieldType::from_str(&type_name).ok_or_else(|| {
        config(
            ConfigErrorKind::InvalidValue,
            format!("Field '{table}.{name}' has unknown type '{type_name}'!"),
        )
    })?;

    Ok(FieldDef {
        name: name.to_string(),
        field_type,
        length: raw.length,
        precision: raw.precision,
        unsigned: raw.unsigned,
        nullable: raw.nullable,
        primary: raw.primary,
        auto_increment: raw.auto_increment,
        default: raw.default.as_ref().map(Value::from_json).filter(|v| !v.is_null()),
        foreign: raw.foreign,
        values: raw.values,
    })
}

fn parse_index(name: &str, raw: &Json) -> Result<IndexDef> {
    let raw: RawIndex = leaf(raw, &format!("index '{name}'"))?;
    let missing = || {
        config(
            ConfigErrorKind::MissingKey,
            format!("Definition of schema index '{name}' must define fields and type!"),
        )
    };
    let kind_name = raw.kind.ok_or_else(missing)?;
    if raw.fields.is_empty() {
        return Err(missing());
    }
    let kind = IndexKind::from_str(&kind_name).ok_or_else(|| {
        config(
            ConfigErrorKind::InvalidValue,
            format!("Index '{name}' has unknown type '{kind_name}'!"),
        )
    })?;
    Ok(IndexDef {
        name: name.to_string(),
        kind,
        fields: raw.fields,
        null_constrained: raw.null_constrained,
    })
}

fn parse_relation(name: &str, definition: &Json) -> Result<RelationDef> {
    let map = object(definition, &format!("Relation '{name}'"))?;
    for key in RELATION_KEYS {
        if !map.contains_key(key) {
            return Err(config(
                ConfigErrorKind::MissingKey,
                format!("Relation '{name}' must define value for key '{key}'!"),
            ));
        }
    }

    let raw: RawRelation = leaf(definition, &format!("relation '{name}'"))?;
    let cardinality = Cardinality::from_str(&raw.cardinality).ok_or_else(|| {
        config(
            ConfigErrorKind::InvalidValue,
            format!("Relation '{name}' has unknown type '{}'!", raw.cardinality),
        )
    })?;
    let action = |value: Option<&String>, key: &str| -> Result<ReferentialAction> {
        match value {
            None => Ok(ReferentialAction::NoAction),
            Some(text) => ReferentialAction::from_str(text).ok_or_else(|| {
                config(
                    ConfigErrorKind::InvalidValue,
                    format!("Relation '{name}' has unknown {key} action '{text}'!"),
                )
            }),
        }
    };

    Ok(RelationDef {
        name: name.to_string(),
        on_delete: action(raw.on_delete.as_ref(), "onDelete")?,
        on_update: action(raw.on_update.as_ref(), "onUpdate")?,
        owning_table: raw.owning_table,
        owning_field: raw.owning_field,
        owning_alias: raw.owning_alias,
        ref_table: raw.ref_table,
        ref_field: raw.ref_field,
        ref_alias: raw.ref_alias,
        cardinality,
    })
}
