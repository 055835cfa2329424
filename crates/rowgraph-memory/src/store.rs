//! Row storage with constraint enforcement.

use std::collections::HashMap;

use rowgraph_core::{
    Error, FieldDef, IndexDef, ReferentialAction, RelationDef, Result, SchemaProvider,
    StorageError, StorageErrorKind, Value,
};

pub(crate) type RowData = HashMap<String, Value>;

#[derive(Debug, Clone)]
pub(crate) struct TableData {
    pub fields: Vec<FieldDef>,
    pub indexes: Vec<IndexDef>,
    pub rows: Vec<RowData>,
    next_id: i64,
}

impl TableData {
    fn auto_increment_field(&self) -> Option<&FieldDef> {
        let mut primary = self.fields.iter().filter(|f| f.primary);
        match (primary.next(), primary.next()) {
            (Some(field), None) if field.auto_increment => Some(field),
            _ => None,
        }
    }

    fn find(&self, column: &str, value: &Value) -> impl Iterator<Item = usize> + '_ {
        let value = value.clone();
        let column = column.to_string();
        self.rows.iter().enumerate().filter_map(move |(i, row)| {
            row.get(&column)
                .is_some_and(|v| v.loosely_equals(&value))
                .then_some(i)
        })
    }
}

fn constraint(message: impl Into<String>) -> Error {
    Error::Storage(StorageError::new(StorageErrorKind::Constraint, message))
}

/// Tables keyed by name plus the foreign keys between them.
#[derive(Debug, Clone, Default)]
pub(crate) struct Store {
    tables: HashMap<String, TableData>,
    foreign_keys: Vec<RelationDef>,
    pub enforce_foreign_keys: bool,
}

impl Store {
    pub fn load(schema: &dyn SchemaProvider) -> Result<Self> {
        let mut tables = HashMap::new();
        let mut foreign_keys: Vec<RelationDef> = Vec::new();
        for name in schema.table_names() {
            tables.insert(
                name.clone(),
                TableData {
                    fields: schema.fields(&name)?,
                    indexes: schema.indexes(&name)?,
                    rows: Vec::new(),
                    next_id: 1,
                },
            );
            for relation in schema.relations(&name)? {
                if !foreign_keys.iter().any(|r| r.name == relation.name) {
                    foreign_keys.push(relation);
                }
            }
        }
        Ok(Self {
            tables,
            foreign_keys,
            enforce_foreign_keys: true,
        })
    }

    pub fn table(&self, name: &str) -> Result<&TableData> {
        self.tables
            .get(name)
            .ok_or_else(|| constraint(format!("no such table: {name}")))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut TableData> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| constraint(format!("no such table: {name}")))
    }

    /// Indexes of the rows of `table` matching every condition.
    pub fn matching(&self, table: &str, conditions: &[(String, Value)]) -> Result<Vec<usize>> {
        let data = self.table(table)?;
        for (column, _) in conditions {
            if !data.fields.iter().any(|f| f.name == *column) {
                return Err(Error::Storage(StorageError::new(
                    StorageErrorKind::Statement,
                    format!("no such column: {table}.{column}"),
                )));
            }
        }
        Ok(data
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| {
                conditions.iter().all(|(column, expected)| {
                    let actual = row.get(column).cloned().unwrap_or_default();
                    if expected.is_null() {
                        actual.is_null()
                    } else {
                        actual.loosely_equals(expected)
                    }
                })
            })
            .map(|(i, _)| i)
            .collect())
    }

    /// Insert a row; returns the identifier generated for it, if any.
    pub fn insert(&mut self, table: &str, values: RowData) -> Result<Option<Value>> {
        let data = self.table_mut(table)?;
        let mut row: RowData = data
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.default.clone().unwrap_or_default()))
            .collect();
        for (column, value) in values {
            if !row.contains_key(&column) {
                return Err(constraint(format!("table {table} has no column named {column}")));
            }
            row.insert(column, value);
        }

        let mut generated = None;
        if let Some(field) = data.auto_increment_field().cloned() {
            match row.get(&field.name).and_then(Value::as_i64) {
                Some(explicit) => data.next_id = data.next_id.max(explicit + 1),
                None => {
                    let id = Value::Int(data.next_id);
                    data.next_id += 1;
                    row.insert(field.name.clone(), id.clone());
                    generated = Some(id);
                }
            }
        }

        self.check_row(table, &row, None)?;
        self.table_mut(table)?.rows.push(row);
        Ok(generated)
    }

    /// Apply `changes` to the rows at `indexes`.
    pub fn update(&mut self, table: &str, indexes: &[usize], changes: &RowData) -> Result<()> {
        for &i in indexes {
            let old = self.table(table)?.rows[i].clone();
            let mut new = old.clone();
            for (column, value) in changes {
                new.insert(column.clone(), value.clone());
            }
            self.check_row(table, &new, Some(i))?;
            self.table_mut(table)?.rows[i] = new.clone();
            self.apply_update_actions(table, &old, &new)?;
        }
        Ok(())
    }

    /// Delete the rows at `indexes`, applying the delete action of every
    /// foreign key pointing at them.
    pub fn delete(&mut self, table: &str, indexes: &[usize]) -> Result<()> {
        let mut doomed: Vec<RowData> = Vec::new();
        {
            let data = self.table_mut(table)?;
            let mut sorted = indexes.to_vec();
            sorted.sort_unstable();
            for i in sorted.into_iter().rev() {
                doomed.push(data.rows.remove(i));
            }
        }
        for row in doomed {
            self.apply_delete_actions(table, &row)?;
        }
        Ok(())
    }

    fn check_row(&self, table: &str, row: &RowData, skip: Option<usize>) -> Result<()> {
        let data = self.table(table)?;
        for field in &data.fields {
            let null = row.get(&field.name).is_none_or(Value::is_null);
            if null && !field.nullable {
                return Err(constraint(format!(
                    "NOT NULL constraint failed: {table}.{}",
                    field.name
                )));
            }
        }
        let primary: Vec<String> = data
            .fields
            .iter()
            .filter(|f| f.primary)
            .map(|f| f.name.clone())
            .collect();
        let unique = data
            .indexes
            .iter()
            .filter(|index| index.is_unique())
            .map(|index| (index.name.clone(), index.fields.clone(), index.null_constrained))
            .chain(std::iter::once(("PRIMARY".to_string(), primary, false)));
        for (name, fields, null_constrained) in unique {
            let values: Vec<Value> = fields
                .iter()
                .map(|f| row.get(f).cloned().unwrap_or_default())
                .collect();
            if !null_constrained && values.iter().any(Value::is_null) {
                continue;
            }
            let clash = data.rows.iter().enumerate().any(|(i, other)| {
                Some(i) != skip
                    && fields.iter().zip(&values).all(|(f, v)| {
                        let o = other.get(f).cloned().unwrap_or_default();
                        (o.is_null() && v.is_null()) || o.loosely_equals(v)
                    })
            });
            if clash {
                return Err(constraint(format!("UNIQUE constraint failed: {table}.{name}")));
            }
        }

        if self.enforce_foreign_keys {
            for fk in self.foreign_keys.iter().filter(|fk| fk.owning_table == table) {
                let value = row.get(&fk.owning_field).cloned().unwrap_or_default();
                if value.is_null() {
                    continue;
                }
                let target = self.table(&fk.ref_table)?;
                // a row may reference itself
                let own = fk.ref_table == table
                    && row.get(&fk.ref_field).is_some_and(|v| v.loosely_equals(&value));
                if !own && target.find(&fk.ref_field, &value).next().is_none() {
                    return Err(constraint(format!(
                        "FOREIGN KEY constraint failed: {}",
                        fk.name
                    )));
                }
            }
        }
        Ok(())
    }

    fn apply_update_actions(&mut self, table: &str, old: &RowData, new: &RowData) -> Result<()> {
        if !self.enforce_foreign_keys {
            return Ok(());
        }
        let referencing: Vec<RelationDef> = self
            .foreign_keys
            .iter()
            .filter(|fk| fk.ref_table == table)
            .cloned()
            .collect();
        for fk in referencing {
            let before = old.get(&fk.ref_field).cloned().unwrap_or_default();
            let after = new.get(&fk.ref_field).cloned().unwrap_or_default();
            if before.is_null() || before.loosely_equals(&after) {
                continue;
            }
            let owners: Vec<usize> = self.table(&fk.owning_table)?.find(&fk.owning_field, &before).collect();
            if owners.is_empty() {
                continue;
            }
            let replacement = match fk.on_update {
                ReferentialAction::Cascade => after.clone(),
                ReferentialAction::SetNull => Value::Null,
                ReferentialAction::SetDefault => self
                    .table(&fk.owning_table)?
                    .fields
                    .iter()
                    .find(|f| f.name == fk.owning_field)
                    .and_then(|f| f.default.clone())
                    .unwrap_or_default(),
                ReferentialAction::Restrict | ReferentialAction::NoAction => {
                    return Err(constraint(format!("FOREIGN KEY constraint failed: {}", fk.name)));
                }
            };
            let owning = self.table_mut(&fk.owning_table)?;
            for i in owners {
                owning.rows[i].insert(fk.owning_field.clone(), replacement.clone());
            }
        }
        Ok(())
    }

    fn apply_delete_actions(&mut self, table: &str, row: &RowData) -> Result<()> {
        if !self.enforce_foreign_keys {
            return Ok(());
        }
        let referencing: Vec<RelationDef> = self
            .foreign_keys
            .iter()
            .filter(|fk| fk.ref_table == table)
            .cloned()
            .collect();
        for fk in referencing {
            let key = row.get(&fk.ref_field).cloned().unwrap_or_default();
            if key.is_null() {
                continue;
            }
            let owners: Vec<usize> = self.table(&fk.owning_table)?.find(&fk.owning_field, &key).collect();
            if owners.is_empty() {
                continue;
            }
            match fk.on_delete {
                ReferentialAction::Cascade => self.delete(&fk.owning_table, &owners)?,
                ReferentialAction::SetNull | ReferentialAction::SetDefault => {
                    let value = if fk.on_delete == ReferentialAction::SetNull {
                        Value::Null
                    } else {
                        self.table(&fk.owning_table)?
                            .fields
                            .iter()
                            .find(|f| f.name == fk.owning_field)
                            .and_then(|f| f.default.clone())
                            .unwrap_or_default()
                    };
                    let owning = self.table_mut(&fk.owning_table)?;
                    for i in owners {
                        owning.rows[i].insert(fk.owning_field.clone(), value.clone());
                    }
                }
                ReferentialAction::Restrict | ReferentialAction::NoAction => {
                    return Err(constraint(format!("FOREIGN KEY constraint failed: {}", fk.name)));
                }
            }
        }
        Ok(())
    }
}
