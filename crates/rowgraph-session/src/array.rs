//! Conversion between records and `serde_json` structures.
//!
//! A record becomes a JSON object of its field values. With `deep`, every
//! loaded relation alias is nested: an object for a single record, an array
//! for a collection. Persisted records carry `"_exists_": true`, which
//! [`Session::record_from_array`] uses to register them as persisted again.

use std::collections::{HashMap, HashSet};

use rowgraph_core::{ConfigError, ConfigErrorKind, Connection, Direction, Error, Result, Value};
use serde_json::{Map, Value as Json};

use crate::record::{FROM_ARRAY_EXISTS_KEY, Oid};
use crate::{Assign, Member, Session};

fn expect_object<'a>(table: &str, json: &'a Json) -> Result<&'a Map<String, Json>> {
    json.as_object().ok_or_else(|| {
        ConfigError::new(
            ConfigErrorKind::InvalidValue,
            format!("Record data for table '{table}' must be a JSON object!"),
        )
        .into()
    })
}

impl<C: Connection> Session<C> {
    /// Export a record as a JSON object.
    ///
    /// Each record appears once; a record reached again through another
    /// alias is left out.
    pub fn to_array(&mut self, oid: Oid, deep: bool, with_mapped: bool) -> Result<Json> {
        let mut visited = HashSet::new();
        Ok(self
            .export(oid, deep, with_mapped, &mut visited)?
            .unwrap_or(Json::Null))
    }

    fn export(
        &mut self,
        oid: Oid,
        deep: bool,
        with_mapped: bool,
        visited: &mut HashSet<Oid>,
    ) -> Result<Option<Json>> {
        if !visited.insert(oid) {
            return Ok(None);
        }
        let idx = self.table_idx_of(oid)?;
        let record = self.record(oid)?;
        let mut object = Map::new();

        if with_mapped {
            let mut mapped: Vec<(&String, &Value)> = record.mapped_values().iter().collect();
            mapped.sort_by(|a, b| a.0.cmp(b.0));
            for (name, value) in mapped {
                object.insert(name.clone(), value.to_json());
            }
        }
        for field in self.tables[idx].fields() {
            let value = record.get(&field.name).cloned().unwrap_or_default();
            object.insert(field.name.clone(), value.to_json());
        }
        let exists = record.exists();

        if deep {
            let mut aliases: Vec<(String, usize, Direction)> = self.tables[idx]
                .aliases()
                .map(|(alias, r, direction)| (alias.to_string(), r, direction))
                .collect();
            aliases.sort_by(|a, b| a.0.cmp(&b.0));
            for (alias, r, direction) in aliases {
                match self.read_reference(r, direction, oid)? {
                    Member::One(Some(target)) => {
                        if let Some(nested) = self.export(target, deep, with_mapped, visited)? {
                            object.insert(alias, nested);
                        }
                    }
                    Member::Many(members) => {
                        let mut items = Vec::with_capacity(members.len());
                        for member in members {
                            if let Some(nested) = self.export(member, deep, with_mapped, visited)? {
                                items.push(nested);
                            }
                        }
                        object.insert(alias, Json::Array(items));
                    }
                    Member::One(None) | Member::NotReady | Member::Field(_) => {}
                }
            }
        }

        if exists {
            object.insert(FROM_ARRAY_EXISTS_KEY.to_string(), Json::Bool(true));
        }
        Ok(Some(Json::Object(object)))
    }

    /// Apply a JSON object to an existing record.
    ///
    /// Field keys are written like [`set_field`](Self::set_field). With
    /// `deep`, relation aliases are resolved through
    /// [`record_from_array`](Self::record_from_array). Other keys become
    /// mapped values if `map_unknown` is set and are ignored otherwise.
    pub fn from_array(&mut self, oid: Oid, json: &Json, deep: bool, map_unknown: bool) -> Result<()> {
        let idx = self.table_idx_of(oid)?;
        let table_name = self.tables[idx].name().to_string();
        let object = expect_object(&table_name, json)?;

        for (key, value) in object {
            if key == FROM_ARRAY_EXISTS_KEY {
                continue;
            }
            if self.tables[idx].has_field(key) {
                self.write_field(oid, key, Value::from_json(value))?;
                continue;
            }
            if let Some((r, direction)) = self.tables[idx].relation_alias(key) {
                if deep {
                    let target_table = self.relations[r]
                        .definition()
                        .target_table(direction)
                        .to_string();
                    let assign = self.import_reference(&target_table, key, value, map_unknown)?;
                    self.set(oid, key, assign)?;
                }
                continue;
            }
            if map_unknown {
                self.record_mut(oid)?.map_value(key.clone(), Value::from_json(value));
            }
        }
        Ok(())
    }

    fn import_reference(
        &mut self,
        target_table: &str,
        alias: &str,
        json: &Json,
        map_unknown: bool,
    ) -> Result<Assign> {
        match json {
            Json::Null => Ok(Assign::Record(None)),
            Json::Object(_) => Ok(Assign::Record(Some(
                self.record_from_array(target_table, json, true, map_unknown)?,
            ))),
            Json::Array(items) => {
                let mut members = Vec::with_capacity(items.len());
                for item in items {
                    members.push(self.record_from_array(target_table, item, true, map_unknown)?);
                }
                Ok(Assign::Collection(members))
            }
            _ => Err(Error::reference_shape(target_table, alias, "object or array")),
        }
    }

    /// Build (or find) a record from a JSON object.
    ///
    /// An object marked `"_exists_"` with a complete identifier resolves to
    /// the tracked record for that identifier, or is registered as a
    /// persisted record with clean field values. Anything else becomes a new
    /// record.
    pub fn record_from_array(
        &mut self,
        table: &str,
        json: &Json,
        deep: bool,
        map_unknown: bool,
    ) -> Result<Oid> {
        let idx = self.table_idx(table)?;
        let object = expect_object(table, json)?;
        let exists = object
            .get(FROM_ARRAY_EXISTS_KEY)
            .and_then(Json::as_bool)
            .unwrap_or(false);

        let fields: HashMap<String, Value> = object
            .iter()
            .filter(|(key, _)| self.tables[idx].has_field(key))
            .map(|(key, value)| (key.clone(), Value::from_json(value)))
            .collect();

        let oid = match self.tables[idx].identifier_of(&fields) {
            Some(_) if exists => self.hydrate(table, fields)?,
            _ => self.new_record(table)?,
        };
        self.from_array(oid, json, deep, map_unknown)?;
        Ok(oid)
    }
}
