//! Records: the column-name → value mapping exchanged with callers.
//!
//! A [`Record`] keeps columns in the order the server returned them. Relation
//! loading attaches nested collections under the relation's result name.
//! Typed models plug in through serde: [`Record::deserialize`] and
//! [`Record::from_serialize`].

use crate::error::{OrmError, OrmResult};
use crate::value::Value;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use tokio_postgres::Row;

/// An ordered set of column values plus loaded relations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Value)>,
    relations: BTreeMap<String, Vec<Record>>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`Record::set`].
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    /// Set a column, replacing any previous value in place.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(c, _)| *c == column) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        let idx = self.fields.iter().position(|(c, _)| c == column)?;
        Some(self.fields.remove(idx).1)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(c, _)| c.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(c, v)| (c.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Related records loaded under `name`, if that relation was requested.
    pub fn related(&self, name: &str) -> Option<&[Record]> {
        self.relations.get(name).map(Vec::as_slice)
    }

    pub fn relations(&self) -> &BTreeMap<String, Vec<Record>> {
        &self.relations
    }

    pub(crate) fn related_mut(&mut self, name: &str) -> &mut Vec<Record> {
        self.relations.entry(name.to_string()).or_default()
    }

    pub fn set_related(&mut self, name: impl Into<String>, records: Vec<Record>) {
        self.relations.insert(name.into(), records);
    }

    /// Decode every column of a row.
    pub fn from_row(row: &Row) -> OrmResult<Self> {
        let mut record = Record::new();
        for (idx, column) in row.columns().iter().enumerate() {
            let value: Value = row
                .try_get(idx)
                .map_err(|e| OrmError::decode(column.name(), e.to_string()))?;
            record.fields.push((column.name().to_string(), value));
        }
        Ok(record)
    }

    /// Decode the columns `select` maps to an output name; others are skipped.
    pub(crate) fn from_row_columns<'r, 'n>(
        row: &'r Row,
        select: impl Fn(&'r str) -> Option<&'n str>,
    ) -> OrmResult<Self> {
        let mut record = Record::new();
        for (idx, column) in row.columns().iter().enumerate() {
            let Some(name) = select(column.name()) else {
                continue;
            };
            let value: Value = row
                .try_get(idx)
                .map_err(|e| OrmError::decode(column.name(), e.to_string()))?;
            record.fields.push((name.to_string(), value));
        }
        Ok(record)
    }

    /// JSON object of all columns, with relations as nested arrays.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (column, value) in &self.fields {
            map.insert(column.clone(), value.to_json());
        }
        for (name, records) in &self.relations {
            map.insert(
                name.clone(),
                serde_json::Value::Array(records.iter().map(Record::to_json).collect()),
            );
        }
        serde_json::Value::Object(map)
    }

    /// Deserialize into a caller type via its serde implementation.
    pub fn deserialize<T: DeserializeOwned>(&self) -> OrmResult<T> {
        Ok(serde_json::from_value(self.to_json())?)
    }

    /// Build a record from any type that serializes to a JSON object.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> OrmResult<Self> {
        match serde_json::to_value(value)? {
            serde_json::Value::Object(map) => {
                let mut record = Record::new();
                for (column, json) in map {
                    record.fields.push((column, Value::from_json(json)));
                }
                Ok(record)
            }
            other => Err(OrmError::Serialization(format!(
                "expected an object, got {other}"
            ))),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (k, v) in iter {
            record.set(k, v);
        }
        record
    }
}

impl Serialize for Record {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}
