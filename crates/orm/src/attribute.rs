//! The attribute pipeline: reads through accessors and relations, writes
//! through column formatting and mutators, and snapshot diffing.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use crate::model::{Columns, Status};
use crate::record::Record;
use crate::value::Value;

/// A value held in a record's joined data.
#[derive(Debug, Clone)]
pub enum Attribute {
    /// A plain value: an extra selected column or a value set by name.
    Value(Value),
    /// A resolved to-one relation.
    One(Option<Box<Record>>),
    /// A resolved to-many relation.
    Many(Vec<Record>),
}

impl Attribute {
    /// The plain value, or `Null` for relations.
    #[must_use]
    pub fn value(&self) -> Value {
        match self {
            Self::Value(value) => value.clone(),
            Self::One(_) | Self::Many(_) => Value::Null,
        }
    }

    /// The related record of a to-one relation.
    #[must_use]
    pub fn one(&self) -> Option<&Record> {
        match self {
            Self::One(record) => record.as_deref(),
            _ => None,
        }
    }

    /// The related records of a to-many relation; empty otherwise.
    #[must_use]
    pub fn many(&self) -> &[Record] {
        match self {
            Self::Many(records) => records,
            _ => &[],
        }
    }
}

impl From<Value> for Attribute {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl Serialize for Attribute {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Value(value) => value.serialize(serializer),
            Self::One(record) => record.serialize(serializer),
            Self::Many(records) => {
                let mut seq = serializer.serialize_seq(Some(records.len()))?;
                for record in records {
                    seq.serialize_element(record)?;
                }
                seq.end()
            }
        }
    }
}

impl Record {
    /// Reads `name`: accessor first, then a declared relation (resolved once
    /// and memoized), then joined data, then the column value.
    ///
    /// # Errors
    ///
    /// Returns the relation's query error when `name` is a relation.
    pub async fn get(&mut self, name: &str) -> Result<Attribute> {
        if self.def.accessor(name).is_some() {
            return Ok(Attribute::Value(self.value(name)));
        }
        if self.def.describe(name).is_some() {
            return self.relation(name).await;
        }
        if let Some(attr) = self.joined.get(name) {
            return Ok(attr.clone());
        }
        Ok(Attribute::Value(self.columns.get(name).cloned().unwrap_or_default()))
    }

    /// Reads `name` without resolving relations: accessor, joined value, then
    /// column value. Absent attributes read as `Null`.
    #[must_use]
    pub fn value(&self, name: &str) -> Value {
        let stored = self
            .joined
            .get(name)
            .map(Attribute::value)
            .or_else(|| self.columns.get(name).cloned())
            .unwrap_or_default();

        match self.def.accessor(name) {
            Some(accessor) => accessor(&stored, &self.columns),
            None => stored,
        }
    }

    /// Writes `name` through the mutator; see [`Record::set_with`].
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be formatted for the column.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<bool> {
        self.set_with(name, value, true)
    }

    /// Writes `name`.
    ///
    /// A declared column is formatted for its SQL type, passed through the
    /// mutator when `apply_mutator` is set, stored, and `true` is returned.
    /// Any other name is stored in joined data and `false` is returned.
    /// Increment markers bypass formatting and mutators.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be formatted for the column.
    pub fn set_with(&mut self, name: &str, value: impl Into<Value>, apply_mutator: bool) -> Result<bool> {
        let value = value.into();
        let Some(column) = self.schema.column(name) else {
            self.joined.insert(name.to_owned(), Attribute::Value(value));
            return Ok(false);
        };

        let value = if value.is_increment() {
            value
        } else {
            let formatted = column.kind.format(value).with_context(|| {
                format!("invalid value for column '{name}' ({})", column.sql_type)
            })?;
            match self.def.mutator(name).filter(|_| apply_mutator) {
                Some(mutator) => mutator(formatted, &self.columns),
                None => formatted,
            }
        };

        let changed = self.origin.get(name) != Some(&value);
        self.columns.insert(name.to_owned(), value);
        if changed && matches!(self.status, Status::Loaded | Status::Persisted) {
            self.status = Status::Dirty;
        }
        Ok(true)
    }

    /// Removes `name` from column and joined data.
    pub fn unset(&mut self, name: &str) -> &mut Self {
        self.columns.remove(name);
        self.joined.remove(name);
        self
    }

    /// Returns `true` when `name` is set in column or joined data.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.columns.contains_key(name) || self.joined.contains_key(name)
    }

    /// Column data.
    #[must_use]
    pub const fn data(&self) -> &Columns {
        &self.columns
    }

    /// Joined data: extra selected columns, names set outside the schema and
    /// loaded relations.
    #[must_use]
    pub const fn joined(&self) -> &BTreeMap<String, Attribute> {
        &self.joined
    }

    /// Columns changed since the last snapshot. Increment markers are always
    /// included.
    #[must_use]
    pub fn diff(&self) -> Columns {
        self.columns
            .iter()
            .filter(|(name, value)| value.is_increment() || self.origin.get(*name) != Some(*value))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// Records the current column data as the pristine state.
    pub fn snapshot(&mut self) -> &mut Self {
        self.origin.clone_from(&self.columns);
        self
    }

    /// Column data read through accessors, skipping nulls when `not_null`.
    #[must_use]
    pub fn to_map(&self, not_null: bool) -> Columns {
        self.columns
            .keys()
            .map(|name| (name.clone(), self.value(name)))
            .filter(|(_, value)| !(not_null && value.is_null()))
            .collect()
    }

    /// Serializes column data (through accessors) and joined data.
    ///
    /// # Errors
    ///
    /// Returns an error if a JSON column holds a value serde cannot encode.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("failed to serialize record")
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        for (name, value) in self.to_map(false) {
            map.serialize_entry(&name, &value)?;
        }
        for (name, attr) in &self.joined {
            if !self.columns.contains_key(name) {
                map.serialize_entry(name, attr)?;
            }
        }
        map.end()
    }
}
