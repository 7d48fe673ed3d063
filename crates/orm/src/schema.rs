//! Table metadata and the process-wide schema cache.

use std::any::TypeId;
use std::sync::{Arc, LazyLock};

use anyhow::{Result, anyhow, bail};
use chrono::DateTime;
use moka::future::Cache;
use tracing::instrument;

use crate::connection::Connection;
use crate::error::Error;
use crate::model::ModelDef;
use crate::value::{Value, parse_date, parse_datetime, parse_time};

static CACHE: LazyLock<SchemaCache> = LazyLock::new(SchemaCache::new);

/// SQL type class of a column, used to format values written to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ColumnType {
    Integer,
    Float,
    Boolean,
    Text,
    Binary,
    Date,
    Time,
    DateTime,
    Json,
}

impl ColumnType {
    /// Classifies a declared SQL type such as `VARCHAR(32)` or `BIGINT UNSIGNED`.
    #[must_use]
    pub fn from_sql(declared: &str) -> Self {
        let declared = declared.to_ascii_uppercase();
        let has = |needle: &str| declared.contains(needle);

        if has("JSON") {
            Self::Json
        } else if has("BOOL") {
            Self::Boolean
        } else if has("DATETIME") || has("TIMESTAMP") {
            Self::DateTime
        } else if has("DATE") {
            Self::Date
        } else if has("TIME") {
            Self::Time
        } else if has("INT") {
            Self::Integer
        } else if has("CHAR") || has("CLOB") || has("TEXT") {
            Self::Text
        } else if has("BLOB") || has("BINARY") {
            Self::Binary
        } else if has("REAL") || has("FLOA") || has("DOUB") || has("DEC") || has("NUM") {
            Self::Float
        } else {
            Self::Text
        }
    }

    /// Formats `value` for storage in a column of this type.
    ///
    /// Null and increment markers pass through unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error when the value cannot be represented in this type.
    #[allow(clippy::cast_possible_truncation)]
    pub fn format(self, value: Value) -> Result<Value> {
        if matches!(value, Value::Null | Value::Increment(_)) {
            return Ok(value);
        }

        let formatted = match (self, value) {
            (Self::Integer, Value::Int(v)) => Value::Int(v),
            (Self::Integer, Value::Float(v)) => Value::Int(v.trunc() as i64),
            (Self::Integer, Value::Bool(v)) => Value::Int(i64::from(v)),
            (Self::Integer, Value::Text(v)) => {
                let trimmed = v.trim();
                match trimmed.parse::<i64>() {
                    Ok(parsed) => Value::Int(parsed),
                    Err(_) => match trimmed.parse::<f64>() {
                        Ok(parsed) => Value::Int(parsed.trunc() as i64),
                        Err(_) => bail!("'{v}' is not an integer"),
                    },
                }
            }
            (Self::Integer, Value::DateTime(v)) => Value::Int(v.and_utc().timestamp()),

            (Self::Float, value @ (Value::Int(_) | Value::Float(_) | Value::Text(_))) => {
                let Some(parsed) = value.as_f64() else {
                    bail!("'{value}' is not a number");
                };
                Value::Float(parsed)
            }
            (Self::Float, Value::Bool(v)) => Value::Float(f64::from(u8::from(v))),

            (Self::Boolean, Value::Bool(v)) => Value::Bool(v),
            (Self::Boolean, Value::Int(v)) => Value::Bool(v != 0),
            (Self::Boolean, Value::Text(v)) => match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Value::Bool(true),
                "0" | "false" | "no" | "off" | "" => Value::Bool(false),
                _ => bail!("'{v}' is not a boolean"),
            },

            (Self::Text, Value::Json(v)) => Value::Text(v.to_string()),
            (Self::Text, Value::Bytes(v)) => Value::Text(String::from_utf8(v)?),
            (Self::Text, Value::Bool(v)) => Value::Text(u8::from(v).to_string()),
            (Self::Text, value) => Value::Text(value.to_string()),

            (Self::Binary, Value::Bytes(v)) => Value::Bytes(v),
            (Self::Binary, Value::Text(v)) => Value::Bytes(v.into_bytes()),

            (Self::Date, Value::Date(v)) => Value::Date(v),
            (Self::Date, Value::DateTime(v)) => Value::Date(v.date()),
            (Self::Date, Value::Text(v)) => {
                Value::Date(parse_date(&v).ok_or_else(|| anyhow!("'{v}' is not a date"))?)
            }
            (Self::Date, Value::Int(v)) => Value::Date(from_unix(v)?.date()),

            (Self::DateTime, Value::DateTime(v)) => Value::DateTime(v),
            (Self::DateTime, Value::Date(v)) => {
                Value::DateTime(v.and_hms_opt(0, 0, 0).ok_or_else(|| anyhow!("invalid date"))?)
            }
            (Self::DateTime, Value::Text(v)) => Value::DateTime(
                parse_datetime(&v).ok_or_else(|| anyhow!("'{v}' is not a timestamp"))?,
            ),
            (Self::DateTime, Value::Int(v)) => Value::DateTime(from_unix(v)?),

            (Self::Time, Value::Time(v)) => Value::Time(v),
            (Self::Time, Value::DateTime(v)) => Value::Time(v.time()),
            (Self::Time, Value::Text(v)) => {
                Value::Time(parse_time(&v).ok_or_else(|| anyhow!("'{v}' is not a time"))?)
            }

            (Self::Json, Value::Json(v)) => Value::Json(v),
            (Self::Json, Value::Text(v)) => {
                Value::Json(serde_json::from_str(&v).unwrap_or(serde_json::Value::String(v)))
            }
            (Self::Json, Value::Bytes(v)) => Value::Json(serde_json::from_slice(&v)?),
            (Self::Json, value) => Value::Json(serde_json::to_value(&value)?),

            (kind, value) => bail!("cannot store {value:?} in a {kind:?} column"),
        };

        Ok(formatted)
    }
}

fn from_unix(secs: i64) -> Result<chrono::NaiveDateTime> {
    DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| anyhow!("{secs} is out of range for a timestamp"))
}

/// Column descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Declared SQL type, verbatim.
    pub sql_type: String,
    /// Type class derived from `sql_type`.
    pub kind: ColumnType,
    /// Whether the column accepts `NULL`.
    pub nullable: bool,
}

impl Column {
    /// Creates a descriptor, classifying the declared SQL type.
    #[must_use]
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>, nullable: bool) -> Self {
        let sql_type = sql_type.into();
        Self {
            name: name.into(),
            kind: ColumnType::from_sql(&sql_type),
            sql_type,
            nullable,
        }
    }
}

/// Introspected table metadata. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    /// Table name.
    pub table: String,
    /// Columns in declaration order.
    pub columns: Vec<Column>,
    /// Primary-key column, when the table has one.
    pub primary_key: Option<String>,
}

impl TableSchema {
    /// Looks up a column by name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.name == name)
    }

    /// Returns `true` when `name` is a declared column.
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }
}

type SchemaKey = (TypeId, String);

/// Process-wide read-through cache of table metadata, keyed by model type and
/// table name.
///
/// Concurrent first loads of the same key are coalesced so the introspection
/// query runs once.
pub struct SchemaCache {
    cache: Cache<SchemaKey, Arc<TableSchema>>,
}

impl SchemaCache {
    fn new() -> Self {
        Self {
            cache: Cache::builder().build(),
        }
    }

    /// The shared instance.
    #[must_use]
    pub fn global() -> &'static Self {
        &CACHE
    }

    /// Returns the schema of `table` for `def`, introspecting on first use.
    ///
    /// Concurrent first loads of the same key share one introspection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] when the table does not exist or
    /// introspection fails.
    #[instrument(level = "debug", skip_all, fields(model = def.name(), table = table))]
    pub async fn load(
        &self, def: &ModelDef, table: &str, conn: Arc<dyn Connection>,
    ) -> Result<Arc<TableSchema>> {
        let key = (def.type_id(), table.to_owned());
        let table = table.to_owned();

        self.cache
            .try_get_with(key, async move {
                let described = conn.describe(table.clone()).await.map_err(|err| {
                    Error::Schema(format!("failed to introspect table '{table}': {err:#}"))
                })?;
                let Some(schema) = described else {
                    return Err(Error::Schema(format!("table '{table}' does not exist")));
                };
                tracing::debug!(
                    table = %table,
                    columns = schema.columns.len(),
                    primary_key = ?schema.primary_key,
                    "introspected table schema"
                );
                Ok(Arc::new(schema))
            })
            .await
            .map_err(|shared: Arc<Error>| anyhow::Error::new(Error::clone(&shared)))
    }

    /// Drops the cached schema of `table` for `def`.
    pub async fn invalidate(&self, def: &ModelDef, table: &str) {
        self.cache.invalidate(&(def.type_id(), table.to_owned())).await;
    }

    /// Drops and rebuilds the cached schema of `table` for `def`.
    ///
    /// # Errors
    ///
    /// See [`SchemaCache::load`].
    pub async fn reload(
        &self, def: &ModelDef, table: &str, conn: Arc<dyn Connection>,
    ) -> Result<Arc<TableSchema>> {
        self.invalidate(def, table).await;
        self.load(def, table, conn).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    #[test]
    fn classifies_declared_types() {
        assert_eq!(ColumnType::from_sql("INTEGER"), ColumnType::Integer);
        assert_eq!(ColumnType::from_sql("bigint unsigned"), ColumnType::Integer);
        assert_eq!(ColumnType::from_sql("VARCHAR(32)"), ColumnType::Text);
        assert_eq!(ColumnType::from_sql("DECIMAL(10,2)"), ColumnType::Float);
        assert_eq!(ColumnType::from_sql("DATETIME"), ColumnType::DateTime);
        assert_eq!(ColumnType::from_sql("TIMESTAMP"), ColumnType::DateTime);
        assert_eq!(ColumnType::from_sql("DATE"), ColumnType::Date);
        assert_eq!(ColumnType::from_sql("TIME"), ColumnType::Time);
        assert_eq!(ColumnType::from_sql("BOOLEAN"), ColumnType::Boolean);
        assert_eq!(ColumnType::from_sql("JSON"), ColumnType::Json);
        assert_eq!(ColumnType::from_sql("BLOB"), ColumnType::Binary);
        assert_eq!(ColumnType::from_sql(""), ColumnType::Text);
    }

    #[test]
    fn formats_numbers() {
        assert_eq!(ColumnType::Integer.format("42".into()).unwrap(), Value::Int(42));
        assert_eq!(ColumnType::Integer.format(Value::Float(4.9)).unwrap(), Value::Int(4));
        assert_eq!(ColumnType::Integer.format(true.into()).unwrap(), Value::Int(1));
        assert_eq!(ColumnType::Float.format(3.into()).unwrap(), Value::Float(3.0));
        ColumnType::Integer.format("forty".into()).unwrap_err();
    }

    #[test]
    fn formats_dates() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        assert_eq!(ColumnType::Date.format("2024-01-15".into()).unwrap(), Value::Date(date));
        assert_eq!(
            ColumnType::DateTime.format("2024-01-15".into()).unwrap(),
            Value::DateTime(date.and_hms_opt(0, 0, 0).unwrap())
        );
        assert_eq!(
            ColumnType::DateTime.format(Value::Int(0)).unwrap(),
            Value::DateTime(NaiveDate::from_ymd_opt(1970, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap())
        );
    }

    #[test]
    fn formats_json_and_text() {
        assert_eq!(
            ColumnType::Json.format(r#"{"a":[1,2]}"#.into()).unwrap(),
            Value::Json(serde_json::json!({"a": [1, 2]}))
        );
        assert_eq!(ColumnType::Text.format(5.into()).unwrap(), Value::Text("5".to_string()));
        assert_eq!(
            ColumnType::Text.format(Value::Json(serde_json::json!([1]))).unwrap(),
            Value::Text("[1]".to_string())
        );
    }

    #[test]
    fn passes_markers_and_null_through() {
        assert_eq!(ColumnType::Integer.format(Value::inc(2)).unwrap(), Value::Increment(2));
        assert_eq!(ColumnType::Date.format(Value::Null).unwrap(), Value::Null);
    }
}
