//! Embedded `SQLite` connection.
//!
//! Suitable for development, tests and single-process deployments.

#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::cast_possible_wrap)]

use std::sync::Arc;

use anyhow::{Context, Result};
use fromenv::FromEnv;
use futures::FutureExt;
use parking_lot::Mutex;
use rusqlite::types::ValueRef;
use rusqlite::{Connection as SqliteConnection, params_from_iter};
use tracing::instrument;

use crate::connection::{Backend, Connection, Executed, FutureResult};
use crate::schema::{Column, TableSchema};
use crate::types::{DataType, Field, Row};

/// Options used to open the `SQLite` database.
///
/// Loaded from environment variables by [`Backend::connect`].
#[derive(Debug, Clone, FromEnv)]
pub struct ConnectOptions {
    /// Database path or URI; `:memory:` opens a private in-memory database.
    #[env(from = "SQL_DATABASE", default = ":memory:")]
    pub database: String,
}

impl crate::connection::FromEnv for ConnectOptions {
    fn from_env() -> Result<Self> {
        Self::from_env().finalize().context("issue loading connection options")
    }
}

/// `SQLite` implementation of [`Connection`].
#[derive(Debug, Clone)]
pub struct Sqlite {
    // rusqlite::Connection isn't `Sync`
    conn: Arc<Mutex<SqliteConnection>>,
    database: String,
}

impl Backend for Sqlite {
    type ConnectOptions = ConnectOptions;

    #[instrument]
    async fn connect_with(options: Self::ConnectOptions) -> Result<Self> {
        tracing::debug!("opening SQLite database: {}", options.database);

        let conn =
            SqliteConnection::open(&options.database).context("failed to open SQLite database")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            database: options.database,
        })
    }
}

impl Sqlite {
    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if `SQLite` cannot allocate the database.
    pub async fn memory() -> Result<Self> {
        Self::connect_with(ConnectOptions {
            database: ":memory:".to_string(),
        })
        .await
    }

    /// Runs one or more `;`-separated statements without parameters.
    ///
    /// # Errors
    ///
    /// Returns the driver error for the first failing statement.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.lock().execute_batch(sql).context("failed to execute batch")
    }

    fn batch(&self, sql: &'static str) -> FutureResult<()> {
        let conn = Arc::clone(&self.conn);
        async move { conn.lock().execute_batch(sql).with_context(|| format!("failed to {sql}")) }
            .boxed()
    }
}

impl Connection for Sqlite {
    fn query(&self, query: String, params: Vec<DataType>) -> FutureResult<Vec<Row>> {
        tracing::debug!("executing query: {}", query);
        let conn = Arc::clone(&self.conn);

        async move {
            let conn = conn.lock();
            let mut stmt = conn.prepare(&query).context("failed to prepare statement")?;
            let sqlite_params: Vec<_> = params.iter().map(datatype_to_sqlite_value).collect();
            let column_names: Vec<String> =
                stmt.column_names().iter().map(ToString::to_string).collect();

            let mut rows =
                stmt.query(params_from_iter(sqlite_params.iter())).context("failed to execute query")?;

            let mut result_rows = Vec::new();
            let mut index = 0;
            while let Some(row) = rows.next().context("failed to fetch row")? {
                let mut fields = Vec::with_capacity(column_names.len());
                for (i, name) in column_names.iter().enumerate() {
                    let value = row.get_ref(i).context("failed to get column value")?;
                    fields.push(Field {
                        name: name.clone(),
                        value: sqlite_value_to_datatype(value)?,
                    });
                }

                result_rows.push(Row {
                    index: index.to_string(),
                    fields,
                });
                index += 1;
            }

            Ok(result_rows)
        }
        .boxed()
    }

    fn exec(&self, query: String, params: Vec<DataType>) -> FutureResult<Executed> {
        tracing::debug!("executing statement: {}", query);
        let conn = Arc::clone(&self.conn);

        async move {
            let conn = conn.lock();
            let mut stmt = conn.prepare(&query).context("failed to prepare statement")?;
            let sqlite_params: Vec<_> = params.iter().map(datatype_to_sqlite_value).collect();

            let rows_affected = stmt
                .execute(params_from_iter(sqlite_params.iter()))
                .context("failed to execute statement")?;

            let rowid = conn.last_insert_rowid();
            Ok(Executed {
                rows_affected: rows_affected as u64,
                last_insert_id: (rowid != 0).then_some(rowid),
            })
        }
        .boxed()
    }

    fn begin(&self) -> FutureResult<()> {
        self.batch("BEGIN")
    }

    fn commit(&self) -> FutureResult<()> {
        self.batch("COMMIT")
    }

    fn rollback(&self) -> FutureResult<()> {
        self.batch("ROLLBACK")
    }

    fn database(&self) -> String {
        self.database.clone()
    }

    fn describe(&self, table: String) -> FutureResult<Option<TableSchema>> {
        let conn = Arc::clone(&self.conn);

        async move {
            let conn = conn.lock();
            let sql = format!("PRAGMA table_info({})", quote(&table));
            let mut stmt = conn.prepare(&sql).context("failed to prepare table_info")?;

            // cid, name, type, notnull, dflt_value, pk
            let mut rows = stmt.query([]).context("failed to read table_info")?;
            let mut columns = Vec::new();
            let mut primary_key = None;
            while let Some(row) = rows.next()? {
                let name: String = row.get(1)?;
                let sql_type: String = row.get(2)?;
                let not_null: bool = row.get(3)?;
                let pk_position: i64 = row.get(5)?;

                if pk_position == 1 {
                    primary_key = Some(name.clone());
                }
                columns.push(Column::new(name, sql_type, !not_null));
            }

            if columns.is_empty() {
                return Ok(None);
            }
            Ok(Some(TableSchema {
                table,
                columns,
                primary_key,
            }))
        }
        .boxed()
    }

    fn foreign_keys(&self, table: String, referenced: String) -> FutureResult<Vec<String>> {
        let conn = Arc::clone(&self.conn);

        async move {
            let conn = conn.lock();
            let sql = format!("PRAGMA foreign_key_list({})", quote(&table));
            let mut stmt = conn.prepare(&sql).context("failed to prepare foreign_key_list")?;

            // id, seq, table, from, to, on_update, on_delete, match
            let mut rows = stmt.query([]).context("failed to read foreign_key_list")?;
            let mut columns = Vec::new();
            while let Some(row) = rows.next()? {
                let target: String = row.get(2)?;
                if target.eq_ignore_ascii_case(&referenced) {
                    columns.push(row.get(3)?);
                }
            }
            Ok(columns)
        }
        .boxed()
    }
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn datatype_to_sqlite_value(dt: &DataType) -> rusqlite::types::Value {
    use rusqlite::types::Value;

    match dt {
        DataType::Boolean(Some(b)) => Value::Integer(i64::from(*b)),
        DataType::Int32(Some(i)) => Value::Integer(i64::from(*i)),
        DataType::Int64(Some(i)) => Value::Integer(*i),
        DataType::Uint32(Some(u)) => Value::Integer(i64::from(*u)),
        DataType::Uint64(Some(u)) => Value::Integer(*u as i64),
        DataType::Float(Some(f)) => Value::Real(f64::from(*f)),
        DataType::Double(Some(f)) => Value::Real(*f),
        DataType::Str(Some(s))
        | DataType::Date(Some(s))
        | DataType::Time(Some(s))
        | DataType::Timestamp(Some(s)) => Value::Text(s.clone()),
        DataType::Binary(Some(b)) => Value::Blob(b.clone()),
        // All None variants map to NULL
        _ => Value::Null,
    }
}

fn sqlite_value_to_datatype(value: ValueRef) -> Result<DataType> {
    match value {
        ValueRef::Null => Ok(DataType::Str(None)),
        ValueRef::Integer(i) => Ok(DataType::Int64(Some(i))),
        ValueRef::Real(f) => Ok(DataType::Double(Some(f))),
        ValueRef::Text(t) => {
            let s = std::str::from_utf8(t).context("invalid UTF-8 in text value")?;
            Ok(DataType::Str(Some(s.to_string())))
        }
        ValueRef::Blob(b) => Ok(DataType::Binary(Some(b.to_vec()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sqlite_operations() {
        let conn = Sqlite::memory().await.expect("connect");

        let created = conn
            .exec(
                "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, age INTEGER)"
                    .to_string(),
                vec![],
            )
            .await
            .expect("create table");
        assert_eq!(created.rows_affected, 0);

        let inserted = conn
            .exec(
                "INSERT INTO users (name, age) VALUES (?, ?)".to_string(),
                vec![DataType::Str(Some("Alice".to_string())), DataType::Int32(Some(30))],
            )
            .await
            .expect("insert");
        assert_eq!(inserted.rows_affected, 1);
        assert_eq!(inserted.last_insert_id, Some(1));

        let rows = conn
            .query("SELECT id, name, age FROM users".to_string(), vec![])
            .await
            .expect("query");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&DataType::Str(Some("Alice".to_string()))));
    }

    #[tokio::test]
    async fn describes_tables() {
        let conn = Sqlite::memory().await.expect("connect");
        conn.execute_batch(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
             CREATE TABLE posts (id INTEGER PRIMARY KEY, user_id INTEGER REFERENCES users(id));",
        )
        .expect("create tables");

        let schema = conn.describe("users".to_string()).await.expect("describe").expect("table");
        assert_eq!(schema.primary_key.as_deref(), Some("id"));
        assert_eq!(schema.columns.len(), 2);
        assert!(!schema.column("name").expect("name column").nullable);

        assert!(conn.describe("missing".to_string()).await.expect("describe").is_none());

        let keys = conn
            .foreign_keys("posts".to_string(), "users".to_string())
            .await
            .expect("foreign keys");
        assert_eq!(keys, vec!["user_id".to_string()]);
    }

    #[tokio::test]
    async fn rolls_back() {
        let conn = Sqlite::memory().await.expect("connect");
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY)").expect("create");

        conn.begin().await.expect("begin");
        conn.exec("INSERT INTO t (id) VALUES (1)".to_string(), vec![]).await.expect("insert");
        conn.rollback().await.expect("rollback");

        let rows = conn.query("SELECT id FROM t".to_string(), vec![]).await.expect("query");
        assert!(rows.is_empty());
    }
}
