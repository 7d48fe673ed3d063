//! Table rows as records: construction, fluent state and hydration.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::attribute::Attribute;
use crate::connection::{Connection, Manager};
use crate::executor::QueryResult;
use crate::filter::Filter;
use crate::join::Join;
use crate::model::{Columns, Model, ModelDef, Status, definition};
use crate::query::Query;
use crate::schema::{SchemaCache, TableSchema};
use crate::state::{Criterion, QueryState};
use crate::types::Row;
use crate::value::Value;

/// Callback run after every statement, whether it succeeded or not: the
/// result (`None` on failure), the statement and its start time.
pub type Observer = Arc<dyn Fn(Option<&QueryResult>, &Query, DateTime<Utc>) + Send + Sync>;

/// One table row of a [`Model`].
///
/// Column data only ever holds columns declared in the table schema; any
/// other attribute, including loaded relations, lives in joined data.
///
/// A record is not meant to be shared between tasks while a fluent chain is
/// being built: each terminal operation consumes the state accumulated on
/// the instance.
#[derive(Clone)]
pub struct Record {
    pub(crate) def: Arc<ModelDef>,
    pub(crate) schema: Arc<TableSchema>,
    pub(crate) table: String,
    pub(crate) connection: String,
    pub(crate) client: Option<Arc<dyn Connection>>,
    pub(crate) columns: Columns,
    pub(crate) joined: BTreeMap<String, Attribute>,
    pub(crate) origin: Columns,
    pub(crate) status: Status,
    pub(crate) state: QueryState,
    pub(crate) last_query: Option<Query>,
    pub(crate) last_result: Option<QueryResult>,
    pub(crate) observer: Option<Observer>,
}

impl Record {
    /// A new record of `M` on the model's named connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is not registered with the
    /// [`Manager`], or [`Error::Schema`](crate::Error::Schema) if the table
    /// does not exist.
    pub async fn create<M: Model>() -> Result<Self> {
        let def = definition::<M>();
        let connection = def.connection().to_owned();
        Self::open(def, connection, None, None).await
    }

    /// A new record of `M` bound to `conn`, bypassing the [`Manager`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`](crate::Error::Schema) if the table does not
    /// exist.
    pub async fn invoke<M: Model>(conn: Arc<dyn Connection>) -> Result<Self> {
        let def = definition::<M>();
        let connection = def.connection().to_owned();
        Self::open(def, connection, Some(conn), None).await
    }

    async fn open(
        def: Arc<ModelDef>, connection: String, client: Option<Arc<dyn Connection>>,
        observer: Option<Observer>,
    ) -> Result<Self> {
        let conn = match &client {
            Some(client) => Arc::clone(client),
            None => Manager::global().connection(&connection)?,
        };
        let table = def.table().to_owned();
        let schema = SchemaCache::global().load(&def, &table, conn).await?;

        Ok(Self {
            def,
            schema,
            table,
            connection,
            client,
            columns: Columns::new(),
            joined: BTreeMap::new(),
            origin: Columns::new(),
            status: Status::New,
            state: QueryState::default(),
            last_query: None,
            last_result: None,
            observer,
        })
    }

    /// A new record of the related model `def`, sharing this record's
    /// connection and observer.
    pub(crate) async fn related(&self, def: Arc<ModelDef>) -> Result<Self> {
        Self::open(def, self.connection.clone(), self.client.clone(), self.observer.clone()).await
    }

    /// An empty record of the same model, table and connection.
    #[must_use]
    pub fn blank(&self) -> Self {
        Self {
            def: Arc::clone(&self.def),
            schema: Arc::clone(&self.schema),
            table: self.table.clone(),
            connection: self.connection.clone(),
            client: self.client.clone(),
            columns: Columns::new(),
            joined: BTreeMap::new(),
            origin: Columns::new(),
            status: Status::New,
            state: QueryState::default(),
            last_query: None,
            last_result: None,
            observer: self.observer.clone(),
        }
    }

    /// Assigns `data` through the attribute pipeline, mutators included, then
    /// takes a snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be formatted for its column.
    pub fn with_data<K, V>(&mut self, data: impl IntoIterator<Item = (K, V)>) -> Result<&mut Self>
    where
        K: AsRef<str>,
        V: Into<Value>,
    {
        for (name, value) in data {
            self.set(name.as_ref(), value)?;
        }
        self.snapshot();
        Ok(self)
    }

    /// Builds a loaded record from a result row. Schema columns are formatted
    /// without mutators; a value that cannot be formatted is kept as read.
    pub(crate) fn hydrate(&self, row: Row) -> Self {
        let mut record = self.blank();
        for field in row.fields {
            let raw = Value::from(field.value);
            match self.schema.column(&field.name) {
                Some(column) => {
                    let value = column.kind.format(raw.clone()).unwrap_or(raw);
                    record.columns.insert(field.name, value);
                }
                None => {
                    record.joined.insert(field.name, Attribute::Value(raw));
                }
            }
        }
        record.status = Status::Loaded;
        record.snapshot();
        record
    }

    /// The model definition.
    #[must_use]
    pub fn def(&self) -> &ModelDef {
        &self.def
    }

    /// The table schema.
    #[must_use]
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// The effective table name.
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// The default connection name.
    #[must_use]
    pub fn connection_name(&self) -> &str {
        &self.connection
    }

    /// Lifecycle position.
    #[must_use]
    pub const fn status(&self) -> Status {
        self.status
    }

    /// The fluent state that the next terminal operation will consume.
    #[must_use]
    pub const fn state(&self) -> &QueryState {
        &self.state
    }

    /// The most recently executed statement.
    #[must_use]
    pub const fn last_query(&self) -> Option<&Query> {
        self.last_query.as_ref()
    }

    /// The result of the most recent statement; `None` if it failed.
    #[must_use]
    pub const fn last_result(&self) -> Option<&QueryResult> {
        self.last_result.as_ref()
    }

    /// Re-targets this record at `table` and loads that table's schema.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`](crate::Error::Schema) if the table does not
    /// exist; the record is left unchanged.
    pub async fn set_table(&mut self, table: impl Into<String>) -> Result<&mut Self> {
        let table = table.into();
        let conn = self.resolve_connection(None)?;
        self.schema = SchemaCache::global().load(&self.def, &table, conn).await?;
        self.table = table;
        Ok(self)
    }

    /// Drops the cached schema of the current table and introspects it again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`](crate::Error::Schema) if the table no longer
    /// exists.
    pub async fn reload_schema(&mut self) -> Result<&mut Self> {
        let conn = self.resolve_connection(None)?;
        self.schema = SchemaCache::global().reload(&self.def, &self.table, conn).await?;
        Ok(self)
    }

    /// Sets the default connection name. An injected connection still takes
    /// precedence.
    pub fn connection(&mut self, name: impl Into<String>) -> &mut Self {
        self.connection = name.into();
        self
    }

    /// Installs the statement observer, inherited by related records.
    pub fn on_query(
        &mut self, observer: impl Fn(Option<&QueryResult>, &Query, DateTime<Utc>) + Send + Sync + 'static,
    ) -> &mut Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Replaces the selected fields.
    pub fn field(&mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.state.field(fields);
        self
    }

    /// Limits the row count.
    pub const fn limit(&mut self, count: u64) -> &mut Self {
        self.state.limit(count);
        self
    }

    /// Returns `count` rows after skipping `offset`.
    pub const fn page(&mut self, offset: u64, count: u64) -> &mut Self {
        self.state.page(offset, count);
        self
    }

    /// Appends an ascending sort.
    pub fn order_by(&mut self, column: impl Into<String>) -> &mut Self {
        self.state.order_by(column);
        self
    }

    /// Appends a descending sort.
    pub fn order_by_desc(&mut self, column: impl Into<String>) -> &mut Self {
        self.state.order_by_desc(column);
        self
    }

    /// Appends a literal condition.
    pub fn r#where(&mut self, filter: Filter) -> &mut Self {
        self.state.r#where(filter);
        self
    }

    /// Appends a column mapping condition. See [`QueryState::where_map`].
    pub fn where_map<K, C>(&mut self, criteria: impl IntoIterator<Item = (K, C)>) -> &mut Self
    where
        K: Into<String>,
        C: Into<Criterion>,
    {
        self.state.where_map(criteria);
        self
    }

    /// Groups by `column`.
    pub fn group(&mut self, column: impl Into<String>) -> &mut Self {
        self.state.group(column);
        self
    }

    /// Appends a join.
    pub fn join(&mut self, join: Join) -> &mut Self {
        self.state.join(join);
        self
    }

    /// Aliases the base table.
    pub fn alias(&mut self, alias: impl Into<String>) -> &mut Self {
        self.state.alias(alias);
        self
    }

    /// Reports the unpaginated row count in [`QueryResult::total_count`].
    pub const fn with_total_count(&mut self) -> &mut Self {
        self.state.with_total_count();
        self
    }

    /// Eager-loads the named relations on the next read.
    pub fn with(&mut self, relations: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.state.with(relations);
        self
    }

    /// Targets `table` for the next statement only.
    pub fn temp_table(&mut self, table: impl Into<String>) -> &mut Self {
        self.state.temp_table(table);
        self
    }

    /// Uses the named connection for the next statement only.
    pub fn temp_connection(&mut self, name: impl Into<String>) -> &mut Self {
        self.state.temp_connection(name);
        self
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("model", &self.def.name())
            .field("table", &self.table)
            .field("status", &self.status)
            .field("columns", &self.columns)
            .field("joined", &self.joined)
            .finish_non_exhaustive()
    }
}
