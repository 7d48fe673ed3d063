//! Terminal operations: reads, aggregates and lifecycle writes.

use std::collections::BTreeMap;
use std::mem;
use std::sync::Arc;

use anyhow::{Result, bail};
use tracing::instrument;

use crate::connection::Connection;
use crate::delete::Delete;
use crate::eager;
use crate::error::Error;
use crate::executor::QueryResult;
use crate::filter::Filter;
use crate::insert::Insert;
use crate::model::{Event, Outcome, Status};
use crate::record::Record;
use crate::select::Select;
use crate::state::{Overrides, QueryState};
use crate::update::Update;
use crate::value::Value;

const AGGREGATE: &str = "aggregate";

/// Which rows an update or delete may touch.
enum Scope {
    /// The record's own primary key, or the fluent conditions.
    Key,
    /// An explicit condition.
    Filter(Filter),
    /// Every row matched by the fluent conditions, none required.
    All,
}

impl Record {
    fn take_state(&mut self) -> (QueryState, Overrides) {
        let mut state = mem::take(&mut self.state);
        let overrides = state.take_overrides();
        (state, overrides)
    }

    fn target_table(&self, overrides: &mut Overrides) -> String {
        overrides.table.take().unwrap_or_else(|| self.table.clone())
    }

    async fn select_rows(&mut self, state: QueryState, mut overrides: Overrides) -> Result<(QueryResult, Vec<String>)> {
        let select = Select::new(self.target_table(&mut overrides));
        let query = state.compile(select).build()?;
        let result = self.execute(overrides.connection.as_deref(), query).await?;
        Ok((result, overrides.with))
    }

    /// Fetches the first matching row and eager-loads the requested
    /// relations on it.
    ///
    /// # Errors
    ///
    /// Returns the query error, or the first relation error.
    #[instrument(level = "debug", skip_all, fields(model = self.def.name()))]
    pub async fn get_one(&mut self) -> Result<Option<Self>> {
        let (mut state, overrides) = self.take_state();
        state.limit(1);
        let (result, with) = self.select_rows(state, overrides).await?;

        let Some(row) = result.rows.into_iter().next() else {
            return Ok(None);
        };
        let mut record = self.hydrate(row);
        record.last_query.clone_from(&self.last_query);
        eager::load_one(&mut record, &with).await?;
        Ok(Some(record))
    }

    /// Fetches the row whose primary key equals `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] if the table has no primary key, otherwise
    /// see [`Record::get_one`].
    pub async fn find(&mut self, key: impl Into<Value>) -> Result<Option<Self>> {
        let Some(pk) = self.schema.primary_key.clone() else {
            self.state = QueryState::default();
            bail!(Error::Schema(format!("table '{}' has no primary key", self.table)));
        };
        self.state.r#where(Filter::eq(pk, key));
        self.get_one().await
    }

    /// Fetches every matching row and eager-loads the requested relations
    /// with one query per relation.
    ///
    /// # Errors
    ///
    /// Returns the query error, or the first relation error.
    #[instrument(level = "debug", skip_all, fields(model = self.def.name()))]
    pub async fn all(&mut self) -> Result<Vec<Self>> {
        let (state, overrides) = self.take_state();
        let (result, with) = self.select_rows(state, overrides).await?;

        let mut records: Vec<Self> = result.rows.into_iter().map(|row| self.hydrate(row)).collect();
        eager::load_many(&mut records, &with).await?;
        Ok(records)
    }

    /// Values of `column` across the matching rows.
    ///
    /// # Errors
    ///
    /// Returns the query error.
    pub async fn column(&mut self, column: &str) -> Result<Vec<Value>> {
        self.state.field([column]);
        let (state, overrides) = self.take_state();
        let (result, _) = self.select_rows(state, overrides).await?;
        Ok(result.column(Some(column)))
    }

    /// Value of `column` in the first matching row, read from the result
    /// without accessors.
    ///
    /// # Errors
    ///
    /// Returns the query error.
    pub async fn scalar(&mut self, column: &str) -> Result<Value> {
        self.state.field([column]).limit(1);
        let (state, overrides) = self.take_state();
        let (result, _) = self.select_rows(state, overrides).await?;
        Ok(result.scalar(Some(column)))
    }

    /// Value of `column` in the first matching record, read through its
    /// accessor.
    ///
    /// # Errors
    ///
    /// See [`Record::get_one`].
    pub async fn val(&mut self, column: &str) -> Result<Value> {
        Ok(self.get_one().await?.map(|record| record.value(column)).unwrap_or_default())
    }

    /// Matching records keyed by their `column` value.
    ///
    /// # Errors
    ///
    /// See [`Record::all`].
    pub async fn index_by(&mut self, column: &str) -> Result<BTreeMap<String, Self>> {
        let records = self.all().await?;
        Ok(records
            .into_iter()
            .filter_map(|record| Some((record.value(column).group_key()?, record)))
            .collect())
    }

    async fn aggregate(&mut self, func: &str, field: &str) -> Result<Value> {
        self.state.field([format!("{func}({}) AS {AGGREGATE}", quote_field(field))]).limit(1);
        let (state, overrides) = self.take_state();
        let (result, _) = self.select_rows(state, overrides).await?;
        Ok(result.scalar(Some(AGGREGATE)))
    }

    /// `MAX(field)` over the matching rows.
    ///
    /// # Errors
    ///
    /// Returns the query error.
    pub async fn max(&mut self, field: &str) -> Result<Value> {
        self.aggregate("MAX", field).await
    }

    /// `MIN(field)` over the matching rows.
    ///
    /// # Errors
    ///
    /// Returns the query error.
    pub async fn min(&mut self, field: &str) -> Result<Value> {
        self.aggregate("MIN", field).await
    }

    /// `AVG(field)` over the matching rows.
    ///
    /// # Errors
    ///
    /// Returns the query error.
    pub async fn avg(&mut self, field: &str) -> Result<Value> {
        self.aggregate("AVG", field).await
    }

    /// `SUM(field)` over the matching rows.
    ///
    /// # Errors
    ///
    /// Returns the query error.
    pub async fn sum(&mut self, field: &str) -> Result<Value> {
        self.aggregate("SUM", field).await
    }

    /// `COUNT(field)` over the matching rows; `COUNT(*)` when `None`.
    ///
    /// # Errors
    ///
    /// Returns the query error.
    pub async fn count(&mut self, field: Option<&str>) -> Result<u64> {
        let value = self.aggregate("COUNT", field.unwrap_or("*")).await?;
        Ok(value.as_i64().and_then(|n| u64::try_from(n).ok()).unwrap_or(0))
    }

    /// Fills the create/update time columns that exist and were not set.
    /// On update the update time is always refreshed.
    fn stamp(&mut self, insert: bool) {
        let Some(now) = self.def.timestamps().now() else {
            return;
        };
        let create = self.def.create_time().filter(|_| insert);
        for (column, overwrite) in [(create, false), (self.def.update_time(), !insert)] {
            let Some(column) = column.and_then(|name| self.schema.column(name)) else {
                continue;
            };
            if overwrite || self.columns.get(&column.name).is_none_or(Value::is_null) {
                let value = column.kind.format(now.clone()).unwrap_or_else(|_| now.clone());
                self.columns.insert(column.name.clone(), value);
            }
        }
    }

    /// Condition on the record's own primary key, using the snapshot value
    /// when the key itself was changed.
    fn key_condition(&self) -> Option<Filter> {
        let pk = self.schema.primary_key.as_ref()?;
        let value = [self.origin.get(pk), self.columns.get(pk)]
            .into_iter()
            .flatten()
            .find(|value| !value.is_empty())?;
        Some(Filter::eq(pk.as_str(), value.clone()))
    }

    /// Inserts the column data, filling automatic timestamps and, when the
    /// primary key was not supplied, the generated key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::State`] if a column holds an increment marker, or the
    /// query error.
    #[instrument(level = "debug", skip_all, fields(model = self.def.name()))]
    pub async fn save(&mut self) -> Result<Outcome<Value>> {
        let (_, mut overrides) = self.take_state();
        let table = self.target_table(&mut overrides);
        self.insert(table, overrides.connection.as_deref()).await
    }

    async fn insert(&mut self, table: String, connection: Option<&str>) -> Result<Outcome<Value>> {
        if let Some((name, _)) = self.columns.iter().find(|(_, value)| value.is_increment()) {
            bail!(Error::State(format!("'{name}' holds an increment marker; use update")));
        }
        self.stamp(true);

        let def = Arc::clone(&self.def);
        if !def.before(Event::Insert, self) {
            def.after(Event::Insert, self, false);
            return Ok(Outcome::Vetoed);
        }

        let mut insert = Insert::new(table);
        for (column, value) in &self.columns {
            insert = insert.set(column.clone(), value.clone());
        }
        let query = insert.build()?;

        let result = match self.execute(connection, query).await {
            Ok(result) => result,
            Err(err) => {
                def.after(Event::Insert, self, false);
                return Err(err);
            }
        };

        let pk = self.schema.primary_key.clone();
        if let (Some(pk), Some(id)) = (&pk, result.last_insert_id)
            && self.columns.get(pk).is_none_or(Value::is_empty)
        {
            self.columns.insert(pk.clone(), Value::Int(id));
        }
        self.snapshot();
        self.status = Status::Persisted;
        def.after(Event::Insert, self, true);

        Ok(Outcome::Done(pk.and_then(|pk| self.columns.get(&pk).cloned()).unwrap_or_default()))
    }

    /// Persists the columns changed since the last snapshot, matching the
    /// record's primary key or, without one, the fluent conditions.
    ///
    /// An empty change set issues no statement, refreshes the snapshot and
    /// reports zero rows.
    ///
    /// # Errors
    ///
    /// Returns [`Error::State`] if there is neither a key value nor a
    /// condition, or the query error.
    #[instrument(level = "debug", skip_all, fields(model = self.def.name()))]
    pub async fn update(&mut self) -> Result<Outcome<u64>> {
        let (state, overrides) = self.take_state();
        self.update_scoped(state, overrides, Scope::Key).await
    }

    /// Assigns `data`, then behaves as [`Record::update`].
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be formatted, otherwise see
    /// [`Record::update`].
    pub async fn update_with<K, V>(&mut self, data: impl IntoIterator<Item = (K, V)>) -> Result<Outcome<u64>>
    where
        K: AsRef<str>,
        V: Into<Value>,
    {
        let (state, overrides) = self.take_state();
        self.assign(data)?;
        self.update_scoped(state, overrides, Scope::Key).await
    }

    /// Assigns `data` and persists the changes to the rows matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be formatted, or the query error.
    pub async fn update_where<K, V>(
        &mut self, data: impl IntoIterator<Item = (K, V)>, filter: Filter,
    ) -> Result<Outcome<u64>>
    where
        K: AsRef<str>,
        V: Into<Value>,
    {
        let (state, overrides) = self.take_state();
        self.assign(data)?;
        self.update_scoped(state, overrides, Scope::Filter(filter)).await
    }

    /// Assigns `data` and persists the changes without requiring a key or a
    /// condition.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be formatted, or the query error.
    pub async fn update_all<K, V>(&mut self, data: impl IntoIterator<Item = (K, V)>) -> Result<Outcome<u64>>
    where
        K: AsRef<str>,
        V: Into<Value>,
    {
        let (state, overrides) = self.take_state();
        self.assign(data)?;
        self.update_scoped(state, overrides, Scope::All).await
    }

    fn assign<K, V>(&mut self, data: impl IntoIterator<Item = (K, V)>) -> Result<()>
    where
        K: AsRef<str>,
        V: Into<Value>,
    {
        for (name, value) in data {
            self.set(name.as_ref(), value)?;
        }
        Ok(())
    }

    async fn update_scoped(
        &mut self, state: QueryState, mut overrides: Overrides, scope: Scope,
    ) -> Result<Outcome<u64>> {
        if self.diff().is_empty() {
            self.snapshot();
            return Ok(Outcome::Done(0));
        }

        let mut update = Update::new(self.target_table(&mut overrides));
        match scope {
            Scope::Filter(filter) => update = update.r#where(filter),
            Scope::All => {}
            Scope::Key => match self.key_condition() {
                Some(filter) => update = update.r#where(filter),
                None if state.has_conditions() => {}
                None => bail!(Error::State("update needs a primary key value or a condition".into())),
            },
        }

        self.stamp(false);
        let def = Arc::clone(&self.def);
        if !def.before(Event::Update, self) {
            def.after(Event::Update, self, false);
            return Ok(Outcome::Vetoed);
        }

        for (column, value) in self.diff() {
            update = update.set(column, value);
        }
        let query = state.compile_update(update).build()?;

        match self.execute(overrides.connection.as_deref(), query).await {
            Ok(result) => {
                // the stored value after an increment is unknown
                self.columns.retain(|_, value| !value.is_increment());
                self.snapshot();
                self.status = Status::Persisted;
                def.after(Event::Update, self, true);
                Ok(Outcome::Done(result.affected_rows))
            }
            Err(err) => {
                def.after(Event::Update, self, false);
                Err(err)
            }
        }
    }

    /// Deletes the row matching the record's primary key or, without a key
    /// value, the fluent conditions. The instance stays usable for a fresh
    /// `save`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] if the table has no primary key and no
    /// condition was given, [`Error::State`] if the key has no value and no
    /// condition was given, or the query error.
    #[instrument(level = "debug", skip_all, fields(model = self.def.name()))]
    pub async fn destroy(&mut self) -> Result<Outcome<u64>> {
        let (state, overrides) = self.take_state();
        self.delete_scoped(state, overrides, Scope::Key).await
    }

    /// Deletes the rows matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns the query error.
    pub async fn destroy_where(&mut self, filter: Filter) -> Result<Outcome<u64>> {
        let (state, overrides) = self.take_state();
        self.delete_scoped(state, overrides, Scope::Filter(filter)).await
    }

    /// Deletes every row matched by the fluent conditions, none required.
    ///
    /// # Errors
    ///
    /// Returns the query error.
    pub async fn destroy_all(&mut self) -> Result<Outcome<u64>> {
        let (state, overrides) = self.take_state();
        self.delete_scoped(state, overrides, Scope::All).await
    }

    async fn delete_scoped(
        &mut self, state: QueryState, mut overrides: Overrides, scope: Scope,
    ) -> Result<Outcome<u64>> {
        let mut delete = Delete::new(self.target_table(&mut overrides));
        match scope {
            Scope::Filter(filter) => delete = delete.r#where(filter),
            Scope::All => {}
            Scope::Key => match self.key_condition() {
                Some(filter) => delete = delete.r#where(filter),
                None if state.has_conditions() => {}
                None if self.schema.primary_key.is_none() => {
                    bail!(Error::Schema(format!("table '{}' has no primary key", self.table)))
                }
                None => bail!(Error::State("destroy needs a primary key value or a condition".into())),
            },
        }

        let def = Arc::clone(&self.def);
        if !def.before(Event::Delete, self) {
            def.after(Event::Delete, self, false);
            return Ok(Outcome::Vetoed);
        }

        let query = state.compile_delete(delete).build()?;
        match self.execute(overrides.connection.as_deref(), query).await {
            Ok(result) => {
                self.origin.clear();
                self.status = Status::New;
                def.after(Event::Delete, self, true);
                Ok(Outcome::Done(result.affected_rows))
            }
            Err(err) => {
                def.after(Event::Delete, self, false);
                Err(err)
            }
        }
    }

    /// Saves `rows` in order. With `replace`, a row carrying a primary key
    /// updates the existing row with that key. With `transaction`, all rows
    /// commit together and any failure rolls every row back.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] if the table has no primary key,
    /// [`Error::State`] if a hook vetoes a row, or the first row's failure.
    #[instrument(level = "debug", skip_all, fields(model = self.def.name()))]
    pub async fn save_all<R, K, V>(
        &mut self, rows: impl IntoIterator<Item = R>, replace: bool, transaction: bool,
    ) -> Result<Vec<Self>>
    where
        R: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let (_, overrides) = self.take_state();
        let Some(pk) = self.schema.primary_key.clone() else {
            bail!(Error::Schema(format!("table '{}' has no primary key", self.table)));
        };
        let rows: Vec<Vec<(String, Value)>> = rows
            .into_iter()
            .map(|row| row.into_iter().map(|(k, v)| (k.as_ref().to_owned(), v.into())).collect())
            .collect();

        let conn = self.resolve_connection(overrides.connection.as_deref())?;
        if transaction {
            conn.begin().await?;
        }

        match self.save_rows(rows, &pk, replace, &conn).await {
            Ok(saved) => {
                if transaction && let Err(err) = conn.commit().await {
                    rollback(conn.as_ref()).await;
                    return Err(err);
                }
                Ok(saved)
            }
            Err(err) => {
                if transaction {
                    rollback(conn.as_ref()).await;
                }
                Err(err)
            }
        }
    }

    async fn save_rows(
        &self, rows: Vec<Vec<(String, Value)>>, pk: &str, replace: bool, conn: &Arc<dyn Connection>,
    ) -> Result<Vec<Self>> {
        let mut saved = Vec::with_capacity(rows.len());
        for row in rows {
            let mut record = self.blank();
            record.client = Some(Arc::clone(conn));

            let key = row.iter().find(|(name, _)| name == pk).map(|(_, value)| value.clone());
            let existing = match key.filter(|key| replace && !key.is_empty()) {
                Some(key) => record.find(key).await?,
                None => None,
            };

            let outcome = match existing {
                Some(mut existing) => {
                    let outcome = existing
                        .update_with(row.into_iter().filter(|(name, _)| name != pk))
                        .await?;
                    record = existing;
                    outcome.done().map(|_| ())
                }
                None => {
                    record.with_data(row)?;
                    let table = record.table.clone();
                    record.insert(table, None).await?.done().map(|_| ())
                }
            };
            if outcome.is_none() {
                bail!(Error::State(format!("saving row {} was vetoed", saved.len())));
            }
            saved.push(record);
        }
        Ok(saved)
    }
}

async fn rollback(conn: &dyn Connection) {
    if let Err(err) = conn.rollback().await {
        tracing::warn!(error = %err, "rollback failed");
    }
}

fn quote_field(field: &str) -> String {
    let quote = |ident: &str| format!("\"{}\"", ident.replace('"', "\"\""));
    let plain = |ident: &str| !ident.is_empty() && ident.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_');

    match field.split_once('.') {
        _ if field == "*" => field.to_owned(),
        Some((table, column)) if plain(table) && plain(column) => {
            format!("{}.{}", quote(table), quote(column))
        }
        None if plain(field) => quote(field),
        _ => field.to_owned(),
    }
}
