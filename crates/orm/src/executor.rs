//! Statement execution on behalf of a record.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;

use crate::connection::{Connection, Manager};
use crate::error::Error;
use crate::query::Query;
use crate::record::Record;
use crate::select::TOTAL_COUNT;
use crate::types::{DataType, Row};
use crate::value::Value;

/// Outcome of one executed statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// Returned rows, without the total-count column.
    pub rows: Vec<Row>,
    /// Rows inserted, updated or deleted.
    pub affected_rows: u64,
    /// Key generated by an insert.
    pub last_insert_id: Option<i64>,
    /// Unpaginated row count, when requested with `with_total_count`.
    pub total_count: Option<u64>,
    /// Wall time spent in the connection.
    pub elapsed: Duration,
}

impl QueryResult {
    /// Values of `column` across all rows; the first column when `None`.
    #[must_use]
    pub fn column(&self, column: Option<&str>) -> Vec<Value> {
        self.rows.iter().filter_map(|row| cell(row, column)).map(Value::from).collect()
    }

    /// Value of `column` in the first row; the first column when `None`.
    #[must_use]
    pub fn scalar(&self, column: Option<&str>) -> Value {
        self.rows.first().and_then(|row| cell(row, column)).map(Value::from).unwrap_or_default()
    }

    /// Rows keyed by the value of `column`; later rows win on duplicates.
    #[must_use]
    pub fn index_by(&self, column: &str) -> BTreeMap<String, Row> {
        self.rows
            .iter()
            .filter_map(|row| {
                let key = Value::from(row.get(column)?.clone()).group_key()?;
                Some((key, row.clone()))
            })
            .collect()
    }
}

fn cell(row: &Row, column: Option<&str>) -> Option<DataType> {
    match column {
        Some(name) => {
            let name = name.rsplit_once('.').map_or(name, |(_, name)| name);
            row.get(name).cloned()
        }
        None => row.fields.first().map(|field| field.value.clone()),
    }
}

async fn dispatch(conn: &dyn Connection, query: &Query) -> Result<QueryResult> {
    if !query.kind.returns_rows() {
        let executed = conn.exec(query.sql.clone(), query.params.clone()).await?;
        return Ok(QueryResult {
            affected_rows: executed.rows_affected,
            last_insert_id: executed.last_insert_id,
            ..QueryResult::default()
        });
    }

    let mut rows = conn.query(query.sql.clone(), query.params.clone()).await?;
    let mut total_count = None;
    if query.total_count {
        let mut total = 0;
        for row in &mut rows {
            if let Some(count) = row.take(TOTAL_COUNT) {
                total = Value::from(count).as_i64().and_then(|n| u64::try_from(n).ok()).unwrap_or(0);
            }
        }
        total_count = Some(total);
    }

    Ok(QueryResult {
        rows,
        total_count,
        ..QueryResult::default()
    })
}

impl Record {
    /// Picks the connection for the next statement: the injected connection,
    /// then the per-call connection name, then the default name.
    pub(crate) fn resolve_connection(&self, temp: Option<&str>) -> Result<Arc<dyn Connection>> {
        if let Some(client) = &self.client {
            return Ok(Arc::clone(client));
        }
        Manager::global().connection(temp.unwrap_or(&self.connection))
    }

    /// Runs `query`, records it as the last statement along with its result,
    /// and notifies the observer whether or not it succeeded. An unknown
    /// connection name counts as a failed statement.
    ///
    /// # Errors
    ///
    /// Returns the connection's error with [`Error::Query`] as context.
    pub(crate) async fn execute(&mut self, temp_connection: Option<&str>, query: Query) -> Result<QueryResult> {
        let started_at = Utc::now();
        let timer = Instant::now();

        let outcome = match self.resolve_connection(temp_connection) {
            Ok(conn) => dispatch(conn.as_ref(), &query).await.map(|mut result| {
                result.elapsed = timer.elapsed();
                result
            }),
            Err(err) => Err(err),
        };

        match &outcome {
            Ok(result) => tracing::debug!(
                model = self.def.name(),
                sql = %query.sql,
                elapsed_ms = result.elapsed.as_millis(),
                rows = result.rows.len(),
                affected = result.affected_rows,
                "executed statement"
            ),
            Err(err) => tracing::warn!(
                model = self.def.name(),
                sql = %query.sql,
                error = %err,
                "statement failed"
            ),
        }

        self.last_result = outcome.as_ref().ok().cloned();
        if let Some(observer) = &self.observer {
            observer(outcome.as_ref().ok(), &query, started_at);
        }
        let sql = query.sql.clone();
        self.last_query = Some(query);

        outcome.with_context(|| Error::Query { sql })
    }

    /// Runs caller-written SQL through the executor.
    ///
    /// # Errors
    ///
    /// Returns the connection's error with [`Error::Query`] as context.
    pub async fn raw(&mut self, sql: impl Into<String>, params: Vec<DataType>) -> Result<QueryResult> {
        let mut state = std::mem::take(&mut self.state);
        let overrides = state.take_overrides();
        self.execute(overrides.connection.as_deref(), Query::raw(sql, params)).await
    }
}
