use anyhow::Result;
use sea_query::{Alias, SimpleExpr};

use crate::query::{Kind, Query, QueryBuilder};
use crate::value::{Value, values_to_datatypes};

/// Builder for constructing INSERT queries.
#[derive(Debug, Clone)]
pub struct Insert {
    table: String,
    values: Vec<(String, Value)>,
}

impl Insert {
    /// Creates a new INSERT query builder.
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            values: Vec::new(),
        }
    }

    /// Sets a column value for the insert.
    #[must_use]
    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.push((column.into(), value.into()));
        self
    }

    /// Build the INSERT query. A builder with no values inserts
    /// `DEFAULT VALUES`.
    ///
    /// # Errors
    ///
    /// Returns an error if any query values cannot be converted to bind parameters.
    pub fn build(self) -> Result<Query> {
        let mut statement = sea_query::Query::insert();
        statement.into_table(Alias::new(&self.table));

        if self.values.is_empty() {
            statement.or_default_values();
        } else {
            let columns: Vec<_> =
                self.values.iter().map(|(column, _)| Alias::new(column)).collect();
            let row: Vec<SimpleExpr> =
                self.values.into_iter().map(|(_, value)| SimpleExpr::Value(value.into())).collect();
            statement.columns(columns);
            statement.values(row)?;
        }

        let (sql, values) = statement.build(QueryBuilder::default());
        let params = values_to_datatypes(values)?;

        tracing::debug!(
            table = %self.table,
            sql = %sql,
            param_count = params.len(),
            "Insert generated SQL"
        );

        Ok(Query {
            sql,
            params,
            kind: Kind::Insert,
            total_count: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserts_values_in_call_order() {
        let query = Insert::new("users").set("name", "Ann").set("age", 5).build().unwrap();
        assert_eq!(query.sql, r#"INSERT INTO "users" ("name", "age") VALUES ($1, $2)"#);
        assert_eq!(query.params.len(), 2);
        assert_eq!(query.kind, Kind::Insert);
    }
}
