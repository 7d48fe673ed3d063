use anyhow::Result;
use sea_query::Alias;

use crate::filter::Filter;
use crate::query::{Kind, Query, QueryBuilder};
use crate::value::values_to_datatypes;

/// Builder for constructing DELETE queries.
#[derive(Debug, Clone)]
pub struct Delete {
    table: String,
    filters: Vec<Filter>,
}

impl Delete {
    /// Creates a new DELETE query builder.
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filters: Vec::new(),
        }
    }

    /// Adds a WHERE clause filter.
    #[must_use]
    pub fn r#where(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Build the DELETE query.
    ///
    /// # Errors
    ///
    /// Returns an error if any query values cannot be converted to bind parameters.
    pub fn build(self) -> Result<Query> {
        let mut statement = sea_query::Query::delete();
        statement.from_table(Alias::new(&self.table));

        for filter in self.filters {
            statement.and_where(filter.into_expr(&self.table));
        }

        let (sql, values) = statement.build(QueryBuilder::default());
        let params = values_to_datatypes(values)?;

        tracing::debug!(
            table = %self.table,
            sql = %sql,
            param_count = params.len(),
            "Delete generated SQL"
        );

        Ok(Query {
            sql,
            params,
            kind: Kind::Delete,
            total_count: false,
        })
    }
}
