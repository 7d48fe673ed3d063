use anyhow::Result;
use sea_query::{Alias, ColumnRef, IntoIden, Order, SimpleExpr};

use crate::filter::{Col, Filter};
use crate::join::{Join, JoinSpec};
use crate::query::{Kind, Query, QueryBuilder};
use crate::value::values_to_datatypes;

/// Column alias carrying the window total added by [`Select::with_total_count`].
pub const TOTAL_COUNT: &str = "__total_count";

/// Builder for constructing SELECT queries against a runtime table name.
///
/// Unqualified columns in fields, filters and ordering resolve against the
/// table's alias when one is set.
#[derive(Debug, Clone)]
pub struct Select {
    table: String,
    alias: Option<String>,
    fields: Vec<String>,
    filters: Vec<Filter>,
    order: Vec<(Col, Order)>,
    group: Vec<Col>,
    joins: Vec<Join>,
    limit: Option<u64>,
    offset: Option<u64>,
    total_count: bool,
}

impl Select {
    /// Creates a new SELECT query builder.
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            alias: None,
            fields: Vec::new(),
            filters: Vec::new(),
            order: Vec::new(),
            group: Vec::new(),
            joins: Vec::new(),
            limit: None,
            offset: None,
            total_count: false,
        }
    }

    /// Aliases the base table.
    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Adds a field to the projection: `*`, `table.*`, `column`,
    /// `table.column`, `<column> AS <alias>` or a raw SQL expression.
    #[must_use]
    pub fn column(mut self, field: impl Into<String>) -> Self {
        self.fields.push(field.into());
        self
    }

    /// Adds `table.column AS alias` to the projection.
    #[must_use]
    pub fn column_as(self, table: &str, column: &str, alias: &str) -> Self {
        self.column(format!("{table}.{column} AS {alias}"))
    }

    /// Replaces the projection.
    #[must_use]
    pub fn columns(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a WHERE clause filter.
    #[must_use]
    pub fn r#where(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Adds a JOIN clause to the query.
    #[must_use]
    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    /// Adds ascending ORDER BY clause.
    #[must_use]
    pub fn order_by(mut self, column: impl Into<Col>) -> Self {
        self.order.push((column.into(), Order::Asc));
        self
    }

    /// Adds descending ORDER BY clause.
    #[must_use]
    pub fn order_by_desc(mut self, column: impl Into<Col>) -> Self {
        self.order.push((column.into(), Order::Desc));
        self
    }

    /// Adds a GROUP BY column.
    #[must_use]
    pub fn group_by(mut self, column: impl Into<Col>) -> Self {
        self.group.push(column.into());
        self
    }

    /// Sets the maximum number of rows to return.
    #[must_use]
    pub const fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the number of rows to skip.
    #[must_use]
    pub const fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Adds the [`TOTAL_COUNT`] window column reporting the unpaginated row
    /// count.
    #[must_use]
    pub const fn with_total_count(mut self) -> Self {
        self.total_count = true;
        self
    }

    /// Fields accumulated so far; empty means the whole base row.
    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Alias, or the table name.
    #[must_use]
    pub fn reference(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }

    /// Build the SELECT query.
    ///
    /// # Errors
    ///
    /// Returns an error if query values cannot be converted to bind parameters.
    pub fn build(self) -> Result<Query> {
        let reference = self.reference().to_owned();
        let mut statement = sea_query::Query::select();

        if self.fields.is_empty() {
            statement.column(ColumnRef::TableAsterisk(Alias::new(&reference).into_iden()));
        }
        for field in &self.fields {
            match projection(field, &reference) {
                Projection::Column(column) => {
                    statement.column(column);
                }
                Projection::Aliased(column, alias) => {
                    statement.expr_as(SimpleExpr::Column(column), Alias::new(alias));
                }
                Projection::Expr(expr) => {
                    statement.expr(expr);
                }
            }
        }
        if self.total_count {
            statement.expr_as(
                SimpleExpr::Custom("COUNT(*) OVER ()".to_owned()),
                Alias::new(TOTAL_COUNT),
            );
        }

        match &self.alias {
            Some(alias) => statement.from_as(Alias::new(&self.table), Alias::new(alias)),
            None => statement.from(Alias::new(&self.table)),
        };

        for join in self.joins {
            let JoinSpec {
                table,
                alias,
                on,
                kind,
            } = join.into_join_spec(&reference);
            if let Some(alias) = alias {
                statement.join_as(kind, Alias::new(table), Alias::new(alias), on);
            } else {
                statement.join(kind, Alias::new(table), on);
            }
        }

        for filter in self.filters {
            statement.and_where(filter.into_expr(&reference));
        }

        for column in self.group {
            statement.group_by_col(qualify(&column, &reference));
        }

        for (column, order) in self.order {
            statement.order_by(qualify(&column, &reference), order);
        }

        if let Some(limit) = self.limit {
            statement.limit(limit);
        }

        if let Some(offset) = self.offset {
            statement.offset(offset);
        }

        let (sql, values) = statement.build(QueryBuilder::default());
        let params = values_to_datatypes(values)?;

        tracing::debug!(
            table = %self.table,
            sql = %sql,
            param_count = params.len(),
            "Select generated SQL"
        );

        Ok(Query {
            sql,
            params,
            kind: Kind::Select,
            total_count: self.total_count,
        })
    }
}

enum Projection<'a> {
    Column(ColumnRef),
    Aliased(ColumnRef, &'a str),
    Expr(SimpleExpr),
}

fn projection<'a>(field: &'a str, reference: &str) -> Projection<'a> {
    let field = field.trim();
    if field == "*" {
        return Projection::Column(ColumnRef::Asterisk);
    }
    if let Some(table) = field.strip_suffix(".*").filter(|table| is_identifier(table)) {
        return Projection::Column(ColumnRef::TableAsterisk(Alias::new(table).into_iden()));
    }

    let lowered = field.to_ascii_lowercase();
    if let Some(pos) = lowered.find(" as ") {
        let (column, alias) = (field[..pos].trim(), field[pos + 4..].trim());
        if is_reference(column) && is_identifier(alias) {
            return Projection::Aliased(qualify(&Col::parse(column), reference), alias);
        }
    } else if is_reference(field) {
        return Projection::Column(qualify(&Col::parse(field), reference));
    }

    Projection::Expr(SimpleExpr::Custom(field.to_owned()))
}

fn qualify(column: &Col, reference: &str) -> ColumnRef {
    table_column(column.table.as_deref().unwrap_or(reference), &column.name)
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

fn is_reference(name: &str) -> bool {
    match name.split_once('.') {
        Some((table, column)) => is_identifier(table) && is_identifier(column),
        None => is_identifier(name),
    }
}

/// Builds a `"table"."column"` reference.
pub fn table_column(table: &str, column: &str) -> ColumnRef {
    ColumnRef::TableColumn(Alias::new(table).into_iden(), Alias::new(column).into_iden())
}
