//! Fluent query state and its compilation into statement builders.

use std::mem;

use crate::delete::Delete;
use crate::filter::{Col, Filter, Operator};
use crate::join::Join;
use crate::select::Select;
use crate::update::Update;
use crate::value::Value;

/// Row limit of a select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    /// At most `n` rows.
    Count(u64),
    /// `count` rows after skipping `offset`.
    Page {
        /// Rows skipped.
        offset: u64,
        /// Rows returned.
        count: u64,
    },
}

/// Condition on one column inside a [`Where::Map`] entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Criterion {
    /// `column = value`, or `IS NULL` for a null value.
    Eq(Value),
    /// `column IN (values)`
    In(Vec<Value>),
    /// `column <op> value`
    Cmp(Operator, Value),
    /// `column BETWEEN low AND high`
    Between(Value, Value),
}

impl Criterion {
    /// `column IN (values)`.
    #[must_use]
    pub fn any_of(values: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        Self::In(values.into_iter().map(Into::into).collect())
    }

    /// `column <op> value`.
    #[must_use]
    pub fn cmp(op: Operator, value: impl Into<Value>) -> Self {
        Self::Cmp(op, value.into())
    }

    /// `column BETWEEN low AND high`.
    #[must_use]
    pub fn between(low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Self::Between(low.into(), high.into())
    }

    fn into_filter(self, column: Col) -> Filter {
        match self {
            Self::Eq(value) => Filter::Cmp(column, Operator::Eq, value),
            Self::In(values) => Filter::In(column, values),
            Self::Cmp(op, value) => Filter::Cmp(column, op, value),
            Self::Between(low, high) => Filter::Between(column, low, high),
        }
    }
}

impl<T: Into<Value>> From<T> for Criterion {
    fn from(value: T) -> Self {
        Self::Eq(value.into())
    }
}

/// One `where` call.
#[derive(Debug, Clone, PartialEq)]
pub enum Where {
    /// A literal condition, passed through as given.
    Filter(Filter),
    /// A column mapping, expanded into one condition per entry.
    Map(Vec<(String, Criterion)>),
}

impl Where {
    fn into_filters(self) -> Vec<Filter> {
        match self {
            Self::Filter(filter) => vec![filter],
            Self::Map(entries) => entries
                .into_iter()
                .map(|(column, criterion)| criterion.into_filter(Col::parse(&column)))
                .collect(),
        }
    }
}

/// Per-call overrides pulled out of the state before compilation.
#[derive(Debug, Default)]
pub(crate) struct Overrides {
    pub table: Option<String>,
    pub connection: Option<String>,
    pub with: Vec<String>,
}

/// Write-only description of the next statement, accumulated by fluent
/// calls and consumed by exactly one terminal operation.
///
/// Terminal operations take the state out of the record before doing any
/// work, so it is reset whether or not the statement succeeds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryState {
    fields: Option<Vec<String>>,
    limit: Option<Limit>,
    order: Vec<(String, bool)>,
    wheres: Vec<Where>,
    joins: Vec<Join>,
    group: Option<String>,
    alias: Option<String>,
    total_count: bool,
    with: Vec<String>,
    table: Option<String>,
    connection: Option<String>,
}

impl QueryState {
    /// Replaces the selected fields; the default is the whole row.
    pub fn field(&mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Limits the row count.
    pub const fn limit(&mut self, count: u64) -> &mut Self {
        self.limit = Some(Limit::Count(count));
        self
    }

    /// Returns `count` rows after skipping `offset`.
    pub const fn page(&mut self, offset: u64, count: u64) -> &mut Self {
        self.limit = Some(Limit::Page { offset, count });
        self
    }

    /// Appends an ascending sort.
    pub fn order_by(&mut self, column: impl Into<String>) -> &mut Self {
        self.order.push((column.into(), false));
        self
    }

    /// Appends a descending sort.
    pub fn order_by_desc(&mut self, column: impl Into<String>) -> &mut Self {
        self.order.push((column.into(), true));
        self
    }

    /// Appends a literal condition.
    pub fn r#where(&mut self, filter: Filter) -> &mut Self {
        self.wheres.push(Where::Filter(filter));
        self
    }

    /// Appends a column mapping: scalars compare for equality, lists use
    /// `IN`, operator and range criteria keep their form.
    pub fn where_map<K, C>(&mut self, criteria: impl IntoIterator<Item = (K, C)>) -> &mut Self
    where
        K: Into<String>,
        C: Into<Criterion>,
    {
        let entries = criteria.into_iter().map(|(k, c)| (k.into(), c.into())).collect();
        self.wheres.push(Where::Map(entries));
        self
    }

    /// Groups by `column`.
    pub fn group(&mut self, column: impl Into<String>) -> &mut Self {
        self.group = Some(column.into());
        self
    }

    /// Appends a join.
    pub fn join(&mut self, join: Join) -> &mut Self {
        self.joins.push(join);
        self
    }

    /// Aliases the base table.
    pub fn alias(&mut self, alias: impl Into<String>) -> &mut Self {
        self.alias = Some(alias.into());
        self
    }

    /// Reports the unpaginated row count alongside the page.
    pub const fn with_total_count(&mut self) -> &mut Self {
        self.total_count = true;
        self
    }

    /// Appends relations to eager-load.
    pub fn with(&mut self, relations: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.with.extend(relations.into_iter().map(Into::into));
        self
    }

    /// Targets `table` for the next statement only.
    pub fn temp_table(&mut self, table: impl Into<String>) -> &mut Self {
        self.table = Some(table.into());
        self
    }

    /// Uses the named connection for the next statement only.
    pub fn temp_connection(&mut self, name: impl Into<String>) -> &mut Self {
        self.connection = Some(name.into());
        self
    }

    /// Returns `true` when at least one condition has been added.
    #[must_use]
    pub fn has_conditions(&self) -> bool {
        !self.wheres.is_empty()
    }

    /// Returns `true` when nothing has been set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub(crate) fn take_overrides(&mut self) -> Overrides {
        Overrides {
            table: self.table.take(),
            connection: self.connection.take(),
            with: mem::take(&mut self.with),
        }
    }

    fn filters(wheres: Vec<Where>) -> impl Iterator<Item = Filter> {
        wheres.into_iter().flat_map(Where::into_filters)
    }

    /// Applies the state to `select`: total count, ordering, conditions in
    /// call order, grouping, joins, then fields and limit.
    ///
    /// When no fields were set, the builder's own accumulated fields are
    /// kept, so a relation or join can widen the projection.
    #[must_use]
    pub fn compile(self, mut select: Select) -> Select {
        if let Some(alias) = self.alias {
            select = select.alias(alias);
        }
        if self.total_count {
            select = select.with_total_count();
        }
        for (column, desc) in self.order {
            select = if desc { select.order_by_desc(column) } else { select.order_by(column) };
        }
        for filter in Self::filters(self.wheres) {
            select = select.r#where(filter);
        }
        if let Some(group) = self.group {
            select = select.group_by(group);
        }
        for join in self.joins {
            select = select.join(join);
        }
        if let Some(fields) = self.fields {
            select = select.columns(fields);
        }
        match self.limit {
            Some(Limit::Count(count)) => select.limit(count),
            Some(Limit::Page { offset, count }) => select.offset(offset).limit(count),
            None => select,
        }
    }

    /// Applies the conditions to `update`.
    #[must_use]
    pub fn compile_update(self, mut update: Update) -> Update {
        for filter in Self::filters(self.wheres) {
            update = update.r#where(filter);
        }
        update
    }

    /// Applies the conditions to `delete`.
    #[must_use]
    pub fn compile_delete(self, mut delete: Delete) -> Delete {
        for filter in Self::filters(self.wheres) {
            delete = delete.r#where(filter);
        }
        delete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_maps_in_call_order() {
        let mut state = QueryState::default();
        state
            .r#where(Filter::gt("age", 18))
            .where_map([
                ("name", Criterion::from("Ann")),
                ("id", Criterion::any_of([1, 2, 3])),
                ("score", Criterion::between(1, 9)),
                ("deleted_at", Criterion::Eq(Value::Null)),
            ]);

        let query = state.compile(Select::new("users")).build().unwrap();
        let sql = query.sql;
        let age = sql.find("age").unwrap();
        let name = sql.find("name").unwrap();
        let id = sql.find(r#""id""#).unwrap();
        assert!(age < name && name < id);
        assert!(sql.contains(" IN "));
        assert!(sql.contains("BETWEEN"));
        assert!(sql.find("IS NULL").unwrap() > sql.find("deleted_at").unwrap());
        assert_eq!(query.params.len(), 7);
    }

    #[test]
    fn empty_state_compiles_to_plain_select() {
        let query = QueryState::default().compile(Select::new("users")).build().unwrap();
        assert_eq!(query.sql, r#"SELECT "users".* FROM "users""#);
        assert!(query.params.is_empty());
    }

    #[test]
    fn explicit_fields_replace_builder_fields() {
        let mut state = QueryState::default();
        state.field(["name"]);
        let select = state.compile(Select::new("users").column("users.id"));
        assert_eq!(select.fields(), ["name".to_string()]);

        let select = QueryState::default().compile(Select::new("users").column("users.id"));
        assert_eq!(select.fields(), ["users.id".to_string()]);
    }

    #[test]
    fn pages_with_offset() {
        let mut state = QueryState::default();
        state.page(20, 10).order_by_desc("id");
        let sql = state.compile(Select::new("users")).build().unwrap().sql;
        assert!(sql.contains("ORDER BY"));
        assert!(sql.contains("DESC"));
        assert!(sql.contains("LIMIT"));
        assert!(sql.contains("OFFSET"));
    }

    #[test]
    fn overrides_are_split_out() {
        let mut state = QueryState::default();
        state.temp_table("users_archive").temp_connection("replica").with(["posts"]);
        let overrides = state.take_overrides();
        assert_eq!(overrides.table.as_deref(), Some("users_archive"));
        assert_eq!(overrides.connection.as_deref(), Some("replica"));
        assert_eq!(overrides.with, vec!["posts".to_string()]);
        assert!(state.is_empty());
    }
}
