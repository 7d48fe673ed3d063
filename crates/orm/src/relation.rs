//! Relation declarations and their resolution.
//!
//! A [`RelationSpec`] is pure data: [`ModelDef::describe`] hands it out
//! without touching the database. Resolving it against a loaded record runs
//! one statement; `with(...)` batches the same relation across many
//! records.

use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use anyhow::{Result, bail};
use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::instrument;

use crate::attribute::Attribute;
use crate::error::Error;
use crate::filter::{Col, Filter};
use crate::join::{Join, JoinKind};
use crate::model::{Model, ModelDef, definition};
use crate::record::Record;
use crate::select::Select;
use crate::value::Value;

/// Alias of the related table in relation statements.
pub(crate) const REL: &str = "__rel";
/// Alias of the owning table in single-record relation statements.
const OWNER: &str = "__owner";
/// Pivot key selected alongside many-to-many children.
pub(crate) const PARENT_KEY: &str = "__parent_key";

/// Caller-supplied statement for a relation. Replaces key inference: the
/// closure receives the owning record and a select on the related table.
pub type Condition = Arc<dyn Fn(&Record, Select) -> Select + Send + Sync>;

/// Lazily resolved related model.
///
/// Definitions are built under the registry lock, so the related model is
/// looked up when the relation is resolved, not when it is declared.
#[derive(Clone, Copy)]
pub struct Target {
    name: &'static str,
    def: fn() -> Arc<ModelDef>,
}

impl Target {
    /// The related model `M`.
    #[must_use]
    pub fn of<M: Model>() -> Self {
        Self {
            name: type_name::<M>(),
            def: definition::<M>,
        }
    }

    /// Type name of the related model.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// The related model's definition.
    #[must_use]
    pub fn def(&self) -> Arc<ModelDef> {
        (self.def)()
    }
}

/// `HasOne` / `HasMany`: the related table holds `foreign_key` pointing at
/// the owner's `local_key`. Both default to their table's primary key.
#[derive(Clone)]
pub struct Has {
    target: Target,
    many: bool,
    condition: Option<Condition>,
    local_key: Option<String>,
    foreign_key: Option<String>,
    join: JoinKind,
}

/// `BelongsTo`: the owner holds `join_key` pointing at the father's
/// `other_key` (default: the father's primary key). Without a `join_key` the
/// connection's foreign-key metadata is searched.
#[derive(Clone)]
pub struct BelongsTo {
    target: Target,
    condition: Option<Condition>,
    join_key: Option<String>,
    other_key: Option<String>,
    join: JoinKind,
}

/// `BelongsToMany`: rows of `pivot` link the owner's primary key
/// (`local_key` column) to the related primary key (`child_key` column).
#[derive(Clone)]
pub struct BelongsToMany {
    target: Target,
    condition: Option<Condition>,
    pivot: String,
    local_key: Option<String>,
    child_key: Option<String>,
}

/// Declarative description of a relation.
#[derive(Clone)]
pub enum RelationSpec {
    /// One related record holding the foreign key.
    HasOne(Has),
    /// Related records holding the foreign key, in query order.
    HasMany(Has),
    /// The record this one points at.
    BelongsTo(BelongsTo),
    /// Records linked through a pivot table, in query order.
    BelongsToMany(BelongsToMany),
}

/// Declares a one-to-one relation to `M`.
#[must_use]
pub fn has_one<M: Model>() -> Has {
    Has::new(Target::of::<M>(), false)
}

/// Declares a one-to-many relation to `M`.
#[must_use]
pub fn has_many<M: Model>() -> Has {
    Has::new(Target::of::<M>(), true)
}

/// Declares the inverse relation to the father model `M`.
#[must_use]
pub fn belongs_to<M: Model>() -> BelongsTo {
    BelongsTo {
        target: Target::of::<M>(),
        condition: None,
        join_key: None,
        other_key: None,
        join: JoinKind::default(),
    }
}

/// Declares a many-to-many relation to `M` through `pivot`.
#[must_use]
pub fn belongs_to_many<M: Model>(pivot: impl Into<String>) -> BelongsToMany {
    BelongsToMany {
        target: Target::of::<M>(),
        condition: None,
        pivot: pivot.into(),
        local_key: None,
        child_key: None,
    }
}

impl Has {
    const fn new(target: Target, many: bool) -> Self {
        Self {
            target,
            many,
            condition: None,
            local_key: None,
            foreign_key: None,
            join: JoinKind::Inner,
        }
    }

    /// Owner column the foreign key points at.
    #[must_use]
    pub fn local_key(mut self, column: impl Into<String>) -> Self {
        self.local_key = Some(column.into());
        self
    }

    /// Related column holding the owner's key.
    #[must_use]
    pub fn foreign_key(mut self, column: impl Into<String>) -> Self {
        self.foreign_key = Some(column.into());
        self
    }

    /// Join type of the single-record statement.
    #[must_use]
    pub const fn join_type(mut self, kind: JoinKind) -> Self {
        self.join = kind;
        self
    }

    /// Replaces key inference with `f`.
    #[must_use]
    pub fn condition(mut self, f: impl Fn(&Record, Select) -> Select + Send + Sync + 'static) -> Self {
        self.condition = Some(Arc::new(f));
        self
    }
}

impl BelongsTo {
    /// Owner column pointing at the father.
    #[must_use]
    pub fn join_key(mut self, column: impl Into<String>) -> Self {
        self.join_key = Some(column.into());
        self
    }

    /// Father column the join key points at.
    #[must_use]
    pub fn other_key(mut self, column: impl Into<String>) -> Self {
        self.other_key = Some(column.into());
        self
    }

    /// Join type of the single-record statement.
    #[must_use]
    pub const fn join_type(mut self, kind: JoinKind) -> Self {
        self.join = kind;
        self
    }

    /// Replaces key inference with `f`.
    #[must_use]
    pub fn condition(mut self, f: impl Fn(&Record, Select) -> Select + Send + Sync + 'static) -> Self {
        self.condition = Some(Arc::new(f));
        self
    }
}

impl BelongsToMany {
    /// Pivot column holding the owner's primary key.
    #[must_use]
    pub fn local_key(mut self, column: impl Into<String>) -> Self {
        self.local_key = Some(column.into());
        self
    }

    /// Pivot column holding the related primary key.
    #[must_use]
    pub fn child_key(mut self, column: impl Into<String>) -> Self {
        self.child_key = Some(column.into());
        self
    }

    /// Replaces key inference with `f`.
    #[must_use]
    pub fn condition(mut self, f: impl Fn(&Record, Select) -> Select + Send + Sync + 'static) -> Self {
        self.condition = Some(Arc::new(f));
        self
    }
}

impl From<Has> for RelationSpec {
    fn from(has: Has) -> Self {
        if has.many { Self::HasMany(has) } else { Self::HasOne(has) }
    }
}

impl From<BelongsTo> for RelationSpec {
    fn from(belongs_to: BelongsTo) -> Self {
        Self::BelongsTo(belongs_to)
    }
}

impl From<BelongsToMany> for RelationSpec {
    fn from(belongs_to_many: BelongsToMany) -> Self {
        Self::BelongsToMany(belongs_to_many)
    }
}

impl fmt::Debug for RelationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (kind, target, custom) = match self {
            Self::HasOne(has) => ("HasOne", has.target, has.condition.is_some()),
            Self::HasMany(has) => ("HasMany", has.target, has.condition.is_some()),
            Self::BelongsTo(rel) => ("BelongsTo", rel.target, rel.condition.is_some()),
            Self::BelongsToMany(rel) => ("BelongsToMany", rel.target, rel.condition.is_some()),
        };
        f.debug_struct(kind)
            .field("target", &target.name())
            .field("condition", &custom)
            .finish_non_exhaustive()
    }
}

/// How to load a relation for many owners with one statement.
pub(crate) struct Batch {
    /// Owner column whose values are collected.
    pub parent_key: String,
    /// Child field the results are grouped by.
    pub child_key: String,
    /// Column filtered with `IN (parent keys)`.
    pub filter: Col,
    /// Statement before the `IN` filter.
    pub select: Select,
}

/// Loading strategy of a relation for a set of owners.
pub(crate) enum Plan {
    /// One statement for all owners.
    Batched(Batch),
    /// A condition closure: one statement per owner.
    PerRecord,
    /// The keys cannot be determined; every owner resolves to nothing.
    Unresolvable,
}

impl RelationSpec {
    /// The related model.
    #[must_use]
    pub fn target(&self) -> Target {
        match self {
            Self::HasOne(has) | Self::HasMany(has) => has.target,
            Self::BelongsTo(rel) => rel.target,
            Self::BelongsToMany(rel) => rel.target,
        }
    }

    /// Returns `true` for the kinds that resolve to a list.
    #[must_use]
    pub const fn is_many(&self) -> bool {
        matches!(self, Self::HasMany(_) | Self::BelongsToMany(_))
    }

    const fn condition(&self) -> Option<&Condition> {
        match self {
            Self::HasOne(has) | Self::HasMany(has) => has.condition.as_ref(),
            Self::BelongsTo(rel) => rel.condition.as_ref(),
            Self::BelongsToMany(rel) => rel.condition.as_ref(),
        }
    }

    fn empty(&self) -> Attribute {
        if self.is_many() { Attribute::Many(Vec::new()) } else { Attribute::One(None) }
    }

    /// Keeps the first child for to-one kinds and every child, in query
    /// order, for to-many kinds.
    pub(crate) fn collect(&self, children: Vec<Record>) -> Attribute {
        if self.is_many() {
            Attribute::Many(children)
        } else {
            Attribute::One(children.into_iter().next().map(Box::new))
        }
    }

    /// Owner column of a `BelongsTo`, discovered from foreign-key metadata
    /// when not declared.
    async fn join_key(rel: &BelongsTo, owner: &Record, father: &Record) -> Result<Option<String>> {
        if let Some(key) = &rel.join_key {
            return Ok(Some(key.clone()));
        }
        let conn = owner.resolve_connection(None)?;
        let keys = conn.foreign_keys(owner.table.clone(), father.table.clone()).await?;
        if keys.is_empty() {
            tracing::debug!(
                table = %owner.table,
                referenced = %father.table,
                "no foreign key found for belongs-to relation"
            );
        }
        Ok(keys.into_iter().next())
    }

    /// Works out the batched statement for loading this relation on records
    /// shaped like `owner`.
    pub(crate) async fn plan(&self, owner: &Record, target: &Record) -> Result<Plan> {
        if self.condition().is_some() {
            return Ok(Plan::PerRecord);
        }
        let target_table = target.table.as_str();

        let batch = match self {
            Self::HasOne(has) | Self::HasMany(has) => {
                let (Some(parent_key), Some(child_key)) = (
                    has.local_key.clone().or_else(|| owner.schema.primary_key.clone()),
                    has.foreign_key.clone().or_else(|| target.schema.primary_key.clone()),
                ) else {
                    return Ok(Plan::Unresolvable);
                };
                Batch {
                    filter: Col::of(target_table, child_key.as_str()),
                    select: Select::new(target_table),
                    parent_key,
                    child_key,
                }
            }
            Self::BelongsTo(rel) => {
                let (Some(parent_key), Some(child_key)) = (
                    Self::join_key(rel, owner, target).await?,
                    rel.other_key.clone().or_else(|| target.schema.primary_key.clone()),
                ) else {
                    return Ok(Plan::Unresolvable);
                };
                Batch {
                    filter: Col::of(target_table, child_key.as_str()),
                    select: Select::new(target_table),
                    parent_key,
                    child_key,
                }
            }
            Self::BelongsToMany(rel) => {
                let Some(parent_key) = owner.schema.primary_key.clone() else {
                    bail!(Error::Relation(format!("table '{}' has no primary key", owner.table)));
                };
                let Some(target_pk) = target.schema.primary_key.as_deref() else {
                    bail!(Error::Relation(format!("table '{target_table}' has no primary key")));
                };
                let local_key = rel.local_key.clone().unwrap_or_else(|| parent_key.clone());
                let child_key = rel.child_key.as_deref().unwrap_or(target_pk);

                let on = Filter::col_eq(Col::of(&rel.pivot, child_key), Col::of(REL, target_pk));
                let select = Select::new(target_table)
                    .alias(REL)
                    .column(format!("{REL}.*"))
                    .column_as(&rel.pivot, &local_key, PARENT_KEY)
                    .join(Join::inner(&rel.pivot, on));
                Batch {
                    filter: Col::of(&rel.pivot, local_key),
                    select,
                    parent_key,
                    child_key: PARENT_KEY.to_owned(),
                }
            }
        };
        Ok(Plan::Batched(batch))
    }

    /// Resolves the relation for one loaded record with a single statement.
    ///
    /// # Errors
    ///
    /// Returns the related model's schema error or the query error.
    #[instrument(level = "debug", skip_all, fields(model = owner.def.name()))]
    pub async fn resolve(&self, owner: &Record) -> Result<Attribute> {
        let mut target = owner.related(self.target().def()).await?;

        if let Some(condition) = self.condition() {
            let select = condition(owner, Select::new(target.table.clone()));
            let children = fetch(&mut target, select).await?;
            return Ok(self.collect(children));
        }

        let (select, key) = match self {
            Self::HasOne(has) | Self::HasMany(has) => {
                let (Some(local), Some(foreign)) = (
                    has.local_key.clone().or_else(|| owner.schema.primary_key.clone()),
                    has.foreign_key.clone().or_else(|| target.schema.primary_key.clone()),
                ) else {
                    return Ok(self.empty());
                };
                let Some(select) = anchored(owner, &target.table, has.join, &local, &foreign) else {
                    return Ok(self.empty());
                };
                (select, foreign)
            }
            Self::BelongsTo(rel) => {
                let (Some(join_key), Some(other_key)) = (
                    Self::join_key(rel, owner, &target).await?,
                    rel.other_key.clone().or_else(|| target.schema.primary_key.clone()),
                ) else {
                    return Ok(self.empty());
                };
                let Some(select) = anchored(owner, &target.table, rel.join, &join_key, &other_key)
                else {
                    return Ok(self.empty());
                };
                (select, other_key)
            }
            Self::BelongsToMany(_) => {
                let Plan::Batched(batch) = self.plan(owner, &target).await? else {
                    return Ok(self.empty());
                };
                let Some(key) = owner.columns.get(&batch.parent_key).filter(|v| !v.is_null()) else {
                    return Ok(self.empty());
                };
                let select = batch.select.r#where(Filter::eq(batch.filter, key.clone()));
                let mut children = fetch(&mut target, select).await?;
                for child in &mut children {
                    child.joined.remove(PARENT_KEY);
                }
                return Ok(self.collect(children));
            }
        };

        let mut children = fetch(&mut target, select).await?;
        children.retain(|child| child.columns.get(&key).is_some_and(|value| !value.is_null()));
        Ok(self.collect(children))
    }
}

/// `SELECT rel.* FROM target AS rel JOIN owner_table AS owner ON
/// owner.local = rel.remote WHERE owner.<pk or local> = <value>`.
fn anchored(owner: &Record, target_table: &str, kind: JoinKind, local: &str, remote: &str) -> Option<Select> {
    let anchor = match owner.schema.primary_key.as_deref() {
        Some(pk) => owner.origin.get(pk).or_else(|| owner.columns.get(pk)).map(|value| (pk, value)),
        None => None,
    }
    .filter(|(_, value)| !value.is_empty())
    .or_else(|| owner.columns.get(local).filter(|value| !value.is_null()).map(|value| (local, value)))?;

    let on = Filter::col_eq(Col::of(OWNER, local), Col::of(REL, remote));
    Some(
        Select::new(target_table)
            .alias(REL)
            .column(format!("{REL}.*"))
            .join(Join::new(kind, owner.table.clone(), on).alias(OWNER))
            .r#where(Filter::eq(Col::of(OWNER, anchor.0), anchor.1.clone())),
    )
}

/// Runs `select` through `target` and hydrates the rows.
pub(crate) async fn fetch(target: &mut Record, select: Select) -> Result<Vec<Record>> {
    let result = target.execute(None, select.build()?).await?;
    Ok(result.rows.into_iter().map(|row| target.hydrate(row)).collect())
}

impl Record {
    /// Resolves the relation `name` and memoizes it in joined data; later
    /// calls return the memoized value without querying.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Relation`] if the model declares no relation `name`,
    /// otherwise the resolution error.
    pub fn relation<'a>(&'a mut self, name: &'a str) -> BoxFuture<'a, Result<Attribute>> {
        async move {
            if let Some(attr @ (Attribute::One(_) | Attribute::Many(_))) = self.joined.get(name) {
                return Ok(attr.clone());
            }
            let def = Arc::clone(&self.def);
            let Some(spec) = def.describe(name) else {
                bail!(Error::Relation(format!("{} has no relation '{name}'", def.name())));
            };
            let attr = spec.resolve(self).await?;
            self.joined.insert(name.to_owned(), attr.clone());
            Ok(attr)
        }
        .boxed()
    }

    /// The relation value previously loaded under `name`.
    #[must_use]
    pub fn loaded(&self, name: &str) -> Option<&Attribute> {
        self.joined.get(name).filter(|attr| !matches!(attr, Attribute::Value(_)))
    }
}

/// Value of `column` on `record` as a grouping key.
pub(crate) fn key_of(record: &Record, column: &str) -> Option<String> {
    record
        .columns
        .get(column)
        .or_else(|| match record.joined.get(column) {
            Some(Attribute::Value(value)) => Some(value),
            _ => None,
        })
        .and_then(Value::group_key)
}
