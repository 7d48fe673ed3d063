//! Model declarations and the per-type attribute registry.

use std::any::{TypeId, type_name};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, LazyLock};

use anyhow::Result;
use parking_lot::RwLock;

use crate::record::Record;
use crate::relation::RelationSpec;
use crate::value::Value;

/// Column data of a record, keyed by column name.
pub type Columns = BTreeMap<String, Value>;

/// Read transform: receives the stored value and the full column map.
pub type Accessor = Arc<dyn Fn(&Value, &Columns) -> Value + Send + Sync>;

/// Write transform: receives the formatted value and the full column map.
pub type Mutator = Arc<dyn Fn(Value, &Columns) -> Value + Send + Sync>;

static REGISTRY: LazyLock<RwLock<HashMap<TypeId, Arc<ModelDef>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Declares a model type with a [`Model`] implementation.
///
/// Models that need accessors, mutators, relations or hooks implement
/// [`Model`] by hand instead.
///
/// # Examples
///
/// ```ignore
/// model! {
///     table = "users",
///     #[derive(Debug)]
///     pub struct User;
/// }
///
/// model! {
///     table = "audit_log",
///     connection = "audit",
///     pub struct AuditEntry;
/// }
/// ```
#[macro_export]
macro_rules! model {
    (
        table = $table:literal,
        connection = $connection:literal,
        $(#[$meta:meta])*
        $vis:vis struct $name:ident;
    ) => {
        #[allow(missing_docs)]
        $(#[$meta])*
        $vis struct $name;

        impl $crate::Model for $name {
            const TABLE: &'static str = $table;
            const CONNECTION: &'static str = $connection;
        }
    };

    (
        table = $table:literal,
        $($rest:tt)*
    ) => {
        $crate::model! {
            table = $table,
            connection = "default",
            $($rest)*
        }
    };
}

/// How `save` and `update` maintain the create/update time columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Timestamps {
    /// Not maintained.
    #[default]
    Off,
    /// Unix seconds.
    Int,
    /// Current UTC timestamp.
    DateTime,
}

impl Timestamps {
    /// The value written for "now", or `None` when timestamps are off.
    #[must_use]
    pub fn now(self) -> Option<Value> {
        let now = chrono::Utc::now();
        match self {
            Self::Off => None,
            Self::Int => Some(Value::Int(now.timestamp())),
            Self::DateTime => Some(Value::DateTime(now.naive_utc())),
        }
    }
}

/// Lifecycle position of a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Status {
    /// Not loaded from or written to the database.
    #[default]
    New,
    /// Hydrated from a query.
    Loaded,
    /// A persisted column changed since the last snapshot.
    Dirty,
    /// Written by `save` or `update`.
    Persisted,
}

/// Result of a write that a before-hook may veto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Outcome<T> {
    /// The statement ran.
    Done(T),
    /// A before-hook returned `false`; nothing was issued.
    Vetoed,
}

impl<T> Outcome<T> {
    /// Returns `true` for [`Outcome::Done`].
    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    /// Returns `true` for [`Outcome::Vetoed`].
    #[must_use]
    pub const fn is_vetoed(&self) -> bool {
        matches!(self, Self::Vetoed)
    }

    /// The payload of a completed write.
    #[must_use]
    pub fn done(self) -> Option<T> {
        match self {
            Self::Done(value) => Some(value),
            Self::Vetoed => None,
        }
    }
}

/// A table-backed record type.
///
/// Implemented by unit structs, usually through [`model!`](crate::model!).
/// The type itself carries no data: records are [`Record`] values sharing the
/// type's [`ModelDef`].
pub trait Model: Send + Sync + 'static {
    /// Table name.
    const TABLE: &'static str;

    /// Name of the [`Manager`](crate::Manager) connection used by default.
    const CONNECTION: &'static str = "default";

    /// Automatic timestamp mode.
    const TIMESTAMPS: Timestamps = Timestamps::Off;

    /// Create-time column.
    const CREATE_TIME: Option<&'static str> = Some("create_time");

    /// Update-time column.
    const UPDATE_TIME: Option<&'static str> = Some("update_time");

    /// Registers accessors, mutators and relations. Called once per type,
    /// under the registry lock, so it must not look up other definitions.
    fn define(_def: &mut Definition) {}

    /// Runs before an insert; returning `false` vetoes it.
    fn before_insert(_record: &Record) -> bool {
        true
    }

    /// Runs after an insert attempt.
    fn after_insert(_record: &Record, _success: bool) {}

    /// Runs before an update; returning `false` vetoes it.
    fn before_update(_record: &Record) -> bool {
        true
    }

    /// Runs after an update attempt.
    fn after_update(_record: &Record, _success: bool) {}

    /// Runs before a delete; returning `false` vetoes it.
    fn before_delete(_record: &Record) -> bool {
        true
    }

    /// Runs after a delete attempt.
    fn after_delete(_record: &Record, _success: bool) {}

    /// A new record on the model's default connection.
    ///
    /// # Errors
    ///
    /// See [`Record::create`].
    fn create() -> impl Future<Output = Result<Record>> + Send
    where
        Self: Sized,
    {
        Record::create::<Self>()
    }
}

/// Accessor, mutator and relation declarations of a model.
#[derive(Default)]
pub struct Definition {
    accessors: HashMap<String, Accessor>,
    mutators: HashMap<String, Mutator>,
    relations: BTreeMap<String, RelationSpec>,
}

impl Definition {
    /// Registers a read transform for `attr`.
    pub fn accessor(
        &mut self, attr: &str, f: impl Fn(&Value, &Columns) -> Value + Send + Sync + 'static,
    ) -> &mut Self {
        self.accessors.insert(accessor_name(attr), Arc::new(f));
        self
    }

    /// Registers a write transform for `attr`.
    pub fn mutator(
        &mut self, attr: &str, f: impl Fn(Value, &Columns) -> Value + Send + Sync + 'static,
    ) -> &mut Self {
        self.mutators.insert(mutator_name(attr), Arc::new(f));
        self
    }

    /// Registers a relation under `name`.
    pub fn relation(&mut self, name: impl Into<String>, spec: impl Into<RelationSpec>) -> &mut Self {
        self.relations.insert(name.into(), spec.into());
        self
    }
}

impl fmt::Debug for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Definition")
            .field("accessors", &self.accessors.keys().collect::<Vec<_>>())
            .field("mutators", &self.mutators.keys().collect::<Vec<_>>())
            .field("relations", &self.relations)
            .finish()
    }
}

/// Converts `first_name` or `first-name` to `FirstName`.
#[must_use]
pub fn studly(attr: &str) -> String {
    attr.replace(['-', '_'], " ")
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars).collect()
            })
        })
        .collect()
}

/// Registry key of the accessor for `attr`, e.g. `getFirstNameAttr`.
#[must_use]
pub fn accessor_name(attr: &str) -> String {
    format!("get{}Attr", studly(attr))
}

/// Registry key of the mutator for `attr`, e.g. `setFirstNameAttr`.
#[must_use]
pub fn mutator_name(attr: &str) -> String {
    format!("set{}Attr", studly(attr))
}

#[derive(Clone, Copy)]
struct Hooks {
    before_insert: fn(&Record) -> bool,
    after_insert: fn(&Record, bool),
    before_update: fn(&Record) -> bool,
    after_update: fn(&Record, bool),
    before_delete: fn(&Record) -> bool,
    after_delete: fn(&Record, bool),
}

/// Lifecycle event passed to [`ModelDef::before`] and [`ModelDef::after`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// `save`
    Insert,
    /// `update`
    Update,
    /// `destroy`
    Delete,
}

/// Runtime description of a [`Model`] type, built once per type.
pub struct ModelDef {
    type_id: TypeId,
    name: &'static str,
    table: &'static str,
    connection: &'static str,
    timestamps: Timestamps,
    create_time: Option<&'static str>,
    update_time: Option<&'static str>,
    definition: Definition,
    hooks: Hooks,
}

impl ModelDef {
    fn build<M: Model>() -> Self {
        let mut definition = Definition::default();
        M::define(&mut definition);

        Self {
            type_id: TypeId::of::<M>(),
            name: type_name::<M>(),
            table: M::TABLE,
            connection: M::CONNECTION,
            timestamps: M::TIMESTAMPS,
            create_time: M::CREATE_TIME,
            update_time: M::UPDATE_TIME,
            definition,
            hooks: Hooks {
                before_insert: M::before_insert,
                after_insert: M::after_insert,
                before_update: M::before_update,
                after_update: M::after_update,
                before_delete: M::before_delete,
                after_delete: M::after_delete,
            },
        }
    }

    /// Type identity of the model.
    #[must_use]
    pub const fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Type name of the model.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Default table.
    #[must_use]
    pub const fn table(&self) -> &'static str {
        self.table
    }

    /// Default connection name.
    #[must_use]
    pub const fn connection(&self) -> &'static str {
        self.connection
    }

    /// Timestamp mode.
    #[must_use]
    pub const fn timestamps(&self) -> Timestamps {
        self.timestamps
    }

    /// Create-time column.
    #[must_use]
    pub const fn create_time(&self) -> Option<&'static str> {
        self.create_time
    }

    /// Update-time column.
    #[must_use]
    pub const fn update_time(&self) -> Option<&'static str> {
        self.update_time
    }

    /// Accessor registered for `attr`.
    #[must_use]
    pub fn accessor(&self, attr: &str) -> Option<&Accessor> {
        self.definition.accessors.get(&accessor_name(attr))
    }

    /// Mutator registered for `attr`.
    #[must_use]
    pub fn mutator(&self, attr: &str) -> Option<&Mutator> {
        self.definition.mutators.get(&mutator_name(attr))
    }

    /// Describes the relation `name` without querying.
    #[must_use]
    pub fn describe(&self, name: &str) -> Option<&RelationSpec> {
        self.definition.relations.get(name)
    }

    /// Names of the declared relations.
    pub fn relations(&self) -> impl Iterator<Item = &str> {
        self.definition.relations.keys().map(String::as_str)
    }

    /// Runs the before-hook for `event`.
    #[must_use]
    pub fn before(&self, event: Event, record: &Record) -> bool {
        let hook = match event {
            Event::Insert => self.hooks.before_insert,
            Event::Update => self.hooks.before_update,
            Event::Delete => self.hooks.before_delete,
        };
        hook(record)
    }

    /// Runs the after-hook for `event`.
    pub fn after(&self, event: Event, record: &Record, success: bool) {
        let hook = match event {
            Event::Insert => self.hooks.after_insert,
            Event::Update => self.hooks.after_update,
            Event::Delete => self.hooks.after_delete,
        };
        hook(record, success);
    }
}

impl fmt::Debug for ModelDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDef")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("connection", &self.connection)
            .field("timestamps", &self.timestamps)
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

/// Returns the shared definition of `M`, building it on first use.
#[must_use]
pub fn definition<M: Model>() -> Arc<ModelDef> {
    let type_id = TypeId::of::<M>();
    if let Some(def) = REGISTRY.read().get(&type_id) {
        return Arc::clone(def);
    }

    let mut registry = REGISTRY.write();
    Arc::clone(registry.entry(type_id).or_insert_with(|| {
        tracing::debug!(model = type_name::<M>(), table = M::TABLE, "registering model");
        Arc::new(ModelDef::build::<M>())
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_method_names() {
        assert_eq!(studly("first_name"), "FirstName");
        assert_eq!(studly("first-name"), "FirstName");
        assert_eq!(studly("firstName"), "FirstName");
        assert_eq!(studly("__id"), "Id");
        assert_eq!(accessor_name("first_name"), "getFirstNameAttr");
        assert_eq!(mutator_name("first_name"), "setFirstNameAttr");
    }

    struct Plain;

    impl Model for Plain {
        const TABLE: &'static str = "plain";

        fn define(def: &mut Definition) {
            def.accessor("full_name", |value, _| value.clone());
        }
    }

    #[test]
    fn builds_once_per_type() {
        let first = definition::<Plain>();
        let second = definition::<Plain>();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.table(), "plain");
        assert_eq!(first.connection(), "default");
        assert!(first.accessor("full-name").is_some());
        assert!(first.mutator("full_name").is_none());
    }
}
