//! Active-record ORM for SQL databases.
//!
//! Models map tables to [`Record`]s. A record carries column data checked
//! against the introspected table schema, a snapshot used to persist only
//! changed columns, and a fluent query state that the next terminal
//! operation consumes. Relations load on demand or, with `with(...)`, in one
//! batched statement per relation.
//!
//! # Quick Start
//!
//! ## Register a Connection
//!
//! ```ignore
//! use std::sync::Arc;
//! use omnia_orm::{Backend, Manager, Sqlite};
//!
//! // SQL_DATABASE selects the file; defaults to an in-memory database
//! let db = Sqlite::connect().await?;
//! Manager::global().add_connection("default", Arc::new(db));
//! ```
//!
//! ## Declare Models
//!
//! ```ignore
//! use omnia_orm::{Definition, Model, Timestamps, Value, belongs_to, has_many, model};
//!
//! pub struct User;
//!
//! impl Model for User {
//!     const TABLE: &'static str = "users";
//!     const TIMESTAMPS: Timestamps = Timestamps::DateTime;
//!
//!     fn define(def: &mut Definition) {
//!         def.accessor("name", |value, _| match value.as_str() {
//!             Some(name) => Value::from(name.to_uppercase()),
//!             None => value.clone(),
//!         });
//!         def.relation("posts", has_many::<Post>().foreign_key("user_id"));
//!     }
//! }
//!
//! model! {
//!     table = "posts",
//!     pub struct Post;
//! }
//! ```
//!
//! ## Read and Write
//!
//! ```ignore
//! use omnia_orm::{Filter, Model, Value};
//!
//! let mut user = User::create().await?;
//! user.set("name", "Ann")?;
//! user.set("age", 5)?;
//! let id = user.save().await?.done();
//!
//! // only `age` is written
//! user.update_with([("age", 6)]).await?;
//!
//! // atomic increment
//! user.update_with([("age", Value::inc(1))]).await?;
//!
//! // one statement for users, one for all of their posts
//! let users = User::create()
//!     .await?
//!     .r#where(Filter::gte("age", 18))
//!     .order_by_desc("id")
//!     .with(["posts"])
//!     .all()
//!     .await?;
//! ```
//!
//! ## Errors
//!
//! Operations return [`anyhow::Result`]. Branch on the kind with
//! `err.downcast_ref::<Error>()`; a hook veto is not an error but
//! [`Outcome::Vetoed`].

mod attribute;
mod connection;
mod crud;
mod delete;
mod eager;
mod error;
mod executor;
mod filter;
mod insert;
mod join;
mod model;
mod query;
mod record;
mod relation;
mod schema;
mod select;
#[cfg(feature = "sqlite")]
mod sqlite;
mod state;
mod types;
mod update;
mod value;

pub use attribute::Attribute;
pub use connection::{Backend, Connection, Executed, FromEnv, FutureResult, Manager};
pub use delete::Delete;
pub use error::Error;
pub use executor::QueryResult;
pub use filter::{Col, Filter, Operator};
pub use insert::Insert;
pub use join::{Join, JoinKind};
pub use model::{
    Accessor, Columns, Definition, Event, Model, ModelDef, Mutator, Outcome, Status, Timestamps,
    accessor_name, definition, mutator_name, studly,
};
pub use query::{Kind, Query};
pub use record::{Observer, Record};
pub use relation::{
    BelongsTo, BelongsToMany, Condition, Has, RelationSpec, Target, belongs_to, belongs_to_many,
    has_many, has_one,
};
pub use schema::{Column, ColumnType, SchemaCache, TableSchema};
pub use select::{Select, TOTAL_COUNT};
#[cfg(feature = "sqlite")]
pub use sqlite::{ConnectOptions, Sqlite};
pub use state::{Criterion, Limit, QueryState, Where};
pub use types::{DataType, Field, Row};
pub use update::Update;
pub use value::Value;
