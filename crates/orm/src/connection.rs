use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::sync::{Arc, LazyLock};

use anyhow::{Result, anyhow};
use futures::future::BoxFuture;
use parking_lot::RwLock;

use crate::schema::TableSchema;
use crate::types::{DataType, Row};

/// Result type for asynchronous operations.
pub type FutureResult<T> = BoxFuture<'static, Result<T>>;

static MANAGER: LazyLock<Manager> = LazyLock::new(Manager::default);

/// Outcome of a statement that does not return rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Executed {
    /// Number of rows inserted, updated or deleted.
    pub rows_affected: u64,
    /// Key generated by the most recent insert, if the driver reports one.
    pub last_insert_id: Option<i64>,
}

/// SQL providers implement [`Connection`] to run statements, manage
/// transactions and answer schema questions for the ORM.
///
/// Implementations are expected to serialize statements issued on the same
/// physical connection.
pub trait Connection: Debug + Send + Sync + 'static {
    /// Execute a query and return the resulting rows.
    fn query(&self, query: String, params: Vec<DataType>) -> FutureResult<Vec<Row>>;

    /// Execute a statement that does not return rows (e.g., an `INSERT`, `UPDATE`, or `DELETE`).
    fn exec(&self, query: String, params: Vec<DataType>) -> FutureResult<Executed>;

    /// Start a transaction.
    fn begin(&self) -> FutureResult<()>;

    /// Commit the open transaction.
    fn commit(&self) -> FutureResult<()>;

    /// Roll back the open transaction.
    fn rollback(&self) -> FutureResult<()>;

    /// Identifier of the database this connection is bound to.
    fn database(&self) -> String;

    /// Columns and primary key of `table`, or `None` if there is no such table.
    fn describe(&self, table: String) -> FutureResult<Option<TableSchema>>;

    /// Columns of `table` declared as foreign keys referencing `referenced`.
    fn foreign_keys(&self, table: String, referenced: String) -> FutureResult<Vec<String>>;
}

/// Implemented by connection backends that can be created from options.
pub trait Backend: Sized + Sync + Send {
    /// The options used to connect to the backend.
    type ConnectOptions: FromEnv;

    /// Connect using options loaded from the environment.
    #[must_use]
    fn connect() -> impl Future<Output = Result<Self>> {
        async { Self::connect_with(Self::ConnectOptions::from_env()?).await }
    }

    /// Connect with the specified options.
    fn connect_with(options: Self::ConnectOptions) -> impl Future<Output = Result<Self>>;
}

/// Trait for creating connection options from environment variables.
pub trait FromEnv: Sized {
    /// Create connection options from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid.
    fn from_env() -> Result<Self>;
}

/// Process-wide registry of named connections.
#[derive(Debug, Default)]
pub struct Manager {
    connections: RwLock<HashMap<String, Arc<dyn Connection>>>,
}

impl Manager {
    /// The shared instance.
    #[must_use]
    pub fn global() -> &'static Self {
        &MANAGER
    }

    /// Registers `conn` under `name`, replacing any previous registration.
    pub fn add_connection(&self, name: impl Into<String>, conn: Arc<dyn Connection>) {
        let name = name.into();
        tracing::debug!(connection = %name, "registering connection");
        self.connections.write().insert(name, conn);
    }

    /// Removes the connection registered under `name`.
    pub fn remove_connection(&self, name: &str) -> Option<Arc<dyn Connection>> {
        self.connections.write().remove(name)
    }

    /// Returns the connection registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if no connection has been registered under `name`.
    pub fn connection(&self, name: &str) -> Result<Arc<dyn Connection>> {
        self.connections
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("no connection registered as '{name}'"))
    }

    /// Starts a transaction on the named connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is unknown or refuses to begin.
    pub async fn start_transaction(&self, name: &str) -> Result<()> {
        self.connection(name)?.begin().await
    }

    /// Commits the open transaction on the named connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is unknown or the commit fails.
    pub async fn commit(&self, name: &str) -> Result<()> {
        self.connection(name)?.commit().await
    }

    /// Rolls back the open transaction on the named connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is unknown or the rollback fails.
    pub async fn rollback(&self, name: &str) -> Result<()> {
        self.connection(name)?.rollback().await
    }
}
