use thiserror::Error;

/// Error kinds raised by the ORM.
///
/// Operations return `anyhow::Result`; callers branch on the kind with
/// `err.downcast_ref::<Error>()`. Failed statements carry [`Error::Query`] as
/// context over the driver error.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The table is missing or lacks a primary key where one is required.
    #[error("schema error: {0}")]
    Schema(String),

    /// The operation needs a primary key value or a condition and has neither.
    #[error("state error: {0}")]
    State(String),

    /// A relation is unknown or its keys cannot be resolved.
    #[error("relation error: {0}")]
    Relation(String),

    /// The statement failed to execute.
    #[error("query failed: {sql}")]
    Query {
        /// The SQL text of the failed statement.
        sql: String,
    },
}

impl Error {
    /// Returns `true` when `err` (or any context layered on it) is this kind.
    #[must_use]
    pub fn is(err: &anyhow::Error, pred: impl Fn(&Self) -> bool) -> bool {
        err.downcast_ref::<Self>().is_some_and(pred)
    }
}
