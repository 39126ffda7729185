use std::path::PathBuf;

use thiserror::Error;

/// Errors from the Postgres layer.
#[derive(Debug, Error)]
pub enum DbError {
    /// Failed to open the connection pool.
    #[error("connecting to postgres: {0}")]
    Connect(#[source] sqlx::Error),

    /// A statement failed to execute or decode.
    #[error("postgres query: {0}")]
    Query(#[source] sqlx::Error),

    /// A migration failed to apply.
    #[error("applying migrations: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),

    /// None of the candidate directories held a readable migration set.
    #[error("no migrations found in {searched:?}")]
    MigrationsNotFound { searched: Vec<PathBuf> },

    /// A value could not be encoded for a JSONB column.
    #[error("encoding JSON column: {0}")]
    Serialization(#[from] serde_json::Error),
}
