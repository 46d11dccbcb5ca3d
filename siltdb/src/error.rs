use crate::schema::SchemaVersion;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SiltDbError {
    #[error("incompatible migration set applied. DB: {database_version}, migration: {migration_from}")]
    IncompatibleMigration {
        database_version: SchemaVersion,
        migration_from: SchemaVersion,
    },

    #[error("driver used before a database was opened")]
    NotInitialized,

    #[error("lock poisoned: {0}")]
    Lock(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SiltDbError>;
