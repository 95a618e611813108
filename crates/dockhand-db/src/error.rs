//! Database error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("log chunk codec error: {0}")]
    Codec(#[from] std::io::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

pub type DbResult<T> = std::result::Result<T, DbError>;

impl From<DbError> for dockhand_core::Error {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(msg) => dockhand_core::Error::NotFound(msg),
            _ => dockhand_core::Error::Storage(err.to_string()),
        }
    }
}
