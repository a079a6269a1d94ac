use thiserror::Error;

pub type Result<T> = std::result::Result<T, DatabaseError>;

/// SQLSTATE raised by `FOR UPDATE NOWAIT` when the row is already locked.
const LOCK_NOT_AVAILABLE: &str = "55P03";

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),

    #[error("Row is locked by another transaction: {0}")]
    LockNotAvailable(String),

    #[error("Database error: {0}")]
    Other(String),
}

impl DatabaseError {
    pub fn not_found(entity: &str, id: &str) -> Self {
        Self::NotFound(format!("{} with id {} not found", entity, id))
    }

    pub fn duplicate(entity: &str, field: &str) -> Self {
        Self::DuplicateEntry(format!("{} with {} already exists", entity, field))
    }

    /// Classify driver errors that callers need to tell apart.
    pub fn classify(err: sqlx::Error, entity: &str, id: &str) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::not_found(entity, id),
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                Self::duplicate(entity, id)
            }
            sqlx::Error::Database(ref db_err)
                if db_err.code().as_deref() == Some(LOCK_NOT_AVAILABLE) =>
            {
                Self::LockNotAvailable(format!("{} {}", entity, id))
            }
            other => Self::ConnectionError(other),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
