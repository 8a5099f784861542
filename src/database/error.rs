use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} {id} changed since it was read (expected version {expected})")]
    VersionConflict {
        entity: &'static str,
        id: String,
        expected: i64,
    },

    #[error("duplicate {entity}: {key}")]
    Duplicate { entity: &'static str, key: String },

    #[error("failed to decode {entity} row: {message}")]
    Decode {
        entity: &'static str,
        message: String,
    },

    #[error("database error: {message}")]
    Database { message: String, retryable: bool },

    #[error("commit failed: {0}")]
    CommitFailed(String),

    #[error("unit of work already closed")]
    Closed,
}

impl StoreError {
    pub fn decode(entity: &'static str, message: impl ToString) -> Self {
        StoreError::Decode {
            entity,
            message: message.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Database { retryable, .. } => *retryable,
            StoreError::CommitFailed(_) => true,
            _ => false,
        }
    }
}

#[cfg(feature = "database")]
impl StoreError {
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                StoreError::Duplicate {
                    entity: "row",
                    key: db.constraint().unwrap_or("unique").to_string(),
                }
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed => {
                StoreError::Database {
                    message: err.to_string(),
                    retryable: true,
                }
            }
            // serialization_failure / deadlock_detected
            sqlx::Error::Database(db)
                if matches!(db.code().as_deref(), Some("40001") | Some("40P01")) =>
            {
                StoreError::Database {
                    message: err.to_string(),
                    retryable: true,
                }
            }
            _ => StoreError::Database {
                message: err.to_string(),
                retryable: false,
            },
        }
    }
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::from_sqlx(err)
    }
}
