use crate::error::{AppError, AppErrorKind, InfrastructureError};
use thiserror::Error;

#[derive(Debug, Clone)]
pub enum DatabaseErrorKind {
    NotFound { entity: String, id: String },
    UniqueViolation { constraint: Option<String> },
    ConnectionError { message: String },
    Unknown { message: String },
}

#[derive(Debug, Clone, Error)]
#[error("{}", self.message())]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind }
    }

    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::RowNotFound => DatabaseErrorKind::NotFound {
                entity: "row".to_string(),
                id: String::new(),
            },
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                DatabaseErrorKind::UniqueViolation {
                    constraint: db_err.constraint().map(str::to_string),
                }
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseErrorKind::ConnectionError {
                    message: err.to_string(),
                }
            }
            _ => DatabaseErrorKind::Unknown {
                message: err.to_string(),
            },
        };
        Self { kind }
    }

    pub fn message(&self) -> String {
        match &self.kind {
            DatabaseErrorKind::NotFound { entity, id } => format!("{} not found: {}", entity, id),
            DatabaseErrorKind::UniqueViolation { constraint } => format!(
                "unique constraint violated: {}",
                constraint.as_deref().unwrap_or("unknown")
            ),
            DatabaseErrorKind::ConnectionError { message } => {
                format!("database connection error: {}", message)
            }
            DatabaseErrorKind::Unknown { message } => format!("database error: {}", message),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::ConnectionError { .. })
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
            is_retryable: err.is_retryable(),
            message: err.message(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_not_found_maps_to_not_found() {
        let err = DatabaseError::from_sqlx(sqlx::Error::RowNotFound);
        assert!(matches!(err.kind, DatabaseErrorKind::NotFound { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn pool_timeout_is_retryable() {
        let err = DatabaseError::from_sqlx(sqlx::Error::PoolTimedOut);
        assert!(err.is_retryable());

        let app: AppError = err.into();
        assert_eq!(app.status_code(), 500);
    }
}
