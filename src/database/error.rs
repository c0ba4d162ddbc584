use crate::error::{AppError, AppErrorKind, DomainError, InfrastructureError};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum DatabaseErrorKind {
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    #[error("connection error: {message}")]
    Connection { message: String },

    #[error("pool timed out waiting for a connection")]
    PoolTimeout,

    #[error("stored row could not be decoded: {message}")]
    Decode { message: String },

    #[error("database error: {message}")]
    Unknown { message: String },
}

/// Error returned by every [`crate::database::repository::PaymentStore`] method.
#[derive(Debug, Clone, Error)]
#[error("{kind}")]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(DatabaseErrorKind::Decode {
            message: message.into(),
        })
    }

    #[cfg(feature = "database")]
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::RowNotFound => DatabaseErrorKind::NotFound {
                entity: "row".to_string(),
                id: "unknown".to_string(),
            },
            sqlx::Error::PoolTimedOut => DatabaseErrorKind::PoolTimeout,
            sqlx::Error::Io(e) => DatabaseErrorKind::Connection {
                message: e.to_string(),
            },
            sqlx::Error::PoolClosed => DatabaseErrorKind::Connection {
                message: "pool closed".to_string(),
            },
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                DatabaseErrorKind::Decode {
                    message: err.to_string(),
                }
            }
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                DatabaseErrorKind::UniqueViolation {
                    constraint: db.constraint().unwrap_or("unknown").to_string(),
                }
            }
            _ => DatabaseErrorKind::Unknown {
                message: err.to_string(),
            },
        };
        Self::new(kind)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            DatabaseErrorKind::Connection { .. } | DatabaseErrorKind::PoolTimeout
        )
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        match err.kind {
            DatabaseErrorKind::NotFound { id, .. } => {
                AppError::new(AppErrorKind::Domain(DomainError::PaymentNotFound {
                    order_id: id.clone(),
                }))
                .with_order_id(id)
            }
            kind => {
                let is_retryable = matches!(
                    kind,
                    DatabaseErrorKind::Connection { .. } | DatabaseErrorKind::PoolTimeout
                );
                AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
                    message: kind.to_string(),
                    is_retryable,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_maps_to_404() {
        let err = DatabaseError::new(DatabaseErrorKind::NotFound {
            entity: "Payment".to_string(),
            id: "gw-1".to_string(),
        });
        let app: AppError = err.into();
        assert_eq!(app.status_code(), 404);
    }

    #[test]
    fn test_connection_error_is_retryable_500() {
        let err = DatabaseError::new(DatabaseErrorKind::Connection {
            message: "refused".to_string(),
        });
        assert!(err.is_retryable());
        let app: AppError = err.into();
        assert_eq!(app.status_code(), 500);
        assert!(app.is_retryable());
    }

    #[cfg(feature = "database")]
    #[test]
    fn test_from_sqlx_pool_timeout() {
        let err = DatabaseError::from_sqlx(sqlx::Error::PoolTimedOut);
        assert!(matches!(err.kind, DatabaseErrorKind::PoolTimeout));
    }
}
