//! Error types for the persistence layer.
//!
//! Errors are grouped by who has to act on them: configuration errors are
//! fatal at startup or registration time, resource errors describe the outcome
//! of a mutation against the authoritative store, validation errors reject a
//! malformed request before it reaches a backend, and backend and index errors
//! carry engine failures.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

/// The primary error type for all storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Configuration errors (fatal for the composition root)
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Resource state errors
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Validation errors
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Relational backend errors
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Search index errors
    #[error(transparent)]
    Index(#[from] IndexError),
}

impl StorageError {
    /// Returns true when the error is a zero-rows-affected outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::Resource(ResourceError::NotFound { .. }))
    }

    /// Returns true when the store rejected a write on a constraint.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            StorageError::Resource(ResourceError::ConstraintViolation { .. })
        )
    }
}

/// Errors in configuration or entity declarations.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unsupported backend kind: {kind}")]
    UnsupportedBackend { kind: String },

    #[error("backend '{kind}' is not enabled; rebuild with the '{feature}' feature")]
    BackendNotEnabled { kind: String, feature: &'static str },

    #[error("store '{store}' is missing required parameter '{parameter}'")]
    MissingParameter { store: String, parameter: String },

    #[error("invalid entity declaration for table '{table}': {message}")]
    InvalidEntity { table: String, message: String },

    #[error("unknown store: {key}")]
    UnknownStore { key: String },

    #[error("empty store key is ambiguous: {count} stores are configured")]
    AmbiguousStore { count: usize },

    #[error("no stores are configured")]
    NoStores,

    #[error("unknown search index configuration: {name}")]
    UnknownIndex { name: String },

    #[error("unsupported search index kind: {kind}")]
    UnsupportedIndexKind { kind: String },

    #[error("unsupported search index version: {version}")]
    UnsupportedIndexVersion { version: String },

    #[error("invalid settings: {message}")]
    InvalidSettings { message: String },
}

/// Errors related to the outcome of a mutation.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// The filter matched zero rows.
    #[error("no matching row in {table} for {operation}")]
    NotFound {
        table: String,
        operation: &'static str,
    },

    /// The store rejected the write; the engine message is kept verbatim.
    #[error("constraint violation on {table}: {message}")]
    ConstraintViolation { table: String, message: String },
}

/// Errors raised before a request reaches a backend.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("unknown column '{column}' for table '{table}'")]
    UnknownColumn { table: String, column: String },

    #[error("invalid sort specification '{spec}': {message}")]
    InvalidSort { spec: String, message: String },

    #[error("invalid identifier: {name}")]
    InvalidIdentifier { name: String },

    #[error("invalid value for column '{column}': {message}")]
    InvalidValue { column: String, message: String },

    #[error("update on '{table}' has no columns to set")]
    EmptyPatch { table: String },

    /// An update or delete with no condition would touch every row.
    #[error("{operation} on '{table}' requires a condition")]
    MissingCondition {
        table: String,
        operation: &'static str,
    },
}

/// Errors from relational backends.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The backend is not available.
    #[error("backend unavailable: {backend_name}")]
    Unavailable {
        backend_name: String,
        message: String,
    },

    /// Connection to the backend failed.
    #[error("connection failed to {backend_name}: {message}")]
    ConnectionFailed {
        backend_name: String,
        message: String,
    },

    /// Connection pool exhausted.
    #[error("connection pool exhausted for {backend_name}")]
    PoolExhausted { backend_name: String },

    /// Schema provisioning error.
    #[error("schema migration failed: {message}")]
    MigrationError { message: String },

    /// Internal backend error.
    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {message}")]
    SerializationError { message: String },
}

/// Errors from search-index clients and the change notifier.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("search index request on {index} failed: {message}")]
    Transport { index: String, message: String },

    #[error("search index request on {index} failed with status {status}: {body}")]
    Status {
        index: String,
        status: u16,
        body: String,
    },

    #[error("malformed search index response from {index}: {message}")]
    MalformedResponse { index: String, message: String },

    #[error("search index unavailable: {message}")]
    Unavailable { message: String },

    #[error("change notifier is closed")]
    NotifierClosed,
}

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Backend(BackendError::SerializationError {
            message: err.to_string(),
        })
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Backend(BackendError::Internal {
            backend_name: "sqlite".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

#[cfg(feature = "sqlite")]
impl From<r2d2::Error> for StorageError {
    fn from(_err: r2d2::Error) -> Self {
        StorageError::Backend(BackendError::PoolExhausted {
            backend_name: "sqlite".to_string(),
        })
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for StorageError {
    fn from(err: tokio_postgres::Error) -> Self {
        StorageError::Backend(BackendError::Internal {
            backend_name: "postgres".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

#[cfg(feature = "postgres")]
impl From<deadpool_postgres::PoolError> for StorageError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        match err {
            deadpool_postgres::PoolError::Timeout(_) => {
                StorageError::Backend(BackendError::PoolExhausted {
                    backend_name: "postgres".to_string(),
                })
            }
            other => StorageError::Backend(BackendError::ConnectionFailed {
                backend_name: "postgres".to_string(),
                message: other.to_string(),
            }),
        }
    }
}

#[cfg(feature = "mysql")]
impl From<mysql_async::Error> for StorageError {
    fn from(err: mysql_async::Error) -> Self {
        StorageError::Backend(BackendError::Internal {
            backend_name: "mysql".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = StorageError::Resource(ResourceError::NotFound {
            table: "users".to_string(),
            operation: "update",
        });
        assert_eq!(err.to_string(), "no matching row in users for update");
        assert!(err.is_not_found());
        assert!(!err.is_constraint_violation());
    }

    #[test]
    fn test_ambiguous_store_display() {
        let err = ConfigError::AmbiguousStore { count: 2 };
        assert!(err.to_string().contains("ambiguous"));
    }

    #[test]
    fn test_index_status_display() {
        let err = IndexError::Status {
            index: "db1_users".to_string(),
            status: 400,
            body: "bad request".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "search index request on db1_users failed with status 400: bad request"
        );
    }

    #[test]
    fn test_storage_error_from_categories() {
        let err: StorageError = ConfigError::NoStores.into();
        assert!(matches!(err, StorageError::Config(_)));

        let err: StorageError = IndexError::NotifierClosed.into();
        assert!(matches!(err, StorageError::Index(_)));

        let err: StorageError = ResourceError::ConstraintViolation {
            table: "users".to_string(),
            message: "UNIQUE constraint failed".to_string(),
        }
        .into();
        assert!(err.is_constraint_violation());
    }

    #[test]
    fn test_from_serde_json_error() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json");
        let err: StorageError = parse.unwrap_err().into();
        assert!(matches!(
            err,
            StorageError::Backend(BackendError::SerializationError { .. })
        ));
    }
}
