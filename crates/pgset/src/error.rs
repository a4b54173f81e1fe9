//! Error types for pgset

use thiserror::Error;

/// Result type alias for pgset operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Error types for query construction and execution
#[derive(Debug, Error)]
pub enum OrmError {
    /// Invalid model metadata or connection configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Unknown `__<operator>` suffix on a filter or update key
    #[error("Unsupported operator \"{operator}\" for {context}. Options are {options}")]
    UnsupportedOperator {
        operator: String,
        context: &'static str,
        options: String,
    },

    /// `in` lookup with an empty or non-sequence value
    #[error("Invalid value for IN clause: {0}")]
    InvalidMembership(String),

    /// Any other malformed lookup, update key or identifier
    #[error("Invalid lookup: {0}")]
    InvalidLookup(String),

    /// Batch insert called with no rows
    #[error("Nothing to create: no records were provided")]
    NothingToCreate,

    /// UPDATE without a predicate
    #[error("Unrestricted update: add a filter before calling update()")]
    UnrestrictedUpdate,

    /// DELETE without a predicate
    #[error("Unrestricted delete: add a filter before calling delete()")]
    UnrestrictedDelete,

    /// Single-row fetch matched no rows
    #[error("{model} matching query does not exist")]
    NotFound { model: String, sql: String },

    /// Single-row fetch matched more than one row
    #[error("get() returned more than one {model}")]
    MultipleFound { model: String, sql: String },

    /// Unique constraint violation reported by the server
    #[error("Duplicate key violates unique constraint \"{constraint}\" of table \"{table}\": {message}")]
    UniqueViolation {
        table: String,
        constraint: String,
        message: String,
    },

    /// Page number below 1
    #[error("Invalid page \"{0}\" and must be a non-zero positive integer")]
    InvalidPage(i64),

    /// Any other error reported by the server
    #[error("Database error (SQLSTATE {code}): {message}")]
    Database { code: String, message: String },

    /// Client-side driver error (closed connection, protocol error, ...)
    #[error("Query error: {0}")]
    Query(#[source] tokio_postgres::Error),

    /// Connection could not be established
    #[error("Connection error: {0}")]
    Connection(String),

    /// Pool error
    #[error("Pool error: {0}")]
    Pool(String),

    /// Row decode/mapping error
    #[error("Decode error on column '{column}': {message}")]
    Decode { column: String, message: String },

    /// Record (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Misuse of the explicit transaction API
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// The original error plus the failure of the rollback that followed it
    #[error("{error} (rollback failed: {rollback})")]
    RollbackFailed {
        error: Box<OrmError>,
        rollback: Box<OrmError>,
    },
}

impl OrmError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create an invalid lookup error
    pub fn lookup(message: impl Into<String>) -> Self {
        Self::InvalidLookup(message.into())
    }

    /// Create a decode error for a specific column
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    pub(crate) fn unsupported(
        operator: impl Into<String>,
        context: &'static str,
        options: &[&str],
    ) -> Self {
        Self::UnsupportedOperator {
            operator: operator.into(),
            context,
            options: options.join(", "),
        }
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is a multiple found error
    pub fn is_multiple_found(&self) -> bool {
        matches!(self, Self::MultipleFound { .. })
    }

    /// Check if this is a unique violation error
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation { .. })
    }

    /// Check if this error was raised before any statement reached the server
    pub fn is_construction(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_)
                | Self::UnsupportedOperator { .. }
                | Self::InvalidMembership(_)
                | Self::InvalidLookup(_)
                | Self::NothingToCreate
                | Self::UnrestrictedUpdate
                | Self::UnrestrictedDelete
                | Self::InvalidPage(_)
        )
    }

    /// SQLSTATE code when the error came from the server
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Self::UniqueViolation { .. } => Some("23505"),
            Self::Database { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Parse a tokio_postgres error into a more specific OrmError
    pub fn from_db_error(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let message = db_err.message().to_string();
            let code = db_err.code().code();

            if code == "23505" {
                return Self::UniqueViolation {
                    table: db_err.table().unwrap_or("unknown").to_string(),
                    constraint: db_err.constraint().unwrap_or("unknown").to_string(),
                    message,
                };
            }
            let message = match db_err.detail() {
                Some(detail) => format!("{message} ({detail})"),
                None => message,
            };
            return Self::Database {
                code: code.to_string(),
                message,
            };
        }
        Self::Query(err)
    }
}

impl From<tokio_postgres::Error> for OrmError {
    fn from(err: tokio_postgres::Error) -> Self {
        Self::from_db_error(err)
    }
}

impl From<deadpool_postgres::PoolError> for OrmError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Self::Pool(err.to_string())
    }
}

impl From<serde_json::Error> for OrmError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
