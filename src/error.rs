//! Error types for the access layer.
//!
//! All failures are expressed through `DaoError` using `thiserror`. Nothing in
//! this crate panics on database failure and nothing is retried; every
//! failable operation additionally retains its message as the connection's
//! "last error" string.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DaoError {
    #[error("no database connected")]
    NotConnected,

    #[error("driver error: {message}")]
    Driver {
        /// Message from the underlying driver, captured verbatim.
        message: String,
        /// e.g. "42P01" for an undefined table
        sql_state: Option<String>,
    },

    #[error("unknown column '{column}' for table '{table}'")]
    Validation { table: String, column: String },

    #[error("usage error: {0}")]
    Usage(String),

    #[error("no row with {column} = '{id}' in table '{table}'")]
    NotFound {
        table: String,
        column: String,
        id: String,
    },

    #[error("timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },
}

impl DaoError {
    /// Create a driver error without an SQLSTATE code.
    pub fn driver(message: impl Into<String>) -> Self {
        Self::Driver {
            message: message.into(),
            sql_state: None,
        }
    }

    /// Create a validation error for an unknown column.
    pub fn validation(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self::Validation {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Create a usage error.
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    /// Create a not-found error for an identifier lookup.
    pub fn not_found(
        table: impl Into<String>,
        column: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            table: table.into(),
            column: column.into(),
            id: id.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// True for lookups that matched no (or too many) rows.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// The SQLSTATE code reported by the driver, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Driver { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }
}

/// Convert sqlx errors to DaoError.
///
/// A zero-row fetch never reaches this conversion: the executor returns an
/// empty row set for that case. Only genuine driver/protocol failures do.
impl From<sqlx::Error> for DaoError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DaoError::Driver {
                    message: db_err.message().to_string(),
                    sql_state: code,
                }
            }
            sqlx::Error::Configuration(msg) => DaoError::driver(msg.to_string()),
            sqlx::Error::Io(io_err) => DaoError::driver(format!("I/O error: {}", io_err)),
            sqlx::Error::Tls(tls_err) => DaoError::driver(format!("TLS error: {}", tls_err)),
            sqlx::Error::Protocol(msg) => DaoError::driver(format!("protocol error: {}", msg)),
            sqlx::Error::ColumnNotFound(col) => {
                DaoError::driver(format!("column not found: {}", col))
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DaoError::driver(format!(
                "column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DaoError::driver(format!("failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DaoError::driver(format!("decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DaoError::driver("database worker crashed"),
            _ => DaoError::driver(format!("database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DaoResult<T> = Result<T, DaoError>;
