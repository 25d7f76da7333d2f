///
/// Error types and the coarse outcome taxonomy.
///
/// Every fallible operation returns `Result<_, DbError>`. Callers that only
/// care about the coarse category (retry policy, reporting) use `status()`,
/// which maps errors and successful outcomes alike onto `Status`.
///

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Coarse outcome of any manager call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    AlreadyOpen,
    /// Cache miss, or a SELECT that matched nothing.
    NotFound,
    StopCallback,
    FailCallback,
    FailedVerifySchema,
    Unsuccess,
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database is not open")]
    NotOpen,

    #[error("Invalid open options: {0}")]
    InvalidOptions(&'static str),

    #[error("Schema verification failed for '{sql}': {reason}")]
    SchemaVerification { sql: String, reason: String },

    #[error("Create statement is not a CREATE TABLE: '{sql}'")]
    NotCreateTable { sql: String },

    #[error("Create statement list is empty")]
    EmptyCreateList,

    #[error("PRAGMA statements cannot be prepared ahead of time: '{sql}'")]
    PragmaNotCacheable { sql: String },

    #[error("PRAGMA parameter {position} must be an integer, got {kind}")]
    PragmaArgument { position: usize, kind: &'static str },

    #[error("Statement expects {expected} parameters, got {actual}")]
    ParameterCount { expected: usize, actual: usize },

    #[error("Argument {position} is too large to bind ({len} bytes)")]
    ArgumentTooLarge { position: usize, len: usize },

    #[error("Prepared statement not found: {0}")]
    NotFound(String),

    #[error("Row callback reported failure")]
    CallbackFailed,

    #[error("Database stayed busy for {waited:?}")]
    Busy { waited: Duration },

    #[error("SQLite error {code}: {message}")]
    Sqlite { code: i32, message: String },

    #[error("SQL text contains an interior NUL byte")]
    InteriorNul,

    #[error("Failed to remove database file {path}: {source}")]
    RemoveFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Rusqlite(#[from] rusqlite::Error),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl DbError {
    pub fn status(&self) -> Status {
        match self {
            DbError::NotFound(_) => Status::NotFound,
            DbError::CallbackFailed => Status::FailCallback,
            DbError::SchemaVerification { .. } => Status::FailedVerifySchema,
            _ => Status::Unsuccess,
        }
    }

    /// Primary SQLite result code, when the error came from the engine.
    pub fn sqlite_code(&self) -> Option<i32> {
        match self {
            DbError::Sqlite { code, .. } => Some(code & 0xff),
            DbError::Busy { .. } => Some(rusqlite::ffi::SQLITE_BUSY as i32),
            DbError::Rusqlite(rusqlite::Error::SqliteFailure(err, _)) => {
                Some(err.extended_code & 0xff)
            }
            _ => None,
        }
    }
}
