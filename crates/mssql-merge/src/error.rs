//! Error types for the merge library.

use thiserror::Error;

/// SQL Server error number for a PRIMARY KEY / UNIQUE constraint violation.
pub const MSSQL_UNIQUE_CONSTRAINT_VIOLATION: u32 = 2627;

/// SQL Server error number for a duplicate key in a unique index.
pub const MSSQL_UNIQUE_INDEX_VIOLATION: u32 = 2601;

/// Main error type for merge operations.
#[derive(Error, Debug)]
pub enum MergeError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database query or protocol error
    #[error("Database error: {0}")]
    Database(#[from] tiberius::error::Error),

    /// Connection could not be established
    #[error("Connection error: {message}\n  Context: {context}")]
    Connection { message: String, context: String },

    /// Schema introspection returned something unusable
    #[error("Catalog query failed: {0}")]
    Catalog(String),

    /// Structural change (DDL, constraint toggle) failed; the merge cannot continue
    #[error("{operation} failed on {object}: {message}")]
    Structural {
        operation: String,
        object: String,
        message: String,
    },

    /// Row copy hit an existing key in the destination
    #[error("Duplicate keys were found in table {table}: {message}")]
    DuplicateKey { table: String, message: String },

    /// Row copy failed for a reason other than a duplicate key
    #[error("Copy failed for table {table}: {message}")]
    Copy { table: String, message: String },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MergeError {
    /// Create a Connection error with context about where it occurred
    pub fn connection(message: impl ToString, context: impl Into<String>) -> Self {
        MergeError::Connection {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Structural error
    pub fn structural(
        operation: impl Into<String>,
        object: impl Into<String>,
        message: impl ToString,
    ) -> Self {
        MergeError::Structural {
            operation: operation.into(),
            object: object.into(),
            message: message.to_string(),
        }
    }

    /// Create a Copy error
    pub fn copy(table: impl Into<String>, message: impl ToString) -> Self {
        MergeError::Copy {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Classify a failed copy statement: unique violations become `DuplicateKey`.
    pub fn from_copy_failure(table: impl Into<String>, err: tiberius::error::Error) -> Self {
        let table = table.into();
        if is_duplicate_key(&err) {
            MergeError::DuplicateKey {
                table,
                message: err.to_string(),
            }
        } else {
            MergeError::copy(table, err)
        }
    }

    /// Whether this error is the tolerated per-table duplicate key outcome.
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, MergeError::DuplicateKey { .. })
    }

    /// Process exit code for this error category.
    pub fn exit_code(&self) -> u8 {
        match self {
            MergeError::Config(_) | MergeError::Yaml(_) | MergeError::Json(_) => 1,
            MergeError::Connection { .. } => 2,
            MergeError::Database(_) | MergeError::Catalog(_) => 3,
            MergeError::Structural { .. } => 4,
            MergeError::DuplicateKey { .. } | MergeError::Copy { .. } => 5,
            MergeError::Io(_) => 7,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Whether a tiberius error is a PRIMARY KEY / UNIQUE violation.
pub fn is_duplicate_key(err: &tiberius::error::Error) -> bool {
    match err {
        tiberius::error::Error::Server(token) => matches!(
            token.code(),
            MSSQL_UNIQUE_CONSTRAINT_VIOLATION | MSSQL_UNIQUE_INDEX_VIOLATION
        ),
        _ => false,
    }
}

/// Result type alias for merge operations.
pub type Result<T> = std::result::Result<T, MergeError>;
