//! Identifier validation and quoting for generated SQL.
//!
//! SQL identifiers (table names, column names, schema names, constraint names)
//! cannot be passed as parameters in prepared statements - only data values can.
//! Every identifier the engine splices into DDL therefore goes through [`Ident`],
//! which rejects suspicious input and renders SQL Server bracket quoting with
//! closing brackets escaped.

use std::fmt;

use crate::error::{MergeError, Result};

/// Maximum identifier length for SQL Server (sysname).
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Validate an identifier for security issues.
///
/// Rejects:
/// - Empty identifiers
/// - Identifiers containing null bytes (injection vector)
/// - Identifiers exceeding maximum length
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MergeError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(MergeError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    let chars = name.chars().count();
    if chars > MAX_IDENTIFIER_LENGTH {
        return Err(MergeError::Config(format!(
            "SECURITY: Identifier exceeds maximum length of {} characters (got {}): {:?}",
            MAX_IDENTIFIER_LENGTH, chars, name
        )));
    }

    Ok(())
}

/// A validated SQL Server identifier.
///
/// `Display` renders the bracket-quoted form, so an `Ident` can be dropped
/// straight into a `format!` that builds a statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ident(String);

impl Ident {
    /// Validate and wrap a raw identifier.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_identifier(&name)?;
        Ok(Self(name))
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.replace(']', "]]"))
    }
}
