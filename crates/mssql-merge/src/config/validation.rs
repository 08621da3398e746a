//! Configuration validation.

use super::{Config, DatabaseConfig};
use crate::core::identifier::validate_identifier;
use crate::error::{MergeError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    validate_database("source", &config.source)?;
    validate_database("destination", &config.destination)?;

    // Cannot merge a database into itself
    if config.source.host.eq_ignore_ascii_case(&config.destination.host)
        && config.source.port == config.destination.port
        && config
            .source
            .database
            .eq_ignore_ascii_case(&config.destination.database)
    {
        return Err(MergeError::Config(
            "source and destination cannot be the same database".into(),
        ));
    }

    validate_identifier(&config.merge.shadow_column)
        .map_err(|e| MergeError::Config(format!("merge.shadow_column: {}", e)))?;

    if config.merge.excluded_tables.iter().any(|t| t.trim().is_empty()) {
        return Err(MergeError::Config(
            "merge.excluded_tables cannot contain empty names".into(),
        ));
    }

    if let Some(tenant) = &config.tenant {
        if tenant.organization.id <= 0 {
            return Err(MergeError::Config(
                "tenant.organization.id must be positive".into(),
            ));
        }
        validate_identifier(&tenant.organization_table)
            .map_err(|e| MergeError::Config(format!("tenant.organization_table: {}", e)))?;
        validate_identifier(&tenant.column)
            .map_err(|e| MergeError::Config(format!("tenant.column: {}", e)))?;
    }

    Ok(())
}

fn validate_database(section: &str, db: &DatabaseConfig) -> Result<()> {
    if db.host.is_empty() {
        return Err(MergeError::Config(format!("{}.host is required", section)));
    }
    if db.database.is_empty() {
        return Err(MergeError::Config(format!(
            "{}.database is required",
            section
        )));
    }
    if db.user.is_empty() {
        return Err(MergeError::Config(format!("{}.user is required", section)));
    }
    validate_identifier(&db.schema)
        .map_err(|e| MergeError::Config(format!("{}.schema: {}", section, e)))?;
    Ok(())
}
