//! # mssql-merge
//!
//! Merge two SQL Server databases that share one schema without identity collisions.
//!
//! A merge run works in four phases:
//!
//! - **Tenant bootstrap**: seed an organization row in both databases and stamp
//!   the source's tenant column
//! - **Offsets**: pick how far to shift the source's identity values
//! - **Renumbering**: rewrite every source identity column and its foreign key
//!   children so no value collides with the destination
//! - **Copy**: bulk-insert every non-excluded table into the destination with
//!   constraints and triggers suspended
//!
//! ## Example
//!
//! ```rust,no_run
//! use mssql_merge::{Config, Merger, MssqlDatabase};
//!
//! #[tokio::main]
//! async fn main() -> mssql_merge::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let source = MssqlDatabase::connect(&config.source).await?;
//!     let destination = MssqlDatabase::connect(&config.destination).await?;
//!     let report = Merger::new(&source, &destination, &config).run().await?;
//!     println!("Copied {} rows", report.rows_copied);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod copy;
pub mod core;
pub mod drivers;
pub mod error;
pub mod offset;
pub mod orchestrator;
pub mod renumber;
pub mod tenant;

// Re-exports for convenient access
pub use config::{Config, DatabaseConfig, MergeConfig, OffsetStrategy, Organization, TenantConfig};
pub use copy::{CopyOrchestrator, CopyStatus, TableCopyOutcome};
pub use crate::core::{MergeDatabase, SchemaCatalog};
pub use drivers::MssqlDatabase;
pub use error::{MergeError, Result};
pub use offset::{policy_for, OffsetPlan, OffsetPolicy};
pub use orchestrator::{MergePlan, MergeReport, Merger};
pub use renumber::{IdentityRenumberer, RenumberedColumn};
pub use tenant::TenantStamp;
