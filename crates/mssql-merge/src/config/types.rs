//! Configuration type definitions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database whose rows are renumbered and copied out.
    pub source: DatabaseConfig,

    /// Database that receives the rows.
    pub destination: DatabaseConfig,

    /// Merge behavior configuration.
    #[serde(default)]
    pub merge: MergeConfig,

    /// Optional tenant bootstrap performed before renumbering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<TenantConfig>,
}

/// Connection settings for one SQL Server database.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 1433).
    #[serde(default = "default_mssql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password. Never written back out.
    #[serde(default, skip_serializing)]
    pub password: String,

    /// Schema holding the merged tables (default: "dbo").
    #[serde(default = "default_dbo_schema")]
    pub schema: String,

    /// Encrypt connection (default: true).
    #[serde(default = "default_true")]
    pub encrypt: bool,

    /// Trust server certificate (default: false).
    #[serde(default)]
    pub trust_server_cert: bool,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("encrypt", &self.encrypt)
            .field("trust_server_cert", &self.trust_server_cert)
            .finish()
    }
}

/// Merge behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Tables never renumbered or copied (reference/lookup data).
    #[serde(default = "default_excluded_tables")]
    pub excluded_tables: Vec<String>,

    /// How the identity offset is chosen.
    #[serde(default)]
    pub offset_strategy: OffsetStrategy,

    /// Recreate dropped primary and foreign keys after the shift (default: true).
    #[serde(default = "default_true")]
    pub restore_keys: bool,

    /// Attach ON UPDATE CASCADE to restored non-self references (default: false).
    #[serde(default)]
    pub cascade_on_update: bool,

    /// Temporary column used while rewriting an identity column.
    #[serde(default = "default_shadow_column")]
    pub shadow_column: String,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            excluded_tables: default_excluded_tables(),
            offset_strategy: OffsetStrategy::default(),
            restore_keys: true,
            cascade_on_update: false,
            shadow_column: default_shadow_column(),
        }
    }
}

impl MergeConfig {
    /// Whether a table is excluded from renumbering and copy.
    pub fn is_excluded(&self, table: &str) -> bool {
        self.excluded_tables
            .iter()
            .any(|t| t.eq_ignore_ascii_case(table))
    }
}

/// Offset selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffsetStrategy {
    /// One global offset: the largest identity value in either database.
    #[default]
    MaxIdentity,

    /// Per-column offsets from the destination's last issued identity values.
    DestinationLastValue,
}

/// Tenant bootstrap configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    /// Organization row that must exist in both databases.
    pub organization: Organization,

    /// Table holding organization rows (default: "Organization").
    #[serde(default = "default_organization_table")]
    pub organization_table: String,

    /// Convention-named tenant column stamped on every table (default: "OrganizationId").
    #[serde(default = "default_tenant_column")]
    pub column: String,
}

/// Organization record seeded by the tenant bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: i32,
    pub eng_name: String,
    pub loc_name: String,
    pub last_status_id: i32,
}

fn default_mssql_port() -> u16 {
    1433
}

fn default_dbo_schema() -> String {
    "dbo".to_string()
}

fn default_true() -> bool {
    true
}

fn default_shadow_column() -> String {
    "TempMigrationKey".to_string()
}

fn default_organization_table() -> String {
    "Organization".to_string()
}

fn default_tenant_column() -> String {
    "OrganizationId".to_string()
}

/// Lookup tables shared across tenants whose keys must stay stable.
pub const DEFAULT_EXCLUDED_TABLES: &[&str] = &[
    "__EFMigrationsHistory",
    "Organization",
    "BillingBeneficiaryType",
    "BillingContractCategoryType",
    "BloodGroup",
    "DefaultDentalChart",
    "DentalChartReference",
    "DentalShadeGuide",
    "DrugDosageForm",
    "Gender",
    "Governorate",
    "PaymentType",
    "PaymentMethod",
    "PartnerType",
    "MedicationTiming",
    "ReferrableType",
    "TimeUnit",
    "VitalSign",
    "WHSLKPServiceClassification",
    "WHSLKPWarehouseTransactionType",
    "WHSLKPWarehouseType",
    "WHUnit",
    "SemanticSource",
    "sysdiagrams",
    "PhysicianDocumentType",
    "RADInvestigation",
    "MenuItem",
    "Occupation",
    "Medication",
    "LABInvestigation",
    "Finding",
    "Diagnose",
    "BookableType",
    "CanvasView",
    "AspNetRoles",
    "AssignmentController",
    "CashTransfer",
    "StatusList",
    "StatusListCategory",
    "ServiceGroupType",
    "Surgery",
    "Symptom",
];

fn default_excluded_tables() -> Vec<String> {
    DEFAULT_EXCLUDED_TABLES.iter().map(|t| t.to_string()).collect()
}
