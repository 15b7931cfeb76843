use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Enums ---

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, sqlx::Type, utoipa::ToSchema)]
#[sqlx(type_name = "protection_level", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProtectionLevel {
    Critical,  // never terminated through the dashboard
    Standard,
    Ephemeral, // eligible for budget-driven termination
}

impl Default for ProtectionLevel {
    fn default() -> Self {
        ProtectionLevel::Standard
    }
}

// --- Entities (SQLx Mapped) ---

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow, utoipa::ToSchema)]
pub struct ProviderConfig {
    pub id: String, // e.g. "oci-main"
    pub provider_type: String,
    pub display_name: String,
    pub region: String,
    #[serde(skip_serializing)]
    pub credentials_path: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow, utoipa::ToSchema)]
pub struct CloudResource {
    pub id: Uuid,
    pub provider_id: String,
    pub resource_type: String, // vm, boot_volume, block_volume, ...
    pub external_id: String,
    pub display_name: String,
    pub name_prefix: String,
    pub status: String,
    #[schema(value_type = Object)]
    pub tags: serde_json::Value,
    pub protection_level: ProtectionLevel,
    pub auto_terminate: bool,
    pub monthly_cost_estimate: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow, utoipa::ToSchema)]
pub struct BudgetRule {
    pub id: Uuid,
    /// None means the rule covers all providers.
    pub provider_id: Option<String>,
    pub monthly_limit: f64,
    pub alert_threshold: f64,
    pub action_on_exceed: String, // alert, scale_down, terminate_ephemeral
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow, utoipa::ToSchema)]
pub struct SpendingRecord {
    pub id: Uuid,
    pub provider_id: String,
    pub period: String, // YYYY-MM
    pub amount: f64,
    pub currency: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow, utoipa::ToSchema)]
pub struct ActionLog {
    pub id: Uuid,
    pub resource_id: Option<Uuid>,
    pub action_type: String,
    pub status: String,       // pending, running, success, failed
    #[schema(value_type = Object)]
    pub details: serde_json::Value,
    pub initiated_by: String, // user, budget_monitor, sync
    pub created_at: DateTime<Utc>,
}
