use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

/// Local projection of a CRM lead, kept for code lookups and display.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LeadRow {
    pub lead_id: String,
    pub talk_id: Option<String>,
    pub contact_id: Option<String>,
    pub status_id: Option<i64>,
    pub pipeline_id: Option<i64>,
    pub source: Option<String>,
    pub extracted_code: Option<String>,
    /// Denormalized copy of the latest conversion ledger entry; not authoritative.
    pub conversion_snapshot: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Landing-page visit that handed a promotional code to a visitor.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TrackingVisitRow {
    pub code: String,
    pub fbp: Option<String>,
    pub fbc: Option<String>,
    pub client_ip_address: Option<String>,
    pub client_user_agent: Option<String>,
    pub event_source_url: Option<String>,
    pub created_at: DateTime<Utc>,
}
