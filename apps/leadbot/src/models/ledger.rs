use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct BotActionRow {
    pub id: Uuid,
    pub talk_id: String,
    pub lead_id: String,
    pub contact_id: String,
    pub message_text: String,
    pub message_hash: String,
    pub ai_decision: Value,
    pub status_update_result: Value,
    pub processing_timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ConversionLedgerRow {
    pub extracted_code: String,
    pub conversion_slots: Value,
    pub success: bool,
    pub lead_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
