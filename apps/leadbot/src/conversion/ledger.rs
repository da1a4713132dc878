//! Conversion Ledger: one entry per promotional code with a fixed pair of slots
//! (0 = conversation started, 1 = charged).
//!
//! Invariants:
//! - a slot whose result was a success is never overwritten;
//! - writing one slot never touches the other;
//! - `success` is the OR of all populated slot results.
//!
//! The Postgres writer expresses the merge as a single `INSERT .. ON CONFLICT`
//! with a positional `jsonb_set`, so concurrent writes to different slots of the
//! same code cannot lose each other. `merge_slot` is the same rule in Rust for
//! the in-memory test store; the Postgres tests check that both agree.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::dedup::{conversion_lock_key, is_duplicate_conversion, ConversionVerdict};
use crate::models::ledger::ConversionLedgerRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionKind {
    ConversationStarted,
    Charged,
}

impl ConversionKind {
    pub fn slot(self) -> usize {
        match self {
            ConversionKind::ConversationStarted => 0,
            ConversionKind::Charged => 1,
        }
    }
}

/// Outcome of one call to the ad-conversion API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotRecord {
    pub event_name: String,
    /// The event payload as sent.
    pub data: Value,
    pub result: ConversionResult,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionLedgerEntry {
    pub extracted_code: String,
    pub conversion_slots: [Option<SlotRecord>; 2],
    pub success: bool,
    pub lead_id: Option<String>,
    /// Time of the last write to any slot.
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl ConversionLedgerEntry {
    /// True when a slot carries `event_name` and the entry was written at or after `since`.
    pub fn has_recent_event(&self, event_name: &str, since: DateTime<Utc>) -> bool {
        self.timestamp >= since
            && self
                .conversion_slots
                .iter()
                .flatten()
                .any(|s| s.event_name == event_name)
    }
}

impl TryFrom<ConversionLedgerRow> for ConversionLedgerEntry {
    type Error = serde_json::Error;

    fn try_from(row: ConversionLedgerRow) -> Result<Self, Self::Error> {
        Ok(Self {
            extracted_code: row.extracted_code,
            conversion_slots: serde_json::from_value(row.conversion_slots)?,
            success: row.success,
            lead_id: row.lead_id,
            timestamp: row.updated_at,
            created_at: row.created_at,
        })
    }
}

/// Applies one slot write to an optional existing entry.
#[cfg(test)]
pub fn merge_slot(
    existing: Option<ConversionLedgerEntry>,
    code: &str,
    kind: ConversionKind,
    record: SlotRecord,
    lead_id: Option<&str>,
    now: DateTime<Utc>,
) -> ConversionLedgerEntry {
    let mut entry = existing.unwrap_or_else(|| ConversionLedgerEntry {
        extracted_code: code.to_string(),
        conversion_slots: [None, None],
        success: false,
        lead_id: None,
        timestamp: now,
        created_at: now,
    });

    let slot = &mut entry.conversion_slots[kind.slot()];
    let locked = slot.as_ref().is_some_and(|s| s.result.success);
    if !locked {
        *slot = Some(record);
    }

    entry.success = entry
        .conversion_slots
        .iter()
        .flatten()
        .any(|s| s.result.success);
    if let Some(lead_id) = lead_id {
        entry.lead_id = Some(lead_id.to_string());
    }
    entry.timestamp = now;
    entry
}

// ────────────────────────────────────────────────────────────────────────────
// Store
// ────────────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait ConversionStore: Send + Sync {
    /// Check C plus claim insert, atomic per `(code, event_name)`.
    async fn claim_send(
        &self,
        code: &str,
        event_name: &str,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ConversionVerdict, sqlx::Error>;

    async fn upsert_slot(
        &self,
        code: &str,
        kind: ConversionKind,
        record: &SlotRecord,
        lead_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ConversionLedgerEntry, sqlx::Error>;

    async fn find_entry(&self, code: &str) -> Result<Option<ConversionLedgerEntry>, sqlx::Error>;
}

pub struct PgConversionStore {
    pool: PgPool,
}

impl PgConversionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn decode(e: serde_json::Error) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(e))
}

const UPSERT_SLOT: &str = r#"
    INSERT INTO conversion_ledger
        (extracted_code, conversion_slots, success, lead_id, created_at, updated_at)
    VALUES ($1, $2, $3, $4, $5, $5)
    ON CONFLICT (extracted_code) DO UPDATE SET
        conversion_slots = CASE
            WHEN COALESCE((conversion_ledger.conversion_slots -> $6 -> 'result' ->> 'success')::boolean, false)
                THEN conversion_ledger.conversion_slots
            ELSE jsonb_set(conversion_ledger.conversion_slots, ARRAY[$7], $8)
        END,
        success = conversion_ledger.success OR EXCLUDED.success,
        lead_id = COALESCE(EXCLUDED.lead_id, conversion_ledger.lead_id),
        updated_at = EXCLUDED.updated_at
    RETURNING *
"#;

#[async_trait]
impl ConversionStore for PgConversionStore {
    async fn claim_send(
        &self,
        code: &str,
        event_name: &str,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ConversionVerdict, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(conversion_lock_key(code, event_name))
            .execute(&mut *tx)
            .await?;

        let entry = sqlx::query_as::<_, ConversionLedgerRow>(
            "SELECT * FROM conversion_ledger WHERE extracted_code = $1",
        )
        .bind(code)
        .fetch_optional(&mut *tx)
        .await?
        .map(ConversionLedgerEntry::try_from)
        .transpose()
        .map_err(decode)?;

        let claim_seen: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM conversion_claims
                WHERE extracted_code = $1 AND event_name = $2 AND claimed_at >= $3
            )
            "#,
        )
        .bind(code)
        .bind(event_name)
        .bind(since)
        .fetch_one(&mut *tx)
        .await?;

        if is_duplicate_conversion(entry.as_ref(), event_name, claim_seen, since) {
            tx.rollback().await?;
            return Ok(ConversionVerdict::Duplicate);
        }

        let claim_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO conversion_claims (id, extracted_code, event_name, claimed_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(claim_id)
        .bind(code)
        .bind(event_name)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ConversionVerdict::Proceed { claim_id })
    }

    async fn upsert_slot(
        &self,
        code: &str,
        kind: ConversionKind,
        record: &SlotRecord,
        lead_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ConversionLedgerEntry, sqlx::Error> {
        let slot_value = serde_json::to_value(record).map_err(decode)?;
        let mut initial = [Value::Null, Value::Null];
        initial[kind.slot()] = slot_value.clone();

        let row = sqlx::query_as::<_, ConversionLedgerRow>(UPSERT_SLOT)
            .bind(code)
            .bind(Value::Array(initial.to_vec()))
            .bind(record.result.success)
            .bind(lead_id)
            .bind(now)
            .bind(kind.slot() as i32)
            .bind(kind.slot().to_string())
            .bind(slot_value)
            .fetch_one(&self.pool)
            .await?;

        ConversionLedgerEntry::try_from(row).map_err(decode)
    }

    async fn find_entry(&self, code: &str) -> Result<Option<ConversionLedgerEntry>, sqlx::Error> {
        sqlx::query_as::<_, ConversionLedgerRow>(
            "SELECT * FROM conversion_ledger WHERE extracted_code = $1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?
        .map(ConversionLedgerEntry::try_from)
        .transpose()
        .map_err(decode)
    }
}
