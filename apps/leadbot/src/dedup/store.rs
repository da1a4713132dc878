use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::dedup::{reservation_skip, MessageKey, Reservation};
use crate::models::ledger::BotActionRow;

/// Audit record to append once a reserved message reaches a terminal state.
#[derive(Debug, Clone)]
pub struct NewBotAction {
    pub key: MessageKey,
    pub ai_decision: Value,
    pub status_update_result: Value,
    pub processing_timestamp: DateTime<Utc>,
}

/// Append-only ledgers of processing attempts and bot actions.
///
/// Nothing here ever updates or deletes a row.
#[async_trait]
pub trait MessageLedger: Send + Sync {
    async fn attempt_exists_since(
        &self,
        key: &MessageKey,
        since: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error>;

    /// Evaluates Check A (`attempts_since`) and Check B (`actions_since`) and,
    /// when both pass, inserts a processing attempt. Must be atomic with respect
    /// to other reservations of the same key.
    async fn reserve_attempt(
        &self,
        key: &MessageKey,
        attempts_since: DateTime<Utc>,
        actions_since: DateTime<Utc>,
        now: DateTime<Utc>,
        window_minutes: i64,
    ) -> Result<Reservation, sqlx::Error>;

    async fn record_bot_action(&self, action: &NewBotAction) -> Result<Uuid, sqlx::Error>;

    async fn list_bot_actions(
        &self,
        lead_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<BotActionRow>, sqlx::Error>;
}

pub struct PgMessageLedger {
    pool: PgPool,
}

impl PgMessageLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const ATTEMPT_EXISTS: &str = r#"
    SELECT EXISTS (
        SELECT 1 FROM processing_attempts
        WHERE talk_id = $1 AND lead_id = $2 AND contact_id = $3
          AND message_hash = $4 AND message_text = $5 AND created_at >= $6
    )
"#;

const BOT_ACTION_EXISTS: &str = r#"
    SELECT EXISTS (
        SELECT 1 FROM bot_actions
        WHERE talk_id = $1 AND lead_id = $2 AND contact_id = $3
          AND message_hash = $4 AND message_text = $5 AND created_at >= $6
    )
"#;

#[async_trait]
impl MessageLedger for PgMessageLedger {
    async fn attempt_exists_since(
        &self,
        key: &MessageKey,
        since: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(ATTEMPT_EXISTS)
            .bind(&key.talk_id)
            .bind(&key.lead_id)
            .bind(&key.contact_id)
            .bind(key.message_hash())
            .bind(&key.message_text)
            .bind(since)
            .fetch_one(&self.pool)
            .await
    }

    async fn reserve_attempt(
        &self,
        key: &MessageKey,
        attempts_since: DateTime<Utc>,
        actions_since: DateTime<Utc>,
        now: DateTime<Utc>,
        window_minutes: i64,
    ) -> Result<Reservation, sqlx::Error> {
        let hash = key.message_hash();
        let mut tx = self.pool.begin().await?;

        // Serializes reservations of this key across every instance until commit.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(key.lock_key())
            .execute(&mut *tx)
            .await?;

        let attempt_seen: bool = sqlx::query_scalar(ATTEMPT_EXISTS)
            .bind(&key.talk_id)
            .bind(&key.lead_id)
            .bind(&key.contact_id)
            .bind(&hash)
            .bind(&key.message_text)
            .bind(attempts_since)
            .fetch_one(&mut *tx)
            .await?;

        let action_seen: bool = if attempt_seen {
            false
        } else {
            sqlx::query_scalar(BOT_ACTION_EXISTS)
                .bind(&key.talk_id)
                .bind(&key.lead_id)
                .bind(&key.contact_id)
                .bind(&hash)
                .bind(&key.message_text)
                .bind(actions_since)
                .fetch_one(&mut *tx)
                .await?
        };

        if let Some(reason) = reservation_skip(attempt_seen, action_seen, window_minutes) {
            tx.rollback().await?;
            return Ok(Reservation::Skipped(reason));
        }

        let attempt_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO processing_attempts
                (id, talk_id, lead_id, contact_id, message_text, message_hash, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(attempt_id)
        .bind(&key.talk_id)
        .bind(&key.lead_id)
        .bind(&key.contact_id)
        .bind(&key.message_text)
        .bind(&hash)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Reservation::Reserved { attempt_id })
    }

    async fn record_bot_action(&self, action: &NewBotAction) -> Result<Uuid, sqlx::Error> {
        let id = Uuid::new_v4();
        let key = &action.key;
        sqlx::query(
            r#"
            INSERT INTO bot_actions
                (id, talk_id, lead_id, contact_id, message_text, message_hash,
                 ai_decision, status_update_result, processing_timestamp, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
            "#,
        )
        .bind(id)
        .bind(&key.talk_id)
        .bind(&key.lead_id)
        .bind(&key.contact_id)
        .bind(&key.message_text)
        .bind(key.message_hash())
        .bind(&action.ai_decision)
        .bind(&action.status_update_result)
        .bind(action.processing_timestamp)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn list_bot_actions(
        &self,
        lead_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<BotActionRow>, sqlx::Error> {
        sqlx::query_as::<_, BotActionRow>(
            r#"
            SELECT * FROM bot_actions
            WHERE ($1::text IS NULL OR lead_id = $1)
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(lead_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }
}
