//! Local lead projection and landing-page visits.
//!
//! The CRM stays the source of truth for leads; this table only remembers what
//! the relay learned from webhooks (talk/contact links, status, extracted code)
//! plus a display snapshot of the conversion ledger.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;

use crate::models::lead::{LeadRow, TrackingVisitRow};

/// Fields learned about a lead from one event; `None` leaves the stored value as is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeadUpsert {
    pub lead_id: String,
    pub talk_id: Option<String>,
    pub contact_id: Option<String>,
    pub status_id: Option<i64>,
    pub pipeline_id: Option<i64>,
    pub source: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewVisit {
    pub code: String,
    pub fbp: Option<String>,
    pub fbc: Option<String>,
    pub client_ip_address: Option<String>,
    pub client_user_agent: Option<String>,
    pub event_source_url: Option<String>,
}

#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn upsert_lead(&self, lead: &LeadUpsert, now: DateTime<Utc>) -> Result<(), sqlx::Error>;

    async fn record_code(&self, lead_id: &str, code: &str, now: DateTime<Utc>)
        -> Result<(), sqlx::Error>;

    async fn find_lead(&self, lead_id: &str) -> Result<Option<LeadRow>, sqlx::Error>;

    async fn set_conversion_snapshot(
        &self,
        lead_id: &str,
        snapshot: &Value,
        now: DateTime<Utc>,
    ) -> Result<(), sqlx::Error>;

    async fn record_visit(&self, visit: &NewVisit, now: DateTime<Utc>) -> Result<(), sqlx::Error>;

    async fn find_visit(&self, code: &str) -> Result<Option<TrackingVisitRow>, sqlx::Error>;
}

pub struct PgLeadStore {
    pool: PgPool,
}

impl PgLeadStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LeadStore for PgLeadStore {
    async fn upsert_lead(&self, lead: &LeadUpsert, now: DateTime<Utc>) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO leads
                (lead_id, talk_id, contact_id, status_id, pipeline_id, source, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            ON CONFLICT (lead_id) DO UPDATE SET
                talk_id     = COALESCE(EXCLUDED.talk_id, leads.talk_id),
                contact_id  = COALESCE(EXCLUDED.contact_id, leads.contact_id),
                status_id   = COALESCE(EXCLUDED.status_id, leads.status_id),
                pipeline_id = COALESCE(EXCLUDED.pipeline_id, leads.pipeline_id),
                source      = COALESCE(leads.source, EXCLUDED.source),
                updated_at  = EXCLUDED.updated_at
            "#,
        )
        .bind(&lead.lead_id)
        .bind(&lead.talk_id)
        .bind(&lead.contact_id)
        .bind(lead.status_id)
        .bind(lead.pipeline_id)
        .bind(&lead.source)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_code(
        &self,
        lead_id: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO leads (lead_id, extracted_code, created_at, updated_at)
            VALUES ($1, $2, $3, $3)
            ON CONFLICT (lead_id) DO UPDATE SET
                extracted_code = EXCLUDED.extracted_code,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(lead_id)
        .bind(code)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_lead(&self, lead_id: &str) -> Result<Option<LeadRow>, sqlx::Error> {
        sqlx::query_as::<_, LeadRow>("SELECT * FROM leads WHERE lead_id = $1")
            .bind(lead_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn set_conversion_snapshot(
        &self,
        lead_id: &str,
        snapshot: &Value,
        now: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE leads SET conversion_snapshot = $2, updated_at = $3 WHERE lead_id = $1",
        )
        .bind(lead_id)
        .bind(snapshot)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_visit(&self, visit: &NewVisit, now: DateTime<Utc>) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO tracking_visits
                (code, fbp, fbc, client_ip_address, client_user_agent, event_source_url, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (code) DO UPDATE SET
                fbp               = COALESCE(EXCLUDED.fbp, tracking_visits.fbp),
                fbc               = COALESCE(EXCLUDED.fbc, tracking_visits.fbc),
                client_ip_address = COALESCE(EXCLUDED.client_ip_address, tracking_visits.client_ip_address),
                client_user_agent = COALESCE(EXCLUDED.client_user_agent, tracking_visits.client_user_agent),
                event_source_url  = COALESCE(EXCLUDED.event_source_url, tracking_visits.event_source_url)
            "#,
        )
        .bind(&visit.code)
        .bind(&visit.fbp)
        .bind(&visit.fbc)
        .bind(&visit.client_ip_address)
        .bind(&visit.client_user_agent)
        .bind(&visit.event_source_url)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_visit(&self, code: &str) -> Result<Option<TrackingVisitRow>, sqlx::Error> {
        sqlx::query_as::<_, TrackingVisitRow>("SELECT * FROM tracking_visits WHERE code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await
    }
}
