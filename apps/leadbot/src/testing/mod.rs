// Test doubles: an in-memory store for all three ledgers plus mock
// collaborators that record their calls.

pub mod postgres;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::conversion::client::{ConversionApi, ConversionApiError, ConversionEvent};
use crate::conversion::ledger::{
    merge_slot, ConversionKind, ConversionLedgerEntry, ConversionStore, SlotRecord,
};
use crate::crm::{CrmClient, CrmError, CrmLead};
use crate::decision::{AiDecision, DecisionError, DecisionRequest, DecisionService};
use crate::dedup::{
    is_duplicate_conversion, reservation_skip, ConversionVerdict, MessageKey, MessageLedger,
    NewBotAction, Reservation,
};
use crate::leads::{LeadStore, LeadUpsert, NewVisit};
use crate::models::lead::{LeadRow, TrackingVisitRow};
use crate::models::ledger::BotActionRow;

// =============================================================================
// In-memory store
// =============================================================================

#[derive(Default)]
struct Inner {
    attempts: Vec<(MessageKey, DateTime<Utc>)>,
    bot_actions: Vec<BotActionRow>,
    fail_bot_actions: bool,
    claims: Vec<(String, String, DateTime<Utc>)>,
    ledger: HashMap<String, ConversionLedgerEntry>,
    leads: HashMap<String, LeadRow>,
    visits: HashMap<String, TrackingVisitRow>,
}

/// Every operation holds one async lock for its whole body, which gives the
/// same atomicity the Postgres stores get from advisory locks.
#[derive(Default)]
pub struct MemoryStore {
    inner: tokio::sync::Mutex<Inner>,
}

fn bot_action_row(key: &MessageKey, ai_decision: Value, result: Value, ts: DateTime<Utc>) -> BotActionRow {
    BotActionRow {
        id: Uuid::new_v4(),
        talk_id: key.talk_id.clone(),
        lead_id: key.lead_id.clone(),
        contact_id: key.contact_id.clone(),
        message_text: key.message_text.clone(),
        message_hash: key.message_hash(),
        ai_decision,
        status_update_result: result,
        processing_timestamp: ts,
        created_at: ts,
    }
}

impl MemoryStore {
    pub async fn attempt_count(&self) -> usize {
        self.inner.lock().await.attempts.len()
    }

    pub async fn bot_action_count(&self) -> usize {
        self.inner.lock().await.bot_actions.len()
    }

    pub async fn push_bot_action(&self, key: &MessageKey, ts: DateTime<Utc>) {
        let row = bot_action_row(key, json!({}), json!({ "success": true }), ts);
        self.inner.lock().await.bot_actions.push(row);
    }

    pub async fn fail_bot_action_writes(&self) {
        self.inner.lock().await.fail_bot_actions = true;
    }
}

#[async_trait]
impl MessageLedger for MemoryStore {
    async fn attempt_exists_since(
        &self,
        key: &MessageKey,
        since: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let inner = self.inner.lock().await;
        Ok(inner.attempts.iter().any(|(k, ts)| k == key && *ts >= since))
    }

    async fn reserve_attempt(
        &self,
        key: &MessageKey,
        attempts_since: DateTime<Utc>,
        actions_since: DateTime<Utc>,
        now: DateTime<Utc>,
        window_minutes: i64,
    ) -> Result<Reservation, sqlx::Error> {
        let mut inner = self.inner.lock().await;
        let attempt_seen = inner
            .attempts
            .iter()
            .any(|(k, ts)| k == key && *ts >= attempts_since);
        let action_seen = inner.bot_actions.iter().any(|a| {
            a.talk_id == key.talk_id
                && a.lead_id == key.lead_id
                && a.contact_id == key.contact_id
                && a.message_text == key.message_text
                && a.created_at >= actions_since
        });
        if let Some(reason) = reservation_skip(attempt_seen, action_seen, window_minutes) {
            return Ok(Reservation::Skipped(reason));
        }
        inner.attempts.push((key.clone(), now));
        Ok(Reservation::Reserved {
            attempt_id: Uuid::new_v4(),
        })
    }

    async fn record_bot_action(&self, action: &NewBotAction) -> Result<Uuid, sqlx::Error> {
        let mut inner = self.inner.lock().await;
        if inner.fail_bot_actions {
            return Err(sqlx::Error::PoolTimedOut);
        }
        let row = bot_action_row(
            &action.key,
            action.ai_decision.clone(),
            action.status_update_result.clone(),
            action.processing_timestamp,
        );
        let id = row.id;
        inner.bot_actions.push(row);
        Ok(id)
    }

    async fn list_bot_actions(
        &self,
        lead_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<BotActionRow>, sqlx::Error> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<BotActionRow> = inner
            .bot_actions
            .iter()
            .filter(|a| lead_id.map_or(true, |id| a.lead_id == id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(rows)
    }
}

#[async_trait]
impl ConversionStore for MemoryStore {
    async fn claim_send(
        &self,
        code: &str,
        event_name: &str,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ConversionVerdict, sqlx::Error> {
        let mut inner = self.inner.lock().await;
        let claim_seen = inner
            .claims
            .iter()
            .any(|(c, e, ts)| c == code && e == event_name && *ts >= since);
        if is_duplicate_conversion(inner.ledger.get(code), event_name, claim_seen, since) {
            return Ok(ConversionVerdict::Duplicate);
        }
        inner
            .claims
            .push((code.to_string(), event_name.to_string(), now));
        Ok(ConversionVerdict::Proceed {
            claim_id: Uuid::new_v4(),
        })
    }

    async fn upsert_slot(
        &self,
        code: &str,
        kind: ConversionKind,
        record: &SlotRecord,
        lead_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ConversionLedgerEntry, sqlx::Error> {
        let mut inner = self.inner.lock().await;
        let existing = inner.ledger.remove(code);
        let entry = merge_slot(existing, code, kind, record.clone(), lead_id, now);
        inner.ledger.insert(code.to_string(), entry.clone());
        Ok(entry)
    }

    async fn find_entry(&self, code: &str) -> Result<Option<ConversionLedgerEntry>, sqlx::Error> {
        Ok(self.inner.lock().await.ledger.get(code).cloned())
    }
}

fn empty_lead(lead_id: &str, now: DateTime<Utc>) -> LeadRow {
    LeadRow {
        lead_id: lead_id.to_string(),
        talk_id: None,
        contact_id: None,
        status_id: None,
        pipeline_id: None,
        source: None,
        extracted_code: None,
        conversion_snapshot: None,
        created_at: now,
        updated_at: now,
    }
}

#[async_trait]
impl LeadStore for MemoryStore {
    async fn upsert_lead(&self, lead: &LeadUpsert, now: DateTime<Utc>) -> Result<(), sqlx::Error> {
        let mut inner = self.inner.lock().await;
        let row = inner
            .leads
            .entry(lead.lead_id.clone())
            .or_insert_with(|| empty_lead(&lead.lead_id, now));
        row.talk_id = lead.talk_id.clone().or(row.talk_id.take());
        row.contact_id = lead.contact_id.clone().or(row.contact_id.take());
        row.status_id = lead.status_id.or(row.status_id);
        row.pipeline_id = lead.pipeline_id.or(row.pipeline_id);
        row.source = row.source.take().or(lead.source.clone());
        row.updated_at = now;
        Ok(())
    }

    async fn record_code(
        &self,
        lead_id: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        let mut inner = self.inner.lock().await;
        let row = inner
            .leads
            .entry(lead_id.to_string())
            .or_insert_with(|| empty_lead(lead_id, now));
        row.extracted_code = Some(code.to_string());
        row.updated_at = now;
        Ok(())
    }

    async fn find_lead(&self, lead_id: &str) -> Result<Option<LeadRow>, sqlx::Error> {
        Ok(self.inner.lock().await.leads.get(lead_id).cloned())
    }

    async fn set_conversion_snapshot(
        &self,
        lead_id: &str,
        snapshot: &Value,
        now: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        if let Some(row) = self.inner.lock().await.leads.get_mut(lead_id) {
            row.conversion_snapshot = Some(snapshot.clone());
            row.updated_at = now;
        }
        Ok(())
    }

    async fn record_visit(&self, visit: &NewVisit, now: DateTime<Utc>) -> Result<(), sqlx::Error> {
        let mut inner = self.inner.lock().await;
        let row = inner
            .visits
            .entry(visit.code.clone())
            .or_insert_with(|| TrackingVisitRow {
                code: visit.code.clone(),
                fbp: None,
                fbc: None,
                client_ip_address: None,
                client_user_agent: None,
                event_source_url: None,
                created_at: now,
            });
        row.fbp = visit.fbp.clone().or(row.fbp.take());
        row.fbc = visit.fbc.clone().or(row.fbc.take());
        row.client_ip_address = visit.client_ip_address.clone().or(row.client_ip_address.take());
        row.client_user_agent = visit.client_user_agent.clone().or(row.client_user_agent.take());
        row.event_source_url = visit.event_source_url.clone().or(row.event_source_url.take());
        Ok(())
    }

    async fn find_visit(&self, code: &str) -> Result<Option<TrackingVisitRow>, sqlx::Error> {
        Ok(self.inner.lock().await.visits.get(code).cloned())
    }
}

// =============================================================================
// Mock ad-conversion API
// =============================================================================

#[derive(Default)]
pub struct MockConversionApi {
    failure: Option<String>,
    sent: Arc<Mutex<Vec<ConversionEvent>>>,
}

impl MockConversionApi {
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Default::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn sent(&self) -> Vec<ConversionEvent> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConversionApi for MockConversionApi {
    async fn send(&self, event: &ConversionEvent) -> Result<Value, ConversionApiError> {
        self.sent.lock().unwrap().push(event.clone());
        match &self.failure {
            Some(message) => Err(ConversionApiError::Api {
                status: 400,
                message: message.clone(),
            }),
            None => Ok(json!({ "events_received": 1 })),
        }
    }
}

// =============================================================================
// Mock decision service
// =============================================================================

pub struct MockDecisionService {
    response: Result<AiDecision, String>,
    delay: Option<Duration>,
    calls: Arc<Mutex<Vec<DecisionRequest>>>,
}

impl MockDecisionService {
    pub fn returning(decision: AiDecision) -> Self {
        Self {
            response: Ok(decision),
            delay: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            response: Err(message.to_string()),
            delay: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl DecisionService for MockDecisionService {
    async fn decide(&self, request: &DecisionRequest) -> Result<AiDecision, DecisionError> {
        self.calls.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.response.clone().map_err(DecisionError::Service)
    }
}

// =============================================================================
// Mock CRM
// =============================================================================

pub struct MockCrm {
    status_id: i64,
    lookup_fails: bool,
    update_failure: Option<String>,
    status_updates: Arc<Mutex<Vec<(String, i64)>>>,
    custom_fields: Arc<Mutex<Vec<(String, i64, String)>>>,
}

impl MockCrm {
    pub fn with_status(status_id: i64) -> Self {
        Self {
            status_id,
            lookup_fails: false,
            update_failure: None,
            status_updates: Arc::new(Mutex::new(Vec::new())),
            custom_fields: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing_lookups(mut self) -> Self {
        self.lookup_fails = true;
        self
    }

    pub fn failing_updates(mut self, message: &str) -> Self {
        self.update_failure = Some(message.to_string());
        self
    }

    /// Successful status updates, in call order.
    pub fn status_updates(&self) -> Vec<(String, i64)> {
        self.status_updates.lock().unwrap().clone()
    }

    pub fn custom_field_updates(&self) -> Vec<(String, i64, String)> {
        self.custom_fields.lock().unwrap().clone()
    }
}

#[async_trait]
impl CrmClient for MockCrm {
    async fn get_lead(&self, lead_id: &str) -> Result<CrmLead, CrmError> {
        if self.lookup_fails {
            return Err(CrmError::Api {
                status: 503,
                message: "service unavailable".to_string(),
            });
        }
        Ok(CrmLead {
            id: lead_id.parse().unwrap_or_default(),
            name: None,
            status_id: self.status_id,
            pipeline_id: Some(7),
        })
    }

    async fn update_lead_status(&self, lead_id: &str, status_id: i64) -> Result<(), CrmError> {
        if let Some(message) = &self.update_failure {
            return Err(CrmError::Api {
                status: 400,
                message: message.clone(),
            });
        }
        self.status_updates
            .lock()
            .unwrap()
            .push((lead_id.to_string(), status_id));
        Ok(())
    }

    async fn update_custom_field(
        &self,
        lead_id: &str,
        field_id: i64,
        value: &str,
    ) -> Result<(), CrmError> {
        self.custom_fields
            .lock()
            .unwrap()
            .push((lead_id.to_string(), field_id, value.to_string()));
        Ok(())
    }
}
