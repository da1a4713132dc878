//! Conversion sends: Check C → ad-platform POST → ledger write → lead snapshot.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::conversion::client::{ConversionApi, ConversionEvent, UserData};
use crate::conversion::ledger::{
    ConversionKind, ConversionLedgerEntry, ConversionResult, ConversionStore, SlotRecord,
};
use crate::dedup::{ConversionVerdict, DedupEngine};
use crate::leads::LeadStore;

/// Error sentinel for a suppressed duplicate. An expected outcome, not a failure.
pub const DUPLICATE_CONVERSION: &str = "DUPLICATE_CONVERSION";

/// Ad-platform event names per slot.
#[derive(Debug, Clone)]
pub struct ConversionEvents {
    pub started: String,
    pub charged: String,
}

impl ConversionEvents {
    pub fn name(&self, kind: ConversionKind) -> &str {
        match kind {
            ConversionKind::ConversationStarted => &self.started,
            ConversionKind::Charged => &self.charged,
        }
    }

    pub fn kind_of(&self, event_name: &str) -> Option<ConversionKind> {
        if event_name == self.started {
            Some(ConversionKind::ConversationStarted)
        } else if event_name == self.charged {
            Some(ConversionKind::Charged)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConversionRequest {
    pub code: String,
    pub lead_id: Option<String>,
    /// Overrides the user data stored with the code's tracking visit.
    pub user_data: Option<UserData>,
    pub event_source_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionOutcome {
    pub code: String,
    pub event_name: String,
    pub success: bool,
    pub duplicate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<ConversionLedgerEntry>,
}

#[derive(Clone)]
pub struct ConversionService {
    engine: DedupEngine,
    store: Arc<dyn ConversionStore>,
    leads: Arc<dyn LeadStore>,
    api: Arc<dyn ConversionApi>,
    events: ConversionEvents,
    default_event_source_url: String,
}

impl ConversionService {
    pub fn new(
        engine: DedupEngine,
        store: Arc<dyn ConversionStore>,
        leads: Arc<dyn LeadStore>,
        api: Arc<dyn ConversionApi>,
        events: ConversionEvents,
        default_event_source_url: String,
    ) -> Self {
        Self {
            engine,
            store,
            leads,
            api,
            events,
            default_event_source_url,
        }
    }

    pub fn events(&self) -> &ConversionEvents {
        &self.events
    }

    pub async fn find_entry(&self, code: &str) -> Result<Option<ConversionLedgerEntry>, sqlx::Error> {
        self.store.find_entry(code).await
    }

    /// Sends the `kind` conversion for `request.code` at most once per window.
    ///
    /// Datastore errors propagate. Ad-platform failures are recorded in the
    /// ledger and returned as `success: false`.
    pub async fn send(
        &self,
        kind: ConversionKind,
        request: ConversionRequest,
        now: DateTime<Utc>,
    ) -> Result<ConversionOutcome, sqlx::Error> {
        let code = request.code.as_str();
        let event_name = self.events.name(kind).to_string();

        if self.engine.claim_conversion(code, kind, &event_name, now).await?
            == ConversionVerdict::Duplicate
        {
            return Ok(ConversionOutcome {
                code: code.to_string(),
                event_name,
                success: false,
                duplicate: true,
                error: Some(DUPLICATE_CONVERSION.to_string()),
                entry: None,
            });
        }

        let visit = self.leads.find_visit(code).await?;
        let user_data = request.user_data.unwrap_or_else(|| UserData {
            client_ip_address: visit.as_ref().and_then(|v| v.client_ip_address.clone()),
            client_user_agent: visit.as_ref().and_then(|v| v.client_user_agent.clone()),
            fbp: visit.as_ref().and_then(|v| v.fbp.clone()),
            fbc: visit.as_ref().and_then(|v| v.fbc.clone()),
        });
        let event_source_url = request
            .event_source_url
            .or_else(|| visit.and_then(|v| v.event_source_url))
            .unwrap_or_else(|| self.default_event_source_url.clone());

        let event = ConversionEvent::website(&event_name, now.timestamp(), &event_source_url, user_data);

        let result = match self.api.send(&event).await {
            Ok(body) => {
                info!(code, event_name = %event_name, "Conversion sent");
                ConversionResult {
                    success: true,
                    data: Some(body),
                    error: None,
                }
            }
            Err(e) => {
                warn!(code, event_name = %event_name, error = %e, "Conversion send failed");
                ConversionResult {
                    success: false,
                    data: None,
                    error: Some(e.to_string()),
                }
            }
        };

        let record = SlotRecord {
            event_name: event_name.clone(),
            data: serde_json::to_value(&event).unwrap_or_default(),
            result: result.clone(),
            timestamp: now,
        };
        let entry = self
            .store
            .upsert_slot(code, kind, &record, request.lead_id.as_deref(), now)
            .await?;

        if let Some(lead_id) = request.lead_id.as_deref() {
            self.refresh_lead_snapshot(lead_id, &entry, now).await;
        }

        Ok(ConversionOutcome {
            code: code.to_string(),
            event_name,
            success: result.success,
            duplicate: false,
            error: result.error,
            entry: Some(entry),
        })
    }

    /// Display copy only; the ledger write already succeeded.
    async fn refresh_lead_snapshot(&self, lead_id: &str, entry: &ConversionLedgerEntry, now: DateTime<Utc>) {
        let snapshot = match serde_json::to_value(entry) {
            Ok(v) => v,
            Err(e) => {
                warn!(lead_id, error = %e, "Failed to serialize conversion snapshot");
                return;
            }
        };
        if let Err(e) = self.leads.set_conversion_snapshot(lead_id, &snapshot, now).await {
            warn!(lead_id, error = %e, "Failed to update lead conversion snapshot");
        }
    }
}
