//! Per-event processing.
//!
//! Message events run: Check A → lead bookkeeping → code extraction →
//! conversation-started conversion (Check C inside) → CRM lead lookup →
//! reservation (A+B, atomic) → AI decision → status transition + audit.
//!
//! Datastore errors propagate (500). External failures become outcomes.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::conversion::code_extractor::{self, CodeSource, ExtractedCode, FallbackPolicy};
use crate::conversion::ledger::ConversionKind;
use crate::conversion::service::{ConversionOutcome, ConversionRequest, ConversionService};
use crate::crm::CrmClient;
use crate::decision::{decide_safely, AiDecision, ContactContext, DecisionRequest, DecisionService};
use crate::dedup::{DedupEngine, MessageKey, MessageVerdict, Reservation};
use crate::leads::{LeadStore, LeadUpsert};
use crate::processing::orchestrator::{StatusOrchestrator, TransitionState};
use crate::webhook::models::{
    CrmEvent, InboundMessage, LeadAction, LeadEvent, MessageDirection, TalkEvent, UnsortedEvent,
};

#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub code_field_id: Option<i64>,
    pub code_fallback: FallbackPolicy,
    pub ai_timeout: Duration,
    /// Extra business rules passed verbatim to the decision service.
    pub rules: Option<String>,
}

/// Result of handling one canonical event. Serialized into the webhook response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventOutcome {
    pub kind: &'static str,
    pub success: bool,
    /// True when the event produced an AI decision or a bookkeeping write.
    pub processed: bool,
    pub duplicate: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<AiDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<TransitionState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversion: Option<ConversionOutcome>,
}

impl EventOutcome {
    fn new(kind: &'static str, lead_id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            kind,
            success: true,
            processed: false,
            duplicate: false,
            message: message.into(),
            lead_id: lead_id.map(String::from),
            decision: None,
            state: None,
            conversion: None,
        }
    }

    fn processed(mut self) -> Self {
        self.processed = true;
        self
    }

    fn duplicate(mut self) -> Self {
        self.duplicate = true;
        self
    }

    fn failed(mut self) -> Self {
        self.success = false;
        self
    }
}

#[derive(Clone)]
pub struct Processor {
    engine: DedupEngine,
    leads: Arc<dyn LeadStore>,
    conversions: ConversionService,
    crm: Arc<dyn CrmClient>,
    decisions: Arc<dyn DecisionService>,
    orchestrator: StatusOrchestrator,
    settings: ProcessorSettings,
}

impl Processor {
    pub fn new(
        engine: DedupEngine,
        leads: Arc<dyn LeadStore>,
        conversions: ConversionService,
        crm: Arc<dyn CrmClient>,
        decisions: Arc<dyn DecisionService>,
        orchestrator: StatusOrchestrator,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            engine,
            leads,
            conversions,
            crm,
            decisions,
            orchestrator,
            settings,
        }
    }

    pub async fn handle_event(
        &self,
        event: &CrmEvent,
        now: DateTime<Utc>,
    ) -> Result<EventOutcome, sqlx::Error> {
        match event {
            CrmEvent::Message(message) => self.handle_message(message, now).await,
            CrmEvent::Lead(lead) => self.handle_lead(lead, now).await,
            CrmEvent::Talk(talk) => self.handle_talk(talk, now).await,
            CrmEvent::Unsorted(unsorted) => self.handle_unsorted(unsorted, now).await,
            CrmEvent::Unsupported { kind, action } => {
                info!(%kind, %action, "Ignoring unsupported webhook event");
                Ok(EventOutcome::new(
                    "unsupported",
                    None,
                    format!("unsupported event {kind}[{action}]"),
                ))
            }
            CrmEvent::Ignored { record, reason } => {
                info!(%record, %reason, "Ignoring webhook record");
                Ok(EventOutcome::new(event.kind(), None, reason.clone()))
            }
        }
    }

    // ────────────────────────────────────────────────────────────────────────
    // Messages
    // ────────────────────────────────────────────────────────────────────────

    async fn handle_message(
        &self,
        message: &InboundMessage,
        now: DateTime<Utc>,
    ) -> Result<EventOutcome, sqlx::Error> {
        let lead_id = message.lead_id.as_str();
        let outcome = |text: &str| EventOutcome::new("message", Some(lead_id), text);

        if message.direction == MessageDirection::Outgoing {
            return Ok(outcome("outgoing message ignored"));
        }
        if message.text.trim().is_empty() {
            return Ok(outcome("empty message ignored"));
        }

        let key = MessageKey::from_message(message);
        if let MessageVerdict::Skip(reason) = self.engine.check_message(&key, now).await? {
            info!(talk_id = %key.talk_id, lead_id, %reason, "Skipping message");
            return Ok(outcome(&reason.to_string()).duplicate());
        }

        self.leads
            .upsert_lead(
                &LeadUpsert {
                    lead_id: lead_id.to_string(),
                    talk_id: Some(message.talk_id.clone()),
                    contact_id: Some(message.contact_id.clone()),
                    ..Default::default()
                },
                now,
            )
            .await?;

        let code = self.admitted_code(&message.text).await?;
        let conversion = match &code {
            Some(code) => Some(self.on_code_found(lead_id, code, now).await?),
            None => None,
        };

        let lead = match self.crm.get_lead(lead_id).await {
            Ok(lead) => lead,
            Err(e) => {
                warn!(lead_id, error = %e, "CRM lead lookup failed");
                let mut out = outcome(&format!("CRM lead lookup failed: {e}")).failed();
                out.conversion = conversion;
                return Ok(out);
            }
        };
        self.leads
            .upsert_lead(
                &LeadUpsert {
                    lead_id: lead_id.to_string(),
                    status_id: Some(lead.status_id),
                    pipeline_id: lead.pipeline_id,
                    ..Default::default()
                },
                now,
            )
            .await?;

        if let Reservation::Skipped(reason) = self.engine.reserve_processing(&key, now).await? {
            let mut out = outcome(&reason.to_string()).duplicate();
            out.conversion = conversion;
            return Ok(out);
        }

        let statuses = self.orchestrator.statuses();
        let request = DecisionRequest {
            message_text: message.text.clone(),
            current_status: statuses.label(lead.status_id),
            talk_id: message.talk_id.clone(),
            contact_context: Some(ContactContext {
                lead_id: lead_id.to_string(),
                contact_id: message.contact_id.clone(),
                author: message.author.clone(),
                extracted_code: code,
            }),
            rules: self.settings.rules.clone(),
            statuses: statuses.automated_statuses(),
            attachment: message.attachment.clone(),
        };
        let decision = decide_safely(self.decisions.as_ref(), &request, self.settings.ai_timeout).await;
        let transition = self.orchestrator.apply(&key, &decision, now).await;

        let mut out = outcome(match transition.state {
            TransitionState::StatusUpdated => "status updated",
            TransitionState::StatusUpdateFailed => "status update failed",
            TransitionState::NoChangeNeeded => "no change needed",
        })
        .processed();
        out.success = transition.status_update_result.success;
        out.decision = Some(decision);
        out.state = Some(transition.state);
        out.conversion = conversion;
        Ok(out)
    }

    /// Extracts a code and applies the fallback policy to unlabeled matches.
    async fn admitted_code(&self, text: &str) -> Result<Option<String>, sqlx::Error> {
        let Some(ExtractedCode { code, source }) = code_extractor::extract_code(text) else {
            return Ok(None);
        };
        let admitted = match (source, self.settings.code_fallback) {
            (CodeSource::Labeled, _) | (CodeSource::Fallback, FallbackPolicy::Permissive) => true,
            (CodeSource::Fallback, FallbackPolicy::KnownOnly) => {
                self.leads.find_visit(&code).await?.is_some()
            }
            (CodeSource::Fallback, FallbackPolicy::Disabled) => false,
        };
        if !admitted {
            info!(%code, "Ignoring unlabeled code match");
        }
        Ok(admitted.then_some(code))
    }

    async fn on_code_found(
        &self,
        lead_id: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<ConversionOutcome, sqlx::Error> {
        info!(lead_id, code, "Promotional code found in message");
        self.leads.record_code(lead_id, code, now).await?;

        if let Some(field_id) = self.settings.code_field_id {
            if let Err(e) = self.crm.update_custom_field(lead_id, field_id, code).await {
                warn!(lead_id, code, error = %e, "Failed to write code to CRM custom field");
            }
        }

        self.conversions
            .send(
                ConversionKind::ConversationStarted,
                ConversionRequest {
                    code: code.to_string(),
                    lead_id: Some(lead_id.to_string()),
                    ..Default::default()
                },
                now,
            )
            .await
    }

    // ────────────────────────────────────────────────────────────────────────
    // Bookkeeping events
    // ────────────────────────────────────────────────────────────────────────

    async fn handle_lead(&self, event: &LeadEvent, now: DateTime<Utc>) -> Result<EventOutcome, sqlx::Error> {
        let lead_id = event.lead_id.as_str();
        self.leads
            .upsert_lead(
                &LeadUpsert {
                    lead_id: lead_id.to_string(),
                    status_id: event.status_id,
                    pipeline_id: event.pipeline_id,
                    ..Default::default()
                },
                now,
            )
            .await?;

        let mut out = EventOutcome::new("lead", Some(lead_id), "lead recorded").processed();

        let Some(status_id) = event.status_id else {
            return Ok(out);
        };
        let entered_funds_confirmed = event.action != LeadAction::Add
            && event.old_status_id != Some(status_id)
            && self.orchestrator.statuses().is_funds_confirmed(status_id);
        if !entered_funds_confirmed {
            return Ok(out);
        }

        let code = self
            .leads
            .find_lead(lead_id)
            .await?
            .and_then(|lead| lead.extracted_code);
        let Some(code) = code else {
            info!(lead_id, "Funds confirmed for lead without a promotional code");
            out.message = "funds confirmed, no code on lead".to_string();
            return Ok(out);
        };

        let conversion = self
            .conversions
            .send(
                ConversionKind::Charged,
                ConversionRequest {
                    code,
                    lead_id: Some(lead_id.to_string()),
                    ..Default::default()
                },
                now,
            )
            .await?;
        out.message = "funds confirmed, charged conversion handled".to_string();
        out.duplicate = conversion.duplicate;
        out.conversion = Some(conversion);
        Ok(out)
    }

    async fn handle_talk(&self, event: &TalkEvent, now: DateTime<Utc>) -> Result<EventOutcome, sqlx::Error> {
        let Some(lead_id) = event.lead_id.as_deref() else {
            return Ok(EventOutcome::new("talk", None, "talk without lead ignored"));
        };
        self.leads
            .upsert_lead(
                &LeadUpsert {
                    lead_id: lead_id.to_string(),
                    talk_id: Some(event.talk_id.clone()),
                    contact_id: Some(event.contact_id.clone()),
                    ..Default::default()
                },
                now,
            )
            .await?;
        Ok(EventOutcome::new("talk", Some(lead_id), format!("talk {} recorded", event.action)).processed())
    }

    async fn handle_unsorted(
        &self,
        event: &UnsortedEvent,
        now: DateTime<Utc>,
    ) -> Result<EventOutcome, sqlx::Error> {
        let Some(lead_id) = event.lead_id.as_deref() else {
            return Ok(EventOutcome::new("unsorted", None, "unsorted without lead ignored"));
        };
        self.leads
            .upsert_lead(
                &LeadUpsert {
                    lead_id: lead_id.to_string(),
                    contact_id: event.contact_id.clone(),
                    source: event.source.clone(),
                    ..Default::default()
                },
                now,
            )
            .await?;
        Ok(EventOutcome::new("unsorted", Some(lead_id), "unsorted lead recorded").processed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion::service::ConversionEvents;
    use crate::crm::StatusCatalog;
    use crate::dedup::MessageLedger;
    use crate::testing::{MemoryStore, MockConversionApi, MockCrm, MockDecisionService};
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    struct Harness {
        store: Arc<MemoryStore>,
        crm: Arc<MockCrm>,
        ai: Arc<MockDecisionService>,
        api: Arc<MockConversionApi>,
        processor: Processor,
    }

    fn harness(crm: MockCrm, ai: MockDecisionService, fallback: FallbackPolicy) -> Harness {
        let store = Arc::new(MemoryStore::default());
        let crm = Arc::new(crm);
        let ai = Arc::new(ai);
        let api = Arc::new(MockConversionApi::default());
        let engine = DedupEngine::new(store.clone(), store.clone(), 30);
        let conversions = ConversionService::new(
            engine.clone(),
            store.clone(),
            store.clone(),
            api.clone(),
            ConversionEvents {
                started: "ConversacionCRM1".into(),
                charged: "CargoCRM1".into(),
            },
            "https://promo.example".into(),
        );
        let statuses = StatusCatalog::new(BTreeMap::from([
            ("Nuevo".to_string(), 100),
            ("Pidio usuario".to_string(), 120),
            ("Revisar".to_string(), 101),
            ("Cargo".to_string(), 142),
        ]));
        let orchestrator = StatusOrchestrator::new(crm.clone(), store.clone(), statuses);
        let processor = Processor::new(
            engine,
            store.clone(),
            conversions,
            crm.clone(),
            ai.clone(),
            orchestrator,
            ProcessorSettings {
                code_field_id: Some(55),
                code_fallback: fallback,
                ai_timeout: Duration::from_secs(5),
                rules: None,
            },
        );
        Harness {
            store,
            crm,
            ai,
            api,
            processor,
        }
    }

    fn ask_for_user() -> AiDecision {
        AiDecision {
            current_status: "Nuevo".into(),
            new_status: "Pidio usuario".into(),
            should_change: true,
            reasoning: "customer asks for credentials".into(),
            confidence: 0.92,
        }
    }

    fn message(text: &str, created_at: i64) -> CrmEvent {
        CrmEvent::Message(InboundMessage {
            id: format!("msg-{created_at}"),
            talk_id: "174".into(),
            chat_id: None,
            lead_id: "11714144".into(),
            contact_id: "9382110".into(),
            text: text.into(),
            created_at,
            direction: MessageDirection::Incoming,
            author: Some("Ana".into()),
            attachment: None,
        })
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_redelivered_message_decided_once() {
        let h = harness(
            MockCrm::with_status(100),
            MockDecisionService::returning(ask_for_user()),
            FallbackPolicy::Disabled,
        );

        let first = h
            .processor
            .handle_event(&message("Necesito el usuario", 1741608000), t0())
            .await
            .unwrap();
        assert!(first.success && first.processed && !first.duplicate);
        assert_eq!(first.state, Some(TransitionState::StatusUpdated));

        // Same content, new envelope id, two seconds later.
        let second = h
            .processor
            .handle_event(
                &message("Necesito el usuario", 1741608002),
                t0() + chrono::Duration::seconds(2),
            )
            .await
            .unwrap();
        assert!(second.success);
        assert!(second.duplicate);
        assert!(!second.processed);

        assert_eq!(h.ai.call_count(), 1);
        assert_eq!(h.store.bot_action_count().await, 1);
        assert_eq!(h.crm.status_updates(), vec![("11714144".to_string(), 120)]);
    }

    #[tokio::test]
    async fn test_skipped_redelivery_leaves_lead_row_untouched() {
        let h = harness(
            MockCrm::with_status(100),
            MockDecisionService::returning(ask_for_user()),
            FallbackPolicy::Disabled,
        );
        h.processor
            .handle_event(&message("Necesito el usuario", 1741608000), t0())
            .await
            .unwrap();
        let before = h.store.find_lead("11714144").await.unwrap().unwrap();

        let later = t0() + chrono::Duration::minutes(5);
        let out = h
            .processor
            .handle_event(&message("Necesito el usuario", 1741608300), later)
            .await
            .unwrap();
        assert!(out.duplicate);

        let after = h.store.find_lead("11714144").await.unwrap().unwrap();
        assert_eq!(after.updated_at, before.updated_at);
    }

    #[tokio::test]
    async fn test_ai_failure_on_funds_confirmed_lead_moves_to_review() {
        let h = harness(
            MockCrm::with_status(142),
            MockDecisionService::failing("overloaded"),
            FallbackPolicy::Disabled,
        );
        let out = h
            .processor
            .handle_event(&message("ya hice el deposito", 1741608000), t0())
            .await
            .unwrap();

        let decision = out.decision.unwrap();
        assert_eq!(decision.current_status, "Cargo");
        assert_eq!(decision.new_status, "Revisar");
        assert_eq!(h.crm.status_updates(), vec![("11714144".to_string(), 101)]);
        assert_eq!(h.store.bot_action_count().await, 1);
    }

    #[tokio::test]
    async fn test_status_update_failure_is_audited_and_reported() {
        let h = harness(
            MockCrm::with_status(100).failing_updates("401 unauthorized"),
            MockDecisionService::returning(ask_for_user()),
            FallbackPolicy::Disabled,
        );
        let out = h
            .processor
            .handle_event(&message("Necesito el usuario", 1741608000), t0())
            .await
            .unwrap();
        assert!(!out.success);
        assert!(out.processed);
        assert_eq!(out.state, Some(TransitionState::StatusUpdateFailed));

        let actions = h.store.list_bot_actions(Some("11714144"), 10).await.unwrap();
        assert_eq!(actions.len(), 1);
        assert!(actions[0].status_update_result["error"]
            .as_str()
            .unwrap()
            .contains("401"));
    }

    #[tokio::test]
    async fn test_crm_lookup_failure_does_not_consume_reservation() {
        let h = harness(
            MockCrm::with_status(100).failing_lookups(),
            MockDecisionService::returning(ask_for_user()),
            FallbackPolicy::Disabled,
        );
        let out = h
            .processor
            .handle_event(&message("hola", 1741608000), t0())
            .await
            .unwrap();
        assert!(!out.success);
        assert!(!out.processed);
        assert_eq!(h.store.attempt_count().await, 0);
        assert_eq!(h.ai.call_count(), 0);
        assert_eq!(h.store.bot_action_count().await, 0);
    }

    #[tokio::test]
    async fn test_labeled_code_sends_conversation_started_once() {
        let h = harness(
            MockCrm::with_status(100),
            MockDecisionService::returning(ask_for_user()),
            FallbackPolicy::Disabled,
        );
        let out = h
            .processor
            .handle_event(&message("Hola! Descuento: fauqwPlA.", 1741608000), t0())
            .await
            .unwrap();

        let conversion = out.conversion.unwrap();
        assert!(conversion.success);
        assert_eq!(conversion.event_name, "ConversacionCRM1");
        assert_eq!(h.api.call_count(), 1);
        assert_eq!(h.crm.custom_field_updates(), vec![("11714144".to_string(), 55, "fauqwPlA".to_string())]);

        let lead = h.store.find_lead("11714144").await.unwrap().unwrap();
        assert_eq!(lead.extracted_code.as_deref(), Some("fauqwPlA"));
        assert_eq!(lead.status_id, Some(100));

        // A different message carrying the same code inside the window.
        let again = h
            .processor
            .handle_event(
                &message("Codigo: fauqwPlA", 1741608100),
                t0() + chrono::Duration::minutes(2),
            )
            .await
            .unwrap();
        assert!(again.conversion.unwrap().duplicate);
        assert_eq!(h.api.call_count(), 1);
    }

    #[tokio::test]
    async fn test_fallback_codes_follow_policy() {
        let disabled = harness(
            MockCrm::with_status(100),
            MockDecisionService::returning(ask_for_user()),
            FallbackPolicy::Disabled,
        );
        let out = disabled
            .processor
            .handle_event(&message("fauqwPlA", 1741608000), t0())
            .await
            .unwrap();
        assert!(out.conversion.is_none());

        let known = harness(
            MockCrm::with_status(100),
            MockDecisionService::returning(ask_for_user()),
            FallbackPolicy::KnownOnly,
        );
        known
            .store
            .record_visit(
                &crate::leads::NewVisit {
                    code: "fauqwPlA".into(),
                    ..Default::default()
                },
                t0(),
            )
            .await
            .unwrap();
        let out = known
            .processor
            .handle_event(&message("fauqwPlA", 1741608000), t0())
            .await
            .unwrap();
        assert!(out.conversion.is_some());

        let permissive = harness(
            MockCrm::with_status(100),
            MockDecisionService::returning(ask_for_user()),
            FallbackPolicy::Permissive,
        );
        let out = permissive
            .processor
            .handle_event(&message("hola fauqwPlA", 1741608000), t0())
            .await
            .unwrap();
        assert_eq!(out.conversion.unwrap().code, "fauqwPlA");
    }

    #[tokio::test]
    async fn test_outgoing_and_empty_messages_are_acknowledged() {
        let h = harness(
            MockCrm::with_status(100),
            MockDecisionService::returning(ask_for_user()),
            FallbackPolicy::Permissive,
        );
        let mut outgoing = message("Hola, te ayudo", 1741608000);
        if let CrmEvent::Message(m) = &mut outgoing {
            m.direction = MessageDirection::Outgoing;
        }
        let out = h.processor.handle_event(&outgoing, t0()).await.unwrap();
        assert!(out.success && !out.processed);

        let out = h.processor.handle_event(&message("   ", 1741608001), t0()).await.unwrap();
        assert!(out.success && !out.processed);
        assert_eq!(h.ai.call_count(), 0);
        assert_eq!(h.api.call_count(), 0);
    }

    #[tokio::test]
    async fn test_lead_moved_to_cargo_sends_charged_conversion() {
        let h = harness(
            MockCrm::with_status(100),
            MockDecisionService::returning(ask_for_user()),
            FallbackPolicy::Disabled,
        );
        h.processor
            .handle_event(&message("Descuento: fauqwPlA", 1741608000), t0())
            .await
            .unwrap();

        let status_change = CrmEvent::Lead(LeadEvent {
            action: LeadAction::Status,
            lead_id: "11714144".into(),
            status_id: Some(142),
            old_status_id: Some(120),
            pipeline_id: Some(7),
        });
        let later = t0() + chrono::Duration::minutes(10);
        let out = h.processor.handle_event(&status_change, later).await.unwrap();
        let conversion = out.conversion.unwrap();
        assert!(conversion.success);
        assert_eq!(conversion.event_name, "CargoCRM1");

        let entry = conversion.entry.unwrap();
        assert!(entry.conversion_slots[0].is_some());
        assert!(entry.conversion_slots[1].is_some());

        // Redelivered status webhook inside the window.
        let out = h.processor.handle_event(&status_change, later).await.unwrap();
        assert!(out.conversion.unwrap().duplicate);
        assert_eq!(h.api.call_count(), 2);
    }

    #[tokio::test]
    async fn test_lead_status_other_than_cargo_only_recorded() {
        let h = harness(
            MockCrm::with_status(100),
            MockDecisionService::returning(ask_for_user()),
            FallbackPolicy::Disabled,
        );
        let out = h
            .processor
            .handle_event(
                &CrmEvent::Lead(LeadEvent {
                    action: LeadAction::Status,
                    lead_id: "11714144".into(),
                    status_id: Some(101),
                    old_status_id: Some(100),
                    pipeline_id: None,
                }),
                t0(),
            )
            .await
            .unwrap();
        assert!(out.conversion.is_none());
        let lead = h.store.find_lead("11714144").await.unwrap().unwrap();
        assert_eq!(lead.status_id, Some(101));
    }

    #[tokio::test]
    async fn test_talk_and_unsorted_update_lead_row() {
        let h = harness(
            MockCrm::with_status(100),
            MockDecisionService::returning(ask_for_user()),
            FallbackPolicy::Disabled,
        );
        h.processor
            .handle_event(
                &CrmEvent::Unsorted(UnsortedEvent {
                    uid: "u-1".into(),
                    lead_id: Some("11714144".into()),
                    contact_id: Some("9382110".into()),
                    source: Some("whatsapp".into()),
                }),
                t0(),
            )
            .await
            .unwrap();
        h.processor
            .handle_event(
                &CrmEvent::Talk(TalkEvent {
                    action: "add".into(),
                    talk_id: "174".into(),
                    contact_id: "9382110".into(),
                    lead_id: Some("11714144".into()),
                    chat_id: None,
                    is_in_work: Some(true),
                    is_read: None,
                }),
                t0(),
            )
            .await
            .unwrap();

        let lead = h.store.find_lead("11714144").await.unwrap().unwrap();
        assert_eq!(lead.talk_id.as_deref(), Some("174"));
        assert_eq!(lead.source.as_deref(), Some("whatsapp"));
    }

    #[tokio::test]
    async fn test_unsupported_event_is_acknowledged() {
        let h = harness(
            MockCrm::with_status(100),
            MockDecisionService::returning(ask_for_user()),
            FallbackPolicy::Disabled,
        );
        let out = h
            .processor
            .handle_event(
                &CrmEvent::Unsupported {
                    kind: "contacts".into(),
                    action: "add".into(),
                },
                t0(),
            )
            .await
            .unwrap();
        assert!(out.success && !out.processed);
    }
}
