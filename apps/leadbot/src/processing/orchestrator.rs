//! Status Transition Orchestrator.
//!
//! Applies a validated `AiDecision` to the CRM and appends exactly one bot
//! action per reserved message, whatever the terminal state. No retries.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::crm::{CrmClient, CrmError, StatusCatalog};
use crate::decision::{is_restricted, AiDecision};
use crate::dedup::{MessageKey, MessageLedger, NewBotAction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransitionState {
    StatusUpdated,
    StatusUpdateFailed,
    NoChangeNeeded,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusUpdateResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionOutcome {
    pub state: TransitionState,
    pub status_update_result: StatusUpdateResult,
}

#[derive(Clone)]
pub struct StatusOrchestrator {
    crm: Arc<dyn CrmClient>,
    ledger: Arc<dyn MessageLedger>,
    statuses: StatusCatalog,
}

impl StatusOrchestrator {
    pub fn new(crm: Arc<dyn CrmClient>, ledger: Arc<dyn MessageLedger>, statuses: StatusCatalog) -> Self {
        Self {
            crm,
            ledger,
            statuses,
        }
    }

    pub fn statuses(&self) -> &StatusCatalog {
        &self.statuses
    }

    pub async fn apply(
        &self,
        key: &MessageKey,
        decision: &AiDecision,
        now: DateTime<Utc>,
    ) -> TransitionOutcome {
        let outcome = if decision.should_change {
            match self.update_status(&key.lead_id, &decision.new_status).await {
                Ok(()) => {
                    info!(
                        lead_id = %key.lead_id,
                        from = %decision.current_status,
                        to = %decision.new_status,
                        "Lead status updated"
                    );
                    TransitionOutcome {
                        state: TransitionState::StatusUpdated,
                        status_update_result: StatusUpdateResult {
                            success: true,
                            error: None,
                        },
                    }
                }
                Err(e) => {
                    warn!(
                        lead_id = %key.lead_id,
                        to = %decision.new_status,
                        error = %e,
                        "Lead status update failed"
                    );
                    TransitionOutcome {
                        state: TransitionState::StatusUpdateFailed,
                        status_update_result: StatusUpdateResult {
                            success: false,
                            error: Some(e.to_string()),
                        },
                    }
                }
            }
        } else {
            TransitionOutcome {
                state: TransitionState::NoChangeNeeded,
                status_update_result: StatusUpdateResult {
                    success: true,
                    error: None,
                },
            }
        };

        self.audit(key, decision, &outcome, now).await;
        outcome
    }

    async fn update_status(&self, lead_id: &str, status: &str) -> Result<(), CrmError> {
        // Last line of defence; decide_safely already rejects these.
        if is_restricted(status) {
            return Err(CrmError::UnknownStatus(status.to_string()));
        }
        let status_id = self
            .statuses
            .id_of(status)
            .ok_or_else(|| CrmError::UnknownStatus(status.to_string()))?;
        self.crm.update_lead_status(lead_id, status_id).await
    }

    async fn audit(
        &self,
        key: &MessageKey,
        decision: &AiDecision,
        outcome: &TransitionOutcome,
        now: DateTime<Utc>,
    ) {
        let action = NewBotAction {
            key: key.clone(),
            ai_decision: serde_json::to_value(decision).unwrap_or_default(),
            status_update_result: serde_json::to_value(&outcome.status_update_result)
                .unwrap_or_default(),
            processing_timestamp: now,
        };
        if let Err(e) = self.ledger.record_bot_action(&action).await {
            error!(
                talk_id = %key.talk_id,
                lead_id = %key.lead_id,
                error = %e,
                "Failed to write bot action audit record"
            );
        }
    }
}
