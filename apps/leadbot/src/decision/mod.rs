//! AI lead-status decisions.
//!
//! The decision service is a black box behind `DecisionService`. Whatever it
//! returns passes through `decide_safely`, which bounds the call with a timeout,
//! rejects decisions that propose the funds-confirmed status or a status outside
//! the automated catalog, and substitutes the safe fallback on any failure.

pub mod prompts;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::decision::prompts::{DECISION_PROMPT, DECISION_SYSTEM};
use crate::llm_client::LlmClient;

/// Funds-confirmed status. Only a human may assign it.
pub const FUNDS_CONFIRMED_STATUS: &str = "Cargo";
/// Status used when a lead needs human review.
pub const NEEDS_REVIEW_STATUS: &str = "Revisar";

pub fn is_restricted(status: &str) -> bool {
    status.trim().eq_ignore_ascii_case(FUNDS_CONFIRMED_STATUS)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiDecision {
    pub current_status: String,
    pub new_status: String,
    pub should_change: bool,
    pub reasoning: String,
    pub confidence: f64,
}

#[derive(Debug, Error, PartialEq)]
pub enum DecisionError {
    #[error("decision proposes restricted status '{0}'")]
    RestrictedStatus(String),

    #[error("decision proposes status '{0}' outside the automated catalog")]
    UnknownStatus(String),

    #[error("confidence {0} is outside [0, 1]")]
    InvalidConfidence(f64),

    #[error("decision service error: {0}")]
    Service(String),

    #[error("decision service timed out after {0:?}")]
    Timeout(Duration),
}

impl AiDecision {
    /// `allowed` is the automated status catalog; empty means "any non-restricted".
    pub fn validate(&self, allowed: &[String]) -> Result<(), DecisionError> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(DecisionError::InvalidConfidence(self.confidence));
        }
        if is_restricted(&self.new_status) {
            return Err(DecisionError::RestrictedStatus(self.new_status.clone()));
        }
        if self.should_change
            && !allowed.is_empty()
            && !allowed.iter().any(|s| s == &self.new_status)
        {
            return Err(DecisionError::UnknownStatus(self.new_status.clone()));
        }
        Ok(())
    }

    /// Keeps the current status, except that a lead sitting on the
    /// funds-confirmed status is routed to review.
    pub fn fallback(current_status: &str, reason: &str) -> Self {
        let (new_status, should_change) = if is_restricted(current_status) {
            (NEEDS_REVIEW_STATUS.to_string(), true)
        } else {
            (current_status.to_string(), false)
        };
        Self {
            current_status: current_status.to_string(),
            new_status,
            should_change,
            reasoning: format!("fallback: {reason}"),
            confidence: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactContext {
    pub lead_id: String,
    pub contact_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRequest {
    pub message_text: String,
    pub current_status: String,
    pub talk_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_context: Option<ContactContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<String>,
    pub statuses: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<String>,
}

#[async_trait]
pub trait DecisionService: Send + Sync {
    async fn decide(&self, request: &DecisionRequest) -> Result<AiDecision, DecisionError>;
}

/// Runs the decision service under `timeout` and validates the answer.
/// Never fails: every error path yields `AiDecision::fallback`.
pub async fn decide_safely(
    service: &dyn DecisionService,
    request: &DecisionRequest,
    timeout: Duration,
) -> AiDecision {
    let result = match tokio::time::timeout(timeout, service.decide(request)).await {
        Ok(result) => result,
        Err(_) => Err(DecisionError::Timeout(timeout)),
    };

    let checked = result.and_then(|mut decision| {
        decision.current_status = request.current_status.clone();
        decision.validate(&request.statuses)?;
        Ok(decision)
    });

    match checked {
        Ok(decision) => decision,
        Err(e) => {
            warn!(
                talk_id = %request.talk_id,
                current_status = %request.current_status,
                error = %e,
                "AI decision unavailable, using fallback"
            );
            AiDecision::fallback(&request.current_status, &e.to_string())
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// LLM-backed implementation
// ────────────────────────────────────────────────────────────────────────────

pub struct LlmDecisionService {
    llm: LlmClient,
}

impl LlmDecisionService {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }
}

fn build_prompt(request: &DecisionRequest) -> String {
    let context = request
        .contact_context
        .as_ref()
        .and_then(|c| serde_json::to_string(c).ok())
        .unwrap_or_else(|| "none".to_string());
    let statuses = if request.statuses.is_empty() {
        format!("any status except \"{FUNDS_CONFIRMED_STATUS}\"")
    } else {
        request.statuses.join(", ")
    };
    let mut message_text = request.message_text.clone();
    if let Some(link) = &request.attachment {
        message_text.push_str(&format!("\n[attachment: {link}]"));
    }

    DECISION_PROMPT
        .replace("{statuses}", &statuses)
        .replace("{current_status}", &request.current_status)
        .replace("{context}", &context)
        .replace("{rules}", request.rules.as_deref().unwrap_or(""))
        .replace("{message_text}", &message_text)
}

#[async_trait]
impl DecisionService for LlmDecisionService {
    async fn decide(&self, request: &DecisionRequest) -> Result<AiDecision, DecisionError> {
        self.llm
            .complete_json(&build_prompt(request), DECISION_SYSTEM)
            .await
            .map_err(|e| DecisionError::Service(e.to_string()))
    }
}
