use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, HeaderMap},
    Json,
};
use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::errors::AppError;
use crate::processing::pipeline::EventOutcome;
use crate::state::AppState;
use crate::webhook::form::FieldBag;
use crate::webhook::models::CrmEvent;
use crate::webhook::normalizer::normalize;

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub success: bool,
    pub processed: bool,
    pub duplicate: bool,
    pub message: String,
    pub results: Vec<EventOutcome>,
}

impl WebhookResponse {
    fn from_outcomes(results: Vec<EventOutcome>) -> Self {
        let message = match results.as_slice() {
            [single] => single.message.clone(),
            many => format!("{} events handled", many.len()),
        };
        Self {
            success: results.iter().all(|r| r.success),
            processed: results.iter().any(|r| r.processed),
            duplicate: results.iter().any(|r| r.duplicate),
            message,
            results,
        }
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.trim_start().to_ascii_lowercase().starts_with("application/json"))
}

/// POST /webhooks/crm
///
/// Accepts form-urlencoded (CRM default) or JSON bodies. Malformed payloads are
/// rejected with 400 before any side effect; business outcomes are always 200.
pub async fn handle_crm_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, AppError> {
    let bag = if is_json(&headers) {
        FieldBag::from_json(&body)?
    } else {
        FieldBag::from_form(&body)?
    };
    let events = normalize(&bag)?;
    info!(
        count = events.len(),
        kinds = ?events.iter().map(CrmEvent::kind).collect::<Vec<_>>(),
        "CRM webhook received"
    );

    let now = Utc::now();
    let mut results = Vec::with_capacity(events.len());
    for event in &events {
        results.push(state.processor.handle_event(event, now).await?);
    }
    Ok(Json(WebhookResponse::from_outcomes(results)))
}
