//! Axum route handlers for conversions and tracking visits.

use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{ConnectInfo, Path, State},
    http::{header::USER_AGENT, HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use serde::Deserialize;

use crate::conversion::client::UserData;
use crate::conversion::ledger::ConversionLedgerEntry;
use crate::conversion::service::{ConversionOutcome, ConversionRequest};
use crate::errors::AppError;
use crate::leads::NewVisit;
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Request types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionTriggerRequest {
    pub code: String,
    pub event_name: String,
    pub lead_id: Option<String>,
    pub user_data: Option<UserData>,
    pub event_source_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitRequest {
    pub code: String,
    pub fbp: Option<String>,
    pub fbc: Option<String>,
    pub event_source_url: Option<String>,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/conversions
///
/// Direct conversion trigger for non-CRM sources. A suppressed duplicate is a
/// 200 with `error: "DUPLICATE_CONVERSION"`.
pub async fn handle_trigger_conversion(
    State(state): State<AppState>,
    Json(req): Json<ConversionTriggerRequest>,
) -> Result<Json<ConversionOutcome>, AppError> {
    let code = req.code.trim();
    if code.is_empty() {
        return Err(AppError::Validation("code cannot be empty".to_string()));
    }
    let kind = state
        .conversions
        .events()
        .kind_of(&req.event_name)
        .ok_or_else(|| AppError::Validation(format!("unknown eventName '{}'", req.event_name)))?;

    let outcome = state
        .conversions
        .send(
            kind,
            ConversionRequest {
                code: code.to_string(),
                lead_id: req.lead_id,
                user_data: req.user_data,
                event_source_url: req.event_source_url,
            },
            Utc::now(),
        )
        .await?;
    Ok(Json(outcome))
}

/// GET /api/v1/conversions/:code
pub async fn handle_get_conversion(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<ConversionLedgerEntry>, AppError> {
    state
        .conversions
        .find_entry(&code)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("No conversion ledger entry for code {code}")))
}

/// POST /api/v1/visits
///
/// Registers the landing-page visit that issued `code`, capturing the client
/// address and user agent for later conversion events.
pub async fn handle_record_visit(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(req): Json<VisitRequest>,
) -> Result<StatusCode, AppError> {
    let code = req.code.trim();
    if code.is_empty() {
        return Err(AppError::Validation("code cannot be empty".to_string()));
    }

    let visit = NewVisit {
        code: code.to_string(),
        fbp: req.fbp,
        fbc: req.fbc,
        client_ip_address: client_ip(
            &headers,
            connect_info.map(|c| c.0),
            state.trust_proxy_headers,
        )
        .map(|ip| ip.to_string()),
        client_user_agent: headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(String::from),
        event_source_url: req.event_source_url,
    };
    state.leads.record_visit(&visit, Utc::now()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// With trusted proxy headers: X-Forwarded-For (first hop), then X-Real-IP,
/// then the socket peer. Otherwise the socket peer only.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> Option<IpAddr> {
    if trust_proxy {
        if let Some(forwarded) = headers.get("x-forwarded-for") {
            return forwarded
                .to_str()
                .ok()
                .and_then(|s| s.split(',').next())
                .and_then(|s| s.trim().parse::<IpAddr>().ok());
        }
        if let Some(real_ip) = headers.get("x-real-ip") {
            return real_ip.to_str().ok().and_then(|s| s.trim().parse().ok());
        }
    }
    peer.map(|addr| addr.ip())
}
