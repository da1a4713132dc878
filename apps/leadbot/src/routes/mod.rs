pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::conversion::handlers as conversion;
use crate::processing::handlers as audit;
use crate::state::AppState;
use crate::webhook::handlers as webhook;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // CRM webhooks
        .route("/webhooks/crm", post(webhook::handle_crm_webhook))
        // Conversions
        .route("/api/v1/visits", post(conversion::handle_record_visit))
        .route(
            "/api/v1/conversions",
            post(conversion::handle_trigger_conversion),
        )
        .route(
            "/api/v1/conversions/:code",
            get(conversion::handle_get_conversion),
        )
        // Audit trail
        .route("/api/v1/bot-actions", get(audit::handle_list_bot_actions))
        .with_state(state)
}
