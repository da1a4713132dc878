use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use crate::errors::AppError;
use crate::models::ledger::BotActionRow;
use crate::state::AppState;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotActionQuery {
    pub lead_id: Option<String>,
    pub limit: Option<i64>,
}

/// GET /api/v1/bot-actions?leadId=&limit=
pub async fn handle_list_bot_actions(
    State(state): State<AppState>,
    Query(params): Query<BotActionQuery>,
) -> Result<Json<Vec<BotActionRow>>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(AppError::Validation(format!(
            "limit must be between 1 and {MAX_LIMIT}"
        )));
    }
    let rows = state
        .ledger
        .list_bot_actions(params.lead_id.as_deref(), limit)
        .await?;
    Ok(Json(rows))
}
