use std::collections::BTreeMap;

use anyhow::{Context, Result};

use crate::conversion::code_extractor::FallbackPolicy;

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub anthropic_api_key: String,
    pub crm_base_url: String,
    pub crm_access_token: String,
    /// CRM pipeline status name -> status id.
    pub crm_status_ids: BTreeMap<String, i64>,
    /// Custom field that receives the extracted promotional code, if any.
    pub crm_code_field_id: Option<i64>,
    pub meta_pixel_id: String,
    pub meta_access_token: String,
    pub meta_api_version: String,
    pub conversion_event_started: String,
    pub conversion_event_charged: String,
    pub default_event_source_url: String,
    pub dedup_window_minutes: i64,
    pub http_timeout_secs: u64,
    pub ai_timeout_secs: u64,
    pub code_fallback: FallbackPolicy,
    /// Free-form business rules appended to every decision prompt.
    pub decision_rules: Option<String>,
    /// Read the client address from X-Forwarded-For / X-Real-IP. Only safe
    /// behind a reverse proxy that overwrites those headers.
    pub trust_proxy_headers: bool,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            crm_base_url: require_env("CRM_BASE_URL")?,
            crm_access_token: require_env("CRM_ACCESS_TOKEN")?,
            crm_status_ids: parse_status_ids(
                &std::env::var("CRM_STATUS_IDS").unwrap_or_else(|_| "{}".to_string()),
            )?,
            crm_code_field_id: optional_env("CRM_CODE_FIELD_ID")
                .map(|v| v.parse::<i64>())
                .transpose()
                .context("CRM_CODE_FIELD_ID must be an integer")?,
            meta_pixel_id: require_env("META_PIXEL_ID")?,
            meta_access_token: require_env("META_ACCESS_TOKEN")?,
            meta_api_version: env_or("META_API_VERSION", "v18.0"),
            conversion_event_started: env_or("CONVERSION_EVENT_STARTED", "ConversacionCRM1"),
            conversion_event_charged: env_or("CONVERSION_EVENT_CHARGED", "CargoCRM1"),
            default_event_source_url: env_or("DEFAULT_EVENT_SOURCE_URL", "https://example.com"),
            dedup_window_minutes: env_or("DEDUP_WINDOW_MINUTES", "30")
                .parse::<i64>()
                .context("DEDUP_WINDOW_MINUTES must be an integer")?,
            http_timeout_secs: env_or("HTTP_TIMEOUT_SECS", "15")
                .parse::<u64>()
                .context("HTTP_TIMEOUT_SECS must be an integer")?,
            ai_timeout_secs: env_or("AI_TIMEOUT_SECS", "30")
                .parse::<u64>()
                .context("AI_TIMEOUT_SECS must be an integer")?,
            code_fallback: env_or("CODE_FALLBACK", "permissive")
                .parse::<FallbackPolicy>()
                .map_err(anyhow::Error::msg)?,
            decision_rules: optional_env("DECISION_RULES"),
            trust_proxy_headers: env_or("TRUST_PROXY_HEADERS", "false")
                .parse::<bool>()
                .context("TRUST_PROXY_HEADERS must be true or false")?,
            port: env_or("PORT", "8080")
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: env_or("RUST_LOG", "info"),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    optional_env(key).unwrap_or_else(|| default.to_string())
}

fn parse_status_ids(raw: &str) -> Result<BTreeMap<String, i64>> {
    serde_json::from_str(raw)
        .context("CRM_STATUS_IDS must be a JSON object of status name -> status id")
}
