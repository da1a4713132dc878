mod config;
mod conversion;
mod crm;
mod db;
mod decision;
mod dedup;
mod errors;
mod leads;
mod llm_client;
mod models;
mod processing;
mod routes;
mod state;
mod webhook;

#[cfg(test)]
mod testing;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::conversion::client::MetaConversionClient;
use crate::conversion::ledger::PgConversionStore;
use crate::conversion::service::{ConversionEvents, ConversionService};
use crate::crm::{KommoClient, StatusCatalog};
use crate::db::create_pool;
use crate::decision::LlmDecisionService;
use crate::dedup::{DedupEngine, PgMessageLedger};
use crate::leads::PgLeadStore;
use crate::llm_client::LlmClient;
use crate::processing::orchestrator::StatusOrchestrator;
use crate::processing::pipeline::{Processor, ProcessorSettings};
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting leadbot v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL (runs migrations)
    let db = create_pool(&config.database_url).await?;

    let http_timeout = Duration::from_secs(config.http_timeout_secs);

    // Stores
    let messages = Arc::new(PgMessageLedger::new(db.clone()));
    let conversion_store = Arc::new(PgConversionStore::new(db.clone()));
    let leads = Arc::new(PgLeadStore::new(db));

    // External clients
    let llm = LlmClient::new(config.anthropic_api_key.clone(), http_timeout)
        .context("failed to build LLM HTTP client")?;
    info!("LLM client initialized (model: {})", llm_client::MODEL);

    let crm = Arc::new(
        KommoClient::new(&config.crm_base_url, config.crm_access_token.clone(), http_timeout)
            .context("failed to build CRM HTTP client")?,
    );
    let ads = Arc::new(
        MetaConversionClient::new(
            &config.meta_api_version,
            &config.meta_pixel_id,
            config.meta_access_token.clone(),
            http_timeout,
        )
        .context("failed to build conversion API client")?,
    );

    let statuses = StatusCatalog::new(config.crm_status_ids.clone());
    info!(
        "Status catalog: {} statuses, {} available to automation",
        config.crm_status_ids.len(),
        statuses.automated_statuses().len()
    );

    // Core services
    let engine = DedupEngine::new(
        messages.clone(),
        conversion_store.clone(),
        config.dedup_window_minutes,
    );
    let conversions = ConversionService::new(
        engine.clone(),
        conversion_store,
        leads.clone(),
        ads,
        ConversionEvents {
            started: config.conversion_event_started.clone(),
            charged: config.conversion_event_charged.clone(),
        },
        config.default_event_source_url.clone(),
    );
    let orchestrator = StatusOrchestrator::new(crm.clone(), messages.clone(), statuses);
    let processor = Processor::new(
        engine,
        leads.clone(),
        conversions.clone(),
        crm,
        Arc::new(LlmDecisionService::new(llm)),
        orchestrator,
        ProcessorSettings {
            code_field_id: config.crm_code_field_id,
            code_fallback: config.code_fallback,
            ai_timeout: Duration::from_secs(config.ai_timeout_secs),
            rules: config.decision_rules.clone(),
        },
    );

    // Build app state
    let state = AppState {
        processor,
        conversions,
        ledger: messages,
        leads,
        trust_proxy_headers: config.trust_proxy_headers,
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
