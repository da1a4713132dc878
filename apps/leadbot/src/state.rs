use std::sync::Arc;

use crate::conversion::service::ConversionService;
use crate::dedup::MessageLedger;
use crate::leads::LeadStore;
use crate::processing::pipeline::Processor;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub processor: Processor,
    pub conversions: ConversionService,
    /// Read access to the bot-action audit trail.
    pub ledger: Arc<dyn MessageLedger>,
    pub leads: Arc<dyn LeadStore>,
    /// Whether client addresses may be taken from proxy headers.
    pub trust_proxy_headers: bool,
}
