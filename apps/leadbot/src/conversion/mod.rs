//! Promotional-code conversions: extraction, the per-code ledger, the
//! ad-platform client, and the service that gates sends behind Check C.

pub mod client;
pub mod code_extractor;
pub mod handlers;
pub mod ledger;
pub mod service;
