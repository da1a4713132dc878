//! Inbound CRM webhook surface: body flattening, normalization into canonical
//! events, and the axum handler that dispatches them.

pub mod form;
pub mod handlers;
pub mod models;
pub mod normalizer;
