//! Event processing: the per-event pipeline and the status transition orchestrator.

pub mod handlers;
pub mod orchestrator;
pub mod pipeline;
