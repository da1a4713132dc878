//! Ad-conversion API client (Meta Conversions API wire shape).
//!
//! Only `ConversionService` calls this, and only after Check C has claimed the send.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConversionApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fbp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fbc: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionEvent {
    pub event_name: String,
    /// Epoch seconds.
    pub event_time: i64,
    pub action_source: &'static str,
    pub event_source_url: String,
    pub user_data: UserData,
}

impl ConversionEvent {
    pub fn website(event_name: &str, event_time: i64, event_source_url: &str, user_data: UserData) -> Self {
        Self {
            event_name: event_name.to_string(),
            event_time,
            action_source: "website",
            event_source_url: event_source_url.to_string(),
            user_data,
        }
    }
}

#[async_trait]
pub trait ConversionApi: Send + Sync {
    /// Sends one event; returns the platform's response body on success.
    async fn send(&self, event: &ConversionEvent) -> Result<Value, ConversionApiError>;
}

#[derive(Clone)]
pub struct MetaConversionClient {
    client: Client,
    endpoint: String,
    access_token: String,
}

impl MetaConversionClient {
    pub fn new(
        api_version: &str,
        pixel_id: &str,
        access_token: String,
        timeout: Duration,
    ) -> reqwest::Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            endpoint: format!("https://graph.facebook.com/{api_version}/{pixel_id}/events"),
            access_token,
        })
    }
}

#[async_trait]
impl ConversionApi for MetaConversionClient {
    async fn send(&self, event: &ConversionEvent) -> Result<Value, ConversionApiError> {
        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("access_token", &self.access_token)])
            .json(&json!({ "data": [event] }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v.pointer("/error/message").and_then(Value::as_str).map(String::from))
                .unwrap_or(body);
            return Err(ConversionApiError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: Value = response.json().await?;
        debug!(event_name = %event.event_name, "Conversion event accepted");
        Ok(body)
    }
}
