//! CRM API client (Kommo v4 lead endpoints) and the status-name catalog.
//!
//! Statuses travel through the AI layer by name; the CRM speaks status ids.
//! `StatusCatalog` translates between the two using `CRM_STATUS_IDS`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::decision::is_restricted;

#[derive(Debug, Error)]
pub enum CrmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("CRM API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("lead {0} not found in CRM")]
    LeadNotFound(String),

    #[error("status '{0}' has no configured CRM id")]
    UnknownStatus(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CrmLead {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    pub status_id: i64,
    #[serde(default)]
    pub pipeline_id: Option<i64>,
}

#[async_trait]
pub trait CrmClient: Send + Sync {
    async fn get_lead(&self, lead_id: &str) -> Result<CrmLead, CrmError>;

    async fn update_lead_status(&self, lead_id: &str, status_id: i64) -> Result<(), CrmError>;

    async fn update_custom_field(
        &self,
        lead_id: &str,
        field_id: i64,
        value: &str,
    ) -> Result<(), CrmError>;
}

#[derive(Clone)]
pub struct KommoClient {
    client: Client,
    base_url: String,
    access_token: String,
}

impl KommoClient {
    pub fn new(base_url: &str, access_token: String, timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token,
        })
    }

    fn lead_url(&self, lead_id: &str) -> String {
        format!("{}/api/v4/leads/{lead_id}", self.base_url)
    }

    async fn patch_lead(&self, lead_id: &str, body: Value) -> Result<(), CrmError> {
        let response = self
            .client
            .patch(self.lead_url(lead_id))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, CrmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("detail").or_else(|| v.get("title")).cloned())
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or(body);
    Err(CrmError::Api {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl CrmClient for KommoClient {
    async fn get_lead(&self, lead_id: &str) -> Result<CrmLead, CrmError> {
        let response = self
            .client
            .get(self.lead_url(lead_id))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        // Kommo answers 204 for ids it does not know.
        if response.status() == reqwest::StatusCode::NO_CONTENT
            || response.status() == reqwest::StatusCode::NOT_FOUND
        {
            return Err(CrmError::LeadNotFound(lead_id.to_string()));
        }
        let lead: CrmLead = check_status(response).await?.json().await?;
        debug!(lead_id, status_id = lead.status_id, "Fetched CRM lead");
        Ok(lead)
    }

    async fn update_lead_status(&self, lead_id: &str, status_id: i64) -> Result<(), CrmError> {
        self.patch_lead(lead_id, json!({ "status_id": status_id })).await
    }

    async fn update_custom_field(
        &self,
        lead_id: &str,
        field_id: i64,
        value: &str,
    ) -> Result<(), CrmError> {
        self.patch_lead(lead_id, custom_field_body(field_id, value)).await
    }
}

fn custom_field_body(field_id: i64, value: &str) -> Value {
    json!({
        "custom_fields_values": [
            { "field_id": field_id, "values": [ { "value": value } ] }
        ]
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Status catalog
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct StatusCatalog {
    by_name: BTreeMap<String, i64>,
}

impl StatusCatalog {
    pub fn new(by_name: BTreeMap<String, i64>) -> Self {
        Self { by_name }
    }

    pub fn id_of(&self, name: &str) -> Option<i64> {
        self.by_name.get(name).copied()
    }

    pub fn name_of(&self, status_id: i64) -> Option<&str> {
        self.by_name
            .iter()
            .find(|(_, id)| **id == status_id)
            .map(|(name, _)| name.as_str())
    }

    /// Display name for a status id, falling back to the raw id.
    pub fn label(&self, status_id: i64) -> String {
        self.name_of(status_id)
            .map(String::from)
            .unwrap_or_else(|| status_id.to_string())
    }

    /// Statuses the AI may propose: every configured status except the funds-confirmed one.
    pub fn automated_statuses(&self) -> Vec<String> {
        self.by_name
            .keys()
            .filter(|name| !is_restricted(name))
            .cloned()
            .collect()
    }

    pub fn is_funds_confirmed(&self, status_id: i64) -> bool {
        self.name_of(status_id).is_some_and(is_restricted)
    }
}
