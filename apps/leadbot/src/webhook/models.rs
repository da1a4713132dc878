use serde::{Deserialize, Serialize};

/// Canonical event produced from one indexed record of a CRM webhook body.
#[derive(Debug, Clone, PartialEq)]
pub enum CrmEvent {
    Message(InboundMessage),
    Talk(TalkEvent),
    Lead(LeadEvent),
    Unsorted(UnsortedEvent),
    /// Well-formed record of a kind/action this service does not handle.
    Unsupported { kind: String, action: String },
    /// Well-formed record of a handled kind that does not concern a lead,
    /// such as a chat attached to a contact.
    Ignored { record: String, reason: String },
}

impl CrmEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            CrmEvent::Message(_) => "message",
            CrmEvent::Talk(_) => "talk",
            CrmEvent::Lead(_) => "lead",
            CrmEvent::Unsorted(_) => "unsorted",
            CrmEvent::Unsupported { .. } => "unsupported",
            CrmEvent::Ignored { .. } => "ignored",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Incoming,
    Outgoing,
}

/// A chat message attached to a lead. Identity is the CRM-assigned `id`, but
/// deduplication keys on content + context, never on `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub id: String,
    pub talk_id: String,
    pub chat_id: Option<String>,
    pub lead_id: String,
    pub contact_id: String,
    pub text: String,
    /// Epoch seconds, as sent by the CRM.
    pub created_at: i64,
    pub direction: MessageDirection,
    pub author: Option<String>,
    pub attachment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TalkEvent {
    pub action: String,
    pub talk_id: String,
    pub contact_id: String,
    pub lead_id: Option<String>,
    pub chat_id: Option<String>,
    pub is_in_work: Option<bool>,
    pub is_read: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadAction {
    Add,
    Update,
    Status,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadEvent {
    pub action: LeadAction,
    pub lead_id: String,
    pub status_id: Option<i64>,
    pub old_status_id: Option<i64>,
    pub pipeline_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsortedEvent {
    pub uid: String,
    pub lead_id: Option<String>,
    pub contact_id: Option<String>,
    pub source: Option<String>,
}
