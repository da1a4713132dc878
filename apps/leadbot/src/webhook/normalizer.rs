//! Webhook Normalizer: maps a flattened webhook body onto canonical `CrmEvent`s.
//!
//! Every indexed record (`<kind>[<action>][<n>][...]`) is validated against an
//! explicit schema table before any field is read. Records missing a required
//! field fail the whole payload; partially-populated events are never produced.
//! Well-formed records of kinds this service does not handle come back as
//! `CrmEvent::Unsupported`, and messages that do not belong to a lead as
//! `CrmEvent::Ignored`, so the handler can acknowledge them.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::webhook::form::FieldBag;
use crate::webhook::models::{
    CrmEvent, InboundMessage, LeadAction, LeadEvent, MessageDirection, TalkEvent, UnsortedEvent,
};

#[derive(Debug, Error, PartialEq)]
pub enum NormalizeError {
    #[error("malformed form key '{0}'")]
    MalformedKey(String),

    #[error("invalid JSON body: {0}")]
    InvalidJson(String),

    #[error("payload contains no CRM event records")]
    NoEvents,

    #[error("{record} is missing required field(s): {fields}")]
    MissingFields { record: String, fields: String },

    #[error("{record}.{field} has invalid value '{value}'")]
    InvalidField {
        record: String,
        field: String,
        value: String,
    },
}

// ────────────────────────────────────────────────────────────────────────────
// Mapping tables
// ────────────────────────────────────────────────────────────────────────────

struct EventSchema {
    kind: &'static str,
    actions: &'static [&'static str],
    required: &'static [&'static str],
}

const SCHEMAS: &[EventSchema] = &[
    EventSchema {
        kind: "message",
        actions: &["add"],
        required: &["id", "talk_id", "contact_id", "entity_id", "created_at"],
    },
    EventSchema {
        kind: "talk",
        actions: &["add", "update"],
        required: &["talk_id", "contact_id"],
    },
    EventSchema {
        kind: "leads",
        actions: &["add", "update", "status"],
        required: &["id"],
    },
    EventSchema {
        kind: "unsorted",
        actions: &["add", "update"],
        required: &["uid"],
    },
];

/// Top-level keys that carry metadata rather than event records.
const METADATA_KINDS: &[&str] = &["account"];

/// CRM `element_type` of a lead.
const LEAD_ELEMENT_TYPE: &str = "2";

// ────────────────────────────────────────────────────────────────────────────
// Record grouping
// ────────────────────────────────────────────────────────────────────────────

/// Fields of one `<kind>[<action>][<index>]` record, keyed by dotted sub-path.
#[derive(Debug, Default)]
struct Record {
    label: String,
    fields: BTreeMap<String, String>,
}

impl Record {
    fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .get(field)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    fn req(&self, field: &str) -> Result<String, NormalizeError> {
        self.get(field)
            .map(str::to_string)
            .ok_or_else(|| NormalizeError::MissingFields {
                record: self.label.clone(),
                fields: field.to_string(),
            })
    }

    fn opt(&self, field: &str) -> Option<String> {
        self.get(field).map(str::to_string)
    }

    fn opt_i64(&self, field: &str) -> Result<Option<i64>, NormalizeError> {
        self.get(field)
            .map(|v| v.parse::<i64>().map_err(|_| self.invalid(field, v)))
            .transpose()
    }

    fn opt_bool(&self, field: &str) -> Result<Option<bool>, NormalizeError> {
        self.get(field)
            .map(|v| match v {
                "1" | "true" => Ok(true),
                "0" | "false" => Ok(false),
                other => Err(self.invalid(field, other)),
            })
            .transpose()
    }

    fn invalid(&self, field: &str, value: &str) -> NormalizeError {
        NormalizeError::InvalidField {
            record: self.label.clone(),
            field: field.to_string(),
            value: value.to_string(),
        }
    }

    fn ignored(&self, reason: String) -> CrmEvent {
        CrmEvent::Ignored {
            record: self.label.clone(),
            reason,
        }
    }

    fn check_required(&self, required: &[&str]) -> Result<(), NormalizeError> {
        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|f| self.get(f).is_none())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(NormalizeError::MissingFields {
                record: self.label.clone(),
                fields: missing.join(", "),
            })
        }
    }
}

type RecordKey = (String, String, usize);

fn group_records(bag: &FieldBag) -> Result<BTreeMap<RecordKey, Record>, NormalizeError> {
    let mut records: BTreeMap<RecordKey, Record> = BTreeMap::new();

    for (path, value) in bag.iter() {
        if METADATA_KINDS.contains(&path[0].as_str()) {
            continue;
        }
        if path.len() < 4 {
            continue;
        }
        let Ok(index) = path[2].parse::<usize>() else {
            return Err(NormalizeError::MalformedKey(path.join(".")));
        };
        let key = (path[0].clone(), path[1].clone(), index);
        let record = records.entry(key).or_insert_with(|| Record {
            label: format!("{}[{}][{}]", path[0], path[1], index),
            fields: BTreeMap::new(),
        });
        record.fields.insert(path[3..].join("."), value.clone());
    }

    Ok(records)
}

// ────────────────────────────────────────────────────────────────────────────
// Public entry point
// ────────────────────────────────────────────────────────────────────────────

/// Normalizes a flattened webhook body into canonical events, in
/// (kind, action, index) order.
pub fn normalize(bag: &FieldBag) -> Result<Vec<CrmEvent>, NormalizeError> {
    let records = group_records(bag)?;
    if records.is_empty() {
        return Err(NormalizeError::NoEvents);
    }

    let mut events = Vec::with_capacity(records.len());
    for ((kind, action, _), record) in &records {
        let schema = SCHEMAS
            .iter()
            .find(|s| s.kind == kind && s.actions.contains(&action.as_str()));
        let Some(schema) = schema else {
            events.push(CrmEvent::Unsupported {
                kind: kind.clone(),
                action: action.clone(),
            });
            continue;
        };
        record.check_required(schema.required)?;

        let event = match schema.kind {
            "message" => map_message(record)?,
            "talk" => CrmEvent::Talk(map_talk(action, record)?),
            "leads" => CrmEvent::Lead(map_lead(action, record)?),
            _ => CrmEvent::Unsorted(map_unsorted(record)),
        };
        events.push(event);
    }

    Ok(events)
}

fn map_message(r: &Record) -> Result<CrmEvent, NormalizeError> {
    if let Some(element_type) = r.get("element_type") {
        if element_type != LEAD_ELEMENT_TYPE {
            return Ok(r.ignored(format!("message on element_type {element_type}")));
        }
    }

    let created_at = r.req("created_at")?;
    let created_at = created_at
        .parse::<i64>()
        .map_err(|_| r.invalid("created_at", &created_at))?;

    let direction = match r.get("type") {
        None | Some("incoming") => MessageDirection::Incoming,
        Some("outgoing") => MessageDirection::Outgoing,
        Some(other) => return Ok(r.ignored(format!("message of type {other}"))),
    };

    Ok(CrmEvent::Message(InboundMessage {
        id: r.req("id")?,
        talk_id: r.req("talk_id")?,
        chat_id: r.opt("chat_id"),
        lead_id: r.req("entity_id")?,
        contact_id: r.req("contact_id")?,
        text: r.opt("text").unwrap_or_default(),
        created_at,
        direction,
        author: r.opt("author.name"),
        attachment: r.opt("attachment.link"),
    }))
}

fn map_talk(action: &str, r: &Record) -> Result<TalkEvent, NormalizeError> {
    let lead_id = match r.get("entity_type") {
        None | Some("lead") | Some("leads") => r.opt("entity_id"),
        Some(_) => None,
    };
    Ok(TalkEvent {
        action: action.to_string(),
        talk_id: r.req("talk_id")?,
        contact_id: r.req("contact_id")?,
        lead_id,
        chat_id: r.opt("chat_id"),
        is_in_work: r.opt_bool("is_in_work")?,
        is_read: r.opt_bool("is_read")?,
    })
}

fn map_lead(action: &str, r: &Record) -> Result<LeadEvent, NormalizeError> {
    let action = match action {
        "add" => LeadAction::Add,
        "status" => LeadAction::Status,
        _ => LeadAction::Update,
    };
    Ok(LeadEvent {
        action,
        lead_id: r.req("id")?,
        status_id: r.opt_i64("status_id")?,
        old_status_id: r.opt_i64("old_status_id")?,
        pipeline_id: r.opt_i64("pipeline_id")?,
    })
}

fn map_unsorted(r: &Record) -> UnsortedEvent {
    UnsortedEvent {
        uid: r.get("uid").unwrap_or_default().to_string(),
        lead_id: r.opt("lead_id"),
        contact_id: r.opt("data.contacts.0.id"),
        source: r.opt("source"),
    }
}
