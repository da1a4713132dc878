//! Dedup Decision Engine: decides PROCESS vs SKIP for inbound messages and
//! PROCEED vs DUPLICATE for conversion sends.
//!
//! Three guards, all time-windowed existence checks against append-only ledgers:
//!
//! - **A** (message-reprocessing): a processing attempt with the same
//!   `(talk, lead, contact, text)` since the start of the current UTC day, or
//!   inside the dedup window when that reaches back past midnight.
//! - **B** (AI-reprocessing): a bot action with the same key inside the dedup
//!   window (30 minutes by default).
//! - **C** (conversion-duplicate): the ledger entry for a code already carries the
//!   event in one of its slots and was written inside the window, or a send for the
//!   same `(code, event)` was claimed inside the window.
//!
//! The final A+B check and the C check are evaluated by the store under a
//! transaction-scoped advisory lock together with the insert that records the
//! reservation, so two overlapping deliveries cannot both pass.

pub mod store;

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::conversion::ledger::{ConversionKind, ConversionLedgerEntry, ConversionStore};
use crate::webhook::models::InboundMessage;

pub use store::{MessageLedger, NewBotAction, PgMessageLedger};

const FIELD_SEPARATOR: char = '\u{1f}';

// ────────────────────────────────────────────────────────────────────────────
// Keys
// ────────────────────────────────────────────────────────────────────────────

/// Content + context identity of a message. Retried webhooks may wrap the same
/// content in a new envelope (new message id), so the id is not part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageKey {
    pub talk_id: String,
    pub lead_id: String,
    pub contact_id: String,
    pub message_text: String,
}

impl MessageKey {
    pub fn from_message(message: &InboundMessage) -> Self {
        Self {
            talk_id: message.talk_id.clone(),
            lead_id: message.lead_id.clone(),
            contact_id: message.contact_id.clone(),
            message_text: message.text.clone(),
        }
    }

    fn parts(&self) -> [&str; 4] {
        [
            &self.talk_id,
            &self.lead_id,
            &self.contact_id,
            &self.message_text,
        ]
    }

    /// Hex SHA-256 of the key, used as the indexed lookup column.
    pub fn message_hash(&self) -> String {
        format!("{:x}", digest(&self.parts()))
    }

    /// Advisory-lock id serializing reservations for this key.
    pub fn lock_key(&self) -> i64 {
        let [talk, lead, contact, text] = self.parts();
        lock_key(&["message", talk, lead, contact, text])
    }
}

/// Advisory-lock id serializing claims for one `(code, event)` pair.
pub fn conversion_lock_key(code: &str, event_name: &str) -> i64 {
    lock_key(&["conversion", code, event_name])
}

fn digest(parts: &[&str]) -> impl std::fmt::LowerHex {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([FIELD_SEPARATOR as u8]);
        }
        hasher.update(part.as_bytes());
    }
    hasher.finalize()
}

fn lock_key(parts: &[&str]) -> i64 {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([FIELD_SEPARATOR as u8]);
    }
    let bytes = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&bytes[..8]);
    i64::from_be_bytes(head)
}

// ────────────────────────────────────────────────────────────────────────────
// Windows and verdicts
// ────────────────────────────────────────────────────────────────────────────

/// Start of the UTC day containing `now` (Check A horizon).
pub fn day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// Check A: an attempt for the same key exists today.
    AlreadyProcessed,
    /// Check B: a bot action for the same key exists inside the window.
    RecentBotAction { window_minutes: i64 },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::AlreadyProcessed => write!(f, "message already processed"),
            SkipReason::RecentBotAction { window_minutes } => {
                write!(f, "duplicate within {window_minutes}-minute window")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageVerdict {
    Process,
    Skip(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// The caller owns the processing of this message and must audit it.
    Reserved { attempt_id: Uuid },
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionVerdict {
    Proceed { claim_id: Uuid },
    Duplicate,
}

/// Check A takes priority over Check B.
pub fn reservation_skip(
    attempt_seen: bool,
    action_seen: bool,
    window_minutes: i64,
) -> Option<SkipReason> {
    if attempt_seen {
        Some(SkipReason::AlreadyProcessed)
    } else if action_seen {
        Some(SkipReason::RecentBotAction { window_minutes })
    } else {
        None
    }
}

/// Check C over an already-loaded ledger entry and claim lookup.
pub fn is_duplicate_conversion(
    entry: Option<&ConversionLedgerEntry>,
    event_name: &str,
    claim_seen: bool,
    since: DateTime<Utc>,
) -> bool {
    claim_seen || entry.is_some_and(|e| e.has_recent_event(event_name, since))
}

// ────────────────────────────────────────────────────────────────────────────
// Engine
// ────────────────────────────────────────────────────────────────────────────

/// Holds the two ledgers and the window. Cheap to clone; shared by all requests.
#[derive(Clone)]
pub struct DedupEngine {
    messages: Arc<dyn MessageLedger>,
    conversions: Arc<dyn ConversionStore>,
    window_minutes: i64,
}

impl DedupEngine {
    pub fn new(
        messages: Arc<dyn MessageLedger>,
        conversions: Arc<dyn ConversionStore>,
        window_minutes: i64,
    ) -> Self {
        Self {
            messages,
            conversions,
            window_minutes,
        }
    }

    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::minutes(self.window_minutes)
    }

    /// Check A horizon. An attempt reserved just before midnight has no bot
    /// action yet while its AI call runs, so the window must still cover it.
    pub fn attempts_since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        day_start(now).min(self.window_start(now))
    }

    /// Check A, read-only. Runs before any side effect of a message.
    pub async fn check_message(
        &self,
        key: &MessageKey,
        now: DateTime<Utc>,
    ) -> Result<MessageVerdict, sqlx::Error> {
        if self
            .messages
            .attempt_exists_since(key, self.attempts_since(now))
            .await?
        {
            return Ok(MessageVerdict::Skip(SkipReason::AlreadyProcessed));
        }
        Ok(MessageVerdict::Process)
    }

    /// Checks A and B again and records a processing attempt, atomically.
    pub async fn reserve_processing(
        &self,
        key: &MessageKey,
        now: DateTime<Utc>,
    ) -> Result<Reservation, sqlx::Error> {
        let reservation = self
            .messages
            .reserve_attempt(
                key,
                self.attempts_since(now),
                self.window_start(now),
                now,
                self.window_minutes,
            )
            .await?;
        if let Reservation::Skipped(reason) = reservation {
            tracing::info!(
                talk_id = %key.talk_id,
                lead_id = %key.lead_id,
                reason = %reason,
                "Skipping message reprocessing"
            );
        }
        Ok(reservation)
    }

    /// Check C, atomically claiming the send when it passes.
    pub async fn claim_conversion(
        &self,
        code: &str,
        kind: ConversionKind,
        event_name: &str,
        now: DateTime<Utc>,
    ) -> Result<ConversionVerdict, sqlx::Error> {
        let verdict = self
            .conversions
            .claim_send(code, event_name, self.window_start(now), now)
            .await?;
        if verdict == ConversionVerdict::Duplicate {
            tracing::info!(
                code,
                event_name,
                slot = kind.slot(),
                "Duplicate conversion suppressed"
            );
        }
        Ok(verdict)
    }
}
