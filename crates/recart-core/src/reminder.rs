//! Reminder log records, consent state and owner profiles.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{cart::Owner, policy::Tier};

// ─── Consent ─────────────────────────────────────────────────────────────────

/// Marketing-email consent recorded against an owner's profile.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
  Hash,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConsentState {
  Granted,
  Revoked,
  #[default]
  Unknown,
}

impl ConsentState {
  pub fn permits_email(&self) -> bool { matches!(self, Self::Granted) }
}

/// Contact details and consent for an owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
  pub owner:      Owner,
  pub email:      Option<String>,
  pub consent:    ConsentState,
  pub updated_at: DateTime<Utc>,
}

// ─── Log entries ─────────────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReminderStatus {
  /// Claimed by a sweep that has not finished with it yet.
  Pending,
  Sent,
  /// Suppressed; `detail` says why.
  Blocked,
}

/// One row of the reminder log. At most one exists per `(cart_id, tier)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderLogEntry {
  pub cart_id:    Uuid,
  pub tier:       Tier,
  pub template:   String,
  pub status:     ReminderStatus,
  /// Consent observed when the entry was settled; `None` while pending.
  pub consent:    Option<ConsentState>,
  pub claimed_at: DateTime<Utc>,
  pub settled_at: Option<DateTime<Utc>>,
  pub detail:     Option<String>,
}

/// Why a due reminder was not sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "consent", rename_all = "snake_case")]
pub enum BlockReason {
  NoConsent(ConsentState),
  NoRecipient,
}

impl fmt::Display for BlockReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::NoConsent(state) => write!(f, "blocked: no consent ({state})"),
      Self::NoRecipient => f.write_str("blocked: no recipient address"),
    }
  }
}

/// How a claimed reminder was finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
  Sent,
  Blocked(BlockReason),
}

/// A transport failure, kept for observability. Failures never occupy the
/// `(cart_id, tier)` slot, so the next sweep retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryFailure {
  pub cart_id:   Uuid,
  pub tier:      Tier,
  pub error:     String,
  pub failed_at: DateTime<Utc>,
}
