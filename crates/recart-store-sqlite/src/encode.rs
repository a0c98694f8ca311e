//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings (microsecond
//! precision, `Z` suffix) so that lexical order in SQL matches
//! chronological order. Cart lines are stored as a JSON array.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use recart_core::{
  cart::{Cart, CartItem, Owner},
  policy::Tier,
  recovery::RecoveryToken,
  reminder::{ConsentState, DeliveryFailure, Profile, ReminderLogEntry, ReminderStatus},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
  s.as_deref().map(decode_dt).transpose()
}

pub fn decode_owner(key: &str) -> Result<Owner> {
  Owner::from_key(key).map_err(|e| Error::Decode(e.to_string()))
}

pub fn decode_tier(minutes: i64) -> Result<Tier> {
  u32::try_from(minutes)
    .ok()
    .and_then(|m| Tier::from_minutes(m).ok())
    .ok_or_else(|| Error::Decode(format!("invalid tier: {minutes}")))
}

fn decode_enum<T: FromStr>(what: &str, s: &str) -> Result<T> {
  T::from_str(s).map_err(|_| Error::Decode(format!("unknown {what}: {s:?}")))
}

pub fn encode_items(items: &[CartItem]) -> Result<String> {
  Ok(serde_json::to_string(items)?)
}

// ─── Raw rows ────────────────────────────────────────────────────────────────

pub const CART_COLUMNS: &str = "cart_id, owner_key, items_json, created_at, \
  last_activity_at, converted_order_ref, converted_at, reminder_count, \
  last_reminder_at";

/// Raw strings read directly from a `carts` row.
pub struct RawCart {
  pub cart_id:             String,
  pub owner_key:           String,
  pub items_json:          String,
  pub created_at:          String,
  pub last_activity_at:    String,
  pub converted_order_ref: Option<String>,
  pub converted_at:        Option<String>,
  pub reminder_count:      i64,
  pub last_reminder_at:    Option<String>,
}

impl RawCart {
  /// Read a row selected with [`CART_COLUMNS`].
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      cart_id:             row.get(0)?,
      owner_key:           row.get(1)?,
      items_json:          row.get(2)?,
      created_at:          row.get(3)?,
      last_activity_at:    row.get(4)?,
      converted_order_ref: row.get(5)?,
      converted_at:        row.get(6)?,
      reminder_count:      row.get(7)?,
      last_reminder_at:    row.get(8)?,
    })
  }

  pub fn into_cart(self) -> Result<Cart> {
    Ok(Cart {
      cart_id:             decode_uuid(&self.cart_id)?,
      owner:               decode_owner(&self.owner_key)?,
      items:               serde_json::from_str(&self.items_json)?,
      created_at:          decode_dt(&self.created_at)?,
      last_activity_at:    decode_dt(&self.last_activity_at)?,
      converted_order_ref: self.converted_order_ref,
      converted_at:        decode_opt_dt(self.converted_at)?,
      reminder_count:      u32::try_from(self.reminder_count)
        .map_err(|_| Error::Decode(format!("invalid reminder_count: {}", self.reminder_count)))?,
      last_reminder_at:    decode_opt_dt(self.last_reminder_at)?,
    })
  }
}

pub const LOG_COLUMNS: &str =
  "cart_id, tier_minutes, template, status, consent, claimed_at, settled_at, detail";

/// Raw strings read directly from a `reminder_log` row.
pub struct RawLogEntry {
  pub cart_id:      String,
  pub tier_minutes: i64,
  pub template:     String,
  pub status:       String,
  pub consent:      Option<String>,
  pub claimed_at:   String,
  pub settled_at:   Option<String>,
  pub detail:       Option<String>,
}

impl RawLogEntry {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      cart_id:      row.get(0)?,
      tier_minutes: row.get(1)?,
      template:     row.get(2)?,
      status:       row.get(3)?,
      consent:      row.get(4)?,
      claimed_at:   row.get(5)?,
      settled_at:   row.get(6)?,
      detail:       row.get(7)?,
    })
  }

  pub fn into_entry(self) -> Result<ReminderLogEntry> {
    Ok(ReminderLogEntry {
      cart_id:    decode_uuid(&self.cart_id)?,
      tier:       decode_tier(self.tier_minutes)?,
      template:   self.template,
      status:     decode_enum::<ReminderStatus>("reminder status", &self.status)?,
      consent:    self
        .consent
        .as_deref()
        .map(|c| decode_enum::<ConsentState>("consent state", c))
        .transpose()?,
      claimed_at: decode_dt(&self.claimed_at)?,
      settled_at: decode_opt_dt(self.settled_at)?,
      detail:     self.detail,
    })
  }
}

/// Raw strings read directly from a `recovery_tokens` row.
pub struct RawToken {
  pub token_hash:  String,
  pub cart_id:     String,
  pub issued_at:   String,
  pub expires_at:  String,
  pub consumed_at: Option<String>,
}

impl RawToken {
  pub fn into_token(self) -> Result<RecoveryToken> {
    Ok(RecoveryToken {
      token_hash:  self.token_hash,
      cart_id:     decode_uuid(&self.cart_id)?,
      issued_at:   decode_dt(&self.issued_at)?,
      expires_at:  decode_dt(&self.expires_at)?,
      consumed_at: decode_opt_dt(self.consumed_at)?,
    })
  }
}

/// Raw strings read directly from a `delivery_failures` row.
pub struct RawFailure {
  pub cart_id:      String,
  pub tier_minutes: i64,
  pub error:        String,
  pub failed_at:    String,
}

impl RawFailure {
  pub fn into_failure(self) -> Result<DeliveryFailure> {
    Ok(DeliveryFailure {
      cart_id:   decode_uuid(&self.cart_id)?,
      tier:      decode_tier(self.tier_minutes)?,
      error:     self.error,
      failed_at: decode_dt(&self.failed_at)?,
    })
  }
}

/// Raw strings read directly from a `profiles` row.
pub struct RawProfile {
  pub owner_key:  String,
  pub email:      Option<String>,
  pub consent:    String,
  pub updated_at: String,
}

impl RawProfile {
  pub fn into_profile(self) -> Result<Profile> {
    Ok(Profile {
      owner:      decode_owner(&self.owner_key)?,
      email:      self.email,
      consent:    decode_enum::<ConsentState>("consent state", &self.consent)?,
      updated_at: decode_dt(&self.updated_at)?,
    })
  }
}
