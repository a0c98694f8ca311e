//! Recovery tokens: single-use, time-bounded credentials that let a reminder
//! email deep-link back into a pre-filled cart.
//!
//! Only the SHA-256 digest of a token is ever stored. The raw value exists in
//! the email link and nowhere else.

use chrono::{DateTime, TimeDelta, Utc};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Number of random bytes in a raw token (hex-encoded to twice as many
/// characters).
pub const TOKEN_BYTES: usize = 32;

/// A stored recovery token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryToken {
  /// Lowercase hex SHA-256 of the raw token.
  pub token_hash:  String,
  pub cart_id:     Uuid,
  pub issued_at:   DateTime<Utc>,
  pub expires_at:  DateTime<Utc>,
  /// Set by the first successful redemption; the token is dead afterwards.
  pub consumed_at: Option<DateTime<Utc>>,
}

impl RecoveryToken {
  /// Why this token cannot be redeemed at `now`, or `Redeemed` if it can.
  ///
  /// Expiry is checked before consumption, so an expired token that was
  /// also used reports `Expired`.
  pub fn evaluate(&self, now: DateTime<Utc>) -> Redemption {
    if now > self.expires_at {
      Redemption::Expired { expired_at: self.expires_at }
    } else if let Some(consumed_at) = self.consumed_at {
      Redemption::AlreadyUsed { consumed_at }
    } else {
      Redemption::Redeemed { cart_id: self.cart_id }
    }
  }
}

/// A freshly issued token: the raw value for the link plus the record to
/// persist.
#[derive(Debug, Clone)]
pub struct IssuedToken {
  pub raw:    String,
  pub record: RecoveryToken,
}

/// The outcome of a redemption attempt. Each failure is distinct so the
/// storefront can say "link expired" rather than "link already used".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Redemption {
  Redeemed { cart_id: Uuid },
  NotFound,
  Expired { expired_at: DateTime<Utc> },
  /// Also what the loser of a concurrent redemption race receives.
  AlreadyUsed { consumed_at: DateTime<Utc> },
}

/// SHA-256 of `raw`, lowercase hex.
pub fn hash_token(raw: &str) -> String {
  hex::encode(Sha256::digest(raw.as_bytes()))
}

/// Generate a new token for `cart_id`, valid for `ttl` from `now`.
pub fn issue(cart_id: Uuid, now: DateTime<Utc>, ttl: TimeDelta) -> IssuedToken {
  let mut bytes = [0u8; TOKEN_BYTES];
  OsRng.fill_bytes(&mut bytes);
  let raw = hex::encode(bytes);

  IssuedToken {
    record: RecoveryToken {
      token_hash: hash_token(&raw),
      cart_id,
      issued_at: now,
      expires_at: now + ttl,
      consumed_at: None,
    },
    raw,
  }
}
