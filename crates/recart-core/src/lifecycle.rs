//! Cart lifecycle classification.
//!
//! Status is never stored. It is computed from `last_activity_at`, the
//! conversion marker and the current time, so a cart drifts from `active`
//! to `stale` to `abandoned` purely by the passage of time.

use chrono::{DateTime, TimeDelta, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Error, Result, cart::Cart};

// ─── Status ──────────────────────────────────────────────────────────────────

/// The derived lifecycle status of a cart. Variant order follows the
/// lifecycle, so `Ord` can be used to check that status only moves forward.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CartStatus {
  Active,
  Stale,
  Abandoned,
  /// Terminal; overrides every time-based status.
  Converted,
}

// ─── Thresholds ──────────────────────────────────────────────────────────────

/// Inactivity thresholds separating `active`, `stale` and `abandoned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
  stale:     TimeDelta,
  abandoned: TimeDelta,
}

impl Thresholds {
  /// Both thresholds must be positive and `stale < abandoned`.
  pub fn new(stale: TimeDelta, abandoned: TimeDelta) -> Result<Self> {
    if stale <= TimeDelta::zero() {
      return Err(Error::InvalidConfig("stale threshold must be positive".into()));
    }
    if abandoned <= stale {
      return Err(Error::InvalidConfig(format!(
        "abandoned threshold ({} min) must exceed stale threshold ({} min)",
        abandoned.num_minutes(),
        stale.num_minutes()
      )));
    }
    Ok(Self { stale, abandoned })
  }

  pub fn from_minutes(stale: u32, abandoned: u32) -> Result<Self> {
    Self::new(
      TimeDelta::minutes(i64::from(stale)),
      TimeDelta::minutes(i64::from(abandoned)),
    )
  }

  pub fn stale(&self) -> TimeDelta { self.stale }

  pub fn abandoned(&self) -> TimeDelta { self.abandoned }
}

impl Default for Thresholds {
  fn default() -> Self {
    Self { stale: TimeDelta::minutes(15), abandoned: TimeDelta::minutes(60) }
  }
}

// ─── Classifier ──────────────────────────────────────────────────────────────

/// Classify from raw parts. Pure; no side effects.
///
/// A `last_activity_at` in the future (clock skew between writers) counts
/// as zero elapsed time, i.e. `active`.
pub fn classify_parts(
  last_activity_at: DateTime<Utc>,
  converted: bool,
  thresholds: &Thresholds,
  now: DateTime<Utc>,
) -> CartStatus {
  if converted {
    return CartStatus::Converted;
  }
  let elapsed = now - last_activity_at;
  if elapsed < thresholds.stale {
    CartStatus::Active
  } else if elapsed < thresholds.abandoned {
    CartStatus::Stale
  } else {
    CartStatus::Abandoned
  }
}

/// Classify `cart` as of `now`.
pub fn classify(cart: &Cart, thresholds: &Thresholds, now: DateTime<Utc>) -> CartStatus {
  classify_parts(cart.last_activity_at, cart.is_converted(), thresholds, now)
}

// ─── Materialised view ───────────────────────────────────────────────────────

/// A cart bundled with its status, computed at `as_of`. Never stored,
/// always derived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartView {
  #[serde(flatten)]
  pub cart:     Cart,
  pub status:   CartStatus,
  pub subtotal: Decimal,
  pub as_of:    DateTime<Utc>,
}

impl CartView {
  pub fn new(cart: Cart, thresholds: &Thresholds, as_of: DateTime<Utc>) -> Result<Self> {
    let status = classify(&cart, thresholds, as_of);
    let subtotal = cart.subtotal()?;
    Ok(Self { cart, status, subtotal, as_of })
  }
}
