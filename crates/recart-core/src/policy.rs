//! Lifecycle policy: thresholds, the reminder schedule and the limits that
//! govern the reminder pipeline.
//!
//! [`LifecycleSettings`] is the raw, deserialisable form (all minutes and
//! hours as plain integers, the schedule as a comma-separated string).
//! [`LifecycleConfig`] is the validated form everything else consumes.

use std::fmt;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::{Error, Result, lifecycle::Thresholds};

// ─── Tier ────────────────────────────────────────────────────────────────────

/// One reminder tier: an offset from the cart's last activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Tier {
  minutes: u32,
}

impl TryFrom<u32> for Tier {
  type Error = Error;

  fn try_from(minutes: u32) -> Result<Self> { Self::from_minutes(minutes) }
}

impl From<Tier> for u32 {
  fn from(tier: Tier) -> Self { tier.minutes }
}

impl Tier {
  pub fn from_minutes(minutes: u32) -> Result<Self> {
    if minutes == 0 {
      return Err(Error::InvalidConfig("reminder tier offset must be positive".into()));
    }
    Ok(Self { minutes })
  }

  pub fn minutes(&self) -> u32 { self.minutes }

  pub fn offset(&self) -> TimeDelta { TimeDelta::minutes(i64::from(self.minutes)) }

  /// Template name for this tier, e.g. `reminder_1h`, `reminder_24h`,
  /// `reminder_90m`.
  pub fn template(&self) -> String { format!("reminder_{self}") }
}

impl fmt::Display for Tier {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.minutes % 60 == 0 {
      write!(f, "{}h", self.minutes / 60)
    } else {
      write!(f, "{}m", self.minutes)
    }
  }
}

/// Where a tier sits in the schedule; picks the email copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierPosition {
  First,
  Middle,
  Last,
}

// ─── Schedule ────────────────────────────────────────────────────────────────

/// Ordered reminder tiers. Offsets are absolute, measured from
/// `last_activity_at`, not from the previous reminder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderSchedule {
  tiers: Vec<Tier>,
}

impl ReminderSchedule {
  /// Build from offsets in minutes. Offsets are sorted; duplicates and
  /// zeros are rejected.
  pub fn from_minutes(minutes: impl IntoIterator<Item = u32>) -> Result<Self> {
    let mut tiers = minutes
      .into_iter()
      .map(Tier::from_minutes)
      .collect::<Result<Vec<_>>>()?;
    if tiers.is_empty() {
      return Err(Error::InvalidConfig("reminder schedule must not be empty".into()));
    }
    tiers.sort();
    if let Some(pair) = tiers.windows(2).find(|w| w[0] == w[1]) {
      return Err(Error::InvalidConfig(format!(
        "reminder schedule lists {} more than once",
        pair[0].minutes()
      )));
    }
    Ok(Self { tiers })
  }

  /// Parse a comma-separated list of minute offsets, e.g. `"60,1440"`.
  pub fn parse(list: &str) -> Result<Self> {
    let minutes = list
      .split(',')
      .map(str::trim)
      .map(|part| {
        part.parse::<u32>().map_err(|_| {
          Error::InvalidConfig(format!("invalid reminder offset {part:?} in {list:?}"))
        })
      })
      .collect::<Result<Vec<_>>>()?;
    Self::from_minutes(minutes)
  }

  pub fn tiers(&self) -> &[Tier] { &self.tiers }

  pub fn len(&self) -> usize { self.tiers.len() }

  pub fn is_empty(&self) -> bool { self.tiers.is_empty() }

  /// The latest tier whose offset has elapsed, with its index.
  pub fn latest_due(&self, elapsed: TimeDelta) -> Option<(usize, Tier)> {
    self
      .tiers
      .iter()
      .copied()
      .enumerate()
      .rev()
      .find(|(_, tier)| tier.offset() <= elapsed)
  }

  pub fn position(&self, index: usize) -> TierPosition {
    if index + 1 >= self.tiers.len() {
      TierPosition::Last
    } else if index == 0 {
      TierPosition::First
    } else {
      TierPosition::Middle
    }
  }
}

impl fmt::Display for ReminderSchedule {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let parts: Vec<String> = self.tiers.iter().map(|t| t.minutes().to_string()).collect();
    f.write_str(&parts.join(","))
  }
}

// ─── Settings (raw) ──────────────────────────────────────────────────────────

/// Raw lifecycle settings, as read from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleSettings {
  pub stale_threshold_minutes:     u32,
  pub abandoned_threshold_minutes: u32,
  /// Comma-separated minute offsets, e.g. `"60,1440"`.
  pub reminder_schedule_minutes:   String,
  pub max_reminders:               u32,
  pub recovery_token_ttl_hours:    u32,
  /// How long a `pending` reminder claim is honoured before another sweep
  /// may take it over.
  pub claim_lease_minutes:         u32,
  pub retention_days:              u32,
}

impl Default for LifecycleSettings {
  fn default() -> Self {
    Self {
      stale_threshold_minutes:     15,
      abandoned_threshold_minutes: 60,
      reminder_schedule_minutes:   "60,1440".into(),
      max_reminders:               2,
      recovery_token_ttl_hours:    24 * 7,
      claim_lease_minutes:         15,
      retention_days:              30,
    }
  }
}

// ─── Config (validated) ──────────────────────────────────────────────────────

/// Validated lifecycle policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleConfig {
  pub thresholds:    Thresholds,
  pub schedule:      ReminderSchedule,
  pub max_reminders: u32,
  pub token_ttl:     TimeDelta,
  pub claim_lease:   TimeDelta,
  pub retention:     TimeDelta,
}

impl TryFrom<&LifecycleSettings> for LifecycleConfig {
  type Error = Error;

  fn try_from(s: &LifecycleSettings) -> Result<Self> {
    let thresholds =
      Thresholds::from_minutes(s.stale_threshold_minutes, s.abandoned_threshold_minutes)?;
    let schedule = ReminderSchedule::parse(&s.reminder_schedule_minutes)?;

    if s.max_reminders == 0 {
      return Err(Error::InvalidConfig("max_reminders must be at least 1".into()));
    }
    for (name, value) in [
      ("recovery_token_ttl_hours", s.recovery_token_ttl_hours),
      ("claim_lease_minutes", s.claim_lease_minutes),
      ("retention_days", s.retention_days),
    ] {
      if value == 0 {
        return Err(Error::InvalidConfig(format!("{name} must be positive")));
      }
    }

    Ok(Self {
      thresholds,
      schedule,
      max_reminders: s.max_reminders,
      token_ttl: TimeDelta::hours(i64::from(s.recovery_token_ttl_hours)),
      claim_lease: TimeDelta::minutes(i64::from(s.claim_lease_minutes)),
      retention: TimeDelta::days(i64::from(s.retention_days)),
    })
  }
}

impl Default for LifecycleConfig {
  fn default() -> Self {
    Self {
      thresholds:    Thresholds::default(),
      schedule:      ReminderSchedule { tiers: vec![Tier { minutes: 60 }, Tier { minutes: 1440 }] },
      max_reminders: 2,
      token_ttl:     TimeDelta::days(7),
      claim_lease:   TimeDelta::minutes(15),
      retention:     TimeDelta::days(30),
    }
  }
}
