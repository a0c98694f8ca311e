//! Read-only analytics over carts and the reminder log.
//!
//! Everything here is a pure function of the records handed in; the store
//! only selects the window.

use chrono::{DateTime, TimeDelta, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
  Error,
  Result,
  cart::Cart,
  lifecycle::{CartStatus, CartView, Thresholds, classify},
  reminder::{ReminderLogEntry, ReminderStatus},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
  pub active:    u64,
  pub stale:     u64,
  pub abandoned: u64,
  pub converted: u64,
}

impl StatusCounts {
  fn bump(&mut self, status: CartStatus) {
    match status {
      CartStatus::Active => self.active += 1,
      CartStatus::Stale => self.stale += 1,
      CartStatus::Abandoned => self.abandoned += 1,
      CartStatus::Converted => self.converted += 1,
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerSplit {
  pub guest:      u64,
  pub registered: u64,
}

/// Dashboard aggregates for one time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
  pub window_hours:            u32,
  pub since:                   DateTime<Utc>,
  pub generated_at:            DateTime<Utc>,
  pub total_carts:             u64,
  pub by_status:               StatusCounts,
  pub abandoned_value:         Decimal,
  pub average_abandoned_value: Decimal,
  /// Guest vs registered owners among abandoned carts.
  pub abandoned_by_owner:      OwnerSplit,
  /// `converted / (converted + abandoned)`; `0.0` when both are zero.
  pub conversion_rate:         f64,
  pub reminders_sent:          u64,
  pub reminders_blocked:       u64,
  pub delivery_failures:       u64,
  /// Converted carts that had received at least one reminder.
  pub recovered_carts:         u64,
  pub recovered_value:         Decimal,
}

/// Start of a window of `hours` ending at `now`.
pub fn window_start(hours: u32, now: DateTime<Utc>) -> DateTime<Utc> {
  now - TimeDelta::hours(i64::from(hours))
}

/// Aggregate `carts` (already restricted to the window) and the reminder
/// activity of the same window. Fails only if a value total overflows.
pub fn aggregate(
  carts: &[Cart],
  reminders: &[ReminderLogEntry],
  delivery_failures: u64,
  thresholds: &Thresholds,
  window_hours: u32,
  now: DateTime<Utc>,
) -> Result<AggregateStats> {
  let mut by_status = StatusCounts::default();
  let mut abandoned_value = Decimal::ZERO;
  let mut abandoned_by_owner = OwnerSplit::default();
  let mut recovered_carts = 0;
  let mut recovered_value = Decimal::ZERO;

  for cart in carts {
    let status = classify(cart, thresholds, now);
    by_status.bump(status);

    match status {
      CartStatus::Abandoned => {
        abandoned_value = add_value(abandoned_value, cart)?;
        if cart.owner.is_guest() {
          abandoned_by_owner.guest += 1;
        } else {
          abandoned_by_owner.registered += 1;
        }
      }
      CartStatus::Converted if cart.reminder_count > 0 => {
        recovered_carts += 1;
        recovered_value = add_value(recovered_value, cart)?;
      }
      _ => {}
    }
  }

  let average_abandoned_value = if by_status.abandoned == 0 {
    Decimal::ZERO
  } else {
    (abandoned_value / Decimal::from(by_status.abandoned)).round_dp(2)
  };

  let decided = by_status.converted + by_status.abandoned;
  let conversion_rate = if decided == 0 {
    0.0
  } else {
    by_status.converted as f64 / decided as f64
  };

  let count_status =
    |s: ReminderStatus| reminders.iter().filter(|r| r.status == s).count() as u64;

  Ok(AggregateStats {
    window_hours,
    since: window_start(window_hours, now),
    generated_at: now,
    total_carts: carts.len() as u64,
    by_status,
    abandoned_value,
    average_abandoned_value,
    abandoned_by_owner,
    conversion_rate,
    reminders_sent: count_status(ReminderStatus::Sent),
    reminders_blocked: count_status(ReminderStatus::Blocked),
    delivery_failures,
    recovered_carts,
    recovered_value,
  })
}

fn add_value(total: Decimal, cart: &Cart) -> Result<Decimal> {
  total
    .checked_add(cart.subtotal()?)
    .ok_or_else(|| Error::Validation("cart value total overflows".into()))
}

/// The abandoned carts among `carts`, most recently active first.
pub fn abandoned_carts(
  carts: Vec<Cart>,
  thresholds: &Thresholds,
  now: DateTime<Utc>,
) -> Result<Vec<CartView>> {
  let mut views = carts
    .into_iter()
    .filter(|cart| classify(cart, thresholds, now) == CartStatus::Abandoned)
    .map(|cart| CartView::new(cart, thresholds, now))
    .collect::<Result<Vec<_>>>()?;
  views.sort_by(|a, b| b.cart.last_activity_at.cmp(&a.cart.last_activity_at));
  Ok(views)
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;
  use uuid::Uuid;

  use super::*;
  use crate::{
    cart::{NewItem, Owner},
    policy::Tier,
  };

  fn now() -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 6, 1, 18, 0, 0).unwrap() }

  fn cart(owner: Owner, idle_minutes: i64, price_cents: i64) -> Cart {
    let at = now() - TimeDelta::minutes(idle_minutes);
    let mut cart = Cart::new(owner, at);
    cart
      .add_item(NewItem::new("pre-workout", 1, Decimal::new(price_cents, 2)), at)
      .unwrap();
    cart
  }

  fn guest() -> Owner { Owner::guest(Uuid::new_v4().simple().to_string()).unwrap() }

  fn user() -> Owner { Owner::User(Uuid::new_v4()) }

  fn entry(status: ReminderStatus) -> ReminderLogEntry {
    ReminderLogEntry {
      cart_id:    Uuid::new_v4(),
      tier:       Tier::from_minutes(60).unwrap(),
      template:   "reminder_1h".into(),
      status,
      consent:    None,
      claimed_at: now(),
      settled_at: None,
      detail:     None,
    }
  }

  #[test]
  fn aggregates_by_status_value_and_owner() {
    let th = Thresholds::default();

    let mut recovered = cart(user(), 300, 5000);
    recovered.reminder_count = 1;
    recovered.convert("order-1", now()).unwrap();

    let mut plain_converted = cart(guest(), 10, 2000);
    plain_converted.convert("order-2", now()).unwrap();

    let carts = vec![
      cart(user(), 5, 1000),    // active
      cart(guest(), 30, 1000),  // stale
      cart(guest(), 120, 3000), // abandoned
      cart(user(), 600, 4550),  // abandoned
      recovered,
      plain_converted,
    ];
    let reminders = vec![
      entry(ReminderStatus::Sent),
      entry(ReminderStatus::Sent),
      entry(ReminderStatus::Blocked),
      entry(ReminderStatus::Pending),
    ];

    let stats = aggregate(&carts, &reminders, 3, &th, 24, now()).unwrap();

    assert_eq!(stats.total_carts, 6);
    assert_eq!(stats.by_status, StatusCounts { active: 1, stale: 1, abandoned: 2, converted: 2 });
    assert_eq!(stats.abandoned_value, Decimal::new(7550, 2));
    assert_eq!(stats.average_abandoned_value, Decimal::new(3775, 2));
    assert_eq!(stats.abandoned_by_owner, OwnerSplit { guest: 1, registered: 1 });
    assert!((stats.conversion_rate - 0.5).abs() < f64::EPSILON);
    assert_eq!(stats.reminders_sent, 2);
    assert_eq!(stats.reminders_blocked, 1);
    assert_eq!(stats.delivery_failures, 3);
    assert_eq!(stats.recovered_carts, 1);
    assert_eq!(stats.recovered_value, Decimal::new(5000, 2));
    assert_eq!(stats.since, now() - TimeDelta::hours(24));
  }

  #[test]
  fn empty_window_has_zero_rates() {
    let stats = aggregate(&[], &[], 0, &Thresholds::default(), 48, now()).unwrap();
    assert_eq!(stats.total_carts, 0);
    assert_eq!(stats.conversion_rate, 0.0);
    assert_eq!(stats.average_abandoned_value, Decimal::ZERO);
  }

  #[test]
  fn abandoned_carts_sorted_most_recent_first() {
    let th = Thresholds::default();
    let older = cart(guest(), 900, 1000);
    let newer = cart(user(), 90, 1000);
    let active = cart(user(), 1, 1000);
    let (older_id, newer_id) = (older.cart_id, newer.cart_id);

    let views = abandoned_carts(vec![older, active, newer], &th, now()).unwrap();
    let ids: Vec<Uuid> = views.iter().map(|v| v.cart.cart_id).collect();
    assert_eq!(ids, [newer_id, older_id]);
  }
}
