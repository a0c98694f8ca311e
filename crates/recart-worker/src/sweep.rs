//! One pass over the abandoned carts.
//!
//! A sweep is safe to run concurrently with itself: each `(cart, tier)` is
//! claimed in the store before anything is sent, and only the claimant
//! proceeds.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use recart_core::{
  cart::Cart,
  lifecycle::{CartStatus, classify},
  mail::Mailer,
  policy::{LifecycleConfig, Tier},
  reminder::{ConsentState, Settlement},
  store::{CartStore, ProfileDirectory, ReminderClaim},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::dispatch::{Delivery, Dispatcher};

/// Counts from one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
  pub ran_at:     DateTime<Utc>,
  /// Carts inactive past the abandonment threshold.
  pub candidates: u32,
  pub sent:       u32,
  pub blocked:    u32,
  /// Transport or lookup failures; retried next sweep.
  pub failed:     u32,
  /// Nothing due, cap reached, or another sweep holds the claim.
  pub skipped:    u32,
  /// Store errors while handling a single cart.
  pub errors:     u32,
}

enum Outcome {
  Skipped,
  Sent,
  Blocked,
  Failed,
}

/// Drives reminders for every abandoned cart that has one due.
pub struct Sweeper<S, P, M> {
  store:      Arc<S>,
  dispatcher: Dispatcher<S, P, M>,
  config:     Arc<LifecycleConfig>,
}

impl<S, P, M> Sweeper<S, P, M>
where
  S: CartStore,
  P: ProfileDirectory,
  M: Mailer,
{
  pub fn new(
    store: Arc<S>,
    profiles: Arc<P>,
    mailer: Arc<M>,
    config: Arc<LifecycleConfig>,
    public_base_url: impl Into<String>,
  ) -> Self {
    let dispatcher =
      Dispatcher::new(store.clone(), profiles, mailer, config.clone(), public_base_url);
    Self { store, dispatcher, config }
  }

  pub fn config(&self) -> &LifecycleConfig { &self.config }

  /// Run one sweep as of `now`. Only the candidate scan can fail the sweep;
  /// errors on individual carts are logged and counted.
  pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, S::Error> {
    let cutoff = now - self.config.thresholds.abandoned();
    let candidates = self.store.reminder_candidates(cutoff).await?;

    let mut report = SweepReport {
      ran_at: now,
      candidates: u32::try_from(candidates.len()).unwrap_or(u32::MAX),
      ..Default::default()
    };

    for cart in &candidates {
      match self.process(cart, now).await {
        Ok(Outcome::Skipped) => report.skipped += 1,
        Ok(Outcome::Sent) => report.sent += 1,
        Ok(Outcome::Blocked) => report.blocked += 1,
        Ok(Outcome::Failed) => report.failed += 1,
        Err(e) => {
          error!(cart_id = %cart.cart_id, error = %e, "reminder processing failed");
          report.errors += 1;
        }
      }
    }

    info!(
      candidates = report.candidates,
      sent = report.sent,
      blocked = report.blocked,
      failed = report.failed,
      skipped = report.skipped,
      errors = report.errors,
      "reminder sweep finished"
    );
    Ok(report)
  }

  /// Delete unconverted carts idle for longer than the retention window.
  pub async fn purge(&self, now: DateTime<Utc>) -> Result<u64, S::Error> {
    let removed = self.store.purge_inactive(now - self.config.retention).await?;
    if removed > 0 {
      info!(removed, "purged inactive carts");
    }
    Ok(removed)
  }

  /// The tier to attempt for `cart` at `now`, if any.
  fn due_tier(&self, cart: &Cart, now: DateTime<Utc>) -> Option<(usize, Tier)> {
    if cart.is_converted() || cart.is_empty() {
      return None;
    }
    if classify(cart, &self.config.thresholds, now) != CartStatus::Abandoned {
      return None;
    }
    if cart.reminder_count >= self.config.max_reminders {
      return None;
    }
    self.config.schedule.latest_due(now - cart.last_activity_at)
  }

  /// `candidate` comes from the scan at the start of the sweep and may be
  /// out of date by now. The claim re-checks inactivity in the store, and
  /// the email is rendered from the cart as reloaded after the claim.
  async fn process(&self, candidate: &Cart, now: DateTime<Utc>) -> Result<Outcome, S::Error> {
    let Some((_, tier)) = self.due_tier(candidate, now) else {
      return Ok(Outcome::Skipped);
    };

    let claimed = self
      .store
      .claim_reminder(ReminderClaim {
        cart_id: candidate.cart_id,
        tier,
        max_reminders: self.config.max_reminders,
        lease: self.config.claim_lease,
        inactive_since: now - self.config.thresholds.abandoned(),
        at: now,
      })
      .await?;
    if !claimed {
      debug!(cart_id = %candidate.cart_id, %tier, "reminder not claimable");
      return Ok(Outcome::Skipped);
    }

    let current = self.store.get_cart(candidate.cart_id).await?;
    let Some((fresh, index)) = current.and_then(|cart| {
      let (index, due) = self.due_tier(&cart, now)?;
      (due == tier).then_some((cart, index))
    }) else {
      debug!(cart_id = %candidate.cart_id, %tier, "cart changed after claim");
      self
        .store
        .release_reminder(candidate.cart_id, tier, "cart changed before send".into(), now)
        .await?;
      return Ok(Outcome::Skipped);
    };
    let cart = &fresh;

    let delivery = self.dispatcher.deliver(cart, index, tier, now).await;
    let consent = delivery.consent().unwrap_or(ConsentState::Unknown);

    match delivery {
      Delivery::Sent { recipient, expires_at } => {
        self.settle(cart, tier, consent, Settlement::Sent, now).await?;
        info!(
          cart_id = %cart.cart_id,
          %tier,
          %recipient,
          %expires_at,
          "recovery reminder sent"
        );
        Ok(Outcome::Sent)
      }
      Delivery::Blocked(reason) => {
        self.settle(cart, tier, consent, Settlement::Blocked(reason), now).await?;
        info!(cart_id = %cart.cart_id, %tier, %reason, "recovery reminder suppressed");
        Ok(Outcome::Blocked)
      }
      Delivery::Failed(e) => {
        warn!(cart_id = %cart.cart_id, %tier, error = %e, "recovery reminder failed");
        self
          .store
          .release_reminder(cart.cart_id, tier, e.to_string(), now)
          .await?;
        Ok(Outcome::Failed)
      }
    }
  }

  async fn settle(
    &self,
    cart: &Cart,
    tier: Tier,
    consent: ConsentState,
    settlement: Settlement,
    now: DateTime<Utc>,
  ) -> Result<(), S::Error> {
    self
      .store
      .settle_reminder(cart.cart_id, tier, consent, settlement, self.config.max_reminders, now)
      .await
  }
}
