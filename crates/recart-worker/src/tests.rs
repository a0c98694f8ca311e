//! End-to-end sweep tests against the in-memory SQLite store.

use std::sync::{
  Arc, Mutex,
  atomic::{AtomicBool, Ordering},
};

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use recart_core::{
  cart::{NewItem, Owner},
  mail::{EmailMessage, Mailer, TransportError},
  policy::LifecycleConfig,
  recovery::{self, Redemption},
  reminder::{ConsentState, Profile, ReminderStatus},
  store::{CartStore, ReminderQuery},
};
use recart_store_sqlite::SqliteStore;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::Sweeper;

// ─── Fixtures ────────────────────────────────────────────────────────────────

/// A shopper adding an item to `cart_id` at `at`, while an email is out.
struct ShopperActivity {
  store:   Arc<SqliteStore>,
  cart_id: Uuid,
  at:      DateTime<Utc>,
}

#[derive(Default)]
struct RecordingMailer {
  sent:   Mutex<Vec<EmailMessage>>,
  fail:   AtomicBool,
  during: Mutex<Option<ShopperActivity>>,
}

impl RecordingMailer {
  fn sent(&self) -> Vec<EmailMessage> { self.sent.lock().unwrap().clone() }

  fn set_failing(&self, fail: bool) { self.fail.store(fail, Ordering::SeqCst); }

  /// Run `activity` during the next send.
  fn during_next_send(&self, activity: ShopperActivity) {
    *self.during.lock().unwrap() = Some(activity);
  }
}

impl Mailer for RecordingMailer {
  async fn send_email<'a>(&'a self, message: &'a EmailMessage) -> Result<(), TransportError> {
    let activity = self.during.lock().unwrap().take();
    if let Some(a) = activity {
      a.store
        .add_item(a.cart_id, NewItem::new("creatine-500g", 1, Decimal::new(2499, 2)), a.at)
        .await
        .unwrap();
    }
    if self.fail.load(Ordering::SeqCst) {
      return Err(TransportError("connection refused".into()));
    }
    self.sent.lock().unwrap().push(message.clone());
    Ok(())
  }
}

struct Harness {
  store:   Arc<SqliteStore>,
  mailer:  Arc<RecordingMailer>,
  sweeper: Sweeper<SqliteStore, SqliteStore, RecordingMailer>,
}

async fn harness() -> Harness {
  let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
  let mailer = Arc::new(RecordingMailer::default());
  let sweeper = Sweeper::new(
    store.clone(),
    store.clone(),
    mailer.clone(),
    Arc::new(LifecycleConfig::default()),
    "https://shop.test/",
  );
  Harness { store, mailer, sweeper }
}

fn t0() -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap() }

fn mins(m: i64) -> DateTime<Utc> { t0() + TimeDelta::minutes(m) }

async fn abandoned_cart(h: &Harness, consent: ConsentState, email: Option<&str>) -> Uuid {
  cart_last_active(h, consent, email, t0()).await
}

async fn cart_last_active(
  h: &Harness,
  consent: ConsentState,
  email: Option<&str>,
  at: DateTime<Utc>,
) -> Uuid {
  let owner = Owner::User(Uuid::new_v4());
  h.store
    .save_profile(Profile {
      owner: owner.clone(),
      email: email.map(str::to_owned),
      consent,
      updated_at: at,
    })
    .await
    .unwrap();

  let cart = h.store.create_cart(owner, at).await.unwrap();
  h.store
    .add_item(
      cart.cart_id,
      NewItem::new("whey-2lb", 1, Decimal::new(3999, 2)).with_title("Whey Protein 2lb"),
      at,
    )
    .await
    .unwrap();
  cart.cart_id
}

async fn log_for(h: &Harness, cart_id: Uuid) -> Vec<recart_core::reminder::ReminderLogEntry> {
  h.store
    .reminder_log(&ReminderQuery { cart_id: Some(cart_id), ..Default::default() })
    .await
    .unwrap()
}

// ─── Schedule ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn tiers_fire_once_each_then_stop_at_cap() {
  let h = harness().await;
  let id = abandoned_cart(&h, ConsentState::Granted, Some("lifter@example.com")).await;

  let report = h.sweeper.sweep(mins(59)).await.unwrap();
  assert_eq!(report.sent, 0);

  let report = h.sweeper.sweep(mins(61)).await.unwrap();
  assert_eq!(report.sent, 1);
  let cart = h.store.get_cart(id).await.unwrap().unwrap();
  assert_eq!(cart.reminder_count, 1);
  assert_eq!(h.mailer.sent()[0].template, "reminder_1h");
  assert_eq!(h.mailer.sent()[0].to, "lifter@example.com");

  let report = h.sweeper.sweep(mins(1441)).await.unwrap();
  assert_eq!(report.sent, 1);
  let cart = h.store.get_cart(id).await.unwrap().unwrap();
  assert_eq!(cart.reminder_count, 2);
  assert_eq!(cart.last_reminder_at, Some(mins(1441)));
  assert_eq!(h.mailer.sent()[1].template, "reminder_24h");

  let report = h.sweeper.sweep(mins(5000)).await.unwrap();
  assert_eq!(report.sent, 0);
  assert_eq!(h.mailer.sent().len(), 2);

  let statuses: Vec<ReminderStatus> = log_for(&h, id).await.iter().map(|e| e.status).collect();
  assert_eq!(statuses, [ReminderStatus::Sent, ReminderStatus::Sent]);
}

#[tokio::test]
async fn repeated_sweeps_send_once() {
  let h = harness().await;
  abandoned_cart(&h, ConsentState::Granted, Some("a@example.com")).await;

  h.sweeper.sweep(mins(61)).await.unwrap();
  let second = h.sweeper.sweep(mins(62)).await.unwrap();

  assert_eq!(second.sent, 0);
  assert_eq!(second.skipped, 1);
  assert_eq!(h.mailer.sent().len(), 1);
}

#[tokio::test]
async fn concurrent_sweeps_send_once() {
  let h = harness().await;
  abandoned_cart(&h, ConsentState::Granted, Some("a@example.com")).await;

  let (a, b) = tokio::join!(h.sweeper.sweep(mins(61)), h.sweeper.sweep(mins(61)));
  assert_eq!(a.unwrap().sent + b.unwrap().sent, 1);
  assert_eq!(h.mailer.sent().len(), 1);
}

#[tokio::test]
async fn converted_carts_are_never_reminded() {
  let h = harness().await;
  let id = abandoned_cart(&h, ConsentState::Granted, Some("a@example.com")).await;
  h.store.mark_converted(id, "order-42".into(), mins(30)).await.unwrap();

  let report = h.sweeper.sweep(mins(2000)).await.unwrap();
  assert_eq!(report.candidates, 0);
  assert!(h.mailer.sent().is_empty());
  assert!(log_for(&h, id).await.is_empty());
}

#[tokio::test]
async fn stale_and_empty_carts_are_skipped() {
  let h = harness().await;
  let owner = Owner::User(Uuid::new_v4());
  h.store.create_cart(owner, t0()).await.unwrap();

  let report = h.sweeper.sweep(mins(2000)).await.unwrap();
  assert_eq!(report.candidates, 0);

  abandoned_cart(&h, ConsentState::Granted, Some("a@example.com")).await;
  let report = h.sweeper.sweep(mins(30)).await.unwrap();
  assert_eq!(report.candidates, 0);
}

#[tokio::test]
async fn activity_during_sweep_cancels_pending_reminder() {
  let h = harness().await;
  let first = cart_last_active(&h, ConsentState::Granted, Some("a@example.com"), t0()).await;
  let second = cart_last_active(&h, ConsentState::Granted, Some("b@example.com"), mins(1)).await;

  // The shopper comes back to the second cart while the first email is out.
  h.mailer.during_next_send(ShopperActivity {
    store:   h.store.clone(),
    cart_id: second,
    at:      mins(62),
  });

  let report = h.sweeper.sweep(mins(62)).await.unwrap();
  assert_eq!(report.candidates, 2);
  assert_eq!(report.sent, 1);
  assert_eq!(report.skipped, 1);

  let sent = h.mailer.sent();
  assert_eq!(sent.len(), 1);
  assert_eq!(sent[0].to, "a@example.com");
  assert_eq!(log_for(&h, first).await.len(), 1);
  assert!(log_for(&h, second).await.is_empty());
  assert_eq!(h.store.get_cart(second).await.unwrap().unwrap().reminder_count, 0);

  // An hour after the new activity the second cart is due again, with both lines.
  let report = h.sweeper.sweep(mins(123)).await.unwrap();
  assert_eq!(report.sent, 1);
  let sent = h.mailer.sent();
  let body = &sent[1].html_body;
  assert!(body.contains("Whey Protein 2lb"));
  assert!(body.contains("creatine-500g"));
}

#[tokio::test]
async fn oversized_price_never_reaches_the_sweep() {
  let h = harness().await;
  let id = abandoned_cart(&h, ConsentState::Granted, Some("a@example.com")).await;

  let huge = Decimal::from_scientific("5e28").unwrap();
  let err = h
    .store
    .add_item(id, NewItem::new("whey-2lb", 2, huge), t0())
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    recart_store_sqlite::Error::Core(recart_core::Error::Validation(_))
  ));

  let sweeper = h.sweeper;
  let report = tokio::spawn(async move { sweeper.sweep(mins(61)).await })
    .await
    .unwrap()
    .unwrap();
  assert_eq!(report.sent, 1);
  assert!(h.mailer.sent()[0].html_body.contains("$39.99"));
}

// ─── Consent ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn revoked_consent_blocks_without_sending() {
  let h = harness().await;
  let id = abandoned_cart(&h, ConsentState::Revoked, Some("a@example.com")).await;

  let report = h.sweeper.sweep(mins(61)).await.unwrap();
  assert_eq!(report.blocked, 1);
  assert!(h.mailer.sent().is_empty());

  let log = log_for(&h, id).await;
  assert_eq!(log.len(), 1);
  assert_eq!(log[0].status, ReminderStatus::Blocked);
  assert_eq!(log[0].consent, Some(ConsentState::Revoked));

  let cart = h.store.get_cart(id).await.unwrap().unwrap();
  assert_eq!(cart.reminder_count, 0);

  // The blocked slot is not retried.
  let again = h.sweeper.sweep(mins(90)).await.unwrap();
  assert_eq!(again.blocked, 0);
}

#[tokio::test]
async fn unknown_consent_and_missing_address_block() {
  let h = harness().await;
  let unknown = abandoned_cart(&h, ConsentState::Unknown, Some("a@example.com")).await;
  let no_email = abandoned_cart(&h, ConsentState::Granted, None).await;

  let report = h.sweeper.sweep(mins(61)).await.unwrap();
  assert_eq!(report.blocked, 2);
  assert!(h.mailer.sent().is_empty());
  assert_eq!(
    log_for(&h, no_email).await[0].detail.as_deref(),
    Some("blocked: no recipient address")
  );
  assert_eq!(log_for(&h, unknown).await[0].consent, Some(ConsentState::Unknown));
}

#[tokio::test]
async fn guest_without_profile_is_blocked() {
  let h = harness().await;
  let owner = Owner::guest("sess-abc123").unwrap();
  let cart = h.store.create_cart(owner, t0()).await.unwrap();
  h.store
    .add_item(cart.cart_id, NewItem::new("bcaa-300g", 1, Decimal::new(1999, 2)), t0())
    .await
    .unwrap();

  let report = h.sweeper.sweep(mins(61)).await.unwrap();
  assert_eq!(report.blocked, 1);
  assert!(h.mailer.sent().is_empty());
}

// ─── Failures ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn transport_failure_is_retried_next_sweep() {
  let h = harness().await;
  let id = abandoned_cart(&h, ConsentState::Granted, Some("a@example.com")).await;

  h.mailer.set_failing(true);
  let report = h.sweeper.sweep(mins(61)).await.unwrap();
  assert_eq!(report.failed, 1);
  assert!(log_for(&h, id).await.is_empty());
  assert_eq!(h.store.get_cart(id).await.unwrap().unwrap().reminder_count, 0);

  let failures = h.store.delivery_failures(t0()).await.unwrap();
  assert_eq!(failures.len(), 1);
  assert!(failures[0].error.contains("connection refused"));

  h.mailer.set_failing(false);
  let report = h.sweeper.sweep(mins(66)).await.unwrap();
  assert_eq!(report.sent, 1);
  assert_eq!(h.store.get_cart(id).await.unwrap().unwrap().reminder_count, 1);
}

// ─── Recovery link ───────────────────────────────────────────────────────────

#[tokio::test]
async fn emailed_link_redeems_to_the_cart() {
  let h = harness().await;
  let id = abandoned_cart(&h, ConsentState::Granted, Some("a@example.com")).await;
  h.sweeper.sweep(mins(61)).await.unwrap();

  let sent = h.mailer.sent();
  let body = &sent[0].html_body;
  let prefix = "https://shop.test/cart/recover/";
  let start = body.find(prefix).unwrap() + prefix.len();
  let raw: String = body[start..].chars().take_while(char::is_ascii_hexdigit).collect();
  assert_eq!(raw.len(), recovery::TOKEN_BYTES * 2);

  let hash = recovery::hash_token(&raw);
  let first = h.store.redeem_token(hash.clone(), mins(70)).await.unwrap();
  assert_eq!(first, Redemption::Redeemed { cart_id: id });
  let second = h.store.redeem_token(hash, mins(71)).await.unwrap();
  assert!(matches!(second, Redemption::AlreadyUsed { .. }));
}

// ─── Purge ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn purge_uses_retention_window() {
  let h = harness().await;
  let id = abandoned_cart(&h, ConsentState::Granted, Some("a@example.com")).await;

  assert_eq!(h.sweeper.purge(t0() + TimeDelta::days(29)).await.unwrap(), 0);
  assert_eq!(h.sweeper.purge(t0() + TimeDelta::days(31)).await.unwrap(), 1);
  assert!(h.store.get_cart(id).await.unwrap().is_none());
}
