//! The `CartStore` trait, the `ProfileDirectory` collaborator trait and
//! supporting query types.
//!
//! The traits are implemented by storage backends (e.g.
//! `recart-store-sqlite`). The reminder worker and the HTTP layer depend on
//! these abstractions, not on any concrete backend.

use std::future::Future;

use chrono::{DateTime, TimeDelta, Utc};
use uuid::Uuid;

use crate::{
  StoreError,
  cart::{Cart, NewItem, Owner},
  policy::Tier,
  recovery::{Redemption, RecoveryToken},
  reminder::{ConsentState, DeliveryFailure, Profile, ReminderLogEntry, Settlement},
};

// ─── Query / command types ───────────────────────────────────────────────────

/// Parameters for [`CartStore::claim_reminder`].
#[derive(Debug, Clone, Copy)]
pub struct ReminderClaim {
  pub cart_id:        Uuid,
  pub tier:           Tier,
  /// The claim fails if `reminder_count` plus in-flight claims would reach
  /// this.
  pub max_reminders:  u32,
  /// A `pending` claim older than this may be taken over.
  pub lease:          TimeDelta,
  /// The claim fails if the cart saw activity after this instant.
  pub inactive_since: DateTime<Utc>,
  pub at:             DateTime<Utc>,
}

/// Parameters for [`CartStore::reminder_log`].
#[derive(Debug, Clone, Default)]
pub struct ReminderQuery {
  pub cart_id: Option<Uuid>,
  /// Only entries claimed at or after this instant.
  pub since:   Option<DateTime<Utc>>,
  pub limit:   Option<usize>,
}

// ─── Cart store ──────────────────────────────────────────────────────────────

/// Abstraction over a cart store backend.
///
/// Every write that can race with a concurrent sweep or request is a single
/// conditional statement in the backend: claims rely on a uniqueness
/// constraint, token redemption on a guarded update, and counter increments
/// on a guarded update. No method takes a lock across the whole table.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait CartStore: Send + Sync {
  type Error: StoreError;

  // ── Carts ─────────────────────────────────────────────────────────────

  /// Create and persist an empty cart for `owner`.
  fn create_cart(
    &self,
    owner: Owner,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<Cart, Self::Error>> + Send + '_;

  /// Retrieve a cart by UUID. Returns `None` if not found.
  fn get_cart(
    &self,
    cart_id: Uuid,
  ) -> impl Future<Output = Result<Option<Cart>, Self::Error>> + Send + '_;

  /// The most recently active unconverted cart of `owner`, if any.
  fn find_open_cart<'a>(
    &'a self,
    owner: &'a Owner,
  ) -> impl Future<Output = Result<Option<Cart>, Self::Error>> + Send + 'a;

  /// Add a validated item. See [`Cart::add_item`].
  fn add_item(
    &self,
    cart_id: Uuid,
    item: NewItem,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<Cart, Self::Error>> + Send + '_;

  /// Set a line's quantity; `0` removes the line.
  fn set_quantity(
    &self,
    cart_id: Uuid,
    product_ref: String,
    quantity: u32,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<Cart, Self::Error>> + Send + '_;

  fn remove_item(
    &self,
    cart_id: Uuid,
    product_ref: String,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<Cart, Self::Error>> + Send + '_;

  /// Merge a guest cart into `user_id`'s open cart on login, or re-own it if
  /// the user has none. Either way the survivor's `last_activity_at` becomes
  /// `at`. Returns the surviving cart.
  fn merge_guest_cart(
    &self,
    guest_cart_id: Uuid,
    user_id: Uuid,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<Cart, Self::Error>> + Send + '_;

  /// Record that checkout converted the cart. Idempotent for the same
  /// `order_ref`.
  fn mark_converted(
    &self,
    cart_id: Uuid,
    order_ref: String,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<Cart, Self::Error>> + Send + '_;

  /// Delete unconverted carts idle since before `before`, together with
  /// their tokens and reminder records. Returns the number of carts removed.
  fn purge_inactive(
    &self,
    before: DateTime<Utc>,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  // ── Scans ─────────────────────────────────────────────────────────────

  /// Unconverted, non-empty carts whose last activity is at or before
  /// `inactive_since`.
  fn reminder_candidates(
    &self,
    inactive_since: DateTime<Utc>,
  ) -> impl Future<Output = Result<Vec<Cart>, Self::Error>> + Send + '_;

  /// All carts with activity at or after `since`, most recent first.
  fn carts_active_since(
    &self,
    since: DateTime<Utc>,
  ) -> impl Future<Output = Result<Vec<Cart>, Self::Error>> + Send + '_;

  // ── Recovery tokens ───────────────────────────────────────────────────

  fn insert_token(
    &self,
    token: RecoveryToken,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Consume the token with digest `token_hash`. The check and the write
  /// are one conditional update; of any number of concurrent callers at
  /// most one observes `Redeemed`.
  fn redeem_token(
    &self,
    token_hash: String,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<Redemption, Self::Error>> + Send + '_;

  // ── Reminder log ──────────────────────────────────────────────────────

  /// Reserve `(cart_id, tier)` with a `pending` entry. Returns `false` when
  /// an entry already exists, the cart is converted or missing, was active
  /// after `inactive_since`, or the cap would be exceeded.
  fn claim_reminder(
    &self,
    claim: ReminderClaim,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Finish a claim. On [`Settlement::Sent`] the cart's `reminder_count`
  /// is incremented (never past `max_reminders`) and `last_reminder_at`
  /// set.
  fn settle_reminder(
    &self,
    cart_id: Uuid,
    tier: Tier,
    consent: ConsentState,
    settlement: Settlement,
    max_reminders: u32,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Drop a claim after a failed send and record the failure. Leaves no log
  /// entry behind, so the next sweep retries.
  fn release_reminder(
    &self,
    cart_id: Uuid,
    tier: Tier,
    error: String,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn reminder_log<'a>(
    &'a self,
    query: &'a ReminderQuery,
  ) -> impl Future<Output = Result<Vec<ReminderLogEntry>, Self::Error>> + Send + 'a;

  fn delivery_failures(
    &self,
    since: DateTime<Utc>,
  ) -> impl Future<Output = Result<Vec<DeliveryFailure>, Self::Error>> + Send + '_;

  // ── Profiles ──────────────────────────────────────────────────────────

  /// Insert or replace the profile of `profile.owner`.
  fn save_profile(
    &self,
    profile: Profile,
  ) -> impl Future<Output = Result<Profile, Self::Error>> + Send + '_;

  fn get_profile<'a>(
    &'a self,
    owner: &'a Owner,
  ) -> impl Future<Output = Result<Option<Profile>, Self::Error>> + Send + 'a;
}

// ─── Profile directory ───────────────────────────────────────────────────────

/// The user/consent profile collaborator consulted before any reminder is
/// sent.
pub trait ProfileDirectory: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// `Unknown` when the owner has no profile.
  fn consent_state<'a>(
    &'a self,
    owner: &'a Owner,
  ) -> impl Future<Output = Result<ConsentState, Self::Error>> + Send + 'a;

  fn recipient_email<'a>(
    &'a self,
    owner: &'a Owner,
  ) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send + 'a;
}
