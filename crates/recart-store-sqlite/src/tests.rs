//! Integration tests for `SqliteStore` against an in-memory database.

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use recart_core::{
  cart::{NewItem, Owner},
  policy::Tier,
  recovery::{self, Redemption},
  reminder::{BlockReason, ConsentState, Profile, ReminderStatus, Settlement},
  store::{CartStore, ProfileDirectory, ReminderClaim, ReminderQuery},
};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{Error, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn t0() -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap() }

fn mins(m: i64) -> DateTime<Utc> { t0() + TimeDelta::minutes(m) }

fn guest() -> Owner { Owner::guest(Uuid::new_v4().simple().to_string()).unwrap() }

fn tier(minutes: u32) -> Tier { Tier::from_minutes(minutes).unwrap() }

fn whey(quantity: u32) -> NewItem {
  NewItem::new("whey-2lb", quantity, Decimal::new(3999, 2)).with_title("Whey Protein 2lb")
}

fn claim(cart_id: Uuid, minutes: u32, at: DateTime<Utc>) -> ReminderClaim {
  ReminderClaim {
    cart_id,
    tier: tier(minutes),
    max_reminders: 2,
    lease: TimeDelta::minutes(15),
    inactive_since: at - TimeDelta::minutes(60),
    at,
  }
}

async fn cart_with_item(s: &SqliteStore, owner: Owner) -> Uuid {
  let cart = s.create_cart(owner, t0()).await.unwrap();
  s.add_item(cart.cart_id, whey(1), t0()).await.unwrap();
  cart.cart_id
}

// ─── Carts ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_and_get_cart() {
  let s = store().await;
  let owner = guest();

  let cart = s.create_cart(owner.clone(), t0()).await.unwrap();
  let fetched = s.get_cart(cart.cart_id).await.unwrap().unwrap();
  assert_eq!(fetched, cart);
  assert_eq!(fetched.owner, owner);
  assert!(fetched.is_empty());
}

#[tokio::test]
async fn get_cart_missing_returns_none() {
  let s = store().await;
  assert!(s.get_cart(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn item_mutations_persist_and_touch_activity() {
  let s = store().await;
  let cart = s.create_cart(guest(), t0()).await.unwrap();

  s.add_item(cart.cart_id, whey(1), mins(1)).await.unwrap();
  s.add_item(cart.cart_id, whey(2), mins(2)).await.unwrap();
  s.add_item(
    cart.cart_id,
    NewItem::new("creatine-500g", 1, Decimal::new(2499, 2)),
    mins(3),
  )
  .await
  .unwrap();

  let fetched = s.get_cart(cart.cart_id).await.unwrap().unwrap();
  assert_eq!(fetched.items.len(), 2);
  assert_eq!(fetched.items[0].quantity, 3);
  assert_eq!(fetched.last_activity_at, mins(3));
  assert_eq!(fetched.subtotal().unwrap(), Decimal::new(3999 * 3 + 2499, 2));

  s.set_quantity(cart.cart_id, "whey-2lb".into(), 0, mins(4)).await.unwrap();
  let after = s
    .remove_item(cart.cart_id, "creatine-500g".into(), mins(5))
    .await
    .unwrap();
  assert!(after.is_empty());
  assert_eq!(after.last_activity_at, mins(5));
}

#[tokio::test]
async fn invalid_item_is_rejected_without_writing() {
  let s = store().await;
  let cart = s.create_cart(guest(), t0()).await.unwrap();

  let err = s.add_item(cart.cart_id, whey(0), mins(1)).await.unwrap_err();
  assert!(matches!(err, Error::Core(recart_core::Error::Validation(_))));

  let fetched = s.get_cart(cart.cart_id).await.unwrap().unwrap();
  assert_eq!(fetched.last_activity_at, t0());
}

#[tokio::test]
async fn mutating_missing_cart_is_not_found() {
  let s = store().await;
  let err = s.add_item(Uuid::new_v4(), whey(1), t0()).await.unwrap_err();
  assert!(matches!(err, Error::Core(recart_core::Error::CartNotFound(_))));
}

#[tokio::test]
async fn converted_cart_is_terminal() {
  let s = store().await;
  let id = cart_with_item(&s, guest()).await;

  let converted = s.mark_converted(id, "order-1".into(), mins(10)).await.unwrap();
  assert_eq!(converted.converted_order_ref.as_deref(), Some("order-1"));

  // Same order ref again is a no-op; a different one is refused.
  assert!(s.mark_converted(id, "order-1".into(), mins(11)).await.is_ok());
  let err = s.mark_converted(id, "order-2".into(), mins(12)).await.unwrap_err();
  assert!(matches!(err, Error::Core(recart_core::Error::CartConverted(_))));

  let err = s.add_item(id, whey(1), mins(13)).await.unwrap_err();
  assert!(matches!(err, Error::Core(recart_core::Error::CartConverted(_))));
}

#[tokio::test]
async fn find_open_cart_skips_converted() {
  let s = store().await;
  let owner = Owner::User(Uuid::new_v4());

  let old = cart_with_item(&s, owner.clone()).await;
  s.mark_converted(old, "order-9".into(), mins(1)).await.unwrap();
  assert!(s.find_open_cart(&owner).await.unwrap().is_none());

  let fresh = s.create_cart(owner.clone(), mins(2)).await.unwrap();
  let found = s.find_open_cart(&owner).await.unwrap().unwrap();
  assert_eq!(found.cart_id, fresh.cart_id);
}

// ─── Merge ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn merge_folds_guest_lines_into_user_cart() {
  let s = store().await;
  let user_id = Uuid::new_v4();

  let user_cart = cart_with_item(&s, Owner::User(user_id)).await;
  let guest_cart = s.create_cart(guest(), t0()).await.unwrap().cart_id;
  s.add_item(guest_cart, whey(2), mins(1)).await.unwrap();
  s.add_item(
    guest_cart,
    NewItem::new("bcaa-300g", 1, Decimal::new(1999, 2)),
    mins(1),
  )
  .await
  .unwrap();

  let merged = s.merge_guest_cart(guest_cart, user_id, mins(5)).await.unwrap();
  assert_eq!(merged.cart_id, user_cart);
  assert_eq!(merged.items.len(), 2);
  assert_eq!(merged.items[0].quantity, 3);
  assert_eq!(merged.last_activity_at, mins(5));

  assert!(s.get_cart(guest_cart).await.unwrap().is_none());
}

#[tokio::test]
async fn merge_reowns_guest_cart_when_user_has_none() {
  let s = store().await;
  let user_id = Uuid::new_v4();
  let guest_cart = cart_with_item(&s, guest()).await;

  s.add_item(guest_cart, whey(1), mins(10)).await.unwrap();

  let merged = s.merge_guest_cart(guest_cart, user_id, mins(5)).await.unwrap();
  assert_eq!(merged.cart_id, guest_cart);
  assert_eq!(merged.owner, Owner::User(user_id));
  assert_eq!(merged.last_activity_at, mins(5));
  let stored = s.get_cart(guest_cart).await.unwrap().unwrap();
  assert_eq!(stored.last_activity_at, mins(5));

  // Merging again for the same user is a no-op.
  let again = s.merge_guest_cart(guest_cart, user_id, mins(6)).await.unwrap();
  assert_eq!(again.last_activity_at, mins(5));

  let err = s
    .merge_guest_cart(guest_cart, Uuid::new_v4(), mins(7))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Core(recart_core::Error::Validation(_))));
}

// ─── Scans and purge ─────────────────────────────────────────────────────────

#[tokio::test]
async fn reminder_candidates_exclude_empty_converted_and_recent() {
  let s = store().await;

  let idle = cart_with_item(&s, guest()).await;
  let _empty = s.create_cart(guest(), t0()).await.unwrap();
  let converted = cart_with_item(&s, guest()).await;
  s.mark_converted(converted, "order-3".into(), t0()).await.unwrap();
  let recent = s.create_cart(guest(), mins(100)).await.unwrap().cart_id;
  s.add_item(recent, whey(1), mins(100)).await.unwrap();

  let candidates = s.reminder_candidates(mins(60)).await.unwrap();
  let ids: Vec<Uuid> = candidates.iter().map(|c| c.cart_id).collect();
  assert_eq!(ids, [idle]);

  let active = s.carts_active_since(mins(-1)).await.unwrap();
  assert_eq!(active.len(), 4);
  assert_eq!(active[0].cart_id, recent);
}

#[tokio::test]
async fn purge_removes_old_unconverted_carts_and_their_records() {
  let s = store().await;
  let old = cart_with_item(&s, guest()).await;
  let kept = cart_with_item(&s, guest()).await;
  s.mark_converted(kept, "order-4".into(), t0()).await.unwrap();

  assert!(s.claim_reminder(claim(old, 60, mins(61))).await.unwrap());
  let issued = recovery::issue(old, mins(61), TimeDelta::hours(1));
  s.insert_token(issued.record.clone()).await.unwrap();

  let removed = s.purge_inactive(mins(60 * 24 * 31)).await.unwrap();
  assert_eq!(removed, 1);
  assert!(s.get_cart(old).await.unwrap().is_none());
  assert!(s.get_cart(kept).await.unwrap().is_some());

  let log = s.reminder_log(&ReminderQuery::default()).await.unwrap();
  assert!(log.is_empty());
  let outcome = s.redeem_token(issued.record.token_hash, mins(62)).await.unwrap();
  assert_eq!(outcome, Redemption::NotFound);
}

// ─── Recovery tokens ─────────────────────────────────────────────────────────

#[tokio::test]
async fn token_redeems_once_then_reports_used() {
  let s = store().await;
  let id = cart_with_item(&s, guest()).await;
  let issued = recovery::issue(id, t0(), TimeDelta::hours(168));
  s.insert_token(issued.record).await.unwrap();

  let hash = recovery::hash_token(&issued.raw);
  let first = s.redeem_token(hash.clone(), mins(30)).await.unwrap();
  assert_eq!(first, Redemption::Redeemed { cart_id: id });

  let second = s.redeem_token(hash, mins(31)).await.unwrap();
  assert_eq!(second, Redemption::AlreadyUsed { consumed_at: mins(30) });
}

#[tokio::test]
async fn token_outcomes_are_distinct() {
  let s = store().await;
  let id = cart_with_item(&s, guest()).await;
  let issued = recovery::issue(id, t0(), TimeDelta::hours(1));
  s.insert_token(issued.record.clone()).await.unwrap();

  let unknown = s.redeem_token(recovery::hash_token("nope"), mins(1)).await.unwrap();
  assert_eq!(unknown, Redemption::NotFound);

  // Valid through the expiry instant itself.
  let hash = issued.record.token_hash.clone();
  let expired = s.redeem_token(hash.clone(), mins(61)).await.unwrap();
  assert_eq!(expired, Redemption::Expired { expired_at: mins(60) });

  let at_expiry = s.redeem_token(hash, mins(60)).await.unwrap();
  assert_eq!(at_expiry, Redemption::Redeemed { cart_id: id });
}

#[tokio::test]
async fn concurrent_redemptions_have_exactly_one_winner() {
  let s = store().await;
  let id = cart_with_item(&s, guest()).await;
  let issued = recovery::issue(id, t0(), TimeDelta::hours(168));
  s.insert_token(issued.record).await.unwrap();
  let hash = recovery::hash_token(&issued.raw);

  let mut set = tokio::task::JoinSet::new();
  for _ in 0..50 {
    let s = s.clone();
    let hash = hash.clone();
    set.spawn(async move { s.redeem_token(hash, mins(5)).await.unwrap() });
  }

  let mut redeemed = 0;
  let mut used = 0;
  while let Some(outcome) = set.join_next().await {
    match outcome.unwrap() {
      Redemption::Redeemed { cart_id } => {
        assert_eq!(cart_id, id);
        redeemed += 1;
      }
      Redemption::AlreadyUsed { .. } => used += 1,
      other => panic!("unexpected outcome: {other:?}"),
    }
  }
  assert_eq!((redeemed, used), (1, 49));
}

// ─── Reminder log ────────────────────────────────────────────────────────────

#[tokio::test]
async fn claim_is_unique_per_cart_and_tier() {
  let s = store().await;
  let id = cart_with_item(&s, guest()).await;

  assert!(s.claim_reminder(claim(id, 60, mins(61))).await.unwrap());
  assert!(!s.claim_reminder(claim(id, 60, mins(62))).await.unwrap());

  s.settle_reminder(id, tier(60), ConsentState::Granted, Settlement::Sent, 2, mins(62))
    .await
    .unwrap();
  assert!(!s.claim_reminder(claim(id, 60, mins(200))).await.unwrap());

  let cart = s.get_cart(id).await.unwrap().unwrap();
  assert_eq!(cart.reminder_count, 1);
  assert_eq!(cart.last_reminder_at, Some(mins(62)));
}

#[tokio::test]
async fn concurrent_claims_have_exactly_one_winner() {
  let s = store().await;
  let id = cart_with_item(&s, guest()).await;

  let mut set = tokio::task::JoinSet::new();
  for _ in 0..20 {
    let s = s.clone();
    set.spawn(async move { s.claim_reminder(claim(id, 60, mins(61))).await.unwrap() });
  }

  let mut won = 0;
  while let Some(result) = set.join_next().await {
    if result.unwrap() {
      won += 1;
    }
  }
  assert_eq!(won, 1);
}

#[tokio::test]
async fn claim_respects_cap_and_conversion() {
  let s = store().await;
  let id = cart_with_item(&s, guest()).await;

  for (minutes, at) in [(60, mins(61)), (1440, mins(1441))] {
    assert!(s.claim_reminder(claim(id, minutes, at)).await.unwrap());
    s.settle_reminder(id, tier(minutes), ConsentState::Granted, Settlement::Sent, 2, at)
      .await
      .unwrap();
  }
  // A third tier exists in the log space but the cap is reached.
  assert!(!s.claim_reminder(claim(id, 4320, mins(4321))).await.unwrap());

  let other = cart_with_item(&s, guest()).await;
  s.mark_converted(other, "order-5".into(), mins(1)).await.unwrap();
  assert!(!s.claim_reminder(claim(other, 60, mins(61))).await.unwrap());
}

#[tokio::test]
async fn claim_fails_after_recent_activity() {
  let s = store().await;
  let id = cart_with_item(&s, guest()).await;
  s.add_item(id, whey(1), mins(61)).await.unwrap();

  assert!(!s.claim_reminder(claim(id, 60, mins(62))).await.unwrap());
  assert!(s.claim_reminder(claim(id, 60, mins(121))).await.unwrap());
}

#[tokio::test]
async fn pending_claims_count_towards_cap() {
  let s = store().await;
  let id = cart_with_item(&s, guest()).await;
  let one = ReminderClaim { max_reminders: 1, ..claim(id, 60, mins(61)) };
  let two = ReminderClaim { max_reminders: 1, ..claim(id, 1440, mins(1441)) };

  assert!(s.claim_reminder(one).await.unwrap());
  assert!(!s.claim_reminder(two).await.unwrap());
}

#[tokio::test]
async fn stale_pending_claim_can_be_taken_over() {
  let s = store().await;
  let id = cart_with_item(&s, guest()).await;

  assert!(s.claim_reminder(claim(id, 60, mins(61))).await.unwrap());
  assert!(!s.claim_reminder(claim(id, 60, mins(70))).await.unwrap());
  assert!(s.claim_reminder(claim(id, 60, mins(80))).await.unwrap());
}

#[tokio::test]
async fn blocked_settlement_occupies_slot_without_counting() {
  let s = store().await;
  let id = cart_with_item(&s, guest()).await;

  assert!(s.claim_reminder(claim(id, 60, mins(61))).await.unwrap());
  s.settle_reminder(
    id,
    tier(60),
    ConsentState::Revoked,
    Settlement::Blocked(BlockReason::NoConsent(ConsentState::Revoked)),
    2,
    mins(61),
  )
  .await
  .unwrap();

  let cart = s.get_cart(id).await.unwrap().unwrap();
  assert_eq!(cart.reminder_count, 0);

  let log = s
    .reminder_log(&ReminderQuery { cart_id: Some(id), ..Default::default() })
    .await
    .unwrap();
  assert_eq!(log.len(), 1);
  assert_eq!(log[0].status, ReminderStatus::Blocked);
  assert_eq!(log[0].consent, Some(ConsentState::Revoked));
  assert_eq!(log[0].detail.as_deref(), Some("blocked: no consent (revoked)"));
  assert_eq!(log[0].template, "reminder_1h");

  assert!(!s.claim_reminder(claim(id, 60, mins(500))).await.unwrap());
}

#[tokio::test]
async fn released_claim_leaves_failure_and_allows_retry() {
  let s = store().await;
  let id = cart_with_item(&s, guest()).await;

  assert!(s.claim_reminder(claim(id, 60, mins(61))).await.unwrap());
  s.release_reminder(id, tier(60), "smtp timeout".into(), mins(61))
    .await
    .unwrap();

  let log = s.reminder_log(&ReminderQuery::default()).await.unwrap();
  assert!(log.is_empty());

  let failures = s.delivery_failures(t0()).await.unwrap();
  assert_eq!(failures.len(), 1);
  assert_eq!(failures[0].error, "smtp timeout");
  assert_eq!(failures[0].tier, tier(60));

  assert!(s.claim_reminder(claim(id, 60, mins(66))).await.unwrap());
}

#[tokio::test]
async fn reminder_log_filters_by_window_and_limit() {
  let s = store().await;
  let a = cart_with_item(&s, guest()).await;
  let b = cart_with_item(&s, guest()).await;

  s.claim_reminder(claim(a, 60, mins(61))).await.unwrap();
  s.claim_reminder(claim(b, 60, mins(90))).await.unwrap();

  let recent = s
    .reminder_log(&ReminderQuery { since: Some(mins(80)), ..Default::default() })
    .await
    .unwrap();
  assert_eq!(recent.len(), 1);
  assert_eq!(recent[0].cart_id, b);
  assert_eq!(recent[0].status, ReminderStatus::Pending);

  let limited = s
    .reminder_log(&ReminderQuery { limit: Some(1), ..Default::default() })
    .await
    .unwrap();
  assert_eq!(limited.len(), 1);
  assert_eq!(limited[0].cart_id, b);

  let unbounded = s
    .reminder_log(&ReminderQuery { limit: Some(usize::MAX), ..Default::default() })
    .await
    .unwrap();
  assert_eq!(unbounded.len(), 2);
}

// ─── Profiles ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn profiles_upsert_and_feed_directory() {
  let s = store().await;
  let owner = Owner::User(Uuid::new_v4());

  assert_eq!(s.consent_state(&owner).await.unwrap(), ConsentState::Unknown);
  assert!(s.recipient_email(&owner).await.unwrap().is_none());

  s.save_profile(Profile {
    owner:      owner.clone(),
    email:      Some("lifter@example.com".into()),
    consent:    ConsentState::Granted,
    updated_at: t0(),
  })
  .await
  .unwrap();
  assert_eq!(s.consent_state(&owner).await.unwrap(), ConsentState::Granted);

  s.save_profile(Profile {
    owner:      owner.clone(),
    email:      Some("lifter@example.com".into()),
    consent:    ConsentState::Revoked,
    updated_at: mins(1),
  })
  .await
  .unwrap();

  let profile = s.get_profile(&owner).await.unwrap().unwrap();
  assert_eq!(profile.consent, ConsentState::Revoked);
  assert_eq!(profile.updated_at, mins(1));
  assert_eq!(
    s.recipient_email(&owner).await.unwrap().as_deref(),
    Some("lifter@example.com")
  );
}
