//! [`SqliteStore`], the SQLite implementation of [`CartStore`].

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension as _, TransactionBehavior};
use uuid::Uuid;

use recart_core::{
  cart::{Cart, NewItem, Owner},
  policy::Tier,
  recovery::{Redemption, RecoveryToken},
  reminder::{ConsentState, DeliveryFailure, Profile, ReminderLogEntry, Settlement},
  store::{CartStore, ProfileDirectory, ReminderClaim, ReminderQuery},
};

use crate::{
  Error, Result,
  encode::{
    CART_COLUMNS, LOG_COLUMNS, RawCart, RawFailure, RawLogEntry, RawProfile, RawToken,
    encode_dt, encode_items, encode_uuid,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A recart store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Load a cart, apply `mutate` and write it back, all inside one immediate
  /// transaction. Reminder bookkeeping columns are never written here.
  async fn mutate_cart<F>(&self, cart_id: Uuid, mutate: F) -> Result<Cart>
  where
    F: FnOnce(&mut Cart) -> recart_core::Result<()> + Send + 'static,
  {
    self
      .conn
      .call(move |conn| Ok(apply_mutation(conn, cart_id, mutate)))
      .await?
  }

  async fn query_carts(&self, sql: String, bound: String) -> Result<Vec<Cart>> {
    let raws: Vec<RawCart> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params![bound], RawCart::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawCart::into_cart).collect()
  }
}

// ─── Synchronous helpers (run on the connection thread) ──────────────────────

fn load_cart(conn: &rusqlite::Connection, cart_id: Uuid) -> Result<Option<Cart>> {
  let raw = conn
    .query_row(
      &format!("SELECT {CART_COLUMNS} FROM carts WHERE cart_id = ?1"),
      rusqlite::params![encode_uuid(cart_id)],
      RawCart::from_row,
    )
    .optional()?;
  raw.map(RawCart::into_cart).transpose()
}

fn require_cart(conn: &rusqlite::Connection, cart_id: Uuid) -> Result<Cart> {
  load_cart(conn, cart_id)?
    .ok_or(Error::Core(recart_core::Error::CartNotFound(cart_id)))
}

/// Write the shopper-owned columns of `cart`.
fn write_cart(conn: &rusqlite::Connection, cart: &Cart) -> Result<()> {
  conn.execute(
    "UPDATE carts
        SET owner_key = ?2, items_json = ?3, item_count = ?4,
            last_activity_at = ?5, converted_order_ref = ?6, converted_at = ?7
      WHERE cart_id = ?1",
    rusqlite::params![
      encode_uuid(cart.cart_id),
      cart.owner.key(),
      encode_items(&cart.items)?,
      cart.items.len() as i64,
      encode_dt(cart.last_activity_at),
      cart.converted_order_ref,
      cart.converted_at.map(encode_dt),
    ],
  )?;
  Ok(())
}

fn apply_mutation<F>(conn: &mut rusqlite::Connection, cart_id: Uuid, mutate: F) -> Result<Cart>
where
  F: FnOnce(&mut Cart) -> recart_core::Result<()>,
{
  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
  let mut cart = require_cart(&tx, cart_id)?;
  mutate(&mut cart)?;
  write_cart(&tx, &cart)?;
  tx.commit()?;
  Ok(cart)
}

fn merge_in_tx(
  conn: &mut rusqlite::Connection,
  guest_cart_id: Uuid,
  user_id: Uuid,
  at: DateTime<Utc>,
) -> Result<Cart> {
  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
  let mut guest = require_cart(&tx, guest_cart_id)?;
  let user = Owner::User(user_id);

  if let Owner::User(owner_id) = guest.owner {
    if owner_id == user_id {
      return Ok(guest);
    }
    return Err(Error::Core(recart_core::Error::Validation(format!(
      "cart {guest_cart_id} belongs to another user"
    ))));
  }
  guest.ensure_open()?;

  let existing = tx
    .query_row(
      &format!(
        "SELECT {CART_COLUMNS} FROM carts
          WHERE owner_key = ?1 AND converted_order_ref IS NULL AND cart_id != ?2
          ORDER BY last_activity_at DESC LIMIT 1"
      ),
      rusqlite::params![user.key(), encode_uuid(guest_cart_id)],
      RawCart::from_row,
    )
    .optional()?
    .map(RawCart::into_cart)
    .transpose()?;

  let survivor = match existing {
    Some(mut target) => {
      target.absorb(std::mem::take(&mut guest.items), at)?;
      write_cart(&tx, &target)?;
      tx.execute(
        "DELETE FROM carts WHERE cart_id = ?1",
        rusqlite::params![encode_uuid(guest_cart_id)],
      )?;
      target
    }
    None => {
      guest.owner = user;
      guest.last_activity_at = at;
      write_cart(&tx, &guest)?;
      guest
    }
  };

  tx.commit()?;
  Ok(survivor)
}

// ─── CartStore impl ──────────────────────────────────────────────────────────

impl CartStore for SqliteStore {
  type Error = Error;

  // ── Carts ─────────────────────────────────────────────────────────────────

  async fn create_cart(&self, owner: Owner, at: DateTime<Utc>) -> Result<Cart> {
    let cart = Cart::new(owner, at);

    let id_str = encode_uuid(cart.cart_id);
    let owner_key = cart.owner.key();
    let at_str = encode_dt(at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO carts (cart_id, owner_key, created_at, last_activity_at)
           VALUES (?1, ?2, ?3, ?3)",
          rusqlite::params![id_str, owner_key, at_str],
        )?;
        Ok(())
      })
      .await?;

    Ok(cart)
  }

  async fn get_cart(&self, cart_id: Uuid) -> Result<Option<Cart>> {
    self
      .conn
      .call(move |conn| Ok(load_cart(conn, cart_id)))
      .await?
  }

  async fn find_open_cart<'a>(&'a self, owner: &'a Owner) -> Result<Option<Cart>> {
    let key = owner.key();

    let raw: Option<RawCart> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {CART_COLUMNS} FROM carts
                  WHERE owner_key = ?1 AND converted_order_ref IS NULL
                  ORDER BY last_activity_at DESC LIMIT 1"
              ),
              rusqlite::params![key],
              RawCart::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawCart::into_cart).transpose()
  }

  async fn add_item(&self, cart_id: Uuid, item: NewItem, at: DateTime<Utc>) -> Result<Cart> {
    self
      .mutate_cart(cart_id, move |cart| cart.add_item(item, at))
      .await
  }

  async fn set_quantity(
    &self,
    cart_id: Uuid,
    product_ref: String,
    quantity: u32,
    at: DateTime<Utc>,
  ) -> Result<Cart> {
    self
      .mutate_cart(cart_id, move |cart| cart.set_quantity(&product_ref, quantity, at))
      .await
  }

  async fn remove_item(
    &self,
    cart_id: Uuid,
    product_ref: String,
    at: DateTime<Utc>,
  ) -> Result<Cart> {
    self
      .mutate_cart(cart_id, move |cart| cart.remove_item(&product_ref, at))
      .await
  }

  async fn merge_guest_cart(
    &self,
    guest_cart_id: Uuid,
    user_id: Uuid,
    at: DateTime<Utc>,
  ) -> Result<Cart> {
    self
      .conn
      .call(move |conn| Ok(merge_in_tx(conn, guest_cart_id, user_id, at)))
      .await?
  }

  async fn mark_converted(
    &self,
    cart_id: Uuid,
    order_ref: String,
    at: DateTime<Utc>,
  ) -> Result<Cart> {
    self
      .mutate_cart(cart_id, move |cart| cart.convert(&order_ref, at))
      .await
  }

  async fn purge_inactive(&self, before: DateTime<Utc>) -> Result<u64> {
    let before_str = encode_dt(before);

    let removed = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let removed = tx.execute(
          "DELETE FROM carts
            WHERE converted_order_ref IS NULL AND last_activity_at < ?1",
          rusqlite::params![before_str],
        )?;
        tx.execute(
          "DELETE FROM recovery_tokens WHERE expires_at < ?1",
          rusqlite::params![before_str],
        )?;
        tx.commit()?;
        Ok(removed)
      })
      .await?;

    Ok(removed as u64)
  }

  // ── Scans ─────────────────────────────────────────────────────────────────

  async fn reminder_candidates(&self, inactive_since: DateTime<Utc>) -> Result<Vec<Cart>> {
    self
      .query_carts(
        format!(
          "SELECT {CART_COLUMNS} FROM carts
            WHERE converted_order_ref IS NULL AND item_count > 0
              AND last_activity_at <= ?1
            ORDER BY last_activity_at ASC"
        ),
        encode_dt(inactive_since),
      )
      .await
  }

  async fn carts_active_since(&self, since: DateTime<Utc>) -> Result<Vec<Cart>> {
    self
      .query_carts(
        format!(
          "SELECT {CART_COLUMNS} FROM carts
            WHERE last_activity_at >= ?1
            ORDER BY last_activity_at DESC"
        ),
        encode_dt(since),
      )
      .await
  }

  // ── Recovery tokens ───────────────────────────────────────────────────────

  async fn insert_token(&self, token: RecoveryToken) -> Result<()> {
    let cart_id = encode_uuid(token.cart_id);
    let issued_at = encode_dt(token.issued_at);
    let expires_at = encode_dt(token.expires_at);
    let consumed_at = token.consumed_at.map(encode_dt);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO recovery_tokens
             (token_hash, cart_id, issued_at, expires_at, consumed_at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![token.token_hash, cart_id, issued_at, expires_at, consumed_at],
        )?;
        Ok(())
      })
      .await?;

    Ok(())
  }

  async fn redeem_token(&self, token_hash: String, at: DateTime<Utc>) -> Result<Redemption> {
    let at_str = encode_dt(at);

    let (redeemed, raw): (Option<String>, Option<RawToken>) = self
      .conn
      .call(move |conn| {
        let redeemed: Option<String> = conn
          .query_row(
            "UPDATE recovery_tokens
                SET consumed_at = ?2
              WHERE token_hash = ?1 AND consumed_at IS NULL AND expires_at >= ?2
             RETURNING cart_id",
            rusqlite::params![token_hash, at_str],
            |r| r.get(0),
          )
          .optional()?;

        if redeemed.is_some() {
          return Ok((redeemed, None));
        }

        let raw = conn
          .query_row(
            "SELECT token_hash, cart_id, issued_at, expires_at, consumed_at
               FROM recovery_tokens WHERE token_hash = ?1",
            rusqlite::params![token_hash],
            |row| {
              Ok(RawToken {
                token_hash:  row.get(0)?,
                cart_id:     row.get(1)?,
                issued_at:   row.get(2)?,
                expires_at:  row.get(3)?,
                consumed_at: row.get(4)?,
              })
            },
          )
          .optional()?;
        Ok((None, raw))
      })
      .await?;

    if let Some(cart_id) = redeemed {
      return Ok(Redemption::Redeemed { cart_id: Uuid::parse_str(&cart_id)? });
    }

    let Some(raw) = raw else {
      return Ok(Redemption::NotFound);
    };
    let token = raw.into_token()?;
    Ok(match token.evaluate(at) {
      // The guarded update lost; someone else consumed it in between.
      Redemption::Redeemed { .. } => Redemption::AlreadyUsed {
        consumed_at: token.consumed_at.unwrap_or(at),
      },
      outcome => outcome,
    })
  }

  // ── Reminder log ──────────────────────────────────────────────────────────

  async fn claim_reminder(&self, claim: ReminderClaim) -> Result<bool> {
    let cart_id = encode_uuid(claim.cart_id);
    let tier = i64::from(claim.tier.minutes());
    let template = claim.tier.template();
    let at = encode_dt(claim.at);
    let stale_before = encode_dt(claim.at - claim.lease);
    let max = i64::from(claim.max_reminders);
    let inactive_since = encode_dt(claim.inactive_since);

    let inserted = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        // A pending claim past its lease belongs to a worker that died.
        tx.execute(
          "DELETE FROM reminder_log
            WHERE cart_id = ?1 AND tier_minutes = ?2
              AND status = 'pending' AND claimed_at < ?3",
          rusqlite::params![cart_id, tier, stale_before],
        )?;

        let inserted = tx.execute(
          "INSERT OR IGNORE INTO reminder_log
             (cart_id, tier_minutes, template, status, claimed_at)
           SELECT ?1, ?2, ?3, 'pending', ?4
            WHERE EXISTS (
              SELECT 1 FROM carts c
               WHERE c.cart_id = ?1
                 AND c.converted_order_ref IS NULL
                 AND c.last_activity_at <= ?6
                 AND c.reminder_count + (
                       SELECT COUNT(*) FROM reminder_log p
                        WHERE p.cart_id = ?1 AND p.status = 'pending'
                     ) < ?5
            )",
          rusqlite::params![cart_id, tier, template, at, max, inactive_since],
        )?;

        tx.commit()?;
        Ok(inserted)
      })
      .await?;

    Ok(inserted == 1)
  }

  async fn settle_reminder(
    &self,
    cart_id: Uuid,
    tier: Tier,
    consent: ConsentState,
    settlement: Settlement,
    max_reminders: u32,
    at: DateTime<Utc>,
  ) -> Result<()> {
    let cart_id = encode_uuid(cart_id);
    let tier = i64::from(tier.minutes());
    let consent = consent.as_ref().to_owned();
    let at = encode_dt(at);
    let max = i64::from(max_reminders);

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        match settlement {
          Settlement::Sent => {
            let settled = tx.execute(
              "UPDATE reminder_log
                  SET status = 'sent', consent = ?3, settled_at = ?4
                WHERE cart_id = ?1 AND tier_minutes = ?2 AND status = 'pending'",
              rusqlite::params![cart_id, tier, consent, at],
            )?;
            if settled == 1 {
              tx.execute(
                "UPDATE carts
                    SET reminder_count = reminder_count + 1, last_reminder_at = ?2
                  WHERE cart_id = ?1 AND reminder_count < ?3
                    AND converted_order_ref IS NULL",
                rusqlite::params![cart_id, at, max],
              )?;
            }
          }
          Settlement::Blocked(reason) => {
            tx.execute(
              "UPDATE reminder_log
                  SET status = 'blocked', consent = ?3, settled_at = ?4, detail = ?5
                WHERE cart_id = ?1 AND tier_minutes = ?2 AND status = 'pending'",
              rusqlite::params![cart_id, tier, consent, at, reason.to_string()],
            )?;
          }
        }

        tx.commit()?;
        Ok(())
      })
      .await?;

    Ok(())
  }

  async fn release_reminder(
    &self,
    cart_id: Uuid,
    tier: Tier,
    error: String,
    at: DateTime<Utc>,
  ) -> Result<()> {
    let cart_id = encode_uuid(cart_id);
    let tier = i64::from(tier.minutes());
    let at = encode_dt(at);

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
          "DELETE FROM reminder_log
            WHERE cart_id = ?1 AND tier_minutes = ?2 AND status = 'pending'",
          rusqlite::params![cart_id, tier],
        )?;
        tx.execute(
          "INSERT INTO delivery_failures (cart_id, tier_minutes, error, failed_at)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![cart_id, tier, error, at],
        )?;
        tx.commit()?;
        Ok(())
      })
      .await?;

    Ok(())
  }

  async fn reminder_log<'a>(&'a self, query: &'a ReminderQuery) -> Result<Vec<ReminderLogEntry>> {
    let cart_id = query.cart_id.map(encode_uuid);
    let since = query.since.map(encode_dt);
    let limit = query.limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));

    let raws: Vec<RawLogEntry> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {LOG_COLUMNS} FROM reminder_log
            WHERE (?1 IS NULL OR cart_id = ?1)
              AND (?2 IS NULL OR claimed_at >= ?2)
            ORDER BY claimed_at DESC, tier_minutes DESC
            LIMIT ?3"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![cart_id, since, limit], RawLogEntry::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawLogEntry::into_entry).collect()
  }

  async fn delivery_failures(&self, since: DateTime<Utc>) -> Result<Vec<DeliveryFailure>> {
    let since = encode_dt(since);

    let raws: Vec<RawFailure> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT cart_id, tier_minutes, error, failed_at FROM delivery_failures
            WHERE failed_at >= ?1
            ORDER BY failed_at DESC",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![since], |row| {
            Ok(RawFailure {
              cart_id:      row.get(0)?,
              tier_minutes: row.get(1)?,
              error:        row.get(2)?,
              failed_at:    row.get(3)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawFailure::into_failure).collect()
  }

  // ── Profiles ──────────────────────────────────────────────────────────────

  async fn save_profile(&self, profile: Profile) -> Result<Profile> {
    let owner_key = profile.owner.key();
    let email = profile.email.clone();
    let consent = profile.consent.as_ref().to_owned();
    let updated_at = encode_dt(profile.updated_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO profiles (owner_key, email, consent, updated_at)
           VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT(owner_key) DO UPDATE
              SET email = excluded.email,
                  consent = excluded.consent,
                  updated_at = excluded.updated_at",
          rusqlite::params![owner_key, email, consent, updated_at],
        )?;
        Ok(())
      })
      .await?;

    Ok(profile)
  }

  async fn get_profile<'a>(&'a self, owner: &'a Owner) -> Result<Option<Profile>> {
    let owner_key = owner.key();

    let raw: Option<RawProfile> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT owner_key, email, consent, updated_at FROM profiles
                WHERE owner_key = ?1",
              rusqlite::params![owner_key],
              |row| {
                Ok(RawProfile {
                  owner_key:  row.get(0)?,
                  email:      row.get(1)?,
                  consent:    row.get(2)?,
                  updated_at: row.get(3)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawProfile::into_profile).transpose()
  }
}

// ─── ProfileDirectory impl ───────────────────────────────────────────────────

impl ProfileDirectory for SqliteStore {
  type Error = Error;

  async fn consent_state<'a>(&'a self, owner: &'a Owner) -> Result<ConsentState> {
    Ok(
      self
        .get_profile(owner)
        .await?
        .map(|p| p.consent)
        .unwrap_or_default(),
    )
  }

  async fn recipient_email<'a>(&'a self, owner: &'a Owner) -> Result<Option<String>> {
    Ok(self.get_profile(owner).await?.and_then(|p| p.email))
  }
}
