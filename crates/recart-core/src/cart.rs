//! Carts and the line items they carry.
//!
//! A cart belongs to exactly one [`Owner`]. Item input arrives as a
//! [`NewItem`] and is validated before it touches a cart, so a stored
//! [`CartItem`] is always well-formed. All mutation goes through the methods
//! on [`Cart`], which enforce the terminal invariant (a converted cart never
//! changes) and keep `last_activity_at` monotonic.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// Upper bound on the quantity of a single cart line.
pub const MAX_LINE_QUANTITY: u32 = 999;

/// Upper bound on the length of a product reference or guest session token.
pub const MAX_REF_LEN: usize = 128;

/// Upper bound on a unit price snapshot.
pub const MAX_UNIT_PRICE: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);

/// Most decimal places accepted on a unit price.
pub const MAX_PRICE_SCALE: u32 = 4;

// ─── Owner ───────────────────────────────────────────────────────────────────

/// Who a cart belongs to. Authenticated users and anonymous sessions follow
/// separate lifecycles until a guest cart is merged on login.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Owner {
  User(Uuid),
  Guest(String),
}

impl Owner {
  /// Build a guest owner, validating the session token.
  pub fn guest(token: impl Into<String>) -> Result<Self> {
    let token = token.into();
    validate_ref("guest session token", &token)?;
    Ok(Self::Guest(token))
  }

  pub fn is_guest(&self) -> bool { matches!(self, Self::Guest(_)) }

  /// The flat string key used for storage and URLs: `user:<uuid>` or
  /// `guest:<token>`.
  pub fn key(&self) -> String {
    match self {
      Self::User(id) => format!("user:{}", id.hyphenated()),
      Self::Guest(token) => format!("guest:{token}"),
    }
  }

  /// Inverse of [`Owner::key`].
  pub fn from_key(key: &str) -> Result<Self> {
    if let Some(rest) = key.strip_prefix("user:") {
      return Uuid::parse_str(rest)
        .map(Self::User)
        .map_err(|_| Error::Validation(format!("invalid user owner key: {key:?}")));
    }
    if let Some(rest) = key.strip_prefix("guest:") {
      return Self::guest(rest);
    }
    Err(Error::Validation(format!("unrecognised owner key: {key:?}")))
  }
}

fn validate_ref(what: &str, value: &str) -> Result<()> {
  if value.trim().is_empty() {
    return Err(Error::Validation(format!("{what} must not be empty")));
  }
  if value.len() > MAX_REF_LEN {
    return Err(Error::Validation(format!(
      "{what} must be at most {MAX_REF_LEN} characters"
    )));
  }
  if value.chars().any(char::is_whitespace) {
    return Err(Error::Validation(format!("{what} must not contain whitespace")));
  }
  Ok(())
}

fn validate_quantity(quantity: u32) -> Result<()> {
  if quantity == 0 || quantity > MAX_LINE_QUANTITY {
    return Err(Error::Validation(format!(
      "quantity must be between 1 and {MAX_LINE_QUANTITY}, got {quantity}"
    )));
  }
  Ok(())
}

fn validate_price(price: Decimal) -> Result<()> {
  if price.is_sign_negative() && !price.is_zero() {
    return Err(Error::Validation(format!("unit_price must not be negative, got {price}")));
  }
  if price > MAX_UNIT_PRICE {
    return Err(Error::Validation(format!(
      "unit_price must be at most {MAX_UNIT_PRICE}, got {price}"
    )));
  }
  if price.normalize().scale() > MAX_PRICE_SCALE {
    return Err(Error::Validation(format!(
      "unit_price must have at most {MAX_PRICE_SCALE} decimal places, got {price}"
    )));
  }
  Ok(())
}

// ─── Items ───────────────────────────────────────────────────────────────────

/// One line of a cart. The price is a snapshot taken when the line was last
/// added to, not a live catalog price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
  pub product_ref: String,
  /// Display name captured alongside the price; used in reminder emails.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub title:       Option<String>,
  pub quantity:    u32,
  pub unit_price:  Decimal,
}

impl CartItem {
  /// `unit_price × quantity`, failing with [`Error::Validation`] on overflow.
  pub fn line_total(&self) -> Result<Decimal> {
    self
      .unit_price
      .checked_mul(Decimal::from(self.quantity))
      .ok_or_else(|| {
        Error::Validation(format!("line total overflows for {}", self.product_ref))
      })
  }
}

/// Input to [`Cart::add_item`] and
/// [`CartStore::add_item`](crate::store::CartStore::add_item).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewItem {
  pub product_ref: String,
  #[serde(default)]
  pub title:       Option<String>,
  pub quantity:    u32,
  pub unit_price:  Decimal,
}

impl NewItem {
  pub fn new(product_ref: impl Into<String>, quantity: u32, unit_price: Decimal) -> Self {
    Self { product_ref: product_ref.into(), title: None, quantity, unit_price }
  }

  pub fn with_title(mut self, title: impl Into<String>) -> Self {
    self.title = Some(title.into());
    self
  }

  /// Reject malformed input before it reaches a cart.
  pub fn validate(&self) -> Result<()> {
    validate_ref("product_ref", &self.product_ref)?;
    validate_quantity(self.quantity)?;
    validate_price(self.unit_price)
  }
}

// ─── Cart ────────────────────────────────────────────────────────────────────

/// A shopping cart. Status is never stored; see
/// [`lifecycle::classify`](crate::lifecycle::classify).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
  pub cart_id:             Uuid,
  pub owner:               Owner,
  pub items:               Vec<CartItem>,
  pub created_at:          DateTime<Utc>,
  pub last_activity_at:    DateTime<Utc>,
  /// Set once, when checkout completes. Terminal.
  pub converted_order_ref: Option<String>,
  pub converted_at:        Option<DateTime<Utc>>,
  pub reminder_count:      u32,
  pub last_reminder_at:    Option<DateTime<Utc>>,
}

impl Cart {
  /// A fresh, empty cart created at `at`.
  pub fn new(owner: Owner, at: DateTime<Utc>) -> Self {
    Self {
      cart_id: Uuid::new_v4(),
      owner,
      items: Vec::new(),
      created_at: at,
      last_activity_at: at,
      converted_order_ref: None,
      converted_at: None,
      reminder_count: 0,
      last_reminder_at: None,
    }
  }

  pub fn is_converted(&self) -> bool { self.converted_order_ref.is_some() }

  pub fn is_empty(&self) -> bool { self.items.is_empty() }

  /// Total number of units across all lines.
  pub fn unit_count(&self) -> u32 { self.items.iter().map(|i| i.quantity).sum() }

  /// Sum of line totals, failing with [`Error::Validation`] on overflow.
  pub fn subtotal(&self) -> Result<Decimal> {
    self.items.iter().try_fold(Decimal::ZERO, |acc, item| {
      acc
        .checked_add(item.line_total()?)
        .ok_or_else(|| Error::Validation("cart subtotal overflows".into()))
    })
  }

  /// Fail with [`Error::CartConverted`] if the cart is terminal.
  pub fn ensure_open(&self) -> Result<()> {
    if self.is_converted() {
      return Err(Error::CartConverted(self.cart_id));
    }
    Ok(())
  }

  /// Record activity at `at`. Never moves `last_activity_at` backwards.
  pub fn touch(&mut self, at: DateTime<Utc>) {
    if at > self.last_activity_at {
      self.last_activity_at = at;
    }
  }

  /// Add `item` to the cart. An existing line for the same product has its
  /// quantity increased and its price snapshot refreshed.
  pub fn add_item(&mut self, item: NewItem, at: DateTime<Utc>) -> Result<()> {
    self.ensure_open()?;
    item.validate()?;

    match self.items.iter_mut().find(|i| i.product_ref == item.product_ref) {
      Some(line) => {
        let quantity = line.quantity + item.quantity;
        validate_quantity(quantity)?;
        line.quantity = quantity;
        line.unit_price = item.unit_price;
        if item.title.is_some() {
          line.title = item.title;
        }
      }
      None => self.items.push(CartItem {
        product_ref: item.product_ref,
        title:       item.title,
        quantity:    item.quantity,
        unit_price:  item.unit_price,
      }),
    }

    self.touch(at);
    Ok(())
  }

  /// Set the quantity of an existing line; `0` removes it.
  pub fn set_quantity(
    &mut self,
    product_ref: &str,
    quantity: u32,
    at: DateTime<Utc>,
  ) -> Result<()> {
    if quantity == 0 {
      return self.remove_item(product_ref, at);
    }
    self.ensure_open()?;
    validate_quantity(quantity)?;

    let cart_id = self.cart_id;
    let line = self
      .items
      .iter_mut()
      .find(|i| i.product_ref == product_ref)
      .ok_or_else(|| Error::ItemNotFound {
        cart_id,
        product_ref: product_ref.to_owned(),
      })?;
    line.quantity = quantity;

    self.touch(at);
    Ok(())
  }

  pub fn remove_item(&mut self, product_ref: &str, at: DateTime<Utc>) -> Result<()> {
    self.ensure_open()?;

    let before = self.items.len();
    self.items.retain(|i| i.product_ref != product_ref);
    if self.items.len() == before {
      return Err(Error::ItemNotFound {
        cart_id:     self.cart_id,
        product_ref: product_ref.to_owned(),
      });
    }

    self.touch(at);
    Ok(())
  }

  /// Fold another cart's lines into this one (login merge). Quantities are
  /// summed and clamped to [`MAX_LINE_QUANTITY`]; the incoming price
  /// snapshot wins because it is the more recent one. `last_activity_at` is
  /// reset to `at` unconditionally; merge is the one operation allowed to do
  /// that.
  pub fn absorb(&mut self, incoming: Vec<CartItem>, at: DateTime<Utc>) -> Result<()> {
    self.ensure_open()?;

    for item in incoming {
      match self.items.iter_mut().find(|i| i.product_ref == item.product_ref) {
        Some(line) => {
          line.quantity = (line.quantity + item.quantity).min(MAX_LINE_QUANTITY);
          line.unit_price = item.unit_price;
          if item.title.is_some() {
            line.title = item.title;
          }
        }
        None => self.items.push(item),
      }
    }

    self.last_activity_at = at;
    Ok(())
  }

  /// Mark the cart converted by `order_ref`. Repeating the call with the
  /// same reference is a no-op; a different reference is rejected.
  pub fn convert(&mut self, order_ref: &str, at: DateTime<Utc>) -> Result<()> {
    validate_ref("order_ref", order_ref)?;
    match &self.converted_order_ref {
      Some(existing) if existing == order_ref => Ok(()),
      Some(_) => Err(Error::CartConverted(self.cart_id)),
      None => {
        self.converted_order_ref = Some(order_ref.to_owned());
        self.converted_at = Some(at);
        self.touch(at);
        Ok(())
      }
    }
  }
}
