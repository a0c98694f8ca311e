//! Error types for `recart-core`.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  /// Malformed cart or item input; surfaced to callers as a 4xx.
  #[error("invalid input: {0}")]
  Validation(String),

  #[error("cart not found: {0}")]
  CartNotFound(Uuid),

  #[error("cart {0} has already been converted")]
  CartConverted(Uuid),

  #[error("item {product_ref:?} not found in cart {cart_id}")]
  ItemNotFound { cart_id: Uuid, product_ref: String },

  #[error("invalid configuration: {0}")]
  InvalidConfig(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Bound on storage backend error types.
///
/// Backends wrap domain failures (validation, missing cart, converted cart)
/// in their own error enums; `as_core` lets the HTTP layer recover them and
/// pick a status code without knowing the backend.
pub trait StoreError: std::error::Error + Send + Sync + 'static {
  fn as_core(&self) -> Option<&Error>;
}

impl StoreError for Error {
  fn as_core(&self) -> Option<&Error> { Some(self) }
}
