//! `POST /recover/:token`: redeem a recovery link.
//!
//! The raw token from the email link is hashed and consumed in one guarded
//! write. Failures keep their identity: unknown tokens are `404`, expired
//! ones `410` and spent ones `409`.

use axum::{
  Json,
  extract::{Path, State},
};
use chrono::Utc;
use recart_core::{
  lifecycle::CartView,
  recovery::{Redemption, hash_token},
  store::CartStore,
};

use crate::{ApiState, error::ApiError};

pub async fn redeem<S>(
  State(state): State<ApiState<S>>,
  Path(token): Path<String>,
) -> Result<Json<CartView>, ApiError>
where
  S: CartStore,
{
  let now = Utc::now();
  let outcome = state
    .store
    .redeem_token(hash_token(&token), now)
    .await
    .map_err(ApiError::store)?;

  let cart_id = match outcome {
    Redemption::Redeemed { cart_id } => cart_id,
    Redemption::NotFound => {
      return Err(ApiError::NotFound("recovery link not recognised".into()));
    }
    Redemption::Expired { expired_at } => {
      return Err(ApiError::Gone(format!("recovery link expired at {expired_at}")));
    }
    Redemption::AlreadyUsed { consumed_at } => {
      return Err(ApiError::Conflict(format!(
        "recovery link already used at {consumed_at}"
      )));
    }
  };

  let cart = state
    .store
    .get_cart(cart_id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("cart {cart_id} not found")))?;

  tracing::info!(%cart_id, "recovery link redeemed");
  Ok(Json(CartView::new(cart, &state.policy.thresholds, now)?))
}
