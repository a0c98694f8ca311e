//! Handlers for `/carts` endpoints.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `POST`   | `/carts` | Body: `{"owner":"guest:<token>"}`; returns the owner's open cart if any |
//! | `GET`    | `/carts/:id` | Cart with derived status |
//! | `POST`   | `/carts/:id/items` | Body: a `NewItem` |
//! | `PUT`    | `/carts/:id/items/:product_ref` | Body: `{"quantity":2}`; `0` removes |
//! | `DELETE` | `/carts/:id/items/:product_ref` | |
//! | `POST`   | `/carts/:id/merge` | Body: `{"user_id":"…"}`; login merge (admin router) |

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use chrono::Utc;
use recart_core::{
  cart::{Cart, NewItem, Owner},
  lifecycle::CartView,
  store::CartStore,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{ApiState, error::ApiError};

fn view<S>(state: &ApiState<S>, cart: Cart) -> Result<Json<CartView>, ApiError> {
  Ok(Json(CartView::new(cart, &state.policy.thresholds, Utc::now())?))
}

// ─── Create ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateBody {
  /// Owner key: `user:<uuid>` or `guest:<session token>`.
  pub owner: String,
}

/// `POST /carts`
pub async fn create<S>(
  State(state): State<ApiState<S>>,
  Json(body): Json<CreateBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: CartStore,
{
  let owner = Owner::from_key(&body.owner)?;

  if let Some(open) = state.store.find_open_cart(&owner).await.map_err(ApiError::store)? {
    return Ok((StatusCode::OK, view(&state, open)?));
  }

  let cart = state
    .store
    .create_cart(owner, Utc::now())
    .await
    .map_err(ApiError::store)?;
  Ok((StatusCode::CREATED, view(&state, cart)?))
}

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /carts/:id`
pub async fn get_one<S>(
  State(state): State<ApiState<S>>,
  Path(id): Path<Uuid>,
) -> Result<Json<CartView>, ApiError>
where
  S: CartStore,
{
  let cart = state
    .store
    .get_cart(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("cart {id} not found")))?;
  view(&state, cart)
}

// ─── Items ────────────────────────────────────────────────────────────────────

/// `POST /carts/:id/items`
pub async fn add_item<S>(
  State(state): State<ApiState<S>>,
  Path(id): Path<Uuid>,
  Json(item): Json<NewItem>,
) -> Result<Json<CartView>, ApiError>
where
  S: CartStore,
{
  let cart = state
    .store
    .add_item(id, item, Utc::now())
    .await
    .map_err(ApiError::store)?;
  view(&state, cart)
}

#[derive(Debug, Deserialize)]
pub struct QuantityBody {
  pub quantity: u32,
}

/// `PUT /carts/:id/items/:product_ref`
pub async fn set_quantity<S>(
  State(state): State<ApiState<S>>,
  Path((id, product_ref)): Path<(Uuid, String)>,
  Json(body): Json<QuantityBody>,
) -> Result<Json<CartView>, ApiError>
where
  S: CartStore,
{
  let cart = state
    .store
    .set_quantity(id, product_ref, body.quantity, Utc::now())
    .await
    .map_err(ApiError::store)?;
  view(&state, cart)
}

/// `DELETE /carts/:id/items/:product_ref`
pub async fn remove_item<S>(
  State(state): State<ApiState<S>>,
  Path((id, product_ref)): Path<(Uuid, String)>,
) -> Result<Json<CartView>, ApiError>
where
  S: CartStore,
{
  let cart = state
    .store
    .remove_item(id, product_ref, Utc::now())
    .await
    .map_err(ApiError::store)?;
  view(&state, cart)
}

// ─── Merge ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct MergeBody {
  pub user_id: Uuid,
}

/// `POST /carts/:id/merge`: fold a guest cart into the user's on login.
pub async fn merge<S>(
  State(state): State<ApiState<S>>,
  Path(id): Path<Uuid>,
  Json(body): Json<MergeBody>,
) -> Result<Json<CartView>, ApiError>
where
  S: CartStore,
{
  let cart = state
    .store
    .merge_guest_cart(id, body.user_id, Utc::now())
    .await
    .map_err(ApiError::store)?;
  tracing::info!(guest_cart = %id, cart_id = %cart.cart_id, "guest cart merged on login");
  view(&state, cart)
}
