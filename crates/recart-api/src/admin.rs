//! Operator endpoints: analytics over a recent window, the reminder log,
//! and the checkout conversion hook.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/carts/:id/convert` | Body: `{"order_ref":"…"}`; idempotent |
//! | `GET`  | `/admin/abandoned` | `?hours=24` |
//! | `GET`  | `/admin/stats` | `?hours=24` |
//! | `GET`  | `/admin/reminders` | `?cart_id=&hours=&limit=` |

use axum::{
  Json,
  extract::{Path, Query, State},
};
use chrono::Utc;
use recart_core::{
  lifecycle::CartView,
  reminder::ReminderLogEntry,
  stats::{self, AggregateStats},
  store::{CartStore, ReminderQuery},
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{ApiState, error::ApiError};

/// Default analytics window.
pub const DEFAULT_WINDOW_HOURS: u32 = 24;

/// Longest window accepted, one year.
pub const MAX_WINDOW_HOURS: u32 = 24 * 366;

fn window_hours(hours: Option<u32>) -> Result<u32, ApiError> {
  match hours.unwrap_or(DEFAULT_WINDOW_HOURS) {
    h @ 1..=MAX_WINDOW_HOURS => Ok(h),
    h => Err(ApiError::BadRequest(format!(
      "hours must be between 1 and {MAX_WINDOW_HOURS}, got {h}"
    ))),
  }
}

#[derive(Debug, Deserialize)]
pub struct WindowParams {
  pub hours: Option<u32>,
}

// ─── Conversion ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ConvertBody {
  pub order_ref: String,
}

/// `POST /carts/:id/convert`
pub async fn convert<S>(
  State(state): State<ApiState<S>>,
  Path(id): Path<Uuid>,
  Json(body): Json<ConvertBody>,
) -> Result<Json<CartView>, ApiError>
where
  S: CartStore,
{
  let now = Utc::now();
  let cart = state
    .store
    .mark_converted(id, body.order_ref, now)
    .await
    .map_err(ApiError::store)?;
  tracing::info!(cart_id = %id, order_ref = ?cart.converted_order_ref, "cart converted");
  Ok(Json(CartView::new(cart, &state.policy.thresholds, now)?))
}

// ─── Analytics ────────────────────────────────────────────────────────────────

/// `GET /admin/abandoned[?hours=N]`: abandoned carts active within the
/// window, most recent first.
pub async fn abandoned<S>(
  State(state): State<ApiState<S>>,
  Query(params): Query<WindowParams>,
) -> Result<Json<Vec<CartView>>, ApiError>
where
  S: CartStore,
{
  let hours = window_hours(params.hours)?;
  let now = Utc::now();
  let carts = state
    .store
    .carts_active_since(stats::window_start(hours, now))
    .await
    .map_err(ApiError::store)?;
  Ok(Json(stats::abandoned_carts(carts, &state.policy.thresholds, now)?))
}

/// `GET /admin/stats[?hours=N]`
pub async fn stats<S>(
  State(state): State<ApiState<S>>,
  Query(params): Query<WindowParams>,
) -> Result<Json<AggregateStats>, ApiError>
where
  S: CartStore,
{
  let hours = window_hours(params.hours)?;
  let now = Utc::now();
  let since = stats::window_start(hours, now);

  let carts = state
    .store
    .carts_active_since(since)
    .await
    .map_err(ApiError::store)?;
  let query = ReminderQuery { since: Some(since), ..Default::default() };
  let reminders = state
    .store
    .reminder_log(&query)
    .await
    .map_err(ApiError::store)?;
  let failures = state
    .store
    .delivery_failures(since)
    .await
    .map_err(ApiError::store)?;

  Ok(Json(stats::aggregate(
    &carts,
    &reminders,
    failures.len() as u64,
    &state.policy.thresholds,
    hours,
    now,
  )?))
}

// ─── Reminder log ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ReminderParams {
  pub cart_id: Option<Uuid>,
  pub hours:   Option<u32>,
  pub limit:   Option<usize>,
}

/// `GET /admin/reminders[?cart_id=…&hours=N&limit=N]`
pub async fn reminders<S>(
  State(state): State<ApiState<S>>,
  Query(params): Query<ReminderParams>,
) -> Result<Json<Vec<ReminderLogEntry>>, ApiError>
where
  S: CartStore,
{
  let since = params
    .hours
    .map(|h| window_hours(Some(h)))
    .transpose()?
    .map(|h| stats::window_start(h, Utc::now()));

  let query = ReminderQuery { cart_id: params.cart_id, since, limit: params.limit };
  let entries = state
    .store
    .reminder_log(&query)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(entries))
}
