//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use recart_core::StoreError;
use serde_json::json;
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  #[error("conflict: {0}")]
  Conflict(String),

  #[error("gone: {0}")]
  Gone(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ApiError {
  /// Map a store error, surfacing domain errors with their own status.
  pub fn store<E: StoreError>(e: E) -> Self {
    match e.as_core() {
      Some(core) => Self::from(core),
      None => ApiError::Store(Box::new(e)),
    }
  }
}

impl From<&recart_core::Error> for ApiError {
  fn from(e: &recart_core::Error) -> Self {
    use recart_core::Error as E;
    match e {
      E::Validation(_) | E::InvalidConfig(_) => ApiError::BadRequest(e.to_string()),
      E::CartNotFound(_) | E::ItemNotFound { .. } => ApiError::NotFound(e.to_string()),
      E::CartConverted(_) => ApiError::Conflict(e.to_string()),
    }
  }
}

impl From<recart_core::Error> for ApiError {
  fn from(e: recart_core::Error) -> Self { Self::from(&e) }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, message) = match &self {
      ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
      ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
      ApiError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
      ApiError::Gone(m) => (StatusCode::GONE, m.clone()),
      ApiError::Store(e) => {
        tracing::error!(error = %e, "store error while handling request");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
      }
    };
    (status, Json(json!({ "error": message }))).into_response()
  }
}
