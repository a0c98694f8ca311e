//! Handlers for `/profiles/:owner_key`: the contact address and
//! marketing consent the reminder pipeline consults.

use axum::{
  Json,
  extract::{Path, State},
};
use chrono::Utc;
use recart_core::{
  cart::Owner,
  reminder::{ConsentState, Profile},
  store::CartStore,
};
use serde::Deserialize;

use crate::{ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct ProfileBody {
  #[serde(default)]
  pub email:   Option<String>,
  pub consent: ConsentState,
}

fn validate_email(email: &str) -> Result<(), ApiError> {
  let valid = email
    .split_once('@')
    .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'))
    && !email.chars().any(char::is_whitespace);
  if valid {
    Ok(())
  } else {
    Err(ApiError::BadRequest(format!("invalid email address: {email:?}")))
  }
}

/// `GET /profiles/:owner_key`
pub async fn get_one<S>(
  State(state): State<ApiState<S>>,
  Path(owner_key): Path<String>,
) -> Result<Json<Profile>, ApiError>
where
  S: CartStore,
{
  let owner = Owner::from_key(&owner_key)?;
  let profile = state
    .store
    .get_profile(&owner)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("no profile for {owner_key}")))?;
  Ok(Json(profile))
}

/// `PUT /profiles/:owner_key`, body: `{"email":"…","consent":"granted"}`
pub async fn upsert<S>(
  State(state): State<ApiState<S>>,
  Path(owner_key): Path<String>,
  Json(body): Json<ProfileBody>,
) -> Result<Json<Profile>, ApiError>
where
  S: CartStore,
{
  let owner = Owner::from_key(&owner_key)?;
  if let Some(email) = &body.email {
    validate_email(email)?;
  }

  let profile = state
    .store
    .save_profile(Profile {
      owner,
      email: body.email,
      consent: body.consent,
      updated_at: Utc::now(),
    })
    .await
    .map_err(ApiError::store)?;
  Ok(Json(profile))
}
