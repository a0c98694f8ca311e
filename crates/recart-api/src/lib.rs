//! JSON REST API for recart.
//!
//! Exposes two axum [`Router`]s backed by any
//! [`recart_core::store::CartStore`]. The storefront surface covers anonymous
//! cart editing and recovery links. Everything that binds a cart or a
//! profile to a user identity (login merge, consent and email profiles) sits
//! on the admin surface next to analytics and checkout conversion, because
//! only the trusted storefront backend can vouch for who the user is. Auth
//! and TLS are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", recart_api::storefront_router(state.clone()))
//! .nest("/api", recart_api::admin_router(state).layer(auth))
//! ```

pub mod admin;
pub mod carts;
pub mod error;
pub mod profiles;
pub mod recover;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post, put},
};
use recart_core::{policy::LifecycleConfig, store::CartStore};

pub use error::ApiError;

/// State shared by every handler.
pub struct ApiState<S> {
  pub store:  Arc<S>,
  pub policy: Arc<LifecycleConfig>,
}

impl<S> ApiState<S> {
  pub fn new(store: Arc<S>, policy: Arc<LifecycleConfig>) -> Self { Self { store, policy } }
}

impl<S> Clone for ApiState<S> {
  fn clone(&self) -> Self {
    Self { store: self.store.clone(), policy: self.policy.clone() }
  }
}

/// Routes the storefront calls on behalf of shoppers.
pub fn storefront_router<S>(state: ApiState<S>) -> Router<()>
where
  S: CartStore + 'static,
{
  Router::new()
    // Carts
    .route("/carts", post(carts::create::<S>))
    .route("/carts/{id}", get(carts::get_one::<S>))
    .route("/carts/{id}/items", post(carts::add_item::<S>))
    .route(
      "/carts/{id}/items/{product_ref}",
      put(carts::set_quantity::<S>).delete(carts::remove_item::<S>),
    )
    // Recovery links
    .route("/recover/{token}", post(recover::redeem::<S>))
    .with_state(state)
}

/// Routes for operators and the storefront backend. Mount behind auth.
pub fn admin_router<S>(state: ApiState<S>) -> Router<()>
where
  S: CartStore + 'static,
{
  Router::new()
    .route("/carts/{id}/convert", post(admin::convert::<S>))
    .route("/carts/{id}/merge", post(carts::merge::<S>))
    .route(
      "/profiles/{owner_key}",
      get(profiles::get_one::<S>).put(profiles::upsert::<S>),
    )
    .route("/admin/abandoned", get(admin::abandoned::<S>))
    .route("/admin/stats", get(admin::stats::<S>))
    .route("/admin/reminders", get(admin::reminders::<S>))
    .with_state(state)
}
