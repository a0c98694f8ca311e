//! The recart HTTP server.
//!
//! Serves the storefront and admin APIs from `recart-api`, guards the admin
//! half with Basic auth, and owns the background reminder loop.

pub mod auth;
pub mod error;
pub mod mailer;
pub mod worker;

pub use error::Error;

use std::{path::PathBuf, sync::Arc};

use axum::{
  Json, Router,
  extract::State,
  middleware,
  routing::{get, post},
};
use chrono::Utc;
use recart_api::ApiState;
use recart_core::{
  mail::Mailer,
  policy::{LifecycleConfig, LifecycleSettings},
  store::{CartStore, ProfileDirectory},
};
use recart_worker::{SchedulerState, SweepReport, Sweeper};
use serde::Deserialize;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;

use auth::{AuthConfig, require_admin};
use mailer::MailTransport;

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml` and
/// `RECART_*` environment variables.
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct ServerConfig {
  pub host:                        String,
  pub port:                        u16,
  /// Origin of the storefront; recovery links point here.
  pub public_base_url:             String,
  pub store_path:                  PathBuf,
  pub admin_username:              String,
  pub admin_password_hash:         String,
  pub stale_threshold_minutes:     u32,
  pub abandoned_threshold_minutes: u32,
  pub reminder_schedule_minutes:   String,
  pub max_reminders:               u32,
  pub recovery_token_ttl_hours:    u32,
  pub claim_lease_minutes:         u32,
  pub retention_days:              u32,
  /// `0` disables the background sweep.
  pub sweep_interval_minutes:      u64,
  pub mail_transport:              MailTransport,
  pub outbox_dir:                  Option<PathBuf>,
}

impl Default for ServerConfig {
  fn default() -> Self {
    let lifecycle = LifecycleSettings::default();
    Self {
      host:                        "127.0.0.1".to_string(),
      port:                        8080,
      public_base_url:             "http://localhost:8080".to_string(),
      store_path:                  PathBuf::from("~/.local/share/recart/recart.db"),
      admin_username:              "admin".to_string(),
      admin_password_hash:         String::new(),
      stale_threshold_minutes:     lifecycle.stale_threshold_minutes,
      abandoned_threshold_minutes: lifecycle.abandoned_threshold_minutes,
      reminder_schedule_minutes:   lifecycle.reminder_schedule_minutes,
      max_reminders:               lifecycle.max_reminders,
      recovery_token_ttl_hours:    lifecycle.recovery_token_ttl_hours,
      claim_lease_minutes:         lifecycle.claim_lease_minutes,
      retention_days:              lifecycle.retention_days,
      sweep_interval_minutes:      60,
      mail_transport:              MailTransport::Log,
      outbox_dir:                  None,
    }
  }
}

impl ServerConfig {
  pub fn lifecycle_settings(&self) -> LifecycleSettings {
    LifecycleSettings {
      stale_threshold_minutes:     self.stale_threshold_minutes,
      abandoned_threshold_minutes: self.abandoned_threshold_minutes,
      reminder_schedule_minutes:   self.reminder_schedule_minutes.clone(),
      max_reminders:               self.max_reminders,
      recovery_token_ttl_hours:    self.recovery_token_ttl_hours,
      claim_lease_minutes:         self.claim_lease_minutes,
      retention_days:              self.retention_days,
    }
  }

  /// Validate and build the lifecycle policy.
  pub fn lifecycle(&self) -> Result<LifecycleConfig, Error> {
    LifecycleConfig::try_from(&self.lifecycle_settings())
      .map_err(|e| Error::Config(e.to_string()))
  }

  pub fn auth(&self) -> Result<AuthConfig, Error> {
    if self.admin_password_hash.is_empty() {
      return Err(Error::Config(
        "admin_password_hash must be set (generate one with --hash-password)".into(),
      ));
    }
    Ok(AuthConfig {
      username:      self.admin_username.clone(),
      password_hash: self.admin_password_hash.clone(),
    })
  }
}

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through the server's own handlers.
pub struct AppState<S, M> {
  pub store:     Arc<S>,
  pub policy:    Arc<LifecycleConfig>,
  pub auth:      Arc<AuthConfig>,
  pub sweeper:   Arc<Sweeper<S, S, M>>,
  pub scheduler: Arc<Mutex<SchedulerState>>,
}

impl<S, M> Clone for AppState<S, M> {
  fn clone(&self) -> Self {
    Self {
      store:     self.store.clone(),
      policy:    self.policy.clone(),
      auth:      self.auth.clone(),
      sweeper:   self.sweeper.clone(),
      scheduler: self.scheduler.clone(),
    }
  }
}

impl<S, M> AppState<S, M>
where
  S: CartStore + ProfileDirectory,
  M: Mailer,
{
  /// Wire up state for `store`, which also serves as the profile directory.
  pub fn new(
    store: Arc<S>,
    mailer: Arc<M>,
    policy: LifecycleConfig,
    auth: AuthConfig,
    public_base_url: &str,
  ) -> Self {
    let policy = Arc::new(policy);
    let sweeper = Sweeper::new(store.clone(), store.clone(), mailer, policy.clone(), public_base_url);
    Self {
      store,
      policy,
      auth: Arc::new(auth),
      sweeper: Arc::new(sweeper),
      scheduler: Arc::new(Mutex::new(SchedulerState::default())),
    }
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build the server's axum [`Router`]. Everything lives under `/api`; the
/// admin routes require Basic auth.
pub fn router<S, M>(state: AppState<S, M>) -> Router
where
  S: CartStore + ProfileDirectory + 'static,
  M: Mailer + 'static,
{
  let api_state = ApiState::new(state.store.clone(), state.policy.clone());

  let admin = recart_api::admin_router(api_state.clone())
    .merge(
      Router::new()
        .route("/admin/sweep", post(sweep_now::<S, M>))
        .route("/admin/scheduler", get(scheduler_status::<S, M>))
        .with_state(state.clone()),
    )
    .layer(middleware::from_fn_with_state(state.auth.clone(), require_admin));

  let api = recart_api::storefront_router(api_state).merge(admin);

  Router::new()
    .route("/health", get(|| async { "ok" }))
    .nest("/api", api)
    .layer(TraceLayer::new_for_http())
}

// ─── Admin handlers ───────────────────────────────────────────────────────────

/// `POST /api/admin/sweep`: run a sweep now, alongside any background one.
async fn sweep_now<S, M>(State(state): State<AppState<S, M>>) -> Result<Json<SweepReport>, Error>
where
  S: CartStore + ProfileDirectory + 'static,
  M: Mailer + 'static,
{
  let report = worker::run_sweep(&state.sweeper, &state.scheduler, Utc::now())
    .await
    .map_err(|e| Error::Store(Box::new(e)))?;
  Ok(Json(report))
}

/// `GET /api/admin/scheduler`
async fn scheduler_status<S, M>(State(state): State<AppState<S, M>>) -> Json<SchedulerState>
where
  S: CartStore + ProfileDirectory + 'static,
  M: Mailer + 'static,
{
  Json(state.scheduler.lock().await.clone())
}

// ─── Integration tests ────────────────────────────────────────────────────────
