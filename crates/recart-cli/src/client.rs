//! Async HTTP client wrapping the recart admin API.

use anyhow::{Context, Result, anyhow};
use recart_core::{lifecycle::CartView, reminder::ReminderLogEntry, stats::AggregateStats};
use recart_worker::{SchedulerState, SweepReport};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

/// Connection settings for the recart API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
  pub base_url: String,
  pub username: String,
  pub password: String,
}

/// Async HTTP client for the admin half of the recart API.
#[derive(Clone)]
pub struct ApiClient {
  client: Client,
  config: ApiConfig,
}

impl ApiClient {
  pub fn new(config: ApiConfig) -> Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .context("failed to build HTTP client")?;
    Ok(Self { client, config })
  }

  fn url(&self, path: &str) -> String {
    format!("{}/api{}", self.config.base_url.trim_end_matches('/'), path)
  }

  fn auth(&self, req: RequestBuilder) -> RequestBuilder {
    if self.config.username.is_empty() {
      req
    } else {
      req.basic_auth(&self.config.username, Some(&self.config.password))
    }
  }

  async fn send<T: DeserializeOwned>(&self, what: &str, req: RequestBuilder) -> Result<T> {
    let resp = self
      .auth(req)
      .send()
      .await
      .with_context(|| format!("{what} failed"))?;
    decode(what, resp).await
  }

  // ── Analytics ─────────────────────────────────────────────────────────────

  /// `GET /api/admin/stats?hours=<n>`
  pub async fn stats(&self, hours: u32) -> Result<AggregateStats> {
    let req = self.client.get(self.url("/admin/stats")).query(&[("hours", hours)]);
    self.send("GET /admin/stats", req).await
  }

  /// `GET /api/admin/abandoned?hours=<n>`
  pub async fn abandoned(&self, hours: u32) -> Result<Vec<CartView>> {
    let req = self.client.get(self.url("/admin/abandoned")).query(&[("hours", hours)]);
    self.send("GET /admin/abandoned", req).await
  }

  /// `GET /api/admin/reminders[?cart_id=…&hours=…&limit=…]`
  pub async fn reminders(
    &self,
    cart_id: Option<Uuid>,
    hours: Option<u32>,
    limit: Option<u32>,
  ) -> Result<Vec<ReminderLogEntry>> {
    let mut query: Vec<(&str, String)> = Vec::new();
    if let Some(id) = cart_id {
      query.push(("cart_id", id.to_string()));
    }
    if let Some(h) = hours {
      query.push(("hours", h.to_string()));
    }
    if let Some(l) = limit {
      query.push(("limit", l.to_string()));
    }
    let req = self.client.get(self.url("/admin/reminders")).query(&query);
    self.send("GET /admin/reminders", req).await
  }

  // ── Scheduler ─────────────────────────────────────────────────────────────

  /// `POST /api/admin/sweep`
  pub async fn sweep(&self) -> Result<SweepReport> {
    let req = self.client.post(self.url("/admin/sweep"));
    self.send("POST /admin/sweep", req).await
  }

  /// `GET /api/admin/scheduler`
  pub async fn scheduler(&self) -> Result<SchedulerState> {
    let req = self.client.get(self.url("/admin/scheduler"));
    self.send("GET /admin/scheduler", req).await
  }

  // ── Checkout hook ─────────────────────────────────────────────────────────

  /// `POST /api/carts/<id>/convert`
  pub async fn convert(&self, cart_id: Uuid, order_ref: &str) -> Result<CartView> {
    let req = self
      .client
      .post(self.url(&format!("/carts/{cart_id}/convert")))
      .json(&json!({ "order_ref": order_ref }));
    self.send("POST /carts/:id/convert", req).await
  }
}

/// Turn a non-2xx response into an error carrying the server's message.
async fn decode<T: DeserializeOwned>(what: &str, resp: Response) -> Result<T> {
  let status = resp.status();
  if !status.is_success() {
    let body = resp.text().await.unwrap_or_default();
    return Err(anyhow!("{what} → {status}{}", error_suffix(&body)));
  }
  resp.json().await.with_context(|| format!("deserialising {what} response"))
}

fn error_suffix(body: &str) -> String {
  serde_json::from_str::<serde_json::Value>(body)
    .ok()
    .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_owned))
    .map(|msg| format!(": {msg}"))
    .unwrap_or_default()
}
