//! Plain-text rendering of API responses.

use chrono::{DateTime, Utc};
use recart_core::{
  cart::Owner, lifecycle::CartView, reminder::ReminderLogEntry, stats::AggregateStats,
};
use recart_worker::{SchedulerState, SweepReport};
use rust_decimal::Decimal;

// ─── Table ────────────────────────────────────────────────────────────────────

/// Left-aligned columns padded to the widest cell, two spaces apart.
fn table(headers: &[&str], rows: &[Vec<String>]) -> String {
  let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
  for row in rows {
    for (w, cell) in widths.iter_mut().zip(row) {
      *w = (*w).max(cell.chars().count());
    }
  }

  let mut out = vec![line(headers.iter().copied(), &widths)];
  for row in rows {
    out.push(line(row.iter().map(String::as_str), &widths));
  }
  out.join("\n")
}

fn line<'a>(cells: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
  let padded: Vec<String> = cells
    .zip(widths)
    .map(|(cell, &w)| format!("{cell:<w$}"))
    .collect();
  padded.join("  ").trim_end().to_string()
}

fn time(at: DateTime<Utc>) -> String { at.format("%Y-%m-%d %H:%M").to_string() }

fn money(amount: Decimal) -> String { format!("${:.2}", amount) }

fn owner_label(owner: &Owner) -> String {
  match owner {
    Owner::User(id) => format!("user {}", &id.simple().to_string()[..8]),
    Owner::Guest(_) => "guest".to_string(),
  }
}

// ─── Views ────────────────────────────────────────────────────────────────────

pub fn stats(s: &AggregateStats) -> String {
  let rows = [
    ("window", format!("last {}h (since {})", s.window_hours, time(s.since))),
    ("carts", s.total_carts.to_string()),
    ("active", s.by_status.active.to_string()),
    ("stale", s.by_status.stale.to_string()),
    ("abandoned", s.by_status.abandoned.to_string()),
    ("converted", s.by_status.converted.to_string()),
    ("abandoned value", money(s.abandoned_value)),
    ("avg abandoned", money(s.average_abandoned_value)),
    (
      "abandoned by",
      format!(
        "{} guest / {} registered",
        s.abandoned_by_owner.guest, s.abandoned_by_owner.registered
      ),
    ),
    ("conversion rate", format!("{:.1}%", s.conversion_rate * 100.0)),
    ("reminders sent", s.reminders_sent.to_string()),
    ("reminders blocked", s.reminders_blocked.to_string()),
    ("delivery failures", s.delivery_failures.to_string()),
    ("recovered", format!("{} ({})", s.recovered_carts, money(s.recovered_value))),
  ];
  let rows: Vec<Vec<String>> =
    rows.into_iter().map(|(k, v)| vec![k.to_string(), v]).collect();
  table(&["metric", "value"], &rows)
}

pub fn abandoned(carts: &[CartView]) -> String {
  if carts.is_empty() {
    return "no abandoned carts".to_string();
  }
  let rows: Vec<Vec<String>> = carts
    .iter()
    .map(|v| {
      vec![
        v.cart.cart_id.to_string(),
        owner_label(&v.cart.owner),
        v.cart.items.len().to_string(),
        money(v.subtotal),
        time(v.cart.last_activity_at),
        v.cart.reminder_count.to_string(),
      ]
    })
    .collect();
  table(&["cart", "owner", "items", "subtotal", "last activity", "reminders"], &rows)
}

pub fn reminders(entries: &[ReminderLogEntry]) -> String {
  if entries.is_empty() {
    return "no reminders logged".to_string();
  }
  let rows: Vec<Vec<String>> = entries
    .iter()
    .map(|e| {
      vec![
        e.cart_id.to_string(),
        e.tier.to_string(),
        e.status.to_string(),
        e.consent.map(|c| c.to_string()).unwrap_or_else(|| "-".into()),
        time(e.settled_at.unwrap_or(e.claimed_at)),
        e.detail.clone().unwrap_or_default(),
      ]
    })
    .collect();
  table(&["cart", "tier", "status", "consent", "at", "detail"], &rows)
}

pub fn sweep(r: &SweepReport) -> String {
  format!(
    "sweep at {}: {} candidates, {} sent, {} blocked, {} failed, {} skipped, {} errors",
    time(r.ran_at),
    r.candidates,
    r.sent,
    r.blocked,
    r.failed,
    r.skipped,
    r.errors
  )
}

pub fn scheduler(s: &SchedulerState) -> String {
  let mut out = vec![
    format!("runs:      {}", s.total_runs),
    format!("in flight: {}", s.in_flight),
    format!("last run:  {}", s.last_run_at.map(time).unwrap_or_else(|| "never".into())),
  ];
  if let Some(report) = &s.last_report {
    out.push(format!("last:      {}", sweep(report)));
  }
  if let Some(err) = &s.last_error {
    out.push(format!("error:     {err}"));
  }
  out.join("\n")
}

pub fn converted(view: &CartView) -> String {
  let order = view.cart.converted_order_ref.as_deref().unwrap_or("-");
  format!("cart {} is {} (order {order}, {})", view.cart.cart_id, view.status, money(view.subtotal))
}
