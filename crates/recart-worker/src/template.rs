//! Reminder email copy.
//!
//! Subjects depend on where the tier sits in the schedule, not on its
//! offset, so a reconfigured schedule still opens with the gentle nudge and
//! closes with the last call.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use recart_core::{Result, cart::Cart, policy::TierPosition};

/// A rendered subject and HTML body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
  pub subject:   String,
  pub html_body: String,
}

pub fn subject(position: TierPosition) -> &'static str {
  match position {
    TierPosition::First => "You left something in your cart",
    TierPosition::Middle => "Your cart is still waiting for you",
    TierPosition::Last => "Last call: your cart is about to expire",
  }
}

fn headline(position: TierPosition) -> &'static str {
  match position {
    TierPosition::First => "Still thinking it over?",
    TierPosition::Middle => "We saved your cart.",
    TierPosition::Last => "This is the last reminder we'll send.",
  }
}

/// Escape text for inclusion in HTML element content or attribute values.
pub fn escape_html(input: &str) -> String {
  let mut out = String::with_capacity(input.len());
  for c in input.chars() {
    match c {
      '&' => out.push_str("&amp;"),
      '<' => out.push_str("&lt;"),
      '>' => out.push_str("&gt;"),
      '"' => out.push_str("&quot;"),
      '\'' => out.push_str("&#39;"),
      c => out.push(c),
    }
  }
  out
}

/// Render the reminder for `cart` at `position`, linking to `recovery_link`.
/// Fails only if a line or the subtotal overflows.
pub fn render(
  cart: &Cart,
  position: TierPosition,
  recovery_link: &str,
  link_expires_at: DateTime<Utc>,
) -> Result<RenderedEmail> {
  let mut rows = String::new();
  for item in &cart.items {
    let name = item.title.as_deref().unwrap_or(&item.product_ref);
    // Writing to a String cannot fail.
    let _ = write!(
      rows,
      "<tr><td>{}</td><td>{}</td><td>${:.2}</td></tr>",
      escape_html(name),
      item.quantity,
      item.line_total()?,
    );
  }

  let html_body = format!(
    "<html><body>\
     <h1>{headline}</h1>\
     <table><thead><tr><th>Item</th><th>Qty</th><th>Total</th></tr></thead>\
     <tbody>{rows}</tbody></table>\
     <p>Subtotal: <strong>${subtotal:.2}</strong></p>\
     <p><a href=\"{link}\">Return to your cart</a></p>\
     <p>This link works once and expires on {expires}.</p>\
     </body></html>",
    headline = escape_html(headline(position)),
    subtotal = cart.subtotal()?,
    link = escape_html(recovery_link),
    expires = link_expires_at.format("%Y-%m-%d %H:%M UTC"),
  );

  Ok(RenderedEmail { subject: subject(position).to_owned(), html_body })
}
