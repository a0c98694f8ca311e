//! The mail transport seam.
//!
//! Delivery itself is an external collaborator; this module only fixes the
//! shape of a message and the trait a transport implements.

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A rendered email ready for a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
  pub to:        String,
  pub subject:   String,
  pub html_body: String,
  /// Template name, e.g. `reminder_1h`; transports may use it for tagging.
  pub template:  String,
}

/// A transport-level delivery failure. Always retryable from the
/// scheduler's point of view.
#[derive(Debug, Clone, Error)]
#[error("mail transport failure: {0}")]
pub struct TransportError(pub String);

/// Abstraction over an outbound mail transport.
pub trait Mailer: Send + Sync {
  fn send_email<'a>(
    &'a self,
    message: &'a EmailMessage,
  ) -> impl Future<Output = Result<(), TransportError>> + Send + 'a;
}
