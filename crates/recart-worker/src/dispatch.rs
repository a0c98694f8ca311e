//! Turning one due reminder into one email.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use recart_core::{
  cart::Cart,
  mail::{EmailMessage, Mailer, TransportError},
  policy::{LifecycleConfig, Tier},
  recovery,
  reminder::{BlockReason, ConsentState},
  store::{CartStore, ProfileDirectory},
};
use thiserror::Error;
use tracing::debug;

use crate::template;

/// Why a send attempt failed. The claim is released and the next sweep
/// tries again.
#[derive(Debug, Error)]
pub enum DispatchError {
  #[error("profile lookup failed: {0}")]
  Directory(String),

  #[error("could not store recovery token: {0}")]
  Token(String),

  #[error("could not render reminder: {0}")]
  Render(#[from] recart_core::Error),

  #[error(transparent)]
  Transport(#[from] TransportError),
}

/// The outcome of [`Dispatcher::deliver`].
#[derive(Debug)]
pub enum Delivery {
  Sent { recipient: String, expires_at: DateTime<Utc> },
  Blocked(BlockReason),
  Failed(DispatchError),
}

impl Delivery {
  /// The consent state observed during the attempt, if it got that far.
  pub fn consent(&self) -> Option<ConsentState> {
    match self {
      Self::Sent { .. } | Self::Blocked(BlockReason::NoRecipient) => Some(ConsentState::Granted),
      Self::Blocked(BlockReason::NoConsent(state)) => Some(*state),
      Self::Failed(_) => None,
    }
  }
}

/// Renders and sends reminder emails.
pub struct Dispatcher<S, P, M> {
  store:           Arc<S>,
  profiles:        Arc<P>,
  mailer:          Arc<M>,
  config:          Arc<LifecycleConfig>,
  public_base_url: String,
}

impl<S, P, M> Dispatcher<S, P, M>
where
  S: CartStore,
  P: ProfileDirectory,
  M: Mailer,
{
  pub fn new(
    store: Arc<S>,
    profiles: Arc<P>,
    mailer: Arc<M>,
    config: Arc<LifecycleConfig>,
    public_base_url: impl Into<String>,
  ) -> Self {
    let public_base_url = public_base_url.into().trim_end_matches('/').to_owned();
    Self { store, profiles, mailer, config, public_base_url }
  }

  /// The storefront URL a raw token redeems at.
  pub fn recovery_link(&self, raw_token: &str) -> String {
    format!("{}/cart/recover/{raw_token}", self.public_base_url)
  }

  /// Send the reminder for tier `tier_index` of the schedule.
  ///
  /// Consent is checked before anything is issued, so a blocked reminder
  /// leaves no token behind. Never returns an error; failures are a
  /// [`Delivery::Failed`].
  pub async fn deliver(
    &self,
    cart: &Cart,
    tier_index: usize,
    tier: Tier,
    now: DateTime<Utc>,
  ) -> Delivery {
    let consent = match self.profiles.consent_state(&cart.owner).await {
      Ok(consent) => consent,
      Err(e) => return Delivery::Failed(DispatchError::Directory(e.to_string())),
    };
    if !consent.permits_email() {
      debug!(cart_id = %cart.cart_id, %consent, "reminder blocked by consent");
      return Delivery::Blocked(BlockReason::NoConsent(consent));
    }

    let recipient = match self.profiles.recipient_email(&cart.owner).await {
      Ok(Some(email)) => email,
      Ok(None) => return Delivery::Blocked(BlockReason::NoRecipient),
      Err(e) => return Delivery::Failed(DispatchError::Directory(e.to_string())),
    };

    let issued = recovery::issue(cart.cart_id, now, self.config.token_ttl);
    let expires_at = issued.record.expires_at;
    let position = self.config.schedule.position(tier_index);
    let rendered =
      match template::render(cart, position, &self.recovery_link(&issued.raw), expires_at) {
        Ok(rendered) => rendered,
        Err(e) => return Delivery::Failed(e.into()),
      };
    if let Err(e) = self.store.insert_token(issued.record).await {
      return Delivery::Failed(DispatchError::Token(e.to_string()));
    }

    let message = EmailMessage {
      to:        recipient,
      subject:   rendered.subject,
      html_body: rendered.html_body,
      template:  tier.template(),
    };

    match self.mailer.send_email(&message).await {
      Ok(()) => Delivery::Sent { recipient: message.to, expires_at },
      Err(e) => Delivery::Failed(e.into()),
    }
  }
}
