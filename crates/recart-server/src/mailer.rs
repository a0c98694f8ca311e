//! Mail transports the server can be configured with.
//!
//! Neither talks SMTP. `log` writes each message to the tracing output;
//! `outbox` drops one `.eml` file per message into a directory that a relay
//! (or a developer) picks up.

use std::path::{Path, PathBuf};

use chrono::Utc;
use recart_core::mail::{EmailMessage, Mailer, TransportError};
use serde::Deserialize;
use uuid::Uuid;

/// Which transport to build, from `mail_transport` in config.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailTransport {
  #[default]
  Log,
  Outbox,
}

// ─── Log ─────────────────────────────────────────────────────────────────────

/// Logs messages instead of delivering them.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

impl Mailer for LogMailer {
  async fn send_email<'a>(&'a self, message: &'a EmailMessage) -> Result<(), TransportError> {
    tracing::info!(
      to = %message.to,
      subject = %message.subject,
      template = %message.template,
      body_bytes = message.html_body.len(),
      "email not delivered (log transport)"
    );
    Ok(())
  }
}

// ─── Outbox ──────────────────────────────────────────────────────────────────

/// Writes each message as an RFC 5322 file under `dir`.
#[derive(Debug, Clone)]
pub struct OutboxMailer {
  dir: PathBuf,
}

impl OutboxMailer {
  pub async fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
    let dir = dir.into();
    tokio::fs::create_dir_all(&dir).await?;
    Ok(Self { dir })
  }

  pub fn dir(&self) -> &Path { &self.dir }
}

fn reject_line_breaks(field: &str, value: &str) -> Result<(), TransportError> {
  if value.contains(['\r', '\n']) {
    return Err(TransportError(format!("{field} contains a line break")));
  }
  Ok(())
}

/// Render `message` as an `.eml` document.
pub fn to_eml(message: &EmailMessage) -> Result<String, TransportError> {
  reject_line_breaks("recipient", &message.to)?;
  reject_line_breaks("subject", &message.subject)?;
  Ok(format!(
    "To: {}\r\nSubject: {}\r\nDate: {}\r\nX-Recart-Template: {}\r\n\
     MIME-Version: 1.0\r\nContent-Type: text/html; charset=utf-8\r\n\r\n{}\r\n",
    message.to,
    message.subject,
    Utc::now().to_rfc2822(),
    message.template,
    message.html_body,
  ))
}

impl Mailer for OutboxMailer {
  async fn send_email<'a>(&'a self, message: &'a EmailMessage) -> Result<(), TransportError> {
    let eml = to_eml(message)?;
    let name = format!("{}-{}", Utc::now().format("%Y%m%dT%H%M%S"), Uuid::new_v4().simple());
    let tmp = self.dir.join(format!("{name}.tmp"));
    let dst = self.dir.join(format!("{name}.eml"));

    // A watcher only ever sees complete `.eml` files.
    tokio::fs::write(&tmp, eml)
      .await
      .map_err(|e| TransportError(format!("write {}: {e}", tmp.display())))?;
    tokio::fs::rename(&tmp, &dst)
      .await
      .map_err(|e| TransportError(format!("rename {}: {e}", dst.display())))?;

    tracing::debug!(to = %message.to, path = %dst.display(), "email written to outbox");
    Ok(())
  }
}

// ─── Either ──────────────────────────────────────────────────────────────────

/// The transport selected at startup.
#[derive(Debug, Clone)]
pub enum ServerMailer {
  Log(LogMailer),
  Outbox(OutboxMailer),
}

impl ServerMailer {
  pub async fn from_config(
    transport: MailTransport,
    outbox_dir: Option<&Path>,
  ) -> Result<Self, crate::Error> {
    match transport {
      MailTransport::Log => Ok(Self::Log(LogMailer)),
      MailTransport::Outbox => {
        let dir = outbox_dir.ok_or_else(|| {
          crate::Error::Config("mail_transport = \"outbox\" requires outbox_dir".into())
        })?;
        let mailer = OutboxMailer::new(dir).await.map_err(|e| {
          crate::Error::Config(format!("cannot create outbox {}: {e}", dir.display()))
        })?;
        Ok(Self::Outbox(mailer))
      }
    }
  }
}

impl Mailer for ServerMailer {
  async fn send_email<'a>(&'a self, message: &'a EmailMessage) -> Result<(), TransportError> {
    match self {
      Self::Log(m) => m.send_email(message).await,
      Self::Outbox(m) => m.send_email(message).await,
    }
  }
}
