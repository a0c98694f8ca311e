//! recart server binary.
//!
//! Reads `config.toml` (or the path given with `--config`) plus `RECART_*`
//! environment overrides, opens the SQLite store, starts the reminder loop
//! and serves the HTTP API.
//!
//! # Password hash generation
//!
//! To generate the argon2 PHC string for `admin_password_hash`:
//!
//! ```
//! cargo run -p recart-server --bin server -- --hash-password
//! ```

use std::{
  path::{Path, PathBuf},
  sync::Arc,
  time::Duration,
};

use anyhow::Context as _;
use argon2::{Argon2, PasswordHasher, password_hash::SaltString};
use chrono::Utc;
use clap::Parser;
use rand_core::OsRng;
use recart_server::{AppState, ServerConfig, mailer::ServerMailer, worker};
use recart_store_sqlite::SqliteStore;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Abandoned-cart recovery server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Print the argon2 hash for a password entered on stdin and exit.
  #[arg(long)]
  hash_password: bool,

  /// Run a single reminder sweep, print its report and exit.
  #[arg(long)]
  sweep_once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  if cli.hash_password {
    let password = read_password()?;
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
      .hash_password(password.as_bytes(), &salt)
      .map_err(|e| anyhow::anyhow!("argon2 error: {e}"))?
      .to_string();
    println!("{hash}");
    return Ok(());
  }

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("RECART"))
    .build()
    .context("failed to read config file")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;

  let policy = server_cfg.lifecycle().context("invalid lifecycle settings")?;
  let auth = server_cfg.auth()?;

  let store_path = expand_tilde(&server_cfg.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let outbox_dir = server_cfg.outbox_dir.as_deref().map(expand_tilde);
  let mailer = ServerMailer::from_config(server_cfg.mail_transport, outbox_dir.as_deref())
    .await
    .context("failed to set up mail transport")?;

  let state = AppState::new(
    Arc::new(store),
    Arc::new(mailer),
    policy,
    auth,
    &server_cfg.public_base_url,
  );

  if cli.sweep_once {
    let report = worker::run_sweep(&state.sweeper, &state.scheduler, Utc::now())
      .await
      .context("sweep failed")?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    return Ok(());
  }

  if server_cfg.sweep_interval_minutes > 0 {
    let every = Duration::from_secs(server_cfg.sweep_interval_minutes * 60);
    tracing::info!(minutes = server_cfg.sweep_interval_minutes, "starting reminder loop");
    worker::spawn(state.sweeper.clone(), state.scheduler.clone(), every);
  } else {
    tracing::info!("reminder loop disabled; use POST /api/admin/sweep");
  }

  let app = recart_server::router(state);
  let address = format!("{}:{}", server_cfg.host, server_cfg.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}

/// Read a password from stdin.
fn read_password() -> anyhow::Result<String> {
  use std::io::{self, BufRead, Write};
  print!("Password: ");
  io::stdout().flush().ok();
  let mut line = String::new();
  io::stdin().lock().read_line(&mut line)?;
  Ok(line.trim_end_matches(['\n', '\r']).to_string())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
