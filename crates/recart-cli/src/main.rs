//! `recart`, the operator command line for the recart server.
//!
//! # Usage
//!
//! ```
//! recart --url http://localhost:8080 --user admin --password secret stats --hours 48
//! recart --config ~/.config/recart/cli.toml sweep
//! ```

mod client;
mod render;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client::{ApiClient, ApiConfig};
use serde::Deserialize;
use uuid::Uuid;

const DEFAULT_URL: &str = "http://localhost:8080";

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "recart", about = "Operator CLI for the recart server")]
struct Args {
  /// Path to a TOML config file (url, username, password).
  #[arg(short, long, value_name = "FILE")]
  config: Option<PathBuf>,

  /// Base URL of the recart server (default: http://localhost:8080).
  #[arg(long, env = "RECART_URL")]
  url: Option<String>,

  /// Admin username.
  #[arg(long, env = "RECART_USER")]
  user: Option<String>,

  /// Admin password (plaintext).
  #[arg(long, env = "RECART_PASSWORD")]
  password: Option<String>,

  /// Print raw JSON instead of tables.
  #[arg(long)]
  json: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Aggregate cart and reminder metrics.
  Stats {
    #[arg(long, default_value_t = 24)]
    hours: u32,
  },
  /// Abandoned carts active within the window.
  Abandoned {
    #[arg(long, default_value_t = 24)]
    hours: u32,
  },
  /// The reminder log, newest first.
  Reminders {
    #[arg(long)]
    cart: Option<Uuid>,
    #[arg(long)]
    hours: Option<u32>,
    #[arg(long)]
    limit: Option<u32>,
  },
  /// Run a reminder sweep now.
  Sweep,
  /// Show the scheduler's run history.
  Scheduler,
  /// Mark a cart as converted into an order.
  Convert { cart: Uuid, order_ref: String },
}

// ─── Config file ──────────────────────────────────────────────────────────────

/// Shape of the optional TOML config file.
#[derive(Deserialize, Default, Debug)]
struct ConfigFile {
  #[serde(default)]
  url:      String,
  #[serde(default)]
  username: String,
  #[serde(default)]
  password: String,
}

fn load_config_file(path: Option<&Path>) -> Result<ConfigFile> {
  let Some(path) = path else {
    return Ok(ConfigFile::default());
  };
  let raw = std::fs::read_to_string(path)
    .with_context(|| format!("reading config file {}", path.display()))?;
  toml::from_str(&raw).context("parsing config file")
}

/// Flags (and their env fallbacks) override the config file, which
/// overrides defaults.
fn resolve(
  url: Option<String>,
  user: Option<String>,
  password: Option<String>,
  file: ConfigFile,
) -> ApiConfig {
  let or_file = |flag: Option<String>, value: String| {
    flag.or_else(|| (!value.is_empty()).then_some(value))
  };
  ApiConfig {
    base_url: or_file(url, file.url).unwrap_or_else(|| DEFAULT_URL.to_string()),
    username: or_file(user, file.username).unwrap_or_default(),
    password: or_file(password, file.password).unwrap_or_default(),
  }
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
  let args = Args::parse();

  let file_cfg = load_config_file(args.config.as_deref())?;
  let client = ApiClient::new(resolve(args.url, args.user, args.password, file_cfg))?;

  let output = run(&client, args.command, args.json).await?;
  println!("{output}");
  Ok(())
}

async fn run(client: &ApiClient, command: Command, json: bool) -> Result<String> {
  fn raw<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context("serialising response")
  }

  Ok(match command {
    Command::Stats { hours } => {
      let stats = client.stats(hours).await?;
      if json { raw(&stats)? } else { render::stats(&stats) }
    }
    Command::Abandoned { hours } => {
      let carts = client.abandoned(hours).await?;
      if json { raw(&carts)? } else { render::abandoned(&carts) }
    }
    Command::Reminders { cart, hours, limit } => {
      let entries = client.reminders(cart, hours, limit).await?;
      if json { raw(&entries)? } else { render::reminders(&entries) }
    }
    Command::Sweep => {
      let report = client.sweep().await?;
      if json { raw(&report)? } else { render::sweep(&report) }
    }
    Command::Scheduler => {
      let state = client.scheduler().await?;
      if json { raw(&state)? } else { render::scheduler(&state) }
    }
    Command::Convert { cart, order_ref } => {
      let view = client.convert(cart, &order_ref).await?;
      if json { raw(&view)? } else { render::converted(&view) }
    }
  })
}
