//! shrinecache - admin console for the shrine site.
//!
//! Talks to the site's REST API through the shared cache and session core.
//! The session token survives between runs; cached data does not.

mod commands;

use std::io;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use shrinecache_core::api::ReqwestBackend;
use shrinecache_core::{ApiClient, Config, SessionManager, ShrineApi};

#[derive(Parser)]
#[command(name = "shrinecache", version, about = "Admin console for the shrine site")]
struct Cli {
    /// API base URL (overrides the config file)
    #[arg(long, env = "SHRINECACHE_API_URL", global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Sign in as an admin
    Login {
        #[arg(short, long, env = "SHRINECACHE_USERNAME")]
        username: Option<String>,
    },
    /// Sign out and forget the stored token
    Logout,
    /// Show who is signed in
    Status,
    /// List gallery items
    Gallery {
        #[arg(long, default_value_t = 12)]
        limit: u32,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long)]
        category: Option<String>,
        /// Include unpublished items (requires sign-in)
        #[arg(long)]
        admin: bool,
    },
    /// Publish or hide a gallery item
    Toggle { id: i64 },
    /// Delete a gallery item
    Delete { id: i64 },
    /// List the management team
    Team,
    /// Show dashboard statistics
    Stats,
    /// Show livestream status, optionally polling every N seconds
    Livestream {
        #[arg(long)]
        watch: Option<u64>,
    },
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();
    let cli = Cli::parse();

    let mut config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Failed to load config, using defaults");
            Config::default()
        }
    };
    if let Some(url) = cli.api_url {
        config.api_base_url = url;
    }
    info!(api = %config.api_base_url, "shrinecache starting");

    let backend = ReqwestBackend::new(
        &config.api_base_url,
        config.read_timeout(),
        config.mutation_timeout(),
    )?;
    let session = SessionManager::new(ApiClient::new(Arc::new(backend)), config.session_store()?);
    let api = ShrineApi::from_config(session.client(), &config);
    api.follow_session(session.subscribe());

    commands::run(cli.command, &mut config, &session, &api).await
}
