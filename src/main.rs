//! Gatekeeper
//! Mission: Authenticate once, authorize every request

use anyhow::{Context, Result};
use dotenv::dotenv;
use gatekeeper_backend::{app, Config};
use std::path::Path;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    info!("🚀 Gatekeeper starting");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("❌ Invalid configuration: {}", e);
            return Err(e).context("Refusing to start");
        }
    };
    match &config.rules_path {
        Some(path) => info!("📜 Access rules loaded from {}", path.display()),
        None => info!("📜 Using built-in access rules"),
    }
    if config.rules.is_empty() {
        warn!("⚠️  Access rule table is empty: every route requires a token");
    }

    let router = app(&config)?;

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("🎯 API server listening on {}", config.bind_addr);

    axum::serve(listener, router).await.context("Server error")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gatekeeper_backend=debug,gatekeeper=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    // Standard dotenv search (cwd + parents)
    let _ = dotenv();

    // Also the crate directory, for runs started elsewhere with --manifest-path
    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }
}
