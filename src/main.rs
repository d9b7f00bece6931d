//! Inventory API server
//!
//! Usage:
//!   cargo run --bin load_data        # seed the database
//!   cargo run --bin inventory_api    # start the server
//!
//! Configuration comes from the environment (and `.env`); see `config.rs`.

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use inventory_api::auth::TokenCodec;
use inventory_api::billing::StripeClient;
use inventory_api::config::{Config, LogFormat};
use inventory_api::rest::{create_router, with_http_layers, AppState};
use inventory_api::storage::Storage;

fn init_tracing(config: &Config) -> WorkerGuard {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info"));
    let (writer, guard) = match &config.log_dir {
        Some(dir) => tracing_appender::non_blocking(tracing_appender::rolling::daily(
            dir,
            "inventory_api.log",
        )),
        None => tracing_appender::non_blocking(std::io::stdout()),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);
    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.with_ansi(config.log_dir.is_none()).init(),
    }
    guard
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env().context("invalid configuration")?;
    // Dropping the guard flushes buffered log lines.
    let _guard = init_tracing(&config);

    if config.stripe_secret_key.is_none() {
        warn!("STRIPE_SECRET_KEY is not set; subscription webhooks cannot resolve customers");
    }
    if config.stripe_webhook_secret.is_none() {
        warn!("STRIPE_WEBHOOK_SECRET is not set; every webhook will be rejected");
    }

    let storage = Storage::open(&config.database_path).with_context(|| {
        format!("failed to open database at {}", config.database_path.display())
    })?;

    let state = AppState {
        storage: storage.clone(),
        tokens: Arc::new(TokenCodec::new(
            &config.access_token_secret,
            &config.refresh_token_secret,
        )),
        billing: Arc::new(StripeClient::new(
            config.stripe_api_base.clone(),
            config.stripe_secret_key.clone(),
        )),
        webhook_secret: config.stripe_webhook_secret.clone(),
        secure_cookies: config.production,
        bcrypt_cost: config.bcrypt_cost,
    };
    let app = with_http_layers(create_router(state), &config.cors_origins);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!(
        addr = %config.bind_addr,
        database = %config.database_path.display(),
        production = config.production,
        "inventory API listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    storage.flush().await.context("failed to flush database")?;
    Ok(())
}
