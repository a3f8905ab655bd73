use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use forgeauth::config::{self, Config};
use forgeauth::{forge, http, AppState};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "forgeauth", about = "Forge write-access authorization service")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "/etc/forgeauth/config.yaml")]
    config: String,

    /// Log at debug level regardless of the configured level.
    #[arg(long)]
    debug: bool,
}

// ---------------------------------------------------------------------------
// HTTP server (axum)
// ---------------------------------------------------------------------------

async fn run_http_server(state: AppState) -> Result<()> {
    let listen_addr: std::net::SocketAddr = state
        .config
        .server
        .http_listen
        .parse()
        .context("invalid http_listen address")?;

    let app = http::handler::create_router(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {listen_addr}"))?;

    tracing::info!(%listen_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn init_tracing(config: &Config, debug: bool) {
    let default_level = if debug { "debug" } else { config.log_level.as_str() };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // ---- CLI ----
    let cli = Cli::parse();

    // ---- Config ----
    let config = Arc::new(config::load_config(&cli.config)?);

    // ---- Tracing ----
    init_tracing(&config, cli.debug);
    tracing::info!(config_path = %cli.config, "starting forgeauth");

    // ---- Authority ----
    let authority: Arc<dyn forge::Authority> = Arc::from(forge::build_authority(&config)?);
    tracing::info!(api_url = %config.authority.api_url, "authority initialised");

    // ---- Webhook secret ----
    let webhook_secret = std::env::var(&config.auth.webhook_secret_env).ok();
    if webhook_secret.is_none() {
        tracing::warn!(
            env = %config.auth.webhook_secret_env,
            "webhook secret not set; cache invalidation webhooks disabled"
        );
    }

    // ---- App state ----
    let state = AppState::new(Arc::clone(&config), authority, webhook_secret);
    tracing::info!(
        expiration_secs = config.auth.expiration_secs,
        propagate_invalid_credential = config.auth.propagate_invalid_credential,
        "authorizer initialised"
    );

    run_http_server(state).await?;

    tracing::info!("forgeauth shut down cleanly");
    Ok(())
}
