//! studio-server binary entry point

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use studio_common::auth;
use studio_common::config::{ensure_data_dir, load_toml_config, resolve_data_dir};
use studio_server::config::ServiceConfig;
use studio_server::services::mailer::{EmailSender, HttpEmailSender, LogEmailSender};
use studio_server::services::{lifecycle, webhooks};
use studio_server::{build_router, AppState};

#[derive(Parser, Debug)]
#[command(name = "studio-server", about = "Photography studio contract service")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory (overrides config file and STUDIO_DATA_DIR)
    #[arg(short, long)]
    data_dir: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let toml = load_toml_config(args.config.as_deref()).context("loading configuration")?;
    let data_dir = resolve_data_dir(args.data_dir.as_deref(), &toml);
    ensure_data_dir(&data_dir).context("preparing data directory")?;

    let config = ServiceConfig::from_toml(&toml, data_dir);
    tracing::info!(data_dir = %config.data_dir.display(), "Starting studio-server");

    let pool = studio_server::db::init_database_pool(&config.database_path())
        .await
        .context("opening database")?;

    let admin_key = auth::load_admin_key(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("loading admin key: {}", e))?;
    if admin_key == auth::AUTH_DISABLED {
        tracing::warn!("Admin API authentication is DISABLED (admin_api_key = \"0\")");
    } else {
        tracing::info!("Admin API key loaded (set admin_api_key to \"0\" to disable auth)");
    }

    let mailer: Arc<dyn EmailSender> = match &config.mail_gateway_url {
        Some(url) => {
            tracing::info!(gateway = %url, "Using HTTP email gateway");
            Arc::new(HttpEmailSender::new(
                url.clone(),
                config.mail_gateway_token.clone(),
            ))
        }
        None => {
            tracing::info!("No email gateway configured; using log-only delivery");
            Arc::new(LogEmailSender)
        }
    };

    let state = AppState::new(pool.clone(), config, mailer.clone());
    spawn_background_sweeps(state.clone());

    let bind_addr = format!("{}:{}", state.config.bind_host, state.config.bind_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {}", bind_addr))?;
    tracing::info!(addr = %bind_addr, "Listening");

    axum::serve(listener, build_router(state))
        .await
        .context("server error")?;
    Ok(())
}

/// Periodic contract-expiry and webhook-retry sweeps
fn spawn_background_sweeps(state: AppState) {
    let interval = std::time::Duration::from_secs(state.config.sweep_interval_secs);
    let http = reqwest::Client::new();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let now = chrono::Utc::now();

            match lifecycle::expiry_sweep(&state.db, &state.config, state.mailer.as_ref(), now)
                .await
            {
                Ok(expired) if expired > 0 => {
                    tracing::info!(expired, "Expiry sweep completed");
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Expiry sweep failed"),
            }

            match webhooks::run_due_deliveries(&state.db, &http, &state.config, now, 100).await {
                Ok(delivered) if delivered > 0 => {
                    tracing::info!(delivered, "Webhook sweep completed");
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Webhook sweep failed"),
            }
        }
    });
}
