use anyhow::Result;
use clap::{Parser, Subcommand};
use kimi_bridge_auth::{CredentialCoordinator, KimiRefresher};
use kimi_bridge_config::{Config, LogConfig};
use kimi_bridge_provider::KimiBackend;
use kimi_bridge_proxy::{AppState, build_http_client};
use kimi_bridge_types::{BridgeError, ChatBackend};
use std::{path::PathBuf, sync::Arc};
use tokio_util::task::TaskTracker;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "kimi-bridge", about = "kimi-bridge — OpenAI-compatible API for the Kimi web chat")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the proxy server.
    Serve {
        /// Path to the YAML configuration file.
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
        /// Override the listening port (default: 8000).
        #[arg(short, long)]
        port: Option<u16>,
        /// Override the listening address (default: 127.0.0.1).
        #[arg(long)]
        host: Option<String>,
    },
    /// Check whether a refresh token is still usable.
    Check {
        /// The refresh token to probe.
        token: String,
        /// Path to the YAML configuration file.
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, port, host } => cmd_serve(config, port, host).await,
        Commands::Check { token, config } => cmd_check(&token, config).await,
    }
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    let config =
        Config::load(path.as_deref()).map_err(|e| BridgeError::Config(e.to_string()))?;
    init_tracing(&config.log);
    Ok(config)
}

/// `RUST_LOG` wins over the configured level.
fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_backend(config: &Config) -> Arc<KimiBackend> {
    let http = build_http_client(config.proxy_url.as_deref());
    let refresher = Arc::new(KimiRefresher::new(http.clone(), &config.upstream));
    let coordinator = Arc::new(CredentialCoordinator::new(refresher));
    Arc::new(KimiBackend::new(http, coordinator, config))
}

async fn cmd_serve(config_path: Option<PathBuf>, port: Option<u16>, host: Option<String>) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(p) = port {
        config.port = p;
    }
    if let Some(h) = host {
        config.host = h;
    }

    let addr = format!("{}:{}", config.host, config.port);
    let tasks = TaskTracker::new();
    let state = AppState::new(&config, build_backend(&config), tasks.clone());
    let app = kimi_bridge_proxy::make_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, upstream = %config.upstream.base_url, "kimi-bridge listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tasks.close();
    tracing::info!(pending = tasks.len(), "draining background tasks");
    tasks.wait().await;
    Ok(())
}

async fn cmd_check(token: &str, config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    let live = build_backend(&config)
        .token_live(token)
        .await
        .map_err(|e| anyhow::anyhow!("token check failed: {e}"))?;
    println!("{}", if live { "live" } else { "dead" });
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
