//! mahiro: QQ bot gateway relay.
//!
//! Connects to the gateway's event socket, dispatches group and friend
//! messages, forwards them to the secondary process, and accepts send
//! requests back over HTTP.

mod config;
mod http;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use config::{CliOverrides, EnvDefaults, ServerConfig};
use mahiro_client::MahiroClient;
use tokio::net::TcpListener;
use tracing::{error, info};

/// mahiro: QQ bot gateway relay
#[derive(Parser, Debug)]
#[command(name = "mahiro", version, about = "QQ bot gateway relay")]
struct Cli {
    /// Bot QQ number
    #[arg(long)]
    qq: Option<i64>,

    /// Gateway host (combined with --ws-port into ws://host:port/ws)
    #[arg(long)]
    host: Option<String>,

    /// Gateway port
    #[arg(long)]
    ws_port: Option<u16>,

    /// Full gateway socket URL; excludes --host/--ws-port
    #[arg(long, conflicts_with_all = ["host", "ws_port"])]
    ws: Option<String>,

    /// Local HTTP port for send requests
    #[arg(short, long)]
    port: Option<u16>,

    /// Port of the secondary process receiving forwarded events
    #[arg(long)]
    python_port: Option<u16>,

    /// Do not forward inbound events
    #[arg(long)]
    no_forward: bool,

    /// Config file path
    #[arg(long, default_value = "~/.mahiro/config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            qq: self.qq,
            host: self.host.clone(),
            ws_port: self.ws_port,
            ws_url: self.ws.clone(),
            port: self.port,
            python_port: self.python_port,
            no_forward: self.no_forward,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    if let Err(e) = run(cli).await {
        error!(error = %format!("{e:#}"), "mahiro failed");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = PathBuf::from(&cli.config);
    let config = ServerConfig::load(Some(&config_path), &cli.overrides(), &EnvDefaults::from_env())
        .context("failed to load config")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        qq = config.client.bot_id,
        listen = %config.listen,
        python_port = config.python_port,
        "starting mahiro"
    );

    let client = MahiroClient::start(config.client.clone()).context("failed to start client")?;
    let app = http::router(http::AppState {
        bot_id: client.bot_id(),
        pipeline: Arc::clone(client.pipeline()),
    });

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    info!(addr = %config.listen, "http surface listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server exited unexpectedly");

    client.shutdown().await;
    info!("mahiro stopped");
    served
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "cannot install SIGTERM handler, waiting for Ctrl+C only");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    info!("received shutdown signal");
}
