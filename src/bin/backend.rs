use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
};

use anyhow::{Context, Result};
use clap::Parser;
use newtube_backend::{
    api::{self, AppState},
    config::{DEFAULT_CONFIG_PATH, load_server_config_from},
    db::Database,
    password::SecretHasher,
};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Serve the NewTube account and video API.")]
struct Cli {
    #[arg(
        short = 'c',
        long = "config",
        value_name = "PATH",
        default_value = DEFAULT_CONFIG_PATH,
        help = "Environment file with secrets and server settings"
    )]
    config: PathBuf,
    #[arg(long = "host", value_name = "ADDR", help = "Override NEWTUBE_HOST")]
    host: Option<String>,
    #[arg(short = 'p', long = "port", value_name = "PORT", help = "Override NEWTUBE_PORT")]
    port: Option<u16>,
    #[arg(long = "database", value_name = "PATH", help = "Override DATABASE_PATH")]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = load_server_config_from(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(database) = cli.database {
        config.database_path = database;
    }
    if !config.cookie_secure {
        warn!("token cookies are sent without the Secure flag");
    }

    let db = Database::open(&config.database_path)?;
    info!(path = %db.path().display(), "database ready");

    let state = AppState::new(
        db,
        &config.tokens,
        SecretHasher::default(),
        config.cookie_secure,
    );
    let mut app = api::router(state);
    if let Some(origin) = config.cors_origin.as_deref() {
        app = app.layer(api::cors_layer(origin)?);
        info!(origin, "CORS enabled");
    }

    let host: IpAddr = config
        .host
        .parse()
        .with_context(|| format!("parsing host {:?}", config.host))?;
    let addr = SocketAddr::new(host, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!(%addr, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    info!("API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(error = %err, "failed to install Ctrl+C handler");
    }
}
