//! `nlq-server` binary: configuration, logging and the HTTP listener

use anyhow::Context;
use clap::Parser;
use nlq_core::ServiceConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Natural-language query gateway
#[derive(Debug, Parser)]
#[command(name = "nlq-server", version, about)]
struct Args {
    /// TOML configuration file
    #[arg(long, env = "NLQ_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address
    #[arg(long, env = "NLQ_BIND", default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit JSON log lines
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(args: &Args) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    if args.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args);

    let config = match &args.config {
        Some(path) => ServiceConfig::load(path)?,
        None => ServiceConfig::default(),
    }
    .with_env_overrides();
    config.validate()?;

    tracing::info!(
        version = nlq_server::VERSION,
        translator = %config.translator.base_url,
        executor = %config.executor.base_url,
        database = config.database.as_deref().unwrap_or("-"),
        "starting nlq-server"
    );

    let service = nlq_server::build_service(config).await?;
    let app = nlq_server::router(Arc::new(service));

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("binding {}", args.bind))?;
    tracing::info!(addr = %args.bind, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
