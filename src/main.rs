use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use turnstile::config::TurnstileConfig;
use turnstile::gate::Gate;
use turnstile::ratelimit::{Limiter, Sweeper};
use turnstile::server::{app_router, HttpServer};

/// Fixed-window admission control in front of a web application.
#[derive(Parser, Debug)]
#[command(name = "turnstile", version, about)]
struct Args {
    /// Path to a configuration file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the configuration file
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Maximum admits per client per window
    #[arg(long)]
    limit: Option<u32>,

    /// Window length in milliseconds
    #[arg(long)]
    window_ms: Option<u64>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    if args.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Starting Turnstile");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = TurnstileConfig::load(args.config.as_deref())?;
    if let Some(addr) = args.listen {
        config.server.listen_addr = addr;
    }
    if let Some(limit) = args.limit {
        config.rate_limiting.limit = limit;
    }
    if let Some(window_ms) = args.window_ms {
        config.rate_limiting.window_ms = window_ms;
    }
    config.validate()?;

    info!(
        listen_addr = %config.server.listen_addr,
        limit = config.rate_limiting.limit,
        window_ms = config.rate_limiting.window_ms,
        paths = ?config.gate.paths,
        "Configuration loaded"
    );

    let limiter = Arc::new(Limiter::from_config(&config.rate_limiting));

    let sweeper = config.sweep.enabled.then(|| {
        Sweeper::spawn(
            limiter.clone(),
            config.sweep.interval(),
            config.sweep.retention(limiter.window()),
        )
    });
    if sweeper.is_none() {
        info!("Window sweep disabled, the client table will not shrink");
    }

    let router = app_router(Gate::new(limiter.clone(), &config.gate));
    let server = HttpServer::new(config.server.listen_addr, router);

    server.serve_with_shutdown(shutdown_signal()).await?;

    if let Some(sweeper) = sweeper {
        sweeper.shutdown();
    }

    info!(tracked_clients = limiter.len(), "Turnstile stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
