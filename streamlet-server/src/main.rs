//! Axum API server binary.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use streamlet_core::{load_streamlet_config, ArtifactKind};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use streamlet_server::{create_router, AppState};

#[derive(Debug, Parser)]
#[command(name = "streamlet-server", version, about = "Self-hosted video library server")]
struct Args {
    /// Path to the streamlet TOML config
    #[arg(long, default_value = "configs/streamlet.toml")]
    config: PathBuf,
    /// Overrides `server.host`
    #[arg(long)]
    host: Option<String>,
    /// Overrides `server.port`
    #[arg(long)]
    port: Option<u16>,
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,streamlet_core=info,streamlet_server=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    let args = Args::parse();

    let mut config = match load_streamlet_config(&args.config) {
        Ok(config) => config,
        Err(err) => {
            error!("Failed to load configuration: {err}");
            std::process::exit(1);
        }
    };
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    info!(
        roots = config.library.roots.len(),
        cache_dir = %config.paths.cache_dir.display(),
        "Starting streamlet-server"
    );

    let state = match AppState::new(config.clone()) {
        Ok(state) => state,
        Err(err) => {
            error!("Failed to open stats database: {err}");
            std::process::exit(1);
        }
    };

    if config.generation.on_startup {
        for kind in ArtifactKind::ALL {
            if let Err(err) = state.generation.start(kind) {
                warn!(%kind, error = %err, "startup generation not started");
            }
        }
    }

    let generation = state.generation.clone();
    let app = create_router(state);

    let addr: SocketAddr = match format!("{}:{}", config.server.host, config.server.port).parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!("Invalid bind address: {err}");
            std::process::exit(1);
        }
    };
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("Failed to bind {addr}: {err}");
            std::process::exit(1);
        }
    };
    info!("Listening on {}", addr);

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {err}");
    }

    info!("Waiting for background generation to finish");
    for (kind, progress) in generation.join().await {
        info!(
            %kind,
            total = progress.total,
            done = progress.done,
            failed = progress.failed,
            "generation run joined"
        );
    }
    info!("Server shutdown complete");
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to install CTRL+C handler: {err}");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
