// Copyright 2026 The Mooring Project
// SPDX-License-Identifier: Apache-2.0

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use mooring::backend;
use mooring::config;
use mooring::gateway::{self, AppState};
use mooring::registry::StaticModelRegistry;

#[derive(Parser)]
#[command(name = "mooring", about = "OpenAI-compatible local inference gateway")]
struct Cli {
    /// Path to the mooring.yaml config file
    #[arg(long, default_value = "mooring.yaml", env = "MOORING_CONFIG")]
    config: PathBuf,

    /// Port to listen on (overrides server.port)
    #[arg(long, env = "MOORING_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match config::load_or_default(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("failed to load config {}: {e}", cli.config.display());
            std::process::exit(1);
        }
    };
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    tracing::info!(
        version = %config.version,
        backend = ?config.backend.kind,
        models = config.models.len(),
        config_hash = %config.config_hash,
        "config loaded"
    );

    let backend = match backend::build_backend(&config.backend) {
        Ok(b) => b,
        Err(e) => {
            tracing::error!("failed to build backend: {e}");
            std::process::exit(1);
        }
    };

    let addr = SocketAddr::from((gateway::BIND_HOST, config.server.port));
    let config = Arc::new(config);
    let registry = Arc::new(StaticModelRegistry::new(config.models.clone()));
    let state = AppState::new(config, registry, backend);
    let _sweeper = state.sessions.spawn_sweeper();

    let app = gateway::build_router(state);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(%addr, "failed to bind: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(%addr, "mooring listening");

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("server error: {e}");
        std::process::exit(1);
    }
}
