//! Git Web Navigator - read-only HTTP view over a directory of git repositories
//!
//! # Usage
//! ```bash
//! git-web-nav --root /srv/git              # Serve every repository under /srv/git
//! git-web-nav -r /srv/git -p 8080 --serve-index
//! git-web-nav --whitelist team/app,docs    # Only expose the listed repositories
//! ```

mod config;
mod error;
mod git;
mod models;
mod routes;

use std::sync::Arc;

use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::{Cli, Config};
use routes::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from(cli);
    if let Err(e) = config.validate() {
        error!(error = %e, "invalid configuration");
        eprintln!("✗ {}", e);
        std::process::exit(1);
    }
    if !config.root.is_dir() {
        tracing::warn!(root = %config.root.display(), "repository root does not exist yet");
    }

    let addr = format!("{}:{}", config.host, config.port);
    info!(
        root = %config.root.display(),
        prefix = %config.api_prefix,
        filter = ?config.filter.mode(),
        "starting server"
    );

    let state = Arc::new(AppState::new(config));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::create_router(state)?
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("✗ Failed to bind to {}: {}", addr, e);
            eprintln!("  Try a different port with --port <PORT>");
            std::process::exit(1);
        }
    };
    info!("listening on http://{}", addr);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("shutting down");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
