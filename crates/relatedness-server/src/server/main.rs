//! # `relatedness-server`
//!
//! HTTP access to the shared relatedness store.
//!
//! ## Usage
//!
//! ```bash
//! DB_PATH=/data/relatedness.db cargo run --bin relatedness-server --release
//! ```

use clap::Parser;
use relatedness_server::server::config::{CliArgs, ServerConfig};
use relatedness_server::server::service::handler::AppState;
use relatedness_server::server::{service, shutdown_signal};
use relatedness_server::telemetry::init_tracing;
use tokio::net::TcpListener;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    init_tracing(config.settings.log_format)?;

    let store = config.settings.open_store()?;
    let app = service::router(AppState::new(store, config.settings.queue.clone()));

    let listener = TcpListener::bind(config.server_addr).await?;
    log_startup_info(&config);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Service shut down successfully");
    Ok(())
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting relatedness service on {} with full config: {:#?}",
            config.server_addr,
            config
        );
    } else {
        tracing::info!(
            "Starting relatedness service on {} with store {}",
            config.server_addr,
            config.settings.db_path.display()
        );
    }
}
