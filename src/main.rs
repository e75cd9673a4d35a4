mod bootstrap;
mod chain;
mod config;
mod error;
mod settlement;
mod shutdown;
mod signer;
mod store;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::shutdown::ShutdownController;

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,settler=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("🚀 Starting settlement worker");

    dotenv::dotenv().ok();
    let config = Config::from_env()?;

    let engine = bootstrap::initialize_engine(&config).await?;

    let shutdown = ShutdownController::new();
    let handles = engine.start(&shutdown);

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining tasks ...");
    shutdown.begin();

    for handle in handles {
        let _ = handle.await;
    }

    info!("settlement worker stopped");
    Ok(())
}
