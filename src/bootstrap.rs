use std::{sync::Arc, time::Duration};

use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;

use crate::chain::EvmChain;
use crate::config::Config;
use crate::error::{SettlementError, SettlementResult};
use crate::settlement::{EngineConfig, SettlementEngine};
use crate::signer::{LocalTxSigner, TxSigner};
use crate::store::PgIntentStore;

/// Builds the settlement engine and everything it owns: database pool,
/// chain client and signer. Resources are acquired here, before any task
/// starts, and live until the engine's tasks have exited.
pub async fn initialize_engine(config: &Config) -> SettlementResult<SettlementEngine> {
    info!("initializing settlement worker components ...");

    let pool = initialize_database(&config.database_url).await?;
    let store = Arc::new(PgIntentStore::new(pool));

    // Crash recovery: a previous run may have died between the PROCESSING
    // write and a terminal write. Sweep those rows back to PENDING before
    // the producer starts polling.
    let released = store.release_stuck_processing().await?;
    if released > 0 {
        info!("♻️  recovered {} intents from interrupted runs", released);
    }

    let chain = Arc::new(EvmChain::connect(&config.rpc_url)?);
    info!("✅ chain client connected: {}", config.rpc_url);

    let signer = Arc::new(LocalTxSigner::new(&config.private_key, config.chain_id)?);
    info!("✅ signer ready: {:?}", signer.address());

    let engine = SettlementEngine::new(EngineConfig::from(config), store, chain, signer);
    info!("✅ settlement engine assembled");

    Ok(engine)
}

async fn initialize_database(database_url: &str) -> SettlementResult<PgPool> {
    info!("📊 connecting to database ...");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .connect(database_url)
        .await
        .map_err(|e| SettlementError::store("connect", e))?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| SettlementError::store("migrate", e))?;

    info!("✓ database initialized");
    Ok(pool)
}
