use std::sync::Arc;

use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use barsync_core::credentials::{JsonFileTokenStore, TokenStore};
use barsync_core::{EngineDeps, SyncEngine};
use barsync_market_data::{KisProvider, MarketDataProvider};
use barsync_storage_sqlite::{db, SqliteBarStore, SqliteTokenStore};

use crate::config::Config;

/// Installs the global subscriber. Library crates log through `log`; those
/// records are picked up by the subscriber's log bridge.
pub fn init_tracing() {
    let log_format = std::env::var("BARSYNC_LOG_FORMAT").unwrap_or_else(|_| "json".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if log_format.eq_ignore_ascii_case("text") {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init();
    } else {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .init();
    }
}

/// Opens the database and wires the engine. Must run inside the runtime.
pub fn build_engine(config: &Config) -> anyhow::Result<SyncEngine> {
    let pool = db::open(&config.db_path)?;
    let writer = db::spawn_writer(&pool)?;
    info!("Database ready at {}", config.db_path);

    let provider: Arc<dyn MarketDataProvider> = Arc::new(KisProvider::new(config.kis.clone()));

    let store = Arc::new(
        SqliteBarStore::new(pool.clone(), writer.clone())
            .with_chunk_size(config.sync.upsert_chunk_size),
    );

    let token_store: Arc<dyn TokenStore> = match &config.token_file {
        Some(path) => {
            info!("Keeping access tokens in {}", path.display());
            Arc::new(JsonFileTokenStore::new(path.clone()))
        }
        None => Arc::new(SqliteTokenStore::new(pool, writer, provider.id())),
    };

    let engine = SyncEngine::new(
        config.sync.clone(),
        EngineDeps::new(provider, store, token_store),
    )?;
    Ok(engine)
}
