mod api;
mod config;
mod db;
mod engine;
mod error;
mod fetcher;
mod ingest;
mod ledger;
mod market_refresh;
mod scorer;
mod state;
mod types;
mod ws;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::{router, ApiState};
use crate::config::{Config, CHANNEL_CAPACITY};
use crate::db::reader::{load_markets, replay_trades};
use crate::db::writer::upsert_market;
use crate::db::DbWriter;
use crate::engine::QueryFacade;
use crate::error::Result;
use crate::fetcher::fetch_markets;
use crate::ingest::{run_ingest_loop, Ingestor};
use crate::ledger::TradeLedger;
use crate::market_refresh::MarketRefresher;
use crate::scorer::FlagMonitor;
use crate::state::MarketStore;
use crate::types::ControlMsg;
use crate::ws::{ActivityFeed, BookFeed};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool = sqlx::SqlitePool::connect(&format!("sqlite:{}?mode=rwc", cfg.db_path)).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database ready at {}", cfg.db_path);

    // --- Market catalog: stored metadata first, then the live Gamma set ---
    let store = MarketStore::new();
    let stored = load_markets(&pool).await?;
    let stored_count = stored.len();
    for market in stored {
        store.insert_metadata(market);
    }
    info!("Loaded {stored_count} stored markets");

    if cfg.feeds_enabled {
        bootstrap_catalog(&cfg, &pool, &store).await;
    } else {
        info!("FEEDS_ENABLED=false: running on POST /trades and stored history only");
    }

    // --- Ledger replay ---
    let ledger = TradeLedger::new(cfg.engine.clock_skew_tolerance_secs);
    let replay = replay_trades(&pool, &ledger).await?;
    info!(
        inserted = replay.inserted,
        duplicates = replay.duplicates,
        rejected = replay.rejected,
        "Ledger rebuilt from {} stored trades",
        replay.inserted,
    );

    // --- Channels ---
    let (persist_tx, persist_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (feed_tx, feed_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (control_tx, control_rx) = mpsc::channel::<ControlMsg>(CHANNEL_CAPACITY);

    let health = Arc::new(HealthState::new());
    let latency = Arc::new(LatencyStats::new());

    // --- Spawn tasks ---

    // DB writer (durable copy of the ledger)
    let writer = DbWriter::new(pool.clone(), persist_rx, Arc::clone(&health));
    tokio::spawn(async move { writer.run().await });

    // Ingest loop for feed-sourced trades
    let ingestor = Ingestor::new(Arc::clone(&ledger), Some(persist_tx), Arc::clone(&health));
    tokio::spawn(run_ingest_loop(ingestor.clone(), feed_rx));

    if cfg.feeds_enabled {
        let book_feed = BookFeed::new(
            cfg.clob_ws_url.clone(),
            Arc::clone(&store),
            Arc::clone(&health),
            control_rx,
        );
        tokio::spawn(async move { book_feed.run().await });

        let activity_feed = ActivityFeed::new(cfg.activity_ws_url.clone(), feed_tx, Arc::clone(&health));
        tokio::spawn(async move { activity_feed.run().await });

        // Market refresher (background, every 300s)
        let refresher = MarketRefresher::new(cfg.clone(), Arc::clone(&store), control_tx, pool.clone());
        tokio::spawn(async move { refresher.run().await });
    } else {
        drop((feed_tx, control_tx, control_rx));
    }

    let facade = QueryFacade::new(Arc::clone(&ledger), Arc::clone(&store), cfg.engine.clone());

    // Flag monitor (background, every 60s)
    let monitor = FlagMonitor::new(facade.clone());
    tokio::spawn(async move { monitor.run().await });

    // HTTP API server
    let api_state = ApiState {
        facade,
        ingestor,
        health,
        latency,
        store,
        query_timeout: Duration::from_millis(cfg.query_timeout_ms),
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Fetch the live catalog, persist it, and start tracking its books. A Gamma
/// outage leaves the stored catalog in place; the refresher retries later.
async fn bootstrap_catalog(cfg: &Config, pool: &sqlx::SqlitePool, store: &MarketStore) {
    let (markets, stats) = match fetch_markets(cfg).await {
        Ok(r) => r,
        Err(e) => {
            warn!("Catalog bootstrap failed, continuing with stored markets: {e}");
            return;
        }
    };
    info!(
        "Bootstrap complete: {} markets from {} API results (min_vol=${:.0}, max={})",
        markets.len(),
        stats.api_total,
        cfg.catalog_min_volume_24h,
        cfg.catalog_max_markets,
    );
    info!(
        "[FILTER] rejected: no_tokens={} no_outcomes={} low_volume={}",
        stats.rejected_no_tokens, stats.rejected_no_outcomes, stats.rejected_low_volume,
    );
    for (q, outcomes) in &stats.outcome_samples {
        let q_short: String = q.chars().take(60).collect();
        info!("[FILTER]   \"{q_short}\" → outcomes: {outcomes:?}");
    }

    for market in &markets {
        if let Err(e) = upsert_market(pool, market).await {
            warn!("DB upsert failed for market {}: {e}", market.id);
        }
    }
    let count = markets.len();
    store.add_markets(markets);
    info!("Tracking books for {count} markets");
}
