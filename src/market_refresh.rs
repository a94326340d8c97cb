use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::config::{Config, MARKET_REFRESH_INTERVAL_SECS};
use crate::db::writer::upsert_market;
use crate::fetcher::fetch_markets;
use crate::state::MarketStore;
use crate::types::{ControlMsg, Market};

/// Re-fetches the Gamma catalog every few minutes and reconciles the book
/// subscriptions with it. Retired markets keep their metadata so historical
/// trades still resolve question and category.
pub struct MarketRefresher {
    cfg: Config,
    store: Arc<MarketStore>,
    control_tx: mpsc::Sender<ControlMsg>,
    pool: sqlx::SqlitePool,
}

impl MarketRefresher {
    pub fn new(
        cfg: Config,
        store: Arc<MarketStore>,
        control_tx: mpsc::Sender<ControlMsg>,
        pool: sqlx::SqlitePool,
    ) -> Self {
        Self { cfg, store, control_tx, pool }
    }

    pub async fn run(self) {
        let mut ticker = interval(Duration::from_secs(MARKET_REFRESH_INTERVAL_SECS));
        ticker.tick().await; // bootstrap already fetched once

        loop {
            ticker.tick().await;
            if let Err(e) = self.refresh().await {
                error!("Market refresh failed: {e}");
            }
        }
    }

    async fn refresh(&self) -> crate::error::Result<()> {
        let (fresh_markets, _) = fetch_markets(&self.cfg).await?;
        let current_ids: HashSet<String> = self.store.tracked_market_ids().into_iter().collect();
        let (to_add, to_remove) = diff_catalog(&current_ids, fresh_markets);

        let removed_count = to_remove.len();
        let added_count = to_add.len();
        let unchanged_count = current_ids.len().saturating_sub(removed_count);

        for market_id in &to_remove {
            // the book feed resolves token ids from the store, so unsubscribe first
            if let Err(e) = self.control_tx.send(ControlMsg::Unsubscribe(market_id.clone())).await {
                warn!("Failed to send Unsubscribe for {market_id}: {e}");
            }
            self.store.retire_market(market_id);
        }

        if !to_add.is_empty() {
            for market in &to_add {
                if let Err(e) = upsert_market(&self.pool, market).await {
                    warn!("DB upsert failed for market {}: {e}", market.id);
                }
                self.store.add_market(market.clone());
            }
            if let Err(e) = self.control_tx.send(ControlMsg::Subscribe(to_add)).await {
                warn!("Failed to send Subscribe batch: {e}");
            }
        }

        info!(
            added = added_count,
            removed = removed_count,
            unchanged = unchanged_count,
            total = self.store.tracked_market_count(),
            "Market refresh complete: +{added_count} added, -{removed_count} removed, {unchanged_count} unchanged",
        );
        Ok(())
    }
}

/// Split a fresh catalog against the tracked ids into (new markets, retired ids).
fn diff_catalog(current_ids: &HashSet<String>, fresh: Vec<Market>) -> (Vec<Market>, Vec<String>) {
    let fresh_ids: HashSet<&str> = fresh.iter().map(|m| m.id.as_str()).collect();
    let mut to_remove: Vec<String> = current_ids
        .iter()
        .filter(|id| !fresh_ids.contains(id.as_str()))
        .cloned()
        .collect();
    to_remove.sort();
    let to_add = fresh.into_iter().filter(|m| !current_ids.contains(&m.id)).collect();
    (to_add, to_remove)
}
