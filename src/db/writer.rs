use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::api::health::HealthState;
use crate::error::Result;
use crate::types::{Market, TradeEvent};
use crate::ws::connection::backoff_delay_ms;

/// Most trades committed in one transaction.
const MAX_BATCH: usize = 256;

/// Receives accepted trades from the Ingestor and persists them to SQLite.
/// A failed batch is retried until it commits; while it waits the channel
/// fills up and the Ingestor blocks on it.
pub struct DbWriter {
    pool: sqlx::SqlitePool,
    trade_rx: mpsc::Receiver<TradeEvent>,
    health: Arc<HealthState>,
}

impl DbWriter {
    pub fn new(pool: sqlx::SqlitePool, trade_rx: mpsc::Receiver<TradeEvent>, health: Arc<HealthState>) -> Self {
        Self { pool, trade_rx, health }
    }

    pub async fn run(mut self) {
        let mut batch = Vec::with_capacity(MAX_BATCH);
        while let Some(first) = self.trade_rx.recv().await {
            batch.push(first);
            while batch.len() < MAX_BATCH {
                match self.trade_rx.try_recv() {
                    Ok(t) => batch.push(t),
                    Err(_) => break,
                }
            }

            self.commit_with_retry(&batch).await;
            for _ in 0..batch.len() {
                self.health.dec_write_queue_pending();
            }
            batch.clear();
        }
    }

    /// `INSERT OR IGNORE` makes a repeated batch harmless.
    async fn commit_with_retry(&self, batch: &[TradeEvent]) {
        let mut attempt = 0usize;
        loop {
            match write_trades(&self.pool, batch).await {
                Ok(()) => {
                    if attempt > 0 {
                        info!(count = batch.len(), attempt, "DB write succeeded after retry");
                    } else {
                        debug!(count = batch.len(), "trades persisted");
                    }
                    return;
                }
                Err(e) => {
                    let delay_ms = backoff_delay_ms(attempt);
                    attempt += 1;
                    error!(count = batch.len(), attempt, "DB write error, retrying in {delay_ms}ms: {e}");
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
            }
        }
    }
}

/// Insert trades in one transaction. Ids already stored are skipped.
pub async fn write_trades(pool: &sqlx::SqlitePool, trades: &[TradeEvent]) -> Result<()> {
    let mut tx = pool.begin().await?;
    for t in trades {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO trades (id, market_id, outcome, side, user_id, amount_usd, price, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&t.id)
        .bind(&t.market_id)
        .bind(t.outcome.as_str())
        .bind(t.side.as_str())
        .bind(&t.user_id)
        .bind(t.amount_usd)
        .bind(t.price)
        .bind(t.timestamp)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Insert or refresh catalog metadata for one market.
pub async fn upsert_market(pool: &sqlx::SqlitePool, market: &Market) -> Result<()> {
    let updated_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    sqlx::query(
        r#"
        INSERT INTO markets (id, question, category, end_date_iso, total_volume, yes_token_id, no_token_id, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            question = excluded.question,
            category = excluded.category,
            end_date_iso = excluded.end_date_iso,
            total_volume = excluded.total_volume,
            yes_token_id = excluded.yes_token_id,
            no_token_id = excluded.no_token_id,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&market.id)
    .bind(&market.question)
    .bind(market.category.to_string())
    .bind(&market.end_date_iso)
    .bind(market.total_volume)
    .bind(&market.yes_token_id)
    .bind(&market.no_token_id)
    .bind(updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::reader::load_trades;
    use crate::types::{Outcome, Side};

    fn trade(id: &str) -> TradeEvent {
        TradeEvent {
            id: id.to_string(),
            market_id: "m1".to_string(),
            outcome: Outcome::Yes,
            side: Side::Buy,
            user_id: "0xuser".to_string(),
            amount_usd: 120.0,
            price: 0.6,
            timestamp: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn failed_batch_is_retried_until_it_commits() {
        // schema is created only after the first write has failed
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let health = Arc::new(HealthState::new());
        let (tx, rx) = mpsc::channel(8);
        let writer = tokio::spawn(DbWriter::new(pool.clone(), rx, Arc::clone(&health)).run());

        health.inc_write_queue_pending();
        tx.send(trade("t1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(write_trades(&pool, &[trade("early")]).await.is_err());

        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        drop(tx);
        writer.await.unwrap();

        let stored = load_trades(&pool).await.unwrap();
        assert_eq!(stored, vec![trade("t1")]);
        assert_eq!(health.write_queue_pending(), 0);
    }
}
