use tracing::warn;

use crate::db::models::{MarketRow, TradeRow};
use crate::error::Result;
use crate::ledger::{Appended, TradeLedger};
use crate::types::{Market, TradeEvent};

pub async fn load_markets(pool: &sqlx::SqlitePool) -> Result<Vec<Market>> {
    let rows: Vec<MarketRow> = sqlx::query_as(
        r#"
        SELECT id, question, category, end_date_iso, total_volume, yes_token_id, no_token_id
        FROM markets
        ORDER BY id
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(Market::from).collect())
}

/// Every stored trade in ledger order. Rows that no longer parse are skipped.
pub async fn load_trades(pool: &sqlx::SqlitePool) -> Result<Vec<TradeEvent>> {
    let rows: Vec<TradeRow> = sqlx::query_as(
        r#"
        SELECT id, market_id, outcome, side, user_id, amount_usd, price, timestamp
        FROM trades
        ORDER BY timestamp, id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut trades = Vec::with_capacity(rows.len());
    for row in rows {
        match TradeEvent::try_from(row) {
            Ok(t) => trades.push(t),
            Err(e) => warn!("skipping stored trade: {e}"),
        }
    }
    Ok(trades)
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub inserted: usize,
    pub duplicates: usize,
    pub rejected: usize,
}

/// Rebuild the ledger from the persisted trade log.
pub async fn replay_trades(pool: &sqlx::SqlitePool, ledger: &TradeLedger) -> Result<ReplayStats> {
    let mut stats = ReplayStats::default();
    for trade in load_trades(pool).await? {
        match ledger.append(trade) {
            Ok(Appended::Inserted) => stats.inserted += 1,
            Ok(Appended::Duplicate) => stats.duplicates += 1,
            Err(e) => {
                stats.rejected += 1;
                warn!("replay rejected: {e}");
            }
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::writer::{upsert_market, write_trades};
    use crate::types::{Category, Outcome, Side};

    async fn memory_pool() -> sqlx::SqlitePool {
        // one connection: every in-memory connection is its own database
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn trade(id: &str, ts: i64) -> TradeEvent {
        TradeEvent {
            id: id.to_string(),
            market_id: "m1".to_string(),
            outcome: Outcome::No,
            side: Side::Sell,
            user_id: "0xuser".to_string(),
            amount_usd: 250.0,
            price: 0.35,
            timestamp: ts,
        }
    }

    #[tokio::test]
    async fn trades_survive_a_restart() {
        let pool = memory_pool().await;
        write_trades(&pool, &[trade("b", 200), trade("a", 100)]).await.unwrap();
        // written twice: ignored by primary key
        write_trades(&pool, &[trade("a", 100)]).await.unwrap();

        let loaded = load_trades(&pool).await.unwrap();
        assert_eq!(loaded, vec![trade("a", 100), trade("b", 200)]);

        let ledger = TradeLedger::new(60);
        let stats = replay_trades(&pool, &ledger).await.unwrap();
        assert_eq!(stats, ReplayStats { inserted: 2, duplicates: 0, rejected: 0 });
        assert!(ledger.contains("a"));
        assert_eq!(ledger.last_price("m1", Outcome::No), Some(0.35));
    }

    #[tokio::test]
    async fn market_upsert_refreshes_metadata() {
        let pool = memory_pool().await;
        let mut market = Market {
            id: "m1".to_string(),
            question: "Old question".to_string(),
            category: Category::Sports,
            end_date_iso: None,
            total_volume: Some(10.0),
            yes_token_id: "y".to_string(),
            no_token_id: "n".to_string(),
        };
        upsert_market(&pool, &market).await.unwrap();
        market.question = "New question".to_string();
        upsert_market(&pool, &market).await.unwrap();

        let loaded = load_markets(&pool).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].question, "New question");
        assert_eq!(loaded[0].category, Category::Sports);
        assert_eq!(loaded[0].yes_token_id, "y");
    }
}
