//! Database row types matching `migrations/0001_init.sql`.
//! Used by sqlx for typed queries.

use crate::error::AppError;
use crate::types::{Category, Market, TradeEvent};

#[derive(Debug, sqlx::FromRow)]
pub struct MarketRow {
    pub id: String,
    pub question: String,
    pub category: Option<String>,
    pub end_date_iso: Option<String>,
    pub total_volume: Option<f64>,
    pub yes_token_id: String,
    pub no_token_id: String,
}

impl From<MarketRow> for Market {
    fn from(r: MarketRow) -> Self {
        Market {
            id: r.id,
            question: r.question,
            category: r.category.as_deref().map(Category::parse_lenient).unwrap_or(Category::Other),
            end_date_iso: r.end_date_iso,
            total_volume: r.total_volume,
            yes_token_id: r.yes_token_id,
            no_token_id: r.no_token_id,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct TradeRow {
    pub id: String,
    pub market_id: String,
    pub outcome: String,
    pub side: String,
    pub user_id: String,
    pub amount_usd: f64,
    pub price: f64,
    pub timestamp: i64,
}

impl TryFrom<TradeRow> for TradeEvent {
    type Error = AppError;

    fn try_from(r: TradeRow) -> Result<Self, Self::Error> {
        let outcome = r
            .outcome
            .parse()
            .map_err(|e| AppError::Internal(format!("trade {}: {e}", r.id)))?;
        let side = r
            .side
            .parse()
            .map_err(|e| AppError::Internal(format!("trade {}: {e}", r.id)))?;
        Ok(TradeEvent {
            id: r.id,
            market_id: r.market_id,
            outcome,
            side,
            user_id: r.user_id,
            amount_usd: r.amount_usd,
            price: r.price,
            timestamp: r.timestamp,
        })
    }
}
