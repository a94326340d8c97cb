//! Cross-market views of large trades and large positions.

use serde::Serialize;

use crate::engine::insider::pnl_percent;
use crate::engine::positions::PositionSnapshot;
use crate::types::{Category, Market, TradeEvent};

/// One large trade with the market it was placed in.
#[derive(Debug, Clone, Serialize)]
pub struct WhaleTradeRow {
    #[serde(flatten)]
    pub trade: TradeEvent,
    pub question: Option<String>,
    pub category: Option<Category>,
}

impl WhaleTradeRow {
    pub fn new(trade: TradeEvent, market: Option<&Market>) -> Self {
        Self {
            question: market.map(|m| m.question.clone()),
            category: market.map(|m| m.category),
            trade,
        }
    }
}

/// A position marked to the last traded price of its outcome.
#[derive(Debug, Clone, Serialize)]
pub struct PositionRow {
    #[serde(flatten)]
    pub position: PositionSnapshot,
    pub current_value: f64,
    /// Unrealized profit of the shares still held.
    pub pnl_usd: f64,
    pub pnl_percent: Option<f64>,
    pub question: Option<String>,
    pub category: Option<Category>,
}

impl PositionRow {
    pub fn new(position: PositionSnapshot, market: Option<&Market>) -> Self {
        Self {
            current_value: position.current_value(),
            pnl_usd: position.unrealized_pnl_usd(),
            pnl_percent: pnl_percent(position.avg_entry_price, position.current_price),
            question: market.map(|m| m.question.clone()),
            category: market.map(|m| m.category),
            position,
        }
    }
}
