//! Per-user positions folded from a market's trade log.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::trace;

use crate::engine::aggregator::ScanBudget;
use crate::error::QueryError;
use crate::ledger::TradeLedger;
use crate::types::{Outcome, Side, TimeRange, TradeEvent};

/// Positions smaller than this many shares are treated as closed.
const DUST_SHARES: f64 = 1e-9;

/// Holdings of one user in one outcome of one market.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionSnapshot {
    pub user_id: String,
    pub market_id: String,
    pub outcome: Outcome,
    /// Cost basis of the shares still held.
    pub invested_usd: f64,
    pub shares: f64,
    pub avg_entry_price: f64,
    pub current_price: f64,
    /// Buy fills that opened or added to the position.
    pub n_positions: u32,
    pub first_trade_timestamp: i64,
    /// Sale proceeds minus the cost basis of the shares sold.
    pub realized_pnl_usd: f64,
}

impl PositionSnapshot {
    pub fn new(user_id: &str, market_id: &str, outcome: Outcome, first_trade_timestamp: i64) -> Self {
        Self {
            user_id: user_id.to_string(),
            market_id: market_id.to_string(),
            outcome,
            invested_usd: 0.0,
            shares: 0.0,
            avg_entry_price: 0.0,
            current_price: 0.0,
            n_positions: 0,
            first_trade_timestamp,
            realized_pnl_usd: 0.0,
        }
    }

    /// Fold one fill into the position.
    ///
    /// A buy adds `amount / price` shares at cost `amount` and re-weights the
    /// average entry. A sell removes `amount / price` shares (capped at the
    /// holding) at the average entry; the average itself is unchanged.
    pub fn apply(&mut self, event: &TradeEvent) {
        self.first_trade_timestamp = self.first_trade_timestamp.min(event.timestamp);
        match event.side {
            Side::Buy => {
                self.n_positions += 1;
                self.invested_usd += event.amount_usd;
                if event.price > 0.0 {
                    self.shares += event.amount_usd / event.price;
                }
                if self.shares > DUST_SHARES {
                    self.avg_entry_price = self.invested_usd / self.shares;
                }
            }
            Side::Sell => {
                if event.price <= 0.0 || self.shares <= DUST_SHARES {
                    return;
                }
                let sold = (event.amount_usd / event.price).min(self.shares);
                self.realized_pnl_usd += sold * (event.price - self.avg_entry_price);
                self.shares -= sold;
                self.invested_usd -= sold * self.avg_entry_price;
                if self.shares <= DUST_SHARES {
                    self.shares = 0.0;
                    self.invested_usd = 0.0;
                }
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.invested_usd > 0.0
    }

    /// Mark-to-market value of the shares still held.
    pub fn current_value(&self) -> f64 {
        self.shares * self.current_price
    }

    pub fn unrealized_pnl_usd(&self) -> f64 {
        self.current_value() - self.invested_usd
    }
}

/// Fold one user's fills in a (market, outcome) into a position, closed or
/// not. `None` when the user never traded it.
pub fn fold_user<'a>(
    user_id: &str,
    market_id: &str,
    outcome: Outcome,
    events: impl IntoIterator<Item = &'a TradeEvent>,
    current_price: f64,
) -> Option<PositionSnapshot> {
    let mut fills: Vec<&TradeEvent> = events
        .into_iter()
        .filter(|e| e.user_id == user_id && e.market_id == market_id && e.outcome == outcome)
        .collect();
    fills.sort_unstable_by(|a, b| a.order_key().cmp(&b.order_key()));

    let first = fills.first()?;
    let mut position = PositionSnapshot::new(user_id, market_id, outcome, first.timestamp);
    for e in fills {
        position.apply(e);
    }
    position.current_price = current_price;
    Some(position)
}

// ---------------------------------------------------------------------------
// MarketPopulation
// ---------------------------------------------------------------------------

/// Every open position in one (market, outcome), ordered by user id.
#[derive(Debug, Clone, Default)]
pub struct MarketPopulation {
    pub positions: Vec<PositionSnapshot>,
}

impl MarketPopulation {
    /// Fold the tuple's full history out of the ledger.
    pub fn build(
        ledger: &TradeLedger,
        market_id: &str,
        outcome: Outcome,
        budget: &ScanBudget,
    ) -> Result<Self, QueryError> {
        let scan = ledger.query(market_id, outcome, TimeRange::all());
        budget.admit(scan.len())?;
        let current_price = scan.last().map(|e| e.price).unwrap_or(0.0);
        let population = Self::from_events(market_id, outcome, scan.iter(), current_price);
        budget.check_deadline(scan.len())?;
        trace!(market_id, %outcome, rows = scan.len(), open = population.len(), "population built");
        Ok(population)
    }

    /// Events are folded in `(timestamp, id)` order regardless of input order;
    /// events for other markets or outcomes are ignored.
    pub fn from_events<'a>(
        market_id: &str,
        outcome: Outcome,
        events: impl IntoIterator<Item = &'a TradeEvent>,
        current_price: f64,
    ) -> Self {
        let mut relevant: Vec<&TradeEvent> = events
            .into_iter()
            .filter(|e| e.market_id == market_id && e.outcome == outcome)
            .collect();
        relevant.sort_unstable_by(|a, b| a.order_key().cmp(&b.order_key()));

        let mut by_user: BTreeMap<&str, PositionSnapshot> = BTreeMap::new();
        for e in relevant {
            by_user
                .entry(e.user_id.as_str())
                .or_insert_with(|| PositionSnapshot::new(&e.user_id, market_id, outcome, e.timestamp))
                .apply(e);
        }

        let positions = by_user
            .into_values()
            .filter(PositionSnapshot::is_open)
            .map(|mut p| {
                p.current_price = current_price;
                p
            })
            .collect();
        Self { positions }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}
