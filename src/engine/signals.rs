//! Derived market signals. Everything here is a pure function of aggregates.

use serde::{Serialize, Serializer};

use crate::config::RATIO_SENTINEL;
use crate::engine::aggregator::MarketAggregate;
use crate::state::Quote;
use crate::types::Category;

// ---------------------------------------------------------------------------
// Ratio
// ---------------------------------------------------------------------------

/// Count ratio with an explicit marker for a zero denominator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Ratio {
    Finite(f64),
    /// Denominator is zero while the numerator is not.
    Unbounded,
}

impl Ratio {
    /// `0 / 0` is neutral (1.0); `n / 0` is unbounded.
    pub fn of(numerator: u64, denominator: u64) -> Self {
        match (numerator, denominator) {
            (0, 0) => Ratio::Finite(1.0),
            (_, 0) => Ratio::Unbounded,
            (n, d) => Ratio::Finite(n as f64 / d as f64),
        }
    }

    /// Numeric value with `Unbounded` capped at `RATIO_SENTINEL`.
    pub fn as_f64(&self) -> f64 {
        match self {
            Ratio::Finite(v) => v.min(RATIO_SENTINEL),
            Ratio::Unbounded => RATIO_SENTINEL,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        matches!(self, Ratio::Unbounded)
    }
}

impl Serialize for Ratio {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_f64())
    }
}

// ---------------------------------------------------------------------------
// SignalRow
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpreadSource {
    /// Best ask minus best bid from the live order book.
    Book,
    /// Mean buy price minus mean sell price over the window.
    TradeProxy,
    None,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignalRow {
    #[serde(flatten)]
    pub aggregate: MarketAggregate,
    pub question: Option<String>,
    pub category: Option<Category>,
    pub last_price: Option<f64>,
    pub price_change: f64,
    pub whale_pressure: f64,
    pub buy_sell_ratio: Ratio,
    pub whale_buy_sell_ratio: Ratio,
    pub volatility: f64,
    pub spread: f64,
    pub spread_source: SpreadSource,
}

/// Derive a signal row from the current window and, optionally, the window of
/// equal length right before it.
pub fn compute_signals(
    aggregate: &MarketAggregate,
    prior: Option<&MarketAggregate>,
    quote: Option<Quote>,
) -> SignalRow {
    let last_price = aggregate.prices.last;
    let price_change = match (last_price, prior.and_then(|p| p.prices.last)) {
        (Some(now), Some(before)) => now - before,
        _ => 0.0,
    };

    let (spread, spread_source) = spread_of(aggregate, quote);

    SignalRow {
        aggregate: aggregate.clone(),
        question: None,
        category: None,
        last_price,
        price_change,
        whale_pressure: aggregate.whale_volume_buy - aggregate.whale_volume_sell,
        buy_sell_ratio: Ratio::of(aggregate.buyer_count, aggregate.seller_count),
        whale_buy_sell_ratio: Ratio::of(aggregate.whale_buy_count, aggregate.whale_sell_count),
        volatility: aggregate.prices.population_stddev(),
        spread,
        spread_source,
    }
}

fn spread_of(aggregate: &MarketAggregate, quote: Option<Quote>) -> (f64, SpreadSource) {
    if let Some(q) = quote {
        if q.best_ask > 0.0 && q.best_bid > 0.0 {
            return ((q.best_ask - q.best_bid).max(0.0), SpreadSource::Book);
        }
    }
    match (aggregate.prices.mean_buy, aggregate.prices.mean_sell) {
        (Some(buy), Some(sell)) => ((buy - sell).max(0.0), SpreadSource::TradeProxy),
        _ => (0.0, SpreadSource::None),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
