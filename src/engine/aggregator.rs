//! Per-market, per-outcome window statistics.

use std::collections::HashSet;
use std::time::Instant;

use serde::Serialize;

use crate::error::QueryError;
use crate::ledger::TradeLedger;
use crate::types::{Outcome, Side, TimeRange, TradeEvent, Window};

// ---------------------------------------------------------------------------
// ScanBudget
// ---------------------------------------------------------------------------

/// Upper bound on the work a single ledger scan may do.
#[derive(Debug, Clone, Copy)]
pub struct ScanBudget {
    pub max_rows: usize,
    pub deadline: Option<Instant>,
}

impl ScanBudget {
    pub fn new(max_rows: usize, deadline: Option<Instant>) -> Self {
        Self { max_rows, deadline }
    }

    pub fn unbounded() -> Self {
        Self { max_rows: usize::MAX, deadline: None }
    }

    /// Fails fast when a scan of `rows` rows would exceed the row budget.
    pub fn admit(&self, rows: usize) -> Result<(), QueryError> {
        if rows > self.max_rows {
            return Err(QueryError::RowBudget { scanned: rows, budget: self.max_rows });
        }
        self.check_deadline(0)
    }

    pub fn check_deadline(&self, scanned: usize) -> Result<(), QueryError> {
        match self.deadline {
            Some(d) if Instant::now() >= d => Err(QueryError::Deadline { scanned }),
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// MarketAggregate
// ---------------------------------------------------------------------------

/// Price statistics of one window, folded with Welford's method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PriceStats {
    pub count: u64,
    pub mean: f64,
    /// Sum of squared deviations from the mean.
    pub m2: f64,
    /// Price of the latest trade in the window.
    pub last: Option<f64>,
    pub mean_buy: Option<f64>,
    pub mean_sell: Option<f64>,
}

impl PriceStats {
    /// Population standard deviation; 0 with fewer than two samples.
    pub fn population_stddev(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        (self.m2 / self.count as f64).max(0.0).sqrt()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketAggregate {
    pub market_id: String,
    pub outcome: Outcome,
    pub window: Window,
    pub window_start: i64,
    pub window_end: i64,
    pub volume: f64,
    pub trade_count: u64,
    /// Distinct users with at least one buy in the window.
    pub buyer_count: u64,
    /// Distinct users with at least one sell in the window.
    pub seller_count: u64,
    pub unique_addr_count: u64,
    pub whale_buy_count: u64,
    pub whale_sell_count: u64,
    pub whale_volume_buy: f64,
    pub whale_volume_sell: f64,
    #[serde(skip)]
    pub prices: PriceStats,
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct Aggregator {
    pub whale_threshold_usd: f64,
}

impl Aggregator {
    pub fn new(whale_threshold_usd: f64) -> Self {
        Self { whale_threshold_usd }
    }

    /// Aggregate the `window` ending at `now`.
    pub fn aggregate(
        &self,
        ledger: &TradeLedger,
        market_id: &str,
        outcome: Outcome,
        window: Window,
        now: i64,
        budget: &ScanBudget,
    ) -> Result<MarketAggregate, QueryError> {
        let range = TimeRange::window_ending(window, now);
        self.aggregate_range(ledger, market_id, outcome, window, range, budget)
    }

    pub fn aggregate_range(
        &self,
        ledger: &TradeLedger,
        market_id: &str,
        outcome: Outcome,
        window: Window,
        range: TimeRange,
        budget: &ScanBudget,
    ) -> Result<MarketAggregate, QueryError> {
        let scan = ledger.query(market_id, outcome, range);
        budget.admit(scan.len())?;
        let agg = self.from_events(market_id, outcome, window, range, scan.iter());
        budget.check_deadline(scan.len())?;
        Ok(agg)
    }

    /// Single pass over arbitrary events; anything outside the market, outcome
    /// or range is ignored. Sums are folded in `(timestamp, id)` order, so the
    /// result is bit-identical for every permutation of `events`.
    pub fn from_events<'a>(
        &self,
        market_id: &str,
        outcome: Outcome,
        window: Window,
        range: TimeRange,
        events: impl IntoIterator<Item = &'a TradeEvent>,
    ) -> MarketAggregate {
        let mut in_window: Vec<&TradeEvent> = events
            .into_iter()
            .filter(|e| e.market_id == market_id && e.outcome == outcome && range.contains(e.timestamp))
            .collect();
        in_window.sort_unstable_by(|a, b| a.order_key().cmp(&b.order_key()));

        let mut agg = MarketAggregate {
            market_id: market_id.to_string(),
            outcome,
            window,
            window_start: range.start,
            window_end: range.end,
            volume: 0.0,
            trade_count: 0,
            buyer_count: 0,
            seller_count: 0,
            unique_addr_count: 0,
            whale_buy_count: 0,
            whale_sell_count: 0,
            whale_volume_buy: 0.0,
            whale_volume_sell: 0.0,
            prices: PriceStats::default(),
        };

        let mut buyers: HashSet<&str> = HashSet::new();
        let mut sellers: HashSet<&str> = HashSet::new();
        let mut addrs: HashSet<&str> = HashSet::new();
        let (mut buy_price_sum, mut buy_trades) = (0.0, 0u64);
        let (mut sell_price_sum, mut sell_trades) = (0.0, 0u64);

        for e in in_window {
            agg.volume += e.amount_usd;
            agg.trade_count += 1;
            addrs.insert(e.user_id.as_str());

            let whale = e.is_whale(self.whale_threshold_usd);
            match e.side {
                Side::Buy => {
                    buyers.insert(e.user_id.as_str());
                    buy_price_sum += e.price;
                    buy_trades += 1;
                    if whale {
                        agg.whale_buy_count += 1;
                        agg.whale_volume_buy += e.amount_usd;
                    }
                }
                Side::Sell => {
                    sellers.insert(e.user_id.as_str());
                    sell_price_sum += e.price;
                    sell_trades += 1;
                    if whale {
                        agg.whale_sell_count += 1;
                        agg.whale_volume_sell += e.amount_usd;
                    }
                }
            }

            let p = &mut agg.prices;
            p.count += 1;
            let delta = e.price - p.mean;
            p.mean += delta / p.count as f64;
            p.m2 += delta * (e.price - p.mean);
            p.last = Some(e.price);
        }

        agg.buyer_count = buyers.len() as u64;
        agg.seller_count = sellers.len() as u64;
        agg.unique_addr_count = addrs.len() as u64;
        agg.prices.mean_buy = (buy_trades > 0).then(|| buy_price_sum / buy_trades as f64);
        agg.prices.mean_sell = (sell_trades > 0).then(|| sell_price_sum / sell_trades as f64);
        agg
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn trade(id: &str, side: Side, user: &str, amount: f64, price: f64, ts: i64) -> TradeEvent {
        TradeEvent {
            id: id.to_string(),
            market_id: "m1".to_string(),
            outcome: Outcome::Yes,
            side,
            user_id: user.to_string(),
            amount_usd: amount,
            price,
            timestamp: ts,
        }
    }

    fn sample() -> Vec<TradeEvent> {
        vec![
            trade("a", Side::Buy, "u1", 1_234.56, 0.41, NOW - 300),
            trade("b", Side::Sell, "u2", 25_000.10, 0.43, NOW - 200),
            trade("c", Side::Buy, "u3", 12_000.33, 0.47, NOW - 200),
            trade("d", Side::Buy, "u1", 0.07, 0.52, NOW - 100),
            trade("e", Side::Sell, "u4", 9_999.99, 0.38, NOW - 50),
            trade("f", Side::Buy, "u5", 77_777.77, 0.61, NOW - 10),
        ]
    }

    fn window() -> TimeRange {
        TimeRange::window_ending(Window::Hour1, NOW)
    }

    fn bits(agg: &MarketAggregate) -> Vec<u64> {
        vec![
            agg.volume.to_bits(),
            agg.whale_volume_buy.to_bits(),
            agg.whale_volume_sell.to_bits(),
            agg.prices.mean.to_bits(),
            agg.prices.m2.to_bits(),
        ]
    }

    #[test]
    fn aggregate_is_identical_for_every_arrival_order() {
        let agg = Aggregator::new(10_000.0);
        let events = sample();
        let base = agg.from_events("m1", Outcome::Yes, Window::Hour1, window(), &events);

        let mut reversed = events.clone();
        reversed.reverse();
        let mut permutations = vec![reversed];
        for k in 1..events.len() {
            let mut rotated = events.clone();
            rotated.rotate_left(k);
            permutations.push(rotated);
        }
        let mut swapped = events.clone();
        swapped.swap(0, 5);
        swapped.swap(2, 3);
        permutations.push(swapped);

        for p in &permutations {
            let other = agg.from_events("m1", Outcome::Yes, Window::Hour1, window(), p);
            assert_eq!(other, base);
            assert_eq!(bits(&other), bits(&base));
        }
    }

    #[test]
    fn whale_example_from_three_trades() {
        let agg = Aggregator::new(10_000.0);
        let events = vec![
            trade("t1", Side::Sell, "u1", 5_000.0, 0.40, NOW - 30),
            trade("t2", Side::Sell, "u2", 15_000.0, 0.42, NOW - 20),
            trade("t3", Side::Buy, "u3", 100_000.0, 0.45, NOW - 10),
        ];
        let a = agg.from_events("m1", Outcome::Yes, Window::Hour1, window(), &events);

        assert_eq!(a.trade_count, 3);
        assert_eq!(a.whale_buy_count, 1);
        assert_eq!(a.whale_sell_count, 1);
        assert_eq!(a.whale_volume_buy, 100_000.0);
        assert_eq!(a.whale_volume_sell, 15_000.0);
        assert_eq!(a.buyer_count, 1);
        assert_eq!(a.seller_count, 2);
        assert_eq!(a.unique_addr_count, 3);
        assert!((a.volume - 120_000.0).abs() < 1e-9);
    }

    #[test]
    fn whale_threshold_is_inclusive() {
        let agg = Aggregator::new(10_000.0);
        let events = vec![trade("t", Side::Buy, "u", 10_000.0, 0.5, NOW - 1)];
        let a = agg.from_events("m1", Outcome::Yes, Window::Hour1, window(), &events);
        assert_eq!(a.whale_buy_count, 1);
    }

    #[test]
    fn repeat_traders_count_once_per_side() {
        let agg = Aggregator::new(10_000.0);
        let events = vec![
            trade("1", Side::Buy, "u1", 10.0, 0.5, NOW - 3),
            trade("2", Side::Buy, "u1", 10.0, 0.5, NOW - 2),
            trade("3", Side::Sell, "u1", 10.0, 0.5, NOW - 1),
        ];
        let a = agg.from_events("m1", Outcome::Yes, Window::Hour1, window(), &events);
        assert_eq!(a.buyer_count, 1);
        assert_eq!(a.seller_count, 1);
        assert_eq!(a.unique_addr_count, 1);
        assert_eq!(a.trade_count, 3);
    }

    #[test]
    fn events_outside_window_or_outcome_are_ignored() {
        let agg = Aggregator::new(10_000.0);
        let mut other_outcome = trade("x", Side::Buy, "u", 50.0, 0.5, NOW - 5);
        other_outcome.outcome = Outcome::No;
        let events = vec![
            trade("old", Side::Buy, "u", 50.0, 0.5, NOW - 3_600),
            other_outcome,
            trade("in", Side::Buy, "u", 50.0, 0.5, NOW - 3_599),
        ];
        let a = agg.from_events("m1", Outcome::Yes, Window::Hour1, window(), &events);
        assert_eq!(a.trade_count, 1);
    }

    #[test]
    fn price_stats_track_last_and_side_means() {
        let agg = Aggregator::new(10_000.0);
        let events = vec![
            trade("1", Side::Buy, "u1", 10.0, 0.60, NOW - 3),
            trade("2", Side::Sell, "u2", 10.0, 0.50, NOW - 2),
            trade("3", Side::Buy, "u3", 10.0, 0.70, NOW - 1),
        ];
        let a = agg.from_events("m1", Outcome::Yes, Window::Hour1, window(), &events);
        assert_eq!(a.prices.last, Some(0.70));
        assert!((a.prices.mean_buy.unwrap() - 0.65).abs() < 1e-12);
        assert!((a.prices.mean_sell.unwrap() - 0.50).abs() < 1e-12);
        // population stddev of {0.6, 0.5, 0.7}
        let expected = (0.02f64 / 3.0).sqrt();
        assert!((a.prices.population_stddev() - expected).abs() < 1e-12);
    }

    #[test]
    fn ledger_scan_respects_row_budget() {
        let ledger = TradeLedger::new(60);
        for e in sample() {
            ledger.append_at(e, NOW).unwrap();
        }
        let agg = Aggregator::new(10_000.0);

        let tight = ScanBudget::new(3, None);
        let err = agg
            .aggregate(&ledger, "m1", Outcome::Yes, Window::Hour1, NOW, &tight)
            .unwrap_err();
        assert_eq!(err, QueryError::RowBudget { scanned: 6, budget: 3 });

        let a = agg
            .aggregate(&ledger, "m1", Outcome::Yes, Window::Hour1, NOW, &ScanBudget::unbounded())
            .unwrap();
        assert_eq!(a.trade_count, 6);
        assert_eq!(a, agg.from_events("m1", Outcome::Yes, Window::Hour1, window(), &sample()));
    }

    #[test]
    fn expired_deadline_fails_the_scan() {
        let ledger = TradeLedger::new(60);
        ledger.append_at(sample().remove(0), NOW).unwrap();
        let agg = Aggregator::new(10_000.0);
        let budget = ScanBudget::new(usize::MAX, Some(Instant::now()));
        let err = agg
            .aggregate(&ledger, "m1", Outcome::Yes, Window::Hour1, NOW, &budget)
            .unwrap_err();
        assert!(matches!(err, QueryError::Deadline { .. }));
    }
}
