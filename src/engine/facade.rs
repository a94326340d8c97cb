//! Read-only, ranked views over the ledger for the presentation layer.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;

use crate::config::EngineConfig;
use crate::engine::aggregator::{Aggregator, ScanBudget};
use crate::engine::insider::{self, InsiderMarketRow, InsiderScore, PopulationStats};
use crate::engine::positions::{fold_user, MarketPopulation};
use crate::engine::signals::{compute_signals, SignalRow};
use crate::engine::wallet::{summarize, UserSummary};
use crate::engine::whales::{PositionRow, WhaleTradeRow};
use crate::error::QueryError;
use crate::ledger::{now_secs, TradeLedger};
use crate::state::MarketStore;
use crate::types::{Category, Market, Outcome, Side, TimeRange, TradeEvent, Window};

// ---------------------------------------------------------------------------
// Filters & sorting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct SignalFilter {
    pub category: Option<Category>,
    pub min_volume: Option<f64>,
    pub window: Window,
    pub outcome: Option<Outcome>,
    pub market_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct InsiderFilter {
    pub category: Option<Category>,
    pub market_id: Option<String>,
    pub outcome: Option<Outcome>,
    pub min_invested: Option<f64>,
    pub min_z_score: Option<f64>,
    pub flagged_only: bool,
}

#[derive(Debug, Clone)]
pub struct WhaleTradeFilter {
    pub category: Option<Category>,
    pub market_id: Option<String>,
    pub outcome: Option<Outcome>,
    pub side: Option<Side>,
    /// Falls back to the configured whale threshold.
    pub min_amount: Option<f64>,
    pub range: TimeRange,
    pub limit: usize,
}

impl Default for WhaleTradeFilter {
    fn default() -> Self {
        Self {
            category: None,
            market_id: None,
            outcome: None,
            side: None,
            min_amount: None,
            range: TimeRange::all(),
            limit: 100,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PositionFilter {
    pub category: Option<Category>,
    pub market_id: Option<String>,
    pub outcome: Option<Outcome>,
    pub user_id: Option<String>,
    pub min_invested: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSortField {
    #[default]
    Volume,
    TradeCount,
    UniqueAddrs,
    WhalePressure,
    BuySellRatio,
    WhaleBuySellRatio,
    Volatility,
    Spread,
    PriceChange,
    LastPrice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsiderSortField {
    #[default]
    ZScore,
    Invested,
    PnlPercent,
    DaysSinceFirstTrade,
    Shares,
    NPositions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSortField {
    #[default]
    Invested,
    CurrentValue,
    Pnl,
    PnlPercent,
    Shares,
    FirstTradeTimestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SortSpec<F> {
    pub field: F,
    pub direction: SortDirection,
}

impl<F> SortSpec<F> {
    pub fn new(field: F, direction: SortDirection) -> Self {
        Self { field, direction }
    }
}

impl SignalSortField {
    fn key(&self, row: &SignalRow) -> Option<f64> {
        let a = &row.aggregate;
        match self {
            SignalSortField::Volume => Some(a.volume),
            SignalSortField::TradeCount => Some(a.trade_count as f64),
            SignalSortField::UniqueAddrs => Some(a.unique_addr_count as f64),
            SignalSortField::WhalePressure => Some(row.whale_pressure),
            SignalSortField::BuySellRatio => Some(row.buy_sell_ratio.as_f64()),
            SignalSortField::WhaleBuySellRatio => Some(row.whale_buy_sell_ratio.as_f64()),
            SignalSortField::Volatility => Some(row.volatility),
            SignalSortField::Spread => Some(row.spread),
            SignalSortField::PriceChange => Some(row.price_change),
            SignalSortField::LastPrice => row.last_price,
        }
    }
}

impl InsiderSortField {
    fn key(&self, s: &InsiderScore) -> Option<f64> {
        match self {
            InsiderSortField::ZScore => s.z_score,
            InsiderSortField::Invested => Some(s.position.invested_usd),
            InsiderSortField::PnlPercent => s.pnl_percent,
            InsiderSortField::DaysSinceFirstTrade => Some(s.days_since_first_trade as f64),
            InsiderSortField::Shares => Some(s.position.shares),
            InsiderSortField::NPositions => Some(s.position.n_positions as f64),
        }
    }
}

impl PositionSortField {
    fn key(&self, row: &PositionRow) -> Option<f64> {
        match self {
            PositionSortField::Invested => Some(row.position.invested_usd),
            PositionSortField::CurrentValue => Some(row.current_value),
            PositionSortField::Pnl => Some(row.pnl_usd),
            PositionSortField::PnlPercent => row.pnl_percent,
            PositionSortField::Shares => Some(row.position.shares),
            PositionSortField::FirstTradeTimestamp => Some(row.position.first_trade_timestamp as f64),
        }
    }
}

/// Newest first by `(timestamp, id)`, at most `limit` events.
fn keep_newest(events: &mut Vec<TradeEvent>, limit: usize) {
    events.sort_unstable_by(|a, b| b.order_key().cmp(&a.order_key()));
    events.truncate(limit);
}

/// Missing values go last in either direction.
fn compare_keys(a: Option<f64>, b: Option<f64>, direction: SortDirection) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => match direction {
            SortDirection::Asc => x.total_cmp(&y),
            SortDirection::Desc => y.total_cmp(&x),
        },
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

// ---------------------------------------------------------------------------
// QueryFacade
// ---------------------------------------------------------------------------

/// Entry point for every read the dashboard makes. Holds no state of its own;
/// each call re-derives its rows from the ledger.
#[derive(Clone)]
pub struct QueryFacade {
    ledger: Arc<TradeLedger>,
    store: Arc<MarketStore>,
    aggregator: Aggregator,
    cfg: EngineConfig,
}

impl QueryFacade {
    pub fn new(ledger: Arc<TradeLedger>, store: Arc<MarketStore>, cfg: EngineConfig) -> Self {
        Self {
            aggregator: Aggregator::new(cfg.whale_threshold_usd),
            ledger,
            store,
            cfg,
        }
    }

    pub fn ledger(&self) -> &Arc<TradeLedger> {
        &self.ledger
    }

    fn budget(&self, deadline: Option<Instant>) -> ScanBudget {
        ScanBudget::new(self.cfg.scan_row_budget, deadline)
    }

    /// Markets passing the id/category filters, with their catalog entry if known.
    fn candidate_markets(
        &self,
        market_id: Option<&str>,
        category: Option<Category>,
    ) -> Vec<(String, Option<Market>)> {
        let ids = match market_id {
            Some(id) => vec![id.to_string()],
            None => self.ledger.market_ids(),
        };
        ids.into_iter()
            .map(|id| {
                let market = self.store.get_market(&id);
                (id, market)
            })
            .filter(|(_, market)| match category {
                Some(c) => market.as_ref().is_some_and(|m| m.category == c),
                None => true,
            })
            .collect()
    }

    fn outcomes(&self, market_id: &str, outcome: Option<Outcome>) -> Vec<Outcome> {
        match outcome {
            Some(o) => vec![o],
            None => self.ledger.outcomes_with_trades(market_id),
        }
    }

    pub fn ranked_signals(
        &self,
        filter: &SignalFilter,
        sort: SortSpec<SignalSortField>,
        deadline: Option<Instant>,
    ) -> Result<Vec<SignalRow>, QueryError> {
        self.ranked_signals_at(filter, sort, deadline, now_secs())
    }

    pub fn ranked_signals_at(
        &self,
        filter: &SignalFilter,
        sort: SortSpec<SignalSortField>,
        deadline: Option<Instant>,
        now: i64,
    ) -> Result<Vec<SignalRow>, QueryError> {
        let budget = self.budget(deadline);
        let range = TimeRange::window_ending(filter.window, now);
        let mut rows = Vec::new();

        for (market_id, market) in self.candidate_markets(filter.market_id.as_deref(), filter.category) {
            for outcome in self.outcomes(&market_id, filter.outcome) {
                let current =
                    self.aggregator
                        .aggregate_range(&self.ledger, &market_id, outcome, filter.window, range, &budget)?;
                if current.trade_count == 0 {
                    continue;
                }
                if filter.min_volume.is_some_and(|min| current.volume < min) {
                    continue;
                }
                let prior = self.aggregator.aggregate_range(
                    &self.ledger,
                    &market_id,
                    outcome,
                    filter.window,
                    range.preceding(),
                    &budget,
                )?;
                let mut row = compute_signals(&current, Some(&prior), self.store.quote(&market_id, outcome));
                if let Some(m) = &market {
                    row.question = Some(m.question.clone());
                    row.category = Some(m.category);
                }
                rows.push(row);
            }
        }

        rows.sort_by(|a, b| {
            compare_keys(sort.field.key(a), sort.field.key(b), sort.direction)
                .then_with(|| a.aggregate.market_id.cmp(&b.aggregate.market_id))
                .then_with(|| a.aggregate.outcome.cmp(&b.aggregate.outcome))
        });
        Ok(rows)
    }

    /// Scores every open position of the markets/outcomes the filter selects.
    /// Value filters (`min_invested`, `min_z_score`, `flagged_only`) are not applied here.
    fn scored_positions(
        &self,
        filter: &InsiderFilter,
        deadline: Option<Instant>,
        now: i64,
    ) -> Result<Vec<InsiderScore>, QueryError> {
        let budget = self.budget(deadline);
        let mut scores = Vec::new();

        for (market_id, market) in self.candidate_markets(filter.market_id.as_deref(), filter.category) {
            for outcome in self.outcomes(&market_id, filter.outcome) {
                let population = MarketPopulation::build(&self.ledger, &market_id, outcome, &budget)?;
                let stats = PopulationStats::from_positions(&population.positions);
                for position in &population.positions {
                    let mut s = insider::score(position, &stats, now, &self.cfg.flag_policy);
                    if let Some(m) = &market {
                        s.question = Some(m.question.clone());
                        s.category = Some(m.category);
                    }
                    scores.push(s);
                }
            }
        }
        Ok(scores)
    }

    pub fn ranked_insider_scores(
        &self,
        filter: &InsiderFilter,
        sort: SortSpec<InsiderSortField>,
        deadline: Option<Instant>,
    ) -> Result<Vec<InsiderScore>, QueryError> {
        self.ranked_insider_scores_at(filter, sort, deadline, now_secs())
    }

    pub fn ranked_insider_scores_at(
        &self,
        filter: &InsiderFilter,
        sort: SortSpec<InsiderSortField>,
        deadline: Option<Instant>,
        now: i64,
    ) -> Result<Vec<InsiderScore>, QueryError> {
        let mut scores: Vec<InsiderScore> = self
            .scored_positions(filter, deadline, now)?
            .into_iter()
            .filter(|s| filter.min_invested.map_or(true, |min| s.position.invested_usd >= min))
            .filter(|s| filter.min_z_score.map_or(true, |min| s.z_score.is_some_and(|z| z >= min)))
            .filter(|s| !filter.flagged_only || s.flagged)
            .collect();

        scores.sort_by(|a, b| {
            compare_keys(sort.field.key(a), sort.field.key(b), sort.direction)
                .then_with(|| a.position.market_id.cmp(&b.position.market_id))
                .then_with(|| a.position.outcome.cmp(&b.position.outcome))
                .then_with(|| a.position.user_id.cmp(&b.position.user_id))
        });
        Ok(scores)
    }

    pub fn ranked_insider_markets(
        &self,
        filter: &InsiderFilter,
        deadline: Option<Instant>,
    ) -> Result<Vec<InsiderMarketRow>, QueryError> {
        self.ranked_insider_markets_at(filter, deadline, now_secs())
    }

    /// One row per (market, outcome) with open positions, most suspicious first.
    /// `flagged_only` keeps tuples with at least one flagged position.
    pub fn ranked_insider_markets_at(
        &self,
        filter: &InsiderFilter,
        deadline: Option<Instant>,
        now: i64,
    ) -> Result<Vec<InsiderMarketRow>, QueryError> {
        let scores = self.scored_positions(filter, deadline, now)?;

        let mut grouped: BTreeMap<(&str, Outcome), Vec<&InsiderScore>> = BTreeMap::new();
        for s in &scores {
            grouped
                .entry((s.position.market_id.as_str(), s.position.outcome))
                .or_default()
                .push(s);
        }

        let mut rows: Vec<InsiderMarketRow> = grouped
            .into_iter()
            .map(|((market_id, outcome), group)| InsiderMarketRow::from_scores(market_id, outcome, group))
            .filter(|row| !filter.flagged_only || row.flagged_positions > 0)
            .collect();

        rows.sort_by(|a, b| {
            b.suspicion_score
                .total_cmp(&a.suspicion_score)
                .then_with(|| a.market_id.cmp(&b.market_id))
                .then_with(|| a.outcome.cmp(&b.outcome))
        });
        Ok(rows)
    }

    /// Most recent trades of a market inside `range`, newest first.
    /// Only the newest `limit` events of each outcome are read.
    pub fn trades(
        &self,
        market_id: &str,
        outcome: Option<Outcome>,
        range: TimeRange,
        limit: usize,
        deadline: Option<Instant>,
    ) -> Result<Vec<TradeEvent>, QueryError> {
        let budget = self.budget(deadline);
        let mut events = Vec::new();
        for o in self.outcomes(market_id, outcome) {
            let scan = self.ledger.query(market_id, o, range);
            budget.admit(scan.len().min(limit))?;
            events.extend(scan.iter().rev().take(limit).cloned());
        }
        budget.check_deadline(events.len())?;
        keep_newest(&mut events, limit);
        Ok(events)
    }

    pub fn whale_threshold(&self) -> f64 {
        self.cfg.whale_threshold_usd
    }

    /// Large trades across every market the filter selects, newest first.
    pub fn whale_trades(
        &self,
        filter: &WhaleTradeFilter,
        deadline: Option<Instant>,
    ) -> Result<Vec<WhaleTradeRow>, QueryError> {
        let budget = self.budget(deadline);
        let min_amount = filter.min_amount.unwrap_or(self.cfg.whale_threshold_usd);
        let mut events: Vec<TradeEvent> = Vec::new();

        for (market_id, _) in self.candidate_markets(filter.market_id.as_deref(), filter.category) {
            for outcome in self.outcomes(&market_id, filter.outcome) {
                let scan = self.ledger.query(&market_id, outcome, filter.range);
                budget.admit(scan.len())?;
                events.extend(
                    scan.iter()
                        .rev()
                        .filter(|e| e.amount_usd >= min_amount)
                        .filter(|e| filter.side.map_or(true, |side| e.side == side))
                        .take(filter.limit)
                        .cloned(),
                );
                if events.len() > filter.limit {
                    keep_newest(&mut events, filter.limit);
                }
                budget.check_deadline(scan.len())?;
            }
        }

        keep_newest(&mut events, filter.limit);
        Ok(events
            .into_iter()
            .map(|e| {
                let market = self.store.get_market(&e.market_id);
                WhaleTradeRow::new(e, market.as_ref())
            })
            .collect())
    }

    /// Open positions across the selected markets, marked to each outcome's last price.
    pub fn ranked_positions(
        &self,
        filter: &PositionFilter,
        sort: SortSpec<PositionSortField>,
        deadline: Option<Instant>,
    ) -> Result<Vec<PositionRow>, QueryError> {
        let budget = self.budget(deadline);
        let mut rows = Vec::new();

        for (market_id, market) in self.candidate_markets(filter.market_id.as_deref(), filter.category) {
            for outcome in self.outcomes(&market_id, filter.outcome) {
                let population = MarketPopulation::build(&self.ledger, &market_id, outcome, &budget)?;
                rows.extend(
                    population
                        .positions
                        .into_iter()
                        .filter(|p| filter.user_id.as_ref().map_or(true, |u| &p.user_id == u))
                        .filter(|p| filter.min_invested.map_or(true, |min| p.invested_usd >= min))
                        .map(|p| PositionRow::new(p, market.as_ref())),
                );
            }
        }

        rows.sort_by(|a, b| {
            compare_keys(sort.field.key(a), sort.field.key(b), sort.direction)
                .then_with(|| a.position.market_id.cmp(&b.position.market_id))
                .then_with(|| a.position.outcome.cmp(&b.position.outcome))
                .then_with(|| a.position.user_id.cmp(&b.position.user_id))
        });
        Ok(rows)
    }

    /// Volume, profit and open positions of one wallet. A wallet without
    /// trades gets an empty summary.
    pub fn user_summary(&self, user_id: &str, deadline: Option<Instant>) -> Result<UserSummary, QueryError> {
        let budget = self.budget(deadline);
        let mut trades = Vec::new();
        let mut positions = Vec::new();

        for market_id in self.ledger.market_ids() {
            let market = self.store.get_market(&market_id);
            for outcome in self.ledger.outcomes_with_trades(&market_id) {
                let scan = self.ledger.query(&market_id, outcome, TimeRange::all());
                budget.admit(scan.len())?;
                let before = trades.len();
                trades.extend(scan.iter().filter(|e| e.user_id == user_id).cloned());
                if trades.len() > before {
                    let current_price = scan.last().map(|e| e.price).unwrap_or(0.0);
                    if let Some(p) = fold_user(user_id, &market_id, outcome, &trades[before..], current_price) {
                        positions.push(PositionRow::new(p, market.as_ref()));
                    }
                }
                budget.check_deadline(scan.len())?;
            }
        }
        Ok(summarize(user_id, &trades, positions))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
