//! Activity and profit of a single wallet across every market.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::engine::whales::PositionRow;
use crate::types::{Side, TradeEvent};

#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    pub user_id: String,
    pub trade_count: u64,
    pub total_volume: f64,
    pub buy_volume: f64,
    pub sell_volume: f64,
    pub markets_traded: usize,
    pub first_trade_timestamp: Option<i64>,
    pub last_trade_timestamp: Option<i64>,
    /// Cost basis of the open positions.
    pub total_invested: f64,
    pub current_value: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub profit_loss: f64,
    /// Share of (market, outcome) positions, open or closed, that are in profit.
    /// `None` for a wallet without trades.
    pub win_rate: Option<f64>,
    /// Largest first.
    pub open_positions: Vec<PositionRow>,
}

/// Build a summary from the wallet's trades and its folded positions.
pub fn summarize<'a>(
    user_id: &str,
    trades: impl IntoIterator<Item = &'a TradeEvent>,
    positions: Vec<PositionRow>,
) -> UserSummary {
    let mut s = UserSummary {
        user_id: user_id.to_string(),
        trade_count: 0,
        total_volume: 0.0,
        buy_volume: 0.0,
        sell_volume: 0.0,
        markets_traded: 0,
        first_trade_timestamp: None,
        last_trade_timestamp: None,
        total_invested: 0.0,
        current_value: 0.0,
        unrealized_pnl: 0.0,
        realized_pnl: 0.0,
        profit_loss: 0.0,
        win_rate: None,
        open_positions: Vec::new(),
    };

    let mut markets = BTreeSet::new();
    for t in trades.into_iter().filter(|t| t.user_id == user_id) {
        s.trade_count += 1;
        s.total_volume += t.amount_usd;
        match t.side {
            Side::Buy => s.buy_volume += t.amount_usd,
            Side::Sell => s.sell_volume += t.amount_usd,
        }
        markets.insert(t.market_id.as_str());
        s.first_trade_timestamp = Some(s.first_trade_timestamp.map_or(t.timestamp, |f| f.min(t.timestamp)));
        s.last_trade_timestamp = Some(s.last_trade_timestamp.map_or(t.timestamp, |l| l.max(t.timestamp)));
    }
    s.markets_traded = markets.len();

    let total = positions.len();
    let mut won = 0usize;
    for row in positions {
        let p = &row.position;
        s.realized_pnl += p.realized_pnl_usd;
        if p.realized_pnl_usd + row.pnl_usd > 0.0 {
            won += 1;
        }
        if p.is_open() {
            s.total_invested += p.invested_usd;
            s.current_value += row.current_value;
            s.unrealized_pnl += row.pnl_usd;
            s.open_positions.push(row);
        }
    }
    s.profit_loss = s.realized_pnl + s.unrealized_pnl;
    if total > 0 {
        s.win_rate = Some(won as f64 / total as f64);
    }
    s.open_positions.sort_by(|a, b| {
        b.position
            .invested_usd
            .total_cmp(&a.position.invested_usd)
            .then_with(|| a.position.market_id.cmp(&b.position.market_id))
            .then_with(|| a.position.outcome.cmp(&b.position.outcome))
    });
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::positions::fold_user;
    use crate::types::Outcome;

    fn trade(id: &str, market: &str, side: Side, amount: f64, price: f64, ts: i64) -> TradeEvent {
        TradeEvent {
            id: id.to_string(),
            market_id: market.to_string(),
            outcome: Outcome::Yes,
            side,
            user_id: "0xuser".to_string(),
            amount_usd: amount,
            price,
            timestamp: ts,
        }
    }

    #[test]
    fn summary_combines_realized_and_open_profit() {
        let trades = vec![
            trade("1", "m1", Side::Buy, 100.0, 0.25, 10), // 400 shares
            trade("2", "m1", Side::Sell, 200.0, 0.50, 20), // all out, +100
            trade("3", "m2", Side::Buy, 300.0, 0.60, 30), // 500 shares
        ];
        let positions = vec![
            PositionRow::new(fold_user("0xuser", "m1", Outcome::Yes, &trades, 0.50).unwrap(), None),
            PositionRow::new(fold_user("0xuser", "m2", Outcome::Yes, &trades, 0.40).unwrap(), None),
        ];
        let s = summarize("0xuser", &trades, positions);

        assert_eq!(s.trade_count, 3);
        assert_eq!(s.total_volume, 600.0);
        assert_eq!(s.buy_volume, 400.0);
        assert_eq!(s.sell_volume, 200.0);
        assert_eq!(s.markets_traded, 2);
        assert_eq!(s.first_trade_timestamp, Some(10));
        assert_eq!(s.last_trade_timestamp, Some(30));

        assert_eq!(s.open_positions.len(), 1);
        assert_eq!(s.open_positions[0].position.market_id, "m2");
        assert!((s.total_invested - 300.0).abs() < 1e-9);
        assert!((s.unrealized_pnl + 100.0).abs() < 1e-9);
        assert!((s.realized_pnl - 100.0).abs() < 1e-9);
        assert!(s.profit_loss.abs() < 1e-9);
        assert_eq!(s.win_rate, Some(0.5));
    }

    #[test]
    fn unknown_wallet_has_an_empty_summary() {
        let none: Vec<TradeEvent> = Vec::new();
        let s = summarize("0xnobody", &none, Vec::new());
        assert_eq!(s.trade_count, 0);
        assert!(s.win_rate.is_none());
        assert!(s.open_positions.is_empty());
    }
}
