//! Insider scoring: how far a position's size sits from the rest of its market,
//! and how fresh the wallet is.

use serde::Serialize;

use crate::config::SECS_PER_DAY;
use crate::engine::positions::PositionSnapshot;
use crate::types::{Category, Outcome};

/// Positions are flagged when they are both unusually large and recent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlagPolicy {
    pub min_z_score: f64,
    pub max_days_since_first_trade: i64,
}

impl Default for FlagPolicy {
    fn default() -> Self {
        Self { min_z_score: 2.5, max_days_since_first_trade: 3 }
    }
}

impl FlagPolicy {
    pub fn is_flagged(&self, z_score: Option<f64>, days_since_first_trade: i64) -> bool {
        z_score.is_some_and(|z| z >= self.min_z_score)
            && days_since_first_trade <= self.max_days_since_first_trade
    }
}

/// Invested-amount distribution over every open position of one (market, outcome).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PopulationStats {
    pub size: usize,
    pub mean_invested: f64,
    /// Population standard deviation.
    pub stddev_invested: f64,
}

impl PopulationStats {
    pub fn from_positions(positions: &[PositionSnapshot]) -> Self {
        if positions.is_empty() {
            return Self::default();
        }
        let n = positions.len() as f64;
        let mean = positions.iter().map(|p| p.invested_usd).sum::<f64>() / n;
        let variance = positions
            .iter()
            .map(|p| (p.invested_usd - mean).powi(2))
            .sum::<f64>()
            / n;
        Self {
            size: positions.len(),
            mean_invested: mean,
            stddev_invested: variance.max(0.0).sqrt(),
        }
    }

    /// `None` below two members; 0 when every member invested the same.
    pub fn z_score(&self, invested_usd: f64) -> Option<f64> {
        if self.size < 2 {
            return None;
        }
        // rounding noise from the mean must not turn equal stakes into outliers
        if self.stddev_invested <= 1e-9 * self.mean_invested.abs().max(1.0) {
            return Some(0.0);
        }
        Some((invested_usd - self.mean_invested) / self.stddev_invested)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InsiderScore {
    #[serde(flatten)]
    pub position: PositionSnapshot,
    pub z_score: Option<f64>,
    pub days_since_first_trade: i64,
    pub market_mean_invested: f64,
    pub pnl_percent: Option<f64>,
    pub flagged: bool,
    pub question: Option<String>,
    pub category: Option<Category>,
}

pub fn pnl_percent(avg_entry_price: f64, current_price: f64) -> Option<f64> {
    if avg_entry_price == 0.0 {
        return None;
    }
    Some((current_price - avg_entry_price) / avg_entry_price * 100.0)
}

pub fn days_since(first_trade_timestamp: i64, now: i64) -> i64 {
    now.saturating_sub(first_trade_timestamp).max(0) / SECS_PER_DAY
}

pub fn score(
    position: &PositionSnapshot,
    stats: &PopulationStats,
    now: i64,
    policy: &FlagPolicy,
) -> InsiderScore {
    let z_score = stats.z_score(position.invested_usd);
    let days_since_first_trade = days_since(position.first_trade_timestamp, now);
    InsiderScore {
        position: position.clone(),
        z_score,
        days_since_first_trade,
        market_mean_invested: stats.mean_invested,
        pnl_percent: pnl_percent(position.avg_entry_price, position.current_price),
        flagged: policy.is_flagged(z_score, days_since_first_trade),
        question: None,
        category: None,
    }
}

// ---------------------------------------------------------------------------
// Market roll-up
// ---------------------------------------------------------------------------

/// Suspicion summary of one (market, outcome).
#[derive(Debug, Clone, Serialize)]
pub struct InsiderMarketRow {
    pub market_id: String,
    pub outcome: Outcome,
    pub question: Option<String>,
    pub category: Option<Category>,
    pub open_positions: u64,
    pub flagged_positions: u64,
    pub total_invested: f64,
    pub flagged_invested: f64,
    pub max_z_score: Option<f64>,
    /// Percentage of invested capital held by flagged positions.
    pub suspicion_score: f64,
}

impl InsiderMarketRow {
    /// Roll up the scores of one (market, outcome). Scores of other tuples are ignored.
    pub fn from_scores<'a>(
        market_id: &str,
        outcome: Outcome,
        scores: impl IntoIterator<Item = &'a InsiderScore>,
    ) -> Self {
        let mut row = Self {
            market_id: market_id.to_string(),
            outcome,
            question: None,
            category: None,
            open_positions: 0,
            flagged_positions: 0,
            total_invested: 0.0,
            flagged_invested: 0.0,
            max_z_score: None,
            suspicion_score: 0.0,
        };
        for s in scores
            .into_iter()
            .filter(|s| s.position.market_id == market_id && s.position.outcome == outcome)
        {
            if row.question.is_none() {
                row.question = s.question.clone();
                row.category = s.category;
            }
            row.open_positions += 1;
            row.total_invested += s.position.invested_usd;
            if s.flagged {
                row.flagged_positions += 1;
                row.flagged_invested += s.position.invested_usd;
            }
            if let Some(z) = s.z_score {
                row.max_z_score = Some(row.max_z_score.map_or(z, |m| m.max(z)));
            }
        }
        if row.total_invested > 0.0 {
            row.suspicion_score = 100.0 * row.flagged_invested / row.total_invested;
        }
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn position(user: &str, invested: f64, avg_entry: f64, current: f64, first_ts: i64) -> PositionSnapshot {
        PositionSnapshot {
            user_id: user.to_string(),
            market_id: "m1".to_string(),
            outcome: Outcome::Yes,
            invested_usd: invested,
            shares: if avg_entry > 0.0 { invested / avg_entry } else { 0.0 },
            avg_entry_price: avg_entry,
            current_price: current,
            n_positions: 1,
            first_trade_timestamp: first_ts,
            realized_pnl_usd: 0.0,
        }
    }

    #[test]
    fn pnl_for_entry_at_twenty_cents_now_ninety() {
        let p = position("u1", 1_000.0, 0.20, 0.90, NOW);
        let pop = vec![p.clone(), position("u2", 500.0, 0.5, 0.9, NOW)];
        let s = score(&p, &PopulationStats::from_positions(&pop), NOW, &FlagPolicy::default());
        assert!((s.pnl_percent.unwrap() - 350.0).abs() < 1e-9);
    }

    #[test]
    fn zero_entry_price_has_no_pnl() {
        assert_eq!(pnl_percent(0.0, 0.5), None);
    }

    #[test]
    fn equal_stakes_all_score_zero() {
        let pop: Vec<_> = (0..5)
            .map(|i| position(&format!("u{i}"), 1_234.56, 0.37, 0.5, NOW))
            .collect();
        let stats = PopulationStats::from_positions(&pop);
        for p in &pop {
            let s = score(p, &stats, NOW, &FlagPolicy::default());
            assert_eq!(s.z_score, Some(0.0));
            assert!(!s.flagged);
        }
    }

    #[test]
    fn single_member_population_has_no_z_score() {
        let p = position("u1", 50_000.0, 0.5, 0.5, NOW);
        let stats = PopulationStats::from_positions(std::slice::from_ref(&p));
        let s = score(&p, &stats, NOW, &FlagPolicy::default());
        assert_eq!(s.z_score, None);
        assert!(!s.flagged);
    }

    #[test]
    fn z_score_uses_population_stddev_including_self() {
        // invested 100, 100, 100, 500: mean 200, stddev sqrt(30000)
        let mut pop: Vec<_> = (0..3).map(|i| position(&format!("u{i}"), 100.0, 0.5, 0.5, NOW)).collect();
        pop.push(position("whale", 500.0, 0.5, 0.5, NOW));
        let stats = PopulationStats::from_positions(&pop);
        assert_eq!(stats.size, 4);
        assert_eq!(stats.mean_invested, 200.0);
        let z = stats.z_score(500.0).unwrap();
        assert!((z - 300.0 / 30_000f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn flag_needs_large_z_and_fresh_wallet() {
        let policy = FlagPolicy::default();
        assert!(policy.is_flagged(Some(2.5), 3));
        assert!(!policy.is_flagged(Some(2.49), 0));
        assert!(!policy.is_flagged(Some(10.0), 4));
        assert!(!policy.is_flagged(None, 0));
    }

    #[test]
    fn days_since_first_trade_floors_and_clamps() {
        assert_eq!(days_since(NOW - SECS_PER_DAY * 2 - 1, NOW), 2);
        assert_eq!(days_since(NOW - SECS_PER_DAY + 1, NOW), 0);
        assert_eq!(days_since(NOW + 500, NOW), 0);
    }

    #[test]
    fn outlier_in_a_crowd_is_flagged() {
        let mut pop: Vec<_> = (0..10)
            .map(|i| position(&format!("u{i}"), 100.0, 0.5, 0.5, NOW - 30 * SECS_PER_DAY))
            .collect();
        pop.push(position("fresh", 10_000.0, 0.1, 0.5, NOW - SECS_PER_DAY));
        let stats = PopulationStats::from_positions(&pop);
        let scores: Vec<_> = pop.iter().map(|p| score(p, &stats, NOW, &FlagPolicy::default())).collect();

        let fresh = scores.iter().find(|s| s.position.user_id == "fresh").unwrap();
        assert!(fresh.z_score.unwrap() > 2.5);
        assert_eq!(fresh.days_since_first_trade, 1);
        assert!(fresh.flagged);
        assert_eq!(scores.iter().filter(|s| s.flagged).count(), 1);

        let row = InsiderMarketRow::from_scores("m1", Outcome::Yes, &scores);
        assert_eq!(row.open_positions, 11);
        assert_eq!(row.flagged_positions, 1);
        assert_eq!(row.total_invested, 11_000.0);
        assert!((row.suspicion_score - 100.0 * 10_000.0 / 11_000.0).abs() < 1e-9);
        assert_eq!(row.max_z_score, fresh.z_score);
    }

    #[test]
    fn empty_roll_up_has_zero_suspicion() {
        let row = InsiderMarketRow::from_scores("m1", Outcome::No, &[]);
        assert_eq!(row.open_positions, 0);
        assert_eq!(row.suspicion_score, 0.0);
        assert_eq!(row.max_z_score, None);
    }
}
