use std::collections::HashSet;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::SCORER_INTERVAL_SECS;
use crate::engine::{InsiderFilter, InsiderScore, QueryFacade, SortSpec};
use crate::types::Outcome;

type PositionKey = (String, String, Outcome);

/// Background task that re-scores every open position once a minute and logs
/// positions that crossed the flag policy since the previous pass.
pub struct FlagMonitor {
    facade: QueryFacade,
    seen: HashSet<PositionKey>,
}

impl FlagMonitor {
    pub fn new(facade: QueryFacade) -> Self {
        Self { facade, seen: HashSet::new() }
    }

    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(Duration::from_secs(SCORER_INTERVAL_SECS));
        interval.tick().await; // consume immediate first tick

        loop {
            interval.tick().await;
            let facade = self.facade.clone();
            let filter = InsiderFilter { flagged_only: true, ..Default::default() };
            let result = tokio::task::spawn_blocking(move || {
                facade.ranked_insider_scores(&filter, SortSpec::default(), None)
            })
            .await;

            match result {
                Ok(Ok(flagged)) => self.report(&flagged),
                Ok(Err(e)) => warn!("[MONITOR] scan aborted: {e}"),
                Err(e) => error!("[MONITOR] scoring task panicked: {e}"),
            }
        }
    }

    fn report(&mut self, flagged: &[InsiderScore]) {
        let (fresh, current) = newly_flagged(&self.seen, flagged);
        for s in &fresh {
            let p = &s.position;
            info!(
                user = %p.user_id,
                market_id = %p.market_id,
                outcome = %p.outcome.as_str(),
                invested = p.invested_usd,
                z_score = s.z_score.unwrap_or_default(),
                days = s.days_since_first_trade,
                "[MONITOR] new flagged position: {} {:.0} USD on {}",
                p.user_id,
                p.invested_usd,
                s.question.as_deref().unwrap_or(&p.market_id),
            );
        }
        info!("[MONITOR] {} flagged positions ({} new)", current.len(), fresh.len());
        self.seen = current;
    }
}

fn key(s: &InsiderScore) -> PositionKey {
    (s.position.user_id.clone(), s.position.market_id.clone(), s.position.outcome)
}

/// Scores not flagged on the previous pass, and the key set of this pass.
/// A position that drops out and is flagged again is reported again.
fn newly_flagged<'a>(
    seen: &HashSet<PositionKey>,
    flagged: &'a [InsiderScore],
) -> (Vec<&'a InsiderScore>, HashSet<PositionKey>) {
    let current: HashSet<PositionKey> = flagged.iter().map(key).collect();
    let fresh = flagged.iter().filter(|s| !seen.contains(&key(s))).collect();
    (fresh, current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::positions::PositionSnapshot;

    fn flagged(user: &str, market: &str) -> InsiderScore {
        let mut position = PositionSnapshot::new(user, market, Outcome::Yes, 1_000);
        position.invested_usd = 50_000.0;
        InsiderScore {
            position,
            z_score: Some(3.1),
            days_since_first_trade: 0,
            market_mean_invested: 1_000.0,
            pnl_percent: None,
            flagged: true,
            question: None,
            category: None,
        }
    }

    #[test]
    fn only_unseen_positions_are_new() {
        let first = vec![flagged("u1", "m1")];
        let (fresh, seen) = newly_flagged(&HashSet::new(), &first);
        assert_eq!(fresh.len(), 1);

        let second = vec![flagged("u1", "m1"), flagged("u2", "m1")];
        let (fresh, seen) = newly_flagged(&seen, &second);
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].position.user_id, "u2");
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn reflagged_position_is_reported_again() {
        let pass = vec![flagged("u1", "m1")];
        let (_, seen) = newly_flagged(&HashSet::new(), &pass);
        let (_, seen) = newly_flagged(&seen, &[]);
        assert!(seen.is_empty());
        let (fresh, _) = newly_flagged(&seen, &pass);
        assert_eq!(fresh.len(), 1);
    }
}
