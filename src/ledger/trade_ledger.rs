use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::{DashMap, DashSet};

use crate::error::IngestError;
use crate::types::{Outcome, TimeRange, TradeEvent};

/// Result of a successful append. A duplicate id is accepted as a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Appended {
    Inserted,
    Duplicate,
}

// ---------------------------------------------------------------------------
// MarketPartition
// ---------------------------------------------------------------------------

/// Per-market event logs, one per outcome, each kept sorted by `(timestamp, id)`.
///
/// Logs sit behind an `Arc` so readers take a snapshot under a short read lock
/// and scan without holding it. A writer copies the log only while a reader
/// still holds the previous snapshot.
#[derive(Debug, Default)]
struct MarketPartition {
    yes: Arc<Vec<TradeEvent>>,
    no: Arc<Vec<TradeEvent>>,
}

impl MarketPartition {
    fn log(&self, outcome: Outcome) -> &Arc<Vec<TradeEvent>> {
        match outcome {
            Outcome::Yes => &self.yes,
            Outcome::No => &self.no,
        }
    }

    fn log_mut(&mut self, outcome: Outcome) -> &mut Vec<TradeEvent> {
        match outcome {
            Outcome::Yes => Arc::make_mut(&mut self.yes),
            Outcome::No => Arc::make_mut(&mut self.no),
        }
    }

    fn insert(&mut self, event: TradeEvent) {
        let log = self.log_mut(event.outcome);
        let idx = log.partition_point(|e| e.order_key() <= event.order_key());
        log.insert(idx, event);
    }
}

// ---------------------------------------------------------------------------
// TradeScan
// ---------------------------------------------------------------------------

/// Snapshot of one (market, outcome) log restricted to a time range.
///
/// Iteration is lazy and timestamp-ascending. The scan can be iterated any
/// number of times and always yields the same events: appends that land after
/// the snapshot was taken are not visible through it.
#[derive(Debug, Clone)]
pub struct TradeScan {
    events: Arc<Vec<TradeEvent>>,
    start: usize,
    end: usize,
}

impl TradeScan {
    fn empty() -> Self {
        Self { events: Arc::new(Vec::new()), start: 0, end: 0 }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TradeEvent> {
        self.events[self.start..self.end].iter()
    }

    pub fn last(&self) -> Option<&TradeEvent> {
        self.events[self.start..self.end].last()
    }
}

impl<'a> IntoIterator for &'a TradeScan {
    type Item = &'a TradeEvent;
    type IntoIter = std::slice::Iter<'a, TradeEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// ---------------------------------------------------------------------------
// TradeLedger
// ---------------------------------------------------------------------------

/// Append-only store of validated trade events, partitioned by market.
///
/// Appends to one market are serialized by that partition's write lock;
/// markets never contend with each other. Ids are unique across the whole
/// ledger.
pub struct TradeLedger {
    /// market_id → partition
    partitions: DashMap<String, Arc<RwLock<MarketPartition>>>,
    /// every accepted event id
    ids: DashSet<String>,
    clock_skew_tolerance_secs: i64,
    event_count: AtomicU64,
}

impl TradeLedger {
    pub fn new(clock_skew_tolerance_secs: i64) -> Arc<Self> {
        Arc::new(Self {
            partitions: DashMap::new(),
            ids: DashSet::new(),
            clock_skew_tolerance_secs,
            event_count: AtomicU64::new(0),
        })
    }

    pub fn append(&self, event: TradeEvent) -> Result<Appended, IngestError> {
        self.append_at(event, now_secs())
    }

    /// Append with an explicit wall-clock reading for the future-timestamp check.
    pub fn append_at(&self, event: TradeEvent, now: i64) -> Result<Appended, IngestError> {
        validate_event(&event, now, self.clock_skew_tolerance_secs)?;

        if !self.ids.insert(event.id.clone()) {
            return Ok(Appended::Duplicate);
        }

        let partition = Arc::clone(
            self.partitions
                .entry(event.market_id.clone())
                .or_default()
                .value(),
        );
        partition
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(event);
        self.event_count.fetch_add(1, Ordering::Relaxed);

        Ok(Appended::Inserted)
    }

    /// Events for one market and outcome with `range.start < timestamp <= range.end`.
    pub fn query(&self, market_id: &str, outcome: Outcome, range: TimeRange) -> TradeScan {
        let Some(partition) = self.partitions.get(market_id).map(|p| Arc::clone(p.value())) else {
            return TradeScan::empty();
        };
        let events = Arc::clone(
            partition
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .log(outcome),
        );

        let start = events.partition_point(|e| e.timestamp <= range.start);
        let end = events.partition_point(|e| e.timestamp <= range.end).max(start);
        TradeScan { events, start, end }
    }

    /// Price of the most recent trade for a market outcome, over all history.
    pub fn last_price(&self, market_id: &str, outcome: Outcome) -> Option<f64> {
        self.query(market_id, outcome, TimeRange::all())
            .last()
            .map(|e| e.price)
    }

    /// Outcomes of `market_id` that have at least one trade.
    pub fn outcomes_with_trades(&self, market_id: &str) -> Vec<Outcome> {
        let Some(partition) = self.partitions.get(market_id).map(|p| Arc::clone(p.value())) else {
            return Vec::new();
        };
        let guard = partition.read().unwrap_or_else(PoisonError::into_inner);
        Outcome::all()
            .into_iter()
            .filter(|o| !guard.log(*o).is_empty())
            .collect()
    }

    /// All market ids with at least one event, ascending.
    pub fn market_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.partitions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.event_count.load(Ordering::Relaxed) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Rejects events the aggregates cannot be built from.
pub fn validate_event(event: &TradeEvent, now: i64, skew_secs: i64) -> Result<(), IngestError> {
    if event.id.trim().is_empty() {
        return Err(IngestError::invalid(&event.id, "id is empty"));
    }
    if event.market_id.trim().is_empty() {
        return Err(IngestError::invalid(&event.id, "market_id is empty"));
    }
    if event.user_id.trim().is_empty() {
        return Err(IngestError::invalid(&event.id, "user_id is empty"));
    }
    if !event.amount_usd.is_finite() || event.amount_usd <= 0.0 {
        return Err(IngestError::invalid(
            &event.id,
            format!("amount_usd must be > 0, got {}", event.amount_usd),
        ));
    }
    if !(0.0..=1.0).contains(&event.price) {
        return Err(IngestError::invalid(
            &event.id,
            format!("price must be within [0, 1], got {}", event.price),
        ));
    }
    if event.timestamp > now.saturating_add(skew_secs) {
        return Err(IngestError::invalid(
            &event.id,
            format!(
                "timestamp {} is more than {skew_secs}s ahead of now ({now})",
                event.timestamp
            ),
        ));
    }
    Ok(())
}

pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;

    const NOW: i64 = 1_700_000_000;

    fn trade(id: &str, market: &str, outcome: Outcome, ts: i64) -> TradeEvent {
        TradeEvent {
            id: id.to_string(),
            market_id: market.to_string(),
            outcome,
            side: Side::Buy,
            user_id: "0xabc".to_string(),
            amount_usd: 100.0,
            price: 0.5,
            timestamp: ts,
        }
    }

    fn ids(scan: &TradeScan) -> Vec<String> {
        scan.iter().map(|e| e.id.clone()).collect()
    }

    #[test]
    fn duplicate_id_is_a_noop() {
        let ledger = TradeLedger::new(60);
        let e = trade("t1", "m1", Outcome::Yes, NOW - 10);

        assert_eq!(ledger.append_at(e.clone(), NOW), Ok(Appended::Inserted));
        let once = ids(&ledger.query("m1", Outcome::Yes, TimeRange::all()));

        assert_eq!(ledger.append_at(e, NOW), Ok(Appended::Duplicate));
        let twice = ids(&ledger.query("m1", Outcome::Yes, TimeRange::all()));

        assert_eq!(once, twice);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn rejects_out_of_range_events() {
        let ledger = TradeLedger::new(60);

        let mut zero_amount = trade("a", "m1", Outcome::Yes, NOW);
        zero_amount.amount_usd = 0.0;
        let mut bad_price = trade("b", "m1", Outcome::Yes, NOW);
        bad_price.price = 1.01;
        let mut nan_price = trade("c", "m1", Outcome::Yes, NOW);
        nan_price.price = f64::NAN;
        let future = trade("d", "m1", Outcome::Yes, NOW + 61);

        for e in [zero_amount, bad_price, nan_price, future] {
            let err = ledger.append_at(e, NOW).unwrap_err();
            assert!(matches!(err, IngestError::InvalidEvent { .. }));
        }
        assert!(ledger.is_empty());
        // A rejected id must not block a later valid event with the same id.
        assert_eq!(ledger.append_at(trade("a", "m1", Outcome::Yes, NOW), NOW), Ok(Appended::Inserted));
    }

    #[test]
    fn skew_tolerance_admits_slightly_future_events() {
        let ledger = TradeLedger::new(60);
        assert!(ledger.append_at(trade("t", "m1", Outcome::Yes, NOW + 60), NOW).is_ok());
    }

    #[test]
    fn query_is_time_ordered_regardless_of_arrival() {
        let ledger = TradeLedger::new(60);
        for (id, ts) in [("c", NOW - 1), ("a", NOW - 30), ("b", NOW - 30), ("d", NOW - 100)] {
            ledger.append_at(trade(id, "m1", Outcome::Yes, ts), NOW).unwrap();
        }
        let scan = ledger.query("m1", Outcome::Yes, TimeRange::all());
        assert_eq!(ids(&scan), vec!["d", "a", "b", "c"]);
    }

    #[test]
    fn query_range_is_half_open_and_outcome_scoped() {
        let ledger = TradeLedger::new(60);
        ledger.append_at(trade("start", "m1", Outcome::Yes, NOW - 100), NOW).unwrap();
        ledger.append_at(trade("mid", "m1", Outcome::Yes, NOW - 50), NOW).unwrap();
        ledger.append_at(trade("end", "m1", Outcome::Yes, NOW), NOW).unwrap();
        ledger.append_at(trade("other", "m1", Outcome::No, NOW - 50), NOW).unwrap();

        let scan = ledger.query("m1", Outcome::Yes, TimeRange::new(NOW - 100, NOW));
        assert_eq!(ids(&scan), vec!["mid", "end"]);
        assert!(ledger.query("missing", Outcome::Yes, TimeRange::all()).is_empty());
    }

    #[test]
    fn scan_is_restartable_and_isolated_from_later_appends() {
        let ledger = TradeLedger::new(60);
        ledger.append_at(trade("a", "m1", Outcome::Yes, NOW - 10), NOW).unwrap();
        let scan = ledger.query("m1", Outcome::Yes, TimeRange::all());

        ledger.append_at(trade("b", "m1", Outcome::Yes, NOW - 5), NOW).unwrap();

        assert_eq!(ids(&scan), vec!["a"]);
        assert_eq!(ids(&scan), vec!["a"]);
        assert_eq!(ledger.query("m1", Outcome::Yes, TimeRange::all()).len(), 2);
    }

    #[test]
    fn concurrent_appends_to_one_market_are_all_kept() {
        let ledger = TradeLedger::new(60);
        std::thread::scope(|s| {
            for t in 0..4 {
                let ledger = &ledger;
                s.spawn(move || {
                    for i in 0..250 {
                        let id = format!("t{t}-{i}");
                        ledger.append_at(trade(&id, "m1", Outcome::Yes, NOW - i), NOW).unwrap();
                        // Every feed redelivers its events once.
                        ledger.append_at(trade(&id, "m1", Outcome::Yes, NOW - i), NOW).unwrap();
                    }
                });
            }
        });
        let scan = ledger.query("m1", Outcome::Yes, TimeRange::all());
        assert_eq!(scan.len(), 1_000);
        assert_eq!(ledger.len(), 1_000);
        assert!(scan.iter().zip(scan.iter().skip(1)).all(|(a, b)| a.order_key() <= b.order_key()));
    }

    #[test]
    fn market_ids_are_sorted_and_outcomes_reported() {
        let ledger = TradeLedger::new(60);
        ledger.append_at(trade("1", "mb", Outcome::No, NOW), NOW).unwrap();
        ledger.append_at(trade("2", "ma", Outcome::Yes, NOW), NOW).unwrap();
        assert_eq!(ledger.market_ids(), vec!["ma", "mb"]);
        assert_eq!(ledger.outcomes_with_trades("mb"), vec![Outcome::No]);
        assert_eq!(ledger.last_price("ma", Outcome::Yes), Some(0.5));
        assert_eq!(ledger.last_price("ma", Outcome::No), None);
    }
}
