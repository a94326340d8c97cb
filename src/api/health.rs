//! Shared health state for the /health endpoint.
//! Updated by the feeds, the Ingestor and the DbWriter.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

/// Shared health metrics. Updated by pipeline components, read by API.
#[derive(Default)]
pub struct HealthState {
    /// True when the CLOB book feed is connected and in its main loop.
    pub book_connected: AtomicBool,
    /// True when the activity (trades) feed is connected and in its main loop.
    pub activity_connected: AtomicBool,
    /// Unix seconds of the last accepted trade (0 = none).
    pub last_ingest_at: AtomicI64,
    /// Approximate count of trades queued for DB write.
    pub write_queue_pending: AtomicU64,
    pub ingested: AtomicU64,
    pub duplicates: AtomicU64,
    pub rejected: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_book_connected(&self, v: bool) {
        self.book_connected.store(v, Ordering::Relaxed);
    }

    pub fn set_activity_connected(&self, v: bool) {
        self.activity_connected.store(v, Ordering::Relaxed);
    }

    pub fn record_ingested(&self, at_secs: i64) {
        self.ingested.fetch_add(1, Ordering::Relaxed);
        self.last_ingest_at.store(at_secs, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_write_queue_pending(&self) {
        self.write_queue_pending.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_write_queue_pending(&self) {
        // saturating: a replayed batch can be written without ever being queued
        let _ = self
            .write_queue_pending
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
    }

    pub fn book_connected(&self) -> bool {
        self.book_connected.load(Ordering::Relaxed)
    }

    pub fn activity_connected(&self) -> bool {
        self.activity_connected.load(Ordering::Relaxed)
    }

    pub fn last_ingest_at(&self) -> i64 {
        self.last_ingest_at.load(Ordering::Relaxed)
    }

    pub fn write_queue_pending(&self) -> u64 {
        self.write_queue_pending.load(Ordering::Relaxed)
    }

    pub fn ingested(&self) -> u64 {
        self.ingested.load(Ordering::Relaxed)
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_queue_never_underflows() {
        let h = HealthState::new();
        h.inc_write_queue_pending();
        h.dec_write_queue_pending();
        h.dec_write_queue_pending();
        assert_eq!(h.write_queue_pending(), 0);
    }

    #[test]
    fn ingest_counters() {
        let h = HealthState::new();
        h.record_ingested(1_700_000_000);
        h.record_duplicate();
        h.record_rejected();
        h.record_rejected();
        assert_eq!(h.ingested(), 1);
        assert_eq!(h.duplicates(), 1);
        assert_eq!(h.rejected(), 2);
        assert_eq!(h.last_ingest_at(), 1_700_000_000);
    }
}
