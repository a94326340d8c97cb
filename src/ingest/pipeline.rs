use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::api::health::HealthState;
use crate::error::IngestError;
use crate::ledger::{now_secs, Appended, TradeLedger};
use crate::types::TradeEvent;

/// Single entry point for trades from every source. Validates and appends to
/// the ledger, then hands inserted events to the DB writer, waiting for room
/// in its queue when it falls behind.
#[derive(Clone)]
pub struct Ingestor {
    ledger: Arc<TradeLedger>,
    persist_tx: Option<mpsc::Sender<TradeEvent>>,
    health: Arc<HealthState>,
}

impl Ingestor {
    pub fn new(
        ledger: Arc<TradeLedger>,
        persist_tx: Option<mpsc::Sender<TradeEvent>>,
        health: Arc<HealthState>,
    ) -> Self {
        Self { ledger, persist_tx, health }
    }

    pub async fn ingest(&self, event: TradeEvent) -> Result<Appended, IngestError> {
        let persisted = self.persist_tx.as_ref().map(|_| event.clone());
        let id = event.id.clone();

        match self.ledger.append(event) {
            Ok(Appended::Inserted) => {
                self.health.record_ingested(now_secs());
                if let (Some(tx), Some(event)) = (&self.persist_tx, persisted) {
                    self.health.inc_write_queue_pending();
                    if tx.send(event).await.is_err() {
                        self.health.dec_write_queue_pending();
                        error!("[INGEST] DB writer has stopped, trade {id} kept in memory only");
                    }
                }
                Ok(Appended::Inserted)
            }
            Ok(Appended::Duplicate) => {
                self.health.record_duplicate();
                debug!(id = %id, "[INGEST] duplicate ignored");
                Ok(Appended::Duplicate)
            }
            Err(e) => {
                self.health.record_rejected();
                warn!(id = %id, "[INGEST] rejected: {e}");
                Err(e)
            }
        }
    }
}

/// Drain a feed channel into the ledger until every sender is gone.
pub async fn run_ingest_loop(ingestor: Ingestor, mut rx: mpsc::Receiver<TradeEvent>) {
    let mut accepted = 0u64;
    while let Some(event) = rx.recv().await {
        if let Ok(Appended::Inserted) = ingestor.ingest(event).await {
            accepted += 1;
            if accepted % 1000 == 0 {
                info!(
                    accepted,
                    ledger_size = ingestor.ledger.len(),
                    rejected = ingestor.health.rejected(),
                    "[INGEST] {accepted} trades accepted from feeds"
                );
            }
        }
    }
    info!("[INGEST] feed channel closed after {accepted} trades");
}
