use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::api::health::HealthState;
use crate::config::{RECONNECT_BACKOFF_MS, WS_PING_INTERVAL_SECS, WS_SUBSCRIBE_CHUNK_SIZE};
use crate::error::Result;
use crate::state::MarketStore;
use crate::types::ControlMsg;
use crate::ws::messages::{parse_ws_frame, ParsedFrame};

/// Delay before reconnect attempt `attempt` (0-based), capped at the last step.
pub fn backoff_delay_ms(attempt: usize) -> u64 {
    RECONNECT_BACKOFF_MS
        .get(attempt)
        .or_else(|| RECONNECT_BACKOFF_MS.last())
        .copied()
        .unwrap_or(1_000)
}

/// Persistent connection to Polymarket's CLOB market channel. Keeps the
/// per-token order books in `MarketStore` current; they feed the spread signal.
pub struct BookFeed {
    ws_url: String,
    store: Arc<MarketStore>,
    health: Arc<HealthState>,
    control_rx: mpsc::Receiver<ControlMsg>,
    /// Total WS frames received since process start (for flow diagnostics).
    frames_received: AtomicU64,
    book_snapshots: AtomicU64,
    price_changes: AtomicU64,
}

impl BookFeed {
    pub fn new(
        ws_url: String,
        store: Arc<MarketStore>,
        health: Arc<HealthState>,
        control_rx: mpsc::Receiver<ControlMsg>,
    ) -> Self {
        Self {
            ws_url,
            store,
            health,
            control_rx,
            frames_received: AtomicU64::new(0),
            book_snapshots: AtomicU64::new(0),
            price_changes: AtomicU64::new(0),
        }
    }

    pub async fn run(mut self) {
        let mut attempt = 0usize;

        loop {
            info!("[BOOK] connecting to {}", self.ws_url);
            match self.connect_once().await {
                Ok(true) => {
                    info!("[BOOK] control channel closed, stopping");
                    self.health.set_book_connected(false);
                    return;
                }
                Ok(false) => {
                    info!("[BOOK] connection closed cleanly");
                    attempt = 0;
                }
                Err(e) => {
                    error!("[BOOK] connection error: {e}");
                }
            }
            self.health.set_book_connected(false);

            let delay_ms = backoff_delay_ms(attempt);
            attempt += 1;
            warn!("[BOOK] reconnecting in {delay_ms}ms");
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
    }

    /// Returns `Ok(true)` when the control channel is gone and the feed should stop.
    async fn connect_once(&mut self) -> Result<bool> {
        let (ws_stream, _) = connect_async(&self.ws_url).await?;
        let (mut write, mut read) = ws_stream.split();

        // Initial subscription: send in chunks to avoid server-side frame size limits.
        let asset_ids = self.store.all_asset_ids();
        if !asset_ids.is_empty() {
            let chunks: Vec<_> = asset_ids.chunks(WS_SUBSCRIBE_CHUNK_SIZE).collect();
            let total_chunks = chunks.len();
            for (i, chunk) in chunks.into_iter().enumerate() {
                write.send(Message::Text(build_subscribe_msg(chunk))).await?;
                if total_chunks > 1 {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                debug!("[BOOK] subscribe chunk {}/{} ({} ids)", i + 1, total_chunks, chunk.len());
            }
            info!("[BOOK] subscribed to {} asset_ids in {} chunk(s)", asset_ids.len(), total_chunks);
        }
        self.health.set_book_connected(true);

        let mut ping_interval = interval(Duration::from_secs(WS_PING_INTERVAL_SECS));
        ping_interval.tick().await; // consume immediate first tick

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_frame(&text),
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => return Ok(false),
                        Some(Err(e)) => return Err(e.into()),
                        Some(Ok(_)) => {}
                    }
                }

                _ = ping_interval.tick() => {
                    debug!("[BOOK] ping");
                    write.send(Message::Ping(Vec::new())).await?;
                }

                ctrl = self.control_rx.recv() => {
                    match ctrl {
                        Some(ControlMsg::Subscribe(markets)) => {
                            let new_ids: Vec<String> = markets.iter()
                                .flat_map(|m| [m.yes_token_id.clone(), m.no_token_id.clone()])
                                .collect();
                            write.send(Message::Text(build_subscribe_msg(&new_ids))).await?;
                            info!("[BOOK] dynamically subscribed to {} new asset_ids", new_ids.len());
                        }
                        Some(ControlMsg::Unsubscribe(market_id)) => {
                            if let Some(ids) = self.store.token_ids_for_market(&market_id) {
                                write.send(Message::Text(build_unsubscribe_msg(&ids))).await?;
                                info!("[BOOK] unsubscribed market {market_id}");
                            }
                        }
                        None => return Ok(true),
                    }
                }
            }
        }
    }

    fn handle_frame(&self, text: &str) {
        let total_frames = self.frames_received.fetch_add(1, Ordering::Relaxed) + 1;
        if total_frames % 500 == 0 {
            let snaps = self.book_snapshots.load(Ordering::Relaxed);
            let pchg = self.price_changes.load(Ordering::Relaxed);
            info!(
                frames = total_frames,
                snapshots = snaps,
                price_changes = pchg,
                "[BOOK] {total_frames} frames | snap={snaps} pchg={pchg}"
            );
        }

        for event in parse_ws_frame(text) {
            match event {
                ParsedFrame::BookSnapshot { asset_id, asks, bids } => {
                    self.book_snapshots.fetch_add(1, Ordering::Relaxed);
                    let asks: Vec<(f64, f64)> = asks.iter().filter_map(|l| l.parse()).collect();
                    let bids: Vec<(f64, f64)> = bids.iter().filter_map(|l| l.parse()).collect();
                    if let Some(q) = self.store.apply_book_snapshot(&asset_id, &asks, &bids) {
                        debug!(asset_id = %asset_id, best_ask = q.best_ask, best_bid = q.best_bid, "book snapshot applied");
                    }
                }
                ParsedFrame::BookPriceChange { asset_id, change } => {
                    self.price_changes.fetch_add(1, Ordering::Relaxed);
                    let Some(level) = change.parse() else { continue };
                    self.store.apply_book_changes(&asset_id, &[level]);
                }
            }
        }
    }
}

/// Build a market-channel subscription message.
fn build_subscribe_msg(asset_ids: &[String]) -> String {
    serde_json::json!({
        "assets_ids": asset_ids,
        "type": "market"
    })
    .to_string()
}

fn build_unsubscribe_msg(asset_ids: &[String]) -> String {
    serde_json::json!({
        "assets_ids": asset_ids,
        "operation": "unsubscribe"
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Category, Market, Outcome};

    #[test]
    fn backoff_caps_at_last_step() {
        assert_eq!(backoff_delay_ms(0), 100);
        assert_eq!(backoff_delay_ms(4), 1_600);
        assert_eq!(backoff_delay_ms(40), 1_600);
    }

    #[test]
    fn subscribe_frame_lists_assets() {
        let v: serde_json::Value = serde_json::from_str(&build_subscribe_msg(&["a".into(), "b".into()])).unwrap();
        assert_eq!(v["type"], "market");
        assert_eq!(v["assets_ids"][1], "b");
        let u: serde_json::Value = serde_json::from_str(&build_unsubscribe_msg(&["a".into()])).unwrap();
        assert_eq!(u["operation"], "unsubscribe");
    }

    #[test]
    fn frames_update_the_store_books() {
        let store = MarketStore::new();
        store.add_market(Market {
            id: "m1".to_string(),
            question: "Q".to_string(),
            category: Category::Other,
            end_date_iso: None,
            total_volume: None,
            yes_token_id: "tok1".to_string(),
            no_token_id: "tok2".to_string(),
        });
        let (_tx, rx) = mpsc::channel(1);
        let feed = BookFeed::new("ws://unused".to_string(), Arc::clone(&store), Arc::new(HealthState::new()), rx);

        feed.handle_frame(r#"{"event_type":"book","asset_id":"tok1","asks":[{"price":"0.55","size":"100"},{"price":"0.60","size":"5"}],"bids":[{"price":"0.50","size":"10"}]}"#);
        feed.handle_frame(r#"{"event_type":"price_change","price_changes":[{"asset_id":"tok1","price":"0.55","size":"0","side":"SELL"}]}"#);

        let q = store.quote("m1", Outcome::Yes).unwrap();
        assert!((q.best_ask - 0.60).abs() < 1e-9);
        assert!((q.best_bid - 0.50).abs() < 1e-9);
    }
}
