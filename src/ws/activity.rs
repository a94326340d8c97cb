use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::api::health::HealthState;
use crate::config::WS_PING_INTERVAL_SECS;
use crate::error::Result;
use crate::types::TradeEvent;
use crate::ws::connection::backoff_delay_ms;
use crate::ws::messages::parse_activity_frame;

/// Subscription to the live-data service's public trade stream. Every fill on
/// the exchange arrives here; normalized events go to the ingest loop.
pub struct ActivityFeed {
    ws_url: String,
    trade_tx: mpsc::Sender<TradeEvent>,
    health: Arc<HealthState>,
    trades_forwarded: AtomicU64,
}

impl ActivityFeed {
    pub fn new(ws_url: String, trade_tx: mpsc::Sender<TradeEvent>, health: Arc<HealthState>) -> Self {
        Self {
            ws_url,
            trade_tx,
            health,
            trades_forwarded: AtomicU64::new(0),
        }
    }

    pub async fn run(self) {
        let mut attempt = 0usize;

        loop {
            info!("[ACTIVITY] connecting to {}", self.ws_url);
            match self.connect_once().await {
                Ok(true) => {
                    info!("[ACTIVITY] ingest channel closed, stopping");
                    self.health.set_activity_connected(false);
                    return;
                }
                Ok(false) => {
                    info!("[ACTIVITY] connection closed cleanly");
                    attempt = 0;
                }
                Err(e) => error!("[ACTIVITY] connection error: {e}"),
            }
            self.health.set_activity_connected(false);

            let delay_ms = backoff_delay_ms(attempt);
            attempt += 1;
            warn!("[ACTIVITY] reconnecting in {delay_ms}ms");
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
    }

    /// Returns `Ok(true)` when the ingest side has gone away.
    async fn connect_once(&self) -> Result<bool> {
        let (ws_stream, _) = connect_async(&self.ws_url).await?;
        let (mut write, mut read) = ws_stream.split();

        write.send(Message::Text(build_subscribe_msg())).await?;
        info!("[ACTIVITY] subscribed to activity/trades");
        self.health.set_activity_connected(true);

        let mut ping_interval = interval(Duration::from_secs(WS_PING_INTERVAL_SECS));
        ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            for trade in parse_activity_frame(&text) {
                                if self.trade_tx.send(trade).await.is_err() {
                                    return Ok(true);
                                }
                                let n = self.trades_forwarded.fetch_add(1, Ordering::Relaxed) + 1;
                                if n % 1000 == 0 {
                                    info!(trades = n, "[ACTIVITY] {n} trades forwarded");
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => return Ok(false),
                        Some(Err(e)) => return Err(e.into()),
                        Some(Ok(_)) => {}
                    }
                }

                _ = ping_interval.tick() => {
                    debug!("[ACTIVITY] ping");
                    write.send(Message::Ping(Vec::new())).await?;
                }
            }
        }
    }
}

fn build_subscribe_msg() -> String {
    serde_json::json!({
        "action": "subscribe",
        "subscriptions": [{
            "topic": "activity",
            "type": "trades"
        }]
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribes_to_the_trades_topic() {
        let v: serde_json::Value = serde_json::from_str(&build_subscribe_msg()).unwrap();
        assert_eq!(v["action"], "subscribe");
        assert_eq!(v["subscriptions"][0]["topic"], "activity");
        assert_eq!(v["subscriptions"][0]["type"], "trades");
    }
}
