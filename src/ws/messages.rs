use std::sync::atomic::{AtomicU64, Ordering};

use serde::Deserialize;
use tracing::warn;

use crate::types::{Outcome, Side, TradeEvent};

static PARSE_FAILURES: AtomicU64 = AtomicU64::new(0);

fn note_parse_failure(feed: &str, raw: &str) {
    let count = PARSE_FAILURES.fetch_add(1, Ordering::Relaxed) + 1;
    if count <= 10 || count % 1000 == 0 {
        let sample: String = raw.chars().take(500).collect();
        warn!(count, feed, "[WS PARSE] unrecognized frame: {sample}");
    }
}

// ---------------------------------------------------------------------------
// CLOB market channel
// ---------------------------------------------------------------------------

/// A single price level in a book snapshot.
#[derive(Debug, Deserialize, Clone)]
pub struct BookLevel {
    pub price: String,
    pub size: String,
}

impl BookLevel {
    pub fn parse(&self) -> Option<(f64, f64)> {
        Some((self.price.parse().ok()?, self.size.parse().ok()?))
    }
}

/// A single order-level change in a price_change message.
#[derive(Debug, Deserialize, Clone)]
pub struct BookChange {
    pub price: String,
    /// "SELL" = ask side, "BUY" = bid side.
    pub side: String,
    pub size: String,
}

impl BookChange {
    /// `(price, is_ask, size)` as the order book consumes it.
    pub fn parse(&self) -> Option<(f64, bool, f64)> {
        Some((self.price.parse().ok()?, self.side == "SELL", self.size.parse().ok()?))
    }
}

/// One entry inside the `price_changes` array (September 2025+ format).
#[derive(Debug, Deserialize, Clone)]
pub struct PriceChangeEntry {
    pub asset_id: String,
    pub price: String,
    pub size: String,
    pub side: String,
}

/// Raw deserializable shape covering the market-channel messages we consume.
/// Fields are optional because different event types carry different subsets.
#[derive(Debug, Deserialize)]
struct RawBookMsg {
    pub event_type: Option<String>,
    /// Present on `book`; absent on the `price_change` format.
    pub asset_id: Option<String>,
    pub asks: Option<Vec<BookLevel>>,
    pub bids: Option<Vec<BookLevel>>,
    pub price_changes: Option<Vec<PriceChangeEntry>>,
}

/// Parsed event from a single market-channel message object.
#[derive(Debug)]
pub enum ParsedFrame {
    /// Full order book snapshot for one token.
    BookSnapshot {
        asset_id: String,
        asks: Vec<BookLevel>,
        bids: Vec<BookLevel>,
    },
    /// Incremental order-level change for one token.
    BookPriceChange { asset_id: String, change: BookChange },
}

/// Parse a raw market-channel text frame into zero or more events.
///
/// Messages arrive as either a single JSON object or an array of them.
/// `price_change` nests per-asset changes inside a `price_changes` array.
/// Event types other than `book` and `price_change` are ignored.
pub fn parse_ws_frame(raw: &str) -> Vec<ParsedFrame> {
    let msgs: Vec<RawBookMsg> = if raw.trim_start().starts_with('[') {
        serde_json::from_str(raw).unwrap_or_default()
    } else {
        match serde_json::from_str::<RawBookMsg>(raw) {
            Ok(m) => vec![m],
            Err(_) => vec![],
        }
    };

    if msgs.is_empty() {
        note_parse_failure("book", raw);
        return vec![];
    }

    let mut frames = Vec::new();
    for msg in msgs {
        expand_raw_msg(msg, &mut frames);
    }
    frames
}

fn expand_raw_msg(msg: RawBookMsg, out: &mut Vec<ParsedFrame>) {
    match msg.event_type.as_deref() {
        Some("book") => {
            if let Some(asset_id) = msg.asset_id {
                out.push(ParsedFrame::BookSnapshot {
                    asset_id,
                    asks: msg.asks.unwrap_or_default(),
                    bids: msg.bids.unwrap_or_default(),
                });
            }
        }
        Some("price_change") => {
            for entry in msg.price_changes.unwrap_or_default() {
                out.push(ParsedFrame::BookPriceChange {
                    asset_id: entry.asset_id,
                    change: BookChange {
                        price: entry.price,
                        side: entry.side,
                        size: entry.size,
                    },
                });
            }
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Live-data activity feed
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawActivityMsg {
    topic: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    payload: Option<serde_json::Value>,
}

fn str_field<'a>(v: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    v.get(key).and_then(|x| x.as_str()).filter(|s| !s.is_empty())
}

/// Numbers arrive either as JSON numbers or as decimal strings.
fn num_field(v: &serde_json::Value, key: &str) -> Option<f64> {
    v.get(key)
        .and_then(|x| x.as_f64().or_else(|| x.as_str().and_then(|s| s.parse().ok())))
}

/// Normalize one `activity/trades` payload into a `TradeEvent`.
///
/// `size` is in outcome shares, so the notional is `size * price`. The id is
/// built from the transaction hash, the token, the wallet and the side: one
/// transaction can fill several makers. Millisecond timestamps are scaled down.
pub fn parse_activity_trade(payload: &serde_json::Value) -> Option<TradeEvent> {
    let tx_hash = str_field(payload, "transactionHash")?;
    let asset = str_field(payload, "asset").unwrap_or("");
    let market_id = str_field(payload, "conditionId")?;
    let user_id = str_field(payload, "proxyWallet")?;
    let side: Side = str_field(payload, "side")?.parse().ok()?;

    let outcome = str_field(payload, "outcome")
        .and_then(|o| o.parse::<Outcome>().ok())
        .or_else(|| match payload.get("outcomeIndex").and_then(|i| i.as_u64()) {
            Some(0) => Some(Outcome::Yes),
            Some(1) => Some(Outcome::No),
            _ => None,
        })?;

    let size = num_field(payload, "size")?;
    let price = num_field(payload, "price")?;
    let raw_ts = num_field(payload, "timestamp")? as i64;
    let timestamp = if raw_ts > 1_000_000_000_000 { raw_ts / 1_000 } else { raw_ts };

    Some(TradeEvent {
        id: format!("{tx_hash}:{asset}:{user_id}:{side}"),
        market_id: market_id.to_string(),
        outcome,
        side,
        user_id: user_id.to_string(),
        amount_usd: size * price,
        price,
        timestamp,
    })
}

/// Parse a live-data text frame. Anything other than `activity/trades` is
/// ignored; trades that cannot be normalized are counted and dropped.
pub fn parse_activity_frame(raw: &str) -> Vec<TradeEvent> {
    let msgs: Vec<RawActivityMsg> = if raw.trim_start().starts_with('[') {
        serde_json::from_str(raw).unwrap_or_default()
    } else {
        match serde_json::from_str::<RawActivityMsg>(raw) {
            Ok(m) => vec![m],
            // keepalive frames are not JSON
            Err(_) => return vec![],
        }
    };

    let mut trades = Vec::new();
    for msg in msgs {
        if msg.topic.as_deref() != Some("activity") || msg.kind.as_deref() != Some("trades") {
            continue;
        }
        match msg.payload.as_ref().and_then(parse_activity_trade) {
            Some(trade) => trades.push(trade),
            None => note_parse_failure("activity", raw),
        }
    }
    trades
}
