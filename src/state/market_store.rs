use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::types::{Market, Outcome};

// ---------------------------------------------------------------------------
// OrderBook
// ---------------------------------------------------------------------------

/// Per-token order book. Prices are stored as integer keys: `(price * 10_000).round() as u32`.
/// This avoids floating-point map keys while supporting 4 decimal places of precision.
///
/// For asks, `BTreeMap::keys().next()` is O(log n) and gives the minimum (best ask).
/// For bids, `BTreeMap::keys().next_back()` gives the maximum (best bid).
#[derive(Debug, Default)]
struct OrderBook {
    /// price_key → size. Sorted ascending; minimum key = best ask.
    asks: BTreeMap<u32, f64>,
    /// price_key → size. Sorted ascending; maximum key = best bid.
    bids: BTreeMap<u32, f64>,
}

impl OrderBook {
    #[inline]
    fn price_key(price: f64) -> u32 {
        (price * 10_000.0).round() as u32
    }

    #[inline]
    fn key_to_price(key: u32) -> f64 {
        key as f64 / 10_000.0
    }

    fn apply_snapshot(&mut self, asks: &[(f64, f64)], bids: &[(f64, f64)]) {
        self.asks.clear();
        self.bids.clear();
        for &(price, size) in asks.iter().filter(|(_, s)| *s > 0.0) {
            self.asks.insert(Self::price_key(price), size);
        }
        for &(price, size) in bids.iter().filter(|(_, s)| *s > 0.0) {
            self.bids.insert(Self::price_key(price), size);
        }
    }

    /// `is_ask`: true = SELL side (ask), false = BUY side (bid).
    fn apply_change(&mut self, price: f64, is_ask: bool, size: f64) {
        let key = Self::price_key(price);
        let map = if is_ask { &mut self.asks } else { &mut self.bids };
        if size == 0.0 {
            map.remove(&key);
        } else {
            map.insert(key, size);
        }
    }

    fn quote(&self) -> Quote {
        Quote {
            best_ask: self.asks.keys().next().map(|&k| Self::key_to_price(k)).unwrap_or(0.0),
            best_bid: self.bids.keys().next_back().map(|&k| Self::key_to_price(k)).unwrap_or(0.0),
        }
    }
}

/// Top of book for one outcome token. A side with no levels reads as 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub best_ask: f64,
    pub best_bid: f64,
}

/// Reverse lookup entry: asset_id → (market, outcome).
#[derive(Debug, Clone)]
pub struct TokenMarketRef {
    pub market_id: String,
    pub outcome: Outcome,
}

// ---------------------------------------------------------------------------
// MarketStore
// ---------------------------------------------------------------------------

/// Market catalog plus live order books for the tokens currently subscribed.
///
/// Metadata outlives the subscription: a retired market keeps its question and
/// category so historical ledger rows can still be labelled and filtered.
pub struct MarketStore {
    /// market_id → Market metadata
    markets: DashMap<String, Market>,
    /// asset_id → (market_id, outcome) for subscribed tokens
    token_to_market: DashMap<String, TokenMarketRef>,
    /// asset_id → live order book (maintained from the CLOB book feed)
    token_books: DashMap<String, OrderBook>,
}

impl MarketStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register (or refresh) a market and start tracking both outcome tokens.
    pub fn add_market(&self, market: Market) {
        for outcome in Outcome::all() {
            let token = market.token_id(outcome).to_string();
            if token.is_empty() {
                continue;
            }
            self.token_to_market.insert(
                token.clone(),
                TokenMarketRef { market_id: market.id.clone(), outcome },
            );
            self.token_books.entry(token).or_default();
        }
        self.markets.insert(market.id.clone(), market);
    }

    pub fn add_markets(&self, markets: Vec<Market>) {
        for market in markets {
            self.add_market(market);
        }
    }

    /// Record metadata only, e.g. for markets loaded from the database. Books of
    /// an already tracked market are left alone.
    pub fn insert_metadata(&self, market: Market) {
        self.markets.insert(market.id.clone(), market);
    }

    /// Stop tracking books for a market; metadata is kept.
    pub fn retire_market(&self, market_id: &str) {
        if let Some(market) = self.markets.get(market_id) {
            for outcome in Outcome::all() {
                let token = market.token_id(outcome);
                self.token_to_market.remove(token);
                self.token_books.remove(token);
            }
        }
    }

    pub fn is_tracked(&self, market_id: &str) -> bool {
        self.markets
            .get(market_id)
            .is_some_and(|m| self.token_to_market.contains_key(&m.yes_token_id))
    }

    /// Apply a full book snapshot for a token.
    ///
    /// `asks`/`bids` are `(price, size)` pairs — size=0 levels are skipped.
    /// Returns the resulting quote, or None for an untracked token.
    pub fn apply_book_snapshot(
        &self,
        asset_id: &str,
        asks: &[(f64, f64)],
        bids: &[(f64, f64)],
    ) -> Option<Quote> {
        if !self.token_to_market.contains_key(asset_id) {
            return None;
        }
        let mut book = self.token_books.entry(asset_id.to_string()).or_default();
        book.apply_snapshot(asks, bids);
        Some(book.quote())
    }

    /// Apply incremental order-level changes for a token.
    ///
    /// `changes` are `(price, is_ask, size)` — `is_ask=true` means SELL side, false means BUY.
    pub fn apply_book_changes(&self, asset_id: &str, changes: &[(f64, bool, f64)]) -> Option<Quote> {
        if !self.token_to_market.contains_key(asset_id) {
            return None;
        }
        let mut book = self.token_books.entry(asset_id.to_string()).or_default();
        for &(price, is_ask, size) in changes {
            book.apply_change(price, is_ask, size);
        }
        Some(book.quote())
    }

    /// Current top of book for one outcome of a market.
    pub fn quote(&self, market_id: &str, outcome: Outcome) -> Option<Quote> {
        let market = self.markets.get(market_id)?;
        let book = self.token_books.get(market.token_id(outcome))?;
        Some(book.quote())
    }

    pub fn get_market(&self, market_id: &str) -> Option<Market> {
        self.markets.get(market_id).map(|m| m.clone())
    }

    pub fn market_count(&self) -> usize {
        self.markets.len()
    }

    pub fn tracked_market_count(&self) -> usize {
        self.markets
            .iter()
            .filter(|m| self.token_to_market.contains_key(&m.yes_token_id))
            .count()
    }

    pub fn all_asset_ids(&self) -> Vec<String> {
        self.token_to_market.iter().map(|e| e.key().clone()).collect()
    }

    /// Returns `[yes_token_id, no_token_id]` for a market, used for unsubscription.
    pub fn token_ids_for_market(&self, market_id: &str) -> Option<Vec<String>> {
        let market = self.markets.get(market_id)?;
        Some(vec![market.yes_token_id.clone(), market.no_token_id.clone()])
    }

    /// Ids of markets whose books are currently tracked.
    pub fn tracked_market_ids(&self) -> Vec<String> {
        self.markets
            .iter()
            .filter(|m| self.token_to_market.contains_key(&m.yes_token_id))
            .map(|e| e.key().clone())
            .collect()
    }
}

impl Default for MarketStore {
    fn default() -> Self {
        Self {
            markets: DashMap::new(),
            token_to_market: DashMap::new(),
            token_books: DashMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Category;

    fn test_market() -> Market {
        Market {
            id: "market1".to_string(),
            question: "Test".to_string(),
            category: Category::Politics,
            end_date_iso: None,
            total_volume: None,
            yes_token_id: "yes1".to_string(),
            no_token_id: "no1".to_string(),
        }
    }

    #[test]
    fn snapshot_sets_best_ask_and_bid() {
        let store = MarketStore::new();
        store.add_market(test_market());

        let quote = store
            .apply_book_snapshot("yes1", &[(0.55, 100.0), (0.60, 50.0)], &[(0.54, 200.0), (0.50, 75.0)])
            .unwrap();
        assert!((quote.best_ask - 0.55).abs() < 1e-6, "best_ask={}", quote.best_ask);
        assert!((quote.best_bid - 0.54).abs() < 1e-6, "best_bid={}", quote.best_bid);
        assert_eq!(store.quote("market1", Outcome::Yes), Some(quote));
    }

    #[test]
    fn stored_metadata_is_not_tracked() {
        let store = MarketStore::new();
        store.insert_metadata(test_market());
        assert_eq!(store.get_market("market1").map(|m| m.category), Some(Category::Politics));
        assert!(!store.is_tracked("market1"));
        assert!(store.all_asset_ids().is_empty());
        assert_eq!(store.apply_book_snapshot("yes1", &[(0.5, 1.0)], &[]), None);
    }

    #[test]
    fn price_change_removes_level_and_updates_best_ask() {
        let store = MarketStore::new();
        store.add_market(test_market());
        store.apply_book_snapshot("yes1", &[(0.55, 100.0), (0.60, 50.0)], &[]);

        // size=0 means the level was cancelled
        let quote = store.apply_book_changes("yes1", &[(0.55, true, 0.0)]).unwrap();
        assert!((quote.best_ask - 0.60).abs() < 1e-6, "best_ask should have moved to 0.60, got {}", quote.best_ask);
        assert_eq!(quote.best_bid, 0.0);
    }

    #[test]
    fn unknown_token_returns_none() {
        let store = MarketStore::new();
        store.add_market(test_market());
        assert!(store.apply_book_snapshot("unknown_token", &[(0.55, 100.0)], &[]).is_none());
    }

    #[test]
    fn quotes_are_per_outcome() {
        let store = MarketStore::new();
        store.add_market(test_market());
        store.apply_book_snapshot("no1", &[(0.47, 10.0)], &[(0.44, 10.0)]);

        let no = store.quote("market1", Outcome::No).unwrap();
        assert!((no.best_ask - 0.47).abs() < 1e-6);
        let yes = store.quote("market1", Outcome::Yes).unwrap();
        assert_eq!(yes, Quote { best_ask: 0.0, best_bid: 0.0 });
    }

    #[test]
    fn retired_market_keeps_metadata_but_drops_books() {
        let store = MarketStore::new();
        store.add_market(test_market());
        store.apply_book_snapshot("yes1", &[(0.55, 100.0)], &[(0.50, 100.0)]);

        store.retire_market("market1");

        assert!(!store.is_tracked("market1"));
        assert!(store.quote("market1", Outcome::Yes).is_none());
        assert_eq!(store.get_market("market1").unwrap().category, Category::Politics);
        assert!(store.all_asset_ids().is_empty());
        assert_eq!(store.tracked_market_count(), 0);
        assert_eq!(store.market_count(), 1);
    }
}
