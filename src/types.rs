use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Market
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub id: String,
    pub question: String,
    pub category: Category,
    pub end_date_iso: Option<String>,
    pub total_volume: Option<f64>,
    pub yes_token_id: String,
    pub no_token_id: String,
}

impl Market {
    pub fn token_id(&self, outcome: Outcome) -> &str {
        match outcome {
            Outcome::Yes => &self.yes_token_id,
            Outcome::No => &self.no_token_id,
        }
    }
}

/// Subscription changes sent from the catalog refresher to the book feed.
#[derive(Debug, Clone)]
pub enum ControlMsg {
    Subscribe(Vec<Market>),
    /// market_id
    Unsubscribe(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Sports,
    Weather,
    Crypto,
    Politics,
    Economics,
    Other,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Category::Sports => "sports",
            Category::Weather => "weather",
            Category::Crypto => "crypto",
            Category::Politics => "politics",
            Category::Economics => "economics",
            Category::Other => "other",
        };
        write!(f, "{s}")
    }
}

impl Category {
    /// Lenient mapping used for upstream category labels and stored rows.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "sports" => Category::Sports,
            "weather" => Category::Weather,
            "crypto" => Category::Crypto,
            "politics" => Category::Politics,
            "economics" => Category::Economics,
            _ => Category::Other,
        }
    }
}

// ---------------------------------------------------------------------------
// Trade events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Yes,
    No,
}

impl Outcome {
    pub fn all() -> [Outcome; 2] {
        [Outcome::Yes, Outcome::No]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Yes => "yes",
            Outcome::No => "no",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = String;

    /// Accepts the binary labels Polymarket uses for both outcome styles.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "yes" | "up" => Ok(Outcome::Yes),
            "no" | "down" => Ok(Outcome::No),
            other => Err(format!("unknown outcome '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "buy" => Ok(Side::Buy),
            "sell" => Ok(Side::Sell),
            other => Err(format!("unknown side '{other}'")),
        }
    }
}

/// A normalized trade. Immutable once accepted by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub id: String,
    pub market_id: String,
    pub outcome: Outcome,
    pub side: Side,
    pub user_id: String,
    pub amount_usd: f64,
    /// Outcome-token price in [0, 1].
    pub price: f64,
    /// Unix epoch seconds.
    pub timestamp: i64,
}

impl TradeEvent {
    pub fn is_whale(&self, threshold_usd: f64) -> bool {
        self.amount_usd >= threshold_usd
    }

    /// Canonical ledger order: timestamp ascending, id breaks ties.
    pub fn order_key(&self) -> (i64, &str) {
        (self.timestamp, self.id.as_str())
    }
}

// ---------------------------------------------------------------------------
// Windows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Window {
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "6h")]
    Hour6,
    #[default]
    #[serde(rename = "24h")]
    Hour24,
    #[serde(rename = "7d")]
    Day7,
}

impl Window {
    pub fn as_str(&self) -> &'static str {
        match self {
            Window::Hour1 => "1h",
            Window::Hour6 => "6h",
            Window::Hour24 => "24h",
            Window::Day7 => "7d",
        }
    }

    pub fn duration_secs(&self) -> i64 {
        match self {
            Window::Hour1 => 3_600,
            Window::Hour6 => 6 * 3_600,
            Window::Hour24 => 24 * 3_600,
            Window::Day7 => 7 * 24 * 3_600,
        }
    }

    pub fn all() -> [Window; 4] {
        [Window::Hour1, Window::Hour6, Window::Hour24, Window::Day7]
    }
}

impl std::fmt::Display for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Window {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Window::all()
            .into_iter()
            .find(|w| w.as_str() == s.trim())
            .ok_or_else(|| format!("unsupported window '{s}' (expected 1h, 6h, 24h or 7d)"))
    }
}

/// Half-open time range `(start, end]` in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Every representable timestamp.
    pub fn all() -> Self {
        Self { start: i64::MIN, end: i64::MAX }
    }

    pub fn window_ending(window: Window, end: i64) -> Self {
        Self { start: end.saturating_sub(window.duration_secs()), end }
    }

    /// The range of equal length immediately before this one.
    pub fn preceding(&self) -> Self {
        let len = self.end.saturating_sub(self.start);
        Self { start: self.start.saturating_sub(len), end: self.start }
    }

    pub fn contains(&self, ts: i64) -> bool {
        ts > self.start && ts <= self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_round_trips_through_labels() {
        for w in Window::all() {
            assert_eq!(w.as_str().parse::<Window>().unwrap(), w);
        }
        assert!("2h".parse::<Window>().is_err());
    }

    #[test]
    fn preceding_range_has_equal_length_and_abuts() {
        let r = TimeRange::window_ending(Window::Hour1, 10_000);
        let p = r.preceding();
        assert_eq!(p.end, r.start);
        assert_eq!(p.end - p.start, 3_600);
        assert!(!p.contains(r.start + 1));
        assert!(p.contains(r.start));
    }

    #[test]
    fn outcome_accepts_up_down_labels() {
        assert_eq!("Up".parse::<Outcome>().unwrap(), Outcome::Yes);
        assert_eq!("DOWN".parse::<Outcome>().unwrap(), Outcome::No);
        assert!("maybe".parse::<Outcome>().is_err());
    }
}
