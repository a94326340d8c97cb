use crate::engine::insider::FlagPolicy;
use crate::error::{AppError, Result};

pub const CLOB_WS_URL: &str = "wss://ws-subscriptions-clob.polymarket.com/ws/market";
pub const ACTIVITY_WS_URL: &str = "wss://ws-live-data.polymarket.com";
pub const GAMMA_API_URL: &str = "https://gamma-api.polymarket.com";

/// Heartbeat ping interval (seconds).
pub const WS_PING_INTERVAL_SECS: u64 = 30;

/// Reconnect backoff values in milliseconds.
pub const RECONNECT_BACKOFF_MS: &[u64] = &[100, 200, 400, 800, 1600];

/// Channel capacity for internal message routing.
pub const CHANNEL_CAPACITY: usize = 1024;

/// Flag monitor interval (seconds).
pub const SCORER_INTERVAL_SECS: u64 = 60;

/// Market catalog refresh interval (seconds) — how often to re-fetch markets from Gamma.
pub const MARKET_REFRESH_INTERVAL_SECS: u64 = 300;

/// Maximum asset IDs per WS subscribe frame to avoid server-side size limits.
pub const WS_SUBSCRIBE_CHUNK_SIZE: usize = 500;

/// Finite stand-in for an unbounded buy/sell ratio (sellers == 0, buyers > 0).
/// Formatting layers never see an actual infinity.
pub const RATIO_SENTINEL: f64 = 1_000_000.0;

pub const SECS_PER_DAY: i64 = 86_400;

/// Knobs of the analytics core. Everything here is a pure input to the engine;
/// nothing in it reaches the network.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Trades with `amount_usd >= whale_threshold_usd` count as whale trades.
    pub whale_threshold_usd: f64,
    /// How far into the future an event timestamp may be before it is rejected.
    pub clock_skew_tolerance_secs: i64,
    /// Maximum rows a single ledger scan may touch.
    pub scan_row_budget: usize,
    pub flag_policy: FlagPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            whale_threshold_usd: 10_000.0,
            clock_skew_tolerance_secs: 60,
            scan_row_budget: 500_000,
            flag_policy: FlagPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Run the Gamma catalog, CLOB book and activity adapters (FEEDS_ENABLED).
    pub feeds_enabled: bool,
    pub gamma_api_url: String,
    pub clob_ws_url: String,
    pub activity_ws_url: String,
    /// Max markets kept in the catalog (CATALOG_MAX_MARKETS)
    pub catalog_max_markets: usize,
    /// Minimum 24h volume in USD for a market to enter the catalog (CATALOG_MIN_VOLUME_24H)
    pub catalog_min_volume_24h: f64,
    /// Per-request deadline for facade queries (QUERY_TIMEOUT_MS)
    pub query_timeout_ms: u64,
    pub engine: EngineConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = EngineConfig::default();
        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "signals.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            feeds_enabled: std::env::var("FEEDS_ENABLED")
                .map(|v| !matches!(v.trim().to_lowercase().as_str(), "0" | "false" | "no" | "off"))
                .unwrap_or(true),
            gamma_api_url: std::env::var("GAMMA_API_URL")
                .unwrap_or_else(|_| GAMMA_API_URL.to_string()),
            clob_ws_url: std::env::var("CLOB_WS_URL").unwrap_or_else(|_| CLOB_WS_URL.to_string()),
            activity_ws_url: std::env::var("ACTIVITY_WS_URL")
                .unwrap_or_else(|_| ACTIVITY_WS_URL.to_string()),
            catalog_max_markets: std::env::var("CATALOG_MAX_MARKETS")
                .unwrap_or_else(|_| "200".to_string())
                .parse::<usize>()
                .unwrap_or(200),
            catalog_min_volume_24h: std::env::var("CATALOG_MIN_VOLUME_24H")
                .unwrap_or_else(|_| "10000".to_string())
                .parse::<f64>()
                .unwrap_or(10_000.0),
            query_timeout_ms: std::env::var("QUERY_TIMEOUT_MS")
                .unwrap_or_else(|_| "5000".to_string())
                .parse::<u64>()
                .unwrap_or(5_000),
            engine: EngineConfig {
                whale_threshold_usd: std::env::var("WHALE_THRESHOLD_USD")
                    .ok()
                    .and_then(|v| v.parse::<f64>().ok())
                    .filter(|v| *v > 0.0)
                    .unwrap_or(defaults.whale_threshold_usd),
                clock_skew_tolerance_secs: std::env::var("CLOCK_SKEW_TOLERANCE_SECS")
                    .ok()
                    .and_then(|v| v.parse::<i64>().ok())
                    .unwrap_or(defaults.clock_skew_tolerance_secs),
                scan_row_budget: std::env::var("SCAN_ROW_BUDGET")
                    .ok()
                    .and_then(|v| v.parse::<usize>().ok())
                    .unwrap_or(defaults.scan_row_budget),
                flag_policy: FlagPolicy {
                    min_z_score: std::env::var("FLAG_MIN_Z_SCORE")
                        .ok()
                        .and_then(|v| v.parse::<f64>().ok())
                        .unwrap_or(defaults.flag_policy.min_z_score),
                    max_days_since_first_trade: std::env::var("FLAG_MAX_DAYS")
                        .ok()
                        .and_then(|v| v.parse::<i64>().ok())
                        .unwrap_or(defaults.flag_policy.max_days_since_first_trade),
                },
            },
        })
    }
}
