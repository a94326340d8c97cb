use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::health::HealthState;
use crate::api::latency::{LatencyStats, LatencySummary};
use crate::engine::{
    InsiderFilter, InsiderMarketRow, InsiderScore, InsiderSortField, PositionFilter, PositionRow, PositionSortField,
    QueryFacade, SignalFilter, SignalRow, SignalSortField, SortDirection, SortSpec, UserSummary, WhaleTradeFilter,
    WhaleTradeRow,
};
use crate::error::{AppError, IngestError, QueryError};
use crate::ingest::Ingestor;
use crate::ledger::{now_secs, Appended};
use crate::state::MarketStore;
use crate::types::{Category, Outcome, Side, TimeRange, TradeEvent, Window};

const DEFAULT_TRADE_LIMIT: usize = 100;
const MAX_TRADE_LIMIT: usize = 1_000;

#[derive(Clone)]
pub struct ApiState {
    pub facade: QueryFacade,
    pub ingestor: Ingestor,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
    pub store: Arc<MarketStore>,
    pub query_timeout: Duration,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/signals", get(get_signals))
        .route("/insiders", get(get_insiders))
        .route("/insiders/markets", get(get_insider_markets))
        .route("/markets/:id/trades", get(get_market_trades))
        .route("/whales/trades", get(get_whale_trades))
        .route("/whales/positions", get(get_whale_positions))
        .route("/users/:id", get(get_user))
        .route("/trades", post(post_trades))
        .route("/health", get(get_health))
        .route("/stats/latency", get(get_stats_latency))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct SignalsQuery {
    pub window: Option<String>,
    pub category: Option<String>,
    pub min_volume: Option<f64>,
    pub outcome: Option<String>,
    pub market_id: Option<String>,
    pub sort: Option<SignalSortField>,
    pub dir: Option<SortDirection>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InsidersQuery {
    pub category: Option<String>,
    pub market_id: Option<String>,
    pub outcome: Option<String>,
    pub min_invested: Option<f64>,
    pub min_z: Option<f64>,
    pub flagged_only: Option<bool>,
    pub sort: Option<InsiderSortField>,
    pub dir: Option<SortDirection>,
}

/// `from` and `to` are inclusive unix seconds.
#[derive(Debug, Default, Deserialize)]
pub struct MarketTradesQuery {
    pub outcome: Option<String>,
    pub from: Option<i64>,
    pub to: Option<i64>,
    pub limit: Option<usize>,
}

/// Without `from`, only the last seven days are listed.
#[derive(Debug, Default, Deserialize)]
pub struct WhaleTradesQuery {
    pub category: Option<String>,
    pub market_id: Option<String>,
    pub outcome: Option<String>,
    pub side: Option<String>,
    pub min_amount: Option<f64>,
    pub from: Option<i64>,
    pub to: Option<i64>,
    pub limit: Option<usize>,
}

/// `min_invested` defaults to the whale threshold.
#[derive(Debug, Default, Deserialize)]
pub struct WhalePositionsQuery {
    pub category: Option<String>,
    pub market_id: Option<String>,
    pub outcome: Option<String>,
    pub min_invested: Option<f64>,
    pub sort: Option<PositionSortField>,
    pub dir: Option<SortDirection>,
    pub limit: Option<usize>,
}

fn parse_category(s: Option<&str>) -> Result<Option<Category>, AppError> {
    let Some(s) = s else { return Ok(None) };
    let category = Category::parse_lenient(s);
    if category == Category::Other && !s.trim().eq_ignore_ascii_case("other") {
        return Err(AppError::BadRequest(format!("unknown category: {s}")));
    }
    Ok(Some(category))
}

fn parse_outcome(s: Option<&str>) -> Result<Option<Outcome>, AppError> {
    s.map(str::parse).transpose().map_err(AppError::BadRequest)
}

fn parse_side(s: Option<&str>) -> Result<Option<Side>, AppError> {
    s.map(str::parse).transpose().map_err(AppError::BadRequest)
}

/// Inclusive `from`/`to` seconds as a half-open `(start, end]` range.
fn inclusive_range(from: Option<i64>, to: Option<i64>, default_start: i64) -> Result<TimeRange, AppError> {
    let start = from.map_or(default_start, |f| f.saturating_sub(1));
    let range = TimeRange::new(start, to.unwrap_or(i64::MAX));
    if range.start >= range.end {
        return Err(AppError::BadRequest("`from` must not be after `to`".to_string()));
    }
    Ok(range)
}

fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_TRADE_LIMIT).min(MAX_TRADE_LIMIT)
}

fn parse_window(s: Option<&str>) -> Result<Window, AppError> {
    s.map(str::parse)
        .transpose()
        .map(Option::unwrap_or_default)
        .map_err(AppError::BadRequest)
}

impl SignalsQuery {
    fn filter(&self) -> Result<SignalFilter, AppError> {
        Ok(SignalFilter {
            category: parse_category(self.category.as_deref())?,
            min_volume: self.min_volume,
            window: parse_window(self.window.as_deref())?,
            outcome: parse_outcome(self.outcome.as_deref())?,
            market_id: self.market_id.clone(),
        })
    }

    fn sort(&self) -> SortSpec<SignalSortField> {
        SortSpec::new(self.sort.unwrap_or_default(), self.dir.unwrap_or_default())
    }
}

impl InsidersQuery {
    fn filter(&self) -> Result<InsiderFilter, AppError> {
        Ok(InsiderFilter {
            category: parse_category(self.category.as_deref())?,
            market_id: self.market_id.clone(),
            outcome: parse_outcome(self.outcome.as_deref())?,
            min_invested: self.min_invested,
            min_z_score: self.min_z,
            flagged_only: self.flagged_only.unwrap_or(false),
        })
    }

    fn sort(&self) -> SortSpec<InsiderSortField> {
        SortSpec::new(self.sort.unwrap_or_default(), self.dir.unwrap_or_default())
    }
}

impl WhaleTradesQuery {
    fn filter(&self, now: i64) -> Result<WhaleTradeFilter, AppError> {
        let week_ago = TimeRange::window_ending(Window::Day7, now).start;
        Ok(WhaleTradeFilter {
            category: parse_category(self.category.as_deref())?,
            market_id: self.market_id.clone(),
            outcome: parse_outcome(self.outcome.as_deref())?,
            side: parse_side(self.side.as_deref())?,
            min_amount: self.min_amount,
            range: inclusive_range(self.from, self.to, week_ago)?,
            limit: clamp_limit(self.limit),
        })
    }
}

impl WhalePositionsQuery {
    fn filter(&self, whale_threshold: f64) -> Result<PositionFilter, AppError> {
        Ok(PositionFilter {
            category: parse_category(self.category.as_deref())?,
            market_id: self.market_id.clone(),
            outcome: parse_outcome(self.outcome.as_deref())?,
            user_id: None,
            min_invested: Some(self.min_invested.unwrap_or(whale_threshold)),
        })
    }

    fn sort(&self) -> SortSpec<PositionSortField> {
        SortSpec::new(self.sort.unwrap_or_default(), self.dir.unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// `POST /trades` accepts one event or an array of them.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum TradeBatch {
    One(TradeEvent),
    Many(Vec<TradeEvent>),
}

#[derive(Debug, Serialize)]
pub struct RejectedTrade {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Default, Serialize)]
pub struct IngestReport {
    pub inserted: usize,
    pub duplicates: usize,
    pub rejected: Vec<RejectedTrade>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub ledger_size: usize,
    pub markets_known: usize,
    pub markets_tracked: usize,
    pub book_feed_connected: bool,
    pub activity_feed_connected: bool,
    /// Unix seconds, `None` before the first accepted trade.
    pub last_ingest_at: Option<i64>,
    pub write_queue_pending: u64,
    pub ingested: u64,
    pub duplicates: u64,
    pub rejected: u64,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Run a facade query off the async workers with the configured deadline,
/// recording its wall time.
async fn run_query<T, F>(state: &ApiState, query: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce(&QueryFacade, Option<Instant>) -> Result<T, QueryError> + Send + 'static,
{
    let facade = state.facade.clone();
    let started = Instant::now();
    let deadline = started + state.query_timeout;
    let result = tokio::task::spawn_blocking(move || query(&facade, Some(deadline)))
        .await
        .map_err(|e| AppError::Internal(format!("query task failed: {e}")))?;
    state.latency.record(started.elapsed());
    Ok(result?)
}

async fn get_signals(
    State(state): State<ApiState>,
    Query(params): Query<SignalsQuery>,
) -> Result<Json<Vec<SignalRow>>, AppError> {
    let filter = params.filter()?;
    let sort = params.sort();
    let rows = run_query(&state, move |f, deadline| f.ranked_signals(&filter, sort, deadline)).await?;
    Ok(Json(rows))
}

async fn get_insiders(
    State(state): State<ApiState>,
    Query(params): Query<InsidersQuery>,
) -> Result<Json<Vec<InsiderScore>>, AppError> {
    let filter = params.filter()?;
    let sort = params.sort();
    let rows = run_query(&state, move |f, deadline| f.ranked_insider_scores(&filter, sort, deadline)).await?;
    Ok(Json(rows))
}

async fn get_insider_markets(
    State(state): State<ApiState>,
    Query(params): Query<InsidersQuery>,
) -> Result<Json<Vec<InsiderMarketRow>>, AppError> {
    let filter = params.filter()?;
    let rows = run_query(&state, move |f, deadline| f.ranked_insider_markets(&filter, deadline)).await?;
    Ok(Json(rows))
}

async fn get_market_trades(
    State(state): State<ApiState>,
    Path(market_id): Path<String>,
    Query(params): Query<MarketTradesQuery>,
) -> Result<Json<Vec<TradeEvent>>, AppError> {
    let outcome = parse_outcome(params.outcome.as_deref())?;
    let range = inclusive_range(params.from, params.to, i64::MIN)?;
    let limit = clamp_limit(params.limit);
    let trades =
        run_query(&state, move |f, deadline| f.trades(&market_id, outcome, range, limit, deadline)).await?;
    Ok(Json(trades))
}

async fn get_whale_trades(
    State(state): State<ApiState>,
    Query(params): Query<WhaleTradesQuery>,
) -> Result<Json<Vec<WhaleTradeRow>>, AppError> {
    let filter = params.filter(now_secs())?;
    let rows = run_query(&state, move |f, deadline| f.whale_trades(&filter, deadline)).await?;
    Ok(Json(rows))
}

async fn get_whale_positions(
    State(state): State<ApiState>,
    Query(params): Query<WhalePositionsQuery>,
) -> Result<Json<Vec<PositionRow>>, AppError> {
    let filter = params.filter(state.facade.whale_threshold())?;
    let sort = params.sort();
    let limit = clamp_limit(params.limit);
    let mut rows = run_query(&state, move |f, deadline| f.ranked_positions(&filter, sort, deadline)).await?;
    rows.truncate(limit);
    Ok(Json(rows))
}

async fn get_user(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
) -> Result<Json<UserSummary>, AppError> {
    let summary = run_query(&state, move |f, deadline| f.user_summary(&user_id, deadline)).await?;
    Ok(Json(summary))
}

/// A single event answers 422 when rejected; a batch always answers with a
/// per-event report.
async fn post_trades(
    State(state): State<ApiState>,
    Json(batch): Json<TradeBatch>,
) -> Result<Json<IngestReport>, AppError> {
    let mut report = IngestReport::default();
    match batch {
        TradeBatch::One(event) => {
            tally(&mut report, state.ingestor.ingest(event).await.map_err(AppError::from)?);
        }
        TradeBatch::Many(events) => {
            for event in events {
                match state.ingestor.ingest(event).await {
                    Ok(appended) => tally(&mut report, appended),
                    Err(IngestError::InvalidEvent { id, reason }) => {
                        report.rejected.push(RejectedTrade { id, reason })
                    }
                }
            }
        }
    }
    Ok(Json(report))
}

fn tally(report: &mut IngestReport, appended: Appended) {
    match appended {
        Appended::Inserted => report.inserted += 1,
        Appended::Duplicate => report.duplicates += 1,
    }
}

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let h = &state.health;
    let last = h.last_ingest_at();
    Json(HealthResponse {
        status: "ok",
        ledger_size: state.facade.ledger().len(),
        markets_known: state.store.market_count(),
        markets_tracked: state.store.tracked_market_count(),
        book_feed_connected: h.book_connected(),
        activity_feed_connected: h.activity_connected(),
        last_ingest_at: (last > 0).then_some(last),
        write_queue_pending: h.write_queue_pending(),
        ingested: h.ingested(),
        duplicates: h.duplicates(),
        rejected: h.rejected(),
    })
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencySummary> {
    Json(state.latency.summary())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::ledger::TradeLedger;
    use crate::types::Side;

    fn test_state() -> ApiState {
        let ledger = TradeLedger::new(60);
        let store = MarketStore::new();
        let health = Arc::new(HealthState::new());
        ApiState {
            facade: QueryFacade::new(Arc::clone(&ledger), Arc::clone(&store), EngineConfig::default()),
            ingestor: Ingestor::new(ledger, None, Arc::clone(&health)),
            health,
            latency: Arc::new(LatencyStats::new()),
            store,
            query_timeout: Duration::from_secs(5),
        }
    }

    fn trade(id: &str, amount: f64) -> TradeEvent {
        TradeEvent {
            id: id.to_string(),
            market_id: "m1".to_string(),
            outcome: Outcome::Yes,
            side: Side::Buy,
            user_id: "0xabc".to_string(),
            amount_usd: amount,
            price: 0.4,
            timestamp: now_secs() - 30,
        }
    }

    #[test]
    fn query_strings_map_to_filters() {
        let q = SignalsQuery {
            window: Some("6h".to_string()),
            category: Some("Crypto".to_string()),
            outcome: Some("down".to_string()),
            ..Default::default()
        };
        let f = q.filter().unwrap();
        assert_eq!(f.window, Window::Hour6);
        assert_eq!(f.category, Some(Category::Crypto));
        assert_eq!(f.outcome, Some(Outcome::No));

        assert_eq!(SignalsQuery::default().filter().unwrap().window, Window::Hour24);
    }

    #[test]
    fn bad_query_values_are_bad_requests() {
        let q = SignalsQuery { window: Some("2d".to_string()), ..Default::default() };
        assert!(matches!(q.filter(), Err(AppError::BadRequest(_))));
        let q = InsidersQuery { category: Some("astrology".to_string()), ..Default::default() };
        assert!(matches!(q.filter(), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn batch_body_accepts_object_or_array() {
        let one = serde_json::to_string(&trade("t1", 5.0)).unwrap();
        assert!(matches!(serde_json::from_str::<TradeBatch>(&one).unwrap(), TradeBatch::One(_)));
        let many = format!("[{one}]");
        assert!(matches!(serde_json::from_str::<TradeBatch>(&many).unwrap(), TradeBatch::Many(v) if v.len() == 1));
    }

    #[tokio::test]
    async fn posted_batch_reports_each_event() {
        let state = test_state();
        let batch = TradeBatch::Many(vec![trade("t1", 50.0), trade("t1", 50.0), trade("t2", -1.0)]);
        let Json(report) = post_trades(State(state.clone()), Json(batch)).await.unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].id, "t2");
        assert_eq!(state.facade.ledger().len(), 1);
    }

    #[tokio::test]
    async fn single_rejected_event_is_an_error() {
        let state = test_state();
        let result = post_trades(State(state), Json(TradeBatch::One(trade("bad", 0.0)))).await;
        assert!(matches!(result, Err(AppError::Ingest(_))));
    }

    #[tokio::test]
    async fn signals_reflect_posted_trades_and_record_latency() {
        let state = test_state();
        post_trades(State(state.clone()), Json(TradeBatch::One(trade("t1", 250.0)))).await.unwrap();

        let Json(rows) = get_signals(State(state.clone()), Query(SignalsQuery::default())).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].aggregate.volume, 250.0);
        assert_eq!(state.latency.summary().samples, 1);

        let Json(health) = get_health(State(state)).await;
        assert_eq!(health.ledger_size, 1);
        assert!(health.last_ingest_at.is_some());
    }

    #[tokio::test]
    async fn inverted_trade_range_is_rejected() {
        let state = test_state();
        let q = MarketTradesQuery { from: Some(200), to: Some(100), ..Default::default() };
        let result = get_market_trades(State(state), Path("m1".to_string()), Query(q)).await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn trade_range_bounds_are_inclusive() {
        let state = test_state();
        let t = trade("t1", 50.0);
        let ts = t.timestamp;
        post_trades(State(state.clone()), Json(TradeBatch::One(t))).await.unwrap();

        let q = MarketTradesQuery { from: Some(ts), to: Some(ts), ..Default::default() };
        let Json(trades) = get_market_trades(State(state.clone()), Path("m1".to_string()), Query(q)).await.unwrap();
        assert_eq!(trades.len(), 1);

        let q = MarketTradesQuery { from: Some(ts + 1), ..Default::default() };
        let Json(trades) = get_market_trades(State(state), Path("m1".to_string()), Query(q)).await.unwrap();
        assert!(trades.is_empty());
    }

    fn whale_state() -> ApiState {
        let state = test_state();
        let mut small = trade("small", 50.0);
        small.user_id = "0xdef".to_string();
        for t in [trade("big", 20_000.0), small] {
            state.facade.ledger().append(t).unwrap();
        }
        state
    }

    #[tokio::test]
    async fn whale_trades_route_defaults_to_threshold() {
        let state = whale_state();
        let Json(rows) = get_whale_trades(State(state.clone()), Query(WhaleTradesQuery::default())).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].trade.id, "big");

        let q = WhaleTradesQuery { min_amount: Some(10.0), side: Some("buy".to_string()), ..Default::default() };
        let Json(rows) = get_whale_trades(State(state.clone()), Query(q)).await.unwrap();
        assert_eq!(rows.len(), 2);

        let q = WhaleTradesQuery { side: Some("hold".to_string()), ..Default::default() };
        let result = get_whale_trades(State(state), Query(q)).await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn whale_positions_route_filters_and_limits() {
        let state = whale_state();
        let Json(rows) =
            get_whale_positions(State(state.clone()), Query(WhalePositionsQuery::default())).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].position.user_id, "0xabc");

        let q = WhalePositionsQuery { min_invested: Some(0.0), ..Default::default() };
        let Json(rows) = get_whale_positions(State(state.clone()), Query(q)).await.unwrap();
        assert_eq!(rows.len(), 2);

        let q = WhalePositionsQuery { min_invested: Some(0.0), limit: Some(1), ..Default::default() };
        let Json(rows) = get_whale_positions(State(state), Query(q)).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn user_route_summarizes_a_wallet() {
        let state = whale_state();
        let Json(summary) = get_user(State(state.clone()), Path("0xabc".to_string())).await.unwrap();
        assert_eq!(summary.trade_count, 1);
        assert_eq!(summary.total_volume, 20_000.0);
        assert_eq!(summary.open_positions.len(), 1);

        let Json(empty) = get_user(State(state), Path("0xnobody".to_string())).await.unwrap();
        assert_eq!(empty.trade_count, 0);
    }
}
