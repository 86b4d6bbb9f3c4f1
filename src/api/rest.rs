// =============================================================================
// REST API Endpoints — Axum 0.8
// =============================================================================
//
// Route classes:
//   - public:  `/`, `/health`, `/auth-status`, `/auth-info`
//   - docs:    `/docs`, `/redoc`, `/openapi.json` (Basic-auth middleware)
//   - api:     `/api/v1/market-data/*`, `/api/v1/trading/*` and the legacy
//              `/Get*/` aliases, all behind the API-key middleware
//
// API routes answer with the `{OK, Resposta}` envelope. JSON body failures
// are folded into the same 400 envelope as validation errors.
//
// CORS is permissive. Every request runs in a span with a fresh request id;
// headers are never recorded on it.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{FromRequest, Request, State},
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info_span;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::auth::require_api_key;
use crate::api::{docs, legacy};
use crate::api::envelope::Envelope;
use crate::app_state::AppState;
use crate::error::ApiError;
use crate::status::{self, AuthStatus};
use crate::terminal::TerminalAccessSnapshot;
use crate::trading::{DEFAULT_DEVIATION, DEFAULT_MAGIC_NUMBER};
use crate::translator::MarketQuery;
use crate::types::{MarketOrder, Position, SymbolDescriptor, SymbolSnapshot, TickerBar, TradeResult, TradeSide};

pub(crate) type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;

pub(crate) fn ok<T>(payload: T) -> ApiResult<T> {
    Ok(Json(Envelope::success(payload)))
}

/// `axum::Json` with its rejection mapped onto `ApiError`.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

// =============================================================================
// Router construction
// =============================================================================

/// Build the full router with gates, tracing, CORS and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace = TraceLayer::new_for_http().make_span_with(|request: &Request| {
        info_span!(
            "request",
            request_id = %Uuid::new_v4(),
            method = %request.method(),
            path = %request.uri().path(),
        )
    });

    let api = Router::new()
        // ── Market data ─────────────────────────────────────────────
        .route("/api/v1/market-data/symbols", get(list_symbols).post(list_symbols))
        .route("/api/v1/market-data/symbol-info", post(symbol_info))
        .route("/api/v1/market-data/tickers", post(tickers))
        .route("/api/v1/market-data/tickers-by-count", post(tickers_by_count))
        .route("/api/v1/market-data/symbols-percent-change", post(percent_change))
        // ── Trading ─────────────────────────────────────────────────
        .route("/api/v1/trading/positions", get(positions))
        .route("/api/v1/trading/open-position", post(open_position))
        .route("/api/v1/trading/close-position", post(close_position))
        .route("/api/v1/trading/modify-position", post(modify_position))
        // ── Legacy aliases ──────────────────────────────────────────
        .route("/GetSymbols/", post(list_symbols))
        .route("/GetSymbolInfo/", post(legacy::symbol_info))
        .route("/GetTickers/", post(legacy::tickers))
        .route("/GetTickersPos/", post(legacy::tickers_by_count))
        .route("/GetSymbolsPctChange/", post(legacy::percent_change))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/", get(root))
        .route("/health", get(health))
        .route("/auth-status", get(auth_status))
        .route("/auth-info", get(auth_status))
        // ── Documentation (Basic auth) ──────────────────────────────
        .merge(docs::router(state.clone()))
        // ── API (key gate) ──────────────────────────────────────────
        .merge(api)
        // ── Middleware & State ──────────────────────────────────────
        .layer(trace)
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Public
// =============================================================================

#[derive(Serialize)]
struct RootInfo {
    name: &'static str,
    version: &'static str,
    docs: &'static str,
    health: &'static str,
    auth_status: &'static str,
}

async fn root() -> Json<RootInfo> {
    Json(RootInfo {
        name: "MT5 Gateway",
        version: env!("CARGO_PKG_VERSION"),
        docs: "/docs",
        health: "/health",
        auth_status: "/auth-status",
    })
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    status: &'static str,
    terminal: &'static str,
    terminal_connected: bool,
    uptime_secs: u64,
    server_time: i64,
    gate: TerminalAccessSnapshot,
}

/// Always 200; `status` is `degraded` while the terminal is disconnected.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Status",
    responses((status = 200, description = "Gateway health", body = HealthResponse))
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let binding = state.access.binding();
    let connected = binding.is_connected();
    Json(HealthResponse {
        status: if connected { "ok" } else { "degraded" },
        terminal: binding.name(),
        terminal_connected: connected,
        uptime_secs: state.uptime_secs(),
        server_time: chrono::Utc::now().timestamp_millis(),
        gate: state.access.snapshot(),
    })
}

#[utoipa::path(
    get,
    path = "/auth-status",
    tag = "Status",
    responses((status = 200, description = "Authentication configuration", body = AuthStatus))
)]
pub async fn auth_status(State(state): State<Arc<AppState>>) -> Json<AuthStatus> {
    Json(status::report(&state.credentials, state.access.binding()))
}

// =============================================================================
// Market data
// =============================================================================

fn default_timeframe() -> i32 {
    1
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SymbolInfoRequest {
    #[serde(default, alias = "active", alias = "ativo")]
    pub symbol: Option<String>,
    #[serde(default, alias = "actives")]
    pub symbols: Vec<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TickersRequest {
    #[serde(default, alias = "active", alias = "ativo")]
    pub symbol: String,
    #[serde(default, rename = "dateFrom", alias = "date_from")]
    pub date_from: Option<String>,
    #[serde(default, rename = "dateTo", alias = "date_to")]
    pub date_to: Option<String>,
    #[serde(default = "default_timeframe")]
    pub timeframe: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TickersByCountRequest {
    #[serde(default, alias = "active", alias = "ativo")]
    pub symbol: String,
    /// Number of bars, most recent last.
    #[serde(default, alias = "count")]
    pub position: Option<i64>,
    #[serde(default = "default_timeframe")]
    pub timeframe: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PercentChangeRequest {
    #[serde(default, alias = "actives")]
    pub symbols: Vec<String>,
    #[serde(default = "default_timeframe")]
    pub timeframe: i32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SymbolList {
    pub symbols: Vec<SymbolDescriptor>,
    pub count: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BarSeries {
    pub symbol: String,
    pub timeframe: i32,
    pub bars: Vec<TickerBar>,
    pub count: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PercentChangeList {
    pub timeframe: i32,
    pub symbols: Vec<SymbolSnapshot>,
    pub count: usize,
}

impl BarSeries {
    fn new(query: &MarketQuery, bars: Vec<TickerBar>) -> Self {
        Self {
            symbol: query.symbol.clone(),
            timeframe: query.timeframe.code(),
            count: bars.len(),
            bars,
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/market-data/symbols",
    tag = "Market Data",
    security(("api_key" = [])),
    responses(
        (status = 200, description = "Symbols in terminal order", body = Envelope<SymbolList>),
        (status = 401, description = "Missing or invalid API key"),
        (status = 503, description = "Terminal unavailable")
    )
)]
pub async fn list_symbols(State(state): State<Arc<AppState>>) -> ApiResult<SymbolList> {
    let symbols = state.market.list_symbols().await?;
    ok(SymbolList {
        count: symbols.len(),
        symbols,
    })
}

#[utoipa::path(
    post,
    path = "/api/v1/market-data/symbol-info",
    tag = "Market Data",
    security(("api_key" = [])),
    request_body = SymbolInfoRequest,
    responses(
        (status = 200, description = "Metadata of the known symbols", body = Envelope<SymbolList>),
        (status = 400, description = "Invalid request"),
        (status = 404, description = "The single requested symbol is unknown")
    )
)]
pub async fn symbol_info(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<SymbolInfoRequest>,
) -> ApiResult<SymbolList> {
    let mut names = req.symbols;
    if let Some(symbol) = req.symbol {
        names.insert(0, symbol);
    }
    let symbols = state.market.symbol_info(&names).await?;
    ok(SymbolList {
        count: symbols.len(),
        symbols,
    })
}

#[utoipa::path(
    post,
    path = "/api/v1/market-data/tickers",
    tag = "Market Data",
    security(("api_key" = [])),
    request_body = TickersRequest,
    responses(
        (status = 200, description = "Bars opening in [dateFrom, dateTo)", body = Envelope<BarSeries>),
        (status = 400, description = "Invalid request"),
        (status = 404, description = "Unknown symbol")
    )
)]
pub async fn tickers(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<TickersRequest>,
) -> ApiResult<BarSeries> {
    let query = MarketQuery::range(
        &req.symbol,
        req.timeframe,
        req.date_from.as_deref(),
        req.date_to.as_deref(),
    )?;
    let bars = state.market.bars(query.clone()).await?;
    ok(BarSeries::new(&query, bars))
}

#[utoipa::path(
    post,
    path = "/api/v1/market-data/tickers-by-count",
    tag = "Market Data",
    security(("api_key" = [])),
    request_body = TickersByCountRequest,
    responses(
        (status = 200, description = "Most recent bars, oldest first", body = Envelope<BarSeries>),
        (status = 400, description = "Invalid request"),
        (status = 404, description = "Unknown symbol")
    )
)]
pub async fn tickers_by_count(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<TickersByCountRequest>,
) -> ApiResult<BarSeries> {
    let query = MarketQuery::latest(&req.symbol, req.timeframe, req.position, state.market.max_bars())?;
    let bars = state.market.bars(query.clone()).await?;
    ok(BarSeries::new(&query, bars))
}

#[utoipa::path(
    post,
    path = "/api/v1/market-data/symbols-percent-change",
    tag = "Market Data",
    security(("api_key" = [])),
    request_body = PercentChangeRequest,
    responses(
        (status = 200, description = "Change against the previous bar close", body = Envelope<PercentChangeList>),
        (status = 400, description = "Invalid request")
    )
)]
pub async fn percent_change(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<PercentChangeRequest>,
) -> ApiResult<PercentChangeList> {
    let symbols = state.market.percent_change(&req.symbols, req.timeframe).await?;
    ok(PercentChangeList {
        timeframe: req.timeframe,
        count: symbols.len(),
        symbols,
    })
}

// =============================================================================
// Trading
// =============================================================================

fn default_deviation() -> u32 {
    DEFAULT_DEVIATION
}

fn default_magic_number() -> u64 {
    DEFAULT_MAGIC_NUMBER
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct OpenPositionRequest {
    #[serde(alias = "active", alias = "ativo")]
    pub symbol: String,
    pub volume: f64,
    #[serde(alias = "side")]
    pub order_type: TradeSide,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub stop_loss: Option<f64>,
    #[serde(default)]
    pub take_profit: Option<f64>,
    #[serde(default = "default_deviation")]
    pub deviation: u32,
    #[serde(default)]
    pub comment: String,
    #[serde(default = "default_magic_number")]
    pub magic_number: u64,
}

impl From<OpenPositionRequest> for MarketOrder {
    fn from(req: OpenPositionRequest) -> Self {
        Self {
            symbol: req.symbol,
            side: req.order_type,
            volume: req.volume,
            price: req.price,
            stop_loss: req.stop_loss,
            take_profit: req.take_profit,
            deviation: req.deviation,
            comment: req.comment,
            magic_number: req.magic_number,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ClosePositionRequest {
    pub ticket: i64,
    /// Partial volume; the whole position when absent.
    #[serde(default)]
    pub volume: Option<f64>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ModifyPositionRequest {
    pub ticket: i64,
    #[serde(default)]
    pub stop_loss: Option<f64>,
    #[serde(default)]
    pub take_profit: Option<f64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PositionList {
    pub positions: Vec<Position>,
    pub count: usize,
}

#[utoipa::path(
    get,
    path = "/api/v1/trading/positions",
    tag = "Trading",
    security(("api_key" = [])),
    responses((status = 200, description = "Open positions", body = Envelope<PositionList>))
)]
pub async fn positions(State(state): State<Arc<AppState>>) -> ApiResult<PositionList> {
    let positions = state.trading.positions().await?;
    ok(PositionList {
        count: positions.len(),
        positions,
    })
}

#[utoipa::path(
    post,
    path = "/api/v1/trading/open-position",
    tag = "Trading",
    security(("api_key" = [])),
    request_body = OpenPositionRequest,
    responses(
        (status = 200, description = "Terminal result; `success` follows the return code", body = Envelope<TradeResult>),
        (status = 400, description = "Invalid order"),
        (status = 404, description = "Unknown symbol")
    )
)]
pub async fn open_position(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<OpenPositionRequest>,
) -> ApiResult<TradeResult> {
    ok(state.trading.open_position(req.into()).await?)
}

#[utoipa::path(
    post,
    path = "/api/v1/trading/close-position",
    tag = "Trading",
    security(("api_key" = [])),
    request_body = ClosePositionRequest,
    responses(
        (status = 200, description = "Terminal result", body = Envelope<TradeResult>),
        (status = 404, description = "Unknown ticket")
    )
)]
pub async fn close_position(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<ClosePositionRequest>,
) -> ApiResult<TradeResult> {
    ok(state.trading.close_position(req.ticket, req.volume).await?)
}

#[utoipa::path(
    post,
    path = "/api/v1/trading/modify-position",
    tag = "Trading",
    security(("api_key" = [])),
    request_body = ModifyPositionRequest,
    responses(
        (status = 200, description = "Terminal result", body = Envelope<TradeResult>),
        (status = 404, description = "Unknown ticket")
    )
)]
pub async fn modify_position(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<ModifyPositionRequest>,
) -> ApiResult<TradeResult> {
    ok(state
        .trading
        .modify_position(req.ticket, req.stop_loss, req.take_profit)
        .await?)
}

// =============================================================================
// Tests
// =============================================================================
