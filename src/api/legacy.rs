// =============================================================================
// Legacy `/Get*/` endpoints
// =============================================================================
//
// Existing clients read these routes in the older wire shape: bars under
// `tickers` with plain `YYYY-MM-DD HH:MM:SS` UTC times, `pct_change` per
// symbol, and a bare descriptor for single-symbol info. The handlers share
// request parsing and translation with the versioned routes and differ only
// in what they serialise. `/GetSymbols/` already matches and is served by the
// versioned handler.
// =============================================================================

use std::sync::Arc;

use axum::extract::State;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::api::rest::{
    ok, ApiJson, ApiResult, PercentChangeRequest, SymbolInfoRequest, TickersByCountRequest, TickersRequest,
};
use crate::app_state::AppState;
use crate::error::ApiError;
use crate::translator::{BarWindow, MarketQuery};
use crate::types::{SymbolDescriptor, SymbolSnapshot, TickerBar};

const WALL_CLOCK: &str = "%Y-%m-%d %H:%M:%S";

fn wall_clock(time: DateTime<Utc>) -> String {
    time.format(WALL_CLOCK).to_string()
}

#[derive(Debug, Serialize)]
pub struct LegacyBar {
    pub time: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

impl From<TickerBar> for LegacyBar {
    fn from(bar: TickerBar) -> Self {
        Self {
            time: wall_clock(bar.time),
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
        }
    }
}

fn legacy_bars(bars: Vec<TickerBar>) -> Vec<LegacyBar> {
    bars.into_iter().map(LegacyBar::from).collect()
}

#[derive(Debug, Serialize)]
pub struct RangeTickers {
    pub tickers: Vec<LegacyBar>,
    pub count: usize,
    pub symbol: String,
    pub timeframe: i32,
}

#[derive(Debug, Serialize)]
pub struct LatestTickers {
    pub tickers: Vec<LegacyBar>,
    pub count: usize,
    pub symbol: String,
    pub requested_count: usize,
}

#[derive(Debug, Serialize)]
pub struct PctChange {
    pub symbol: String,
    pub pct_change: f64,
}

impl From<SymbolSnapshot> for PctChange {
    fn from(snapshot: SymbolSnapshot) -> Self {
        Self {
            symbol: snapshot.symbol,
            pct_change: snapshot.percent_change,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PctChangeList {
    pub symbols: Vec<PctChange>,
    pub count: usize,
}

/// Single-symbol lookup; `Resposta` is the descriptor itself.
pub async fn symbol_info(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<SymbolInfoRequest>,
) -> ApiResult<SymbolDescriptor> {
    let name = req
        .symbol
        .or_else(|| req.symbols.into_iter().next())
        .ok_or_else(|| ApiError::validation("symbol", "symbol is required"))?;

    let descriptor = state
        .market
        .symbol_info(std::slice::from_ref(&name))
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::NotFound(format!("symbol '{name}' not found")))?;
    ok(descriptor)
}

pub async fn tickers(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<TickersRequest>,
) -> ApiResult<RangeTickers> {
    let query = MarketQuery::range(
        &req.symbol,
        req.timeframe,
        req.date_from.as_deref(),
        req.date_to.as_deref(),
    )?;
    let symbol = query.symbol.clone();
    let timeframe = query.timeframe.code();
    let tickers = legacy_bars(state.market.bars(query).await?);
    ok(RangeTickers {
        count: tickers.len(),
        tickers,
        symbol,
        timeframe,
    })
}

pub async fn tickers_by_count(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<TickersByCountRequest>,
) -> ApiResult<LatestTickers> {
    let query = MarketQuery::latest(&req.symbol, req.timeframe, req.position, state.market.max_bars())?;
    let symbol = query.symbol.clone();
    let requested_count = match query.window {
        BarWindow::Latest { count } => count,
        BarWindow::Range { .. } => 0,
    };
    let tickers = legacy_bars(state.market.bars(query).await?);
    ok(LatestTickers {
        count: tickers.len(),
        tickers,
        symbol,
        requested_count,
    })
}

pub async fn percent_change(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<PercentChangeRequest>,
) -> ApiResult<PctChangeList> {
    let symbols: Vec<PctChange> = state
        .market
        .percent_change(&req.symbols, req.timeframe)
        .await?
        .into_iter()
        .map(PctChange::from)
        .collect();
    ok(PctChangeList {
        count: symbols.len(),
        symbols,
    })
}
