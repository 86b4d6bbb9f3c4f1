// =============================================================================
// Terminal Binding — narrow interface to the trading terminal
// =============================================================================
//
// Every method is a blocking call into the terminal's native library. Callers
// never invoke these directly from async code; they go through
// `TerminalAccess`, which runs them on the blocking pool behind a bounded
// number of permits and a per-request timeout.
//
// All timestamps crossing this boundary are epoch seconds on the terminal's
// server clock. Conversion to UTC happens once, in the translators.
// =============================================================================

pub mod access;
pub mod simulated;

use std::time::Duration;

use thiserror::Error;

use crate::config::TerminalLogin;
use crate::types::{MarketOrder, Timeframe, TradeResult};

pub use access::{TerminalAccess, TerminalAccessSnapshot};
pub use simulated::SimulatedTerminal;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TerminalError {
    /// Connectivity lost or never established. The only retryable failure.
    #[error("terminal disconnected: {0}")]
    Disconnected(String),

    #[error("unknown symbol '{0}'")]
    UnknownSymbol(String),

    #[error("unknown position ticket {0}")]
    UnknownTicket(u64),

    /// The terminal refused the request as invalid.
    #[error("request rejected by terminal: {0}")]
    Rejected(String),

    #[error("terminal call exceeded {0:?}")]
    Timeout(Duration),

    #[error("terminal task failed: {0}")]
    TaskFailed(String),
}

impl TerminalError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Disconnected(_))
    }
}

// =============================================================================
// Native records
// =============================================================================

/// Symbol specification exactly as the terminal reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSymbol {
    pub name: String,
    pub description: String,
    pub digits: u32,
    pub point: f64,
    pub currency_base: String,
    pub currency_profit: String,
    pub currency_margin: String,
    pub volume_min: f64,
    pub volume_max: f64,
    pub volume_step: f64,
    pub trade_mode: i32,
}

/// One rate row. `time` is the bar open on the terminal clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawRate {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub tick_volume: i64,
    pub spread: i32,
    pub real_volume: i64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawTick {
    pub time: i64,
    pub bid: f64,
    pub ask: f64,
}

/// Position record. `side` is 0 for buy and 1 for sell; zero SL/TP means
/// unset.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPosition {
    pub ticket: u64,
    pub symbol: String,
    pub side: i32,
    pub volume: f64,
    pub price_open: f64,
    pub price_current: f64,
    pub sl: f64,
    pub tp: f64,
    pub profit: f64,
    pub time: i64,
}

// =============================================================================
// Binding trait
// =============================================================================

/// Capability set the gateway needs from a trading terminal.
pub trait TerminalBinding: Send + Sync + 'static {
    /// Short label for diagnostics ("simulated", "mt5", ...).
    fn name(&self) -> &'static str;

    fn initialize(&self) -> Result<(), TerminalError>;

    fn login(&self, credentials: &TerminalLogin) -> Result<(), TerminalError>;

    fn shutdown(&self);

    /// Cheap, non-blocking connectivity probe.
    fn is_connected(&self) -> bool;

    fn symbols(&self) -> Result<Vec<RawSymbol>, TerminalError>;

    /// `Ok(None)` when the terminal does not know the symbol.
    fn symbol_info(&self, symbol: &str) -> Result<Option<RawSymbol>, TerminalError>;

    /// Bars whose open time lies within `[from, to]` on the terminal clock.
    fn rates_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: i64,
        to: i64,
    ) -> Result<Vec<RawRate>, TerminalError>;

    /// `count` bars ending `start_pos` bars before the current one
    /// (0 = include the current bar), oldest first.
    fn rates_from_pos(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_pos: usize,
        count: usize,
    ) -> Result<Vec<RawRate>, TerminalError>;

    /// Latest quote, `Ok(None)` when the terminal has none.
    fn tick(&self, symbol: &str) -> Result<Option<RawTick>, TerminalError>;

    fn order_send(&self, order: &MarketOrder) -> Result<TradeResult, TerminalError>;

    fn positions(&self) -> Result<Vec<RawPosition>, TerminalError>;

    fn close_position(&self, ticket: u64, volume: Option<f64>) -> Result<TradeResult, TerminalError>;

    fn modify_position(
        &self,
        ticket: u64,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> Result<TradeResult, TerminalError>;
}
