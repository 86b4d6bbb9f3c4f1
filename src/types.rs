// =============================================================================
// Shared types used across the MT5 gateway
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Whether the API-key gate is enforcing credentials or letting every request
/// through. Derived from the credential store, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum AuthMode {
    Enforced,
    Open,
}

// =============================================================================
// Timeframes
// =============================================================================

/// Bar aggregation period, identified on the wire by the terminal's native
/// integer code (1 = M1, 16385 = H1, 16408 = D1, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeframe {
    M1,
    M2,
    M3,
    M4,
    M5,
    M6,
    M10,
    M12,
    M15,
    M20,
    M30,
    H1,
    H2,
    H3,
    H4,
    H6,
    H8,
    H12,
    D1,
    W1,
    MN1,
}

const HOUR_FLAG: i32 = 0x4000;
const WEEK_CODE: i32 = 0x8001;
const MONTH_CODE: i32 = 0xC001;

impl Timeframe {
    pub const ALL: [Timeframe; 21] = [
        Self::M1,
        Self::M2,
        Self::M3,
        Self::M4,
        Self::M5,
        Self::M6,
        Self::M10,
        Self::M12,
        Self::M15,
        Self::M20,
        Self::M30,
        Self::H1,
        Self::H2,
        Self::H3,
        Self::H4,
        Self::H6,
        Self::H8,
        Self::H12,
        Self::D1,
        Self::W1,
        Self::MN1,
    ];

    /// Terminal-native integer code.
    pub fn code(self) -> i32 {
        match self {
            Self::M1 => 1,
            Self::M2 => 2,
            Self::M3 => 3,
            Self::M4 => 4,
            Self::M5 => 5,
            Self::M6 => 6,
            Self::M10 => 10,
            Self::M12 => 12,
            Self::M15 => 15,
            Self::M20 => 20,
            Self::M30 => 30,
            Self::H1 => HOUR_FLAG | 1,
            Self::H2 => HOUR_FLAG | 2,
            Self::H3 => HOUR_FLAG | 3,
            Self::H4 => HOUR_FLAG | 4,
            Self::H6 => HOUR_FLAG | 6,
            Self::H8 => HOUR_FLAG | 8,
            Self::H12 => HOUR_FLAG | 12,
            Self::D1 => HOUR_FLAG | 24,
            Self::W1 => WEEK_CODE,
            Self::MN1 => MONTH_CODE,
        }
    }

    /// Resolve a wire code. Unknown codes yield `None`; callers reject them
    /// instead of falling back to a default period.
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|tf| tf.code() == code)
    }

    /// Nominal bar length in seconds. MN1 uses a 30-day month.
    pub fn duration_secs(self) -> i64 {
        const MIN: i64 = 60;
        const HOUR: i64 = 60 * MIN;
        const DAY: i64 = 24 * HOUR;
        match self {
            Self::M1 => MIN,
            Self::M2 => 2 * MIN,
            Self::M3 => 3 * MIN,
            Self::M4 => 4 * MIN,
            Self::M5 => 5 * MIN,
            Self::M6 => 6 * MIN,
            Self::M10 => 10 * MIN,
            Self::M12 => 12 * MIN,
            Self::M15 => 15 * MIN,
            Self::M20 => 20 * MIN,
            Self::M30 => 30 * MIN,
            Self::H1 => HOUR,
            Self::H2 => 2 * HOUR,
            Self::H3 => 3 * HOUR,
            Self::H4 => 4 * HOUR,
            Self::H6 => 6 * HOUR,
            Self::H8 => 8 * HOUR,
            Self::H12 => 12 * HOUR,
            Self::D1 => DAY,
            Self::W1 => 7 * DAY,
            Self::MN1 => 30 * DAY,
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::M1 => "M1",
            Self::M2 => "M2",
            Self::M3 => "M3",
            Self::M4 => "M4",
            Self::M5 => "M5",
            Self::M6 => "M6",
            Self::M10 => "M10",
            Self::M12 => "M12",
            Self::M15 => "M15",
            Self::M20 => "M20",
            Self::M30 => "M30",
            Self::H1 => "H1",
            Self::H2 => "H2",
            Self::H3 => "H3",
            Self::H4 => "H4",
            Self::H6 => "H6",
            Self::H8 => "H8",
            Self::H12 => "H12",
            Self::D1 => "D1",
            Self::W1 => "W1",
            Self::MN1 => "MN1",
        };
        f.write_str(label)
    }
}

// =============================================================================
// Market data
// =============================================================================

/// One historical OHLC sample, timestamped in UTC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TickerBar {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

/// Symbol metadata as reported by the terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SymbolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub digits: u32,
    pub point: f64,
    pub currency_base: String,
    pub currency_profit: String,
    pub currency_margin: String,
    pub volume_min: f64,
    pub volume_max: f64,
    pub volume_step: f64,
    pub trade_mode: TradeMode,
}

/// Which sides of the book a symbol may be traded on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeMode {
    Disabled,
    LongOnly,
    ShortOnly,
    CloseOnly,
    Full,
}

impl TradeMode {
    /// Map the terminal's integer trade-mode constant. Unknown values are
    /// treated as disabled.
    pub fn from_native(value: i32) -> Self {
        match value {
            1 => Self::LongOnly,
            2 => Self::ShortOnly,
            3 => Self::CloseOnly,
            4 => Self::Full,
            _ => Self::Disabled,
        }
    }
}

/// Percent change of one symbol against its previous bar close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SymbolSnapshot {
    pub symbol: String,
    pub percent_change: f64,
    pub current_price: f64,
    pub reference_price: f64,
}

// =============================================================================
// Trading
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Validated market order handed to the terminal.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketOrder {
    pub symbol: String,
    pub side: TradeSide,
    pub volume: f64,
    pub price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub deviation: u32,
    pub comment: String,
    pub magic_number: u64,
}

/// Terminal return code for a completed request.
pub const RETCODE_DONE: u32 = 10009;

/// Outcome of an order sent to the terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TradeResult {
    pub success: bool,
    pub retcode: u32,
    pub deal: u64,
    pub order: u64,
    pub volume: f64,
    pub price: f64,
    pub bid: f64,
    pub ask: f64,
    pub comment: String,
    pub request_id: u64,
}

/// An open position held by the terminal account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Position {
    pub ticket: u64,
    pub symbol: String,
    pub side: TradeSide,
    pub volume: f64,
    pub price_open: f64,
    pub price_current: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub profit: f64,
    pub opened_at: DateTime<Utc>,
}

// =============================================================================
// Tests
// =============================================================================
