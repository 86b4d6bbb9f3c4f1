// =============================================================================
// Trading Translator — order, close, modify and position call-throughs
// =============================================================================
//
// Validates trading requests and forwards them to the terminal. There is no
// risk layer here; whether an order fills is the terminal's decision, read
// from its return code. Sends and closes are never retried: a dropped
// connection after the terminal accepted them must not repeat the trade.
// =============================================================================

use std::sync::Arc;

use chrono::DateTime;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::terminal::{RawPosition, TerminalAccess};
use crate::translator::normalize_symbol;
use crate::types::{MarketOrder, Position, TradeResult, TradeSide, RETCODE_DONE};

pub const DEFAULT_DEVIATION: u32 = 20;
pub const MAX_DEVIATION: u32 = 100;
pub const DEFAULT_MAGIC_NUMBER: u64 = 234_000;
const MAX_COMMENT_LEN: usize = 100;

fn positive(field: &str, value: f64) -> Result<f64, ApiError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(ApiError::validation(field, format!("{field} must be a positive number")))
    }
}

fn optional_positive(field: &str, value: Option<f64>) -> Result<Option<f64>, ApiError> {
    value.map(|v| positive(field, v)).transpose()
}

fn positive_ticket(ticket: i64) -> Result<u64, ApiError> {
    u64::try_from(ticket)
        .ok()
        .filter(|t| *t > 0)
        .ok_or_else(|| ApiError::validation("ticket", "ticket must be a positive integer"))
}

pub struct TradingTranslator {
    access: Arc<TerminalAccess>,
    utc_offset_secs: i64,
}

impl TradingTranslator {
    pub fn new(access: Arc<TerminalAccess>, utc_offset_minutes: i32) -> Self {
        Self {
            access,
            utc_offset_secs: i64::from(utc_offset_minutes) * 60,
        }
    }

    /// Check and normalise an order before it goes anywhere near the
    /// terminal.
    pub fn validate_order(mut order: MarketOrder) -> Result<MarketOrder, ApiError> {
        order.symbol = normalize_symbol(&order.symbol, "symbol")?;
        order.volume = positive("volume", order.volume)?;
        order.price = optional_positive("price", order.price)?;
        order.stop_loss = optional_positive("stop_loss", order.stop_loss)?;
        order.take_profit = optional_positive("take_profit", order.take_profit)?;
        if order.deviation > MAX_DEVIATION {
            return Err(ApiError::validation(
                "deviation",
                format!("deviation must not exceed {MAX_DEVIATION} points"),
            ));
        }
        if order.comment.chars().count() > MAX_COMMENT_LEN {
            return Err(ApiError::validation(
                "comment",
                format!("comment must be at most {MAX_COMMENT_LEN} characters"),
            ));
        }
        Ok(order)
    }

    pub async fn open_position(&self, order: MarketOrder) -> Result<TradeResult, ApiError> {
        let order = Self::validate_order(order)?;
        let sent = order.clone();
        let mut result = self
            .access
            .call_once("order_send", move |t| t.order_send(&sent))
            .await?;

        result.success = result.retcode == RETCODE_DONE;
        if result.success {
            info!(
                symbol = %order.symbol,
                side = %order.side,
                volume = order.volume,
                order = result.order,
                "position opened"
            );
        } else {
            warn!(
                symbol = %order.symbol,
                retcode = result.retcode,
                comment = %result.comment,
                "order not executed"
            );
        }
        Ok(result)
    }

    /// Close `ticket`, fully or by `volume`.
    pub async fn close_position(&self, ticket: i64, volume: Option<f64>) -> Result<TradeResult, ApiError> {
        let ticket = positive_ticket(ticket)?;
        let volume = optional_positive("volume", volume)?;

        let mut result = self
            .access
            .call_once("close_position", move |t| t.close_position(ticket, volume))
            .await?;
        result.success = result.retcode == RETCODE_DONE;
        info!(ticket, volume = result.volume, success = result.success, "close requested");
        Ok(result)
    }

    pub async fn modify_position(
        &self,
        ticket: i64,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> Result<TradeResult, ApiError> {
        let ticket = positive_ticket(ticket)?;
        let stop_loss = optional_positive("stop_loss", stop_loss)?;
        let take_profit = optional_positive("take_profit", take_profit)?;
        if stop_loss.is_none() && take_profit.is_none() {
            return Err(ApiError::validation(
                "stop_loss",
                "at least one of stop_loss or take_profit is required",
            ));
        }

        let mut result = self
            .access
            .call("modify_position", move |t| t.modify_position(ticket, stop_loss, take_profit))
            .await?;
        result.success = result.retcode == RETCODE_DONE;
        Ok(result)
    }

    pub async fn positions(&self) -> Result<Vec<Position>, ApiError> {
        let raw = self.access.call("positions", |t| t.positions()).await?;
        raw.into_iter().map(|p| self.position(p)).collect()
    }

    fn position(&self, raw: RawPosition) -> Result<Position, ApiError> {
        let opened_at = DateTime::from_timestamp(raw.time - self.utc_offset_secs, 0).ok_or_else(|| {
            ApiError::UpstreamUnavailable(format!("position {} has invalid open time {}", raw.ticket, raw.time))
        })?;
        let unset_as_none = |v: f64| (v > 0.0).then_some(v);

        Ok(Position {
            ticket: raw.ticket,
            symbol: raw.symbol,
            side: if raw.side == 0 { TradeSide::Buy } else { TradeSide::Sell },
            volume: raw.volume,
            price_open: raw.price_open,
            price_current: raw.price_current,
            stop_loss: unset_as_none(raw.sl),
            take_profit: unset_as_none(raw.tp),
            profit: raw.profit,
            opened_at,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
