// =============================================================================
// Market-Data Translator — validated queries in, JSON-safe market data out
// =============================================================================
//
// Sits between the HTTP handlers and the terminal gate:
//
//   1. Inputs are validated completely before the terminal is touched
//      (symbol names, timeframe codes, date ranges, count bounds).
//   2. UTC bounds are shifted onto the terminal clock once, on the way in.
//   3. Native rows are converted back to UTC once, on the way out, filtered
//      to the requested window and sorted ascending.
//
// Nothing is cached between requests.
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::debug;

use crate::error::ApiError;
use crate::terminal::{RawRate, RawSymbol, TerminalAccess, TerminalError};
use crate::types::{SymbolDescriptor, SymbolSnapshot, TickerBar, Timeframe, TradeMode};

/// Plain date-time format accepted next to RFC 3339, interpreted as UTC.
const PLAIN_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// =============================================================================
// Queries
// =============================================================================

/// Which bars a query selects. A query carries exactly one window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BarWindow {
    /// Bars opening in `[from, to)`, or exactly at `from` when both are equal.
    Range { from: DateTime<Utc>, to: DateTime<Utc> },
    /// The most recent `count` bars.
    Latest { count: usize },
}

/// A fully validated bar request.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketQuery {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub window: BarWindow,
}

impl MarketQuery {
    pub fn range(
        symbol: &str,
        timeframe_code: i32,
        date_from: Option<&str>,
        date_to: Option<&str>,
    ) -> Result<Self, ApiError> {
        let symbol = normalize_symbol(symbol, "symbol")?;
        let timeframe = parse_timeframe(timeframe_code)?;
        let from = parse_datetime("dateFrom", date_from)?;
        let to = parse_datetime("dateTo", date_to)?;
        if from > to {
            return Err(ApiError::validation("dateFrom", "dateFrom must not be after dateTo"));
        }
        Ok(Self {
            symbol,
            timeframe,
            window: BarWindow::Range { from, to },
        })
    }

    /// `count` must lie in `1..=max_count`.
    pub fn latest(symbol: &str, timeframe_code: i32, count: Option<i64>, max_count: usize) -> Result<Self, ApiError> {
        let symbol = normalize_symbol(symbol, "symbol")?;
        let timeframe = parse_timeframe(timeframe_code)?;
        let count = count.ok_or_else(|| ApiError::validation("position", "position is required"))?;
        if count < 1 {
            return Err(ApiError::validation("position", "position must be at least 1"));
        }
        let count = usize::try_from(count).unwrap_or(usize::MAX);
        if count > max_count {
            return Err(ApiError::validation(
                "position",
                format!("position must not exceed {max_count}"),
            ));
        }
        Ok(Self {
            symbol,
            timeframe,
            window: BarWindow::Latest { count },
        })
    }
}

// =============================================================================
// Validation helpers
// =============================================================================

/// Trim and upper-case a symbol name; blank names are rejected.
pub fn normalize_symbol(raw: &str, field: &str) -> Result<String, ApiError> {
    let symbol = raw.trim().to_uppercase();
    if symbol.is_empty() {
        return Err(ApiError::validation(field, "symbol must not be blank"));
    }
    Ok(symbol)
}

pub fn parse_timeframe(code: i32) -> Result<Timeframe, ApiError> {
    Timeframe::from_code(code)
        .ok_or_else(|| ApiError::validation("timeframe", format!("unknown timeframe code {code}")))
}

/// Accepts `YYYY-MM-DD HH:MM:SS` (UTC) or RFC 3339.
pub fn parse_datetime(field: &str, raw: Option<&str>) -> Result<DateTime<Utc>, ApiError> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::validation(field, format!("{field} is required")))?;

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, PLAIN_DATETIME_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| {
            ApiError::validation(
                field,
                format!("expected 'YYYY-MM-DD HH:MM:SS' or RFC 3339, got '{raw}'"),
            )
        })
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

// =============================================================================
// Translator
// =============================================================================

pub struct MarketDataTranslator {
    access: Arc<TerminalAccess>,
    max_bars: usize,
    max_symbols: usize,
    utc_offset_secs: i64,
}

impl MarketDataTranslator {
    pub fn new(access: Arc<TerminalAccess>, max_bars: usize, max_symbols: usize, utc_offset_minutes: i32) -> Self {
        Self {
            access,
            max_bars: max_bars.max(1),
            max_symbols: max_symbols.max(1),
            utc_offset_secs: i64::from(utc_offset_minutes) * 60,
        }
    }

    pub fn max_bars(&self) -> usize {
        self.max_bars
    }

    // -------------------------------------------------------------------------
    // Symbols
    // -------------------------------------------------------------------------

    /// All symbols the terminal publishes, in terminal order, first
    /// occurrence of each name kept.
    pub async fn list_symbols(&self) -> Result<Vec<SymbolDescriptor>, ApiError> {
        let raw = self.access.call("symbols", |t| t.symbols()).await?;
        let total = raw.len();

        let mut seen = HashSet::with_capacity(total);
        let symbols: Vec<SymbolDescriptor> = raw
            .into_iter()
            .filter(|s| seen.insert(s.name.clone()))
            .map(describe)
            .collect();

        debug!(total, unique = symbols.len(), "symbols listed");
        Ok(symbols)
    }

    /// Metadata for the requested names. Unknown names are left out, except
    /// that a lone unknown name is reported as not found.
    pub async fn symbol_info(&self, names: &[String]) -> Result<Vec<SymbolDescriptor>, ApiError> {
        if names.is_empty() {
            return Err(ApiError::validation("symbols", "at least one symbol is required"));
        }
        if names.len() > self.max_symbols {
            return Err(ApiError::validation(
                "symbols",
                format!("at most {} symbols per request", self.max_symbols),
            ));
        }
        let names = names
            .iter()
            .map(|n| normalize_symbol(n, "symbols"))
            .collect::<Result<Vec<_>, _>>()?;

        let lookup = names.clone();
        let found = self
            .access
            .call("symbol_info", move |t| {
                lookup
                    .iter()
                    .map(|name| t.symbol_info(name))
                    .collect::<Result<Vec<_>, TerminalError>>()
            })
            .await?;

        let symbols: Vec<SymbolDescriptor> = found.into_iter().flatten().map(describe).collect();
        if names.len() == 1 && symbols.is_empty() {
            return Err(ApiError::NotFound(format!("symbol '{}' not found", names[0])));
        }
        Ok(symbols)
    }

    // -------------------------------------------------------------------------
    // Bars
    // -------------------------------------------------------------------------

    pub async fn bars(&self, query: MarketQuery) -> Result<Vec<TickerBar>, ApiError> {
        let MarketQuery {
            symbol,
            timeframe,
            window,
        } = query;

        match window {
            BarWindow::Range { from, to } => {
                let from_t = from.timestamp() + self.utc_offset_secs;
                let to_t = to.timestamp() + self.utc_offset_secs;
                let rows = self
                    .access
                    .call("rates_range", move |t| t.rates_range(&symbol, timeframe, from_t, to_t))
                    .await?;

                let mut bars = self.convert(rows)?;
                bars.retain(|b| if from == to { b.time == from } else { b.time >= from && b.time < to });
                Ok(bars)
            }
            BarWindow::Latest { count } => {
                if count == 0 || count > self.max_bars {
                    return Err(ApiError::validation(
                        "position",
                        format!("position must be between 1 and {}", self.max_bars),
                    ));
                }
                let rows = self
                    .access
                    .call("rates_from_pos", move |t| t.rates_from_pos(&symbol, timeframe, 0, count))
                    .await?;

                let mut bars = self.convert(rows)?;
                if bars.len() > count {
                    bars.drain(..bars.len() - count);
                }
                Ok(bars)
            }
        }
    }

    /// Convert native rows to UTC bars, sorted ascending.
    fn convert(&self, rows: Vec<RawRate>) -> Result<Vec<TickerBar>, ApiError> {
        let mut bars = rows
            .into_iter()
            .map(|r| {
                Ok(TickerBar {
                    time: self.to_utc(r.time)?,
                    open: r.open,
                    high: r.high,
                    low: r.low,
                    close: r.close,
                    volume: r.tick_volume,
                })
            })
            .collect::<Result<Vec<_>, ApiError>>()?;
        bars.sort_by_key(|b| b.time);
        Ok(bars)
    }

    fn to_utc(&self, terminal_secs: i64) -> Result<DateTime<Utc>, ApiError> {
        DateTime::from_timestamp(terminal_secs - self.utc_offset_secs, 0).ok_or_else(|| {
            ApiError::UpstreamUnavailable(format!("terminal returned invalid timestamp {terminal_secs}"))
        })
    }

    // -------------------------------------------------------------------------
    // Percent change
    // -------------------------------------------------------------------------

    /// Change of each symbol's current price against its previous bar close.
    /// Symbols without a usable reference are left out.
    pub async fn percent_change(&self, symbols: &[String], timeframe_code: i32) -> Result<Vec<SymbolSnapshot>, ApiError> {
        if symbols.is_empty() {
            return Err(ApiError::validation("symbols", "at least one symbol is required"));
        }
        if symbols.len() > self.max_symbols {
            return Err(ApiError::validation(
                "symbols",
                format!("at most {} symbols per request", self.max_symbols),
            ));
        }
        let timeframe = parse_timeframe(timeframe_code)?;
        let symbols = symbols
            .iter()
            .map(|s| normalize_symbol(s, "symbols"))
            .collect::<Result<Vec<_>, _>>()?;

        let fetched = self
            .access
            .call("percent_change", move |t| {
                let mut out = Vec::with_capacity(symbols.len());
                for symbol in &symbols {
                    let bars = match t.rates_from_pos(symbol, timeframe, 0, 2) {
                        Ok(bars) => bars,
                        Err(TerminalError::UnknownSymbol(_)) => continue,
                        Err(e) => return Err(e),
                    };
                    let quote = match t.tick(symbol) {
                        Ok(tick) => tick.map(|q| q.bid),
                        Err(TerminalError::UnknownSymbol(_)) => None,
                        Err(e) => return Err(e),
                    };
                    out.push((symbol.clone(), bars, quote));
                }
                Ok(out)
            })
            .await?;

        let requested = fetched.len();
        let snapshots: Vec<SymbolSnapshot> = fetched
            .into_iter()
            .filter_map(|(symbol, bars, quote)| snapshot(symbol, bars, quote))
            .collect();

        debug!(requested, reported = snapshots.len(), %timeframe, "percent change computed");
        Ok(snapshots)
    }
}

impl std::fmt::Debug for MarketDataTranslator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketDataTranslator")
            .field("max_bars", &self.max_bars)
            .field("max_symbols", &self.max_symbols)
            .field("utc_offset_secs", &self.utc_offset_secs)
            .finish()
    }
}

/// Reference = second-most-recent close; current = quote, else latest close.
fn snapshot(symbol: String, mut bars: Vec<RawRate>, quote: Option<f64>) -> Option<SymbolSnapshot> {
    if bars.len() < 2 {
        return None;
    }
    bars.sort_by_key(|b| b.time);
    let latest = bars[bars.len() - 1].close;
    let reference = bars[bars.len() - 2].close;
    if !reference.is_finite() || reference == 0.0 {
        return None;
    }

    let current = quote.filter(|q| q.is_finite() && *q > 0.0).unwrap_or(latest);
    let change = round4((current - reference) / reference * 100.0);
    if !change.is_finite() {
        return None;
    }

    Some(SymbolSnapshot {
        symbol,
        percent_change: change,
        current_price: current,
        reference_price: reference,
    })
}

fn describe(raw: RawSymbol) -> SymbolDescriptor {
    SymbolDescriptor {
        name: raw.name,
        description: raw.description,
        digits: raw.digits,
        point: raw.point,
        currency_base: raw.currency_base,
        currency_profit: raw.currency_profit,
        currency_margin: raw.currency_margin,
        volume_min: raw.volume_min,
        volume_max: raw.volume_max,
        volume_step: raw.volume_step,
        trade_mode: TradeMode::from_native(raw.trade_mode),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::SimulatedTerminal;
    use chrono::TimeZone;
    use std::time::Duration;

    fn rate(time: i64, close: f64) -> RawRate {
        RawRate {
            time,
            open: close,
            high: close,
            low: close,
            close,
            tick_volume: 10,
            spread: 0,
            real_volume: 0,
        }
    }

    fn translator_over(sim: SimulatedTerminal, offset_minutes: i32) -> (Arc<SimulatedTerminal>, MarketDataTranslator) {
        sim.connect();
        let sim = Arc::new(sim);
        let access = Arc::new(TerminalAccess::new(sim.clone(), 1, Duration::from_secs(5)));
        (sim, MarketDataTranslator::new(access, 1000, 1000, offset_minutes))
    }

    fn utc(s: &str) -> DateTime<Utc> {
        parse_datetime("t", Some(s)).unwrap()
    }

    // ── Validation ───────────────────────────────────────────────────────

    #[test]
    fn both_date_formats_are_accepted() {
        let plain = utc("2024-01-02 03:04:05");
        let rfc = utc("2024-01-02T03:04:05Z");
        assert_eq!(plain, rfc);
        assert_eq!(plain, Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap());
    }

    #[test]
    fn malformed_or_missing_dates_are_rejected() {
        assert!(parse_datetime("dateFrom", Some("02/01/2024")).is_err());
        assert!(parse_datetime("dateFrom", None).is_err());
        assert!(parse_datetime("dateFrom", Some("  ")).is_err());
    }

    #[test]
    fn inverted_range_is_rejected() {
        let err = MarketQuery::range("PETR4", 1, Some("2024-01-02 00:00:00"), Some("2024-01-01 00:00:00"))
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation { .. }));
    }

    #[test]
    fn unknown_timeframe_is_rejected() {
        assert!(MarketQuery::latest("PETR4", 7, Some(10), 1000).is_err());
        assert!(MarketQuery::latest("PETR4", 16385, Some(10), 1000).is_ok());
    }

    #[test]
    fn count_bounds() {
        assert!(MarketQuery::latest("PETR4", 1, Some(1000), 1000).is_ok());
        assert!(MarketQuery::latest("PETR4", 1, Some(1001), 1000).is_err());
        assert!(MarketQuery::latest("PETR4", 1, Some(0), 1000).is_err());
        assert!(MarketQuery::latest("PETR4", 1, Some(-3), 1000).is_err());
        assert!(MarketQuery::latest("PETR4", 1, None, 1000).is_err());
    }

    #[test]
    fn symbol_is_normalised() {
        let q = MarketQuery::latest("  petr4 ", 1, Some(1), 10).unwrap();
        assert_eq!(q.symbol, "PETR4");
        assert!(MarketQuery::latest("   ", 1, Some(1), 10).is_err());
    }

    #[test]
    fn rounding_keeps_four_decimals() {
        assert_eq!(round4(1.234_56), 1.2346);
        assert_eq!(round4(-0.000_04), -0.0);
    }

    // ── Symbols ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn listing_keeps_terminal_order_and_drops_duplicates() {
        let sim = SimulatedTerminal::new(&["VALE3".into(), "PETR4".into()], 0).with_listing("VALE3");
        let (_, tr) = translator_over(sim, 0);
        let names: Vec<String> = tr.list_symbols().await.unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["VALE3", "PETR4"]);
    }

    #[tokio::test]
    async fn single_unknown_symbol_is_not_found() {
        let (_, tr) = translator_over(SimulatedTerminal::new(&["PETR4".into()], 0), 0);
        let err = tr.symbol_info(&["NOPE".into()]).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn unknown_symbols_are_omitted_from_batches() {
        let (_, tr) = translator_over(SimulatedTerminal::new(&["PETR4".into()], 0), 0);
        let found = tr.symbol_info(&["petr4".into(), "NOPE".into()]).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "PETR4");
        assert_eq!(found[0].trade_mode, TradeMode::Full);
    }

    // ── Bars ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn short_history_returns_what_exists() {
        let sim = SimulatedTerminal::new(&[], 0)
            .with_fixed_series("ABC", vec![rate(300, 3.0), rate(100, 1.0), rate(200, 2.0)]);
        let (_, tr) = translator_over(sim, 0);

        let bars = tr.bars(MarketQuery::latest("ABC", 1, Some(5), 1000).unwrap()).await.unwrap();
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        assert_eq!(closes, vec![1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn range_is_half_open() {
        let base = utc("2024-01-01 10:00:00").timestamp();
        let sim = SimulatedTerminal::new(&[], 0).with_fixed_series(
            "ABC",
            vec![rate(base, 1.0), rate(base + 60, 2.0), rate(base + 120, 3.0)],
        );
        let (_, tr) = translator_over(sim, 0);

        let q = MarketQuery::range("ABC", 1, Some("2024-01-01 10:00:00"), Some("2024-01-01 10:01:00")).unwrap();
        let bars = tr.bars(q).await.unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, 1.0);
    }

    #[tokio::test]
    async fn equal_bounds_select_the_exact_bar() {
        let base = utc("2024-01-01 10:00:00").timestamp();
        let sim = SimulatedTerminal::new(&[], 0)
            .with_fixed_series("ABC", vec![rate(base, 1.0), rate(base + 60, 2.0)]);
        let (_, tr) = translator_over(sim, 0);

        let q = MarketQuery::range("ABC", 1, Some("2024-01-01 10:01:00"), Some("2024-01-01 10:01:00")).unwrap();
        let bars = tr.bars(q).await.unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, 2.0);
    }

    #[tokio::test]
    async fn empty_range_is_not_an_error() {
        let sim = SimulatedTerminal::new(&[], 0).with_fixed_series("ABC", vec![rate(100, 1.0)]);
        let (_, tr) = translator_over(sim, 0);
        let q = MarketQuery::range("ABC", 1, Some("2030-01-01 00:00:00"), Some("2030-01-02 00:00:00")).unwrap();
        assert!(tr.bars(q).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn terminal_clock_is_converted_to_utc() {
        let utc_open = utc("2024-01-01 10:00:00");
        // Broker clock three hours ahead of UTC.
        let sim = SimulatedTerminal::new(&[], 0)
            .with_fixed_series("ABC", vec![rate(utc_open.timestamp() + 3 * 3600, 1.0)]);
        let (_, tr) = translator_over(sim, 180);

        let q = MarketQuery::range("ABC", 1, Some("2024-01-01 10:00:00"), Some("2024-01-01 10:01:00")).unwrap();
        let bars = tr.bars(q).await.unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].time, utc_open);
    }

    #[tokio::test]
    async fn one_timeframe_unit_yields_at_most_one_bar() {
        let now = utc("2024-01-01 12:00:00");
        let sim = SimulatedTerminal::new(&["VALE3".into()], 0).with_clock(now.timestamp());
        let (_, tr) = translator_over(sim, 0);

        let q = MarketQuery::range("VALE3", 16385, Some("2024-01-01 09:00:00"), Some("2024-01-01 10:00:00")).unwrap();
        assert_eq!(tr.bars(q).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_symbol_bars_are_not_found() {
        let (_, tr) = translator_over(SimulatedTerminal::new(&["PETR4".into()], 0), 0);
        let err = tr.bars(MarketQuery::latest("NOPE", 1, Some(3), 1000).unwrap()).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    // ── Percent change ───────────────────────────────────────────────────

    #[tokio::test]
    async fn zero_reference_is_excluded_and_others_remain() {
        let sim = SimulatedTerminal::new(&[], 0)
            .with_fixed_series("ZERO", vec![rate(100, 0.0), rate(200, 5.0)])
            .with_fixed_series("GOOD", vec![rate(100, 10.0), rate(200, 11.0)]);
        let (_, tr) = translator_over(sim, 0);

        let out = tr.percent_change(&["ZERO".into(), "GOOD".into()], 1).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].symbol, "GOOD");
        assert_eq!(out[0].reference_price, 10.0);
        assert_eq!(out[0].current_price, 11.0);
        assert_eq!(out[0].percent_change, 10.0);
    }

    #[tokio::test]
    async fn quote_is_preferred_over_latest_close() {
        let sim = SimulatedTerminal::new(&[], 0)
            .with_fixed_series("ABC", vec![rate(100, 3.0), rate(200, 4.0)])
            .with_quote("ABC", 3.3);
        let (_, tr) = translator_over(sim, 0);

        let out = tr.percent_change(&["ABC".into()], 1).await.unwrap();
        assert_eq!(out[0].percent_change, 10.0);
    }

    #[tokio::test]
    async fn short_history_and_unknown_symbols_are_excluded() {
        let sim = SimulatedTerminal::new(&[], 0)
            .with_fixed_series("ONE", vec![rate(100, 3.0)])
            .with_fixed_series("TWO", vec![rate(100, 3.0), rate(200, 6.0)]);
        let (_, tr) = translator_over(sim, 0);

        let out = tr.percent_change(&["ONE".into(), "NOPE".into(), "TWO".into()], 1).await.unwrap();
        assert_eq!(out.iter().map(|s| s.symbol.as_str()).collect::<Vec<_>>(), vec!["TWO"]);
        assert_eq!(out[0].percent_change, 100.0);
    }

    #[tokio::test]
    async fn repeated_query_without_movement_is_identical() {
        let sim = SimulatedTerminal::new(&[], 0).with_fixed_series("ABC", vec![rate(100, 7.0), rate(200, 7.7)]);
        let (_, tr) = translator_over(sim, 0);
        let a = tr.percent_change(&["ABC".into()], 5).await.unwrap();
        let b = tr.percent_change(&["ABC".into()], 5).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn percent_change_uses_one_terminal_round_trip() {
        let sim = SimulatedTerminal::new(&["PETR4".into(), "VALE3".into()], 0);
        let (sim, tr) = translator_over(sim, 0);
        tr.percent_change(&["PETR4".into(), "VALE3".into()], 1).await.unwrap();
        // Each symbol costs a rates call and a tick call, all in one gate slot.
        assert_eq!(sim.call_count(), 4);
        assert_eq!(tr.access.snapshot().completed, 1);
    }

    #[tokio::test]
    async fn empty_symbol_list_is_rejected_before_terminal() {
        let (sim, tr) = translator_over(SimulatedTerminal::new(&["PETR4".into()], 0), 0);
        assert!(tr.percent_change(&[], 1).await.is_err());
        assert!(tr.percent_change(&["PETR4".into()], 999).await.is_err());
        assert_eq!(sim.call_count(), 0);
    }
}
