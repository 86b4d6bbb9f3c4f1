// =============================================================================
// Simulated Terminal — in-process stand-in for the native terminal library
// =============================================================================
//
// Used whenever no native terminal is linked into the build. Market data is
// deterministic: synthetic series are a pure function of (symbol, bar time),
// so repeating a query without advancing the clock returns identical values.
// Fixed series can be installed per symbol to replay exact histories.
//
// The simulator keeps its own server clock, shifted from UTC by the configured
// offset, so the gateway's timezone normalisation is exercised end to end.
// =============================================================================

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::{RawPosition, RawRate, RawSymbol, RawTick, TerminalBinding, TerminalError};
use crate::config::TerminalLogin;
use crate::types::{MarketOrder, Timeframe, TradeResult, TradeSide, RETCODE_DONE};

/// Terminal return code for an order with an invalid volume.
const RETCODE_INVALID_VOLUME: u32 = 10014;

/// Upper bound on bars synthesised for one range request.
const MAX_SYNTHETIC_BARS: i64 = 100_000;

enum Series {
    Synthetic { base_price: f64 },
    Fixed(Vec<RawRate>),
}

struct SimState {
    catalog: Vec<RawSymbol>,
    series: HashMap<String, Series>,
    quotes: HashMap<String, f64>,
    positions: BTreeMap<u64, RawPosition>,
    next_ticket: u64,
    next_request_id: u64,
}

/// Deterministic terminal with an in-memory account.
pub struct SimulatedTerminal {
    state: RwLock<SimState>,
    connected: AtomicBool,
    calls: AtomicU64,
    pending_disconnects: AtomicU32,
    latency: Duration,
    utc_offset_secs: i64,
    fixed_now: Option<i64>,
}

impl SimulatedTerminal {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a simulator publishing `symbols` with synthetic histories.
    /// `utc_offset_minutes` is the simulated server clock's offset from UTC.
    pub fn new(symbols: &[String], utc_offset_minutes: i32) -> Self {
        let mut catalog = Vec::with_capacity(symbols.len());
        let mut series = HashMap::new();
        for name in symbols {
            let name = name.trim().to_uppercase();
            if name.is_empty() {
                continue;
            }
            catalog.push(describe(&name));
            series
                .entry(name.clone())
                .or_insert(Series::Synthetic { base_price: base_price(&name) });
        }

        Self {
            state: RwLock::new(SimState {
                catalog,
                series,
                quotes: HashMap::new(),
                positions: BTreeMap::new(),
                next_ticket: 1,
                next_request_id: 1,
            }),
            connected: AtomicBool::new(false),
            calls: AtomicU64::new(0),
            pending_disconnects: AtomicU32::new(0),
            latency: Duration::ZERO,
            utc_offset_secs: i64::from(utc_offset_minutes) * 60,
            fixed_now: None,
        }
    }

    /// Replace `symbol`'s history with `bars` (terminal clock), adding it to
    /// the catalog if needed. Fixed series ignore the requested timeframe.
    pub fn with_fixed_series(self, symbol: &str, bars: Vec<RawRate>) -> Self {
        {
            let mut state = self.state.write();
            if !state.catalog.iter().any(|s| s.name == symbol) {
                state.catalog.push(describe(symbol));
            }
            state.series.insert(symbol.to_string(), Series::Fixed(bars));
        }
        self
    }

    /// Append a catalog entry for `symbol` even if one already exists, the way
    /// terminals list a symbol once per market-watch group.
    pub fn with_listing(self, symbol: &str) -> Self {
        {
            let mut state = self.state.write();
            state.catalog.push(describe(symbol));
            state
                .series
                .entry(symbol.to_string())
                .or_insert(Series::Synthetic { base_price: base_price(symbol) });
        }
        self
    }

    /// Pin the current quote for `symbol`.
    pub fn with_quote(self, symbol: &str, price: f64) -> Self {
        self.state.write().quotes.insert(symbol.to_string(), price);
        self
    }

    /// Delay every call by `latency`, like a round trip to a remote terminal.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Freeze the simulator's clock at `utc_secs`.
    pub fn with_clock(mut self, utc_secs: i64) -> Self {
        self.fixed_now = Some(utc_secs);
        self
    }

    /// Mark the simulator connected without going through `initialize`.
    pub fn connect(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    /// Fail the next `n` calls with `Disconnected`.
    pub fn inject_disconnects(&self, n: u32) {
        self.pending_disconnects.store(n, Ordering::SeqCst);
    }

    /// Number of data/trading calls received so far.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// Common preamble for every data/trading call.
    fn enter(&self) -> Result<(), TerminalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        let injected = self
            .pending_disconnects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(TerminalError::Disconnected("simulated connection drop".into()));
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TerminalError::Disconnected("terminal not initialised".into()));
        }
        Ok(())
    }

    /// Current time on the simulated server clock.
    fn server_now(&self) -> i64 {
        self.fixed_now.unwrap_or_else(|| Utc::now().timestamp()) + self.utc_offset_secs
    }

    fn quote(&self, state: &SimState, symbol: &str) -> Option<f64> {
        if let Some(price) = state.quotes.get(symbol) {
            return Some(*price);
        }
        match state.series.get(symbol)? {
            Series::Synthetic { base_price } => {
                Some(synthetic_close(*base_price, self.server_now()))
            }
            Series::Fixed(bars) => bars.iter().max_by_key(|b| b.time).map(|b| b.close),
        }
    }

    fn known(state: &SimState, symbol: &str) -> Result<(), TerminalError> {
        if state.series.contains_key(symbol) {
            Ok(())
        } else {
            Err(TerminalError::UnknownSymbol(symbol.to_string()))
        }
    }

    fn next_request_id(state: &mut SimState) -> u64 {
        let id = state.next_request_id;
        state.next_request_id += 1;
        id
    }
}

impl TerminalBinding for SimulatedTerminal {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn initialize(&self) -> Result<(), TerminalError> {
        self.connected.store(true, Ordering::SeqCst);
        info!(
            symbols = self.state.read().catalog.len(),
            utc_offset_secs = self.utc_offset_secs,
            "simulated terminal initialised"
        );
        Ok(())
    }

    fn login(&self, credentials: &TerminalLogin) -> Result<(), TerminalError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TerminalError::Disconnected("terminal not initialised".into()));
        }
        debug!(login = credentials.login, server = %credentials.server, "simulated login accepted");
        Ok(())
    }

    fn shutdown(&self) {
        self.connected.store(false, Ordering::SeqCst);
        info!("simulated terminal shut down");
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn symbols(&self) -> Result<Vec<RawSymbol>, TerminalError> {
        self.enter()?;
        Ok(self.state.read().catalog.clone())
    }

    fn symbol_info(&self, symbol: &str) -> Result<Option<RawSymbol>, TerminalError> {
        self.enter()?;
        Ok(self
            .state
            .read()
            .catalog
            .iter()
            .find(|s| s.name == symbol)
            .cloned())
    }

    fn rates_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: i64,
        to: i64,
    ) -> Result<Vec<RawRate>, TerminalError> {
        self.enter()?;
        let state = self.state.read();
        Self::known(&state, symbol)?;

        let rates = match &state.series[symbol] {
            Series::Fixed(bars) => {
                let mut rows: Vec<RawRate> = bars
                    .iter()
                    .filter(|b| b.time >= from && b.time <= to)
                    .copied()
                    .collect();
                rows.sort_by_key(|b| b.time);
                rows
            }
            Series::Synthetic { base_price } => {
                let step = timeframe.duration_secs();
                let last = align(self.server_now(), step).min(to);
                let mut t = align(from, step);
                if t < from {
                    t += step;
                }
                let mut rows = Vec::new();
                while t <= last && (rows.len() as i64) < MAX_SYNTHETIC_BARS {
                    rows.push(synthetic_bar(*base_price, t, step));
                    t += step;
                }
                rows
            }
        };
        Ok(rates)
    }

    fn rates_from_pos(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_pos: usize,
        count: usize,
    ) -> Result<Vec<RawRate>, TerminalError> {
        self.enter()?;
        let state = self.state.read();
        Self::known(&state, symbol)?;

        let rates = match &state.series[symbol] {
            Series::Fixed(bars) => {
                let mut rows = bars.clone();
                rows.sort_by_key(|b| b.time);
                let end = rows.len().saturating_sub(start_pos);
                let begin = end.saturating_sub(count);
                rows[begin..end].to_vec()
            }
            Series::Synthetic { base_price } => {
                let step = timeframe.duration_secs();
                let current = align(self.server_now(), step);
                (0..count)
                    .rev()
                    .map(|i| current - (start_pos + i) as i64 * step)
                    .map(|t| synthetic_bar(*base_price, t, step))
                    .collect()
            }
        };
        Ok(rates)
    }

    fn tick(&self, symbol: &str) -> Result<Option<RawTick>, TerminalError> {
        self.enter()?;
        let state = self.state.read();
        Self::known(&state, symbol)?;
        let spread = state
            .catalog
            .iter()
            .find(|s| s.name == symbol)
            .map(|s| s.point * 2.0)
            .unwrap_or(0.0);
        Ok(self.quote(&state, symbol).map(|bid| RawTick {
            time: self.server_now(),
            bid,
            ask: bid + spread,
        }))
    }

    fn order_send(&self, order: &MarketOrder) -> Result<TradeResult, TerminalError> {
        self.enter()?;
        let now = self.server_now();
        let mut state = self.state.write();
        Self::known(&state, &order.symbol)?;

        let listing = state
            .catalog
            .iter()
            .find(|s| s.name == order.symbol)
            .cloned()
            .ok_or_else(|| TerminalError::UnknownSymbol(order.symbol.clone()))?;
        let request_id = Self::next_request_id(&mut state);
        let bid = self.quote(&state, &order.symbol).unwrap_or(0.0);
        let ask = bid + listing.point * 2.0;

        if order.volume < listing.volume_min || order.volume > listing.volume_max {
            warn!(symbol = %order.symbol, volume = order.volume, "simulated order rejected: invalid volume");
            return Ok(TradeResult {
                success: false,
                retcode: RETCODE_INVALID_VOLUME,
                deal: 0,
                order: 0,
                volume: order.volume,
                price: 0.0,
                bid,
                ask,
                comment: "Invalid volume".into(),
                request_id,
            });
        }

        let fill = order.price.unwrap_or(match order.side {
            TradeSide::Buy => ask,
            TradeSide::Sell => bid,
        });
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.positions.insert(
            ticket,
            RawPosition {
                ticket,
                symbol: order.symbol.clone(),
                side: match order.side {
                    TradeSide::Buy => 0,
                    TradeSide::Sell => 1,
                },
                volume: order.volume,
                price_open: fill,
                price_current: fill,
                sl: order.stop_loss.unwrap_or(0.0),
                tp: order.take_profit.unwrap_or(0.0),
                profit: 0.0,
                time: now,
            },
        );

        info!(ticket, symbol = %order.symbol, side = %order.side, volume = order.volume, "simulated position opened");

        Ok(TradeResult {
            success: true,
            retcode: RETCODE_DONE,
            deal: ticket,
            order: ticket,
            volume: order.volume,
            price: fill,
            bid,
            ask,
            comment: if order.comment.is_empty() {
                "Request executed".into()
            } else {
                order.comment.clone()
            },
            request_id,
        })
    }

    fn positions(&self) -> Result<Vec<RawPosition>, TerminalError> {
        self.enter()?;
        let state = self.state.read();
        Ok(state
            .positions
            .values()
            .map(|p| {
                let mut p = p.clone();
                if let Some(price) = self.quote(&state, &p.symbol) {
                    p.price_current = price;
                    let direction = if p.side == 0 { 1.0 } else { -1.0 };
                    p.profit = (price - p.price_open) * p.volume * direction;
                }
                p
            })
            .collect())
    }

    fn close_position(&self, ticket: u64, volume: Option<f64>) -> Result<TradeResult, TerminalError> {
        self.enter()?;
        let mut state = self.state.write();
        let position = state
            .positions
            .get(&ticket)
            .cloned()
            .ok_or(TerminalError::UnknownTicket(ticket))?;

        let closed = volume.unwrap_or(position.volume);
        if closed > position.volume {
            return Err(TerminalError::Rejected(format!(
                "close volume {closed} exceeds position volume {}",
                position.volume
            )));
        }

        let request_id = Self::next_request_id(&mut state);
        let bid = self.quote(&state, &position.symbol).unwrap_or(position.price_current);
        if closed >= position.volume {
            state.positions.remove(&ticket);
        } else if let Some(p) = state.positions.get_mut(&ticket) {
            p.volume -= closed;
        }

        info!(ticket, volume = closed, "simulated position closed");

        Ok(TradeResult {
            success: true,
            retcode: RETCODE_DONE,
            deal: ticket,
            order: ticket,
            volume: closed,
            price: bid,
            bid,
            ask: bid,
            comment: "Position closed".into(),
            request_id,
        })
    }

    fn modify_position(
        &self,
        ticket: u64,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> Result<TradeResult, TerminalError> {
        self.enter()?;
        let mut state = self.state.write();
        let request_id = Self::next_request_id(&mut state);
        let position = state
            .positions
            .get_mut(&ticket)
            .ok_or(TerminalError::UnknownTicket(ticket))?;

        if let Some(sl) = stop_loss {
            position.sl = sl;
        }
        if let Some(tp) = take_profit {
            position.tp = tp;
        }
        let (volume, price) = (position.volume, position.price_current);

        Ok(TradeResult {
            success: true,
            retcode: RETCODE_DONE,
            deal: 0,
            order: ticket,
            volume,
            price,
            bid: price,
            ask: price,
            comment: "Position modified".into(),
            request_id,
        })
    }
}

// =============================================================================
// Synthetic market
// =============================================================================

/// Six-letter alphabetic names are treated as currency pairs, everything
/// else as an exchange-listed stock quoted in BRL.
fn is_currency_pair(name: &str) -> bool {
    name.len() == 6 && name.chars().all(|c| c.is_ascii_alphabetic())
}

fn describe(name: &str) -> RawSymbol {
    if is_currency_pair(name) {
        RawSymbol {
            name: name.to_string(),
            description: format!("{} vs {} (simulated)", &name[..3], &name[3..]),
            digits: 5,
            point: 0.00001,
            currency_base: name[..3].to_string(),
            currency_profit: name[3..].to_string(),
            currency_margin: name[..3].to_string(),
            volume_min: 0.01,
            volume_max: 100.0,
            volume_step: 0.01,
            trade_mode: 4,
        }
    } else {
        RawSymbol {
            name: name.to_string(),
            description: format!("{name} (simulated)"),
            digits: 2,
            point: 0.01,
            currency_base: "BRL".into(),
            currency_profit: "BRL".into(),
            currency_margin: "BRL".into(),
            volume_min: 1.0,
            volume_max: 100_000.0,
            volume_step: 1.0,
            trade_mode: 4,
        }
    }
}

fn base_price(name: &str) -> f64 {
    let seed: u32 = name.bytes().map(u32::from).sum();
    if is_currency_pair(name) {
        if name.ends_with("JPY") {
            100.0 + f64::from(seed % 60)
        } else {
            0.8 + f64::from(seed % 60) / 100.0
        }
    } else {
        10.0 + f64::from(seed % 90)
    }
}

fn align(t: i64, step: i64) -> i64 {
    t.div_euclid(step) * step
}

fn synthetic_close(base: f64, t: i64) -> f64 {
    let x = t as f64;
    base * (1.0 + 0.02 * (x / 7919.0).sin() + 0.005 * (x / 977.0).sin())
}

fn synthetic_bar(base: f64, t: i64, step: i64) -> RawRate {
    let open = synthetic_close(base, t - step);
    let close = synthetic_close(base, t + step - 1);
    let high = open.max(close) * 1.001;
    let low = open.min(close) * 0.999;
    RawRate {
        time: t,
        open,
        high,
        low,
        close,
        tick_volume: 100 + (t / step).rem_euclid(900),
        spread: 2,
        real_volume: 0,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_704_110_400; // 2024-01-01 12:00:00 UTC

    fn connected(sim: SimulatedTerminal) -> SimulatedTerminal {
        sim.connect();
        sim
    }

    fn rate(time: i64, close: f64) -> RawRate {
        RawRate {
            time,
            open: close,
            high: close,
            low: close,
            close,
            tick_volume: 1,
            spread: 0,
            real_volume: 0,
        }
    }

    #[test]
    fn calls_fail_before_initialize() {
        let sim = SimulatedTerminal::new(&["PETR4".into()], 0);
        assert!(matches!(sim.symbols(), Err(TerminalError::Disconnected(_))));
        sim.initialize().unwrap();
        assert!(sim.is_connected());
        assert_eq!(sim.symbols().unwrap().len(), 1);
    }

    #[test]
    fn currency_pairs_and_stocks_are_described_differently() {
        let fx = describe("EURUSD");
        assert_eq!(fx.digits, 5);
        assert_eq!(fx.currency_base, "EUR");
        assert_eq!(fx.currency_profit, "USD");

        let stock = describe("PETR4");
        assert_eq!(stock.digits, 2);
        assert_eq!(stock.currency_profit, "BRL");
    }

    #[test]
    fn synthetic_history_is_deterministic() {
        let sim = connected(SimulatedTerminal::new(&["VALE3".into()], 0).with_clock(NOW));
        let a = sim.rates_from_pos("VALE3", Timeframe::M5, 0, 10).unwrap();
        let b = sim.rates_from_pos("VALE3", Timeframe::M5, 0, 10).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 10);
        assert!(a.windows(2).all(|w| w[1].time - w[0].time == 300));
        assert_eq!(a.last().unwrap().time, align(NOW, 300));
    }

    #[test]
    fn synthetic_range_is_aligned_and_inclusive() {
        let sim = connected(SimulatedTerminal::new(&["VALE3".into()], 0).with_clock(NOW));
        let from = NOW - 3600;
        let bars = sim.rates_range("VALE3", Timeframe::M15, from, NOW).unwrap();
        assert_eq!(bars.len(), 5);
        assert_eq!(bars[0].time, from);
        assert_eq!(bars[4].time, NOW);
    }

    #[test]
    fn synthetic_range_stops_at_the_current_bar() {
        let sim = connected(SimulatedTerminal::new(&["VALE3".into()], 0).with_clock(NOW));
        let bars = sim
            .rates_range("VALE3", Timeframe::H1, NOW - 3600, NOW + 86_400)
            .unwrap();
        assert_eq!(bars.len(), 2);
    }

    #[test]
    fn server_clock_is_shifted_by_offset() {
        let sim = connected(SimulatedTerminal::new(&["VALE3".into()], 180).with_clock(NOW));
        let bars = sim.rates_from_pos("VALE3", Timeframe::H1, 0, 1).unwrap();
        assert_eq!(bars[0].time, NOW + 3 * 3600);
    }

    #[test]
    fn fixed_series_returns_latest_bars_oldest_first() {
        let sim = connected(SimulatedTerminal::new(&[], 0).with_fixed_series(
            "ABC",
            vec![rate(300, 3.0), rate(100, 1.0), rate(200, 2.0)],
        ));
        let bars = sim.rates_from_pos("ABC", Timeframe::M1, 0, 2).unwrap();
        assert_eq!(bars.iter().map(|b| b.time).collect::<Vec<_>>(), vec![200, 300]);

        let all = sim.rates_from_pos("ABC", Timeframe::M1, 0, 10).unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn unknown_symbol_is_reported() {
        let sim = connected(SimulatedTerminal::new(&["PETR4".into()], 0));
        assert_eq!(
            sim.rates_from_pos("XXXX", Timeframe::M1, 0, 1),
            Err(TerminalError::UnknownSymbol("XXXX".into()))
        );
        assert_eq!(sim.symbol_info("XXXX").unwrap(), None);
    }

    #[test]
    fn pinned_quote_wins_over_series() {
        let sim = connected(
            SimulatedTerminal::new(&[], 0)
                .with_fixed_series("ABC", vec![rate(100, 1.0)])
                .with_quote("ABC", 2.5),
        );
        assert_eq!(sim.tick("ABC").unwrap().unwrap().bid, 2.5);
    }

    #[test]
    fn order_lifecycle_open_modify_close() {
        let sim = connected(SimulatedTerminal::new(&["PETR4".into()], 0).with_quote("PETR4", 30.0));
        let order = MarketOrder {
            symbol: "PETR4".into(),
            side: TradeSide::Buy,
            volume: 100.0,
            price: None,
            stop_loss: None,
            take_profit: None,
            deviation: 20,
            comment: String::new(),
            magic_number: 0,
        };

        let opened = sim.order_send(&order).unwrap();
        assert!(opened.success);
        assert_eq!(opened.retcode, RETCODE_DONE);
        let ticket = opened.order;

        let modified = sim.modify_position(ticket, Some(28.0), Some(35.0)).unwrap();
        assert!(modified.success);
        let positions = sim.positions().unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].sl, 28.0);
        assert_eq!(positions[0].tp, 35.0);

        let partial = sim.close_position(ticket, Some(40.0)).unwrap();
        assert_eq!(partial.volume, 40.0);
        assert_eq!(sim.positions().unwrap()[0].volume, 60.0);

        assert!(matches!(
            sim.close_position(ticket, Some(500.0)),
            Err(TerminalError::Rejected(_))
        ));

        sim.close_position(ticket, None).unwrap();
        assert!(sim.positions().unwrap().is_empty());
        assert_eq!(sim.close_position(ticket, None), Err(TerminalError::UnknownTicket(ticket)));
    }

    #[test]
    fn out_of_range_volume_is_refused_by_retcode() {
        let sim = connected(SimulatedTerminal::new(&["EURUSD".into()], 0));
        let order = MarketOrder {
            symbol: "EURUSD".into(),
            side: TradeSide::Sell,
            volume: 1000.0,
            price: None,
            stop_loss: None,
            take_profit: None,
            deviation: 20,
            comment: String::new(),
            magic_number: 0,
        };
        let result = sim.order_send(&order).unwrap();
        assert!(!result.success);
        assert_eq!(result.retcode, RETCODE_INVALID_VOLUME);
        assert!(sim.positions().unwrap().is_empty());
    }

    #[test]
    fn injected_disconnects_are_consumed() {
        let sim = connected(SimulatedTerminal::new(&["PETR4".into()], 0));
        sim.inject_disconnects(1);
        assert!(sim.symbols().is_err());
        assert!(sim.symbols().is_ok());
        assert_eq!(sim.call_count(), 2);
    }
}
