// =============================================================================
// Central Application State — MT5 gateway
// =============================================================================
//
// Everything a request handler needs, built once in `main` and shared as
// `Arc<AppState>`. Nothing in here is mutated after startup; interior
// mutability lives inside the terminal binding and the access gate counters.
// =============================================================================

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Tunables;
use crate::credentials::CredentialStore;
use crate::terminal::{TerminalAccess, TerminalBinding};
use crate::trading::TradingTranslator;
use crate::translator::MarketDataTranslator;

pub struct AppState {
    pub credentials: Arc<CredentialStore>,
    pub access: Arc<TerminalAccess>,
    pub market: MarketDataTranslator,
    pub trading: TradingTranslator,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(credentials: CredentialStore, binding: Arc<dyn TerminalBinding>, tunables: &Tunables) -> Self {
        let access = Arc::new(TerminalAccess::new(
            binding,
            tunables.max_concurrent_terminal_calls,
            Duration::from_millis(tunables.terminal_timeout_ms),
        ));

        Self {
            credentials: Arc::new(credentials),
            market: MarketDataTranslator::new(
                access.clone(),
                tunables.max_bars_per_request,
                tunables.max_symbols_per_request,
                tunables.terminal_utc_offset_minutes,
            ),
            trading: TradingTranslator::new(access.clone(), tunables.terminal_utc_offset_minutes),
            access,
            start_time: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
