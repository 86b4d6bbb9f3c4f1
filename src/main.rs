// =============================================================================
// MT5 Gateway — Main Entry Point
// =============================================================================
//
// Boots the HTTP gateway in front of the trading terminal:
//   1. environment (`.env`), logging, tunables
//   2. terminal binding: initialise, then log in when credentials are set
//   3. shared state and router
//   4. serve until Ctrl+C, then drain requests and close the terminal session
//
// A build without a native terminal binding serves the simulated terminal.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod config;
mod credentials;
mod error;
mod status;
mod terminal;
mod trading;
mod translator;
mod types;

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::config::{EnvSettings, Tunables};
use crate::credentials::CredentialStore;
use crate::terminal::{SimulatedTerminal, TerminalBinding};
use crate::types::AuthMode;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    let env = EnvSettings::from_env().context("invalid gateway environment")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&env.log_level)),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "MT5 Gateway starting up");

    let tunables = Tunables::load(&env.tunables_path).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load tunables, using defaults");
        Tunables::default()
    });

    let credentials = CredentialStore::from_env(&env);
    match credentials.mode() {
        AuthMode::Enforced => info!(keys = credentials.api_key_count(), "API-key gate enforced"),
        AuthMode::Open => warn!("API_KEYS is empty — market-data and trading routes are open"),
    }

    // ── 2. Terminal ──────────────────────────────────────────────────────
    warn!("No native terminal binding in this build — serving simulated market data");
    let binding: Arc<dyn TerminalBinding> = Arc::new(SimulatedTerminal::new(
        &tunables.simulated_symbols,
        tunables.terminal_utc_offset_minutes,
    ));

    binding.initialize().context("terminal initialisation failed")?;
    if env.terminal.is_configured() {
        match binding.login(&env.terminal) {
            Ok(()) => info!(login = env.terminal.login, server = %env.terminal.server, "terminal login succeeded"),
            Err(e) => error!(login = env.terminal.login, error = %e, "terminal login failed"),
        }
    } else {
        info!("USERCLEAR/PASSCLEAR not set — using the terminal's current session");
    }

    // ── 3. State & router ────────────────────────────────────────────────
    let state = Arc::new(AppState::new(credentials, binding.clone(), &tunables));
    let app = api::rest::router(state);

    // ── 4. Serve ─────────────────────────────────────────────────────────
    let bind_addr = env.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!(addr = %bind_addr, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server failed")?;

    binding.shutdown();
    info!("MT5 Gateway shut down complete.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    warn!("Shutdown signal received — draining requests");
}
