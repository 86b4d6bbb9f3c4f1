// =============================================================================
// Gateway Configuration — environment settings plus JSON tunables
// =============================================================================
//
// Two sources feed the gateway at startup:
//
//   - Environment (optionally seeded from `.env`): API keys, documentation
//     credentials, terminal login, bind address, log verbosity.
//   - A JSON tunables file: payload bounds, terminal timeout and concurrency,
//     terminal clock offset. Every field carries a serde default so a partial
//     or missing file still yields a usable configuration.
//
// Configuration is read once. Nothing here is written back to disk.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_max_bars_per_request() -> usize {
    1000
}

fn default_max_symbols_per_request() -> usize {
    1000
}

fn default_terminal_timeout_ms() -> u64 {
    10_000
}

fn default_max_concurrent_terminal_calls() -> usize {
    1
}

fn default_simulated_symbols() -> Vec<String> {
    vec![
        "PETR3".to_string(),
        "PETR4".to_string(),
        "VALE3".to_string(),
        "ITUB4".to_string(),
        "EURUSD".to_string(),
        "USDJPY".to_string(),
    ]
}

const DEFAULT_DOCS_USERNAME: &str = "homelab";
const DEFAULT_DOCS_PASSWORD: &str = "john.1998";
const DEFAULT_TERMINAL_SERVER: &str = "ClearInvestimentos-CLEAR";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_LOG_LEVEL: &str = "info";

// =============================================================================
// Tunables
// =============================================================================

/// Request bounds and terminal access policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tunables {
    /// Upper bound for bars-by-count requests.
    #[serde(default = "default_max_bars_per_request")]
    pub max_bars_per_request: usize,

    /// Upper bound for symbols in one percent-change request.
    #[serde(default = "default_max_symbols_per_request")]
    pub max_symbols_per_request: usize,

    /// Per-request budget for waiting on the terminal, in milliseconds.
    #[serde(default = "default_terminal_timeout_ms")]
    pub terminal_timeout_ms: u64,

    /// How many terminal calls may be in flight at once.
    #[serde(default = "default_max_concurrent_terminal_calls")]
    pub max_concurrent_terminal_calls: usize,

    /// Offset of the terminal's server clock from UTC, in minutes
    /// (e.g. 180 for a UTC+3 broker).
    #[serde(default)]
    pub terminal_utc_offset_minutes: i32,

    /// Symbols published by the simulated terminal.
    #[serde(default = "default_simulated_symbols")]
    pub simulated_symbols: Vec<String>,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            max_bars_per_request: default_max_bars_per_request(),
            max_symbols_per_request: default_max_symbols_per_request(),
            terminal_timeout_ms: default_terminal_timeout_ms(),
            max_concurrent_terminal_calls: default_max_concurrent_terminal_calls(),
            terminal_utc_offset_minutes: 0,
            simulated_symbols: default_simulated_symbols(),
        }
    }
}

impl Tunables {
    /// Load tunables from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read tunables from {}", path.display()))?;

        let mut tunables: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse tunables from {}", path.display()))?;
        tunables.clamp();

        info!(
            path = %path.display(),
            max_bars = tunables.max_bars_per_request,
            terminal_timeout_ms = tunables.terminal_timeout_ms,
            max_concurrent_terminal_calls = tunables.max_concurrent_terminal_calls,
            "tunables loaded"
        );

        Ok(tunables)
    }

    /// Zero bounds would make every request fail; lift them to one.
    fn clamp(&mut self) {
        self.max_bars_per_request = self.max_bars_per_request.max(1);
        self.max_symbols_per_request = self.max_symbols_per_request.max(1);
        self.max_concurrent_terminal_calls = self.max_concurrent_terminal_calls.max(1);
        self.terminal_timeout_ms = self.terminal_timeout_ms.max(1);
    }
}

// =============================================================================
// Environment settings
// =============================================================================

/// Terminal account credentials. The password is never logged.
#[derive(Clone, Default)]
pub struct TerminalLogin {
    pub login: u64,
    pub password: String,
    pub server: String,
}

impl TerminalLogin {
    pub fn is_configured(&self) -> bool {
        self.login != 0 && !self.password.is_empty()
    }
}

impl std::fmt::Debug for TerminalLogin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalLogin")
            .field("login", &self.login)
            .field("server", &self.server)
            .finish_non_exhaustive()
    }
}

/// Everything the gateway reads from the process environment.
#[derive(Clone)]
pub struct EnvSettings {
    pub api_keys: Vec<String>,
    pub docs_username: String,
    pub docs_password: String,
    pub terminal: TerminalLogin,
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub tunables_path: String,
}

impl std::fmt::Debug for EnvSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvSettings")
            .field("api_key_count", &self.api_keys.len())
            .field("terminal", &self.terminal)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("log_level", &self.log_level)
            .field("tunables_path", &self.tunables_path)
            .finish_non_exhaustive()
    }
}

impl EnvSettings {
    /// Read settings from the real process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through `lookup`, which maps a variable name to its
    /// value. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let api_keys = get("API_KEYS")
            .map(|raw| split_keys(&raw))
            .unwrap_or_default();

        let login = match get("USERCLEAR") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| "USERCLEAR must be a numeric terminal login")?,
            None => 0,
        };

        let port = match get("PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .with_context(|| format!("PORT must be a valid TCP port, got '{raw}'"))?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            api_keys,
            docs_username: get("DOCS_USERNAME").unwrap_or_else(|| DEFAULT_DOCS_USERNAME.into()),
            docs_password: get("DOCS_PASSWORD").unwrap_or_else(|| DEFAULT_DOCS_PASSWORD.into()),
            terminal: TerminalLogin {
                login,
                password: get("PASSCLEAR").unwrap_or_default(),
                server: get("MT5_SERVER").unwrap_or_else(|| DEFAULT_TERMINAL_SERVER.into()),
            },
            host: get("HOST").unwrap_or_else(|| DEFAULT_HOST.into()),
            port,
            log_level: get("LOG_LEVEL").unwrap_or_else(|| DEFAULT_LOG_LEVEL.into()),
            tunables_path: get("GATEWAY_CONFIG").unwrap_or_else(|| "gateway_config.json".into()),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Split a comma-joined key list, trimming whitespace and dropping blanks.
fn split_keys(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(String::from)
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn default_tunables_have_expected_values() {
        let t = Tunables::default();
        assert_eq!(t.max_bars_per_request, 1000);
        assert_eq!(t.max_symbols_per_request, 1000);
        assert_eq!(t.terminal_timeout_ms, 10_000);
        assert_eq!(t.max_concurrent_terminal_calls, 1);
        assert_eq!(t.terminal_utc_offset_minutes, 0);
        assert!(t.simulated_symbols.contains(&"PETR4".to_string()));
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "max_bars_per_request": 50, "terminal_utc_offset_minutes": 180 }"#;
        let t: Tunables = serde_json::from_str(json).unwrap();
        assert_eq!(t.max_bars_per_request, 50);
        assert_eq!(t.terminal_utc_offset_minutes, 180);
        assert_eq!(t.terminal_timeout_ms, 10_000);
    }

    #[test]
    fn load_missing_file_is_an_error() {
        assert!(Tunables::load("/definitely/not/here.json").is_err());
    }

    #[test]
    fn load_clamps_zero_bounds() {
        let path = std::env::temp_dir().join(format!("tunables-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, r#"{ "max_bars_per_request": 0, "max_concurrent_terminal_calls": 0 }"#)
            .unwrap();
        let t = Tunables::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(t.max_bars_per_request, 1);
        assert_eq!(t.max_concurrent_terminal_calls, 1);
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let env = EnvSettings::from_lookup(|_| None).unwrap();
        assert!(env.api_keys.is_empty());
        assert_eq!(env.docs_username, "homelab");
        assert_eq!(env.docs_password, "john.1998");
        assert_eq!(env.bind_addr(), "0.0.0.0:8000");
        assert_eq!(env.log_level, "info");
        assert!(!env.terminal.is_configured());
    }

    #[test]
    fn api_keys_are_split_and_trimmed() {
        let env = EnvSettings::from_lookup(lookup_from(&[("API_KEYS", " k1, k2 ,,k3 ")])).unwrap();
        assert_eq!(env.api_keys, vec!["k1", "k2", "k3"]);
    }

    #[test]
    fn blank_api_keys_mean_no_keys() {
        let env = EnvSettings::from_lookup(lookup_from(&[("API_KEYS", "  ")])).unwrap();
        assert!(env.api_keys.is_empty());
    }

    #[test]
    fn terminal_login_parsed_from_env() {
        let env = EnvSettings::from_lookup(lookup_from(&[
            ("USERCLEAR", "123456"),
            ("PASSCLEAR", "secret"),
            ("MT5_SERVER", "Broker-Demo"),
        ]))
        .unwrap();
        assert_eq!(env.terminal.login, 123_456);
        assert_eq!(env.terminal.server, "Broker-Demo");
        assert!(env.terminal.is_configured());
    }

    #[test]
    fn non_numeric_login_is_rejected() {
        assert!(EnvSettings::from_lookup(lookup_from(&[("USERCLEAR", "abc")])).is_err());
    }

    #[test]
    fn invalid_port_is_rejected() {
        assert!(EnvSettings::from_lookup(lookup_from(&[("PORT", "70000")])).is_err());
    }

    #[test]
    fn debug_output_never_contains_secrets() {
        let env = EnvSettings::from_lookup(lookup_from(&[
            ("API_KEYS", "super-secret-key"),
            ("PASSCLEAR", "terminal-pass"),
            ("DOCS_PASSWORD", "docs-pass"),
        ]))
        .unwrap();
        let rendered = format!("{env:?}");
        assert!(!rendered.contains("super-secret-key"));
        assert!(!rendered.contains("terminal-pass"));
        assert!(!rendered.contains("docs-pass"));
    }
}
