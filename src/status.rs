// =============================================================================
// Status Reporter — live authentication and terminal connectivity summary
// =============================================================================

use serde::Serialize;
use utoipa::ToSchema;

use crate::credentials::CredentialStore;
use crate::error::{API_KEY_FALLBACK_HEADER, API_KEY_HEADER};
use crate::terminal::TerminalBinding;
use crate::types::AuthMode;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DocumentationInfo {
    pub url: String,
    pub auth: String,
}

/// Public description of how the gateway is protected. Carries counts and
/// header names only, never key material or documentation credentials.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AuthStatus {
    pub auth_mode: AuthMode,
    pub api_key_count: usize,
    pub terminal_connected: bool,
    pub documentation: DocumentationInfo,
    pub api_key_header: String,
    pub api_key_fallback_header: String,
}

pub fn report(store: &CredentialStore, terminal: &dyn TerminalBinding) -> AuthStatus {
    AuthStatus {
        auth_mode: store.mode(),
        api_key_count: store.api_key_count(),
        terminal_connected: terminal.is_connected(),
        documentation: DocumentationInfo {
            url: "/docs".into(),
            auth: "basic".into(),
        },
        api_key_header: API_KEY_HEADER.into(),
        api_key_fallback_header: API_KEY_FALLBACK_HEADER.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::SimulatedTerminal;

    #[test]
    fn open_store_reports_open_mode() {
        let store = CredentialStore::new(Vec::<String>::new(), "u", "p");
        let sim = SimulatedTerminal::new(&[], 0);
        let status = report(&store, &sim);
        assert_eq!(status.auth_mode, AuthMode::Open);
        assert_eq!(status.api_key_count, 0);
        assert!(!status.terminal_connected);
    }

    #[test]
    fn report_never_contains_secrets() {
        let store = CredentialStore::new(["k-one", "k-two"], "docs-admin", "docs-pass");
        let sim = SimulatedTerminal::new(&[], 0);
        sim.connect();

        let status = report(&store, &sim);
        assert_eq!(status.auth_mode, AuthMode::Enforced);
        assert_eq!(status.api_key_count, 2);
        assert!(status.terminal_connected);

        let json = serde_json::to_string(&status).unwrap();
        for secret in ["k-one", "k-two", "docs-admin", "docs-pass"] {
            assert!(!json.contains(secret));
        }
    }
}
