// =============================================================================
// Credential Store — API keys and documentation login
// =============================================================================
//
// Built once at startup and handed to the gates through `AppState`. Read-only
// afterwards, so request handlers never lock it.
//
// The key set may be empty, in which case the API-key gate runs in Open mode.
// The documentation pair is always present.
// =============================================================================

use crate::config::EnvSettings;
use crate::types::AuthMode;

/// Username/password pair protecting the documentation routes.
#[derive(Clone)]
pub struct DocsCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for DocsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DocsCredentials { .. }")
    }
}

/// Immutable set of accepted API keys plus the documentation login.
#[derive(Clone)]
pub struct CredentialStore {
    api_keys: Vec<String>,
    docs: DocsCredentials,
}

impl CredentialStore {
    /// Build a store. Blank keys are dropped and duplicates collapsed; the
    /// first occurrence keeps its position.
    pub fn new<I, S>(api_keys: I, docs_username: impl Into<String>, docs_password: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut keys: Vec<String> = Vec::new();
        for key in api_keys {
            let key = key.into();
            if key.is_empty() || keys.contains(&key) {
                continue;
            }
            keys.push(key);
        }

        Self {
            api_keys: keys,
            docs: DocsCredentials {
                username: docs_username.into(),
                password: docs_password.into(),
            },
        }
    }

    pub fn from_env(env: &EnvSettings) -> Self {
        Self::new(
            env.api_keys.iter().cloned(),
            env.docs_username.clone(),
            env.docs_password.clone(),
        )
    }

    /// Current gate mode. Derived on every call, never cached.
    pub fn mode(&self) -> AuthMode {
        if self.api_keys.is_empty() {
            AuthMode::Open
        } else {
            AuthMode::Enforced
        }
    }

    pub fn api_key_count(&self) -> usize {
        self.api_keys.len()
    }

    pub fn api_keys(&self) -> impl Iterator<Item = &str> {
        self.api_keys.iter().map(String::as_str)
    }

    pub fn docs(&self) -> &DocsCredentials {
        &self.docs
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("mode", &self.mode())
            .field("api_key_count", &self.api_keys.len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
