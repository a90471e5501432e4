//! Credential prompt adapters.

use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;
use hostlink_core::{Authority, CredentialPrompt, Credentials, PromptOutcome};

/// Prompt that always answers with the same credentials.
///
/// Useful for headless front-ends that take credentials from configuration.
#[derive(Debug, Clone)]
pub struct FixedCredentialPrompt {
    credentials: Credentials,
}

impl FixedCredentialPrompt {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            credentials: Credentials::new(username, password),
        }
    }
}

#[async_trait]
impl CredentialPrompt for FixedCredentialPrompt {
    async fn prompt(&self, _authority: &Authority, _always_show_ui: bool) -> PromptOutcome {
        PromptOutcome::Entered(self.credentials.clone())
    }

    async fn confirm(&self, authority: &Authority, valid: bool) {
        if !valid {
            tracing::warn!(%authority, "Configured broker credentials were rejected");
        }
    }
}

/// Platform cache of credentials that worked, keyed by authority.
///
/// Lookups are best effort: a failing backend behaves like a missing entry.
#[async_trait]
pub trait SavedCredentials: Send + Sync {
    async fn load(&self, authority: &Authority) -> Option<Credentials>;
    async fn save(&self, authority: &Authority, credentials: &Credentials);
    async fn remove(&self, authority: &Authority);
}

/// In-process saved credentials.
#[derive(Debug, Default)]
pub struct MemorySavedCredentials {
    entries: Mutex<HashMap<Authority, Credentials>>,
}

impl MemorySavedCredentials {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, authority: &Authority) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(authority)
    }
}

#[async_trait]
impl SavedCredentials for MemorySavedCredentials {
    async fn load(&self, authority: &Authority) -> Option<Credentials> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(authority)
            .cloned()
    }

    async fn save(&self, authority: &Authority, credentials: &Credentials) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(authority.clone(), credentials.clone());
    }

    async fn remove(&self, authority: &Authority) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(authority);
    }
}

#[cfg(feature = "keychain")]
pub use keychain::KeyringCredentials;

#[cfg(feature = "keychain")]
mod keychain {
    use async_trait::async_trait;
    use hostlink_core::{Authority, Credentials};
    use serde::{Deserialize, Serialize};

    use super::SavedCredentials;

    const DEFAULT_SERVICE: &str = "hostlink";

    #[derive(Serialize, Deserialize)]
    struct Entry {
        username: String,
        password: String,
    }

    /// Saved credentials in the OS keychain.
    ///
    /// One entry per authority, stored under `service` with the authority as
    /// the account name.
    #[derive(Debug, Clone)]
    pub struct KeyringCredentials {
        service: String,
    }

    impl Default for KeyringCredentials {
        fn default() -> Self {
            Self::new(DEFAULT_SERVICE)
        }
    }

    impl KeyringCredentials {
        #[must_use]
        pub fn new(service: impl Into<String>) -> Self {
            Self {
                service: service.into(),
            }
        }

        // keyring is synchronous I/O
        async fn with_entry<T, F>(&self, authority: &Authority, f: F) -> Option<keyring::Result<T>>
        where
            T: Send + 'static,
            F: FnOnce(keyring::Entry) -> keyring::Result<T> + Send + 'static,
        {
            let service = self.service.clone();
            let account = authority.to_string();
            match tokio::task::spawn_blocking(move || keyring::Entry::new(&service, &account).and_then(f)).await {
                Ok(result) => Some(result),
                Err(e) => {
                    tracing::warn!(%authority, "Keychain task failed: {e}");
                    None
                }
            }
        }
    }

    #[async_trait]
    impl SavedCredentials for KeyringCredentials {
        async fn load(&self, authority: &Authority) -> Option<Credentials> {
            match self.with_entry(authority, |entry| entry.get_password()).await? {
                Ok(raw) => match serde_json::from_str::<Entry>(&raw) {
                    Ok(entry) => Some(Credentials::new(entry.username, entry.password)),
                    Err(e) => {
                        tracing::warn!(%authority, "Ignoring malformed keychain entry: {e}");
                        None
                    }
                },
                Err(keyring::Error::NoEntry) => None,
                Err(e) => {
                    tracing::warn!(%authority, ?e, "Keychain lookup failed");
                    None
                }
            }
        }

        async fn save(&self, authority: &Authority, credentials: &Credentials) {
            let raw = match serde_json::to_string(&Entry {
                username: credentials.username().to_string(),
                password: credentials.password().to_string(),
            }) {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(%authority, "Failed to encode keychain entry: {e}");
                    return;
                }
            };
            if let Some(Err(e)) = self
                .with_entry(authority, move |entry| entry.set_password(&raw))
                .await
            {
                tracing::warn!(%authority, ?e, "Failed to save credentials to keychain");
            }
        }

        async fn remove(&self, authority: &Authority) {
            match self.with_entry(authority, |entry| entry.delete_credential()).await {
                Some(Ok(()) | Err(keyring::Error::NoEntry)) | None => {}
                Some(Err(e)) => tracing::warn!(%authority, ?e, "Failed to purge keychain entry"),
            }
        }
    }
}

/// Prompt that answers from saved credentials when allowed.
///
/// Saved entries are skipped when the connector forces visible UI. On
/// confirmation, credentials that worked are saved and rejected ones purged.
pub struct SavedCredentialPrompt<P, S> {
    inner: P,
    saved: S,
    pending: Mutex<HashMap<Authority, Credentials>>,
}

impl<P, S> SavedCredentialPrompt<P, S>
where
    P: CredentialPrompt,
    S: SavedCredentials,
{
    #[must_use]
    pub fn new(inner: P, saved: S) -> Self {
        Self {
            inner,
            saved,
            pending: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn saved(&self) -> &S {
        &self.saved
    }

    fn remember(&self, authority: &Authority, credentials: &Credentials) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(authority.clone(), credentials.clone());
    }

    fn take_pending(&self, authority: &Authority) -> Option<Credentials> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(authority)
    }
}

#[async_trait]
impl<P, S> CredentialPrompt for SavedCredentialPrompt<P, S>
where
    P: CredentialPrompt,
    S: SavedCredentials,
{
    async fn prompt(&self, authority: &Authority, always_show_ui: bool) -> PromptOutcome {
        if !always_show_ui {
            if let Some(saved) = self.saved.load(authority).await {
                tracing::debug!(%authority, "Using saved credentials");
                self.remember(authority, &saved);
                return PromptOutcome::Entered(saved);
            }
        }

        let outcome = self.inner.prompt(authority, always_show_ui).await;
        if let PromptOutcome::Entered(ref credentials) = outcome {
            self.remember(authority, credentials);
        }
        outcome
    }

    async fn confirm(&self, authority: &Authority, valid: bool) {
        self.inner.confirm(authority, valid).await;

        let pending = self.take_pending(authority);
        if valid {
            if let Some(credentials) = pending {
                self.saved.save(authority, &credentials).await;
            }
        } else {
            self.saved.remove(authority).await;
        }
    }
}
