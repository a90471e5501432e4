//! Per-authority shared credential state.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, OnceLock, PoisonError, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use hostlink_core::Authority;

use crate::{CredentialGate, CredentialStore};

/// State shared by every connector targeting one authority.
#[derive(Debug)]
pub struct AuthorityState {
    authority: Authority,
    gate: CredentialGate,
    store: CredentialStore,
    ignore_saved_credentials: AtomicBool,
}

impl AuthorityState {
    fn new(authority: Authority) -> Self {
        Self {
            authority,
            gate: CredentialGate::new(),
            store: CredentialStore::new(),
            ignore_saved_credentials: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub const fn authority(&self) -> &Authority {
        &self.authority
    }

    #[must_use]
    pub const fn gate(&self) -> &CredentialGate {
        &self.gate
    }

    #[must_use]
    pub const fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Whether the next prompt must bypass saved entries.
    #[must_use]
    pub fn ignore_saved_credentials(&self) -> bool {
        self.ignore_saved_credentials.load(Ordering::SeqCst)
    }

    pub(crate) fn set_ignore_saved_credentials(&self, ignore: bool) {
        self.ignore_saved_credentials.store(ignore, Ordering::SeqCst);
    }
}

/// Map from authority to shared state.
///
/// Entries are created on first use and held weakly: once the last connector
/// for an authority is dropped, its gate and cached credentials go away.
#[derive(Debug, Default)]
pub struct AuthorityRegistry {
    entries: Mutex<HashMap<Authority, Weak<AuthorityState>>>,
}

impl AuthorityRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry used when no registry is injected.
    #[must_use]
    pub fn global() -> &'static Self {
        static GLOBAL: OnceLock<AuthorityRegistry> = OnceLock::new();
        GLOBAL.get_or_init(Self::new)
    }

    /// Get or create the state for `authority`.
    #[must_use]
    pub fn state_for(&self, authority: &Authority) -> Arc<AuthorityState> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, weak| weak.strong_count() > 0);

        if let Some(state) = entries.get(authority).and_then(Weak::upgrade) {
            return state;
        }

        tracing::debug!(%authority, "Creating credential state");
        let state = Arc::new(AuthorityState::new(authority.clone()));
        entries.insert(authority.clone(), Arc::downgrade(&state));
        state
    }

    /// Number of authorities with live state.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_authority_shares_state() {
        let registry = AuthorityRegistry::new();
        let a = registry.state_for(&Authority::parse("https://broker:5444/one").unwrap());
        let b = registry.state_for(&Authority::parse("https://broker:5444/two").unwrap());
        let c = registry.state_for(&Authority::parse("https://other:5444").unwrap());

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_state_is_released_with_last_holder() {
        let registry = AuthorityRegistry::new();
        let authority = Authority::parse("https://broker:5444").unwrap();

        let state = registry.state_for(&authority);
        state.set_ignore_saved_credentials(true);
        drop(state);
        assert!(registry.is_empty());

        let fresh = registry.state_for(&authority);
        assert!(!fresh.ignore_saved_credentials());
    }
}
