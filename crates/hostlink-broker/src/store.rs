//! Current credentials for one authority.

use std::sync::{PoisonError, RwLock};

use hostlink_core::Credentials;

/// Holds the username/password last entered for an authority and whether the
/// broker accepted it.
///
/// Only connectors in this crate write to the store, and only while holding
/// the authority's gate. Readers take a snapshot without the gate and accept
/// that it may be stale.
#[derive(Debug, Default)]
pub struct CredentialStore {
    inner: RwLock<Credentials>,
}

impl CredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current credentials.
    #[must_use]
    pub fn snapshot(&self) -> Credentials {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    #[must_use]
    pub fn is_trusted(&self) -> bool {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).is_trusted()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).is_empty()
    }

    /// Replace the stored credentials; the new pair starts untrusted.
    pub(crate) fn replace(&self, credentials: Credentials) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = credentials.with_trusted(false);
    }

    /// Record the outcome of an attempt made with `attempted`.
    ///
    /// Returns false and leaves the store alone if another flow replaced the
    /// pair after `attempted` was read.
    pub(crate) fn set_trusted_if_current(&self, attempted: &Credentials, trusted: bool) -> bool {
        let mut current = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if !current.same_pair(attempted) {
            return false;
        }
        current.set_trusted(trusted);
        true
    }

    pub(crate) fn set_trusted(&self, trusted: bool) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .set_trusted(trusted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_resets_trust() {
        let store = CredentialStore::new();
        assert!(store.is_empty());

        store.replace(Credentials::new("alice", "pw").with_trusted(true));
        assert!(!store.is_trusted());

        store.set_trusted(true);
        let snapshot = store.snapshot();
        assert!(snapshot.is_trusted());
        assert_eq!(snapshot.username(), "alice");
        assert_eq!(snapshot.password(), "pw");
    }

    #[test]
    fn test_outcome_for_replaced_pair_is_ignored() {
        let store = CredentialStore::new();
        store.replace(Credentials::new("alice", "old"));
        let attempted = store.snapshot();

        store.replace(Credentials::new("alice", "new"));
        store.set_trusted(true);

        assert!(!store.set_trusted_if_current(&attempted, false));
        assert!(store.is_trusted());
        assert!(store.set_trusted_if_current(&Credentials::new("alice", "new"), false));
        assert!(!store.is_trusted());
    }
}
