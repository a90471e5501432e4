//! Broker credentials.

use std::fmt;

use zeroize::Zeroizing;

/// Username/password pair plus a trust flag.
///
/// The password buffer is wiped on drop and never appears in `Debug` output.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: Zeroizing<String>,
    trusted: bool,
}

impl Credentials {
    /// Create untrusted credentials.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Zeroizing::new(password.into()),
            trusted: false,
        }
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    #[must_use]
    pub fn password(&self) -> &str {
        self.password.as_str()
    }

    /// Whether the broker has accepted these credentials.
    #[must_use]
    pub const fn is_trusted(&self) -> bool {
        self.trusted
    }

    /// True when nothing has been entered yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.username.is_empty() && self.password.is_empty()
    }

    /// Same username and password, whatever the trust flag says.
    #[must_use]
    pub fn same_pair(&self, other: &Self) -> bool {
        self.username == other.username && *self.password == *other.password
    }

    pub fn set_trusted(&mut self, trusted: bool) {
        self.trusted = trusted;
    }

    #[must_use]
    pub const fn with_trusted(mut self, trusted: bool) -> Self {
        self.trusted = trusted;
        self
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("trusted", &self.trusted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_password() {
        let creds = Credentials::new("alice", "hunter2");
        let printed = format!("{creds:?}");
        assert!(printed.contains("alice"));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn test_new_credentials_are_untrusted() {
        let creds = Credentials::new("alice", "pw");
        assert!(!creds.is_trusted());
        assert!(creds.clone().with_trusted(true).is_trusted());
        assert!(Credentials::default().is_empty());
    }

    #[test]
    fn test_same_pair_ignores_trust() {
        let entered = Credentials::new("alice", "pw");
        assert!(entered.same_pair(&entered.clone().with_trusted(true)));
        assert!(!entered.same_pair(&Credentials::new("alice", "other")));
    }
}
