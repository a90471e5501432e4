//! Collaborator traits: transports, credential prompts and connectors.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{Authority, Credentials, HostChannel, HostError, StartupInfo, TransportError};

/// Result of showing a credential prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptOutcome {
    /// The user entered a username and password.
    Entered(Credentials),
    /// The user dismissed the prompt.
    Aborted,
}

/// Trait for the platform credential dialog.
///
/// Implement this trait to integrate with your credential UI. The connector
/// decides when to prompt; your app implements the UX and the persistence of
/// saved entries.
#[async_trait]
pub trait CredentialPrompt: Send + Sync {
    /// Ask for credentials for `authority`.
    ///
    /// When `always_show_ui` is set the prompt must not answer from a saved
    /// entry; the previous credentials for this authority were rejected.
    async fn prompt(&self, authority: &Authority, always_show_ui: bool) -> PromptOutcome;

    /// Report whether the credentials last returned for `authority` worked,
    /// so saved entries can be persisted or purged.
    async fn confirm(&self, authority: &Authority, valid: bool);
}

#[async_trait]
impl<T> CredentialPrompt for Arc<T>
where
    T: CredentialPrompt + ?Sized,
{
    async fn prompt(&self, authority: &Authority, always_show_ui: bool) -> PromptOutcome {
        (**self).prompt(authority, always_show_ui).await
    }

    async fn confirm(&self, authority: &Authority, valid: bool) {
        (**self).confirm(authority, valid).await;
    }
}

/// Trait for host transports.
///
/// A transport turns an authority plus optional credentials into a live
/// channel. Local transports ignore the credentials.
#[async_trait]
pub trait HostTransport: Send + Sync {
    /// Open a channel to a host.
    async fn connect(
        &self,
        authority: &Authority,
        credentials: Option<&Credentials>,
        startup: &StartupInfo,
    ) -> Result<HostChannel, TransportError>;
}

/// Trait for host connectors.
#[async_trait]
pub trait HostConnector: Send + Sync {
    /// Authority this connector targets.
    fn authority(&self) -> &Authority;

    /// Whether connecting may involve broker authentication.
    fn is_remote(&self) -> bool {
        !self.authority().is_local()
    }

    /// Connect to a host, resolving credentials if needed.
    async fn connect(&self, startup: &StartupInfo) -> Result<HostChannel, HostError>;
}
