//! Connection to a remote broker.

use std::sync::Arc;

use async_trait::async_trait;
use hostlink_core::{
    Authority, Credentials, HostChannel, HostError, HostTransport, StartupInfo, TransportError,
};

use crate::CredentialStore;

/// Hooks the retry loop calls around each authenticated attempt.
#[async_trait]
pub trait CredentialRefresher: Send + Sync {
    /// Make fresh credentials available in the store.
    async fn update_credentials(&self) -> Result<(), HostError>;

    /// Report the outcome of an attempt made with `attempted`, either right
    /// after `update_credentials` or with credentials already trusted.
    ///
    /// Returns false if the outcome was stale: the store no longer holds
    /// `attempted`, so it was left untouched.
    async fn credentials_validated(&self, attempted: &Credentials, valid: bool) -> bool;

    /// The attempt failed for a reason unrelated to credentials.
    fn abandon(&self);
}

/// Authority of a remote broker plus the transport that reaches it.
#[derive(Clone)]
pub struct BrokerConnection {
    authority: Authority,
    transport: Arc<dyn HostTransport>,
}

impl BrokerConnection {
    #[must_use]
    pub fn new(authority: Authority, transport: Arc<dyn HostTransport>) -> Self {
        Self { authority, transport }
    }

    #[must_use]
    pub const fn authority(&self) -> &Authority {
        &self.authority
    }

    /// One attempt with whatever the store currently holds.
    ///
    /// # Errors
    /// Returns the transport's classification of the failure.
    pub async fn attempt(
        &self,
        store: &CredentialStore,
        startup: &StartupInfo,
    ) -> Result<HostChannel, TransportError> {
        self.attempt_with(&store.snapshot(), startup).await
    }

    async fn attempt_with(
        &self,
        credentials: &Credentials,
        startup: &StartupInfo,
    ) -> Result<HostChannel, TransportError> {
        self.transport
            .connect(&self.authority, Some(credentials), startup)
            .await
    }

    /// Connect, asking `refresher` for new credentials after every rejection.
    ///
    /// Untrusted or missing credentials are refreshed before the first
    /// attempt. `max_attempts` bounds the number of rejected attempts; a
    /// rejection of credentials another flow has since replaced does not
    /// count. `None` retries until the refresher gives up.
    ///
    /// # Errors
    /// Returns the refresher's error (typically `OperationCanceled`),
    /// `AuthenticationFailed` once `max_attempts` is exhausted, or
    /// `TransportUnavailable`.
    pub async fn connect<R>(
        &self,
        store: &CredentialStore,
        refresher: &R,
        startup: &StartupInfo,
        max_attempts: Option<u32>,
    ) -> Result<HostChannel, HostError>
    where
        R: CredentialRefresher + ?Sized,
    {
        let mut attempts = 0u32;
        loop {
            if !store.is_trusted() {
                refresher.update_credentials().await?;
            }

            let credentials = store.snapshot();
            match self.attempt_with(&credentials, startup).await {
                Ok(channel) => {
                    refresher.credentials_validated(&credentials, true).await;
                    tracing::info!(authority = %self.authority, "Connected to broker");
                    return Ok(channel);
                }
                Err(TransportError::AuthenticationFailed) => {
                    if !refresher.credentials_validated(&credentials, false).await {
                        tracing::debug!(authority = %self.authority, "Ignoring rejection of replaced credentials");
                        continue;
                    }
                    attempts = attempts.saturating_add(1);
                    tracing::warn!(authority = %self.authority, attempts, "Broker rejected credentials");
                    if max_attempts.is_some_and(|max| attempts >= max) {
                        return Err(HostError::from_transport(
                            TransportError::AuthenticationFailed,
                            &self.authority,
                        ));
                    }
                }
                Err(e) => {
                    refresher.abandon();
                    tracing::warn!(authority = %self.authority, "Broker unreachable: {e}");
                    return Err(HostError::from_transport(e, &self.authority));
                }
            }
        }
    }
}
