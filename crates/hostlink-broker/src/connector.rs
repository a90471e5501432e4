//! Local and remote host connectors.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use hostlink_core::{
    Authority, CredentialPrompt, Credentials, HostChannel, HostConnector, HostError, HostTransport, PromptOutcome,
    StartupInfo,
};
use url::Url;

use crate::{
    AuthorityRegistry, AuthorityState, BrokerConnection, GatePermit,
    connection::CredentialRefresher,
};

/// Connector for a host on this machine. No authentication.
pub struct LocalHostConnector {
    authority: Authority,
    transport: Arc<dyn HostTransport>,
}

impl LocalHostConnector {
    #[must_use]
    pub fn new(transport: Arc<dyn HostTransport>) -> Self {
        Self {
            authority: Authority::local(),
            transport,
        }
    }
}

#[async_trait]
impl HostConnector for LocalHostConnector {
    fn authority(&self) -> &Authority {
        &self.authority
    }

    async fn connect(&self, startup: &StartupInfo) -> Result<HostChannel, HostError> {
        tracing::debug!(host = %startup.name, "Connecting to local host");
        self.transport
            .connect(&self.authority, None, startup)
            .await
            .map_err(|e| HostError::from_transport(e, &self.authority))
    }
}

/// Connector for a host behind an authenticating broker.
///
/// Connectors built for the same authority (from the same registry) share one
/// credential gate and one credential store, so concurrent session starts
/// show a single prompt and reuse whatever it established.
pub struct RemoteHostConnector {
    broker: BrokerConnection,
    state: Arc<AuthorityState>,
    prompt: Arc<dyn CredentialPrompt>,
    max_auth_attempts: Option<u32>,
}

impl RemoteHostConnector {
    /// Create a connector using the process-wide authority registry.
    ///
    /// # Errors
    /// Returns `HostError::Config` if the broker address has no authority.
    pub fn new(
        broker_uri: &Url,
        transport: Arc<dyn HostTransport>,
        prompt: Arc<dyn CredentialPrompt>,
    ) -> Result<Self, HostError> {
        Self::with_registry(broker_uri, transport, prompt, AuthorityRegistry::global())
    }

    /// Create a connector whose shared state lives in `registry`.
    ///
    /// # Errors
    /// Returns `HostError::Config` if the broker address has no authority.
    pub fn with_registry(
        broker_uri: &Url,
        transport: Arc<dyn HostTransport>,
        prompt: Arc<dyn CredentialPrompt>,
        registry: &AuthorityRegistry,
    ) -> Result<Self, HostError> {
        let authority = Authority::from_url(broker_uri)?;
        let state = registry.state_for(&authority);
        Ok(Self {
            broker: BrokerConnection::new(authority, transport),
            state,
            prompt,
            max_auth_attempts: None,
        })
    }

    /// Stop re-prompting after `max` rejected attempts.
    #[must_use]
    pub const fn with_max_auth_attempts(mut self, max: Option<u32>) -> Self {
        self.max_auth_attempts = max;
        self
    }

    /// Shared credential state for this connector's authority.
    #[must_use]
    pub fn state(&self) -> &Arc<AuthorityState> {
        &self.state
    }
}

#[async_trait]
impl HostConnector for RemoteHostConnector {
    fn authority(&self) -> &Authority {
        self.broker.authority()
    }

    async fn connect(&self, startup: &StartupInfo) -> Result<HostChannel, HostError> {
        tracing::debug!(authority = %self.authority(), host = %startup.name, "Connecting to remote host");
        let flow = CredentialFlow {
            state: &self.state,
            prompt: self.prompt.as_ref(),
            permit: Mutex::new(None),
            prompted: AtomicBool::new(false),
        };
        self.broker
            .connect(self.state.store(), &flow, startup, self.max_auth_attempts)
            .await
    }
}

/// Credential acquisition for one `connect` call.
///
/// The gate is held from `update_credentials` until the attempt that follows
/// it is validated or abandoned.
struct CredentialFlow<'a> {
    state: &'a AuthorityState,
    prompt: &'a dyn CredentialPrompt,
    permit: Mutex<Option<GatePermit>>,
    prompted: AtomicBool,
}

impl CredentialFlow<'_> {
    fn hold(&self, permit: GatePermit) {
        *self.permit.lock().unwrap_or_else(PoisonError::into_inner) = Some(permit);
    }

    fn release(&self) -> bool {
        self.permit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }
}

#[async_trait]
impl CredentialRefresher for CredentialFlow<'_> {
    async fn update_credentials(&self) -> Result<(), HostError> {
        let authority = self.state.authority();
        let permit = self.state.gate().acquire().await?;

        // Another flow may have validated credentials while we waited.
        if self.state.store().is_trusted() {
            tracing::debug!(%authority, "Reusing credentials validated by another session");
            self.prompted.store(false, Ordering::SeqCst);
            self.hold(permit);
            return Ok(());
        }

        let always_show_ui = self.state.ignore_saved_credentials();
        tracing::debug!(%authority, always_show_ui, "Prompting for broker credentials");

        match self.prompt.prompt(authority, always_show_ui).await {
            PromptOutcome::Entered(credentials) => {
                self.state.store().replace(credentials);
                self.prompted.store(true, Ordering::SeqCst);
                self.hold(permit);
                Ok(())
            }
            PromptOutcome::Aborted => {
                drop(permit);
                tracing::info!(%authority, "Credential prompt canceled");
                Err(HostError::OperationCanceled("No credentials entered.".to_string()))
            }
        }
    }

    async fn credentials_validated(&self, attempted: &Credentials, valid: bool) -> bool {
        let authority = self.state.authority();
        // Without the gate the store may have moved on to a newer pair.
        let current = self.state.store().set_trusted_if_current(attempted, valid);
        if current {
            self.state.set_ignore_saved_credentials(!valid);
        }

        if self.prompted.swap(false, Ordering::SeqCst) {
            self.prompt.confirm(authority, valid).await;
        }
        if self.release() {
            tracing::debug!(%authority, valid, "Released credential gate");
        }
        current
    }

    fn abandon(&self) {
        self.prompted.store(false, Ordering::SeqCst);
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use std::sync::atomic::AtomicUsize;

    use hostlink_core::{
        TransportError,
        testing::{ScriptedPrompt, ScriptedTransport},
    };

    use super::*;

    fn broker_uri() -> Url {
        Url::parse("https://broker.example.com:5444/#session").unwrap()
    }

    fn remote(
        transport: &Arc<ScriptedTransport>,
        prompt: &Arc<ScriptedPrompt>,
        registry: &AuthorityRegistry,
    ) -> RemoteHostConnector {
        RemoteHostConnector::with_registry(
            &broker_uri(),
            Arc::clone(transport) as Arc<dyn HostTransport>,
            Arc::clone(prompt) as Arc<dyn CredentialPrompt>,
            registry,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_local_connector_skips_credentials() {
        let transport = Arc::new(ScriptedTransport::open());
        let connector = LocalHostConnector::new(Arc::clone(&transport) as Arc<dyn HostTransport>);

        assert!(!connector.is_remote());
        assert!(connector.connect(&StartupInfo::default()).await.is_ok());
        assert_eq!(transport.attempts(), vec![None]);
    }

    #[tokio::test]
    async fn test_local_connector_surfaces_transport_errors() {
        let transport = Arc::new(ScriptedTransport::unavailable("process failed to start"));
        let connector = LocalHostConnector::new(transport);
        let err = connector.connect(&StartupInfo::default()).await.err().unwrap();
        assert!(matches!(err, HostError::TransportUnavailable(_)));
    }

    #[tokio::test]
    async fn test_first_connect_prompts_and_confirms() {
        let registry = AuthorityRegistry::new();
        let transport = Arc::new(ScriptedTransport::accepting("alice", "pw"));
        let prompt = Arc::new(ScriptedPrompt::entering("alice", "pw", 1));
        let connector = remote(&transport, &prompt, &registry);

        assert!(connector.is_remote());
        assert!(connector.connect(&StartupInfo::default()).await.is_ok());

        let authority = connector.authority().clone();
        assert_eq!(prompt.calls(), vec![(authority.clone(), false)]);
        assert_eq!(prompt.confirmations(), vec![(authority, true)]);
        assert!(connector.state().store().is_trusted());
        assert!(connector.state().gate().is_open());
    }

    #[tokio::test]
    async fn test_trusted_credentials_connect_without_prompt() {
        let registry = AuthorityRegistry::new();
        let transport = Arc::new(ScriptedTransport::accepting("alice", "pw"));
        let prompt = Arc::new(ScriptedPrompt::entering("alice", "pw", 1));
        let connector = remote(&transport, &prompt, &registry);

        connector.connect(&StartupInfo::default()).await.unwrap();
        connector.connect(&StartupInfo::default()).await.unwrap();

        assert_eq!(prompt.call_count(), 1);
        assert_eq!(transport.attempt_count(), 2);
    }

    #[tokio::test]
    async fn test_rejected_credentials_force_visible_prompt() {
        let registry = AuthorityRegistry::new();
        let transport = Arc::new(ScriptedTransport::accepting("alice", "right"));
        let prompt = Arc::new(ScriptedPrompt::new([
            PromptOutcome::Entered(Credentials::new("alice", "wrong")),
            PromptOutcome::Entered(Credentials::new("alice", "right")),
        ]));
        let connector = remote(&transport, &prompt, &registry);

        connector.connect(&StartupInfo::default()).await.unwrap();

        let flags: Vec<bool> = prompt.calls().into_iter().map(|(_, force)| force).collect();
        assert_eq!(flags, vec![false, true]);
        let confirmations: Vec<bool> = prompt.confirmations().into_iter().map(|(_, ok)| ok).collect();
        assert_eq!(confirmations, vec![false, true]);
        assert!(!connector.state().ignore_saved_credentials());
    }

    #[tokio::test]
    async fn test_untrusted_cache_with_ignore_flag_always_shows_ui() {
        let registry = AuthorityRegistry::new();
        let transport = Arc::new(ScriptedTransport::accepting("alice", "pw"));
        let prompt = Arc::new(ScriptedPrompt::entering("alice", "pw", 1));
        let connector = remote(&transport, &prompt, &registry);

        let state = connector.state();
        state.store().replace(Credentials::new("alice", "stale"));
        state.set_ignore_saved_credentials(true);

        connector.connect(&StartupInfo::default()).await.unwrap();
        assert_eq!(prompt.calls(), vec![(connector.authority().clone(), true)]);
    }

    #[tokio::test]
    async fn test_trusted_cache_rejected_reprompts_with_ui() {
        let registry = AuthorityRegistry::new();
        let transport = Arc::new(ScriptedTransport::accepting("alice", "new"));
        let prompt = Arc::new(ScriptedPrompt::entering("alice", "new", 1));
        let connector = remote(&transport, &prompt, &registry);

        connector.state().store().replace(Credentials::new("alice", "old"));
        connector.state().store().set_trusted(true);

        connector.connect(&StartupInfo::default()).await.unwrap();
        assert_eq!(transport.attempt_count(), 2);
        assert_eq!(prompt.calls(), vec![(connector.authority().clone(), true)]);
        // the rejected cached pair was not entered by this flow
        assert_eq!(prompt.confirmations(), vec![(connector.authority().clone(), true)]);
    }

    #[tokio::test]
    async fn test_cancel_releases_gate() {
        let registry = AuthorityRegistry::new();
        let transport = Arc::new(ScriptedTransport::accepting("alice", "pw"));
        let prompt = Arc::new(ScriptedPrompt::new([]));
        let connector = remote(&transport, &prompt, &registry);

        let err = connector.connect(&StartupInfo::default()).await.err().unwrap();
        assert!(err.is_canceled());
        assert!(connector.state().gate().is_open());
        assert_eq!(transport.attempt_count(), 0);

        prompt.push(PromptOutcome::Entered(Credentials::new("alice", "pw")));
        let second = tokio::time::timeout(Duration::from_secs(1), connector.connect(&StartupInfo::default()))
            .await
            .expect("second connect must not deadlock");
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_unavailable_broker_releases_gate() {
        let registry = AuthorityRegistry::new();
        let transport = Arc::new(ScriptedTransport::unavailable("connection refused"));
        let prompt = Arc::new(ScriptedPrompt::entering("alice", "pw", 1));
        let connector = remote(&transport, &prompt, &registry);

        let err = connector.connect(&StartupInfo::default()).await.err().unwrap();
        assert!(matches!(err, HostError::TransportUnavailable(_)));
        assert!(connector.state().gate().is_open());
        assert!(prompt.confirmations().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_connects_prompt_once() {
        let registry = AuthorityRegistry::new();
        let transport = Arc::new(ScriptedTransport::accepting("alice", "pw"));
        let prompt = Arc::new(ScriptedPrompt::entering("alice", "pw", 1).with_delay(Duration::from_millis(50)));

        let connectors: Vec<Arc<RemoteHostConnector>> = (0..4)
            .map(|_| Arc::new(remote(&transport, &prompt, &registry)))
            .collect();

        let tasks: Vec<_> = connectors
            .iter()
            .map(|c| {
                let c = Arc::clone(c);
                tokio::spawn(async move { c.connect(&StartupInfo::default()).await.map(|_| ()) })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(prompt.call_count(), 1);
        assert_eq!(prompt.max_concurrent(), 1);
        for creds in transport.attempts().into_iter().flatten() {
            assert_eq!(creds.username(), "alice");
            assert_eq!(creds.password(), "pw");
        }
    }

    #[tokio::test]
    async fn test_different_authorities_do_not_contend() {
        let registry = AuthorityRegistry::new();
        let transport = Arc::new(ScriptedTransport::open());
        let prompt = Arc::new(ScriptedPrompt::new([]));

        let a = remote(&transport, &prompt, &registry);
        let b = RemoteHostConnector::with_registry(
            &Url::parse("https://other.example.com:5444").unwrap(),
            Arc::clone(&transport) as Arc<dyn HostTransport>,
            Arc::clone(&prompt) as Arc<dyn CredentialPrompt>,
            &registry,
        )
        .unwrap();

        let _held = a.state().gate().acquire().await.unwrap();
        assert!(b.state().gate().try_acquire().is_some());
    }

    /// Broker whose password changed from "old" to "new". The first rejection
    /// of "old" takes `first_rejection`, later ones `later_rejection`.
    struct PasswordChangedTransport {
        old_attempts: AtomicUsize,
        first_rejection: Duration,
        later_rejection: Duration,
    }

    #[async_trait]
    impl HostTransport for PasswordChangedTransport {
        async fn connect(
            &self,
            _authority: &Authority,
            credentials: Option<&Credentials>,
            _startup: &StartupInfo,
        ) -> Result<HostChannel, TransportError> {
            if credentials.is_some_and(|c| c.password() == "new") {
                let (channel, endpoint) = HostChannel::pair();
                endpoint.mark_ready();
                return Ok(channel);
            }
            let delay = if self.old_attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                self.first_rejection
            } else {
                self.later_rejection
            };
            tokio::time::sleep(delay).await;
            Err(TransportError::AuthenticationFailed)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_late_rejection_of_replaced_credentials_keeps_new_ones() {
        let registry = AuthorityRegistry::new();
        let transport: Arc<dyn HostTransport> = Arc::new(PasswordChangedTransport {
            old_attempts: AtomicUsize::new(0),
            first_rejection: Duration::from_millis(10),
            later_rejection: Duration::from_millis(200),
        });
        let prompt = Arc::new(ScriptedPrompt::entering("alice", "new", 2));
        let connector = || {
            RemoteHostConnector::with_registry(
                &broker_uri(),
                Arc::clone(&transport),
                Arc::clone(&prompt) as Arc<dyn CredentialPrompt>,
                &registry,
            )
            .unwrap()
        };
        let (fast, slow) = (connector(), connector());

        let state = fast.state();
        state.store().replace(Credentials::new("alice", "old"));
        state.store().set_trusted(true);

        let startup = StartupInfo::default();
        let (a, b) = tokio::join!(fast.connect(&startup), slow.connect(&startup));
        assert!(a.is_ok());
        assert!(b.is_ok());

        // Both flows tried "old"; the second rejection arrived after "new"
        // was validated.
        assert_eq!(prompt.call_count(), 1);
        assert!(state.store().is_trusted());
        assert_eq!(state.store().snapshot().password(), "new");
        assert!(!state.ignore_saved_credentials());
    }
}
