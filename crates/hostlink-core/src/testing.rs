//! Scripted collaborators for tests.

use std::{
    collections::VecDeque,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    Authority, CredentialPrompt, Credentials, HostChannel, HostEndpoint, HostTransport, PromptOutcome,
    StartupInfo, TransportError,
};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Transport that accepts one username/password pair.
///
/// Accepted connections are kept as endpoints so tests can play the host.
pub struct ScriptedTransport {
    accepted: Option<(String, String)>,
    unavailable: Option<String>,
    mark_ready: bool,
    delay: Option<Duration>,
    attempts: Mutex<Vec<Option<Credentials>>>,
    endpoints: Mutex<VecDeque<HostEndpoint>>,
}

impl ScriptedTransport {
    /// Transport that accepts any connection, with or without credentials.
    #[must_use]
    pub fn open() -> Self {
        Self {
            accepted: None,
            unavailable: None,
            mark_ready: true,
            delay: None,
            attempts: Mutex::new(Vec::new()),
            endpoints: Mutex::new(VecDeque::new()),
        }
    }

    /// Transport that only accepts the given credentials.
    #[must_use]
    pub fn accepting(username: &str, password: &str) -> Self {
        Self {
            accepted: Some((username.to_string(), password.to_string())),
            ..Self::open()
        }
    }

    /// Transport whose host is never reachable.
    #[must_use]
    pub fn unavailable(reason: &str) -> Self {
        Self {
            unavailable: Some(reason.to_string()),
            ..Self::open()
        }
    }

    /// Hosts created by this transport never report ready.
    #[must_use]
    pub const fn never_ready(mut self) -> Self {
        self.mark_ready = false;
        self
    }

    /// Delay every connection attempt.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Credentials passed to each attempt, in order.
    #[must_use]
    pub fn attempts(&self) -> Vec<Option<Credentials>> {
        lock(&self.attempts).clone()
    }

    #[must_use]
    pub fn attempt_count(&self) -> usize {
        lock(&self.attempts).len()
    }

    /// Take the host side of the oldest accepted connection.
    #[must_use]
    pub fn take_endpoint(&self) -> Option<HostEndpoint> {
        lock(&self.endpoints).pop_front()
    }
}

#[async_trait]
impl HostTransport for ScriptedTransport {
    async fn connect(
        &self,
        _authority: &Authority,
        credentials: Option<&Credentials>,
        _startup: &StartupInfo,
    ) -> Result<HostChannel, TransportError> {
        lock(&self.attempts).push(credentials.cloned());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(ref reason) = self.unavailable {
            return Err(TransportError::Unavailable(reason.clone()));
        }
        if let Some((ref user, ref pass)) = self.accepted {
            let ok = credentials.is_some_and(|c| c.username() == user && c.password() == pass);
            if !ok {
                return Err(TransportError::AuthenticationFailed);
            }
        }

        let (channel, endpoint) = HostChannel::pair();
        if self.mark_ready {
            endpoint.mark_ready();
        }
        lock(&self.endpoints).push_back(endpoint);
        Ok(channel)
    }
}

/// Prompt that replays queued outcomes and records how it was used.
///
/// An empty queue behaves like the user dismissing the dialog.
pub struct ScriptedPrompt {
    outcomes: Mutex<VecDeque<PromptOutcome>>,
    delay: Option<Duration>,
    calls: Mutex<Vec<(Authority, bool)>>,
    confirmations: Mutex<Vec<(Authority, bool)>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedPrompt {
    #[must_use]
    pub fn new<I>(outcomes: I) -> Self
    where
        I: IntoIterator<Item = PromptOutcome>,
    {
        Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            delay: None,
            calls: Mutex::new(Vec::new()),
            confirmations: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    /// Prompt that answers with the given credentials, `times` times.
    #[must_use]
    pub fn entering(username: &str, password: &str, times: usize) -> Self {
        Self::new((0..times).map(|_| PromptOutcome::Entered(Credentials::new(username, password))))
    }

    /// Keep each prompt "on screen" for `delay`.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push(&self, outcome: PromptOutcome) {
        lock(&self.outcomes).push_back(outcome);
    }

    /// `(authority, always_show_ui)` for each prompt shown.
    #[must_use]
    pub fn calls(&self) -> Vec<(Authority, bool)> {
        lock(&self.calls).clone()
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// `(authority, valid)` for each confirmation received.
    #[must_use]
    pub fn confirmations(&self) -> Vec<(Authority, bool)> {
        lock(&self.confirmations).clone()
    }

    /// Highest number of prompts that were on screen at once.
    #[must_use]
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialPrompt for ScriptedPrompt {
    async fn prompt(&self, authority: &Authority, always_show_ui: bool) -> PromptOutcome {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        lock(&self.calls).push((authority.clone(), always_show_ui));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let outcome = lock(&self.outcomes).pop_front().unwrap_or(PromptOutcome::Aborted);

        self.active.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    async fn confirm(&self, authority: &Authority, valid: bool) {
        lock(&self.confirmations).push((authority.clone(), valid));
    }
}
