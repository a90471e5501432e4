//! Session state machine.

use std::{
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use hostlink_core::{
    EventHub, HostChannel, HostConnector, HostError, HostInput, HostOutput, HostSender,
    HostSettings, SessionEvent, SessionObserver, StartupInfo,
    config::{DEFAULT_MAX_INPUT_LENGTH, DEFAULT_PROMPT},
    events::{
        DEFAULT_HISTORY_BYTES, ObserverId, OutputEvent, RequestContext, RequestEventArgs,
        RequestKind,
    },
};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{EvaluationHandle, InteractionHandle, request::RequestInfo};

/// Per-session tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Prompt reported before the host sends its own.
    pub prompt: String,
    pub max_input_length: usize,
    pub output_history_bytes: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_PROMPT.to_string(),
            max_input_length: DEFAULT_MAX_INPUT_LENGTH,
            output_history_bytes: DEFAULT_HISTORY_BYTES,
        }
    }
}

impl SessionOptions {
    #[must_use]
    pub fn from_settings(settings: &HostSettings) -> Self {
        Self {
            prompt: settings.prompt.clone(),
            max_input_length: settings.max_input_length,
            output_history_bytes: settings.output_history_bytes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Stopped,
    Starting,
    Running,
}

/// The occupied request slot.
struct Slot {
    info: Arc<RequestInfo>,
    /// Before-request fan-out has not finished yet.
    announcing: bool,
    /// `cancel_all` arrived during the fan-out; the begin call finishes it.
    cancel_requested: bool,
}

/// At most one request is pending: both kinds read the same prompt stream.
enum PendingRequest {
    None,
    Evaluation(Slot),
    Interaction(Slot),
}

impl PendingRequest {
    fn slot_mut(&mut self) -> Option<&mut Slot> {
        match self {
            Self::None => None,
            Self::Evaluation(slot) | Self::Interaction(slot) => Some(slot),
        }
    }

    const fn kind(&self) -> Option<RequestKind> {
        match self {
            Self::None => None,
            Self::Evaluation(_) => Some(RequestKind::Evaluation),
            Self::Interaction(_) => Some(RequestKind::Interaction),
        }
    }

    fn holds(&self, request_id: u64) -> bool {
        match self {
            Self::None => false,
            Self::Evaluation(slot) | Self::Interaction(slot) => slot.info.id == request_id,
        }
    }
}

struct SessionState {
    prompt: String,
    contexts: Vec<RequestContext>,
    lifecycle: Lifecycle,
    disposed: bool,
    pending: PendingRequest,
    sender: Option<HostSender>,
    pump: Option<JoinHandle<()>>,
}

pub(crate) struct SessionInner {
    id: i64,
    connector: Arc<dyn HostConnector>,
    max_input_length: usize,
    events: EventHub,
    next_request: AtomicU64,
    state: Mutex<SessionState>,
}

/// A conversation with one interpreter host.
///
/// Cloning is cheap; clones share the same state. Observers are called
/// synchronously with no session lock held, so they may call back into the
/// session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    #[must_use]
    pub fn new(id: i64, connector: Arc<dyn HostConnector>) -> Self {
        Self::with_options(id, connector, SessionOptions::default())
    }

    #[must_use]
    pub fn with_options(
        id: i64,
        connector: Arc<dyn HostConnector>,
        options: SessionOptions,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id,
                connector,
                max_input_length: options.max_input_length,
                events: EventHub::with_history_limit(id, options.output_history_bytes),
                next_request: AtomicU64::new(1),
                state: Mutex::new(SessionState {
                    prompt: options.prompt,
                    contexts: vec![RequestContext::top_level()],
                    lifecycle: Lifecycle::Stopped,
                    disposed: false,
                    pending: PendingRequest::None,
                    sender: None,
                    pump: None,
                }),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> i64 {
        self.inner.id
    }

    #[must_use]
    pub fn prompt(&self) -> String {
        self.inner.lock().prompt.clone()
    }

    #[must_use]
    pub fn is_host_running(&self) -> bool {
        self.inner.lock().lifecycle == Lifecycle::Running
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.lock().disposed
    }

    /// Kind of the pending request, if any.
    #[must_use]
    pub fn pending_request(&self) -> Option<RequestKind> {
        self.inner.lock().pending.kind()
    }

    #[must_use]
    pub fn connector(&self) -> &Arc<dyn HostConnector> {
        &self.inner.connector
    }

    /// Event hub for observers, broadcast subscribers and output history.
    #[must_use]
    pub fn events(&self) -> &EventHub {
        &self.inner.events
    }

    /// Register an observer.
    pub fn register(&self, observer: Arc<dyn SessionObserver>) -> ObserverId {
        self.inner.events.register(observer)
    }

    /// Subscribe to events asynchronously.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Begin a non-interactive evaluation.
    ///
    /// Emits before-request and, when `is_mutating`, mutated before returning.
    ///
    /// # Errors
    /// `InvalidState` if a request is already pending, `HostNotRunning` if the
    /// host has not been started, `Disposed` after `dispose`.
    pub fn begin_evaluation(&self, is_mutating: bool) -> Result<EvaluationHandle, HostError> {
        let info = self.inner.begin(RequestKind::Evaluation, false, is_mutating)?;
        Ok(EvaluationHandle::new(Arc::clone(&self.inner), info))
    }

    /// Begin an interaction that may prompt the user.
    ///
    /// Visible interactions are added to history.
    ///
    /// # Errors
    /// Same as [`Session::begin_evaluation`].
    pub fn begin_interaction(&self, is_visible: bool) -> Result<InteractionHandle, HostError> {
        let info = self.inner.begin(RequestKind::Interaction, is_visible, false)?;
        Ok(InteractionHandle::new(Arc::clone(&self.inner), info))
    }

    /// Cancel the pending request, if any.
    ///
    /// Idempotent. Safe to call from any task, including from an observer.
    ///
    /// # Errors
    /// `Disposed` after `dispose`.
    pub fn cancel_all(&self) -> Result<(), HostError> {
        if self.inner.lock().disposed {
            return Err(HostError::Disposed);
        }
        self.inner.cancel_pending();
        Ok(())
    }

    /// Connect to the host and wait for it to become ready.
    ///
    /// Credential prompting, if any, happens before the `timeout` starts.
    ///
    /// # Errors
    /// `AlreadyRunning`, `Disposed`, `Timeout`, or whatever the connector
    /// returns (`OperationCanceled`, `AuthenticationFailed`,
    /// `TransportUnavailable`).
    pub async fn start_host(
        &self,
        startup: &StartupInfo,
        timeout: Duration,
    ) -> Result<(), HostError> {
        {
            let mut state = self.inner.lock();
            if state.disposed {
                return Err(HostError::Disposed);
            }
            if state.lifecycle != Lifecycle::Stopped {
                return Err(HostError::AlreadyRunning);
            }
            state.lifecycle = Lifecycle::Starting;
        }

        let result: Result<HostChannel, HostError> = async {
            let mut channel = self.inner.connector.connect(startup).await?;
            tokio::time::timeout(timeout, channel.wait_ready())
                .await
                .map_err(|_| HostError::Timeout(timeout))?
                .map_err(|e| HostError::from_transport(e, self.inner.connector.authority()))?;
            Ok(channel)
        }
        .await;

        let channel = match result {
            Ok(channel) => channel,
            Err(e) => {
                let mut state = self.inner.lock();
                if state.lifecycle == Lifecycle::Starting {
                    state.lifecycle = Lifecycle::Stopped;
                }
                tracing::warn!(session_id = self.inner.id, "Failed to start host: {e}");
                return Err(e);
            }
        };

        let (sender, output) = channel.into_parts();
        {
            let mut state = self.inner.lock();
            if state.disposed || state.lifecycle != Lifecycle::Starting {
                let _ = sender.send(HostInput::Shutdown);
                return Err(if state.disposed {
                    HostError::Disposed
                } else {
                    HostError::OperationCanceled("host was stopped while starting".to_string())
                });
            }
            state.pump = Some(tokio::spawn(pump(Arc::downgrade(&self.inner), sender.id(), output)));
            state.sender = Some(sender);
            state.lifecycle = Lifecycle::Running;
        }

        tracing::info!(session_id = self.inner.id, host = %startup.name, "Host started");
        self.inner.events.emit(SessionEvent::Connected);
        Ok(())
    }

    /// Stop the host.
    ///
    /// Cancels any pending request first. No-op when already stopped.
    ///
    /// # Errors
    /// `Disposed` after `dispose`.
    pub fn stop_host(&self) -> Result<(), HostError> {
        if self.inner.lock().disposed {
            return Err(HostError::Disposed);
        }
        self.inner.stop();
        Ok(())
    }

    /// Stop the host and emit disposed. Every later call fails with `Disposed`.
    ///
    /// # Errors
    /// `Disposed` if already disposed.
    pub fn dispose(&self) -> Result<(), HostError> {
        {
            let mut state = self.inner.lock();
            if state.disposed {
                return Err(HostError::Disposed);
            }
            state.disposed = true;
        }
        self.inner.stop();
        tracing::debug!(session_id = self.inner.id, "Session disposed");
        self.inner.events.emit(SessionEvent::Disposed);
        Ok(())
    }
}

impl SessionInner {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(
        &self,
        kind: RequestKind,
        add_to_history: bool,
        is_mutating: bool,
    ) -> Result<Arc<RequestInfo>, HostError> {
        let info = {
            let mut state = self.lock();
            if state.disposed {
                return Err(HostError::Disposed);
            }
            if let Some(pending) = state.pending.kind() {
                return Err(HostError::InvalidState(format!(
                    "cannot begin {kind:?} while {pending:?} is pending"
                )));
            }
            if state.lifecycle != Lifecycle::Running {
                return Err(HostError::HostNotRunning);
            }

            let args = RequestEventArgs {
                request_id: self.next_request.fetch_add(1, Ordering::Relaxed),
                kind,
                contexts: state.contexts.clone(),
                prompt: state.prompt.clone(),
                max_input_length: self.max_input_length,
                add_to_history,
            };
            let info = Arc::new(RequestInfo::new(args, CancellationToken::new()));
            let slot = Slot {
                info: Arc::clone(&info),
                announcing: true,
                cancel_requested: false,
            };
            state.pending = match kind {
                RequestKind::Evaluation => PendingRequest::Evaluation(slot),
                RequestKind::Interaction => PendingRequest::Interaction(slot),
            };
            info
        };

        tracing::trace!(session_id = self.id, request_id = info.id, ?kind, "Request started");
        self.events.emit(SessionEvent::BeforeRequest(info.args.clone()));
        if is_mutating {
            self.events.emit(SessionEvent::Mutated);
        }

        self.end_announcement(&info);
        Ok(info)
    }

    /// Emit `event` on behalf of a request, keeping its slot occupied until
    /// every observer has seen it. Nothing is emitted once the request is no
    /// longer pending.
    pub(crate) fn announce(&self, request_id: u64, event: SessionEvent) {
        let info = {
            let mut state = self.lock();
            match state.pending.slot_mut() {
                Some(slot) if slot.info.id == request_id && !slot.cancel_requested => {
                    slot.announcing = true;
                    Arc::clone(&slot.info)
                }
                _ => return,
            }
        };
        self.events.emit(event);
        self.end_announcement(&info);
    }

    /// Finish a cancel that arrived while observers were running.
    fn end_announcement(&self, info: &RequestInfo) {
        let canceled_during_announce = {
            let mut state = self.lock();
            match state.pending.slot_mut() {
                Some(slot) if slot.info.id == info.id => {
                    slot.announcing = false;
                    if slot.cancel_requested {
                        state.pending = PendingRequest::None;
                        true
                    } else {
                        false
                    }
                }
                _ => false,
            }
        };
        if canceled_during_announce {
            self.events.emit(SessionEvent::AfterRequest(info.args.clone()));
        }
    }

    /// Cancel whatever is pending. Returns true if a request was canceled.
    pub(crate) fn cancel_pending(&self) -> bool {
        let (args, sender) = {
            let mut state = self.lock();
            let sender = state.sender.clone();
            let Some(slot) = state.pending.slot_mut() else {
                return false;
            };
            if slot.cancel_requested {
                return false;
            }
            slot.info.token.cancel();
            if slot.announcing {
                slot.cancel_requested = true;
                (None, sender)
            } else {
                let args = slot.info.args.clone();
                state.pending = PendingRequest::None;
                (Some(args), sender)
            }
        };

        if let Some(sender) = sender {
            if let Err(e) = sender.send(HostInput::Interrupt) {
                tracing::debug!(session_id = self.id, "Interrupt not delivered: {e}");
            }
        }
        if let Some(args) = args {
            tracing::debug!(session_id = self.id, request_id = args.request_id, "Request canceled");
            self.events.emit(SessionEvent::AfterRequest(args));
        }
        true
    }

    /// End a request normally. No-op if it is no longer pending.
    pub(crate) fn finish(&self, request_id: u64) {
        let args = {
            let mut state = self.lock();
            if !state.pending.holds(request_id) {
                return;
            }
            let args = state.pending.slot_mut().map(|slot| slot.info.args.clone());
            state.pending = PendingRequest::None;
            args
        };
        if let Some(args) = args {
            tracing::trace!(session_id = self.id, request_id, "Request finished");
            self.events.emit(SessionEvent::AfterRequest(args));
        }
    }

    /// Forward input for a request that is still pending.
    pub(crate) fn send_for(&self, request_id: u64, input: HostInput) -> Result<(), HostError> {
        let sender = {
            let state = self.lock();
            if state.disposed {
                return Err(HostError::Disposed);
            }
            if !state.pending.holds(request_id) {
                return Err(HostError::OperationCanceled("request is no longer pending".to_string()));
            }
            state.sender.clone().ok_or(HostError::HostNotRunning)?
        };
        sender
            .send(input)
            .map_err(|e| HostError::from_transport(e, self.connector.authority()))
    }

    fn stop(&self) {
        self.cancel_pending();

        let (sender, pump) = {
            let mut state = self.lock();
            if state.lifecycle != Lifecycle::Running {
                if state.lifecycle == Lifecycle::Starting {
                    state.lifecycle = Lifecycle::Stopped;
                }
                return;
            }
            state.lifecycle = Lifecycle::Stopped;
            (state.sender.take(), state.pump.take())
        };

        if let Some(sender) = sender {
            let _ = sender.send(HostInput::Shutdown); // host may already be gone
        }
        if let Some(pump) = pump {
            pump.abort();
        }
        tracing::info!(session_id = self.id, "Host stopped");
        self.events.emit(SessionEvent::Disconnected);
    }

    /// The host side of channel `channel_id` went away.
    fn host_exited(&self, channel_id: Uuid) {
        let is_current = {
            let state = self.lock();
            state.lifecycle == Lifecycle::Running
                && state.sender.as_ref().is_some_and(|s| s.id() == channel_id)
        };
        if !is_current {
            return;
        }

        self.cancel_pending();
        {
            let mut state = self.lock();
            if state.lifecycle != Lifecycle::Running
                || !state.sender.as_ref().is_some_and(|s| s.id() == channel_id)
            {
                return;
            }
            state.lifecycle = Lifecycle::Stopped;
            state.sender = None;
            state.pump = None;
        }
        tracing::warn!(session_id = self.id, "Host exited");
        self.events.emit(SessionEvent::Disconnected);
    }

    fn set_prompt(&self, prompt: String) {
        {
            let mut state = self.lock();
            if state.prompt == prompt {
                return;
            }
            state.prompt.clone_from(&prompt);
        }
        self.events.emit(SessionEvent::PromptChanged { prompt });
    }
}

/// Forward host output into session events until the host goes away.
async fn pump(
    session: Weak<SessionInner>,
    channel_id: Uuid,
    mut output: mpsc::UnboundedReceiver<HostOutput>,
) {
    while let Some(msg) = output.recv().await {
        let Some(session) = session.upgrade() else {
            return;
        };
        match msg {
            HostOutput::Output { kind, text } => {
                session.events.emit(SessionEvent::Output(OutputEvent { kind, text }));
            }
            HostOutput::Prompt(prompt) => session.set_prompt(prompt),
            HostOutput::DirectoryChanged => session.events.emit(SessionEvent::DirectoryChanged),
            HostOutput::Exited => {
                session.host_exited(channel_id);
                return;
            }
        }
    }

    if let Some(session) = session.upgrade() {
        session.host_exited(channel_id);
    }
}
