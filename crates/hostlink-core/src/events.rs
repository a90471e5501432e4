//! Session events with ordered observer fan-out, broadcast and output history.

use std::{
    collections::VecDeque,
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::OutputKind;

/// Default output history size limit (1 MB).
pub const DEFAULT_HISTORY_BYTES: usize = 1024 * 1024;

const BROADCAST_CAPACITY: usize = 1024;

/// Kind of frame on the interpreter's call stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    TopLevel,
    /// Debugger browser prompt.
    Browser,
    Function,
}

/// One entry of the context stack shown for nested prompts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestContext {
    pub kind: ContextKind,
}

impl RequestContext {
    #[must_use]
    pub const fn top_level() -> Self {
        Self {
            kind: ContextKind::TopLevel,
        }
    }
}

/// Which slot a request occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Evaluation,
    Interaction,
}

/// Payload of before-request and after-request events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestEventArgs {
    pub request_id: u64,
    pub kind: RequestKind,
    pub contexts: Vec<RequestContext>,
    pub prompt: String,
    pub max_input_length: usize,
    pub add_to_history: bool,
}

/// A chunk of host output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputEvent {
    pub kind: OutputKind,
    pub text: String,
}

/// Event emitted by a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Connected,
    Disconnected,
    Disposed,
    /// Interpreter-visible state may have changed.
    Mutated,
    DirectoryChanged,
    PromptChanged { prompt: String },
    BeforeRequest(RequestEventArgs),
    AfterRequest(RequestEventArgs),
    Output(OutputEvent),
}

/// Receives session events synchronously, in registration order.
///
/// Implementations must not block for long: the emitting call does not
/// return until every observer has run.
pub trait SessionObserver: Send + Sync {
    fn on_event(&self, session_id: i64, event: &SessionEvent);
}

impl<F> SessionObserver for F
where
    F: Fn(i64, &SessionEvent) + Send + Sync,
{
    fn on_event(&self, session_id: i64, event: &SessionEvent) {
        self(session_id, event);
    }
}

/// Registration handle returned by [`EventHub::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

struct History {
    entries: VecDeque<(OutputEvent, usize)>,
    total_bytes: usize,
}

/// Event hub for one session.
///
/// Observers are called synchronously in registration order. The same events
/// are also pushed to a broadcast channel for async consumers, and output is
/// kept in a bounded history so late-joining panes can replay it.
pub struct EventHub {
    session_id: i64,
    observers: RwLock<Vec<(ObserverId, Arc<dyn SessionObserver>)>>,
    next_observer: AtomicU64,
    sender: broadcast::Sender<SessionEvent>,
    history: RwLock<History>,
    history_limit: usize,
}

impl EventHub {
    /// Create a hub with the default output history limit.
    #[must_use]
    pub fn new(session_id: i64) -> Self {
        Self::with_history_limit(session_id, DEFAULT_HISTORY_BYTES)
    }

    #[must_use]
    pub fn with_history_limit(session_id: i64, history_limit: usize) -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            session_id,
            observers: RwLock::new(Vec::new()),
            next_observer: AtomicU64::new(1),
            sender,
            history: RwLock::new(History {
                entries: VecDeque::with_capacity(32),
                total_bytes: 0,
            }),
            history_limit,
        }
    }

    /// Register an observer; it receives every event emitted afterwards.
    pub fn register(&self, observer: Arc<dyn SessionObserver>) -> ObserverId {
        let id = ObserverId(self.next_observer.fetch_add(1, Ordering::Relaxed));
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, observer));
        id
    }

    /// Register a closure observer.
    pub fn register_fn<F>(&self, f: F) -> ObserverId
    where
        F: Fn(i64, &SessionEvent) + Send + Sync + 'static,
    {
        self.register(Arc::new(f))
    }

    /// Remove an observer. Returns false if it was not registered.
    pub fn unregister(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write().unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|(oid, _)| *oid != id);
        observers.len() != before
    }

    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.observers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Deliver an event to every observer, then to broadcast subscribers.
    ///
    /// No lock is held while observers run, so an observer may register,
    /// unregister or call back into the session.
    pub fn emit(&self, event: SessionEvent) {
        let snapshot: Vec<Arc<dyn SessionObserver>> = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, o)| Arc::clone(o))
            .collect();

        for observer in snapshot {
            observer.on_event(self.session_id, &event);
        }

        if let SessionEvent::Output(ref output) = event {
            // Record and broadcast under one lock so `history_plus_stream`
            // sees each chunk exactly once.
            let mut history = self.history.write().unwrap_or_else(PoisonError::into_inner);
            self.push_history(&mut history, output.clone());
            let _ = self.sender.send(event);
            return;
        }
        let _ = self.sender.send(event); // no subscribers is fine
    }

    fn push_history(&self, history: &mut History, output: OutputEvent) {
        let bytes = output.text.len();
        while history.total_bytes.saturating_add(bytes) > self.history_limit {
            if let Some((_, front)) = history.entries.pop_front() {
                history.total_bytes = history.total_bytes.saturating_sub(front);
            } else {
                break;
            }
        }
        history.entries.push_back((output, bytes));
        history.total_bytes = history.total_bytes.saturating_add(bytes);
    }

    /// Get a receiver for live events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Snapshot of the retained output.
    #[must_use]
    pub fn output_history(&self) -> Vec<OutputEvent> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .iter()
            .map(|(o, _)| o.clone())
            .collect()
    }

    pub fn clear_history(&self) {
        let mut history = self.history.write().unwrap_or_else(PoisonError::into_inner);
        history.entries.clear();
        history.total_bytes = 0;
    }

    /// Stream that yields retained output first, then live output.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, OutputEvent> {
        let (history, rx) = {
            let history = self.history.read().unwrap_or_else(PoisonError::into_inner);
            let snapshot: Vec<OutputEvent> = history.entries.iter().map(|(o, _)| o.clone()).collect();
            (snapshot, self.sender.subscribe())
        };

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| async move {
            match res {
                Ok(SessionEvent::Output(output)) => Some(output),
                _ => None,
            }
        });

        Box::pin(hist.chain(live))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn output(text: &str) -> SessionEvent {
        SessionEvent::Output(OutputEvent {
            kind: OutputKind::Stdout,
            text: text.to_string(),
        })
    }

    #[test]
    fn test_observers_run_in_registration_order() {
        let hub = EventHub::new(7);
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["editor", "repl", "debugger"] {
            let seen = Arc::clone(&seen);
            hub.register_fn(move |id, event| {
                assert_eq!(id, 7);
                if matches!(event, SessionEvent::Connected) {
                    seen.lock().unwrap().push(tag);
                }
            });
        }

        hub.emit(SessionEvent::Connected);
        assert_eq!(*seen.lock().unwrap(), vec!["editor", "repl", "debugger"]);
    }

    #[test]
    fn test_unregister_stops_delivery() {
        let hub = EventHub::new(1);
        let count = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&count);
        let id = hub.register_fn(move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        hub.emit(SessionEvent::Mutated);
        assert!(hub.unregister(id));
        assert!(!hub.unregister(id));
        hub.emit(SessionEvent::Mutated);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(hub.observer_count(), 0);
    }

    #[test]
    fn test_observer_may_register_during_emit() {
        let hub = Arc::new(EventHub::new(1));
        let inner = Arc::clone(&hub);
        hub.register_fn(move |_, _| {
            inner.register_fn(|_, _| {});
        });
        hub.emit(SessionEvent::Connected);
        assert_eq!(hub.observer_count(), 2);
    }

    #[test]
    fn test_history_is_bounded() {
        let hub = EventHub::with_history_limit(1, 10);
        hub.emit(output("aaaa"));
        hub.emit(output("bbbb"));
        hub.emit(output("cccc"));

        let texts: Vec<String> = hub.output_history().into_iter().map(|o| o.text).collect();
        assert_eq!(texts, vec!["bbbb", "cccc"]);

        hub.clear_history();
        assert!(hub.output_history().is_empty());
    }

    #[tokio::test]
    async fn test_history_plus_stream_replays_then_follows() {
        let hub = EventHub::new(1);
        hub.emit(output("old\n"));

        let mut stream = hub.history_plus_stream();
        hub.emit(SessionEvent::Mutated);
        hub.emit(output("new\n"));

        assert_eq!(stream.next().await.unwrap().text, "old\n");
        assert_eq!(stream.next().await.unwrap().text, "new\n");
    }

    #[tokio::test]
    async fn test_history_plus_stream_has_no_gap_under_concurrent_output() {
        const CHUNKS: usize = 500;
        let hub = Arc::new(EventHub::new(1));

        let writer = Arc::clone(&hub);
        let emitter = std::thread::spawn(move || {
            for i in 0..CHUNKS {
                writer.emit(output(&i.to_string()));
            }
        });
        while hub.output_history().is_empty() {
            tokio::task::yield_now().await;
        }

        let stream = hub.history_plus_stream();
        let texts: Vec<String> = stream.take(CHUNKS).map(|o| o.text).collect().await;
        emitter.join().unwrap();

        let expected: Vec<String> = (0..CHUNKS).map(|i| i.to_string()).collect();
        assert_eq!(texts, expected);
    }
}
