//! Opaque bidirectional channel between a session and its host.
//!
//! A transport creates a pair with [`HostChannel::pair`], keeps the
//! [`HostEndpoint`] for itself and hands the [`HostChannel`] to the session.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::TransportError;

/// Output stream a chunk of host output was written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Stdout,
    Stderr,
}

/// Message from the session to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostInput {
    /// Expression submitted by an evaluation request.
    Evaluate(String),
    /// Text typed in response to an interactive prompt.
    Respond(String),
    /// Interrupt the request currently executing.
    Interrupt,
    /// Terminate the host.
    Shutdown,
}

/// Message from the host to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostOutput {
    Output { kind: OutputKind, text: String },
    /// The host is now showing a different prompt.
    Prompt(String),
    /// The host's working directory changed.
    DirectoryChanged,
    /// The host process is gone.
    Exited,
}

/// Session side of a host channel.
pub struct HostChannel {
    id: Uuid,
    input_tx: mpsc::UnboundedSender<HostInput>,
    output_rx: mpsc::UnboundedReceiver<HostOutput>,
    ready_rx: watch::Receiver<bool>,
}

/// Host side of a host channel.
pub struct HostEndpoint {
    id: Uuid,
    input_rx: mpsc::UnboundedReceiver<HostInput>,
    outlet: HostOutlet,
}

/// Cloneable writer for the host side.
#[derive(Clone)]
pub struct HostOutlet {
    output_tx: mpsc::UnboundedSender<HostOutput>,
    ready_tx: Arc<watch::Sender<bool>>,
}

/// Cloneable writer for the session side.
#[derive(Clone)]
pub struct HostSender {
    id: Uuid,
    input_tx: mpsc::UnboundedSender<HostInput>,
}

impl HostChannel {
    /// Create a connected channel/endpoint pair.
    #[must_use]
    pub fn pair() -> (Self, HostEndpoint) {
        let id = Uuid::new_v4();
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = watch::channel(false);

        let channel = Self {
            id,
            input_tx,
            output_rx,
            ready_rx,
        };
        let endpoint = HostEndpoint {
            id,
            input_rx,
            outlet: HostOutlet {
                output_tx,
                ready_tx: Arc::new(ready_tx),
            },
        };
        (channel, endpoint)
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Wait until the host reports it is ready to accept requests.
    ///
    /// # Errors
    /// Returns `TransportError::Unavailable` if the host side goes away first.
    pub async fn wait_ready(&mut self) -> Result<(), TransportError> {
        self.ready_rx
            .wait_for(|ready| *ready)
            .await
            .map(|_| ())
            .map_err(|_| TransportError::Unavailable("host closed before becoming ready".to_string()))
    }

    /// Split into a cloneable sender and the output receiver.
    #[must_use]
    pub fn into_parts(self) -> (HostSender, mpsc::UnboundedReceiver<HostOutput>) {
        let sender = HostSender {
            id: self.id,
            input_tx: self.input_tx,
        };
        (sender, self.output_rx)
    }
}

impl HostSender {
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Send a message to the host.
    ///
    /// # Errors
    /// Returns `TransportError::Unavailable` if the host side is gone.
    pub fn send(&self, input: HostInput) -> Result<(), TransportError> {
        self.input_tx
            .send(input)
            .map_err(|_| TransportError::Unavailable("host channel closed".to_string()))
    }
}

impl HostEndpoint {
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// A writer that can be moved into other tasks.
    #[must_use]
    pub fn outlet(&self) -> HostOutlet {
        self.outlet.clone()
    }

    /// Receive the next message from the session.
    pub async fn recv(&mut self) -> Option<HostInput> {
        self.input_rx.recv().await
    }

    /// Receive without waiting.
    pub fn try_recv(&mut self) -> Option<HostInput> {
        self.input_rx.try_recv().ok()
    }

    pub fn mark_ready(&self) {
        self.outlet.mark_ready();
    }

    pub fn output(&self, kind: OutputKind, text: impl Into<String>) -> bool {
        self.outlet.output(kind, text)
    }

    pub fn prompt(&self, prompt: impl Into<String>) -> bool {
        self.outlet.prompt(prompt)
    }

    pub fn directory_changed(&self) -> bool {
        self.outlet.directory_changed()
    }

    /// Report that the host has exited.
    pub fn exit(&self) -> bool {
        self.outlet.exit()
    }
}

impl HostOutlet {
    pub fn mark_ready(&self) {
        self.ready_tx.send_replace(true);
    }

    /// Returns false if the session side is gone.
    pub fn output(&self, kind: OutputKind, text: impl Into<String>) -> bool {
        self.send(HostOutput::Output {
            kind,
            text: text.into(),
        })
    }

    pub fn prompt(&self, prompt: impl Into<String>) -> bool {
        self.send(HostOutput::Prompt(prompt.into()))
    }

    pub fn directory_changed(&self) -> bool {
        self.send(HostOutput::DirectoryChanged)
    }

    pub fn exit(&self) -> bool {
        self.send(HostOutput::Exited)
    }

    fn send(&self, msg: HostOutput) -> bool {
        self.output_tx.send(msg).is_ok()
    }
}
