//! Core abstractions for driving an interpreter host.
//!
//! This crate provides the fundamental building blocks:
//! - `Authority` - Broker identity used as the credential key
//! - `Credentials` - Username/password pair with a trust flag
//! - `HostChannel` - Opaque bidirectional channel to a running host
//! - `EventHub` - Ordered observer fan-out plus broadcast and output history
//! - `HostSettings` - TOML-backed configuration
//! - Transport, prompt and connector traits

pub mod authority;
pub mod channel;
pub mod config;
pub mod context;
pub mod credentials;
pub mod error;
pub mod events;
pub mod process;
pub mod traits;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use authority::Authority;
pub use channel::{HostChannel, HostEndpoint, HostInput, HostOutlet, HostOutput, HostSender, OutputKind};
pub use config::HostSettings;
pub use context::StartupInfo;
pub use credentials::Credentials;
pub use error::{HostError, TransportError};
pub use events::{EventHub, SessionEvent, SessionObserver};
pub use process::ProcessTransport;
pub use traits::{CredentialPrompt, HostConnector, HostTransport, PromptOutcome};
