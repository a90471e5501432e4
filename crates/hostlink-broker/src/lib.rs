//! Host connectors for local and brokered interpreters.
//!
//! Provides:
//! - `LocalHostConnector` / `RemoteHostConnector` - the two connector variants
//! - `CredentialGate` / `CredentialStore` - per-authority single-flight prompting
//! - `BrokerConnection` - retry-with-new-credentials loop
//! - `SavedCredentialPrompt` - platform credential cache in front of a prompt
//! - `ConnectorBuilder` - settings-driven construction

pub mod builder;
pub mod connection;
pub mod connector;
pub mod gate;
pub mod prompt;
pub mod registry;
pub mod store;

pub use builder::ConnectorBuilder;
pub use connection::BrokerConnection;
pub use connector::{LocalHostConnector, RemoteHostConnector};
pub use gate::{CredentialGate, GatePermit};
pub use prompt::{FixedCredentialPrompt, MemorySavedCredentials, SavedCredentialPrompt, SavedCredentials};
pub use registry::{AuthorityRegistry, AuthorityState};
pub use store::CredentialStore;

#[cfg(feature = "keychain")]
pub use prompt::KeyringCredentials;
