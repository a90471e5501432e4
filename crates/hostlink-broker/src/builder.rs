//! Settings-driven connector construction.

use std::sync::Arc;

use hostlink_core::{
    CredentialPrompt, HostConnector, HostError, HostSettings, HostTransport, ProcessTransport,
};

use crate::{AuthorityRegistry, LocalHostConnector, RemoteHostConnector};

/// Builder for connectors.
///
/// Without a broker address the builder produces a local connector, using
/// the configured interpreter unless a transport is supplied. With a broker
/// address it needs a transport and a prompt.
pub struct ConnectorBuilder<'r> {
    settings: HostSettings,
    transport: Option<Arc<dyn HostTransport>>,
    prompt: Option<Arc<dyn CredentialPrompt>>,
    registry: Option<&'r AuthorityRegistry>,
}

impl<'r> ConnectorBuilder<'r> {
    /// Start from settings.
    #[must_use]
    pub fn from_settings(settings: &HostSettings) -> Self {
        Self {
            settings: settings.clone(),
            transport: None,
            prompt: None,
            registry: None,
        }
    }

    /// Transport used to reach the host.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn HostTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Credential prompt for remote hosts.
    #[must_use]
    pub fn prompt(mut self, prompt: Arc<dyn CredentialPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    /// Registry for shared per-authority state; defaults to the global one.
    #[must_use]
    pub const fn registry(mut self, registry: &'r AuthorityRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Build the connector.
    ///
    /// # Errors
    /// Returns `HostError::Config` if the settings are invalid or a remote
    /// connector lacks a transport or prompt.
    pub fn build(self) -> Result<Arc<dyn HostConnector>, HostError> {
        self.settings.validate()?;

        let Some(ref broker_uri) = self.settings.broker_uri else {
            let transport = self.transport.unwrap_or_else(|| {
                Arc::new(ProcessTransport::from_settings(&self.settings.interpreter))
            });
            return Ok(Arc::new(LocalHostConnector::new(transport)));
        };

        let transport = self
            .transport
            .ok_or_else(|| HostError::Config("remote host requires a broker transport".into()))?;
        let prompt = self
            .prompt
            .ok_or_else(|| HostError::Config("remote host requires a credential prompt".into()))?;
        let prompt = wrap_saved(prompt, self.settings.use_keychain);
        let registry = self.registry.unwrap_or_else(|| AuthorityRegistry::global());

        let connector = RemoteHostConnector::with_registry(broker_uri, transport, prompt, registry)?
            .with_max_auth_attempts(self.settings.max_auth_attempts);
        Ok(Arc::new(connector))
    }
}

#[cfg(feature = "keychain")]
fn wrap_saved(prompt: Arc<dyn CredentialPrompt>, use_keychain: bool) -> Arc<dyn CredentialPrompt> {
    use crate::{KeyringCredentials, SavedCredentialPrompt};

    if use_keychain {
        Arc::new(SavedCredentialPrompt::new(prompt, KeyringCredentials::default()))
    } else {
        prompt
    }
}

#[cfg(not(feature = "keychain"))]
fn wrap_saved(prompt: Arc<dyn CredentialPrompt>, use_keychain: bool) -> Arc<dyn CredentialPrompt> {
    if use_keychain {
        tracing::debug!("Keychain support not compiled in; prompting every time");
    }
    prompt
}

#[cfg(test)]
mod tests {
    use hostlink_core::testing::{ScriptedPrompt, ScriptedTransport};

    use super::*;

    fn remote_settings() -> HostSettings {
        HostSettings::from_toml_str(
            r#"
            broker_uri = "https://broker.example.com:5444"
            use_keychain = false
            max_auth_attempts = 1
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_local_by_default() {
        let connector = ConnectorBuilder::from_settings(&HostSettings::default())
            .build()
            .unwrap();
        assert!(!connector.is_remote());
    }

    #[test]
    fn test_remote_requires_transport_and_prompt() {
        let registry = AuthorityRegistry::new();
        let err = ConnectorBuilder::from_settings(&remote_settings())
            .registry(&registry)
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, HostError::Config(_)));

        let err = ConnectorBuilder::from_settings(&remote_settings())
            .transport(Arc::new(ScriptedTransport::open()))
            .registry(&registry)
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("prompt"));
    }

    #[tokio::test]
    async fn test_remote_honours_attempt_limit() {
        let registry = AuthorityRegistry::new();
        let connector = ConnectorBuilder::from_settings(&remote_settings())
            .transport(Arc::new(ScriptedTransport::accepting("alice", "right")))
            .prompt(Arc::new(ScriptedPrompt::entering("alice", "wrong", 5)))
            .registry(&registry)
            .build()
            .unwrap();

        assert!(connector.is_remote());
        assert_eq!(connector.authority().to_string(), "https://broker.example.com:5444/");

        let err = connector
            .connect(&hostlink_core::StartupInfo::default())
            .await
            .err()
            .unwrap();
        assert!(err.is_authentication_failure());
    }
}
