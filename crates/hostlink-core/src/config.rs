//! Host connection settings.

use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Authority, HostError, events::DEFAULT_HISTORY_BYTES};

/// Maximum input length advertised with every request.
pub const DEFAULT_MAX_INPUT_LENGTH: usize = 4096;

/// Prompt shown before the host reports its own.
pub const DEFAULT_PROMPT: &str = ">";

/// Default `start_host` timeout in milliseconds.
pub const DEFAULT_START_TIMEOUT_MS: u64 = 3000;

const BROKER_SCHEMES: &[&str] = &["http", "https", "ws", "wss"];

/// Local interpreter launch settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterSettings {
    /// Executable name or path, resolved against PATH.
    pub executable: String,
    /// Arguments passed before the per-session startup arguments.
    pub args: Vec<String>,
}

impl Default for InterpreterSettings {
    fn default() -> Self {
        Self {
            executable: "R".to_string(),
            args: vec!["--quiet".to_string(), "--no-save".to_string()],
        }
    }
}

/// Settings for connectors and sessions.
///
/// Every field has a default, so an empty TOML document is valid and
/// describes a local host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    /// Remote broker address. `None` means a local host.
    pub broker_uri: Option<Url>,
    pub interpreter: InterpreterSettings,
    pub start_timeout_ms: u64,
    pub max_input_length: usize,
    pub prompt: String,
    /// Bound on credential re-prompts. `None` keeps prompting until the user aborts.
    pub max_auth_attempts: Option<u32>,
    pub output_history_bytes: usize,
    /// Consult the OS keychain for saved broker credentials.
    pub use_keychain: bool,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            broker_uri: None,
            interpreter: InterpreterSettings::default(),
            start_timeout_ms: DEFAULT_START_TIMEOUT_MS,
            max_input_length: DEFAULT_MAX_INPUT_LENGTH,
            prompt: DEFAULT_PROMPT.to_string(),
            max_auth_attempts: None,
            output_history_bytes: DEFAULT_HISTORY_BYTES,
            use_keychain: true,
        }
    }
}

impl HostSettings {
    /// Load settings from a TOML file.
    ///
    /// # Errors
    /// Returns `HostError::Config` if the file cannot be read, is not valid
    /// TOML, or fails validation.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, HostError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|e| HostError::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    /// Parse settings from a TOML string.
    ///
    /// # Errors
    /// Returns `HostError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self, HostError> {
        let settings: Self =
            toml::from_str(raw).map_err(|e| HostError::Config(format!("invalid settings: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check invariants that serde cannot express.
    ///
    /// # Errors
    /// Returns `HostError::Config` describing the first violation.
    pub fn validate(&self) -> Result<(), HostError> {
        if self.start_timeout_ms == 0 {
            return Err(HostError::Config("start_timeout_ms must be greater than zero".into()));
        }
        if self.max_input_length == 0 {
            return Err(HostError::Config("max_input_length must be greater than zero".into()));
        }
        if self.max_auth_attempts == Some(0) {
            return Err(HostError::Config("max_auth_attempts must be greater than zero".into()));
        }
        if let Some(ref uri) = self.broker_uri {
            if !BROKER_SCHEMES.contains(&uri.scheme()) {
                return Err(HostError::Config(format!(
                    "unsupported broker scheme `{}`",
                    uri.scheme()
                )));
            }
            Authority::from_url(uri)?;
        } else if self.interpreter.executable.trim().is_empty() {
            return Err(HostError::Config("interpreter.executable must not be empty".into()));
        }
        Ok(())
    }

    #[must_use]
    pub const fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    /// Authority of the configured host; the local pseudo-authority when no
    /// broker is set.
    ///
    /// # Errors
    /// Returns `HostError::Config` if the broker address has no host or port.
    pub fn authority(&self) -> Result<Authority, HostError> {
        self.broker_uri
            .as_ref()
            .map_or_else(|| Ok(Authority::local()), Authority::from_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_local_defaults() {
        let settings = HostSettings::from_toml_str("").unwrap();
        assert_eq!(settings, HostSettings::default());
        assert!(settings.authority().unwrap().is_local());
        assert_eq!(settings.start_timeout(), Duration::from_secs(3));
        assert_eq!(settings.max_input_length, 4096);
        assert_eq!(settings.prompt, ">");
    }

    #[test]
    fn test_remote_settings() {
        let settings = HostSettings::from_toml_str(
            r#"
            broker_uri = "https://broker.example.com:5444/#main"
            max_auth_attempts = 3
            use_keychain = false

            [interpreter]
            executable = "/opt/R/bin/R"
            "#,
        )
        .unwrap();

        let authority = settings.authority().unwrap();
        assert_eq!(authority.to_string(), "https://broker.example.com:5444/");
        assert_eq!(settings.max_auth_attempts, Some(3));
        assert!(!settings.use_keychain);
        assert_eq!(settings.interpreter.executable, "/opt/R/bin/R");
        assert_eq!(settings.interpreter.args, vec!["--quiet", "--no-save"]);
    }

    #[test]
    fn test_rejects_invalid_values() {
        for raw in [
            "start_timeout_ms = 0",
            "max_input_length = 0",
            "max_auth_attempts = 0",
            r#"broker_uri = "ftp://broker.example.com""#,
            r#"broker_uri = "not a url""#,
            "start_timeout_ms = \"soon\"",
        ] {
            let err = HostSettings::from_toml_str(raw).unwrap_err();
            assert!(matches!(err, HostError::Config(_)), "{raw} should fail");
        }
    }

    #[test]
    fn test_load_missing_file() {
        let err = HostSettings::load_from_path("/nonexistent/hostlink.toml").unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }
}
