//! Host launch options.

use std::{collections::HashMap, path::PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Options passed to `start_host`.
///
/// Opaque to this crate: transports interpret the fields, and arbitrary
/// front-end specific options travel in `metadata`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartupInfo {
    /// Display name of the host, used in logs and by brokers.
    pub name: String,

    /// Initial working directory of the host.
    pub working_dir: PathBuf,

    /// Extra command line arguments for the interpreter.
    #[serde(default)]
    pub args: Vec<String>,

    /// Arbitrary metadata for app-specific needs.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl StartupInfo {
    /// Create startup options with a name and working directory.
    #[must_use]
    pub fn new(name: impl Into<String>, working_dir: PathBuf) -> Self {
        Self {
            name: name.into(),
            working_dir,
            args: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Append interpreter arguments.
    #[must_use]
    pub fn with_args<I>(mut self, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Get a metadata value by key.
    #[must_use]
    pub fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Set a metadata value.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }
}
