//! API key lookup: a JSON key file first, then the process environment

use crate::error::KeyError;
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

/// Key store backed by a `keys.json`-style map with environment fallback
#[derive(Debug, Clone, Default)]
pub struct KeyStore {
    keys: HashMap<String, String>,
}

impl KeyStore {
    pub fn new(keys: HashMap<String, String>) -> Self {
        Self { keys }
    }

    /// Load keys from a JSON object file; a missing or unreadable file yields an empty store
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let keys = std::fs::read_to_string(path)
            .ok()
            .and_then(|raw| serde_json::from_str::<HashMap<String, String>>(&raw).ok());
        match keys {
            Some(keys) => Self { keys },
            None => {
                warn!(path = %path.display(), "keys file not found, defaulting to environment variables");
                Self::default()
            }
        }
    }

    /// Resolve a key from the file, falling back to the environment when absent or blank
    pub fn get(&self, name: &str) -> Result<String, KeyError> {
        self.get_with(name, |var| std::env::var(var).ok())
    }

    /// Resolve a key using an arbitrary environment lookup
    pub fn get_with<F>(&self, name: &str, env: F) -> Result<String, KeyError>
    where
        F: Fn(&str) -> Option<String>,
    {
        match self.keys.get(name) {
            Some(key) if !key.trim().is_empty() => Ok(key.clone()),
            file_value => env(name)
                .or_else(|| file_value.cloned())
                .ok_or_else(|| KeyError::Missing(name.to_string())),
        }
    }

    /// Whether the key resolves to anything
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_ok()
    }

    /// Snapshot of the named keys for publication; unresolved keys map to an empty string
    pub fn published(&self, names: &[String]) -> HashMap<String, String> {
        names
            .iter()
            .map(|name| (name.clone(), self.get(name).unwrap_or_default()))
            .collect()
    }
}
