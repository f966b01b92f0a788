//! User-agent affinity between intermediaries and browser signatures.
//!
//! Some proxy providers flag a single exit IP that presents many different
//! browsers. The affinity map pins one user agent per intermediary host so
//! that host always looks like the same client. Pins can be persisted to a
//! JSON file and reloaded on the next run.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AffinityError {
    #[error("I/O error on {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("affinity cache JSON invalid at {path:?}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Thread-safe host -> user-agent map.
#[derive(Debug, Default)]
pub struct UserAgentAffinity {
    pins: RwLock<HashMap<String, String>>,
}

impl UserAgentAffinity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(pins: HashMap<String, String>) -> Self {
        Self {
            pins: RwLock::new(pins),
        }
    }

    /// Load pins from `path`. A missing file yields an empty map.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AffinityError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                log::debug!("no user-agent affinity cache at {}", path.display());
                return Ok(Self::new());
            }
            Err(err) => {
                return Err(AffinityError::Io {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        let pins: HashMap<String, String> =
            serde_json::from_str(&contents).map_err(|err| AffinityError::Json {
                path: path.to_path_buf(),
                source: err,
            })?;
        log::debug!("loaded {} user-agent pins from {}", pins.len(), path.display());
        Ok(Self::from_map(pins))
    }

    /// Write all pins to `path` as a JSON object.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), AffinityError> {
        let path = path.as_ref();
        let snapshot = self.snapshot();
        let json = serde_json::to_string_pretty(&snapshot).map_err(|err| AffinityError::Json {
            path: path.to_path_buf(),
            source: err,
        })?;
        fs::write(path, json).map_err(|err| AffinityError::Io {
            path: path.to_path_buf(),
            source: err,
        })
    }

    pub fn get(&self, host: &str) -> Option<String> {
        self.read().get(host).cloned()
    }

    pub fn pin(&self, host: impl Into<String>, user_agent: impl Into<String>) {
        self.write().insert(host.into(), user_agent.into());
    }

    pub fn unpin(&self, host: &str) -> Option<String> {
        self.write().remove(host)
    }

    pub fn contains(&self, host: &str) -> bool {
        self.read().contains_key(host)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn snapshot(&self) -> HashMap<String, String> {
        self.read().clone()
    }

    // Writers only perform single map operations; poisoning is ignored.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, String>> {
        self.pins.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, String>> {
        self.pins.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
