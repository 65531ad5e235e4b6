//! Key/value preferences collaborator.
//!
//! Components never reach into global state for their defaults; they are
//! handed an `Arc<dyn Preferences>` and read/write string values through it.
//! Typed accessors parse on read and fall back to the supplied default when
//! a value is missing or malformed.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, thiserror::Error)]
pub enum PreferencesError {
    #[error("Failed to access preferences file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed preferences file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type PrefsResult<T> = Result<T, PreferencesError>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// String key/value store shared by the console components.
pub trait Preferences: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str);

    fn remove(&self, key: &str);

    fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Value for `key`, or `default` when missing or empty.
    fn get_non_empty(&self, key: &str, default: &str) -> String {
        match self.get(key) {
            Some(v) if !v.trim().is_empty() => v,
            _ => default.to_string(),
        }
    }

    fn get_u32(&self, key: &str, default: u32) -> u32 {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn get_f32(&self, key: &str, default: f32) -> f32 {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Accepts `true`/`false` in any case; anything else yields `default`.
    fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key).map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "true" => true,
            Some(v) if v == "false" => false,
            _ => default,
        }
    }

    fn set_bool(&self, key: &str, value: bool) {
        self.set(key, if value { "true" } else { "false" });
    }
}

fn read_map(map: &RwLock<BTreeMap<String, String>>) -> RwLockReadGuard<'_, BTreeMap<String, String>> {
    map.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_map(
    map: &RwLock<BTreeMap<String, String>>,
) -> RwLockWriteGuard<'_, BTreeMap<String, String>> {
    map.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  In-memory store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Volatile store, used by tests and as the CLI fallback when no config
/// directory is available.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: RwLock<BTreeMap<String, String>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: RwLock::new(
                values
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }
}

impl Preferences for MemoryPreferences {
    fn get(&self, key: &str) -> Option<String> {
        read_map(&self.values).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        write_map(&self.values).insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        write_map(&self.values).remove(key);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  JSON file store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Preferences persisted as a flat, pretty-printed JSON object of strings.
///
/// Writes only touch memory; call [`JsonFilePreferences::save`] to persist.
#[derive(Debug)]
pub struct JsonFilePreferences {
    path: PathBuf,
    values: RwLock<BTreeMap<String, String>>,
}

impl JsonFilePreferences {
    /// Create a store bound to `path` without reading it.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            values: RwLock::new(BTreeMap::new()),
        }
    }

    /// Create a store and load `path` if it exists.
    pub fn open(path: impl Into<PathBuf>) -> PrefsResult<Self> {
        let store = Self::new(path);
        store.load()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the in-memory values with the file contents. A missing file
    /// leaves the store empty.
    pub fn load(&self) -> PrefsResult<()> {
        if !self.path.exists() {
            log::debug!("Preferences file {} not found, starting empty", self.path.display());
            write_map(&self.values).clear();
            return Ok(());
        }
        let raw = fs::read_to_string(&self.path).map_err(|source| PreferencesError::Io {
            path: self.path.clone(),
            source,
        })?;
        let parsed: BTreeMap<String, String> = if raw.trim().is_empty() {
            BTreeMap::new()
        } else {
            serde_json::from_str(&raw).map_err(|source| PreferencesError::Json {
                path: self.path.clone(),
                source,
            })?
        };
        log::debug!("Loaded {} preferences from {}", parsed.len(), self.path.display());
        *write_map(&self.values) = parsed;
        Ok(())
    }

    /// Write all values to disk, creating parent directories as needed.
    pub fn save(&self) -> PrefsResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| PreferencesError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }
        let json = serde_json::to_string_pretty(&*read_map(&self.values)).map_err(|source| {
            PreferencesError::Json {
                path: self.path.clone(),
                source,
            }
        })?;
        fs::write(&self.path, json).map_err(|source| PreferencesError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl Preferences for JsonFilePreferences {
    fn get(&self, key: &str) -> Option<String> {
        read_map(&self.values).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        write_map(&self.values).insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        write_map(&self.values).remove(key);
    }
}
