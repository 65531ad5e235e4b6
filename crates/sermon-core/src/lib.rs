//! # sermon – Core
//!
//! Shared infrastructure for the serial console crates:
//!
//! - **Preferences** – the key/value collaborator every component reads its
//!   persisted defaults through, plus in-memory and JSON-file stores
//! - **Keys** – the well-known preference keys used across the workspace

pub mod keys;
pub mod preferences;

pub use preferences::{
    JsonFilePreferences, MemoryPreferences, Preferences, PreferencesError, PrefsResult,
};
