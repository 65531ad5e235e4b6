//! # sermon
//!
//! Interactive serial console. The library half wires the workspace crates
//! together for the `sermon` binary: logging setup, the preference store
//! location, and the line-oriented console loop.

mod console;

pub use console::{run_console, ConsoleCommand, ConsoleOutcome};

use sermon_core::{JsonFilePreferences, MemoryPreferences, Preferences};
use sermon_monitor::monitor::{
    MonitorDisplay, PlotterDisplay, TextDisplay, DEFAULT_SCROLLBACK_LINES,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` wins over `default_level`.
/// Library crates log through the `log` facade, which is bridged in.
/// Returns `false` if a subscriber was already installed.
pub fn init_logging(default_level: &str) -> bool {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .is_ok()
}

/// `<config dir>/sermon/preferences.json`, if the platform has a config
/// directory.
pub fn preferences_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("sermon").join("preferences.json"))
}

/// Display for a console run. Text mode mirrors to `mirror` and keeps a
/// bounded scrollback; plot mode collects sample rows.
pub fn console_display(plot: bool, mirror: Box<dyn Write + Send>) -> Box<dyn MonitorDisplay> {
    if plot {
        Box::new(PlotterDisplay::default())
    } else {
        Box::new(TextDisplay::new(Some(DEFAULT_SCROLLBACK_LINES)).with_mirror(mirror))
    }
}

/// Where preferences live for this run.
pub enum PreferenceStore {
    File(Arc<JsonFilePreferences>),
    Memory(Arc<MemoryPreferences>),
}

impl PreferenceStore {
    /// Load the file at `path`, or fall back to an in-memory store when
    /// there is no path or the file cannot be read.
    pub fn open(path: Option<PathBuf>) -> Self {
        let Some(path) = path else {
            log::warn!("No config directory, preferences will not be saved");
            return Self::Memory(Arc::new(MemoryPreferences::new()));
        };
        match JsonFilePreferences::open(&path) {
            Ok(store) => {
                tracing::debug!(path = %path.display(), "preferences loaded");
                Self::File(Arc::new(store))
            }
            Err(e) => {
                log::warn!("{}; using defaults for this session", e);
                Self::Memory(Arc::new(MemoryPreferences::new()))
            }
        }
    }

    pub fn handle(&self) -> Arc<dyn Preferences> {
        match self {
            Self::File(store) => store.clone(),
            Self::Memory(store) => store.clone(),
        }
    }

    /// Persist to disk. In-memory stores have nothing to do.
    pub fn save(&self) {
        if let Self::File(store) = self {
            if let Err(e) = store.save() {
                log::error!("Failed to save preferences: {}", e);
            }
        }
    }
}
