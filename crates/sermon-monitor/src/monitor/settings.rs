//! Monitor settings and window placement.

use crate::monitor::aggregator::DEFAULT_DRAIN_PERIOD;
use crate::monitor::history::{DuplicatePolicy, DEFAULT_CAPACITY};
use crate::monitor::presence::DEFAULT_POLL_PERIOD;
use serde::{Deserialize, Serialize};
use sermon_core::{keys, Preferences};
use sermon_serial::serial::{LineEnding, TextEncoding};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Placement
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Window bounds, persisted as `x,y,width,height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Placement {
    /// Whether the window lies inside a screen of the given size, so it is
    /// not restored somewhere unreachable after a monitor change.
    pub fn fits_within(&self, screen_width: u32, screen_height: u32) -> bool {
        i64::from(self.x) + i64::from(self.width) <= i64::from(screen_width)
            && i64::from(self.y) + i64::from(self.height) <= i64::from(screen_height)
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.x, self.y, self.width, self.height)
    }
}

impl FromStr for Placement {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        let [x, y, w, h] = parts.as_slice() else {
            return Err(format!("expected x,y,width,height, got '{s}'"));
        };
        let num = |v: &str| v.parse::<i64>().map_err(|e| format!("bad placement field '{v}': {e}"));
        let (x, y, w, h) = (num(*x)?, num(*y)?, num(*w)?, num(*h)?);
        Ok(Self {
            x: i32::try_from(x).map_err(|e| e.to_string())?,
            y: i32::try_from(y).map_err(|e| e.to_string())?,
            width: u32::try_from(w).map_err(|e| e.to_string())?,
            height: u32::try_from(h).map_err(|e| e.to_string())?,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Settings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSettings {
    /// Display refresh period.
    #[serde(default = "default_drain_ms")]
    pub drain_period_ms: u64,

    /// Presence poll period.
    #[serde(default = "default_poll_ms")]
    pub poll_period_ms: u64,

    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,

    /// Send keys as they are typed instead of whole lines.
    #[serde(default)]
    pub unbuffered: bool,

    #[serde(default)]
    pub line_ending: LineEnding,

    #[serde(default)]
    pub encoding: TextEncoding,

    /// Clear the display when the monitor closes.
    #[serde(default = "default_true")]
    pub forget_on_close: bool,

    #[serde(default)]
    pub placement: Option<Placement>,
}

fn default_drain_ms() -> u64 {
    DEFAULT_DRAIN_PERIOD.as_millis() as u64
}

fn default_poll_ms() -> u64 {
    DEFAULT_POLL_PERIOD.as_millis() as u64
}

fn default_history_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_true() -> bool {
    true
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            drain_period_ms: default_drain_ms(),
            poll_period_ms: default_poll_ms(),
            history_capacity: DEFAULT_CAPACITY,
            duplicate_policy: DuplicatePolicy::default(),
            unbuffered: false,
            line_ending: LineEnding::default(),
            encoding: TextEncoding::default(),
            forget_on_close: true,
            placement: None,
        }
    }
}

impl MonitorSettings {
    /// Defaults overlaid with the persisted monitor preferences.
    pub fn from_preferences(prefs: &dyn Preferences) -> Self {
        let defaults = Self::default();
        let line_ending = prefs
            .get(keys::SERIAL_LINE_ENDING)
            .and_then(|v| {
                // Older stores kept the picker index instead of the key.
                v.trim()
                    .parse::<usize>()
                    .ok()
                    .and_then(LineEnding::from_index)
                    .or_else(|| LineEnding::from_key(&v))
            })
            .unwrap_or(defaults.line_ending);
        let placement = prefs
            .get(keys::LAST_SERIAL_LOCATION)
            .and_then(|v| match v.parse::<Placement>() {
                Ok(p) => Some(p),
                Err(e) => {
                    log::warn!("Ignoring stored monitor placement: {}", e);
                    None
                }
            });
        let duplicate_policy = if prefs.get_bool(keys::SERIAL_HISTORY_DEDUPE, false) {
            DuplicatePolicy::CollapseConsecutive
        } else {
            DuplicatePolicy::KeepAll
        };
        let millis = |key: &str, default: u64| {
            prefs
                .get(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };
        Self {
            drain_period_ms: millis(keys::SERIAL_REFRESH_MS, defaults.drain_period_ms),
            poll_period_ms: millis(keys::SERIAL_POLL_MS, defaults.poll_period_ms),
            history_capacity: prefs.get_u32(keys::SERIAL_HISTORY_SIZE, DEFAULT_CAPACITY as u32) as usize,
            duplicate_policy,
            unbuffered: prefs.get_bool(keys::SERIAL_UNBUFFERED, false),
            forget_on_close: prefs.get_bool(keys::SERIAL_FORGET_ON_CLOSE, true),
            line_ending,
            placement,
            ..defaults
        }
    }

    pub fn drain_period(&self) -> Duration {
        Duration::from_millis(self.drain_period_ms.max(1))
    }

    pub fn poll_period(&self) -> Duration {
        Duration::from_millis(self.poll_period_ms.max(1))
    }
}
