//! Bounded command history with shell-style navigation.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub const DEFAULT_CAPACITY: usize = 100;

/// What to do when a command equals the one just before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DuplicatePolicy {
    /// Record every submission.
    #[default]
    KeepAll,
    /// Skip a command identical to the newest entry.
    CollapseConsecutive,
}

#[derive(Debug, Clone)]
pub struct CommandHistory {
    entries: VecDeque<String>,
    capacity: usize,
    policy: DuplicatePolicy,
    /// Index of the entry being shown; `None` while editing a fresh line.
    cursor: Option<usize>,
    /// The unsubmitted line that was being edited when browsing started.
    pending: Option<String>,
}

impl Default for CommandHistory {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DuplicatePolicy::default())
    }
}

impl CommandHistory {
    /// A zero capacity is treated as one.
    pub fn new(capacity: usize, policy: DuplicatePolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            policy,
            cursor: None,
            pending: None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// Oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    /// Record a submitted command and end any browsing. Empty input is
    /// ignored.
    pub fn add_command(&mut self, command: &str) {
        if command.is_empty() {
            return;
        }
        self.cursor = None;
        self.pending = None;

        if self.policy == DuplicatePolicy::CollapseConsecutive
            && self.entries.back().map(String::as_str) == Some(command)
        {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(command.to_string());
    }

    pub fn has_previous(&self) -> bool {
        match self.cursor {
            None => !self.entries.is_empty(),
            Some(i) => i > 0,
        }
    }

    /// Step to the next older entry. The first step remembers `pending` so
    /// [`reset_history_location`](Self::reset_history_location) can give it
    /// back.
    pub fn get_previous(&mut self, pending: &str) -> Option<String> {
        if !self.has_previous() {
            return None;
        }
        let next = match self.cursor {
            None => {
                self.pending = Some(pending.to_string());
                self.entries.len() - 1
            }
            Some(i) => i - 1,
        };
        self.cursor = Some(next);
        self.entries.get(next).cloned()
    }

    pub fn has_next(&self) -> bool {
        matches!(self.cursor, Some(i) if i + 1 < self.entries.len())
    }

    /// Step to the next newer entry. Stops at the newest one.
    pub fn get_next(&mut self) -> Option<String> {
        if !self.has_next() {
            return None;
        }
        let next = self.cursor.map_or(0, |i| i + 1);
        self.cursor = Some(next);
        self.entries.get(next).cloned()
    }

    /// Stop browsing and return the line that was being edited before.
    pub fn reset_history_location(&mut self) -> String {
        self.cursor = None;
        self.pending.take().unwrap_or_default()
    }
}
