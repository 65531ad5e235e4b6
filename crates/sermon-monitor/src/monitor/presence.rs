//! Presence polling.
//!
//! Boards routinely drop off the bus while they reset or take a firmware
//! upload. Instead of treating that as a failure, the monitor polls
//! discovery once a second: a vanished device suspends the session, and the
//! session is reopened with the same configuration once the device is back
//! and nobody else (an uploader) has claimed the port.

use crate::monitor::task::PeriodicTask;
use sermon_serial::serial::{DeviceDiscovery, PortSession, SerialResult, SessionState};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_POLL_PERIOD: Duration = Duration::from_secs(1);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Collaborators
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Something else holding the port exclusively, e.g. a firmware upload.
pub trait ExclusiveOperation: Send + Sync {
    fn is_exclusive_operation_in_progress(&self) -> bool;
}

/// Atomic flag upload tooling flips around its critical section.
#[derive(Debug, Default)]
pub struct ExclusiveFlag {
    active: AtomicBool,
}

impl ExclusiveFlag {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }
}

impl ExclusiveOperation for ExclusiveFlag {
    fn is_exclusive_operation_in_progress(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// What the poller drives. Implemented by a bare session and by the full
/// monitor, which also toggles its display.
#[async_trait::async_trait]
pub trait PresenceTarget: Send + Sync {
    fn address(&self) -> String;

    fn state(&self) -> SessionState;

    /// Extra veto on resuming, e.g. the user paused the monitor.
    fn resume_blocked(&self) -> bool {
        false
    }

    async fn suspend(&self) -> SerialResult<bool>;

    async fn resume(&self) -> SerialResult<bool>;
}

#[async_trait::async_trait]
impl PresenceTarget for PortSession {
    fn address(&self) -> String {
        self.config().address
    }

    fn state(&self) -> SessionState {
        PortSession::state(self)
    }

    async fn suspend(&self) -> SerialResult<bool> {
        PortSession::suspend(self).await
    }

    async fn resume(&self) -> SerialResult<bool> {
        PortSession::resume(self).await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Monitor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outcome of one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PresenceAction {
    None,
    Suspended,
    Resumed,
    /// Device is back but reopening failed; retried next tick.
    ResumeFailed,
}

pub struct PresenceMonitor {
    target: Arc<dyn PresenceTarget>,
    discovery: Arc<dyn DeviceDiscovery>,
    exclusive: Arc<dyn ExclusiveOperation>,
    in_flight: AtomicBool,
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl PresenceMonitor {
    pub fn new(
        target: Arc<dyn PresenceTarget>,
        discovery: Arc<dyn DeviceDiscovery>,
        exclusive: Arc<dyn ExclusiveOperation>,
    ) -> Arc<Self> {
        Arc::new(Self {
            target,
            discovery,
            exclusive,
            in_flight: AtomicBool::new(false),
        })
    }

    /// One poll. A tick that starts while another is still running does
    /// nothing.
    pub async fn tick(&self) -> PresenceAction {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            log::trace!("Presence tick skipped, previous tick still running");
            return PresenceAction::None;
        }
        let _in_flight = InFlight(&self.in_flight);

        let address = self.target.address();
        let present = self.discovery.find(&address).await.is_some();

        match (present, self.target.state()) {
            (false, SessionState::Open) => match self.target.suspend().await {
                Ok(true) => {
                    log::info!("[{}] Device gone, session suspended", address);
                    PresenceAction::Suspended
                }
                Ok(false) => PresenceAction::None,
                Err(e) => {
                    log::debug!("[{}] Suspend skipped: {}", address, e);
                    PresenceAction::None
                }
            },
            (true, SessionState::Suspended) => {
                if self.exclusive.is_exclusive_operation_in_progress()
                    || self.target.resume_blocked()
                {
                    return PresenceAction::None;
                }
                match self.target.resume().await {
                    Ok(true) => {
                        log::info!("[{}] Device back, session resumed", address);
                        PresenceAction::Resumed
                    }
                    Ok(false) => PresenceAction::None,
                    Err(e) => {
                        log::debug!("[{}] Resume failed, will retry: {}", address, e);
                        PresenceAction::ResumeFailed
                    }
                }
            }
            _ => PresenceAction::None,
        }
    }

    /// Poll every `period` until the returned task is stopped.
    pub fn spawn(self: &Arc<Self>, period: Duration) -> PeriodicTask {
        let monitor = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                monitor.tick().await;
            }
        });
        PeriodicTask::new("presence-poll", handle)
    }
}
