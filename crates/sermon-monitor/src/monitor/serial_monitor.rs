//! The serial monitor: one port session wired to a display.
//!
//! Incoming text flows session → aggregator → display on the drain timer.
//! The display follows the session state through a registered listener, so
//! it is greyed out whenever the port is not open, whoever closed it.
//! Commands typed by the user go through the line-ending policy and into
//! the history.

use crate::monitor::aggregator::UpdateAggregator;
use crate::monitor::display::MonitorDisplay;
use crate::monitor::history::CommandHistory;
use crate::monitor::presence::{ExclusiveOperation, PresenceMonitor, PresenceTarget};
use crate::monitor::settings::{MonitorSettings, Placement};
use crate::monitor::task::PeriodicTask;
use sermon_core::{keys, Preferences};
use sermon_serial::serial::{
    BaudRate, DeviceDiscovery, LineEnding, PortConfig, PortSession, SerialError, SerialResult,
    SessionState, TextSink, TransportProvider,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

/// Pause between closing and reopening the port on a rate change, giving
/// the driver time to release it.
const REOPEN_DELAY: Duration = Duration::from_millis(100);

fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Collaborators a monitor is built from.
pub struct MonitorParts {
    pub prefs: Arc<dyn Preferences>,
    pub provider: Arc<dyn TransportProvider>,
    pub discovery: Arc<dyn DeviceDiscovery>,
    pub exclusive: Arc<dyn ExclusiveOperation>,
    pub display: Box<dyn MonitorDisplay>,
}

struct Inner {
    prefs: Arc<dyn Preferences>,
    discovery: Arc<dyn DeviceDiscovery>,
    exclusive: Arc<dyn ExclusiveOperation>,
    settings: Mutex<MonitorSettings>,
    session: PortSession,
    aggregator: Arc<UpdateAggregator>,
    display: Arc<Mutex<Box<dyn MonitorDisplay>>>,
    history: Mutex<CommandHistory>,
    tasks: Mutex<Vec<PeriodicTask>>,
    paused: AtomicBool,
    placement: Mutex<Option<Placement>>,
}

#[derive(Clone)]
pub struct SerialMonitor {
    inner: Arc<Inner>,
}

impl SerialMonitor {
    /// Build a monitor from persisted preferences. The port address and
    /// line parameters come from the `serial.*` keys.
    pub fn new(parts: MonitorParts) -> Self {
        let settings = MonitorSettings::from_preferences(parts.prefs.as_ref());
        let config = PortConfig::from_preferences(parts.prefs.as_ref());
        Self::with_settings(parts, config, settings)
    }

    pub fn with_settings(parts: MonitorParts, config: PortConfig, settings: MonitorSettings) -> Self {
        let aggregator = Arc::new(UpdateAggregator::new());
        let sink_target = Arc::clone(&aggregator);
        let sink: TextSink = Arc::new(move |text: &str| sink_target.add_bytes(text));
        let session = PortSession::new(parts.provider, config, settings.encoding, sink);

        let display = Arc::new(Mutex::new(parts.display));
        let follower = Arc::clone(&display);
        session.on_state_change(Arc::new(move |state: SessionState| {
            let mut display = lock(&follower);
            match state {
                SessionState::Open => display.on_enable(),
                SessionState::Suspended | SessionState::Closed => display.on_disable(),
            }
        }));

        Self {
            inner: Arc::new(Inner {
                prefs: parts.prefs,
                discovery: parts.discovery,
                exclusive: parts.exclusive,
                history: Mutex::new(CommandHistory::new(
                    settings.history_capacity,
                    settings.duplicate_policy,
                )),
                placement: Mutex::new(settings.placement),
                settings: Mutex::new(settings),
                session,
                aggregator,
                display,
                tasks: Mutex::new(Vec::new()),
                paused: AtomicBool::new(false),
            }),
        }
    }

    pub fn session(&self) -> &PortSession {
        &self.inner.session
    }

    pub fn state(&self) -> SessionState {
        self.inner.session.state()
    }

    pub fn settings(&self) -> MonitorSettings {
        lock(&self.inner.settings).clone()
    }

    /// Run `f` against the display.
    pub fn with_display<R>(&self, f: impl FnOnce(&mut dyn MonitorDisplay) -> R) -> R {
        let mut display = lock(&self.inner.display);
        f(&mut **display)
    }

    pub fn display_contents(&self) -> String {
        self.with_display(|d| d.contents())
    }

    pub fn clear_display(&self) {
        self.with_display(|d| d.clear());
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    fn start_tasks(&self) {
        let mut tasks = lock(&self.inner.tasks);
        if !tasks.is_empty() {
            return;
        }
        let settings = self.settings();

        let display = Arc::clone(&self.inner.display);
        tasks.push(self.inner.aggregator.spawn_drain(
            settings.drain_period(),
            move |batch| lock(&display).render_incoming(&batch),
        ));

        let target = Arc::new(MonitorTarget(Arc::downgrade(&self.inner)));
        let presence = PresenceMonitor::new(
            target,
            Arc::clone(&self.inner.discovery),
            Arc::clone(&self.inner.exclusive),
        );
        tasks.push(presence.spawn(settings.poll_period()));
    }

    /// Start the refresh and presence timers and open the port.
    pub async fn open(&self) -> SerialResult<()> {
        if self.inner.session.is_disposed() {
            return Err(SerialError::PortClosed);
        }
        self.start_tasks();
        self.inner.session.open().await
    }

    /// Release the port, keeping its configuration for `resume`.
    pub async fn suspend(&self) -> SerialResult<bool> {
        self.inner.session.suspend().await
    }

    pub async fn resume(&self) -> SerialResult<bool> {
        self.inner.session.resume().await
    }

    /// While paused the presence poller will not reopen the port.
    pub fn set_paused(&self, paused: bool) {
        self.inner.paused.store(paused, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    /// Persist the placement, optionally forget the transcript, close the
    /// port. Timers keep running until `dispose`.
    pub async fn close(&self) {
        if let Some(placement) = *lock(&self.inner.placement) {
            self.inner
                .prefs
                .set(keys::LAST_SERIAL_LOCATION, &placement.to_string());
        }
        if self.settings().forget_on_close {
            self.inner.aggregator.drain_and_clear();
            self.clear_display();
        }
        self.inner.session.close().await;
    }

    /// Stop the timers and dispose the session. Pending text is flushed to
    /// the display first.
    pub async fn dispose(&self) {
        let tasks: Vec<PeriodicTask> = lock(&self.inner.tasks).drain(..).collect();
        for task in tasks {
            task.stop();
        }
        let remaining = self.inner.aggregator.drain_and_clear();
        if !remaining.is_empty() {
            self.with_display(|d| d.render_incoming(&remaining));
        }
        self.inner.session.dispose().await;
    }

    // ── Commands ────────────────────────────────────────────────────

    /// Submit a command line. Buffered mode sends it with the configured
    /// line ending; unbuffered mode already sent it key by key. Either way
    /// it lands in the history.
    ///
    /// Returns `true` when the one-time "nothing was sent, pick a line
    /// ending" alert should be shown.
    pub async fn submit_command(&self, command: &str) -> SerialResult<bool> {
        let settings = self.settings();
        let mut outcome = Ok(false);

        if !settings.unbuffered {
            let payload = settings.line_ending.apply(command);
            let alert = payload.is_empty()
                && settings.line_ending == LineEnding::None
                && !self.inner.prefs.has(keys::LINE_ENDING_ALERT_NOTIFIED);
            if alert {
                self.inner
                    .prefs
                    .set_bool(keys::LINE_ENDING_ALERT_NOTIFIED, true);
            }
            outcome = self.inner.session.write_str(&payload).await.map(|_| alert);
        }

        lock(&self.inner.history).add_command(command);
        outcome
    }

    /// Forward a single key press. Only sends in unbuffered mode.
    pub async fn send_key(&self, key: u8) -> SerialResult<()> {
        if !self.settings().unbuffered {
            return Ok(());
        }
        self.inner.session.write_byte(key).await
    }

    pub fn previous_command(&self, pending: &str) -> Option<String> {
        lock(&self.inner.history).get_previous(pending)
    }

    pub fn next_command(&self) -> Option<String> {
        lock(&self.inner.history).get_next()
    }

    pub fn reset_history_location(&self) -> String {
        lock(&self.inner.history).reset_history_location()
    }

    /// Submitted commands, oldest first.
    pub fn history(&self) -> Vec<String> {
        lock(&self.inner.history).entries().map(str::to_string).collect()
    }

    // ── Settings ────────────────────────────────────────────────────

    /// Persist the new rate and, if the port is open, reopen it at that
    /// rate. The port is closed before its configuration changes.
    pub async fn change_baud_rate(&self, rate: BaudRate) -> SerialResult<()> {
        self.inner
            .prefs
            .set(keys::SERIAL_BAUD, &rate.value().to_string());
        let session = &self.inner.session;
        let reopen = session.state() == SessionState::Open;
        if reopen {
            log::info!("[{}] Switching to {}", session.config().address, rate.label());
            session.close().await;
        }
        session
            .set_config(session.config().with_baud_rate(rate))
            .await?;
        if reopen {
            tokio::time::sleep(REOPEN_DELAY).await;
            session.open().await?;
        }
        Ok(())
    }

    pub fn set_line_ending(&self, line_ending: LineEnding) {
        lock(&self.inner.settings).line_ending = line_ending;
        self.inner
            .prefs
            .set(keys::SERIAL_LINE_ENDING, line_ending.key());
    }

    pub fn set_unbuffered(&self, unbuffered: bool) {
        lock(&self.inner.settings).unbuffered = unbuffered;
        self.inner.prefs.set_bool(keys::SERIAL_UNBUFFERED, unbuffered);
    }

    /// Record the current window bounds; persisted on close.
    pub fn set_placement(&self, placement: Placement) {
        *lock(&self.inner.placement) = Some(placement);
    }

    /// The stored placement, if it fits on a screen of the given size.
    pub fn restore_placement(&self, screen_width: u32, screen_height: u32) -> Option<Placement> {
        let placement = (*lock(&self.inner.placement))?;
        placement
            .fits_within(screen_width, screen_height)
            .then_some(placement)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Presence target
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Weak handle so the poller task does not keep the monitor alive.
struct MonitorTarget(Weak<Inner>);

impl MonitorTarget {
    fn monitor(&self) -> Option<SerialMonitor> {
        self.0.upgrade().map(|inner| SerialMonitor { inner })
    }
}

#[async_trait::async_trait]
impl PresenceTarget for MonitorTarget {
    fn address(&self) -> String {
        self.monitor()
            .map(|m| m.session().config().address)
            .unwrap_or_default()
    }

    fn state(&self) -> SessionState {
        self.monitor()
            .map(|m| m.state())
            .unwrap_or(SessionState::Closed)
    }

    fn resume_blocked(&self) -> bool {
        self.monitor().map_or(true, |m| m.is_paused())
    }

    async fn suspend(&self) -> SerialResult<bool> {
        match self.monitor() {
            Some(m) => m.suspend().await,
            None => Err(SerialError::PortClosed),
        }
    }

    async fn resume(&self) -> SerialResult<bool> {
        match self.monitor() {
            Some(m) => m.resume().await,
            None => Err(SerialError::PortClosed),
        }
    }
}
