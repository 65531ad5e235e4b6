//! Serial session management.
//!
//! A `PortSession` owns one port address and its lifecycle:
//!
//! ```text
//!   Closed ──open──▶ Open ──suspend──▶ Suspended
//!     ▲               │  ◀──resume───────┘
//!     └────close──────┴──────────────────┘
//! ```
//!
//! `dispose` is terminal from any state. While open, a reader task pulls
//! byte windows off the transport, decodes them and hands the text to the
//! session's sink. Lifecycle transitions are serialized through one async
//! lock; the port handle itself sits behind a plain mutex so `dispose` can
//! take it without waiting on an in-flight transition.

use crate::serial::decoder::StreamDecoder;
use crate::serial::error::{SerialError, SerialResult};
use crate::serial::transport::{SerialTransport, TransportProvider};
use crate::serial::types::*;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Consumer of decoded text. Called from the reader task.
pub type TextSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Notified after every state change, including ones the session makes on
/// its own when the device goes away. Must not call back into the session.
pub type StateListener = Arc<dyn Fn(SessionState) + Send + Sync>;

/// Bytes requested from the transport per read.
const READ_CHUNK: usize = 256;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Open port handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct OpenPort {
    transport: Arc<dyn SerialTransport>,
    /// Distinguishes successive opens so a stale reader cannot suspend a
    /// newer port.
    generation: u64,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl OpenPort {
    /// Stop the reader and close the transport. Failures are logged.
    async fn release(&self) {
        if let Some(tx) = lock(&self.shutdown).take() {
            let _ = tx.send(());
        }
        let reader = lock(&self.reader).take();
        if let Some(reader) = reader {
            if let Err(e) = reader.await {
                log::warn!("[{}] Reader task ended abnormally: {}", self.transport.address(), e);
            }
        }
        if let Err(e) = self.transport.close().await {
            log::warn!("[{}] Error closing port: {}", self.transport.address(), e);
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Inner {
    provider: Arc<dyn TransportProvider>,
    config: Mutex<PortConfig>,
    lifecycle: tokio::sync::Mutex<()>,
    state: Mutex<SessionState>,
    port: Mutex<Option<Arc<OpenPort>>>,
    generation: AtomicU64,
    disposed: AtomicBool,
    decoder: Mutex<StreamDecoder>,
    sink: TextSink,
    listeners: Mutex<Vec<StateListener>>,
    opened_at: Mutex<Option<DateTime<Utc>>>,
    bytes_rx: AtomicU64,
    bytes_tx: AtomicU64,
}

/// Handle to a serial port session. Clones share the same session.
#[derive(Clone)]
pub struct PortSession {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PortSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortSession")
            .field("address", &lock(&self.inner.config).address)
            .field("state", &self.state())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl PortSession {
    /// Create a closed session. Nothing touches the hardware until `open`.
    pub fn new(
        provider: Arc<dyn TransportProvider>,
        config: PortConfig,
        encoding: TextEncoding,
        sink: TextSink,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                config: Mutex::new(config),
                lifecycle: tokio::sync::Mutex::new(()),
                state: Mutex::new(SessionState::Closed),
                port: Mutex::new(None),
                generation: AtomicU64::new(0),
                disposed: AtomicBool::new(false),
                decoder: Mutex::new(StreamDecoder::new(encoding)),
                sink,
                listeners: Mutex::new(Vec::new()),
                opened_at: Mutex::new(None),
                bytes_rx: AtomicU64::new(0),
                bytes_tx: AtomicU64::new(0),
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.inner.state)
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> PortConfig {
        lock(&self.inner.config).clone()
    }

    /// Replace the configuration used by the next open or resume. Refused
    /// while the port is open.
    pub async fn set_config(&self, config: PortConfig) -> SerialResult<()> {
        let _guard = self.inner.lifecycle.lock().await;
        self.ensure_live()?;
        if self.state() == SessionState::Open {
            return Err(SerialError::ConfigLocked {
                address: self.config().address,
            });
        }
        *lock(&self.inner.config) = config;
        Ok(())
    }

    /// Register a listener for state changes.
    pub fn on_state_change(&self, listener: StateListener) {
        lock(&self.inner.listeners).push(listener);
    }

    pub fn info(&self) -> SessionInfo {
        let config = self.config();
        SessionInfo {
            address: config.address.clone(),
            config_shorthand: config.shorthand(),
            state: self.state(),
            disposed: self.is_disposed(),
            opened_at: *lock(&self.inner.opened_at),
            bytes_rx: self.inner.bytes_rx.load(Ordering::Relaxed),
            bytes_tx: self.inner.bytes_tx.load(Ordering::Relaxed),
        }
    }

    fn ensure_live(&self) -> SerialResult<()> {
        if self.is_disposed() {
            Err(SerialError::PortClosed)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, state: SessionState) {
        let previous = std::mem::replace(&mut *lock(&self.inner.state), state);
        if previous == state {
            return;
        }
        let listeners = lock(&self.inner.listeners).clone();
        for listener in listeners {
            listener(state);
        }
    }

    fn current_port(&self) -> Option<Arc<OpenPort>> {
        lock(&self.inner.port).clone()
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Open the port with the current configuration. Opening an open
    /// session is a no-op; opening a suspended one resumes it.
    pub async fn open(&self) -> SerialResult<()> {
        let _guard = self.inner.lifecycle.lock().await;
        self.ensure_live()?;
        if self.state() == SessionState::Open {
            return Ok(());
        }
        self.open_locked().await
    }

    async fn open_locked(&self) -> SerialResult<()> {
        let config = self.config();
        let transport = self.inner.provider.transport(&config.address);

        if let Err(e) = transport.open(&config).await {
            match &e {
                SerialError::ParameterRejected { .. } => {
                    log::error!("[{}] {}", config.address, e);
                    if let Err(close_err) = transport.close().await {
                        log::warn!("[{}] Error releasing port: {}", config.address, close_err);
                    }
                }
                _ => log::warn!("[{}] Open failed: {}", config.address, e),
            }
            return Err(e);
        }

        // A dispose that raced this open must not leave the port behind.
        if self.is_disposed() {
            if let Err(e) = transport.close().await {
                log::warn!("[{}] Error closing port: {}", config.address, e);
            }
            return Err(SerialError::PortClosed);
        }

        {
            let mut decoder = lock(&self.inner.decoder);
            let encoding = decoder.encoding();
            decoder.reset(encoding);
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let port = Arc::new(OpenPort {
            transport: transport.clone(),
            generation,
            shutdown: Mutex::new(Some(shutdown_tx)),
            reader: Mutex::new(None),
        });
        let reader = tokio::spawn(read_loop(
            Arc::downgrade(&self.inner),
            transport,
            generation,
            shutdown_rx,
        ));
        *lock(&port.reader) = Some(reader);

        *lock(&self.inner.port) = Some(port);
        *lock(&self.inner.opened_at) = Some(Utc::now());
        self.set_state(SessionState::Open);
        log::info!("[{}] Opened at {}", config.address, config.shorthand());
        Ok(())
    }

    /// Close the port. Idempotent and best-effort: failures are logged,
    /// never returned.
    pub async fn close(&self) {
        let _guard = self.inner.lifecycle.lock().await;
        let port = lock(&self.inner.port).take();
        if let Some(port) = port {
            port.release().await;
            log::info!("[{}] Closed", port.transport.address());
        }
        if !self.is_disposed() {
            self.set_state(SessionState::Closed);
        }
    }

    /// Release the port because the device went away. Keeps the
    /// configuration for `resume`. Returns whether a transition happened.
    pub async fn suspend(&self) -> SerialResult<bool> {
        self.suspend_if(None).await
    }

    async fn suspend_if(&self, generation: Option<u64>) -> SerialResult<bool> {
        let _guard = self.inner.lifecycle.lock().await;
        self.ensure_live()?;
        if self.state() != SessionState::Open {
            return Ok(false);
        }
        let port = {
            let mut slot = lock(&self.inner.port);
            match (slot.as_ref(), generation) {
                (Some(p), Some(g)) if p.generation != g => return Ok(false),
                _ => slot.take(),
            }
        };
        if let Some(port) = port {
            port.release().await;
        }
        self.set_state(SessionState::Suspended);
        log::info!("[{}] Suspended", self.config().address);
        Ok(true)
    }

    /// Reopen a suspended session with its last configuration. Returns
    /// whether a transition happened; on failure the session stays
    /// suspended.
    pub async fn resume(&self) -> SerialResult<bool> {
        let _guard = self.inner.lifecycle.lock().await;
        self.ensure_live()?;
        if self.state() != SessionState::Suspended {
            return Ok(false);
        }
        self.open_locked().await?;
        log::info!("[{}] Resumed", self.config().address);
        Ok(true)
    }

    /// Terminal teardown. The port handle is taken before anything else so
    /// racing callers observe `PortClosed`. Calling it again does nothing.
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let port = lock(&self.inner.port).take();
        self.set_state(SessionState::Closed);
        if let Some(port) = port {
            port.release().await;
        }
        // Wait out any transition that was already in flight.
        let _guard = self.inner.lifecycle.lock().await;
        let late = lock(&self.inner.port).take();
        self.set_state(SessionState::Closed);
        if let Some(port) = late {
            port.release().await;
        }
        log::debug!("[{}] Disposed", self.config().address);
    }

    // ── I/O ─────────────────────────────────────────────────────────

    /// Write raw bytes. A transport failure suspends the session.
    pub async fn write(&self, bytes: &[u8]) -> SerialResult<()> {
        self.ensure_live()?;
        let port = self.current_port().ok_or_else(|| SerialError::NotOpen {
            address: self.config().address,
        })?;
        match port.transport.write(bytes).await {
            Ok(n) => {
                self.inner.bytes_tx.fetch_add(n as u64, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                log::warn!("[{}] {}", port.transport.address(), e);
                if e.is_presence_loss() {
                    if let Err(suspend_err) = self.suspend_if(Some(port.generation)).await {
                        log::debug!("Suspend after write failure skipped: {}", suspend_err);
                    }
                }
                Err(e)
            }
        }
    }

    /// Single byte, for key-by-key transmission.
    pub async fn write_byte(&self, byte: u8) -> SerialResult<()> {
        self.write(&[byte]).await
    }

    pub async fn write_str(&self, text: &str) -> SerialResult<()> {
        self.write(text.as_bytes()).await
    }

    /// Feed a byte window through the decoder into the sink. Windows that
    /// arrive after dispose are dropped.
    pub fn deliver(&self, bytes: &[u8]) -> SerialResult<()> {
        if self.is_disposed() {
            log::debug!("Dropping {} byte(s) delivered after dispose", bytes.len());
            return Err(SerialError::PortClosed);
        }
        self.inner
            .bytes_rx
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);
        let text = lock(&self.inner.decoder).decode(bytes);
        if !text.is_empty() {
            (self.inner.sink)(&text);
        }
        Ok(())
    }

    /// Discard any partial character and switch encoding.
    pub fn reset_decoding(&self, encoding: TextEncoding) {
        lock(&self.inner.decoder).reset(encoding);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Reader task
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn read_loop(
    owner: Weak<Inner>,
    transport: Arc<dyn SerialTransport>,
    generation: u64,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let result = tokio::select! {
            _ = &mut shutdown => break,
            r = transport.read(&mut buf) => r,
        };
        let Some(inner) = owner.upgrade() else {
            break;
        };
        let session = PortSession { inner };
        match result {
            Ok(0) => {}
            Ok(n) => {
                if session.deliver(&buf[..n]).is_err() {
                    break;
                }
            }
            Err(e) => {
                log::warn!("[{}] Read failed, suspending: {}", transport.address(), e);
                // Suspend joins this task, so it has to run elsewhere.
                tokio::spawn(async move {
                    if let Err(e) = session.suspend_if(Some(generation)).await {
                        log::debug!("Suspend after read failure skipped: {}", e);
                    }
                });
                break;
            }
        }
    }
    log::trace!("[{}] Reader stopped", transport.address());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::simulated::{OpenFault, SimulatedBus};
    use std::time::Duration;

    fn collecting_sink() -> (TextSink, Arc<Mutex<String>>) {
        let out = Arc::new(Mutex::new(String::new()));
        let captured = out.clone();
        let sink: TextSink = Arc::new(move |text: &str| lock(&captured).push_str(text));
        (sink, out)
    }

    fn session_on(bus: &Arc<SimulatedBus>, address: &str) -> (PortSession, Arc<Mutex<String>>) {
        let (sink, out) = collecting_sink();
        let session = PortSession::new(
            bus.clone(),
            PortConfig::new(address, BaudRate(115200)),
            TextEncoding::Utf8,
            sink,
        );
        (session, out)
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_open_write_close() {
        let bus = SimulatedBus::new();
        let dev = bus.attach("COM3");
        let (session, _) = session_on(&bus, "COM3");

        assert!(matches!(
            session.write_str("early").await,
            Err(SerialError::NotOpen { .. })
        ));

        session.open().await.unwrap();
        assert_eq!(session.state(), SessionState::Open);
        session.write_str("AT\r\n").await.unwrap();
        session.write_byte(b'x').await.unwrap();
        assert_eq!(dev.drain_tx().await, b"AT\r\nx");
        assert_eq!(session.info().bytes_tx, 5);
        assert!(session.info().opened_at.is_some());

        session.close().await;
        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!dev.is_open());
    }

    #[tokio::test]
    async fn test_incoming_bytes_reach_sink_decoded() {
        let bus = SimulatedBus::new();
        let dev = bus.attach("COM3");
        let (session, out) = session_on(&bus, "COM3");
        session.open().await.unwrap();

        let euro = "€".as_bytes();
        dev.inject_rx(b"temp ").await;
        dev.inject_rx(&euro[..1]).await;
        dev.inject_rx(&euro[1..]).await;
        wait_for(|| lock(&out).as_str() == "temp €").await;
        session.dispose().await;
    }

    #[tokio::test]
    async fn test_unavailable_device() {
        let bus = SimulatedBus::new();
        let (session, _) = session_on(&bus, "/dev/ttyUSB9");
        assert!(matches!(
            session.open().await,
            Err(SerialError::PortUnavailable { .. })
        ));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_parameter_rejection_releases_port() {
        let bus = SimulatedBus::new();
        let dev = bus.attach("COM4");
        dev.fail_next_open(OpenFault::ParameterRejected);
        let (session, _) = session_on(&bus, "COM4");

        let err = session.open().await.unwrap_err();
        assert!(matches!(err, SerialError::ParameterRejected { .. }));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!dev.is_open());

        let (other, _) = session_on(&bus, "COM4");
        other.open().await.unwrap();
        other.dispose().await;
    }

    #[tokio::test]
    async fn test_second_session_sees_busy_port() {
        let bus = SimulatedBus::new();
        bus.attach("COM5");
        let (first, _) = session_on(&bus, "COM5");
        let (second, _) = session_on(&bus, "COM5");
        first.open().await.unwrap();
        assert!(matches!(
            second.open().await,
            Err(SerialError::PortBusy { .. })
        ));
        first.dispose().await;
    }

    #[tokio::test]
    async fn test_dispose_is_terminal_and_idempotent() {
        let bus = SimulatedBus::new();
        let dev = bus.attach("COM6");
        let (session, out) = session_on(&bus, "COM6");
        session.open().await.unwrap();

        session.dispose().await;
        session.dispose().await;
        assert!(session.is_disposed());
        assert!(!dev.is_open());
        assert_eq!(dev.close_count(), 1);

        assert_eq!(session.deliver(b"late"), Err(SerialError::PortClosed));
        assert!(lock(&out).is_empty());
        assert_eq!(session.write_str("x").await, Err(SerialError::PortClosed));
        assert_eq!(session.open().await, Err(SerialError::PortClosed));
        assert_eq!(session.resume().await, Err(SerialError::PortClosed));
        session.close().await;
    }

    #[tokio::test]
    async fn test_suspend_and_resume_keep_config() {
        let bus = SimulatedBus::new();
        let dev = bus.attach("COM7");
        let (session, _) = session_on(&bus, "COM7");
        session.open().await.unwrap();

        assert!(session.suspend().await.unwrap());
        assert!(!session.suspend().await.unwrap());
        assert_eq!(session.state(), SessionState::Suspended);
        assert!(!dev.is_open());

        assert!(session.resume().await.unwrap());
        assert_eq!(session.state(), SessionState::Open);
        let opens = dev.opened_with().await;
        assert_eq!(opens.len(), 2);
        assert_eq!(opens[0], opens[1]);
        session.dispose().await;
    }

    #[tokio::test]
    async fn test_failed_resume_stays_suspended() {
        let bus = SimulatedBus::new();
        bus.attach("COM8");
        let (session, _) = session_on(&bus, "COM8");
        session.open().await.unwrap();
        session.suspend().await.unwrap();

        bus.detach("COM8");
        assert!(session.resume().await.is_err());
        assert_eq!(session.state(), SessionState::Suspended);
        session.dispose().await;
    }

    #[tokio::test]
    async fn test_read_error_suspends() {
        let bus = SimulatedBus::new();
        let dev = bus.attach("COM9");
        let (session, _) = session_on(&bus, "COM9");
        session.open().await.unwrap();

        dev.set_read_failure(true);
        let watched = session.clone();
        wait_for(move || watched.state() == SessionState::Suspended).await;
        assert!(!dev.is_open());
        session.dispose().await;
    }

    #[tokio::test]
    async fn test_write_error_suspends() {
        let bus = SimulatedBus::new();
        let dev = bus.attach("COM10");
        let (session, _) = session_on(&bus, "COM10");
        session.open().await.unwrap();

        dev.set_write_failure(true);
        assert!(matches!(
            session.write_str("AT").await,
            Err(SerialError::Write { .. })
        ));
        assert_eq!(session.state(), SessionState::Suspended);
        session.dispose().await;
    }

    #[tokio::test]
    async fn test_set_config_refused_while_open() {
        let bus = SimulatedBus::new();
        let first = bus.attach("COM1");
        let second = bus.attach("COM2");
        let (session, _) = session_on(&bus, "COM1");
        session.open().await.unwrap();

        let err = session
            .set_config(PortConfig::new("COM2", BaudRate(9600)))
            .await
            .unwrap_err();
        assert_eq!(err, SerialError::ConfigLocked { address: "COM1".into() });
        assert_eq!(session.info().address, "COM1");
        assert_eq!(session.config().baud_rate.value(), 115200);
        assert!(first.is_open());

        session.close().await;
        session
            .set_config(PortConfig::new("COM2", BaudRate(9600)))
            .await
            .unwrap();
        session.open().await.unwrap();
        assert_eq!(session.info().address, "COM2");
        assert!(!first.is_open());
        assert!(second.is_open());

        session.dispose().await;
        assert_eq!(
            session.set_config(PortConfig::new("COM1", BaudRate(9600))).await,
            Err(SerialError::PortClosed)
        );
    }

    #[tokio::test]
    async fn test_set_config_allowed_while_suspended() {
        let bus = SimulatedBus::new();
        let dev = bus.attach("COM1");
        let (session, _) = session_on(&bus, "COM1");
        session.open().await.unwrap();
        session.suspend().await.unwrap();

        session
            .set_config(session.config().with_baud_rate(BaudRate(57600)))
            .await
            .unwrap();
        session.resume().await.unwrap();
        let opens = dev.opened_with().await;
        assert_eq!(opens.last().map(|c| c.baud_rate.value()), Some(57600));
        session.dispose().await;
    }

    #[tokio::test]
    async fn test_state_listener_sees_every_transition() {
        let bus = SimulatedBus::new();
        let dev = bus.attach("COM12");
        let (session, _) = session_on(&bus, "COM12");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = seen.clone();
        session.on_state_change(Arc::new(move |state: SessionState| lock(&record).push(state)));

        session.open().await.unwrap();
        dev.set_read_failure(true);
        let watched = session.clone();
        wait_for(move || watched.state() == SessionState::Suspended).await;
        dev.set_read_failure(false);
        session.resume().await.unwrap();
        session.close().await;
        session.close().await;

        assert_eq!(
            *lock(&seen),
            vec![
                SessionState::Open,
                SessionState::Suspended,
                SessionState::Open,
                SessionState::Closed,
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dispose_while_delivering() {
        let bus = SimulatedBus::new();
        let dev = bus.attach("COM13");
        let calls = Arc::new(AtomicU64::new(0));
        let counter = calls.clone();
        let sink: TextSink = Arc::new(move |_: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(5));
        });
        let session = PortSession::new(
            bus.clone(),
            PortConfig::new("COM13", BaudRate(115200)),
            TextEncoding::Utf8,
            sink,
        );
        session.open().await.unwrap();

        let feed = dev.clone();
        let feeder = tokio::spawn(async move {
            for i in 0..200u32 {
                feed.inject_rx(format!("line {i}\n").as_bytes()).await;
                tokio::task::yield_now().await;
            }
        });
        let started = calls.clone();
        wait_for(move || started.load(Ordering::SeqCst) > 0).await;

        session.dispose().await;
        let delivered = calls.load(Ordering::SeqCst);
        feeder.await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(calls.load(Ordering::SeqCst), delivered);
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!dev.is_open());
        assert_eq!(session.deliver(b"late"), Err(SerialError::PortClosed));
        assert_eq!(session.write_str("x").await, Err(SerialError::PortClosed));
        assert_eq!(session.open().await, Err(SerialError::PortClosed));
        assert_eq!(session.suspend().await, Err(SerialError::PortClosed));
        assert_eq!(session.resume().await, Err(SerialError::PortClosed));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_dispose_racing_open_ends_closed() {
        for round in 0..50 {
            let bus = SimulatedBus::new();
            let dev = bus.attach("COM14");
            let (session, _) = session_on(&bus, "COM14");

            let opener = session.clone();
            let open = tokio::spawn(async move { opener.open().await });
            let disposer = session.clone();
            let dispose = tokio::spawn(async move { disposer.dispose().await });
            let _ = open.await.unwrap();
            dispose.await.unwrap();

            assert_eq!(session.state(), SessionState::Closed, "round {round}");
            assert!(!dev.is_open(), "round {round}");
        }
    }

    #[tokio::test]
    async fn test_reset_decoding_switches_encoding() {
        let bus = SimulatedBus::new();
        let (session, out) = session_on(&bus, "COM11");
        session.deliver(&"é".as_bytes()[..1]).unwrap();
        session.reset_decoding(TextEncoding::Latin1);
        session.deliver(&[0xE9]).unwrap();
        assert_eq!(lock(&out).as_str(), "é");
    }
}
