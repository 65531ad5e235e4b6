//! In-process serial devices for tests and offline use.
//!
//! A [`SimulatedBus`] plays both the transport provider and the device
//! discovery roles: attaching an address makes it discoverable and openable,
//! detaching it makes it vanish while any open handle stays alive.

use crate::serial::discovery::DeviceDiscovery;
use crate::serial::error::{SerialError, SerialResult};
use crate::serial::transport::{ControlLines, SerialTransport, TransportProvider};
use crate::serial::types::*;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex, Notify};

/// Failure to inject into the next `open` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFault {
    PermissionDenied,
    ParameterRejected,
    Unavailable,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Simulated transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SimulatedTransport {
    address: String,
    present: AtomicBool,
    open: AtomicBool,
    rx_buf: Mutex<VecDeque<u8>>,
    tx_buf: Mutex<VecDeque<u8>>,
    control_lines: Mutex<ControlLines>,
    opened_with: Mutex<Vec<PortConfig>>,
    dtr_history: Mutex<Vec<bool>>,
    rx_notify: Notify,
    next_open_fault: std::sync::Mutex<Option<OpenFault>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    close_count: AtomicU32,
}

impl SimulatedTransport {
    /// A device at `address` that is not yet plugged in.
    pub fn new(address: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            address: address.into(),
            present: AtomicBool::new(false),
            open: AtomicBool::new(false),
            rx_buf: Mutex::new(VecDeque::with_capacity(4096)),
            tx_buf: Mutex::new(VecDeque::with_capacity(4096)),
            control_lines: Mutex::new(ControlLines::default()),
            opened_with: Mutex::new(Vec::new()),
            dtr_history: Mutex::new(Vec::new()),
            rx_notify: Notify::new(),
            next_open_fault: std::sync::Mutex::new(None),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            close_count: AtomicU32::new(0),
        })
    }

    pub fn is_present(&self) -> bool {
        self.present.load(Ordering::SeqCst)
    }

    pub fn set_present(&self, present: bool) {
        self.present.store(present, Ordering::SeqCst);
    }

    /// Make the next `open` fail once.
    pub fn fail_next_open(&self, fault: OpenFault) {
        *self
            .next_open_fault
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(fault);
    }

    /// Make every read fail until cleared, like a yanked USB adapter.
    pub fn set_read_failure(&self, failing: bool) {
        self.fail_reads.store(failing, Ordering::SeqCst);
        self.rx_notify.notify_waiters();
    }

    pub fn set_write_failure(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    /// Inject bytes into the receive buffer (simulate incoming data).
    pub async fn inject_rx(&self, data: &[u8]) {
        let mut buf = self.rx_buf.lock().await;
        buf.extend(data);
        self.rx_notify.notify_waiters();
    }

    /// Drain all bytes from the transmit buffer (for test assertions).
    pub async fn drain_tx(&self) -> Vec<u8> {
        let mut buf = self.tx_buf.lock().await;
        buf.drain(..).collect()
    }

    pub async fn control_lines(&self) -> ControlLines {
        *self.control_lines.lock().await
    }

    /// Every configuration this device was successfully opened with.
    pub async fn opened_with(&self) -> Vec<PortConfig> {
        self.opened_with.lock().await.clone()
    }

    /// DTR level set by every open and every explicit DTR change, in order.
    pub async fn dtr_history(&self) -> Vec<bool> {
        self.dtr_history.lock().await.clone()
    }

    pub fn close_count(&self) -> u32 {
        self.close_count.load(Ordering::SeqCst)
    }

    fn take_fault(&self) -> Option<OpenFault> {
        self.next_open_fault
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

#[async_trait::async_trait]
impl SerialTransport for SimulatedTransport {
    async fn open(&self, config: &PortConfig) -> SerialResult<()> {
        if self.open.load(Ordering::SeqCst) {
            return Err(SerialError::PortBusy {
                address: self.address.clone(),
            });
        }
        if !self.is_present() {
            return Err(SerialError::PortUnavailable {
                address: self.address.clone(),
            });
        }
        match self.take_fault() {
            Some(OpenFault::PermissionDenied) => {
                return Err(SerialError::permission_denied(self.address.clone()))
            }
            Some(OpenFault::ParameterRejected) => {
                return Err(SerialError::ParameterRejected {
                    address: self.address.clone(),
                    shorthand: config.shorthand(),
                    message: "unsupported line parameters".to_string(),
                })
            }
            Some(OpenFault::Unavailable) => {
                return Err(SerialError::PortUnavailable {
                    address: self.address.clone(),
                })
            }
            None => {}
        }

        self.opened_with.lock().await.push(config.clone());
        self.dtr_history.lock().await.push(config.dtr_asserted);
        {
            let mut cl = self.control_lines.lock().await;
            cl.dtr = config.dtr_asserted;
            cl.rts = config.rts_asserted;
        }
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> SerialResult<()> {
        if self.open.swap(false, Ordering::SeqCst) {
            self.close_count.fetch_add(1, Ordering::SeqCst);
        }
        *self.control_lines.lock().await = ControlLines::default();
        self.rx_notify.notify_waiters();
        Ok(())
    }

    async fn read(&self, buf: &mut [u8]) -> SerialResult<usize> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(SerialError::NotOpen {
                address: self.address.clone(),
            });
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(SerialError::Read {
                address: self.address.clone(),
                message: "device disconnected".to_string(),
            });
        }
        let mut rx = self.rx_buf.lock().await;
        if rx.is_empty() {
            drop(rx);
            tokio::select! {
                _ = self.rx_notify.notified() => {},
                _ = tokio::time::sleep(tokio::time::Duration::from_millis(50)) => {},
            }
            rx = self.rx_buf.lock().await;
        }
        let count = buf.len().min(rx.len());
        for (slot, byte) in buf.iter_mut().zip(rx.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }

    async fn write(&self, buf: &[u8]) -> SerialResult<usize> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(SerialError::NotOpen {
                address: self.address.clone(),
            });
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SerialError::Write {
                address: self.address.clone(),
                message: "device disconnected".to_string(),
            });
        }
        self.tx_buf.lock().await.extend(buf);
        Ok(buf.len())
    }

    async fn set_dtr(&self, state: bool) -> SerialResult<()> {
        self.control_lines.lock().await.dtr = state;
        self.dtr_history.lock().await.push(state);
        Ok(())
    }

    async fn set_rts(&self, state: bool) -> SerialResult<()> {
        self.control_lines.lock().await.rts = state;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn address(&self) -> &str {
        &self.address
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Simulated bus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A set of simulated devices keyed by address.
#[derive(Default)]
pub struct SimulatedBus {
    devices: RwLock<HashMap<String, Arc<SimulatedTransport>>>,
}

impl SimulatedBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Device at `address`, created unplugged if unknown.
    pub fn device(&self, address: &str) -> Arc<SimulatedTransport> {
        if let Some(dev) = self
            .devices
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(address)
        {
            return dev.clone();
        }
        self.devices
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(address.to_string())
            .or_insert_with(|| SimulatedTransport::new(address))
            .clone()
    }

    /// Plug a device in.
    pub fn attach(&self, address: &str) -> Arc<SimulatedTransport> {
        let dev = self.device(address);
        dev.set_present(true);
        log::debug!("Simulated device {} attached", address);
        dev
    }

    /// Unplug a device. An open handle stays open until someone closes it.
    pub fn detach(&self, address: &str) {
        self.device(address).set_present(false);
        log::debug!("Simulated device {} detached", address);
    }
}

impl TransportProvider for SimulatedBus {
    fn transport(&self, address: &str) -> Arc<dyn SerialTransport> {
        self.device(address)
    }
}

#[async_trait::async_trait]
impl DeviceDiscovery for SimulatedBus {
    async fn list(&self) -> Vec<SerialPortInfo> {
        let devices = self
            .devices
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut ports: Vec<SerialPortInfo> = devices
            .values()
            .filter(|d| d.is_present())
            .map(|d| SerialPortInfo {
                label: format!("{} (simulated)", d.address()),
                ..SerialPortInfo::bare(d.address(), PortType::Unknown)
            })
            .collect();
        ports.sort_by(|a, b| a.address.cmp(&b.address));
        ports
    }
}
