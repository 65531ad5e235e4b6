//! Serial port transport abstraction.
//!
//! `SerialTransport` is the seam between the session logic and whatever
//! actually moves bytes. The system implementation wraps the `serialport`
//! crate; blocking driver calls run on tokio's blocking pool so the session
//! tasks never stall the runtime. Tests and demos use the simulated bus in
//! [`crate::serial::simulated`].

use crate::serial::error::{SerialError, SerialResult};
use crate::serial::types::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Transport trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Output control line state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlLines {
    /// Data Terminal Ready.
    pub dtr: bool,
    /// Request To Send.
    pub rts: bool,
}

/// Platform-agnostic serial port transport for a single address.
///
/// Implementations must be `Send + Sync` so they can be held behind an
/// `Arc` and used from the reader task and the writer concurrently.
#[async_trait::async_trait]
pub trait SerialTransport: Send + Sync {
    /// Open the port and apply the line parameters and control lines.
    async fn open(&self, config: &PortConfig) -> SerialResult<()>;

    /// Close the port. Closing a closed port is not an error.
    async fn close(&self) -> SerialResult<()>;

    /// Read up to `buf.len()` bytes. Returns `Ok(0)` when nothing arrived
    /// within the transport's poll interval.
    async fn read(&self, buf: &mut [u8]) -> SerialResult<usize>;

    /// Write all bytes in `buf`.
    async fn write(&self, buf: &[u8]) -> SerialResult<usize>;

    async fn set_dtr(&self, state: bool) -> SerialResult<()>;

    async fn set_rts(&self, state: bool) -> SerialResult<()>;

    fn is_open(&self) -> bool;

    fn address(&self) -> &str;
}

/// Hands out the transport for an address. Repeated calls for the same
/// address return the same transport, so "already open" is visible to
/// everyone in the process.
pub trait TransportProvider: Send + Sync {
    fn transport(&self, address: &str) -> Arc<dyn SerialTransport>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  System transport (serialport crate)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

type PortSlot = Arc<Mutex<Option<Box<dyn serialport::SerialPort>>>>;

fn lock_slot(slot: &PortSlot) -> MutexGuard<'_, Option<Box<dyn serialport::SerialPort>>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Default blocking read timeout; bounds how long a close waits on the reader.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Transport backed by an OS serial device.
///
/// The port is cloned into separate reader and writer handles so a
/// blocking read never delays a write.
pub struct SystemTransport {
    address: String,
    poll_interval: Duration,
    reader: PortSlot,
    writer: PortSlot,
}

impl SystemTransport {
    pub fn new(address: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            address: address.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            reader: Arc::new(Mutex::new(None)),
            writer: Arc::new(Mutex::new(None)),
        })
    }

    fn io_error(&self, message: impl Into<String>) -> SerialError {
        SerialError::Io {
            address: self.address.clone(),
            message: message.into(),
        }
    }

    /// Run a blocking driver call against one of the port handles.
    async fn blocking<T, F>(&self, slot: &PortSlot, op: F) -> SerialResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Box<dyn serialport::SerialPort>) -> SerialResult<T> + Send + 'static,
    {
        let slot = slot.clone();
        let address = self.address.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = lock_slot(&slot);
            match guard.as_mut() {
                Some(port) => op(port),
                None => Err(SerialError::NotOpen { address }),
            }
        })
        .await
        .map_err(|e| self.io_error(format!("blocking task failed: {e}")))?
    }
}

/// Translate a driver error raised while opening `config`.
pub fn map_open_error(config: &PortConfig, err: &serialport::Error) -> SerialError {
    let address = config.address.clone();
    match err.kind() {
        serialport::ErrorKind::NoDevice => SerialError::PortUnavailable { address },
        serialport::ErrorKind::InvalidInput => SerialError::ParameterRejected {
            address,
            shorthand: config.shorthand(),
            message: err.to_string(),
        },
        serialport::ErrorKind::Io(std::io::ErrorKind::NotFound) => {
            SerialError::PortUnavailable { address }
        }
        serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
            SerialError::permission_denied(address)
        }
        _ if err.to_string().to_ascii_lowercase().contains("busy") => {
            SerialError::PortBusy { address }
        }
        _ => SerialError::Io {
            address,
            message: err.to_string(),
        },
    }
}

fn to_driver_params(
    config: &PortConfig,
) -> SerialResult<(serialport::DataBits, serialport::Parity, serialport::StopBits)> {
    let data_bits = match config.data_bits {
        DataBits::Five => serialport::DataBits::Five,
        DataBits::Six => serialport::DataBits::Six,
        DataBits::Seven => serialport::DataBits::Seven,
        DataBits::Eight => serialport::DataBits::Eight,
    };
    let parity = match config.parity {
        Parity::None => serialport::Parity::None,
        Parity::Even => serialport::Parity::Even,
        Parity::Odd => serialport::Parity::Odd,
    };
    let stop_bits = match config.stop_bits {
        StopBits::One => serialport::StopBits::One,
        StopBits::Two => serialport::StopBits::Two,
        StopBits::OnePointFive => {
            return Err(SerialError::ParameterRejected {
                address: config.address.clone(),
                shorthand: config.shorthand(),
                message: "1.5 stop bits are not supported by this driver".to_string(),
            })
        }
    };
    Ok((data_bits, parity, stop_bits))
}

#[async_trait::async_trait]
impl SerialTransport for SystemTransport {
    async fn open(&self, config: &PortConfig) -> SerialResult<()> {
        if self.is_open() {
            return Err(SerialError::PortBusy {
                address: self.address.clone(),
            });
        }
        let (data_bits, parity, stop_bits) = to_driver_params(config)?;
        let cfg = config.clone();
        let timeout = self.poll_interval;

        let (reader, writer) = tokio::task::spawn_blocking(move || {
            let mut port = serialport::new(&cfg.address, cfg.baud_rate.value())
                .data_bits(data_bits)
                .parity(parity)
                .stop_bits(stop_bits)
                .flow_control(serialport::FlowControl::None)
                .timeout(timeout)
                .open()
                .map_err(|e| map_open_error(&cfg, &e))?;

            if let Err(e) = port.write_request_to_send(cfg.rts_asserted) {
                log::warn!("[{}] Could not set RTS={}: {}", cfg.address, cfg.rts_asserted, e);
            }
            if let Err(e) = port.write_data_terminal_ready(cfg.dtr_asserted) {
                log::warn!("[{}] Could not set DTR={}: {}", cfg.address, cfg.dtr_asserted, e);
            }

            let writer = port.try_clone().map_err(|e| SerialError::Io {
                address: cfg.address.clone(),
                message: format!("cannot clone port handle: {e}"),
            })?;
            Ok::<_, SerialError>((port, writer))
        })
        .await
        .map_err(|e| self.io_error(format!("blocking task failed: {e}")))??;

        *lock_slot(&self.reader) = Some(reader);
        *lock_slot(&self.writer) = Some(writer);
        Ok(())
    }

    async fn close(&self) -> SerialResult<()> {
        // Dropping the handles closes the descriptor; the reader slot may be
        // held by an in-flight read for up to one poll interval.
        let writer = lock_slot(&self.writer).take();
        drop(writer);
        let reader_slot = self.reader.clone();
        tokio::task::spawn_blocking(move || {
            lock_slot(&reader_slot).take();
        })
        .await
        .map_err(|e| SerialError::Close {
            address: self.address.clone(),
            message: e.to_string(),
        })
    }

    async fn read(&self, buf: &mut [u8]) -> SerialResult<usize> {
        let want = buf.len();
        let address = self.address.clone();
        let data = self
            .blocking(&self.reader, move |port| {
                let mut tmp = vec![0u8; want];
                match port.read(&mut tmp) {
                    Ok(n) => {
                        tmp.truncate(n);
                        Ok(tmp)
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
                    Err(e) => Err(SerialError::Read {
                        address,
                        message: e.to_string(),
                    }),
                }
            })
            .await?;
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }

    async fn write(&self, buf: &[u8]) -> SerialResult<usize> {
        let data = buf.to_vec();
        let address = self.address.clone();
        self.blocking(&self.writer, move |port| {
            port.write_all(&data)
                .and_then(|_| port.flush())
                .map(|_| data.len())
                .map_err(|e| SerialError::Write {
                    address,
                    message: e.to_string(),
                })
        })
        .await
    }

    async fn set_dtr(&self, state: bool) -> SerialResult<()> {
        let address = self.address.clone();
        self.blocking(&self.writer, move |port| {
            port.write_data_terminal_ready(state)
                .map_err(|e| SerialError::Io {
                    address,
                    message: e.to_string(),
                })
        })
        .await
    }

    async fn set_rts(&self, state: bool) -> SerialResult<()> {
        let address = self.address.clone();
        self.blocking(&self.writer, move |port| {
            port.write_request_to_send(state)
                .map_err(|e| SerialError::Io {
                    address,
                    message: e.to_string(),
                })
        })
        .await
    }

    fn is_open(&self) -> bool {
        lock_slot(&self.writer).is_some()
    }

    fn address(&self) -> &str {
        &self.address
    }
}

/// Provider handing out one `SystemTransport` per address.
#[derive(Default)]
pub struct SystemTransportProvider {
    transports: Mutex<HashMap<String, Arc<SystemTransport>>>,
}

impl SystemTransportProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl TransportProvider for SystemTransportProvider {
    fn transport(&self, address: &str) -> Arc<dyn SerialTransport> {
        let mut transports = self
            .transports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        transports
            .entry(address.to_string())
            .or_insert_with(|| SystemTransport::new(address))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_error(kind: serialport::ErrorKind) -> serialport::Error {
        serialport::Error::new(kind, "simulated driver failure")
    }

    #[test]
    fn test_map_open_error_kinds() {
        let cfg = PortConfig::new("/dev/ttyUSB0", BaudRate(115200));
        assert_eq!(
            map_open_error(&cfg, &open_error(serialport::ErrorKind::NoDevice)),
            SerialError::PortUnavailable {
                address: "/dev/ttyUSB0".into()
            }
        );
        assert!(matches!(
            map_open_error(&cfg, &open_error(serialport::ErrorKind::InvalidInput)),
            SerialError::ParameterRejected { ref shorthand, .. } if shorthand == "115200-8N1"
        ));
        let denied = map_open_error(
            &cfg,
            &open_error(serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied)),
        );
        assert!(denied.hint().is_some());
    }

    #[test]
    fn test_one_and_a_half_stop_bits_rejected_up_front() {
        let cfg = PortConfig {
            stop_bits: StopBits::OnePointFive,
            ..PortConfig::new("COM1", BaudRate(9600))
        };
        assert!(matches!(
            to_driver_params(&cfg),
            Err(SerialError::ParameterRejected { .. })
        ));
    }

    #[tokio::test]
    async fn test_system_transport_closed_by_default() {
        let provider = SystemTransportProvider::new();
        let t = provider.transport("/dev/does-not-exist-sermon");
        assert!(!t.is_open());
        let mut buf = [0u8; 4];
        assert!(matches!(
            t.read(&mut buf).await,
            Err(SerialError::NotOpen { .. })
        ));
        assert!(t.close().await.is_ok());
    }

    #[test]
    fn test_provider_reuses_transport_per_address() {
        let provider = SystemTransportProvider::new();
        let a = provider.transport("COM5");
        let b = provider.transport("COM5");
        assert!(Arc::ptr_eq(&a, &b));
    }
}
