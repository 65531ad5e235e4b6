//! Serial device discovery.
//!
//! Answers "is a device present at this address right now?" for the
//! presence monitor, and lists ports for the CLI. Known USB-serial chips are
//! labelled by VID/PID.

use crate::serial::types::*;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Known USB-serial adapters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy)]
pub struct KnownAdapter {
    pub vid: u16,
    pub pid: u16,
    pub manufacturer: &'static str,
    pub product: &'static str,
}

const KNOWN_ADAPTERS: &[KnownAdapter] = &[
    KnownAdapter { vid: 0x0403, pid: 0x6001, manufacturer: "FTDI", product: "FT232R" },
    KnownAdapter { vid: 0x0403, pid: 0x6015, manufacturer: "FTDI", product: "FT-X Series" },
    KnownAdapter { vid: 0x10C4, pid: 0xEA60, manufacturer: "Silicon Labs", product: "CP2102" },
    KnownAdapter { vid: 0x067B, pid: 0x2303, manufacturer: "Prolific", product: "PL2303" },
    KnownAdapter { vid: 0x1A86, pid: 0x7523, manufacturer: "WCH", product: "CH340" },
    KnownAdapter { vid: 0x1A86, pid: 0x55D4, manufacturer: "WCH", product: "CH9102" },
    KnownAdapter { vid: 0x2341, pid: 0x0043, manufacturer: "Arduino", product: "Uno R3" },
    KnownAdapter { vid: 0x2341, pid: 0x0042, manufacturer: "Arduino", product: "Mega 2560 R3" },
    KnownAdapter { vid: 0x2341, pid: 0x8036, manufacturer: "Arduino", product: "Leonardo" },
    KnownAdapter { vid: 0x303A, pid: 0x1001, manufacturer: "Espressif", product: "ESP32-S2" },
    KnownAdapter { vid: 0x2E8A, pid: 0x000A, manufacturer: "Raspberry Pi", product: "Pico" },
];

pub fn lookup_adapter(vid: u16, pid: u16) -> Option<&'static KnownAdapter> {
    KNOWN_ADAPTERS.iter().find(|a| a.vid == vid && a.pid == pid)
}

/// Display label: known adapter, then product string, then the bare address.
pub fn display_label(port: &SerialPortInfo) -> String {
    if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
        if let Some(adapter) = lookup_adapter(vid, pid) {
            return format!("{} - {} {}", port.address, adapter.manufacturer, adapter.product);
        }
    }
    match port.product.as_deref() {
        Some(product) if !product.is_empty() => format!("{} - {}", port.address, product),
        _ => port.address.clone(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Discovery contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
pub trait DeviceDiscovery: Send + Sync {
    /// Every port currently present.
    async fn list(&self) -> Vec<SerialPortInfo>;

    /// The port at `address`, if present.
    async fn find(&self, address: &str) -> Option<SerialPortInfo> {
        self.list().await.into_iter().find(|p| p.address == address)
    }
}

/// Discovery backed by the operating system's port enumeration.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDiscovery;

impl SystemDiscovery {
    pub fn new() -> Self {
        Self
    }
}

fn convert(port: serialport::SerialPortInfo) -> SerialPortInfo {
    let mut info = match port.port_type {
        serialport::SerialPortType::UsbPort(usb) => SerialPortInfo {
            manufacturer: usb.manufacturer,
            product: usb.product,
            vid: Some(usb.vid),
            pid: Some(usb.pid),
            serial_number: usb.serial_number,
            ..SerialPortInfo::bare(&port.port_name, PortType::UsbSerial)
        },
        serialport::SerialPortType::PciPort => SerialPortInfo::bare(&port.port_name, PortType::Pci),
        serialport::SerialPortType::BluetoothPort => {
            SerialPortInfo::bare(&port.port_name, PortType::Bluetooth)
        }
        serialport::SerialPortType::Unknown => {
            SerialPortInfo::bare(&port.port_name, PortType::Unknown)
        }
    };
    info.label = display_label(&info);
    info
}

#[async_trait::async_trait]
impl DeviceDiscovery for SystemDiscovery {
    async fn list(&self) -> Vec<SerialPortInfo> {
        let listed = tokio::task::spawn_blocking(serialport::available_ports).await;
        match listed {
            Ok(Ok(ports)) => ports.into_iter().map(convert).collect(),
            Ok(Err(e)) => {
                log::warn!("Serial port enumeration failed: {}", e);
                Vec::new()
            }
            Err(e) => {
                log::warn!("Serial port enumeration task failed: {}", e);
                Vec::new()
            }
        }
    }
}
