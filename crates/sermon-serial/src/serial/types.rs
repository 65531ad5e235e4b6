//! Shared types for the serial crate.
//!
//! Covers port configuration, line framing, session state, line endings,
//! text encodings, and discovered-port metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sermon_core::{keys, Preferences};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Line framing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Symbol rate of the link. Any value is accepted here; the driver decides
/// whether it can honour it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BaudRate(pub u32);

impl BaudRate {
    pub const DEFAULT: BaudRate = BaudRate(9600);

    /// Rate used by the bootloader reset touch.
    pub const TOUCH: BaudRate = BaudRate(1200);

    /// Rates offered by the monitor's rate picker.
    pub const STANDARD: [u32; 17] = [
        300, 1200, 2400, 4800, 9600, 19200, 38400, 57600, 74880, 115200, 230400, 250000,
        460800, 500000, 921600, 1000000, 2000000,
    ];

    pub fn value(&self) -> u32 {
        self.0
    }

    pub fn is_standard(&self) -> bool {
        Self::STANDARD.contains(&self.0)
    }

    /// Picker label, e.g. `"115200 baud"`.
    pub fn label(&self) -> String {
        format!("{} baud", self.0)
    }

    /// Parse a picker label or a bare number.
    pub fn parse_label(label: &str) -> Option<Self> {
        let number = label.split_whitespace().next()?;
        number.parse().ok().filter(|v| *v > 0).map(BaudRate)
    }
}

impl Default for BaudRate {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataBits {
    #[serde(rename = "5")]
    Five,
    #[serde(rename = "6")]
    Six,
    #[serde(rename = "7")]
    Seven,
    #[serde(rename = "8")]
    Eight,
}

impl Default for DataBits {
    fn default() -> Self {
        Self::Eight
    }
}

impl DataBits {
    pub fn value(&self) -> u8 {
        match self {
            Self::Five => 5,
            Self::Six => 6,
            Self::Seven => 7,
            Self::Eight => 8,
        }
    }

    pub fn from_value(v: u32) -> Option<Self> {
        match v {
            5 => Some(Self::Five),
            6 => Some(Self::Six),
            7 => Some(Self::Seven),
            8 => Some(Self::Eight),
            _ => None,
        }
    }
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Parity {
    None,
    Even,
    Odd,
}

impl Default for Parity {
    fn default() -> Self {
        Self::None
    }
}

impl Parity {
    pub fn label(&self) -> &'static str {
        match self {
            Self::None => "N",
            Self::Even => "E",
            Self::Odd => "O",
        }
    }

    /// Parse the persisted form, which only looks at the first character.
    /// Unknown letters mean no parity.
    pub fn from_code(code: &str) -> Self {
        match code.trim().chars().next().map(|c| c.to_ascii_uppercase()) {
            Some('E') => Self::Even,
            Some('O') => Self::Odd,
            _ => Self::None,
        }
    }
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBits {
    #[serde(rename = "1")]
    One,
    #[serde(rename = "1.5")]
    OnePointFive,
    #[serde(rename = "2")]
    Two,
}

impl Default for StopBits {
    fn default() -> Self {
        Self::One
    }
}

impl StopBits {
    pub fn label(&self) -> &'static str {
        match self {
            Self::One => "1",
            Self::OnePointFive => "1.5",
            Self::Two => "2",
        }
    }

    /// Anything other than exactly 1.5 or 2 means one stop bit.
    pub fn from_f32(v: f32) -> Self {
        if (v - 1.5).abs() < f32::EPSILON {
            Self::OnePointFive
        } else if (v - 2.0).abs() < f32::EPSILON {
            Self::Two
        } else {
            Self::One
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Port Configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Complete serial port configuration. Treated as immutable while a session
/// is open; changing any field means close + reopen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortConfig {
    /// Port address (e.g. `COM3`, `/dev/ttyACM0`).
    pub address: String,

    #[serde(default)]
    pub baud_rate: BaudRate,

    #[serde(default)]
    pub parity: Parity,

    #[serde(default)]
    pub data_bits: DataBits,

    #[serde(default)]
    pub stop_bits: StopBits,

    /// Assert RTS on open.
    #[serde(default = "default_true")]
    pub rts_asserted: bool,

    /// Assert DTR on open.
    #[serde(default = "default_true")]
    pub dtr_asserted: bool,
}

fn default_true() -> bool {
    true
}

impl PortConfig {
    /// 8N1 at the default rate with both control lines asserted.
    pub fn new(address: impl Into<String>, baud_rate: BaudRate) -> Self {
        Self {
            address: address.into(),
            baud_rate,
            parity: Parity::default(),
            data_bits: DataBits::default(),
            stop_bits: StopBits::default(),
            rts_asserted: true,
            dtr_asserted: true,
        }
    }

    /// Build a configuration from persisted preferences. Missing values fall
    /// back to 9600 8N1 with RTS and DTR asserted.
    pub fn from_preferences(prefs: &dyn Preferences) -> Self {
        let address = prefs.get(keys::SERIAL_PORT).unwrap_or_default();
        let data_bits = DataBits::from_value(prefs.get_u32(keys::SERIAL_DATA_BITS, 8))
            .unwrap_or_default();
        Self {
            address,
            baud_rate: BaudRate(prefs.get_u32(keys::SERIAL_BAUD, BaudRate::DEFAULT.0)),
            parity: Parity::from_code(&prefs.get_non_empty(keys::SERIAL_PARITY, "N")),
            data_bits,
            stop_bits: StopBits::from_f32(prefs.get_f32(keys::SERIAL_STOP_BITS, 1.0)),
            rts_asserted: !prefs.get_bool(keys::SERIAL_DISABLE_RTS, false),
            dtr_asserted: !prefs.get_bool(keys::SERIAL_DISABLE_DTR, false),
        }
    }

    /// Same address and rate with framing reset to 8N1. Used to retry after
    /// the driver rejected the requested line parameters.
    pub fn with_default_line_params(&self) -> Self {
        Self {
            parity: Parity::None,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            ..self.clone()
        }
    }

    pub fn with_baud_rate(&self, baud_rate: BaudRate) -> Self {
        Self {
            baud_rate,
            ..self.clone()
        }
    }

    /// Shorthand notation (e.g. "9600-8N1").
    pub fn shorthand(&self) -> String {
        format!(
            "{}-{}{}{}",
            self.baud_rate.value(),
            self.data_bits.value(),
            self.parity.label(),
            self.stop_bits.label()
        )
    }
}

impl Default for PortConfig {
    fn default() -> Self {
        Self::new(String::new(), BaudRate::DEFAULT)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Line endings & encodings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Line ending appended to a submitted command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LineEnding {
    None,
    /// `\n`
    Newline,
    /// `\r`
    CarriageReturn,
    /// `\r\n`
    Both,
}

impl Default for LineEnding {
    fn default() -> Self {
        Self::Newline
    }
}

impl LineEnding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Newline => "\n",
            Self::CarriageReturn => "\r",
            Self::Both => "\r\n",
        }
    }

    /// Picker index, in the order the monitor lists them.
    pub fn index(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Newline => 1,
            Self::CarriageReturn => 2,
            Self::Both => 3,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::None),
            1 => Some(Self::Newline),
            2 => Some(Self::CarriageReturn),
            3 => Some(Self::Both),
            _ => None,
        }
    }

    /// Persisted key, stable across releases.
    pub fn key(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Newline => "nl",
            Self::CarriageReturn => "cr",
            Self::Both => "crlf",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key.trim() {
            "none" => Some(Self::None),
            "nl" => Some(Self::Newline),
            "cr" => Some(Self::CarriageReturn),
            "crlf" => Some(Self::Both),
            _ => None,
        }
    }

    /// `command` with this line ending appended.
    pub fn apply(&self, command: &str) -> String {
        let mut out = String::with_capacity(command.len() + 2);
        out.push_str(command);
        out.push_str(self.as_str());
        out
    }
}

/// Text encoding the incoming byte stream is decoded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TextEncoding {
    Utf8,
    /// ISO-8859-1: every byte maps to the code point of the same value.
    Latin1,
    /// 7-bit ASCII; bytes above 0x7F are malformed.
    Ascii,
}

impl Default for TextEncoding {
    fn default() -> Self {
        Self::Utf8
    }
}

impl TextEncoding {
    /// Longest byte sequence a single character can occupy.
    pub fn max_sequence_len(&self) -> usize {
        match self {
            Self::Utf8 => 4,
            Self::Latin1 | Self::Ascii => 1,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Utf8 => "UTF-8",
            Self::Latin1 => "ISO-8859-1",
            Self::Ascii => "US-ASCII",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Port Information
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Information about a discovered serial device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerialPortInfo {
    /// System port address (e.g. `COM3`, `/dev/ttyUSB0`).
    pub address: String,

    pub port_type: PortType,

    /// Manufacturer string.
    pub manufacturer: Option<String>,

    /// USB product string.
    pub product: Option<String>,

    /// USB Vendor ID (if USB-serial adapter).
    pub vid: Option<u16>,

    /// USB Product ID (if USB-serial adapter).
    pub pid: Option<u16>,

    /// USB serial number.
    pub serial_number: Option<String>,

    /// Friendly / display name.
    pub label: String,
}

impl SerialPortInfo {
    /// Minimal record for a port known only by address.
    pub fn bare(address: impl Into<String>, port_type: PortType) -> Self {
        let address = address.into();
        Self {
            label: address.clone(),
            address,
            port_type,
            manufacturer: None,
            product: None,
            vid: None,
            pid: None,
            serial_number: None,
        }
    }
}

/// Type of serial port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PortType {
    UsbSerial,
    Native,
    Pci,
    Bluetooth,
    Unknown,
}

impl PortType {
    pub fn label(&self) -> &'static str {
        match self {
            Self::UsbSerial => "USB-Serial",
            Self::Native => "Native",
            Self::Pci => "PCI",
            Self::Bluetooth => "Bluetooth",
            Self::Unknown => "Unknown",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lifecycle state of a port session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Closed,
    Open,
    /// Port released because the device went away; config retained for resume.
    Suspended,
}

/// Snapshot of a live session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub address: String,
    pub config_shorthand: String,
    pub state: SessionState,
    pub disposed: bool,
    pub opened_at: Option<DateTime<Utc>>,
    pub bytes_rx: u64,
    pub bytes_tx: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use sermon_core::MemoryPreferences;

    #[test]
    fn test_config_shorthand() {
        let cfg = PortConfig::new("COM3", BaudRate(115200));
        assert_eq!(cfg.shorthand(), "115200-8N1");

        let cfg = PortConfig {
            data_bits: DataBits::Seven,
            parity: Parity::Even,
            stop_bits: StopBits::OnePointFive,
            ..PortConfig::new("COM1", BaudRate(19200))
        };
        assert_eq!(cfg.shorthand(), "19200-7E1.5");
    }

    #[test]
    fn test_config_from_empty_preferences() {
        let prefs = MemoryPreferences::new();
        let cfg = PortConfig::from_preferences(&prefs);
        assert_eq!(cfg.baud_rate, BaudRate(9600));
        assert_eq!(cfg.shorthand(), "9600-8N1");
        assert!(cfg.rts_asserted);
        assert!(cfg.dtr_asserted);
    }

    #[test]
    fn test_config_from_preferences() {
        let prefs = MemoryPreferences::with_values([
            (keys::SERIAL_PORT, "/dev/ttyACM0"),
            (keys::SERIAL_BAUD, "115200"),
            (keys::SERIAL_PARITY, "odd"),
            (keys::SERIAL_DATA_BITS, "7"),
            (keys::SERIAL_STOP_BITS, "2"),
            (keys::SERIAL_DISABLE_DTR, "true"),
        ]);
        let cfg = PortConfig::from_preferences(&prefs);
        assert_eq!(cfg.address, "/dev/ttyACM0");
        assert_eq!(cfg.shorthand(), "115200-7O2");
        assert!(cfg.rts_asserted);
        assert!(!cfg.dtr_asserted);
    }

    #[test]
    fn test_default_line_params_keep_address_and_rate() {
        let cfg = PortConfig {
            parity: Parity::Odd,
            data_bits: DataBits::Five,
            ..PortConfig::new("COM9", BaudRate(250000))
        };
        let retry = cfg.with_default_line_params();
        assert_eq!(retry.address, "COM9");
        assert_eq!(retry.shorthand(), "250000-8N1");
    }

    #[test]
    fn test_baud_label_parse() {
        assert_eq!(BaudRate::parse_label("74880 baud"), Some(BaudRate(74880)));
        assert_eq!(BaudRate::parse_label("9600"), Some(BaudRate(9600)));
        assert_eq!(BaudRate::parse_label("fast"), None);
        assert_eq!(BaudRate(115200).label(), "115200 baud");
        assert!(BaudRate(74880).is_standard());
        assert!(!BaudRate(12345).is_standard());
    }

    #[test]
    fn test_line_ending_apply_and_keys() {
        assert_eq!(LineEnding::None.apply("AT"), "AT");
        assert_eq!(LineEnding::Newline.apply("AT"), "AT\n");
        assert_eq!(LineEnding::CarriageReturn.apply("AT"), "AT\r");
        assert_eq!(LineEnding::Both.apply("AT"), "AT\r\n");
        for le in [
            LineEnding::None,
            LineEnding::Newline,
            LineEnding::CarriageReturn,
            LineEnding::Both,
        ] {
            assert_eq!(LineEnding::from_key(le.key()), Some(le));
            assert_eq!(LineEnding::from_index(le.index()), Some(le));
        }
    }

    #[test]
    fn test_serde_config_defaults() {
        let cfg: PortConfig = serde_json::from_str(r#"{"address":"COM4"}"#).unwrap();
        assert_eq!(cfg.baud_rate, BaudRate(9600));
        assert!(cfg.dtr_asserted);

        let json = serde_json::to_string(&PortConfig::new("COM4", BaudRate(57600))).unwrap();
        assert!(json.contains("\"baudRate\":57600"));
        assert!(json.contains("\"stopBits\":\"1\""));
    }
}
