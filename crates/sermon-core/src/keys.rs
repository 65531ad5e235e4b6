//! Well-known preference keys.

/// Last selected port address.
pub const SERIAL_PORT: &str = "serial.port";
/// Baud rate used by the monitor.
pub const SERIAL_BAUD: &str = "serial.debug_rate";
pub const SERIAL_PARITY: &str = "serial.parity";
pub const SERIAL_DATA_BITS: &str = "serial.databits";
pub const SERIAL_STOP_BITS: &str = "serial.stopbits";
/// When `true`, RTS is left deasserted on open.
pub const SERIAL_DISABLE_RTS: &str = "serial.disableRTS";
/// When `true`, DTR is left deasserted on open.
pub const SERIAL_DISABLE_DTR: &str = "serial.disableDTR";
/// Send every key press immediately instead of whole lines.
pub const SERIAL_UNBUFFERED: &str = "serial.unbuffered";
pub const SERIAL_LINE_ENDING: &str = "serial.line_ending";
/// Clear the transcript when the monitor closes.
pub const SERIAL_FORGET_ON_CLOSE: &str = "serial.onclose.forget";
/// Commands kept in the input history.
pub const SERIAL_HISTORY_SIZE: &str = "serial.history.size";
/// When `true`, a command identical to the newest history entry is not
/// recorded again.
pub const SERIAL_HISTORY_DEDUPE: &str = "serial.history.dedupe";
/// Display refresh period in milliseconds.
pub const SERIAL_REFRESH_MS: &str = "serial.monitor.refresh_ms";
/// Device presence poll period in milliseconds.
pub const SERIAL_POLL_MS: &str = "serial.monitor.poll_ms";
/// Window placement as `x,y,width,height`.
pub const LAST_SERIAL_LOCATION: &str = "last.serial.location";
/// Set once the user has been warned about sending with no line ending.
pub const LINE_ENDING_ALERT_NOTIFIED: &str = "runtime.line.ending.alert.notified";
