//! Serial crate: sub-modules.

pub mod types;
pub mod error;
pub mod decoder;
pub mod transport;
pub mod simulated;
pub mod discovery;
pub mod session;
pub mod reset;

// Re-export top-level items for convenience.
pub use types::*;
pub use error::{SerialError, SerialResult};
pub use decoder::StreamDecoder;
pub use transport::{SerialTransport, SystemTransportProvider, TransportProvider};
pub use simulated::{OpenFault, SimulatedBus, SimulatedTransport};
pub use discovery::{DeviceDiscovery, SystemDiscovery};
pub use session::{PortSession, StateListener, TextSink};
pub use reset::touch_for_reset;
