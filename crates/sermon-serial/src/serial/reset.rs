//! Bootloader reset touch.
//!
//! Boards with native USB CDC reset into their bootloader when the host
//! opens the port at 1200 baud and drops DTR.

use crate::serial::error::{SerialError, SerialResult};
use crate::serial::transport::TransportProvider;
use crate::serial::types::*;

/// Open `address` at 1200 8N1, deassert DTR, close. Fails with `PortBusy`
/// when the address is already held.
pub async fn touch_for_reset(provider: &dyn TransportProvider, address: &str) -> SerialResult<()> {
    let transport = provider.transport(address);
    if transport.is_open() {
        return Err(SerialError::PortBusy {
            address: address.to_string(),
        });
    }

    let config = PortConfig::new(address, BaudRate::TOUCH);
    transport.open(&config).await?;
    log::info!("[{}] Touching at {} for reset", address, config.shorthand());

    let result = transport.set_dtr(false).await;
    if let Err(e) = transport.close().await {
        log::warn!("[{}] Error closing after reset touch: {}", address, e);
    }
    result
}
