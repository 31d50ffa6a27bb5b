//! Radio trait for physical link backends.

use crate::error::LinkError;

/// Trait for physical link backends.
///
/// Radios abstract over the actual wireless stack (a BLE central, a serial
/// bridge, an in-process fake for tests) and handle their own platform I/O
/// internally. The link driver owns the radio for the lifetime of a
/// connection; all packet-level flow control lives behind `transmit`.
#[async_trait::async_trait]
pub trait Radio: Send + 'static {
    /// Establish the physical link to the peripheral.
    ///
    /// Returns the negotiated ATT MTU on success. Implementations that cannot
    /// negotiate should return a conservative value; the link falls back to
    /// [`crate::link::DEFAULT_MAX_PAYLOAD`] usable bytes in that case.
    ///
    /// Errors:
    /// - `LinkError::Unavailable` - no peripheral found
    /// - `LinkError::Timeout` - handshake exceeded its bound
    async fn connect(&mut self) -> Result<u16, LinkError>;

    /// Transmit one link-layer packet.
    ///
    /// Resolves only once the link layer has accepted the packet; this is the
    /// flow-control boundary, not application-level buffering. Packets are
    /// delivered to the peripheral in transmit order.
    ///
    /// Errors:
    /// - `LinkError::LinkLost` - connection dropped mid-send
    async fn transmit(&mut self, packet: &[u8]) -> Result<(), LinkError>;

    /// Receive the next inbound packet.
    ///
    /// Returns:
    /// - `Ok(Some(packet))` - next notification from the peripheral
    /// - `Ok(None)` - link closed (normal termination)
    /// - `Err(e)` - radio error
    ///
    /// Inbound packets are delivered in arrival order; the driver is the only
    /// caller. The future must be cancel-safe: the driver selects over it,
    /// and a cancelled poll must not lose a packet.
    async fn receive(&mut self) -> Result<Option<Vec<u8>>, LinkError>;

    /// Release the connection. Idempotent; safe when already disconnected.
    async fn disconnect(&mut self) -> Result<(), LinkError>;
}
