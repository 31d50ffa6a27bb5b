//! Transport link to the wearable peripheral.
//!
//! A [`Link`] multiplexes two logical sub-channels over one physical packet
//! stream: a control sub-channel carrying script/print text and short
//! sentinels, and a data sub-channel carrying typed messages (packets flagged
//! with a leading [`DATA_FLAG`] byte). Outbound byte sequences are fragmented
//! to the negotiated MTU; every transmit suspends the caller until the link
//! layer accepts the packet.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::dispatch::Dispatch;
use crate::driver::{Driver, LinkCommand};
use crate::error::LinkError;
use crate::radio::Radio;

/// Leading byte marking a packet as data sub-channel traffic.
pub const DATA_FLAG: u8 = 0x01;

/// Control sentinel: abort the peripheral's current script loop.
pub const BREAK_SIGNAL: u8 = 0x03;

/// Control sentinel: reinitialize the peripheral's runtime memory.
pub const RESET_SIGNAL: u8 = 0x04;

/// Conservative usable payload per packet when MTU negotiation is
/// unsupported.
pub const DEFAULT_MAX_PAYLOAD: usize = 200;

/// ATT header overhead subtracted from the negotiated MTU.
const ATT_OVERHEAD: usize = 3;

/// Smallest ATT MTU that counts as a successful negotiation.
const MIN_ATT_MTU: u16 = 23;

/// Configuration for a link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Bound on the connection handshake.
    pub connect_timeout: Duration,
    /// Bound on waiting for a print response in [`Link::send_lua`].
    pub lua_response_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            lua_response_timeout: Duration::from_secs(5),
        }
    }
}

/// State shared between the link handle and its driver task.
pub(crate) struct LinkShared {
    pub(crate) dispatch: Dispatch,
    pub(crate) connected: AtomicBool,
    /// A caller awaiting the next print response, if any.
    pub(crate) pending_print: Mutex<Option<oneshot::Sender<String>>>,
    /// Verbatim control-channel text fan-out.
    pub(crate) print_subscribers: Mutex<Vec<mpsc::UnboundedSender<String>>>,
}

/// Connection to the peripheral.
///
/// Created with [`Link::connect`]; the radio is handed to a driver task that
/// owns it until disconnect. Dropping the link cancels the driver.
pub struct Link {
    shared: Arc<LinkShared>,
    commands: mpsc::Sender<LinkCommand>,
    cancel: CancellationToken,
    max_payload: usize,
    config: LinkConfig,
}

impl Link {
    /// Connect with default configuration.
    pub async fn connect<R: Radio>(radio: R) -> Result<Self, LinkError> {
        Self::connect_with(radio, LinkConfig::default()).await
    }

    /// Establish the link and spawn the driver task.
    ///
    /// Negotiates the MTU through the radio, falling back to
    /// [`DEFAULT_MAX_PAYLOAD`] usable bytes when the radio reports an MTU
    /// below the ATT minimum (negotiation unsupported).
    pub async fn connect_with<R: Radio>(
        mut radio: R,
        config: LinkConfig,
    ) -> Result<Self, LinkError> {
        let att_mtu = tokio::time::timeout(config.connect_timeout, radio.connect())
            .await
            .map_err(|_| LinkError::timeout(config.connect_timeout))??;

        let max_payload = if att_mtu >= MIN_ATT_MTU {
            att_mtu as usize - ATT_OVERHEAD
        } else {
            DEFAULT_MAX_PAYLOAD
        };
        info!("link established, att_mtu={}, max_payload={}", att_mtu, max_payload);

        let shared = Arc::new(LinkShared {
            dispatch: Dispatch::new(),
            connected: AtomicBool::new(true),
            pending_print: Mutex::new(None),
            print_subscribers: Mutex::new(Vec::new()),
        });
        let (commands, cancel) = Driver::spawn(radio, Arc::clone(&shared));

        Ok(Self { shared, commands, cancel, max_payload, config })
    }

    /// Usable bytes per physical packet.
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Largest lua string accepted by [`Link::send_lua`].
    pub fn max_lua_payload(&self) -> usize {
        self.max_payload
    }

    /// Largest single-packet data payload accepted by [`Link::send_data`].
    pub fn max_data_payload(&self) -> usize {
        self.max_payload - 1
    }

    /// Whether the driver still holds an active connection.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// The inbound message registry for this connection.
    pub fn dispatch(&self) -> &Dispatch {
        &self.shared.dispatch
    }

    /// Number of inbound data packets dropped for want of a handler.
    pub fn unhandled_count(&self) -> u64 {
        self.shared.dispatch.unhandled_count()
    }

    /// Subscribe to verbatim control-channel text (peripheral print output
    /// and runtime errors). The boundary is intentionally opaque: free text,
    /// never parsed into structured errors.
    pub fn subscribe_print(&self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared
            .print_subscribers
            .lock()
            .expect("print subscribers poisoned")
            .push(tx);
        rx
    }

    /// [`Link::subscribe_print`] as a [`futures::Stream`].
    pub fn print_stream(&self) -> tokio_stream::wrappers::UnboundedReceiverStream<String> {
        tokio_stream::wrappers::UnboundedReceiverStream::new(self.subscribe_print())
    }

    /// Queue one packet on the driver and suspend until the link accepts it.
    async fn transmit(&self, packet: Vec<u8>) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        let (done, result) = oneshot::channel();
        self.commands
            .send(LinkCommand::Transmit { packet, done })
            .await
            .map_err(|_| LinkError::NotConnected)?;
        result.await.map_err(|_| LinkError::link_lost("driver stopped mid-send"))?
    }

    /// Send one raw data sub-channel packet.
    ///
    /// The bytes must fit a single packet; use [`Link::send_message`] for
    /// payloads that need fragmentation and peripheral-side reassembly.
    pub async fn send_data(&self, bytes: &[u8]) -> Result<(), LinkError> {
        if bytes.len() > self.max_data_payload() {
            return Err(LinkError::PayloadTooLong {
                size: bytes.len(),
                max: self.max_data_payload(),
            });
        }
        let mut packet = Vec::with_capacity(1 + bytes.len());
        packet.push(DATA_FLAG);
        packet.extend_from_slice(bytes);
        self.transmit(packet).await
    }

    /// Send a typed message on the data sub-channel, fragmenting to the MTU.
    ///
    /// Wire format per packet: `[DATA_FLAG, code, ...]`; the first packet
    /// additionally carries the total payload length as a big-endian u16 so
    /// the peripheral can accumulate until the declared size is reached.
    ///
    /// Packets are sent strictly in order, each one a flow-control suspension
    /// point. A mid-send failure is not rolled back: the peripheral is left
    /// in an undefined partial-receive state and the caller must
    /// resynchronize, typically via [`Link::send_reset_signal`].
    pub async fn send_message(&self, code: u8, payload: &[u8]) -> Result<(), LinkError> {
        if payload.len() > u16::MAX as usize {
            return Err(LinkError::PayloadTooLong {
                size: payload.len(),
                max: u16::MAX as usize,
            });
        }
        let first_budget = self.max_payload - 4;
        let cont_budget = self.max_payload - 2;

        let first_len = payload.len().min(first_budget);
        let mut packet = Vec::with_capacity(4 + first_len);
        packet.push(DATA_FLAG);
        packet.push(code);
        packet.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        packet.extend_from_slice(&payload[..first_len]);
        self.transmit(packet).await?;

        let mut sent = first_len;
        while sent < payload.len() {
            let chunk = (payload.len() - sent).min(cont_budget);
            let mut packet = Vec::with_capacity(2 + chunk);
            packet.push(DATA_FLAG);
            packet.push(code);
            packet.extend_from_slice(&payload[sent..sent + chunk]);
            self.transmit(packet).await?;
            sent += chunk;
        }
        debug!("message {:#04x} sent, {} payload bytes", code, payload.len());
        Ok(())
    }

    /// Send a lua string on the control sub-channel.
    ///
    /// The string must fit one packet. With `await_print` the call suspends
    /// until the peripheral prints a response or
    /// `LinkConfig::lua_response_timeout` elapses; only one caller may await
    /// a response at a time.
    pub async fn send_lua(
        &self,
        code: &str,
        await_print: bool,
    ) -> Result<Option<String>, LinkError> {
        let bytes = code.as_bytes();
        if bytes.len() > self.max_lua_payload() {
            return Err(LinkError::PayloadTooLong {
                size: bytes.len(),
                max: self.max_lua_payload(),
            });
        }

        let response = if await_print {
            let (tx, rx) = oneshot::channel();
            {
                let mut slot = self.shared.pending_print.lock().expect("print slot poisoned");
                if slot.is_some() {
                    return Err(LinkError::radio("another caller is awaiting a print response"));
                }
                *slot = Some(tx);
            }
            Some(rx)
        } else {
            None
        };

        if let Err(e) = self.transmit(bytes.to_vec()).await {
            self.shared.pending_print.lock().expect("print slot poisoned").take();
            return Err(e);
        }

        match response {
            None => Ok(None),
            Some(rx) => {
                match tokio::time::timeout(self.config.lua_response_timeout, rx).await {
                    Ok(Ok(text)) => Ok(Some(text)),
                    Ok(Err(_)) => Err(LinkError::link_lost("driver stopped awaiting print")),
                    Err(_) => {
                        self.shared.pending_print.lock().expect("print slot poisoned").take();
                        Err(LinkError::timeout(self.config.lua_response_timeout))
                    }
                }
            }
        }
    }

    /// Abort the peripheral's current script loop. Fire-and-forget.
    pub async fn send_break_signal(&self) -> Result<(), LinkError> {
        self.transmit(vec![BREAK_SIGNAL]).await
    }

    /// Reinitialize the peripheral's runtime memory. Fire-and-forget.
    pub async fn send_reset_signal(&self) -> Result<(), LinkError> {
        self.transmit(vec![RESET_SIGNAL]).await
    }

    /// Release the connection. Idempotent; safe when already disconnected.
    pub async fn disconnect(&self) {
        if !self.is_connected() {
            return;
        }
        let (done, finished) = oneshot::channel();
        if self.commands.send(LinkCommand::Disconnect { done }).await.is_ok() {
            let _ = finished.await;
        }
        self.cancel.cancel();
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        debug!("dropping link");
        self.cancel.cancel();
    }
}
