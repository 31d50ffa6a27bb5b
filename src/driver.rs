//! Driver task that owns the radio for the lifetime of a connection.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::LinkError;
use crate::link::{DATA_FLAG, LinkShared};
use crate::radio::Radio;

/// Commands from the link handle to the driver task.
///
/// Transmits carry a completion channel so callers suspend until the link
/// layer accepts each packet; that is the flow-control boundary.
pub(crate) enum LinkCommand {
    Transmit { packet: Vec<u8>, done: oneshot::Sender<Result<(), LinkError>> },
    Disconnect { done: oneshot::Sender<()> },
}

/// Driver spawns and manages the connection's I/O task.
///
/// The task is the sole owner of the radio: outbound packets arrive over the
/// command channel, inbound packets are routed to dispatch or the control
/// path. Inbound routing never blocks and never transmits inline.
pub(crate) struct Driver;

enum Event {
    Cancelled,
    Command(Option<LinkCommand>),
    Inbound(Result<Option<Vec<u8>>, LinkError>),
}

impl Driver {
    /// Spawn the I/O task for a connected radio.
    pub(crate) fn spawn<R: Radio>(
        radio: R,
        shared: Arc<LinkShared>,
    ) -> (mpsc::Sender<LinkCommand>, CancellationToken) {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let cancel_task = cancel.clone();

        tokio::spawn(async move {
            Self::io_task(radio, shared, cmd_rx, cancel_task).await;
        });

        (cmd_tx, cancel)
    }

    async fn io_task<R: Radio>(
        mut radio: R,
        shared: Arc<LinkShared>,
        mut commands: mpsc::Receiver<LinkCommand>,
        cancel: CancellationToken,
    ) {
        info!("link driver task started");
        let mut packet_count = 0u64;
        let mut error_count = 0u32;
        const MAX_ERRORS: u32 = 10;

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => Event::Cancelled,
                cmd = commands.recv() => Event::Command(cmd),
                inbound = radio.receive() => Event::Inbound(inbound),
            };

            match event {
                Event::Cancelled => {
                    info!("link driver cancelled");
                    let _ = radio.disconnect().await;
                    break;
                }
                Event::Command(Some(LinkCommand::Transmit { packet, done })) => {
                    let result = radio.transmit(&packet).await;
                    let lost = matches!(result, Err(LinkError::LinkLost { .. }));
                    let _ = done.send(result);
                    if lost {
                        warn!("link lost during transmit, shutting down");
                        break;
                    }
                }
                Event::Command(Some(LinkCommand::Disconnect { done })) => {
                    debug!("disconnect requested");
                    let _ = radio.disconnect().await;
                    let _ = done.send(());
                    break;
                }
                Event::Command(None) => {
                    // All link handles dropped.
                    debug!("command channel closed, disconnecting");
                    let _ = radio.disconnect().await;
                    break;
                }
                Event::Inbound(Ok(Some(packet))) => {
                    packet_count += 1;
                    error_count = 0;
                    Self::route(&shared, &packet);
                }
                Event::Inbound(Ok(None)) => {
                    info!("link closed by peer after {} packets", packet_count);
                    break;
                }
                Event::Inbound(Err(e)) => {
                    error_count += 1;
                    warn!("radio receive error ({}/{}): {}", error_count, MAX_ERRORS, e);
                    if error_count >= MAX_ERRORS {
                        warn!("too many radio errors, shutting down");
                        break;
                    }
                    let backoff =
                        std::time::Duration::from_millis(50 * (1 << error_count.min(5)));
                    tokio::time::sleep(backoff).await;
                }
            }
        }

        // Tear down shared state so waiters observe the closed link: fragment
        // channels close, delivery queues drain to their terminal state, and a
        // pending lua response resolves as lost rather than hanging.
        shared.connected.store(false, Ordering::SeqCst);
        shared.dispatch.clear();
        shared.pending_print.lock().expect("print slot poisoned").take();
        shared.print_subscribers.lock().expect("print subscribers poisoned").clear();

        info!("link driver task ended ({} packets routed)", packet_count);
    }

    /// Route one inbound packet to the data or control sub-channel.
    fn route(shared: &LinkShared, packet: &[u8]) {
        match packet.first() {
            Some(&DATA_FLAG) => {
                trace!("data packet, {} bytes", packet.len() - 1);
                shared.dispatch.dispatch(&packet[1..]);
            }
            Some(_) => {
                let text = String::from_utf8_lossy(packet).into_owned();
                trace!("control text: {:?}", text);

                // A caller awaiting a print response takes priority; anything
                // else fans out to diagnostic subscribers verbatim.
                let pending =
                    shared.pending_print.lock().expect("print slot poisoned").take();
                if let Some(slot) = pending {
                    if let Err(unclaimed) = slot.send(text) {
                        debug!("print response arrived after waiter gave up: {:?}", unclaimed);
                    }
                } else {
                    let mut subscribers =
                        shared.print_subscribers.lock().expect("print subscribers poisoned");
                    subscribers.retain(|sub| sub.send(text.clone()).is_ok());
                }
            }
            None => {
                trace!("empty packet ignored");
            }
        }
    }
}
