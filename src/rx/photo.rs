//! Photo receiver: reassembles JPEG fragments into whole images.

use std::sync::Mutex;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::dispatch::Fragment;
use crate::error::DispatchError;
use crate::link::Link;
use crate::messages::codes;
use crate::rx::{self, Attachment, DeliveryQueue, DeliverySender, delivery_queue, register_codes};

/// Receiver for camera photos.
///
/// A photo arrives as a run of fragments under [`codes::PHOTO_NON_FINAL`]
/// closed by one under [`codes::PHOTO_FINAL`]; the assembled unit is the
/// concatenated image bytes (typically a JPEG).
#[derive(Default)]
pub struct RxPhoto {
    attachment: Mutex<Option<Attachment>>,
}

impl RxPhoto {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind to the photo codes on `link` and start the assembler.
    ///
    /// Fails if this receiver is already attached or the codes are taken.
    pub fn attach(&self, link: &Link) -> Result<DeliveryQueue<Vec<u8>>, DispatchError> {
        let mut slot = self.attachment.lock().expect("receiver state poisoned");
        if slot.is_some() {
            return Err(DispatchError::AlreadyBound { code: codes::PHOTO_NON_FINAL });
        }

        let (frag_tx, frag_rx) = mpsc::unbounded_channel();
        let bound = vec![codes::PHOTO_NON_FINAL, codes::PHOTO_FINAL];
        register_codes(link.dispatch(), &bound, &frag_tx)?;

        let cancel = CancellationToken::new();
        let (sender, queue) = delivery_queue();
        tokio::spawn(assemble(frag_rx, sender, cancel.clone()));

        *slot = Some(Attachment::new(bound, cancel));
        Ok(queue)
    }

    /// Unbind and stop the assembler. Idempotent; any queued photo already
    /// delivered stays readable, further `recv` calls return `None`.
    pub fn detach(&self, link: &Link) {
        rx::detach(&self.attachment, link.dispatch());
    }
}

async fn assemble(
    mut fragments: mpsc::UnboundedReceiver<Fragment>,
    sender: DeliverySender<Vec<u8>>,
    cancel: CancellationToken,
) {
    let mut image: Vec<u8> = Vec::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            fragment = fragments.recv() => {
                let Some(fragment) = fragment else { break };
                image.extend_from_slice(&fragment.payload);
                if fragment.code == codes::PHOTO_FINAL {
                    debug!("photo assembled, {} bytes", image.len());
                    sender.push(std::mem::take(&mut image));
                }
            }
        }
    }
    // Sender drop closes the queue; a partially accumulated image is
    // discarded rather than delivered truncated.
}
