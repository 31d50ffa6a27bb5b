//! Audio receiver: windows a fragment stream into fixed-size chunks.

use std::sync::Mutex;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::dispatch::Fragment;
use crate::error::DispatchError;
use crate::link::Link;
use crate::messages::codes;
use crate::rx::{self, Attachment, DeliveryQueue, DeliverySender, delivery_queue, register_codes};

/// Windowing configuration for [`RxAudio`].
#[derive(Debug, Clone)]
pub struct RxAudioConfig {
    /// Bytes per delivered window. Raw PCM as sent by the peripheral
    /// microphone; sample format is between the apps on both sides.
    pub window_bytes: usize,
}

impl Default for RxAudioConfig {
    fn default() -> Self {
        Self { window_bytes: 4096 }
    }
}

/// Receiver for streamed microphone audio.
///
/// Fragments under [`codes::AUDIO_NON_FINAL`] accumulate into windows of
/// `window_bytes`; each full window is delivered as one unit. A fragment
/// under [`codes::AUDIO_FINAL`] ends the stream: the remaining partial
/// window is flushed and the queue closes. A new stream needs a new attach.
pub struct RxAudio {
    config: RxAudioConfig,
    attachment: Mutex<Option<Attachment>>,
}

impl RxAudio {
    pub fn new(config: RxAudioConfig) -> Self {
        Self { config, attachment: Mutex::new(None) }
    }

    /// Bind to the audio codes on `link` and start windowing.
    pub fn attach(&self, link: &Link) -> Result<DeliveryQueue<Vec<u8>>, DispatchError> {
        let mut slot = self.attachment.lock().expect("receiver state poisoned");
        if slot.is_some() {
            return Err(DispatchError::AlreadyBound { code: codes::AUDIO_NON_FINAL });
        }

        let (frag_tx, frag_rx) = mpsc::unbounded_channel();
        let bound = vec![codes::AUDIO_NON_FINAL, codes::AUDIO_FINAL];
        register_codes(link.dispatch(), &bound, &frag_tx)?;

        let cancel = CancellationToken::new();
        let (sender, queue) = delivery_queue();
        let window_bytes = self.config.window_bytes.max(1);
        tokio::spawn(window(frag_rx, sender, cancel.clone(), window_bytes));

        *slot = Some(Attachment::new(bound, cancel));
        Ok(queue)
    }

    /// Unbind and stop windowing. Idempotent.
    pub fn detach(&self, link: &Link) {
        rx::detach(&self.attachment, link.dispatch());
    }
}

async fn window(
    mut fragments: mpsc::UnboundedReceiver<Fragment>,
    sender: DeliverySender<Vec<u8>>,
    cancel: CancellationToken,
    window_bytes: usize,
) {
    let mut buf: Vec<u8> = Vec::with_capacity(window_bytes);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            fragment = fragments.recv() => {
                let Some(fragment) = fragment else { return };
                let mut payload = fragment.payload.as_ref();
                while !payload.is_empty() {
                    let take = payload.len().min(window_bytes - buf.len());
                    buf.extend_from_slice(&payload[..take]);
                    payload = &payload[take..];
                    if buf.len() == window_bytes {
                        sender.push(std::mem::replace(
                            &mut buf,
                            Vec::with_capacity(window_bytes),
                        ));
                    }
                }
                if fragment.code == codes::AUDIO_FINAL {
                    if !buf.is_empty() {
                        sender.push(std::mem::take(&mut buf));
                    }
                    debug!("audio stream ended");
                    sender.close();
                    return;
                }
            }
        }
    }
}
