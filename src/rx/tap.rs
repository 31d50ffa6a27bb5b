//! Tap receiver: debounces tap events into multi-tap counts.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::dispatch::Fragment;
use crate::error::DispatchError;
use crate::link::Link;
use crate::messages::codes;
use crate::rx::{self, Attachment, DeliveryQueue, DeliverySender, delivery_queue, register_codes};

/// Receiver for tap gestures under [`codes::TAP`].
///
/// Raw tap events arriving within the quiet window of one another are
/// aggregated; once the window passes with no further tap, the count is
/// delivered as one unit (1 = single tap, 2 = double tap, ...).
pub struct RxTap {
    quiet_window: Duration,
    attachment: Mutex<Option<Attachment>>,
}

impl Default for RxTap {
    fn default() -> Self {
        Self::new()
    }
}

impl RxTap {
    pub fn new() -> Self {
        Self::with_window(Duration::from_millis(300))
    }

    /// Custom quiet window separating distinct gestures.
    pub fn with_window(quiet_window: Duration) -> Self {
        Self { quiet_window, attachment: Mutex::new(None) }
    }

    /// Bind to [`codes::TAP`] on `link` and start aggregating.
    pub fn attach(&self, link: &Link) -> Result<DeliveryQueue<u32>, DispatchError> {
        let mut slot = self.attachment.lock().expect("receiver state poisoned");
        if slot.is_some() {
            return Err(DispatchError::AlreadyBound { code: codes::TAP });
        }

        let (frag_tx, frag_rx) = mpsc::unbounded_channel();
        let bound = vec![codes::TAP];
        register_codes(link.dispatch(), &bound, &frag_tx)?;

        let cancel = CancellationToken::new();
        let (sender, queue) = delivery_queue();
        tokio::spawn(aggregate(frag_rx, sender, cancel.clone(), self.quiet_window));

        *slot = Some(Attachment::new(bound, cancel));
        Ok(queue)
    }

    /// Unbind and stop aggregating. Idempotent. A gesture still inside its
    /// quiet window at detach time is discarded.
    pub fn detach(&self, link: &Link) {
        rx::detach(&self.attachment, link.dispatch());
    }
}

async fn aggregate(
    mut fragments: mpsc::UnboundedReceiver<Fragment>,
    sender: DeliverySender<u32>,
    cancel: CancellationToken,
    quiet_window: Duration,
) {
    let mut count: u32 = 0;
    let mut deadline = Instant::now();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            fragment = fragments.recv() => {
                if fragment.is_none() {
                    return;
                }
                // The event payload carries no information; arrival is the
                // signal.
                count = count.saturating_add(1);
                deadline = Instant::now() + quiet_window;
            }
            _ = tokio::time::sleep_until(deadline), if count > 0 => {
                debug!("tap gesture complete, count={count}");
                sender.push(count);
                count = 0;
            }
        }
    }
}
