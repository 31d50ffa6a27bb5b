//! Stateful stream receivers for peripheral-to-host message families.
//!
//! Each receiver attaches to a link's dispatch registry under its family's
//! discriminator(s), reassembles fragments into logical units on a spawned
//! assembler task, and publishes completed units through a bounded
//! [`DeliveryQueue`]. Detaching unregisters the codes, cancels the assembler,
//! and moves the queue to its closed state so a blocked consumer unblocks
//! deterministically.

mod audio;
mod imu;
mod photo;
mod tap;

pub use audio::{RxAudio, RxAudioConfig};
pub use imu::{ImuSample, ImuUpdate, RxImu};
pub use photo::RxPhoto;
pub use tap::RxTap;

use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::dispatch::{Dispatch, FragmentSink};
use crate::error::DispatchError;

/// Bounded (capacity 1) delivery queue with replace-pending backpressure and
/// a first-class closed state.
///
/// If the consumer has not taken the pending unit when the next one
/// completes, the pending unit is replaced (recency over completeness); the
/// delivery path never blocks. After the producer closes, `recv` returns
/// `None` - closure is the terminal state, there is no in-band sentinel.
pub struct DeliveryQueue<T> {
    shared: Arc<QueueShared<T>>,
}

pub(crate) struct DeliverySender<T> {
    shared: Arc<QueueShared<T>>,
}

struct QueueShared<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
}

struct QueueState<T> {
    pending: Option<T>,
    closed: bool,
    dropped: u64,
}

pub(crate) fn delivery_queue<T>() -> (DeliverySender<T>, DeliveryQueue<T>) {
    let shared = Arc::new(QueueShared {
        state: Mutex::new(QueueState { pending: None, closed: false, dropped: 0 }),
        notify: Notify::new(),
    });
    (DeliverySender { shared: Arc::clone(&shared) }, DeliveryQueue { shared })
}

impl<T> DeliveryQueue<T> {
    /// Wait for the next completed unit.
    ///
    /// Returns `None` once the receiver has been detached (or the link died).
    /// Timeouts are the caller's responsibility (`tokio::time::timeout`); a
    /// timed-out wait leaves the queue and any in-progress reassembly intact.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            // The notified future is created before the state check; Notify
            // stores a permit, so a push between check and await still wakes.
            let notified = self.shared.notify.notified();
            {
                let mut state = self.shared.state.lock().expect("delivery queue poisoned");
                if let Some(unit) = state.pending.take() {
                    return Some(unit);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Adapt the queue into a [`futures::Stream`] that ends when the
    /// receiver detaches.
    pub fn into_stream(self) -> impl futures::Stream<Item = T> {
        futures::stream::unfold(self, |mut queue| async move {
            queue.recv().await.map(|unit| (unit, queue))
        })
    }

    /// Take the pending unit without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        self.shared.state.lock().expect("delivery queue poisoned").pending.take()
    }

    /// Whether the producer side has closed.
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().expect("delivery queue poisoned").closed
    }

    /// Number of completed units replaced before the consumer took them.
    pub fn dropped(&self) -> u64 {
        self.shared.state.lock().expect("delivery queue poisoned").dropped
    }
}

impl<T> DeliverySender<T> {
    /// Publish a completed unit, replacing any unconsumed pending unit.
    pub(crate) fn push(&self, unit: T) {
        let mut state = self.shared.state.lock().expect("delivery queue poisoned");
        if state.closed {
            return;
        }
        if state.pending.replace(unit).is_some() {
            state.dropped += 1;
            debug!("pending unit replaced before consumption ({} dropped)", state.dropped);
        }
        drop(state);
        self.shared.notify.notify_one();
    }

    fn close(&self) {
        self.shared.state.lock().expect("delivery queue poisoned").closed = true;
        self.shared.notify.notify_one();
    }
}

impl<T> Drop for DeliverySender<T> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Registration handle for one attached receiver.
pub(crate) struct Attachment {
    codes: Vec<u8>,
    cancel: CancellationToken,
}

impl Attachment {
    pub(crate) fn new(codes: Vec<u8>, cancel: CancellationToken) -> Self {
        Self { codes, cancel }
    }
}

/// Register a sink under several codes, rolling back on conflict.
pub(crate) fn register_codes(
    dispatch: &Dispatch,
    codes: &[u8],
    sink: &FragmentSink,
) -> Result<(), DispatchError> {
    for (i, &code) in codes.iter().enumerate() {
        if let Err(e) = dispatch.register(code, sink.clone()) {
            for &bound in &codes[..i] {
                dispatch.unregister(bound);
            }
            return Err(e);
        }
    }
    Ok(())
}

/// Detach helper shared by the family receivers: unregister and cancel the
/// assembler exactly once; later calls (or calls without a prior attach) are
/// no-ops.
pub(crate) fn detach(state: &Mutex<Option<Attachment>>, dispatch: &Dispatch) {
    if let Some(attachment) = state.lock().expect("receiver state poisoned").take() {
        for code in &attachment.codes {
            dispatch.unregister(*code);
        }
        attachment.cancel.cancel();
    }
}
