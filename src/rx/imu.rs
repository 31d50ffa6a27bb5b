//! Motion receiver: decodes IMU samples and smooths them over a rolling
//! window.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::dispatch::Fragment;
use crate::error::{CodecError, DispatchError};
use crate::link::Link;
use crate::messages::codes;
use crate::rx::{self, Attachment, DeliveryQueue, DeliverySender, delivery_queue, register_codes};

/// One motion sample: magnetometer and accelerometer axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImuSample {
    pub compass: [i16; 3],
    pub accel: [i16; 3],
}

impl ImuSample {
    /// Decode the 12-byte wire form: six big-endian i16, compass first.
    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() != 12 {
            return Err(CodecError::malformed(
                "ImuSample",
                format!("expected 12 bytes, got {}", bytes.len()),
            ));
        }
        let axis = |i: usize| i16::from_be_bytes([bytes[i], bytes[i + 1]]);
        Ok(Self {
            compass: [axis(0), axis(2), axis(4)],
            accel: [axis(6), axis(8), axis(10)],
        })
    }

    /// Pitch angle in degrees derived from the accelerometer.
    pub fn pitch(&self) -> f64 {
        let [x, y, z] = self.accel.map(f64::from);
        y.atan2((x * x + z * z).sqrt()).to_degrees()
    }

    /// Roll angle in degrees derived from the accelerometer.
    pub fn roll(&self) -> f64 {
        let [x, _, z] = self.accel.map(f64::from);
        x.atan2(z).to_degrees()
    }
}

/// One delivered motion update: the raw sample and its rolling average.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImuUpdate {
    pub raw: ImuSample,
    /// Mean over the last few samples; equals `raw` until the window fills.
    pub smoothed: ImuSample,
}

/// Receiver for streamed IMU samples under [`codes::IMU_DATA`].
pub struct RxImu {
    smoothing_samples: usize,
    attachment: Mutex<Option<Attachment>>,
}

impl Default for RxImu {
    fn default() -> Self {
        Self::new()
    }
}

impl RxImu {
    pub fn new() -> Self {
        Self::with_smoothing(5)
    }

    /// Rolling-average window of `samples` samples (at least 1).
    pub fn with_smoothing(samples: usize) -> Self {
        Self { smoothing_samples: samples.max(1), attachment: Mutex::new(None) }
    }

    /// Bind to [`codes::IMU_DATA`] on `link` and start decoding.
    pub fn attach(&self, link: &Link) -> Result<DeliveryQueue<ImuUpdate>, DispatchError> {
        let mut slot = self.attachment.lock().expect("receiver state poisoned");
        if slot.is_some() {
            return Err(DispatchError::AlreadyBound { code: codes::IMU_DATA });
        }

        let (frag_tx, frag_rx) = mpsc::unbounded_channel();
        let bound = vec![codes::IMU_DATA];
        register_codes(link.dispatch(), &bound, &frag_tx)?;

        let cancel = CancellationToken::new();
        let (sender, queue) = delivery_queue();
        tokio::spawn(decode(frag_rx, sender, cancel.clone(), self.smoothing_samples));

        *slot = Some(Attachment::new(bound, cancel));
        Ok(queue)
    }

    /// Unbind and stop decoding. Idempotent.
    pub fn detach(&self, link: &Link) {
        rx::detach(&self.attachment, link.dispatch());
    }
}

async fn decode(
    mut fragments: mpsc::UnboundedReceiver<Fragment>,
    sender: DeliverySender<ImuUpdate>,
    cancel: CancellationToken,
    window: usize,
) {
    let mut history: VecDeque<ImuSample> = VecDeque::with_capacity(window);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            fragment = fragments.recv() => {
                let Some(fragment) = fragment else { return };
                let raw = match ImuSample::decode(&fragment.payload) {
                    Ok(sample) => sample,
                    Err(e) => {
                        // A corrupt sample must not stop the stream.
                        warn!("dropping imu sample: {e}");
                        continue;
                    }
                };
                if history.len() == window {
                    history.pop_front();
                }
                history.push_back(raw);
                sender.push(ImuUpdate { raw, smoothed: mean(&history) });
            }
        }
    }
}

fn mean(samples: &VecDeque<ImuSample>) -> ImuSample {
    let n = samples.len() as i64;
    let mut compass = [0i64; 3];
    let mut accel = [0i64; 3];
    for s in samples {
        for axis in 0..3 {
            compass[axis] += s.compass[axis] as i64;
            accel[axis] += s.accel[axis] as i64;
        }
    }
    ImuSample {
        compass: compass.map(|v| (v / n) as i16),
        accel: accel.map(|v| (v / n) as i16),
    }
}
