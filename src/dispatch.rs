//! Inbound message demultiplexing by discriminator byte.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::error::DispatchError;

/// One inbound fragment of a typed message, as routed off the data
/// sub-channel.
#[derive(Debug, Clone)]
pub struct Fragment {
    /// The discriminator the fragment arrived under. Families that span two
    /// codes (non-final/final) use this to detect end-of-unit.
    pub code: u8,
    pub payload: Bytes,
}

/// Handler capability for one message code: fragments are forwarded on an
/// unbounded channel so the delivery path never blocks. Reassembly happens on
/// the receiving side (see [`crate::rx`]).
pub type FragmentSink = mpsc::UnboundedSender<Fragment>;

/// Registry mapping data sub-channel discriminators to fragment sinks.
///
/// At most one handler per code. The table is touched from the single
/// delivery path and from explicit attach/detach calls, guarded by a mutex.
#[derive(Debug, Default)]
pub struct Dispatch {
    handlers: Mutex<HashMap<u8, FragmentSink>>,
    unhandled: AtomicU64,
}

impl Dispatch {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Bind a fragment sink to a message code.
    ///
    /// Fails with `DispatchError::AlreadyBound` if a handler is already
    /// registered for that code.
    pub fn register(&self, code: u8, sink: FragmentSink) -> Result<(), DispatchError> {
        let mut handlers = self.handlers.lock().expect("dispatch table poisoned");
        if handlers.contains_key(&code) {
            return Err(DispatchError::AlreadyBound { code });
        }
        handlers.insert(code, sink);
        trace!("handler registered for code {:#04x}", code);
        Ok(())
    }

    /// Remove the handler for a message code. Idempotent.
    pub fn unregister(&self, code: u8) {
        let mut handlers = self.handlers.lock().expect("dispatch table poisoned");
        if handlers.remove(&code).is_some() {
            trace!("handler unregistered for code {:#04x}", code);
        }
    }

    /// Route one inbound data packet (`[code, fragment...]`, sub-channel flag
    /// already stripped) to the bound handler.
    ///
    /// Unbound discriminators and handlers whose receiver has gone away are
    /// dropped and counted, never fatal: a single bad fragment must not stop
    /// delivery of unrelated message families.
    pub(crate) fn dispatch(&self, packet: &[u8]) {
        let Some((&code, payload)) = packet.split_first() else {
            warn!("empty data packet dropped");
            self.unhandled.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let mut handlers = self.handlers.lock().expect("dispatch table poisoned");
        match handlers.get(&code) {
            Some(sink) => {
                let fragment = Fragment { code, payload: Bytes::copy_from_slice(payload) };
                if sink.send(fragment).is_err() {
                    // Receiver task is gone; treat the binding as stale.
                    handlers.remove(&code);
                    self.unhandled.fetch_add(1, Ordering::Relaxed);
                    trace!("stale handler removed for code {:#04x}", code);
                }
            }
            None => {
                self.unhandled.fetch_add(1, Ordering::Relaxed);
                trace!("no handler for code {:#04x}, {} bytes dropped", code, payload.len());
            }
        }
    }

    /// Number of inbound data packets dropped for want of a handler.
    pub fn unhandled_count(&self) -> u64 {
        self.unhandled.load(Ordering::Relaxed)
    }

    /// Drop every binding. Closing the fragment channels lets receiver tasks
    /// wind down when the link dies.
    pub(crate) fn clear(&self) {
        self.handlers.lock().expect("dispatch table poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> (FragmentSink, mpsc::UnboundedReceiver<Fragment>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn register_then_dispatch_forwards_fragment() {
        let dispatch = Dispatch::new();
        let (tx, mut rx) = sink();
        dispatch.register(0x07, tx).unwrap();

        dispatch.dispatch(&[0x07, 1, 2, 3]);

        let fragment = rx.try_recv().unwrap();
        assert_eq!(fragment.code, 0x07);
        assert_eq!(fragment.payload.as_ref(), &[1, 2, 3]);
        assert_eq!(dispatch.unhandled_count(), 0);
    }

    #[test]
    fn one_sink_can_serve_two_codes() {
        let dispatch = Dispatch::new();
        let (tx, mut rx) = sink();
        dispatch.register(0x07, tx.clone()).unwrap();
        dispatch.register(0x08, tx).unwrap();

        dispatch.dispatch(&[0x07, 1]);
        dispatch.dispatch(&[0x08, 2]);

        assert_eq!(rx.try_recv().unwrap().code, 0x07);
        assert_eq!(rx.try_recv().unwrap().code, 0x08);
    }

    #[test]
    fn double_register_is_rejected() {
        let dispatch = Dispatch::new();
        let (tx1, _rx1) = sink();
        let (tx2, _rx2) = sink();
        dispatch.register(0x10, tx1).unwrap();
        assert_eq!(dispatch.register(0x10, tx2), Err(DispatchError::AlreadyBound { code: 0x10 }));
    }

    #[test]
    fn unregister_is_idempotent() {
        let dispatch = Dispatch::new();
        let (tx, _rx) = sink();
        dispatch.register(0x10, tx).unwrap();
        dispatch.unregister(0x10);
        dispatch.unregister(0x10);
        dispatch.unregister(0x55); // never registered

        // Code can be bound again after unregister.
        let (tx, _rx) = sink();
        dispatch.register(0x10, tx).unwrap();
    }

    #[test]
    fn unknown_discriminator_is_counted_not_fatal() {
        let dispatch = Dispatch::new();
        let (tx, mut rx) = sink();
        dispatch.register(0x07, tx).unwrap();

        dispatch.dispatch(&[0xFF, 9, 9]);
        assert_eq!(dispatch.unhandled_count(), 1);

        // Registered traffic still delivers afterwards.
        dispatch.dispatch(&[0x07, 4]);
        assert_eq!(rx.try_recv().unwrap().payload.as_ref(), &[4]);
    }

    #[test]
    fn empty_packet_is_counted() {
        let dispatch = Dispatch::new();
        dispatch.dispatch(&[]);
        assert_eq!(dispatch.unhandled_count(), 1);
    }

    #[test]
    fn stale_sink_is_evicted() {
        let dispatch = Dispatch::new();
        let (tx, rx) = sink();
        dispatch.register(0x07, tx).unwrap();
        drop(rx);

        dispatch.dispatch(&[0x07, 1]);
        assert_eq!(dispatch.unhandled_count(), 1);

        // Binding is gone, so the code can be reused.
        let (tx, _rx) = sink();
        dispatch.register(0x07, tx).unwrap();
    }

    #[test]
    fn empty_fragment_is_delivered() {
        // A packet that is just a code carries an empty fragment (tap events).
        let dispatch = Dispatch::new();
        let (tx, mut rx) = sink();
        dispatch.register(0x09, tx).unwrap();

        dispatch.dispatch(&[0x09]);
        assert!(rx.try_recv().unwrap().payload.is_empty());
    }
}
