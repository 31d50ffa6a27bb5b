//! Shared test fixtures: an in-process fake radio and a peripheral-side
//! reassembly simulator.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::error::LinkError;
use crate::link::DATA_FLAG;
use crate::radio::Radio;

/// In-process radio: outbound packets are captured for inspection, inbound
/// packets are scripted through a [`PeerHandle`].
pub struct FakeRadio {
    att_mtu: u16,
    inbound: mpsc::UnboundedReceiver<Vec<u8>>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
}

/// Test-side handle playing the peripheral's role.
pub struct PeerHandle {
    inbound: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    outbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl FakeRadio {
    pub fn new(att_mtu: u16) -> (FakeRadio, PeerHandle) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let radio = FakeRadio { att_mtu, inbound: inbound_rx, outbound: outbound_tx };
        let peer = PeerHandle {
            inbound: Mutex::new(Some(inbound_tx)),
            outbound: tokio::sync::Mutex::new(outbound_rx),
        };
        (radio, peer)
    }
}

#[async_trait::async_trait]
impl Radio for FakeRadio {
    async fn connect(&mut self) -> Result<u16, LinkError> {
        Ok(self.att_mtu)
    }

    async fn transmit(&mut self, packet: &[u8]) -> Result<(), LinkError> {
        self.outbound
            .send(packet.to_vec())
            .map_err(|_| LinkError::link_lost("peer went away"))
    }

    async fn receive(&mut self) -> Result<Option<Vec<u8>>, LinkError> {
        // mpsc recv is cancel-safe, as the driver requires.
        Ok(self.inbound.recv().await)
    }

    async fn disconnect(&mut self) -> Result<(), LinkError> {
        self.inbound.close();
        Ok(())
    }
}

impl PeerHandle {
    /// Next packet the host transmitted, in FIFO order.
    pub async fn next_packet(&self) -> Option<Vec<u8>> {
        self.outbound.lock().await.recv().await
    }

    /// Non-blocking variant of [`PeerHandle::next_packet`].
    pub fn try_next_packet(&self) -> Option<Vec<u8>> {
        self.outbound.try_lock().ok()?.try_recv().ok()
    }

    /// Deliver one inbound packet to the host.
    pub fn push_packet(&self, packet: Vec<u8>) {
        if let Some(tx) = self.inbound.lock().expect("peer inbound poisoned").as_ref() {
            let _ = tx.send(packet);
        }
    }

    /// Deliver one inbound data sub-channel packet (`[DATA_FLAG, code, ...]`).
    pub fn push_data(&self, code: u8, fragment: &[u8]) {
        let mut packet = Vec::with_capacity(2 + fragment.len());
        packet.push(DATA_FLAG);
        packet.push(code);
        packet.extend_from_slice(fragment);
        self.push_packet(packet);
    }

    /// Close the inbound stream, simulating link loss.
    pub fn close(&self) {
        self.inbound.lock().expect("peer inbound poisoned").take();
    }
}

/// Peripheral-side accumulator: reassembles host-to-peripheral messages the
/// way the on-device runtime does (first fragment declares a big-endian u16
/// total, later fragments append until the total is reached).
#[derive(Default)]
pub struct PeerAccumulator {
    active: HashMap<u8, (usize, Vec<u8>)>,
}

impl PeerAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw packet; returns a completed `(code, payload)` when a
    /// message finishes reassembling.
    pub fn push(&mut self, packet: &[u8]) -> Option<(u8, Vec<u8>)> {
        if packet.len() < 2 || packet[0] != DATA_FLAG {
            return None;
        }
        let code = packet[1];
        let body = &packet[2..];

        let (total, mut buf) = match self.active.remove(&code) {
            Some(state) => state,
            None => {
                if body.len() < 2 {
                    return None;
                }
                let total = u16::from_be_bytes([body[0], body[1]]) as usize;
                let mut buf = Vec::with_capacity(total);
                buf.extend_from_slice(&body[2..]);
                if buf.len() >= total {
                    buf.truncate(total);
                    return Some((code, buf));
                }
                self.active.insert(code, (total, buf));
                return None;
            }
        };

        buf.extend_from_slice(body);
        if buf.len() >= total {
            buf.truncate(total);
            Some((code, buf))
        } else {
            self.active.insert(code, (total, buf));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulator_reassembles_split_message() {
        let mut acc = PeerAccumulator::new();
        // 5-byte payload split across two packets.
        assert!(acc.push(&[DATA_FLAG, 0x20, 0x00, 0x05, 1, 2, 3]).is_none());
        let (code, payload) = acc.push(&[DATA_FLAG, 0x20, 4, 5]).unwrap();
        assert_eq!(code, 0x20);
        assert_eq!(payload, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn accumulator_completes_single_packet_message() {
        let mut acc = PeerAccumulator::new();
        let (code, payload) = acc.push(&[DATA_FLAG, 0x0a, 0x00, 0x02, 9, 8]).unwrap();
        assert_eq!(code, 0x0a);
        assert_eq!(payload, vec![9, 8]);
    }

    #[test]
    fn accumulator_handles_empty_payload() {
        let mut acc = PeerAccumulator::new();
        let (_, payload) = acc.push(&[DATA_FLAG, 0x10, 0x00, 0x00]).unwrap();
        assert!(payload.is_empty());
    }

    #[test]
    fn interleaved_codes_accumulate_independently() {
        let mut acc = PeerAccumulator::new();
        assert!(acc.push(&[DATA_FLAG, 0x20, 0x00, 0x02, 1]).is_none());
        assert!(acc.push(&[DATA_FLAG, 0x21, 0x00, 0x02, 7]).is_none());
        assert_eq!(acc.push(&[DATA_FLAG, 0x20, 2]).unwrap(), (0x20, vec![1, 2]));
        assert_eq!(acc.push(&[DATA_FLAG, 0x21, 8]).unwrap(), (0x21, vec![7, 8]));
    }
}
