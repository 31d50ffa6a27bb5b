//! Shared integration-test fixtures: an in-process radio and the
//! peripheral's side of the protocol.

// Each test binary uses a subset of the fixture surface.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;
use wearlink::{DATA_FLAG, LinkError, Radio};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("wearlink=trace").try_init();
}

/// In-process radio wired to a [`Peripheral`].
pub struct SimRadio {
    att_mtu: u16,
    inbound: mpsc::UnboundedReceiver<Vec<u8>>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
}

/// Test-side handle playing the peripheral's role: inspects host packets and
/// scripts inbound traffic.
pub struct Peripheral {
    inbound: mpsc::UnboundedSender<Vec<u8>>,
    outbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    accumulator: Mutex<Accumulator>,
}

pub fn sim_link(att_mtu: u16) -> (SimRadio, Peripheral) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    (
        SimRadio { att_mtu, inbound: inbound_rx, outbound: outbound_tx },
        Peripheral {
            inbound: inbound_tx,
            outbound: tokio::sync::Mutex::new(outbound_rx),
            accumulator: Mutex::new(Accumulator::default()),
        },
    )
}

#[async_trait::async_trait]
impl Radio for SimRadio {
    async fn connect(&mut self) -> Result<u16, LinkError> {
        Ok(self.att_mtu)
    }

    async fn transmit(&mut self, packet: &[u8]) -> Result<(), LinkError> {
        self.outbound
            .send(packet.to_vec())
            .map_err(|_| LinkError::link_lost("peer went away"))
    }

    async fn receive(&mut self) -> Result<Option<Vec<u8>>, LinkError> {
        Ok(self.inbound.recv().await)
    }

    async fn disconnect(&mut self) -> Result<(), LinkError> {
        self.inbound.close();
        Ok(())
    }
}

impl Peripheral {
    /// Next raw packet the host transmitted, in FIFO order.
    pub async fn next_packet(&self) -> Option<Vec<u8>> {
        self.outbound.lock().await.recv().await
    }

    /// Feed host packets through the reassembly the on-device runtime does,
    /// returning the next completed `(code, payload)` data message.
    pub async fn next_message(&self) -> Option<(u8, Vec<u8>)> {
        loop {
            let packet = self.next_packet().await?;
            let done = self.accumulator.lock().expect("accumulator poisoned").push(&packet);
            if done.is_some() {
                return done;
            }
        }
    }

    /// Deliver one inbound packet to the host.
    pub fn push_packet(&self, packet: Vec<u8>) {
        let _ = self.inbound.send(packet);
    }

    /// Deliver one inbound data sub-channel packet.
    pub fn push_data(&self, code: u8, fragment: &[u8]) {
        let mut packet = Vec::with_capacity(2 + fragment.len());
        packet.push(DATA_FLAG);
        packet.push(code);
        packet.extend_from_slice(fragment);
        self.push_packet(packet);
    }
}

/// Per-code reassembly of host-to-peripheral messages: the first fragment
/// declares a big-endian u16 total, later fragments append until it is
/// reached.
#[derive(Default)]
struct Accumulator {
    active: HashMap<u8, (usize, Vec<u8>)>,
}

impl Accumulator {
    fn push(&mut self, packet: &[u8]) -> Option<(u8, Vec<u8>)> {
        if packet.len() < 2 || packet[0] != DATA_FLAG {
            return None;
        }
        let code = packet[1];
        let body = &packet[2..];

        let (total, mut buf) = match self.active.remove(&code) {
            Some((total, mut buf)) => {
                buf.extend_from_slice(body);
                (total, buf)
            }
            None => {
                if body.len() < 2 {
                    return None;
                }
                let total = u16::from_be_bytes([body[0], body[1]]) as usize;
                (total, body[2..].to_vec())
            }
        };

        if buf.len() >= total {
            buf.truncate(total);
            Some((code, buf))
        } else {
            self.active.insert(code, (total, buf));
            None
        }
    }
}
