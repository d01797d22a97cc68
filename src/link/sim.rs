//! In-process link for tests and demos.
//!
//! A [`Hub`] connects any number of [`SimLink`]s and applies a seeded fault model to every packet
//! passing through it:
//!
//! | Fault       | Description                                                     |
//! |-------------|-----------------------------------------------------------------|
//! | Loss        | Drop a packet with probability `loss_rate`.                     |
//! | Duplication | Deliver a packet twice with probability `duplicate_rate`.       |
//! | Reordering  | Hold a packet back until the next one has been delivered, with  |
//! |             | probability `reorder_rate`.                                     |
//!
//! The hub can also be paused, in which case packets queue up until [`Hub::resume`], and it keeps
//! a log of every packet handed to it so tests can count what was transmitted.

use std::collections::HashMap;
use std::io;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::Link;
use crate::packet::serial;
use crate::packet::{LinkAddress, Packet};

const PACKET_SIZE_MAX_DEFAULT: usize = 32;

/// Configuration for a [`Hub`].
#[derive(Clone, Debug)]
pub struct Config {
    /// Largest packet carried, header included.
    ///
    /// Minimum value: 10 \
    /// Default value: 32
    pub packet_size_max: usize,

    /// Probability that a packet is silently dropped.
    ///
    /// Default value: 0.0
    pub loss_rate: f64,

    /// Probability that a packet is delivered twice.
    ///
    /// Default value: 0.0
    pub duplicate_rate: f64,

    /// Probability that a packet is overtaken by the one after it.
    ///
    /// Default value: 0.0
    pub reorder_rate: f64,

    /// Seed for the fault model.
    ///
    /// Default value: 0
    pub seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            packet_size_max: PACKET_SIZE_MAX_DEFAULT,
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            reorder_rate: 0.0,
            seed: 0,
        }
    }
}

impl Config {
    fn validate(&self) {
        assert!(
            self.packet_size_max > serial::HEADER_SIZE,
            "invalid hub configuration: packet_size_max <= {}",
            serial::HEADER_SIZE
        );

        for (name, rate) in [
            ("loss_rate", self.loss_rate),
            ("duplicate_rate", self.duplicate_rate),
            ("reorder_rate", self.reorder_rate),
        ] {
            assert!(
                (0.0..=1.0).contains(&rate),
                "invalid hub configuration: {} not in [0, 1]",
                name
            );
        }
    }
}

type Datagram = (LinkAddress, Box<[u8]>);

struct HubCore {
    config: Config,
    rng: StdRng,
    ports: HashMap<LinkAddress, mpsc::Sender<Box<[u8]>>>,
    paused: bool,
    // Packets held while paused, in send order
    held: Vec<Datagram>,
    // A packet waiting to be overtaken
    delayed: Option<Datagram>,
    log: Vec<Datagram>,
}

impl HubCore {
    fn deliver(&mut self, dst_addr: LinkAddress, packet_bytes: Box<[u8]>) {
        if let Some(tx) = self.ports.get(&dst_addr) {
            // A detached receiver is just another lost packet
            let _ = tx.send(packet_bytes);
        }
    }

    fn route(&mut self, dst_addr: LinkAddress, packet_bytes: Box<[u8]>) {
        if self.rng.gen_bool(self.config.loss_rate) {
            return;
        }

        if self.rng.gen_bool(self.config.duplicate_rate) {
            self.deliver(dst_addr, packet_bytes.clone());
        }

        if self.delayed.is_none() && self.rng.gen_bool(self.config.reorder_rate) {
            self.delayed = Some((dst_addr, packet_bytes));
            return;
        }

        self.deliver(dst_addr, packet_bytes);

        if let Some((dst_addr, packet_bytes)) = self.delayed.take() {
            self.deliver(dst_addr, packet_bytes);
        }
    }
}

/// A simulated broadcast domain.
#[derive(Clone)]
pub struct Hub {
    core: Arc<Mutex<HubCore>>,
}

impl Hub {
    pub fn new(config: Config) -> Self {
        config.validate();

        let rng = StdRng::seed_from_u64(config.seed);

        Self {
            core: Arc::new(Mutex::new(HubCore {
                config,
                rng,
                ports: HashMap::new(),
                paused: false,
                held: Vec::new(),
                delayed: None,
                log: Vec::new(),
            })),
        }
    }

    /// Creates a link with the given address. Panics if the address is already attached.
    pub fn attach(&self, link_address: LinkAddress) -> SimLink {
        let ref mut core = *self.core.lock().unwrap();

        assert!(
            !core.ports.contains_key(&link_address),
            "link address {} already attached",
            link_address
        );

        let (tx, rx) = mpsc::channel();
        core.ports.insert(link_address, tx);

        SimLink {
            link_address,
            packet_size_max: core.config.packet_size_max,
            hub: Arc::clone(&self.core),
            rx: Mutex::new(rx),
        }
    }

    /// Holds every packet sent from now on until [`Hub::resume`].
    pub fn pause(&self) {
        self.core.lock().unwrap().paused = true;
    }

    /// Releases held packets in send order and returns to normal delivery.
    pub fn resume(&self) {
        let ref mut core = *self.core.lock().unwrap();

        core.paused = false;

        for (dst_addr, packet_bytes) in std::mem::take(&mut core.held) {
            core.route(dst_addr, packet_bytes);
        }
    }

    /// Changes the loss rate of packets sent from now on.
    pub fn set_loss_rate(&self, loss_rate: f64) {
        assert!((0.0..=1.0).contains(&loss_rate));
        self.core.lock().unwrap().config.loss_rate = loss_rate;
    }

    /// Every well-formed packet handed to the hub so far, before faults are applied.
    pub fn sent_packets(&self) -> Vec<Packet> {
        let ref core = *self.core.lock().unwrap();

        core.log
            .iter()
            .filter_map(|(_, bytes)| serial::read(bytes, core.config.packet_size_max))
            .collect()
    }

    pub fn clear_log(&self) {
        self.core.lock().unwrap().log.clear();
    }
}

/// One host's attachment to a [`Hub`].
pub struct SimLink {
    link_address: LinkAddress,
    packet_size_max: usize,
    hub: Arc<Mutex<HubCore>>,
    rx: Mutex<mpsc::Receiver<Box<[u8]>>>,
}

impl Link for SimLink {
    fn link_address(&self) -> LinkAddress {
        self.link_address
    }

    fn packet_size_max(&self) -> usize {
        self.packet_size_max
    }

    fn send(&self, dst_addr: LinkAddress, packet_bytes: &[u8]) -> io::Result<()> {
        if packet_bytes.len() > self.packet_size_max {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "packet exceeds link maximum",
            ));
        }

        let ref mut core = *self.hub.lock().unwrap();

        let packet_bytes: Box<[u8]> = packet_bytes.into();

        core.log.push((dst_addr, packet_bytes.clone()));

        if core.paused {
            core.held.push((dst_addr, packet_bytes));
        } else {
            core.route(dst_addr, packet_bytes);
        }

        Ok(())
    }

    fn recv(&self, timeout: Option<time::Duration>) -> io::Result<Option<Box<[u8]>>> {
        let rx = self.rx.lock().unwrap();

        match timeout {
            Some(timeout) => match rx.recv_timeout(timeout) {
                Ok(packet_bytes) => Ok(Some(packet_bytes)),
                Err(mpsc::RecvTimeoutError::Timeout) => Ok(None),
                Err(mpsc::RecvTimeoutError::Disconnected) => Err(detached()),
            },
            None => rx.recv().map(Some).map_err(|_| detached()),
        }
    }
}

fn detached() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "detached from hub")
}

impl Drop for SimLink {
    fn drop(&mut self) {
        if let Ok(mut core) = self.hub.lock() {
            core.ports.remove(&self.link_address);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Option<time::Duration> = Some(time::Duration::from_millis(10));

    fn bytes(tag: u8) -> Vec<u8> {
        let mut bytes = vec![0u8; serial::HEADER_SIZE];
        bytes[8] = tag;
        bytes
    }

    fn drain(link: &SimLink) -> Vec<u8> {
        let mut tags = Vec::new();
        while let Some(packet_bytes) = link.recv(TIMEOUT).unwrap() {
            tags.push(packet_bytes[8]);
        }
        tags
    }

    #[test]
    fn perfect_delivery() {
        let hub = Hub::new(Default::default());
        let a = hub.attach(1);
        let b = hub.attach(2);

        for tag in 0..5 {
            a.send(2, &bytes(tag)).unwrap();
        }

        assert_eq!(drain(&b), vec![0, 1, 2, 3, 4]);
        assert!(drain(&a).is_empty());

        // Unknown destinations swallow packets
        a.send(9, &bytes(0)).unwrap();
        assert_eq!(hub.sent_packets().len(), 6);
    }

    #[test]
    fn oversized_rejected() {
        let hub = Hub::new(Default::default());
        let a = hub.attach(1);

        assert!(a.send(2, &[0; PACKET_SIZE_MAX_DEFAULT + 1]).is_err());
    }

    #[test]
    fn pause_holds_in_order() {
        let hub = Hub::new(Default::default());
        let a = hub.attach(1);
        let b = hub.attach(2);

        hub.pause();
        a.send(2, &bytes(1)).unwrap();
        b.send(1, &bytes(2)).unwrap();
        a.send(2, &bytes(3)).unwrap();

        assert!(drain(&b).is_empty());

        hub.resume();
        assert_eq!(drain(&b), vec![1, 3]);
        assert_eq!(drain(&a), vec![2]);
    }

    #[test]
    fn total_loss() {
        let hub = Hub::new(Config {
            loss_rate: 1.0,
            ..Default::default()
        });
        let a = hub.attach(1);
        let b = hub.attach(2);

        a.send(2, &bytes(0)).unwrap();

        assert!(drain(&b).is_empty());
        assert_eq!(hub.sent_packets().len(), 1);
    }

    #[test]
    fn duplication_and_reordering() {
        let hub = Hub::new(Config {
            duplicate_rate: 1.0,
            ..Default::default()
        });
        let a = hub.attach(1);
        let b = hub.attach(2);

        a.send(2, &bytes(7)).unwrap();
        assert_eq!(drain(&b), vec![7, 7]);

        let hub = Hub::new(Config {
            reorder_rate: 1.0,
            ..Default::default()
        });
        let a = hub.attach(1);
        let b = hub.attach(2);

        a.send(2, &bytes(1)).unwrap();
        a.send(2, &bytes(2)).unwrap();
        assert_eq!(drain(&b), vec![2, 1]);
    }
}
