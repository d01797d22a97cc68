use std::sync::Arc;
use std::thread;
use std::time;

use seqlink::link::sim;
use seqlink::packet::{LinkAddress, Port};

pub const A_ADDR: LinkAddress = 1;
pub const B_ADDR: LinkAddress = 2;

pub const RETRANSMIT_INTERVAL_MS: u64 = 20;

pub static TIMEOUT: time::Duration = time::Duration::from_secs(30);

static POLL_INTERVAL: time::Duration = time::Duration::from_millis(1);

pub fn config() -> seqlink::Config {
    seqlink::Config {
        retransmit_interval_ms: RETRANSMIT_INTERVAL_MS,
        dispatch_poll_ms: 10,
        ..Default::default()
    }
}

/// One post office per address, all attached to the same hub.
pub fn hosts(hub_config: sim::Config, addrs: &[LinkAddress]) -> (sim::Hub, Vec<seqlink::PostOffice>) {
    let hub = sim::Hub::new(hub_config);

    let post_offices = addrs
        .iter()
        .map(|&addr| {
            let link = Arc::new(hub.attach(addr));
            seqlink::PostOffice::with_config(link, config()).expect("failed to start post office")
        })
        .collect();

    (hub, post_offices)
}

pub struct Pair {
    pub hub: sim::Hub,
    pub a: seqlink::PostOffice,
    pub b: seqlink::PostOffice,
}

pub fn pair(hub_config: sim::Config) -> Pair {
    let (hub, mut post_offices) = hosts(hub_config, &[A_ADDR, B_ADDR]);

    let b = post_offices.pop().unwrap();
    let a = post_offices.pop().unwrap();

    Pair { hub, a, b }
}

/// Polls until `condition` holds. Returns false if it did not within `timeout`.
pub fn wait_until<F>(timeout: time::Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = time::Instant::now() + timeout;

    while !condition() {
        if time::Instant::now() >= deadline {
            return false;
        }

        thread::sleep(POLL_INTERVAL);
    }

    true
}

pub fn accept_within(
    post_office: &seqlink::PostOffice,
    port: Port,
    timeout: time::Duration,
) -> Option<seqlink::Socket> {
    let mut socket = None;

    wait_until(timeout, || {
        socket = post_office.accept(port);
        socket.is_some()
    });

    socket
}

/// Opens a connection from `a` to `b` and returns (client, server) sockets.
pub fn connect_pair(
    a: &seqlink::PostOffice,
    b: &seqlink::PostOffice,
    b_addr: LinkAddress,
    port: Port,
) -> (seqlink::Socket, seqlink::Socket) {
    thread::scope(|s| {
        let connector = s.spawn(|| a.connect(b_addr, port));

        let server_socket = accept_within(b, port, TIMEOUT).expect("nothing to accept");
        let client_socket = connector
            .join()
            .unwrap()
            .expect("failed to connect");

        (client_socket, server_socket)
    })
}

/// Reads until the peer closes, failing the test if that takes longer than `timeout`.
pub fn receive_to_end(socket: &mut seqlink::Socket, timeout: time::Duration) -> Vec<u8> {
    let deadline = time::Instant::now() + timeout;
    let mut received = Vec::new();

    loop {
        match socket.receive(1024) {
            Some(bytes) if bytes.is_empty() => {
                assert!(
                    time::Instant::now() < deadline,
                    "stream did not end after {} bytes",
                    received.len()
                );
                thread::sleep(POLL_INTERVAL);
            }
            Some(bytes) => received.extend_from_slice(&bytes),
            None => return received,
        }
    }
}

/// Deterministic test payload.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i.wrapping_mul(31) ^ (i >> 7)) as u8)
        .collect()
}
