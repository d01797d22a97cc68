#[allow(dead_code)]
mod common;

use std::thread;
use std::time;

use seqlink::link::Link;
use seqlink::packet::{serial, Identity, Packet, PacketKind};

use common::{A_ADDR, B_ADDR, TIMEOUT};

#[test]
fn fin_resent_every_tick() {
    let pair = common::pair(Default::default());

    let (client, server) = common::connect_pair(&pair.a, &pair.b, B_ADDR, 60);

    pair.hub.pause();
    pair.hub.clear_log();

    let closed_at = time::Instant::now();
    client.close();

    thread::sleep(time::Duration::from_millis(10 * common::RETRANSMIT_INTERVAL_MS));

    let sent: Vec<PacketKind> = pair
        .hub
        .sent_packets()
        .iter()
        .filter(|p| p.src_addr == A_ADDR)
        .map(|p| p.kind)
        .collect();

    let ticks_elapsed =
        (closed_at.elapsed().as_millis() / common::RETRANSMIT_INTERVAL_MS as u128) as usize;

    assert!(sent.iter().all(|&kind| kind == PacketKind::Fin), "{:?}", sent);

    // The initial FIN plus at most one per elapsed tick
    assert!(sent.len() >= 3, "only {} FINs", sent.len());
    assert!(
        sent.len() <= ticks_elapsed + 2,
        "{} FINs in {} ticks",
        sent.len(),
        ticks_elapsed
    );

    assert_eq!(pair.a.connection_count(), 1);

    pair.hub.resume();

    assert!(common::wait_until(TIMEOUT, || pair.a.connection_count() == 0));
    assert!(common::wait_until(TIMEOUT, || pair.b.connection_count() == 0));

    assert_eq!(server.state(), seqlink::State::Closed);
}

#[test]
fn shutdown_drains_outstanding_data() {
    let pair = common::pair(seqlink::link::sim::Config {
        loss_rate: 0.05,
        seed: 3,
        ..Default::default()
    });

    let (mut client, mut server) = common::connect_pair(&pair.a, &pair.b, B_ADDR, 70);

    let data = common::pattern(2_000);
    client.send(&data).unwrap();

    let common::Pair { hub: _hub, a, b } = pair;

    // Closes the client socket on our behalf, and returns only once the server has it all
    assert!(a.shutdown_timeout(TIMEOUT));

    assert!(matches!(
        client.send(b"more"),
        Err(seqlink::Error::NotConnected)
    ));
    assert_eq!(client.state(), seqlink::State::Closed);

    assert_eq!(common::receive_to_end(&mut server, TIMEOUT), data);
    assert_eq!(b.connection_count(), 0);

    b.shutdown();
}

#[test]
fn shutdown_discards_unaccepted() {
    let common::Pair { hub, a, b } = common::pair(Default::default());

    let raw = hub.attach(9);
    raw.send(B_ADDR, &[B_ADDR, 9, 90, 4, serial::FLAG_SYN, 0, 0, 0, 0]).unwrap();

    assert!(common::wait_until(TIMEOUT, || b.pending_ports() == vec![90]));

    // Never accepted, so nothing is owed to the peer
    assert!(b.shutdown_timeout(TIMEOUT));
    assert!(raw.recv(Some(time::Duration::from_millis(100))).unwrap().is_none());

    a.shutdown();
}

#[test]
fn fin_for_forgotten_connection() {
    let pair = common::pair(Default::default());

    let raw = pair.hub.attach(9);

    let identity = Identity::new(44, B_ADDR, 55);
    let fin = Packet::control(PacketKind::Fin, 0, 9, &identity);

    let ref mut buffer = [0u8; 32];
    raw.send(B_ADDR, serial::write(&fin, buffer).unwrap()).unwrap();

    let reply = raw
        .recv(Some(TIMEOUT))
        .unwrap()
        .expect("no reply to FIN");
    let reply = serial::read(&reply, raw.packet_size_max()).unwrap();

    assert_eq!(reply.kind, PacketKind::FinAck);
    assert_eq!(reply.dst_addr, 9);
    assert_eq!(reply.dst_port, 44);
    assert_eq!(reply.src_port, 55);

    // No state was created for it
    assert_eq!(pair.b.connection_count(), 0);
}

#[test]
fn malformed_and_misaddressed_packets_ignored() {
    let pair = common::pair(Default::default());

    let raw = pair.hub.attach(9);

    // Too short, unknown flags, wrong destination
    raw.send(B_ADDR, &[B_ADDR, 9, 1]).unwrap();
    raw.send(B_ADDR, &[B_ADDR, 9, 1, 2, 0x0C, 0, 0, 0, 0]).unwrap();
    raw.send(B_ADDR, &[A_ADDR, 9, 1, 2, serial::FLAG_SYN, 0, 0, 0, 0]).unwrap();

    // A valid SYN after all that still gets through
    raw.send(B_ADDR, &[B_ADDR, 9, 1, 2, serial::FLAG_SYN, 0, 0, 0, 0]).unwrap();

    assert!(common::wait_until(TIMEOUT, || pair.b.pending_ports() == vec![1]));
    assert_eq!(pair.b.connection_count(), 1);

    let mut socket = pair.b.accept(1).expect("nothing to accept");
    assert_eq!(socket.identity(), Identity::new(1, 9, 2));

    let reply = raw.recv(Some(TIMEOUT)).unwrap().expect("no SYN+ACK");
    let reply = serial::read(&reply, raw.packet_size_max()).unwrap();
    assert_eq!(reply.kind, PacketKind::SynAck);

    assert_eq!(socket.receive(10), Some(vec![]));
}
