mod outbound;
mod registry;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time;

use rand::Rng;

use super::connection::{Connection, Socket};
use super::endpoint::State;
use super::link::Link;
use super::packet::serial;
use super::packet::{Identity, LinkAddress, Packet, PacketKind, Port, PORT_LIMIT};
use super::timer::Ticker;
use super::{Error, Result};

use outbound::OutboundQueue;
use registry::{ConnectionRegistry, InsertError, PendingAcceptRegistry};

const RETRANSMIT_INTERVAL_DEFAULT_MS: u64 = 100;
const CONNECT_ATTEMPTS_DEFAULT: usize = 8;
const DISPATCH_POLL_DEFAULT_MS: u64 = 50;

/// Configuration for a [`PostOffice`] object.
#[derive(Clone, Debug)]
pub struct Config {
    /// Period of the retransmission timer, in milliseconds. Every tick, each connection resends
    /// whatever it is still waiting to have acknowledged.
    ///
    /// Minimum value: 1 \
    /// Default value: 100
    pub retransmit_interval_ms: u64,

    /// Number of handshakes [`PostOffice::connect`] attempts before giving up. An attempt is
    /// repeated only when it collides with a simultaneous open from the peer.
    ///
    /// Minimum value: 1 \
    /// Default value: 8
    pub connect_attempts_max: usize,

    /// Longest time the dispatch thread blocks on the link before checking for shutdown, in
    /// milliseconds.
    ///
    /// Minimum value: 1 \
    /// Default value: 50
    pub dispatch_poll_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            retransmit_interval_ms: RETRANSMIT_INTERVAL_DEFAULT_MS,
            connect_attempts_max: CONNECT_ATTEMPTS_DEFAULT,
            dispatch_poll_ms: DISPATCH_POLL_DEFAULT_MS,
        }
    }
}

impl Config {
    fn validate(&self) {
        assert!(
            self.retransmit_interval_ms > 0,
            "invalid post office configuration: retransmit_interval_ms == 0"
        );
        assert!(
            self.connect_attempts_max > 0,
            "invalid post office configuration: connect_attempts_max == 0"
        );
        assert!(
            self.dispatch_poll_ms > 0,
            "invalid post office configuration: dispatch_poll_ms == 0"
        );
    }
}

/// State shared by the post office handle, its service threads and its connections.
pub(crate) struct Shared {
    // Saved configuration
    config: Config,
    // The link and its cached properties
    link: Arc<dyn Link>,
    local_addr: LinkAddress,
    payload_size_max: usize,
    // Packets awaiting the send thread
    outbound: OutboundQueue,
    // Connections which may receive packets
    connections: ConnectionRegistry,
    // Passively opened connections awaiting accept()
    pending: PendingAcceptRegistry,
    // Drives retransmission
    ticker: Ticker,
    // Cleared to stop the dispatch thread
    running: AtomicBool,
}

impl Shared {
    pub(crate) fn enqueue(&self, packet: Packet) {
        if packet.kind.is_control() {
            log::trace!(
                "{} -> {}:{} {} seq={}",
                packet.src_port,
                packet.dst_addr,
                packet.dst_port,
                packet.kind,
                packet.seq
            );
        } else {
            log::trace!(
                "{} -> {}:{} DATA seq={} len={}",
                packet.src_port,
                packet.dst_addr,
                packet.dst_port,
                packet.seq,
                packet.payload.len()
            );
        }

        self.outbound.push(packet);
    }

    /// Drops a finished connection from both registries.
    pub(crate) fn deregister(&self, connection: &Connection) {
        self.pending.remove(connection);

        if self.connections.remove(connection) {
            log::debug!("{}: deregistered", connection.identity());
        }
    }

    fn new_connection(self: &Arc<Self>, identity: Identity) -> Arc<Connection> {
        Arc::new(Connection::new(
            identity,
            self.local_addr,
            self.payload_size_max,
            Arc::downgrade(self),
        ))
    }

    fn handle_packet_bytes(self: &Arc<Self>, packet_bytes: &[u8]) {
        let packet = match serial::read(packet_bytes, self.link.packet_size_max()) {
            Some(packet) => packet,
            None => {
                log::trace!("dropping malformed packet of {} bytes", packet_bytes.len());
                return;
            }
        };

        if packet.dst_addr != self.local_addr {
            log::trace!("dropping packet for link address {}", packet.dst_addr);
            return;
        }

        let identity = packet.identity();

        if let Some(connection) = self.connections.get(&identity) {
            connection.handle_packet(&packet);

            // A repeated SYN may find the pending slot free by now
            if packet.kind == PacketKind::Syn && connection.state() == State::SynRcvd {
                self.pending.offer(connection);
            }

            return;
        }

        match packet.kind {
            PacketKind::Syn => {
                let connection = self.new_connection(identity);

                connection.handle_packet(&packet);

                match self.connections.try_insert(Arc::clone(&connection)) {
                    Ok(()) => {
                        log::debug!("{}: incoming connection", identity);

                        if !self.pending.offer(connection) {
                            log::debug!("{}: port {} busy, deferred", identity, identity.local_port);
                        }
                    }
                    Err(err) => {
                        log::debug!("{}: refused ({:?})", identity, err);
                    }
                }
            }
            PacketKind::Fin => {
                // Our side already forgot this connection; the peer missed our FIN+ACK
                self.enqueue(packet.reply(PacketKind::FinAck));
            }
            _ => {
                log::trace!("{}: no connection for {}", identity, packet.kind);
            }
        }
    }

    /// Every registered connection, once.
    fn sweep(&self) -> Vec<Arc<Connection>> {
        let mut connections = self.connections.snapshot();

        for connection in self.pending.snapshot() {
            if !connections.iter().any(|c| Arc::ptr_eq(c, &connection)) {
                connections.push(connection);
            }
        }

        connections
    }
}

fn dispatch_loop(shared: Arc<Shared>) {
    let poll_timeout = time::Duration::from_millis(shared.config.dispatch_poll_ms);

    while shared.running.load(Ordering::Acquire) {
        match shared.link.recv(Some(poll_timeout)) {
            Ok(Some(packet_bytes)) => shared.handle_packet_bytes(&packet_bytes),
            Ok(None) => (),
            Err(err) => {
                log::warn!("link receive failed: {}", err);
                thread::sleep(poll_timeout);
            }
        }
    }
}

fn send_loop(shared: Arc<Shared>) {
    let mut buffer = vec![0u8; shared.link.packet_size_max()];

    while let Some(packet) = shared.outbound.pop() {
        match serial::write(&packet, &mut buffer) {
            Some(packet_bytes) => {
                if let Err(err) = shared.link.send(packet.dst_addr, packet_bytes) {
                    log::warn!("link send to {} failed: {}", packet.dst_addr, err);
                }
            }
            None => {
                log::warn!("{} packet too large for link, discarded", packet.kind);
            }
        }
    }
}

fn timer_loop(shared: Arc<Shared>) {
    let mut next_tick = time::Instant::now() + shared.ticker.interval();

    while shared.ticker.wait(&mut next_tick) {
        for connection in shared.sweep() {
            connection.handle_timer();
        }
    }
}

/// Owns a link and every connection multiplexed over it.
///
/// Three service threads run for the lifetime of the post office: one dispatches inbound packets
/// to their connections, one hands outbound packets to the link in FIFO order, and one drives
/// retransmission.
pub struct PostOffice {
    shared: Arc<Shared>,
    threads: Vec<thread::JoinHandle<()>>,
}

impl PostOffice {
    /// Equivalent to calling [`PostOffice::with_config`] with default configuration.
    pub fn new(link: Arc<dyn Link>) -> Result<Self> {
        Self::with_config(link, Default::default())
    }

    /// Starts the service threads over `link`. Errors encountered while spawning threads are
    /// forwarded to the caller.
    pub fn with_config(link: Arc<dyn Link>, config: Config) -> Result<Self> {
        config.validate();

        let payload_size_max = serial::payload_size_max(link.packet_size_max());

        assert!(
            payload_size_max > 0,
            "link packet size leaves no room for payload"
        );

        let ticker = Ticker::new(time::Duration::from_millis(config.retransmit_interval_ms));

        let shared = Arc::new(Shared {
            config,
            local_addr: link.link_address(),
            link,
            payload_size_max,
            outbound: OutboundQueue::new(),
            connections: ConnectionRegistry::new(),
            pending: PendingAcceptRegistry::new(),
            ticker,
            running: AtomicBool::new(true),
        });

        let mut post_office = Self {
            shared,
            threads: Vec::new(),
        };

        let loops: [(&str, fn(Arc<Shared>)); 3] = [
            ("dispatch", dispatch_loop),
            ("send", send_loop),
            ("timer", timer_loop),
        ];

        for (name, body) in loops {
            let shared = Arc::clone(&post_office.shared);

            // On failure, dropping post_office stops whatever was already spawned
            let handle = thread::Builder::new()
                .name(format!("seqlink-{}", name))
                .spawn(move || body(shared))?;

            post_office.threads.push(handle);
        }

        Ok(post_office)
    }

    /// Returns the link address of this host.
    pub fn local_addr(&self) -> LinkAddress {
        self.shared.local_addr
    }

    /// Largest number of payload bytes carried by one segment.
    pub fn payload_size_max(&self) -> usize {
        self.shared.payload_size_max
    }

    /// Returns the number of connections which can still send or receive packets.
    pub fn connection_count(&self) -> usize {
        self.shared.connections.len()
    }

    /// Returns the local ports which have a connection waiting for [`PostOffice::accept`].
    pub fn pending_ports(&self) -> Vec<Port> {
        let mut ports: Vec<Port> = self
            .shared
            .pending
            .snapshot()
            .iter()
            .map(|c| c.identity().local_port)
            .collect();

        ports.sort_unstable();
        ports
    }

    /// Opens a connection to `remote_port` on `remote_addr` from a randomly chosen free local
    /// port, blocking until the handshake completes.
    ///
    /// If the peer opens toward the same local port at the same moment, the attempt is abandoned
    /// and retried from the next port, up to [`Config::connect_attempts_max`] times.
    pub fn connect(&self, remote_addr: LinkAddress, remote_port: Port) -> Result<Socket> {
        let mut local_port: Port = rand::thread_rng().gen();

        for attempt in 0..self.shared.config.connect_attempts_max {
            let mut ports_probed = 0;

            loop {
                let identity = Identity::new(local_port, remote_addr, remote_port);

                local_port = local_port.wrapping_add(1);

                match self.open(identity) {
                    Err(Error::PortInUse(_)) => {
                        ports_probed += 1;

                        if ports_probed == PORT_LIMIT {
                            return Err(Error::PortsExhausted);
                        }
                    }
                    Err(Error::HandshakeCollision) => {
                        log::debug!("{}: collided (attempt {})", identity, attempt + 1);
                        break;
                    }
                    result => return result,
                }
            }
        }

        Err(Error::HandshakeCollision)
    }

    /// Opens a connection from a specific local port. Makes a single attempt.
    pub fn connect_from(
        &self,
        local_port: Port,
        remote_addr: LinkAddress,
        remote_port: Port,
    ) -> Result<Socket> {
        self.open(Identity::new(local_port, remote_addr, remote_port))
    }

    fn open(&self, identity: Identity) -> Result<Socket> {
        let connection = self.shared.new_connection(identity);

        let register = || match self.shared.connections.try_insert(Arc::clone(&connection)) {
            Ok(()) => Ok(()),
            Err(InsertError::Occupied) => Err(Error::PortInUse(identity.local_port)),
            Err(InsertError::Closed) => Err(Error::Shutdown),
        };

        match connection.connect(register)? {
            State::Established => {
                log::debug!("{}: connected", identity);
                Ok(Socket::new(connection))
            }
            State::Deadlock => {
                self.shared.deregister(&connection);
                Err(Error::HandshakeCollision)
            }
            _ => {
                // Aborted by shutdown
                self.shared.deregister(&connection);
                Err(Error::Shutdown)
            }
        }
    }

    /// Completes the pending passive open on `local_port`, if there is one. Never blocks on the
    /// network.
    pub fn accept(&self, local_port: Port) -> Option<Socket> {
        let connection = self.shared.pending.take(local_port)?;

        if connection.accept() {
            log::debug!("{}: accepted", connection.identity());
            Some(Socket::new(connection))
        } else {
            None
        }
    }

    /// Closes every connection gracefully and waits for all of them to finish before stopping
    /// the service threads. No new connections are admitted once this has been called.
    pub fn shutdown(self) {
        self.shutdown_inner(None);
    }

    /// Like [`PostOffice::shutdown`], but gives up waiting for connections after `timeout`.
    /// Returns true if every connection finished in time.
    pub fn shutdown_timeout(self, timeout: time::Duration) -> bool {
        self.shutdown_inner(Some(timeout))
    }

    fn shutdown_inner(mut self, timeout: Option<time::Duration>) -> bool {
        let ref shared = self.shared;

        if shared.pending.len() > 0 {
            log::debug!("discarding {} unaccepted connections", shared.pending.len());
        }

        // Connections still waiting for accept() will never be handed out
        shared.pending.close();

        let connections = shared.connections.close();

        log::debug!("shutting down, closing {} connections", connections.len());

        for connection in connections {
            connection.close();
        }

        let drained = shared.connections.wait_empty(timeout);

        if !drained {
            log::warn!(
                "shutdown timed out with {} connections open",
                shared.connections.len()
            );
        }

        self.stop(true);

        drained
    }

    fn stop(&mut self, drain_outbound: bool) {
        let ref shared = self.shared;

        shared.ticker.stop();
        shared.running.store(false, Ordering::Release);

        if drain_outbound {
            shared.outbound.close();
        } else {
            let discarded = shared.outbound.len();

            if discarded > 0 {
                log::debug!("discarding {} queued packets", discarded);
            }

            shared.outbound.abort();
        }

        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for PostOffice {
    fn drop(&mut self) {
        if !self.threads.is_empty() {
            if !self.shared.connections.is_empty() {
                log::warn!(
                    "post office dropped with {} connections open",
                    self.shared.connections.len()
                );
            }

            self.stop(false);
        }
    }
}
