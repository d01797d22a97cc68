use std::collections::HashMap;
use std::io;
use std::net;
use std::sync::{Mutex, RwLock};
use std::time;

use super::Link;
use crate::packet::serial;
use crate::packet::LinkAddress;

const SOCKET_POLLING_KEY: usize = 0;

const PACKET_SIZE_MAX_DEFAULT: usize = 1472;
const PACKET_SIZE_MAX_MAX: usize = 65507;

/// Configuration for a [`UdpLink`].
#[derive(Clone, Debug)]
pub struct Config {
    /// Largest datagram sent or accepted, in bytes.
    ///
    /// Minimum value: 10 (header plus one byte) \
    /// Maximum value: 65,507 \
    /// Default value: 1,472
    pub packet_size_max: usize,

    /// Initial mapping of link addresses to UDP endpoints. Entries are also learned from the
    /// source address of every inbound packet.
    pub address_book: HashMap<LinkAddress, net::SocketAddr>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            packet_size_max: PACKET_SIZE_MAX_DEFAULT,
            address_book: HashMap::new(),
        }
    }
}

impl Config {
    fn validate(&self) {
        assert!(
            self.packet_size_max > serial::HEADER_SIZE,
            "invalid link configuration: packet_size_max <= {}",
            serial::HEADER_SIZE
        );
        assert!(
            self.packet_size_max <= PACKET_SIZE_MAX_MAX,
            "invalid link configuration: packet_size_max > {}",
            PACKET_SIZE_MAX_MAX
        );
    }
}

struct SocketRx {
    // Polling objects
    poller: polling::Poller,
    poller_events: polling::Events,
    // Always-allocated receive buffer
    recv_buffer: Box<[u8]>,
}

/// A [`Link`] carried over a non-blocking UDP socket. Each link address maps to one UDP endpoint.
pub struct UdpLink {
    link_address: LinkAddress,
    packet_size_max: usize,
    socket: net::UdpSocket,
    // Cached from socket initialization
    local_addr: net::SocketAddr,
    address_book: RwLock<HashMap<LinkAddress, net::SocketAddr>>,
    rx: Mutex<SocketRx>,
}

impl UdpLink {
    /// Equivalent to calling [`UdpLink::bind_with_config`] with default configuration.
    pub fn bind<A>(bind_addr: A, link_address: LinkAddress) -> io::Result<Self>
    where
        A: net::ToSocketAddrs,
    {
        Self::bind_with_config(bind_addr, link_address, Default::default())
    }

    /// Binds a UDP socket at the provided address. Errors encountered during socket
    /// initialization are forwarded to the caller.
    pub fn bind_with_config<A>(
        bind_addr: A,
        link_address: LinkAddress,
        config: Config,
    ) -> io::Result<Self>
    where
        A: net::ToSocketAddrs,
    {
        config.validate();

        let socket = net::UdpSocket::bind(bind_addr)?;
        socket.set_nonblocking(true)?;

        let local_addr = socket.local_addr()?;

        let poller = polling::Poller::new()?;

        unsafe {
            poller.add(&socket, polling::Event::readable(SOCKET_POLLING_KEY))?;
        }

        let rx = SocketRx {
            poller,
            poller_events: polling::Events::new(),
            recv_buffer: vec![0; config.packet_size_max].into_boxed_slice(),
        };

        Ok(Self {
            link_address,
            packet_size_max: config.packet_size_max,
            socket,
            local_addr,
            address_book: RwLock::new(config.address_book),
            rx: Mutex::new(rx),
        })
    }

    /// Returns the local address of the internal UDP socket.
    pub fn local_addr(&self) -> net::SocketAddr {
        self.local_addr
    }

    /// Maps `link_address` to a UDP endpoint, replacing any previous mapping.
    pub fn add_peer(&self, link_address: LinkAddress, addr: net::SocketAddr) {
        self.address_book.write().unwrap().insert(link_address, addr);
    }

    pub fn peer_addr(&self, link_address: LinkAddress) -> Option<net::SocketAddr> {
        self.address_book
            .read()
            .unwrap()
            .get(&link_address)
            .copied()
    }

    fn learn(&self, packet_bytes: &[u8], sender_addr: net::SocketAddr) {
        if let Some(src_addr) = serial::peek_src_addr(packet_bytes) {
            if self.peer_addr(src_addr) != Some(sender_addr) {
                log::debug!("link address {} is at {}", src_addr, sender_addr);
                self.add_peer(src_addr, sender_addr);
            }
        }
    }

    fn try_read(&self, rx: &mut SocketRx) -> io::Result<Option<Box<[u8]>>> {
        match self.socket.recv_from(&mut rx.recv_buffer) {
            Ok((len, sender_addr)) => {
                let packet_bytes = &rx.recv_buffer[..len];
                self.learn(packet_bytes, sender_addr);
                Ok(Some(packet_bytes.into()))
            }
            Err(err) => match err.kind() {
                // The only acceptable error is WouldBlock, indicating no packet
                io::ErrorKind::WouldBlock => Ok(None),
                _ => Err(err),
            },
        }
    }
}

impl Link for UdpLink {
    fn link_address(&self) -> LinkAddress {
        self.link_address
    }

    fn packet_size_max(&self) -> usize {
        self.packet_size_max
    }

    fn send(&self, dst_addr: LinkAddress, packet_bytes: &[u8]) -> io::Result<()> {
        let addr = self.peer_addr(dst_addr).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no UDP endpoint known for link address {}", dst_addr),
            )
        })?;

        loop {
            match self.socket.send_to(packet_bytes, addr) {
                Ok(_) => return Ok(()),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => std::thread::yield_now(),
                Err(err) => return Err(err),
            }
        }
    }

    fn recv(&self, timeout: Option<time::Duration>) -> io::Result<Option<Box<[u8]>>> {
        let ref mut rx = *self.rx.lock().unwrap();

        // Something may already be queued; polling only reports new readiness
        if let Some(packet_bytes) = self.try_read(rx)? {
            return Ok(Some(packet_bytes));
        }

        // Wait for a readable event (must be done prior to each wait() call)
        rx.poller
            .modify(&self.socket, polling::Event::readable(SOCKET_POLLING_KEY))?;

        rx.poller_events.clear();

        let n = rx.poller.wait(&mut rx.poller_events, timeout)?;

        if n > 0 {
            // The socket is readable - read in confidence
            self.try_read(rx)
        } else {
            Ok(None)
        }
    }
}

impl Drop for UdpLink {
    fn drop(&mut self) {
        if let Ok(rx) = self.rx.get_mut() {
            let _ = rx.poller.delete(&self.socket);
        }
    }
}
