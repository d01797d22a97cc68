pub mod sim;
pub mod udp;

use std::io;
use std::time;

use crate::packet::LinkAddress;

/// An unreliable datagram link. Packets may be lost, duplicated or reordered, but are never
/// delivered corrupted or truncated.
pub trait Link: Send + Sync {
    /// Address of this host on the link.
    fn link_address(&self) -> LinkAddress;

    /// Largest packet the link carries, header included.
    fn packet_size_max(&self) -> usize;

    /// Hands one packet to the link. Returns once the link has accepted it; acceptance says
    /// nothing about delivery.
    fn send(&self, dst_addr: LinkAddress, packet_bytes: &[u8]) -> io::Result<()>;

    /// Waits up to `timeout` for one inbound packet. Returns Ok(None) if nothing arrived in time.
    fn recv(&self, timeout: Option<time::Duration>) -> io::Result<Option<Box<[u8]>>>;
}
