pub mod serial;

use std::fmt;

/// Address of a host on the underlying link.
pub type LinkAddress = u8;

/// Transport-level port.
pub type Port = u8;

/// Number of distinct ports.
pub const PORT_LIMIT: usize = Port::MAX as usize + 1;

/// Recognized flag combinations. Anything else on the wire is malformed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PacketKind {
    Data,
    Ack,
    Syn,
    SynAck,
    Fin,
    FinAck,
    Stp,
}

impl PacketKind {
    /// True for the flag-only segments which carry no stream data.
    pub fn is_control(&self) -> bool {
        *self != PacketKind::Data
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PacketKind::Data => "DATA",
            PacketKind::Ack => "ACK",
            PacketKind::Syn => "SYN",
            PacketKind::SynAck => "SYN+ACK",
            PacketKind::Fin => "FIN",
            PacketKind::FinAck => "FIN+ACK",
            PacketKind::Stp => "STP",
        };
        f.write_str(name)
    }
}

/// (local port, remote address, remote port): demultiplexing key of a connection.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Identity {
    pub local_port: Port,
    pub remote_addr: LinkAddress,
    pub remote_port: Port,
}

impl Identity {
    pub fn new(local_port: Port, remote_addr: LinkAddress, remote_port: Port) -> Self {
        Self {
            local_port,
            remote_addr,
            remote_port,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            ":{} <-> {}:{}",
            self.local_port, self.remote_addr, self.remote_port
        )
    }
}

/// One segment on the wire.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Packet {
    pub dst_addr: LinkAddress,
    pub src_addr: LinkAddress,
    pub dst_port: Port,
    pub src_port: Port,
    pub kind: PacketKind,
    pub seq: u32,
    pub payload: Box<[u8]>,
}

impl Packet {
    /// Builds a flag-only segment.
    pub fn control(
        kind: PacketKind,
        seq: u32,
        src_addr: LinkAddress,
        identity: &Identity,
    ) -> Self {
        Self::new(kind, seq, src_addr, identity, Box::default())
    }

    /// Builds a segment addressed from the local side of `identity` to its remote side.
    pub fn new(
        kind: PacketKind,
        seq: u32,
        src_addr: LinkAddress,
        identity: &Identity,
        payload: Box<[u8]>,
    ) -> Self {
        Self {
            dst_addr: identity.remote_addr,
            src_addr,
            dst_port: identity.remote_port,
            src_port: identity.local_port,
            kind,
            seq,
            payload,
        }
    }

    /// Identity of the receiving connection for an inbound packet.
    pub fn identity(&self) -> Identity {
        Identity::new(self.dst_port, self.src_addr, self.src_port)
    }

    /// A segment of `kind` sent back to this packet's origin.
    pub fn reply(&self, kind: PacketKind) -> Self {
        Self {
            dst_addr: self.src_addr,
            src_addr: self.dst_addr,
            dst_port: self.src_port,
            src_port: self.dst_port,
            kind,
            seq: 0,
            payload: Box::default(),
        }
    }
}
