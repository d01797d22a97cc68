use super::*;

pub const HEADER_SIZE: usize = 9;

pub const FLAG_DATA: u8 = 0x00;
pub const FLAG_ACK: u8 = 0x01;
pub const FLAG_SYN: u8 = 0x02;
pub const FLAG_FIN: u8 = 0x04;
pub const FLAG_STP: u8 = 0x08;

/// Largest payload a packet of at most `packet_size_max` bytes can carry.
pub fn payload_size_max(packet_size_max: usize) -> usize {
    packet_size_max.saturating_sub(HEADER_SIZE)
}

pub struct Reader<'a> {
    buffer: &'a [u8],
    bytes_read: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            bytes_read: 0,
        }
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        let value = *self.buffer.get(self.bytes_read)?;
        self.bytes_read += 1;
        Some(value)
    }

    pub fn read_u32(&mut self) -> Option<u32> {
        let bytes = self.buffer.get(self.bytes_read..self.bytes_read + 4)?;
        self.bytes_read += 4;
        Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn remaining_bytes(&self) -> &'a [u8] {
        &self.buffer[self.bytes_read..]
    }
}

pub struct Writer<'a> {
    buffer: &'a mut [u8],
    bytes_written: usize,
}

impl<'a> Writer<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self {
            buffer,
            bytes_written: 0,
        }
    }

    pub fn write_u8(&mut self, value: u8) -> Option<()> {
        *self.buffer.get_mut(self.bytes_written)? = value;
        self.bytes_written += 1;
        Some(())
    }

    pub fn write_u32(&mut self, value: u32) -> Option<()> {
        self.write_slice(&value.to_be_bytes())
    }

    pub fn write_slice(&mut self, bytes: &[u8]) -> Option<()> {
        let end = self.bytes_written + bytes.len();
        self.buffer
            .get_mut(self.bytes_written..end)?
            .copy_from_slice(bytes);
        self.bytes_written = end;
        Some(())
    }

    pub fn finalize(self) -> &'a [u8] {
        &self.buffer[..self.bytes_written]
    }
}

fn kind_to_flags(kind: PacketKind) -> u8 {
    match kind {
        PacketKind::Data => FLAG_DATA,
        PacketKind::Ack => FLAG_ACK,
        PacketKind::Syn => FLAG_SYN,
        PacketKind::SynAck => FLAG_SYN | FLAG_ACK,
        PacketKind::Fin => FLAG_FIN,
        PacketKind::FinAck => FLAG_FIN | FLAG_ACK,
        PacketKind::Stp => FLAG_STP,
    }
}

fn flags_to_kind(flags: u8) -> Option<PacketKind> {
    match flags {
        FLAG_DATA => Some(PacketKind::Data),
        FLAG_ACK => Some(PacketKind::Ack),
        FLAG_SYN => Some(PacketKind::Syn),
        f if f == FLAG_SYN | FLAG_ACK => Some(PacketKind::SynAck),
        FLAG_FIN => Some(PacketKind::Fin),
        f if f == FLAG_FIN | FLAG_ACK => Some(PacketKind::FinAck),
        FLAG_STP => Some(PacketKind::Stp),
        _ => None,
    }
}

/// Serializes `packet` into `buffer`, returning the written prefix. Returns `None` if the buffer
/// is too small.
pub fn write<'a>(packet: &Packet, buffer: &'a mut [u8]) -> Option<&'a [u8]> {
    let mut wr = Writer::new(buffer);

    wr.write_u8(packet.dst_addr)?;
    wr.write_u8(packet.src_addr)?;
    wr.write_u8(packet.dst_port)?;
    wr.write_u8(packet.src_port)?;
    wr.write_u8(kind_to_flags(packet.kind))?;
    wr.write_u32(packet.seq)?;
    wr.write_slice(&packet.payload)?;

    Some(wr.finalize())
}

/// Reads the source link address of a raw packet without validating the rest.
pub fn peek_src_addr(bytes: &[u8]) -> Option<LinkAddress> {
    if bytes.len() < HEADER_SIZE {
        return None;
    }

    Reader::new(&bytes[1..]).read_u8()
}

/// Parses one packet. Truncated headers, packets longer than `packet_size_max`, and unknown flag
/// combinations yield `None`.
pub fn read(bytes: &[u8], packet_size_max: usize) -> Option<Packet> {
    if bytes.len() < HEADER_SIZE || bytes.len() > packet_size_max {
        return None;
    }

    let mut rd = Reader::new(bytes);

    let dst_addr = rd.read_u8()?;
    let src_addr = rd.read_u8()?;
    let dst_port = rd.read_u8()?;
    let src_port = rd.read_u8()?;
    let kind = flags_to_kind(rd.read_u8()?)?;
    let seq = rd.read_u32()?;

    Some(Packet {
        dst_addr,
        src_addr,
        dst_port,
        src_port,
        kind,
        seq,
        payload: rd.remaining_bytes().into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PACKET_SIZE_MAX: usize = 32;

    fn sample_packet(kind: PacketKind, payload: &[u8]) -> Packet {
        Packet {
            dst_addr: 7,
            src_addr: 3,
            dst_port: 50,
            src_port: 211,
            kind,
            seq: 0x0102_0304,
            payload: payload.into(),
        }
    }

    #[test]
    fn header_layout() {
        let ref mut buffer = [0u8; PACKET_SIZE_MAX];
        let packet = sample_packet(PacketKind::SynAck, &[0xAA, 0xBB]);

        let bytes = write(&packet, buffer).unwrap();

        assert_eq!(
            bytes,
            &[7, 3, 50, 211, FLAG_SYN | FLAG_ACK, 0x01, 0x02, 0x03, 0x04, 0xAA, 0xBB]
        );
        assert_eq!(read(bytes, PACKET_SIZE_MAX), Some(packet));
        assert_eq!(peek_src_addr(bytes), Some(3));
        assert_eq!(peek_src_addr(&bytes[..4]), None);
    }

    #[test]
    fn every_kind_survives() {
        let ref mut buffer = [0u8; PACKET_SIZE_MAX];

        for kind in [
            PacketKind::Data,
            PacketKind::Ack,
            PacketKind::Syn,
            PacketKind::SynAck,
            PacketKind::Fin,
            PacketKind::FinAck,
            PacketKind::Stp,
        ] {
            let packet = sample_packet(kind, &[]);
            let bytes = write(&packet, buffer).unwrap();
            assert_eq!(read(bytes, PACKET_SIZE_MAX).map(|p| p.kind), Some(kind));
        }
    }

    #[test]
    fn unknown_flags_rejected() {
        let ref mut buffer = [0u8; PACKET_SIZE_MAX];
        let packet = sample_packet(PacketKind::Ack, &[]);
        let len = write(&packet, buffer).unwrap().len();

        for flags in [FLAG_STP | FLAG_ACK, FLAG_SYN | FLAG_FIN, FLAG_STP | FLAG_FIN, 0x10, 0xFF] {
            buffer[4] = flags;
            assert_eq!(read(&buffer[..len], PACKET_SIZE_MAX), None, "flags {flags:#04x}");
        }
    }

    #[test]
    fn size_limits() {
        let ref mut buffer = [0u8; 64];

        // Truncated header
        assert_eq!(read(&[7, 3, 50], PACKET_SIZE_MAX), None);

        // Exactly the maximum payload is fine, one more byte is not
        let max_payload = payload_size_max(PACKET_SIZE_MAX);
        let packet = sample_packet(PacketKind::Data, &vec![0x55; max_payload]);
        let bytes = write(&packet, buffer).unwrap();
        assert_eq!(bytes.len(), PACKET_SIZE_MAX);
        assert!(read(bytes, PACKET_SIZE_MAX).is_some());

        let packet = sample_packet(PacketKind::Data, &vec![0x55; max_payload + 1]);
        let bytes = write(&packet, buffer).unwrap();
        assert_eq!(read(bytes, PACKET_SIZE_MAX), None);

        // Writer refuses to overrun its buffer
        let ref mut small = [0u8; 4];
        assert_eq!(write(&packet, small), None);
    }

    #[test]
    fn reply_swaps_endpoints() {
        let packet = sample_packet(PacketKind::Fin, &[]);
        let reply = packet.reply(PacketKind::FinAck);

        assert_eq!(reply.dst_addr, 3);
        assert_eq!(reply.src_addr, 7);
        assert_eq!(reply.dst_port, 211);
        assert_eq!(reply.src_port, 50);
        assert_eq!(reply.kind, PacketKind::FinAck);
        assert_eq!(packet.identity(), Identity::new(50, 3, 211));
    }
}
