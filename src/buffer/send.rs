use super::Window;
use super::WINDOW_SIZE;
use crate::packet::Packet;

//            base        next        base+size
//            v           v           v
// -----------#__#_##_____------------> sequence numbers
//
// #: in flight, unacknowledged
// _: acknowledged out of order (left of next) or admissible (right of next)

#[derive(Debug)]
pub struct SendWindow {
    window: Window<Packet>,
    next_seq: u32,
    stop_packet: Option<Packet>,
}

impl SendWindow {
    pub fn new(base: u32) -> Self {
        Self {
            window: Window::new(base),
            next_seq: base,
            stop_packet: None,
        }
    }

    pub fn base(&self) -> u32 {
        self.window.base()
    }

    /// Sequence number the next admitted segment will receive.
    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    /// Number of sequence numbers between the base and the next one to be assigned.
    pub fn in_flight(&self) -> u32 {
        self.next_seq.wrapping_sub(self.window.base())
    }

    /// True if no unacknowledged segment remains.
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// True if another segment may be admitted.
    pub fn can_send(&self) -> bool {
        self.in_flight() < WINDOW_SIZE && self.window.contains(self.next_seq)
    }

    /// Assigns the next sequence number to the segment built by `build` and stores it. Returns a
    /// copy for transmission, or `None` if the window is full or the stop sequence was reached.
    pub fn push<F>(&mut self, build: F) -> Option<Packet>
    where
        F: FnOnce(u32) -> Packet,
    {
        if !self.can_send() {
            return None;
        }

        let seq = self.next_seq;
        let packet = build(seq);

        debug_assert_eq!(packet.seq, seq);

        let inserted = self.window.insert(seq, packet.clone());
        debug_assert!(inserted);

        self.next_seq = self.next_seq.wrapping_add(1);

        Some(packet)
    }

    /// Clears the slot for `seq` if it is in flight, then advances the base over any run of
    /// acknowledged slots. Returns false for acknowledgements outside [base, next).
    pub fn acknowledge(&mut self, seq: u32) -> bool {
        if seq.wrapping_sub(self.window.base()) >= self.in_flight() {
            return false;
        }

        let cleared = self.window.take(seq).is_some();

        self.window.advance_empty(self.next_seq);

        cleared
    }

    /// Unacknowledged segments, in sequence order.
    pub fn unacknowledged(&self) -> impl Iterator<Item = &Packet> + '_ {
        self.window.iter().map(|(_, packet)| packet)
    }

    /// Returns the STP segment for this window, computing it on first use. Its sequence number is
    /// the end of flight plus the number of segments needed for `staged_len` more bytes; nothing
    /// at or past it will be admitted afterward.
    pub fn stop_packet<F>(&mut self, staged_len: usize, payload_size_max: usize, build: F) -> Packet
    where
        F: FnOnce(u32) -> Packet,
    {
        if let Some(packet) = &self.stop_packet {
            return packet.clone();
        }

        debug_assert!(payload_size_max > 0);

        let staged_segments = ((staged_len + payload_size_max - 1) / payload_size_max) as u32;
        let stop = self.next_seq.wrapping_add(staged_segments);

        self.window.set_stop(stop);

        let packet = build(stop);
        self.stop_packet = Some(packet.clone());

        packet
    }

    #[cfg(test)]
    pub fn stop(&self) -> Option<u32> {
        self.window.stop()
    }

    /// Abandons every in-flight segment.
    pub fn clear(&mut self) {
        self.window.clear();
        self.window.advance_empty(self.next_seq);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Identity, PacketKind};

    fn data(seq: u32) -> Packet {
        Packet::new(
            PacketKind::Data,
            seq,
            1,
            &Identity::new(10, 2, 20),
            vec![seq as u8].into(),
        )
    }

    fn stp(seq: u32) -> Packet {
        Packet::control(PacketKind::Stp, seq, 1, &Identity::new(10, 2, 20))
    }

    fn filled(count: u32) -> SendWindow {
        let mut tx = SendWindow::new(0);
        for _ in 0..count {
            tx.push(data).unwrap();
        }
        tx
    }

    #[test]
    fn admission_limit() {
        let mut tx = SendWindow::new(0);

        for i in 0..WINDOW_SIZE {
            assert!(tx.can_send());
            assert_eq!(tx.push(data).map(|p| p.seq), Some(i));
        }

        assert!(!tx.can_send());
        assert_eq!(tx.push(data), None);
        assert_eq!(tx.in_flight(), WINDOW_SIZE);
    }

    #[test]
    fn in_order_acks_advance_base() {
        let mut tx = filled(WINDOW_SIZE);
        let mut last_base = tx.base();

        for seq in 0..WINDOW_SIZE {
            assert!(tx.acknowledge(seq));
            assert!(tx.base() >= last_base);
            assert_eq!(tx.base(), seq + 1);
            last_base = tx.base();
            assert!(tx.can_send());
        }

        assert!(tx.is_empty());
    }

    #[test]
    fn out_of_order_acks_leave_holes() {
        let mut tx = filled(4);

        assert!(tx.acknowledge(2));
        assert_eq!(tx.base(), 0);

        let remaining: Vec<u32> = tx.unacknowledged().map(|p| p.seq).collect();
        assert_eq!(remaining, vec![0, 1, 3]);

        assert!(tx.acknowledge(0));
        assert_eq!(tx.base(), 1);

        assert!(tx.acknowledge(1));
        assert_eq!(tx.base(), 3);

        assert!(tx.acknowledge(3));
        assert_eq!(tx.base(), 4);
        assert!(tx.is_empty());
    }

    #[test]
    fn stray_acks_ignored() {
        let mut tx = filled(3);

        // Beyond anything sent
        assert!(!tx.acknowledge(3));
        assert!(!tx.acknowledge(1000));

        assert!(tx.acknowledge(0));

        // Already acknowledged, below base
        assert!(!tx.acknowledge(0));
        // Duplicate of an interior ack
        assert!(tx.acknowledge(2));
        assert!(!tx.acknowledge(2));

        assert_eq!(tx.base(), 1);
    }

    #[test]
    fn stop_packet_bounds_admission() {
        let mut tx = filled(3);

        // 45 staged bytes at 20 bytes per segment is three more segments
        let packet = tx.stop_packet(45, 20, stp);
        assert_eq!(packet.seq, 6);
        assert_eq!(tx.stop(), Some(6));

        // Cached, even if asked again with different inputs
        assert_eq!(tx.stop_packet(0, 20, stp).seq, 6);

        for seq in 3..6 {
            assert_eq!(tx.push(data).map(|p| p.seq), Some(seq));
        }

        assert!(!tx.can_send());
        assert_eq!(tx.push(data), None);

        // Nothing at or beyond the stop is retransmitted either
        assert!(tx.unacknowledged().all(|p| p.seq < 6));
    }

    #[test]
    fn clear_keeps_sequence() {
        let mut tx = filled(5);
        tx.clear();

        assert!(tx.is_empty());
        assert_eq!(tx.base(), 5);
        assert_eq!(tx.push(data).map(|p| p.seq), Some(5));
    }
}
