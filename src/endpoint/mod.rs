use std::fmt;

use super::buffer::{ByteStream, ReceiveWindow, SendWindow};
use super::packet::{Identity, LinkAddress, Packet, PacketKind};
use super::{Error, Result};

pub trait HostContext {
    // Called to queue a packet for transmission. Must not block on the link.
    fn send_packet(&mut self, packet: Packet);

    // Called when a thread blocked in connect() should re-examine the state
    fn wake(&mut self);

    // Called once, when the connection has reached CLOSED and should leave the registry
    fn finish(&mut self);
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    Closed,
    SynSent,
    SynRcvd,
    Established,
    StpSent,
    StpRcvd,
    Closing,
    Deadlock,
}

#[derive(Clone, Copy, Debug)]
enum Event<'a> {
    Connect,
    Accept,
    Close,
    Timer,
    Syn,
    SynAck,
    Data(u32, &'a [u8]),
    Ack(u32),
    Stp(u32),
    Fin,
    FinAck,
}

impl<'a> From<&'a Packet> for Event<'a> {
    fn from(packet: &'a Packet) -> Self {
        match packet.kind {
            PacketKind::Data => Event::Data(packet.seq, &packet.payload),
            PacketKind::Ack => Event::Ack(packet.seq),
            PacketKind::Syn => Event::Syn,
            PacketKind::SynAck => Event::SynAck,
            PacketKind::Fin => Event::Fin,
            PacketKind::FinAck => Event::FinAck,
            PacketKind::Stp => Event::Stp(packet.seq),
        }
    }
}

/// Protocol state of one connection.
///
/// All methods run a single transition and report their side effects through `ctx`. Locking is
/// the caller's business.
pub struct Endpoint {
    state: State,

    identity: Identity,
    local_addr: LinkAddress,
    payload_size_max: usize,

    // Sender state
    send_window: SendWindow,
    // Bytes accepted from the application but not yet admitted to the send window
    outbound: ByteStream,

    // Receiver state
    receive_window: ReceiveWindow,
    // Bytes released by the receive window but not yet read by the application
    inbound: ByteStream,

    close_requested: bool,
    finished: bool,
    // Set once the endpoint leaves CLOSED for the first time. A CLOSED endpoint is only reusable
    // for a passive open while this is clear.
    opened: bool,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("state", &self.state)
            .field("identity", &self.identity)
            .finish()
    }
}

impl Endpoint {
    pub fn new(identity: Identity, local_addr: LinkAddress, payload_size_max: usize) -> Self {
        assert!(payload_size_max > 0, "payload size must be nonzero");

        Self {
            state: State::Closed,
            identity,
            local_addr,
            payload_size_max,
            send_window: SendWindow::new(0),
            outbound: ByteStream::new(),
            receive_window: ReceiveWindow::new(0),
            inbound: ByteStream::new(),
            close_requested: false,
            finished: false,
            opened: false,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// True if no undelivered inbound data remains.
    pub fn is_exhausted(&self) -> bool {
        self.inbound.is_empty() && self.receive_window.is_empty()
    }

    #[cfg(test)]
    pub fn send_window(&self) -> &SendWindow {
        &self.send_window
    }

    /// Bytes queued by the application which have not been admitted to the send window yet.
    #[cfg(test)]
    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    pub fn connect<C>(&mut self, ctx: &mut C)
    where
        C: HostContext,
    {
        self.handle(Event::Connect, ctx);
    }

    /// Completes a passive open. Returns true if the connection is now established.
    pub fn accept<C>(&mut self, ctx: &mut C) -> bool
    where
        C: HostContext,
    {
        self.handle(Event::Accept, ctx);
        self.state == State::Established
    }

    pub fn close<C>(&mut self, ctx: &mut C)
    where
        C: HostContext,
    {
        self.close_requested = true;
        self.handle(Event::Close, ctx);
    }

    pub fn handle_timer<C>(&mut self, ctx: &mut C)
    where
        C: HostContext,
    {
        self.handle(Event::Timer, ctx);
    }

    pub fn handle_packet<C>(&mut self, packet: &Packet, ctx: &mut C)
    where
        C: HostContext,
    {
        log::trace!(
            "{}: received {} seq={} len={}",
            self.identity,
            packet.kind,
            packet.seq,
            packet.payload.len()
        );

        if packet.kind == PacketKind::Stp {
            self.receive_window.stop_at(packet.seq);
        }

        self.handle(packet.into(), ctx);
    }

    /// Queues `bytes` for transmission and pushes as much as the window allows.
    pub fn send<C>(&mut self, bytes: &[u8], ctx: &mut C) -> Result<usize>
    where
        C: HostContext,
    {
        if self.state != State::Established {
            return Err(Error::NotConnected);
        }

        self.outbound.write(bytes);
        self.transmit_data(ctx);

        Ok(bytes.len())
    }

    /// Reads up to `max_bytes` of in-order data. Returns `None` once the connection is closed and
    /// nothing more can be delivered; an empty vector otherwise means no data has arrived yet.
    pub fn receive<C>(&mut self, max_bytes: usize, ctx: &mut C) -> Option<Vec<u8>>
    where
        C: HostContext,
    {
        while self.inbound.len() < max_bytes {
            match self.receive_window.remove() {
                Some(payload) => self.inbound.write(&payload),
                None => break,
            }
        }

        let data = self.inbound.dequeue(max_bytes);

        if self.state == State::Closed {
            if data.is_empty() && (max_bytes > 0 || self.is_exhausted()) {
                // Segments stranded behind a gap can no longer arrive
                self.receive_window.clear();
                self.finalize(ctx);
                return None;
            }

            if self.is_exhausted() {
                self.finalize(ctx);
            }
        }

        Some(data)
    }

    fn set_state(&mut self, state: State) {
        if self.state != state {
            log::debug!("{}: {:?} -> {:?}", self.identity, self.state, state);
            self.state = state;
        }

        if state != State::Closed {
            self.opened = true;
        }
    }

    fn handle<C>(&mut self, event: Event, ctx: &mut C)
    where
        C: HostContext,
    {
        use State::*;

        match (self.state, event) {
            (Closed, Event::Connect) => {
                self.transmit(PacketKind::Syn, ctx);
                self.set_state(SynSent);
            }
            (Closed, Event::Syn) if !self.opened => {
                self.set_state(SynRcvd);
            }
            (Closed, Event::Fin) => {
                // The peer missed our FIN+ACK
                self.transmit(PacketKind::FinAck, ctx);
            }
            (Closed, Event::Close) | (Deadlock, Event::Close) => {
                self.finalize(ctx);
            }

            (SynSent, Event::Timer)
            | (SynSent, Event::Data(..))
            | (SynSent, Event::Stp(_))
            | (SynSent, Event::Fin) => {
                // The peer has not seen our SYN yet
                self.transmit(PacketKind::Syn, ctx);
            }
            (SynSent, Event::Syn) => {
                self.set_state(Deadlock);
                ctx.wake();
            }
            (SynSent, Event::SynAck) => {
                self.set_state(Established);
                ctx.wake();
            }
            (SynSent, Event::Close) | (SynRcvd, Event::Close) => {
                self.finalize(ctx);
                ctx.wake();
            }

            (SynRcvd, Event::Accept) => {
                self.transmit(PacketKind::SynAck, ctx);
                self.set_state(Established);
            }

            (Established, Event::Syn) | (StpSent, Event::Syn) => {
                // Our SYN+ACK was lost
                self.transmit(PacketKind::SynAck, ctx);
            }
            (Established, Event::Data(seq, payload)) | (StpRcvd, Event::Data(seq, payload)) => {
                self.receive_data(seq, payload, ctx);
            }
            (Established, Event::Ack(seq)) => {
                self.send_window.acknowledge(seq);
                self.transmit_data(ctx);
            }
            (Established, Event::Stp(_)) => {
                // The peer will not accept any more data
                self.send_window.clear();
                self.set_state(StpRcvd);
            }
            (Established, Event::Close) => {
                if self.send_window.is_empty() && self.outbound.is_empty() {
                    self.transmit(PacketKind::Fin, ctx);
                    self.set_state(Closing);
                } else {
                    self.transmit_stp(ctx);
                    self.set_state(StpSent);
                }
            }
            (Established, Event::Fin) => {
                self.send_window.clear();
                self.transmit(PacketKind::FinAck, ctx);
                self.finalize(ctx);
            }
            (Established, Event::Timer) | (StpRcvd, Event::Timer) => {
                self.retransmit(ctx);
            }

            (StpSent, Event::Timer) => {
                if self.send_window.is_empty() && self.outbound.is_empty() {
                    self.transmit(PacketKind::Fin, ctx);
                    self.set_state(Closing);
                } else {
                    self.transmit_stp(ctx);
                    self.retransmit(ctx);
                }
            }
            (StpSent, Event::Ack(seq)) => {
                self.send_window.acknowledge(seq);
                self.transmit_data(ctx);

                if self.send_window.is_empty() && self.outbound.is_empty() {
                    self.transmit(PacketKind::Fin, ctx);
                    self.set_state(Closing);
                }
            }
            (StpSent, Event::Data(..)) => {
                // The peer has not seen our STP yet
                self.transmit_stp(ctx);
            }
            (StpSent, Event::Stp(_)) => {
                self.send_window.clear();
                self.outbound.clear();
                self.transmit(PacketKind::Fin, ctx);
                self.set_state(Closing);
            }
            (StpSent, Event::Fin) | (StpRcvd, Event::Fin) | (Closing, Event::Fin) => {
                self.transmit(PacketKind::FinAck, ctx);
                self.finalize(ctx);
            }
            (StpSent, Event::FinAck) | (Closing, Event::FinAck) => {
                self.finalize(ctx);
            }

            (StpRcvd, Event::Close) => {
                self.transmit(PacketKind::Fin, ctx);
                self.set_state(Closing);
            }

            (Closing, Event::Timer)
            | (Closing, Event::Syn)
            | (Closing, Event::Data(..))
            | (Closing, Event::Stp(_)) => {
                // The peer is behind
                self.transmit(PacketKind::Fin, ctx);
            }

            (state, event) => {
                log::trace!("{}: ignoring {:?} in {:?}", self.identity, event, state);
            }
        }
    }

    fn receive_data<C>(&mut self, seq: u32, payload: &[u8], ctx: &mut C)
    where
        C: HostContext,
    {
        if self.receive_window.insert(seq, payload.into()) {
            let ack = Packet::control(PacketKind::Ack, seq, self.local_addr, &self.identity);
            ctx.send_packet(ack);
        } else {
            log::trace!(
                "{}: dropped DATA seq={} (base={} stop={:?})",
                self.identity,
                seq,
                self.receive_window.base(),
                self.receive_window.stop()
            );
        }
    }

    /// Moves staged bytes into free window slots, one segment per slot.
    fn transmit_data<C>(&mut self, ctx: &mut C)
    where
        C: HostContext,
    {
        while !self.outbound.is_empty() && self.send_window.can_send() {
            let payload = self.outbound.dequeue(self.payload_size_max);

            let local_addr = self.local_addr;
            let identity = self.identity;

            let pushed = self.send_window.push(|seq| {
                Packet::new(PacketKind::Data, seq, local_addr, &identity, payload.into())
            });

            match pushed {
                Some(packet) => ctx.send_packet(packet),
                None => {
                    debug_assert!(false, "admission refused after can_send()");
                    break;
                }
            }
        }
    }

    fn transmit_stp<C>(&mut self, ctx: &mut C)
    where
        C: HostContext,
    {
        let local_addr = self.local_addr;
        let identity = self.identity;

        let packet = self.send_window.stop_packet(
            self.outbound.len(),
            self.payload_size_max,
            |seq| Packet::control(PacketKind::Stp, seq, local_addr, &identity),
        );

        log::trace!(
            "{}: stopping at seq={}, {} in flight",
            self.identity,
            packet.seq,
            self.send_window.in_flight()
        );

        ctx.send_packet(packet);
    }

    fn transmit<C>(&mut self, kind: PacketKind, ctx: &mut C)
    where
        C: HostContext,
    {
        ctx.send_packet(Packet::control(kind, 0, self.local_addr, &self.identity));
    }

    fn retransmit<C>(&mut self, ctx: &mut C)
    where
        C: HostContext,
    {
        if !self.send_window.is_empty() {
            log::trace!(
                "{}: resending unacknowledged in [{}, {})",
                self.identity,
                self.send_window.base(),
                self.send_window.next_seq()
            );
        }

        for packet in self.send_window.unacknowledged() {
            ctx.send_packet(packet.clone());
        }
    }

    /// Enters CLOSED. Buffers are released, and the host is told to drop this connection, once the
    /// application has closed it or has read everything.
    fn finalize<C>(&mut self, ctx: &mut C)
    where
        C: HostContext,
    {
        self.set_state(State::Closed);
        self.send_window.clear();

        if self.close_requested || self.is_exhausted() {
            self.receive_window.clear();
            self.inbound.clear();
            self.outbound.clear();

            if !self.finished {
                self.finished = true;
                ctx.finish();
            }
        }
    }
}
