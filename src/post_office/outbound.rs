use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::packet::Packet;

struct Queue {
    packets: VecDeque<Packet>,
    closed: bool,
}

/// FIFO of packets awaiting transmission. Pushing never blocks on the link.
pub struct OutboundQueue {
    queue: Mutex<Queue>,
    ready: Condvar,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(Queue {
                packets: VecDeque::new(),
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Appends a packet. Packets pushed after the queue is closed are discarded.
    pub fn push(&self, packet: Packet) {
        let ref mut queue = *self.queue.lock().unwrap();

        if queue.closed {
            log::trace!("discarding {} after shutdown", packet.kind);
            return;
        }

        queue.packets.push_back(packet);
        self.ready.notify_one();
    }

    /// Blocks until a packet is available. Returns `None` once the queue has been closed and
    /// everything queued before that has been popped.
    pub fn pop(&self) -> Option<Packet> {
        let mut queue = self.queue.lock().unwrap();

        loop {
            if let Some(packet) = queue.packets.pop_front() {
                return Some(packet);
            }

            if queue.closed {
                return None;
            }

            queue = self.ready.wait(queue).unwrap();
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().packets.len()
    }

    /// Stops accepting packets. Those already queued are still handed out.
    pub fn close(&self) {
        self.queue.lock().unwrap().closed = true;
        self.ready.notify_all();
    }

    /// Stops accepting packets and discards those already queued.
    pub fn abort(&self) {
        let ref mut queue = *self.queue.lock().unwrap();

        queue.closed = true;
        queue.packets.clear();

        self.ready.notify_all();
    }
}
