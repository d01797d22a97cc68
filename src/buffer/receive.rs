use super::seq_before;
use super::Window;

#[derive(Debug)]
pub struct ReceiveWindow {
    window: Window<Box<[u8]>>,
}

impl ReceiveWindow {
    pub fn new(base: u32) -> Self {
        Self {
            window: Window::new(base),
        }
    }

    /// Next sequence number to be released.
    pub fn base(&self) -> u32 {
        self.window.base()
    }

    /// Number of buffered segments.
    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Offers a DATA segment. Returns true if the segment should be acknowledged: it was stored,
    /// it was already stored, or it was already released. Returns false if it lies beyond the
    /// window or at/after the stop sequence.
    pub fn insert(&mut self, seq: u32, payload: Box<[u8]>) -> bool {
        if seq_before(seq, self.window.base()) {
            return true;
        }

        self.window.insert(seq, payload)
    }

    /// Releases the base segment if it has arrived.
    pub fn remove(&mut self) -> Option<Box<[u8]>> {
        if self.window.get(self.window.base()).is_some() {
            self.window.pop_base()
        } else {
            None
        }
    }

    /// Records the peer's stop sequence. Only the first call has any effect.
    pub fn stop_at(&mut self, seq: u32) {
        if self.window.stop().is_none() {
            self.window.set_stop(seq);
        }
    }

    pub fn stop(&self) -> Option<u32> {
        self.window.stop()
    }

    pub fn clear(&mut self) {
        self.window.clear();
    }
}
