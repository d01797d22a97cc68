mod byte_stream;
mod receive;
mod send;

pub use byte_stream::ByteStream;
pub use receive::ReceiveWindow;
pub use send::SendWindow;

/// Number of segments a window may hold.
pub const WINDOW_SIZE: u32 = 16;

/// Returns true if `a` precedes `b` in wrapping sequence space.
pub fn seq_before(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

//            base            base+size
//            v               v
// -----------#__#_##_________--------> sequence numbers
//                      ^
//                      stop (optional)
//
// Slots are addressed by seq mod WINDOW_SIZE, so a slot is only meaningful for sequence numbers
// in [base, base+size).

#[derive(Debug)]
pub struct Window<T> {
    base: u32,
    slots: [Option<T>; WINDOW_SIZE as usize],
    filled: usize,
    stop: Option<u32>,
}

impl<T> Window<T> {
    pub fn new(base: u32) -> Self {
        Self {
            base,
            slots: std::array::from_fn(|_| None),
            filled: 0,
            stop: None,
        }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn stop(&self) -> Option<u32> {
        self.stop
    }

    pub fn set_stop(&mut self, stop: u32) {
        self.stop = Some(stop);
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// True if `seq` is in [base, base+size) and strictly before any stop sequence.
    pub fn contains(&self, seq: u32) -> bool {
        let delta = seq.wrapping_sub(self.base);

        if delta >= WINDOW_SIZE {
            return false;
        }

        match self.stop {
            Some(stop) => seq_before(seq, stop),
            None => true,
        }
    }

    fn index(seq: u32) -> usize {
        (seq % WINDOW_SIZE) as usize
    }

    pub fn get(&self, seq: u32) -> Option<&T> {
        if seq.wrapping_sub(self.base) < WINDOW_SIZE {
            self.slots[Self::index(seq)].as_ref()
        } else {
            None
        }
    }

    /// Stores `value` at `seq` unless the slot is already occupied. Returns false if `seq` lies
    /// outside the window.
    pub fn insert(&mut self, seq: u32, value: T) -> bool {
        if !self.contains(seq) {
            return false;
        }

        let slot = &mut self.slots[Self::index(seq)];

        if slot.is_none() {
            *slot = Some(value);
            self.filled += 1;
        }

        true
    }

    pub fn take(&mut self, seq: u32) -> Option<T> {
        if seq.wrapping_sub(self.base) >= WINDOW_SIZE {
            return None;
        }

        let value = self.slots[Self::index(seq)].take();

        if value.is_some() {
            self.filled -= 1;
        }

        value
    }

    /// Removes the base slot's value, if any, and advances the base by one.
    pub fn pop_base(&mut self) -> Option<T> {
        let value = self.take(self.base);
        self.base = self.base.wrapping_add(1);
        value
    }

    /// Advances the base over empty slots, stopping at the first occupied slot or at `limit`.
    pub fn advance_empty(&mut self, limit: u32) {
        while self.base != limit && self.slots[Self::index(self.base)].is_none() {
            self.base = self.base.wrapping_add(1);
        }
    }

    /// Iterates over occupied slots in sequence order, starting from the base.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> + '_ {
        (0..WINDOW_SIZE).filter_map(move |i| {
            let seq = self.base.wrapping_add(i);
            self.slots[Self::index(seq)]
                .as_ref()
                .map(|value| (seq, value))
        })
    }

    /// Drops every stored value. The base and stop sequence are kept.
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.filled = 0;
    }
}
