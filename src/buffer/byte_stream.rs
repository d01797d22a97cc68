use std::collections::VecDeque;

/// Unbounded FIFO of bytes.
#[derive(Debug, Default)]
pub struct ByteStream {
    bytes: VecDeque<u8>,
}

impl ByteStream {
    pub fn new() -> Self {
        Self {
            bytes: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn write(&mut self, bytes: &[u8]) {
        self.bytes.extend(bytes.iter().copied());
    }

    /// Pops up to `count` bytes from the front.
    pub fn dequeue(&mut self, count: usize) -> Vec<u8> {
        let count = count.min(self.bytes.len());
        self.bytes.drain(..count).collect()
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }
}
