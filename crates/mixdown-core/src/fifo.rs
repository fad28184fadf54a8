//! Growable ring buffer of samples
//!
//! Storage is contiguous with independent read and write cursors. Writes
//! that exceed the free space grow the buffer (doubling); the buffer never
//! shrinks. Not synchronized: an owner that is shared across threads wraps
//! it in a lock.

use crate::types::Sample;

/// Sample FIFO used between effect stages and sessions
#[derive(Debug, Clone)]
pub struct SampleFifo {
    buffer: Vec<Sample>,
    read_pos: usize,
    len: usize,
}

impl SampleFifo {
    /// Create a FIFO with room for `capacity` samples
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: vec![0; capacity.max(1)],
            read_pos: 0,
            len: 0,
        }
    }

    /// Number of samples waiting to be read
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current storage size in samples
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Free space before the next write has to grow the storage
    #[inline]
    pub fn space(&self) -> usize {
        self.buffer.len() - self.len
    }

    /// Append samples, growing as needed. Returns the number written.
    pub fn write(&mut self, samples: &[Sample]) -> usize {
        if samples.len() > self.space() {
            self.grow(self.len + samples.len());
        }
        let cap = self.buffer.len();
        let write_pos = (self.read_pos + self.len) % cap;
        let first = samples.len().min(cap - write_pos);
        self.buffer[write_pos..write_pos + first].copy_from_slice(&samples[..first]);
        let rest = samples.len() - first;
        if rest > 0 {
            self.buffer[..rest].copy_from_slice(&samples[first..]);
        }
        self.len += samples.len();
        samples.len()
    }

    /// Append `count` zero samples
    pub fn write_silence(&mut self, count: usize) {
        const ZEROS: [Sample; 1024] = [0; 1024];
        let mut left = count;
        while left > 0 {
            let n = left.min(ZEROS.len());
            self.write(&ZEROS[..n]);
            left -= n;
        }
    }

    /// Copy out up to `dst.len()` samples without consuming them
    pub fn peek(&self, dst: &mut [Sample]) -> usize {
        let n = dst.len().min(self.len);
        let cap = self.buffer.len();
        let first = n.min(cap - self.read_pos);
        dst[..first].copy_from_slice(&self.buffer[self.read_pos..self.read_pos + first]);
        if n > first {
            dst[first..n].copy_from_slice(&self.buffer[..n - first]);
        }
        n
    }

    /// Move up to `dst.len()` samples out. Returns the number read.
    pub fn read(&mut self, dst: &mut [Sample]) -> usize {
        let n = self.peek(dst);
        self.consume(n);
        n
    }

    /// Discard up to `count` samples from the read side
    pub fn consume(&mut self, count: usize) {
        let n = count.min(self.len);
        self.read_pos = (self.read_pos + n) % self.buffer.len();
        self.len -= n;
        if self.len == 0 {
            self.read_pos = 0;
        }
    }

    /// Drop all pending samples, keeping the storage
    pub fn clear(&mut self) {
        self.read_pos = 0;
        self.len = 0;
    }

    fn grow(&mut self, needed: usize) {
        let mut new_cap = self.buffer.len().max(1);
        while new_cap < needed {
            new_cap *= 2;
        }
        let mut grown = vec![0; new_cap];
        let n = self.peek(&mut grown);
        debug_assert_eq!(n, self.len);
        self.buffer = grown;
        self.read_pos = 0;
    }
}

impl Default for SampleFifo {
    fn default() -> Self {
        Self::with_capacity(crate::types::MAX_NB_SAMPLES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_in_order() {
        let mut fifo = SampleFifo::with_capacity(8);
        assert_eq!(fifo.write(&[1, 2, 3]), 3);
        let mut out = [0; 2];
        assert_eq!(fifo.read(&mut out), 2);
        assert_eq!(out, [1, 2]);
        assert_eq!(fifo.len(), 1);
    }

    #[test]
    fn test_wraps_around() {
        let mut fifo = SampleFifo::with_capacity(4);
        fifo.write(&[1, 2, 3]);
        let mut out = [0; 2];
        fifo.read(&mut out);
        fifo.write(&[4, 5, 6]);
        assert_eq!(fifo.capacity(), 4);
        let mut all = [0; 4];
        assert_eq!(fifo.read(&mut all), 4);
        assert_eq!(all, [3, 4, 5, 6]);
    }

    #[test]
    fn test_grows_and_never_shrinks() {
        let mut fifo = SampleFifo::with_capacity(2);
        fifo.write(&[1]);
        fifo.write(&[2, 3, 4, 5]);
        assert!(fifo.capacity() >= 5);
        let cap = fifo.capacity();
        let mut out = [0; 5];
        assert_eq!(fifo.read(&mut out), 5);
        assert_eq!(out, [1, 2, 3, 4, 5]);
        fifo.clear();
        assert_eq!(fifo.capacity(), cap);
    }

    #[test]
    fn test_short_read_and_silence() {
        let mut fifo = SampleFifo::with_capacity(4);
        fifo.write_silence(3000);
        assert_eq!(fifo.len(), 3000);
        let mut out = vec![7; 4000];
        assert_eq!(fifo.read(&mut out), 3000);
        assert!(out[..3000].iter().all(|&s| s == 0));
        assert!(fifo.is_empty());
    }
}
