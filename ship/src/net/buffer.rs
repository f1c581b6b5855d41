use std::io;

/// A growable FIFO byte queue. Consumed bytes are tracked with a start
/// offset; the storage compacts (moves the live region back to offset
/// zero) only right before a grow, so steady-state drains never copy.
pub struct Buffer {
    data: Vec<u8>,
    start: usize,
}

impl Buffer {
    #[inline]
    pub fn new() -> Buffer {
        Buffer {
            data: Vec::new(),
            start: 0,
        }
    }

    /// The number of unconsumed bytes in the buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len() - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.data.len()
    }

    /// Slice over the unconsumed bytes.
    #[inline]
    pub fn read_slice(&self) -> &[u8] {
        &self.data[self.start..]
    }

    /// Mark `count` bytes as consumed. Resets the storage once the
    /// buffer fully drains so reuse starts from offset zero.
    #[inline]
    pub fn consume(&mut self, count: usize) {
        self.start += count;
        debug_assert!(self.start <= self.data.len());

        if self.start == self.data.len() {
            self.data.clear();
            self.start = 0;
        }
    }

    #[inline]
    pub fn clear(&mut self) {
        self.data.clear();
        self.start = 0;
    }

    /// Append bytes, compacting first if the append would otherwise
    /// force the storage to grow.
    pub fn extend(&mut self, bytes: &[u8]) {
        if self.start > 0 && self.data.len() + bytes.len() > self.data.capacity() {
            self.data.drain(..self.start);
            self.start = 0;
        }

        self.data.extend_from_slice(bytes);
    }

    /// Write the contents of the buffer to the supplied writer,
    /// advancing the consumed offset. Stops at the first partial write.
    pub fn egress<W: io::Write>(&mut self, mut writer: W) -> io::Result<usize> {
        let mut total = 0;

        while self.start < self.data.len() {
            let count = writer.write(&self.data[self.start..])?;

            if count == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }

            total += count;
            self.consume(count);
        }

        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::min;

    struct MockSink {
        data: Vec<u8>,
        chunk: usize,
        max_size: usize,
    }

    impl io::Write for MockSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.data.len() >= self.max_size {
                return Err(io::ErrorKind::WouldBlock.into());
            }

            let count = min(self.chunk, buf.len());
            self.data.extend(&buf[..count]);
            Ok(count)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn extend_consume_roundtrip() {
        let mut buffer = Buffer::new();

        buffer.extend(&[1, 2, 3, 4, 5]);
        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.read_slice(), &[1, 2, 3, 4, 5]);

        buffer.consume(2);
        assert_eq!(buffer.read_slice(), &[3, 4, 5]);

        buffer.extend(&[6]);
        assert_eq!(buffer.read_slice(), &[3, 4, 5, 6]);
    }

    #[test]
    fn full_drain_resets_offset() {
        let mut buffer = Buffer::new();

        buffer.extend(&[1, 2, 3]);
        buffer.consume(3);

        assert!(buffer.is_empty());
        assert_eq!(buffer.start, 0);
        assert_eq!(buffer.data.len(), 0);
    }

    #[test]
    fn compacts_only_before_grow() {
        let mut buffer = Buffer::new();

        buffer.extend(&[0u8; 64]);
        buffer.consume(32);

        let cap = buffer.data.capacity();

        // Fits in the existing allocation: no compaction.
        if cap > 64 {
            buffer.extend(&[1u8; 1]);
            assert_eq!(buffer.start, 32);
        }

        // Force a grow; the start offset has to fold back to zero.
        let grow = vec![2u8; cap];
        buffer.extend(&grow);
        assert_eq!(buffer.start, 0);
        assert_eq!(&buffer.read_slice()[..32], &[0u8; 32][..]);
    }

    #[test]
    fn egress_partial_write() {
        let mut sink = MockSink {
            data: Vec::new(),
            chunk: 4,
            max_size: 6,
        };

        let mut buffer = Buffer::new();
        buffer.extend(&[9u8; 10]);

        let result = buffer.egress(&mut sink);
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::WouldBlock);
        assert_eq!(sink.data.len(), 8);
        assert_eq!(buffer.len(), 2);

        sink.max_size = 32;
        let sent = buffer.egress(&mut sink).unwrap();
        assert_eq!(sent, 2);
        assert!(buffer.is_empty());
    }
}
