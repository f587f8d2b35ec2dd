//! A growable byte buffer for accumulating partial reads and queuing writes
//! across non-blocking `tick()` calls. Modeled on the teacher's
//! `neutronium::net::buffer::Buffer`, rebuilt over a plain `Vec<u8>` instead
//! of a deque crate — this daemon's frames are small and short-lived enough
//! that the occasional `drain`-triggered memmove is not worth a dependency.

use std::io::{self, Read, Write};

use driftwatch_proto::error::ProtoResult;

/// Buffer grows in this increment whenever an `ingress`/`write_slice` call
/// needs more room than it currently has.
const GROWTH_INCREMENT: usize = 4096;

#[derive(Debug, Default)]
pub struct Buffer {
    data: Vec<u8>,
}

impl Buffer {
    pub fn new() -> Self {
        Buffer { data: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Appends `slice` to the tail of the buffer.
    pub fn write_slice(&mut self, slice: &[u8]) {
        self.data.extend_from_slice(slice);
    }

    /// Returns the full contents as a slice, without consuming them.
    pub fn data_slice(&self) -> &[u8] {
        &self.data
    }

    /// Removes the first `count` bytes from the buffer.
    pub fn drain(&mut self, count: usize) {
        let count = count.min(self.data.len());
        self.data.drain(0..count);
    }

    /// Reads as much as possible from `source` into the tail of the buffer
    /// without blocking. Returns the number of bytes read. A `WouldBlock`
    /// error from `source` is not propagated — it just means zero bytes were
    /// available this tick.
    pub fn ingress<R: Read>(&mut self, source: &mut R) -> ProtoResult<usize> {
        let start = self.data.len();
        self.data.resize(start + GROWTH_INCREMENT, 0);

        match source.read(&mut self.data[start..]) {
            Ok(0) => {
                self.data.truncate(start);
                Err(driftwatch_proto::error::ProtoError::Fatal(
                    driftwatch_proto::error::ErrorKind::Io(io::ErrorKind::UnexpectedEof),
                ))
            }
            Ok(n) => {
                self.data.truncate(start + n);
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.data.truncate(start);
                Ok(0)
            }
            Err(e) => {
                self.data.truncate(start);
                Err(e.into())
            }
        }
    }

    /// Writes as much of the buffer as possible to `dest` without blocking,
    /// draining whatever was successfully written.
    pub fn egress<W: Write>(&mut self, dest: &mut W) -> ProtoResult<usize> {
        if self.data.is_empty() {
            return Ok(0);
        }
        match dest.write(&self.data) {
            Ok(0) => Err(driftwatch_proto::error::ProtoError::Fatal(
                driftwatch_proto::error::ErrorKind::Io(io::ErrorKind::WriteZero),
            )),
            Ok(n) => {
                self.drain(n);
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockChannel {
        data: Vec<u8>,
    }

    impl Read for MockChannel {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.data.is_empty() {
                return Err(io::Error::from(io::ErrorKind::WouldBlock));
            }
            let n = buf.len().min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data.drain(..n);
            Ok(n)
        }
    }

    impl Write for MockChannel {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_then_egress_roundtrips() {
        let mut buffer = Buffer::new();
        buffer.write_slice(b"hello world");
        let mut sink = MockChannel { data: Vec::new() };
        let n = buffer.egress(&mut sink).unwrap();
        assert_eq!(n, 11);
        assert!(buffer.is_empty());
        assert_eq!(sink.data, b"hello world");
    }

    #[test]
    fn ingress_accumulates_partial_reads() {
        let mut buffer = Buffer::new();
        let mut source = MockChannel {
            data: b"first".to_vec(),
        };
        buffer.ingress(&mut source).unwrap();
        assert_eq!(buffer.data_slice(), b"first");

        source.data = b"second".to_vec();
        buffer.ingress(&mut source).unwrap();
        assert_eq!(buffer.data_slice(), b"firstsecond");
    }

    #[test]
    fn ingress_on_would_block_reads_nothing() {
        let mut buffer = Buffer::new();
        let mut source = MockChannel { data: Vec::new() };
        let n = buffer.ingress(&mut source).unwrap();
        assert_eq!(n, 0);
        assert!(buffer.is_empty());
    }

    #[test]
    fn drain_removes_from_head() {
        let mut buffer = Buffer::new();
        buffer.write_slice(b"abcdef");
        buffer.drain(3);
        assert_eq!(buffer.data_slice(), b"def");
    }
}
