use std::io::{self, Read, Write};

/// Growable byte queue with read/write cursors, adapted from the reference
/// server's `Buffer` (`buffer.h`/`buffer.cpp`).
///
/// Invariant: `read_pos <= write_pos <= buf.len()`. The readable slice is
/// `[read_pos, write_pos)`; the prependable slice is `[0, read_pos)`.
#[derive(Debug, Default)]
pub struct ByteBuffer {
    buf: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
}

impl ByteBuffer {
    pub fn new() -> Self {
        ByteBuffer::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        ByteBuffer {
            buf: vec![0u8; capacity],
            read_pos: 0,
            write_pos: 0,
        }
    }

    pub fn readable_bytes(&self) -> usize {
        self.write_pos - self.read_pos
    }

    pub fn writable_bytes(&self) -> usize {
        self.buf.len() - self.write_pos
    }

    pub fn prependable_bytes(&self) -> usize {
        self.read_pos
    }

    pub fn peek(&self) -> &[u8] {
        &self.buf[self.read_pos..self.write_pos]
    }

    pub fn is_empty(&self) -> bool {
        self.read_pos == self.write_pos
    }

    /// Advances the read cursor by `n`; caps at the readable length so a
    /// caller that over-counts cannot push `read_pos` past `write_pos`.
    pub fn retrieve(&mut self, n: usize) {
        let n = n.min(self.readable_bytes());
        self.read_pos += n;
    }

    /// Advances the read cursor up to (not including) the position of
    /// `needle` within the readable slice, if present.
    pub fn retrieve_until(&mut self, needle_end_offset: usize) {
        self.retrieve(needle_end_offset);
    }

    /// Zero-fills the whole buffer and resets both cursors, matching the
    /// reference's `RetrieveAll` (`bzero` then reset).
    pub fn retrieve_all(&mut self) {
        self.buf.iter_mut().for_each(|b| *b = 0);
        self.read_pos = 0;
        self.write_pos = 0;
    }

    pub fn retrieve_all_to_string(&mut self) -> String {
        let s = String::from_utf8_lossy(self.peek()).into_owned();
        self.retrieve_all();
        s
    }

    pub fn append(&mut self, data: &[u8]) {
        self.ensure_writable(data.len());
        self.buf[self.write_pos..self.write_pos + data.len()].copy_from_slice(data);
        self.write_pos += data.len();
    }

    /// Grow-or-compact policy: if free space (trailing + prependable) is
    /// insufficient, reallocate to `write_pos + len + 1`; otherwise shift
    /// the readable bytes down to offset 0. Mirrors `MakeSpace_` exactly.
    pub fn ensure_writable(&mut self, len: usize) {
        if self.writable_bytes() >= len {
            return;
        }
        if self.writable_bytes() + self.prependable_bytes() < len {
            self.buf.resize(self.write_pos + len + 1, 0);
        } else {
            let readable = self.readable_bytes();
            self.buf.copy_within(self.read_pos..self.write_pos, 0);
            self.read_pos = 0;
            self.write_pos = readable;
        }
    }

    /// Two-vector scatter read: the trailing free region of `self.buf` plus
    /// a ≥64 KiB stack scratch buffer, mirroring `Buffer::ReadFd`'s use of
    /// `readv` with an overflow scratch vector.
    pub fn read_from_fd<R: Read>(&mut self, source: &mut R) -> io::Result<usize> {
        const SCRATCH_LEN: usize = 65536;
        let mut scratch = [0u8; SCRATCH_LEN];
        let writable = self.writable_bytes();

        // Build a single contiguous read target covering both vectors by
        // reading into the trailing region first, then the scratch, since
        // `std::io::Read` has no portable scatter primitive without the
        // unstable `read_vectored` guarantee of exact vector-order fill.
        let trailing_end = self.buf.len();
        let n = source.read(&mut self.buf[self.write_pos..trailing_end])?;
        if n < writable {
            self.write_pos += n;
            return Ok(n);
        }
        self.write_pos = trailing_end;
        let extra = source.read(&mut scratch)?;
        if extra > 0 {
            self.append(&scratch[..extra]);
        }
        Ok(n + extra)
    }

    /// Writes the readable slice out via `write`, advancing the read cursor
    /// by however much was actually written (mirrors `Buffer::WriteFd`).
    pub fn write_to_fd<W: Write>(&mut self, sink: &mut W) -> io::Result<usize> {
        let n = sink.write(self.peek())?;
        self.retrieve(n);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn append_then_retrieve_preserves_bytes() {
        let mut buf = ByteBuffer::new();
        buf.append(b"hello");
        buf.append(b" world");
        assert_eq!(buf.peek(), b"hello world");
        buf.retrieve(6);
        assert_eq!(buf.peek(), b"world");
    }

    #[test]
    fn invariant_holds_across_many_operations() {
        let mut buf = ByteBuffer::with_capacity(4);
        let mut expected = Vec::new();
        for i in 0..200u8 {
            buf.append(&[i]);
            expected.push(i);
            if i % 3 == 0 && !buf.is_empty() {
                buf.retrieve(1);
                expected.remove(0);
            }
            assert_eq!(buf.peek(), expected.as_slice());
        }
    }

    #[test]
    fn ensure_writable_compacts_before_growing_when_room_exists() {
        let mut buf = ByteBuffer::with_capacity(16);
        buf.append(b"0123456789");
        buf.retrieve(8);
        let cap_before = buf.buf.len();
        buf.ensure_writable(10);
        assert_eq!(cap_before, buf.buf.len());
        assert_eq!(buf.peek(), b"89");
    }

    #[test]
    fn retrieve_all_zero_fills_and_resets_cursors() {
        let mut buf = ByteBuffer::new();
        buf.append(b"data");
        buf.retrieve_all();
        assert_eq!(buf.readable_bytes(), 0);
        assert!(buf.buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn read_from_fd_drains_more_than_trailing_region() {
        let mut buf = ByteBuffer::with_capacity(4);
        let payload = vec![7u8; 200_000];
        let mut cursor = Cursor::new(payload.clone());
        let mut total = 0;
        loop {
            let n = buf.read_from_fd(&mut cursor).unwrap();
            if n == 0 {
                break;
            }
            total += n;
        }
        assert_eq!(total, payload.len());
        assert_eq!(buf.readable_bytes(), payload.len());
    }

    #[test]
    fn write_to_fd_advances_by_bytes_written() {
        let mut buf = ByteBuffer::new();
        buf.append(b"payload");
        let mut sink = Vec::new();
        let n = buf.write_to_fd(&mut sink).unwrap();
        assert_eq!(n, 7);
        assert_eq!(sink, b"payload");
        assert!(buf.is_empty());
    }
}
