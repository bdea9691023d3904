//! Bit-level I/O over byte streams.
//!
//! The container packs fields bit by bit with no byte alignment between
//! blocks, so both sides work through these streams exclusively. Bits are
//! packed MSB-first within each byte and multi-byte values are big-endian on
//! the wire. A single call moves between 1 and 64 bits.
//!
//! # Example
//!
//! ```
//! use kanzi_core::bitstream::{InputBitStream, OutputBitStream};
//! use std::io::Cursor;
//!
//! let mut sink = Vec::new();
//! let mut obs = OutputBitStream::new(&mut sink);
//! obs.write_bits(0x4B414E5A, 32).unwrap();
//! obs.write_bits(6, 5).unwrap();
//! obs.close().unwrap();
//! drop(obs);
//!
//! let mut ibs = InputBitStream::new(Cursor::new(sink));
//! assert_eq!(ibs.read_bits(32).unwrap(), 0x4B414E5A);
//! assert_eq!(ibs.read_bits(5).unwrap(), 6);
//! ```

use crate::error::{KanziError, Result};
use std::io::{Read, Write};

#[inline]
fn mask(count: u32) -> u64 {
    if count >= 64 {
        u64::MAX
    } else {
        (1u64 << count) - 1
    }
}

/// Bit writer over any `Write` implementation.
///
/// Accumulates bits in a 64-bit word and spills whole words to the sink.
/// `close` pads the final partial byte with zero bits.
#[derive(Debug)]
pub struct OutputBitStream<W: Write> {
    writer: W,
    /// Pending bits, left-aligned (MSB side).
    current: u64,
    /// Number of valid bits in `current`.
    avail: u32,
    /// Total bits accepted so far.
    written: u64,
    closed: bool,
}

impl<W: Write> OutputBitStream<W> {
    /// Create a new bit writer wrapping the given sink.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            current: 0,
            avail: 0,
            written: 0,
            closed: false,
        }
    }

    /// Total number of bits written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Write a single bit.
    #[inline]
    pub fn write_bit(&mut self, bit: u32) -> Result<()> {
        self.write_bits(u64::from(bit & 1), 1)
    }

    /// Write the `count` low bits of `value`, MSB first.
    ///
    /// `count` must be in `[1, 64]`.
    pub fn write_bits(&mut self, value: u64, count: u32) -> Result<()> {
        debug_assert!((1..=64).contains(&count));

        if self.closed {
            return Err(KanziError::BitStreamClosed);
        }

        let value = value & mask(count);
        let free = 64 - self.avail;

        if count <= free {
            // Fits in the current word
            if count < 64 {
                self.current |= value << (free - count);
            } else {
                self.current = value;
            }

            self.avail += count;

            if self.avail == 64 {
                self.spill()?;
            }
        } else {
            // Split across the word boundary
            let spilled = count - free;
            self.current |= value >> spilled;
            self.avail = 64;
            self.spill()?;
            self.current = value << (64 - spilled);
            self.avail = spilled;
        }

        self.written += u64::from(count);
        Ok(())
    }

    /// Flush the full 64-bit word to the sink.
    fn spill(&mut self) -> Result<()> {
        self.writer.write_all(&self.current.to_be_bytes())?;
        self.current = 0;
        self.avail = 0;
        Ok(())
    }

    /// Push complete bytes to the sink and flush it. Up to 7 trailing bits
    /// stay buffered; only [`close`](Self::close) pads them out.
    pub fn flush(&mut self) -> Result<()> {
        if self.closed {
            return Err(KanziError::BitStreamClosed);
        }

        let bytes = (self.avail >> 3) as usize;

        if bytes > 0 {
            self.writer.write_all(&self.current.to_be_bytes()[..bytes])?;
            self.current <<= bytes * 8;
            self.avail -= (bytes as u32) << 3;
        }

        self.writer.flush()?;
        Ok(())
    }

    /// Pad the trailing partial byte with zeros, write everything out and
    /// flush the sink. Further writes fail with `BitStreamClosed`.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }

        let bytes = ((self.avail + 7) >> 3) as usize;

        if bytes > 0 {
            self.writer.write_all(&self.current.to_be_bytes()[..bytes])?;
            self.current = 0;
            self.avail = 0;
        }

        self.writer.flush()?;
        self.closed = true;
        Ok(())
    }

    /// Consume the stream and return the underlying writer, closing first.
    pub fn into_inner(mut self) -> Result<W> {
        self.close()?;
        // Drop has nothing left to do once closed
        let this = std::mem::ManuallyDrop::new(self);
        // SAFETY: self is consumed and never dropped, reading the field out is fine
        Ok(unsafe { std::ptr::read(&this.writer) })
    }
}

impl<W: Write> Drop for OutputBitStream<W> {
    fn drop(&mut self) {
        // Best-effort close on drop
        let _ = self.close();
    }
}

/// Bit reader over any `Read` implementation.
///
/// Buffers up to 64 bits at a time. Running out of input mid-read yields
/// [`KanziError::BitStreamEof`].
#[derive(Debug)]
pub struct InputBitStream<R: Read> {
    reader: R,
    /// Buffered bits, right-aligned (next bit is the highest valid one).
    current: u64,
    /// Number of valid bits in `current`.
    avail: u32,
    /// Total bits consumed so far.
    read: u64,
    closed: bool,
}

impl<R: Read> InputBitStream<R> {
    /// Create a new bit reader wrapping the given source.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            current: 0,
            avail: 0,
            read: 0,
            closed: false,
        }
    }

    /// Total number of bits consumed so far.
    pub fn read(&self) -> u64 {
        self.read
    }

    /// Read a single bit.
    #[inline]
    pub fn read_bit(&mut self) -> Result<u32> {
        Ok(self.read_bits(1)? as u32)
    }

    /// Read `count` bits, MSB first. `count` must be in `[1, 64]`.
    pub fn read_bits(&mut self, count: u32) -> Result<u64> {
        debug_assert!((1..=64).contains(&count));

        if self.closed {
            return Err(KanziError::BitStreamClosed);
        }

        let mut remaining = count;
        let mut res = 0u64;

        while remaining > 0 {
            if self.avail == 0 {
                self.refill()?;
            }

            let take = self.avail.min(remaining);
            let chunk = (self.current >> (self.avail - take)) & mask(take);
            res = if take == 64 { chunk } else { (res << take) | chunk };
            self.avail -= take;
            remaining -= take;
        }

        self.read += u64::from(count);
        Ok(res)
    }

    /// Pull the next 1..8 bytes from the source.
    fn refill(&mut self) -> Result<()> {
        let mut buf = [0u8; 8];
        let mut n = 0;

        // Loop until at least one byte arrives or the source is exhausted
        while n == 0 {
            match self.reader.read(&mut buf)? {
                0 => return Err(KanziError::BitStreamEof),
                k => n = k,
            }
        }

        let mut v = 0u64;

        for &b in &buf[..n] {
            v = (v << 8) | u64::from(b);
        }

        self.current = v;
        self.avail = (n as u32) << 3;
        Ok(())
    }

    /// Release the underlying reader. Buffered bits are discarded.
    pub fn close(&mut self) {
        self.closed = true;
        self.current = 0;
        self.avail = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_msb_first_packing() {
        let mut out = Vec::new();
        {
            let mut obs = OutputBitStream::new(&mut out);
            obs.write_bits(0b101, 3).unwrap();
            obs.write_bits(0b11001, 5).unwrap();
            obs.close().unwrap();
        }
        // 101 then 11001 -> 0b10111001
        assert_eq!(out, vec![0b1011_1001]);
    }

    #[test]
    fn test_partial_byte_zero_padded() {
        let mut out = Vec::new();
        {
            let mut obs = OutputBitStream::new(&mut out);
            obs.write_bits(0b11, 2).unwrap();
            obs.close().unwrap();
        }
        assert_eq!(out, vec![0b1100_0000]);
    }

    #[test]
    fn test_write_64_bits() {
        let mut out = Vec::new();
        {
            let mut obs = OutputBitStream::new(&mut out);
            obs.write_bit(1).unwrap();
            obs.write_bits(u64::MAX, 64).unwrap();
            obs.write_bits(0, 7).unwrap();
            obs.close().unwrap();
        }
        assert_eq!(out.len(), 9);
        assert_eq!(out[0], 0xFF);

        let mut ibs = InputBitStream::new(Cursor::new(out));
        assert_eq!(ibs.read_bit().unwrap(), 1);
        assert_eq!(ibs.read_bits(64).unwrap(), u64::MAX);
        assert_eq!(ibs.read_bits(7).unwrap(), 0);
    }

    #[test]
    fn test_roundtrip_mixed_widths() {
        let values: Vec<(u64, u32)> = vec![
            (0x4B414E5A, 32),
            (6, 5),
            (1, 1),
            (0x3FF, 10),
            (0xFFFF_FFFF_FFFF, 48),
            (0, 26),
            (63, 6),
            (0x1234_5678_9ABC_DEF0, 64),
        ];

        let mut out = Vec::new();
        {
            let mut obs = OutputBitStream::new(&mut out);
            for &(v, n) in &values {
                obs.write_bits(v, n).unwrap();
            }
            obs.close().unwrap();
        }

        let mut ibs = InputBitStream::new(Cursor::new(out));
        for &(v, n) in &values {
            assert_eq!(ibs.read_bits(n).unwrap(), v, "width {}", n);
        }
    }

    #[test]
    fn test_flush_keeps_partial_bits() {
        let mut out = Vec::new();
        {
            let mut obs = OutputBitStream::new(&mut out);
            obs.write_bits(0xABC, 12).unwrap();
            obs.flush().unwrap();
            obs.write_bits(0xD, 4).unwrap();
            obs.close().unwrap();
        }
        // Flushing mid-byte must not disturb the packing
        assert_eq!(out, vec![0xAB, 0xCD]);
    }

    #[test]
    fn test_eof() {
        let mut ibs = InputBitStream::new(Cursor::new(vec![0xAB]));
        assert_eq!(ibs.read_bits(8).unwrap(), 0xAB);
        assert!(matches!(ibs.read_bit(), Err(KanziError::BitStreamEof)));
    }

    #[test]
    fn test_eof_mid_read() {
        let mut ibs = InputBitStream::new(Cursor::new(vec![0xAB]));
        // 12 bits requested, only 8 available
        assert!(matches!(
            ibs.read_bits(12),
            Err(KanziError::BitStreamEof)
        ));
    }

    #[test]
    fn test_closed_write_fails() {
        let mut obs = OutputBitStream::new(Vec::new());
        obs.close().unwrap();
        assert!(matches!(
            obs.write_bit(1),
            Err(KanziError::BitStreamClosed)
        ));
    }

    #[test]
    fn test_written_read_counters() {
        let mut out = Vec::new();
        {
            let mut obs = OutputBitStream::new(&mut out);
            obs.write_bits(1, 3).unwrap();
            obs.write_bits(1, 64).unwrap();
            assert_eq!(obs.written(), 67);
            obs.close().unwrap();
        }

        let mut ibs = InputBitStream::new(Cursor::new(out));
        ibs.read_bits(3).unwrap();
        ibs.read_bits(64).unwrap();
        assert_eq!(ibs.read(), 67);
    }
}
