//! Stream encoder.

use crate::error::CodecResult;
use std::io::Write;

/// Writes fixed-width big-endian primitives to a byte stream.
///
/// Records written by this encoder carry no self-describing length or type
/// tag; the reader must know the exact record shape it is decoding.
pub struct StreamEncoder<W: Write> {
    out: W,
    written: u64,
}

impl<W: Write> StreamEncoder<W> {
    /// Create a new encoder over `out`.
    pub fn new(out: W) -> Self {
        Self { out, written: 0 }
    }

    /// Number of bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Consume this encoder and return the underlying stream.
    pub fn into_inner(self) -> W {
        self.out
    }

    /// Get a reference to the underlying stream.
    pub fn get_ref(&self) -> &W {
        &self.out
    }

    /// Write a single byte.
    pub fn write_byte(&mut self, b: u8) -> CodecResult<()> {
        self.put(&[b])
    }

    /// Write a boolean as one byte (0 or 1).
    pub fn write_bool(&mut self, b: bool) -> CodecResult<()> {
        self.put(&[u8::from(b)])
    }

    /// Write a 16-bit signed integer.
    pub fn write_short(&mut self, v: i16) -> CodecResult<()> {
        self.put(&v.to_be_bytes())
    }

    /// Write a 32-bit signed integer.
    pub fn write_int(&mut self, v: i32) -> CodecResult<()> {
        self.put(&v.to_be_bytes())
    }

    /// Write a 64-bit signed integer.
    pub fn write_long(&mut self, v: i64) -> CodecResult<()> {
        self.put(&v.to_be_bytes())
    }

    /// Write a 64-bit float by its IEEE-754 bit pattern.
    pub fn write_double(&mut self, v: f64) -> CodecResult<()> {
        self.put(&v.to_bits().to_be_bytes())
    }

    /// Write a length-prefixed UTF-8 string.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn write_string(&mut self, s: &str) -> CodecResult<()> {
        self.write_int(s.len() as i32)?;
        self.put(s.as_bytes())
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> CodecResult<()> {
        self.out.flush()?;
        Ok(())
    }

    fn put(&mut self, bytes: &[u8]) -> CodecResult<()> {
        self.out.write_all(bytes)?;
        self.written += bytes.len() as u64;
        Ok(())
    }
}

impl<W: Write + std::fmt::Debug> std::fmt::Debug for StreamEncoder<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamEncoder")
            .field("written", &self.written)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(f: impl FnOnce(&mut StreamEncoder<Vec<u8>>) -> CodecResult<()>) -> Vec<u8> {
        let mut enc = StreamEncoder::new(Vec::new());
        f(&mut enc).unwrap();
        enc.into_inner()
    }

    #[test]
    fn encode_int_is_big_endian() {
        assert_eq!(encode(|e| e.write_int(1)), vec![0, 0, 0, 1]);
        assert_eq!(encode(|e| e.write_int(-1)), vec![0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn encode_long() {
        assert_eq!(
            encode(|e| e.write_long(0x0102_0304_0506_0708)),
            vec![1, 2, 3, 4, 5, 6, 7, 8]
        );
    }

    #[test]
    fn encode_bool() {
        assert_eq!(encode(|e| e.write_bool(false)), vec![0]);
        assert_eq!(encode(|e| e.write_bool(true)), vec![1]);
    }

    #[test]
    fn encode_string_is_length_prefixed() {
        assert_eq!(
            encode(|e| e.write_string("ab")),
            vec![0, 0, 0, 2, b'a', b'b']
        );
        assert_eq!(encode(|e| e.write_string("")), vec![0, 0, 0, 0]);
    }

    #[test]
    fn counts_bytes_written() {
        let mut enc = StreamEncoder::new(Vec::new());
        enc.write_int(7).unwrap();
        enc.write_byte(1).unwrap();
        enc.write_string("xyz").unwrap();
        assert_eq!(enc.bytes_written(), 4 + 1 + 4 + 3);
    }
}
