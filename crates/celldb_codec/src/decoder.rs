//! Stream decoder.

use crate::error::{CodecError, CodecResult};
use std::io::Read;

/// Maximum allowed string length.
/// This prevents allocation-based DoS from a corrupted length prefix.
const MAX_STRING_LENGTH: i64 = 16 * 1024 * 1024;

/// Reads the primitives written by [`crate::StreamEncoder`].
pub struct StreamDecoder<R: Read> {
    input: R,
    read: u64,
}

impl<R: Read> StreamDecoder<R> {
    /// Create a new decoder over `input`.
    pub fn new(input: R) -> Self {
        Self { input, read: 0 }
    }

    /// Number of bytes consumed so far.
    pub fn bytes_read(&self) -> u64 {
        self.read
    }

    /// Consume this decoder and return the underlying stream.
    pub fn into_inner(self) -> R {
        self.input
    }

    /// Read a single byte.
    pub fn read_byte(&mut self) -> CodecResult<u8> {
        let [b] = self.take::<1>()?;
        Ok(b)
    }

    /// Read a boolean byte, rejecting anything but 0 and 1.
    pub fn read_bool(&mut self) -> CodecResult<bool> {
        match self.read_byte()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::InvalidBool(other)),
        }
    }

    /// Read a 16-bit signed integer.
    pub fn read_short(&mut self) -> CodecResult<i16> {
        Ok(i16::from_be_bytes(self.take()?))
    }

    /// Read a 32-bit signed integer.
    pub fn read_int(&mut self) -> CodecResult<i32> {
        Ok(i32::from_be_bytes(self.take()?))
    }

    /// Read a 64-bit signed integer.
    pub fn read_long(&mut self) -> CodecResult<i64> {
        Ok(i64::from_be_bytes(self.take()?))
    }

    /// Read a 64-bit float.
    pub fn read_double(&mut self) -> CodecResult<f64> {
        Ok(f64::from_bits(u64::from_be_bytes(self.take()?)))
    }

    /// Read a length-prefixed UTF-8 string.
    #[allow(clippy::cast_sign_loss)]
    pub fn read_string(&mut self) -> CodecResult<String> {
        let len = i64::from(self.read_int()?);
        if !(0..=MAX_STRING_LENGTH).contains(&len) {
            return Err(CodecError::SizeLimitExceeded {
                claimed: len,
                max_allowed: MAX_STRING_LENGTH,
            });
        }
        let mut buf = vec![0u8; len as usize];
        self.input
            .read_exact(&mut buf)
            .map_err(CodecError::from_read)?;
        self.read += buf.len() as u64;
        String::from_utf8(buf).map_err(|_| CodecError::InvalidUtf8)
    }

    fn take<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let mut buf = [0u8; N];
        self.input
            .read_exact(&mut buf)
            .map_err(CodecError::from_read)?;
        self.read += N as u64;
        Ok(buf)
    }
}

impl<R: Read + std::fmt::Debug> std::fmt::Debug for StreamDecoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamDecoder")
            .field("read", &self.read)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder(bytes: &[u8]) -> StreamDecoder<&[u8]> {
        StreamDecoder::new(bytes)
    }

    #[test]
    fn decode_int() {
        assert_eq!(decoder(&[0, 0, 1, 0]).read_int().unwrap(), 256);
        assert_eq!(decoder(&[0xff, 0xff, 0xff, 0xfe]).read_int().unwrap(), -2);
    }

    #[test]
    fn decode_bool_rejects_garbage() {
        assert!(decoder(&[1]).read_bool().unwrap());
        assert!(matches!(
            decoder(&[7]).read_bool(),
            Err(CodecError::InvalidBool(7))
        ));
    }

    #[test]
    fn truncated_int_is_eof() {
        assert!(matches!(
            decoder(&[0, 0, 1]).read_int(),
            Err(CodecError::UnexpectedEof)
        ));
    }

    #[test]
    fn truncated_string_is_eof() {
        assert!(matches!(
            decoder(&[0, 0, 0, 5, b'a']).read_string(),
            Err(CodecError::UnexpectedEof)
        ));
    }

    #[test]
    fn negative_string_length_rejected() {
        assert!(matches!(
            decoder(&[0xff, 0xff, 0xff, 0xff]).read_string(),
            Err(CodecError::SizeLimitExceeded { claimed: -1, .. })
        ));
    }

    #[test]
    fn invalid_utf8_rejected() {
        assert!(matches!(
            decoder(&[0, 0, 0, 1, 0xff]).read_string(),
            Err(CodecError::InvalidUtf8)
        ));
    }

    #[test]
    fn counts_bytes_read() {
        let mut dec = decoder(&[0, 0, 0, 1, 0, 0, 0, 0, 1]);
        dec.read_int().unwrap();
        dec.read_string().unwrap();
        assert_eq!(dec.bytes_read(), 9);
    }
}
