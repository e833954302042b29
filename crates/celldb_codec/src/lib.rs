//! # CellDB Codec
//!
//! Binary stream primitives for CellDB snapshot streams.
//!
//! The snapshot protocol is a sequence of records with no self-describing
//! length or type; producer and consumer must agree on every record shape.
//! This crate supplies the leaf encoding only:
//!
//! - Integers are fixed-width, big-endian, two's complement
//! - Doubles are written as their IEEE-754 bit pattern
//! - Strings are an `i32` byte length followed by UTF-8 bytes
//! - Booleans are a single `0`/`1` byte
//!
//! ## Usage
//!
//! ```
//! use celldb_codec::{StreamDecoder, StreamEncoder};
//!
//! let mut enc = StreamEncoder::new(Vec::new());
//! enc.write_int(42).unwrap();
//! enc.write_string("inv").unwrap();
//! let bytes = enc.into_inner();
//!
//! let mut dec = StreamDecoder::new(bytes.as_slice());
//! assert_eq!(dec.read_int().unwrap(), 42);
//! assert_eq!(dec.read_string().unwrap(), "inv");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;

pub use decoder::StreamDecoder;
pub use encoder::StreamEncoder;
pub use error::{CodecError, CodecResult};
