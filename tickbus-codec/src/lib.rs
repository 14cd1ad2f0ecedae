//! # tickbus codec
//!
//! Streaming packet engines that sit between a host byte pipe and the probe engines:
//!
//! - [`cobs`]: Consistent Overhead Byte Stuffing encoder and decoder
//! - [`checksum`]: CRC appender and verifier over `first`/`last` delimited packets
//! - `codec` (feature `tokio`): a [`tokio_util`](https://docs.rs/tokio-util) codec built on
//!   the COBS engines
//!
//! Every engine is a [`Component`](tickbus_core::stream::Component) advanced one tick at a
//! time. The batch helpers [`cobs::encode`], [`cobs::decode`], [`checksum::append`] and
//! [`checksum::verify`] drive the engines to completion for whole packets.
//!
//! ```
//! use tickbus_codec::cobs;
//!
//! let encoded = cobs::encode(&[0x11, 0x22, 0x00, 0x33]);
//! assert_eq!(encoded, vec![0x03, 0x11, 0x22, 0x02, 0x33, 0x00]);
//! assert_eq!(cobs::decode(&encoded).unwrap(), vec![vec![0x11, 0x22, 0x00, 0x33]]);
//! ```
pub mod checksum;
pub mod cobs;
#[cfg(feature = "tokio")]
pub mod codec;
pub mod error;

pub use error::CodecError;
