//! Byte protocols between a host and the engines.
//!
//! Each bridge is a [`Pipe`](tickbus_core::stream::Pipe) of bytes in and bytes out, so it can
//! be placed behind a COBS or CRC framed channel without knowing about it. The [`packet`]
//! bridge does exactly that for SWD.
pub mod mdio;
pub mod packet;
pub mod swd;

use std::collections::VecDeque;
use tickbus_core::stream::Stream;

/// Answer bytes waiting to be sent to the host.
#[derive(Debug, Default)]
pub(crate) struct Outbox {
    bytes: VecDeque<u8>,
}

impl Outbox {
    pub(crate) fn push(&mut self, bytes: &[u8]) {
        log::trace!("Answer {:02x?}", bytes);
        self.bytes.extend(bytes);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub(crate) fn offer(&self, port: &mut Stream<u8>) {
        match self.bytes.front() {
            Some(byte) => port.offer(*byte),
            None => port.withdraw(),
        }
    }

    pub(crate) fn commit(&mut self, port: &Stream<u8>) {
        if port.fire() {
            self.bytes.pop_front();
        }
    }
}
