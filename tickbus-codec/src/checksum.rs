//! Cut-through CRC appending and verification for packetized byte streams.
use crate::error::CodecError;
use crc::{Crc, Digest};
use std::collections::VecDeque;
use tickbus_core::sim::Bench;
use tickbus_core::stream::{Component, Pipe, Stream};

/// A running checksum over a byte stream.
pub trait Checksum {
    /// Width of the checksum in bits.
    fn width(&self) -> u8;

    /// Forget everything fed so far.
    fn restart(&mut self);

    fn update(&mut self, bytes: &[u8]);

    /// Returns the checksum of everything fed since the last restart and restarts.
    fn finish(&mut self) -> u64;

    /// Number of bytes the checksum occupies on the wire.
    fn len(&self) -> usize {
        usize::from(self.width()).div_ceil(8)
    }
}

macro_rules! running_crc {
    ($name:ident, $width:ty) => {
        /// Running CRC over the `crc` crate's table driven implementation.
        pub struct $name {
            crc: &'static Crc<$width>,
            digest: Digest<'static, $width>,
        }

        impl $name {
            pub fn new(crc: &'static Crc<$width>) -> $name {
                $name {
                    crc,
                    digest: crc.digest(),
                }
            }
        }

        impl Checksum for $name {
            fn width(&self) -> u8 {
                self.crc.algorithm.width
            }

            fn restart(&mut self) {
                self.digest = self.crc.digest();
            }

            fn update(&mut self, bytes: &[u8]) {
                self.digest.update(bytes);
            }

            fn finish(&mut self) -> u64 {
                let digest = std::mem::replace(&mut self.digest, self.crc.digest());
                u64::from(digest.finalize())
            }
        }
    };
}

running_crc!(RunningCrc8, u8);
running_crc!(RunningCrc16, u16);
running_crc!(RunningCrc32, u32);
running_crc!(RunningCrc64, u64);

fn checked_len(checksum: &impl Checksum) -> Result<usize, CodecError> {
    let width = checksum.width();
    if width == 0 || width % 8 != 0 {
        return Err(CodecError::ChecksumWidth(width));
    }
    Ok(usize::from(width / 8))
}

/// One byte of a packet. `end` marks a data-less token closing the packet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Packet {
    pub data: u8,
    pub first: bool,
    pub last: bool,
    pub end: bool,
}

impl Packet {
    pub fn data(data: u8) -> Packet {
        Packet {
            data,
            ..Packet::default()
        }
    }

    pub fn end() -> Packet {
        Packet {
            end: true,
            ..Packet::default()
        }
    }

    /// Marks the bytes of `bytes` with `first` and `last`.
    pub fn frame(bytes: &[u8]) -> Vec<Packet> {
        let count = bytes.len();
        bytes
            .iter()
            .enumerate()
            .map(|(index, data)| Packet {
                data: *data,
                first: index == 0,
                last: index + 1 == count,
                end: false,
            })
            .collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AppenderState {
    Data,
    Crc,
}

/// Passes packet data through without latency and follows it with the checksum, least
/// significant byte first.
pub struct ChecksumAppender<C> {
    pub i: Stream<Packet>,
    pub o: Stream<Packet>,
    checksum: C,
    len: usize,
    state: AppenderState,
    value: u64,
    offset: usize,
}

impl<C: Checksum> ChecksumAppender<C> {
    pub fn new(checksum: C) -> Result<ChecksumAppender<C>, CodecError> {
        let len = checked_len(&checksum)?;
        Ok(ChecksumAppender {
            i: Stream::default(),
            o: Stream::default(),
            checksum,
            len,
            state: AppenderState::Data,
            value: 0,
            offset: 0,
        })
    }
}

impl<C: Checksum> Component for ChecksumAppender<C> {
    fn forward(&mut self) {
        match self.state {
            AppenderState::Data => {
                let mut packet = self.i.payload;
                if self.i.valid && !packet.end {
                    packet.last = false;
                    self.o.offer(packet);
                } else {
                    self.o.withdraw();
                }
            }
            AppenderState::Crc => self.o.offer(Packet {
                data: (self.value >> (8 * self.offset)) as u8,
                first: false,
                last: self.offset + 1 == self.len,
                end: false,
            }),
        }
    }

    fn backward(&mut self) {
        self.i.ready = match self.state {
            AppenderState::Data => self.o.ready || self.i.payload.end,
            AppenderState::Crc => false,
        };
    }

    fn commit(&mut self) {
        match self.state {
            AppenderState::Data if self.i.fire() => {
                let packet = self.i.payload;
                if packet.first {
                    self.checksum.restart();
                }
                if !packet.end {
                    self.checksum.update(&[packet.data]);
                }
                if packet.last || packet.end {
                    self.value = self.checksum.finish();
                    log::trace!("Appending checksum {:#x}", self.value);
                    self.offset = 0;
                    self.state = AppenderState::Crc;
                }
            }
            AppenderState::Data => {}
            AppenderState::Crc => {
                if self.o.fire() {
                    self.offset += 1;
                    if self.offset == self.len {
                        self.state = AppenderState::Data;
                    }
                }
            }
        }
    }
}

impl<C: Checksum> Pipe for ChecksumAppender<C> {
    type In = Packet;
    type Out = Packet;

    fn input(&mut self) -> &mut Stream<Packet> {
        &mut self.i
    }

    fn output(&mut self) -> &mut Stream<Packet> {
        &mut self.o
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum VerifierState {
    Data,
    Last,
}

/// Strips and checks the trailing checksum of each packet.
///
/// Data is cut through with a latency of the checksum length plus one byte. `last` is
/// asserted on the final payload byte if and only if the checksum matches. Packets too short
/// to carry a checksum and a payload byte are dropped.
pub struct ChecksumVerifier<C> {
    pub i: Stream<Packet>,
    pub o: Stream<Packet>,
    checksum: C,
    len: usize,
    window: VecDeque<u8>,
    emitted: bool,
    matched: bool,
    state: VerifierState,
}

impl<C: Checksum> ChecksumVerifier<C> {
    pub fn new(checksum: C) -> Result<ChecksumVerifier<C>, CodecError> {
        let len = checked_len(&checksum)?;
        Ok(ChecksumVerifier {
            i: Stream::default(),
            o: Stream::default(),
            checksum,
            len,
            window: VecDeque::with_capacity(len + 1),
            emitted: false,
            matched: false,
            state: VerifierState::Data,
        })
    }

    fn full(&self) -> bool {
        self.window.len() == self.len + 1
    }

    fn restarts(&self) -> bool {
        self.i.payload.first && !self.i.payload.end
    }

    fn clear(&mut self) {
        self.window.clear();
        self.checksum.restart();
        self.emitted = false;
    }

    /// Closes the packet held in the window: one payload byte and the received checksum.
    fn close(&mut self) {
        if !self.full() {
            log::debug!("Dropping packet shorter than its checksum");
            self.clear();
            return;
        }
        self.checksum.update(&[self.window[0]]);
        let computed = self.checksum.finish();
        let received = self
            .window
            .iter()
            .skip(1)
            .rev()
            .fold(0u64, |value, byte| (value << 8) | u64::from(*byte));
        self.matched = computed == received;
        if !self.matched {
            log::debug!(
                "Checksum mismatch: computed {:#x}, received {:#x}",
                computed,
                received
            );
        }
        self.state = VerifierState::Last;
    }
}

impl<C: Checksum> Component for ChecksumVerifier<C> {
    fn forward(&mut self) {
        match self.state {
            VerifierState::Data => {
                if self.i.valid && !self.i.payload.end && !self.restarts() && self.full() {
                    self.o.offer(Packet {
                        data: self.window[0],
                        first: !self.emitted,
                        last: false,
                        end: false,
                    });
                } else {
                    self.o.withdraw();
                }
            }
            VerifierState::Last => self.o.offer(Packet {
                data: self.window[0],
                first: !self.emitted,
                last: self.matched,
                end: false,
            }),
        }
    }

    fn backward(&mut self) {
        self.i.ready = match self.state {
            VerifierState::Data => {
                self.o.ready || self.i.payload.end || self.restarts() || !self.full()
            }
            VerifierState::Last => false,
        };
    }

    fn commit(&mut self) {
        match self.state {
            VerifierState::Data if self.i.fire() => {
                let packet = self.i.payload;
                if packet.end {
                    self.close();
                    return;
                }
                if packet.first {
                    if !self.window.is_empty() {
                        log::debug!("Dropping unterminated packet");
                    }
                    self.clear();
                }
                if self.o.fire() {
                    if let Some(byte) = self.window.pop_front() {
                        self.checksum.update(&[byte]);
                        self.emitted = true;
                    }
                }
                self.window.push_back(packet.data);
                if packet.last {
                    self.close();
                }
            }
            VerifierState::Data => {}
            VerifierState::Last => {
                if self.o.fire() {
                    self.clear();
                    self.state = VerifierState::Data;
                }
            }
        }
    }
}

impl<C: Checksum> Pipe for ChecksumVerifier<C> {
    type In = Packet;
    type Out = Packet;

    fn input(&mut self) -> &mut Stream<Packet> {
        &mut self.i
    }

    fn output(&mut self) -> &mut Stream<Packet> {
        &mut self.o
    }
}

/// Returns `payload` followed by its checksum.
pub fn append<C: Checksum>(checksum: C, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    let appender = ChecksumAppender::new(checksum)?;
    let len = appender.len;
    let mut bench = Bench::new(appender);
    if payload.is_empty() {
        bench.source.push(Packet {
            first: true,
            ..Packet::end()
        });
    } else {
        bench.source.extend(Packet::frame(payload));
    }
    let limit = 2 * (payload.len() + len) as u64 + 4;
    let out = bench.collect(payload.len() + len, limit, |_| {});
    Ok(out.into_iter().map(|packet| packet.data).collect())
}

/// Checks the trailing checksum of `packet`. Returns the payload if the checksum matches.
///
/// A packet consisting of the checksum alone carries an empty payload, as produced by
/// [`append`] for an empty slice.
pub fn verify<C: Checksum>(
    mut checksum: C,
    packet: &[u8],
) -> Result<Option<Vec<u8>>, CodecError> {
    let len = checked_len(&checksum)?;
    if packet.len() < len {
        return Ok(None);
    }
    if packet.len() == len {
        // the verifier engine only ever closes packets with data
        checksum.restart();
        let expected = checksum.finish().to_le_bytes();
        return Ok((packet == &expected[..len]).then(Vec::new));
    }
    let verifier = ChecksumVerifier::new(checksum)?;
    let mut bench = Bench::new(verifier);
    bench.source.extend(Packet::frame(packet));
    let expected = packet.len() - bench.dut.len;
    let out = bench.collect(expected, 2 * packet.len() as u64 + 4, |_| {});
    let matched = out.last().is_some_and(|packet| packet.last);
    Ok(matched.then(|| out.into_iter().map(|packet| packet.data).collect()))
}
