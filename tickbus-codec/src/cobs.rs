//! Streaming [Consistent Overhead Byte Stuffing](https://en.wikipedia.org/wiki/Consistent_Overhead_Byte_Stuffing).
//!
//! The [`Encoder`] turns a stream of data and end tokens into a byte stream where `0x00` only
//! ever appears as packet delimiter; the [`Decoder`] inverts this.
use crate::error::CodecError;
use tickbus_core::sim::Bench;
use tickbus_core::stream::{
    Component, Pipe, Stream, StreamBuffer, connect_backward, connect_forward,
};

/// Longest run of data bytes one overhead byte can describe, plus one.
const MAX_GROUP: usize = 0xff;

pub const DEFAULT_DEPTH: usize = 256;

/// Either a data byte or the end of a packet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Token {
    pub data: u8,
    pub end: bool,
}

impl Token {
    pub fn data(data: u8) -> Token {
        Token { data, end: false }
    }

    pub fn end() -> Token {
        Token {
            data: 0,
            end: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EncoderState {
    Data,
    End,
}

/// COBS encoder combined with an output FIFO.
///
/// Non-NUL data bytes are staged in the free part of the FIFO behind a reserved overhead
/// slot. Once the overhead value is known (a NUL byte, an end token or 254 staged bytes),
/// the overhead byte is written and the whole group becomes visible to the reader at once.
/// Staging never overwrites bytes the reader has not consumed yet.
#[derive(Debug)]
pub struct Encoder {
    pub i: Stream<Token>,
    pub o: Stream<u8>,
    memory: Box<[u8]>,
    w_addr: usize,
    r_addr: usize,
    staged: usize,
    state: EncoderState,
}

impl Encoder {
    pub fn new(depth: usize) -> Result<Encoder, CodecError> {
        if depth < DEFAULT_DEPTH || !depth.is_power_of_two() {
            return Err(CodecError::InvalidDepth(depth));
        }
        Ok(Encoder {
            i: Stream::default(),
            o: Stream::default(),
            memory: vec![0; depth].into_boxed_slice(),
            w_addr: 0,
            r_addr: 0,
            staged: 1,
            state: EncoderState::Data,
        })
    }

    fn wrap(&self, addr: usize) -> usize {
        addr & (self.memory.len() - 1)
    }

    /// Bytes committed but not read yet.
    pub fn level(&self) -> usize {
        self.wrap(self.w_addr.wrapping_sub(self.r_addr))
    }

    fn can_stage(&self) -> bool {
        self.level() + self.staged + 1 < self.memory.len()
    }

    /// The staged group fits while the slot at `w_addr` stays free for the next one.
    fn can_commit(&self) -> bool {
        self.level() + self.staged < self.memory.len()
    }

    fn can_terminate(&self) -> bool {
        self.level() + 1 < self.memory.len()
    }

    fn stage(&mut self, data: u8) {
        let at = self.wrap(self.w_addr + self.staged);
        self.memory[at] = data;
        self.staged += 1;
    }

    fn commit_group(&mut self) {
        let at = self.w_addr;
        self.memory[at] = self.staged as u8;
        self.w_addr = self.wrap(self.w_addr + self.staged);
        self.staged = 1;
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Encoder {
            i: Stream::default(),
            o: Stream::default(),
            memory: vec![0; DEFAULT_DEPTH].into_boxed_slice(),
            w_addr: 0,
            r_addr: 0,
            staged: 1,
            state: EncoderState::Data,
        }
    }
}

impl Component for Encoder {
    fn forward(&mut self) {
        if self.w_addr != self.r_addr {
            self.o.offer(self.memory[self.r_addr]);
        } else {
            self.o.withdraw();
        }
    }

    fn backward(&mut self) {
        let token = self.i.payload;
        self.i.ready = match self.state {
            EncoderState::End => false,
            EncoderState::Data if token.end => self.can_commit(),
            EncoderState::Data if self.staged == MAX_GROUP => false,
            EncoderState::Data if token.data == 0x00 => self.can_commit(),
            EncoderState::Data => self.can_stage(),
        };
    }

    fn commit(&mut self) {
        if self.o.fire() {
            self.r_addr = self.wrap(self.r_addr + 1);
        }
        match self.state {
            EncoderState::Data if self.i.valid => {
                let token = self.i.payload;
                if token.end {
                    if self.i.ready {
                        self.commit_group();
                        self.state = EncoderState::End;
                    }
                } else if self.staged == MAX_GROUP {
                    if self.can_commit() {
                        self.commit_group();
                    }
                } else if token.data == 0x00 {
                    if self.i.ready {
                        self.commit_group();
                    }
                } else if self.i.ready {
                    self.stage(token.data);
                }
            }
            EncoderState::Data => {}
            EncoderState::End => {
                if self.can_terminate() {
                    let at = self.w_addr;
                    self.memory[at] = 0x00;
                    self.w_addr = self.wrap(self.w_addr + 1);
                    self.state = EncoderState::Data;
                }
            }
        }
    }
}

impl Pipe for Encoder {
    type In = Token;
    type Out = u8;

    fn input(&mut self) -> &mut Stream<Token> {
        &mut self.i
    }

    fn output(&mut self) -> &mut Stream<u8> {
        &mut self.o
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DecoderState {
    Start,
    Data,
    Error,
}

/// COBS decoder with a fixed latency of one tick.
///
/// A NUL group header or a NUL where a data byte is expected moves the decoder into a
/// terminal error state that only [`reset`](Decoder::reset) leaves.
#[derive(Debug)]
pub struct Decoder {
    pub i: Stream<u8>,
    pub o: Stream<Token>,
    buffer: StreamBuffer<Token>,
    state: DecoderState,
    count: u8,
    offset: u8,
}

impl Decoder {
    pub fn new() -> Decoder {
        Decoder {
            i: Stream::default(),
            o: Stream::default(),
            buffer: StreamBuffer::new(),
            state: DecoderState::Start,
            count: 0,
            offset: 0,
        }
    }

    pub fn error(&self) -> bool {
        self.state == DecoderState::Error
    }

    /// Between packets with no token left to hand out.
    pub fn is_idle(&self) -> bool {
        self.state == DecoderState::Start && self.buffer.is_empty()
    }

    pub fn reset(&mut self) {
        *self = Decoder::new();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Component for Decoder {
    fn forward(&mut self) {
        self.buffer.forward();
        connect_forward(&self.buffer.o, &mut self.o);

        self.buffer.i.withdraw();
        if self.state == DecoderState::Data && self.i.valid {
            let byte = self.i.payload;
            if self.offset == self.count {
                if byte == 0x00 {
                    self.buffer.i.offer(Token::end());
                } else if usize::from(self.offset) != MAX_GROUP {
                    self.buffer.i.offer(Token::data(0x00));
                }
            } else if byte != 0x00 {
                self.buffer.i.offer(Token::data(byte));
            }
        }
    }

    fn backward(&mut self) {
        connect_backward(&self.o, &mut self.buffer.o);
        self.buffer.backward();
        self.i.ready = match self.state {
            DecoderState::Start => true,
            DecoderState::Data => self.buffer.i.ready,
            DecoderState::Error => false,
        };
    }

    fn commit(&mut self) {
        self.buffer.commit();
        if !self.i.fire() {
            return;
        }
        let byte = self.i.payload;
        match self.state {
            DecoderState::Start => {
                self.count = 1;
                if byte != 0x00 {
                    self.offset = byte;
                    self.state = DecoderState::Data;
                } else {
                    log::error!("COBS group header is NUL");
                    self.state = DecoderState::Error;
                }
            }
            DecoderState::Data => {
                if self.offset == self.count {
                    self.count = 1;
                    if byte == 0x00 {
                        self.state = DecoderState::Start;
                    } else {
                        self.offset = byte;
                    }
                } else {
                    self.count += 1;
                    if byte == 0x00 {
                        log::error!(
                            "COBS data byte {} of {} is NUL",
                            self.count - 1,
                            self.offset - 1
                        );
                        self.state = DecoderState::Error;
                    }
                }
            }
            DecoderState::Error => {}
        }
    }
}

impl Pipe for Decoder {
    type In = u8;
    type Out = Token;

    fn input(&mut self) -> &mut Stream<u8> {
        &mut self.i
    }

    fn output(&mut self) -> &mut Stream<Token> {
        &mut self.o
    }
}

/// Encodes one packet, including the trailing delimiter.
pub fn encode(packet: &[u8]) -> Vec<u8> {
    let mut bench = Bench::new(Encoder::default());
    bench
        .source
        .extend(packet.iter().copied().map(Token::data));
    bench.source.push(Token::end());
    // every input token takes at most two ticks, draining one tick per byte
    let limit = 4 * packet.len() as u64 + 16;
    bench.run_until(
        limit,
        |_| {},
        |bench| bench.source.is_empty() && bench.sink.received().last() == Some(&0x00),
    );
    let encoded = bench.sink.take();
    log::trace!("{:02x?}", encoded);
    encoded
}

/// Decodes a byte stream into the packets it delimits. Bytes after the last delimiter are
/// ignored.
pub fn decode(bytes: &[u8]) -> Result<Vec<Vec<u8>>, CodecError> {
    let mut bench = Bench::new(Decoder::new());
    bench.source.extend(bytes.iter().copied());
    let limit = 2 * bytes.len() as u64 + 4;
    bench.run_until(
        limit,
        |_| {},
        |bench| bench.dut.error() || (bench.source.is_empty() && !bench.dut.o.valid),
    );
    // the output register still holds the last token for one tick
    bench.run(2, |_| {});
    if bench.dut.error() {
        return Err(CodecError::InvalidCobs);
    }

    let mut packets = Vec::new();
    let mut current = Vec::new();
    for token in bench.sink.take() {
        if token.end {
            packets.push(std::mem::take(&mut current));
        } else {
            current.push(token.data);
        }
    }
    if !current.is_empty() {
        log::debug!("Dropping {} bytes of an unterminated packet", current.len());
    }
    Ok(packets)
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn encode_known_vectors() {
        assert_eq!(encode(&[]), vec![0x01, 0x00]);
        assert_eq!(encode(&[0x00]), vec![0x01, 0x01, 0x00]);
        assert_eq!(
            encode(&[0x01, 0x00, 0x02, 0x03]),
            vec![0x02, 0x01, 0x03, 0x02, 0x03, 0x00]
        );
        assert_eq!(
            encode(&[0x11, 0x22, 0x00, 0x33]),
            vec![0x03, 0x11, 0x22, 0x02, 0x33, 0x00]
        );
    }

    #[test]
    fn encode_long_run() {
        let packet: Vec<u8> = (1..=254).collect();
        let encoded = encode(&packet);
        // a full group needs no extra overhead byte before the delimiter
        assert_eq!(encoded.len(), 256);
        assert_eq!(encoded[0], 0xff);
        assert_eq!(&encoded[1..255], &packet[..]);
        assert_eq!(encoded[255], 0x00);
        assert_eq!(decode(&encoded).unwrap(), vec![packet]);
    }

    #[test]
    fn decode_several_packets() {
        let bytes = [0x02, 0x01, 0x03, 0x02, 0x03, 0x00, 0x01, 0x00, 0x02, 0x07];
        assert_eq!(
            decode(&bytes).unwrap(),
            vec![vec![0x01, 0x00, 0x02, 0x03], vec![]]
        );
    }

    #[test]
    fn decode_error_is_terminal() {
        assert!(matches!(decode(&[0x00]), Err(CodecError::InvalidCobs)));
        assert!(matches!(
            decode(&[0x03, 0x01, 0x00, 0x00]),
            Err(CodecError::InvalidCobs)
        ));

        let mut bench = Bench::new(Decoder::new());
        bench.source.extend([0x00, 0x01, 0x00]);
        bench.run(8, |_| {});
        assert!(bench.dut.error());
        assert!(bench.sink.received().is_empty());
        bench.dut.reset();
        assert!(!bench.dut.error());
        bench.source.extend([0x01, 0x00]);
        let tokens = bench.collect(1, 8, |_| {});
        assert_eq!(tokens, vec![Token::end()]);
        assert!(bench.dut.is_idle());
    }

    #[test]
    fn encoder_never_overwrites_unread_data() {
        let mut bench = Bench::new(Encoder::default());
        let packets: Vec<Vec<u8>> = (0..4u8)
            .map(|n| (0..200).map(|b| (b as u8).wrapping_add(n) | 1).collect())
            .collect();
        for packet in &packets {
            bench.source.extend(packet.iter().copied().map(Token::data));
            bench.source.push(Token::end());
        }
        // fill the memory completely before anything is read
        bench.sink.stall_for(600);
        bench.run(600, |_| {});
        assert!(bench.dut.level() < DEFAULT_DEPTH);
        bench.run(2000, |_| {});
        let decoded = decode(&bench.sink.take()).unwrap();
        assert_eq!(decoded, packets);
    }

    #[test]
    fn slow_reader_sees_every_byte() {
        let packets: Vec<Vec<u8>> = vec![
            vec![0x01, 0x00, 0x02, 0x03],
            vec![],
            vec![0x00; 5],
            (1..=255).collect(),
            (0..600).map(|n| (n % 7) as u8).collect(),
        ];
        let expected: Vec<u8> = packets.iter().flat_map(|packet| encode(packet)).collect();

        let mut bench = Bench::new(Encoder::default());
        for packet in &packets {
            bench.source.extend(packet.iter().copied().map(Token::data));
            bench.source.push(Token::end());
        }
        bench.sink.ready_every(5);
        let encoded = bench.collect(expected.len(), 50_000, |_| {});
        assert_eq!(encoded, expected);
        assert!(bench.source.is_empty());
        assert_eq!(bench.dut.level(), 0);
        assert_eq!(decode(&encoded).unwrap(), packets);
    }

    #[test]
    fn invalid_depth() {
        assert!(matches!(Encoder::new(128), Err(CodecError::InvalidDepth(128))));
        assert!(matches!(Encoder::new(300), Err(CodecError::InvalidDepth(300))));
        assert!(Encoder::new(512).is_ok());
    }

    proptest! {
        #[test]
        fn round_trip(packet in proptest::collection::vec(any::<u8>(), 0..600)) {
            let encoded = encode(&packet);
            prop_assert_eq!(encoded.iter().filter(|b| **b == 0).count(), 1);
            prop_assert_eq!(decode(&encoded).unwrap(), vec![packet]);
        }
    }
}
