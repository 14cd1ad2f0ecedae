use proptest::prelude::*;
use tickbus_codec::checksum::{self, RunningCrc16, RunningCrc32};
use tickbus_codec::cobs::{self, Decoder, Encoder, Token};
use tickbus_core::sim::Bench;
use tickbus_core::stream::{Component, Pipe, Stream, connect_backward, connect_forward};
use tickbus_tests::{CRC16, CRC32};

/// Encoder feeding a decoder, as on the two ends of a host link.
struct Link {
    encoder: Encoder,
    decoder: Decoder,
}

impl Link {
    fn new() -> Link {
        Link {
            encoder: Encoder::default(),
            decoder: Decoder::new(),
        }
    }
}

impl Component for Link {
    fn forward(&mut self) {
        self.encoder.forward();
        connect_forward(&self.encoder.o, &mut self.decoder.i);
        self.decoder.forward();
    }

    fn backward(&mut self) {
        self.decoder.backward();
        connect_backward(&self.decoder.i, &mut self.encoder.o);
        self.encoder.backward();
    }

    fn commit(&mut self) {
        self.encoder.commit();
        self.decoder.commit();
    }
}

impl Pipe for Link {
    type In = Token;
    type Out = Token;

    fn input(&mut self) -> &mut Stream<Token> {
        self.encoder.input()
    }

    fn output(&mut self) -> &mut Stream<Token> {
        self.decoder.output()
    }
}

fn tokens(packets: &[Vec<u8>]) -> Vec<Token> {
    packets
        .iter()
        .flat_map(|packet| {
            packet
                .iter()
                .copied()
                .map(Token::data)
                .chain([Token::end()])
        })
        .collect()
}

/// What the host sends for `payload`: checksum appended, then stuffed.
fn frame(payload: &[u8]) -> Vec<u8> {
    let packet = checksum::append(RunningCrc32::new(&CRC32), payload).unwrap();
    cobs::encode(&packet)
}

#[test]
fn cobs_encoding_example() {
    let encoded = cobs::encode(&[0x01, 0x00, 0x02, 0x03]);
    assert_eq!(encoded, vec![0x02, 0x01, 0x03, 0x02, 0x03, 0x00]);
    assert_eq!(
        cobs::decode(&encoded).unwrap(),
        vec![vec![0x01, 0x00, 0x02, 0x03]]
    );
}

#[test]
fn link_carries_packets_through_backpressure() {
    let packets = vec![
        vec![0x01, 0x00, 0x02, 0x03],
        vec![],
        vec![0x00; 5],
        (1..=255).collect(),
        (0..600).map(|n| (n % 7) as u8).collect(),
    ];
    let sent = tokens(&packets);
    for period in [1, 2, 5] {
        let mut bench = Bench::new(Link::new());
        bench.source.extend(sent.iter().copied());
        bench.sink.ready_every(period);
        let received = bench.collect(sent.len(), 100_000, |_| {});
        assert_eq!(received, sent, "ready every {} ticks", period);
        assert!(!bench.dut.decoder.error());
    }
}

#[test]
fn framed_packets_verify_after_the_link() {
    let payloads: [&[u8]; 3] = [b"\x00\x01\x02", b"tickbus", &[0xff; 40]];
    let stream: Vec<u8> = payloads.iter().flat_map(|payload| frame(payload)).collect();
    let packets = cobs::decode(&stream).unwrap();
    assert_eq!(packets.len(), payloads.len());
    for (packet, payload) in packets.iter().zip(payloads) {
        let verified = checksum::verify(RunningCrc32::new(&CRC32), packet).unwrap();
        assert_eq!(verified.as_deref(), Some(payload));
    }
}

#[test]
fn corruption_is_caught_by_the_checksum() {
    let mut packet = checksum::append(RunningCrc16::new(&CRC16), b"register").unwrap();
    packet[3] ^= 0x40;
    let stream = cobs::encode(&packet);
    let decoded = cobs::decode(&stream).unwrap();
    assert_eq!(decoded, vec![packet.clone()]);
    assert_eq!(
        checksum::verify(RunningCrc16::new(&CRC16), &decoded[0]).unwrap(),
        None
    );
}

#[test]
fn stray_zero_group_is_an_error() {
    assert!(cobs::decode(&[0x03, 0x11, 0x00, 0x00]).is_err());
}

proptest! {
    #[test]
    fn framing_round_trip(payload in proptest::collection::vec(any::<u8>(), 1..300)) {
        let stream = frame(&payload);
        prop_assert_eq!(stream.iter().filter(|&&byte| byte == 0).count(), 1);
        let packets = cobs::decode(&stream).unwrap();
        prop_assert_eq!(packets.len(), 1);
        let verified = checksum::verify(RunningCrc32::new(&CRC32), &packets[0]).unwrap();
        prop_assert_eq!(verified, Some(payload));
    }
}
