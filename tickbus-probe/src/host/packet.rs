//! COBS framed packets carrying SWD command bytes and probe management commands.
//!
//! Every packet starts with an endpoint byte and its remaining bytes are routed to that
//! endpoint: `0x00` is the [`Root`] endpoint described below, `0x01` the SWD byte protocol of
//! [`SwdBridge`](crate::host::swd::SwdBridge). Packets for unknown endpoints are discarded.
//! Answers are framed the same way; a response packet carries the endpoint byte followed by
//! every answer produced while its request packet was being consumed.
//!
//! | command       | code   | arguments         | answer                  |
//! |---------------|--------|-------------------|-------------------------|
//! | `Identify`    | `0x00` | -                 | [`IDENTIFIER`]          |
//! | `GetDivisor`  | `0x10` | -                 | SWCLK divisor (LE u16)  |
//! | `SetDivisor`  | `0x20` | divisor (LE u16)  | -                       |
//! | `AssertReset` | `0x30` | -                 | -                       |
//! | `ClearReset`  | `0x31` | -                 | -                       |
use crate::config::{Config, Configure};
use crate::error::ProbeError;
use crate::host::swd::SwdBridge;
use tickbus_codec::cobs::{Decoder, Encoder, Token};
use tickbus_core::bus::Bus;
use tickbus_core::iostream::BusOwner;
use tickbus_core::stream::{Component, Pipe, Stream};

pub const IDENTIFIER: &[u8] = b"tickbus,v00";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endpoint {
    Root = 0x00,
    Swd = 0x01,
}

impl Endpoint {
    pub fn from_byte(byte: u8) -> Option<Endpoint> {
        match byte {
            0x00 => Some(Endpoint::Root),
            0x01 => Some(Endpoint::Swd),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RootCommand {
    Identify = 0x00,
    GetDivisor = 0x10,
    SetDivisor = 0x20,
    AssertReset = 0x30,
    ClearReset = 0x31,
}

impl RootCommand {
    pub fn from_byte(byte: u8) -> Option<RootCommand> {
        match byte {
            0x00 => Some(RootCommand::Identify),
            0x10 => Some(RootCommand::GetDivisor),
            0x20 => Some(RootCommand::SetDivisor),
            0x30 => Some(RootCommand::AssertReset),
            0x31 => Some(RootCommand::ClearReset),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RootState {
    Command,
    Identify(usize),
    GetDivisor(usize),
    SetDivisor(usize),
}

/// Management endpoint: identification, the SWCLK divisor and the target reset line.
#[derive(Debug)]
pub struct Root {
    pub i: Stream<u8>,
    pub o: Stream<u8>,
    state: RootState,
    divisor: u16,
    reset: bool,
}

impl Root {
    pub fn new(divisor: u16) -> Root {
        Root {
            i: Stream::default(),
            o: Stream::default(),
            state: RootState::Command,
            divisor,
            reset: false,
        }
    }

    pub fn divisor(&self) -> u16 {
        self.divisor
    }

    /// Whether the target is held in reset.
    pub fn reset(&self) -> bool {
        self.reset
    }

    /// No command is being answered or waiting for arguments.
    pub fn is_idle(&self) -> bool {
        self.state == RootState::Command
    }

    fn take_byte(&mut self, byte: u8) {
        self.state = match self.state {
            RootState::Command => match RootCommand::from_byte(byte) {
                Some(RootCommand::Identify) => RootState::Identify(0),
                Some(RootCommand::GetDivisor) => RootState::GetDivisor(0),
                Some(RootCommand::SetDivisor) => RootState::SetDivisor(0),
                Some(RootCommand::AssertReset) => {
                    log::debug!("Asserting target reset");
                    self.reset = true;
                    RootState::Command
                }
                Some(RootCommand::ClearReset) => {
                    log::debug!("Clearing target reset");
                    self.reset = false;
                    RootState::Command
                }
                None => {
                    log::warn!("Ignoring unknown root command {:02x}", byte);
                    RootState::Command
                }
            },
            RootState::SetDivisor(0) => {
                self.divisor = self.divisor & 0xff00 | u16::from(byte);
                RootState::SetDivisor(1)
            }
            RootState::SetDivisor(_) => {
                self.divisor = self.divisor & 0x00ff | u16::from(byte) << 8;
                log::debug!("SWCLK divisor set to {}", self.divisor);
                RootState::Command
            }
            state => state,
        };
    }
}

impl Component for Root {
    fn forward(&mut self) {
        match self.state {
            RootState::Identify(offset) => self.o.offer(IDENTIFIER[offset]),
            RootState::GetDivisor(offset) => self.o.offer(self.divisor.to_le_bytes()[offset]),
            RootState::Command | RootState::SetDivisor(_) => self.o.withdraw(),
        }
    }

    fn backward(&mut self) {
        self.i.ready = matches!(self.state, RootState::Command | RootState::SetDivisor(_));
    }

    fn commit(&mut self) {
        if self.o.fire() {
            self.state = match self.state {
                RootState::Identify(offset) if offset + 1 < IDENTIFIER.len() => {
                    RootState::Identify(offset + 1)
                }
                RootState::GetDivisor(0) => RootState::GetDivisor(1),
                _ => RootState::Command,
            };
        }
        if self.i.fire() {
            self.take_byte(self.i.payload);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Inbound {
    Header,
    Connect(Endpoint),
    /// Dropping a packet for an unknown endpoint.
    Discard,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Outbound {
    Select,
    Header(Endpoint),
    Connect(Endpoint),
    End,
}

/// COBS decoder, endpoint routing and COBS encoder around an [`SwdBridge`].
#[derive(Debug)]
pub struct PacketBridge {
    decoder: Decoder,
    encoder: Encoder,
    root: Root,
    swd: SwdBridge,
    inbound: Inbound,
    outbound: Outbound,
}

impl PacketBridge {
    pub fn new(swd: SwdBridge) -> PacketBridge {
        PacketBridge {
            decoder: Decoder::new(),
            encoder: Encoder::default(),
            root: Root::new(swd.controller().divisor()),
            swd,
            inbound: Inbound::Header,
            outbound: Outbound::Select,
        }
    }

    pub fn root(&self) -> &Root {
        &self.root
    }

    pub fn swd(&self) -> &SwdBridge {
        &self.swd
    }

    /// Every request packet received so far has been executed and answered.
    pub fn is_idle(&self) -> bool {
        self.decoder.is_idle()
            && self.inbound == Inbound::Header
            && self.outbound == Outbound::Select
            && self.quiet(Endpoint::Root)
            && self.quiet(Endpoint::Swd)
            && self.encoder.level() == 0
    }

    /// A malformed packet stream stops all traffic until [`reset`](PacketBridge::reset).
    pub fn error(&self) -> bool {
        self.decoder.error()
    }

    /// Resynchronises the packet decoder after an error.
    pub fn reset(&mut self) {
        self.decoder.reset();
        self.inbound = Inbound::Header;
    }

    fn input_of(&mut self, endpoint: Endpoint) -> &mut Stream<u8> {
        match endpoint {
            Endpoint::Root => &mut self.root.i,
            Endpoint::Swd => &mut self.swd.i,
        }
    }

    fn output_of(&mut self, endpoint: Endpoint) -> &mut Stream<u8> {
        match endpoint {
            Endpoint::Root => &mut self.root.o,
            Endpoint::Swd => &mut self.swd.o,
        }
    }

    fn quiet(&self, endpoint: Endpoint) -> bool {
        match endpoint {
            Endpoint::Root => !self.root.o.valid && self.root.is_idle(),
            Endpoint::Swd => !self.swd.o.valid && self.swd.is_idle(),
        }
    }

    /// The endpoint has answered everything its current request packet asked for.
    fn flushed(&self, endpoint: Endpoint) -> bool {
        self.quiet(endpoint) && self.inbound != Inbound::Connect(endpoint)
    }

    /// A new request packet is only routed once the previous response has been framed, so
    /// every request yields at most one response packet.
    fn accepts_header(&self, byte: u8) -> bool {
        match Endpoint::from_byte(byte) {
            Some(endpoint) => self.outbound == Outbound::Select && self.quiet(endpoint),
            None => true,
        }
    }
}

impl BusOwner<2> for PacketBridge {
    fn bus(&self) -> &Bus<2> {
        self.swd.bus()
    }

    fn bus_mut(&mut self) -> &mut Bus<2> {
        self.swd.bus_mut()
    }
}

impl Component for PacketBridge {
    fn forward(&mut self) {
        self.decoder.forward();
        let token = self.decoder.o;
        self.root.i.withdraw();
        self.swd.i.withdraw();
        if let Inbound::Connect(endpoint) = self.inbound
            && token.valid
            && !token.payload.end
        {
            self.input_of(endpoint).offer(token.payload.data);
        }
        self.root.forward();
        self.swd.forward();

        match self.outbound {
            Outbound::Select => self.encoder.i.withdraw(),
            Outbound::Header(endpoint) => self.encoder.i.offer(Token::data(endpoint as u8)),
            Outbound::Connect(endpoint) => {
                let answer = *self.output_of(endpoint);
                if answer.valid {
                    self.encoder.i.offer(Token::data(answer.payload));
                } else {
                    self.encoder.i.withdraw();
                }
            }
            Outbound::End => self.encoder.i.offer(Token::end()),
        }
        self.encoder.forward();
    }

    fn backward(&mut self) {
        self.encoder.backward();
        self.root.o.ready = false;
        self.swd.o.ready = false;
        if let Outbound::Connect(endpoint) = self.outbound {
            let ready = self.encoder.i.ready;
            self.output_of(endpoint).ready = ready;
        }
        self.root.backward();
        self.swd.backward();

        let token = self.decoder.o.payload;
        let ready = match self.inbound {
            Inbound::Header => token.end || self.accepts_header(token.data),
            Inbound::Discard => true,
            Inbound::Connect(_) if token.end => true,
            Inbound::Connect(endpoint) => self.input_of(endpoint).ready,
        };
        self.decoder.o.ready = ready;
        self.decoder.backward();
    }

    fn commit(&mut self) {
        let token = self.decoder.o.fire().then_some(self.decoder.o.payload);
        let framed = self.encoder.i.fire();

        self.outbound = match self.outbound {
            Outbound::Select if self.root.o.valid => Outbound::Header(Endpoint::Root),
            Outbound::Select if self.swd.o.valid => Outbound::Header(Endpoint::Swd),
            Outbound::Header(endpoint) if framed => Outbound::Connect(endpoint),
            Outbound::Connect(endpoint) if self.flushed(endpoint) => Outbound::End,
            Outbound::End if framed => Outbound::Select,
            outbound => outbound,
        };

        if let Some(token) = token {
            self.inbound = match (self.inbound, token.end) {
                (Inbound::Header, true) => {
                    log::debug!("Dropping an empty packet");
                    Inbound::Header
                }
                (Inbound::Header, false) => match Endpoint::from_byte(token.data) {
                    Some(endpoint) => Inbound::Connect(endpoint),
                    None => {
                        log::warn!("Discarding a packet for unknown endpoint {:02x}", token.data);
                        Inbound::Discard
                    }
                },
                (_, true) => Inbound::Header,
                (inbound, false) => inbound,
            };
        }

        self.decoder.commit();
        self.root.commit();
        self.swd.commit();
        self.encoder.commit();

        if self.root.divisor() != self.swd.controller().divisor() {
            self.swd.controller_mut().set_divisor(self.root.divisor());
        }
    }
}

impl Pipe for PacketBridge {
    type In = u8;
    type Out = u8;

    fn input(&mut self) -> &mut Stream<u8> {
        &mut self.decoder.i
    }

    fn output(&mut self) -> &mut Stream<u8> {
        &mut self.encoder.o
    }
}

impl Configure for PacketBridge {
    fn configure(config: &Config) -> Result<Self, ProbeError> {
        Ok(PacketBridge::new(SwdBridge::configure(config)?))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::Builder;
    use crate::host::swd::RESET;
    use crate::target::Target;
    use crate::target::swd::SwdTarget;
    use tickbus_codec::cobs;
    use tickbus_core::sim::Bench;

    fn bench() -> Bench<PacketBridge> {
        Bench::new(
            Builder::new()
                .frequency(12_000_000)
                .timeout(4)
                .build::<PacketBridge>()
                .unwrap(),
        )
    }

    /// Sends `packets` and returns the decoded response packets.
    fn exchange(
        bench: &mut Bench<PacketBridge>,
        target: &mut SwdTarget,
        packets: &[&[u8]],
    ) -> Vec<Vec<u8>> {
        for packet in packets {
            bench.source.extend(cobs::encode(packet));
        }
        bench.run(20_000, |bridge| target.respond(bridge.bus_mut()));
        cobs::decode(&bench.sink.take()).unwrap()
    }

    #[test]
    fn identify() {
        let mut bench = bench();
        let responses = exchange(&mut bench, &mut SwdTarget::new(), &[&[0x00, 0x00]]);
        let mut expected = vec![0x00];
        expected.extend_from_slice(IDENTIFIER);
        assert_eq!(responses, vec![expected]);
        assert!(bench.dut.is_idle());
    }

    #[test]
    fn divisor_is_shared_with_the_controller() {
        let mut bench = bench();
        // 12 MHz from 48 MHz at two ticks per cycle
        assert_eq!(bench.dut.swd().controller().divisor(), 1);
        let responses = exchange(
            &mut bench,
            &mut SwdTarget::new(),
            &[&[0x00, 0x10], &[0x00, 0x20, 0x0b, 0x00, 0x10]],
        );
        assert_eq!(responses, vec![vec![0x00, 0x01, 0x00], vec![0x00, 0x0b, 0x00]]);
        assert_eq!(bench.dut.root().divisor(), 11);
        assert_eq!(bench.dut.swd().controller().divisor(), 11);
        assert_eq!(bench.dut.swd().controller().frequency(), 2_000_000);
    }

    #[test]
    fn reset_line_follows_commands() {
        let mut bench = bench();
        let mut target = SwdTarget::new();
        assert!(exchange(&mut bench, &mut target, &[&[0x00, 0x30]]).is_empty());
        assert!(bench.dut.root().reset());
        assert!(exchange(&mut bench, &mut target, &[&[0x00, 0x31]]).is_empty());
        assert!(!bench.dut.root().reset());
    }

    #[test]
    fn swd_reads_in_packets() {
        let mut target = SwdTarget::new();
        target.set_register(false, 0, 0x0bc1_2477);
        let mut bench = bench();
        let responses = exchange(&mut bench, &mut target, &[&[0x01, RESET, 0x02, 0x02]]);
        assert_eq!(
            responses,
            vec![vec![
                0x01, 0x01, 0x77, 0x24, 0xc1, 0x0b, 0x01, 0x77, 0x24, 0xc1, 0x0b
            ]]
        );
        assert_eq!(target.line_resets(), 1);
    }

    #[test]
    fn slower_clock_after_set_divisor() {
        let mut target = SwdTarget::new();
        target.set_register(true, 3, 0x5555_aaaa);
        let mut bench = bench();
        let responses = exchange(
            &mut bench,
            &mut target,
            &[&[0x00, 0x20, 0x05, 0x00], &[0x01, RESET, 0x0f]],
        );
        assert_eq!(responses, vec![vec![0x01, 0x01, 0xaa, 0xaa, 0x55, 0x55]]);
        assert_eq!(bench.dut.swd().controller().frequency(), 4_000_000);
    }

    #[test]
    fn unknown_endpoints_are_discarded() {
        let mut bench = bench();
        let responses = exchange(
            &mut bench,
            &mut SwdTarget::new(),
            &[&[0x07, 0x00, 0x10], &[], &[0x00, 0x10]],
        );
        assert_eq!(responses, vec![vec![0x00, 0x01, 0x00]]);
    }

    #[test]
    fn malformed_stream_needs_a_reset() {
        let mut bench = bench();
        // a NUL group header
        bench.source.push(0x00);
        bench.run(10, |_| {});
        assert!(bench.dut.error());
        bench.dut.reset();
        let responses = exchange(&mut bench, &mut SwdTarget::new(), &[&[0x00, 0x10]]);
        assert_eq!(responses, vec![vec![0x00, 0x01, 0x00]]);
    }
}
