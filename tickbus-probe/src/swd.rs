//! Serial Wire Debug transaction controller.
//!
//! A [`Command`] is executed as a sequence of line [`Request`]s: a packet header, the
//! acknowledgement returned by the target, and depending on it a data phase, a turnaround or a
//! retry of the header. Every transfer produces exactly one [`Reply`]; bus resets and raw bit
//! sequences produce none.
//!
//! `WAIT` acknowledgements are retried up to the configured timeout. `FAULT` and line errors
//! (an invalid acknowledgement or a parity mismatch) are reported as they are. The controller
//! never resets the line on its own; after a `FAULT` or an error the host is expected to issue
//! a [`Command::Reset`] before retrying.
use crate::config::{Config, Configure};
use crate::error::ProbeError;
use crate::sequencer::{Deframe, LineDriver, Template, parity};
use tickbus_core::bus::{Bus, Drive, Pull};
use tickbus_core::clock::ClockDivisor;
use tickbus_core::iostream::BusOwner;
use tickbus_core::stream::{Component, Pipe, Stream};

pub const SWCLK: usize = 0;
pub const SWDIO: usize = 1;

/// Number of ones in a line reset sequence.
pub const LINE_RESET_ONES: usize = 50;

/// Ticks of the reference clock per line clock cycle.
pub const TICKS_PER_CYCLE: u32 = 2;

pub fn bus() -> Bus<2> {
    Bus::new(["swclk", "swdio"]).with_pull(SWDIO, Pull::Up)
}

/// The request part of an SWD packet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Header {
    /// Access port (true) or debug port (false).
    pub ap_ndp: bool,
    /// Read (true) or write (false).
    pub r_nw: bool,
    /// Register address bits `A[3:2]`.
    pub addr: u8,
}

impl Header {
    pub fn new(ap_ndp: bool, r_nw: bool, addr: u8) -> Header {
        Header {
            ap_ndp,
            r_nw,
            addr: addr & 0b11,
        }
    }

    pub fn parity(&self) -> bool {
        self.ap_ndp ^ self.r_nw ^ (self.addr & 1 == 1) ^ (self.addr & 2 == 2)
    }

    /// The eight request bits as shifted onto the line, first bit in bit 0:
    /// start, APnDP, RnW, A2, A3, parity, stop, park.
    pub fn bits(&self) -> u8 {
        1 | (self.ap_ndp as u8) << 1
            | (self.r_nw as u8) << 2
            | (self.addr & 0b11) << 3
            | (self.parity() as u8) << 5
            | 1 << 7
    }

    /// Decodes request bits, rejecting a wrong start, stop, park or parity bit.
    pub fn from_bits(bits: u8) -> Option<Header> {
        let header = Header::new(bits >> 1 & 1 == 1, bits >> 2 & 1 == 1, bits >> 3 & 0b11);
        (header.bits() == bits).then_some(header)
    }
}

/// Acknowledgement returned by the target after a header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ack {
    Ok,
    Wait,
    Fault,
}

impl Ack {
    pub fn bits(self) -> u8 {
        match self {
            Ack::Ok => 0b001,
            Ack::Wait => 0b010,
            Ack::Fault => 0b100,
        }
    }

    /// Any other bit pattern is a protocol error, e.g. `0b111` from an unanswered header.
    pub fn from_bits(bits: u8) -> Option<Ack> {
        match bits {
            0b001 => Some(Ack::Ok),
            0b010 => Some(Ack::Wait),
            0b100 => Some(Ack::Fault),
            _ => None,
        }
    }
}

/// One line operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Request {
    /// 50 clocks with SWDIO high followed by two idle clocks.
    Reset,
    /// Header followed by turnaround and the acknowledgement.
    Header(Header),
    /// Turnaround followed by a 32-bit word and its parity.
    DataWr(u32),
    /// A 32-bit word and its parity from the target, followed by turnaround.
    DataRd,
    /// A single turnaround clock.
    #[default]
    NoData,
    /// Up to 32 raw bits, first bit in bit 0.
    Sequence { len: u8, data: u32 },
}

impl Template<2> for Request {
    type Meta = Request;

    fn len(&self) -> usize {
        match self {
            Request::Reset => LINE_RESET_ONES + 2,
            Request::Header(_) => 12,
            Request::DataWr(_) | Request::DataRd => 34,
            Request::NoData => 1,
            Request::Sequence { len, .. } => usize::from(*len).clamp(1, 32),
        }
    }

    fn drive(&self, bit: usize) -> [Drive; 2] {
        let swdio = match self {
            Request::Reset => Drive::level(bit < LINE_RESET_ONES),
            Request::Header(header) if bit < 8 => Drive::level(header.bits() >> bit & 1 == 1),
            Request::DataWr(data) => match bit {
                0 => Drive::RELEASED,
                1..=32 => Drive::level(data >> (bit - 1) & 1 == 1),
                _ => Drive::level(parity(*data)),
            },
            Request::Sequence { data, .. } => Drive::level(data >> bit & 1 == 1),
            _ => Drive::RELEASED,
        };
        [Drive::RELEASED, swdio]
    }

    fn capture(&self, bit: usize) -> bool {
        match self {
            Request::Header(_) => (9..12).contains(&bit),
            Request::DataRd => bit < 33,
            _ => false,
        }
    }

    fn meta(&self, _bit: usize) -> Request {
        *self
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Outcome {
    Ack,
    Data,
    /// Invalid acknowledgement or parity mismatch.
    #[default]
    Error,
}

/// Result of a header or a read data phase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LineResult {
    pub outcome: Outcome,
    pub ack: u8,
    pub data: u32,
}

/// Collects acknowledgements after headers and words after read data phases.
#[derive(Clone, Copy, Debug, Default)]
pub struct SwdDeframe;

impl Deframe<2> for SwdDeframe {
    type Meta = Request;
    type Output = LineResult;

    fn pin(&self) -> usize {
        SWDIO
    }

    fn complete(&self, meta: &Request, count: usize) -> bool {
        match meta {
            Request::Header(_) => count == 3,
            Request::DataRd => count == 33,
            _ => false,
        }
    }

    fn result(&self, meta: &Request, value: u128, _count: usize) -> LineResult {
        match meta {
            Request::Header(_) => {
                let ack = (value & 0b111) as u8;
                let outcome = match Ack::from_bits(ack) {
                    Some(_) => Outcome::Ack,
                    None => Outcome::Error,
                };
                LineResult {
                    outcome,
                    ack,
                    data: 0,
                }
            }
            _ => {
                let data = value as u32;
                let outcome = if parity(data) == (value >> 32 & 1 == 1) {
                    Outcome::Data
                } else {
                    Outcome::Error
                };
                LineResult {
                    outcome,
                    ack: 0,
                    data,
                }
            }
        }
    }
}

pub type SwdDriver = LineDriver<Request, SwdDeframe, 2>;

/// A host level operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Command {
    /// Register access. `data` is only shifted for writes.
    Transfer { header: Header, data: u32 },
    /// Line reset.
    #[default]
    Reset,
    /// Raw bits, e.g. a JTAG-to-SWD selection sequence. `len` is 1 to 32.
    Sequence { len: u8, data: u32 },
}

impl Command {
    pub fn read(ap_ndp: bool, addr: u8) -> Command {
        Command::Transfer {
            header: Header::new(ap_ndp, true, addr),
            data: 0,
        }
    }

    pub fn write(ap_ndp: bool, addr: u8, data: u32) -> Command {
        Command::Transfer {
            header: Header::new(ap_ndp, false, addr),
            data,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Response {
    Data,
    #[default]
    NoData,
    Error,
}

/// The single answer to a [`Command::Transfer`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Reply {
    pub rsp: Response,
    /// Raw acknowledgement bits.
    pub ack: u8,
    pub data: u32,
}

impl Reply {
    pub fn ack(&self) -> Option<Ack> {
        Ack::from_bits(self.ack)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Command,
    AckCheck,
    WaitRetry,
    FaultResponse,
    WriteData,
    ReadRequest,
    ReadResult,
    Response,
}

#[derive(Debug)]
pub struct Controller {
    pub i: Stream<Command>,
    pub o: Stream<Reply>,
    driver: SwdDriver,
    clock: ClockDivisor,
    timeout: u16,
    state: State,
    wait_count: u16,
    reply: Reply,
    /// Read data captured before the trailing turnaround has been shifted.
    read: Option<LineResult>,
    headers: u64,
}

impl Controller {
    pub fn new(bus: Bus<2>, clock: ClockDivisor, timeout: u16) -> Controller {
        let driver = LineDriver::new(
            bus,
            [Drive::HIGH, Drive::HIGH],
            SWCLK,
            clock.divisor(),
            SwdDeframe,
        );
        Controller {
            i: Stream::default(),
            o: Stream::default(),
            driver,
            clock,
            timeout,
            state: State::Command,
            wait_count: 0,
            reply: Reply::default(),
            read: None,
            headers: 0,
        }
    }

    pub fn timeout(&self) -> u16 {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: u16) {
        self.timeout = timeout;
    }

    pub fn frequency(&self) -> u32 {
        self.clock.get_frequency()
    }

    /// Reprograms the line clock; the new rate applies from the next half-cycle.
    pub fn set_frequency(&mut self, hz: u32) -> Result<u32, ProbeError> {
        let achieved = self.clock.set_frequency(hz)?;
        self.driver.set_divisor(self.clock.divisor());
        Ok(achieved)
    }

    pub fn clock(&self) -> &ClockDivisor {
        &self.clock
    }

    pub fn divisor(&self) -> u16 {
        self.clock.divisor()
    }

    /// Programs a raw divisor as exchanged with a host, without any tolerance check.
    pub fn set_divisor(&mut self, divisor: u16) {
        self.clock.set_divisor(divisor);
        self.driver.set_divisor(divisor);
    }

    /// Number of headers shifted so far, retries included.
    pub fn headers(&self) -> u64 {
        self.headers
    }

    /// No transfer is in progress.
    pub fn is_idle(&self) -> bool {
        self.state == State::Command
    }

    fn request(&self) -> Option<Request> {
        match (self.state, self.i.payload) {
            (State::Command, _) if !self.i.valid => None,
            (State::Command, Command::Transfer { header, .. }) => Some(Request::Header(header)),
            (State::Command, Command::Reset) => Some(Request::Reset),
            (State::Command, Command::Sequence { len, data }) => {
                Some(Request::Sequence { len, data })
            }
            (State::WaitRetry | State::FaultResponse, _) => Some(Request::NoData),
            (State::WriteData, Command::Transfer { data, .. }) => Some(Request::DataWr(data)),
            (State::ReadRequest, _) => Some(Request::DataRd),
            _ => None,
        }
    }

    fn respond(&mut self, rsp: Response, ack: u8, data: u32) {
        self.reply = Reply { rsp, ack, data };
        self.state = State::Response;
    }

    fn check_ack(&mut self, result: LineResult, r_nw: bool) {
        let ack = match (result.outcome, Ack::from_bits(result.ack)) {
            (Outcome::Ack, Some(ack)) => ack,
            _ => {
                log::debug!("SWD: invalid ack {:03b}", result.ack);
                self.respond(Response::Error, result.ack, 0);
                return;
            }
        };
        log::debug!("SWD: ack {:?}", ack);
        self.state = match ack {
            Ack::Wait => State::WaitRetry,
            Ack::Fault => State::FaultResponse,
            Ack::Ok if r_nw => State::ReadRequest,
            Ack::Ok => State::WriteData,
        };
    }
}

impl Configure for Controller {
    fn configure(config: &Config) -> Result<Self, ProbeError> {
        let clock = config.clock("swclk", TICKS_PER_CYCLE)?;
        let bus = config.bind(bus())?;
        Ok(Controller::new(bus, clock, config.timeout))
    }
}

impl BusOwner<2> for Controller {
    fn bus(&self) -> &Bus<2> {
        self.driver.bus()
    }

    fn bus_mut(&mut self) -> &mut Bus<2> {
        self.driver.bus_mut()
    }
}

impl Component for Controller {
    fn forward(&mut self) {
        match self.request() {
            Some(request) => self.driver.input().offer(request),
            None => self.driver.input().withdraw(),
        }
        self.driver.forward();
        if self.state == State::Response {
            self.o.offer(self.reply);
        } else {
            self.o.withdraw();
        }
    }

    fn backward(&mut self) {
        self.driver.output().ready = match self.state {
            State::AckCheck => true,
            State::ReadRequest => self.read.is_none(),
            _ => false,
        };
        self.driver.backward();
        self.i.ready = match (self.state, self.i.payload) {
            (State::Command, Command::Reset | Command::Sequence { .. }) => {
                self.driver.input().ready
            }
            (State::Response, _) => self.o.ready,
            _ => false,
        };
    }

    fn commit(&mut self) {
        let shifted = self.driver.input().fire();
        let result = self.driver.output().fire().then(|| self.driver.output().payload);
        let replied = self.o.fire();
        self.driver.commit();

        let command = self.i.payload;
        match (self.state, command) {
            (State::Command, Command::Transfer { header, .. }) if shifted => {
                self.headers += 1;
                log::trace!("SWD: header {:02x}", header.bits());
                self.state = State::AckCheck;
            }
            (State::Command, Command::Reset) if shifted => log::debug!("SWD: line reset"),
            (State::AckCheck, Command::Transfer { header, .. }) => {
                if let Some(result) = result {
                    self.check_ack(result, header.r_nw);
                }
            }
            (State::WaitRetry, _) if shifted => {
                if self.wait_count == self.timeout {
                    log::debug!("SWD: WAIT after {} retries", self.wait_count);
                    self.respond(Response::NoData, Ack::Wait.bits(), 0);
                } else {
                    self.wait_count += 1;
                    self.state = State::Command;
                }
            }
            (State::FaultResponse, _) if shifted => {
                self.respond(Response::NoData, Ack::Fault.bits(), 0)
            }
            (State::WriteData, _) if shifted => self.respond(Response::NoData, Ack::Ok.bits(), 0),
            (State::ReadRequest, _) => {
                if result.is_some() {
                    self.read = result;
                }
                if shifted {
                    self.state = State::ReadResult;
                }
            }
            (State::ReadResult, _) => {
                // a word cut short by the line reads as a parity error
                let result = self.read.take().unwrap_or_default();
                if result.outcome == Outcome::Data {
                    log::trace!("SWD: read {:08x}", result.data);
                    self.respond(Response::Data, Ack::Ok.bits(), result.data);
                } else {
                    log::debug!("SWD: parity error on read data {:08x}", result.data);
                    self.respond(Response::Error, Ack::Ok.bits(), result.data);
                }
            }
            (State::Response, _) if replied => {
                self.wait_count = 0;
                self.state = State::Command;
            }
            _ => {}
        }
    }
}

impl Pipe for Controller {
    type In = Command;
    type Out = Reply;

    fn input(&mut self) -> &mut Stream<Command> {
        &mut self.i
    }

    fn output(&mut self) -> &mut Stream<Reply> {
        &mut self.o
    }
}
