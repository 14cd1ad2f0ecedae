//! I2C initiator and its host byte protocol.
//!
//! The [`Initiator`] generates start, repeated start and stop conditions, and transmits and
//! receives octets. It moves through its states on a strobe that fires every quarter of an
//! SCL period, so the clock divisor is derived with four ticks per cycle. Both wires are
//! open-drain and read back through two-flop synchronisers. When clock stretching is enabled a
//! target holding SCL low pauses the initiator until it releases the line.
//!
//! The [`Controller`] exposes the initiator as a byte stream:
//!
//! | opcode | arguments            | answer                                   |
//! |--------|----------------------|------------------------------------------|
//! | `0x00` | -                    | start condition, `0x00`                  |
//! | `0x01` | -                    | stop condition, `0x00`                   |
//! | `0x02` | count (LE u16), data | number of unacknowledged bytes (LE u16)  |
//! | `0x03` | count (LE u16)       | `count` bytes, all but the last ACKed    |
use crate::config::{Config, Configure};
use crate::error::ProbeError;
use crate::host::Outbox;
use tickbus_core::bus::{Bus, Drive, Pull, Synchronizer};
use tickbus_core::clock::ClockDivisor;
use tickbus_core::iostream::BusOwner;
use tickbus_core::stream::{Component, Pipe, Stream};

pub const SCL: usize = 0;
pub const SDA: usize = 1;

/// Strobes per SCL period.
pub const TICKS_PER_CYCLE: u32 = 4;

pub fn bus() -> Bus<2> {
    Bus::new(["scl", "sda"])
        .with_pull(SCL, Pull::Up)
        .with_pull(SDA, Pull::Up)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Operation {
    #[default]
    Start,
    Stop,
    Write(u8),
    /// Reads an octet and acknowledges it if `ack` is set.
    Read { ack: bool },
}

/// Outcome of an [`Operation`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Completion {
    /// The written octet was acknowledged.
    pub ack: bool,
    /// The octet received by a read.
    pub data: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Idle,
    StartSclL,
    StartSdaH,
    StartSclH,
    StartSdaL,
    StopSclL,
    StopSdaL,
    StopSclH,
    StopSdaH,
    WriteDataSclL,
    WriteDataSdaX,
    WriteDataSclH,
    WriteDataSdaN,
    WriteAckSclL,
    WriteAckSdaH,
    WriteAckSclH,
    WriteAckSdaN,
    ReadDataSclL,
    ReadDataSdaH,
    ReadDataSclH,
    ReadDataSdaN,
    ReadAckSclL,
    ReadAckSdaX,
    ReadAckSclH,
    ReadAckSdaN,
}

#[derive(Debug)]
pub struct Initiator {
    pub i: Stream<Operation>,
    pub o: Stream<Completion>,
    bus: Bus<2>,
    clock: ClockDivisor,
    clock_stretch: bool,
    state: State,
    operation: Operation,
    timer: u16,
    scl_o: bool,
    sda_o: bool,
    scl_i: Synchronizer,
    sda_i: Synchronizer,
    bitno: u8,
    w_shreg: u8,
    r_shreg: u8,
    r_ack: bool,
    ack_o: bool,
    data_o: u8,
    result: Option<Completion>,
}

impl Initiator {
    pub fn new(mut bus: Bus<2>, clock: ClockDivisor, clock_stretch: bool) -> Initiator {
        bus.drive(&[Drive::open_drain(true); 2]);
        Initiator {
            i: Stream::default(),
            o: Stream::default(),
            bus,
            clock,
            clock_stretch,
            state: State::Idle,
            operation: Operation::default(),
            timer: 0,
            scl_o: true,
            sda_o: true,
            scl_i: Synchronizer::new(true),
            sda_i: Synchronizer::new(true),
            bitno: 0,
            w_shreg: 0,
            r_shreg: 0,
            r_ack: false,
            ack_o: false,
            data_o: 0,
            result: None,
        }
    }

    pub fn busy(&self) -> bool {
        self.state != State::Idle
    }

    pub fn clock(&self) -> &ClockDivisor {
        &self.clock
    }

    pub fn set_frequency(&mut self, hz: u32) -> Result<u32, ProbeError> {
        Ok(self.clock.set_frequency(hz)?)
    }

    fn begin(&mut self, operation: Operation) {
        let scl = self.scl_i.output();
        let sda = self.sda_i.output();
        self.operation = operation;
        self.bitno = 0;
        self.state = match operation {
            Operation::Start if scl && sda => State::StartSdaL,
            Operation::Start if !scl => State::StartSclH,
            Operation::Start => State::StartSclL,
            Operation::Stop if scl && !self.sda_o => State::StopSdaH,
            Operation::Stop if !scl => State::StopSclH,
            Operation::Stop => State::StopSclL,
            Operation::Write(data) => {
                self.w_shreg = data;
                State::WriteDataSclL
            }
            Operation::Read { ack } => {
                self.r_ack = ack;
                State::ReadDataSclL
            }
        };
        log::trace!("I2C: {:?}", operation);
    }

    fn finish(&mut self) {
        self.state = State::Idle;
        self.result = Some(match self.operation {
            Operation::Write(_) => Completion {
                ack: self.ack_o,
                data: 0,
            },
            Operation::Read { .. } => Completion {
                ack: self.r_ack,
                data: self.data_o,
            },
            Operation::Start | Operation::Stop => Completion::default(),
        });
    }

    /// Pulls SCL low on the strobe.
    fn scl_l(&mut self, strobe: bool, next: State) -> bool {
        if strobe {
            self.scl_o = false;
            self.state = next;
        }
        strobe
    }

    /// Releases SCL on the strobe, then waits until the line is actually high.
    fn scl_h(&mut self, strobe: bool, next: State) -> bool {
        if !self.scl_o {
            self.scl_o = strobe;
            false
        } else if !self.clock_stretch || self.scl_i.output() {
            self.state = next;
            true
        } else {
            false
        }
    }

    fn step(&mut self, strobe: bool) {
        let sda = self.sda_i.output();
        match self.state {
            State::Idle => {}

            State::StartSclL => {
                self.scl_l(strobe, State::StartSdaH);
            }
            State::StartSdaH if strobe => {
                self.sda_o = true;
                self.state = State::StartSclH;
            }
            State::StartSclH => {
                self.scl_h(strobe, State::StartSdaL);
            }
            State::StartSdaL if strobe => {
                self.sda_o = false;
                self.finish();
            }

            State::StopSclL => {
                self.scl_l(strobe, State::StopSdaL);
            }
            State::StopSdaL if strobe => {
                self.sda_o = false;
                self.state = State::StopSclH;
            }
            State::StopSclH => {
                self.scl_h(strobe, State::StopSdaH);
            }
            State::StopSdaH if strobe => {
                self.sda_o = true;
                self.finish();
            }

            State::WriteDataSclL => {
                self.scl_l(strobe, State::WriteDataSdaX);
            }
            State::WriteDataSdaX if strobe => {
                self.sda_o = self.w_shreg & 0x80 != 0;
                self.state = State::WriteDataSclH;
            }
            State::WriteDataSclH => {
                if self.scl_h(strobe, State::WriteDataSdaN) {
                    self.w_shreg <<= 1;
                }
            }
            State::WriteDataSdaN if strobe => {
                self.state = if self.bitno == 7 {
                    State::WriteAckSclL
                } else {
                    State::WriteDataSclL
                };
                self.bitno = (self.bitno + 1) % 8;
            }

            State::WriteAckSclL => {
                self.scl_l(strobe, State::WriteAckSdaH);
            }
            State::WriteAckSdaH if strobe => {
                self.sda_o = true;
                self.state = State::WriteAckSclH;
            }
            State::WriteAckSclH => {
                if self.scl_h(strobe, State::WriteAckSdaN) {
                    self.ack_o = !sda;
                }
            }
            State::WriteAckSdaN if strobe => self.finish(),

            State::ReadDataSclL => {
                self.scl_l(strobe, State::ReadDataSdaH);
            }
            State::ReadDataSdaH if strobe => {
                self.sda_o = true;
                self.state = State::ReadDataSclH;
            }
            State::ReadDataSclH => {
                if self.scl_h(strobe, State::ReadDataSdaN) {
                    self.r_shreg = self.r_shreg << 1 | sda as u8;
                }
            }
            State::ReadDataSdaN if strobe => {
                self.state = if self.bitno == 7 {
                    State::ReadAckSclL
                } else {
                    State::ReadDataSclL
                };
                self.bitno = (self.bitno + 1) % 8;
            }

            State::ReadAckSclL => {
                self.scl_l(strobe, State::ReadAckSdaX);
            }
            State::ReadAckSdaX if strobe => {
                self.sda_o = !self.r_ack;
                self.state = State::ReadAckSclH;
            }
            State::ReadAckSclH => {
                if self.scl_h(strobe, State::ReadAckSdaN) {
                    self.data_o = self.r_shreg;
                }
            }
            State::ReadAckSdaN if strobe => self.finish(),

            _ => {}
        }
    }
}

impl BusOwner<2> for Initiator {
    fn bus(&self) -> &Bus<2> {
        &self.bus
    }

    fn bus_mut(&mut self) -> &mut Bus<2> {
        &mut self.bus
    }
}

impl Component for Initiator {
    fn forward(&mut self) {
        match self.result {
            Some(completion) => self.o.offer(completion),
            None => self.o.withdraw(),
        }
    }

    fn backward(&mut self) {
        self.i.ready = self.state == State::Idle && (self.result.is_none() || self.o.ready);
    }

    fn commit(&mut self) {
        if self.o.fire() {
            self.result = None;
        }

        let strobe = self.timer == 0;
        if self.state == State::Idle {
            if self.i.fire() {
                self.begin(self.i.payload);
            }
        } else {
            self.step(strobe);
        }

        // the timer runs from the first tick of an operation
        if strobe || self.state == State::Idle {
            self.timer = self.clock.divisor();
        } else if !self.clock_stretch || self.scl_o == self.scl_i.output() {
            self.timer -= 1;
        }

        self.bus
            .drive(&[Drive::open_drain(self.scl_o), Drive::open_drain(self.sda_o)]);
        self.scl_i.commit(self.bus.level(SCL));
        self.sda_i.commit(self.bus.level(SDA));
    }
}

impl Pipe for Initiator {
    type In = Operation;
    type Out = Completion;

    fn input(&mut self) -> &mut Stream<Operation> {
        &mut self.i
    }

    fn output(&mut self) -> &mut Stream<Completion> {
        &mut self.o
    }
}

impl Configure for Initiator {
    fn configure(config: &Config) -> Result<Self, ProbeError> {
        let clock = config.clock("scl", TICKS_PER_CYCLE)?;
        let bus = config.bind(bus())?;
        Ok(Initiator::new(bus, clock, config.clock_stretch))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Opcode {
    Start = 0x00,
    Stop = 0x01,
    Write = 0x02,
    Read = 0x03,
}

impl Opcode {
    pub fn from_byte(byte: u8) -> Option<Opcode> {
        match byte {
            0x00 => Some(Opcode::Start),
            0x01 => Some(Opcode::Stop),
            0x02 => Some(Opcode::Write),
            0x03 => Some(Opcode::Read),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Opcode,
    /// Collecting the little endian count; `low` holds the first byte once received.
    Count { opcode: Opcode, low: Option<u8> },
    /// `remaining` bytes still to be written, `unacked` counts those not acknowledged.
    Write { remaining: u16, unacked: u16 },
    /// A written byte was not acknowledged, the rest of the data is discarded.
    Drain { remaining: u16, unacked: u16 },
    Read { remaining: u16 },
    /// Waiting for the completion of a start or stop condition.
    Condition,
}

/// Byte protocol front end of an [`Initiator`].
#[derive(Debug)]
pub struct Controller {
    pub i: Stream<u8>,
    pub o: Stream<u8>,
    initiator: Initiator,
    phase: Phase,
    pending: Option<Operation>,
    waiting: bool,
    outbox: Outbox,
}

impl Controller {
    pub fn new(initiator: Initiator) -> Controller {
        Controller {
            i: Stream::default(),
            o: Stream::default(),
            initiator,
            phase: Phase::Opcode,
            pending: None,
            waiting: false,
            outbox: Outbox::default(),
        }
    }

    pub fn initiator(&self) -> &Initiator {
        &self.initiator
    }

    pub fn set_frequency(&mut self, hz: u32) -> Result<u32, ProbeError> {
        self.initiator.set_frequency(hz)
    }

    /// Waiting for an opcode with nothing in flight.
    pub fn is_idle(&self) -> bool {
        self.phase == Phase::Opcode
            && self.pending.is_none()
            && !self.waiting
            && self.outbox.is_empty()
    }

    /// Whether a host byte can be taken in the current phase.
    fn accepts_byte(&self) -> bool {
        match self.phase {
            Phase::Opcode | Phase::Count { .. } | Phase::Drain { .. } => true,
            Phase::Write { remaining, .. } => {
                remaining > 0 && self.pending.is_none() && !self.waiting
            }
            Phase::Read { .. } | Phase::Condition => false,
        }
    }

    fn take_byte(&mut self, byte: u8) {
        self.phase = match self.phase {
            Phase::Opcode => match Opcode::from_byte(byte) {
                Some(opcode @ (Opcode::Start | Opcode::Stop)) => {
                    self.pending = Some(if opcode == Opcode::Start {
                        Operation::Start
                    } else {
                        Operation::Stop
                    });
                    Phase::Condition
                }
                Some(opcode) => Phase::Count { opcode, low: None },
                None => {
                    log::warn!("I2C: ignoring unknown opcode {:02x}", byte);
                    Phase::Opcode
                }
            },
            Phase::Count { opcode, low: None } => Phase::Count {
                opcode,
                low: Some(byte),
            },
            Phase::Count {
                opcode,
                low: Some(low),
            } => self.counted(opcode, u16::from_le_bytes([low, byte])),
            Phase::Write { remaining, unacked } => {
                self.pending = Some(Operation::Write(byte));
                Phase::Write { remaining, unacked }
            }
            Phase::Drain { remaining, unacked } => self.drain(remaining - 1, unacked),
            phase => phase,
        };
    }

    fn counted(&mut self, opcode: Opcode, count: u16) -> Phase {
        log::debug!("I2C: {:?} count={}", opcode, count);
        match opcode {
            Opcode::Write if count == 0 => {
                self.outbox.push(&0u16.to_le_bytes());
                Phase::Opcode
            }
            Opcode::Write => Phase::Write {
                remaining: count,
                unacked: 0,
            },
            Opcode::Read if count == 0 => Phase::Opcode,
            Opcode::Read => {
                self.pending = Some(Operation::Read { ack: count != 1 });
                Phase::Read { remaining: count }
            }
            Opcode::Start | Opcode::Stop => Phase::Opcode,
        }
    }

    fn drain(&mut self, remaining: u16, unacked: u16) -> Phase {
        if remaining == 0 {
            self.outbox.push(&unacked.to_le_bytes());
            Phase::Opcode
        } else {
            Phase::Drain { remaining, unacked }
        }
    }

    fn complete(&mut self, completion: Completion) {
        self.phase = match self.phase {
            Phase::Condition => {
                self.outbox.push(&[0x00]);
                Phase::Opcode
            }
            Phase::Write { remaining, unacked } => {
                let remaining = remaining - 1;
                if !completion.ack {
                    log::debug!("I2C: write not acknowledged, {} bytes left", remaining);
                    self.drain(remaining, unacked + 1 + remaining)
                } else if remaining > 0 {
                    Phase::Write { remaining, unacked }
                } else {
                    self.drain(0, unacked)
                }
            }
            Phase::Read { remaining } => {
                self.outbox.push(&[completion.data]);
                let remaining = remaining - 1;
                if remaining > 0 {
                    self.pending = Some(Operation::Read {
                        ack: remaining != 1,
                    });
                    Phase::Read { remaining }
                } else {
                    Phase::Opcode
                }
            }
            phase => phase,
        };
    }
}

impl BusOwner<2> for Controller {
    fn bus(&self) -> &Bus<2> {
        self.initiator.bus()
    }

    fn bus_mut(&mut self) -> &mut Bus<2> {
        self.initiator.bus_mut()
    }
}

impl Component for Controller {
    fn forward(&mut self) {
        match self.pending {
            Some(operation) => self.initiator.i.offer(operation),
            None => self.initiator.i.withdraw(),
        }
        self.initiator.forward();
        self.outbox.offer(&mut self.o);
    }

    fn backward(&mut self) {
        // answers are only collected while the outbox can absorb them
        self.initiator.o.ready = self.outbox.is_empty();
        self.initiator.backward();
        self.i.ready = self.accepts_byte();
    }

    fn commit(&mut self) {
        let issued = self.initiator.i.fire();
        let completion = self
            .initiator
            .o
            .fire()
            .then_some(self.initiator.o.payload);
        self.initiator.commit();
        self.outbox.commit(&self.o);

        if issued {
            self.pending = None;
            self.waiting = true;
        }
        if let Some(completion) = completion {
            self.waiting = false;
            self.complete(completion);
        }
        if self.i.fire() {
            self.take_byte(self.i.payload);
        }
    }
}

impl Pipe for Controller {
    type In = u8;
    type Out = u8;

    fn input(&mut self) -> &mut Stream<u8> {
        &mut self.i
    }

    fn output(&mut self) -> &mut Stream<u8> {
        &mut self.o
    }
}

impl Configure for Controller {
    fn configure(config: &Config) -> Result<Self, ProbeError> {
        Ok(Controller::new(Initiator::configure(config)?))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::Builder;
    use crate::target::Target;
    use crate::target::i2c::I2cTarget;
    use tickbus_core::sim::Bench;

    fn bench(clock_stretch: bool) -> Bench<Controller> {
        let controller = Builder::new()
            .frequency(4_000_000)
            .clock_stretch(clock_stretch)
            .build::<Controller>()
            .unwrap();
        Bench::new(controller)
    }

    fn transact(
        bench: &mut Bench<Controller>,
        target: &mut I2cTarget,
        bytes: &[u8],
        answers: usize,
    ) -> Vec<u8> {
        bench.source.extend(bytes.iter().copied());
        bench.collect(answers, 50_000, |controller| {
            target.respond(controller.bus_mut())
        })
    }

    #[test]
    fn divisor_uses_four_strobes_per_cycle() {
        let initiator = Builder::new()
            .frequency(400_000)
            .build::<Initiator>()
            .unwrap();
        assert_eq!(initiator.clock().divisor(), 29);
        assert!(!initiator.busy());
    }

    #[test]
    fn write_then_read_back() {
        let mut target = I2cTarget::new(0x50);
        let mut bench = bench(true);
        let answers = transact(
            &mut bench,
            &mut target,
            &[0x00, 0x02, 0x04, 0x00, 0xa0, 0x10, 0xaa, 0xbb, 0x01],
            4,
        );
        assert_eq!(answers, vec![0x00, 0x00, 0x00, 0x00]);
        assert_eq!(target.memory()[0x10], 0xaa);
        assert_eq!(target.memory()[0x11], 0xbb);

        let answers = transact(
            &mut bench,
            &mut target,
            &[
                0x00, 0x02, 0x02, 0x00, 0xa0, 0x10, // set the pointer
                0x00, 0x02, 0x01, 0x00, 0xa1, // repeated start for reading
                0x03, 0x02, 0x00, 0x01,
            ],
            9,
        );
        assert_eq!(
            answers,
            vec![0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xaa, 0xbb, 0x00]
        );
        assert_eq!(target.starts(), 3);
        assert_eq!(target.stops(), 2);
        assert!(bench.dut.is_idle());
    }

    #[test]
    fn unknown_address_drains_the_write() {
        let mut target = I2cTarget::new(0x50);
        let mut bench = bench(true);
        let answers = transact(
            &mut bench,
            &mut target,
            &[0x00, 0x02, 0x02, 0x00, 0xb0, 0x00, 0x01],
            4,
        );
        // the second byte is never put on the wire, it must not be taken as a start opcode
        assert_eq!(answers, vec![0x00, 0x02, 0x00, 0x00]);
        assert_eq!(target.starts(), 1);
        assert!(target.memory().iter().all(|byte| *byte == 0xff));
    }

    #[test]
    fn refused_bytes_are_counted() {
        let mut target = I2cTarget::new(0x50);
        target.nak_after(2);
        let mut bench = bench(true);
        let answers = transact(
            &mut bench,
            &mut target,
            &[0x00, 0x02, 0x05, 0x00, 0xa0, 0x20, 0x11, 0x22, 0x33, 0x01],
            4,
        );
        assert_eq!(answers, vec![0x00, 0x02, 0x00, 0x00]);
        assert_eq!(target.memory()[0x20], 0x11);
        assert_eq!(target.memory()[0x21], 0xff);
    }

    #[test]
    fn empty_transfers() {
        let mut target = I2cTarget::new(0x50);
        let mut bench = bench(true);
        let answers = transact(
            &mut bench,
            &mut target,
            &[0x02, 0x00, 0x00, 0x03, 0x00, 0x00, 0x7f, 0x00],
            3,
        );
        assert_eq!(answers, vec![0x00, 0x00, 0x00]);
        assert_eq!(target.starts(), 1);
    }

    #[test]
    fn stretched_clock_is_waited_for() {
        let bytes = [0x00, 0x02, 0x03, 0x00, 0xa0, 0x00, 0x5a, 0x01];
        let mut ticks = Vec::new();
        for stretch in [0, 40] {
            let mut target = I2cTarget::new(0x50);
            target.stretch(stretch);
            let mut bench = bench(true);
            let answers = transact(&mut bench, &mut target, &bytes, 4);
            assert_eq!(answers, vec![0x00, 0x00, 0x00, 0x00]);
            assert_eq!(target.memory()[0x00], 0x5a);
            ticks.push(bench.ticks());
        }
        assert!(ticks[1] > ticks[0] + 60, "{:?}", ticks);
    }
}
