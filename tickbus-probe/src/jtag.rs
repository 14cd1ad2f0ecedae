//! JTAG bit shifter and TAP sequencer.
//!
//! The shifter clocks words of up to 32 bits, least significant bit first, in one of three
//! [`Mode`]s. TDI idles high while TMS is shifted, and TMS stays low while data is shifted
//! except on the final bit of a word marked `last`, which leaves the shift state. Only
//! `ShiftTdio` words sample TDO; they produce one [`Captured`] word each.
//!
//! The [`Sequencer`] turns register level [`Command`]s into shifter words, walking the TAP
//! controller from Run-Test/Idle or an Update state into Shift-DR or Shift-IR and back out to
//! the matching Update state.
use crate::config::{Config, Configure};
use crate::error::ProbeError;
use crate::sequencer::{Deframe, LineDriver, Template};
use tickbus_core::bus::{Bus, Drive, Pull};
use tickbus_core::clock::ClockDivisor;
use tickbus_core::iostream::BusOwner;
use tickbus_core::stream::{Component, Pipe, Stream};

pub const TCK: usize = 0;
pub const TMS: usize = 1;
pub const TDI: usize = 2;
pub const TDO: usize = 3;

pub const MAX_BITS: u8 = 32;

pub const TICKS_PER_CYCLE: u32 = 2;

pub fn bus() -> Bus<4> {
    Bus::new(["tck", "tms", "tdi", "tdo"]).with_pull(TDO, Pull::Up)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Mode {
    #[default]
    ShiftTms,
    ShiftTdi,
    ShiftTdio,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Word {
    pub mode: Mode,
    /// Number of bits, 1 to 32.
    pub size: u8,
    /// Raise TMS with the final bit.
    pub last: bool,
    pub data: u32,
}

impl Word {
    pub fn tms(size: u8, data: u32) -> Word {
        Word {
            mode: Mode::ShiftTms,
            size,
            last: false,
            data,
        }
    }

    pub fn shift(mode: Mode, size: u8, data: u32, last: bool) -> Word {
        Word {
            mode,
            size,
            last,
            data,
        }
    }

    fn bit(&self, bit: usize) -> bool {
        self.data >> bit & 1 == 1
    }
}

/// Position of a sampled bit within its word.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Position {
    #[default]
    More,
    Last,
}

impl Template<4> for Word {
    type Meta = Position;

    fn len(&self) -> usize {
        usize::from(self.size.clamp(1, MAX_BITS))
    }

    fn drive(&self, bit: usize) -> [Drive; 4] {
        let (tms, tdi) = match self.mode {
            Mode::ShiftTms => (self.bit(bit), true),
            Mode::ShiftTdi | Mode::ShiftTdio => (self.last && bit + 1 == self.len(), self.bit(bit)),
        };
        [
            Drive::RELEASED,
            Drive::level(tms),
            Drive::level(tdi),
            Drive::RELEASED,
        ]
    }

    fn capture(&self, _bit: usize) -> bool {
        self.mode == Mode::ShiftTdio
    }

    fn meta(&self, bit: usize) -> Position {
        if bit + 1 == self.len() {
            Position::Last
        } else {
            Position::More
        }
    }
}

/// TDO bits of one `ShiftTdio` word, first bit in bit 0.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Captured {
    pub size: u8,
    pub data: u32,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct JtagDeframe;

impl Deframe<4> for JtagDeframe {
    type Meta = Position;
    type Output = Captured;

    fn pin(&self) -> usize {
        TDO
    }

    fn complete(&self, meta: &Position, _count: usize) -> bool {
        *meta == Position::Last
    }

    fn result(&self, _meta: &Position, value: u128, count: usize) -> Captured {
        Captured {
            size: count as u8,
            data: value as u32,
        }
    }
}

pub type Shifter = LineDriver<Word, JtagDeframe, 4>;

/// Creates a shifter with TCK low and TMS and TDI high.
pub fn shifter(bus: Bus<4>, divisor: u16) -> Shifter {
    LineDriver::new(
        bus,
        [Drive::LOW, Drive::HIGH, Drive::HIGH, Drive::RELEASED],
        TCK,
        divisor,
        JtagDeframe,
    )
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Command {
    /// Five TMS ones into Test-Logic-Reset, then Run-Test/Idle.
    #[default]
    Reset,
    /// Clocks in Run-Test/Idle.
    RunTest { cycles: u8 },
    SetDr { size: u8, data: u32 },
    /// Like `SetDr`, returning the bits shifted out.
    GetDr { size: u8, data: u32 },
    SetIr { size: u8, data: u32 },
    GetIr { size: u8, data: u32 },
}

impl Command {
    /// The `step`-th shifter word of this command.
    pub fn word(&self, step: usize) -> Option<Word> {
        let (enter, mode, size, data) = match *self {
            Command::Reset => return (step == 0).then(|| Word::tms(6, 0b01_1111)),
            Command::RunTest { cycles } => return (step == 0).then(|| Word::tms(cycles, 0)),
            Command::SetDr { size, data } => (Word::tms(3, 0b001), Mode::ShiftTdi, size, data),
            Command::GetDr { size, data } => (Word::tms(3, 0b001), Mode::ShiftTdio, size, data),
            Command::SetIr { size, data } => (Word::tms(4, 0b0011), Mode::ShiftTdi, size, data),
            Command::GetIr { size, data } => (Word::tms(4, 0b0011), Mode::ShiftTdio, size, data),
        };
        match step {
            0 => Some(enter),
            1 => Some(Word::shift(mode, size, data, true)),
            // Exit1 to Update
            2 => Some(Word::tms(1, 1)),
            _ => None,
        }
    }

    /// Whether the command answers with the shifted out bits.
    pub fn returns_data(&self) -> bool {
        matches!(self, Command::GetDr { .. } | Command::GetIr { .. })
    }
}

/// Executes [`Command`]s, answering every `GetDr` and `GetIr` with the captured bits.
#[derive(Debug)]
pub struct Sequencer {
    pub i: Stream<Command>,
    pub o: Stream<u32>,
    shifter: Shifter,
    clock: ClockDivisor,
    step: usize,
}

impl Sequencer {
    pub fn new(bus: Bus<4>, clock: ClockDivisor) -> Sequencer {
        Sequencer {
            i: Stream::default(),
            o: Stream::default(),
            shifter: shifter(bus, clock.divisor()),
            clock,
            step: 0,
        }
    }

    pub fn clock(&self) -> &ClockDivisor {
        &self.clock
    }

    pub fn set_frequency(&mut self, hz: u32) -> Result<u32, ProbeError> {
        let achieved = self.clock.set_frequency(hz)?;
        self.shifter.set_divisor(self.clock.divisor());
        Ok(achieved)
    }
}

impl Configure for Sequencer {
    fn configure(config: &Config) -> Result<Self, ProbeError> {
        let clock = config.clock("tck", TICKS_PER_CYCLE)?;
        let bus = config.bind(bus())?;
        Ok(Sequencer::new(bus, clock))
    }
}

impl BusOwner<4> for Sequencer {
    fn bus(&self) -> &Bus<4> {
        self.shifter.bus()
    }

    fn bus_mut(&mut self) -> &mut Bus<4> {
        self.shifter.bus_mut()
    }
}

impl Component for Sequencer {
    fn forward(&mut self) {
        match self.i.valid.then(|| self.i.payload.word(self.step)).flatten() {
            Some(word) => self.shifter.input().offer(word),
            None => self.shifter.input().withdraw(),
        }
        self.shifter.forward();
        let captured = *self.shifter.output();
        if captured.valid {
            self.o.offer(captured.payload.data);
        } else {
            self.o.withdraw();
        }
    }

    fn backward(&mut self) {
        self.shifter.output().ready = self.o.ready;
        self.shifter.backward();
        self.i.ready = self.shifter.input().ready && self.i.payload.word(self.step + 1).is_none();
    }

    fn commit(&mut self) {
        if self.shifter.input().fire() {
            log::trace!("JTAG: {:?}", self.shifter.input().payload);
            self.step += 1;
        }
        if self.i.fire() {
            log::debug!("JTAG: {:?} done", self.i.payload);
            self.step = 0;
        }
        self.shifter.commit();
    }
}

impl Pipe for Sequencer {
    type In = Command;
    type Out = u32;

    fn input(&mut self) -> &mut Stream<Command> {
        &mut self.i
    }

    fn output(&mut self) -> &mut Stream<u32> {
        &mut self.o
    }
}
