//! Clause 22 management frames.
//!
//! A frame is 64 MDC cycles, most significant bit first: 32 preamble ones, the start pattern
//! `01`, the opcode (`10` read, `01` write), five PHY and five register address bits, a
//! two-bit turnaround and 16 data bits. For reads the host releases MDIO from the turnaround
//! on and samples the data; writes are open loop and produce no result.
use crate::config::{Config, Configure};
use crate::error::ProbeError;
use crate::sequencer::{Deframe, LineDriver, Template};
use tickbus_core::bus::{Bus, Drive, Pull};
use tickbus_core::clock::ClockDivisor;
use tickbus_core::iostream::BusOwner;
use tickbus_core::stream::{Component, Pipe, Stream};

pub const MDC: usize = 0;
pub const MDIO: usize = 1;

pub const PREAMBLE_BITS: usize = 32;
pub const FRAME_BITS: usize = 64;
/// Index of the first turnaround bit.
pub const TURNAROUND: usize = 46;
/// Index of the first data bit.
pub const DATA: usize = 48;

pub const TICKS_PER_CYCLE: u32 = 2;

pub fn bus() -> Bus<2> {
    Bus::new(["mdc", "mdio"]).with_pull(MDIO, Pull::Up)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Transaction {
    pub write: bool,
    pub phy: u8,
    pub reg: u8,
    /// Only shifted by writes.
    pub data: u16,
}

impl Transaction {
    pub fn read(phy: u8, reg: u8) -> Transaction {
        Transaction {
            write: false,
            phy: phy & 0x1f,
            reg: reg & 0x1f,
            data: 0,
        }
    }

    pub fn write(phy: u8, reg: u8, data: u16) -> Transaction {
        Transaction {
            write: true,
            phy: phy & 0x1f,
            reg: reg & 0x1f,
            data,
        }
    }

    /// Level of `bit` for the parts of the frame driven by the host.
    fn level(&self, bit: usize) -> bool {
        match bit {
            0..32 => true,
            32 => false,
            33 => true,
            34 => !self.write,
            35 => self.write,
            36..41 => self.phy >> (40 - bit) & 1 == 1,
            41..46 => self.reg >> (45 - bit) & 1 == 1,
            46 => true,
            47 => false,
            _ => self.data >> (FRAME_BITS - 1 - bit) & 1 == 1,
        }
    }
}

impl Template<2> for Transaction {
    type Meta = ();

    fn len(&self) -> usize {
        FRAME_BITS
    }

    fn drive(&self, bit: usize) -> [Drive; 2] {
        let mdio = if self.write || bit < TURNAROUND {
            Drive::level(self.level(bit))
        } else {
            Drive::RELEASED
        };
        [Drive::RELEASED, mdio]
    }

    fn capture(&self, bit: usize) -> bool {
        !self.write && bit >= DATA
    }

    fn meta(&self, _bit: usize) {}
}

/// Collects the 16 data bits of a read frame.
#[derive(Clone, Copy, Debug, Default)]
pub struct MdioDeframe;

impl Deframe<2> for MdioDeframe {
    type Meta = ();
    type Output = u16;

    fn pin(&self) -> usize {
        MDIO
    }

    fn complete(&self, _meta: &(), count: usize) -> bool {
        count == FRAME_BITS - DATA
    }

    fn result(&self, _meta: &(), value: u128, _count: usize) -> u16 {
        // first sample is the most significant bit
        (value as u16).reverse_bits()
    }
}

pub type MdioDriver = LineDriver<Transaction, MdioDeframe, 2>;

/// Shifts [`Transaction`]s and returns the data of every read.
#[derive(Debug)]
pub struct Controller {
    driver: MdioDriver,
    clock: ClockDivisor,
}

impl Controller {
    pub fn new(bus: Bus<2>, clock: ClockDivisor) -> Controller {
        let driver = LineDriver::new(
            bus,
            [Drive::LOW, Drive::RELEASED],
            MDC,
            clock.divisor(),
            MdioDeframe,
        );
        Controller { driver, clock }
    }

    pub fn clock(&self) -> &ClockDivisor {
        &self.clock
    }

    pub fn set_frequency(&mut self, hz: u32) -> Result<u32, ProbeError> {
        let achieved = self.clock.set_frequency(hz)?;
        self.driver.set_divisor(self.clock.divisor());
        Ok(achieved)
    }
}

impl Configure for Controller {
    fn configure(config: &Config) -> Result<Self, ProbeError> {
        let clock = config.clock("mdc", TICKS_PER_CYCLE)?;
        let bus = config.bind(bus())?;
        Ok(Controller::new(bus, clock))
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
        self.driver.forward();
    }

    fn backward(&mut self) {
        self.driver.backward();
    }

    fn commit(&mut self) {
        if self.driver.input().fire() {
            let transaction = self.driver.input().payload;
            log::trace!(
                "MDIO: {} phy={} reg={}",
                if transaction.write { "write" } else { "read" },
                transaction.phy,
                transaction.reg
            );
        }
        self.driver.commit();
    }
}

impl Pipe for Controller {
    type In = Transaction;
    type Out = u16;

    fn input(&mut self) -> &mut Stream<Transaction> {
        self.driver.input()
    }

    fn output(&mut self) -> &mut Stream<u16> {
        self.driver.output()
    }
}
