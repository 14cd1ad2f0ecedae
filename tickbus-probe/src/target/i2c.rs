//! A 24-series style memory with a single address byte.
//!
//! A write transaction sets the memory pointer with its first data byte and stores the
//! following bytes at consecutive addresses. A read transaction returns bytes from the pointer
//! onwards. The target only ever pulls the lines low, like any open-drain device.
use crate::target::Target;
use tickbus_core::bus::Bus;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    Address,
    Write,
    Read,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Slot {
    Data,
    /// Acknowledging a received byte.
    Ack,
    /// The initiator acknowledges a transmitted byte.
    HostAck,
}

#[derive(Debug)]
pub struct I2cTarget {
    address: u8,
    memory: [u8; 256],
    pointer: u8,
    has_pointer: bool,
    phase: Phase,
    slot: Slot,
    shreg: u8,
    bits: u8,
    host_ack: bool,
    written: usize,
    nak_after: Option<usize>,
    stretch: u32,
    hold: u32,
    sda: Option<bool>,
    levels: [bool; 2],
    starts: u64,
    stops: u64,
}

impl I2cTarget {
    pub fn new(address: u8) -> I2cTarget {
        I2cTarget {
            address: address & 0x7f,
            memory: [0xff; 256],
            pointer: 0,
            has_pointer: false,
            phase: Phase::Idle,
            slot: Slot::Data,
            shreg: 0,
            bits: 0,
            host_ack: false,
            written: 0,
            nak_after: None,
            stretch: 0,
            hold: 0,
            sda: None,
            levels: [true; 2],
            starts: 0,
            stops: 0,
        }
    }

    pub fn memory(&self) -> &[u8; 256] {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut [u8; 256] {
        &mut self.memory
    }

    /// Refuses data bytes beyond the first `count` of every write transaction,
    /// the pointer byte included.
    pub fn nak_after(&mut self, count: usize) {
        self.nak_after = Some(count);
    }

    /// Holds SCL low for `ticks` after acknowledging a byte.
    pub fn stretch(&mut self, ticks: u32) {
        self.stretch = ticks;
    }

    /// Number of start and repeated start conditions seen.
    pub fn starts(&self) -> u64 {
        self.starts
    }

    pub fn stops(&self) -> u64 {
        self.stops
    }

    fn scl_drive(&self) -> Option<bool> {
        (self.hold > 0).then_some(false)
    }

    fn release(&mut self) {
        self.sda = None;
        self.slot = Slot::Data;
        self.bits = 0;
    }

    /// Drives the next bit of `shreg`, most significant first.
    fn transmit(&mut self) {
        let bit = self.shreg >> (7 - self.bits) & 1 == 1;
        self.sda = (!bit).then_some(false);
    }

    fn load(&mut self) {
        self.shreg = self.memory[usize::from(self.pointer)];
        self.pointer = self.pointer.wrapping_add(1);
        self.bits = 0;
        self.slot = Slot::Data;
        self.transmit();
    }

    fn received(&mut self) -> bool {
        match self.phase {
            Phase::Address => {
                let address = self.shreg >> 1;
                if address != self.address {
                    log::trace!("I2C target: address {:#04x} is not ours", address);
                    self.phase = Phase::Idle;
                    return false;
                }
                if self.shreg & 1 == 1 {
                    self.phase = Phase::Read;
                } else {
                    self.phase = Phase::Write;
                    self.has_pointer = false;
                    self.written = 0;
                }
                true
            }
            Phase::Write => {
                if self.nak_after.is_some_and(|limit| self.written >= limit) {
                    log::trace!("I2C target: refusing byte {:02x}", self.shreg);
                    return false;
                }
                self.written += 1;
                if self.has_pointer {
                    self.memory[usize::from(self.pointer)] = self.shreg;
                    self.pointer = self.pointer.wrapping_add(1);
                } else {
                    self.pointer = self.shreg;
                    self.has_pointer = true;
                }
                true
            }
            Phase::Idle | Phase::Read => false,
        }
    }

    fn rising(&mut self, sda: bool) {
        match (self.slot, self.phase) {
            (Slot::Data, Phase::Address | Phase::Write) if self.bits < 8 => {
                self.shreg = self.shreg << 1 | sda as u8;
                self.bits += 1;
            }
            (Slot::Data, Phase::Read) => self.bits += 1,
            (Slot::HostAck, _) => self.host_ack = !sda,
            _ => {}
        }
    }

    fn falling(&mut self) {
        match (self.slot, self.phase) {
            (Slot::Ack, Phase::Read) => {
                self.hold = self.stretch;
                self.load();
            }
            (Slot::Ack, _) => {
                self.hold = self.stretch;
                self.release();
            }
            (Slot::HostAck, _) if self.host_ack => self.load(),
            (Slot::HostAck, _) => {
                self.phase = Phase::Idle;
                self.release();
            }
            (Slot::Data, Phase::Address | Phase::Write) if self.bits == 8 => {
                if self.received() {
                    self.sda = Some(false);
                    self.slot = Slot::Ack;
                } else {
                    self.phase = Phase::Idle;
                    self.release();
                }
            }
            (Slot::Data, Phase::Read) if self.bits == 8 => {
                self.sda = None;
                self.slot = Slot::HostAck;
            }
            (Slot::Data, Phase::Read) => self.transmit(),
            _ => {}
        }
    }
}

impl Target<2> for I2cTarget {
    fn respond(&mut self, bus: &mut Bus<2>) {
        let [scl, sda] = bus.resolve([self.scl_drive(), self.sda]);
        let [last_scl, last_sda] = self.levels;
        if last_scl && scl && last_sda != sda {
            if sda {
                self.stops += 1;
                self.phase = Phase::Idle;
            } else {
                self.starts += 1;
                self.phase = Phase::Address;
                self.shreg = 0;
            }
            self.release();
        } else if scl && !last_scl {
            self.rising(sda);
        } else if !scl && last_scl {
            self.falling();
        }
        self.hold = self.hold.saturating_sub(1);
        self.levels = bus.resolve([self.scl_drive(), self.sda]);
    }
}
