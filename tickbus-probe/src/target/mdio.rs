//! A PHY management interface with 32 registers.
use crate::mdio::{MDC, MDIO, PREAMBLE_BITS};
use crate::target::{Edge, Edges, Target};
use std::collections::VecDeque;
use tickbus_core::bus::Bus;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    /// Counting preamble ones.
    Idle { ones: usize },
    /// Start, opcode and addresses; the first start bit is already in.
    Header { bits: u16, count: usize },
    /// Turnaround and data, `count` cycles so far.
    Data { write: bool, reg: u8, data: u16, count: usize },
}

/// Header bits after the preamble: start, opcode, PHY and register address.
const HEADER_BITS: usize = 14;
/// Cycles from the turnaround to the end of the frame.
const DATA_CYCLES: usize = 18;

#[derive(Debug)]
pub struct MdioPhy {
    address: u8,
    registers: [u16; 32],
    clock: Edges,
    state: State,
    /// Drive of MDIO from the next falling edge on.
    plan: VecDeque<Option<bool>>,
    drive: Option<bool>,
    reads: u64,
    writes: u64,
}

impl MdioPhy {
    pub fn new(address: u8) -> MdioPhy {
        MdioPhy {
            address: address & 0x1f,
            registers: [0; 32],
            clock: Edges::new(false),
            state: State::Idle { ones: 0 },
            plan: VecDeque::new(),
            drive: None,
            reads: 0,
            writes: 0,
        }
    }

    /// Sets the PHY identifier registers 2 and 3.
    pub fn with_id(mut self, id: u32) -> MdioPhy {
        self.registers[2] = (id >> 16) as u16;
        self.registers[3] = id as u16;
        self
    }

    pub fn register(&self, reg: u8) -> u16 {
        self.registers[usize::from(reg & 0x1f)]
    }

    pub fn set_register(&mut self, reg: u8, value: u16) {
        self.registers[usize::from(reg & 0x1f)] = value;
    }

    pub fn reads(&self) -> u64 {
        self.reads
    }

    pub fn writes(&self) -> u64 {
        self.writes
    }

    fn header(&mut self, bits: u16) -> State {
        let start = bits >> 12 & 0b11;
        let op = bits >> 10 & 0b11;
        let phy = (bits >> 5 & 0x1f) as u8;
        let reg = (bits & 0x1f) as u8;
        if start != 0b01 || phy != self.address || !(op == 0b01 || op == 0b10) {
            log::trace!("MDIO PHY: ignoring frame {:04x}", bits);
            return State::Idle { ones: 0 };
        }
        let write = op == 0b01;
        if !write {
            let data = self.registers[usize::from(reg)];
            log::trace!("MDIO PHY: read {:#04x} = {:04x}", reg, data);
            // release for the first turnaround bit, then a zero and the data
            self.plan.push_back(None);
            self.plan.push_back(Some(false));
            self.plan
                .extend((0..16).rev().map(|bit| Some(data >> bit & 1 == 1)));
            self.reads += 1;
        }
        State::Data {
            write,
            reg,
            data: 0,
            count: 0,
        }
    }

    fn rising(&mut self, level: bool) {
        self.state = match self.state {
            State::Idle { ones } if level => State::Idle { ones: ones + 1 },
            State::Idle { ones } if ones >= PREAMBLE_BITS => State::Header { bits: 0, count: 1 },
            State::Idle { .. } => State::Idle { ones: 0 },
            State::Header { bits, count } => {
                let bits = bits << 1 | level as u16;
                if count + 1 == HEADER_BITS {
                    self.header(bits)
                } else {
                    State::Header {
                        bits,
                        count: count + 1,
                    }
                }
            }
            State::Data {
                write,
                reg,
                data,
                count,
            } => {
                let data = if count >= 2 { data << 1 | level as u16 } else { data };
                if count + 1 < DATA_CYCLES {
                    State::Data {
                        write,
                        reg,
                        data,
                        count: count + 1,
                    }
                } else {
                    if write {
                        log::trace!("MDIO PHY: write {:#04x} = {:04x}", reg, data);
                        self.registers[usize::from(reg)] = data;
                        self.writes += 1;
                    } else {
                        // the host has sampled the last bit, leave the line to the pull-up
                        self.drive = None;
                    }
                    State::Idle { ones: 0 }
                }
            }
        };
    }
}

impl Target<2> for MdioPhy {
    fn respond(&mut self, bus: &mut Bus<2>) {
        let levels = bus.resolve([None, self.drive]);
        match self.clock.update(levels[MDC]) {
            Some(Edge::Rising) => self.rising(levels[MDIO]),
            Some(Edge::Falling) => {
                if let Some(drive) = self.plan.pop_front() {
                    self.drive = drive;
                    bus.resolve([None, self.drive]);
                }
            }
            None => {}
        }
    }
}
