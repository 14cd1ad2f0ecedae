//! A debug port answering SWD packets.
//!
//! The model samples SWDIO on rising SWCLK edges and changes its own drive on falling edges.
//! Answers are scripted: acknowledgements are taken from a queue, falling back to a default,
//! and a `FAULT` stays sticky until the next line reset. Reads return the contents of a small
//! register file indexed by APnDP and `A[3:2]`, writes with a correct parity update it.
use crate::sequencer::parity;
use crate::swd::{Ack, Header, LINE_RESET_ONES, SWCLK, SWDIO};
use crate::target::{Edge, Edges, Target};
use std::collections::VecDeque;
use tickbus_core::bus::Bus;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Action {
    /// Waiting for a request.
    Idle,
    Drive(bool),
    Release,
    /// Sampling a bit of write data.
    Capture,
}

#[derive(Clone, Copy, Debug)]
struct PendingWrite {
    index: usize,
    value: u64,
    count: usize,
}

#[derive(Debug)]
pub struct SwdTarget {
    clock: Edges,
    drive: Option<bool>,
    current: Action,
    plan: VecDeque<Action>,
    ones: usize,
    request: Option<(u8, usize)>,
    write: Option<PendingWrite>,
    registers: [u32; 8],
    script: VecDeque<Ack>,
    default_ack: Ack,
    sticky_fault: bool,
    corrupt_parity: bool,
    headers: u64,
    line_resets: u64,
    answered: Vec<(Header, Ack)>,
}

impl SwdTarget {
    pub fn new() -> SwdTarget {
        SwdTarget {
            clock: Edges::new(true),
            drive: None,
            current: Action::Idle,
            plan: VecDeque::new(),
            ones: 0,
            request: None,
            write: None,
            registers: [0; 8],
            script: VecDeque::new(),
            default_ack: Ack::Ok,
            sticky_fault: false,
            corrupt_parity: false,
            headers: 0,
            line_resets: 0,
            answered: Vec::new(),
        }
    }

    fn index(ap_ndp: bool, addr: u8) -> usize {
        usize::from(ap_ndp) * 4 + usize::from(addr & 0b11)
    }

    pub fn set_register(&mut self, ap_ndp: bool, addr: u8, value: u32) {
        self.registers[Self::index(ap_ndp, addr)] = value;
    }

    pub fn register(&self, ap_ndp: bool, addr: u8) -> u32 {
        self.registers[Self::index(ap_ndp, addr)]
    }

    /// Answers the next headers with `acks`, in order.
    pub fn respond_with(&mut self, acks: impl IntoIterator<Item = Ack>) {
        self.script.extend(acks);
    }

    /// Answer once the script is exhausted.
    pub fn set_default_ack(&mut self, ack: Ack) {
        self.default_ack = ack;
    }

    /// Flips the parity bit of read data.
    pub fn corrupt_parity(&mut self, corrupt: bool) {
        self.corrupt_parity = corrupt;
    }

    /// Number of well-formed headers received.
    pub fn headers(&self) -> u64 {
        self.headers
    }

    pub fn line_resets(&self) -> u64 {
        self.line_resets
    }

    /// Every header received together with the acknowledgement it was given.
    pub fn answered(&self) -> &[(Header, Ack)] {
        &self.answered
    }

    fn line_reset(&mut self) {
        log::debug!("SWD target: line reset");
        self.line_resets += 1;
        self.plan.clear();
        self.current = Action::Idle;
        self.drive = None;
        self.request = None;
        self.write = None;
        self.sticky_fault = false;
    }

    fn rising(&mut self, host: Option<bool>, level: bool) {
        if host == Some(true) {
            self.ones += 1;
        } else {
            self.ones = 0;
        }
        if self.ones >= LINE_RESET_ONES {
            if self.ones == LINE_RESET_ONES {
                self.line_reset();
            }
            return;
        }
        match self.current {
            Action::Idle => self.collect(host, level),
            Action::Capture => self.capture(level),
            Action::Drive(_) | Action::Release => {}
        }
    }

    fn collect(&mut self, host: Option<bool>, level: bool) {
        match self.request.take() {
            // a start bit, only ever driven by the host
            None if host == Some(true) => self.request = Some((1, 1)),
            None => {}
            Some((bits, count)) => {
                let bits = bits | (level as u8) << count;
                if count + 1 == 8 {
                    self.answer(bits);
                } else {
                    self.request = Some((bits, count + 1));
                }
            }
        }
    }

    fn answer(&mut self, bits: u8) {
        let Some(header) = Header::from_bits(bits) else {
            log::debug!("SWD target: ignoring request {:02x}", bits);
            return;
        };
        self.headers += 1;
        let ack = if self.sticky_fault {
            Ack::Fault
        } else {
            self.script.pop_front().unwrap_or(self.default_ack)
        };
        self.sticky_fault |= ack == Ack::Fault;
        log::trace!("SWD target: {:?} answered with {:?}", header, ack);
        self.answered.push((header, ack));

        self.plan.push_back(Action::Release);
        self.plan
            .extend((0..3).map(|bit| Action::Drive(ack.bits() >> bit & 1 == 1)));
        let index = Self::index(header.ap_ndp, header.addr);
        match ack {
            Ack::Ok if header.r_nw => {
                let data = self.registers[index];
                self.plan
                    .extend((0..32).map(|bit| Action::Drive(data >> bit & 1 == 1)));
                self.plan
                    .push_back(Action::Drive(parity(data) ^ self.corrupt_parity));
                self.plan.push_back(Action::Release);
            }
            Ack::Ok => {
                self.plan.push_back(Action::Release);
                self.plan.extend([Action::Capture; 33]);
                self.write = Some(PendingWrite {
                    index,
                    value: 0,
                    count: 0,
                });
            }
            Ack::Wait | Ack::Fault => self.plan.push_back(Action::Release),
        }
    }

    fn capture(&mut self, level: bool) {
        let Some(write) = self.write.as_mut() else {
            return;
        };
        write.value |= u64::from(level) << write.count;
        write.count += 1;
        if write.count < 33 {
            return;
        }
        let data = write.value as u32;
        if parity(data) == (write.value >> 32 & 1 == 1) {
            self.registers[write.index] = data;
        } else {
            log::warn!("SWD target: parity error on write data {:08x}", data);
        }
        self.write = None;
    }
}

impl Default for SwdTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl Target<2> for SwdTarget {
    fn respond(&mut self, bus: &mut Bus<2>) {
        let levels = bus.resolve([None, self.drive]);
        match self.clock.update(levels[SWCLK]) {
            Some(Edge::Rising) => self.rising(bus.host_level(SWDIO), levels[SWDIO]),
            Some(Edge::Falling) => {
                self.current = self.plan.pop_front().unwrap_or(Action::Idle);
                self.drive = match self.current {
                    Action::Drive(level) => Some(level),
                    _ => None,
                };
                bus.resolve([None, self.drive]);
            }
            None => {}
        }
    }
}
