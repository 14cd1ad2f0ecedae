//! A single TAP controller with a 4-bit instruction register.
//!
//! Implements `IDCODE`, `BYPASS` and a 32-bit scratch `USER` data register. Unknown
//! instructions select the bypass register. The model samples TMS and TDI on rising TCK edges
//! and updates TDO on falling edges, driving it only in Shift-DR and Shift-IR.
use crate::jtag::{TCK, TDI, TMS};
use crate::target::{Edge, Edges, Target};
use tickbus_core::bus::Bus;

pub const IR_LEN: usize = 4;
pub const IDCODE: u8 = 0b1110;
pub const BYPASS: u8 = 0b1111;
pub const USER: u8 = 0b1000;

/// Value loaded into the instruction register in Capture-IR.
pub const IR_CAPTURE: u64 = 0b0001;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TapState {
    TestLogicReset,
    RunTestIdle,
    SelectDrScan,
    CaptureDr,
    ShiftDr,
    Exit1Dr,
    PauseDr,
    Exit2Dr,
    UpdateDr,
    SelectIrScan,
    CaptureIr,
    ShiftIr,
    Exit1Ir,
    PauseIr,
    Exit2Ir,
    UpdateIr,
}

impl TapState {
    pub fn next(self, tms: bool) -> TapState {
        use TapState::*;
        match (self, tms) {
            (TestLogicReset, true) => TestLogicReset,
            (TestLogicReset, false) => RunTestIdle,
            (RunTestIdle, true) => SelectDrScan,
            (RunTestIdle, false) => RunTestIdle,
            (SelectDrScan, true) => SelectIrScan,
            (SelectDrScan, false) => CaptureDr,
            (CaptureDr, true) => Exit1Dr,
            (CaptureDr, false) => ShiftDr,
            (ShiftDr, true) => Exit1Dr,
            (ShiftDr, false) => ShiftDr,
            (Exit1Dr, true) => UpdateDr,
            (Exit1Dr, false) => PauseDr,
            (PauseDr, true) => Exit2Dr,
            (PauseDr, false) => PauseDr,
            (Exit2Dr, true) => UpdateDr,
            (Exit2Dr, false) => ShiftDr,
            (UpdateDr, true) => SelectDrScan,
            (UpdateDr, false) => RunTestIdle,
            (SelectIrScan, true) => TestLogicReset,
            (SelectIrScan, false) => CaptureIr,
            (CaptureIr, true) => Exit1Ir,
            (CaptureIr, false) => ShiftIr,
            (ShiftIr, true) => Exit1Ir,
            (ShiftIr, false) => ShiftIr,
            (Exit1Ir, true) => UpdateIr,
            (Exit1Ir, false) => PauseIr,
            (PauseIr, true) => Exit2Ir,
            (PauseIr, false) => PauseIr,
            (Exit2Ir, true) => UpdateIr,
            (Exit2Ir, false) => ShiftIr,
            (UpdateIr, true) => SelectDrScan,
            (UpdateIr, false) => RunTestIdle,
        }
    }

    fn shifting(self) -> bool {
        matches!(self, TapState::ShiftDr | TapState::ShiftIr)
    }
}

#[derive(Debug)]
pub struct JtagTap {
    idcode: u32,
    user: u32,
    ir: u8,
    state: TapState,
    shreg: u64,
    len: usize,
    clock: Edges,
    tdo: Option<bool>,
}

impl JtagTap {
    pub fn new(idcode: u32) -> JtagTap {
        JtagTap {
            idcode,
            user: 0,
            ir: IDCODE,
            state: TapState::TestLogicReset,
            shreg: 0,
            len: 1,
            clock: Edges::new(false),
            tdo: None,
        }
    }

    pub fn state(&self) -> TapState {
        self.state
    }

    pub fn ir(&self) -> u8 {
        self.ir
    }

    pub fn user(&self) -> u32 {
        self.user
    }

    fn capture_dr(&mut self) {
        (self.shreg, self.len) = match self.ir {
            IDCODE => (u64::from(self.idcode), 32),
            USER => (u64::from(self.user), 32),
            _ => (0, 1),
        };
    }

    fn rising(&mut self, tms: bool, tdi: bool) {
        if self.state.shifting() {
            self.shreg = self.shreg >> 1 | u64::from(tdi) << (self.len - 1);
        }
        let next = self.state.next(tms);
        if next != self.state {
            log::trace!("TAP: {:?} -> {:?}", self.state, next);
        }
        self.state = next;
        match next {
            TapState::TestLogicReset => self.ir = IDCODE,
            TapState::CaptureDr => self.capture_dr(),
            TapState::CaptureIr => (self.shreg, self.len) = (IR_CAPTURE, IR_LEN),
            TapState::UpdateDr if self.ir == USER => self.user = self.shreg as u32,
            TapState::UpdateIr => {
                self.ir = (self.shreg & ((1 << IR_LEN) - 1)) as u8;
                log::debug!("TAP: instruction {:04b}", self.ir);
            }
            _ => {}
        }
    }
}

impl Target<4> for JtagTap {
    fn respond(&mut self, bus: &mut Bus<4>) {
        let levels = bus.resolve([None, None, None, self.tdo]);
        match self.clock.update(levels[TCK]) {
            Some(Edge::Rising) => self.rising(levels[TMS], levels[TDI]),
            Some(Edge::Falling) => {
                self.tdo = self
                    .state
                    .shifting()
                    .then_some(self.shreg & 1 == 1);
                bus.resolve([None, None, None, self.tdo]);
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::Builder;
    use crate::jtag::{Command, Sequencer};
    use tickbus_core::iostream::BusOwner;
    use tickbus_core::sim::Bench;

    fn bench() -> Bench<Sequencer> {
        Bench::new(
            Builder::new()
                .frequency(12_000_000)
                .build::<Sequencer>()
                .unwrap(),
        )
    }

    #[test]
    fn five_ones_reset_from_anywhere() {
        let mut state = TapState::ShiftIr;
        for _ in 0..5 {
            state = state.next(true);
        }
        assert_eq!(state, TapState::TestLogicReset);
    }

    #[test]
    fn idcode_after_reset() {
        let mut tap = JtagTap::new(0x4ba0_0477);
        let mut bench = bench();
        bench.source.extend([
            Command::Reset,
            Command::GetDr {
                size: 32,
                data: 0xffff_ffff,
            },
        ]);
        let words = bench.collect(1, 10_000, |sequencer| tap.respond(sequencer.bus_mut()));
        assert_eq!(words, vec![0x4ba0_0477]);
        bench.run(50, |sequencer| tap.respond(sequencer.bus_mut()));
        assert_eq!(tap.state(), TapState::UpdateDr);
    }

    #[test]
    fn instruction_capture_and_bypass() {
        let mut tap = JtagTap::new(0x4ba0_0477);
        let mut bench = bench();
        bench.source.extend([
            Command::Reset,
            Command::GetIr {
                size: 4,
                data: u32::from(BYPASS),
            },
            Command::GetDr {
                size: 8,
                data: 0xa5,
            },
        ]);
        let words = bench.collect(2, 10_000, |sequencer| tap.respond(sequencer.bus_mut()));
        assert_eq!(words, vec![IR_CAPTURE as u32, 0x4a]);
        assert_eq!(tap.ir(), BYPASS);
    }

    #[test]
    fn user_register_round_trip() {
        let mut tap = JtagTap::new(0);
        let mut bench = bench();
        bench.source.extend([
            Command::Reset,
            Command::SetIr {
                size: 4,
                data: u32::from(USER),
            },
            Command::SetDr {
                size: 32,
                data: 0xcafe_f00d,
            },
            Command::RunTest { cycles: 8 },
            Command::GetDr { size: 32, data: 0 },
        ]);
        let words = bench.collect(1, 10_000, |sequencer| tap.respond(sequencer.bus_mut()));
        assert_eq!(words, vec![0xcafe_f00d]);
        // the shifted zeros are latched once the TAP passes Update-DR
        bench.run(50, |sequencer| tap.respond(sequencer.bus_mut()));
        assert_eq!(tap.state(), TapState::UpdateDr);
        assert_eq!(tap.user(), 0);
    }
}
