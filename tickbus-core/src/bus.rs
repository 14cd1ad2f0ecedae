//! Tri-state pins shared between the host engine and a simulated target.
use crate::error::PinError;
use crate::pins::{Pin, PinMap};

/// Host side drive of a single tri-state pin.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Drive {
    pub o: bool,
    pub oe: bool,
}

impl Drive {
    pub const RELEASED: Drive = Drive { o: false, oe: false };
    pub const HIGH: Drive = Drive { o: true, oe: true };
    pub const LOW: Drive = Drive { o: false, oe: true };

    pub fn level(value: bool) -> Drive {
        Drive { o: value, oe: true }
    }

    /// Open-drain drive: a low level pulls the line, a high level releases it.
    pub fn open_drain(value: bool) -> Drive {
        Drive { o: false, oe: !value }
    }
}

/// Level a line settles at when nobody drives it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Pull {
    /// Keeps the last resolved level.
    #[default]
    Floating,
    Up,
    Down,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Wire {
    pub name: &'static str,
    pub drive: Drive,
    pub pull: Pull,
    pub pin: Option<Pin>,
    level: bool,
}

impl Wire {
    pub fn new(name: &'static str) -> Wire {
        Wire {
            name,
            drive: Drive::RELEASED,
            pull: Pull::Floating,
            pin: None,
            level: false,
        }
    }

    /// Level the line settled at during the last [`resolve`](Wire::resolve).
    pub fn level(&self) -> bool {
        self.level
    }

    /// The level the host drives, if any.
    pub fn host_level(&self) -> Option<bool> {
        self.drive.oe.then_some(self.drive.o)
    }

    /// Settles the line given what the target drives.
    ///
    /// Host and target driving opposite levels is contention; it is reported and resolved
    /// as wired-AND.
    pub fn resolve(&mut self, target: Option<bool>) -> bool {
        self.level = match (self.host_level(), target) {
            (Some(host), Some(target)) if host != target => {
                log::warn!(
                    "Contention on {}: host drives {}, target drives {}",
                    self.name,
                    host as u8,
                    target as u8
                );
                host && target
            }
            (Some(host), _) => host,
            (None, Some(target)) => target,
            (None, None) => match self.pull {
                Pull::Up => true,
                Pull::Down => false,
                Pull::Floating => self.level,
            },
        };
        self.level
    }
}

/// A fixed set of `N` wires, addressed by index.
#[derive(Clone, Debug)]
pub struct Bus<const N: usize> {
    wires: [Wire; N],
}

impl<const N: usize> Bus<N> {
    pub fn new(names: [&'static str; N]) -> Bus<N> {
        Bus {
            wires: names.map(Wire::new),
        }
    }

    pub fn with_pull(mut self, index: usize, pull: Pull) -> Bus<N> {
        self.wires[index].pull = pull;
        self
    }

    /// Binds each wire to the physical pin assigned to its name.
    pub fn bind(&mut self, pins: &PinMap) -> Result<(), PinError> {
        for wire in self.wires.iter_mut() {
            let pin = pins.require(wire.name)?;
            log::debug!("Bound {} to pin {}", wire.name, pin);
            wire.pin = Some(pin);
        }
        Ok(())
    }

    pub fn wire(&self, index: usize) -> &Wire {
        &self.wires[index]
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.wires.iter().position(|wire| wire.name == name)
    }

    pub fn drive(&mut self, port: &[Drive; N]) {
        for (wire, drive) in self.wires.iter_mut().zip(port.iter()) {
            wire.drive = *drive;
        }
    }

    pub fn drives(&self) -> [Drive; N] {
        std::array::from_fn(|index| self.wires[index].drive)
    }

    pub fn host_level(&self, index: usize) -> Option<bool> {
        self.wires[index].host_level()
    }

    pub fn level(&self, index: usize) -> bool {
        self.wires[index].level()
    }

    /// Last resolved level of every wire.
    pub fn inputs(&self) -> [bool; N] {
        std::array::from_fn(|index| self.wires[index].level())
    }

    pub fn resolve(&mut self, targets: [Option<bool>; N]) -> [bool; N] {
        std::array::from_fn(|index| self.wires[index].resolve(targets[index]))
    }

    /// Resolves every wire without any target attached.
    pub fn settle(&mut self) -> [bool; N] {
        self.resolve([None; N])
    }
}

/// Two-flop synchroniser for asynchronous inputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Synchronizer {
    stages: [bool; 2],
}

impl Synchronizer {
    pub fn new(init: bool) -> Synchronizer {
        Synchronizer {
            stages: [init; 2],
        }
    }

    pub fn output(&self) -> bool {
        self.stages[1]
    }

    pub fn commit(&mut self, input: bool) {
        self.stages[1] = self.stages[0];
        self.stages[0] = input;
    }
}
