//! Behavioural models of devices on the far side of a bus.
//!
//! A target is ticked once per tick after the engine has committed its pin drives. It
//! resolves the bus with whatever it drives itself, so the levels the engine samples on the
//! next tick already include the target's response.
pub mod i2c;
pub mod jtag;
pub mod mdio;
pub mod swd;

use tickbus_core::bus::Bus;

pub trait Target<const N: usize> {
    fn respond(&mut self, bus: &mut Bus<N>);
}

/// Tracks one clock wire across ticks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Edges {
    last: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Edge {
    Rising,
    Falling,
}

impl Edges {
    pub(crate) fn new(idle: bool) -> Edges {
        Edges { last: idle }
    }

    pub(crate) fn update(&mut self, level: bool) -> Option<Edge> {
        let edge = match (self.last, level) {
            (false, true) => Some(Edge::Rising),
            (true, false) => Some(Edge::Falling),
            _ => None,
        };
        self.last = level;
        edge
    }
}
