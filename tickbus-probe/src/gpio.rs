//! Eight general purpose pins behind a byte protocol.
//!
//! | opcode | arguments                    | answer            |
//! |--------|------------------------------|-------------------|
//! | `0x00` | output levels, output enables | `0x00`            |
//! | `0x01` | -                            | the sampled pins  |
//!
//! Bit `n` of every byte refers to pin `n`. Levels are driven through an IO streamer, so a
//! read observes the pins one tick after the frame that requested it.
use crate::config::{Config, Configure};
use crate::error::ProbeError;
use crate::host::Outbox;
use tickbus_core::bus::{Bus, Drive};
use tickbus_core::iostream::{BusOwner, Frame, IoStreamer};
use tickbus_core::stream::{Component, Pipe, Stream};

pub const PINS: usize = 8;

pub const SET: u8 = 0x00;
pub const GET: u8 = 0x01;

pub fn bus() -> Bus<PINS> {
    Bus::new([
        "gpio0", "gpio1", "gpio2", "gpio3", "gpio4", "gpio5", "gpio6", "gpio7",
    ])
}

/// Drives of all pins from a level and an output enable mask.
pub fn drives(o: u8, oe: u8) -> [Drive; PINS] {
    std::array::from_fn(|pin| Drive {
        o: o >> pin & 1 == 1,
        oe: oe >> pin & 1 == 1,
    })
}

/// Packs pin levels into a byte, pin 0 in bit 0.
pub fn pack(levels: &[bool; PINS]) -> u8 {
    levels
        .iter()
        .enumerate()
        .fold(0, |byte, (pin, level)| byte | (*level as u8) << pin)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Opcode,
    Levels,
    Enables { o: u8 },
}

#[derive(Debug)]
pub struct Gpio {
    pub i: Stream<u8>,
    pub o: Stream<u8>,
    streamer: IoStreamer<PINS, ()>,
    port: [Drive; PINS],
    phase: Phase,
    pending: Option<Frame<PINS, ()>>,
    outbox: Outbox,
}

impl Gpio {
    /// All pins start released.
    pub fn new(bus: Bus<PINS>) -> Gpio {
        let port = [Drive::RELEASED; PINS];
        Gpio {
            i: Stream::default(),
            o: Stream::default(),
            streamer: IoStreamer::new(bus, port),
            port,
            phase: Phase::Opcode,
            pending: None,
            outbox: Outbox::default(),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.phase == Phase::Opcode && self.pending.is_none() && self.outbox.is_empty()
    }

    fn take_byte(&mut self, byte: u8) {
        self.phase = match self.phase {
            Phase::Opcode if byte == SET => Phase::Levels,
            Phase::Opcode if byte == GET => {
                self.pending = Some(Frame {
                    port: self.port,
                    i_en: true,
                    meta: (),
                });
                Phase::Opcode
            }
            Phase::Opcode => {
                log::warn!("GPIO: ignoring unknown opcode {:02x}", byte);
                Phase::Opcode
            }
            Phase::Levels => Phase::Enables { o: byte },
            Phase::Enables { o } => {
                log::debug!("GPIO: o={:08b} oe={:08b}", o, byte);
                self.port = drives(o, byte);
                self.pending = Some(Frame {
                    port: self.port,
                    i_en: false,
                    meta: (),
                });
                Phase::Opcode
            }
        };
    }
}

impl BusOwner<PINS> for Gpio {
    fn bus(&self) -> &Bus<PINS> {
        self.streamer.bus()
    }

    fn bus_mut(&mut self) -> &mut Bus<PINS> {
        self.streamer.bus_mut()
    }
}

impl Component for Gpio {
    fn forward(&mut self) {
        match self.pending {
            Some(frame) => self.streamer.i.offer(frame),
            None => self.streamer.i.withdraw(),
        }
        self.streamer.forward();
        self.outbox.offer(&mut self.o);
    }

    fn backward(&mut self) {
        self.streamer.o.ready = self.outbox.is_empty();
        self.streamer.backward();
        self.i.ready = self.pending.is_none();
    }

    fn commit(&mut self) {
        let issued = self.streamer.i.fire().then_some(self.streamer.i.payload);
        let sample = self.streamer.o.fire().then_some(self.streamer.o.payload);
        self.streamer.commit();
        self.outbox.commit(&self.o);

        // a sample always belongs to an earlier frame than the one issued now
        if let Some(sample) = sample {
            self.outbox.push(&[pack(&sample.port)]);
        }
        if let Some(frame) = issued {
            self.pending = None;
            if !frame.i_en {
                self.outbox.push(&[0x00]);
            }
        }
        if self.i.fire() {
            self.take_byte(self.i.payload);
        }
    }
}

impl Pipe for Gpio {
    type In = u8;
    type Out = u8;

    fn input(&mut self) -> &mut Stream<u8> {
        &mut self.i
    }

    fn output(&mut self) -> &mut Stream<u8> {
        &mut self.o
    }
}

impl Configure for Gpio {
    fn configure(config: &Config) -> Result<Self, ProbeError> {
        Ok(Gpio::new(config.bind(bus())?))
    }
}
