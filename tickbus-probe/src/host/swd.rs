//! SWD command bytes.
//!
//! A command byte carries the command in bits 5 and 6 and its argument in bits 0 to 4:
//!
//! | command    | code   | argument                                 | followed by    |
//! |------------|--------|------------------------------------------|----------------|
//! | `Transfer` | `0x00` | bit 0 APnDP, bit 1 RnW, bits 2..4 `A[3:2]` | LE word if RnW is clear |
//! | `Sequence` | `0x20` | number of bits, 0 meaning 32             | LE word        |
//! | `Reset`    | `0x40` | -                                        | -              |
//!
//! Every transfer is answered with a response byte holding the acknowledgement in bits 0 to 2
//! and the response kind in bits 4 and 5 (`Data=0x00`, `NoData=0x10`, `Error=0x20`). A `Data`
//! response is followed by the read word, little endian.
use crate::config::{Config, Configure};
use crate::error::ProbeError;
use crate::host::Outbox;
use crate::swd::{Command, Controller, Header, Reply, Response};
use tickbus_core::bus::Bus;
use tickbus_core::iostream::BusOwner;
use tickbus_core::stream::{Component, Pipe, Stream};

const CMD_MASK: u8 = 0x60;
const ARG_MASK: u8 = 0x1f;

pub const TRANSFER: u8 = 0x00;
pub const SEQUENCE: u8 = 0x20;
pub const RESET: u8 = 0x40;

/// What a command byte asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decoded {
    /// Ready to execute.
    Complete(Command),
    /// The data word still has to follow.
    NeedsWord(Command),
}

pub fn decode(byte: u8) -> Option<Decoded> {
    let arg = byte & ARG_MASK;
    match byte & CMD_MASK {
        TRANSFER => {
            let header = Header::new(arg & 1 == 1, arg & 2 == 2, arg >> 2);
            let command = Command::Transfer { header, data: 0 };
            Some(if header.r_nw {
                Decoded::Complete(command)
            } else {
                Decoded::NeedsWord(command)
            })
        }
        SEQUENCE => {
            let len = if arg == 0 { 32 } else { arg };
            Some(Decoded::NeedsWord(Command::Sequence { len, data: 0 }))
        }
        RESET => Some(Decoded::Complete(Command::Reset)),
        _ => None,
    }
}

/// The command byte that `decode` maps back to `command`.
pub fn encode(command: &Command) -> u8 {
    match command {
        Command::Transfer { header, .. } => {
            TRANSFER | header.ap_ndp as u8 | (header.r_nw as u8) << 1 | header.addr << 2
        }
        Command::Sequence { len, .. } => SEQUENCE | (len & ARG_MASK),
        Command::Reset => RESET,
    }
}

fn with_data(command: Command, word: u32) -> Command {
    match command {
        Command::Transfer { header, .. } => Command::Transfer { header, data: word },
        Command::Sequence { len, .. } => Command::Sequence { len, data: word },
        Command::Reset => Command::Reset,
    }
}

/// Serialises a reply for the host.
pub fn reply_bytes(reply: &Reply) -> Vec<u8> {
    let rsp = match reply.rsp {
        Response::Data => 0x00,
        Response::NoData => 0x10,
        Response::Error => 0x20,
    };
    let mut bytes = vec![rsp | (reply.ack & 0b111)];
    if reply.rsp == Response::Data {
        bytes.extend(reply.data.to_le_bytes());
    }
    bytes
}

/// Host byte front end of an SWD [`Controller`].
#[derive(Debug)]
pub struct SwdBridge {
    pub i: Stream<u8>,
    pub o: Stream<u8>,
    controller: Controller,
    /// Command waiting for its data word and the number of word bytes received.
    partial: Option<(Command, usize, u32)>,
    pending: Option<Command>,
    outbox: Outbox,
}

impl SwdBridge {
    pub fn new(controller: Controller) -> SwdBridge {
        SwdBridge {
            i: Stream::default(),
            o: Stream::default(),
            controller,
            partial: None,
            pending: None,
            outbox: Outbox::default(),
        }
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut Controller {
        &mut self.controller
    }

    pub fn is_idle(&self) -> bool {
        self.partial.is_none()
            && self.pending.is_none()
            && self.controller.is_idle()
            && self.outbox.is_empty()
    }

    fn take_byte(&mut self, byte: u8) {
        if let Some((command, received, word)) = self.partial.take() {
            let word = word | u32::from(byte) << (8 * received);
            if received == 3 {
                self.pending = Some(with_data(command, word));
            } else {
                self.partial = Some((command, received + 1, word));
            }
            return;
        }
        match decode(byte) {
            Some(Decoded::Complete(command)) => self.pending = Some(command),
            Some(Decoded::NeedsWord(command)) => self.partial = Some((command, 0, 0)),
            None => log::warn!("SWD: ignoring unknown command byte {:02x}", byte),
        }
    }
}

impl BusOwner<2> for SwdBridge {
    fn bus(&self) -> &Bus<2> {
        self.controller.bus()
    }

    fn bus_mut(&mut self) -> &mut Bus<2> {
        self.controller.bus_mut()
    }
}

impl Component for SwdBridge {
    fn forward(&mut self) {
        match self.pending {
            Some(command) => self.controller.i.offer(command),
            None => self.controller.i.withdraw(),
        }
        self.controller.forward();
        self.outbox.offer(&mut self.o);
    }

    fn backward(&mut self) {
        self.controller.o.ready = self.outbox.is_empty();
        self.controller.backward();
        self.i.ready = self.pending.is_none();
    }

    fn commit(&mut self) {
        let consumed = self.controller.i.fire();
        let reply = self
            .controller
            .o
            .fire()
            .then_some(self.controller.o.payload);
        self.controller.commit();
        self.outbox.commit(&self.o);

        if consumed {
            self.pending = None;
        }
        if let Some(reply) = reply {
            self.outbox.push(&reply_bytes(&reply));
        }
        if self.i.fire() {
            self.take_byte(self.i.payload);
        }
    }
}

impl Pipe for SwdBridge {
    type In = u8;
    type Out = u8;

    fn input(&mut self) -> &mut Stream<u8> {
        &mut self.i
    }

    fn output(&mut self) -> &mut Stream<u8> {
        &mut self.o
    }
}

impl Configure for SwdBridge {
    fn configure(config: &Config) -> Result<Self, ProbeError> {
        Ok(SwdBridge::new(Controller::configure(config)?))
    }
}
