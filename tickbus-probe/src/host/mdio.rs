//! MDIO host bytes.
//!
//! Every transaction starts with a little endian 16-bit header: bit 0 selects a write, bits 1
//! to 5 hold the PHY address and bits 6 to 10 the register. A write is followed by the 16-bit
//! data word, little endian, and is not answered. A read is answered with the register
//! contents, little endian.
use crate::config::{Config, Configure};
use crate::error::ProbeError;
use crate::host::Outbox;
use crate::mdio::{Controller, Transaction};
use tickbus_core::bus::Bus;
use tickbus_core::iostream::BusOwner;
use tickbus_core::stream::{Component, Pipe, Stream};

pub fn header(transaction: &Transaction) -> u16 {
    transaction.write as u16
        | u16::from(transaction.phy & 0x1f) << 1
        | u16::from(transaction.reg & 0x1f) << 6
}

pub fn from_header(header: u16) -> Transaction {
    let phy = (header >> 1 & 0x1f) as u8;
    let reg = (header >> 6 & 0x1f) as u8;
    if header & 1 == 1 {
        Transaction::write(phy, reg, 0)
    } else {
        Transaction::read(phy, reg)
    }
}

/// Host byte front end of an MDIO [`Controller`].
#[derive(Debug)]
pub struct MdioBridge {
    pub i: Stream<u8>,
    pub o: Stream<u8>,
    controller: Controller,
    received: Vec<u8>,
    pending: Option<Transaction>,
    outbox: Outbox,
}

impl MdioBridge {
    pub fn new(controller: Controller) -> MdioBridge {
        MdioBridge {
            i: Stream::default(),
            o: Stream::default(),
            controller,
            received: Vec::with_capacity(4),
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

    fn take_byte(&mut self, byte: u8) {
        self.received.push(byte);
        let [low, high, data @ ..] = self.received.as_slice() else {
            return;
        };
        let transaction = from_header(u16::from_le_bytes([*low, *high]));
        let transaction = match (transaction.write, data) {
            (false, _) => transaction,
            (true, [low, high]) => Transaction {
                data: u16::from_le_bytes([*low, *high]),
                ..transaction
            },
            (true, _) => return,
        };
        self.pending = Some(transaction);
        self.received.clear();
    }

    pub fn is_idle(&self) -> bool {
        self.received.is_empty() && self.pending.is_none() && self.outbox.is_empty()
    }
}

impl BusOwner<2> for MdioBridge {
    fn bus(&self) -> &Bus<2> {
        self.controller.bus()
    }

    fn bus_mut(&mut self) -> &mut Bus<2> {
        self.controller.bus_mut()
    }
}

impl Component for MdioBridge {
    fn forward(&mut self) {
        match self.pending {
            Some(transaction) => self.controller.input().offer(transaction),
            None => self.controller.input().withdraw(),
        }
        self.controller.forward();
        self.outbox.offer(&mut self.o);
    }

    fn backward(&mut self) {
        self.controller.output().ready = self.outbox.is_empty();
        self.controller.backward();
        self.i.ready = self.pending.is_none();
    }

    fn commit(&mut self) {
        let issued = self.controller.input().fire();
        let word = self
            .controller
            .output()
            .fire()
            .then(|| self.controller.output().payload);
        self.controller.commit();
        self.outbox.commit(&self.o);

        if issued {
            self.pending = None;
        }
        if let Some(word) = word {
            self.outbox.push(&word.to_le_bytes());
        }
        if self.i.fire() {
            self.take_byte(self.i.payload);
        }
    }
}

impl Pipe for MdioBridge {
    type In = u8;
    type Out = u8;

    fn input(&mut self) -> &mut Stream<u8> {
        &mut self.i
    }

    fn output(&mut self) -> &mut Stream<u8> {
        &mut self.o
    }
}

impl Configure for MdioBridge {
    fn configure(config: &Config) -> Result<Self, ProbeError> {
        Ok(MdioBridge::new(Controller::configure(config)?))
    }
}
