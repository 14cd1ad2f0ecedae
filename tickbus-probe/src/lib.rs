//! # tickbus probe
//!
//! Line protocol engines of a debug and management probe, modelled tick by tick.
//!
//! Each engine is a [`Pipe`](tickbus_core::stream::Pipe) that takes protocol level commands on
//! its input, shifts them onto a [`Bus`](tickbus_core::bus::Bus) of tri-state wires and
//! returns responses on its output:
//!
//! - [`swd`]: Serial Wire Debug transfers with `WAIT` retry, the worked transaction
//!   controller on top of the generic [`sequencer`]
//! - [`i2c`]: I2C initiator with clock stretching and its byte protocol
//! - [`mdio`]: Clause 22 management frames
//! - [`jtag`]: TMS/TDI/TDO shifter and a TAP sequencer
//! - [`gpio`]: eight plain pins
//!
//! The [`host`] bridges expose SWD and MDIO as byte streams, and SWD additionally as COBS
//! framed packets; the I2C and GPIO engines speak bytes natively. Behavioural models of the
//! devices on the far side of each bus live in [`target`].
//!
//! Engines are created from a [`config::Config`], usually through the
//! [`config::Builder`]:
//!
//! ```
//! use tickbus_core::iostream::BusOwner;
//! use tickbus_core::sim::Bench;
//! use tickbus_probe::config::Builder;
//! use tickbus_probe::swd::{Command, Controller, Response};
//! use tickbus_probe::target::{Target, swd::SwdTarget};
//!
//! let mut target = SwdTarget::new();
//! target.set_register(false, 0, 0x0bb1_1477);
//!
//! let controller: Controller = Builder::new().frequency(12_000_000).build().unwrap();
//! let mut bench = Bench::new(controller);
//! bench.source.extend([Command::Reset, Command::read(false, 0)]);
//! let replies = bench.collect(1, 10_000, |controller| target.respond(controller.bus_mut()));
//! assert_eq!(replies[0].rsp, Response::Data);
//! assert_eq!(replies[0].data, 0x0bb1_1477);
//! ```
pub mod config;
mod error;
pub mod gpio;
pub mod host;
pub mod i2c;
pub mod jtag;
pub mod mdio;
pub mod sequencer;
pub mod swd;
pub mod target;

pub use error::ProbeError;
