//! # tickbus core
//!
//! Building blocks for cycle-accurate models of debug and management probes.
//!
//! The model is synchronous: every engine is a [`Component`](stream::Component) that is
//! evaluated once per global tick in a forward, a backward and a commit phase. Engines talk to
//! each other through valid/ready [`Stream`](stream::Stream)s and to the outside world through
//! a [`Bus`](bus::Bus) of tri-state wires.
//!
//! - [`stream`]: handshakes, the component model, buffers and queues
//! - [`clock`]: the programmable clock divisor shared by all line engines
//! - [`bus`] and [`pins`]: tri-state wires and their physical pin assignment
//! - [`iostream`]: turns a stream of pin frames into pin levels and samples
//! - [`sim`]: a source/sink harness for driving components in tests
//!
//! ```
//! use tickbus_core::sim::Bench;
//! use tickbus_core::stream::Queue;
//!
//! let mut bench = Bench::new(Queue::<u8>::new(4));
//! bench.source.extend([1, 2, 3]);
//! assert_eq!(bench.collect(3, 16, |_| {}), vec![1, 2, 3]);
//! ```
pub mod bus;
pub mod clock;
mod error;
pub mod iostream;
pub mod pins;
pub mod sim;
pub mod stream;

pub use error::{ClockError, PinError};
