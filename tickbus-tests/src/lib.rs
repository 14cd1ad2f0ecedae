//! Shared fixtures of the end-to-end scenarios under `tests/`.
use crc::{CRC_16_IBM_SDLC, CRC_32_ISO_HDLC, Crc};
use tickbus_core::iostream::BusOwner;
use tickbus_core::sim::Bench;
use tickbus_core::stream::Pipe;
use tickbus_probe::config::Builder;
use tickbus_probe::target::Target;

pub static CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_SDLC);
pub static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Ticks after which a scenario is considered stuck.
pub const LIMIT: u64 = 200_000;

/// A builder at a line clock fast enough to keep scenarios short.
pub fn fast() -> Builder {
    Builder::new().frequency(12_000_000)
}

/// Ticks `bench` against `target` until `count` words arrived, returning them.
pub fn exchange<D, T, const N: usize>(
    bench: &mut Bench<D>,
    target: &mut T,
    count: usize,
) -> Vec<D::Out>
where
    D: Pipe + BusOwner<N>,
    T: Target<N>,
{
    bench.collect(count, LIMIT, |dut| target.respond(dut.bus_mut()))
}

/// Ticks `bench` against `target` for `ticks` without looking at the output.
pub fn idle<D, T, const N: usize>(bench: &mut Bench<D>, target: &mut T, ticks: u64)
where
    D: Pipe + BusOwner<N>,
    T: Target<N>,
{
    bench.run(ticks, |dut| target.respond(dut.bus_mut()));
}
