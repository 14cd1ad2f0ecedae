//! Runs an engine against a simulated target until it is done.
use std::{error::Error, fmt::Display};
use tickbus_core::iostream::BusOwner;
use tickbus_core::sim::Bench;
use tickbus_core::stream::Pipe;
use tickbus_probe::target::Target;

/// Upper bound on the length of any scenario.
pub const TICK_LIMIT: u64 = 10_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stalled {
    pub ticks: u64,
    pub received: usize,
}

impl Display for Stalled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Engine did not finish within {} ticks ({} words received)",
            self.ticks, self.received
        )
    }
}

impl Error for Stalled {}

/// Feeds `input` into `dut` and ticks it against `target` until `done` holds.
/// Returns every word the engine produced.
pub fn run<D, T, const N: usize>(
    dut: D,
    target: &mut T,
    input: impl IntoIterator<Item = D::In>,
    done: impl FnMut(&Bench<D>) -> bool,
) -> Result<Vec<D::Out>, Stalled>
where
    D: Pipe + BusOwner<N>,
    T: Target<N>,
{
    let mut bench = Bench::new(dut);
    bench.source.extend(input);
    let finished = bench.run_until(TICK_LIMIT, |dut| target.respond(dut.bus_mut()), done);
    log::debug!("Scenario took {} ticks", bench.ticks());
    if !finished {
        return Err(Stalled {
            ticks: bench.ticks(),
            received: bench.sink.received().len(),
        });
    }
    Ok(bench.sink.take())
}

/// Done once `count` words were received.
pub fn answers<D: Pipe>(count: usize) -> impl FnMut(&Bench<D>) -> bool {
    move |bench| bench.sink.received().len() >= count
}
