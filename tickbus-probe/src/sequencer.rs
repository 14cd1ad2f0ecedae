//! Translation between protocol words and per-tick pin states.
//!
//! An [`Enframer`] walks every accepted word through `2 * len` clock phases. Even phases drive
//! the clock low and present the next data bit, odd phases drive the clock high. Each phase
//! lasts `divisor + 1` ticks, and one [`Frame`] is issued per tick so the pins stay under the
//! control of the word being shifted. Frames that should be sampled carry `i_en` and the word's
//! metadata; the [`Deframer`] accumulates the sampled bits and asks its [`Deframe`] rule when a
//! word is complete. Neither side re-derives what the other knows: the metadata rides along
//! with the frames.
use std::fmt::Debug;

use tickbus_core::bus::{Bus, Drive};
use tickbus_core::clock::HalfCycleTimer;
use tickbus_core::iostream::{BusOwner, Frame, IoStreamer, Sample};
use tickbus_core::stream::{Component, Pipe, Stream, connect_backward, connect_forward};

/// Describes how a word is shifted onto `N` pins.
pub trait Template<const N: usize>: Copy + Default {
    type Meta: Copy + Default + Debug;

    /// Number of bits in the word. Must be at least one.
    fn len(&self) -> usize;

    /// Drive of every pin while `bit` is shifted. The clock pin entry is ignored.
    fn drive(&self, bit: usize) -> [Drive; N];

    /// Whether the line is sampled on the rising clock edge of `bit`.
    fn capture(&self, bit: usize) -> bool;

    fn meta(&self, bit: usize) -> Self::Meta;
}

#[derive(Debug)]
pub struct Enframer<W: Template<N>, const N: usize> {
    pub i: Stream<W>,
    pub o: Stream<Frame<N, W::Meta>>,
    clock_pin: usize,
    divisor: u16,
    timer: HalfCycleTimer,
    phase: usize,
}

impl<W: Template<N>, const N: usize> Enframer<W, N> {
    pub fn new(clock_pin: usize, divisor: u16) -> Enframer<W, N> {
        Enframer {
            i: Stream::default(),
            o: Stream::default(),
            clock_pin,
            divisor,
            timer: HalfCycleTimer::default(),
            phase: 0,
        }
    }

    /// Takes effect at the start of the next half-cycle.
    pub fn set_divisor(&mut self, divisor: u16) {
        self.divisor = divisor;
    }

    pub fn divisor(&self) -> u16 {
        self.divisor
    }

    fn last_phase(&self) -> usize {
        2 * self.i.payload.len().max(1) - 1
    }
}

impl<W: Template<N>, const N: usize> Component for Enframer<W, N> {
    fn forward(&mut self) {
        if !self.i.valid {
            self.o.withdraw();
            return;
        }
        let word = self.i.payload;
        let bit = self.phase / 2;
        let high = self.phase % 2 == 1;
        let mut port = word.drive(bit);
        port[self.clock_pin] = Drive::level(high);
        self.o.offer(Frame {
            port,
            i_en: word.capture(bit) && high && self.timer.at_start(),
            meta: word.meta(bit),
        });
    }

    fn backward(&mut self) {
        self.i.ready = self.o.ready
            && self.timer.expired(self.divisor)
            && self.phase == self.last_phase();
    }

    fn commit(&mut self) {
        if !self.o.fire() {
            return;
        }
        if self.timer.expired(self.divisor) {
            self.phase = if self.phase == self.last_phase() {
                0
            } else {
                self.phase + 1
            };
        }
        self.timer.advance(self.divisor);
    }
}

/// Rule collecting the sampled bits of one word into a result.
pub trait Deframe<const N: usize> {
    type Meta: Copy + Default + Debug;
    type Output: Copy + Default + Debug;

    /// Index of the sampled pin.
    fn pin(&self) -> usize;

    /// Whether `count` samples complete a word of kind `meta`.
    fn complete(&self, meta: &Self::Meta, count: usize) -> bool;

    /// Builds the result from the bits sampled so far, first sample in bit 0.
    fn result(&self, meta: &Self::Meta, value: u128, count: usize) -> Self::Output;
}

#[derive(Debug)]
pub struct Deframer<D: Deframe<N>, const N: usize> {
    pub i: Stream<Sample<N, D::Meta>>,
    pub o: Stream<D::Output>,
    rule: D,
    value: u128,
    count: usize,
    result: Option<D::Output>,
}

impl<D: Deframe<N>, const N: usize> Deframer<D, N> {
    pub fn new(rule: D) -> Deframer<D, N> {
        Deframer {
            i: Stream::default(),
            o: Stream::default(),
            rule,
            value: 0,
            count: 0,
            result: None,
        }
    }
}

impl<D: Deframe<N>, const N: usize> Component for Deframer<D, N> {
    fn forward(&mut self) {
        match self.result {
            Some(result) => self.o.offer(result),
            None => self.o.withdraw(),
        }
    }

    fn backward(&mut self) {
        self.i.ready = self.result.is_none() || self.o.ready;
    }

    fn commit(&mut self) {
        if self.o.fire() {
            self.result = None;
        }
        if !self.i.fire() {
            return;
        }
        let sample = self.i.payload;
        if sample.port[self.rule.pin()] && self.count < 128 {
            self.value |= 1u128 << self.count;
        }
        self.count += 1;
        if self.rule.complete(&sample.meta, self.count) {
            self.result = Some(self.rule.result(&sample.meta, self.value, self.count));
            self.value = 0;
            self.count = 0;
        }
    }
}

/// Enframer, IO streamer and deframer of one line protocol, chained.
#[derive(Debug)]
pub struct LineDriver<W, D, const N: usize>
where
    W: Template<N>,
    D: Deframe<N, Meta = W::Meta>,
{
    enframer: Enframer<W, N>,
    streamer: IoStreamer<N, W::Meta>,
    deframer: Deframer<D, N>,
}

impl<W, D, const N: usize> LineDriver<W, D, N>
where
    W: Template<N>,
    D: Deframe<N, Meta = W::Meta>,
{
    /// `init` is driven until the first word is shifted.
    pub fn new(
        bus: Bus<N>,
        init: [Drive; N],
        clock_pin: usize,
        divisor: u16,
        rule: D,
    ) -> LineDriver<W, D, N> {
        LineDriver {
            enframer: Enframer::new(clock_pin, divisor),
            streamer: IoStreamer::new(bus, init),
            deframer: Deframer::new(rule),
        }
    }

    pub fn set_divisor(&mut self, divisor: u16) {
        self.enframer.set_divisor(divisor);
    }

    pub fn divisor(&self) -> u16 {
        self.enframer.divisor()
    }
}

impl<W, D, const N: usize> BusOwner<N> for LineDriver<W, D, N>
where
    W: Template<N>,
    D: Deframe<N, Meta = W::Meta>,
{
    fn bus(&self) -> &Bus<N> {
        self.streamer.bus()
    }

    fn bus_mut(&mut self) -> &mut Bus<N> {
        self.streamer.bus_mut()
    }
}

impl<W, D, const N: usize> Component for LineDriver<W, D, N>
where
    W: Template<N>,
    D: Deframe<N, Meta = W::Meta>,
{
    fn forward(&mut self) {
        self.enframer.forward();
        connect_forward(&self.enframer.o, &mut self.streamer.i);
        self.streamer.forward();
        connect_forward(&self.streamer.o, &mut self.deframer.i);
        self.deframer.forward();
    }

    fn backward(&mut self) {
        self.deframer.backward();
        connect_backward(&self.deframer.i, &mut self.streamer.o);
        self.streamer.backward();
        connect_backward(&self.streamer.i, &mut self.enframer.o);
        self.enframer.backward();
    }

    fn commit(&mut self) {
        self.enframer.commit();
        self.streamer.commit();
        self.deframer.commit();
    }
}

impl<W, D, const N: usize> Pipe for LineDriver<W, D, N>
where
    W: Template<N>,
    D: Deframe<N, Meta = W::Meta>,
{
    type In = W;
    type Out = D::Output;

    fn input(&mut self) -> &mut Stream<W> {
        &mut self.enframer.i
    }

    fn output(&mut self) -> &mut Stream<D::Output> {
        &mut self.deframer.o
    }
}

/// Parity of `value`: true for an odd number of set bits.
pub fn parity(value: u32) -> bool {
    value.count_ones() % 2 == 1
}

#[cfg(test)]
mod test {
    use super::*;
    use tickbus_core::sim::Bench;

    /// A byte shifted LSB first on pin 1, sampled back on every bit.
    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    struct Byte(u8);

    impl Template<2> for Byte {
        type Meta = ();

        fn len(&self) -> usize {
            8
        }

        fn drive(&self, bit: usize) -> [Drive; 2] {
            [Drive::RELEASED, Drive::level(self.0 >> bit & 1 == 1)]
        }

        fn capture(&self, _bit: usize) -> bool {
            true
        }

        fn meta(&self, _bit: usize) {}
    }

    #[derive(Debug)]
    struct Loopback;

    impl Deframe<2> for Loopback {
        type Meta = ();
        type Output = u8;

        fn pin(&self) -> usize {
            1
        }

        fn complete(&self, _meta: &(), count: usize) -> bool {
            count == 8
        }

        fn result(&self, _meta: &(), value: u128, _count: usize) -> u8 {
            value as u8
        }
    }

    fn driver(divisor: u16) -> LineDriver<Byte, Loopback, 2> {
        LineDriver::new(
            Bus::new(["clk", "data"]),
            [Drive::HIGH, Drive::HIGH],
            0,
            divisor,
            Loopback,
        )
    }

    fn settle(driver: &mut LineDriver<Byte, Loopback, 2>) {
        driver.bus_mut().settle();
    }

    #[test]
    fn loopback_bytes() {
        for divisor in [0, 1, 4] {
            let mut bench = Bench::new(driver(divisor));
            bench.source.extend([0xa5, 0x00, 0xff, 0x3c].map(Byte));
            let bytes = bench.collect(4, 1_000, settle);
            assert_eq!(bytes, vec![0xa5, 0x00, 0xff, 0x3c], "divisor {}", divisor);
        }
    }

    #[test]
    fn phases_last_divisor_plus_one_ticks() {
        let mut bench = Bench::new(driver(3));
        bench.source.push(Byte(0));
        let mut clock = Vec::new();
        bench.run(64, |driver| {
            settle(driver);
            clock.push(driver.bus().level(0));
        });
        assert_eq!(bench.source.sent(), 1);
        // 16 phases of 4 ticks each, starting low
        let rising: Vec<_> = (1..clock.len())
            .filter(|&tick| clock[tick] && !clock[tick - 1])
            .collect();
        assert_eq!(rising.len(), 8);
        assert!(rising.windows(2).all(|pair| pair[1] - pair[0] == 8));
    }

    #[test]
    fn word_accepted_once_per_sequence() {
        let mut bench = Bench::new(driver(0));
        bench.source.extend([Byte(1), Byte(2)]);
        bench.run(16, settle);
        assert_eq!(bench.source.sent(), 1);
        bench.run(16, settle);
        assert_eq!(bench.source.sent(), 2);
    }

    #[test]
    fn stalled_results_are_kept() {
        let mut bench = Bench::new(driver(0));
        bench.source.extend((0..6).map(Byte));
        bench.sink.ready_every(40);
        let bytes = bench.collect(6, 2_000, settle);
        assert_eq!(bytes, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn parity_counts_ones() {
        assert!(!parity(0));
        assert!(parity(0x12345678 >> 28));
        assert!(parity(0x0000_0007));
        assert!(!parity(0xffff_ffff));
    }
}
