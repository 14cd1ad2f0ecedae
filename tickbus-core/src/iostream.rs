//! Translates a stream of pin frames into pin levels and a stream of pin samples.
//!
//! A frame accepted on tick `t` is driven onto the bus at the end of `t`. If the frame
//! requested a capture, the bus levels are sampled on tick `t + 1` and offered on the
//! output together with the frame's metadata. A skid buffer covers the one tick of latency,
//! so a stalled consumer never loses a sample.
use crate::bus::{Bus, Drive};
use crate::stream::{Component, Pipe, Stream};
use std::collections::VecDeque;

/// Ticks between accepting a frame and sampling its response.
pub const LATENCY: usize = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Frame<const N: usize, M> {
    pub port: [Drive; N],
    /// Sample the bus one tick after this frame was driven.
    pub i_en: bool,
    pub meta: M,
}

impl<const N: usize, M: Default> Default for Frame<N, M> {
    fn default() -> Self {
        Frame {
            port: [Drive::RELEASED; N],
            i_en: false,
            meta: M::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sample<const N: usize, M> {
    pub port: [bool; N],
    pub meta: M,
}

impl<const N: usize, M: Default> Default for Sample<N, M> {
    fn default() -> Self {
        Sample {
            port: [false; N],
            meta: M::default(),
        }
    }
}

/// Gives a simulated target access to the pins of an engine.
pub trait BusOwner<const N: usize> {
    fn bus(&self) -> &Bus<N>;
    fn bus_mut(&mut self) -> &mut Bus<N>;
}

#[derive(Debug)]
pub struct IoStreamer<const N: usize, M> {
    pub i: Stream<Frame<N, M>>,
    pub o: Stream<Sample<N, M>>,
    bus: Bus<N>,
    in_flight: Option<M>,
    sampled: Option<Sample<N, M>>,
    skid: VecDeque<Sample<N, M>>,
}

impl<const N: usize, M: Copy + Default> IoStreamer<N, M> {
    /// `init` is driven until the first frame is accepted.
    pub fn new(mut bus: Bus<N>, init: [Drive; N]) -> IoStreamer<N, M> {
        bus.drive(&init);
        IoStreamer {
            i: Stream::default(),
            o: Stream::default(),
            bus,
            in_flight: None,
            sampled: None,
            skid: VecDeque::with_capacity(LATENCY),
        }
    }
}

impl<const N: usize, M> BusOwner<N> for IoStreamer<N, M> {
    fn bus(&self) -> &Bus<N> {
        &self.bus
    }

    fn bus_mut(&mut self) -> &mut Bus<N> {
        &mut self.bus
    }
}

impl<const N: usize, M: Copy + Default> Component for IoStreamer<N, M> {
    fn forward(&mut self) {
        self.sampled = self.in_flight.map(|meta| Sample {
            port: self.bus.inputs(),
            meta,
        });
        match self.skid.front().copied().or(self.sampled) {
            Some(sample) => self.o.offer(sample),
            None => self.o.withdraw(),
        }
    }

    fn backward(&mut self) {
        self.i.ready = self.o.ready && self.skid.is_empty();
    }

    fn commit(&mut self) {
        let from_skid = !self.skid.is_empty();
        if from_skid && self.o.fire() {
            self.skid.pop_front();
        }
        if let Some(sample) = self.sampled.take() {
            if from_skid || !self.o.ready {
                self.skid.push_back(sample);
            }
        }
        debug_assert!(self.skid.len() <= LATENCY);
        if self.i.fire() {
            let frame = self.i.payload;
            log::trace!("{:?}", frame.port);
            self.bus.drive(&frame.port);
            self.in_flight = frame.i_en.then_some(frame.meta);
        } else {
            self.in_flight = None;
        }
    }
}

impl<const N: usize, M: Copy + Default> Pipe for IoStreamer<N, M> {
    type In = Frame<N, M>;
    type Out = Sample<N, M>;

    fn input(&mut self) -> &mut Stream<Frame<N, M>> {
        &mut self.i
    }

    fn output(&mut self) -> &mut Stream<Sample<N, M>> {
        &mut self.o
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sim::Bench;

    fn frame(level: bool, i_en: bool, meta: u8) -> Frame<1, u8> {
        Frame {
            port: [Drive::level(level)],
            i_en,
            meta,
        }
    }

    /// Loops the driven level back with one tick delay.
    fn loopback(streamer: &mut IoStreamer<1, u8>) {
        streamer.bus_mut().settle();
    }

    #[test]
    fn samples_follow_frames() {
        let mut bench = Bench::new(IoStreamer::new(Bus::new(["d"]), [Drive::LOW]));
        bench
            .source
            .extend([frame(true, true, 1), frame(false, false, 2), frame(false, true, 3)]);
        bench.run(10, loopback);
        let samples: Vec<_> = bench.sink.received().iter().map(|s| (s.port[0], s.meta)).collect();
        assert_eq!(samples, vec![(true, 1), (false, 3)]);
    }

    #[test]
    fn no_sample_lost_under_backpressure() {
        let mut bench = Bench::new(IoStreamer::new(Bus::new(["d"]), [Drive::LOW]));
        bench
            .source
            .extend((0..16).map(|n| frame(n % 3 == 0, true, n)));
        bench.sink.ready_every(3);
        bench.run(200, loopback);
        let samples = bench.sink.received();
        assert_eq!(samples.len(), 16);
        for (n, sample) in samples.iter().enumerate() {
            assert_eq!(sample.meta, n as u8);
            assert_eq!(sample.port[0], n % 3 == 0);
        }
    }
}
