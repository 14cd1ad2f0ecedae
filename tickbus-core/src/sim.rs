//! Tick harness: a scripted source and a recording sink around a device under test.
use crate::stream::{Pipe, Stream};
use std::collections::VecDeque;

/// Offers queued words in order, one per accepted transfer.
#[derive(Debug)]
pub struct Source<T> {
    queue: VecDeque<T>,
    sent: usize,
}

impl<T: Copy + Default> Source<T> {
    pub fn new() -> Source<T> {
        Source {
            queue: VecDeque::new(),
            sent: 0,
        }
    }

    pub fn push(&mut self, word: T) {
        self.queue.push_back(word);
    }

    pub fn extend(&mut self, words: impl IntoIterator<Item = T>) {
        self.queue.extend(words);
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn sent(&self) -> usize {
        self.sent
    }

    pub fn offer(&self, port: &mut Stream<T>) {
        match self.queue.front() {
            Some(word) => port.offer(*word),
            None => port.withdraw(),
        }
    }

    pub fn commit(&mut self, port: &Stream<T>) {
        if port.fire() {
            self.queue.pop_front();
            self.sent += 1;
        }
    }
}

impl<T: Copy + Default> Default for Source<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Records every accepted word. Can be told to stall to exercise backpressure.
#[derive(Debug)]
pub struct Sink<T> {
    received: Vec<T>,
    stall: u64,
    period: u64,
}

impl<T: Copy + Default> Sink<T> {
    pub fn new() -> Sink<T> {
        Sink {
            received: Vec::new(),
            stall: 0,
            period: 1,
        }
    }

    /// Deasserts `ready` for the next `ticks` ticks.
    pub fn stall_for(&mut self, ticks: u64) {
        self.stall = ticks;
    }

    /// Only asserts `ready` on every `period`-th tick.
    pub fn ready_every(&mut self, period: u64) {
        self.period = period.max(1);
    }

    pub fn received(&self) -> &[T] {
        &self.received
    }

    pub fn take(&mut self) -> Vec<T> {
        std::mem::take(&mut self.received)
    }

    pub fn accept(&self, port: &mut Stream<T>, tick: u64) {
        port.ready = self.stall == 0 && tick % self.period == 0;
    }

    pub fn commit(&mut self, port: &Stream<T>) {
        if port.fire() {
            self.received.push(port.payload);
        }
        self.stall = self.stall.saturating_sub(1);
    }
}

impl<T: Copy + Default> Default for Sink<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives a [`Pipe`] from a [`Source`] into a [`Sink`].
///
/// Each tick runs the source and the device forward, then the sink and the device backward,
/// then commits everything. A reaction callback runs last so a simulated target can observe
/// the pins the device has just driven.
pub struct Bench<D: Pipe> {
    pub dut: D,
    pub source: Source<D::In>,
    pub sink: Sink<D::Out>,
    ticks: u64,
}

impl<D: Pipe> Bench<D> {
    pub fn new(dut: D) -> Bench<D> {
        Bench {
            dut,
            source: Source::new(),
            sink: Sink::new(),
            ticks: 0,
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn tick(&mut self) {
        self.tick_with(|_| {});
    }

    pub fn tick_with(&mut self, mut react: impl FnMut(&mut D)) {
        self.source.offer(self.dut.input());
        self.dut.forward();
        self.sink.accept(self.dut.output(), self.ticks);
        self.dut.backward();
        self.source.commit(self.dut.input());
        self.sink.commit(self.dut.output());
        self.dut.commit();
        react(&mut self.dut);
        self.ticks += 1;
    }

    pub fn run(&mut self, ticks: u64, mut react: impl FnMut(&mut D)) {
        for _ in 0..ticks {
            self.tick_with(&mut react);
        }
    }

    /// Ticks until `done` holds, for at most `limit` ticks. Returns whether `done` was reached.
    pub fn run_until(
        &mut self,
        limit: u64,
        mut react: impl FnMut(&mut D),
        mut done: impl FnMut(&Self) -> bool,
    ) -> bool {
        for _ in 0..limit {
            if done(self) {
                return true;
            }
            self.tick_with(&mut react);
        }
        done(self)
    }

    /// Ticks until the sink has received `count` words.
    pub fn collect(&mut self, count: usize, limit: u64, react: impl FnMut(&mut D)) -> Vec<D::Out> {
        self.run_until(limit, react, |bench| bench.sink.received().len() >= count);
        self.sink.take()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::stream::{Queue, StreamBuffer};

    #[test]
    fn bench_moves_words() {
        let mut bench = Bench::new(StreamBuffer::<u32>::new());
        bench.source.extend([1, 2, 3]);
        let words = bench.collect(3, 10, |_| {});
        assert_eq!(words, vec![1, 2, 3]);
        assert_eq!(bench.source.sent(), 3);
        assert!(bench.source.is_empty());
    }

    #[test]
    fn stalled_output_is_stable() {
        let mut bench = Bench::new(Queue::<u32>::new(2));
        bench.source.extend([10, 20, 30]);
        bench.sink.stall_for(8);
        let mut seen = Vec::new();
        bench.run(8, |queue| seen.push((queue.o.valid, queue.o.payload)));
        // once valid, the word must not change while unaccepted
        let first = seen.iter().position(|(valid, _)| *valid).unwrap();
        assert!(seen[first..].iter().all(|entry| *entry == (true, 10)));
        let words = bench.collect(3, 10, |_| {});
        assert_eq!(words, vec![10, 20, 30]);
    }
}
