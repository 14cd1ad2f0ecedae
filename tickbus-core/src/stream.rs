//! Valid/ready streams and the three-phase component model.
//!
//! Every engine in this workspace is a synchronous state machine advanced by one global tick.
//! A tick is evaluated in three phases:
//!
//! 1. [`Component::forward`] recomputes `valid` and `payload` of every stream from the
//!    registers of the producer and whatever its own upstream offers,
//! 2. [`Component::backward`] recomputes `ready` from the registers of the consumer, the
//!    `ready` of its downstream and the `valid` of what it is being offered,
//! 3. [`Component::commit`] updates registers. A transfer happened on a stream iff both
//!    `valid` and `ready` were asserted when `commit` runs.
//!
//! `valid` must never depend on `ready`. With that rule the two sweeps reach the fixpoint
//! without combinational cycles, and register updates only become visible on the next tick.
use std::collections::VecDeque;

/// One valid/ready handshake carrying a payload word.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stream<T> {
    pub payload: T,
    pub valid: bool,
    pub ready: bool,
}

impl<T: Copy + Default> Stream<T> {
    /// A transfer takes place on this tick.
    pub fn fire(&self) -> bool {
        self.valid && self.ready
    }

    /// Present `payload` with `valid` asserted.
    pub fn offer(&mut self, payload: T) {
        self.payload = payload;
        self.valid = true;
    }

    /// Deassert `valid`. The payload is reset so stale words never leak into traces.
    pub fn withdraw(&mut self) {
        self.payload = T::default();
        self.valid = false;
    }
}

/// Copies `valid` and `payload` from a producer port onto the consumer port it feeds.
pub fn connect_forward<T: Copy>(upstream: &Stream<T>, downstream: &mut Stream<T>) {
    downstream.payload = upstream.payload;
    downstream.valid = upstream.valid;
}

/// Copies `ready` from a consumer port back onto the producer port feeding it.
pub fn connect_backward<T: Copy>(downstream: &Stream<T>, upstream: &mut Stream<T>) {
    upstream.ready = downstream.ready;
}

/// A synchronous state machine evaluated once per tick.
pub trait Component {
    /// Recompute `valid`/`payload` of outgoing streams.
    fn forward(&mut self);

    /// Recompute `ready` of incoming streams.
    fn backward(&mut self);

    /// Update registers from the values settled by [`forward`](Component::forward) and
    /// [`backward`](Component::backward).
    fn commit(&mut self);

    /// Evaluate one complete tick.
    fn tick(&mut self) {
        self.forward();
        self.backward();
        self.commit();
    }
}

/// A component with one input stream and one output stream.
pub trait Pipe: Component {
    type In: Copy + Default;
    type Out: Copy + Default;

    fn input(&mut self) -> &mut Stream<Self::In>;
    fn output(&mut self) -> &mut Stream<Self::Out>;
}

/// One-tick register slice between a producer and a consumer.
///
/// Decouples timing in both directions without reordering: `i.ready` only depends on the
/// register state and `o.ready`.
#[derive(Debug, Default)]
pub struct StreamBuffer<T> {
    pub i: Stream<T>,
    pub o: Stream<T>,
    valid: bool,
    payload: T,
}

impl<T: Copy + Default> StreamBuffer<T> {
    pub fn new() -> StreamBuffer<T> {
        StreamBuffer {
            i: Stream::default(),
            o: Stream::default(),
            valid: false,
            payload: T::default(),
        }
    }

    /// No word is held in the register.
    pub fn is_empty(&self) -> bool {
        !self.valid
    }
}

impl<T: Copy + Default> Component for StreamBuffer<T> {
    fn forward(&mut self) {
        self.o.valid = self.valid;
        self.o.payload = self.payload;
    }

    fn backward(&mut self) {
        self.i.ready = self.o.ready || !self.valid;
    }

    fn commit(&mut self) {
        if self.i.ready {
            self.valid = self.i.valid;
            if self.i.valid {
                self.payload = self.i.payload;
            }
        }
    }
}

impl<T: Copy + Default> Pipe for StreamBuffer<T> {
    type In = T;
    type Out = T;

    fn input(&mut self) -> &mut Stream<T> {
        &mut self.i
    }

    fn output(&mut self) -> &mut Stream<T> {
        &mut self.o
    }
}

/// Synchronous FIFO with a fixed depth.
#[derive(Debug)]
pub struct Queue<T> {
    pub i: Stream<T>,
    pub o: Stream<T>,
    depth: usize,
    items: VecDeque<T>,
}

impl<T: Copy + Default> Queue<T> {
    pub fn new(depth: usize) -> Queue<T> {
        assert!(depth > 0, "queue depth must be positive");
        Queue {
            i: Stream::default(),
            o: Stream::default(),
            depth,
            items: VecDeque::with_capacity(depth),
        }
    }

    /// Number of words currently stored.
    pub fn level(&self) -> usize {
        self.items.len()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl<T: Copy + Default> Component for Queue<T> {
    fn forward(&mut self) {
        match self.items.front() {
            Some(word) => self.o.offer(*word),
            None => self.o.withdraw(),
        }
    }

    fn backward(&mut self) {
        self.i.ready = self.items.len() < self.depth;
    }

    fn commit(&mut self) {
        if self.o.fire() {
            self.items.pop_front();
        }
        if self.i.fire() {
            self.items.push_back(self.i.payload);
        }
    }
}

impl<T: Copy + Default> Pipe for Queue<T> {
    type In = T;
    type Out = T;

    fn input(&mut self) -> &mut Stream<T> {
        &mut self.i
    }

    fn output(&mut self) -> &mut Stream<T> {
        &mut self.o
    }
}

/// Number of synchroniser stages a word crosses in an [`AsyncQueue`].
pub const SYNC_STAGES: u8 = 2;

/// Order-preserving FIFO between independently timed domains.
///
/// A written word is only visible to the reader once the write pointer has crossed
/// [`SYNC_STAGES`] synchroniser flops, so a word pushed on tick `t` can be read on tick
/// `t + SYNC_STAGES + 1` at the earliest.
#[derive(Debug)]
pub struct AsyncQueue<T> {
    pub i: Stream<T>,
    pub o: Stream<T>,
    depth: usize,
    items: VecDeque<(T, u8)>,
}

impl<T: Copy + Default> AsyncQueue<T> {
    pub fn new(depth: usize) -> AsyncQueue<T> {
        assert!(depth > 0, "queue depth must be positive");
        AsyncQueue {
            i: Stream::default(),
            o: Stream::default(),
            depth,
            items: VecDeque::with_capacity(depth),
        }
    }

    pub fn level(&self) -> usize {
        self.items.len()
    }
}

impl<T: Copy + Default> Component for AsyncQueue<T> {
    fn forward(&mut self) {
        match self.items.front() {
            Some((word, age)) if *age >= SYNC_STAGES => self.o.offer(*word),
            _ => self.o.withdraw(),
        }
    }

    fn backward(&mut self) {
        self.i.ready = self.items.len() < self.depth;
    }

    fn commit(&mut self) {
        if self.o.fire() {
            self.items.pop_front();
        }
        for (_, age) in self.items.iter_mut() {
            *age = age.saturating_add(1);
        }
        if self.i.fire() {
            self.items.push_back((self.i.payload, 0));
        }
    }
}

impl<T: Copy + Default> Pipe for AsyncQueue<T> {
    type In = T;
    type Out = T;

    fn input(&mut self) -> &mut Stream<T> {
        &mut self.i
    }

    fn output(&mut self) -> &mut Stream<T> {
        &mut self.o
    }
}

/// Splits one stream into `N` buffered copies.
///
/// A word is accepted only once every branch has room for it; each branch then drains at its
/// own pace. Adds one tick of latency.
#[derive(Debug)]
pub struct FanOut<T, const N: usize> {
    pub i: Stream<T>,
    pub o: [Stream<T>; N],
    slots: [Option<T>; N],
}

impl<T: Copy + Default, const N: usize> FanOut<T, N> {
    pub fn new() -> FanOut<T, N> {
        FanOut {
            i: Stream::default(),
            o: [Stream::default(); N],
            slots: [None; N],
        }
    }
}

impl<T: Copy + Default, const N: usize> Default for FanOut<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy + Default, const N: usize> Component for FanOut<T, N> {
    fn forward(&mut self) {
        for (port, slot) in self.o.iter_mut().zip(self.slots.iter()) {
            match slot {
                Some(word) => port.offer(*word),
                None => port.withdraw(),
            }
        }
    }

    fn backward(&mut self) {
        self.i.ready = self
            .o
            .iter()
            .zip(self.slots.iter())
            .all(|(port, slot)| slot.is_none() || port.ready);
    }

    fn commit(&mut self) {
        for (port, slot) in self.o.iter().zip(self.slots.iter_mut()) {
            if port.fire() {
                *slot = None;
            }
        }
        if self.i.fire() {
            self.slots = [Some(self.i.payload); N];
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn push<P: Pipe>(pipe: &mut P, word: Option<P::In>, ready: bool) -> Option<P::Out> {
        match word {
            Some(word) => pipe.input().offer(word),
            None => pipe.input().withdraw(),
        }
        pipe.forward();
        pipe.output().ready = ready;
        pipe.backward();
        let out = pipe.output().fire().then(|| pipe.output().payload);
        pipe.commit();
        out
    }

    #[test]
    fn stream_buffer_adds_one_tick() {
        let mut buffer = StreamBuffer::<u8>::new();
        assert_eq!(push(&mut buffer, Some(1), true), None);
        assert_eq!(push(&mut buffer, Some(2), true), Some(1));
        assert_eq!(push(&mut buffer, None, true), Some(2));
        assert_eq!(push(&mut buffer, None, true), None);
    }

    #[test]
    fn stream_buffer_holds_under_backpressure() {
        let mut buffer = StreamBuffer::<u8>::new();
        push(&mut buffer, Some(7), false);
        for _ in 0..5 {
            buffer.input().offer(8);
            buffer.forward();
            assert!(buffer.o.valid);
            assert_eq!(buffer.o.payload, 7);
            buffer.o.ready = false;
            buffer.backward();
            assert!(!buffer.i.ready);
            buffer.commit();
        }
        assert_eq!(push(&mut buffer, Some(8), true), Some(7));
        assert_eq!(push(&mut buffer, None, true), Some(8));
    }

    #[test]
    fn queue_preserves_order() {
        let mut queue = Queue::<u8>::new(4);
        for word in 0..4 {
            assert_eq!(push(&mut queue, Some(word), false), None);
        }
        assert_eq!(queue.level(), 4);
        queue.input().offer(9);
        queue.forward();
        queue.backward();
        assert!(!queue.i.ready);
        queue.commit();
        let drained: Vec<_> = (0..4).filter_map(|_| push(&mut queue, None, true)).collect();
        assert_eq!(drained, vec![0, 1, 2, 3]);
    }

    #[test]
    fn async_queue_latency_is_bounded() {
        let mut queue = AsyncQueue::<u8>::new(4);
        assert_eq!(push(&mut queue, Some(5), true), None);
        let mut waited = 0;
        let word = loop {
            waited += 1;
            if let Some(word) = push(&mut queue, None, true) {
                break word;
            }
            assert!(waited < 10);
        };
        assert_eq!(word, 5);
        assert_eq!(waited, usize::from(SYNC_STAGES) + 1);
    }

    #[test]
    fn fan_out_waits_for_slowest_branch() {
        let mut fan = FanOut::<u8, 2>::new();
        fan.i.offer(1);
        fan.forward();
        fan.o[0].ready = true;
        fan.o[1].ready = false;
        fan.backward();
        assert!(fan.i.ready);
        fan.commit();

        // branch 0 drains, branch 1 stalls: the next word must wait
        fan.i.offer(2);
        fan.forward();
        assert!(fan.o[0].valid && fan.o[1].valid);
        fan.o[0].ready = true;
        fan.o[1].ready = false;
        fan.backward();
        assert!(!fan.i.ready);
        fan.commit();

        fan.i.offer(2);
        fan.forward();
        assert!(!fan.o[0].valid);
        assert_eq!(fan.o[1].payload, 1);
        fan.o[0].ready = true;
        fan.o[1].ready = true;
        fan.backward();
        assert!(fan.i.ready);
        fan.commit();

        fan.i.withdraw();
        fan.forward();
        assert_eq!(fan.o[0].payload, 2);
        assert_eq!(fan.o[1].payload, 2);
    }
}
