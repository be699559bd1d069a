//! The shared-bus wire model.
//!
//! One byte crosses the bus per tick. Every node's transmit queue is
//! shifted in lockstep; if two or more queues are non-empty the same tick,
//! the bytes collide and every listener receives a random byte instead —
//! which is what makes the enumeration backoff necessary. The delivered
//! byte reaches *every* node, including the sender: a half-duplex bus
//! echoes.
//!
//! Optional fault injection corrupts or drops individual bytes with
//! configured probabilities, all driven by a seeded RNG so failures
//! reproduce.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use partyline_core::{ByteSink, ByteSource};

/// A byte queue shared between a node and the wire.
///
/// As a [`ByteSink`] it is a node's transmit queue (the wire shifts it
/// out); as a [`ByteSource`] it is a node's receive queue (the wire fills
/// it in). [`ByteSink::max_bytes`] reports the soft capacity still free,
/// giving the windowed scheduler real backpressure: bytes queued faster
/// than the wire drains them would otherwise straddle slot boundaries.
#[derive(Debug, Clone)]
pub struct SharedBuffer {
    queue: Rc<RefCell<VecDeque<u8>>>,
    soft_capacity: usize,
}

impl SharedBuffer {
    /// A queue advertising `soft_capacity` bytes of headroom when empty.
    pub fn new(soft_capacity: usize) -> Self {
        Self { queue: Rc::new(RefCell::new(VecDeque::new())), soft_capacity }
    }

    /// Bytes currently queued.
    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    fn pop_byte(&self) -> Option<u8> {
        self.queue.borrow_mut().pop_front()
    }

    fn push_byte(&self, byte: u8) {
        self.queue.borrow_mut().push_back(byte);
    }
}

impl ByteSink for SharedBuffer {
    fn write(&mut self, bytes: &[u8]) {
        self.queue.borrow_mut().extend(bytes.iter().copied());
    }

    fn max_bytes(&self) -> usize {
        self.soft_capacity.saturating_sub(self.queue.borrow().len())
    }
}

impl ByteSource for SharedBuffer {
    fn read(&mut self) -> Vec<u8> {
        self.queue.borrow_mut().drain(..).collect()
    }
}

/// Per-byte fault probabilities.
#[derive(Debug, Clone, Default)]
pub struct WireFaults {
    /// Probability a delivered byte is replaced with a random one.
    pub corrupt_per_byte: f64,
    /// Probability a byte is dropped, independently per receiver.
    pub loss_per_byte: f64,
}

struct Tap {
    tx: SharedBuffer,
    rx: SharedBuffer,
}

/// The bus itself.
pub struct Wire {
    taps: Vec<Tap>,
    rng: ChaCha8Rng,
    faults: WireFaults,
}

impl Wire {
    /// A clean wire.
    pub fn new(seed: u64) -> Self {
        Self::with_faults(seed, WireFaults::default())
    }

    /// A wire with fault injection.
    pub fn with_faults(seed: u64, faults: WireFaults) -> Self {
        Self { taps: Vec::new(), rng: ChaCha8Rng::seed_from_u64(seed), faults }
    }

    /// Connect a node's transmit and receive queues.
    pub fn attach(&mut self, tx: SharedBuffer, rx: SharedBuffer) {
        self.taps.push(Tap { tx, rx });
    }

    /// Move one byte time forward: shift every transmit queue, resolve
    /// collisions, deliver to every receive queue.
    pub fn tick(&mut self) {
        let mut byte: Option<u8> = None;
        let mut writers = 0usize;
        for tap in &self.taps {
            if let Some(b) = tap.tx.pop_byte() {
                writers += 1;
                byte = Some(if writers > 1 { self.rng.random() } else { b });
            }
        }
        let Some(mut byte) = byte else {
            return;
        };
        if self.faults.corrupt_per_byte > 0.0 && self.rng.random_bool(self.faults.corrupt_per_byte)
        {
            byte = self.rng.random();
        }
        for tap in &self.taps {
            if self.faults.loss_per_byte > 0.0 && self.rng.random_bool(self.faults.loss_per_byte) {
                continue;
            }
            tap.rx.push_byte(byte);
        }
    }
}
