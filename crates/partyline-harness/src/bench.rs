//! Multi-node simulation bench.
//!
//! Owns the wire, one full [`Node`] per participant, and the per-node
//! clocks. Time advances one byte-time per tick; every
//! `ticks_between_processes` ticks each node runs one `process_rx` /
//! `process_tx` round, mirroring a firmware loop serviced every hundred
//! microseconds or so.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::warn;

use partyline_core::{LinkConfig, LinkError, Node, Uuid};

use crate::clock::SimClock;
use crate::wire::{SharedBuffer, Wire, WireFaults};

/// A simulated node: a full protocol stack over shared-buffer I/O and a
/// simulated clock.
pub type SimNode = Node<SharedBuffer, SharedBuffer, SimClock>;

/// Bench tuning.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    /// Seed for wire faults and clock-rate jitter.
    pub seed: u64,
    /// Wire rate; one byte crosses the bus per tick.
    pub bytes_per_second: f64,
    /// Relative spread of per-node clock rates (e.g. `1e-4` = 100 ppm).
    pub clock_speed_variation: f64,
    /// Ticks between node servicing rounds.
    pub ticks_between_processes: u64,
    /// Soft capacity of each node's transmit queue; the windowed scheduler
    /// sees the remaining headroom as its byte budget.
    pub sink_capacity: usize,
    /// Link-layer configuration shared by every node.
    pub link: LinkConfig,
    /// Wire fault injection.
    pub faults: WireFaults,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            seed: 0x5EED,
            bytes_per_second: 1_000_000.0,
            clock_speed_variation: 1e-4,
            ticks_between_processes: 100,
            sink_capacity: 1000,
            link: LinkConfig::default(),
            faults: WireFaults::default(),
        }
    }
}

/// The bench itself.
pub struct Bench {
    config: BenchConfig,
    rng: ChaCha8Rng,
    wire: Wire,
    /// The simulated nodes, in attach order.
    pub nodes: Vec<SimNode>,
    clocks: Vec<SimClock>,
    ticks: u64,
}

impl Bench {
    /// An empty bench; add nodes before running.
    pub fn new(config: BenchConfig) -> Self {
        let wire = Wire::with_faults(config.seed.wrapping_add(1), config.faults.clone());
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Self { config, rng, wire, nodes: Vec::new(), clocks: Vec::new(), ticks: 0 }
    }

    /// Attach a new node to the bus. Nodes may join mid-run; that is what
    /// re-enumeration is for.
    ///
    /// # Errors
    ///
    /// [`LinkError::Config`] if the shared link configuration is invalid.
    pub fn add_node(&mut self, uuid: Uuid) -> Result<(), LinkError> {
        let jitter = (self.rng.random::<f64>() * 2.0 - 1.0) * self.config.clock_speed_variation;
        let ticks_per_sec = self.config.bytes_per_second * (1.0 + jitter);
        let clock = SimClock::new(ticks_per_sec);
        // Nodes joining mid-run start with the current bus time, as a
        // freshly booted device would after reading a peer's sync packet.
        clock.advance(self.ticks);
        let tx = SharedBuffer::new(self.config.sink_capacity);
        let rx = SharedBuffer::new(self.config.sink_capacity);
        self.wire.attach(tx.clone(), rx.clone());
        let node = Node::new(uuid, self.config.link.clone(), tx, rx, clock.clone())?;
        self.clocks.push(clock);
        self.nodes.push(node);
        Ok(())
    }

    /// Run for at most `max_ticks`, stopping early the first time `done`
    /// returns true at a servicing round. Returns whether it stopped
    /// early.
    pub fn run(&mut self, max_ticks: u64, mut done: impl FnMut(&mut [SimNode]) -> bool) -> bool {
        for _ in 0..max_ticks {
            self.ticks += 1;
            for clock in &self.clocks {
                clock.advance(1);
            }
            self.wire.tick();
            if self.ticks % self.config.ticks_between_processes == 0 {
                for node in &mut self.nodes {
                    node.process_rx();
                    if let Err(err) = node.process_tx() {
                        warn!(%err, "node transmit error");
                    }
                }
                if done(&mut self.nodes) {
                    return true;
                }
            }
        }
        false
    }

    /// Ticks elapsed since the bench started.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// A node's current local time, skew and sync adjustments included.
    pub fn node_time(&self, index: usize) -> f64 {
        use partyline_core::Clock as _;
        self.clocks[index].now()
    }

    /// Elapsed simulated time at the nominal wire rate.
    pub fn sim_time(&self) -> f64 {
        self.ticks as f64 / self.config.bytes_per_second
    }

    /// Convert a duration at the nominal rate to ticks.
    pub fn ticks_for(&self, secs: f64) -> u64 {
        (secs * self.config.bytes_per_second) as u64
    }

    /// Whether every node has finished enumeration.
    pub fn all_enumerated(&self) -> bool {
        !self.nodes.is_empty() && self.nodes.iter().all(|n| n.node_id().is_some())
    }

    /// Whether every node is fully ready for data.
    pub fn all_ready(&self) -> bool {
        !self.nodes.is_empty() && self.nodes.iter().all(Node::is_ready)
    }
}
