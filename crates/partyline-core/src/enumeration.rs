//! Node discovery on a shared bus.
//!
//! Every node starts knowing only its own UUID and ends holding the same
//! sorted list of every UUID on the bus; its position in that list becomes
//! its dense node id. There is no coordinator: each node periodically
//! broadcasts its current list at a randomized interval, merges every list
//! it hears, and keeps talking until it either hears its own UUID echoed
//! back or holds the lowest UUID (which makes it the de-facto master that
//! must keep transmitting so late joiners are absorbed).
//!
//! Discovery is finished once the list has been quiet for
//! `finished_wait_multiplier` intervals, the node knows of at least one
//! peer, and the echo condition holds. Any discovery frame heard *after*
//! that means a new or rebooted node: all state is discarded and the bus
//! re-enumerates from scratch.
//!
//! On the wire a discovery frame is a broadcast with source `0xFF` (the
//! sender has no id yet) whose payload is the UUID list, each UUID
//! `uuid_bytes` wide, little-endian.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, trace, warn};

use partyline_proto::{BROADCAST, MAX_NODE_ID, NodeId, UNENUMERATED, encode_frame};

use crate::bus::ByteSink;
use crate::config::LinkConfig;
use crate::error::LinkError;

/// Globally-unique node identifier, assigned out of band.
///
/// Stored as `u128`; only the low `uuid_bytes` bytes travel on the wire,
/// so deployments must assign UUIDs that fit the configured width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uuid(pub u128);

impl Uuid {
    fn from_wire(chunk: &[u8]) -> Self {
        let mut bytes = [0u8; 16];
        bytes[..chunk.len()].copy_from_slice(chunk);
        Self(u128::from_le_bytes(bytes))
    }

    fn write_wire(self, width: usize, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0.to_le_bytes()[..width]);
    }
}

/// Discovery state machine for one node.
pub struct Enumeration {
    uuid: Uuid,
    uuid_bytes: usize,
    max_interval: f64,
    finished_wait: f64,
    next_tx_time: f64,
    finished_time: f64,
    sorted_uuids: Vec<Uuid>,
    received_own_uuid: bool,
    finished: bool,
    node_id: NodeId,
    restarts: u32,
    rng: ChaCha8Rng,
}

impl Enumeration {
    /// Fresh discovery state.
    ///
    /// The backoff RNG is seeded from the UUID so no two nodes share a
    /// schedule and simulations stay reproducible.
    pub fn new(uuid: Uuid, config: &LinkConfig) -> Self {
        let seed = (uuid.0 as u64) ^ ((uuid.0 >> 64) as u64);
        Self {
            uuid,
            uuid_bytes: config.uuid_bytes,
            max_interval: config.max_time_between_enum_frames,
            finished_wait: config.finished_wait(),
            next_tx_time: 0.0,
            finished_time: 0.0,
            sorted_uuids: vec![uuid],
            received_own_uuid: false,
            finished: false,
            node_id: UNENUMERATED,
            restarts: 0,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Discard everything learned and start discovery over.
    pub fn reset(&mut self) {
        self.restarts += 1;
        self.next_tx_time = 0.0;
        self.finished_time = 0.0;
        self.sorted_uuids = vec![self.uuid];
        self.received_own_uuid = false;
        self.finished = false;
        self.node_id = UNENUMERATED;
    }

    /// Transmit the UUID list if a randomized interval has elapsed and
    /// this node still has a reason to talk.
    pub fn poll_tx(&mut self, now: f64, sink: &mut impl ByteSink) -> Result<(), LinkError> {
        if self.finished || now <= self.next_tx_time {
            return Ok(());
        }
        // Uniform over (0, max_interval]: a zero draw would retransmit
        // every tick.
        self.next_tx_time = now + self.max_interval * (1.0 - self.rng.random::<f64>());
        if !self.is_master() && self.received_own_uuid {
            return Ok(());
        }

        let mut payload = Vec::with_capacity(self.sorted_uuids.len() * self.uuid_bytes);
        for uuid in &self.sorted_uuids {
            uuid.write_wire(self.uuid_bytes, &mut payload);
        }
        let wire = encode_frame(UNENUMERATED, BROADCAST, &payload)?;
        trace!(uuid = self.uuid.0, known = self.sorted_uuids.len(), "discovery frame out");
        sink.write(&wire);
        Ok(())
    }

    /// Merge a received discovery payload.
    ///
    /// If discovery had already finished this is a new or rebooted node:
    /// state is reset first and the bus re-enumerates.
    pub fn handle_frame(&mut self, payload: &[u8], now: f64) {
        if self.finished {
            debug!(uuid = self.uuid.0, "discovery frame after completion, re-enumerating");
            self.reset();
        }
        let mut changed = false;
        for chunk in payload.chunks_exact(self.uuid_bytes) {
            let uuid = Uuid::from_wire(chunk);
            if uuid == self.uuid {
                self.received_own_uuid = true;
            }
            if !self.sorted_uuids.contains(&uuid) {
                self.sorted_uuids.push(uuid);
                // Every new UUID re-arms the quiet period.
                self.finished_time = now + self.finished_wait;
                changed = true;
            }
        }
        if changed {
            self.sorted_uuids.sort_unstable();
            if self.sorted_uuids.len() > usize::from(MAX_NODE_ID) + 1 {
                warn!(
                    nodes = self.sorted_uuids.len(),
                    "more nodes than the id space can number; discovery will not finish"
                );
            }
        }
    }

    /// Check the completion conditions; returns `true` the moment
    /// discovery finishes.
    pub fn poll_finished(&mut self, now: f64) -> bool {
        if self.finished
            || now <= self.finished_time
            || self.sorted_uuids.len() < 2
            || self.sorted_uuids.len() > usize::from(MAX_NODE_ID) + 1
        {
            return false;
        }
        if !(self.received_own_uuid || self.is_master()) {
            return false;
        }
        let Some(index) = self.sorted_uuids.iter().position(|&u| u == self.uuid) else {
            return false;
        };
        self.finished = true;
        self.node_id = index as NodeId;
        debug!(
            uuid = self.uuid.0,
            node_id = self.node_id,
            nodes = self.sorted_uuids.len(),
            "discovery finished"
        );
        true
    }

    /// Whether this node currently holds the lowest known UUID.
    pub fn is_master(&self) -> bool {
        self.sorted_uuids.first() == Some(&self.uuid)
    }

    /// Whether discovery has finished.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// This node's id, once discovery has finished.
    pub fn node_id(&self) -> Option<NodeId> {
        self.finished.then_some(self.node_id)
    }

    /// Number of nodes known so far.
    pub fn node_count(&self) -> usize {
        self.sorted_uuids.len()
    }

    /// The agreed UUID list, ascending.
    pub fn sorted_uuids(&self) -> &[Uuid] {
        &self.sorted_uuids
    }

    /// How many times discovery has been restarted by late frames.
    pub fn restarts(&self) -> u32 {
        self.restarts
    }
}
