//! Time-division access and clock alignment.
//!
//! Once enumeration has produced dense ids and a node count, bus time is
//! cut into cycles of `N * time_per_node` seconds and node `i` may transmit
//! only while the cycle phase is inside its own slot, minus a guard margin
//! at the end that absorbs clock skew and queued bytes still draining.
//!
//! Clocks are kept together by sync packets: inside its own slot each node
//! broadcasts its current time (at most once per
//! `time_between_sync_packets`), and every receiver moves its clock to the
//! midpoint between its own time and the sender's time plus the configured
//! propagation delay. The midpoint rather than a direct set damps jitter;
//! every node must use the same variant or clocks will not converge.

use tracing::{trace, warn};

use partyline_proto::{BROADCAST, NodeId, SYNC_MARKER, encode_frame};

use crate::bus::ByteSink;
use crate::clock::Clock;
use crate::config::LinkConfig;
use crate::error::LinkError;

/// Width of the timestamp in a sync packet: picoseconds, little-endian.
pub const SYNC_TIME_BYTES: usize = 10;

const PICOS_PER_SEC: f64 = 1e12;

/// Slot gate and sync scheduler for one enumerated node.
#[derive(Debug)]
pub struct Tdm {
    node_id: NodeId,
    time_between_sync_packets: f64,
    time_for_tx_to_reach_rx: f64,
    cycle_period: f64,
    slot_start: f64,
    slot_end: f64,
    next_sync_time: f64,
}

impl Tdm {
    /// Slot layout for `node_id` on a bus of `num_nodes`.
    pub fn new(node_id: NodeId, num_nodes: usize, config: &LinkConfig) -> Self {
        let slot_start = f64::from(node_id) * config.time_per_node;
        Self {
            node_id,
            time_between_sync_packets: config.time_between_sync_packets,
            time_for_tx_to_reach_rx: config.time_for_tx_to_reach_rx,
            cycle_period: num_nodes as f64 * config.time_per_node,
            slot_start,
            slot_end: slot_start + config.time_per_node - config.time_margin,
            next_sync_time: 0.0,
        }
    }

    /// Whether this node may put bytes on the wire right now.
    pub fn in_tx_slot(&self, now: f64) -> bool {
        let phase = now.rem_euclid(self.cycle_period);
        phase > self.slot_start && phase < self.slot_end
    }

    /// Broadcast a sync packet if inside the slot and one is due.
    pub fn poll_tx(&mut self, now: f64, sink: &mut impl ByteSink) -> Result<(), LinkError> {
        if !self.in_tx_slot(now) || now <= self.next_sync_time {
            return Ok(());
        }
        self.next_sync_time = now + self.time_between_sync_packets;

        let mut payload = [0u8; 1 + SYNC_TIME_BYTES];
        payload[0] = SYNC_MARKER;
        let picos = (now * PICOS_PER_SEC) as u128;
        payload[1..].copy_from_slice(&picos.to_le_bytes()[..SYNC_TIME_BYTES]);
        let wire = encode_frame(self.node_id, BROADCAST, &payload)?;
        trace!(node_id = self.node_id, now, "sync packet out");
        sink.write(&wire);
        Ok(())
    }

    /// Fold a received sync timestamp into the local clock.
    ///
    /// `timestamp` is the sync payload with the marker byte already
    /// stripped.
    pub fn handle_sync(&self, timestamp: &[u8], clock: &mut impl Clock) {
        if timestamp.len() != SYNC_TIME_BYTES {
            warn!(len = timestamp.len(), "malformed sync packet");
            return;
        }
        let mut bytes = [0u8; 16];
        bytes[..SYNC_TIME_BYTES].copy_from_slice(timestamp);
        let sent_time = u128::from_le_bytes(bytes) as f64 / PICOS_PER_SEC;
        let expected_now = sent_time + self.time_for_tx_to_reach_rx;
        let local = clock.now();
        let adjusted = local + (expected_now - local) / 2.0;
        trace!(local, expected_now, adjusted, "sync packet in");
        clock.set_time(adjusted);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use partyline_proto::Deframer;

    struct VecSink(Vec<u8>);

    impl ByteSink for VecSink {
        fn write(&mut self, bytes: &[u8]) {
            self.0.extend_from_slice(bytes);
        }
    }

    struct TestClock(f64);

    impl Clock for TestClock {
        fn now(&self) -> f64 {
            self.0
        }
        fn set_time(&mut self, secs: f64) {
            self.0 = secs;
        }
    }

    fn config() -> LinkConfig {
        LinkConfig { time_per_node: 0.002, time_margin: 0.0002, ..LinkConfig::default() }
    }

    #[test]
    fn slots_recur_every_cycle() {
        let tdm = Tdm::new(1, 4, &config());
        // Second slot of an 8 ms cycle, in this cycle and later ones.
        assert!(tdm.in_tx_slot(0.003));
        assert!(tdm.in_tx_slot(0.008 + 0.003));
        assert!(tdm.in_tx_slot(10.0 * 0.008 + 0.003));
        assert!(!tdm.in_tx_slot(0.001));
        assert!(!tdm.in_tx_slot(0.005));
    }

    #[test]
    fn margin_guards_slot_end() {
        let tdm = Tdm::new(0, 2, &config());
        assert!(tdm.in_tx_slot(0.0017));
        assert!(!tdm.in_tx_slot(0.0019));
        assert!(!tdm.in_tx_slot(0.002));
    }

    #[test]
    fn slots_never_overlap() {
        let config = config();
        for num_nodes in [2usize, 5, 17] {
            let tdms: Vec<Tdm> =
                (0..num_nodes).map(|i| Tdm::new(i as NodeId, num_nodes, &config)).collect();
            let cycle = num_nodes as f64 * config.time_per_node;
            let samples = 10_000;
            for s in 0..samples {
                let now = cycle * (s as f64) / (samples as f64) + 3.0 * cycle;
                let open = tdms.iter().filter(|t| t.in_tx_slot(now)).count();
                assert!(open <= 1, "{open} slots open at {now} with {num_nodes} nodes");
            }
        }
    }

    #[test]
    fn sync_rate_is_limited() {
        let mut tdm = Tdm::new(0, 2, &config());
        let mut sink = VecSink(Vec::new());
        tdm.poll_tx(0.0005, &mut sink).unwrap();
        tdm.poll_tx(0.0006, &mut sink).unwrap();
        let mut deframer = Deframer::new();
        deframer.extend(&sink.0);
        assert!(deframer.next_frame().is_some());
        assert!(deframer.next_frame().is_none());
    }

    #[test]
    fn no_sync_outside_own_slot() {
        let mut tdm = Tdm::new(1, 2, &config());
        let mut sink = VecSink(Vec::new());
        tdm.poll_tx(0.0005, &mut sink).unwrap();
        assert!(sink.0.is_empty());
        tdm.poll_tx(0.0025, &mut sink).unwrap();
        assert!(!sink.0.is_empty());
    }

    #[test]
    fn midpoint_resync_halves_the_offset() {
        // Master at 1.000000 s, slave at 1.001000 s, no propagation delay:
        // one sync packet must land the slave on the midpoint, 1.0005 s.
        let config = LinkConfig {
            time_for_tx_to_reach_rx: 0.0,
            time_per_node: 2.0,
            time_margin: 0.0002,
            ..LinkConfig::default()
        };
        let mut master = Tdm::new(0, 1, &config);
        let mut sink = VecSink(Vec::new());
        master.poll_tx(1.0, &mut sink).unwrap();

        let mut deframer = Deframer::new();
        deframer.extend(&sink.0);
        let frame = deframer.next_frame().unwrap();
        assert_eq!(frame.dst, BROADCAST);
        assert_eq!(frame.payload[0], SYNC_MARKER);

        let slave = Tdm::new(0, 1, &config);
        let mut clock = TestClock(1.001);
        slave.handle_sync(&frame.payload[1..], &mut clock);
        assert!((clock.now() - 1.0005).abs() < 1e-9);
    }

    #[test]
    fn propagation_delay_shifts_the_target() {
        let config = LinkConfig { time_for_tx_to_reach_rx: 0.001, ..LinkConfig::default() };
        let tdm = Tdm::new(0, 2, &config);
        let picos = (2.0f64 * 1e12) as u128;
        let mut timestamp = [0u8; SYNC_TIME_BYTES];
        timestamp.copy_from_slice(&picos.to_le_bytes()[..SYNC_TIME_BYTES]);

        // Local clock agrees with the sender exactly; the correction pulls
        // it half the propagation delay forward.
        let mut clock = TestClock(2.0);
        tdm.handle_sync(&timestamp, &mut clock);
        assert!((clock.now() - 2.0005).abs() < 1e-9);
    }

    #[test]
    fn malformed_sync_is_ignored() {
        let tdm = Tdm::new(0, 2, &config());
        let mut clock = TestClock(5.0);
        tdm.handle_sync(&[1, 2, 3], &mut clock);
        assert!((clock.now() - 5.0).abs() < f64::EPSILON);
    }
}
