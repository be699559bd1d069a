//! Reliable, ordered delivery over the shared bus.
//!
//! Each data frame carries an 8-bit sequence number scoped to its
//! destination. The receiver delivers only the exact sequence it expects,
//! acknowledges it, and answers anything else by repeating its last good
//! acknowledgement — the sender learns about gaps from the repeat, not
//! from an explicit NACK. Unacknowledged frames sit in the window buffer
//! and are retransmitted each time the window cursor wraps, after a dwell.
//!
//! Before data can flow each direction of each link is initialised: the
//! sender announces its starting sequence number with `INITIALISE`, the
//! receiver adopts it and answers `INITIALISED`. A receiver that gets data
//! without having seen the handshake (it rebooted, say) answers
//! `UNINITIALISED`, which flips the sender back into the handshake.
//!
//! Control traffic and data traffic share the transmit budget: control
//! gets up to half first, data gets the remainder, and whatever is left
//! goes back to control. Responses therefore never starve, but cannot
//! monopolize the wire either.

mod buffer;

use std::collections::VecDeque;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use partyline_proto::{FrameKind, NodeId, encode_frame};

use crate::bus::ByteSink;
use crate::config::LinkConfig;
use crate::error::LinkError;

use buffer::{DirectBuffer, WindowBuffer};

/// Sequencing and handshake state for one remote node.
#[derive(Debug, Default)]
struct PeerLink {
    /// Next sequence number for frames we send to this peer.
    tx_seq: u8,
    /// Sequence number we expect from this peer next.
    exp_rx_seq: u8,
    /// Peer confirmed our handshake; we may send it data.
    egress_initialised: bool,
    /// Peer announced its handshake; we may accept its data.
    ingress_initialised: bool,
    /// Delivered payloads awaiting application pickup.
    rx_frames: VecDeque<Bytes>,
}

/// Sliding-window protocol instance for one enumerated node.
pub struct Windowed {
    node_id: NodeId,
    /// Dense per-peer state, indexed by NodeId. `None` at our own index
    /// and any gap.
    links: Vec<Option<PeerLink>>,
    peer_count: usize,
    direct: DirectBuffer,
    window: WindowBuffer,
    wrap_time: f64,
    /// When the current end-of-window dwell began, if one is running.
    wrap_started: Option<f64>,
}

impl Windowed {
    /// Protocol state for `node_id` talking to `peers`.
    pub fn new(node_id: NodeId, peers: impl IntoIterator<Item = NodeId>, config: &LinkConfig) -> Self {
        let mut links: Vec<Option<PeerLink>> = Vec::new();
        let mut peer_count = 0;
        for peer in peers {
            let index = usize::from(peer);
            if links.len() <= index {
                links.resize_with(index + 1, || None);
            }
            links[index] = Some(PeerLink::default());
            peer_count += 1;
        }
        Self {
            node_id,
            links,
            peer_count,
            direct: DirectBuffer::new(config.tx_direct_buffer_size),
            window: WindowBuffer::new(config.tx_window_buffer_size, config.window_size),
            wrap_time: config.wrap_time,
            wrap_started: None,
        }
    }

    fn link_mut(&mut self, peer: NodeId) -> Option<&mut PeerLink> {
        self.links.get_mut(usize::from(peer)).and_then(Option::as_mut)
    }

    /// Whether every peer has confirmed our handshake.
    pub fn all_egress_initialised(&self) -> bool {
        self.links.iter().flatten().all(|link| link.egress_initialised)
    }

    /// Whether every link is initialised in both directions.
    pub fn all_initialised(&self) -> bool {
        self.links
            .iter()
            .flatten()
            .all(|link| link.egress_initialised && link.ingress_initialised)
    }

    /// Queue application payloads for in-order delivery to `dst`.
    ///
    /// Returns how many frames of the batch were accepted. Until *every*
    /// peer's egress is initialised nothing is accepted (`Ok(0)`): data
    /// queued earlier would crowd out the handshake traffic that precedes
    /// it.
    ///
    /// # Errors
    ///
    /// [`LinkError::UnknownPeer`] for a destination enumeration did not
    /// produce, [`LinkError::WindowBufferFull`] when a frame of the batch
    /// does not fit (earlier frames of the batch stay queued and counted
    /// in the error).
    pub fn submit_frames(&mut self, dst: NodeId, frames: &[Bytes]) -> Result<usize, LinkError> {
        if self.links.get(usize::from(dst)).and_then(Option::as_ref).is_none() {
            return Err(LinkError::UnknownPeer(dst));
        }
        if !self.all_egress_initialised() {
            trace!(dst, "submission refused until all links initialise");
            return Ok(0);
        }
        for (submitted, user) in frames.iter().enumerate() {
            let Some(link) = self.link_mut(dst) else {
                return Err(LinkError::UnknownPeer(dst));
            };
            let seq = link.tx_seq;
            let mut payload = Vec::with_capacity(user.len() + 2);
            payload.push(FrameKind::Data as u8);
            payload.extend_from_slice(user);
            payload.push(seq);
            let wire = encode_frame(self.node_id, dst, &payload)?;
            if !self.window.push(seq, dst, wire) {
                warn!(dst, submitted, "windowed transmit buffer full");
                return Err(LinkError::WindowBufferFull { submitted });
            }
            if let Some(link) = self.link_mut(dst) {
                link.tx_seq = seq.wrapping_add(1);
            }
        }
        Ok(frames.len())
    }

    /// One transmit pass: handshake upkeep, then the split byte budget.
    pub fn process_tx(&mut self, now: f64, sink: &mut impl ByteSink) -> Result<(), LinkError> {
        self.queue_initialise_requests()?;
        let mut left = sink.max_bytes();
        left -= self.direct.drain(left / 2, sink);
        left -= self.transmit_window(now, left, sink);
        self.direct.drain(left, sink);
        Ok(())
    }

    /// Keep asking uninitialised peers to accept our sequence numbers.
    ///
    /// Bounded by the number of queued window frames staying below the
    /// peer count, so a bus full of data cannot be flooded with handshake
    /// repeats.
    fn queue_initialise_requests(&mut self) -> Result<(), LinkError> {
        for peer in 0..self.links.len() {
            let Some(link) = self.links.get(peer).and_then(Option::as_ref) else {
                continue;
            };
            if link.egress_initialised || self.window.queued_frames() >= self.peer_count {
                continue;
            }
            let payload = [FrameKind::Initialise as u8, link.tx_seq];
            let wire = encode_frame(self.node_id, peer as NodeId, &payload)?;
            if !self.direct.push(wire) {
                trace!(peer, "direct buffer full, handshake request dropped");
            }
        }
        Ok(())
    }

    fn transmit_window(&mut self, now: f64, max_bytes: usize, sink: &mut impl ByteSink) -> usize {
        if self.window.end_of_window() {
            // Dwell before wrapping so acknowledgements in flight get a
            // chance to land; everything still queued after the dwell is
            // retransmitted from the head.
            let started = *self.wrap_started.get_or_insert(now);
            if now < started + self.wrap_time {
                return 0;
            }
        }
        self.wrap_started = None;
        self.window.drain(max_bytes, sink)
    }

    /// Dispatch a frame addressed to this node.
    pub fn handle_frame(&mut self, src: NodeId, payload: &[u8]) {
        let Some((&kind_byte, body)) = payload.split_first() else {
            trace!(src, "empty payload");
            return;
        };
        match FrameKind::from_byte(kind_byte) {
            Some(kind) if kind.is_response() => self.handle_response(src, kind, body),
            Some(kind) => self.handle_request(src, kind, body),
            None => warn!(src, kind = kind_byte, "unknown frame kind dropped"),
        }
    }

    fn handle_request(&mut self, src: NodeId, kind: FrameKind, body: &[u8]) {
        let Some(link) = self.links.get_mut(usize::from(src)).and_then(Option::as_mut) else {
            warn!(src, "request from unknown peer dropped");
            return;
        };
        let response: [u8; 2] = match kind {
            FrameKind::Data => {
                if !link.ingress_initialised {
                    [FrameKind::Uninitialised as u8, 0]
                } else if let Some((&seq, user)) = body.split_last() {
                    if seq == link.exp_rx_seq {
                        link.exp_rx_seq = seq.wrapping_add(1);
                        link.rx_frames.push_back(Bytes::copy_from_slice(user));
                        [FrameKind::Ack as u8, seq]
                    } else {
                        // Repeat the last good ack; the payload is not
                        // deliverable out of order.
                        trace!(src, seq, expected = link.exp_rx_seq, "out-of-sequence frame");
                        [FrameKind::Ack as u8, link.exp_rx_seq.wrapping_sub(1)]
                    }
                } else {
                    trace!(src, "data frame missing sequence byte");
                    return;
                }
            }
            FrameKind::Initialise => {
                let Some(&seq) = body.first() else {
                    trace!(src, "handshake request missing sequence byte");
                    return;
                };
                link.exp_rx_seq = seq;
                link.ingress_initialised = true;
                debug!(src, seq, "ingress initialised");
                [FrameKind::Initialised as u8, 0]
            }
            FrameKind::Uninitialised | FrameKind::Initialised | FrameKind::Ack => return,
        };
        self.queue_response(src, response);
    }

    fn handle_response(&mut self, src: NodeId, kind: FrameKind, body: &[u8]) {
        match kind {
            FrameKind::Ack => {
                let Some(&seq) = body.first() else {
                    trace!(src, "ack missing sequence byte");
                    return;
                };
                self.window.acknowledge(src, seq);
            }
            FrameKind::Uninitialised => {
                // The peer rebooted. Restart the handshake right away: the
                // periodic path is rate-limited on the window staying near
                // empty, and frames stranded for this peer would keep it
                // shut forever.
                let restart = self.link_mut(src).map(|link| {
                    if link.egress_initialised {
                        debug!(src, "peer lost link state, handshake restarts");
                        link.egress_initialised = false;
                    }
                    [FrameKind::Initialise as u8, link.tx_seq]
                });
                if let Some(payload) = restart {
                    self.queue_response(src, payload);
                }
            }
            FrameKind::Initialised => {
                if let Some(link) = self.link_mut(src) {
                    if !link.egress_initialised {
                        debug!(src, "egress initialised");
                    }
                    link.egress_initialised = true;
                }
            }
            FrameKind::Initialise | FrameKind::Data => {}
        }
    }

    fn queue_response(&mut self, dst: NodeId, payload: [u8; 2]) {
        match encode_frame(self.node_id, dst, &payload) {
            Ok(wire) => {
                if !self.direct.push(wire) {
                    trace!(dst, "direct buffer full, response dropped");
                }
            }
            Err(err) => warn!(%err, dst, "control response not encodable"),
        }
    }

    /// Drain payloads delivered in order from `src`.
    pub fn take_rx_frames(&mut self, src: NodeId) -> Vec<Bytes> {
        self.link_mut(src).map(|link| link.rx_frames.drain(..).collect()).unwrap_or_default()
    }

    /// Payloads from `src` waiting for pickup.
    pub fn rx_frame_count(&self, src: NodeId) -> usize {
        self.links
            .get(usize::from(src))
            .and_then(Option::as_ref)
            .map_or(0, |link| link.rx_frames.len())
    }
}
