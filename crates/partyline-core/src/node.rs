//! The per-node glue loop tying the three protocols to one bus.
//!
//! A [`Node`] owns its transmit sink, receive source, clock, and protocol
//! state, and is driven by calling [`process_rx`](Node::process_rx) and
//! [`process_tx`](Node::process_tx) periodically. Everything is synchronous
//! and bounded per tick; temporal behavior comes from comparing the clock
//! against stored deadlines inside the protocols.
//!
//! Lifecycle: the node starts unenumerated and spends its transmit polls
//! on discovery. The moment discovery finishes, a session is built — slot
//! timing from the node's id and count, one link per peer — and from then
//! on transmit polls emit sync packets and, while the slot gate is open,
//! windowed traffic. A discovery frame heard at any later point tears the
//! session down and starts over.

use bytes::Bytes;
use tracing::debug;

use partyline_proto::{BROADCAST, Deframer, Frame, NodeId, SYNC_MARKER, UNENUMERATED};

use crate::bus::{ByteSink, ByteSource};
use crate::clock::Clock;
use crate::config::LinkConfig;
use crate::enumeration::{Enumeration, Uuid};
use crate::error::LinkError;
use crate::tdm::Tdm;
use crate::window::Windowed;

/// Protocol state that only exists once enumeration has finished.
struct Session {
    node_id: NodeId,
    tdm: Tdm,
    window: Windowed,
}

/// One node on the shared bus.
pub struct Node<W: ByteSink, R: ByteSource, C: Clock> {
    uuid: Uuid,
    config: LinkConfig,
    tx: W,
    rx: R,
    clock: C,
    deframer: Deframer,
    enumeration: Enumeration,
    session: Option<Session>,
}

impl<W: ByteSink, R: ByteSource, C: Clock> Node<W, R, C> {
    /// Build a node around its I/O and clock.
    ///
    /// # Errors
    ///
    /// [`LinkError::Config`] if the configuration is rejected.
    pub fn new(uuid: Uuid, config: LinkConfig, tx: W, rx: R, clock: C) -> Result<Self, LinkError> {
        config.validate()?;
        let enumeration = Enumeration::new(uuid, &config);
        Ok(Self {
            uuid,
            config,
            tx,
            rx,
            clock,
            deframer: Deframer::new(),
            enumeration,
            session: None,
        })
    }

    /// Drain the receive source and dispatch every complete frame.
    pub fn process_rx(&mut self) {
        let bytes = self.rx.read();
        self.deframer.extend(&bytes);
        while let Some(frame) = self.deframer.next_frame() {
            self.dispatch(frame);
        }
        if !self.enumeration.is_finished() && self.enumeration.poll_finished(self.clock.now()) {
            self.start_session();
        }
    }

    fn dispatch(&mut self, frame: Frame) {
        if frame.src == UNENUMERATED {
            if self.enumeration.is_finished() {
                debug!(uuid = self.uuid.0, "new node on the bus, session torn down");
                self.enumeration.reset();
                self.session = None;
            }
            let now = self.clock.now();
            self.enumeration.handle_frame(&frame.payload, now);
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if frame.dst == BROADCAST {
            // Half-duplex bus: we hear our own broadcasts too.
            if frame.src == session.node_id {
                return;
            }
            if frame.payload.first() == Some(&SYNC_MARKER) {
                session.tdm.handle_sync(&frame.payload[1..], &mut self.clock);
            }
        } else if frame.dst == session.node_id {
            session.window.handle_frame(frame.src, &frame.payload);
        }
    }

    /// One transmit poll: discovery while unenumerated, otherwise sync
    /// upkeep plus windowed traffic while the slot gate is open.
    pub fn process_tx(&mut self) -> Result<(), LinkError> {
        let now = self.clock.now();
        match self.session.as_mut() {
            None => self.enumeration.poll_tx(now, &mut self.tx),
            Some(session) => {
                session.tdm.poll_tx(now, &mut self.tx)?;
                if session.tdm.in_tx_slot(now) {
                    session.window.process_tx(now, &mut self.tx)?;
                }
                Ok(())
            }
        }
    }

    fn start_session(&mut self) {
        let Some(node_id) = self.enumeration.node_id() else {
            return;
        };
        let num_nodes = self.enumeration.node_count();
        debug!(uuid = self.uuid.0, node_id, num_nodes, "session established");
        let peers = (0..num_nodes as NodeId).filter(|&id| id != node_id);
        self.session = Some(Session {
            node_id,
            tdm: Tdm::new(node_id, num_nodes, &self.config),
            window: Windowed::new(node_id, peers, &self.config),
        });
    }

    /// Queue application payloads for reliable in-order delivery to `dst`.
    ///
    /// Returns how many were accepted; `Ok(0)` until enumeration has
    /// finished and every link's handshake is confirmed.
    ///
    /// # Errors
    ///
    /// [`LinkError::UnknownPeer`] and [`LinkError::WindowBufferFull`] as
    /// for [`Windowed::submit_frames`].
    pub fn submit_frames(&mut self, dst: NodeId, frames: &[Bytes]) -> Result<usize, LinkError> {
        match self.session.as_mut() {
            Some(session) => session.window.submit_frames(dst, frames),
            None => Ok(0),
        }
    }

    /// Drain payloads delivered in order from `src`.
    pub fn take_rx_frames(&mut self, src: NodeId) -> Vec<Bytes> {
        self.session.as_mut().map(|s| s.window.take_rx_frames(src)).unwrap_or_default()
    }

    /// Payloads from `src` waiting for pickup.
    pub fn rx_frame_count(&self, src: NodeId) -> usize {
        self.session.as_ref().map_or(0, |s| s.window.rx_frame_count(src))
    }

    /// This node's bus id, once enumerated.
    pub fn node_id(&self) -> Option<NodeId> {
        self.session.as_ref().map(|s| s.node_id)
    }

    /// This node's UUID.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Whether every link is initialised in both directions and data can
    /// flow.
    pub fn is_ready(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.window.all_initialised())
    }

    /// The agreed UUID list so far (complete once enumerated).
    pub fn sorted_uuids(&self) -> &[Uuid] {
        self.enumeration.sorted_uuids()
    }

    /// How many times discovery has restarted since boot.
    pub fn enumeration_restarts(&self) -> u32 {
        self.enumeration.restarts()
    }
}
