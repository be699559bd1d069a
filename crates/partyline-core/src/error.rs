//! Error types for the link-layer core.
//!
//! Only conditions the *caller* must act on become errors: a rejected
//! configuration, an unknown destination, a full transmit buffer. Wire
//! damage never surfaces here — corrupt frames die silently inside the
//! codec, and lost frames are the sliding window's problem.

use thiserror::Error;

use partyline_proto::{FrameEncodeError, NodeId};

use crate::config::ConfigError;

/// Errors surfaced by the node and the reliable-delivery layer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinkError {
    /// Rejected configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Frame addressed to a node id that enumeration did not produce.
    #[error("destination {0} is not a known peer")]
    UnknownPeer(NodeId),

    /// The windowed transmit buffer cannot take another frame. The first
    /// `submitted` frames of the batch were queued and will be delivered;
    /// the caller should back off and resubmit the rest.
    #[error("windowed transmit buffer full after {submitted} frames")]
    WindowBufferFull {
        /// Frames of the batch that were accepted before the buffer filled.
        submitted: usize,
    },

    /// A frame could not be encoded for the wire.
    #[error(transparent)]
    Encode(#[from] FrameEncodeError),
}
