//! Wire codec for the partyline shared-bus link layer.
//!
//! Every byte that crosses the bus is produced or consumed here: COBS byte
//! stuffing so a zero byte can delimit frames, a CRC-16 trailer for
//! integrity, and the addressed frame envelope around both. The codec is
//! stateless apart from [`Deframer`], which reassembles frames from an
//! arbitrarily-chunked byte stream.
//!
//! Protocol state machines (discovery, slot timing, reliable delivery) live
//! in `partyline-core`; this crate knows nothing about them beyond the wire
//! constants in [`wire`].

pub mod cobs;
pub mod frame;
pub mod wire;

pub use frame::{Deframer, Frame, FrameEncodeError, FrameParseError, encode_frame};
pub use wire::{BROADCAST, FrameKind, MAX_NODE_ID, NodeId, SYNC_MARKER, UNENUMERATED};
