//! Addressed frame envelope: COBS block, CRC-16 trailer, duplicated
//! destination prefix, zero delimiter.
//!
//! Wire image of one frame:
//!
//! ```text
//! +--------+--------+------------------------------------+------+
//! | prefix | prefix | COBS( src ‖ payload ‖ crc16 LE )   | 0x00 |
//! +--------+--------+------------------------------------+------+
//! prefix = dst + 1  for unicast (dst in 0..=253)
//!        = 0xFF     for broadcast
//! ```
//!
//! The destination prefix sits outside the COBS block and the CRC on
//! purpose: a receiver decides whether a frame is addressed to it from the
//! first byte, before paying any decode cost. Duplicating the prefix is the
//! only protection that byte gets, and it defends against single-byte
//! corruption. Everything else is covered by CRC-16/IBM-3740 (the
//! CCITT-FALSE parameters: poly `0x1021`, init `0xFFFF`, unreflected)
//! computed over `src ‖ payload` and appended little-endian inside the
//! COBS block.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use crc::{CRC_16_IBM_3740, Crc};
use thiserror::Error;
use tracing::trace;

use crate::cobs::{self, CobsError};
use crate::wire::{BROADCAST, MAX_NODE_ID, NodeId};

const FRAME_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Shortest wire image that can possibly carry a frame: two prefix bytes
/// plus a COBS block holding at least `src` and the CRC trailer.
const MIN_WIRE_LEN: usize = 5;

/// A decoded frame: who sent it, who it is for, and the opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Sender's node id, or `UNENUMERATED` for discovery traffic.
    pub src: u8,
    /// Destination node id, or `BROADCAST`.
    pub dst: NodeId,
    /// Payload bytes, arbitrary including zeroes.
    pub payload: Bytes,
}

/// Encoding failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameEncodeError {
    /// Destination outside `0..=253` and not the broadcast marker.
    #[error("destination {0:#04x} is not addressable on the wire")]
    InvalidDestination(NodeId),
}

/// Reasons a candidate wire slice is rejected. Never surfaced to callers;
/// the [`Deframer`] drops damaged frames silently, as corruption on a
/// shared bus is routine.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameParseError {
    /// Fewer bytes than the smallest possible frame.
    #[error("frame too short ({len} bytes)")]
    TooShort {
        /// Candidate length in bytes.
        len: usize,
    },

    /// The two destination prefix bytes disagree.
    #[error("destination prefix mismatch ({first:#04x} vs {second:#04x})")]
    PrefixMismatch {
        /// First prefix byte.
        first: u8,
        /// Second prefix byte.
        second: u8,
    },

    /// The COBS block failed to decode.
    #[error(transparent)]
    Cobs(#[from] CobsError),

    /// CRC trailer did not match the decoded contents.
    #[error("crc mismatch (expected {expected:#06x}, computed {computed:#06x})")]
    CrcMismatch {
        /// CRC carried in the frame.
        expected: u16,
        /// CRC computed over the received bytes.
        computed: u16,
    },
}

/// Encode one frame for the wire.
///
/// `dst` must be a unicast id in `0..=253` or [`BROADCAST`].
///
/// # Errors
///
/// [`FrameEncodeError::InvalidDestination`] for `dst == 254`, the one value
/// the prefix scheme cannot express.
pub fn encode_frame(src: u8, dst: NodeId, payload: &[u8]) -> Result<Bytes, FrameEncodeError> {
    let prefix = match dst {
        BROADCAST => BROADCAST,
        d if d <= MAX_NODE_ID => d + 1,
        d => return Err(FrameEncodeError::InvalidDestination(d)),
    };
    let mut inner = Vec::with_capacity(payload.len() + 3);
    inner.push(src);
    inner.extend_from_slice(payload);
    let crc = FRAME_CRC.checksum(&inner);
    inner.extend_from_slice(&crc.to_le_bytes());
    let block = cobs::encode(&inner);

    let mut wire = BytesMut::with_capacity(block.len() + 3);
    wire.put_u8(prefix);
    wire.put_u8(prefix);
    wire.put_slice(&block);
    wire.put_u8(0);
    Ok(wire.freeze())
}

/// Reassembles frames from an arbitrarily-chunked byte stream.
///
/// Bytes are buffered until a zero delimiter arrives; each delimited slice
/// is then validated and either yielded as a [`Frame`] or dropped. After a
/// corrupted stretch the next genuine delimiter resynchronizes the stream,
/// so damage is always confined to the frames it actually touched.
#[derive(Debug, Default)]
pub struct Deframer {
    buf: BytesMut,
}

impl Deframer {
    /// New empty deframer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes read from the bus.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Extract the next intact frame, if a complete one is buffered.
    ///
    /// Damaged candidates are consumed and skipped; `None` means no
    /// complete frame remains, not that the stream is clean.
    pub fn next_frame(&mut self) -> Option<Frame> {
        while let Some(pos) = self.buf.iter().position(|&b| b == 0) {
            let candidate = self.buf.split_to(pos);
            self.buf.advance(1);
            match parse_frame(&candidate) {
                Ok(frame) => return Some(frame),
                Err(err) => {
                    trace!(%err, len = candidate.len(), "dropping damaged frame");
                }
            }
        }
        None
    }

    /// Bytes currently buffered awaiting a delimiter.
    pub fn pending_bytes(&self) -> usize {
        self.buf.len()
    }
}

fn parse_frame(raw: &[u8]) -> Result<Frame, FrameParseError> {
    if raw.len() < MIN_WIRE_LEN {
        return Err(FrameParseError::TooShort { len: raw.len() });
    }
    if raw[0] != raw[1] {
        return Err(FrameParseError::PrefixMismatch { first: raw[0], second: raw[1] });
    }
    // The delimiter split guarantees no zero bytes here, so the prefix is
    // at least 1 and the subtraction cannot wrap.
    let dst = if raw[0] == BROADCAST { BROADCAST } else { raw[0] - 1 };

    let inner = cobs::decode(&raw[2..])?;
    if inner.len() < 3 {
        return Err(FrameParseError::TooShort { len: raw.len() });
    }
    let (body, trailer) = inner.split_at(inner.len() - 2);
    let expected = u16::from_le_bytes([trailer[0], trailer[1]]);
    let computed = FRAME_CRC.checksum(body);
    if expected != computed {
        return Err(FrameParseError::CrcMismatch { expected, computed });
    }
    Ok(Frame { src: body[0], dst, payload: Bytes::copy_from_slice(&body[1..]) })
}
