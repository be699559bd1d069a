//! Property-based tests for the COBS codec and frame envelope.
//!
//! These verify the codec contracts for arbitrary inputs rather than
//! hand-picked examples: byte-stuffing round-trips and stays zero-free,
//! frames survive encode/decode for every addressable destination, and the
//! deframer reassembles back-to-back frames regardless of how the stream
//! is chunked.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use partyline_proto::{BROADCAST, Deframer, MAX_NODE_ID, cobs, encode_frame};
use proptest::prelude::*;

fn arbitrary_destination() -> impl Strategy<Value = u8> {
    prop_oneof![4 => 0u8..=MAX_NODE_ID, 1 => Just(BROADCAST)]
}

proptest! {
    #[test]
    fn cobs_round_trip(input in prop::collection::vec(any::<u8>(), 0..4096)) {
        let encoded = cobs::encode(&input);
        prop_assert!(!encoded.contains(&0), "encoded block contains a zero byte");
        prop_assert!(encoded.len() <= input.len() + input.len() / 254 + 1);
        prop_assert_eq!(cobs::decode(&encoded).expect("decode"), input);
    }

    #[test]
    fn cobs_round_trip_zero_heavy(
        input in prop::collection::vec(prop_oneof![3 => Just(0u8), 1 => any::<u8>()], 0..2048),
    ) {
        let encoded = cobs::encode(&input);
        prop_assert!(!encoded.contains(&0));
        prop_assert_eq!(cobs::decode(&encoded).expect("decode"), input);
    }

    #[test]
    fn frame_round_trip(
        src in any::<u8>(),
        dst in arbitrary_destination(),
        payload in prop::collection::vec(any::<u8>(), 0..512),
    ) {
        let wire = encode_frame(src, dst, &payload).expect("encode");
        prop_assert_eq!(wire.iter().filter(|&&b| b == 0).count(), 1);
        prop_assert_eq!(wire.last(), Some(&0));

        let mut deframer = Deframer::new();
        deframer.extend(&wire);
        let frame = deframer.next_frame().expect("frame");
        prop_assert_eq!(frame.src, src);
        prop_assert_eq!(frame.dst, dst);
        prop_assert_eq!(&frame.payload[..], &payload[..]);
        prop_assert!(deframer.next_frame().is_none());
    }

    #[test]
    fn deframer_reassembles_chunked_streams(
        frames in prop::collection::vec(
            (any::<u8>(), 0u8..=MAX_NODE_ID, prop::collection::vec(any::<u8>(), 0..64)),
            1..8,
        ),
        chunk_len in 1usize..16,
    ) {
        let mut stream = Vec::new();
        for (src, dst, payload) in &frames {
            stream.extend_from_slice(&encode_frame(*src, *dst, payload).expect("encode"));
        }

        let mut deframer = Deframer::new();
        let mut decoded = Vec::new();
        for chunk in stream.chunks(chunk_len) {
            deframer.extend(chunk);
            while let Some(frame) = deframer.next_frame() {
                decoded.push(frame);
            }
        }

        prop_assert_eq!(decoded.len(), frames.len());
        for (frame, (src, dst, payload)) in decoded.iter().zip(&frames) {
            prop_assert_eq!(frame.src, *src);
            prop_assert_eq!(frame.dst, *dst);
            prop_assert_eq!(&frame.payload[..], &payload[..]);
        }
        prop_assert_eq!(deframer.pending_bytes(), 0);
    }

    #[test]
    fn single_corrupt_byte_never_fabricates_a_frame(
        payload in prop::collection::vec(any::<u8>(), 0..64),
        pos_seed in any::<prop::sample::Index>(),
        replacement in any::<u8>(),
    ) {
        let wire = encode_frame(5, 2, &payload).expect("encode");
        let mut bad = wire.to_vec();
        // Corrupt one byte inside the protected region (past the prefix,
        // before the delimiter).
        let pos = 2 + pos_seed.index(bad.len() - 3);
        prop_assume!(bad[pos] != replacement);
        bad[pos] = replacement;

        let mut deframer = Deframer::new();
        deframer.extend(&bad);
        if let Some(frame) = deframer.next_frame() {
            // CRC-16 misses a corruption with probability ~2^-16; what must
            // never happen is a frame that claims to be the original.
            prop_assert!(
                frame.src != 5 || frame.payload != payload,
                "corrupted wire image decoded as the original frame"
            );
        }
    }
}
