//! Consistent Overhead Byte Stuffing.
//!
//! Rewrites a byte string so it contains no zero bytes, letting a single
//! zero terminate a frame on a continuous byte stream. The output is chains
//! of up to 254 non-zero bytes, each preceded by a length byte: `len + 1`
//! when the chain ended at a consumed zero in the input, `0xFF` when it hit
//! the 254-byte ceiling without consuming anything.
//!
//! Worst-case expansion for `n` input bytes is `n + ceil(n / 254) + 1`;
//! an empty input encodes to the single byte `0x01`.

use thiserror::Error;

/// Decoding failures. Encoding cannot fail.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CobsError {
    /// A length byte or chain byte was zero. Zero is reserved for the frame
    /// delimiter and must never appear inside an encoded block.
    #[error("zero byte inside encoded block")]
    UnexpectedZero,

    /// A length byte pointed past the end of the input.
    #[error("encoded block truncated mid-chain")]
    Truncated,
}

/// Encode `input` into a zero-free byte string.
pub fn encode(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() + input.len() / 254 + 2);
    let mut chain_start = 0usize;
    let mut final_zero = true;
    for (idx, &byte) in input.iter().enumerate() {
        if byte == 0 {
            final_zero = true;
            out.push((idx - chain_start + 1) as u8);
            out.extend_from_slice(&input[chain_start..idx]);
            chain_start = idx + 1;
        } else if idx - chain_start == 0xFD {
            // Chain hit 254 data bytes: emit it full-length without
            // consuming an input zero.
            final_zero = false;
            out.push(0xFF);
            out.extend_from_slice(&input[chain_start..=idx]);
            chain_start = idx + 1;
        }
    }
    if input.len() != chain_start || final_zero {
        out.push((input.len() - chain_start + 1) as u8);
        out.extend_from_slice(&input[chain_start..]);
    }
    out
}

/// Decode a zero-free byte string produced by [`encode`].
pub fn decode(input: &[u8]) -> Result<Vec<u8>, CobsError> {
    let mut out = Vec::with_capacity(input.len());
    if input.is_empty() {
        return Ok(out);
    }
    let mut idx = 0usize;
    loop {
        let len = usize::from(input[idx]);
        if len == 0 {
            return Err(CobsError::UnexpectedZero);
        }
        idx += 1;
        let end = idx + len - 1;
        if end > input.len() {
            return Err(CobsError::Truncated);
        }
        let chain = &input[idx..end];
        if chain.contains(&0) {
            return Err(CobsError::UnexpectedZero);
        }
        out.extend_from_slice(chain);
        idx = end;
        if idx >= input.len() {
            break;
        }
        if len < 0xFF {
            out.push(0);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn worked_example() {
        let encoded = encode(&[0x11, 0x22, 0x00, 0x33]);
        assert_eq!(encoded, [0x03, 0x11, 0x22, 0x02, 0x33]);
        assert_eq!(decode(&encoded).unwrap(), [0x11, 0x22, 0x00, 0x33]);
    }

    #[test]
    fn empty_input() {
        let encoded = encode(&[]);
        assert_eq!(encoded, [0x01]);
        assert_eq!(decode(&encoded).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn all_zeroes() {
        let input = [0u8; 4];
        let encoded = encode(&input);
        assert_eq!(encoded, [0x01, 0x01, 0x01, 0x01, 0x01]);
        assert_eq!(decode(&encoded).unwrap(), input);
    }

    #[test]
    fn chain_boundaries() {
        // 253, 254, and 255 non-zero bytes straddle the 254-byte chain
        // ceiling in three different ways.
        for n in [253usize, 254, 255, 508, 509] {
            let input: Vec<u8> = (0..n).map(|i| (i % 255) as u8 + 1).collect();
            let encoded = encode(&input);
            assert!(!encoded.contains(&0), "zero byte leaked for n={n}");
            assert_eq!(decode(&encoded).unwrap(), input, "round trip failed for n={n}");
        }
    }

    #[test]
    fn exact_boundary_has_no_trailing_length_byte() {
        let input = [1u8; 254];
        let encoded = encode(&input);
        assert_eq!(encoded.len(), 255);
        assert_eq!(encoded[0], 0xFF);
        assert_eq!(decode(&encoded).unwrap(), input);
    }

    #[test]
    fn trailing_zero_round_trips() {
        let input = [0x01, 0x00];
        let encoded = encode(&input);
        assert_eq!(encoded, [0x02, 0x01, 0x01]);
        assert_eq!(decode(&encoded).unwrap(), input);
    }

    #[test]
    fn long_mixed_input_round_trips() {
        let input: Vec<u8> = (0..10_000u32).map(|i| (i * 7 % 256) as u8).collect();
        let encoded = encode(&input);
        assert!(!encoded.contains(&0));
        assert_eq!(decode(&encoded).unwrap(), input);
    }

    #[test]
    fn decode_rejects_zero_length_byte() {
        assert_eq!(decode(&[0x00, 0x11]), Err(CobsError::UnexpectedZero));
        assert_eq!(decode(&[0x02, 0x11, 0x00]), Err(CobsError::UnexpectedZero));
    }

    #[test]
    fn decode_rejects_zero_inside_chain() {
        assert_eq!(decode(&[0x03, 0x00, 0x11]), Err(CobsError::UnexpectedZero));
    }

    #[test]
    fn decode_rejects_overrunning_chain() {
        assert_eq!(decode(&[0x05, 0x11, 0x22]), Err(CobsError::Truncated));
        assert_eq!(decode(&[0xFF, 0x11]), Err(CobsError::Truncated));
    }
}
