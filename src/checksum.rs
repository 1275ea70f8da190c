//! Deterministic checksums for game states.
//!
//! Hosts attach checksums to keyframes and clients compare them against their own
//! confirmed history to detect desyncs. The hash must be identical on every platform
//! and every run, so `std`'s randomly seeded hashers are unusable here. States are
//! encoded with [`crate::network::codec`] and the bytes are hashed with 128-bit FNV-1a.
//!
//! ```
//! use keyframe_rollback::checksum::compute_checksum;
//!
//! let a = compute_checksum(&(1u32, 2u32)).unwrap();
//! let b = compute_checksum(&(1u32, 2u32)).unwrap();
//! assert_eq!(a, b);
//! ```

use serde::Serialize;

use crate::network::codec::{encode_state, CodecError};

const FNV_OFFSET_BASIS: u128 = 0x6c62_272e_07bb_0142_62b8_2175_6295_c58d;
const FNV_PRIME: u128 = 0x0000_0000_0100_0000_0000_0000_0000_013b;

/// Serializes `state` and hashes the bytes.
///
/// Fails only if the state cannot be encoded, e.g. a map with non-string keys that
/// serde refuses.
pub fn compute_checksum<T: Serialize>(state: &T) -> Result<u128, CodecError> {
    let bytes = encode_state(state)?;
    Ok(hash_bytes(&bytes))
}

/// 128-bit FNV-1a over raw bytes.
#[inline]
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> u128 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, &byte| {
        (hash ^ u128::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
    struct Arena {
        frame: u32,
        positions: Vec<(i32, i32)>,
        score: [u16; 2],
    }

    fn sample() -> Arena {
        Arena {
            frame: 100,
            positions: vec![(1, 2), (-3, 4)],
            score: [3, 1],
        }
    }

    #[test]
    fn empty_input_hashes_to_offset_basis() {
        assert_eq!(hash_bytes(&[]), FNV_OFFSET_BASIS);
    }

    #[test]
    fn known_vector() {
        // FNV-1a 128 of "a"
        assert_eq!(hash_bytes(b"a"), 0xd228_cb69_6f1a_8caf_7891_2b70_4e4a_8964);
    }

    #[test]
    fn same_state_same_checksum() {
        assert_eq!(
            compute_checksum(&sample()).unwrap(),
            compute_checksum(&sample()).unwrap()
        );
    }

    #[test]
    fn any_field_change_alters_checksum() {
        let base = compute_checksum(&sample()).unwrap();

        let mut moved = sample();
        moved.positions[1].0 += 1;
        assert_ne!(base, compute_checksum(&moved).unwrap());

        let mut scored = sample();
        scored.score.swap(0, 1);
        assert_ne!(base, compute_checksum(&scored).unwrap());
    }

    #[test]
    fn byte_order_matters() {
        assert_ne!(hash_bytes(&[1, 2]), hash_bytes(&[2, 1]));
    }
}
