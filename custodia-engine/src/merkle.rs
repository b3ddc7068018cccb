//! Bit-exact re-derivation of a ledger revision's Merkle digest proof
//! (section 4.2).
//!
//! Starting from the entry's own 32-byte hash, each proof hash is combined
//! with the running hash by pairwise-sorting the two by unsigned
//! lexicographic byte order (the larger one becomes the left operand),
//! concatenating `left || right`, and hashing with SHA-256. After consuming
//! every proof hash the result must equal the base64-decoded digest tip.

use base64::Engine as _;
use custodia_api_core::def::ProofHash;
use custodia_api_core::error::{EngineApiError, EngineErrorKind};
use ring::digest::{digest, SHA256};

/// Combines two sibling hashes into their parent hash: the lexicographically
/// larger hash is the left operand, the smaller is the right.
pub fn combine(a: ProofHash, b: ProofHash) -> ProofHash {
    let (left, right) = if a >= b { (a, b) } else { (b, a) };
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(&left);
    buf[32..].copy_from_slice(&right);
    let out = digest(&SHA256, &buf);
    let mut result = [0u8; 32];
    result.copy_from_slice(out.as_ref());
    result
}

/// Re-derives the Merkle root from `entry_hash` and `proof_hashes`, in
/// order, and compares it against `digest_tip_b64`.
pub fn verify(
    entry_hash: ProofHash,
    proof_hashes: &[ProofHash],
    digest_tip_b64: &str,
) -> Result<(), EngineApiError> {
    let expected = base64::engine::general_purpose::STANDARD
        .decode(digest_tip_b64)
        .map_err(|e| {
            EngineApiError::new(
                EngineErrorKind::MerkleInvalid,
                format!("digest tip is not valid base64: {e}"),
            )
        })?;

    let mut running = entry_hash;
    for &sibling in proof_hashes {
        running = combine(running, sibling);
    }

    if running.as_slice() == expected.as_slice() {
        Ok(())
    } else {
        Err(EngineApiError::new(
            EngineErrorKind::MerkleInvalid,
            "re-derived digest does not match ledger digest tip",
        ))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sha256(n: u8) -> ProofHash {
        let out = digest(&SHA256, &[n]);
        let mut result = [0u8; 32];
        result.copy_from_slice(out.as_ref());
        result
    }

    /// Scenario S5: a known sequence of four leaf hashes reduces to a
    /// precomputed root, and flipping any input byte breaks verification.
    #[test]
    fn known_answer_reduction_succeeds() {
        let h1 = sha256(1);
        let h2 = sha256(2);
        let h3 = sha256(3);
        let h4 = sha256(4);

        // Root computed the same way `verify` does: entry_hash = h1, proof
        // hashes = [h2, h3, h4].
        let left = combine(h1, h2);
        let root = combine(combine(left, h3), h4);

        use base64::Engine as _;
        let root_b64 = base64::engine::general_purpose::STANDARD.encode(root);

        assert!(verify(h1, &[h2, h3, h4], &root_b64).is_ok());

        let mut bad_h2 = h2;
        bad_h2[0] ^= 0x01;
        assert!(verify(h1, &[bad_h2, h3, h4], &root_b64).is_err());
    }

    #[test]
    fn pairwise_sort_is_order_invariant() {
        let a = sha256(10);
        let b = sha256(20);
        assert_eq!(combine(a, b), combine(b, a));
    }

    #[test]
    fn bad_base64_digest_is_merkle_invalid() {
        let h1 = sha256(1);
        let err = verify(h1, &[], "not-base64!!").unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::MerkleInvalid);
    }

    proptest::proptest! {
        /// `combine` is order-invariant under pair-sort for any two 32-byte
        /// hashes, not just the `sha256(n)` fixtures above (section 8).
        #[test]
        fn combine_is_order_invariant(a: [u8; 32], b: [u8; 32]) {
            proptest::prop_assert_eq!(combine(a, b), combine(b, a));
        }

        /// Flipping a single bit anywhere in a proof hash changes the
        /// re-derived root (barring an astronomically unlikely collision).
        #[test]
        fn flipping_a_proof_bit_changes_the_root(a: [u8; 32], b: [u8; 32], bit in 0u32..256) {
            let root = combine(a, b);
            let mut flipped = b;
            flipped[(bit / 8) as usize] ^= 1 << (bit % 8);
            proptest::prop_assume!(flipped != b);
            proptest::prop_assert_ne!(root, combine(a, flipped));
        }
    }
}
