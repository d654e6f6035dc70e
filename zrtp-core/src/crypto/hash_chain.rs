// Per-handshake hash chain H0..H3.
//
//   H0 = random
//   H1 = SHA-256(H0)
//   H2 = SHA-256(H1)
//   H3 = SHA-256(H2)   (root, committed in Hello)
//
// A sender reveals H3 in Hello, H2 in Commit, H1 in DHPart and H0 inside the
// encrypted Confirm. Every message before a reveal is MAC'd with the value
// revealed next, so a receiver can authenticate it one step later.

use rand::{CryptoRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::hash::{ct_eq, hash_sha256, HASH_LEN};

/// The four chain values of one handshake. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct HashChain {
    h0: [u8; HASH_LEN],
    h1: [u8; HASH_LEN],
    h2: [u8; HASH_LEN],
    h3: [u8; HASH_LEN],
}

impl HashChain {
    /// Generate a fresh chain from `rng`.
    pub fn generate<R: RngCore + CryptoRng + ?Sized>(rng: &mut R) -> Self {
        let mut h0 = [0u8; HASH_LEN];
        rng.fill_bytes(&mut h0);
        let chain = Self::from_preimage(h0);
        h0.zeroize();
        chain
    }

    /// Build the chain from a known H0 (deterministic tests).
    pub fn from_preimage(h0: [u8; HASH_LEN]) -> Self {
        let h1 = hash_sha256(&h0);
        let h2 = hash_sha256(&h1);
        let h3 = hash_sha256(&h2);
        Self { h0, h1, h2, h3 }
    }

    pub fn h0(&self) -> &[u8; HASH_LEN] {
        &self.h0
    }

    pub fn h1(&self) -> &[u8; HASH_LEN] {
        &self.h1
    }

    pub fn h2(&self) -> &[u8; HASH_LEN] {
        &self.h2
    }

    /// The root commitment, published in Hello.
    pub fn h3(&self) -> &[u8; HASH_LEN] {
        &self.h3
    }
}

impl std::fmt::Debug for HashChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashChain")
            .field("root", &hex::encode(self.h3))
            .finish_non_exhaustive()
    }
}

/// Check that `preimage` hashes, in exactly one step, to `committed`.
pub fn verify_link(preimage: &[u8], committed: &[u8]) -> bool {
    ct_eq(&hash_sha256(preimage), committed)
}
