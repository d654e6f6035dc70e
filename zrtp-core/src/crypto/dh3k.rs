// Finite-field Diffie-Hellman over the RFC 3526 3072-bit MODP group
// (key agreement type "DH3k"), generator 2.

use std::sync::OnceLock;

use num_bigint::BigUint;
use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::error::{Result, ZrtpError};

/// Public value length for DH3k: the byte length of the prime.
pub const DH3K_PUBLIC_LEN: usize = 384;

/// Secret exponent length. 512 bits, twice the strength of the group.
const SECRET_LEN: usize = 64;

const PRIME_HEX: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1",
    "29024E088A67CC74020BBEA63B139B22514A08798E3404DD",
    "EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245",
    "E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D",
    "C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F",
    "83655D23DCA3AD961C62F356208552BB9ED529077096966D",
    "670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9",
    "DE2BCBF6955817183995497CEA956AE515D2261898FA0510",
    "15728E5A8AAAC42DAD33170D04507A33A85521ABDF1CBA64",
    "ECFB850458DBEF0A8AEA71575D060C7DB3970F85A6E1E4C7",
    "ABF5AE8CDB0933D71E8C94E04A25619DCEE3D2261AD2EE6B",
    "F12FFA06D98A0864D87602733EC86A64521F2B18177B200C",
    "BBE117577A615D6C770988C0BAD946E208E24FA074E5AB31",
    "43DB5BFCE0FD108E4B82D120A93AD2CAFFFFFFFFFFFFFFFF",
);

fn prime() -> &'static BigUint {
    static PRIME: OnceLock<BigUint> = OnceLock::new();
    PRIME.get_or_init(|| {
        BigUint::parse_bytes(PRIME_HEX.as_bytes(), 16).expect("RFC 3526 prime is valid hex")
    })
}

/// Left-pad a big-endian integer below the prime to the prime's width.
fn to_fixed_bytes(value: &BigUint) -> Zeroizing<Vec<u8>> {
    let raw = Zeroizing::new(value.to_bytes_be());
    debug_assert!(raw.len() <= DH3K_PUBLIC_LEN);
    let mut out = Zeroizing::new(vec![0u8; DH3K_PUBLIC_LEN]);
    let offset = DH3K_PUBLIC_LEN.saturating_sub(raw.len());
    out[offset..].copy_from_slice(&raw[raw.len() - (DH3K_PUBLIC_LEN - offset)..]);
    out
}

/// A DH3k ephemeral keypair. The exponent is kept as zeroizing bytes and only
/// lifted into a `BigUint` for the duration of an exponentiation.
///
/// `BigUint` cannot be zeroized: its limbs (the exponent, the shared value and
/// modpow's intermediates) are freed without being cleared. Only the byte
/// buffers this module owns are wiped.
pub struct Dh3kKeyPair {
    secret: Zeroizing<Vec<u8>>,
    public: Vec<u8>,
}

impl Dh3kKeyPair {
    /// Generate a new ephemeral keypair from `rng`.
    pub fn generate<R: RngCore + CryptoRng + ?Sized>(rng: &mut R) -> Self {
        let mut secret = Zeroizing::new(vec![0u8; SECRET_LEN]);
        rng.fill_bytes(&mut secret[..]);
        Self::from_secret_bytes(secret)
    }

    fn from_secret_bytes(secret: Zeroizing<Vec<u8>>) -> Self {
        let exponent = BigUint::from_bytes_be(&secret);
        let public = BigUint::from(2u32).modpow(&exponent, prime());
        Self {
            secret,
            public: to_fixed_bytes(&public).to_vec(),
        }
    }

    /// The 384-byte big-endian public value sent in DHPart.
    pub fn public_key_bytes(&self) -> &[u8] {
        &self.public
    }

    /// Compute `peer_public ^ secret mod p`.
    ///
    /// The peer value must lie strictly between 1 and p-1; the two excluded
    /// values (and anything out of range) would leak or fix the result.
    pub fn diffie_hellman(&self, peer_public: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        if peer_public.len() != DH3K_PUBLIC_LEN {
            return Err(ZrtpError::InvalidPublicValue(format!(
                "DH3k public value must be {DH3K_PUBLIC_LEN} bytes, got {}",
                peer_public.len()
            )));
        }
        let p = prime();
        let one = BigUint::from(1u32);
        let p_minus_one = p - &one;
        let peer = BigUint::from_bytes_be(peer_public);
        if peer <= one || peer >= p_minus_one {
            return Err(ZrtpError::InvalidPublicValue(
                "DH3k peer value outside (1, p-1)".into(),
            ));
        }
        let exponent = BigUint::from_bytes_be(&self.secret);
        let shared = peer.modpow(&exponent, p);
        Ok(to_fixed_bytes(&shared))
    }
}

impl std::fmt::Debug for Dh3kKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dh3kKeyPair").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn prime_is_3072_bits() {
        assert_eq!(prime().bits(), 3072);
    }

    #[test]
    fn shared_secret_matches() {
        let mut rng = StdRng::seed_from_u64(3);
        let alice = Dh3kKeyPair::generate(&mut rng);
        let bob = Dh3kKeyPair::generate(&mut rng);

        let ab = alice.diffie_hellman(bob.public_key_bytes()).unwrap();
        let ba = bob.diffie_hellman(alice.public_key_bytes()).unwrap();
        assert_eq!(*ab, *ba);
        assert_eq!(ab.len(), DH3K_PUBLIC_LEN);
        assert_eq!(alice.public_key_bytes().len(), DH3K_PUBLIC_LEN);
    }

    #[test]
    fn fixed_width_encoding() {
        let one = to_fixed_bytes(&BigUint::from(1u32));
        assert_eq!(one.len(), DH3K_PUBLIC_LEN);
        assert_eq!(one[DH3K_PUBLIC_LEN - 1], 1);
        assert!(one[..DH3K_PUBLIC_LEN - 1].iter().all(|&b| b == 0));

        let top = to_fixed_bytes(&(prime() - BigUint::from(1u32)));
        assert_eq!(top[0], 0xFF);
        assert_eq!(top[DH3K_PUBLIC_LEN - 1], 0xFE);
    }

    #[test]
    fn degenerate_values_rejected() {
        let alice = Dh3kKeyPair::generate(&mut StdRng::seed_from_u64(4));

        let one = to_fixed_bytes(&BigUint::from(1u32));
        assert!(alice.diffie_hellman(&one).is_err());

        let p_minus_one = to_fixed_bytes(&(prime() - BigUint::from(1u32)));
        assert!(alice.diffie_hellman(&p_minus_one).is_err());

        assert!(alice.diffie_hellman(&[0xFF; DH3K_PUBLIC_LEN]).is_err());
        assert!(alice.diffie_hellman(&[2u8; 32]).is_err());
    }
}
