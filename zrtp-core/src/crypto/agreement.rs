// Key agreement variant selection.
//
// The variant is parsed from its 4-byte wire name when a Hello or Commit is
// decoded, then fixed in the handshake state together with the key pair it
// produced. Nothing downstream re-dispatches on the name.

use std::fmt;

use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto::dh3k::{Dh3kKeyPair, DH3K_PUBLIC_LEN};
use crate::crypto::x25519::{X25519KeyPair, X25519_PUBLIC_LEN};
use crate::error::Result;

/// The two supported key agreement mechanisms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyAgreementType {
    /// X25519 elliptic-curve Diffie-Hellman.
    #[serde(rename = "X255")]
    X255,
    /// 3072-bit finite-field Diffie-Hellman.
    #[serde(rename = "DH3k")]
    Dh3k,
}

impl KeyAgreementType {
    /// Wire name used in Hello and Commit.
    pub fn wire_name(self) -> &'static [u8; 4] {
        match self {
            KeyAgreementType::X255 => b"X255",
            KeyAgreementType::Dh3k => b"DH3k",
        }
    }

    /// Resolve from a wire name.
    pub fn from_wire_name(name: &[u8]) -> Option<Self> {
        match name {
            b"X255" => Some(KeyAgreementType::X255),
            b"DH3k" => Some(KeyAgreementType::Dh3k),
            _ => None,
        }
    }

    /// Length of the public value carried in DHPart1/DHPart2.
    pub fn public_value_len(self) -> usize {
        match self {
            KeyAgreementType::X255 => X25519_PUBLIC_LEN,
            KeyAgreementType::Dh3k => DH3K_PUBLIC_LEN,
        }
    }
}

impl fmt::Display for KeyAgreementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KeyAgreementType::X255 => "X255",
            KeyAgreementType::Dh3k => "DH3k",
        })
    }
}

/// Ephemeral key material for whichever variant was negotiated.
#[derive(Debug)]
pub enum KeyPair {
    X255(X25519KeyPair),
    Dh3k(Dh3kKeyPair),
}

impl KeyPair {
    /// Generate an ephemeral keypair for `kind`.
    pub fn generate<R: RngCore + CryptoRng + ?Sized>(kind: KeyAgreementType, rng: &mut R) -> Self {
        match kind {
            KeyAgreementType::X255 => KeyPair::X255(X25519KeyPair::generate(rng)),
            KeyAgreementType::Dh3k => KeyPair::Dh3k(Dh3kKeyPair::generate(rng)),
        }
    }

    pub fn kind(&self) -> KeyAgreementType {
        match self {
            KeyPair::X255(_) => KeyAgreementType::X255,
            KeyPair::Dh3k(_) => KeyAgreementType::Dh3k,
        }
    }

    /// The public value to place in our DHPart.
    pub fn public_value(&self) -> Vec<u8> {
        match self {
            KeyPair::X255(kp) => kp.public_key_bytes().to_vec(),
            KeyPair::Dh3k(kp) => kp.public_key_bytes().to_vec(),
        }
    }

    /// Compute the raw DH result with the peer's public value.
    pub fn agree(&self, peer_public: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        match self {
            KeyPair::X255(kp) => kp.diffie_hellman(peer_public),
            KeyPair::Dh3k(kp) => kp.diffie_hellman(peer_public),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn wire_names_roundtrip() {
        for kind in [KeyAgreementType::X255, KeyAgreementType::Dh3k] {
            assert_eq!(KeyAgreementType::from_wire_name(kind.wire_name()), Some(kind));
        }
        assert_eq!(KeyAgreementType::from_wire_name(b"EC25"), None);
        assert_eq!(KeyAgreementType::from_wire_name(b"X25"), None);
    }

    #[test]
    fn both_variants_agree() {
        let mut rng = StdRng::seed_from_u64(11);
        for kind in [KeyAgreementType::X255, KeyAgreementType::Dh3k] {
            let a = KeyPair::generate(kind, &mut rng);
            let b = KeyPair::generate(kind, &mut rng);
            assert_eq!(a.kind(), kind);
            assert_eq!(a.public_value().len(), kind.public_value_len());
            let ab = a.agree(&b.public_value()).unwrap();
            let ba = b.agree(&a.public_value()).unwrap();
            assert_eq!(*ab, *ba);
        }
    }

    #[test]
    fn mismatched_public_value_rejected() {
        let mut rng = StdRng::seed_from_u64(12);
        let x = KeyPair::generate(KeyAgreementType::X255, &mut rng);
        let d = KeyPair::generate(KeyAgreementType::Dh3k, &mut rng);
        assert!(x.agree(&d.public_value()).is_err());
        assert!(d.agree(&x.public_value()).is_err());
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&vec![KeyAgreementType::X255, KeyAgreementType::Dh3k]).unwrap();
        assert_eq!(json, r#"["X255","DH3k"]"#);
    }
}
