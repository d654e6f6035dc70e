// X25519 Diffie-Hellman (key agreement type "X255").

use rand::{CryptoRng, RngCore};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::error::{Result, ZrtpError};

/// Public value length for X255.
pub const X25519_PUBLIC_LEN: usize = 32;

/// An X25519 ephemeral keypair for one handshake.
pub struct X25519KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl X25519KeyPair {
    /// Generate a new ephemeral keypair from `rng`.
    pub fn generate<R: RngCore + CryptoRng + ?Sized>(rng: &mut R) -> Self {
        let mut bytes = Zeroizing::new([0u8; 32]);
        rng.fill_bytes(&mut bytes[..]);
        Self::from_secret_bytes(*bytes)
    }

    /// Create from existing secret bytes (used in deterministic tests).
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// The 32-byte public value sent in DHPart.
    pub fn public_key_bytes(&self) -> [u8; X25519_PUBLIC_LEN] {
        *self.public.as_bytes()
    }

    /// Perform Diffie-Hellman with the peer's public value.
    ///
    /// Low-order peer points produce an all-zero result; those are rejected so a
    /// peer cannot force a known shared secret.
    pub fn diffie_hellman(&self, peer_public: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let peer: [u8; X25519_PUBLIC_LEN] = peer_public.try_into().map_err(|_| {
            ZrtpError::InvalidPublicValue(format!(
                "X255 public value must be {X25519_PUBLIC_LEN} bytes, got {}",
                peer_public.len()
            ))
        })?;
        let shared = self.secret.diffie_hellman(&PublicKey::from(peer));
        if !shared.was_contributory() {
            return Err(ZrtpError::InvalidPublicValue(
                "X255 peer value is a low-order point".into(),
            ));
        }
        Ok(Zeroizing::new(shared.as_bytes().to_vec()))
    }
}

impl std::fmt::Debug for X25519KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("X25519KeyPair")
            .field("public", &hex::encode(self.public.as_bytes()))
            .finish_non_exhaustive()
    }
}
