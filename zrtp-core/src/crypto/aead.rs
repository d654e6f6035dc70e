// ChaCha20-Poly1305 encryption of the Confirm payload (RFC 8439).
//
// Confirm messages are encrypt-then-MAC: the payload is sealed under the
// sender's ZRTP key, then the nonce and ciphertext are covered by a truncated
// HMAC under the sender's MAC key (see `handshake::messages::Confirm`).

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};

use crate::error::{Result, ZrtpError};

/// Nonce length carried in the Confirm message.
pub const NONCE_LEN: usize = 12;

/// Poly1305 tag appended to the ciphertext.
pub const TAG_LEN: usize = 16;

/// ChaCha20-Poly1305 keyed with a confirm ("ZRTP") key.
pub struct ConfirmCipher<'a> {
    key: &'a [u8; 32],
}

impl<'a> ConfirmCipher<'a> {
    pub fn new(key: &'a [u8; 32]) -> Self {
        Self { key }
    }

    /// Encrypt `plaintext` with the given 12-byte `nonce` and associated data `aad`.
    ///
    /// Returns ciphertext || 16-byte Poly1305 tag.
    pub fn encrypt(&self, nonce: &[u8; NONCE_LEN], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new_from_slice(self.key)
            .map_err(|e| ZrtpError::Encryption(format!("cipher init: {e}")))?;
        let payload = Payload { msg: plaintext, aad };
        cipher
            .encrypt(Nonce::from_slice(nonce), payload)
            .map_err(|e| ZrtpError::Encryption(format!("{e}")))
    }

    /// Decrypt `ciphertext` (tag appended) with the same `nonce` and `aad`
    /// used during encryption.
    pub fn decrypt(&self, nonce: &[u8; NONCE_LEN], ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new_from_slice(self.key)
            .map_err(|e| ZrtpError::Decryption(format!("cipher init: {e}")))?;
        let payload = Payload {
            msg: ciphertext,
            aad,
        };
        cipher
            .decrypt(Nonce::from_slice(nonce), payload)
            .map_err(|e| ZrtpError::Decryption(format!("{e}")))
    }
}
