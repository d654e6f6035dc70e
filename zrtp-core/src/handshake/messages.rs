// Handshake messages exchanged during a ZRTP key agreement.
//
//   Initiator                          Responder
//     |<-------------------- Hello -----|  (responder advertises first)
//     |--- Hello ---------------------->|
//     |<-------------------- HelloACK --|
//     |--- Commit --------------------->|
//     |<-------------------- DHPart1 ---|
//     |--- DHPart2 -------------------->|
//     |<-------------------- Confirm1 --|
//     |--- Confirm2 ------------------->|
//     |<-------------------- Conf2ACK --|

use std::fmt;

use bytes::Bytes;
use rand::{CryptoRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::aead::{ConfirmCipher, NONCE_LEN, TAG_LEN};
use crate::crypto::agreement::KeyAgreementType;
use crate::crypto::hash::{truncated_mac, verify_truncated_mac, HASH_LEN, MAC_LEN};
use crate::crypto::hash_chain::verify_link;
use crate::error::{Result, ZrtpError};
use crate::handshake::codec::Authenticated;
use crate::zid::Zid;

/// Protocol version advertised and required in Hello.
pub const PROTOCOL_VERSION: &[u8; 4] = b"1.10";

/// Width of the client identifier field in Hello.
pub const CLIENT_ID_LEN: usize = 16;

/// Plaintext length of a Confirm payload: H0 || flags || cache expiry.
pub const CONFIRM_PAYLOAD_LEN: usize = HASH_LEN + 4 + 4;

/// Ciphertext length of a Confirm payload.
pub const CONFIRM_CIPHERTEXT_LEN: usize = CONFIRM_PAYLOAD_LEN + TAG_LEN;

/// The eight handshake message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Hello,
    HelloAck,
    Commit,
    DhPart1,
    DhPart2,
    Confirm1,
    Confirm2,
    Conf2Ack,
}

impl MessageType {
    /// The 8-byte ASCII type block that follows the length field.
    pub fn type_block(self) -> &'static [u8; 8] {
        match self {
            MessageType::Hello => b"Hello   ",
            MessageType::HelloAck => b"HelloACK",
            MessageType::Commit => b"Commit  ",
            MessageType::DhPart1 => b"DHPart1 ",
            MessageType::DhPart2 => b"DHPart2 ",
            MessageType::Confirm1 => b"Confirm1",
            MessageType::Confirm2 => b"Confirm2",
            MessageType::Conf2Ack => b"Conf2ACK",
        }
    }

    pub fn from_type_block(block: &[u8]) -> Option<Self> {
        match block {
            b"Hello   " => Some(MessageType::Hello),
            b"HelloACK" => Some(MessageType::HelloAck),
            b"Commit  " => Some(MessageType::Commit),
            b"DHPart1 " => Some(MessageType::DhPart1),
            b"DHPart2 " => Some(MessageType::DhPart2),
            b"Confirm1" => Some(MessageType::Confirm1),
            b"Confirm2" => Some(MessageType::Confirm2),
            b"Conf2ACK" => Some(MessageType::Conf2Ack),
            _ => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let block = self.type_block();
        let name = std::str::from_utf8(block).unwrap_or("?").trim_end();
        f.write_str(name)
    }
}

/// Which half of a two-part exchange a DHPart or Confirm message is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Part {
    /// Sent by the responder (DHPart1, Confirm1).
    One,
    /// Sent by the initiator (DHPart2, Confirm2).
    Two,
}

/// A decoded or locally built message together with its exact wire bytes.
///
/// MACs, the HVI and the transcript hash are all computed over the bytes as
/// they travelled, never over a re-encoding.
#[derive(Debug, Clone)]
pub struct Framed<T> {
    message: T,
    bytes: Bytes,
}

impl<T> Framed<T> {
    pub(crate) fn new(message: T, bytes: Bytes) -> Self {
        Self { message, bytes }
    }

    pub fn message(&self) -> &T {
        &self.message
    }

    /// The canonical wire encoding.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }
}

impl<T: Authenticated> Framed<T> {
    /// The trailing MAC.
    pub fn mac(&self) -> &[u8] {
        &self.bytes[self.bytes.len() - MAC_LEN..]
    }

    /// Everything the trailing MAC covers (header and fields).
    pub fn mac_input(&self) -> &[u8] {
        &self.bytes[..self.bytes.len() - MAC_LEN]
    }

    /// Authenticate this message with a hash chain value revealed later.
    ///
    /// `preimage` must hash in one step to the chain value this message
    /// carries, and must key its MAC. The link is checked first so a wrong
    /// chain position is reported as such.
    pub fn authenticate(&self, preimage: &[u8; HASH_LEN]) -> Result<()> {
        let ty = self.message.message_type();
        if !verify_link(preimage, self.message.chain_value()) {
            return Err(ZrtpError::HashChainMismatch(ty));
        }
        if !verify_truncated_mac(preimage, self.mac_input(), self.mac()) {
            return Err(ZrtpError::MacMismatch(ty));
        }
        Ok(())
    }
}

// ── Hello ────────────────────────────────────────────────────────────────

/// Capability advertisement and hash chain root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub version: [u8; 4],
    pub client_id: [u8; CLIENT_ID_LEN],
    /// Hash chain root H3.
    pub h3: [u8; HASH_LEN],
    pub zid: Zid,
    /// Supported key agreement types in preference order. Types we do not
    /// recognise are dropped at decode time.
    pub key_agreements: Vec<KeyAgreementType>,
}

impl Hello {
    pub fn new(
        client_id: &str,
        h3: [u8; HASH_LEN],
        zid: Zid,
        key_agreements: Vec<KeyAgreementType>,
    ) -> Self {
        let mut padded = [b' '; CLIENT_ID_LEN];
        let id = client_id.as_bytes();
        let n = id.len().min(CLIENT_ID_LEN);
        padded[..n].copy_from_slice(&id[..n]);
        Self {
            version: *PROTOCOL_VERSION,
            client_id: padded,
            h3,
            zid,
            key_agreements,
        }
    }

    /// Client identifier with padding removed.
    pub fn client_id(&self) -> String {
        String::from_utf8_lossy(&self.client_id).trim_end().to_string()
    }

    pub fn supports(&self, kind: KeyAgreementType) -> bool {
        self.key_agreements.contains(&kind)
    }
}

/// Acknowledges the peer's Hello.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelloAck;

// ── Commit ───────────────────────────────────────────────────────────────

/// The initiator's choice of key agreement and its HVI commitment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    /// Hash chain value H2; authenticates the initiator's Hello.
    pub h2: [u8; HASH_LEN],
    pub zid: Zid,
    pub key_agreement: KeyAgreementType,
    /// SHA-256(initiator DHPart2 || responder Hello).
    pub hvi: [u8; HASH_LEN],
}

// ── DHPart1 / DHPart2 ────────────────────────────────────────────────────

/// Ephemeral public value for the negotiated key agreement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhPart {
    pub part: Part,
    /// Hash chain value H1; authenticates the sender's previous message.
    pub h1: [u8; HASH_LEN],
    pub public_value: Vec<u8>,
}

impl DhPart {
    /// Check the public value width against the variant fixed at Commit.
    pub fn validate_for(&self, kind: KeyAgreementType) -> Result<()> {
        if self.public_value.len() != kind.public_value_len() {
            return Err(ZrtpError::InvalidPublicValue(format!(
                "{} public value must be {} bytes, got {}",
                kind,
                kind.public_value_len(),
                self.public_value.len()
            )));
        }
        Ok(())
    }
}

// ── Confirm1 / Confirm2 ──────────────────────────────────────────────────

/// Decrypted Confirm contents.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ConfirmPayload {
    /// Hash chain pre-image H0.
    pub h0: [u8; HASH_LEN],
    pub flags: u32,
    /// Retained-secret cache lifetime in seconds; 0 means do not cache.
    pub cache_expiry: u32,
}

impl ConfirmPayload {
    pub fn new(h0: [u8; HASH_LEN]) -> Self {
        Self {
            h0,
            flags: 0,
            cache_expiry: 0,
        }
    }

    fn to_bytes(&self) -> [u8; CONFIRM_PAYLOAD_LEN] {
        let mut out = [0u8; CONFIRM_PAYLOAD_LEN];
        out[..HASH_LEN].copy_from_slice(&self.h0);
        out[HASH_LEN..HASH_LEN + 4].copy_from_slice(&self.flags.to_be_bytes());
        out[HASH_LEN + 4..].copy_from_slice(&self.cache_expiry.to_be_bytes());
        out
    }

    fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() != CONFIRM_PAYLOAD_LEN {
            return None;
        }
        let mut h0 = [0u8; HASH_LEN];
        h0.copy_from_slice(&data[..HASH_LEN]);
        let flags = u32::from_be_bytes(data[HASH_LEN..HASH_LEN + 4].try_into().ok()?);
        let cache_expiry = u32::from_be_bytes(data[HASH_LEN + 4..].try_into().ok()?);
        Some(Self {
            h0,
            flags,
            cache_expiry,
        })
    }
}

impl fmt::Debug for ConfirmPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfirmPayload")
            .field("flags", &self.flags)
            .field("cache_expiry", &self.cache_expiry)
            .finish_non_exhaustive()
    }
}

/// Encrypted proof of key possession carrying the sender's H0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirm {
    pub part: Part,
    /// Truncated HMAC over nonce || ciphertext under the sender's MAC key.
    pub confirm_mac: [u8; MAC_LEN],
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
}

impl Confirm {
    /// Encrypt `payload` under `zrtp_key`, then MAC the result under `mac_key`.
    pub fn seal<R: RngCore + CryptoRng + ?Sized>(
        part: Part,
        mac_key: &[u8; 32],
        zrtp_key: &[u8; 32],
        payload: &ConfirmPayload,
        rng: &mut R,
    ) -> Result<Self> {
        let mut nonce = [0u8; NONCE_LEN];
        rng.fill_bytes(&mut nonce);
        let ty = confirm_type(part);
        let mut plaintext = payload.to_bytes();
        let ciphertext = ConfirmCipher::new(zrtp_key).encrypt(&nonce, &plaintext, ty.type_block());
        plaintext.zeroize();
        let ciphertext = ciphertext?;
        let confirm_mac = truncated_mac(mac_key, &mac_input(&nonce, &ciphertext));
        Ok(Self {
            part,
            confirm_mac,
            nonce,
            ciphertext,
        })
    }

    pub fn message_type(&self) -> MessageType {
        confirm_type(self.part)
    }

    /// Check the confirm MAC. Must succeed before [`Confirm::open`] is called.
    pub fn verify_mac(&self, mac_key: &[u8; 32]) -> Result<()> {
        let input = mac_input(&self.nonce, &self.ciphertext);
        if !verify_truncated_mac(mac_key, &input, &self.confirm_mac) {
            return Err(ZrtpError::MacMismatch(self.message_type()));
        }
        Ok(())
    }

    /// Decrypt the payload.
    pub fn open(&self, zrtp_key: &[u8; 32]) -> Result<ConfirmPayload> {
        let ty = self.message_type();
        let mut plaintext =
            ConfirmCipher::new(zrtp_key).decrypt(&self.nonce, &self.ciphertext, ty.type_block())?;
        let payload = ConfirmPayload::from_bytes(&plaintext);
        plaintext.zeroize();
        payload.ok_or_else(|| ZrtpError::Malformed {
            message: ty,
            reason: "confirm payload has the wrong length".into(),
        })
    }
}

fn confirm_type(part: Part) -> MessageType {
    match part {
        Part::One => MessageType::Confirm1,
        Part::Two => MessageType::Confirm2,
    }
}

fn mac_input(nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> Vec<u8> {
    let mut input = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    input.extend_from_slice(nonce);
    input.extend_from_slice(ciphertext);
    input
}

/// Acknowledges the initiator's Confirm2; the last message of a handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conf2Ack;
