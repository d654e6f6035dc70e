// Secret derivation: transcript hash, s0 and the Master Secret sub-keys.
//
// ```text
// total_hash = SHA-256(Hello_r || Commit || DHPart1 || DHPart2)
// s0         = SHA-256(0x00000001 || DHResult || "ZRTP-HMAC-KDF" || ZIDi || ZIDr
//                      || total_hash || 0x00000000 || 0x00000000 || 0x00000000)
// prk        = HKDF-Extract(salt = total_hash, ikm = s0)
// subkey     = HKDF-Expand(prk, label || ZIDi || ZIDr, len)
// ```
//
// The ZID order is always initiator first. A responder passes (peer, local),
// an initiator (local, peer).

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::crypto::hash::{hash_sha256_concat, HASH_LEN};
use crate::error::{Result, ZrtpError};
use crate::zid::Zid;

const KDF_LABEL: &[u8] = b"ZRTP-HMAC-KDF";

/// SRTP master key length handed to the media layer.
pub const SRTP_KEY_LEN: usize = 16;
/// SRTP master salt length handed to the media layer.
pub const SRTP_SALT_LEN: usize = 14;

const SAS_B32_ALPHABET: &[u8; 32] = b"ybndrfg8ejkmcpqxot1uwisza345h769";

/// Transcript hash over the canonical bytes of the four exchanged messages,
/// always in Hello(responder), Commit, DHPart1, DHPart2 order whichever role
/// computes it.
pub fn total_hash(
    responder_hello: &[u8],
    commit: &[u8],
    dh_part1: &[u8],
    dh_part2: &[u8],
) -> [u8; HASH_LEN] {
    hash_sha256_concat(&[responder_hello, commit, dh_part1, dh_part2])
}

/// Compute s0 from the DH result and transcript hash.
pub fn shared_secret(
    dh_result: &[u8],
    total_hash: &[u8; HASH_LEN],
    initiator_zid: &Zid,
    responder_zid: &Zid,
) -> Zeroizing<[u8; HASH_LEN]> {
    let counter = 1u32.to_be_bytes();
    // No retained, auxiliary or PBX secrets: all three lengths are zero.
    let empty = 0u32.to_be_bytes();
    Zeroizing::new(hash_sha256_concat(&[
        &counter,
        dh_result,
        KDF_LABEL,
        initiator_zid.as_bytes(),
        responder_zid.as_bytes(),
        total_hash,
        &empty,
        &empty,
        &empty,
    ]))
}

/// Key material derived from one completed key agreement.
///
/// Immutable once derived and zeroized on drop. Only handed out by a state
/// machine that has finished the confirm exchange.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterSecret {
    initiator_mac_key: [u8; 32],
    responder_mac_key: [u8; 32],
    initiator_zrtp_key: [u8; 32],
    responder_zrtp_key: [u8; 32],
    initiator_srtp_key: [u8; SRTP_KEY_LEN],
    initiator_srtp_salt: [u8; SRTP_SALT_LEN],
    responder_srtp_key: [u8; SRTP_KEY_LEN],
    responder_srtp_salt: [u8; SRTP_SALT_LEN],
    sas_hash: [u8; HASH_LEN],
}

impl MasterSecret {
    /// Derive every sub-key from s0. `initiator_zid` must come first on both
    /// sides or the two ends silently derive different keys.
    pub fn derive(
        s0: &[u8; HASH_LEN],
        total_hash: &[u8; HASH_LEN],
        initiator_zid: &Zid,
        responder_zid: &Zid,
    ) -> Result<Self> {
        let hk = Hkdf::<Sha256>::new(Some(&total_hash[..]), &s0[..]);

        let expand = |label: &[u8], out: &mut [u8]| -> Result<()> {
            let mut info = Vec::with_capacity(label.len() + 24);
            info.extend_from_slice(label);
            info.extend_from_slice(initiator_zid.as_bytes());
            info.extend_from_slice(responder_zid.as_bytes());
            hk.expand(&info, out)
                .map_err(|e| ZrtpError::KeyDerivation(format!("HKDF expand error: {e}")))
        };

        let mut secret = MasterSecret {
            initiator_mac_key: [0u8; 32],
            responder_mac_key: [0u8; 32],
            initiator_zrtp_key: [0u8; 32],
            responder_zrtp_key: [0u8; 32],
            initiator_srtp_key: [0u8; SRTP_KEY_LEN],
            initiator_srtp_salt: [0u8; SRTP_SALT_LEN],
            responder_srtp_key: [0u8; SRTP_KEY_LEN],
            responder_srtp_salt: [0u8; SRTP_SALT_LEN],
            sas_hash: [0u8; HASH_LEN],
        };

        expand(b"Initiator HMAC key", &mut secret.initiator_mac_key)?;
        expand(b"Responder HMAC key", &mut secret.responder_mac_key)?;
        expand(b"Initiator ZRTP key", &mut secret.initiator_zrtp_key)?;
        expand(b"Responder ZRTP key", &mut secret.responder_zrtp_key)?;
        expand(b"Initiator SRTP master key", &mut secret.initiator_srtp_key)?;
        expand(b"Initiator SRTP master salt", &mut secret.initiator_srtp_salt)?;
        expand(b"Responder SRTP master key", &mut secret.responder_srtp_key)?;
        expand(b"Responder SRTP master salt", &mut secret.responder_srtp_salt)?;
        expand(b"SAS", &mut secret.sas_hash)?;

        Ok(secret)
    }

    /// Key for the initiator's Confirm2 MAC.
    pub fn initiator_mac_key(&self) -> &[u8; 32] {
        &self.initiator_mac_key
    }

    /// Key for the responder's Confirm1 MAC.
    pub fn responder_mac_key(&self) -> &[u8; 32] {
        &self.responder_mac_key
    }

    /// Key encrypting the initiator's Confirm2 payload.
    pub fn initiator_zrtp_key(&self) -> &[u8; 32] {
        &self.initiator_zrtp_key
    }

    /// Key encrypting the responder's Confirm1 payload.
    pub fn responder_zrtp_key(&self) -> &[u8; 32] {
        &self.responder_zrtp_key
    }

    pub fn initiator_srtp_key(&self) -> &[u8; SRTP_KEY_LEN] {
        &self.initiator_srtp_key
    }

    pub fn initiator_srtp_salt(&self) -> &[u8; SRTP_SALT_LEN] {
        &self.initiator_srtp_salt
    }

    pub fn responder_srtp_key(&self) -> &[u8; SRTP_KEY_LEN] {
        &self.responder_srtp_key
    }

    pub fn responder_srtp_salt(&self) -> &[u8; SRTP_SALT_LEN] {
        &self.responder_srtp_salt
    }

    pub fn sas_hash(&self) -> &[u8; HASH_LEN] {
        &self.sas_hash
    }

    /// Four-character short authentication string for users to compare.
    pub fn sas(&self) -> String {
        render_sas_b32(&self.sas_hash)
    }
}

impl std::fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterSecret").finish_non_exhaustive()
    }
}

/// Base-32 rendering of the leftmost 20 bits of the SAS hash.
pub fn render_sas_b32(sas_hash: &[u8; HASH_LEN]) -> String {
    let bits = (u32::from(sas_hash[0]) << 24)
        | (u32::from(sas_hash[1]) << 16)
        | (u32::from(sas_hash[2]) << 8)
        | u32::from(sas_hash[3]);
    (0..4)
        .map(|i| {
            let index = (bits >> (27 - 5 * i)) & 0x1F;
            SAS_B32_ALPHABET[index as usize] as char
        })
        .collect()
}
