// Negotiated hash (S256): SHA-256 digests, HMAC-SHA-256 and truncated message MACs.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Output length of the negotiated hash.
pub const HASH_LEN: usize = 32;

/// Length of the MAC trailing Hello, Commit and DHPart messages, and of the
/// confirm MAC (leftmost 64 bits of HMAC-SHA-256).
pub const MAC_LEN: usize = 8;

type HmacSha256 = Hmac<Sha256>;

/// SHA-256 hash of `data`, returning a 32-byte digest.
pub fn hash_sha256(data: &[u8]) -> [u8; HASH_LEN] {
    Sha256::digest(data).into()
}

/// SHA-256 over the concatenation of `parts`, without building the
/// concatenation in memory.
pub fn hash_sha256_concat(parts: &[&[u8]]) -> [u8; HASH_LEN] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Full-length HMAC-SHA-256.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; HASH_LEN] {
    // HMAC accepts keys of any length, so construction cannot fail.
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Leftmost [`MAC_LEN`] bytes of HMAC-SHA-256, as carried on the wire.
pub fn truncated_mac(key: &[u8], data: &[u8]) -> [u8; MAC_LEN] {
    let full = hmac_sha256(key, data);
    let mut out = [0u8; MAC_LEN];
    out.copy_from_slice(&full[..MAC_LEN]);
    out
}

/// Constant-time check of a truncated MAC.
pub fn verify_truncated_mac(key: &[u8], data: &[u8], tag: &[u8]) -> bool {
    if tag.len() != MAC_LEN {
        return false;
    }
    let Ok(mut mac) = <HmacSha256 as Mac>::new_from_slice(key) else {
        return false;
    };
    mac.update(data);
    mac.verify_truncated_left(tag).is_ok()
}

/// Constant-time equality for digests and other secret-dependent values.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}
