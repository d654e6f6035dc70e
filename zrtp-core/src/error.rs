// ZRTP handshake error types

use thiserror::Error;

use crate::handshake::messages::MessageType;

/// Top-level error type for the zrtp-core crate.
///
/// Everything except [`ZrtpError::Internal`] is a protocol or authentication
/// failure: the handshake is aborted and no key material is produced, but the
/// caller may start a fresh negotiation.
#[derive(Debug, Error)]
pub enum ZrtpError {
    // ── Codec errors ────────────────────────────────────────────────────
    #[error("message too short: expected at least {expected} bytes, got {actual}")]
    MessageTooShort { expected: usize, actual: usize },

    #[error("bad message preamble: 0x{0:04x}")]
    BadPreamble(u16),

    #[error("length field mismatch: header declares {declared} bytes, packet has {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("unknown message type block: {0:?}")]
    UnknownMessageType(String),

    #[error("malformed {message}: {reason}")]
    Malformed {
        message: MessageType,
        reason: String,
    },

    #[error("unsupported protocol version: {0:?}")]
    UnsupportedVersion(String),

    // ── Protocol errors ─────────────────────────────────────────────────
    #[error("unexpected {received} in state {state}")]
    UnexpectedMessage {
        state: &'static str,
        received: MessageType,
    },

    #[error("unsupported key agreement type: {0:?}")]
    UnsupportedKeyAgreement(String),

    #[error("no key agreement type in common with peer")]
    NoCommonKeyAgreement,

    #[error("invalid public value: {0}")]
    InvalidPublicValue(String),

    #[error("peer ZID changed between Hello and {0}")]
    ZidMismatch(MessageType),

    #[error("peer Hello carries our own ZID")]
    ReflectedHello,

    // ── Authentication errors ───────────────────────────────────────────
    #[error("MAC verification failed for {0}")]
    MacMismatch(MessageType),

    #[error("revealed hash chain value does not match the commitment in {0}")]
    HashChainMismatch(MessageType),

    #[error("hvi mismatch: Commit does not bind the exchanged Hello and DHPart2")]
    HviMismatch,

    #[error("confirm encryption failed: {0}")]
    Encryption(String),

    #[error("confirm decryption failed: {0}")]
    Decryption(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    // ── Lifecycle ───────────────────────────────────────────────────────
    #[error("handshake aborted by an earlier failure")]
    Aborted,

    #[error("handshake already started")]
    AlreadyStarted,

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    // ── Internal invariant violations ───────────────────────────────────
    #[error("internal invariant violated: {0}")]
    Internal(&'static str),
}

impl ZrtpError {
    /// True for internal invariant violations, which mean the engine itself
    /// reached an impossible configuration. Callers should not retry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ZrtpError::Internal(_))
    }
}

/// Crate-level result alias.
pub type Result<T> = std::result::Result<T, ZrtpError>;
