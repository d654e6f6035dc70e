// zrtp-core: ZRTP-style key agreement handshake
//
// Crate root: module declarations and public re-exports.

pub mod config;
pub mod crypto;
pub mod error;
pub mod handshake;
pub mod zid;

// Re-export key types at crate root for convenience.
pub use config::HandshakeConfig;
pub use crypto::agreement::KeyAgreementType;
pub use crypto::kdf::MasterSecret;
pub use error::{Result, ZrtpError};
pub use handshake::protocol::{HandshakeRng, HandshakeRole, Initiator, Responder, Role};
pub use handshake::session::{negotiate, ChannelTransport, Transport};
pub use zid::Zid;
