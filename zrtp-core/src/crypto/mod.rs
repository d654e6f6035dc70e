// Crypto module declarations

pub mod aead;
pub mod agreement;
pub mod dh3k;
pub mod hash;
pub mod hash_chain;
pub mod kdf;
pub mod x25519;
