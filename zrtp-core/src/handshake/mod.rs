// Handshake module declarations

pub mod codec;
pub mod messages;
pub mod protocol;
pub mod session;
pub mod state;
