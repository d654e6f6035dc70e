// Blocking driver that runs one handshake over a packet transport.

use std::io;
use std::sync::mpsc::{Receiver, Sender};
use std::time::Duration;

use bytes::Bytes;

use crate::crypto::kdf::MasterSecret;
use crate::error::{Result, ZrtpError};
use crate::handshake::protocol::HandshakeRole;

/// Datagram-style carrier for handshake packets.
pub trait Transport {
    /// Send one complete handshake message.
    fn send_packet(&mut self, packet: Bytes) -> io::Result<()>;
    /// Block until the next handshake message arrives.
    ///
    /// An [`io::ErrorKind::TimedOut`] error makes [`negotiate`] resend its
    /// last packet and keep waiting.
    fn receive_packet(&mut self) -> io::Result<Bytes>;
}

/// Consecutive receive timeouts tolerated, each answered with a resend,
/// before giving up.
pub const MAX_RETRANSMITS: usize = 8;

/// Drive `role` to completion over `transport`.
///
/// Sends the local Hello, then answers each inbound packet until the
/// handshake completes. Returns a copy of the negotiated keys.
pub fn negotiate<H, T>(role: &mut H, transport: &mut T) -> Result<MasterSecret>
where
    H: HandshakeRole + ?Sized,
    T: Transport + ?Sized,
{
    transport.send_packet(role.start()?)?;

    let mut resends = 0;
    while !role.is_complete() {
        let packet = match transport.receive_packet() {
            Ok(packet) => packet,
            Err(e) if e.kind() == io::ErrorKind::TimedOut && resends < MAX_RETRANSMITS => {
                resends += 1;
                if let Some(packet) = role.retransmit() {
                    tracing::debug!(
                        role = %role.role(),
                        state = role.state_label(),
                        attempt = resends,
                        "retransmitting"
                    );
                    transport.send_packet(packet)?;
                }
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        if let Some(reply) = role.handle_packet(packet)? {
            transport.send_packet(reply)?;
        }
        resends = 0;
    }

    role.master_secret()
        .cloned()
        .ok_or(ZrtpError::Internal("completed handshake without a master secret"))
}

/// In-process transport over a pair of channels.
pub struct ChannelTransport {
    outbound: Sender<Bytes>,
    inbound: Receiver<Bytes>,
    timeout: Option<Duration>,
}

impl ChannelTransport {
    /// Two connected endpoints.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = std::sync::mpsc::channel();
        let (b_tx, a_rx) = std::sync::mpsc::channel();
        (
            Self {
                outbound: a_tx,
                inbound: a_rx,
                timeout: None,
            },
            Self {
                outbound: b_tx,
                inbound: b_rx,
                timeout: None,
            },
        )
    }

    /// Report [`io::ErrorKind::TimedOut`] after waiting `timeout` for a packet.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl Transport for ChannelTransport {
    fn send_packet(&mut self, packet: Bytes) -> io::Result<()> {
        self.outbound
            .send(packet)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer transport closed"))
    }

    fn receive_packet(&mut self) -> io::Result<Bytes> {
        let closed = || io::Error::new(io::ErrorKind::UnexpectedEof, "peer transport closed");
        match self.timeout {
            None => self.inbound.recv().map_err(|_| closed()),
            Some(timeout) => self.inbound.recv_timeout(timeout).map_err(|e| match e {
                std::sync::mpsc::RecvTimeoutError::Timeout => {
                    io::Error::new(io::ErrorKind::TimedOut, "no handshake packet")
                }
                std::sync::mpsc::RecvTimeoutError::Disconnected => closed(),
            }),
        }
    }
}
