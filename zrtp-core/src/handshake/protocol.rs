// ZRTP handshake: responder and initiator roles over a shared core.
//
//   Initiator                               Responder
//     |<--------------------------- Hello ---|  H3, MAC(H2)
//     |--- Hello --------------------------->|  H3, MAC(H2)
//     |<------------------------ HelloACK ---|
//     |--- Commit -------------------------->|  H2 authenticates initiator Hello
//     |<------------------------- DHPart1 ---|  H1, MAC(H0)
//     |--- DHPart2 ------------------------->|  H1 authenticates Commit, HVI checked
//     |<------------------------ Confirm1 ---|  Enc(H0) authenticates DHPart1
//     |--- Confirm2 ------------------------>|  Enc(H0) authenticates DHPart2
//     |<------------------------ Conf2ACK ---|
//
// Each role is a pure state machine: packets in, at most one packet out.
// Timers and I/O belong to the caller (see `handshake::session`).

use std::fmt;

use bytes::Bytes;
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};

use crate::config::HandshakeConfig;
use crate::crypto::agreement::{KeyAgreementType, KeyPair};
use crate::crypto::hash::{ct_eq, hash_sha256, hash_sha256_concat};
use crate::crypto::hash_chain::HashChain;
use crate::crypto::kdf::{self, MasterSecret};
use crate::error::{Result, ZrtpError};
use crate::handshake::codec::{self, Packet};
use crate::handshake::messages::{
    Commit, Conf2Ack, Confirm, ConfirmPayload, DhPart, Framed, Hello, HelloAck, MessageType,
    Part,
};
use crate::handshake::state::{InitiatorState, MachineState, ResponderState};
use crate::zid::Zid;

/// Randomness source for a handshake: hash chain, ephemeral keys and
/// Confirm nonces all draw from it.
pub trait HandshakeRng: RngCore + CryptoRng + Send {}

impl<T: RngCore + CryptoRng + Send> HandshakeRng for T {}

/// Which side of the exchange an endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sends Commit, DHPart2 and Confirm2.
    Initiator,
    /// Receives Commit; sends DHPart1 and Confirm1.
    Responder,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Initiator => "initiator",
            Role::Responder => "responder",
        })
    }
}

/// Operations common to both roles, consumed by [`negotiate`](crate::handshake::session::negotiate).
pub trait HandshakeRole {
    fn role(&self) -> Role;

    /// Emit the local Hello. Callable once.
    fn start(&mut self) -> Result<Bytes>;

    /// Process one inbound packet and return the reply, if any.
    ///
    /// An exact copy of the previously processed packet returns the same
    /// reply again without changing state. Any error other than one raised in `Complete` leaves the handshake
    /// `Aborted`; later packets then fail with [`ZrtpError::Aborted`].
    fn handle_packet(&mut self, packet: Bytes) -> Result<Option<Bytes>>;

    /// The last packet sent, for resending after a timeout. `None` once the
    /// handshake has completed or aborted.
    fn retransmit(&self) -> Option<Bytes>;

    fn state_label(&self) -> &'static str;

    fn is_complete(&self) -> bool;

    /// Derived keys; only available after the confirm exchange succeeded.
    fn master_secret(&self) -> Option<&MasterSecret>;

    /// The negotiated variant, once fixed by Commit.
    fn key_agreement(&self) -> Option<KeyAgreementType>;

    fn local_zid(&self) -> Zid;
}

// ── Shared core ──────────────────────────────────────────────────────────

/// State that does not depend on the role: our hash chain, our Hello and
/// the randomness source.
struct HandshakeCore {
    role: Role,
    config: HandshakeConfig,
    hash_chain: HashChain,
    local_hello: Framed<Hello>,
    rng: Box<dyn HandshakeRng>,
    last_sent: Option<Bytes>,
    /// The last packet processed and the reply it produced.
    last_exchange: Option<(Bytes, Option<Bytes>)>,
    started: bool,
}

impl HandshakeCore {
    fn new(role: Role, config: HandshakeConfig, mut rng: Box<dyn HandshakeRng>) -> Result<Self> {
        config.validate()?;
        let hash_chain = HashChain::generate(rng.as_mut());
        let hello = Hello::new(
            &config.client_id,
            *hash_chain.h3(),
            config.zid,
            config.key_agreements.clone(),
        );
        let local_hello = codec::seal(hello, hash_chain.h2())?;
        Ok(Self {
            role,
            config,
            hash_chain,
            local_hello,
            rng,
            last_sent: None,
            last_exchange: None,
            started: false,
        })
    }

    fn start(&mut self) -> Result<Bytes> {
        if self.started {
            return Err(ZrtpError::AlreadyStarted);
        }
        self.started = true;
        tracing::debug!(role = %self.role, zid = %self.config.zid, "sending Hello");
        Ok(self.record(self.local_hello.bytes().clone()))
    }

    fn record(&mut self, packet: Bytes) -> Bytes {
        self.last_sent = Some(packet.clone());
        packet
    }

    /// Checks every Hello gets before it is stored.
    fn check_peer_hello(&self, hello: &Framed<Hello>) -> Result<()> {
        if hello.message().zid == self.config.zid {
            return Err(ZrtpError::ReflectedHello);
        }
        Ok(())
    }

    /// Our DHPart for `key_pair`, MAC'd with H0.
    fn seal_dh_part(&self, part: Part, key_pair: &KeyPair) -> Result<Framed<DhPart>> {
        let dh_part = DhPart {
            part,
            h1: *self.hash_chain.h1(),
            public_value: key_pair.public_value(),
        };
        codec::seal(dh_part, self.hash_chain.h0())
    }

    /// Our Confirm carrying H0, sealed with our own direction's keys.
    fn seal_confirm(&mut self, part: Part, mac_key: &[u8; 32], zrtp_key: &[u8; 32]) -> Result<Bytes> {
        let payload = ConfirmPayload::new(*self.hash_chain.h0());
        let confirm = Confirm::seal(part, mac_key, zrtp_key, &payload, self.rng.as_mut())?;
        Ok(codec::frame(confirm)?.bytes().clone())
    }
}

/// Compute the Master Secret from a finished DH exchange.
///
/// The transcript is always responder Hello, Commit, DHPart1, DHPart2 and the
/// ZIDs always initiator first, whichever side calls this.
fn derive_master_secret(
    key_pair: &KeyPair,
    peer_public: &[u8],
    transcript: [&[u8]; 4],
    initiator_zid: &Zid,
    responder_zid: &Zid,
) -> Result<MasterSecret> {
    let dh_result = key_pair.agree(peer_public)?;
    let [hello, commit, dh1, dh2] = transcript;
    let total_hash = kdf::total_hash(hello, commit, dh1, dh2);
    let s0 = kdf::shared_secret(&dh_result, &total_hash, initiator_zid, responder_zid);
    MasterSecret::derive(&s0, &total_hash, initiator_zid, responder_zid)
}

type Step<S> = fn(&mut HandshakeCore, S, Packet) -> Result<(S, Option<Bytes>)>;

/// Decode `packet` and run one transition, failing closed.
fn advance<S: MachineState>(
    core: &mut HandshakeCore,
    state: &mut S,
    packet: Bytes,
    step: Step<S>,
) -> Result<Option<Bytes>> {
    if state.is_aborted() {
        return Err(ZrtpError::Aborted);
    }

    // The peer resent its last packet because our reply was lost.
    if let Some((received, reply)) = &core.last_exchange {
        if *received == packet {
            tracing::debug!(role = %core.role, state = state.label(), "duplicate packet, resending reply");
            return Ok(reply.clone());
        }
    }

    let raw = packet.clone();
    let packet = match Packet::decode(packet) {
        Ok(packet) => packet,
        Err(e) => return Err(fail(core.role, state, None, e)),
    };
    let received = packet.message_type();

    // A completed handshake keeps its keys whatever arrives afterwards.
    if state.is_complete() {
        let e = ZrtpError::UnexpectedMessage {
            state: state.label(),
            received,
        };
        tracing::warn!(role = %core.role, message = %received, "message after completion rejected");
        return Err(e);
    }

    let current = std::mem::replace(state, S::ABORTED);
    let from = current.label();
    match step(core, current, packet) {
        Ok((next, reply)) => {
            let to = next.label();
            tracing::debug!(
                role = %core.role,
                from,
                to,
                message = %received,
                "handshake transition"
            );
            if next.is_complete() {
                if let Some(kind) = next.key_agreement() {
                    tracing::info!(role = %core.role, key_agreement = %kind, "handshake complete");
                }
            }
            *state = next;
            let reply = reply.map(|r| core.record(r));
            // Ignored packets do not replace the exchange a resend would repeat.
            if reply.is_some() || to != from {
                core.last_exchange = Some((raw, reply.clone()));
            }
            Ok(reply)
        }
        Err(e) => Err(fail(core.role, state, Some(from), e)),
    }
}

fn fail<S: MachineState>(role: Role, state: &mut S, from: Option<&'static str>, e: ZrtpError) -> ZrtpError {
    if state.is_complete() {
        return e;
    }
    let from = from.unwrap_or_else(|| state.label());
    *state = S::ABORTED;
    tracing::warn!(role = %role, state = from, error = %e, "handshake aborted");
    e
}

// ── Responder ────────────────────────────────────────────────────────────

/// The side that answers a Commit.
pub struct Responder {
    core: HandshakeCore,
    state: ResponderState,
}

impl Responder {
    /// Create a responder drawing randomness from the OS.
    pub fn new(config: HandshakeConfig) -> Result<Self> {
        Self::with_rng(config, OsRng)
    }

    /// Create a responder with an explicit randomness source (e.g. a seeded
    /// RNG for reproducible runs).
    pub fn with_rng<R: HandshakeRng + 'static>(config: HandshakeConfig, rng: R) -> Result<Self> {
        Ok(Self {
            core: HandshakeCore::new(Role::Responder, config, Box::new(rng))?,
            state: ResponderState::ExpectingHello,
        })
    }

    fn step(
        core: &mut HandshakeCore,
        state: ResponderState,
        packet: Packet,
    ) -> Result<(ResponderState, Option<Bytes>)> {
        match (state, packet) {
            (ResponderState::ExpectingHello, Packet::Hello(hello)) => Self::on_hello(core, hello),
            (ResponderState::ExpectingCommit { peer_hello }, Packet::Commit(commit)) => {
                Self::on_commit(core, peer_hello, commit)
            }
            (
                ResponderState::ExpectingDhPart2 {
                    peer_commit,
                    local_dh1,
                    key_pair,
                },
                Packet::DhPart2(dh2),
            ) => Self::on_dh_part2(core, peer_commit, local_dh1, key_pair, dh2),
            (
                ResponderState::ExpectingConfirm2 {
                    peer_dh2,
                    key_agreement,
                    master_secret,
                },
                Packet::Confirm2(confirm),
            ) => Self::on_confirm2(peer_dh2, key_agreement, master_secret, confirm),
            (state, packet) => Err(ZrtpError::UnexpectedMessage {
                state: state.label(),
                received: packet.message_type(),
            }),
        }
    }

    fn on_hello(core: &mut HandshakeCore, hello: Framed<Hello>) -> Result<(ResponderState, Option<Bytes>)> {
        core.check_peer_hello(&hello)?;
        tracing::debug!(
            peer_zid = %hello.message().zid,
            client_id = %hello.message().client_id(),
            "peer Hello"
        );
        let ack = codec::frame(HelloAck)?;
        Ok((
            ResponderState::ExpectingCommit { peer_hello: hello },
            Some(ack.bytes().clone()),
        ))
    }

    fn on_commit(
        core: &mut HandshakeCore,
        peer_hello: Framed<Hello>,
        commit: Framed<Commit>,
    ) -> Result<(ResponderState, Option<Bytes>)> {
        let c = commit.message();
        if c.zid != peer_hello.message().zid {
            return Err(ZrtpError::ZidMismatch(MessageType::Commit));
        }
        if !core.config.key_agreements.contains(&c.key_agreement) {
            return Err(ZrtpError::UnsupportedKeyAgreement(c.key_agreement.to_string()));
        }
        // H2 authenticates the Hello we stored; nothing in the Commit is
        // trusted before this.
        peer_hello.authenticate(&c.h2)?;

        let key_pair = KeyPair::generate(c.key_agreement, core.rng.as_mut());
        let local_dh1 = core.seal_dh_part(Part::One, &key_pair)?;
        let reply = local_dh1.bytes().clone();
        Ok((
            ResponderState::ExpectingDhPart2 {
                peer_commit: commit,
                local_dh1,
                key_pair,
            },
            Some(reply),
        ))
    }

    fn on_dh_part2(
        core: &mut HandshakeCore,
        peer_commit: Framed<Commit>,
        local_dh1: Framed<DhPart>,
        key_pair: KeyPair,
        dh2: Framed<DhPart>,
    ) -> Result<(ResponderState, Option<Bytes>)> {
        let key_agreement = key_pair.kind();
        dh2.message().validate_for(key_agreement)?;
        peer_commit.authenticate(&dh2.message().h1)?;

        let hvi = hash_sha256_concat(&[&dh2.bytes()[..], &core.local_hello.bytes()[..]]);
        if !ct_eq(&hvi, &peer_commit.message().hvi) {
            return Err(ZrtpError::HviMismatch);
        }

        let master_secret = derive_master_secret(
            &key_pair,
            &dh2.message().public_value,
            [
                &core.local_hello.bytes()[..],
                &peer_commit.bytes()[..],
                &local_dh1.bytes()[..],
                &dh2.bytes()[..],
            ],
            &peer_commit.message().zid,
            &core.config.zid,
        )?;
        let confirm1 = core.seal_confirm(
            Part::One,
            master_secret.responder_mac_key(),
            master_secret.responder_zrtp_key(),
        )?;
        Ok((
            ResponderState::ExpectingConfirm2 {
                peer_dh2: dh2,
                key_agreement,
                master_secret,
            },
            Some(confirm1),
        ))
    }

    fn on_confirm2(
        peer_dh2: Framed<DhPart>,
        key_agreement: KeyAgreementType,
        master_secret: MasterSecret,
        confirm: Framed<Confirm>,
    ) -> Result<(ResponderState, Option<Bytes>)> {
        let c = confirm.message();
        c.verify_mac(master_secret.initiator_mac_key())?;
        let payload = c.open(master_secret.initiator_zrtp_key())?;
        peer_dh2.authenticate(&payload.h0)?;

        let ack = codec::frame(Conf2Ack)?;
        Ok((
            ResponderState::Complete {
                key_agreement,
                master_secret,
            },
            Some(ack.bytes().clone()),
        ))
    }
}

impl HandshakeRole for Responder {
    fn role(&self) -> Role {
        Role::Responder
    }

    fn start(&mut self) -> Result<Bytes> {
        if self.state.is_aborted() {
            return Err(ZrtpError::Aborted);
        }
        self.core.start()
    }

    fn handle_packet(&mut self, packet: Bytes) -> Result<Option<Bytes>> {
        advance(&mut self.core, &mut self.state, packet, Self::step)
    }

    fn retransmit(&self) -> Option<Bytes> {
        if self.state.is_terminal() {
            return None;
        }
        self.core.last_sent.clone()
    }

    fn state_label(&self) -> &'static str {
        self.state.label()
    }

    fn is_complete(&self) -> bool {
        self.state.is_complete()
    }

    fn master_secret(&self) -> Option<&MasterSecret> {
        self.state.master_secret()
    }

    fn key_agreement(&self) -> Option<KeyAgreementType> {
        self.state.key_agreement()
    }

    fn local_zid(&self) -> Zid {
        self.core.config.zid
    }
}

// ── Initiator ────────────────────────────────────────────────────────────

/// The side that sends Commit and picks the key agreement.
pub struct Initiator {
    core: HandshakeCore,
    state: InitiatorState,
}

impl Initiator {
    /// Create an initiator drawing randomness from the OS.
    pub fn new(config: HandshakeConfig) -> Result<Self> {
        Self::with_rng(config, OsRng)
    }

    pub fn with_rng<R: HandshakeRng + 'static>(config: HandshakeConfig, rng: R) -> Result<Self> {
        Ok(Self {
            core: HandshakeCore::new(Role::Initiator, config, Box::new(rng))?,
            state: InitiatorState::ExpectingHelloAck,
        })
    }

    fn step(
        core: &mut HandshakeCore,
        state: InitiatorState,
        packet: Packet,
    ) -> Result<(InitiatorState, Option<Bytes>)> {
        match (state, packet) {
            (InitiatorState::ExpectingHelloAck, Packet::HelloAck(_)) => {
                Ok((InitiatorState::ExpectingHello, None))
            }
            (InitiatorState::ExpectingHelloAck, Packet::Hello(hello)) => {
                Self::select_key_agreement(core, &hello)?;
                Ok((InitiatorState::HelloPending { peer_hello: hello }, None))
            }
            (InitiatorState::HelloPending { peer_hello }, Packet::HelloAck(_)) => {
                Self::commit(core, peer_hello)
            }
            (InitiatorState::ExpectingHello, Packet::Hello(hello)) => Self::commit(core, hello),
            // A resent HelloACK carries nothing we still need.
            (state @ InitiatorState::ExpectingHello, Packet::HelloAck(_))
            | (state @ InitiatorState::ExpectingDhPart1 { .. }, Packet::HelloAck(_)) => Ok((state, None)),
            (
                InitiatorState::ExpectingDhPart1 {
                    peer_hello,
                    local_commit,
                    local_dh2,
                    key_pair,
                },
                Packet::DhPart1(dh1),
            ) => Self::on_dh_part1(core, peer_hello, local_commit, local_dh2, key_pair, dh1),
            (
                InitiatorState::ExpectingConfirm1 {
                    peer_dh1,
                    key_agreement,
                    master_secret,
                },
                Packet::Confirm1(confirm),
            ) => Self::on_confirm1(core, peer_dh1, key_agreement, master_secret, confirm),
            (
                InitiatorState::ExpectingConf2Ack {
                    key_agreement,
                    master_secret,
                },
                Packet::Conf2Ack(_),
            ) => Ok((
                InitiatorState::Complete {
                    key_agreement,
                    master_secret,
                },
                None,
            )),
            (state, packet) => Err(ZrtpError::UnexpectedMessage {
                state: state.label(),
                received: packet.message_type(),
            }),
        }
    }

    /// Our first preference the peer Hello also advertises.
    fn select_key_agreement(core: &HandshakeCore, hello: &Framed<Hello>) -> Result<KeyAgreementType> {
        core.check_peer_hello(hello)?;
        let key_agreement = core
            .config
            .key_agreements
            .iter()
            .copied()
            .find(|kind| hello.message().supports(*kind))
            .ok_or(ZrtpError::NoCommonKeyAgreement)?;
        tracing::debug!(
            peer_zid = %hello.message().zid,
            client_id = %hello.message().client_id(),
            key_agreement = %key_agreement,
            "peer Hello"
        );
        Ok(key_agreement)
    }

    /// Build Commit (and the DHPart2 it binds) once both Hellos are settled.
    fn commit(core: &mut HandshakeCore, hello: Framed<Hello>) -> Result<(InitiatorState, Option<Bytes>)> {
        let key_agreement = Self::select_key_agreement(core, &hello)?;
        let key_pair = KeyPair::generate(key_agreement, core.rng.as_mut());
        // DHPart2 is built now so the Commit can bind it through the HVI.
        let local_dh2 = core.seal_dh_part(Part::Two, &key_pair)?;
        let hvi = hash_sha256_concat(&[&local_dh2.bytes()[..], &hello.bytes()[..]]);
        let commit = Commit {
            h2: *core.hash_chain.h2(),
            zid: core.config.zid,
            key_agreement,
            hvi,
        };
        let local_commit = codec::seal(commit, core.hash_chain.h1())?;
        let reply = local_commit.bytes().clone();
        Ok((
            InitiatorState::ExpectingDhPart1 {
                peer_hello: hello,
                local_commit,
                local_dh2,
                key_pair,
            },
            Some(reply),
        ))
    }

    fn on_dh_part1(
        core: &mut HandshakeCore,
        peer_hello: Framed<Hello>,
        local_commit: Framed<Commit>,
        local_dh2: Framed<DhPart>,
        key_pair: KeyPair,
        dh1: Framed<DhPart>,
    ) -> Result<(InitiatorState, Option<Bytes>)> {
        let key_agreement = key_pair.kind();
        dh1.message().validate_for(key_agreement)?;
        // The responder never sends a Commit, so H2 is recomputed from H1.
        let h2 = hash_sha256(&dh1.message().h1);
        peer_hello.authenticate(&h2)?;

        let master_secret = derive_master_secret(
            &key_pair,
            &dh1.message().public_value,
            [
                &peer_hello.bytes()[..],
                &local_commit.bytes()[..],
                &dh1.bytes()[..],
                &local_dh2.bytes()[..],
            ],
            &core.config.zid,
            &peer_hello.message().zid,
        )?;
        let reply = local_dh2.bytes().clone();
        Ok((
            InitiatorState::ExpectingConfirm1 {
                peer_dh1: dh1,
                key_agreement,
                master_secret,
            },
            Some(reply),
        ))
    }

    fn on_confirm1(
        core: &mut HandshakeCore,
        peer_dh1: Framed<DhPart>,
        key_agreement: KeyAgreementType,
        master_secret: MasterSecret,
        confirm: Framed<Confirm>,
    ) -> Result<(InitiatorState, Option<Bytes>)> {
        let c = confirm.message();
        c.verify_mac(master_secret.responder_mac_key())?;
        let payload = c.open(master_secret.responder_zrtp_key())?;
        peer_dh1.authenticate(&payload.h0)?;

        let confirm2 = core.seal_confirm(
            Part::Two,
            master_secret.initiator_mac_key(),
            master_secret.initiator_zrtp_key(),
        )?;
        Ok((
            InitiatorState::ExpectingConf2Ack {
                key_agreement,
                master_secret,
            },
            Some(confirm2),
        ))
    }
}

impl HandshakeRole for Initiator {
    fn role(&self) -> Role {
        Role::Initiator
    }

    fn start(&mut self) -> Result<Bytes> {
        if self.state.is_aborted() {
            return Err(ZrtpError::Aborted);
        }
        self.core.start()
    }

    fn handle_packet(&mut self, packet: Bytes) -> Result<Option<Bytes>> {
        advance(&mut self.core, &mut self.state, packet, Self::step)
    }

    fn retransmit(&self) -> Option<Bytes> {
        if self.state.is_terminal() {
            return None;
        }
        self.core.last_sent.clone()
    }

    fn state_label(&self) -> &'static str {
        self.state.label()
    }

    fn is_complete(&self) -> bool {
        self.state.is_complete()
    }

    fn master_secret(&self) -> Option<&MasterSecret> {
        self.state.master_secret()
    }

    fn key_agreement(&self) -> Option<KeyAgreementType> {
        self.state.key_agreement()
    }

    fn local_zid(&self) -> Zid {
        self.core.config.zid
    }
}
