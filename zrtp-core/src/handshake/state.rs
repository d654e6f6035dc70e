// Handshake state machines.
//
// Each variant carries exactly the data that is valid in that state, so a
// handler can never read a field that was not set yet.

use crate::crypto::agreement::{KeyAgreementType, KeyPair};
use crate::crypto::kdf::MasterSecret;
use crate::handshake::messages::{Commit, DhPart, Framed, Hello};

/// Behaviour shared by both roles' state enums.
pub trait MachineState: Sized {
    /// The terminal failure state.
    const ABORTED: Self;

    fn label(&self) -> &'static str;
    fn is_complete(&self) -> bool;
    fn key_agreement(&self) -> Option<KeyAgreementType>;
    fn master_secret(&self) -> Option<&MasterSecret>;

    fn is_aborted(&self) -> bool {
        self.label() == "Aborted"
    }

    fn is_terminal(&self) -> bool {
        self.is_complete() || self.is_aborted()
    }
}

/// Progress of the responder (the side that receives Commit).
#[derive(Debug)]
pub enum ResponderState {
    /// Waiting for the initiator's Hello. Our own Hello may already be out.
    ExpectingHello,

    /// Peer Hello stored and acknowledged; its MAC is checked once Commit
    /// reveals H2.
    ExpectingCommit { peer_hello: Framed<Hello> },

    /// DHPart1 sent. The variant and our key pair are fixed from here on.
    ExpectingDhPart2 {
        peer_commit: Framed<Commit>,
        local_dh1: Framed<DhPart>,
        key_pair: KeyPair,
    },

    /// Confirm1 sent; waiting for proof that the initiator holds the same keys.
    ExpectingConfirm2 {
        peer_dh2: Framed<DhPart>,
        key_agreement: KeyAgreementType,
        master_secret: MasterSecret,
    },

    /// Conf2ACK sent.
    Complete {
        key_agreement: KeyAgreementType,
        master_secret: MasterSecret,
    },

    /// A verification or sequencing failure ended the handshake.
    Aborted,
}

impl MachineState for ResponderState {
    const ABORTED: Self = ResponderState::Aborted;

    fn label(&self) -> &'static str {
        match self {
            ResponderState::ExpectingHello => "ExpectingHello",
            ResponderState::ExpectingCommit { .. } => "ExpectingCommit",
            ResponderState::ExpectingDhPart2 { .. } => "ExpectingDhPart2",
            ResponderState::ExpectingConfirm2 { .. } => "ExpectingConfirm2",
            ResponderState::Complete { .. } => "Complete",
            ResponderState::Aborted => "Aborted",
        }
    }

    fn key_agreement(&self) -> Option<KeyAgreementType> {
        match self {
            ResponderState::ExpectingDhPart2 { key_pair, .. } => Some(key_pair.kind()),
            ResponderState::ExpectingConfirm2 { key_agreement, .. }
            | ResponderState::Complete { key_agreement, .. } => Some(*key_agreement),
            _ => None,
        }
    }

    fn is_complete(&self) -> bool {
        matches!(self, ResponderState::Complete { .. })
    }

    fn master_secret(&self) -> Option<&MasterSecret> {
        match self {
            ResponderState::Complete { master_secret, .. } => Some(master_secret),
            _ => None,
        }
    }
}

/// Progress of the initiator (the side that sends Commit).
#[derive(Debug)]
pub enum InitiatorState {
    /// Our Hello is out; nothing heard yet.
    ExpectingHelloAck,

    /// Our Hello was acknowledged; still waiting for the responder's.
    ExpectingHello,

    /// The responder's Hello arrived first. Commit waits for the HelloACK so
    /// that a lost Hello of ours is still resent.
    HelloPending { peer_hello: Framed<Hello> },

    /// Commit sent. DHPart2 is already built because the HVI commits to it.
    ExpectingDhPart1 {
        peer_hello: Framed<Hello>,
        local_commit: Framed<Commit>,
        local_dh2: Framed<DhPart>,
        key_pair: KeyPair,
    },

    /// DHPart2 sent; keys derived.
    ExpectingConfirm1 {
        peer_dh1: Framed<DhPart>,
        key_agreement: KeyAgreementType,
        master_secret: MasterSecret,
    },

    /// Confirm2 sent; the responder's Conf2ACK ends the exchange.
    ExpectingConf2Ack {
        key_agreement: KeyAgreementType,
        master_secret: MasterSecret,
    },

    Complete {
        key_agreement: KeyAgreementType,
        master_secret: MasterSecret,
    },

    Aborted,
}

impl MachineState for InitiatorState {
    const ABORTED: Self = InitiatorState::Aborted;

    fn label(&self) -> &'static str {
        match self {
            InitiatorState::ExpectingHelloAck => "ExpectingHelloAck",
            InitiatorState::ExpectingHello => "ExpectingHello",
            InitiatorState::HelloPending { .. } => "HelloPending",
            InitiatorState::ExpectingDhPart1 { .. } => "ExpectingDhPart1",
            InitiatorState::ExpectingConfirm1 { .. } => "ExpectingConfirm1",
            InitiatorState::ExpectingConf2Ack { .. } => "ExpectingConf2Ack",
            InitiatorState::Complete { .. } => "Complete",
            InitiatorState::Aborted => "Aborted",
        }
    }

    fn key_agreement(&self) -> Option<KeyAgreementType> {
        match self {
            InitiatorState::ExpectingDhPart1 { key_pair, .. } => Some(key_pair.kind()),
            InitiatorState::ExpectingConfirm1 { key_agreement, .. }
            | InitiatorState::ExpectingConf2Ack { key_agreement, .. }
            | InitiatorState::Complete { key_agreement, .. } => Some(*key_agreement),
            _ => None,
        }
    }

    fn is_complete(&self) -> bool {
        matches!(self, InitiatorState::Complete { .. })
    }

    fn master_secret(&self) -> Option<&MasterSecret> {
        match self {
            InitiatorState::Complete { master_secret, .. } => Some(master_secret),
            _ => None,
        }
    }
}
