// Integration tests for the ZRTP handshake state machines.

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::SeedableRng;

use zrtp_core::crypto::hash::truncated_mac;
use zrtp_core::handshake::messages::MessageType;
use zrtp_core::{
    HandshakeConfig, HandshakeRole, Initiator, KeyAgreementType, MasterSecret, Responder, Zid,
    ZrtpError,
};

const ZID_A: Zid = Zid::new([0xA1; 12]);
const ZID_B: Zid = Zid::new([0xB2; 12]);

fn endpoints(initiator_kas: Vec<KeyAgreementType>, seed: u64) -> (Initiator, Responder) {
    let initiator = Initiator::with_rng(
        HandshakeConfig::new(ZID_A).with_key_agreements(initiator_kas),
        StdRng::seed_from_u64(seed),
    )
    .unwrap();
    let responder = Responder::with_rng(
        HandshakeConfig::new(ZID_B),
        StdRng::seed_from_u64(seed.wrapping_add(1000)),
    )
    .unwrap();
    (initiator, responder)
}

fn message_type(packet: &[u8]) -> MessageType {
    MessageType::from_type_block(&packet[4..12]).unwrap()
}

/// Hand `packet` to `to` after letting `tamper` edit it.
fn deliver<H: HandshakeRole>(
    to: &mut H,
    packet: Bytes,
    tamper: &mut impl FnMut(MessageType, &mut Vec<u8>),
) -> Result<Option<Bytes>, ZrtpError> {
    let mut raw = packet.to_vec();
    tamper(message_type(&raw), &mut raw);
    to.handle_packet(Bytes::from(raw))
}

fn reply(packet: Option<Bytes>) -> Bytes {
    packet.expect("a reply was expected")
}

/// The full nine-message exchange in lockstep. Stops at the first error.
fn exchange(
    initiator: &mut Initiator,
    responder: &mut Responder,
    mut tamper: impl FnMut(MessageType, &mut Vec<u8>),
) -> Result<(), ZrtpError> {
    let r_hello = responder.start()?;
    let i_hello = initiator.start()?;

    let hello_ack = reply(deliver(responder, i_hello, &mut tamper)?);
    assert!(deliver(initiator, hello_ack, &mut tamper)?.is_none());
    let commit = reply(deliver(initiator, r_hello, &mut tamper)?);
    assert!(initiator.master_secret().is_none());

    let dh1 = reply(deliver(responder, commit, &mut tamper)?);
    let dh2 = reply(deliver(initiator, dh1, &mut tamper)?);
    let confirm1 = reply(deliver(responder, dh2, &mut tamper)?);
    assert!(responder.master_secret().is_none());

    let confirm2 = reply(deliver(initiator, confirm1, &mut tamper)?);
    assert!(initiator.master_secret().is_none());
    let conf2_ack = reply(deliver(responder, confirm2, &mut tamper)?);
    assert!(deliver(initiator, conf2_ack, &mut tamper)?.is_none());
    Ok(())
}

fn no_tamper(_: MessageType, _: &mut Vec<u8>) {}

fn assert_same_keys(a: &MasterSecret, b: &MasterSecret) {
    assert_eq!(a.initiator_mac_key(), b.initiator_mac_key());
    assert_eq!(a.responder_mac_key(), b.responder_mac_key());
    assert_eq!(a.initiator_zrtp_key(), b.initiator_zrtp_key());
    assert_eq!(a.responder_zrtp_key(), b.responder_zrtp_key());
    assert_eq!(a.initiator_srtp_key(), b.initiator_srtp_key());
    assert_eq!(a.responder_srtp_salt(), b.responder_srtp_salt());
    assert_eq!(a.sas(), b.sas());
}

// ── Successful handshakes ────────────────────────────────────────────────

#[test]
fn x25519_handshake_agrees() {
    let (mut initiator, mut responder) = endpoints(vec![KeyAgreementType::X255], 1);
    exchange(&mut initiator, &mut responder, no_tamper).unwrap();

    assert!(initiator.is_complete() && responder.is_complete());
    assert_eq!(initiator.key_agreement(), Some(KeyAgreementType::X255));
    assert_eq!(responder.key_agreement(), Some(KeyAgreementType::X255));
    assert_same_keys(
        initiator.master_secret().unwrap(),
        responder.master_secret().unwrap(),
    );
}

#[test]
fn dh3k_handshake_agrees() {
    let (mut initiator, mut responder) = endpoints(vec![KeyAgreementType::Dh3k], 2);
    exchange(&mut initiator, &mut responder, no_tamper).unwrap();

    assert_eq!(responder.key_agreement(), Some(KeyAgreementType::Dh3k));
    assert_same_keys(
        initiator.master_secret().unwrap(),
        responder.master_secret().unwrap(),
    );
}

#[test]
fn initiator_preference_wins() {
    let (mut initiator, mut responder) =
        endpoints(vec![KeyAgreementType::Dh3k, KeyAgreementType::X255], 3);
    exchange(&mut initiator, &mut responder, no_tamper).unwrap();
    assert_eq!(responder.key_agreement(), Some(KeyAgreementType::Dh3k));
}

#[test]
fn seeded_runs_are_reproducible() {
    let run = || {
        let (mut initiator, mut responder) = endpoints(vec![KeyAgreementType::X255], 42);
        assert!(initiator.master_secret().is_none());
        assert!(responder.master_secret().is_none());
        exchange(&mut initiator, &mut responder, no_tamper).unwrap();
        let keys = responder.master_secret().unwrap().clone();
        assert_same_keys(initiator.master_secret().unwrap(), &keys);
        keys
    };
    let first = run();
    let second = run();
    assert_same_keys(&first, &second);

    let keys: [&[u8]; 4] = [
        first.initiator_mac_key(),
        first.responder_mac_key(),
        first.initiator_zrtp_key(),
        first.responder_zrtp_key(),
    ];
    for (i, key) in keys.iter().enumerate() {
        assert!(key.iter().any(|&b| b != 0), "sub-key {i} is all zero");
        for other in &keys[i + 1..] {
            assert_ne!(key, other);
        }
    }
    assert_eq!(first.sas().len(), 4);
}

#[test]
fn different_seeds_give_different_keys() {
    let (mut i1, mut r1) = endpoints(vec![KeyAgreementType::X255], 7);
    let (mut i2, mut r2) = endpoints(vec![KeyAgreementType::X255], 8);
    exchange(&mut i1, &mut r1, no_tamper).unwrap();
    exchange(&mut i2, &mut r2, no_tamper).unwrap();
    assert_ne!(
        r1.master_secret().unwrap().initiator_zrtp_key(),
        r2.master_secret().unwrap().initiator_zrtp_key()
    );
}

// ── Tampering ────────────────────────────────────────────────────────────

fn flip_last_bit(target: MessageType) -> impl FnMut(MessageType, &mut Vec<u8>) {
    move |ty, raw| {
        if ty == target {
            let last = raw.len() - 1;
            raw[last] ^= 0x01;
        }
    }
}

#[test]
fn tampered_hello_mac_detected_at_commit() {
    let (mut initiator, mut responder) = endpoints(vec![KeyAgreementType::X255], 10);
    // Only the initiator's Hello; the responder can check it once Commit reveals H2.
    let err = exchange(&mut initiator, &mut responder, |ty, raw| {
        if ty == MessageType::Hello && raw[64..76] == *ZID_A.as_bytes() {
            let last = raw.len() - 1;
            raw[last] ^= 0x01;
        }
    })
    .unwrap_err();
    assert!(matches!(err, ZrtpError::MacMismatch(MessageType::Hello)));
    assert_eq!(responder.state_label(), "Aborted");
}

#[test]
fn tampered_commit_mac_detected_at_dhpart2() {
    let (mut initiator, mut responder) = endpoints(vec![KeyAgreementType::X255], 11);
    let err = exchange(&mut initiator, &mut responder, flip_last_bit(MessageType::Commit)).unwrap_err();
    assert!(matches!(err, ZrtpError::MacMismatch(MessageType::Commit)));
    assert_eq!(responder.state_label(), "Aborted");
    assert!(responder.master_secret().is_none());
}

#[test]
fn tampered_dhpart2_mac_detected_on_arrival() {
    let (mut initiator, mut responder) = endpoints(vec![KeyAgreementType::X255], 12);
    // The HVI commits to DHPart2 including its MAC, so no Confirm1 goes out.
    let err = exchange(&mut initiator, &mut responder, flip_last_bit(MessageType::DhPart2)).unwrap_err();
    assert!(matches!(err, ZrtpError::HviMismatch));
    assert_eq!(responder.state_label(), "Aborted");
    assert!(!responder.is_complete());
}

#[test]
fn tampered_confirm2_mac_detected() {
    let (mut initiator, mut responder) = endpoints(vec![KeyAgreementType::X255], 13);
    let err = exchange(&mut initiator, &mut responder, |ty, raw| {
        if ty == MessageType::Confirm2 {
            raw[12] ^= 0x80; // first byte of the confirm MAC
        }
    })
    .unwrap_err();
    assert!(matches!(err, ZrtpError::MacMismatch(MessageType::Confirm2)));
    assert_eq!(responder.state_label(), "Aborted");
}

#[test]
fn tampered_confirm1_ciphertext_detected() {
    let (mut initiator, mut responder) = endpoints(vec![KeyAgreementType::X255], 14);
    let err = exchange(&mut initiator, &mut responder, flip_last_bit(MessageType::Confirm1)).unwrap_err();
    assert!(matches!(err, ZrtpError::MacMismatch(MessageType::Confirm1)));
    assert_eq!(initiator.state_label(), "Aborted");
}

#[test]
fn hvi_mismatch_with_resealed_commit() {
    const HVI: std::ops::Range<usize> = 64..96;
    const H1: std::ops::Range<usize> = 12..44;

    // A clean run with fixed seeds reveals the initiator's H1 in DHPart2.
    let mut h1 = [0u8; 32];
    let (mut initiator, mut responder) = endpoints(vec![KeyAgreementType::X255], 15);
    exchange(&mut initiator, &mut responder, |ty, raw| {
        if ty == MessageType::DhPart2 {
            h1.copy_from_slice(&raw[H1]);
        }
    })
    .unwrap();

    // Same seeds again, this time with a forged HVI and a valid Commit MAC.
    let (mut initiator, mut responder) = endpoints(vec![KeyAgreementType::X255], 15);
    let err = exchange(&mut initiator, &mut responder, |ty, raw| {
        if ty == MessageType::Commit {
            raw[HVI.start] ^= 0xFF;
            let mac_at = raw.len() - 8;
            let mac = truncated_mac(&h1, &raw[..mac_at]);
            raw[mac_at..].copy_from_slice(&mac);
        }
    })
    .unwrap_err();
    assert!(matches!(err, ZrtpError::HviMismatch), "got {err:?}");
    assert_eq!(responder.state_label(), "Aborted");
}

#[test]
fn short_public_value_rejected() {
    let (mut initiator, mut responder) = endpoints(vec![KeyAgreementType::X255], 16);
    let err = exchange(&mut initiator, &mut responder, |ty, raw| {
        if ty == MessageType::DhPart2 {
            // Drop one word of the public value and fix up the length field.
            raw.drain(44..48);
            let words = (raw.len() / 4) as u16;
            raw[2..4].copy_from_slice(&words.to_be_bytes());
        }
    })
    .unwrap_err();
    assert!(matches!(err, ZrtpError::InvalidPublicValue(_)));
}

// ── Sequencing ───────────────────────────────────────────────────────────

#[test]
fn second_hello_after_commit_aborts() {
    let (mut initiator, mut responder) = endpoints(vec![KeyAgreementType::X255], 20);
    let r_hello = responder.start().unwrap();
    let i_hello = initiator.start().unwrap();
    let ack = responder.handle_packet(i_hello.clone()).unwrap().unwrap();
    initiator.handle_packet(ack).unwrap();
    let commit = initiator.handle_packet(r_hello).unwrap().unwrap();
    responder.handle_packet(commit).unwrap();
    assert_eq!(responder.state_label(), "ExpectingDhPart2");

    let err = responder.handle_packet(i_hello).unwrap_err();
    assert!(matches!(
        err,
        ZrtpError::UnexpectedMessage {
            state: "ExpectingDhPart2",
            received: MessageType::Hello
        }
    ));
    assert_eq!(responder.state_label(), "Aborted");
    assert!(responder.key_agreement().is_none());
    assert!(responder.retransmit().is_none());
}

#[test]
fn foreign_role_message_aborts_responder() {
    let (mut initiator, mut responder) = endpoints(vec![KeyAgreementType::X255], 21);
    let r_hello = responder.start().unwrap();
    let i_hello = initiator.start().unwrap();
    let ack = responder.handle_packet(i_hello).unwrap().unwrap();
    initiator.handle_packet(ack).unwrap();
    let commit = initiator.handle_packet(r_hello).unwrap().unwrap();
    responder.handle_packet(commit).unwrap();
    let dh1 = responder.retransmit().unwrap();
    let dh2 = initiator.handle_packet(dh1).unwrap().unwrap();
    let confirm1 = responder.handle_packet(dh2).unwrap().unwrap();

    // The responder's own Confirm1 is never valid input for it.
    let err = responder.handle_packet(confirm1).unwrap_err();
    assert!(matches!(
        err,
        ZrtpError::UnexpectedMessage {
            received: MessageType::Confirm1,
            ..
        }
    ));
    assert_eq!(responder.state_label(), "Aborted");
    assert!(matches!(
        responder.handle_packet(Bytes::from_static(b"anything")),
        Err(ZrtpError::Aborted)
    ));
}

#[test]
fn commit_before_hello_aborts() {
    let (mut initiator, mut responder) = endpoints(vec![KeyAgreementType::X255], 22);
    // The initiator's Hello only ever reached a second responder.
    let mut other = Responder::with_rng(HandshakeConfig::new(ZID_B), StdRng::seed_from_u64(122)).unwrap();
    let r_hello = responder.start().unwrap();
    let i_hello = initiator.start().unwrap();
    let ack = other.handle_packet(i_hello).unwrap().unwrap();
    initiator.handle_packet(ack).unwrap();
    let commit = initiator.handle_packet(r_hello).unwrap().unwrap();
    assert!(matches!(
        responder.handle_packet(commit),
        Err(ZrtpError::UnexpectedMessage {
            state: "ExpectingHello",
            ..
        })
    ));
}

#[test]
fn garbage_aborts() {
    let (_, mut responder) = endpoints(vec![KeyAgreementType::X255], 23);
    responder.start().unwrap();
    assert!(matches!(
        responder.handle_packet(Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef])),
        Err(ZrtpError::MessageTooShort { .. })
    ));
    assert_eq!(responder.state_label(), "Aborted");
}

#[test]
fn completed_handshake_keeps_keys() {
    let (mut initiator, mut responder) = endpoints(vec![KeyAgreementType::X255], 24);
    exchange(&mut initiator, &mut responder, no_tamper).unwrap();
    let before = responder.master_secret().unwrap().clone();

    let stray = initiator.retransmit();
    assert!(stray.is_none());
    const CONF2_ACK: &[u8] = b"\x50\x5a\x00\x03Conf2ACK";
    let err = responder.handle_packet(Bytes::from_static(CONF2_ACK)).unwrap_err();
    assert!(matches!(err, ZrtpError::UnexpectedMessage { state: "Complete", .. }));
    assert!(responder.is_complete());
    assert_same_keys(responder.master_secret().unwrap(), &before);
}

// ── Duplicates ───────────────────────────────────────────────────────────

/// Run Hello, HelloACK and Commit; returns the Commit and the DHPart1 it got.
fn run_to_dh_part1(initiator: &mut Initiator, responder: &mut Responder) -> (Bytes, Bytes) {
    let r_hello = responder.start().unwrap();
    let i_hello = initiator.start().unwrap();
    let ack = responder.handle_packet(i_hello).unwrap().unwrap();
    initiator.handle_packet(ack).unwrap();
    let commit = initiator.handle_packet(r_hello).unwrap().unwrap();
    let dh1 = responder.handle_packet(commit.clone()).unwrap().unwrap();
    (commit, dh1)
}

#[test]
fn repeated_commit_gets_same_dh_part1() {
    let (mut initiator, mut responder) = endpoints(vec![KeyAgreementType::X255], 40);
    let (commit, dh1) = run_to_dh_part1(&mut initiator, &mut responder);

    let again = responder.handle_packet(commit).unwrap().unwrap();
    assert_eq!(again, dh1);
    assert_eq!(responder.state_label(), "ExpectingDhPart2");
    assert_eq!(responder.key_agreement(), Some(KeyAgreementType::X255));

    // The exchange carries on as if the copy never arrived.
    let dh2 = initiator.handle_packet(dh1).unwrap().unwrap();
    assert_eq!(message_type(&responder.handle_packet(dh2).unwrap().unwrap()), MessageType::Confirm1);
}

#[test]
fn repeated_confirm2_after_completion_gets_conf2_ack() {
    let (mut initiator, mut responder) = endpoints(vec![KeyAgreementType::X255], 41);
    let mut confirm2 = None;
    let mut conf2_ack = None;
    exchange(&mut initiator, &mut responder, |ty, raw| match ty {
        MessageType::Confirm2 => confirm2 = Some(Bytes::from(raw.clone())),
        MessageType::Conf2Ack => conf2_ack = Some(Bytes::from(raw.clone())),
        _ => {}
    })
    .unwrap();
    let before = responder.master_secret().unwrap().clone();

    let again = responder.handle_packet(confirm2.unwrap()).unwrap();
    assert_eq!(again, conf2_ack);
    assert!(responder.is_complete());
    assert_same_keys(responder.master_secret().unwrap(), &before);
}

#[test]
fn altered_copy_of_commit_aborts() {
    let (mut initiator, mut responder) = endpoints(vec![KeyAgreementType::X255], 42);
    let (commit, _) = run_to_dh_part1(&mut initiator, &mut responder);

    let mut altered = commit.to_vec();
    let last = altered.len() - 1;
    altered[last] ^= 0x01;
    let err = responder.handle_packet(Bytes::from(altered)).unwrap_err();
    assert!(matches!(
        err,
        ZrtpError::UnexpectedMessage {
            state: "ExpectingDhPart2",
            received: MessageType::Commit
        }
    ));
    assert_eq!(responder.state_label(), "Aborted");
    assert!(matches!(responder.handle_packet(commit), Err(ZrtpError::Aborted)));
}

#[test]
fn commit_with_unadvertised_key_agreement_rejected() {
    let mut initiator = Initiator::with_rng(
        HandshakeConfig::new(ZID_A).with_key_agreements(vec![KeyAgreementType::Dh3k]),
        StdRng::seed_from_u64(30),
    )
    .unwrap();
    // The responder advertises DH3k too, so the initiator commits to it;
    // a second responder that only supports X25519 receives that Commit.
    let mut responder = Responder::with_rng(HandshakeConfig::new(ZID_B), StdRng::seed_from_u64(31)).unwrap();
    let mut narrow = Responder::with_rng(
        HandshakeConfig::new(ZID_B).with_key_agreements(vec![KeyAgreementType::X255]),
        StdRng::seed_from_u64(32),
    )
    .unwrap();

    let r_hello = responder.start().unwrap();
    let i_hello = initiator.start().unwrap();
    let ack = narrow.handle_packet(i_hello).unwrap().unwrap();
    initiator.handle_packet(ack).unwrap();
    let commit = initiator.handle_packet(r_hello).unwrap().unwrap();
    assert!(matches!(
        narrow.handle_packet(commit),
        Err(ZrtpError::UnsupportedKeyAgreement(_))
    ));
}
