//! End-to-end scenarios between two cores
//!
//! Envelope bytes are handed over directly; no transport is involved.

mod common;

use common::{device, introduce, pair, test_config};
use palisade_core::audit::AuditKind;
use palisade_core::session::Direction;
use palisade_core::storage::MemoryStore;
use palisade_core::{
    EncryptionLevel, MessageCodec, PalisadeError, SecureCore, SessionId, SessionState, StateStore,
    TrustState,
};
use std::sync::Arc;

fn tamper(bytes: &[u8], edit: impl FnOnce(&mut palisade_core::Envelope)) -> Vec<u8> {
    let codec = MessageCodec::default();
    let mut envelope = codec.decode(bytes).unwrap();
    edit(&mut envelope);
    codec.encode(&envelope).unwrap()
}

/// A→B "hello" at Enhanced: delivered flagged Unverified, CrossSigned after cross-signing
#[test]
fn test_hello_unverified_then_cross_signed() {
    let (_clock, alice, bob) = pair(test_config());

    let bytes = alice.core.send(&bob.id, EncryptionLevel::Enhanced, b"hello").unwrap();
    let received = bob.core.receive(&bytes).unwrap();
    assert_eq!(received.plaintext, b"hello");
    assert_eq!(received.sender, alice.id);
    assert_eq!(received.level, EncryptionLevel::Enhanced);
    assert_eq!(received.epoch, 0);
    assert_eq!(received.sequence, 1);
    assert!(received.is_unverified());

    assert_eq!(bob.core.cross_sign_peer(&alice.id).unwrap(), TrustState::CrossSigned);
    let bytes = alice.core.send(&bob.id, EncryptionLevel::Enhanced, b"again").unwrap();
    let received = bob.core.receive(&bytes).unwrap();
    assert_eq!(received.trust, TrustState::CrossSigned);
    assert!(!received.is_unverified());
    assert_eq!(bob.core.audit().count(AuditKind::TrustChanged), 1);
}

/// Both directions work independently
#[test]
fn test_conversation_both_ways() {
    let (_clock, alice, bob) = pair(test_config());
    for i in 0..5u8 {
        let to_bob = alice.core.send_default(&bob.id, &[i]).unwrap();
        assert_eq!(bob.core.receive(&to_bob).unwrap().plaintext, vec![i]);
        let to_alice = bob.core.send_default(&alice.id, &[i, i]).unwrap();
        assert_eq!(alice.core.receive(&to_alice).unwrap().plaintext, vec![i, i]);
    }
    assert_eq!(alice.core.live_sessions(), 2);
    assert_eq!(bob.core.live_sessions(), 2);
}

/// The same envelope twice is a replay; the rejection is persisted immediately
#[test]
fn test_replay_rejected_and_audited() {
    let (_clock, alice, bob) = pair(test_config());
    let bytes = alice.core.send(&bob.id, EncryptionLevel::Basic, b"once").unwrap();
    bob.core.receive(&bytes).unwrap();

    assert!(matches!(
        bob.core.receive(&bytes),
        Err(PalisadeError::ReplayRejected { sequence: 1, .. })
    ));
    assert_eq!(bob.core.audit().count(AuditKind::ReplayRejected), 1);
    assert!(bob
        .sink
        .persisted()
        .iter()
        .any(|entry| entry.kind == AuditKind::ReplayRejected));
}

/// Delivering N then N-1 rejects N-1
#[test]
fn test_older_sequence_rejected() {
    let (_clock, alice, bob) = pair(test_config());
    let first = alice.core.send(&bob.id, EncryptionLevel::Enhanced, b"1").unwrap();
    let second = alice.core.send(&bob.id, EncryptionLevel::Enhanced, b"2").unwrap();
    let third = alice.core.send(&bob.id, EncryptionLevel::Enhanced, b"3").unwrap();

    assert_eq!(bob.core.receive(&first).unwrap().plaintext, b"1");
    assert_eq!(bob.core.receive(&third).unwrap().sequence, 3);
    assert!(matches!(
        bob.core.receive(&second),
        Err(PalisadeError::ReplayRejected { sequence: 2, last_accepted: 3 })
    ));
}

/// Every level works end to end; changing level starts a new epoch
#[test]
fn test_all_levels_end_to_end() {
    let (_clock, alice, bob) = pair(test_config());
    for (epoch, level) in EncryptionLevel::ALL.into_iter().enumerate() {
        let bytes = alice.core.send(&bob.id, level, level.as_str().as_bytes()).unwrap();
        let envelope = MessageCodec::default().decode(&bytes).unwrap();
        assert_eq!(envelope.signature.is_some(), matches!(level, EncryptionLevel::Military | EncryptionLevel::QuantumSafe));

        let received = bob.core.receive(&bytes).unwrap();
        assert_eq!(received.level, level);
        assert_eq!(received.epoch, epoch as u64);
        assert_eq!(received.plaintext, level.as_str().as_bytes());
    }
    assert_eq!(alice.core.audit().count(AuditKind::KeyRotated), 3);
}

/// A flipped ciphertext bit fails authentication and does not advance the session
#[test]
fn test_tampered_ciphertext_fails_closed() {
    let (_clock, alice, bob) = pair(test_config());
    let first = alice.core.send(&bob.id, EncryptionLevel::Enhanced, b"first").unwrap();
    bob.core.receive(&first).unwrap();

    let bytes = alice.core.send(&bob.id, EncryptionLevel::Enhanced, b"second").unwrap();
    let forged = tamper(&bytes, |e| e.ciphertext[0] ^= 0x01);
    assert_eq!(bob.core.receive(&forged), Err(PalisadeError::AuthenticationFailure));
    assert_eq!(bob.core.receive(&bytes).unwrap().plaintext, b"second");
    assert_eq!(bob.core.audit().count(AuditKind::AuthenticationFailure), 1);
}

/// A forged first envelope never creates an inbound session
#[test]
fn test_tampered_first_envelope_creates_nothing() {
    let (_clock, alice, bob) = pair(test_config());
    let bytes = alice.core.send(&bob.id, EncryptionLevel::Basic, b"hi").unwrap();
    let forged = tamper(&bytes, |e| e.tag[3] ^= 0x80);
    assert_eq!(bob.core.receive(&forged), Err(PalisadeError::AuthenticationFailure));
    assert_eq!(bob.core.live_sessions(), 0);
    assert_eq!(bob.core.receive(&bytes).unwrap().plaintext, b"hi");
}

/// Signing levels reject a bad identity signature
#[test]
fn test_bad_signature_rejected() {
    let (_clock, alice, bob) = pair(test_config());
    let bytes = alice.core.send(&bob.id, EncryptionLevel::Military, b"signed").unwrap();
    let forged = tamper(&bytes, |e| {
        if let Some(signature) = e.signature.as_mut() {
            signature[10] ^= 0x04;
        }
    });
    assert_eq!(bob.core.receive(&forged), Err(PalisadeError::AuthenticationFailure));
    assert_eq!(bob.core.receive(&bytes).unwrap().plaintext, b"signed");
}

/// Garbage, foreign recipients and unknown senders are refused
#[test]
fn test_malformed_and_misaddressed() {
    let clock = Arc::new(palisade_core::utils::time::ManualClock::new(0));
    let alice = device(&clock, test_config());
    let bob = device(&clock, test_config());
    let carol = device(&clock, test_config());
    introduce(&alice, &bob);
    introduce(&alice, &carol);

    assert!(matches!(bob.core.receive(b"PS\x01garbage"), Err(PalisadeError::MalformedEnvelope(_))));
    assert!(matches!(bob.core.receive(b""), Err(PalisadeError::MalformedEnvelope(_))));

    let for_carol = alice.core.send_default(&carol.id, b"not for bob").unwrap();
    assert!(matches!(bob.core.receive(&for_carol), Err(PalisadeError::MalformedEnvelope(_))));

    // carol never learned bob's keys
    let from_bob = bob.core.send_default(&alice.id, b"x").unwrap();
    let rerouted = tamper(&from_bob, |e| e.recipient = carol.id.clone());
    assert!(matches!(carol.core.receive(&rerouted), Err(PalisadeError::UnknownPeer(_))));
    assert_eq!(carol.core.audit().count(AuditKind::UnknownPeer), 1);

    assert!(matches!(
        alice.core.send_default("nobody", b"x"),
        Err(PalisadeError::UnknownPeer(_))
    ));
}

/// Inbound failures collapse to one remote code
#[test]
fn test_remote_code_is_opaque() {
    let (_clock, alice, bob) = pair(test_config());
    let bytes = alice.core.send_default(&bob.id, b"x").unwrap();
    bob.core.receive(&bytes).unwrap();

    let replay = bob.core.receive(&bytes).unwrap_err();
    let garbage = bob.core.receive(b"nope").unwrap_err();
    assert_ne!(replay, garbage);
    assert_eq!(replay.remote_code(), garbage.remote_code());
}

/// Revocation retires sessions and refuses traffic both ways
#[test]
fn test_revocation() {
    let (_clock, alice, bob) = pair(test_config());
    let bytes = alice.core.send_default(&bob.id, b"before").unwrap();
    bob.core.receive(&bytes).unwrap();
    let reply = bob.core.send_default(&alice.id, b"reply").unwrap();
    alice.core.receive(&reply).unwrap();
    let in_flight = alice.core.send_default(&bob.id, b"in flight").unwrap();

    // alice holds one outbound and one inbound session with bob
    assert_eq!(alice.core.revoke_peer(&bob.id, "device lost").unwrap(), 2);
    let peer = alice.core.lookup_peer(&bob.id).unwrap();
    assert_eq!(peer.trust, TrustState::Revoked);
    assert_eq!(peer.revocation_reason.as_deref(), Some("device lost"));

    let outbound = SessionId::new(&alice.id, &bob.id, 0, Direction::Outbound);
    assert_eq!(alice.core.session_state_of(&outbound), SessionState::Retired);
    assert_eq!(alice.core.live_sessions(), 0);

    assert_eq!(
        alice.core.send_default(&bob.id, b"after"),
        Err(PalisadeError::PeerRevoked(bob.id.clone()))
    );
    assert_eq!(alice.core.audit().count(AuditKind::SendRefused), 1);

    let late = bob.core.send_default(&alice.id, b"late").unwrap();
    assert_eq!(alice.core.receive(&late), Err(PalisadeError::PeerRevoked(bob.id.clone())));
    assert_eq!(alice.core.audit().count(AuditKind::MessageRejected), 1);

    // revocation is terminal
    assert_eq!(alice.core.accept_on_first_use(&bob.id).unwrap(), TrustState::Revoked);
    assert_eq!(alice.core.audit().count(AuditKind::PeerRevoked), 1);

    // bob is unaffected by alice's decision
    assert_eq!(bob.core.receive(&in_flight).unwrap().plaintext, b"in flight");
}

/// Different keys for a known device id are refused and audited
#[test]
fn test_key_mismatch() {
    let clock = Arc::new(palisade_core::utils::time::ManualClock::new(0));
    let alice = device(&clock, test_config());
    let bob = device(&clock, test_config());
    let impostor = device(&clock, test_config());
    introduce(&alice, &bob);

    let result = alice
        .core
        .remember_peer(&bob.id, impostor.core.local_identity().public_keys());
    assert_eq!(result, Err(PalisadeError::KeyMismatch(bob.id.clone())));
    assert_eq!(alice.core.audit().count(AuditKind::KeyMismatch), 1);
    assert!(alice.sink.persisted().iter().any(|e| e.kind == AuditKind::KeyMismatch));
    assert_eq!(
        alice.core.lookup_peer(&bob.id).unwrap().public_keys,
        bob.core.local_identity().public_keys()
    );
}

/// With verification required, Unverified peers are refused until verified
#[test]
fn test_require_verification_before_send() {
    let config = palisade_core::Config {
        require_verification_before_send: true,
        ..test_config()
    };
    let (_clock, alice, bob) = pair(config);

    assert_eq!(
        alice.core.send_default(&bob.id, b"x"),
        Err(PalisadeError::UntrustedPeer(bob.id.clone()))
    );
    let fingerprint = bob.core.local_identity().fingerprint();
    assert_eq!(
        alice.core.verify_fingerprint(&bob.id, &fingerprint).unwrap(),
        TrustState::TofuAccepted
    );
    let bytes = alice.core.send_default(&bob.id, b"x").unwrap();
    assert_eq!(bob.core.receive(&bytes).unwrap().plaintext, b"x");
}

/// Identity, trust and epoch numbering survive a restart; session keys do not
#[test]
fn test_persistence_round_trip() {
    let (clock, alice, bob) = pair(test_config());
    alice.core.accept_on_first_use(&bob.id).unwrap();
    let bytes = alice.core.send_default(&bob.id, b"before restart").unwrap();
    bob.core.receive(&bytes).unwrap();

    let store = MemoryStore::new();
    alice.core.save_state(&store, "passphrase").unwrap();
    let saved = store.load().unwrap().unwrap();
    assert_eq!(saved.peers.len(), 1);
    assert_eq!(saved.next_epochs.get(&bob.id), Some(&1));
    drop(alice);

    let restored = SecureCore::restore(
        test_config(),
        clock.clone(),
        Arc::new(palisade_core::audit::MemorySink::new()),
        &store,
        "passphrase",
    )
    .unwrap();
    assert_eq!(restored.trust_state(&bob.id).unwrap(), TrustState::TofuAccepted);
    assert_eq!(restored.live_sessions(), 0);

    let bytes = restored.send_default(&bob.id, b"after restart").unwrap();
    let received = bob.core.receive(&bytes).unwrap();
    assert_eq!(received.epoch, 1);
    assert_eq!(received.plaintext, b"after restart");
}
