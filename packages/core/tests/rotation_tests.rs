//! Key rotation, grace windows and establishment timeouts
//!
//! Time is driven by a shared `ManualClock`.

mod common;

use common::{device, introduce, pair, test_config};
use palisade_core::audit::AuditKind;
use palisade_core::session::Direction;
use palisade_core::utils::time::ManualClock;
use palisade_core::{Config, EncryptionLevel, PalisadeError, SessionId, SessionState};
use std::sync::Arc;
use std::time::Duration;

/// 10,000 messages with a threshold of 5,000: one rotation, epoch +1
#[test]
fn test_message_threshold_rotates_once() {
    let config = Config {
        key_rotation_message_threshold: 5_000,
        ..test_config()
    };
    let (_clock, alice, bob) = pair(config);

    for i in 0..10_000u32 {
        let bytes = alice
            .core
            .send(&bob.id, EncryptionLevel::Basic, &i.to_be_bytes())
            .unwrap();
        let received = bob.core.receive(&bytes).unwrap();
        assert_eq!(received.plaintext, i.to_be_bytes());
        assert_eq!(received.epoch, u64::from(i >= 5_000));
    }

    assert_eq!(alice.core.audit().count(AuditKind::KeyRotated), 1);
    assert_eq!(alice.core.audit().count(AuditKind::ForcedRotation), 0);
    assert_eq!(alice.core.current_epoch(&bob.id), Some(1));
}

/// Old-epoch messages still decrypt during the grace window, not after
#[test]
fn test_grace_window_after_rotation() {
    let config = Config {
        grace_window_duration: Duration::from_secs(60),
        ..test_config()
    };
    let (clock, alice, bob) = pair(config);

    let first = alice.core.send(&bob.id, EncryptionLevel::Enhanced, b"first").unwrap();
    bob.core.receive(&first).unwrap();
    let in_flight = alice.core.send(&bob.id, EncryptionLevel::Enhanced, b"in flight").unwrap();
    let too_late = alice.core.send(&bob.id, EncryptionLevel::Enhanced, b"too late").unwrap();

    assert_eq!(alice.core.rotate_session(&bob.id).unwrap(), Some(0));
    let old_outbound = SessionId::new(&alice.id, &bob.id, 0, Direction::Outbound);
    assert_eq!(alice.core.session_state_of(&old_outbound), SessionState::Expiring);
    // forced rotations reach the sink right away
    assert!(alice.sink.persisted().iter().any(|e| e.kind == AuditKind::ForcedRotation));

    let next = alice.core.send(&bob.id, EncryptionLevel::Enhanced, b"new epoch").unwrap();
    assert_eq!(bob.core.receive(&next).unwrap().epoch, 1);
    // the sender never decrypts, so its old epoch goes as soon as the new one exists
    assert_eq!(alice.core.session_state_of(&old_outbound), SessionState::Retired);
    assert_eq!(alice.core.live_sessions_with(&bob.id), 1);

    let old_inbound = SessionId::new(&bob.id, &alice.id, 0, Direction::Inbound);
    assert_eq!(bob.core.session_state_of(&old_inbound), SessionState::Expiring);

    clock.advance(Duration::from_secs(30));
    assert_eq!(bob.core.receive(&in_flight).unwrap().plaintext, b"in flight");

    clock.advance(Duration::from_secs(31));
    assert_eq!(
        bob.core.receive(&too_late),
        Err(PalisadeError::SessionExpired {
            peer: alice.id.clone(),
            epoch: 0
        })
    );
    assert_eq!(bob.core.session_state_of(&old_inbound), SessionState::Retired);

    assert_eq!(alice.core.run_maintenance().retired, 0);
    assert_eq!(alice.core.session_state(&bob.id), SessionState::Active);
}

/// The interval expires sessions through maintenance; the next send opens a new epoch
#[test]
fn test_interval_rotation() {
    let config = Config {
        key_rotation_interval: Duration::from_secs(3_600),
        grace_window_duration: Duration::from_secs(120),
        ..test_config()
    };
    let (clock, alice, bob) = pair(config);

    let bytes = alice.core.send_default(&bob.id, b"hour one").unwrap();
    bob.core.receive(&bytes).unwrap();
    assert_eq!(alice.core.run_maintenance().expired, 0);

    clock.advance(Duration::from_secs(3_600));
    let alice_report = alice.core.run_maintenance();
    let bob_report = bob.core.run_maintenance();
    assert_eq!(alice_report.expired, 1);
    assert_eq!(bob_report.expired, 1);
    assert_eq!(alice.core.session_state(&bob.id), SessionState::NoSession);
    assert_eq!(alice.core.audit().count(AuditKind::KeyRotated), 1);

    let bytes = alice.core.send_default(&bob.id, b"hour two").unwrap();
    assert_eq!(bob.core.receive(&bytes).unwrap().epoch, 1);

    clock.advance(Duration::from_secs(121));
    // alice dropped epoch 0 when epoch 1 was established
    assert_eq!(alice.core.run_maintenance().retired, 0);
    assert_eq!(bob.core.run_maintenance().retired, 1);
    assert_eq!(alice.core.live_sessions(), 1);
    assert_eq!(bob.core.live_sessions(), 1);
}

/// Without maintenance, an elapsed interval rotates on the next send
#[test]
fn test_interval_checked_on_send() {
    let (clock, alice, bob) = pair(test_config());
    alice.core.send_default(&bob.id, b"day one").unwrap();
    clock.advance(Duration::from_secs(24 * 60 * 60));
    let bytes = alice.core.send_default(&bob.id, b"day two").unwrap();
    assert_eq!(bob.core.receive(&bytes).unwrap().epoch, 1);
    assert_eq!(alice.core.audit().count(AuditKind::KeyRotated), 1);
}

/// A requested establishment falls back to NoSession after the timeout
#[test]
fn test_establishment_timeout() {
    let clock = Arc::new(ManualClock::new(0));
    let alice = device(&clock, test_config());
    let bob = device(&clock, test_config());

    assert_eq!(alice.core.request_establishment(&bob.id), SessionState::Establishing);
    assert_eq!(alice.core.session_state(&bob.id), SessionState::Establishing);
    assert!(matches!(
        alice.core.send_default(&bob.id, b"x"),
        Err(PalisadeError::UnknownPeer(_))
    ));

    clock.advance(Duration::from_secs(30));
    assert_eq!(
        alice.core.send_default(&bob.id, b"x"),
        Err(PalisadeError::EstablishmentTimeout(bob.id.clone()))
    );
    assert_eq!(alice.core.session_state(&bob.id), SessionState::NoSession);
    assert_eq!(alice.core.audit().count(AuditKind::EstablishmentTimeout), 1);
}

/// Maintenance times out stale establishments too
#[test]
fn test_establishment_timeout_in_maintenance() {
    let clock = Arc::new(ManualClock::new(0));
    let alice = device(&clock, test_config());

    alice.core.request_establishment("peer-far-away");
    clock.advance(Duration::from_secs(29));
    assert_eq!(alice.core.run_maintenance().timed_out, 0);
    clock.advance(Duration::from_secs(1));
    assert_eq!(alice.core.run_maintenance().timed_out, 1);
    assert_eq!(alice.core.session_state("peer-far-away"), SessionState::NoSession);
}

/// Identity arriving before the timeout completes establishment
#[test]
fn test_establishment_completes_when_identity_arrives() {
    let clock = Arc::new(ManualClock::new(0));
    let alice = device(&clock, test_config());
    let bob = device(&clock, test_config());

    alice.core.request_establishment(&bob.id);
    clock.advance(Duration::from_secs(10));
    introduce(&alice, &bob);

    let bytes = alice.core.send_default(&bob.id, b"made it").unwrap();
    assert_eq!(alice.core.session_state(&bob.id), SessionState::Active);
    assert_eq!(bob.core.receive(&bytes).unwrap().plaintext, b"made it");
}

/// Rotating one peer leaves other sessions alone
#[test]
fn test_rotation_is_per_session() {
    let clock = Arc::new(ManualClock::new(0));
    let alice = device(&clock, test_config());
    let bob = device(&clock, test_config());
    let carol = device(&clock, test_config());
    introduce(&alice, &bob);
    introduce(&alice, &carol);

    alice.core.send_default(&bob.id, b"b").unwrap();
    alice.core.send_default(&carol.id, b"c").unwrap();
    assert_eq!(alice.core.rotate_session(&bob.id).unwrap(), Some(0));
    assert_eq!(alice.core.current_epoch(&bob.id), None);
    assert_eq!(alice.core.current_epoch(&carol.id), Some(0));
    assert_eq!(alice.core.rotate_session("stranger").unwrap(), None);
}

/// Shutdown retires everything and flushes routine audit entries
#[test]
fn test_shutdown() {
    let (_clock, alice, bob) = pair(test_config());
    let bytes = alice.core.send_default(&bob.id, b"bye").unwrap();
    bob.core.receive(&bytes).unwrap();

    assert_eq!(bob.core.shutdown().unwrap(), 1);
    assert_eq!(bob.core.live_sessions(), 0);
    assert_eq!(bob.core.audit().pending_count(), 0);
    assert!(bob.sink.persisted().iter().any(|e| e.kind == AuditKind::SessionEstablished));
    assert!(bob.core.audit().verify_chain().is_ok());
}

/// Expired outbound epochs keep their keys only until the next epoch exists
#[test]
fn test_outbound_epoch_retired_when_superseded() {
    let (_clock, alice, bob) = pair(test_config());
    alice.core.send_default(&bob.id, b"one").unwrap();
    alice.core.rotate_session(&bob.id).unwrap();
    alice.core.rotate_session(&bob.id).unwrap();
    assert_eq!(alice.core.live_sessions_with(&bob.id), 1);

    alice.core.send_default(&bob.id, b"two").unwrap();
    assert_eq!(alice.core.current_epoch(&bob.id), Some(1));
    assert_eq!(alice.core.live_sessions_with(&bob.id), 1);
    assert_eq!(alice.core.tracked_deadlines(), 1);
    let old = SessionId::new(&alice.id, &bob.id, 0, Direction::Outbound);
    assert_eq!(alice.core.session_state_of(&old), SessionState::Retired);
    assert_eq!(alice.core.audit().count(AuditKind::SessionRetired), 1);
}
