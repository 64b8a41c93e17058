//! Concurrent callers on shared cores
//!
//! Several threads send and receive across peers while another rotates,
//! runs maintenance and revokes a peer mid-conversation.

mod common;

use common::{device, introduce, Device};
use palisade_core::utils::time::ManualClock;
use palisade_core::{Config, EncryptionLevel, PalisadeError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

const ROUNDS: u32 = 300;

fn config() -> Config {
    Config {
        pbkdf2_iterations: 1_000,
        key_rotation_message_threshold: 40,
        ..Config::default()
    }
}

/// Send `ROUNDS` messages from `from` to `to`, each received in order.
fn converse(from: &Device, to: &Device, level: EncryptionLevel, delivered: &AtomicUsize) {
    for i in 0..ROUNDS {
        let payload = format!("{} -> {} #{}", from.id, to.id, i);
        let bytes = from.core.send(&to.id, level, payload.as_bytes()).unwrap();
        let received = to.core.receive(&bytes).unwrap();
        assert_eq!(received.plaintext, payload.as_bytes());
        assert_eq!(received.sender, from.id);
        delivered.fetch_add(1, Ordering::Relaxed);
    }
}

#[test]
fn test_concurrent_traffic_with_rotation_and_revocation() {
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let alice = device(&clock, config());
    let bob = device(&clock, config());
    let carol = device(&clock, config());
    let dave = device(&clock, config());
    introduce(&alice, &bob);
    introduce(&alice, &carol);
    introduce(&alice, &dave);
    introduce(&bob, &carol);

    let delivered = AtomicUsize::new(0);
    let to_dave = AtomicUsize::new(0);

    thread::scope(|scope| {
        scope.spawn(|| converse(&alice, &bob, EncryptionLevel::Enhanced, &delivered));
        scope.spawn(|| converse(&alice, &carol, EncryptionLevel::Military, &delivered));
        scope.spawn(|| converse(&bob, &alice, EncryptionLevel::Basic, &delivered));
        scope.spawn(|| converse(&carol, &bob, EncryptionLevel::QuantumSafe, &delivered));

        // runs until alice's revocation lands
        scope.spawn(|| loop {
            match alice.core.send(&dave.id, EncryptionLevel::Basic, b"ping") {
                Ok(bytes) => {
                    assert_eq!(dave.core.receive(&bytes).unwrap().plaintext, b"ping");
                    to_dave.fetch_add(1, Ordering::Relaxed);
                }
                Err(PalisadeError::PeerRevoked(id)) => {
                    assert_eq!(id, dave.id);
                    break;
                }
                Err(e) => panic!("unexpected send failure: {e}"),
            }
        });

        scope.spawn(|| {
            for i in 0..60 {
                alice.core.rotate_session(&bob.id).unwrap();
                bob.core.rotate_session(&alice.id).unwrap();
                alice.core.run_maintenance();
                bob.core.run_maintenance();
                carol.core.run_maintenance();
                if i == 20 {
                    alice.core.revoke_peer(&dave.id, "lost").unwrap();
                }
                thread::yield_now();
            }
        });
    });

    assert_eq!(delivered.load(Ordering::Relaxed), 4 * ROUNDS as usize);
    assert_eq!(alice.core.live_sessions_with(&dave.id), 0);
    assert_eq!(alice.core.current_epoch(&dave.id), None);
    assert_eq!(
        alice.core.send_default(&dave.id, b"after"),
        Err(PalisadeError::PeerRevoked(dave.id.clone()))
    );
    // dave did not revoke anyone and keeps what it received
    if to_dave.load(Ordering::Relaxed) > 0 {
        assert!(dave.core.live_sessions_with(&alice.id) > 0);
    }
    for peer in [&alice, &bob, &carol, &dave] {
        assert!(peer.core.audit().verify_chain().is_ok());
    }
}

/// A revocation racing a first send never leaves a live session behind
#[test]
fn test_revocation_racing_first_send() {
    for _ in 0..50 {
        let clock = Arc::new(ManualClock::new(0));
        let alice = device(&clock, config());
        let bob = device(&clock, config());
        introduce(&alice, &bob);

        thread::scope(|scope| {
            scope.spawn(|| {
                let _ = alice.core.send_default(&bob.id, b"racing");
            });
            scope.spawn(|| {
                alice.core.revoke_peer(&bob.id, "lost").unwrap();
            });
        });

        assert_eq!(alice.core.live_sessions_with(&bob.id), 0);
    }
}
