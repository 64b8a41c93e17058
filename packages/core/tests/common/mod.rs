//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use palisade_core::audit::MemorySink;
use palisade_core::utils::time::ManualClock;
use palisade_core::{Config, SecureCore};

pub struct Device {
    pub core: SecureCore,
    pub sink: Arc<MemorySink>,
    pub id: String,
}

pub fn test_config() -> Config {
    Config {
        pbkdf2_iterations: 1_000,
        ..Config::default()
    }
}

pub fn device(clock: &Arc<ManualClock>, config: Config) -> Device {
    let sink = Arc::new(MemorySink::new());
    let core = SecureCore::with_components(config, clock.clone(), sink.clone(), None).unwrap();
    let id = core.local_identity().device_id().to_string();
    Device { core, sink, id }
}

/// Both devices learn each other's public keys through exported bundles.
pub fn introduce(a: &Device, b: &Device) {
    a.core
        .import_peer_bundle(&b.core.export_public_bundle().unwrap())
        .unwrap();
    b.core
        .import_peer_bundle(&a.core.export_public_bundle().unwrap())
        .unwrap();
}

pub fn pair(config: Config) -> (Arc<ManualClock>, Device, Device) {
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let alice = device(&clock, config.clone());
    let bob = device(&clock, config);
    introduce(&alice, &bob);
    (clock, alice, bob)
}
