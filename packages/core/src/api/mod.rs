// Публичный API ядра
// SecureCore связывает идентичности, доверие, сессии, ротацию и аудит

pub mod contacts;
pub mod messaging;
#[cfg(feature = "runtime")]
pub mod runtime;

use crate::audit::{AuditLog, AuditSink, MemorySink};
use crate::config::Config;
use crate::crypto::master_key::{self, SealParams};
use crate::crypto::EncryptionLevel;
use crate::identity::{DeviceId, DeviceIdentity, IdentityStore};
use crate::protocol::MessageCodec;
use crate::rotation::{KeyRotationScheduler, RotationPolicy};
use crate::session::{MaintenanceReport, SessionId, SessionManager, SessionState};
use crate::storage::models::STATE_VERSION;
use crate::storage::{PersistedState, StateStore};
use crate::trust::{TrustEvaluator, TrustState, TrustedRoot};
use crate::utils::error::{PalisadeError, Result};
use crate::utils::logging::short_id;
use crate::utils::time::{Clock, SystemClock};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// A decrypted inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub sender: DeviceId,
    pub level: EncryptionLevel,
    pub epoch: u64,
    pub sequence: u64,
    /// Sender's trust state at delivery time
    pub trust: TrustState,
    pub plaintext: Vec<u8>,
}

impl ReceivedMessage {
    /// Unverified senders may talk to us, but every message says so.
    pub fn is_unverified(&self) -> bool {
        self.trust == TrustState::Unverified
    }
}

/// Главный фасад ядра шифрования
///
/// `Send + Sync`: share one instance behind an `Arc`. Encrypt and decrypt
/// never touch storage; persistence happens only through
/// [`SecureCore::save_state`] and the audit flush methods.
pub struct SecureCore {
    config: Config,
    clock: Arc<dyn Clock>,
    codec: MessageCodec,
    identities: IdentityStore,
    trust: TrustEvaluator,
    audit: Arc<AuditLog>,
    scheduler: Arc<KeyRotationScheduler>,
    sessions: SessionManager,
}

impl SecureCore {
    /// Core with a fresh identity, the system clock and an in-memory audit sink.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_components(config, Arc::new(SystemClock), Arc::new(MemorySink::new()), None)
    }

    /// Core configured from the process-wide [`Config::global`], set up
    /// beforehand with [`Config::init_from_env`] or [`Config::init_with`].
    pub fn from_global_config() -> Result<Self> {
        Self::new(Config::global().clone())
    }

    /// Core with explicit clock, audit sink and (optionally) a restored identity.
    pub fn with_components(
        config: Config,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn AuditSink>,
        identity: Option<Arc<DeviceIdentity>>,
    ) -> Result<Self> {
        config.validate()?;

        let identities = IdentityStore::new(clock.clone(), config.max_device_id_len);
        if let Some(identity) = identity {
            identities.install_identity(identity)?;
        }
        let local = identities.local_identity();

        let trust = TrustEvaluator::new(TrustedRoot {
            device_id: local.device_id().to_string(),
            public_keys: local.public_keys(),
        });
        let audit = Arc::new(AuditLog::new(clock.clone(), sink));
        let scheduler = Arc::new(KeyRotationScheduler::new(RotationPolicy::from_config(&config)));
        let sessions = SessionManager::new(
            local.clone(),
            clock.clone(),
            scheduler.clone(),
            audit.clone(),
            &config,
        );

        info!(
            target: "core",
            device = short_id(local.device_id()),
            default_level = %config.default_encryption_level,
            "Secure core initialized"
        );

        Ok(Self {
            codec: MessageCodec::from_config(&config),
            config,
            clock,
            identities,
            trust,
            audit,
            scheduler,
            sessions,
        })
    }

    /// Rebuild a core from `store`, opening the sealed identity with
    /// `passphrase`. An empty store yields a fresh identity.
    pub fn restore(
        config: Config,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn AuditSink>,
        store: &dyn StateStore,
        passphrase: &str,
    ) -> Result<Self> {
        let Some(state) = store.load()? else {
            info!(target: "core", "No saved state, starting with a new identity");
            return Self::with_components(config, clock, sink, None);
        };

        let identity = match &state.identity {
            Some(stored) => {
                let private = master_key::open_identity(stored, passphrase)?;
                let identity =
                    DeviceIdentity::from_private_keys(stored.device_id.clone(), stored.created_at, &private);
                if identity.public_keys() != stored.public_keys {
                    return Err(PalisadeError::StorageError(
                        "sealed identity does not match its public keys".to_string(),
                    ));
                }
                Some(Arc::new(identity))
            }
            None => None,
        };

        let core = Self::with_components(config, clock, sink, identity)?;
        let peers = state.peers.len();
        core.identities.restore(state.peers);
        core.sessions.restore_epoch_counters(&state.next_epochs);
        for root in state.trusted_roots {
            core.trust.add_trusted_root(root);
        }
        info!(target: "core", peers, "Restored saved state");
        Ok(core)
    }

    /// Seal the identity with `passphrase` and write it with the peer records.
    ///
    /// Session keys are never part of the saved state.
    pub fn save_state(&self, store: &dyn StateStore, passphrase: &str) -> Result<()> {
        let local = self.identities.local_identity();
        let sealed = master_key::seal_identity(
            local.device_id(),
            local.created_at(),
            local.public_keys(),
            &local.private_keys(),
            passphrase,
            SealParams {
                iterations: self.config.pbkdf2_iterations,
                salt_length: self.config.salt_length,
            },
        )?;

        // локальный корень добавляется заново при восстановлении
        let trusted_roots = self
            .trust
            .trusted_roots()
            .into_iter()
            .filter(|root| root.device_id != local.device_id())
            .collect();
        let state = PersistedState {
            version: STATE_VERSION,
            identity: Some(sealed),
            peers: self.identities.snapshot(),
            trusted_roots,
            next_epochs: self.sessions.epoch_counters(),
        };
        store.save(&state)?;
        info!(target: "core", peers = state.peers.len(), "Saved state");
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Persist buffered routine audit entries.
    pub fn flush_audit(&self) -> Result<usize> {
        self.audit.flush()
    }

    /// Drop audit entries older than the configured retention.
    pub fn sweep_audit(&self) -> Result<usize> {
        self.audit.sweep_retention(self.config.audit_retention)
    }

    /// Apply rotation deadlines, grace windows and establishment timeouts.
    pub fn run_maintenance(&self) -> MaintenanceReport {
        self.run_maintenance_at(self.clock.now_millis())
    }

    pub fn run_maintenance_at(&self, now: u64) -> MaintenanceReport {
        self.sessions.run_maintenance(now)
    }

    /// Expire the current outbound session with `peer` now.
    ///
    /// Returns the expired epoch, or `None` if there was no Active session.
    /// Fails if the forced-rotation audit entry cannot be persisted.
    pub fn rotate_session(&self, peer: &str) -> Result<Option<u64>> {
        self.sessions.rotate(peer)
    }

    /// Mark the pair as Establishing while the peer's identity is fetched.
    pub fn request_establishment(&self, peer: &str) -> SessionState {
        self.sessions.request_establishment(peer)
    }

    /// State of the outbound session with `peer`.
    pub fn session_state(&self, peer: &str) -> SessionState {
        self.sessions.outbound_state(peer)
    }

    /// State of one specific session epoch.
    pub fn session_state_of(&self, id: &SessionId) -> SessionState {
        self.sessions.session_state(id)
    }

    pub fn current_epoch(&self, peer: &str) -> Option<u64> {
        self.sessions.current_epoch(peer)
    }

    pub fn live_sessions(&self) -> usize {
        self.sessions.live_sessions()
    }

    /// Sessions with `peer` still holding key material, both directions.
    pub fn live_sessions_with(&self, peer: &str) -> usize {
        self.sessions.live_sessions_with(peer)
    }

    pub fn tracked_deadlines(&self) -> usize {
        self.scheduler.tracked()
    }

    /// Retire every session and flush the audit log.
    pub fn shutdown(&self) -> Result<usize> {
        let retired = self.sessions.shutdown();
        if let Err(e) = self.audit.flush() {
            warn!(target: "core", error = %e, "Audit flush failed during shutdown");
            return Err(e);
        }
        info!(target: "core", retired, "Secure core shut down");
        Ok(retired)
    }
}

impl fmt::Debug for SecureCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureCore")
            .field("device", &self.identities.local_identity().device_id())
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::utils::time::ManualClock;

    fn test_config() -> Config {
        Config {
            pbkdf2_iterations: 1_000,
            ..Config::default()
        }
    }

    #[test]
    fn test_core_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SecureCore>();
    }

    #[test]
    fn test_core_from_global_config() {
        let core = SecureCore::from_global_config().unwrap();
        let global = Config::global();
        assert_eq!(core.config().default_encryption_level, global.default_encryption_level);
        assert_eq!(core.config().max_skip, global.max_skip);
        assert!(Config::is_initialized());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = Config {
            max_skip: 0,
            ..test_config()
        };
        assert!(matches!(SecureCore::new(config), Err(PalisadeError::InvalidInput(_))));
    }

    #[test]
    fn test_save_and_restore_identity() {
        let clock = Arc::new(ManualClock::new(1_000));
        let core = SecureCore::with_components(test_config(), clock.clone(), Arc::new(MemorySink::new()), None)
            .unwrap();
        let store = MemoryStore::new();
        core.save_state(&store, "correct horse").unwrap();

        let restored = SecureCore::restore(
            test_config(),
            clock.clone(),
            Arc::new(MemorySink::new()),
            &store,
            "correct horse",
        )
        .unwrap();
        assert_eq!(
            restored.local_identity().public_keys(),
            core.local_identity().public_keys()
        );
        assert_eq!(restored.local_identity().device_id(), core.local_identity().device_id());

        let wrong = SecureCore::restore(test_config(), clock, Arc::new(MemorySink::new()), &store, "wrong");
        assert!(matches!(wrong, Err(PalisadeError::AuthenticationFailure)));
    }

    #[test]
    fn test_restore_from_empty_store_creates_identity() {
        let store = MemoryStore::new();
        let core = SecureCore::restore(
            test_config(),
            Arc::new(ManualClock::new(0)),
            Arc::new(MemorySink::new()),
            &store,
            "pass",
        )
        .unwrap();
        assert!(!core.local_identity().device_id().is_empty());
        assert!(store.load().unwrap().is_none());
    }
}
