// Идентичности и доверие к контактам

use crate::api::SecureCore;
use crate::audit::{AuditKind, AuditOutcome};
use crate::crypto::keys::{Fingerprint, PublicKeys};
use crate::identity::{DeviceIdentity, PeerDevice, PublicKeyBundle};
use crate::trust::{self, Evidence, SignatureChain, SignatureLink, TrustState, TrustedRoot};
use crate::utils::error::{PalisadeError, Result};
use crate::utils::logging::short_id;
use std::sync::Arc;
use tracing::info;

impl SecureCore {
    pub fn local_identity(&self) -> Arc<DeviceIdentity> {
        self.identities.local_identity()
    }

    /// This device's public bundle as JSON, for out-of-band distribution.
    pub fn export_public_bundle(&self) -> Result<String> {
        self.identities.local_identity().public_bundle().to_json()
    }

    /// Record a peer's public keys. New peers start Unverified.
    ///
    /// Keys that differ from the record for the same device id are refused
    /// and audited; a changed identity needs revocation and a new device id.
    pub fn remember_peer(&self, device_id: &str, public_keys: PublicKeys) -> Result<PeerDevice> {
        match self.identities.remember_peer(device_id, public_keys) {
            Err(PalisadeError::KeyMismatch(id)) => {
                let local = self.identities.local_identity();
                self.audit.record(
                    AuditKind::KeyMismatch,
                    &[local.device_id(), &id],
                    AuditOutcome::Failure,
                    format!("presented fingerprint {}", public_keys.fingerprint()),
                )?;
                Err(PalisadeError::KeyMismatch(id))
            }
            other => other,
        }
    }

    /// Parse a bundle produced by [`SecureCore::export_public_bundle`] and
    /// remember the peer it describes.
    pub fn import_peer_bundle(&self, json: &str) -> Result<PeerDevice> {
        let bundle = PublicKeyBundle::from_json(json)?;
        let keys = bundle.public_keys()?;
        self.remember_peer(&bundle.device_id, keys)
    }

    pub fn lookup_peer(&self, device_id: &str) -> Result<PeerDevice> {
        self.identities.lookup_peer(device_id)
    }

    pub fn peers(&self) -> Vec<PeerDevice> {
        self.identities.snapshot()
    }

    pub fn trust_state(&self, device_id: &str) -> Result<TrustState> {
        Ok(self.identities.lookup_peer(device_id)?.trust)
    }

    /// Apply trust evidence to a peer. A transition to Revoked retires every
    /// session with that peer.
    pub fn verify_peer(&self, device_id: &str, evidence: &Evidence) -> Result<TrustState> {
        self.apply_evidence(device_id, evidence).map(|(state, _)| state)
    }

    /// Trust on first use.
    pub fn accept_on_first_use(&self, device_id: &str) -> Result<TrustState> {
        self.verify_peer(device_id, &Evidence::FirstContact)
    }

    /// Compare a fingerprint obtained out of band with the peer's keys.
    pub fn verify_fingerprint(&self, device_id: &str, expected: &Fingerprint) -> Result<TrustState> {
        self.verify_peer(device_id, &Evidence::FingerprintMatch(*expected))
    }

    /// Sign a known peer's keys with the local identity.
    pub fn cross_sign(&self, device_id: &str) -> Result<SignatureLink> {
        let peer = self.identities.lookup_peer(device_id)?;
        let local = self.identities.local_identity();
        Ok(trust::cross_sign(&local, device_id, &peer.public_keys))
    }

    /// Cross-sign a peer locally and apply the resulting one-link chain.
    pub fn cross_sign_peer(&self, device_id: &str) -> Result<TrustState> {
        let link = self.cross_sign(device_id)?;
        self.verify_peer(device_id, &Evidence::CrossSignature(SignatureChain::single(link)))
    }

    pub fn add_trusted_root(&self, root: TrustedRoot) {
        self.trust.add_trusted_root(root);
    }

    pub fn trusted_roots(&self) -> Vec<TrustedRoot> {
        self.trust.trusted_roots()
    }

    /// Revoke a peer. Returns how many sessions were retired.
    pub fn revoke_peer(&self, device_id: &str, reason: &str) -> Result<usize> {
        let evidence = Evidence::Revocation {
            reason: reason.to_string(),
        };
        self.apply_evidence(device_id, &evidence)
            .map(|(_, retired)| retired)
    }

    fn apply_evidence(&self, device_id: &str, evidence: &Evidence) -> Result<(TrustState, usize)> {
        let verified = self
            .trust
            .verify(&self.identities, &self.audit, device_id, evidence);
        // a revocation stands even when its audit entry failed to persist
        let revoked = match &verified {
            Ok(state) => *state == TrustState::Revoked,
            Err(_) => self
                .identities
                .lookup_peer(device_id)
                .is_ok_and(|peer| peer.is_revoked()),
        };
        let retired = if revoked {
            self.sessions.revoke_peer(device_id)
        } else {
            0
        };
        if retired > 0 {
            info!(target: "core", peer = short_id(device_id), retired, "Retired sessions of revoked peer");
        }
        Ok((verified?, retired))
    }
}
