//! Trust evaluation for peer devices.
//!
//! Trust only moves up (`Unverified < TofuAccepted < CrossSigned`) and
//! `Revoked` is terminal. Failed evidence never changes the state; it is
//! audited and the current state is returned.
//!
//! A cross-signature chain is a list of links. The first link signs the
//! subject device, each following link signs the signer of the previous one,
//! and the last signer must be a trusted root. The local device is always a
//! root.

use crate::audit::{AuditKind, AuditLog, AuditOutcome};
use crate::crypto::keys::{Fingerprint, PublicKeys};
use crate::identity::{DeviceId, DeviceIdentity, IdentityStore, PeerDevice};
use crate::utils::error::Result;
use crate::utils::logging::short_id;
use crate::utils::sync::{read, write};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;
use tracing::{debug, info, warn};

const CROSS_SIGN_DOMAIN: &[u8] = b"palisade/cross-sign/v1";

/// Longest accepted signature chain
pub const MAX_CHAIN_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrustState {
    Unverified,
    TofuAccepted,
    CrossSigned,
    Revoked,
}

impl TrustState {
    fn rank(self) -> u8 {
        match self {
            TrustState::Unverified => 0,
            TrustState::TofuAccepted => 1,
            TrustState::CrossSigned => 2,
            TrustState::Revoked => 3,
        }
    }

    /// The state after applying `proposed`; never lower, never out of Revoked.
    pub fn merge(self, proposed: TrustState) -> TrustState {
        if self == TrustState::Revoked || proposed.rank() <= self.rank() {
            self
        } else {
            proposed
        }
    }

    pub fn is_verified(self) -> bool {
        matches!(self, TrustState::TofuAccepted | TrustState::CrossSigned)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TrustState::Unverified => "unverified",
            TrustState::TofuAccepted => "tofu-accepted",
            TrustState::CrossSigned => "cross-signed",
            TrustState::Revoked => "revoked",
        }
    }
}

impl fmt::Display for TrustState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A device whose signatures anchor cross-signing chains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedRoot {
    pub device_id: DeviceId,
    pub public_keys: PublicKeys,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureLink {
    pub signer: DeviceId,
    pub signer_keys: PublicKeys,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureChain {
    pub links: Vec<SignatureLink>,
}

impl SignatureChain {
    pub fn single(link: SignatureLink) -> Self {
        Self { links: vec![link] }
    }

    /// Extend the chain one level towards a root.
    pub fn push(&mut self, link: SignatureLink) {
        self.links.push(link);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evidence {
    FirstContact,
    FingerprintMatch(Fingerprint),
    CrossSignature(SignatureChain),
    Revocation { reason: String },
}

impl Evidence {
    fn name(&self) -> &'static str {
        match self {
            Evidence::FirstContact => "first-contact",
            Evidence::FingerprintMatch(_) => "fingerprint",
            Evidence::CrossSignature(_) => "cross-signature",
            Evidence::Revocation { .. } => "revocation",
        }
    }
}

/// Bytes a cross-signer signs for `device_id`.
pub fn cross_sign_payload(device_id: &str, keys: &PublicKeys) -> Vec<u8> {
    let mut payload = Vec::with_capacity(CROSS_SIGN_DOMAIN.len() + device_id.len() + 66);
    payload.extend_from_slice(CROSS_SIGN_DOMAIN);
    payload.extend_from_slice(&(device_id.len() as u16).to_be_bytes());
    payload.extend_from_slice(device_id.as_bytes());
    payload.extend_from_slice(&keys.signing);
    payload.extend_from_slice(&keys.encryption);
    payload
}

/// Sign `subject` with `signer`'s identity key.
pub fn cross_sign(signer: &DeviceIdentity, subject_id: &str, subject_keys: &PublicKeys) -> SignatureLink {
    SignatureLink {
        signer: signer.device_id().to_string(),
        signer_keys: signer.public_keys(),
        signature: signer.sign(&cross_sign_payload(subject_id, subject_keys)),
    }
}

#[derive(Debug)]
pub struct TrustEvaluator {
    roots: RwLock<HashMap<DeviceId, PublicKeys>>,
}

impl TrustEvaluator {
    pub fn new(local_root: TrustedRoot) -> Self {
        let mut roots = HashMap::new();
        roots.insert(local_root.device_id, local_root.public_keys);
        Self {
            roots: RwLock::new(roots),
        }
    }

    pub fn add_trusted_root(&self, root: TrustedRoot) {
        debug!(target: "trust", root = short_id(&root.device_id), "Added trusted root");
        write(&self.roots).insert(root.device_id, root.public_keys);
    }

    pub fn trusted_roots(&self) -> Vec<TrustedRoot> {
        let mut roots: Vec<TrustedRoot> = read(&self.roots)
            .iter()
            .map(|(device_id, public_keys)| TrustedRoot {
                device_id: device_id.clone(),
                public_keys: *public_keys,
            })
            .collect();
        roots.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        roots
    }

    /// Apply evidence to a known peer and return its resulting state.
    ///
    /// Errors when the peer is unknown or a critical audit entry cannot be
    /// persisted; in the latter case the new state is already applied.
    pub fn verify(
        &self,
        identities: &IdentityStore,
        audit: &AuditLog,
        device_id: &str,
        evidence: &Evidence,
    ) -> Result<TrustState> {
        let peer = identities.lookup_peer(device_id)?;

        let proposed = match self.assess(identities, &peer, evidence) {
            Ok(proposed) => proposed,
            Err(reason) => {
                warn!(
                    target: "trust",
                    peer = short_id(device_id),
                    evidence = evidence.name(),
                    reason = %reason,
                    "Verification failed"
                );
                audit.record(
                    AuditKind::VerificationFailed,
                    &[device_id],
                    AuditOutcome::Failure,
                    format!("{}: {}", evidence.name(), reason),
                )?;
                return Ok(peer.trust);
            }
        };

        let (before, after) = identities.update_peer(device_id, |record| {
            let before = record.trust;
            record.trust = before.merge(proposed);
            if record.trust == TrustState::Revoked && before != TrustState::Revoked {
                if let Evidence::Revocation { reason } = evidence {
                    record.revocation_reason = Some(reason.clone());
                }
            }
            (before, record.trust)
        })?;

        if before != after {
            info!(
                target: "trust",
                peer = short_id(device_id),
                from = %before,
                to = %after,
                "Trust state changed"
            );
            let kind = if after == TrustState::Revoked {
                AuditKind::PeerRevoked
            } else {
                AuditKind::TrustChanged
            };
            audit.record(
                kind,
                &[device_id],
                AuditOutcome::Success,
                format!("{} -> {} ({})", before, after, evidence.name()),
            )?;
        }
        Ok(after)
    }

    /// The state the evidence supports, or why it supports nothing.
    fn assess(
        &self,
        identities: &IdentityStore,
        peer: &PeerDevice,
        evidence: &Evidence,
    ) -> std::result::Result<TrustState, String> {
        match evidence {
            Evidence::Revocation { .. } => Ok(TrustState::Revoked),
            _ if peer.is_revoked() => Err("peer is revoked".to_string()),
            Evidence::FirstContact => Ok(TrustState::TofuAccepted),
            Evidence::FingerprintMatch(expected) => {
                if *expected == peer.fingerprint() {
                    Ok(TrustState::TofuAccepted)
                } else {
                    Err("fingerprint mismatch".to_string())
                }
            }
            Evidence::CrossSignature(chain) => {
                self.verify_chain(identities, peer, chain)?;
                Ok(TrustState::CrossSigned)
            }
        }
    }

    fn verify_chain(
        &self,
        identities: &IdentityStore,
        subject: &PeerDevice,
        chain: &SignatureChain,
    ) -> std::result::Result<(), String> {
        if chain.links.is_empty() {
            return Err("empty signature chain".to_string());
        }
        if chain.links.len() > MAX_CHAIN_DEPTH {
            return Err(format!("chain longer than {}", MAX_CHAIN_DEPTH));
        }

        let mut signed_id = subject.device_id.as_str();
        let mut signed_keys = subject.public_keys;
        for link in &chain.links {
            if let Ok(signer) = identities.lookup_peer(&link.signer) {
                if signer.is_revoked() {
                    return Err(format!("signer {} is revoked", short_id(&link.signer)));
                }
                if signer.public_keys != link.signer_keys {
                    return Err(format!("signer {} keys do not match record", short_id(&link.signer)));
                }
            }
            link.signer_keys
                .verify(&cross_sign_payload(signed_id, &signed_keys), &link.signature)
                .map_err(|_| format!("bad signature from {}", short_id(&link.signer)))?;
            signed_id = link.signer.as_str();
            signed_keys = link.signer_keys;
        }

        match read(&self.roots).get(signed_id) {
            Some(root_keys) if *root_keys == signed_keys => Ok(()),
            _ => Err("chain does not end at a trusted root".to_string()),
        }
    }
}
