// Отправка и получение сообщений
//
// Inbound failures are audited with full detail locally; the caller gets the
// typed error and is expected to answer the remote side with
// `PalisadeError::remote_code` only.

use crate::api::{ReceivedMessage, SecureCore};
use crate::audit::{AuditKind, AuditOutcome};
use crate::crypto::{suite_for, EncryptionLevel};
use crate::protocol::Envelope;
use crate::trust::TrustState;
use crate::utils::error::{PalisadeError, Result};
use crate::utils::logging::short_id;
use tracing::{debug, warn};

impl SecureCore {
    /// Encrypt `plaintext` for `peer` at `level` and return envelope bytes.
    pub fn send(&self, peer: &str, level: EncryptionLevel, plaintext: &[u8]) -> Result<Vec<u8>> {
        let local = self.identities.local_identity();
        let record = match self.identities.lookup_peer(peer) {
            Ok(record) => record,
            Err(err) => {
                // a requested establishment may have run out meanwhile
                self.sessions.check_establishment(peer)?;
                self.audit.note(
                    AuditKind::UnknownPeer,
                    &[local.device_id(), peer],
                    AuditOutcome::Failure,
                    "send to unknown peer",
                );
                return Err(err);
            }
        };

        match record.trust {
            TrustState::Revoked => {
                self.refuse_send(peer, "peer is revoked");
                return Err(PalisadeError::PeerRevoked(peer.to_string()));
            }
            TrustState::Unverified if self.config.require_verification_before_send => {
                self.refuse_send(peer, "peer is not verified");
                return Err(PalisadeError::UntrustedPeer(peer.to_string()));
            }
            _ => {}
        }

        let envelope = self.sessions.encrypt(&record, level, plaintext)?;
        let bytes = self.codec.encode(&envelope)?;
        debug!(
            target: "core",
            peer = short_id(peer),
            epoch = envelope.epoch,
            sequence = envelope.sequence,
            level = %level,
            "Message sealed"
        );
        Ok(bytes)
    }

    /// [`SecureCore::send`] at the configured default level.
    pub fn send_default(&self, peer: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.send(peer, self.config.default_encryption_level, plaintext)
    }

    fn refuse_send(&self, peer: &str, reason: &str) {
        warn!(target: "core", peer = short_id(peer), reason, "Send refused");
        let local = self.identities.local_identity();
        self.audit.note(
            AuditKind::SendRefused,
            &[local.device_id(), peer],
            AuditOutcome::Failure,
            reason,
        );
    }

    /// Decode, authenticate and decrypt envelope bytes.
    ///
    /// The result carries the sender's trust state; Unverified senders are
    /// delivered, flagged. A rejection whose critical audit entry cannot be
    /// persisted is reported as that storage error instead.
    pub fn receive(&self, bytes: &[u8]) -> Result<ReceivedMessage> {
        let envelope = match self.codec.decode(bytes) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.audit_inbound_failure(None, &err)?;
                return Err(err);
            }
        };

        match self.open_envelope(&envelope) {
            Ok(message) => {
                debug!(
                    target: "core",
                    sender = short_id(&message.sender),
                    epoch = message.epoch,
                    sequence = message.sequence,
                    trust = %message.trust,
                    "Message opened"
                );
                Ok(message)
            }
            Err(err) => {
                self.audit_inbound_failure(Some(&envelope.sender), &err)?;
                Err(err)
            }
        }
    }

    fn open_envelope(&self, envelope: &Envelope) -> Result<ReceivedMessage> {
        let local = self.identities.local_identity();
        if envelope.recipient != local.device_id() {
            return Err(PalisadeError::MalformedEnvelope(
                "envelope addressed to another device".to_string(),
            ));
        }

        let sender = self.identities.lookup_peer(&envelope.sender)?;
        if sender.is_revoked() {
            return Err(PalisadeError::PeerRevoked(sender.device_id));
        }

        if suite_for(envelope.level).signs_envelopes() {
            let signature = envelope.signature.as_deref().ok_or_else(|| {
                PalisadeError::MalformedEnvelope("missing signature".to_string())
            })?;
            sender.public_keys.verify(&envelope.signing_bytes(), signature)?;
        }

        let plaintext = self.sessions.decrypt(&sender, envelope)?;
        Ok(ReceivedMessage {
            sender: sender.device_id,
            level: envelope.level,
            epoch: envelope.epoch,
            sequence: envelope.sequence,
            trust: sender.trust,
            plaintext,
        })
    }

    fn audit_inbound_failure(&self, sender: Option<&str>, err: &PalisadeError) -> Result<()> {
        let kind = match err {
            PalisadeError::AuthenticationFailure => AuditKind::AuthenticationFailure,
            PalisadeError::ReplayRejected { .. } => AuditKind::ReplayRejected,
            PalisadeError::MalformedEnvelope(_) => AuditKind::MalformedEnvelope,
            PalisadeError::SessionExpired { .. } => AuditKind::SessionExpired,
            PalisadeError::UnknownPeer(_) => AuditKind::UnknownPeer,
            _ => AuditKind::MessageRejected,
        };
        warn!(
            target: "core",
            sender = sender.map(short_id).unwrap_or("-"),
            kind = ?kind,
            error = %err,
            "Inbound message rejected"
        );

        let local = self.identities.local_identity();
        let mut devices = vec![local.device_id()];
        devices.extend(sender);
        self.audit
            .record(kind, &devices, AuditOutcome::Failure, err.to_string())?;
        Ok(())
    }
}
