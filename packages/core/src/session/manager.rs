// Менеджер сессий: одна исходящая и набор входящих эпох на каждого пира
//
// Lock order: slot map (briefly) -> slot mutex -> scheduler / audit.
// The maps are never held while a slot is locked.

use crate::audit::{AuditKind, AuditLog, AuditOutcome};
use crate::config::Config;
use crate::crypto::handshake::{self, EpochContext};
use crate::crypto::{suite_for, EncryptionLevel};
use crate::identity::{DeviceId, DeviceIdentity, PeerDevice};
use crate::protocol::Envelope;
use crate::rotation::{DueAction, KeyRotationScheduler, RotationReason};
use crate::session::{Direction, Session, SessionId, SessionState};
use crate::utils::error::{PalisadeError, Result};
use crate::utils::logging::short_id;
use crate::utils::sync::{lock, read, write};
use crate::utils::time::{millis, Clock};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

#[derive(Default)]
struct OutboundSlot {
    current: Option<Session>,
    expiring: Vec<Session>,
    next_epoch: u64,
    /// Set while the pair is Establishing
    establishing_since: Option<u64>,
    /// Peer revoked: no session is ever established again
    revoked: bool,
}

#[derive(Default)]
struct InboundSlot {
    epochs: BTreeMap<u64, Session>,
    latest_epoch: Option<u64>,
    revoked: bool,
}

/// Counts from one maintenance sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub expired: usize,
    pub retired: usize,
    pub timed_out: usize,
}

pub struct SessionManager {
    local: Arc<DeviceIdentity>,
    clock: Arc<dyn Clock>,
    scheduler: Arc<KeyRotationScheduler>,
    audit: Arc<AuditLog>,
    max_skip: u64,
    establishment_timeout_ms: u64,
    outbound: RwLock<HashMap<DeviceId, Arc<Mutex<OutboundSlot>>>>,
    inbound: RwLock<HashMap<DeviceId, Arc<Mutex<InboundSlot>>>>,
}

impl SessionManager {
    pub fn new(
        local: Arc<DeviceIdentity>,
        clock: Arc<dyn Clock>,
        scheduler: Arc<KeyRotationScheduler>,
        audit: Arc<AuditLog>,
        config: &Config,
    ) -> Self {
        Self {
            local,
            clock,
            scheduler,
            audit,
            max_skip: config.max_skip,
            establishment_timeout_ms: millis(config.establishment_timeout),
            outbound: RwLock::new(HashMap::new()),
            inbound: RwLock::new(HashMap::new()),
        }
    }

    fn local_id(&self) -> &str {
        self.local.device_id()
    }

    fn outbound_slot(&self, peer: &str) -> Arc<Mutex<OutboundSlot>> {
        if let Some(slot) = read(&self.outbound).get(peer) {
            return slot.clone();
        }
        write(&self.outbound).entry(peer.to_string()).or_default().clone()
    }

    fn inbound_slot(&self, peer: &str) -> Arc<Mutex<InboundSlot>> {
        if let Some(slot) = read(&self.inbound).get(peer) {
            return slot.clone();
        }
        write(&self.inbound).entry(peer.to_string()).or_default().clone()
    }

    fn existing_outbound(&self, peer: &str) -> Option<Arc<Mutex<OutboundSlot>>> {
        read(&self.outbound).get(peer).cloned()
    }

    fn existing_inbound(&self, peer: &str) -> Option<Arc<Mutex<InboundSlot>>> {
        read(&self.inbound).get(peer).cloned()
    }

    /// Encrypt for `peer` at `level`, establishing or rotating first if needed.
    pub fn encrypt(&self, peer: &PeerDevice, level: EncryptionLevel, plaintext: &[u8]) -> Result<Envelope> {
        let slot = self.outbound_slot(&peer.device_id);
        let mut slot = lock(&slot);
        let now = self.clock.now_millis();

        // trust may have changed since the caller looked the peer up
        if slot.revoked {
            return Err(PalisadeError::PeerRevoked(peer.device_id.clone()));
        }
        if self.establishment_timed_out(&slot, now) {
            self.time_out(&peer.device_id, &mut slot);
            return Err(PalisadeError::EstablishmentTimeout(peer.device_id.clone()));
        }

        let reason = slot
            .current
            .as_ref()
            .and_then(|session| self.scheduler.evaluate(&session.stats(), level, now));
        if let Some(reason) = reason {
            self.expire_current(&peer.device_id, &mut slot, reason, now);
        }
        if slot.current.is_none() {
            self.establish(peer, level, &mut slot, now)?;
        }

        match slot.current.as_mut() {
            Some(session) => session.seal(plaintext, &self.local),
            None => Err(PalisadeError::EstablishmentTimeout(peer.device_id.clone())),
        }
    }

    fn establishment_timed_out(&self, slot: &OutboundSlot, now: u64) -> bool {
        slot.current.is_none()
            && slot
                .establishing_since
                .is_some_and(|since| now.saturating_sub(since) >= self.establishment_timeout_ms)
    }

    fn time_out(&self, peer: &str, slot: &mut OutboundSlot) {
        slot.establishing_since = None;
        warn!(target: "session", peer = short_id(peer), "Session establishment timed out");
        self.audit.note(
            AuditKind::EstablishmentTimeout,
            &[self.local_id(), peer],
            AuditOutcome::Failure,
            format!("epoch {}", slot.next_epoch),
        );
    }

    fn establish(
        &self,
        peer: &PeerDevice,
        level: EncryptionLevel,
        slot: &mut OutboundSlot,
        now: u64,
    ) -> Result<()> {
        slot.establishing_since.get_or_insert(now);
        let epoch = slot.next_epoch;
        let suite = suite_for(level);
        let context = EpochContext {
            initiator: self.local_id(),
            responder: &peer.device_id,
            epoch,
            level,
        };

        let keys = match handshake::initiate(
            suite,
            &self.local.agreement_secret(),
            &peer.public_keys.encryption,
            &context,
        ) {
            Ok(keys) => keys,
            Err(e) => {
                slot.establishing_since = None;
                return Err(e.into());
            }
        };

        let id = SessionId::new(self.local_id(), &peer.device_id, epoch, Direction::Outbound);
        info!(target: "session", session = %id, level = %level, "Outbound session established");
        self.scheduler.schedule(id.clone(), now);
        slot.current = Some(Session::new(id, suite, keys.epoch_key, keys.ephemeral_public, now));
        slot.next_epoch = epoch + 1;
        slot.establishing_since = None;

        self.audit.note(
            AuditKind::SessionEstablished,
            &[self.local_id(), &peer.device_id],
            AuditOutcome::Success,
            format!("outbound epoch {} at {}", epoch, level),
        );

        // outbound sessions never decrypt, so the superseded epochs go now
        for mut old in std::mem::take(&mut slot.expiring) {
            self.retire_session(&mut old, "superseded by new epoch");
        }
        Ok(())
    }

    /// Move the current outbound session to Expiring. Scheduled rotations
    /// are audited here; forced ones by the caller. Returns the epoch.
    fn expire_current(
        &self,
        peer: &str,
        slot: &mut OutboundSlot,
        reason: RotationReason,
        now: u64,
    ) -> Option<u64> {
        let mut session = slot.current.take()?;
        let deadline = self.scheduler.mark_expiring(session.id(), now);
        session.mark_expiring(deadline);
        info!(
            target: "rotation",
            session = %session.id(),
            reason = %reason,
            messages = session.messages(),
            "Rotating outbound session"
        );
        let epoch = session.epoch();
        if reason != RotationReason::Forced {
            self.audit.note(
                AuditKind::KeyRotated,
                &[self.local_id(), peer],
                AuditOutcome::Success,
                format!("epoch {} ({})", epoch, reason),
            );
        }
        slot.expiring.push(session);
        Some(epoch)
    }

    /// Decrypt an envelope from `sender`, creating the inbound epoch on first use.
    pub fn decrypt(&self, sender: &PeerDevice, envelope: &Envelope) -> Result<Vec<u8>> {
        let slot = self.inbound_slot(&sender.device_id);
        let mut slot = lock(&slot);
        if slot.revoked {
            return Err(PalisadeError::PeerRevoked(sender.device_id.clone()));
        }
        let now = self.clock.now_millis();
        let expired = || PalisadeError::SessionExpired {
            peer: sender.device_id.clone(),
            epoch: envelope.epoch,
        };

        if let Some(session) = slot.epochs.get_mut(&envelope.epoch) {
            if session.can_decrypt(now) {
                return session.open(envelope, self.max_skip);
            }
            // grace elapsed before the sweep got to it
            session.retire();
            let id = session.id().clone();
            slot.epochs.remove(&envelope.epoch);
            self.scheduler.remove(&id);
            return Err(expired());
        }
        if slot.latest_epoch.is_some_and(|latest| envelope.epoch <= latest) {
            return Err(expired());
        }

        let suite = suite_for(envelope.level);
        let context = EpochContext {
            initiator: &sender.device_id,
            responder: self.local_id(),
            epoch: envelope.epoch,
            level: envelope.level,
        };
        let epoch_key = handshake::respond(
            suite,
            &self.local.agreement_secret(),
            &sender.public_keys.encryption,
            &envelope.ephemeral_public,
            &context,
        )
        .map_err(|e| {
            debug!(target: "session", error = %e, "Inbound key agreement failed");
            PalisadeError::AuthenticationFailure
        })?;

        let id = SessionId::new(self.local_id(), &sender.device_id, envelope.epoch, Direction::Inbound);
        let mut session = Session::new(id.clone(), suite, epoch_key, envelope.ephemeral_public, now);
        // tentative until the first message authenticates
        let plaintext = session.open(envelope, self.max_skip)?;

        for older in slot.epochs.values_mut() {
            if older.state() == SessionState::Active {
                let deadline = self.scheduler.mark_expiring(older.id(), now);
                older.mark_expiring(deadline);
            }
        }
        info!(target: "session", session = %id, level = %envelope.level, "Inbound session established");
        self.scheduler.schedule(id, now);
        slot.epochs.insert(envelope.epoch, session);
        slot.latest_epoch = Some(envelope.epoch);

        self.audit.note(
            AuditKind::SessionEstablished,
            &[self.local_id(), &sender.device_id],
            AuditOutcome::Success,
            format!("inbound epoch {} at {}", envelope.epoch, envelope.level),
        );
        Ok(plaintext)
    }

    /// Move the current outbound session to Expiring; the next send starts a
    /// new epoch. Returns the expired epoch, `None` without an Active session.
    ///
    /// Fails only if the forced-rotation audit entry cannot be persisted; the
    /// session is expired regardless.
    pub fn rotate(&self, peer: &str) -> Result<Option<u64>> {
        let Some(slot) = self.existing_outbound(peer) else {
            return Ok(None);
        };
        let mut slot = lock(&slot);
        let Some(epoch) = self.expire_current(peer, &mut slot, RotationReason::Forced, self.clock.now_millis())
        else {
            return Ok(None);
        };
        self.audit.record(
            AuditKind::ForcedRotation,
            &[self.local_id(), peer],
            AuditOutcome::Success,
            format!("epoch {} ({})", epoch, RotationReason::Forced),
        )?;
        Ok(Some(epoch))
    }

    /// Put the pair in Establishing while the peer's identity is fetched.
    pub fn request_establishment(&self, peer: &str) -> SessionState {
        let slot = self.outbound_slot(peer);
        let mut slot = lock(&slot);
        if slot.current.is_some() {
            return SessionState::Active;
        }
        let now = self.clock.now_millis();
        slot.establishing_since.get_or_insert(now);
        debug!(target: "session", peer = short_id(peer), "Establishment requested");
        SessionState::Establishing
    }

    /// Fail with `EstablishmentTimeout` once a requested establishment has
    /// waited too long for the peer's identity; the pair returns to NoSession.
    pub fn check_establishment(&self, peer: &str) -> Result<()> {
        let Some(slot) = self.existing_outbound(peer) else {
            return Ok(());
        };
        let mut slot = lock(&slot);
        if self.establishment_timed_out(&slot, self.clock.now_millis()) {
            self.time_out(peer, &mut slot);
            return Err(PalisadeError::EstablishmentTimeout(peer.to_string()));
        }
        Ok(())
    }

    /// Retire every session with a revoked `peer` and refuse any new one,
    /// in both directions. Returns how many sessions were retired.
    ///
    /// The slots are created if missing so that a send or receive already
    /// past its trust check cannot establish afterwards.
    pub fn revoke_peer(&self, peer: &str) -> usize {
        let mut retired = Vec::new();
        {
            let slot = self.outbound_slot(peer);
            let mut slot = lock(&slot);
            slot.revoked = true;
            slot.establishing_since = None;
            retired.extend(slot.current.take());
            retired.append(&mut slot.expiring);
        }
        {
            let slot = self.inbound_slot(peer);
            let mut slot = lock(&slot);
            slot.revoked = true;
            retired.extend(std::mem::take(&mut slot.epochs).into_values());
        }
        for session in &mut retired {
            self.retire_session(session, "peer revoked");
        }
        retired.len()
    }

    /// Retire every session with `peer`, both directions. Returns how many.
    pub fn retire_peer(&self, peer: &str, reason: &str) -> usize {
        let mut retired = Vec::new();
        if let Some(slot) = self.existing_outbound(peer) {
            let mut slot = lock(&slot);
            slot.establishing_since = None;
            retired.extend(slot.current.take());
            retired.append(&mut slot.expiring);
        }
        if let Some(slot) = self.existing_inbound(peer) {
            let mut slot = lock(&slot);
            let epochs = std::mem::take(&mut slot.epochs);
            retired.extend(epochs.into_values());
        }

        for session in &mut retired {
            self.retire_session(session, reason);
        }
        retired.len()
    }

    fn retire_session(&self, session: &mut Session, reason: &str) {
        session.retire();
        self.scheduler.remove(session.id());
        debug!(target: "session", session = %session.id(), reason, "Session retired");
        self.audit.note(
            AuditKind::SessionRetired,
            &[self.local_id(), &session.id().peer],
            AuditOutcome::Success,
            format!("epoch {} ({})", session.epoch(), reason),
        );
    }

    /// State of the outbound pair with `peer`.
    pub fn outbound_state(&self, peer: &str) -> SessionState {
        let Some(slot) = self.existing_outbound(peer) else {
            return SessionState::NoSession;
        };
        let slot = lock(&slot);
        match (&slot.current, slot.establishing_since) {
            (Some(session), _) => session.state(),
            (None, Some(_)) => SessionState::Establishing,
            (None, None) => SessionState::NoSession,
        }
    }

    pub fn session_state(&self, id: &SessionId) -> SessionState {
        match id.direction {
            Direction::Outbound => {
                let Some(slot) = self.existing_outbound(&id.peer) else {
                    return SessionState::NoSession;
                };
                let slot = lock(&slot);
                if let Some(session) = slot
                    .current
                    .iter()
                    .chain(slot.expiring.iter())
                    .find(|s| s.epoch() == id.epoch)
                {
                    session.state()
                } else if id.epoch < slot.next_epoch {
                    SessionState::Retired
                } else if id.epoch == slot.next_epoch && slot.establishing_since.is_some() {
                    SessionState::Establishing
                } else {
                    SessionState::NoSession
                }
            }
            Direction::Inbound => {
                let Some(slot) = self.existing_inbound(&id.peer) else {
                    return SessionState::NoSession;
                };
                let slot = lock(&slot);
                match slot.epochs.get(&id.epoch) {
                    Some(session) => session.state(),
                    None if slot.latest_epoch.is_some_and(|l| id.epoch <= l) => SessionState::Retired,
                    None => SessionState::NoSession,
                }
            }
        }
    }

    /// Epoch of the Active outbound session with `peer`.
    pub fn current_epoch(&self, peer: &str) -> Option<u64> {
        let slot = self.existing_outbound(peer)?;
        let slot = lock(&slot);
        slot.current.as_ref().map(Session::epoch)
    }

    /// Apply due deadlines and establishment timeouts as of `now`.
    pub fn run_maintenance(&self, now: u64) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        for (id, action) in self.scheduler.due(now) {
            let applied = match id.direction {
                Direction::Outbound => self.apply_outbound(&id, action, now),
                Direction::Inbound => self.apply_inbound(&id, action, now),
            };
            match (applied, action) {
                (true, DueAction::Expire) => report.expired += 1,
                (true, DueAction::Retire) => report.retired += 1,
                (false, _) => self.scheduler.remove(&id),
            }
        }

        let slots: Vec<(DeviceId, Arc<Mutex<OutboundSlot>>)> = read(&self.outbound)
            .iter()
            .map(|(peer, slot)| (peer.clone(), slot.clone()))
            .collect();
        for (peer, slot) in slots {
            let mut slot = lock(&slot);
            if self.establishment_timed_out(&slot, now) {
                self.time_out(&peer, &mut slot);
                report.timed_out += 1;
            }
        }

        if report != MaintenanceReport::default() {
            debug!(
                target: "rotation",
                expired = report.expired,
                retired = report.retired,
                timed_out = report.timed_out,
                "Maintenance sweep"
            );
        }
        report
    }

    fn apply_outbound(&self, id: &SessionId, action: DueAction, now: u64) -> bool {
        let Some(slot) = self.existing_outbound(&id.peer) else {
            return false;
        };
        let mut slot = lock(&slot);
        match action {
            DueAction::Expire => {
                if slot.current.as_ref().is_some_and(|s| s.epoch() == id.epoch) {
                    self.expire_current(&id.peer, &mut slot, RotationReason::IntervalElapsed, now)
                        .is_some()
                } else {
                    false
                }
            }
            DueAction::Retire => match slot.expiring.iter().position(|s| s.epoch() == id.epoch) {
                Some(index) => {
                    let mut session = slot.expiring.remove(index);
                    self.retire_session(&mut session, "grace window elapsed");
                    true
                }
                None => false,
            },
        }
    }

    fn apply_inbound(&self, id: &SessionId, action: DueAction, now: u64) -> bool {
        let Some(slot) = self.existing_inbound(&id.peer) else {
            return false;
        };
        let mut slot = lock(&slot);
        match action {
            DueAction::Expire => match slot.epochs.get_mut(&id.epoch) {
                Some(session) if session.state() == SessionState::Active => {
                    let deadline = self.scheduler.mark_expiring(session.id(), now);
                    session.mark_expiring(deadline);
                    true
                }
                _ => false,
            },
            DueAction::Retire => match slot.epochs.remove(&id.epoch) {
                Some(mut session) => {
                    self.retire_session(&mut session, "grace window elapsed");
                    true
                }
                None => false,
            },
        }
    }

    /// Retire every session. Returns how many were live.
    pub fn shutdown(&self) -> usize {
        let mut peers: Vec<DeviceId> = read(&self.outbound).keys().cloned().collect();
        peers.extend(read(&self.inbound).keys().cloned());
        peers.sort();
        peers.dedup();
        peers
            .iter()
            .map(|peer| self.retire_peer(peer, "shutdown"))
            .sum()
    }

    /// Next outbound epoch for every peer that has had an outbound slot.
    pub fn epoch_counters(&self) -> BTreeMap<DeviceId, u64> {
        let slots: Vec<(DeviceId, Arc<Mutex<OutboundSlot>>)> = read(&self.outbound)
            .iter()
            .map(|(peer, slot)| (peer.clone(), slot.clone()))
            .collect();
        slots
            .into_iter()
            .map(|(peer, slot)| {
                let next = lock(&slot).next_epoch;
                (peer, next)
            })
            .filter(|(_, next)| *next > 0)
            .collect()
    }

    /// Continue epoch numbering from persisted counters. Never moves a
    /// counter backwards.
    pub fn restore_epoch_counters(&self, counters: &BTreeMap<DeviceId, u64>) {
        for (peer, next) in counters {
            let slot = self.outbound_slot(peer);
            let mut slot = lock(&slot);
            slot.next_epoch = slot.next_epoch.max(*next);
        }
    }

    /// Sessions with `peer` currently holding key material.
    pub fn live_sessions_with(&self, peer: &str) -> usize {
        let outbound = self
            .existing_outbound(peer)
            .map_or(0, |slot| {
                let slot = lock(&slot);
                slot.current.iter().count() + slot.expiring.len()
            });
        let inbound = self
            .existing_inbound(peer)
            .map_or(0, |slot| lock(&slot).epochs.len());
        outbound + inbound
    }

    /// Sessions currently holding key material.
    pub fn live_sessions(&self) -> usize {
        let outbound: Vec<_> = read(&self.outbound).values().cloned().collect();
        let inbound: Vec<_> = read(&self.inbound).values().cloned().collect();
        let outbound: usize = outbound
            .iter()
            .map(|slot| {
                let slot = lock(slot);
                slot.current.iter().count() + slot.expiring.len()
            })
            .sum();
        let inbound: usize = inbound.iter().map(|slot| lock(slot).epochs.len()).sum();
        outbound + inbound
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("local", &self.local.device_id())
            .field("outbound_peers", &read(&self.outbound).len())
            .field("inbound_peers", &read(&self.inbound).len())
            .finish_non_exhaustive()
    }
}
