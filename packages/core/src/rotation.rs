//! Key rotation policy and the per-session deadline index.
//!
//! The scheduler never touches key material. It decides when a session
//! should stop encrypting and when an expiring session must be retired; the
//! session layer applies those decisions under each session's own lock.

use crate::config::Config;
use crate::crypto::EncryptionLevel;
use crate::session::SessionId;
use crate::utils::sync::lock;
use crate::utils::time::millis;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    pub interval: Duration,
    pub message_threshold: u64,
    pub grace_window: Duration,
}

impl RotationPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: config.key_rotation_interval,
            message_threshold: config.key_rotation_message_threshold,
            grace_window: config.grace_window_duration,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationReason {
    MessageThreshold,
    IntervalElapsed,
    LevelChanged,
    Forced,
}

impl fmt::Display for RotationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RotationReason::MessageThreshold => "message threshold reached",
            RotationReason::IntervalElapsed => "rotation interval elapsed",
            RotationReason::LevelChanged => "encryption level changed",
            RotationReason::Forced => "forced",
        })
    }
}

/// What the scheduler needs to know about an outbound session.
#[derive(Debug, Clone, Copy)]
pub struct SessionStats {
    pub created_at: u64,
    pub messages: u64,
    pub level: EncryptionLevel,
}

/// What is due for a session at a given time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueAction {
    /// Stop encrypting, start the grace window
    Expire,
    /// Grace window over, destroy the keys
    Retire,
}

#[derive(Debug, Clone, Copy)]
struct Deadline {
    expire_at: u64,
    retire_at: Option<u64>,
}

#[derive(Debug)]
pub struct KeyRotationScheduler {
    policy: RotationPolicy,
    deadlines: Mutex<HashMap<SessionId, Deadline>>,
}

impl KeyRotationScheduler {
    pub fn new(policy: RotationPolicy) -> Self {
        Self {
            policy,
            deadlines: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &RotationPolicy {
        &self.policy
    }

    /// Whether an Active outbound session must rotate before the next send.
    pub fn evaluate(
        &self,
        stats: &SessionStats,
        requested_level: EncryptionLevel,
        now: u64,
    ) -> Option<RotationReason> {
        if stats.level != requested_level {
            Some(RotationReason::LevelChanged)
        } else if stats.messages >= self.policy.message_threshold {
            Some(RotationReason::MessageThreshold)
        } else if now.saturating_sub(stats.created_at) >= millis(self.policy.interval) {
            Some(RotationReason::IntervalElapsed)
        } else {
            None
        }
    }

    /// End of the grace window for a session expiring at `now`.
    pub fn grace_deadline(&self, now: u64) -> u64 {
        now.saturating_add(millis(self.policy.grace_window))
    }

    /// Track a freshly established session.
    pub fn schedule(&self, id: SessionId, created_at: u64) {
        let expire_at = created_at.saturating_add(millis(self.policy.interval));
        trace!(target: "rotation", session = %id, expire_at, "Scheduled session");
        lock(&self.deadlines).insert(
            id,
            Deadline {
                expire_at,
                retire_at: None,
            },
        );
    }

    /// Session moved to Expiring; returns its retirement deadline.
    pub fn mark_expiring(&self, id: &SessionId, now: u64) -> u64 {
        let retire_at = self.grace_deadline(now);
        let mut deadlines = lock(&self.deadlines);
        let deadline = deadlines.entry(id.clone()).or_insert(Deadline {
            expire_at: now,
            retire_at: None,
        });
        let retire_at = deadline.retire_at.map_or(retire_at, |r| r.min(retire_at));
        deadline.retire_at = Some(retire_at);
        retire_at
    }

    pub fn remove(&self, id: &SessionId) {
        lock(&self.deadlines).remove(id);
    }

    /// Sessions with a deadline at or before `now`, ordered by session id.
    pub fn due(&self, now: u64) -> Vec<(SessionId, DueAction)> {
        let mut due: Vec<(SessionId, DueAction)> = lock(&self.deadlines)
            .iter()
            .filter_map(|(id, deadline)| match deadline.retire_at {
                Some(retire_at) if retire_at <= now => Some((id.clone(), DueAction::Retire)),
                Some(_) => None,
                None if deadline.expire_at <= now => Some((id.clone(), DueAction::Expire)),
                None => None,
            })
            .collect();
        due.sort_by(|a, b| a.0.cmp(&b.0));
        due
    }

    pub fn tracked(&self) -> usize {
        lock(&self.deadlines).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Direction;

    fn policy() -> RotationPolicy {
        RotationPolicy {
            interval: Duration::from_secs(60),
            message_threshold: 100,
            grace_window: Duration::from_secs(10),
        }
    }

    fn id(epoch: u64) -> SessionId {
        SessionId::new("local", "peer", epoch, Direction::Outbound)
    }

    fn stats(messages: u64) -> SessionStats {
        SessionStats {
            created_at: 0,
            messages,
            level: EncryptionLevel::Enhanced,
        }
    }

    #[test]
    fn test_evaluate_triggers() {
        let scheduler = KeyRotationScheduler::new(policy());
        assert_eq!(scheduler.evaluate(&stats(99), EncryptionLevel::Enhanced, 1_000), None);
        assert_eq!(
            scheduler.evaluate(&stats(100), EncryptionLevel::Enhanced, 1_000),
            Some(RotationReason::MessageThreshold)
        );
        assert_eq!(
            scheduler.evaluate(&stats(0), EncryptionLevel::Enhanced, 60_000),
            Some(RotationReason::IntervalElapsed)
        );
        assert_eq!(
            scheduler.evaluate(&stats(0), EncryptionLevel::Military, 0),
            Some(RotationReason::LevelChanged)
        );
    }

    #[test]
    fn test_due_expire_then_retire() {
        let scheduler = KeyRotationScheduler::new(policy());
        scheduler.schedule(id(0), 0);
        assert!(scheduler.due(59_999).is_empty());
        assert_eq!(scheduler.due(60_000), vec![(id(0), DueAction::Expire)]);

        let retire_at = scheduler.mark_expiring(&id(0), 60_000);
        assert_eq!(retire_at, 70_000);
        assert!(scheduler.due(65_000).is_empty());
        assert_eq!(scheduler.due(70_000), vec![(id(0), DueAction::Retire)]);

        scheduler.remove(&id(0));
        assert_eq!(scheduler.tracked(), 0);
    }

    #[test]
    fn test_sessions_tracked_independently() {
        let scheduler = KeyRotationScheduler::new(policy());
        scheduler.schedule(id(0), 0);
        scheduler.schedule(id(1), 30_000);
        assert_eq!(scheduler.due(60_000), vec![(id(0), DueAction::Expire)]);
        assert_eq!(scheduler.due(90_000).len(), 2);
    }
}
