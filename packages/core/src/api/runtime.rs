// Фоновая ротация ключей на tokio
//
// The core itself never spawns anything; embedders that run tokio can use
// this driver instead of calling `run_maintenance` themselves.

use crate::api::SecureCore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Calls [`SecureCore::run_maintenance`] every `period` until stopped or dropped.
#[derive(Debug)]
pub struct RotationDriver {
    handle: JoinHandle<()>,
}

impl RotationDriver {
    /// Must be called from within a tokio runtime.
    pub fn spawn(core: Arc<SecureCore>, period: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let report = core.run_maintenance();
                if report.expired + report.retired + report.timed_out > 0 {
                    debug!(
                        target: "rotation",
                        expired = report.expired,
                        retired = report.retired,
                        timed_out = report.timed_out,
                        "Background maintenance applied"
                    );
                }
            }
        });
        Self { handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for RotationDriver {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
