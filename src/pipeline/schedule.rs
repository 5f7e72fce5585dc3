//! Reconciliation interval with rate-limit backoff.

use std::time::Duration;

use crate::error::Result;
use crate::models::SyncConfig;
use crate::pipeline::sync::SyncReport;

/// Interval between reconciliation rounds. Doubles on every rate-limit
/// signal up to `max`, and drops back to `base` after a clean round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileInterval {
    base: Duration,
    current: Duration,
    max: Duration,
}

impl ReconcileInterval {
    pub fn new(base: Duration, max: Duration) -> Self {
        let max = max.max(base);
        Self {
            base,
            current: base,
            max,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            Duration::from_secs(config.interval_secs),
            Duration::from_secs(config.max_interval_secs),
        )
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn is_backed_off(&self) -> bool {
        self.current > self.base
    }

    /// Lengthen the interval. Returns the new value.
    pub fn on_rate_limited(&mut self) -> Duration {
        self.current = self.current.saturating_mul(2).min(self.max);
        log::warn!(
            "Rate limited, next reconciliation in {}s",
            self.current.as_secs()
        );
        self.current
    }

    pub fn on_success(&mut self) {
        if self.is_backed_off() {
            log::info!("Reconciliation interval back to {}s", self.base.as_secs());
        }
        self.current = self.base;
    }

    /// Adjust after one reconciliation round. A failed round keeps the
    /// current interval; the next round is the retry.
    pub fn after_round(&mut self, result: &Result<SyncReport>) {
        match result {
            Ok(report) if report.rate_limited => {
                self.on_rate_limited();
            }
            Ok(report) if report.is_clean() => self.on_success(),
            Ok(_) => {}
            Err(e) if e.is_rate_limited() => {
                self.on_rate_limited();
            }
            Err(e) => log::warn!(
                "Reconciliation round failed, retrying in {}s: {}",
                self.current.as_secs(),
                e
            ),
        }
    }
}
