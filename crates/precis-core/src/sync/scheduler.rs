//! Periodic scheduler port.

use std::time::Duration;

/// Platform timer that periodically asks the service for a background cycle.
///
/// Both calls must be idempotent: `schedule` replaces any existing schedule.
pub trait SyncScheduler: Send + Sync {
    fn schedule(&self, period: Duration);
    fn unschedule(&self);
}

/// Scheduler for front ends without a background timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopScheduler;

impl SyncScheduler for NoopScheduler {
    fn schedule(&self, period: Duration) {
        tracing::debug!(?period, "No background scheduler; ignoring schedule request");
    }

    fn unschedule(&self) {}
}
