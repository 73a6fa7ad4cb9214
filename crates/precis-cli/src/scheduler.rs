//! In-process periodic scheduler used by `precis daemon`.

use std::time::Duration;

use precis_core::sync::SyncScheduler;
use precis_core::SyncService;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Publishes the requested period; [`run_schedule`] follows it.
pub struct DaemonScheduler {
    period: watch::Sender<Option<Duration>>,
}

impl DaemonScheduler {
    pub fn new() -> (Self, watch::Receiver<Option<Duration>>) {
        let (period, receiver) = watch::channel(None);
        (Self { period }, receiver)
    }
}

impl SyncScheduler for DaemonScheduler {
    fn schedule(&self, period: Duration) {
        self.period.send_if_modified(|current| {
            let changed = *current != Some(period);
            *current = Some(period);
            changed
        });
    }

    fn unschedule(&self) {
        self.period.send_if_modified(|current| current.take().is_some());
    }
}

/// Run background cycles on the current period until the scheduler is dropped.
pub async fn run_schedule(service: SyncService, mut period: watch::Receiver<Option<Duration>>) {
    loop {
        let current = *period.borrow_and_update();
        let Some(every) = current else {
            tracing::debug!("Background sync unscheduled");
            if period.changed().await.is_err() {
                return;
            }
            continue;
        };

        tracing::info!(period_secs = every.as_secs(), "Background sync scheduled");
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => service.background_sync().await,
                changed = period.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    break;
                }
            }
        }
    }
}
