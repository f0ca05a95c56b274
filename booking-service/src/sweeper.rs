use chrono::Duration;
use serde::Serialize;
use shared::DEFAULT_HOLD_TIMEOUT_MINUTES;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::error::{BookingError, BookingResult};
use crate::store::{BookingStore, HoldCursor, SlotRelease};

pub const SWEEP_FAILED: &str = "Failed to reclaim expired holds";

#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub hold_timeout_minutes: i64,
    pub batch_size: i64,
    pub max_batches_per_run: usize,
    pub interval: std::time::Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            hold_timeout_minutes: DEFAULT_HOLD_TIMEOUT_MINUTES,
            batch_size: 100,
            max_batches_per_run: 10,
            interval: std::time::Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub released_count: usize,
    pub cancelled_appointments: usize,
    pub skipped_paid: usize,
    pub failed: usize,
    pub batches: usize,
}

/// Gives abandoned holds back. A hold is abandoned once it has sat untouched
/// past the timeout and no appointment on its slot has been paid.
///
/// Candidates are paged with a cursor, so holds that are skipped (paid, or a
/// failed lookup) never hide the ones behind them. A run that stops at the
/// batch cap leaves its cursor behind and the next run continues from there.
pub struct ReclamationSweeper {
    store: Arc<dyn BookingStore>,
    clock: Arc<dyn Clock>,
    config: SweepConfig,
    resume_from: Mutex<Option<HoldCursor>>,
}

impl ReclamationSweeper {
    pub fn new(store: Arc<dyn BookingStore>, clock: Arc<dyn Clock>, config: SweepConfig) -> Self {
        Self {
            store,
            clock,
            config,
            resume_from: Mutex::new(None),
        }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.config.interval);

        loop {
            interval.tick().await;

            match self.reclaim_expired_holds(None).await {
                Ok(report) if report.released_count > 0 || report.failed > 0 => {
                    info!(
                        "Sweep released {} holds ({} skipped as paid, {} failed)",
                        report.released_count, report.skipped_paid, report.failed
                    );
                }
                Ok(_) => {}
                Err(e) => error!("Hold reclamation sweep failed: {}", e),
            }
        }
    }

    pub async fn reclaim_expired_holds(&self, timeout_minutes: Option<i64>) -> BookingResult<SweepReport> {
        let timeout_minutes = timeout_minutes.unwrap_or(self.config.hold_timeout_minutes);
        if timeout_minutes <= 0 {
            return Err(BookingError::invalid_argument("timeoutMinutes must be positive"));
        }

        let now = self.clock.now();
        let cutoff = now - Duration::minutes(timeout_minutes);
        let batch_size = self.config.batch_size.max(1);
        let mut report = SweepReport::default();
        let mut cursor = self.resume_from.lock().await.take();
        let mut exhausted = false;

        for _ in 0..self.config.max_batches_per_run.max(1) {
            let candidates = self
                .store
                .find_expired_holds(cutoff, cursor.as_ref(), batch_size)
                .await
                .map_err(|e| {
                    error!("Could not query expired holds: {}", e);
                    e.masked(SWEEP_FAILED)
                })?;
            report.batches += 1;
            let fetched = candidates.len();
            if let Some(last) = candidates.last() {
                cursor = Some(HoldCursor::after(last));
            }

            let mut releases = Vec::with_capacity(fetched);
            for slot in &candidates {
                match self
                    .store
                    .has_paid_appointment(&slot.professional_id, &slot.slot_id)
                    .await
                {
                    Ok(true) => {
                        warn!(
                            "Slot {}/{} has a paid appointment, leaving its hold in place",
                            slot.professional_id, slot.slot_id
                        );
                        report.skipped_paid += 1;
                    }
                    Ok(false) => releases.extend(SlotRelease::for_slot(slot)),
                    Err(e) => {
                        warn!(
                            "Skipping slot {}/{} this sweep: {}",
                            slot.professional_id, slot.slot_id, e
                        );
                        report.failed += 1;
                    }
                }
            }

            let summary = self.store.apply_releases(&releases, now).await.map_err(|e| {
                error!("Could not write released holds: {}", e);
                e.masked(SWEEP_FAILED)
            })?;
            report.released_count += summary.released;
            report.cancelled_appointments += summary.cancelled_appointments;

            if (fetched as i64) < batch_size {
                exhausted = true;
                break;
            }
        }

        if !exhausted {
            *self.resume_from.lock().await = cursor;
        }

        Ok(report)
    }
}
