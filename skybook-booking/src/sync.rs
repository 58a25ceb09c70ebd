use rust_decimal::Decimal;
use skybook_core::backend::{friendly_message, BookingBackend, CreateBookingResponse};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::context::BookingContext;

/// Result of a background snapshot sync, tagged with the epoch it started in.
#[derive(Debug)]
pub struct SyncReport {
    pub epoch: u64,
    pub booking_id: i64,
    pub outcome: Result<CreateBookingResponse, String>,
}

impl BookingContext {
    /// Push the current draft of a created booking to the backend without
    /// waiting for it. The result is picked up by [`apply_sync_reports`].
    ///
    /// Returns `None` when there is no backend booking to update yet.
    ///
    /// [`apply_sync_reports`]: BookingContext::apply_sync_reports
    pub fn spawn_sync(&self, backend: Arc<dyn BookingBackend>) -> Option<JoinHandle<()>> {
        let booking_id = self.session.booking()?.id;
        let payload = self.booking_payload();
        let epoch = self.epoch.load(Ordering::SeqCst);
        let reports = self.sync_tx.clone();

        Some(tokio::spawn(async move {
            let outcome = backend
                .update_booking(booking_id, &payload)
                .await
                .map_err(|e| friendly_message(&e));
            if reports
                .send(SyncReport {
                    epoch,
                    booking_id,
                    outcome,
                })
                .is_err()
            {
                tracing::debug!(booking_id, "Booking context gone before sync finished");
            }
        }))
    }

    /// Fold finished syncs into the session. Reports from before the last
    /// reset, or for another booking, are dropped.
    ///
    /// Returns how many reports were applied.
    pub fn apply_sync_reports(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(report) = self.sync_rx.try_recv() {
            let current = self.epoch.load(Ordering::SeqCst);
            if report.epoch != current {
                tracing::info!(
                    booking_id = report.booking_id,
                    report_epoch = report.epoch,
                    current_epoch = current,
                    "Dropping stale booking sync"
                );
                continue;
            }
            if self.session.booking().map(|b| b.id) != Some(report.booking_id) {
                tracing::debug!(booking_id = report.booking_id, "Sync for a different booking ignored");
                continue;
            }

            let response = match report.outcome {
                Ok(response) => response,
                Err(message) => {
                    tracing::warn!(booking_id = report.booking_id, %message, "Background booking sync failed");
                    continue;
                }
            };

            let result = self.commit("apply_sync_report", |session| {
                if let Some(booking) = session.booking.as_mut() {
                    if let Some(status) = response.status.filter(|s| !s.is_empty()) {
                        booking.status = status;
                    }
                    if let Some(total) = response.total_amount.filter(|t| *t > Decimal::ZERO) {
                        booking.total = total;
                    }
                }
                Ok(())
            });
            match result {
                Ok(()) => applied += 1,
                Err(e) => tracing::warn!("Failed to store synced booking: {}", e),
            }
        }
        applied
    }
}
