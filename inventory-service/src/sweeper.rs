use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::error::StockResult;
use crate::service::InventoryService;
use crate::store::{ResolveOutcome, StockStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub expired: usize,
    pub already_resolved: usize,
    pub failed: usize,
}

/// Periodically returns the stock held by PENDING reservations whose expiry
/// has passed.
pub struct ExpirySweeper<S: StockStore> {
    service: Arc<InventoryService<S>>,
    interval: Duration,
    batch_size: u32,
}

impl<S: StockStore> ExpirySweeper<S> {
    pub fn new(service: Arc<InventoryService<S>>, interval: Duration, batch_size: u32) -> Self {
        Self {
            service,
            interval,
            batch_size,
        }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.interval);

        loop {
            interval.tick().await;

            let now = self.service.now();
            match self.sweep_once(now).await {
                Ok(report) if report.examined > 0 => info!(
                    examined = report.examined,
                    expired = report.expired,
                    already_resolved = report.already_resolved,
                    failed = report.failed,
                    "Expired reservations swept"
                ),
                Ok(_) => debug!("No expired reservations"),
                Err(e) => error!("Error sweeping expired reservations: {}", e),
            }
        }
    }

    /// One pass over at most `batch_size` overdue reservations. Each one is
    /// expired in its own transaction; a failure is counted and the pass
    /// carries on.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> StockResult<SweepReport> {
        let overdue = self.service.find_pending_expired(now, self.batch_size).await?;
        let mut report = SweepReport {
            examined: overdue.len(),
            ..SweepReport::default()
        };

        for reservation in overdue {
            match self.service.expire(reservation.id, now).await {
                Ok(ResolveOutcome::Applied(_)) => report.expired += 1,
                Ok(ResolveOutcome::AlreadyResolved(resolved)) => {
                    debug!(
                        reservation_id = %resolved.id,
                        status = %resolved.status,
                        "Reservation resolved before it could expire"
                    );
                    report.already_resolved += 1;
                }
                Err(e) => {
                    warn!(
                        reservation_id = %reservation.id,
                        error = %e,
                        retryable = e.is_retryable(),
                        "Failed to expire reservation"
                    );
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::service::ServiceConfig;
    use crate::store::MemoryStockStore;
    use inventory_core::ReservationStatus;
    use shared::ReserveItem;

    fn setup() -> (Arc<InventoryService<MemoryStockStore>>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let service = InventoryService::with_clock(MemoryStockStore::new(), ServiceConfig::default(), clock.clone());
        (Arc::new(service), clock)
    }

    fn line(product_id: &str, quantity: i64) -> ReserveItem {
        ReserveItem {
            product_id: product_id.to_string(),
            quantity,
        }
    }

    #[tokio::test]
    async fn test_sweep_skips_reservations_that_are_not_due() {
        let (service, _) = setup();
        service.create_inventory("P1", Some(10), None).await.unwrap();
        service.reserve("order-1", &[line("P1", 3)]).await.unwrap();

        let sweeper = ExpirySweeper::new(service.clone(), Duration::from_secs(60), 500);
        let report = sweeper.sweep_once(service.now()).await.unwrap();
        assert_eq!(report, SweepReport::default());
    }

    #[tokio::test]
    async fn test_sweep_expires_overdue_and_respects_batch_size() {
        let (service, clock) = setup();
        service.create_inventory("P1", Some(10), None).await.unwrap();
        let first = service.reserve("order-1", &[line("P1", 2)]).await.unwrap();
        clock.advance(chrono::Duration::seconds(1));
        let second = service.reserve("order-2", &[line("P1", 3)]).await.unwrap();
        clock.advance(chrono::Duration::minutes(20));

        let sweeper = ExpirySweeper::new(service.clone(), Duration::from_secs(60), 1);
        let report = sweeper.sweep_once(service.now()).await.unwrap();
        assert_eq!(report.examined, 1);
        assert_eq!(report.expired, 1);
        assert_eq!(service.get_reservation(first.id).await.unwrap().status, ReservationStatus::Expired);
        assert_eq!(service.get_reservation(second.id).await.unwrap().status, ReservationStatus::Pending);

        let report = sweeper.sweep_once(service.now()).await.unwrap();
        assert_eq!(report.expired, 1);
        let record = service.get_inventory("P1").await.unwrap();
        assert_eq!(record.available_quantity.value(), 10);
        assert_eq!(record.reserved_quantity.value(), 0);
    }

    #[tokio::test]
    async fn test_released_reservation_is_not_picked_up() {
        let (service, clock) = setup();
        service.create_inventory("P1", Some(10), None).await.unwrap();
        let reservation = service.reserve("order-1", &[line("P1", 2)]).await.unwrap();
        service.release(reservation.id).await.unwrap();
        clock.advance(chrono::Duration::minutes(20));

        let sweeper = ExpirySweeper::new(service.clone(), Duration::from_secs(60), 500);
        let report = sweeper.sweep_once(service.now()).await.unwrap();
        assert_eq!(report.examined, 0);
        assert_eq!(service.get_inventory("P1").await.unwrap().available_quantity.value(), 10);
    }
}
