//! Transactional persistence for inventory records and reservations.
//!
//! Every mutating operation runs as one unit of work: the rows it touches are
//! locked up front, in a fixed order, before anything is changed, and either
//! all changes commit or none do.
//!
//! Lock order, shared by every implementation:
//! 1. the reservation row, when the operation resolves a reservation;
//! 2. inventory rows, by ascending product id.

mod memory;
mod postgres;

pub use memory::MemoryStockStore;
pub use postgres::{DbPool, PgStockStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use inventory_core::{
    InventoryRecord, ProductId, Quantity, Reservation, Resolution, StockAdjustment, Transition,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::{StockError, StockResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// The reservation moved to its terminal state and stock was resolved.
    Applied(Reservation),
    /// The reservation was already terminal; nothing changed.
    AlreadyResolved(Reservation),
}

impl ResolveOutcome {
    pub fn reservation(&self) -> &Reservation {
        match self {
            ResolveOutcome::Applied(reservation) | ResolveOutcome::AlreadyResolved(reservation) => reservation,
        }
    }

    pub fn was_applied(&self) -> bool {
        matches!(self, ResolveOutcome::Applied(_))
    }
}

/// A command the handler has already answered, keyed by idempotency key.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedCommand {
    pub idempotency_key: String,
    pub command_id: Uuid,
    pub result: Option<serde_json::Value>,
    pub processed_at: DateTime<Utc>,
}

#[async_trait]
pub trait StockStore: Send + Sync + 'static {
    /// Fails with `AlreadyExists` when the product already has a record.
    async fn create_inventory(&self, record: InventoryRecord) -> StockResult<InventoryRecord>;

    async fn find_inventory(&self, product_id: &ProductId) -> StockResult<Option<InventoryRecord>>;

    /// One batched lookup; missing products are simply absent from the result.
    async fn find_inventories(&self, product_ids: &[ProductId]) -> StockResult<Vec<InventoryRecord>>;

    async fn adjust_inventory(
        &self,
        product_id: &ProductId,
        adjustment: StockAdjustment,
        now: DateTime<Utc>,
    ) -> StockResult<InventoryRecord>;

    async fn update_low_stock_threshold(
        &self,
        product_id: &ProductId,
        threshold: Quantity,
        now: DateTime<Utc>,
    ) -> StockResult<InventoryRecord>;

    async fn delete_inventory(&self, product_id: &ProductId) -> StockResult<()>;

    /// In-stock records at or below `threshold` (or their own low-stock
    /// threshold when `None`), ordered by ascending available quantity.
    async fn list_low_stock(
        &self,
        threshold: Option<Quantity>,
        page: PageRequest,
    ) -> StockResult<Page<InventoryRecord>>;

    /// Locks every referenced inventory row, moves each line's quantity from
    /// available to reserved and persists the PENDING reservation. All or nothing.
    async fn reserve(&self, reservation: Reservation) -> StockResult<Reservation>;

    /// Confirms, releases or expires a reservation. A reservation that is
    /// already terminal is returned untouched.
    async fn resolve_reservation(
        &self,
        reservation_id: Uuid,
        resolution: Resolution,
        now: DateTime<Utc>,
    ) -> StockResult<ResolveOutcome>;

    async fn find_reservation(&self, reservation_id: Uuid) -> StockResult<Option<Reservation>>;

    /// PENDING reservations with `expires_at < as_of`, oldest first.
    async fn find_pending_expired(&self, as_of: DateTime<Utc>, limit: u32) -> StockResult<Vec<Reservation>>;

    async fn find_processed_command(&self, idempotency_key: &str) -> StockResult<Option<ProcessedCommand>>;

    async fn record_processed_command(&self, command: ProcessedCommand) -> StockResult<()>;
}

/// Applies a new reservation to inventory rows the caller has already locked.
/// On error the map may be partially modified and must be discarded.
pub(crate) fn apply_reservation(
    locked: &mut BTreeMap<ProductId, InventoryRecord>,
    reservation: &Reservation,
) -> StockResult<()> {
    for item in &reservation.items {
        let record = locked
            .get_mut(&item.product_id)
            .ok_or_else(|| StockError::inventory_not_found(&item.product_id))?;
        if !record.can_fulfil(item.quantity) {
            return Err(StockError::insufficient_for(&item.product_id));
        }
        record.reserve_stock(item.quantity, reservation.created_at)?;
    }
    Ok(())
}

/// Moves `reservation` to its terminal state and resolves the stock it holds
/// on the locked rows. Returns the transition so the caller knows whether
/// anything needs writing.
pub(crate) fn apply_resolution(
    locked: &mut BTreeMap<ProductId, InventoryRecord>,
    reservation: &mut Reservation,
    resolution: Resolution,
    now: DateTime<Utc>,
) -> StockResult<Transition> {
    let transition = resolution.apply(reservation, now)?;
    if transition == Transition::AlreadyResolved {
        return Ok(transition);
    }
    for item in &reservation.items {
        let record = locked
            .get_mut(&item.product_id)
            .ok_or_else(|| StockError::inventory_not_found(&item.product_id))?;
        resolution.apply_to_record(record, item.quantity, now)?;
    }
    Ok(transition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use inventory_core::{ReservationItem, ReservationStatus};

    fn locked(entries: &[(&str, u32)]) -> BTreeMap<ProductId, InventoryRecord> {
        entries
            .iter()
            .map(|(id, available)| {
                let product_id = ProductId::new(*id).unwrap();
                let record = InventoryRecord::new(
                    product_id.clone(),
                    Quantity::new(*available).unwrap(),
                    Quantity::ZERO,
                    Utc::now(),
                );
                (product_id, record)
            })
            .collect()
    }

    fn reservation(lines: &[(&str, u32)]) -> Reservation {
        let items = lines
            .iter()
            .map(|(id, qty)| ReservationItem::new(ProductId::new(*id).unwrap(), Quantity::new(*qty).unwrap()))
            .collect();
        Reservation::new("order-1", items, Duration::minutes(15), Utc::now()).unwrap()
    }

    #[test]
    fn page_offset_is_one_based() {
        assert_eq!(PageRequest { page: 1, limit: 20 }.offset(), 0);
        assert_eq!(PageRequest { page: 3, limit: 20 }.offset(), 40);
    }

    #[test]
    fn reservation_fails_on_the_first_short_product() {
        let mut rows = locked(&[("A", 5), ("B", 1)]);
        let err = apply_reservation(&mut rows, &reservation(&[("A", 2), ("B", 2)])).unwrap_err();
        assert_eq!(err, StockError::insufficient_for(&ProductId::new("B").unwrap()));
    }

    #[test]
    fn reservation_fails_when_a_row_was_not_locked() {
        let mut rows = locked(&[("A", 5)]);
        let err = apply_reservation(&mut rows, &reservation(&[("A", 2), ("C", 1)])).unwrap_err();
        assert_eq!(err.to_string(), "Inventory not found for product C");
    }

    #[test]
    fn resolution_of_terminal_reservation_touches_nothing() {
        let mut rows = locked(&[("A", 5)]);
        let mut held = reservation(&[("A", 2)]);
        apply_reservation(&mut rows, &held).unwrap();
        let now = Utc::now();

        assert_eq!(
            apply_resolution(&mut rows, &mut held, Resolution::Release, now).unwrap(),
            Transition::Applied
        );
        let snapshot = rows.clone();
        assert_eq!(
            apply_resolution(&mut rows, &mut held, Resolution::Release, now).unwrap(),
            Transition::AlreadyResolved
        );
        assert_eq!(rows, snapshot);
        assert_eq!(held.status, ReservationStatus::Released);
    }
}
