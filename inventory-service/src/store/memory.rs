//! In-process [`StockStore`] for tests and local runs.
//!
//! Each inventory and reservation row sits behind its own async mutex, which
//! plays the part of a row lock. Work is done on copies of the locked rows and
//! written back only once every step has succeeded, so a failed call leaves
//! the store unchanged.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use inventory_core::{
    InventoryRecord, ProductId, Quantity, Reservation, Resolution, StockAdjustment, Transition,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{
    apply_reservation, apply_resolution, Page, PageRequest, ProcessedCommand, ResolveOutcome,
    StockStore,
};
use crate::error::{StockError, StockResult};

// `None` marks a row deleted while someone was waiting on its lock.
type InventoryRow = Arc<Mutex<Option<InventoryRecord>>>;
type ReservationRow = Arc<Mutex<Reservation>>;
type LockedInventory = Vec<(ProductId, OwnedMutexGuard<Option<InventoryRecord>>)>;

#[derive(Clone, Default)]
pub struct MemoryStockStore {
    inventory: Arc<RwLock<HashMap<ProductId, InventoryRow>>>,
    reservations: Arc<RwLock<HashMap<Uuid, ReservationRow>>>,
    processed: Arc<RwLock<HashMap<String, ProcessedCommand>>>,
}

impl MemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the given products' rows in ascending id order.
    async fn lock_inventory(&self, product_ids: &[ProductId]) -> StockResult<LockedInventory> {
        let mut ordered = product_ids.to_vec();
        ordered.sort();
        ordered.dedup();

        let mut guards = Vec::with_capacity(ordered.len());
        for product_id in ordered {
            let row = self
                .inventory
                .read()
                .get(&product_id)
                .cloned()
                .ok_or_else(|| StockError::inventory_not_found(&product_id))?;
            let guard = row.lock_owned().await;
            if guard.is_none() {
                return Err(StockError::inventory_not_found(&product_id));
            }
            guards.push((product_id, guard));
        }
        Ok(guards)
    }

    fn working_copy(guards: &LockedInventory) -> BTreeMap<ProductId, InventoryRecord> {
        guards
            .iter()
            .filter_map(|(product_id, guard)| guard.as_ref().map(|record| (product_id.clone(), record.clone())))
            .collect()
    }

    fn write_back(guards: &mut LockedInventory, mut working: BTreeMap<ProductId, InventoryRecord>) {
        for (product_id, guard) in guards.iter_mut() {
            if let Some(record) = working.remove(product_id) {
                **guard = Some(record);
            }
        }
    }

    async fn snapshot(row: &InventoryRow) -> Option<InventoryRecord> {
        row.lock().await.clone()
    }

    async fn mutate_inventory<F>(&self, product_id: &ProductId, mutate: F) -> StockResult<InventoryRecord>
    where
        F: FnOnce(&mut InventoryRecord) -> StockResult<()> + Send,
    {
        let mut guards = self.lock_inventory(std::slice::from_ref(product_id)).await?;
        let mut working = Self::working_copy(&guards);
        let record = working
            .get_mut(product_id)
            .ok_or_else(|| StockError::inventory_not_found(product_id))?;
        mutate(record)?;
        let updated = record.clone();
        Self::write_back(&mut guards, working);
        Ok(updated)
    }
}

#[async_trait]
impl StockStore for MemoryStockStore {
    async fn create_inventory(&self, record: InventoryRecord) -> StockResult<InventoryRecord> {
        let mut inventory = self.inventory.write();
        if inventory.contains_key(&record.product_id) {
            return Err(StockError::inventory_exists(&record.product_id));
        }
        inventory.insert(record.product_id.clone(), Arc::new(Mutex::new(Some(record.clone()))));
        Ok(record)
    }

    async fn find_inventory(&self, product_id: &ProductId) -> StockResult<Option<InventoryRecord>> {
        let row = self.inventory.read().get(product_id).cloned();
        match row {
            Some(row) => Ok(Self::snapshot(&row).await),
            None => Ok(None),
        }
    }

    async fn find_inventories(&self, product_ids: &[ProductId]) -> StockResult<Vec<InventoryRecord>> {
        let rows: Vec<InventoryRow> = {
            let inventory = self.inventory.read();
            product_ids.iter().filter_map(|id| inventory.get(id).cloned()).collect()
        };
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(record) = Self::snapshot(&row).await {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn adjust_inventory(
        &self,
        product_id: &ProductId,
        adjustment: StockAdjustment,
        now: DateTime<Utc>,
    ) -> StockResult<InventoryRecord> {
        self.mutate_inventory(product_id, |record| Ok(record.apply_adjustment(adjustment, now)?))
            .await
    }

    async fn update_low_stock_threshold(
        &self,
        product_id: &ProductId,
        threshold: Quantity,
        now: DateTime<Utc>,
    ) -> StockResult<InventoryRecord> {
        self.mutate_inventory(product_id, |record| {
            record.set_low_stock_threshold(threshold, now);
            Ok(())
        })
        .await
    }

    async fn delete_inventory(&self, product_id: &ProductId) -> StockResult<()> {
        let mut guards = self.lock_inventory(std::slice::from_ref(product_id)).await?;
        for (_, guard) in guards.iter_mut() {
            if let Some(record) = &**guard {
                if record.reserved_quantity > Quantity::ZERO {
                    return Err(StockError::inventory_still_reserved(record));
                }
            }
            **guard = None;
        }
        self.inventory.write().remove(product_id);
        Ok(())
    }

    async fn list_low_stock(
        &self,
        threshold: Option<Quantity>,
        page: PageRequest,
    ) -> StockResult<Page<InventoryRecord>> {
        let rows: Vec<InventoryRow> = self.inventory.read().values().cloned().collect();
        let mut matching = Vec::new();
        for row in rows {
            if let Some(record) = Self::snapshot(&row).await {
                let limit = threshold.unwrap_or(record.low_stock_threshold);
                if record.is_in_stock() && record.available_quantity <= limit {
                    matching.push(record);
                }
            }
        }
        matching.sort_by(|a, b| {
            a.available_quantity
                .cmp(&b.available_quantity)
                .then_with(|| a.product_id.cmp(&b.product_id))
        });

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit as usize)
            .collect();
        Ok(Page {
            items,
            total,
            page: page.page,
            limit: page.limit,
        })
    }

    async fn reserve(&self, reservation: Reservation) -> StockResult<Reservation> {
        let mut guards = self.lock_inventory(&reservation.lock_order()).await?;
        let mut working = Self::working_copy(&guards);
        apply_reservation(&mut working, &reservation)?;

        Self::write_back(&mut guards, working);
        self.reservations
            .write()
            .insert(reservation.id, Arc::new(Mutex::new(reservation.clone())));
        Ok(reservation)
    }

    async fn resolve_reservation(
        &self,
        reservation_id: Uuid,
        resolution: Resolution,
        now: DateTime<Utc>,
    ) -> StockResult<ResolveOutcome> {
        let row = self
            .reservations
            .read()
            .get(&reservation_id)
            .cloned()
            .ok_or_else(|| StockError::reservation_not_found(reservation_id))?;
        let mut stored = row.lock().await;

        let mut reservation = stored.clone();
        if reservation.status.is_terminal() {
            resolution.apply(&mut reservation, now)?;
            return Ok(ResolveOutcome::AlreadyResolved(reservation));
        }

        let mut guards = self.lock_inventory(&reservation.lock_order()).await?;
        let mut working = Self::working_copy(&guards);
        match apply_resolution(&mut working, &mut reservation, resolution, now)? {
            Transition::AlreadyResolved => Ok(ResolveOutcome::AlreadyResolved(reservation)),
            Transition::Applied => {
                Self::write_back(&mut guards, working);
                *stored = reservation.clone();
                Ok(ResolveOutcome::Applied(reservation))
            }
        }
    }

    async fn find_reservation(&self, reservation_id: Uuid) -> StockResult<Option<Reservation>> {
        let row = self.reservations.read().get(&reservation_id).cloned();
        match row {
            Some(row) => Ok(Some(row.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn find_pending_expired(&self, as_of: DateTime<Utc>, limit: u32) -> StockResult<Vec<Reservation>> {
        let rows: Vec<ReservationRow> = self.reservations.read().values().cloned().collect();
        let mut expired = Vec::new();
        for row in rows {
            let reservation = row.lock().await.clone();
            if reservation.is_pending() && reservation.is_expired(as_of) {
                expired.push(reservation);
            }
        }
        expired.sort_by_key(|reservation| reservation.expires_at);
        expired.truncate(limit as usize);
        Ok(expired)
    }

    async fn find_processed_command(&self, idempotency_key: &str) -> StockResult<Option<ProcessedCommand>> {
        Ok(self.processed.read().get(idempotency_key).cloned())
    }

    async fn record_processed_command(&self, command: ProcessedCommand) -> StockResult<()> {
        let mut processed = self.processed.write();
        if processed.contains_key(&command.idempotency_key) {
            return Err(StockError::AlreadyExists(format!(
                "Command {} already processed",
                command.idempotency_key
            )));
        }
        processed.insert(command.idempotency_key.clone(), command);
        Ok(())
    }
}
