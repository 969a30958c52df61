use chrono::{DateTime, Utc};
use inventory_core::{
    InventoryRecord, ProductId, Quantity, Reservation, ReservationItem, Resolution, StockAdjustment,
    DEFAULT_LOW_STOCK_THRESHOLD,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use shared::{ReserveItem, StockAvailability, StockCheckItem};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::cache::StockCache;
use crate::clock::{Clock, SystemClock};
use crate::error::{StockError, StockResult};
use crate::store::{Page, PageRequest, ResolveOutcome, StockStore};

pub const DEFAULT_RESERVATION_TTL_SECS: i64 = 15 * 60;
pub const MAX_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub reservation_ttl: chrono::Duration,
    pub cache_ttl: Option<Duration>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            reservation_ttl: chrono::Duration::seconds(DEFAULT_RESERVATION_TTL_SECS),
            cache_ttl: None,
        }
    }
}

/// Stock operations offered to the order orchestrator and the expiry sweeper.
pub struct InventoryService<S: StockStore> {
    store: S,
    cache: StockCache,
    clock: Arc<dyn Clock>,
    reservation_ttl: chrono::Duration,
}

impl<S: StockStore> InventoryService<S> {
    pub fn new(store: S, config: ServiceConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(store: S, config: ServiceConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            cache: StockCache::new(config.cache_ttl),
            clock,
            reservation_ttl: config.reservation_ttl,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    #[instrument(skip(self))]
    pub async fn create_inventory(
        &self,
        product_id: &str,
        initial_quantity: Option<i64>,
        low_stock_threshold: Option<i64>,
    ) -> StockResult<InventoryRecord> {
        let product_id = ProductId::new(product_id)?;
        let initial = initial_quantity.map(Quantity::try_from).transpose()?.unwrap_or(Quantity::ZERO);
        let threshold = low_stock_threshold
            .map(Quantity::try_from)
            .transpose()?
            .unwrap_or(DEFAULT_LOW_STOCK_THRESHOLD);

        let record = InventoryRecord::new(product_id, initial, threshold, self.now());
        let created = self.store.create_inventory(record).await?;
        self.cache.invalidate(&created.product_id);

        info!(
            product_id = %created.product_id,
            available = created.available_quantity.value(),
            "Inventory created"
        );
        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn get_inventory(&self, product_id: &str) -> StockResult<InventoryRecord> {
        let product_id = ProductId::new(product_id)?;
        self.lookup(&product_id)
            .await?
            .ok_or_else(|| StockError::inventory_not_found(&product_id))
    }

    /// A missing product is reported as unavailable rather than as an error.
    #[instrument(skip(self))]
    pub async fn check_stock(&self, product_id: &str, quantity: Option<i64>) -> StockResult<StockAvailability> {
        let product_id = ProductId::new(product_id)?;
        let requested = requested_quantity(quantity)?;
        let record = self.lookup(&product_id).await?;
        Ok(availability(&product_id, record.as_ref(), requested))
    }

    /// Answers every line with a single batched lookup over the distinct
    /// products. Results follow the order of `items`.
    #[instrument(skip(self, items), fields(lines = items.len()))]
    pub async fn bulk_check_stock(&self, items: &[StockCheckItem]) -> StockResult<Vec<StockAvailability>> {
        let mut lines = Vec::with_capacity(items.len());
        for item in items {
            lines.push((ProductId::new(item.product_id.as_str())?, requested_quantity(item.quantity)?));
        }

        let mut known: HashMap<ProductId, Option<InventoryRecord>> = HashMap::new();
        let mut missing = Vec::new();
        for (product_id, _) in &lines {
            if known.contains_key(product_id) || missing.contains(product_id) {
                continue;
            }
            match self.cache.get(product_id) {
                Some(cached) => {
                    known.insert(product_id.clone(), cached);
                }
                None => missing.push(product_id.clone()),
            }
        }

        if !missing.is_empty() {
            let generations: Vec<u64> = missing
                .iter()
                .map(|product_id| self.cache.generation(product_id))
                .collect();
            let found = self.store.find_inventories(&missing).await?;
            let mut found: HashMap<ProductId, InventoryRecord> = found
                .into_iter()
                .map(|record| (record.product_id.clone(), record))
                .collect();
            for (product_id, generation) in missing.into_iter().zip(generations) {
                let record = found.remove(&product_id);
                self.cache.put(product_id.clone(), record.clone(), generation);
                known.insert(product_id, record);
            }
        }

        Ok(lines
            .iter()
            .map(|(product_id, requested)| {
                let record = known.get(product_id).and_then(Option::as_ref);
                availability(product_id, record, *requested)
            })
            .collect())
    }

    #[instrument(skip(self))]
    pub async fn adjust_stock(
        &self,
        product_id: &str,
        adjustment_type: &str,
        quantity: i64,
    ) -> StockResult<InventoryRecord> {
        let product_id = ProductId::new(product_id)?;
        let adjustment = StockAdjustment::parse(adjustment_type, quantity)?;

        let updated = self.store.adjust_inventory(&product_id, adjustment, self.now()).await?;
        self.cache.invalidate(&product_id);

        info!(
            product_id = %product_id,
            adjustment = %adjustment.adjustment_type,
            quantity = adjustment.quantity.value(),
            available = updated.available_quantity.value(),
            "Stock adjusted"
        );
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn update_low_stock_threshold(&self, product_id: &str, threshold: i64) -> StockResult<InventoryRecord> {
        let product_id = ProductId::new(product_id)?;
        let threshold = Quantity::try_from(threshold)?;

        let updated = self
            .store
            .update_low_stock_threshold(&product_id, threshold, self.now())
            .await?;
        self.cache.invalidate(&product_id);
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn delete_inventory(&self, product_id: &str) -> StockResult<()> {
        let product_id = ProductId::new(product_id)?;
        self.store.delete_inventory(&product_id).await?;
        self.cache.invalidate(&product_id);
        info!(product_id = %product_id, "Inventory deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn list_low_stock(
        &self,
        threshold: Option<i64>,
        page: u32,
        limit: u32,
    ) -> StockResult<Page<InventoryRecord>> {
        if page < 1 {
            return Err(StockError::Validation("page must be at least 1".to_string()));
        }
        if limit < 1 || limit > MAX_PAGE_LIMIT {
            return Err(StockError::Validation(format!(
                "limit must be between 1 and {}",
                MAX_PAGE_LIMIT
            )));
        }
        let threshold = threshold.map(Quantity::try_from).transpose()?;

        self.store.list_low_stock(threshold, PageRequest { page, limit }).await
    }

    /// Holds stock for every line of an order, or for none of them.
    #[instrument(skip(self, items), fields(lines = items.len()))]
    pub async fn reserve(&self, order_id: &str, items: &[ReserveItem]) -> StockResult<Reservation> {
        let mut lines = Vec::with_capacity(items.len());
        for item in items {
            lines.push(ReservationItem::new(
                ProductId::new(item.product_id.as_str())?,
                Quantity::positive(item.quantity)?,
            ));
        }
        let reservation = Reservation::new(order_id, lines, self.reservation_ttl, self.now())?;

        let reservation = match self.store.reserve(reservation).await {
            Ok(reservation) => reservation,
            Err(e) => {
                warn!(order_id, error = %e, kind = %e.kind(), "Reservation rejected");
                return Err(e);
            }
        };
        self.cache.invalidate_many(reservation.items.iter().map(|item| &item.product_id));

        info!(
            reservation_id = %reservation.id,
            order_id = %reservation.order_id,
            total_quantity = reservation.total_quantity(),
            expires_at = %reservation.expires_at,
            "Stock reserved"
        );
        Ok(reservation)
    }

    #[instrument(skip(self))]
    pub async fn confirm(&self, reservation_id: Uuid) -> StockResult<ResolveOutcome> {
        self.resolve(reservation_id, Resolution::Confirm, self.now()).await
    }

    #[instrument(skip(self))]
    pub async fn release(&self, reservation_id: Uuid) -> StockResult<ResolveOutcome> {
        self.resolve(reservation_id, Resolution::Release, self.now()).await
    }

    /// Used by the sweeper; `now` is the instant the sweep started.
    pub async fn expire(&self, reservation_id: Uuid, now: DateTime<Utc>) -> StockResult<ResolveOutcome> {
        self.resolve(reservation_id, Resolution::Expire, now).await
    }

    #[instrument(skip(self))]
    pub async fn get_reservation(&self, reservation_id: Uuid) -> StockResult<Reservation> {
        self.store
            .find_reservation(reservation_id)
            .await?
            .ok_or_else(|| StockError::reservation_not_found(reservation_id))
    }

    pub async fn find_pending_expired(&self, as_of: DateTime<Utc>, limit: u32) -> StockResult<Vec<Reservation>> {
        self.store.find_pending_expired(as_of, limit).await
    }

    async fn resolve(
        &self,
        reservation_id: Uuid,
        resolution: Resolution,
        now: DateTime<Utc>,
    ) -> StockResult<ResolveOutcome> {
        let outcome = self
            .store
            .resolve_reservation(reservation_id, resolution, now)
            .await?;
        let reservation = outcome.reservation();

        if outcome.was_applied() {
            self.cache.invalidate_many(reservation.items.iter().map(|item| &item.product_id));
            info!(
                reservation_id = %reservation.id,
                order_id = %reservation.order_id,
                status = %reservation.status,
                "Reservation resolved"
            );
        } else {
            debug!(
                reservation_id = %reservation.id,
                status = %reservation.status,
                resolution = %resolution,
                "Reservation already resolved"
            );
        }
        Ok(outcome)
    }

    async fn lookup(&self, product_id: &ProductId) -> StockResult<Option<InventoryRecord>> {
        if let Some(cached) = self.cache.get(product_id) {
            return Ok(cached);
        }
        let generation = self.cache.generation(product_id);
        let record = self.store.find_inventory(product_id).await?;
        self.cache.put(product_id.clone(), record.clone(), generation);
        Ok(record)
    }
}

fn requested_quantity(quantity: Option<i64>) -> StockResult<Quantity> {
    match quantity {
        Some(quantity) => Ok(Quantity::positive(quantity)?),
        None => Ok(Quantity::ONE),
    }
}

fn availability(product_id: &ProductId, record: Option<&InventoryRecord>, requested: Quantity) -> StockAvailability {
    match record {
        Some(record) => StockAvailability {
            product_id: product_id.to_string(),
            is_available: record.can_fulfil(requested),
            available_quantity: record.available_quantity.value(),
            requested_quantity: requested.value(),
        },
        None => StockAvailability::missing(product_id.as_str(), requested.value()),
    }
}
