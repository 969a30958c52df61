use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::{pooled_connection::bb8::Pool, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use inventory_core::{
    InventoryRecord, ProductId, Quantity, Reservation, ReservationStatus, Resolution,
    StockAdjustment, Transition,
};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::{
    apply_reservation, apply_resolution, Page, PageRequest, ProcessedCommand, ResolveOutcome,
    StockStore,
};
use crate::error::{StockError, StockResult};
use crate::models::*;
use crate::schema::*;

pub type DbPool = Pool<AsyncPgConnection>;

#[derive(Clone)]
pub struct PgStockStore {
    pool: DbPool,
    lock_timeout: Duration,
}

impl PgStockStore {
    pub fn new(pool: DbPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    fn lock_timeout_ms(&self) -> u64 {
        self.lock_timeout.as_millis() as u64
    }
}

/// Bounds how long the current transaction waits on row locks. A lock that
/// cannot be taken in time aborts the transaction with a storage failure.
async fn set_lock_timeout(conn: &mut AsyncPgConnection, timeout_ms: u64) -> StockResult<()> {
    diesel::sql_query(format!("SET LOCAL lock_timeout = {}", timeout_ms))
        .execute(conn)
        .await?;
    Ok(())
}

/// Takes `SELECT ... FOR UPDATE` locks on the inventory rows of the given
/// products, one statement per row, in ascending product id order. A single
/// multi-row `FOR UPDATE` locks in no guaranteed order.
async fn lock_inventory_rows(
    conn: &mut AsyncPgConnection,
    product_ids: &[ProductId],
) -> StockResult<BTreeMap<ProductId, InventoryRecord>> {
    let mut ordered = product_ids.to_vec();
    ordered.sort();
    ordered.dedup();

    let mut locked = BTreeMap::new();
    for product_id in ordered {
        let row = inventory::table
            .filter(inventory::product_id.eq(product_id.as_str()))
            .for_update()
            .get_result::<InventoryRow>(conn)
            .await
            .optional()?
            .ok_or_else(|| StockError::inventory_not_found(&product_id))?;
        locked.insert(product_id, InventoryRecord::try_from(row)?);
    }
    Ok(locked)
}

async fn write_inventory_rows(
    conn: &mut AsyncPgConnection,
    records: impl IntoIterator<Item = &InventoryRecord>,
) -> StockResult<()> {
    for record in records {
        let row = InventoryRow::from(record);
        diesel::update(inventory::table.find(row.id))
            .set(&row)
            .execute(conn)
            .await?;
    }
    Ok(())
}

async fn load_items(
    conn: &mut AsyncPgConnection,
    reservation_ids: &[Uuid],
) -> StockResult<HashMap<Uuid, Vec<ReservationItemRow>>> {
    let rows = reservation_items::table
        .filter(reservation_items::reservation_id.eq_any(reservation_ids))
        .order((reservation_items::reservation_id.asc(), reservation_items::position.asc()))
        .load::<ReservationItemRow>(conn)
        .await?;

    let mut by_reservation: HashMap<Uuid, Vec<ReservationItemRow>> = HashMap::new();
    for row in rows {
        by_reservation.entry(row.reservation_id).or_default().push(row);
    }
    Ok(by_reservation)
}

async fn assemble_reservations(
    conn: &mut AsyncPgConnection,
    rows: Vec<ReservationRow>,
) -> StockResult<Vec<Reservation>> {
    let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
    let mut items = load_items(conn, &ids).await?;
    rows.into_iter()
        .map(|row| {
            let lines = items.remove(&row.id).unwrap_or_default();
            reservation_from_rows(row, lines)
        })
        .collect()
}

fn low_stock_query(threshold: Option<Quantity>) -> inventory::BoxedQuery<'static, Pg> {
    let query = inventory::table
        .filter(inventory::available_quantity.gt(0))
        .into_boxed();
    match threshold {
        Some(threshold) => query.filter(inventory::available_quantity.le(threshold.to_i32())),
        None => query.filter(inventory::available_quantity.le(inventory::low_stock_threshold)),
    }
}

#[async_trait]
impl StockStore for PgStockStore {
    async fn create_inventory(&self, record: InventoryRecord) -> StockResult<InventoryRecord> {
        let mut conn = self.pool.get().await?;
        let row = InventoryRow::from(&record);

        let inserted = diesel::insert_into(inventory::table)
            .values(&row)
            .get_result::<InventoryRow>(&mut conn)
            .await
            .map_err(|e| match e {
                DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                    StockError::inventory_exists(&record.product_id)
                }
                other => StockError::from(other),
            })?;

        InventoryRecord::try_from(inserted)
    }

    async fn find_inventory(&self, product_id: &ProductId) -> StockResult<Option<InventoryRecord>> {
        let mut conn = self.pool.get().await?;

        let row = inventory::table
            .filter(inventory::product_id.eq(product_id.as_str()))
            .first::<InventoryRow>(&mut conn)
            .await
            .optional()?;

        row.map(InventoryRecord::try_from).transpose()
    }

    async fn find_inventories(&self, product_ids: &[ProductId]) -> StockResult<Vec<InventoryRecord>> {
        if product_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.pool.get().await?;
        let keys: Vec<&str> = product_ids.iter().map(ProductId::as_str).collect();

        let rows = inventory::table
            .filter(inventory::product_id.eq_any(keys))
            .load::<InventoryRow>(&mut conn)
            .await?;

        rows.into_iter().map(InventoryRecord::try_from).collect()
    }

    async fn adjust_inventory(
        &self,
        product_id: &ProductId,
        adjustment: StockAdjustment,
        now: DateTime<Utc>,
    ) -> StockResult<InventoryRecord> {
        let mut pooled = self.pool.get().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;
        let timeout_ms = self.lock_timeout_ms();
        let product_id = product_id.clone();

        conn.transaction::<_, StockError, _>(move |conn| {
            Box::pin(async move {
                set_lock_timeout(conn, timeout_ms).await?;
                let mut locked = lock_inventory_rows(conn, std::slice::from_ref(&product_id)).await?;
                let mut record = locked
                    .remove(&product_id)
                    .ok_or_else(|| StockError::inventory_not_found(&product_id))?;
                record.apply_adjustment(adjustment, now)?;
                write_inventory_rows(conn, [&record]).await?;
                Ok(record)
            })
        })
        .await
    }

    async fn update_low_stock_threshold(
        &self,
        product_id: &ProductId,
        threshold: Quantity,
        now: DateTime<Utc>,
    ) -> StockResult<InventoryRecord> {
        let mut pooled = self.pool.get().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;
        let timeout_ms = self.lock_timeout_ms();
        let product_id = product_id.clone();

        conn.transaction::<_, StockError, _>(move |conn| {
            Box::pin(async move {
                set_lock_timeout(conn, timeout_ms).await?;
                let mut locked = lock_inventory_rows(conn, std::slice::from_ref(&product_id)).await?;
                let mut record = locked
                    .remove(&product_id)
                    .ok_or_else(|| StockError::inventory_not_found(&product_id))?;
                record.set_low_stock_threshold(threshold, now);
                write_inventory_rows(conn, [&record]).await?;
                Ok(record)
            })
        })
        .await
    }

    async fn delete_inventory(&self, product_id: &ProductId) -> StockResult<()> {
        let mut pooled = self.pool.get().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;
        let timeout_ms = self.lock_timeout_ms();
        let product_id = product_id.clone();

        conn.transaction::<_, StockError, _>(move |conn| {
            Box::pin(async move {
                set_lock_timeout(conn, timeout_ms).await?;
                let locked = lock_inventory_rows(conn, std::slice::from_ref(&product_id)).await?;
                if let Some(record) = locked.get(&product_id) {
                    if record.reserved_quantity > Quantity::ZERO {
                        return Err(StockError::inventory_still_reserved(record));
                    }
                }
                diesel::delete(inventory::table.filter(inventory::product_id.eq(product_id.as_str())))
                    .execute(conn)
                    .await?;
                Ok(())
            })
        })
        .await
    }

    async fn list_low_stock(
        &self,
        threshold: Option<Quantity>,
        page: PageRequest,
    ) -> StockResult<Page<InventoryRecord>> {
        let mut conn = self.pool.get().await?;

        let total = low_stock_query(threshold)
            .count()
            .get_result::<i64>(&mut conn)
            .await?;

        let rows = low_stock_query(threshold)
            .order((inventory::available_quantity.asc(), inventory::product_id.asc()))
            .limit(i64::from(page.limit))
            .offset(page.offset() as i64)
            .load::<InventoryRow>(&mut conn)
            .await?;

        Ok(Page {
            items: rows
                .into_iter()
                .map(InventoryRecord::try_from)
                .collect::<StockResult<Vec<_>>>()?,
            total: total.max(0) as u64,
            page: page.page,
            limit: page.limit,
        })
    }

    async fn reserve(&self, reservation: Reservation) -> StockResult<Reservation> {
        let mut pooled = self.pool.get().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;
        let timeout_ms = self.lock_timeout_ms();

        conn.transaction::<_, StockError, _>(move |conn| {
            Box::pin(async move {
                set_lock_timeout(conn, timeout_ms).await?;
                let mut locked = lock_inventory_rows(conn, &reservation.lock_order()).await?;
                debug!(
                    reservation_id = %reservation.id,
                    rows = locked.len(),
                    "Locked inventory rows for reservation"
                );

                apply_reservation(&mut locked, &reservation)?;
                write_inventory_rows(conn, locked.values()).await?;

                diesel::insert_into(reservations::table)
                    .values(&ReservationRow::from(&reservation))
                    .execute(conn)
                    .await?;

                diesel::insert_into(reservation_items::table)
                    .values(&ReservationItemRow::for_reservation(&reservation)?)
                    .execute(conn)
                    .await?;

                Ok(reservation)
            })
        })
        .await
    }

    async fn resolve_reservation(
        &self,
        reservation_id: Uuid,
        resolution: Resolution,
        now: DateTime<Utc>,
    ) -> StockResult<ResolveOutcome> {
        let mut pooled = self.pool.get().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;
        let timeout_ms = self.lock_timeout_ms();

        conn.transaction::<_, StockError, _>(move |conn| {
            Box::pin(async move {
                set_lock_timeout(conn, timeout_ms).await?;

                let row = reservations::table
                    .find(reservation_id)
                    .for_update()
                    .get_result::<ReservationRow>(conn)
                    .await
                    .optional()?
                    .ok_or_else(|| StockError::reservation_not_found(reservation_id))?;
                let items = load_items(conn, &[reservation_id])
                    .await?
                    .remove(&reservation_id)
                    .unwrap_or_default();
                let mut reservation = reservation_from_rows(row, items)?;

                if reservation.status.is_terminal() {
                    resolution.apply(&mut reservation, now)?;
                    return Ok(ResolveOutcome::AlreadyResolved(reservation));
                }

                let mut locked = lock_inventory_rows(conn, &reservation.lock_order()).await?;
                match apply_resolution(&mut locked, &mut reservation, resolution, now)? {
                    Transition::AlreadyResolved => Ok(ResolveOutcome::AlreadyResolved(reservation)),
                    Transition::Applied => {
                        write_inventory_rows(conn, locked.values()).await?;
                        diesel::update(reservations::table.find(reservation.id))
                            .set((
                                reservations::status.eq(reservation.status.as_str()),
                                reservations::updated_at.eq(reservation.updated_at),
                            ))
                            .execute(conn)
                            .await?;
                        Ok(ResolveOutcome::Applied(reservation))
                    }
                }
            })
        })
        .await
    }

    async fn find_reservation(&self, reservation_id: Uuid) -> StockResult<Option<Reservation>> {
        let mut conn = self.pool.get().await?;

        let row = reservations::table
            .find(reservation_id)
            .first::<ReservationRow>(&mut conn)
            .await
            .optional()?;

        match row {
            Some(row) => Ok(assemble_reservations(&mut conn, vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn find_pending_expired(&self, as_of: DateTime<Utc>, limit: u32) -> StockResult<Vec<Reservation>> {
        let mut conn = self.pool.get().await?;

        let rows = reservations::table
            .filter(reservations::status.eq(ReservationStatus::Pending.as_str()))
            .filter(reservations::expires_at.lt(as_of))
            .order(reservations::expires_at.asc())
            .limit(i64::from(limit))
            .load::<ReservationRow>(&mut conn)
            .await?;

        assemble_reservations(&mut conn, rows).await
    }

    async fn find_processed_command(&self, idempotency_key: &str) -> StockResult<Option<ProcessedCommand>> {
        let mut conn = self.pool.get().await?;

        let result = processed_commands::table
            .filter(processed_commands::idempotency_key.eq(idempotency_key))
            .first::<ProcessedCommandRow>(&mut conn)
            .await
            .optional()?;
        Ok(result.map(ProcessedCommand::from))
    }

    async fn record_processed_command(&self, command: ProcessedCommand) -> StockResult<()> {
        let mut conn = self.pool.get().await?;

        diesel::insert_into(processed_commands::table)
            .values(&ProcessedCommandRow::from(&command))
            .execute(&mut conn)
            .await?;

        Ok(())
    }
}
