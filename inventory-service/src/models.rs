use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use inventory_core::{
    InventoryRecord, ProductId, Quantity, Reservation, ReservationItem, ReservationStatus,
};

use crate::error::StockError;
use crate::store::ProcessedCommand;

#[derive(Debug, Clone, Queryable, Identifiable, Insertable, AsChangeset, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::inventory)]
pub struct InventoryRow {
    pub id: Uuid,
    pub product_id: String,
    pub available_quantity: i32,
    pub reserved_quantity: i32,
    pub low_stock_threshold: i32,
    pub last_restock_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Insertable)]
#[diesel(table_name = crate::schema::reservations)]
pub struct ReservationRow {
    pub id: Uuid,
    pub order_id: String,
    pub status: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::reservation_items)]
pub struct ReservationItemRow {
    pub reservation_id: Uuid,
    pub position: i32,
    pub product_id: String,
    pub quantity: i32,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::processed_commands)]
pub struct ProcessedCommandRow {
    pub idempotency_key: String,
    pub command_id: Uuid,
    pub result: Option<serde_json::Value>,
    pub processed_at: Option<DateTime<Utc>>,
}

fn quantity_column(column: &str, value: i32) -> Result<Quantity, StockError> {
    Quantity::try_from(value).map_err(|e| StockError::corrupt_row(format!("{}: {}", column, e)))
}

fn product_column(value: String) -> Result<ProductId, StockError> {
    ProductId::new(value).map_err(|e| StockError::corrupt_row(format!("product_id: {}", e)))
}

impl TryFrom<InventoryRow> for InventoryRecord {
    type Error = StockError;

    fn try_from(row: InventoryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            product_id: product_column(row.product_id)?,
            available_quantity: quantity_column("available_quantity", row.available_quantity)?,
            reserved_quantity: quantity_column("reserved_quantity", row.reserved_quantity)?,
            low_stock_threshold: quantity_column("low_stock_threshold", row.low_stock_threshold)?,
            last_restock_date: row.last_restock_date,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl From<&InventoryRecord> for InventoryRow {
    fn from(record: &InventoryRecord) -> Self {
        Self {
            id: record.id,
            product_id: record.product_id.as_str().to_string(),
            available_quantity: record.available_quantity.to_i32(),
            reserved_quantity: record.reserved_quantity.to_i32(),
            low_stock_threshold: record.low_stock_threshold.to_i32(),
            last_restock_date: record.last_restock_date,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

impl From<&Reservation> for ReservationRow {
    fn from(reservation: &Reservation) -> Self {
        Self {
            id: reservation.id,
            order_id: reservation.order_id.clone(),
            status: reservation.status.as_str().to_string(),
            expires_at: reservation.expires_at,
            created_at: reservation.created_at,
            updated_at: reservation.updated_at,
        }
    }
}

fn position_column(position: usize) -> Result<i32, StockError> {
    i32::try_from(position)
        .map_err(|_| StockError::Validation(format!("reservation line {} is out of range", position)))
}

impl ReservationItemRow {
    pub fn for_reservation(reservation: &Reservation) -> Result<Vec<Self>, StockError> {
        reservation
            .items
            .iter()
            .enumerate()
            .map(|(position, item)| {
                Ok(Self {
                    reservation_id: reservation.id,
                    position: position_column(position)?,
                    product_id: item.product_id.as_str().to_string(),
                    quantity: item.quantity.to_i32(),
                })
            })
            .collect()
    }
}

/// Rebuilds a reservation from its row and its item rows (in position order).
pub fn reservation_from_rows(
    row: ReservationRow,
    items: Vec<ReservationItemRow>,
) -> Result<Reservation, StockError> {
    let status: ReservationStatus = row.status.parse()?;
    let items = items
        .into_iter()
        .map(|item| {
            Ok(ReservationItem::new(
                product_column(item.product_id)?,
                quantity_column("quantity", item.quantity)?,
            ))
        })
        .collect::<Result<Vec<_>, StockError>>()?;
    if items.is_empty() {
        return Err(StockError::corrupt_row(format!("reservation {} has no items", row.id)));
    }

    Ok(Reservation {
        id: row.id,
        order_id: row.order_id,
        items,
        status,
        expires_at: row.expires_at,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

impl From<ProcessedCommandRow> for ProcessedCommand {
    fn from(row: ProcessedCommandRow) -> Self {
        Self {
            idempotency_key: row.idempotency_key,
            command_id: row.command_id,
            result: row.result,
            processed_at: row.processed_at.unwrap_or_else(Utc::now),
        }
    }
}

impl From<&ProcessedCommand> for ProcessedCommandRow {
    fn from(command: &ProcessedCommand) -> Self {
        Self {
            idempotency_key: command.idempotency_key.clone(),
            command_id: command.command_id,
            result: command.result.clone(),
            processed_at: Some(command.processed_at),
        }
    }
}
