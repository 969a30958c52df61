use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::DomainError;
use crate::product::ProductId;
use crate::quantity::Quantity;
use crate::record::InventoryRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Released,
    Expired,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "PENDING",
            ReservationStatus::Confirmed => "CONFIRMED",
            ReservationStatus::Released => "RELEASED",
            ReservationStatus::Expired => "EXPIRED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationStatus::Pending)
    }
}

impl FromStr for ReservationStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ReservationStatus::Pending),
            "CONFIRMED" => Ok(ReservationStatus::Confirmed),
            "RELEASED" => Ok(ReservationStatus::Released),
            "EXPIRED" => Ok(ReservationStatus::Expired),
            other => Err(DomainError::UnknownReservationStatus(other.to_string())),
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationItem {
    pub product_id: ProductId,
    pub quantity: Quantity,
}

impl ReservationItem {
    pub fn new(product_id: ProductId, quantity: Quantity) -> Self {
        Self { product_id, quantity }
    }
}

/// Merges repeated products into one line, summing their quantities and
/// keeping the position of the first occurrence.
pub fn consolidate_items(items: Vec<ReservationItem>) -> Result<Vec<ReservationItem>, DomainError> {
    if items.is_empty() {
        return Err(DomainError::EmptyReservation);
    }

    let mut merged: Vec<ReservationItem> = Vec::with_capacity(items.len());
    for item in items {
        item.quantity.ensure_positive()?;
        match merged.iter_mut().find(|existing| existing.product_id == item.product_id) {
            Some(existing) => existing.quantity = existing.quantity.checked_add(item.quantity)?,
            None => merged.push(item),
        }
    }
    Ok(merged)
}

/// Result of asking a reservation to move to a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The reservation left PENDING; its stock must be resolved in the same transaction.
    Applied,
    /// Nothing to do, the reservation was already resolved.
    AlreadyResolved,
}

/// A hold on stock for one checkout attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Uuid,
    pub order_id: String,
    pub items: Vec<ReservationItem>,
    pub status: ReservationStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    pub fn new(
        order_id: impl Into<String>,
        items: Vec<ReservationItem>,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let order_id = order_id.into();
        if order_id.trim().is_empty() {
            return Err(DomainError::EmptyOrderId);
        }
        Ok(Self {
            id: Uuid::new_v4(),
            order_id,
            items: consolidate_items(items)?,
            status: ReservationStatus::Pending,
            expires_at: now + ttl,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn total_quantity(&self) -> u64 {
        self.items
            .iter()
            .map(|item| u64::from(item.quantity.value()))
            .sum()
    }

    pub fn is_pending(&self) -> bool {
        self.status == ReservationStatus::Pending
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    /// Distinct product ids in ascending order. Inventory rows are always
    /// locked in this order.
    pub fn lock_order(&self) -> Vec<ProductId> {
        let mut ids: Vec<ProductId> = self.items.iter().map(|item| item.product_id.clone()).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn confirm(&mut self, now: DateTime<Utc>) -> Result<Transition, DomainError> {
        match self.status {
            ReservationStatus::Pending if self.is_expired(now) => Err(DomainError::ReservationExpired),
            ReservationStatus::Pending => Ok(self.transition_to(ReservationStatus::Confirmed, now)),
            ReservationStatus::Confirmed => Ok(Transition::AlreadyResolved),
            current => Err(DomainError::InvalidTransition {
                current,
                attempted: "confirm",
            }),
        }
    }

    /// Always allowed; a terminal reservation is left as it is.
    pub fn release(&mut self, now: DateTime<Utc>) -> Result<Transition, DomainError> {
        match self.status {
            ReservationStatus::Pending => Ok(self.transition_to(ReservationStatus::Released, now)),
            _ => Ok(Transition::AlreadyResolved),
        }
    }

    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<Transition, DomainError> {
        match self.status {
            ReservationStatus::Pending if !self.is_expired(now) => Err(DomainError::ReservationNotDue),
            ReservationStatus::Pending => Ok(self.transition_to(ReservationStatus::Expired, now)),
            _ => Ok(Transition::AlreadyResolved),
        }
    }

    fn transition_to(&mut self, status: ReservationStatus, now: DateTime<Utc>) -> Transition {
        self.status = status;
        self.updated_at = now;
        Transition::Applied
    }
}

/// The three ways a PENDING reservation is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Confirm,
    Release,
    Expire,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Confirm => "confirm",
            Resolution::Release => "release",
            Resolution::Expire => "expire",
        }
    }

    pub fn apply(self, reservation: &mut Reservation, now: DateTime<Utc>) -> Result<Transition, DomainError> {
        match self {
            Resolution::Confirm => reservation.confirm(now),
            Resolution::Release => reservation.release(now),
            Resolution::Expire => reservation.expire(now),
        }
    }

    /// Stock side of the resolution for one reservation line.
    pub fn apply_to_record(
        self,
        record: &mut InventoryRecord,
        quantity: Quantity,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        match self {
            Resolution::Confirm => record.confirm_reservation(quantity, now),
            Resolution::Release | Resolution::Expire => record.release_reservation(quantity, now),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
