//! Domain model for per-product stock and checkout reservations.
//!
//! Everything in this crate is synchronous and storage-agnostic. Timestamps are
//! passed in by the caller so the persistence layer decides what "now" is.

mod adjustment;
mod error;
mod product;
mod quantity;
mod record;
mod reservation;

pub use adjustment::{AdjustmentType, StockAdjustment};
pub use error::DomainError;
pub use product::ProductId;
pub use quantity::Quantity;
pub use record::{InventoryRecord, DEFAULT_LOW_STOCK_THRESHOLD};
pub use reservation::{
    consolidate_items, Reservation, ReservationItem, ReservationStatus, Resolution, Transition,
};
