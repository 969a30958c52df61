//! Stock reservation service: per-product inventory with reservations that
//! hold stock until an order is confirmed, released or expires.

pub mod cache;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod models;
pub mod schema;
pub mod service;
pub mod store;
pub mod sweeper;
pub mod telemetry;

pub use error::{ErrorKind, StockError, StockResult};
pub use service::{InventoryService, ServiceConfig};
pub use store::{MemoryStockStore, PgStockStore, StockStore};
pub use sweeper::{ExpirySweeper, SweepReport};
