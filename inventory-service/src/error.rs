use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::pooled_connection::PoolError;
use inventory_core::{DomainError, InventoryRecord, ProductId};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

pub type StockResult<T> = Result<T, StockError>;

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Validation,
    NotFound,
    InsufficientStock,
    AlreadyExists,
    Conflict,
    StorageFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "Validation",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::InsufficientStock => "InsufficientStock",
            ErrorKind::AlreadyExists => "AlreadyExists",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::StorageFailure => "StorageFailure",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a stock operation. None of these are fatal to the process and
/// every one of them leaves storage as it was before the call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StockError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InsufficientStock(String),

    #[error("{0}")]
    AlreadyExists(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Storage failure: {0}")]
    Storage(String),
}

impl StockError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StockError::Validation(_) => ErrorKind::Validation,
            StockError::NotFound(_) => ErrorKind::NotFound,
            StockError::InsufficientStock(_) => ErrorKind::InsufficientStock,
            StockError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            StockError::Conflict(_) => ErrorKind::Conflict,
            StockError::Storage(_) => ErrorKind::StorageFailure,
        }
    }

    /// Only storage failures are worth retrying; every operation is atomic, so
    /// a failed attempt leaves nothing behind.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StockError::Storage(_))
    }

    pub fn inventory_not_found(product_id: &ProductId) -> Self {
        StockError::NotFound(format!("Inventory not found for product {}", product_id))
    }

    pub fn reservation_not_found(reservation_id: Uuid) -> Self {
        StockError::NotFound(format!("Reservation {} not found", reservation_id))
    }

    pub fn insufficient_for(product_id: &ProductId) -> Self {
        StockError::InsufficientStock(format!("Insufficient stock for product {}", product_id))
    }

    pub fn inventory_exists(product_id: &ProductId) -> Self {
        StockError::AlreadyExists(format!("Inventory already exists for product {}", product_id))
    }

    pub fn inventory_still_reserved(record: &InventoryRecord) -> Self {
        StockError::Conflict(format!(
            "Inventory for product {} still has {} reserved",
            record.product_id, record.reserved_quantity
        ))
    }

    pub fn corrupt_row(detail: impl fmt::Display) -> Self {
        StockError::Storage(format!("corrupt row: {}", detail))
    }
}

impl From<DomainError> for StockError {
    fn from(err: DomainError) -> Self {
        match err {
            e if e.is_validation() => StockError::Validation(e.to_string()),
            e @ DomainError::InsufficientStock { .. } => StockError::InsufficientStock(e.to_string()),
            e @ DomainError::UnknownReservationStatus(_) => StockError::corrupt_row(e),
            e => StockError::Conflict(e.to_string()),
        }
    }
}

impl From<DieselError> for StockError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => StockError::NotFound("record not found".to_string()),
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                StockError::AlreadyExists(info.message().to_string())
            }
            other => StockError::Storage(other.to_string()),
        }
    }
}

impl From<bb8::RunError<PoolError>> for StockError {
    fn from(err: bb8::RunError<PoolError>) -> Self {
        StockError::Storage(format!("connection pool: {}", err))
    }
}
