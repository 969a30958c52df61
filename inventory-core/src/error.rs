use thiserror::Error;

use crate::quantity::Quantity;
use crate::reservation::ReservationStatus;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("Quantity must be positive")]
    NonPositiveQuantity,

    #[error("Quantity cannot be negative: {0}")]
    NegativeQuantity(i64),

    #[error("Quantity {0} exceeds the maximum of {max}", max = Quantity::MAX_VALUE)]
    QuantityOutOfRange(i64),

    #[error("Product id must not be empty")]
    EmptyProductId,

    #[error("Insufficient stock. Available: {available}, Requested: {requested}")]
    InsufficientStock {
        available: Quantity,
        requested: Quantity,
    },

    #[error("Cannot {action} more than reserved. Reserved: {reserved}, Requested: {requested}")]
    ExceedsReserved {
        action: &'static str,
        reserved: Quantity,
        requested: Quantity,
    },

    #[error("Order id must not be empty")]
    EmptyOrderId,

    #[error("Reservation must contain at least one item")]
    EmptyReservation,

    #[error("Cannot confirm expired reservation")]
    ReservationExpired,

    #[error("Reservation has not expired yet")]
    ReservationNotDue,

    #[error("Cannot {attempted} a reservation that is {current}")]
    InvalidTransition {
        current: ReservationStatus,
        attempted: &'static str,
    },

    #[error("Unknown adjustment type: {0}")]
    UnknownAdjustmentType(String),

    #[error("Unknown reservation status: {0}")]
    UnknownReservationStatus(String),
}

impl DomainError {
    /// True for errors caused by malformed caller input rather than by the
    /// current state of stock or reservations.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DomainError::NonPositiveQuantity
                | DomainError::NegativeQuantity(_)
                | DomainError::QuantityOutOfRange(_)
                | DomainError::EmptyProductId
                | DomainError::EmptyOrderId
                | DomainError::EmptyReservation
                | DomainError::UnknownAdjustmentType(_)
        )
    }
}
