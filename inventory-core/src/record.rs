use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::adjustment::{AdjustmentType, StockAdjustment};
use crate::error::DomainError;
use crate::product::ProductId;
use crate::quantity::Quantity;

pub const DEFAULT_LOW_STOCK_THRESHOLD: Quantity = Quantity::new_const(10);

/// Stock held for one product.
///
/// `available_quantity` is what checkout may still reserve; `reserved_quantity`
/// is held by PENDING reservations. The total is always derived from the two.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub id: Uuid,
    pub product_id: ProductId,
    pub available_quantity: Quantity,
    pub reserved_quantity: Quantity,
    pub low_stock_threshold: Quantity,
    pub last_restock_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InventoryRecord {
    pub fn new(
        product_id: ProductId,
        initial_quantity: Quantity,
        low_stock_threshold: Quantity,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            product_id,
            available_quantity: initial_quantity,
            reserved_quantity: Quantity::ZERO,
            low_stock_threshold,
            last_restock_date: (!initial_quantity.is_zero()).then_some(now),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn total_quantity(&self) -> u64 {
        u64::from(self.available_quantity.value()) + u64::from(self.reserved_quantity.value())
    }

    pub fn is_in_stock(&self) -> bool {
        !self.available_quantity.is_zero()
    }

    pub fn has_low_stock(&self) -> bool {
        self.is_in_stock() && self.available_quantity <= self.low_stock_threshold
    }

    pub fn can_fulfil(&self, quantity: Quantity) -> bool {
        self.available_quantity >= quantity
    }

    pub fn increase_stock(&mut self, quantity: Quantity, now: DateTime<Utc>) -> Result<(), DomainError> {
        quantity.ensure_positive()?;
        self.available_quantity = self.available_quantity.checked_add(quantity)?;
        self.last_restock_date = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Removes stock outside of the reservation flow (damage, shrinkage,
    /// manual corrections). Nothing is moved into `reserved_quantity`.
    pub fn decrease_stock(&mut self, quantity: Quantity, now: DateTime<Utc>) -> Result<(), DomainError> {
        quantity.ensure_positive()?;
        self.ensure_available(quantity)?;
        self.available_quantity = self.available_quantity.checked_sub(quantity)?;
        self.updated_at = now;
        Ok(())
    }

    pub fn set_stock(&mut self, quantity: Quantity, now: DateTime<Utc>) {
        self.available_quantity = quantity;
        self.updated_at = now;
    }

    pub fn set_low_stock_threshold(&mut self, threshold: Quantity, now: DateTime<Utc>) {
        self.low_stock_threshold = threshold;
        self.updated_at = now;
    }

    pub fn reserve_stock(&mut self, quantity: Quantity, now: DateTime<Utc>) -> Result<(), DomainError> {
        quantity.ensure_positive()?;
        self.ensure_available(quantity)?;
        let reserved = self.reserved_quantity.checked_add(quantity)?;
        self.available_quantity = self.available_quantity.checked_sub(quantity)?;
        self.reserved_quantity = reserved;
        self.updated_at = now;
        Ok(())
    }

    pub fn release_reservation(&mut self, quantity: Quantity, now: DateTime<Utc>) -> Result<(), DomainError> {
        quantity.ensure_positive()?;
        self.ensure_reserved("release", quantity)?;
        let available = self.available_quantity.checked_add(quantity)?;
        self.reserved_quantity = self.reserved_quantity.checked_sub(quantity)?;
        self.available_quantity = available;
        self.updated_at = now;
        Ok(())
    }

    /// The reserved units leave the system; available stock is untouched.
    pub fn confirm_reservation(&mut self, quantity: Quantity, now: DateTime<Utc>) -> Result<(), DomainError> {
        quantity.ensure_positive()?;
        self.ensure_reserved("confirm", quantity)?;
        self.reserved_quantity = self.reserved_quantity.checked_sub(quantity)?;
        self.updated_at = now;
        Ok(())
    }

    pub fn apply_adjustment(&mut self, adjustment: StockAdjustment, now: DateTime<Utc>) -> Result<(), DomainError> {
        match adjustment.adjustment_type {
            AdjustmentType::Add => self.increase_stock(adjustment.quantity, now),
            AdjustmentType::Subtract => self.decrease_stock(adjustment.quantity, now),
            AdjustmentType::Set => {
                self.set_stock(adjustment.quantity, now);
                Ok(())
            }
        }
    }

    fn ensure_available(&self, requested: Quantity) -> Result<(), DomainError> {
        if !self.can_fulfil(requested) {
            return Err(DomainError::InsufficientStock {
                available: self.available_quantity,
                requested,
            });
        }
        Ok(())
    }

    fn ensure_reserved(&self, action: &'static str, requested: Quantity) -> Result<(), DomainError> {
        if requested > self.reserved_quantity {
            return Err(DomainError::ExceedsReserved {
                action,
                reserved: self.reserved_quantity,
                requested,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn qty(value: u32) -> Quantity {
        Quantity::new(value).unwrap()
    }

    fn record(available: u32, reserved: u32) -> InventoryRecord {
        let now = Utc::now();
        let mut record = InventoryRecord::new(ProductId::new("P1").unwrap(), qty(available), qty(5), now);
        record.reserved_quantity = qty(reserved);
        record
    }

    #[test]
    fn new_record_with_stock_counts_as_restocked() {
        let now = Utc::now();
        let stocked = InventoryRecord::new(ProductId::new("P1").unwrap(), qty(3), qty(1), now);
        let empty = InventoryRecord::new(ProductId::new("P2").unwrap(), Quantity::ZERO, qty(1), now);
        assert_eq!(stocked.last_restock_date, Some(now));
        assert_eq!(empty.last_restock_date, None);
    }

    #[test]
    fn increase_stock_sets_restock_date() {
        let mut record = record(10, 0);
        let later = record.updated_at + Duration::minutes(5);
        record.increase_stock(qty(4), later).unwrap();
        assert_eq!(record.available_quantity, qty(14));
        assert_eq!(record.last_restock_date, Some(later));
        assert_eq!(record.updated_at, later);
    }

    #[test]
    fn zero_quantities_are_rejected_as_non_positive() {
        let mut record = record(10, 10);
        let now = Utc::now();
        assert_eq!(record.increase_stock(Quantity::ZERO, now), Err(DomainError::NonPositiveQuantity));
        assert_eq!(record.decrease_stock(Quantity::ZERO, now), Err(DomainError::NonPositiveQuantity));
        assert_eq!(record.reserve_stock(Quantity::ZERO, now), Err(DomainError::NonPositiveQuantity));
        assert_eq!(record.release_reservation(Quantity::ZERO, now), Err(DomainError::NonPositiveQuantity));
        assert_eq!(record.confirm_reservation(Quantity::ZERO, now), Err(DomainError::NonPositiveQuantity));
    }

    #[test]
    fn decrease_stock_to_exactly_zero() {
        let mut record = record(7, 0);
        record.decrease_stock(qty(7), Utc::now()).unwrap();
        assert_eq!(record.available_quantity, Quantity::ZERO);
        assert!(!record.is_in_stock());
    }

    #[test]
    fn decrease_stock_beyond_available_fails_with_message() {
        let mut record = record(7, 0);
        let err = record.decrease_stock(qty(8), Utc::now()).unwrap_err();
        assert_eq!(err.to_string(), "Insufficient stock. Available: 7, Requested: 8");
        assert_eq!(record.available_quantity, qty(7));
    }

    #[test]
    fn reserve_stock_up_to_the_full_available_amount() {
        let mut record = record(100, 10);
        assert!(matches!(
            record.reserve_stock(qty(101), Utc::now()),
            Err(DomainError::InsufficientStock { .. })
        ));
        record.reserve_stock(qty(100), Utc::now()).unwrap();
        assert_eq!(record.available_quantity, Quantity::ZERO);
        assert_eq!(record.reserved_quantity, qty(110));
    }

    #[test]
    fn release_returns_units_to_available() {
        let mut record = record(5, 10);
        record.release_reservation(qty(4), Utc::now()).unwrap();
        assert_eq!(record.available_quantity, qty(9));
        assert_eq!(record.reserved_quantity, qty(6));
    }

    #[test]
    fn confirm_consumes_reserved_units() {
        let mut record = record(5, 10);
        record.confirm_reservation(qty(4), Utc::now()).unwrap();
        assert_eq!(record.available_quantity, qty(5));
        assert_eq!(record.reserved_quantity, qty(6));
        assert_eq!(record.total_quantity(), 11);
    }

    #[test]
    fn cannot_release_or_confirm_more_than_reserved() {
        let mut record = record(5, 3);
        let err = record.release_reservation(qty(4), Utc::now()).unwrap_err();
        assert!(err.to_string().starts_with("Cannot release more than reserved"));
        let err = record.confirm_reservation(qty(4), Utc::now()).unwrap_err();
        assert!(err.to_string().starts_with("Cannot confirm more than reserved"));
        assert_eq!(record.reserved_quantity, qty(3));
    }

    #[test]
    fn set_stock_leaves_reserved_alone() {
        let mut record = record(5, 3);
        record.set_stock(Quantity::ZERO, Utc::now());
        assert_eq!(record.available_quantity, Quantity::ZERO);
        assert_eq!(record.reserved_quantity, qty(3));
    }

    #[test]
    fn low_stock_requires_some_stock() {
        let mut record = record(5, 0);
        assert!(record.has_low_stock());
        record.set_stock(Quantity::ZERO, Utc::now());
        assert!(!record.has_low_stock());
        record.set_stock(qty(6), Utc::now());
        assert!(!record.has_low_stock());
    }

    #[test]
    fn adjustments_dispatch_to_the_matching_mutator() {
        let mut record = record(5, 0);
        let now = Utc::now();
        record
            .apply_adjustment(StockAdjustment::new(AdjustmentType::Add, 5).unwrap(), now)
            .unwrap();
        assert_eq!(record.available_quantity, qty(10));
        record
            .apply_adjustment(StockAdjustment::new(AdjustmentType::Subtract, 3).unwrap(), now)
            .unwrap();
        assert_eq!(record.available_quantity, qty(7));
        record
            .apply_adjustment(StockAdjustment::new(AdjustmentType::Set, 42).unwrap(), now)
            .unwrap();
        assert_eq!(record.available_quantity, qty(42));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Increase(u32),
        Decrease(u32),
        Reserve(u32),
        Release(u32),
        Confirm(u32),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u32..50).prop_map(Op::Increase),
            (0u32..50).prop_map(Op::Decrease),
            (0u32..50).prop_map(Op::Reserve),
            (0u32..50).prop_map(Op::Release),
            (0u32..50).prop_map(Op::Confirm),
        ]
    }

    proptest! {
        #[test]
        fn failed_operations_leave_the_record_untouched(ops in prop::collection::vec(op_strategy(), 1..60)) {
            let mut record = record(20, 0);
            for op in ops {
                let before = record.clone();
                let now = Utc::now();
                let result = match op {
                    Op::Increase(n) => record.increase_stock(qty(n), now),
                    Op::Decrease(n) => record.decrease_stock(qty(n), now),
                    Op::Reserve(n) => record.reserve_stock(qty(n), now),
                    Op::Release(n) => record.release_reservation(qty(n), now),
                    Op::Confirm(n) => record.confirm_reservation(qty(n), now),
                };
                if result.is_err() {
                    prop_assert_eq!(&record, &before);
                }
            }
        }

        #[test]
        fn reserve_and_release_conserve_total(available in 0u32..500, request in 1u32..500) {
            let mut record = record(available, 0);
            let total = record.total_quantity();
            if record.reserve_stock(qty(request), Utc::now()).is_ok() {
                prop_assert_eq!(record.total_quantity(), total);
                record.release_reservation(qty(request), Utc::now()).unwrap();
            }
            prop_assert_eq!(record.available_quantity, qty(available));
            prop_assert_eq!(record.reserved_quantity, Quantity::ZERO);
        }
    }
}
