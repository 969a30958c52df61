use dashmap::DashMap;
use inventory_core::{InventoryRecord, ProductId};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    record: Option<InventoryRecord>,
    stored_at: Instant,
}

/// Per-product cache state. The generation survives invalidation so a
/// reader that started before a mutation cannot store what it read.
#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    entry: Option<Entry>,
}

/// Read-through cache for stock lookups.
///
/// Entries may be stale for at most `ttl`; every mutation that goes through
/// the service invalidates the touched products after it commits. Absent
/// products are cached too. With no TTL the cache holds nothing.
///
/// Readers take [`StockCache::generation`] before reading the store and hand
/// it back to [`StockCache::put`], which drops the value if an invalidation
/// happened in between.
#[derive(Debug)]
pub struct StockCache {
    slots: DashMap<ProductId, Slot>,
    ttl: Option<Duration>,
}

impl StockCache {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            slots: DashMap::new(),
            ttl: ttl.filter(|ttl| !ttl.is_zero()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn is_enabled(&self) -> bool {
        self.ttl.is_some()
    }

    /// `Some(None)` is a cached miss; `None` means the cache knows nothing.
    pub fn get(&self, product_id: &ProductId) -> Option<Option<InventoryRecord>> {
        let ttl = self.ttl?;
        let mut slot = self.slots.get_mut(product_id)?;
        let entry = slot.entry.as_ref()?;
        if entry.stored_at.elapsed() < ttl {
            return Some(entry.record.clone());
        }
        slot.entry = None;
        None
    }

    pub fn generation(&self, product_id: &ProductId) -> u64 {
        self.slots.get(product_id).map_or(0, |slot| slot.generation)
    }

    /// Stores `record` unless `product_id` was invalidated after `generation`
    /// was taken.
    pub fn put(&self, product_id: ProductId, record: Option<InventoryRecord>, generation: u64) {
        if self.ttl.is_none() {
            return;
        }
        let mut slot = self.slots.entry(product_id).or_default();
        if slot.generation != generation {
            return;
        }
        slot.entry = Some(Entry {
            record,
            stored_at: Instant::now(),
        });
    }

    pub fn invalidate(&self, product_id: &ProductId) {
        if self.ttl.is_none() {
            return;
        }
        let mut slot = self.slots.entry(product_id.clone()).or_default();
        slot.generation = slot.generation.wrapping_add(1);
        slot.entry = None;
    }

    pub fn invalidate_many<'a>(&self, product_ids: impl IntoIterator<Item = &'a ProductId>) {
        for product_id in product_ids {
            self.invalidate(product_id);
        }
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
