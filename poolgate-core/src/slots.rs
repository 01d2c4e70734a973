use crate::bridge::CompletionBridge;
use crate::{GateError, Result};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// One reusable execution context. Runs at most one request at a time.
pub struct Slot {
    index: usize,
    bridge: CompletionBridge,
}

impl Slot {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn bridge(&self) -> &CompletionBridge {
        &self.bridge
    }
}

/// Fixed set of slots `[0, concurrency)`; requests wait for a free one.
pub struct SlotPool {
    slots: Vec<Arc<Slot>>,
    free: Mutex<Vec<usize>>,
    permits: Arc<Semaphore>,
}

impl SlotPool {
    pub fn new(concurrency: usize) -> Result<Arc<Self>> {
        if concurrency == 0 {
            return Err(GateError::Config(
                "concurrency must be at least 1".to_string(),
            ));
        }

        let slots = (0..concurrency)
            .map(|index| {
                Arc::new(Slot {
                    index,
                    bridge: CompletionBridge::new(index),
                })
            })
            .collect();

        Ok(Arc::new(Self {
            slots,
            free: Mutex::new((0..concurrency).rev().collect()),
            permits: Arc::new(Semaphore::new(concurrency)),
        }))
    }

    pub fn concurrency(&self) -> usize {
        self.slots.len()
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub async fn acquire(self: &Arc<Self>) -> Result<SlotLease> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| GateError::Internal("slot pool is closed".to_string()))?;

        let index = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .ok_or_else(|| GateError::Internal("no free slot behind a granted permit".to_string()))?;

        Ok(SlotLease {
            slot: self.slots[index].clone(),
            pool: self.clone(),
            _permit: permit,
        })
    }
}

/// Exclusive use of one slot; the slot goes back to the pool on drop.
pub struct SlotLease {
    slot: Arc<Slot>,
    pool: Arc<SlotPool>,
    _permit: OwnedSemaphorePermit,
}

impl SlotLease {
    pub fn slot(&self) -> &Slot {
        &self.slot
    }

    pub fn index(&self) -> usize {
        self.slot.index
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        self.pool
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(self.slot.index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn leases_are_exclusive_and_returned() {
        let pool = SlotPool::new(2).unwrap();

        let first = pool.acquire().await.unwrap();
        let second = pool.acquire().await.unwrap();
        assert_ne!(first.index(), second.index());
        assert_eq!(pool.available(), 0);

        let blocked = tokio::time::timeout(Duration::from_millis(20), pool.acquire()).await;
        assert!(blocked.is_err());

        let released = first.index();
        drop(first);
        let third = pool.acquire().await.unwrap();
        assert_eq!(third.index(), released);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        assert!(matches!(SlotPool::new(0), Err(GateError::Config(_))));
    }
}
