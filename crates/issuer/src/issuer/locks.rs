//! Per-key async mutual exclusion for tier derivation.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use common::CredentialError;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

type Slots = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// Table of named async locks, one per `(namespace, field)` being derived.
///
/// Entries are created on first use and removed when the last holder or
/// waiter lets go, so the table only ever holds keys under contention.
#[derive(Debug, Default, Clone)]
pub struct TierLocks {
    slots: Slots,
}

/// Holds a [`TierLocks`] entry until dropped.
#[derive(Debug)]
pub struct TierGuard {
    key: String,
    slots: Slots,
    guard: Option<OwnedMutexGuard<()>>,
}

impl TierLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Cancelled`] if `cancel` fires first.
    pub async fn acquire(
        &self,
        key: String,
        cancel: &CancellationToken,
    ) -> Result<TierGuard, CredentialError> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(key.clone()).or_default())
        };

        let acquired = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            guard = slot.lock_owned() => Some(guard),
        };

        match acquired {
            Some(guard) => Ok(TierGuard {
                key,
                slots: Arc::clone(&self.slots),
                guard: Some(guard),
            }),
            None => {
                release_if_idle(&self.slots, &key);
                Err(CredentialError::Cancelled)
            }
        }
    }

    /// Number of keys currently held or awaited.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for TierGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        release_if_idle(&self.slots, &self.key);
    }
}

fn release_if_idle(slots: &Slots, key: &str) {
    let mut slots = slots.lock().unwrap_or_else(PoisonError::into_inner);
    if slots
        .get(key)
        .is_some_and(|slot| Arc::strong_count(slot) == 1)
    {
        slots.remove(key);
    }
}
