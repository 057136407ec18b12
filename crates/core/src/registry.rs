use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::model::WaiterId;
use crate::waiter::StepWaiter;

/// Live waiters, keyed by id. Entries are removed once resolved.
#[derive(Debug, Default)]
pub struct WaiterRegistry {
    waiters: RwLock<HashMap<WaiterId, Arc<StepWaiter>>>,
}

impl WaiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, waiter: Arc<StepWaiter>) {
        self.waiters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(waiter.id().clone(), waiter);
    }

    pub fn remove(&self, id: &WaiterId) -> Option<Arc<StepWaiter>> {
        self.waiters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    pub fn get(&self, id: &WaiterId) -> Option<Arc<StepWaiter>> {
        self.waiters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Point-in-time copy; routing never holds the registry lock across awaits.
    pub fn snapshot(&self) -> Vec<Arc<StepWaiter>> {
        self.waiters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.waiters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
