//! Collapses concurrent work for the same key into one execution

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;

/// Deduplicates concurrent calls by key
///
/// The first caller for a key runs the work; callers arriving while it is
/// running wait for and share its result. Once the work finishes the key is
/// released, so a later call starts fresh.
pub(crate) struct SingleFlight<T> {
    calls: Mutex<HashMap<String, Arc<OnceCell<T>>>>,
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Runs `work` unless a call for `key` is already in flight
    ///
    /// Returns the result and whether this caller performed the work.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> (T, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let cell = {
            let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(
                calls
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(OnceCell::new())),
            )
        };

        let mut leader = false;
        let value = cell
            .get_or_init(|| {
                leader = true;
                work()
            })
            .await
            .clone();

        let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        if calls
            .get(key)
            .map_or(false, |current| Arc::ptr_eq(current, &cell))
        {
            calls.remove(key);
        }

        (value, leader)
    }

    /// Number of keys currently in flight
    #[cfg(test)]
    pub fn in_flight(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
