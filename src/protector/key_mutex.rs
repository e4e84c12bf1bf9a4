//! Per-key single-flight mutex: guards against a cache-miss stampede by
//! ensuring only one caller per key performs the expensive fill while
//! concurrent callers for the *same* key wait on the same lock object.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

#[derive(Default)]
pub struct KeyMutexTable {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyMutexTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the (possibly newly created) lock object for `key`. Callers
    /// hold the guard for the duration of their fill operation; a second
    /// caller for the same key blocks on the same `Mutex`, not a fresh one.
    pub fn get_for(&self, key: &str) -> Arc<Mutex<()>> {
        if let Some(existing) = self.locks.get(key) {
            return existing.clone();
        }
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
