use crate::registry::ModelIdentity;
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc, time::Instant};
use tokio::sync::{Mutex as GenerationLock, OwnedMutexGuard};

/// Held while a model generates; dropping it lets the next request for the same identity in.
pub type GenerationGuard = OwnedMutexGuard<()>;

/// One generation lock per model identity.
///
/// The default identity has its own fixed lock. Named identities get theirs on
/// first use; the table mutex only covers the lookup-or-insert, never the wait
/// for the generation lock itself, so different models never queue behind each
/// other. Waiters on one identity are served in arrival order.
pub struct LockTable {
    default: Arc<GenerationLock<()>>,
    named: Mutex<HashMap<String, Arc<GenerationLock<()>>>>,
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}

impl LockTable {
    pub fn new() -> Self {
        Self {
            default: Arc::new(GenerationLock::new(())),
            named: Mutex::new(HashMap::new()),
        }
    }

    /// The lock for `identity`, created on first request.
    pub fn lock_for(&self, identity: &ModelIdentity) -> Arc<GenerationLock<()>> {
        match identity {
            ModelIdentity::Default => self.default.clone(),
            ModelIdentity::Named(name) => self
                .named
                .lock()
                .entry(name.clone())
                .or_insert_with(|| Arc::new(GenerationLock::new(())))
                .clone(),
        }
    }

    pub async fn acquire(&self, identity: &ModelIdentity) -> GenerationGuard {
        let lock = self.lock_for(identity);
        let started = Instant::now();
        let guard = lock.lock_owned().await;
        let waited = started.elapsed();
        metrics::histogram!("llama_gate_lock_wait_seconds").record(waited.as_secs_f64());
        tracing::debug!(model = %identity, ?waited, "generation lock acquired");
        guard
    }

    pub fn len(&self) -> usize {
        self.named.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn named(n: &str) -> ModelIdentity {
        ModelIdentity::Named(n.to_owned())
    }

    #[test]
    fn one_lock_per_identity() {
        let table = LockTable::new();
        assert!(Arc::ptr_eq(&table.lock_for(&named("a")), &table.lock_for(&named("a"))));
        assert!(!Arc::ptr_eq(&table.lock_for(&named("a")), &table.lock_for(&named("b"))));
        assert!(Arc::ptr_eq(&table.lock_for(&ModelIdentity::Default), &table.lock_for(&ModelIdentity::Default)));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn default_lock_is_not_in_the_table() {
        let table = LockTable::new();
        let _ = table.lock_for(&ModelIdentity::Default);
        assert!(table.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creation_yields_single_lock() {
        let table = Arc::new(LockTable::new());
        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let table = table.clone();
                tokio::spawn(async move { table.lock_for(&named("shared")) })
            })
            .collect();
        let mut locks = Vec::new();
        for t in tasks {
            locks.push(t.await.unwrap());
        }
        assert!(locks.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn held_lock_blocks_same_identity_only() {
        let table = LockTable::new();
        let _held = table.acquire(&named("a")).await;

        let same = tokio::time::timeout(Duration::from_millis(50), table.acquire(&named("a"))).await;
        assert!(same.is_err());

        let other = tokio::time::timeout(Duration::from_millis(50), table.acquire(&named("b"))).await;
        assert!(other.is_ok());
        let default = tokio::time::timeout(Duration::from_millis(50), table.acquire(&ModelIdentity::Default)).await;
        assert!(default.is_ok());
    }
}
