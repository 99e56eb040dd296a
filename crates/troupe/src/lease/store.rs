use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{LeaseCondition, LeaseUpdate, SingletonLease};
use crate::errors::Result;

/// Lease storage contract. Each method is one atomic operation at the
/// storage layer (a conditional write in a database, a compare-and-swap).
pub trait LeaseStore: Send + Sync {
    fn get<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Option<SingletonLease>>>;

    /// Insert `lease` unless a row for its name exists. Returns whether the
    /// insert happened.
    fn put_if_absent(&self, lease: SingletonLease) -> BoxFuture<'_, Result<bool>>;

    /// Apply `update` if the stored row satisfies `condition`. Returns the
    /// updated row, or `None` when the row is absent or the condition fails.
    fn update_if<'a>(
        &'a self,
        name: &'a str,
        condition: LeaseCondition,
        update: LeaseUpdate,
    ) -> BoxFuture<'a, Result<Option<SingletonLease>>>;
}

/// In-memory store for single-process deployments and tests.
#[derive(Debug, Default)]
pub struct MemoryLeaseStore {
    rows: Mutex<HashMap<String, SingletonLease>>,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> std::sync::MutexGuard<'_, HashMap<String, SingletonLease>> {
        self.rows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LeaseStore for MemoryLeaseStore {
    fn get<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Option<SingletonLease>>> {
        let row = self.rows().get(name).cloned();
        Box::pin(async move { Ok(row) })
    }

    fn put_if_absent(&self, lease: SingletonLease) -> BoxFuture<'_, Result<bool>> {
        let inserted = {
            let mut rows = self.rows();
            if rows.contains_key(&lease.name) {
                false
            } else {
                rows.insert(lease.name.clone(), lease);
                true
            }
        };
        Box::pin(async move { Ok(inserted) })
    }

    fn update_if<'a>(
        &'a self,
        name: &'a str,
        condition: LeaseCondition,
        update: LeaseUpdate,
    ) -> BoxFuture<'a, Result<Option<SingletonLease>>> {
        let updated = {
            let mut rows = self.rows();
            match rows.get_mut(name) {
                Some(stored) if condition.matches(stored) => {
                    update.apply(stored);
                    Some(stored.clone())
                }
                _ => None,
            }
        };
        Box::pin(async move { Ok(updated) })
    }
}
