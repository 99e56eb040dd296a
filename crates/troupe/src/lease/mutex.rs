use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{LeaseManager, SingletonLease};
use crate::errors::{Result, TroupeError};
use crate::id::InstanceId;

/// A cluster-wide mutex built on a lease per lock name.
#[derive(Debug, Clone)]
pub struct NetworkMutex {
    leases: LeaseManager,
    instance_id: InstanceId,
}

impl NetworkMutex {
    pub fn new(leases: LeaseManager, instance_id: InstanceId) -> Self {
        Self {
            leases,
            instance_id,
        }
    }

    /// Take the lock if nobody else holds it. The lock self-expires after
    /// `duration` unless released first.
    pub async fn try_lock(&self, name: &str, duration: Duration) -> Result<Option<MutexGuard>> {
        let lease = self
            .leases
            .try_acquire(name, duration, &self.instance_id)
            .await?;
        Ok(lease.map(|lease| MutexGuard {
            leases: self.leases.clone(),
            lease,
        }))
    }

    /// Retry `try_lock` every `retry_interval` until it succeeds or `cancel`
    /// fires.
    pub async fn lock(
        &self,
        name: &str,
        duration: Duration,
        retry_interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<MutexGuard> {
        loop {
            if let Some(guard) = self.try_lock(name, duration).await? {
                return Ok(guard);
            }
            debug!("Mutex '{}' busy, retrying in {:?}", name, retry_interval);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TroupeError::Cancelled),
                _ = tokio::time::sleep(retry_interval) => {}
            }
        }
    }
}

/// Proof of holding a [`NetworkMutex`] lock.
///
/// Dropping the guard does not release the lock; it expires at
/// `lease().lease_until_epoch_ms`. Call [`release`](Self::release) to give
/// it up early.
#[derive(Debug)]
pub struct MutexGuard {
    leases: LeaseManager,
    lease: SingletonLease,
}

impl MutexGuard {
    pub fn name(&self) -> &str {
        &self.lease.name
    }

    pub fn lease(&self) -> &SingletonLease {
        &self.lease
    }

    pub async fn release(self) -> Result<()> {
        self.leases
            .release(&self.lease.name, &self.lease.instance_id)
            .await
    }
}
