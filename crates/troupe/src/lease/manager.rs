//! # Lease Manager
//!
//! Acquire, renew and release named leases against a [`LeaseStore`]. Losing
//! a race is a normal outcome and is reported as `Ok(None)` / `Ok(false)`,
//! never as an error.

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{LeaseCondition, LeaseStore, LeaseUpdate, SingletonLease};
use crate::clock::{Clock, SystemClock};
use crate::errors::Result;
use crate::id::InstanceId;

#[derive(Clone)]
pub struct LeaseManager {
    store: Arc<dyn LeaseStore>,
    clock: Arc<dyn Clock>,
}

impl LeaseManager {
    pub fn new(store: Arc<dyn LeaseStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn LeaseStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn now_epoch_ms(&self) -> i64 {
        self.clock.now_epoch_ms()
    }

    /// Try to take or extend the lease `name` for `duration`.
    ///
    /// ## Returns
    ///
    /// * `Ok(Some(lease))` - `instance_id` now holds the lease
    /// * `Ok(None)` - another instance holds an unexpired lease, or won the
    ///   race for it
    pub async fn try_acquire(
        &self,
        name: &str,
        duration: Duration,
        instance_id: &InstanceId,
    ) -> Result<Option<SingletonLease>> {
        self.try_acquire_with(name, duration, instance_id, None).await
    }

    /// [`try_acquire`](Self::try_acquire), storing `user_data` with the lease
    /// when it is won.
    pub async fn try_acquire_with(
        &self,
        name: &str,
        duration: Duration,
        instance_id: &InstanceId,
        user_data: Option<String>,
    ) -> Result<Option<SingletonLease>> {
        let now = self.now_epoch_ms();
        let until = expires_at(now, duration);

        match self.store.get(name).await? {
            None => {
                let lease = SingletonLease {
                    name: name.to_string(),
                    instance_id: instance_id.clone(),
                    lease_until_epoch_ms: until,
                    user_data,
                };
                if self.store.put_if_absent(lease.clone()).await? {
                    debug!("Lease '{}' created for {}", name, instance_id);
                    Ok(Some(lease))
                } else {
                    debug!("Lease '{}' created concurrently by another instance", name);
                    Ok(None)
                }
            }
            Some(current) if current.instance_id != *instance_id && current.lease_until_epoch_ms >= now => {
                debug!(
                    "Lease '{}' held by {} until {}",
                    name, current.instance_id, current.lease_until_epoch_ms
                );
                Ok(None)
            }
            Some(_) => {
                let acquired = self
                    .store
                    .update_if(
                        name,
                        LeaseCondition::OwnedByOrExpired {
                            owner: instance_id.clone(),
                            now_ms: now,
                        },
                        LeaseUpdate {
                            instance_id: instance_id.clone(),
                            lease_until_epoch_ms: until,
                            user_data,
                        },
                    )
                    .await?;
                match &acquired {
                    Some(_) => debug!("Lease '{}' acquired by {}", name, instance_id),
                    None => debug!("Lease '{}' lost to a concurrent acquire", name),
                }
                Ok(acquired)
            }
        }
    }

    /// Give up the lease early. A mismatch (someone else already reclaimed
    /// it) is not an error.
    pub async fn release(&self, name: &str, instance_id: &InstanceId) -> Result<()> {
        let released = self
            .store
            .update_if(
                name,
                LeaseCondition::OwnedBy(instance_id.clone()),
                LeaseUpdate {
                    instance_id: instance_id.clone(),
                    lease_until_epoch_ms: 0,
                    user_data: None,
                },
            )
            .await?;
        if released.is_none() {
            debug!("Release of '{}' by {} ignored: not the owner", name, instance_id);
        }
        Ok(())
    }

    /// Extend a held lease and optionally replace its payload. Returns
    /// `false` when `instance_id` no longer holds it.
    pub async fn renew(
        &self,
        name: &str,
        duration: Duration,
        instance_id: &InstanceId,
        user_data: Option<String>,
    ) -> Result<bool> {
        let now = self.now_epoch_ms();
        let renewed = self
            .store
            .update_if(
                name,
                LeaseCondition::HeldBy {
                    owner: instance_id.clone(),
                    now_ms: now,
                },
                LeaseUpdate {
                    instance_id: instance_id.clone(),
                    lease_until_epoch_ms: expires_at(now, duration),
                    user_data,
                },
            )
            .await?;
        if renewed.is_none() {
            debug!("Renewal of '{}' by {} rejected: lease not held", name, instance_id);
        }
        Ok(renewed.is_some())
    }

    pub async fn get(&self, name: &str) -> Result<Option<SingletonLease>> {
        self.store.get(name).await
    }

    pub async fn is_held_by(&self, name: &str, instance_id: &InstanceId) -> Result<bool> {
        let now = self.now_epoch_ms();
        Ok(self
            .store
            .get(name)
            .await?
            .map(|lease| lease.is_held_by(instance_id, now))
            .unwrap_or(false))
    }
}

impl std::fmt::Debug for LeaseManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseManager")
            .field("now_epoch_ms", &self.now_epoch_ms())
            .finish()
    }
}

/// `now + duration` in epoch milliseconds, saturating at `i64::MAX`.
fn expires_at(now_ms: i64, duration: Duration) -> i64 {
    now_ms.saturating_add(i64::try_from(duration.as_millis()).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::lease::MemoryLeaseStore;

    fn manager() -> (LeaseManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let manager = LeaseManager::with_clock(Arc::new(MemoryLeaseStore::new()), clock.clone());
        (manager, clock)
    }

    #[tokio::test]
    async fn test_first_acquire_creates_lease() {
        let (leases, _) = manager();
        let a = InstanceId::from("a");
        let lease = leases.try_acquire("leader", Duration::from_secs(10), &a).await.unwrap().unwrap();
        assert_eq!(lease.lease_until_epoch_ms, 1_010_000);
        assert!(leases.is_held_by("leader", &a).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_by_non_owner_is_ignored() {
        let (leases, _) = manager();
        let a = InstanceId::from("a");
        let b = InstanceId::from("b");
        leases.try_acquire("leader", Duration::from_secs(10), &a).await.unwrap();

        leases.release("leader", &b).await.unwrap();
        assert!(leases.is_held_by("leader", &a).await.unwrap());

        leases.release("leader", &a).await.unwrap();
        assert!(!leases.is_held_by("leader", &a).await.unwrap());
        assert!(leases.try_acquire("leader", Duration::from_secs(10), &b).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_renew_requires_a_valid_lease() {
        let (leases, clock) = manager();
        let a = InstanceId::from("a");
        let b = InstanceId::from("b");
        leases.try_acquire("leader", Duration::from_secs(10), &a).await.unwrap();

        assert!(leases
            .renew("leader", Duration::from_secs(10), &a, Some("epoch-2".into()))
            .await
            .unwrap());
        assert_eq!(
            leases.get("leader").await.unwrap().unwrap().user_data.as_deref(),
            Some("epoch-2")
        );
        assert!(!leases.renew("leader", Duration::from_secs(10), &b, None).await.unwrap());

        clock.advance(Duration::from_secs(11));
        assert!(!leases.renew("leader", Duration::from_secs(10), &a, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_huge_duration_saturates() {
        let (leases, _) = manager();
        let a = InstanceId::from("a");
        let lease = leases.try_acquire("leader", Duration::MAX, &a).await.unwrap().unwrap();
        assert_eq!(lease.lease_until_epoch_ms, i64::MAX);

        assert!(leases.renew("leader", Duration::from_secs(u64::MAX / 2), &a, None).await.unwrap());
        assert_eq!(leases.get("leader").await.unwrap().unwrap().lease_until_epoch_ms, i64::MAX);
    }

    #[tokio::test]
    async fn test_user_data_is_stored_on_acquire() {
        let (leases, clock) = manager();
        let a = InstanceId::from("a");
        let b = InstanceId::from("b");
        let lease = leases
            .try_acquire_with("leader", Duration::from_secs(10), &a, Some("shard-7".into()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lease.user_data.as_deref(), Some("shard-7"));

        clock.advance(Duration::from_secs(11));
        leases
            .try_acquire_with("leader", Duration::from_secs(10), &b, Some("shard-9".into()))
            .await
            .unwrap()
            .unwrap();
        let stored = leases.get("leader").await.unwrap().unwrap();
        assert_eq!(stored.instance_id, b);
        assert_eq!(stored.user_data.as_deref(), Some("shard-9"));
    }
}
