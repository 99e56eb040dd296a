//! # Leases
//!
//! Time-bounded exclusive ownership of a named singleton or mutex, held by
//! one process instance at a time.
//!
//! ```text
//! Unheld -> Held(owner, until) -> Unheld          (expiry or release)
//!           Held(owner, until) -> Held(other, ..)  (only once expired)
//! ```
//!
//! Mutual exclusion rests entirely on the [`LeaseStore`]'s conditional
//! update: the manager never decides ownership by reading and then writing.
//! A lease is held by `X` iff `lease_until_epoch_ms > now` and
//! `instance_id == X`.

use serde::{Deserialize, Serialize};

use crate::id::InstanceId;

pub mod heartbeat;
pub mod manager;
pub mod mutex;
pub mod store;

pub use heartbeat::LeaseHeartbeat;
pub use manager::LeaseManager;
pub use mutex::{MutexGuard, NetworkMutex};
pub use store::{LeaseStore, MemoryLeaseStore};

/// The stored lease row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingletonLease {
    pub name: String,
    pub instance_id: InstanceId,
    pub lease_until_epoch_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
}

impl SingletonLease {
    pub fn is_held_by(&self, instance_id: &InstanceId, now_epoch_ms: i64) -> bool {
        self.instance_id == *instance_id && self.lease_until_epoch_ms > now_epoch_ms
    }

    pub fn is_expired(&self, now_epoch_ms: i64) -> bool {
        self.lease_until_epoch_ms < now_epoch_ms
    }
}

/// Predicate a conditional update must satisfy against the stored row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseCondition {
    /// The stored owner is this instance, whatever the expiry.
    OwnedBy(InstanceId),
    /// The stored owner is `owner`, or the lease expired before `now_ms`.
    OwnedByOrExpired { owner: InstanceId, now_ms: i64 },
    /// `owner` holds a lease that is still valid at `now_ms`.
    HeldBy { owner: InstanceId, now_ms: i64 },
}

impl LeaseCondition {
    pub fn matches(&self, stored: &SingletonLease) -> bool {
        match self {
            Self::OwnedBy(owner) => stored.instance_id == *owner,
            Self::OwnedByOrExpired { owner, now_ms } => {
                stored.instance_id == *owner || stored.is_expired(*now_ms)
            }
            Self::HeldBy { owner, now_ms } => stored.is_held_by(owner, *now_ms),
        }
    }
}

/// Fields written by a successful conditional update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseUpdate {
    pub instance_id: InstanceId,
    pub lease_until_epoch_ms: i64,
    /// `None` keeps the stored payload.
    pub user_data: Option<String>,
}

impl LeaseUpdate {
    pub fn apply(self, stored: &mut SingletonLease) {
        stored.instance_id = self.instance_id;
        stored.lease_until_epoch_ms = self.lease_until_epoch_ms;
        if let Some(user_data) = self.user_data {
            stored.user_data = Some(user_data);
        }
    }
}
