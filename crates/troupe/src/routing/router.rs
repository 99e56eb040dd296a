//! # Consistent Hash Router
//!
//! Resolves a logical `(service, actor, id)` to one instance in the routing
//! table. The same id keeps landing on the same instance for as long as the
//! candidate set is unchanged.

use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};
use std::hash::Hasher;
use std::time::Duration;
use tracing::debug;

use super::table::{ResourceInstance, RoutingSnapshot, RoutingTable};
use crate::errors::{Result, TroupeError};
use crate::id::InstanceId;

/// How a key is mapped onto the sorted candidate list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashStrategy {
    /// `hash % candidates`. Even spread, but most keys move when the
    /// candidate count changes.
    Modulo,
    /// Highest-random-weight: each key picks the candidate with the highest
    /// `mix(hash ^ hash(instance))`. Only keys owned by an added or removed
    /// candidate move.
    #[default]
    Rendezvous,
}

/// Stable 64-bit hash of `bytes`: FxHash with a splitmix64 finaliser so
/// short, similar keys still spread across the full range.
pub fn stable_hash(bytes: &[u8]) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write(bytes);
    mix64(hasher.finish())
}

fn mix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Pick one of `candidates` (already sorted by instance id) for `key_hash`.
pub fn select<'a>(
    strategy: HashStrategy,
    key_hash: u64,
    candidates: &[&'a ResourceInstance],
) -> Option<&'a ResourceInstance> {
    if candidates.is_empty() {
        return None;
    }
    match strategy {
        HashStrategy::Modulo => {
            let index = (key_hash % candidates.len() as u64) as usize;
            Some(candidates[index])
        }
        HashStrategy::Rendezvous => candidates
            .iter()
            .copied()
            .max_by_key(|candidate| {
                mix64(key_hash ^ stable_hash(candidate.instance_id.as_str().as_bytes()))
            }),
    }
}

#[derive(Debug, Clone)]
pub struct ConsistentHashRouter {
    table: RoutingTable,
    strategy: HashStrategy,
    local_instance: InstanceId,
    wait_timeout: Duration,
}

impl ConsistentHashRouter {
    pub fn new(
        table: RoutingTable,
        strategy: HashStrategy,
        local_instance: InstanceId,
        wait_timeout: Duration,
    ) -> Self {
        Self {
            table,
            strategy,
            local_instance,
            wait_timeout,
        }
    }

    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    pub fn strategy(&self) -> HashStrategy {
        self.strategy
    }

    /// Resolve against the current snapshot only.
    pub fn try_resolve(&self, service_name: &str, actor_name: &str, id: &str) -> Option<ResourceInstance> {
        let snapshot = self.table.snapshot();
        self.pick_actor(&snapshot, service_name, actor_name, id)
    }

    /// Resolve, waiting up to the configured timeout for a matching entry to
    /// appear if the table has none yet, then retrying once.
    pub async fn resolve(&self, service_name: &str, actor_name: &str, id: &str) -> Result<ResourceInstance> {
        if let Some(instance) = self.try_resolve(service_name, actor_name, id) {
            return Ok(instance);
        }

        debug!(
            "No route for {}/{}#{} yet, waiting up to {:?}",
            service_name, actor_name, id, self.wait_timeout
        );
        self.table
            .wait_for(self.wait_timeout, |snapshot| {
                snapshot
                    .entries
                    .iter()
                    .any(|entry| entry.serves_actor(service_name, actor_name))
            })
            .await;

        self.try_resolve(service_name, actor_name, id)
            .ok_or_else(|| TroupeError::routing(format!("{}/{}#{}", service_name, actor_name, id)))
    }

    /// Resolve a service: a local entry wins, otherwise the local instance id
    /// is hashed among the service's entries.
    pub fn try_resolve_service(&self, service_name: &str) -> Option<ResourceInstance> {
        let snapshot = self.table.snapshot();
        let candidates = sorted_candidates(&snapshot, |entry| entry.serves_service(service_name));
        if let Some(local) = candidates.iter().find(|entry| entry.is_local) {
            return Some((*local).clone());
        }
        let key_hash = stable_hash(self.local_instance.as_str().as_bytes());
        select(self.strategy, key_hash, &candidates).cloned()
    }

    pub async fn resolve_service(&self, service_name: &str) -> Result<ResourceInstance> {
        if let Some(instance) = self.try_resolve_service(service_name) {
            return Ok(instance);
        }

        debug!("No route for service {} yet, waiting up to {:?}", service_name, self.wait_timeout);
        self.table
            .wait_for(self.wait_timeout, |snapshot| {
                snapshot
                    .entries
                    .iter()
                    .any(|entry| entry.serves_service(service_name))
            })
            .await;

        self.try_resolve_service(service_name)
            .ok_or_else(|| TroupeError::routing(service_name))
    }

    fn pick_actor(
        &self,
        snapshot: &RoutingSnapshot,
        service_name: &str,
        actor_name: &str,
        id: &str,
    ) -> Option<ResourceInstance> {
        let candidates = sorted_candidates(snapshot, |entry| entry.serves_actor(service_name, actor_name));
        select(self.strategy, stable_hash(id.as_bytes()), &candidates).cloned()
    }
}

fn sorted_candidates<'a, F>(snapshot: &'a RoutingSnapshot, matches: F) -> Vec<&'a ResourceInstance>
where
    F: Fn(&ResourceInstance) -> bool,
{
    let mut candidates: Vec<&ResourceInstance> =
        snapshot.entries.iter().filter(|entry| matches(*entry)).collect();
    candidates.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
    candidates
}
