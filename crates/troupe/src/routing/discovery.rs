//! # Discovery
//!
//! Discovery providers report the full list of instances they know about;
//! the [`RoutingTableRefresher`] merges every provider's list and replaces
//! the routing table with the result. Tables are never patched entry by
//! entry.

use futures::future::{join_all, BoxFuture};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::table::{ResourceInstance, RoutingTable};
use crate::errors::Result;
use crate::id::{InstanceId, ResourceIdentifier};
use crate::shutdown::BackgroundTask;

/// A source of routing entries (a service registry, a static list, this
/// process's own advertisement).
pub trait DiscoveryProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Return the provider's complete current view.
    fn refresh(&self) -> BoxFuture<'_, Result<Vec<ResourceInstance>>>;
}

/// A fixed, externally updatable instance list.
#[derive(Debug, Default)]
pub struct StaticDiscovery {
    instances: RwLock<Vec<ResourceInstance>>,
}

impl StaticDiscovery {
    pub fn new(instances: Vec<ResourceInstance>) -> Self {
        Self {
            instances: RwLock::new(instances),
        }
    }

    pub fn set_instances(&self, instances: Vec<ResourceInstance>) {
        *self
            .instances
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = instances;
    }
}

impl DiscoveryProvider for StaticDiscovery {
    fn name(&self) -> &str {
        "static"
    }

    fn refresh(&self) -> BoxFuture<'_, Result<Vec<ResourceInstance>>> {
        let instances = self
            .instances
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        Box::pin(async move { Ok(instances) })
    }
}

/// Advertises the actor types and services hosted by this process.
#[derive(Debug, Clone)]
pub struct LocalAdvertisement {
    service_name: String,
    instance_id: InstanceId,
    address: ResourceIdentifier,
    actor_names: Vec<String>,
    service_names: Vec<String>,
}

impl LocalAdvertisement {
    pub fn new(
        service_name: impl Into<String>,
        instance_id: InstanceId,
        address: ResourceIdentifier,
        actor_names: Vec<String>,
        service_names: Vec<String>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            instance_id,
            address,
            actor_names,
            service_names,
        }
    }

    pub fn entries(&self) -> Vec<ResourceInstance> {
        let actors = self.actor_names.iter().map(|actor| {
            ResourceInstance::actor(
                self.service_name.clone(),
                actor.clone(),
                self.instance_id.clone(),
                self.address.clone(),
            )
        });
        let services = self.service_names.iter().map(|service| {
            ResourceInstance::service(service.clone(), self.instance_id.clone(), self.address.clone())
        });
        actors.chain(services).map(|entry| entry.local(true)).collect()
    }
}

impl DiscoveryProvider for LocalAdvertisement {
    fn name(&self) -> &str {
        "local"
    }

    fn refresh(&self) -> BoxFuture<'_, Result<Vec<ResourceInstance>>> {
        let entries = self.entries();
        Box::pin(async move { Ok(entries) })
    }
}

/// Polls every provider and replaces the routing table with the merged
/// result.
pub struct RoutingTableRefresher {
    providers: Vec<Arc<dyn DiscoveryProvider>>,
    table: RoutingTable,
    local_instance: InstanceId,
}

impl RoutingTableRefresher {
    pub fn new(
        providers: Vec<Arc<dyn DiscoveryProvider>>,
        table: RoutingTable,
        local_instance: InstanceId,
    ) -> Self {
        Self {
            providers,
            table,
            local_instance,
        }
    }

    /// Refresh once. If any provider fails the table keeps its previous
    /// snapshot and the error is returned.
    pub async fn refresh(&self) -> Result<u64> {
        let results = join_all(self.providers.iter().map(|provider| provider.refresh())).await;

        let mut merged = Vec::new();
        for (provider, result) in self.providers.iter().zip(results) {
            match result {
                Ok(entries) => merged.extend(entries),
                Err(e) => {
                    warn!("Discovery provider '{}' failed: {}", provider.name(), e);
                    return Err(e);
                }
            }
        }

        for entry in &mut merged {
            entry.is_local = entry.instance_id == self.local_instance;
        }
        merged.sort_by(|a, b| {
            (&a.service_name, &a.actor_name, &a.instance_id).cmp(&(&b.service_name, &b.actor_name, &b.instance_id))
        });
        merged.dedup_by(|a, b| {
            a.service_name == b.service_name && a.actor_name == b.actor_name && a.instance_id == b.instance_id
        });

        debug!("Discovery produced {} routing entries", merged.len());
        Ok(self.table.replace(merged))
    }

    /// Refresh every `interval` until stopped. The first refresh happens one
    /// interval after spawning; callers refresh once themselves at startup.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> BackgroundTask {
        BackgroundTask::spawn("discovery-refresh", move |shutdown| async move {
            let shutdown = shutdown.wait_for_shutdown();
            tokio::pin!(shutdown);
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    signal = &mut shutdown => {
                        signal.acknowledge();
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.refresh().await {
                            warn!("Routing table refresh failed, keeping previous snapshot: {}", e);
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TroupeError;
    use pretty_assertions::assert_eq;

    struct Broken;

    impl DiscoveryProvider for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn refresh(&self) -> BoxFuture<'_, Result<Vec<ResourceInstance>>> {
            Box::pin(async { Err(TroupeError::transport(&address("registry"), "unreachable")) })
        }
    }

    fn address(resource: &str) -> ResourceIdentifier {
        ResourceIdentifier::new("local", resource).unwrap()
    }

    fn cart_on(instance: &str) -> ResourceInstance {
        ResourceInstance::actor("shop", "Cart", InstanceId::from(instance), address(instance))
    }

    #[tokio::test]
    async fn test_merges_providers_and_marks_local_entries() {
        let remote = Arc::new(StaticDiscovery::new(vec![cart_on("b"), cart_on("a")]));
        let local = Arc::new(LocalAdvertisement::new(
            "shop",
            InstanceId::from("a"),
            address("a"),
            vec!["Cart".into()],
            vec!["Inventory".into()],
        ));
        let table = RoutingTable::new();
        let refresher = RoutingTableRefresher::new(
            vec![remote.clone() as Arc<dyn DiscoveryProvider>, local],
            table.clone(),
            InstanceId::from("a"),
        );

        assert_eq!(refresher.refresh().await.unwrap(), 1);
        let snapshot = table.snapshot();
        // Cart@a is advertised twice and kept once.
        assert_eq!(snapshot.len(), 3);
        let carts: Vec<(&str, bool)> = snapshot
            .entries
            .iter()
            .filter(|e| e.serves_actor("shop", "Cart"))
            .map(|e| (e.instance_id.as_str(), e.is_local))
            .collect();
        assert_eq!(carts, vec![("a", true), ("b", false)]);

        remote.set_instances(vec![]);
        refresher.refresh().await.unwrap();
        assert_eq!(table.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_snapshot() {
        let table = RoutingTable::new();
        table.replace(vec![cart_on("a")]);
        let refresher = RoutingTableRefresher::new(
            vec![
                Arc::new(StaticDiscovery::new(vec![cart_on("b")])) as Arc<dyn DiscoveryProvider>,
                Arc::new(Broken),
            ],
            table.clone(),
            InstanceId::from("x"),
        );

        assert!(refresher.refresh().await.is_err());
        let snapshot = table.snapshot();
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.entries[0].instance_id.as_str(), "a");
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_refresh_picks_up_changes() {
        let provider = Arc::new(StaticDiscovery::new(vec![cart_on("a")]));
        let table = RoutingTable::new();
        let refresher = Arc::new(RoutingTableRefresher::new(
            vec![provider.clone() as Arc<dyn DiscoveryProvider>],
            table.clone(),
            InstanceId::from("x"),
        ));
        let task = refresher.spawn(Duration::from_secs(10));

        assert!(table.wait_for_population(Duration::from_secs(11)).await);
        provider.set_instances(vec![cart_on("a"), cart_on("b")]);
        assert!(table.wait_for(Duration::from_secs(11), |s| s.len() == 2).await);
        task.stop().await;
    }
}
