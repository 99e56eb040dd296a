//! # Routing Table
//!
//! The latest snapshot of every known instance. Discovery replaces the whole
//! snapshot at once; readers hold an `Arc` to whichever snapshot was current
//! when they looked, so they never see a half-applied refresh.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

use crate::id::{InstanceId, ResourceIdentifier};

/// One routable entry: an actor type or a service, hosted by one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInstance {
    pub service_name: String,
    /// `None` when the entry advertises the service itself.
    pub actor_name: Option<String>,
    pub instance_id: InstanceId,
    pub address: ResourceIdentifier,
    #[serde(default)]
    pub is_local: bool,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl ResourceInstance {
    pub fn actor(
        service_name: impl Into<String>,
        actor_name: impl Into<String>,
        instance_id: InstanceId,
        address: ResourceIdentifier,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            actor_name: Some(actor_name.into()),
            instance_id,
            address,
            is_local: false,
            attributes: BTreeMap::new(),
        }
    }

    pub fn service(
        service_name: impl Into<String>,
        instance_id: InstanceId,
        address: ResourceIdentifier,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            actor_name: None,
            instance_id,
            address,
            is_local: false,
            attributes: BTreeMap::new(),
        }
    }

    pub fn local(mut self, is_local: bool) -> Self {
        self.is_local = is_local;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn serves_actor(&self, service_name: &str, actor_name: &str) -> bool {
        self.service_name == service_name && self.actor_name.as_deref() == Some(actor_name)
    }

    pub fn serves_service(&self, service_name: &str) -> bool {
        self.service_name == service_name && self.actor_name.is_none()
    }
}

/// An immutable view of the table at one version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingSnapshot {
    pub version: u64,
    pub entries: Vec<ResourceInstance>,
}

impl RoutingSnapshot {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Debug, Clone)]
pub struct RoutingTable {
    current: Arc<watch::Sender<Arc<RoutingSnapshot>>>,
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingTable {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(Arc::new(RoutingSnapshot::default()));
        Self {
            current: Arc::new(sender),
        }
    }

    /// Swap in a new set of entries. Returns the new version.
    pub fn replace(&self, entries: Vec<ResourceInstance>) -> u64 {
        let mut version = 0;
        self.current.send_modify(|snapshot| {
            version = snapshot.version + 1;
            *snapshot = Arc::new(RoutingSnapshot { version, entries });
        });
        debug!("Routing table replaced (version {})", version);
        version
    }

    pub fn snapshot(&self) -> Arc<RoutingSnapshot> {
        self.current.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<RoutingSnapshot>> {
        self.current.subscribe()
    }

    /// Wait up to `timeout` for a snapshot satisfying `ready`. Returns
    /// whether one showed up.
    pub async fn wait_for<F>(&self, timeout: Duration, mut ready: F) -> bool
    where
        F: FnMut(&RoutingSnapshot) -> bool,
    {
        let mut receiver = self.current.subscribe();
        let waited = tokio::time::timeout(timeout, receiver.wait_for(|snapshot| ready(snapshot.as_ref()))).await;
        matches!(waited, Ok(Ok(_)))
    }

    /// Wait up to `timeout` for the table to contain any entry.
    pub async fn wait_for_population(&self, timeout: Duration) -> bool {
        self.wait_for(timeout, |snapshot| !snapshot.is_empty()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(instance: &str) -> ResourceInstance {
        ResourceInstance::actor(
            "shop",
            "Cart",
            InstanceId::from(instance),
            ResourceIdentifier::new("local", instance).unwrap(),
        )
    }

    #[test]
    fn test_replace_bumps_version_and_keeps_old_snapshot_intact() {
        let table = RoutingTable::new();
        let before = table.snapshot();
        assert_eq!(table.replace(vec![entry("a")]), 1);
        assert_eq!(table.replace(vec![entry("a"), entry("b")]), 2);

        assert!(before.is_empty());
        let now = table.snapshot();
        assert_eq!(now.version, 2);
        assert_eq!(now.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_population() {
        let table = RoutingTable::new();
        assert!(!table.wait_for_population(Duration::from_millis(100)).await);

        let writer = table.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            writer.replace(vec![entry("a")]);
        });
        assert!(table.wait_for_population(Duration::from_secs(1)).await);
    }

    #[test]
    fn test_entry_matching() {
        let actor = entry("a");
        assert!(actor.serves_actor("shop", "Cart"));
        assert!(!actor.serves_service("shop"));
        let service = ResourceInstance::service(
            "shop",
            InstanceId::from("a"),
            ResourceIdentifier::new("local", "a").unwrap(),
        )
        .with_attribute("zone", "eu-west-1a");
        assert!(service.serves_service("shop"));
        assert_eq!(service.attributes["zone"], "eu-west-1a");
    }
}
