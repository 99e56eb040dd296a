//! # Routing
//!
//! Maps logical actor and service identities onto the instances that host
//! them. Discovery feeds a [`RoutingTable`] with whole snapshots; the
//! [`ConsistentHashRouter`] picks one entry per key from the current snapshot.

pub mod discovery;
pub mod router;
pub mod table;

pub use discovery::{DiscoveryProvider, LocalAdvertisement, RoutingTableRefresher, StaticDiscovery};
pub use router::{stable_hash, ConsistentHashRouter, HashStrategy};
pub use table::{ResourceInstance, RoutingSnapshot, RoutingTable};
